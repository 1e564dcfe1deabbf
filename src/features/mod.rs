pub mod abi;
pub mod provider;
pub mod reconcile;
pub mod rpc;
pub mod session;
pub mod submit;

pub use provider::{
    Eip1193Provider, InjectedSlot, ProviderEvent, ProviderEventKind, ProviderHandle,
    ProviderLocator, RpcTransport, SignerHandle,
};
pub use reconcile::LedgerReconciler;
#[cfg(not(target_arch = "wasm32"))]
pub use rpc::HttpRpcTransport;
pub use rpc::{ChainReader, RpcChainReader};
pub use session::{NetworkOutcome, WalletSessionManager};
pub use submit::{CitizenSubmitter, Confirmation, SubmitError, Submission};
