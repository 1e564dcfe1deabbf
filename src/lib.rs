//! Client core for an EVM-backed citizen registry: wallet session
//! negotiation, event-log reconciliation and a session-scoped fallback
//! registry for records the user declined to sign.

pub mod config;
pub mod domain;
pub mod error;
pub mod features;
pub mod storage;
#[cfg(test)]
mod test_support;
#[cfg(all(feature = "web", target_arch = "wasm32"))]
pub mod web;

pub use config::{AppConfig, ChainConfig, ContractConfig};
pub use domain::types::{Citizen, NewCitizen, SessionSnapshot};
pub use error::{ProviderError, StorageError};
pub use features::{
    CitizenSubmitter, Confirmation, LedgerReconciler, NetworkOutcome, Submission,
    WalletSessionManager,
};
pub use storage::local_registry::LocalRegistry;
pub use storage::session_store::{MemorySessionStorage, SessionStorage};

use crate::features::provider::ProviderLocator;
use std::rc::Rc;

/// The three components wired against one configuration, one wallet locator
/// and one session store.
pub struct CitizenClient {
    config: AppConfig,
    session: WalletSessionManager,
    reconciler: LedgerReconciler,
    submitter: CitizenSubmitter,
}

impl CitizenClient {
    pub fn mount(
        config: AppConfig,
        locator: Rc<dyn ProviderLocator>,
        storage: Rc<dyn SessionStorage>,
    ) -> Self {
        let registry = Rc::new(LocalRegistry::new(storage));
        Self {
            session: WalletSessionManager::mount(locator, config.chain.clone()),
            reconciler: LedgerReconciler::new(config.contract.clone(), registry.clone()),
            submitter: CitizenSubmitter::new(config.contract.clone(), registry),
            config,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn session(&self) -> &WalletSessionManager {
        &self.session
    }

    pub fn reconciler(&self) -> &LedgerReconciler {
        &self.reconciler
    }

    pub fn submitter(&self) -> &CitizenSubmitter {
        &self.submitter
    }

    pub fn registry(&self) -> &Rc<LocalRegistry> {
        self.reconciler.registry()
    }

    /// Submits through this client's own session.
    pub async fn submit(&self, input: &NewCitizen) -> Result<Submission, features::SubmitError> {
        self.submitter.submit(&self.session, input).await
    }

    pub async fn confirm(&self, tx_hash: &str) -> Result<Confirmation, features::SubmitError> {
        self.submitter.confirm(&self.session, tx_hash).await
    }
}
