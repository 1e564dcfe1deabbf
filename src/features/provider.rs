//! Ports onto an injected EIP-1193 wallet provider.

use crate::error::ProviderError;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_HANDLE_GENERATION: AtomicU64 = AtomicU64::new(1);

/// Request/response half of a JSON-RPC speaking endpoint.
#[async_trait(?Send)]
pub trait RpcTransport {
    async fn request(&self, method: &str, params: Value) -> Result<Value, ProviderError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ProviderEventKind {
    AccountsChanged,
    ChainChanged,
}

impl ProviderEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AccountsChanged => "accountsChanged",
            Self::ChainChanged => "chainChanged",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProviderEvent {
    AccountsChanged(Vec<String>),
    ChainChanged(String),
}

impl ProviderEvent {
    pub fn kind(&self) -> ProviderEventKind {
        match self {
            Self::AccountsChanged(_) => ProviderEventKind::AccountsChanged,
            Self::ChainChanged(_) => ProviderEventKind::ChainChanged,
        }
    }
}

pub type ProviderListener = Rc<dyn Fn(ProviderEvent)>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

/// An injected wallet: JSON-RPC requests plus pushed change notifications.
pub trait Eip1193Provider: RpcTransport {
    fn on(&self, kind: ProviderEventKind, listener: ProviderListener) -> ListenerId;
    fn remove_listener(&self, kind: ProviderEventKind, id: ListenerId);
}

/// Answers whether a wallet is injected into the environment right now.
pub trait ProviderLocator {
    fn injected(&self) -> Option<Rc<dyn Eip1193Provider>>;
}

/// A locator whose provider can be installed or removed at runtime.
#[derive(Default)]
pub struct InjectedSlot {
    provider: RefCell<Option<Rc<dyn Eip1193Provider>>>,
}

impl InjectedSlot {
    pub fn new(provider: Option<Rc<dyn Eip1193Provider>>) -> Self {
        Self {
            provider: RefCell::new(provider),
        }
    }

    pub fn install(&self, provider: Rc<dyn Eip1193Provider>) {
        *self.provider.borrow_mut() = Some(provider);
    }

    pub fn remove(&self) {
        self.provider.borrow_mut().take();
    }
}

impl ProviderLocator for InjectedSlot {
    fn injected(&self) -> Option<Rc<dyn Eip1193Provider>> {
        self.provider.borrow().clone()
    }
}

/// Immutable wrapper around an injected provider.
///
/// Anything that changes the network context builds a new handle instead of
/// reusing an old one; the generation number tells handles apart.
#[derive(Clone)]
pub struct ProviderHandle {
    provider: Rc<dyn Eip1193Provider>,
    generation: u64,
}

impl std::fmt::Debug for ProviderHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderHandle")
            .field("generation", &self.generation)
            .finish()
    }
}

impl ProviderHandle {
    pub fn wrap(provider: Rc<dyn Eip1193Provider>) -> Self {
        Self {
            provider,
            generation: NEXT_HANDLE_GENERATION.fetch_add(1, Ordering::Relaxed),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn provider(&self) -> &Rc<dyn Eip1193Provider> {
        &self.provider
    }

    /// Numeric chain id as currently reported by the wallet.
    pub async fn network(&self) -> Result<u64, ProviderError> {
        let raw = self.provider.request("eth_chainId", json!([])).await?;
        let hex = raw.as_str().ok_or_else(|| {
            ProviderError::MalformedResponse("eth_chainId result was not a string".to_string())
        })?;
        parse_chain_id(hex).map_err(ProviderError::MalformedResponse)
    }

    /// Derives a signer for the first account the wallet exposes.
    pub async fn signer(&self) -> Result<SignerHandle, ProviderError> {
        let raw = self.provider.request("eth_accounts", json!([])).await?;
        let accounts = parse_accounts(&raw).map_err(ProviderError::MalformedResponse)?;
        let address = accounts
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::transport("wallet exposed no accounts"))?;
        Ok(SignerHandle {
            address,
            handle: self.clone(),
        })
    }
}

#[async_trait(?Send)]
impl RpcTransport for ProviderHandle {
    async fn request(&self, method: &str, params: Value) -> Result<Value, ProviderError> {
        self.provider.request(method, params).await
    }
}

#[derive(Clone, Debug)]
pub struct SignerHandle {
    address: String,
    handle: ProviderHandle,
}

impl SignerHandle {
    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn handle(&self) -> &ProviderHandle {
        &self.handle
    }

    /// Submits a transaction from this signer's account; returns the tx hash.
    pub async fn send_transaction(&self, to: &str, data: &str) -> Result<String, ProviderError> {
        let raw = self
            .handle
            .request(
                "eth_sendTransaction",
                json!([{ "from": self.address, "to": to, "data": data }]),
            )
            .await?;
        raw.as_str().map(str::to_string).ok_or_else(|| {
            ProviderError::MalformedResponse("eth_sendTransaction result was not a string".to_string())
        })
    }
}

pub fn parse_chain_id(raw: &str) -> Result<u64, String> {
    let value = raw.trim();
    let without_prefix = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .ok_or_else(|| "chain id must be 0x-prefixed hex".to_string())?;
    u64::from_str_radix(without_prefix, 16)
        .map_err(|error| format!("failed to parse chain id as hex u64: {error}"))
}

pub fn parse_accounts(raw: &Value) -> Result<Vec<String>, String> {
    let items = raw
        .as_array()
        .ok_or_else(|| "accounts result must be an array".to_string())?;
    items
        .iter()
        .map(|item| {
            item.as_str()
                .map(str::to_string)
                .ok_or_else(|| "account entries must be strings".to_string())
        })
        .collect()
}
