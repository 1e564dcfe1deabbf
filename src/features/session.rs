//! Wallet connectivity and chain negotiation against an injected provider.
//!
//! Account and chain id are written by explicit operations and by provider
//! notifications alike, last writer wins. Nothing sequences a notification
//! against an in-flight `connect`/`ensure_network`, and concurrent calls
//! each run their full request sequence and overwrite the exposed state in
//! completion order.

use crate::config::ChainConfig;
use crate::domain::state_machine::transition;
use crate::domain::types::{SessionEvent, SessionPhase, SessionSnapshot};
use crate::error::ProviderError;
use crate::features::provider::{
    parse_accounts, parse_chain_id, Eip1193Provider, ListenerId, ProviderEvent,
    ProviderEventKind, ProviderHandle, ProviderListener, ProviderLocator, SignerHandle,
};
use futures_util::future::{join, LocalBoxFuture};
use serde_json::json;
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use tracing::{debug, info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NetworkOutcome {
    AlreadyOnTarget,
    Switched,
    Added,
}

#[derive(Default)]
struct SessionState {
    provider: Option<ProviderHandle>,
    signer: Option<SignerHandle>,
    account: Option<String>,
    chain_id: Option<u64>,
}

struct Subscriptions {
    provider: Rc<dyn Eip1193Provider>,
    accounts: ListenerId,
    chain: ListenerId,
}

pub struct WalletSessionManager {
    locator: Rc<dyn ProviderLocator>,
    chain: ChainConfig,
    phase: Cell<SessionPhase>,
    state: Rc<RefCell<SessionState>>,
    subscriptions: RefCell<Option<Subscriptions>>,
}

impl WalletSessionManager {
    /// Detects the injected provider, wraps it and subscribes to its change
    /// notifications. Without a provider the manager stays in `NoProvider`
    /// for good; recreate it once a wallet shows up.
    ///
    /// The initial identity queries are not issued here; drive
    /// [`Self::identity_queries`] on the host's task queue.
    pub fn mount(locator: Rc<dyn ProviderLocator>, chain: ChainConfig) -> Self {
        let manager = Self {
            locator,
            chain,
            phase: Cell::new(SessionPhase::Uninitialized),
            state: Rc::new(RefCell::new(SessionState::default())),
            subscriptions: RefCell::new(None),
        };

        match manager.locator.injected() {
            Some(provider) => {
                manager.state.borrow_mut().provider =
                    Some(ProviderHandle::wrap(provider.clone()));
                let accounts = provider.on(
                    ProviderEventKind::AccountsChanged,
                    notification_listener(Rc::downgrade(&manager.state)),
                );
                let chain = provider.on(
                    ProviderEventKind::ChainChanged,
                    notification_listener(Rc::downgrade(&manager.state)),
                );
                *manager.subscriptions.borrow_mut() = Some(Subscriptions {
                    provider,
                    accounts,
                    chain,
                });
                manager.advance(SessionEvent::ProviderDetected);
                info!("wallet_session_mounted provider=injected");
            }
            None => {
                manager.advance(SessionEvent::ProviderAbsent);
                info!("wallet_session_mounted provider=none");
            }
        }
        manager
    }

    /// Current accounts and chain id, queried side by side. Failures leave
    /// the corresponding field untouched.
    pub fn identity_queries(&self) -> LocalBoxFuture<'static, ()> {
        let provider = self
            .subscriptions
            .borrow()
            .as_ref()
            .map(|subscriptions| subscriptions.provider.clone());
        let state = Rc::downgrade(&self.state);
        Box::pin(async move {
            let Some(provider) = provider else {
                return;
            };
            let (accounts, chain) = join(
                provider.request("eth_accounts", json!([])),
                provider.request("eth_chainId", json!([])),
            )
            .await;
            let Some(state) = state.upgrade() else {
                return;
            };
            match accounts
                .map_err(|error| error.to_string())
                .and_then(|raw| parse_accounts(&raw))
            {
                Ok(accounts) => state.borrow_mut().account = accounts.into_iter().next(),
                Err(error) => warn!("identity_query_failed method=eth_accounts error={error}"),
            }
            match chain.map_err(|error| error.to_string()).and_then(|raw| {
                raw.as_str()
                    .ok_or_else(|| "eth_chainId result was not a string".to_string())
                    .and_then(parse_chain_id)
            }) {
                Ok(chain_id) => state.borrow_mut().chain_id = Some(chain_id),
                Err(error) => warn!("identity_query_failed method=eth_chainId error={error}"),
            }
        })
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase.get()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let state = self.state.borrow();
        SessionSnapshot {
            ready: state.provider.is_some(),
            account: state.account.clone(),
            chain_id: state.chain_id,
        }
    }

    pub fn ready(&self) -> bool {
        self.state.borrow().provider.is_some()
    }

    pub fn account(&self) -> Option<String> {
        self.state.borrow().account.clone()
    }

    pub fn chain_id(&self) -> Option<u64> {
        self.state.borrow().chain_id
    }

    pub fn provider_handle(&self) -> Option<ProviderHandle> {
        self.state.borrow().provider.clone()
    }

    pub fn signer(&self) -> Option<SignerHandle> {
        self.state.borrow().signer.clone()
    }

    pub fn chain_config(&self) -> &ChainConfig {
        &self.chain
    }

    /// Full account handshake on a freshly wrapped provider.
    ///
    /// A user rejection of `eth_requestAccounts` comes back unchanged.
    pub async fn connect(&self) -> Result<SignerHandle, ProviderError> {
        let provider = self.locator.injected().ok_or(ProviderError::ProviderMissing)?;
        let handle = ProviderHandle::wrap(provider.clone());
        debug!("wallet_connect_started generation={}", handle.generation());

        provider.request("eth_requestAccounts", json!([])).await?;
        let signer = handle.signer().await?;
        let chain_id = handle.network().await?;

        {
            let mut state = self.state.borrow_mut();
            state.provider = Some(handle);
            state.account = Some(signer.address().to_string());
            state.signer = Some(signer.clone());
            state.chain_id = Some(chain_id);
        }
        info!(
            "wallet_connected account={} chain_id={chain_id}",
            signer.address()
        );
        Ok(signer)
    }

    /// Puts the wallet on the configured chain: switch, and if the wallet
    /// answers 4902, add the network. Any other switch failure is returned
    /// as-is.
    pub async fn ensure_network(&self) -> Result<NetworkOutcome, ProviderError> {
        let provider = self.locator.injected().ok_or(ProviderError::ProviderMissing)?;
        let current = provider.request("eth_chainId", json!([])).await?;
        if current
            .as_str()
            .is_some_and(|hex| self.chain.is_target_hex(hex))
        {
            return Ok(NetworkOutcome::AlreadyOnTarget);
        }

        info!(
            "ensure_network_switch_requested target={}",
            self.chain.chain_id_hex
        );
        let outcome = match provider
            .request(
                "wallet_switchEthereumChain",
                json!([{ "chainId": self.chain.chain_id_hex }]),
            )
            .await
        {
            Ok(_) => NetworkOutcome::Switched,
            Err(ProviderError::NetworkUnrecognized { .. }) => {
                info!(
                    "ensure_network_add_requested target={} name={}",
                    self.chain.chain_id_hex, self.chain.chain_name
                );
                provider
                    .request(
                        "wallet_addEthereumChain",
                        json!([self.chain.add_chain_params()]),
                    )
                    .await?;
                NetworkOutcome::Added
            }
            Err(error) => return Err(error),
        };

        let handle = ProviderHandle::wrap(provider);
        let chain_id = handle.network().await?;
        let account_known = self.state.borrow().account.is_some();
        let signer = if account_known {
            rederive_signer(&handle).await
        } else {
            None
        };

        {
            let mut state = self.state.borrow_mut();
            state.provider = Some(handle);
            state.chain_id = Some(chain_id);
            if let Some(signer) = signer {
                state.signer = Some(signer);
            }
        }
        info!("ensure_network_completed outcome={outcome:?} chain_id={chain_id}");
        Ok(outcome)
    }

    /// Detaches the notification listeners. Idempotent; in-flight requests
    /// are not cancelled.
    pub fn teardown(&self) {
        if let Some(subscriptions) = self.subscriptions.borrow_mut().take() {
            subscriptions
                .provider
                .remove_listener(ProviderEventKind::AccountsChanged, subscriptions.accounts);
            subscriptions
                .provider
                .remove_listener(ProviderEventKind::ChainChanged, subscriptions.chain);
        }
        if self.phase.get() != SessionPhase::Detached {
            self.advance(SessionEvent::TornDown);
        }
    }

    fn advance(&self, event: SessionEvent) {
        match transition(&self.phase.get(), &event) {
            Ok(next) => self.phase.set(next),
            Err(error) => warn!(
                "wallet_session_transition_rejected from={:?} event={} reason={}",
                error.from, error.event, error.reason
            ),
        }
    }
}

impl Drop for WalletSessionManager {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Signer re-derivation after a network change. The user may not have
/// granted account access yet, so failure only yields `None`.
async fn rederive_signer(handle: &ProviderHandle) -> Option<SignerHandle> {
    match handle.signer().await {
        Ok(signer) => Some(signer),
        Err(error) => {
            debug!("signer_rederive_skipped error={error}");
            None
        }
    }
}

fn notification_listener(state: Weak<RefCell<SessionState>>) -> ProviderListener {
    Rc::new(move |event: ProviderEvent| {
        let Some(state) = state.upgrade() else {
            return;
        };
        match event {
            ProviderEvent::AccountsChanged(accounts) => {
                let account = accounts.into_iter().next();
                debug!("wallet_accounts_changed account={account:?}");
                state.borrow_mut().account = account;
            }
            ProviderEvent::ChainChanged(hex) => {
                let chain_id = match parse_chain_id(&hex) {
                    Ok(chain_id) => Some(chain_id),
                    Err(error) => {
                        warn!("wallet_chain_changed_unparsable raw={hex} error={error}");
                        None
                    }
                };
                state.borrow_mut().chain_id = chain_id;
            }
        }
    })
}
