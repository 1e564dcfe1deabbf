use crate::error::{ProviderError, RpcErrorObject, StorageError};
use crate::features::abi;
use crate::features::provider::{
    Eip1193Provider, ListenerId, ProviderEvent, ProviderEventKind, ProviderListener, RpcTransport,
};
use crate::features::rpc::{ChainReader, LogFilter, RpcLog, RpcTransaction};
use crate::storage::session_store::SessionStorage;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
#[cfg(not(target_arch = "wasm32"))]
use std::sync::{Mutex, OnceLock};
use std::task::{Context, Poll, RawWaker, RawWakerVTable, Waker};

/// Drives a future to completion on the current thread. Every fake in this
/// module resolves immediately, so a bounded spin is enough.
pub(crate) fn block_on_with_spin<F: Future>(future: F) -> F::Output {
    unsafe fn clone(_ptr: *const ()) -> RawWaker {
        dummy_raw_waker()
    }
    unsafe fn wake(_ptr: *const ()) {}
    unsafe fn wake_by_ref(_ptr: *const ()) {}
    unsafe fn drop(_ptr: *const ()) {}

    fn dummy_raw_waker() -> RawWaker {
        static VTABLE: RawWakerVTable = RawWakerVTable::new(clone, wake, wake_by_ref, drop);
        RawWaker::new(std::ptr::null(), &VTABLE)
    }

    let waker = unsafe { Waker::from_raw(dummy_raw_waker()) };
    let mut context = Context::from_waker(&waker);
    let mut future = Box::pin(future);

    for _ in 0..10_000 {
        match future.as_mut().poll(&mut context) {
            Poll::Ready(output) => return output,
            Poll::Pending => std::hint::spin_loop(),
        }
    }

    panic!("future did not complete in test polling loop");
}

/// Runs `f` with temporary host environment variable overrides under a global
/// process-wide lock to avoid cross-test races.
#[cfg(not(target_arch = "wasm32"))]
pub(crate) fn with_locked_host_env<T>(vars: &[(&str, Option<&str>)], f: impl FnOnce() -> T) -> T {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard = LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .expect("host env lock should not be poisoned");

    let previous = vars
        .iter()
        .map(|(name, _)| ((*name).to_string(), std::env::var(name).ok()))
        .collect::<Vec<_>>();

    for (name, value) in vars {
        set_or_remove_var(name, *value);
    }

    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(f));

    for (name, value) in previous {
        set_or_remove_var(&name, value.as_deref());
    }

    match result {
        Ok(output) => output,
        Err(payload) => std::panic::resume_unwind(payload),
    }
}

#[cfg(not(target_arch = "wasm32"))]
fn set_or_remove_var(name: &str, value: Option<&str>) {
    match value {
        Some(v) => {
            #[allow(unused_unsafe)]
            unsafe {
                std::env::set_var(name, v);
            }
        }
        None => {
            #[allow(unused_unsafe)]
            unsafe {
                std::env::remove_var(name);
            }
        }
    }
}

pub(crate) const ALICE: &str = "0xa11ce00000000000000000000000000000000001";

#[derive(Default)]
struct FakeWalletState {
    chain_hex: String,
    exposed_accounts: Vec<String>,
    authorized_accounts: Vec<String>,
    known_chains: HashSet<String>,
    switch_error: Option<ProviderError>,
    request_accounts_error: Option<ProviderError>,
    scripted: HashMap<String, VecDeque<Result<Value, ProviderError>>>,
    calls: Vec<(String, Value)>,
    emit_on_request: HashMap<String, Vec<ProviderEvent>>,
    listeners: Vec<(ListenerId, ProviderEventKind, ProviderListener)>,
    removed: Vec<ListenerId>,
}

/// In-memory stand-in for an injected wallet.
pub(crate) struct FakeWallet {
    state: RefCell<FakeWalletState>,
    next_listener: Cell<u64>,
}

impl FakeWallet {
    pub(crate) fn on_chain(chain_hex: &str) -> Self {
        let mut known_chains = HashSet::new();
        known_chains.insert(chain_hex.to_ascii_lowercase());
        Self {
            state: RefCell::new(FakeWalletState {
                chain_hex: chain_hex.to_string(),
                authorized_accounts: vec![ALICE.to_string()],
                known_chains,
                ..FakeWalletState::default()
            }),
            next_listener: Cell::new(1),
        }
    }

    pub(crate) fn set_accounts(&self, accounts: &[&str]) {
        self.state.borrow_mut().exposed_accounts =
            accounts.iter().map(|account| account.to_string()).collect();
    }

    pub(crate) fn knows_chain(&self, chain_hex: &str) {
        self.state
            .borrow_mut()
            .known_chains
            .insert(chain_hex.to_ascii_lowercase());
    }

    pub(crate) fn fail_switch_with(&self, error: ProviderError) {
        self.state.borrow_mut().switch_error = Some(error);
    }

    pub(crate) fn reject_account_requests(&self) {
        self.state.borrow_mut().request_accounts_error = Some(ProviderError::from_rpc_error(
            RpcErrorObject::new(4001, "User rejected the request."),
        ));
    }

    pub(crate) fn script(&self, method: &str, result: Result<Value, ProviderError>) {
        self.state
            .borrow_mut()
            .scripted
            .entry(method.to_string())
            .or_default()
            .push_back(result);
    }

    /// Fires `event` to listeners while the next `method` request is in flight,
    /// before that request answers.
    pub(crate) fn emit_during(&self, method: &str, event: ProviderEvent) {
        self.state
            .borrow_mut()
            .emit_on_request
            .entry(method.to_string())
            .or_default()
            .push(event);
    }

    pub(crate) fn calls_to(&self, method: &str) -> Vec<Value> {
        self.state
            .borrow()
            .calls
            .iter()
            .filter(|(name, _)| name == method)
            .map(|(_, params)| params.clone())
            .collect()
    }

    pub(crate) fn listener_count(&self) -> usize {
        self.state.borrow().listeners.len()
    }

    pub(crate) fn removed_listeners(&self) -> Vec<ListenerId> {
        self.state.borrow().removed.clone()
    }

    /// Pushes a notification to every subscribed listener of its kind.
    pub(crate) fn emit(&self, event: ProviderEvent) {
        let listeners: Vec<ProviderListener> = self
            .state
            .borrow()
            .listeners
            .iter()
            .filter(|(_, kind, _)| *kind == event.kind())
            .map(|(_, _, listener)| listener.clone())
            .collect();
        for listener in listeners {
            listener(event.clone());
        }
    }

    fn answer(&self, method: &str, params: &Value) -> Result<Value, ProviderError> {
        let mut state = self.state.borrow_mut();
        if let Some(result) = state
            .scripted
            .get_mut(method)
            .and_then(|queue| queue.pop_front())
        {
            return result;
        }
        match method {
            "eth_chainId" => Ok(json!(state.chain_hex)),
            "eth_accounts" => Ok(json!(state.exposed_accounts)),
            "eth_requestAccounts" => {
                if let Some(error) = state.request_accounts_error.clone() {
                    return Err(error);
                }
                state.exposed_accounts = state.authorized_accounts.clone();
                Ok(json!(state.exposed_accounts))
            }
            "wallet_switchEthereumChain" => {
                if let Some(error) = state.switch_error.clone() {
                    return Err(error);
                }
                let target = params[0]["chainId"].as_str().unwrap_or_default().to_string();
                if !state.known_chains.contains(&target.to_ascii_lowercase()) {
                    return Err(ProviderError::from_rpc_error(RpcErrorObject::new(
                        4902,
                        format!("Unrecognized chain ID \"{target}\"."),
                    )));
                }
                state.chain_hex = target;
                Ok(Value::Null)
            }
            "wallet_addEthereumChain" => {
                let target = params[0]["chainId"].as_str().unwrap_or_default().to_string();
                state.known_chains.insert(target.to_ascii_lowercase());
                state.chain_hex = target;
                Ok(Value::Null)
            }
            other => Err(ProviderError::transport(format!(
                "fake wallet has no answer for {other}"
            ))),
        }
    }
}

#[async_trait(?Send)]
impl RpcTransport for FakeWallet {
    async fn request(&self, method: &str, params: Value) -> Result<Value, ProviderError> {
        self.state
            .borrow_mut()
            .calls
            .push((method.to_string(), params.clone()));
        let pending = self
            .state
            .borrow_mut()
            .emit_on_request
            .remove(method)
            .unwrap_or_default();
        for event in pending {
            self.emit(event);
        }
        self.answer(method, &params)
    }
}

impl Eip1193Provider for FakeWallet {
    fn on(&self, kind: ProviderEventKind, listener: ProviderListener) -> ListenerId {
        let id = ListenerId(self.next_listener.get());
        self.next_listener.set(id.0 + 1);
        self.state.borrow_mut().listeners.push((id, kind, listener));
        id
    }

    fn remove_listener(&self, kind: ProviderEventKind, id: ListenerId) {
        let mut state = self.state.borrow_mut();
        state
            .listeners
            .retain(|(existing, existing_kind, _)| !(*existing == id && *existing_kind == kind));
        state.removed.push(id);
    }
}

/// Transport that replays queued answers per method and records every call.
#[derive(Default)]
pub(crate) struct ScriptedTransport {
    responses: RefCell<HashMap<String, VecDeque<Result<Value, ProviderError>>>>,
    calls: RefCell<Vec<(String, Value)>>,
}

impl ScriptedTransport {
    pub(crate) fn respond(&self, method: &str, result: Result<Value, ProviderError>) {
        self.responses
            .borrow_mut()
            .entry(method.to_string())
            .or_default()
            .push_back(result);
    }

    pub(crate) fn calls(&self) -> Vec<(String, Value)> {
        self.calls.borrow().clone()
    }
}

#[async_trait(?Send)]
impl RpcTransport for ScriptedTransport {
    async fn request(&self, method: &str, params: Value) -> Result<Value, ProviderError> {
        self.calls.borrow_mut().push((method.to_string(), params));
        self.responses
            .borrow_mut()
            .get_mut(method)
            .and_then(|queue| queue.pop_front())
            .unwrap_or_else(|| {
                Err(ProviderError::transport(format!(
                    "no scripted response for {method}"
                )))
            })
    }
}

/// Typed in-memory ledger.
#[derive(Default)]
pub(crate) struct FakeChain {
    logs: RefCell<Vec<RpcLog>>,
    logs_error: RefCell<Option<ProviderError>>,
    transactions: RefCell<HashMap<String, Result<Option<RpcTransaction>, ProviderError>>>,
    call_results: RefCell<HashMap<String, Result<String, ProviderError>>>,
    filters: RefCell<Vec<LogFilter>>,
    calls: RefCell<Vec<(String, String)>>,
}

impl FakeChain {
    /// Adds a `Citizen` log with an indexed city and returns its tx hash.
    pub(crate) fn push_log(&self, id: u64, age: u64, city: &str, name: &str) -> String {
        let tx_hash = format!("0x{:064x}", self.logs.borrow().len() + 1);
        let (topics, data) = abi::encode_citizen_log(id, age, city, name);
        self.logs.borrow_mut().push(RpcLog {
            address: crate::config::ContractConfig::default().address,
            topics,
            data,
            transaction_hash: Some(tx_hash.clone()),
            block_number: None,
            log_index: None,
        });
        tx_hash
    }

    /// Adds a three-topic `Citizen` log whose city travels in the data section.
    pub(crate) fn push_unindexed_log(&self, id: u64, age: u64, city: &str, name: &str) -> String {
        let tx_hash = format!("0x{:064x}", self.logs.borrow().len() + 1);
        let (topics, data) = abi::encode_unindexed_citizen_log(id, age, city, name);
        self.push_raw_log(RpcLog {
            address: crate::config::ContractConfig::default().address,
            topics,
            data,
            transaction_hash: Some(tx_hash.clone()),
            block_number: None,
            log_index: None,
        });
        tx_hash
    }

    pub(crate) fn push_raw_log(&self, log: RpcLog) {
        self.logs.borrow_mut().push(log);
    }

    pub(crate) fn fail_logs_with(&self, error: ProviderError) {
        *self.logs_error.borrow_mut() = Some(error);
    }

    pub(crate) fn set_transaction(
        &self,
        hash: &str,
        result: Result<Option<RpcTransaction>, ProviderError>,
    ) {
        self.transactions
            .borrow_mut()
            .insert(hash.to_string(), result);
    }

    /// Registers an `addCitizen` transaction under `hash`.
    pub(crate) fn set_add_citizen_tx(&self, hash: &str, age: u64, city: &str, name: &str) {
        let input = abi::encode_add_citizen_call(&crate::domain::types::NewCitizen {
            name: name.to_string(),
            age,
            city: city.to_string(),
            note: "note".to_string(),
        });
        self.set_transaction(
            hash,
            Ok(Some(RpcTransaction {
                hash: hash.to_string(),
                input,
                to: None,
            })),
        );
    }

    pub(crate) fn set_note(&self, id: u64, note: &str) {
        self.call_results.borrow_mut().insert(
            abi::encode_get_note_call(id),
            Ok(abi::encode_string_return(note)),
        );
    }

    pub(crate) fn filters(&self) -> Vec<LogFilter> {
        self.filters.borrow().clone()
    }

    pub(crate) fn call_count(&self) -> usize {
        self.calls.borrow().len()
    }
}

#[async_trait(?Send)]
impl ChainReader for FakeChain {
    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<RpcLog>, ProviderError> {
        self.filters.borrow_mut().push(filter.clone());
        if let Some(error) = self.logs_error.borrow().clone() {
            return Err(error);
        }
        Ok(self.logs.borrow().clone())
    }

    async fn get_transaction(&self, hash: &str) -> Result<Option<RpcTransaction>, ProviderError> {
        self.transactions
            .borrow()
            .get(hash)
            .cloned()
            .unwrap_or_else(|| Err(ProviderError::transport(format!("unknown transaction {hash}"))))
    }

    async fn call(&self, to: &str, data: &str) -> Result<String, ProviderError> {
        self.calls
            .borrow_mut()
            .push((to.to_string(), data.to_string()));
        self.call_results
            .borrow()
            .get(data)
            .cloned()
            .unwrap_or_else(|| Ok(abi::encode_string_return("")))
    }
}

/// Session storage whose reads and writes can be made to fail.
#[derive(Default)]
pub(crate) struct FlakyStorage {
    items: RefCell<HashMap<String, String>>,
    pub(crate) fail_reads: Cell<bool>,
    pub(crate) fail_writes: Cell<bool>,
}

impl FlakyStorage {
    pub(crate) fn raw(&self, key: &str) -> Option<String> {
        self.items.borrow().get(key).cloned()
    }

    pub(crate) fn put_raw(&self, key: &str, value: &str) {
        self.items
            .borrow_mut()
            .insert(key.to_string(), value.to_string());
    }
}

impl SessionStorage for FlakyStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        if self.fail_reads.get() {
            return Err(StorageError::Unavailable("storage disabled".to_string()));
        }
        Ok(self.items.borrow().get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        if self.fail_writes.get() {
            return Err(StorageError::QuotaExceeded);
        }
        self.items
            .borrow_mut()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}
