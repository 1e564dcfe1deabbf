//! Browser bindings: `window.ethereum` as an [`Eip1193Provider`] and
//! `window.sessionStorage` as the session store.

use crate::config::AppConfig;
use crate::error::{ProviderError, RpcErrorObject, StorageError};
use crate::features::provider::{
    parse_accounts, Eip1193Provider, ListenerId, ProviderEvent, ProviderEventKind,
    ProviderListener, ProviderLocator, RpcTransport,
};
use crate::storage::session_store::SessionStorage;
use crate::CitizenClient;
use async_trait::async_trait;
use js_sys::{Function, Object, Promise, Reflect, JSON};
use serde_json::Value;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;
use tracing::warn;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use wasm_bindgen_futures::JsFuture;

type JsListener = Closure<dyn FnMut(JsValue)>;

/// The wallet object a browser extension injects as `window.ethereum`.
pub struct InjectedEthereum {
    ethereum: JsValue,
    listeners: RefCell<HashMap<ListenerId, (ProviderEventKind, JsListener)>>,
    next_listener: Cell<u64>,
}

impl InjectedEthereum {
    pub fn new(ethereum: JsValue) -> Self {
        Self {
            ethereum,
            listeners: RefCell::new(HashMap::new()),
            next_listener: Cell::new(1),
        }
    }

    pub fn from_window() -> Option<Self> {
        window_ethereum().map(Self::new)
    }

    fn method(&self, name: &str) -> Result<Function, ProviderError> {
        Reflect::get(&self.ethereum, &JsValue::from_str(name))
            .map_err(js_to_provider_error)?
            .dyn_into::<Function>()
            .map_err(|_| ProviderError::transport(format!("ethereum.{name} is not a function")))
    }
}

#[async_trait(?Send)]
impl RpcTransport for InjectedEthereum {
    async fn request(&self, method: &str, params: Value) -> Result<Value, ProviderError> {
        let args = Object::new();
        set_property(&args, "method", &JsValue::from_str(method))?;
        set_property(&args, "params", &json_to_js(&params)?)?;

        let pending = self
            .method("request")?
            .call1(&self.ethereum, &args)
            .map_err(js_to_provider_error)?
            .dyn_into::<Promise>()
            .map_err(|_| {
                ProviderError::MalformedResponse(
                    "ethereum.request did not return a promise".to_string(),
                )
            })?;
        let result = JsFuture::from(pending)
            .await
            .map_err(js_to_provider_error)?;
        js_to_json(&result).map_err(ProviderError::MalformedResponse)
    }
}

impl Eip1193Provider for InjectedEthereum {
    fn on(&self, kind: ProviderEventKind, listener: ProviderListener) -> ListenerId {
        let id = ListenerId(self.next_listener.get());
        self.next_listener.set(id.0 + 1);

        let callback = JsListener::new(move |payload: JsValue| match decode_event(kind, &payload) {
            Ok(event) => listener(event),
            Err(error) => warn!("wallet_event_undecodable kind={} error={error}", kind.as_str()),
        });
        let subscribed = self.method("on").and_then(|on| {
            on.call2(
                &self.ethereum,
                &JsValue::from_str(kind.as_str()),
                callback.as_ref(),
            )
            .map_err(js_to_provider_error)
        });
        if let Err(error) = subscribed {
            warn!("wallet_subscribe_failed kind={} error={error}", kind.as_str());
        }
        self.listeners.borrow_mut().insert(id, (kind, callback));
        id
    }

    fn remove_listener(&self, kind: ProviderEventKind, id: ListenerId) {
        let Some((registered_kind, callback)) = self.listeners.borrow_mut().remove(&id) else {
            return;
        };
        if registered_kind != kind {
            warn!(
                "wallet_unsubscribe_kind_mismatch id={} expected={} got={}",
                id.0,
                registered_kind.as_str(),
                kind.as_str()
            );
        }
        let removed = self.method("removeListener").and_then(|remove| {
            remove
                .call2(
                    &self.ethereum,
                    &JsValue::from_str(registered_kind.as_str()),
                    callback.as_ref(),
                )
                .map_err(js_to_provider_error)
        });
        if let Err(error) = removed {
            warn!(
                "wallet_unsubscribe_failed kind={} error={error}",
                registered_kind.as_str()
            );
        }
    }
}

/// Looks up `window.ethereum` on every call; the same injected object keeps
/// its wrapper so listener bookkeeping stays in one place.
#[derive(Default)]
pub struct WindowLocator {
    current: RefCell<Option<Rc<InjectedEthereum>>>,
}

impl ProviderLocator for WindowLocator {
    fn injected(&self) -> Option<Rc<dyn Eip1193Provider>> {
        let Some(ethereum) = window_ethereum() else {
            self.current.borrow_mut().take();
            return None;
        };
        let mut current = self.current.borrow_mut();
        let reusable = current
            .as_ref()
            .is_some_and(|existing| Object::is(&existing.ethereum, &ethereum));
        if !reusable {
            *current = Some(Rc::new(InjectedEthereum::new(ethereum)));
        }
        current
            .clone()
            .map(|provider| provider as Rc<dyn Eip1193Provider>)
    }
}

pub struct BrowserSessionStorage {
    storage: web_sys::Storage,
}

impl BrowserSessionStorage {
    pub fn from_window() -> Result<Self, StorageError> {
        let window = web_sys::window()
            .ok_or_else(|| StorageError::Unavailable("no window object".to_string()))?;
        let storage = window
            .session_storage()
            .map_err(js_to_storage_error)?
            .ok_or_else(|| StorageError::Unavailable("sessionStorage is disabled".to_string()))?;
        Ok(Self { storage })
    }
}

impl SessionStorage for BrowserSessionStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.storage.get_item(key).map_err(js_to_storage_error)
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.storage.set_item(key, value).map_err(js_to_storage_error)
    }
}

/// Wires a [`CitizenClient`] to the page and starts the initial identity
/// queries on the browser task queue.
pub fn mount_in_browser(config: AppConfig) -> Result<CitizenClient, StorageError> {
    let storage = Rc::new(BrowserSessionStorage::from_window()?);
    let client = CitizenClient::mount(config, Rc::new(WindowLocator::default()), storage);
    wasm_bindgen_futures::spawn_local(client.session().identity_queries());
    Ok(client)
}

fn window_ethereum() -> Option<JsValue> {
    let window = web_sys::window()?;
    let ethereum = Reflect::get(&window, &JsValue::from_str("ethereum")).ok()?;
    if ethereum.is_undefined() || ethereum.is_null() {
        return None;
    }
    Some(ethereum)
}

fn decode_event(kind: ProviderEventKind, payload: &JsValue) -> Result<ProviderEvent, String> {
    match kind {
        ProviderEventKind::AccountsChanged => {
            parse_accounts(&js_to_json(payload)?).map(ProviderEvent::AccountsChanged)
        }
        ProviderEventKind::ChainChanged => payload
            .as_string()
            .map(ProviderEvent::ChainChanged)
            .ok_or_else(|| "chainChanged payload was not a string".to_string()),
    }
}

fn set_property(target: &Object, key: &str, value: &JsValue) -> Result<(), ProviderError> {
    Reflect::set(target, &JsValue::from_str(key), value)
        .map(|_| ())
        .map_err(js_to_provider_error)
}

fn json_to_js(value: &Value) -> Result<JsValue, ProviderError> {
    let text = serde_json::to_string(value).map_err(|error| {
        ProviderError::MalformedResponse(format!("failed to serialize request params: {error}"))
    })?;
    JSON::parse(&text).map_err(js_to_provider_error)
}

fn js_to_json(value: &JsValue) -> Result<Value, String> {
    if value.is_undefined() || value.is_null() {
        return Ok(Value::Null);
    }
    let text = JSON::stringify(value)
        .map_err(|error| format!("value is not JSON-serializable: {error:?}"))?
        .as_string()
        .ok_or_else(|| "JSON.stringify returned a non-string".to_string())?;
    serde_json::from_str(&text).map_err(|error| format!("failed to parse wallet JSON: {error}"))
}

fn string_property(target: &JsValue, key: &str) -> Option<String> {
    Reflect::get(target, &JsValue::from_str(key))
        .ok()
        .and_then(|value| value.as_string())
}

/// Wallet rejections are plain objects with `code`, `message` and maybe `data`.
fn js_to_provider_error(error: JsValue) -> ProviderError {
    let code = Reflect::get(&error, &JsValue::from_str("code"))
        .ok()
        .and_then(|value| value.as_f64());
    let message = string_property(&error, "message").unwrap_or_else(|| format!("{error:?}"));
    match code {
        Some(code) => {
            let data = Reflect::get(&error, &JsValue::from_str("data"))
                .ok()
                .and_then(|value| js_to_json(&value).ok())
                .filter(|value| !value.is_null());
            ProviderError::from_rpc_error(RpcErrorObject {
                code: code as i64,
                message,
                data,
            })
        }
        None => ProviderError::transport(message),
    }
}

fn js_to_storage_error(error: JsValue) -> StorageError {
    if string_property(&error, "name").as_deref() == Some("QuotaExceededError") {
        return StorageError::QuotaExceeded;
    }
    StorageError::Unavailable(
        string_property(&error, "message").unwrap_or_else(|| format!("{error:?}")),
    )
}
