use crate::error::{ProviderError, RpcErrorObject};
use crate::features::provider::RpcTransport;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
#[cfg(not(target_arch = "wasm32"))]
use std::io::Read;

#[cfg(not(target_arch = "wasm32"))]
const MAX_RPC_RESPONSE_BYTES: u64 = 8 * 1024 * 1024;

/// Address- and topic-scoped `eth_getLogs` range ending at `latest`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogFilter {
    pub address: String,
    pub from_block: u64,
    pub topics: Vec<String>,
}

#[derive(Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct RpcLog {
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub data: String,
    #[serde(rename = "transactionHash", default)]
    pub transaction_hash: Option<String>,
    #[serde(rename = "blockNumber", default)]
    pub block_number: Option<String>,
    #[serde(rename = "logIndex", default)]
    pub log_index: Option<String>,
}

#[derive(Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct RpcTransaction {
    pub hash: String,
    #[serde(default)]
    pub input: String,
    #[serde(default)]
    pub to: Option<String>,
}

#[derive(Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct RpcReceipt {
    #[serde(rename = "transactionHash", default)]
    pub transaction_hash: Option<String>,
    /// `0x1` on success, `0x0` on revert. Pre-Byzantium receipts omit it.
    #[serde(default)]
    pub status: Option<String>,
    #[serde(rename = "blockNumber", default)]
    pub block_number: Option<String>,
}

impl RpcReceipt {
    pub fn reverted(&self) -> bool {
        self.status
            .as_deref()
            .is_some_and(|status| status.trim_start_matches("0x").trim_start_matches('0').is_empty())
    }
}

/// Read access to the ledger.
#[async_trait(?Send)]
pub trait ChainReader {
    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<RpcLog>, ProviderError>;
    async fn get_transaction(&self, hash: &str) -> Result<Option<RpcTransaction>, ProviderError>;
    /// Read-only contract call against the latest block; returns the raw hex result.
    async fn call(&self, to: &str, data: &str) -> Result<String, ProviderError>;
}

/// [`ChainReader`] over any JSON-RPC transport (wallet or HTTP endpoint).
#[derive(Clone, Debug)]
pub struct RpcChainReader<T> {
    transport: T,
}

impl<T: RpcTransport> RpcChainReader<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }
}

#[async_trait(?Send)]
impl<T: RpcTransport> ChainReader for RpcChainReader<T> {
    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<RpcLog>, ProviderError> {
        let params = json!([{
            "address": filter.address,
            "fromBlock": format!("0x{:x}", filter.from_block),
            "toBlock": "latest",
            "topics": filter.topics,
        }]);
        let raw = self.transport.request("eth_getLogs", params).await?;
        serde_json::from_value::<Vec<RpcLog>>(raw).map_err(|error| {
            ProviderError::MalformedResponse(format!("failed to decode eth_getLogs result: {error}"))
        })
    }

    async fn get_transaction(&self, hash: &str) -> Result<Option<RpcTransaction>, ProviderError> {
        let raw = self
            .transport
            .request("eth_getTransactionByHash", json!([hash]))
            .await?;
        if raw.is_null() {
            return Ok(None);
        }
        serde_json::from_value::<RpcTransaction>(raw)
            .map(Some)
            .map_err(|error| {
                ProviderError::MalformedResponse(format!(
                    "failed to decode eth_getTransactionByHash result: {error}"
                ))
            })
    }

    async fn call(&self, to: &str, data: &str) -> Result<String, ProviderError> {
        let raw = self
            .transport
            .request("eth_call", json!([{ "to": to, "data": data }, "latest"]))
            .await?;
        raw.as_str().map(str::to_string).ok_or_else(|| {
            ProviderError::MalformedResponse("eth_call result was not a string".to_string())
        })
    }
}

/// JSON-RPC 2.0 over HTTP POST for native hosts, with an optional fallback URL.
#[cfg(not(target_arch = "wasm32"))]
#[derive(Clone, Debug)]
pub struct HttpRpcTransport {
    rpc_url: String,
    fallback_rpc_url: Option<String>,
}

#[cfg(not(target_arch = "wasm32"))]
impl HttpRpcTransport {
    pub fn from_chain_config(chain: &crate::config::ChainConfig) -> Result<Self, String> {
        let mut urls = chain
            .rpc_urls
            .iter()
            .map(|url| url.trim())
            .filter(|url| !url.is_empty());
        let rpc_url = urls
            .next()
            .ok_or_else(|| "rpc url is not configured".to_string())?
            .to_string();
        Ok(Self {
            rpc_url,
            fallback_rpc_url: urls.next().map(str::to_string),
        })
    }

    fn http_post(&self, body: &[u8]) -> Result<Vec<u8>, ProviderError> {
        match try_http_post(&self.rpc_url, body) {
            Ok(body) => Ok(body),
            Err(primary_error) => match self.fallback_rpc_url.as_deref() {
                Some(fallback_url) => {
                    tracing::warn!(
                        "rpc_primary_failed url={} error={primary_error}; trying fallback",
                        self.rpc_url
                    );
                    try_http_post(fallback_url, body).map_err(|fallback_error| {
                        ProviderError::transport(format!(
                            "primary rpc failed: {primary_error}; fallback rpc failed: {fallback_error}"
                        ))
                    })
                }
                None => Err(ProviderError::transport(primary_error)),
            },
        }
    }
}

#[cfg(not(target_arch = "wasm32"))]
#[async_trait(?Send)]
impl RpcTransport for HttpRpcTransport {
    /// Blocks the calling thread for the whole HTTP round trip.
    async fn request(&self, method: &str, params: Value) -> Result<Value, ProviderError> {
        let body = serde_json::to_vec(&json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        }))
        .map_err(|error| {
            ProviderError::MalformedResponse(format!("failed to serialize {method} request: {error}"))
        })?;
        let raw = self.http_post(&body)?;
        let response: Value = serde_json::from_slice(&raw).map_err(|error| {
            ProviderError::MalformedResponse(format!("failed to parse {method} response JSON: {error}"))
        })?;
        unwrap_rpc_response(method, response)
    }
}

#[cfg(not(target_arch = "wasm32"))]
fn try_http_post(url: &str, body: &[u8]) -> Result<Vec<u8>, String> {
    let response = ureq::post(url)
        .set("content-type", "application/json")
        .send_bytes(body)
        .map_err(|error| match error {
            ureq::Error::Status(status, _) => format!("rpc returned status {status}"),
            ureq::Error::Transport(transport) => format!("rpc transport failed: {transport}"),
        })?;

    let mut raw = Vec::new();
    response
        .into_reader()
        .take(MAX_RPC_RESPONSE_BYTES.saturating_add(1))
        .read_to_end(&mut raw)
        .map_err(|error| format!("failed to read rpc response body: {error}"))?;
    if u64::try_from(raw.len()).unwrap_or(u64::MAX) > MAX_RPC_RESPONSE_BYTES {
        return Err(format!(
            "rpc response exceeded {MAX_RPC_RESPONSE_BYTES} bytes"
        ));
    }
    Ok(raw)
}

/// Splits a JSON-RPC envelope into its `result` or a decoded provider error.
pub fn unwrap_rpc_response(method: &str, response: Value) -> Result<Value, ProviderError> {
    if let Some(error) = response.get("error") {
        let raw = serde_json::from_value::<RpcErrorObject>(error.clone()).unwrap_or_else(|_| {
            RpcErrorObject {
                code: -32603,
                message: format!("{method} returned error {error}"),
                data: None,
            }
        });
        return Err(ProviderError::from_rpc_error(raw));
    }
    response
        .get("result")
        .cloned()
        .ok_or_else(|| ProviderError::MalformedResponse(format!("{method} result was missing")))
}
