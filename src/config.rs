//! Target network and contract configuration.
//!
//! Read once at startup from a [`ConfigSource`]; any unset, blank or
//! unparsable key falls back to its hard-coded default.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::warn;

pub const CHAIN_ID_HEX_KEY: &str = "CITIZEN_CHAIN_ID_HEX";
pub const CHAIN_ID_KEY: &str = "CITIZEN_CHAIN_ID";
pub const CHAIN_NAME_KEY: &str = "CITIZEN_CHAIN_NAME";
pub const RPC_URLS_KEY: &str = "CITIZEN_RPC_URLS";
pub const EXPLORER_URLS_KEY: &str = "CITIZEN_EXPLORER_URLS";
pub const CURRENCY_NAME_KEY: &str = "CITIZEN_CURRENCY_NAME";
pub const CURRENCY_SYMBOL_KEY: &str = "CITIZEN_CURRENCY_SYMBOL";
pub const CURRENCY_DECIMALS_KEY: &str = "CITIZEN_CURRENCY_DECIMALS";
pub const CONTRACT_ADDRESS_KEY: &str = "CITIZEN_CONTRACT_ADDRESS";
pub const DEPLOY_BLOCK_KEY: &str = "CITIZEN_DEPLOY_BLOCK";

const DEFAULT_CHAIN_ID: u64 = 11_155_111;
const DEFAULT_CHAIN_ID_HEX: &str = "0xAA36A7";
const DEFAULT_CHAIN_NAME: &str = "Ethereum Sepolia";
const DEFAULT_RPC_URL: &str = "https://ethereum-sepolia-rpc.publicnode.com";
const DEFAULT_EXPLORER_URL: &str = "https://sepolia.etherscan.io";
const DEFAULT_CURRENCY_NAME: &str = "SepoliaETH";
const DEFAULT_CURRENCY_SYMBOL: &str = "ETH";
const DEFAULT_CURRENCY_DECIMALS: u8 = 18;
const DEFAULT_CONTRACT_ADDRESS: &str = "0xa011799d9467d2b33768fb1a3512f1b468b87e96";
const DEFAULT_DEPLOY_BLOCK: u64 = 2_273_494;

pub trait ConfigSource {
    fn var(&self, key: &str) -> Option<String>;
}

/// Reads the process environment. On `wasm32` every lookup misses and the
/// defaults apply.
pub struct ProcessEnv;

impl ConfigSource for ProcessEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

impl ConfigSource for HashMap<String, String> {
    fn var(&self, key: &str) -> Option<String> {
        self.get(key).cloned()
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct NativeCurrency {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChainConfig {
    pub chain_id: u64,
    pub chain_id_hex: String,
    pub chain_name: String,
    pub rpc_urls: Vec<String>,
    pub block_explorer_urls: Vec<String>,
    pub native_currency: NativeCurrency,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            chain_id: DEFAULT_CHAIN_ID,
            chain_id_hex: DEFAULT_CHAIN_ID_HEX.to_string(),
            chain_name: DEFAULT_CHAIN_NAME.to_string(),
            rpc_urls: vec![DEFAULT_RPC_URL.to_string()],
            block_explorer_urls: vec![DEFAULT_EXPLORER_URL.to_string()],
            native_currency: NativeCurrency {
                name: DEFAULT_CURRENCY_NAME.to_string(),
                symbol: DEFAULT_CURRENCY_SYMBOL.to_string(),
                decimals: DEFAULT_CURRENCY_DECIMALS,
            },
        }
    }
}

impl ChainConfig {
    /// Case-insensitive comparison of a wallet-reported hex chain id.
    pub fn is_target_hex(&self, chain_id_hex: &str) -> bool {
        chain_id_hex.trim().eq_ignore_ascii_case(self.chain_id_hex.trim())
    }

    /// Parameters for `wallet_addEthereumChain`.
    pub fn add_chain_params(&self) -> serde_json::Value {
        serde_json::json!({
            "chainId": self.chain_id_hex,
            "chainName": self.chain_name,
            "rpcUrls": self.rpc_urls,
            "nativeCurrency": self.native_currency,
            "blockExplorerUrls": self.block_explorer_urls,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContractConfig {
    /// Lower-case, 0x-prefixed.
    pub address: String,
    pub deploy_block: u64,
}

impl Default for ContractConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_CONTRACT_ADDRESS.to_string(),
            deploy_block: DEFAULT_DEPLOY_BLOCK,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AppConfig {
    pub chain: ChainConfig,
    pub contract: ContractConfig,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_source(&ProcessEnv)
    }

    pub fn from_source(source: &dyn ConfigSource) -> Self {
        let defaults = ChainConfig::default();

        let hex_override = read_value(source, CHAIN_ID_HEX_KEY, parse_chain_id_hex);
        let numeric_override = read_value(source, CHAIN_ID_KEY, |raw| {
            raw.parse::<u64>().map_err(|error| error.to_string())
        });
        let (chain_id, chain_id_hex) = match (numeric_override, hex_override) {
            (Some(id), Some((hex_id, hex))) => {
                if id != hex_id {
                    warn!(
                        "config_value_ignored key={CHAIN_ID_KEY} value={id} error=disagrees with {CHAIN_ID_HEX_KEY}={hex}"
                    );
                }
                (hex_id, hex)
            }
            (Some(id), None) => (id, format!("0x{id:X}")),
            (None, Some((id, hex))) => (id, hex),
            (None, None) => (defaults.chain_id, defaults.chain_id_hex),
        };

        let native_currency = NativeCurrency {
            name: read_text(source, CURRENCY_NAME_KEY).unwrap_or(defaults.native_currency.name),
            symbol: read_text(source, CURRENCY_SYMBOL_KEY)
                .unwrap_or(defaults.native_currency.symbol),
            decimals: read_value(source, CURRENCY_DECIMALS_KEY, |raw| {
                raw.parse::<u8>().map_err(|error| error.to_string())
            })
            .unwrap_or(defaults.native_currency.decimals),
        };

        let chain = ChainConfig {
            chain_id,
            chain_id_hex,
            chain_name: read_text(source, CHAIN_NAME_KEY).unwrap_or(defaults.chain_name),
            rpc_urls: read_list(source, RPC_URLS_KEY).unwrap_or(defaults.rpc_urls),
            block_explorer_urls: read_list(source, EXPLORER_URLS_KEY)
                .unwrap_or(defaults.block_explorer_urls),
            native_currency,
        };

        let contract_defaults = ContractConfig::default();
        let contract = ContractConfig {
            address: read_value(source, CONTRACT_ADDRESS_KEY, normalize_address)
                .unwrap_or(contract_defaults.address),
            deploy_block: read_value(source, DEPLOY_BLOCK_KEY, |raw| {
                raw.parse::<u64>().map_err(|error| error.to_string())
            })
            .unwrap_or(contract_defaults.deploy_block),
        };

        Self { chain, contract }
    }
}

fn read_text(source: &dyn ConfigSource, key: &str) -> Option<String> {
    source
        .var(key)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn read_list(source: &dyn ConfigSource, key: &str) -> Option<Vec<String>> {
    let raw = read_text(source, key)?;
    let items: Vec<String> = raw
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect();
    if items.is_empty() {
        None
    } else {
        Some(items)
    }
}

fn read_value<T>(
    source: &dyn ConfigSource,
    key: &str,
    parse: impl FnOnce(&str) -> Result<T, String>,
) -> Option<T> {
    let raw = read_text(source, key)?;
    match parse(&raw) {
        Ok(value) => Some(value),
        Err(error) => {
            warn!("config_value_ignored key={key} value={raw} error={error}");
            None
        }
    }
}

fn parse_chain_id_hex(raw: &str) -> Result<(u64, String), String> {
    let digits = raw
        .strip_prefix("0x")
        .or_else(|| raw.strip_prefix("0X"))
        .ok_or_else(|| "chain id must be 0x-prefixed hex".to_string())?;
    let id = u64::from_str_radix(digits, 16)
        .map_err(|error| format!("failed to parse chain id as hex: {error}"))?;
    Ok((id, raw.to_string()))
}

pub(crate) fn normalize_address(raw: &str) -> Result<String, String> {
    let trimmed = raw.trim().to_ascii_lowercase();
    let valid = trimmed.len() == 42
        && trimmed.starts_with("0x")
        && trimmed
            .as_bytes()
            .iter()
            .skip(2)
            .all(|byte| byte.is_ascii_hexdigit());
    if !valid {
        return Err("address must be a 0x-prefixed 20-byte hex string".to_string());
    }
    Ok(trimmed)
}
