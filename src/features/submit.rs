use crate::config::ContractConfig;
use crate::domain::types::{Citizen, NewCitizen};
use crate::error::ProviderError;
use crate::features::abi::encode_add_citizen_call;
use crate::features::provider::{parse_chain_id, RpcTransport};
use crate::features::rpc::RpcReceipt;
use crate::features::session::WalletSessionManager;
use crate::storage::local_registry::LocalRegistry;
use serde_json::json;
use std::rc::Rc;
use thiserror::Error;
use tracing::{debug, info, warn};

const MAX_NAME_CHARS: usize = 120;
const MAX_CITY_CHARS: usize = 120;
const MAX_NOTE_CHARS: usize = 2000;
const MIN_AGE: u64 = 18;
const MAX_AGE: u64 = 150;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Submission {
    /// Transaction handed to the wallet. Not yet committed; see
    /// [`CitizenSubmitter::confirm`].
    Sent { tx_hash: String },
    /// The user declined in the wallet, so the record went to the session registry.
    Local(Citizen),
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SubmitError {
    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
    #[error("transaction {tx_hash} reverted")]
    Reverted { tx_hash: String },
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

/// Receipt state of a sent `addCitizen` transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Confirmation {
    /// No receipt yet; ask again later.
    Pending,
    Committed { block_number: Option<u64> },
}

pub struct CitizenSubmitter {
    contract: ContractConfig,
    registry: Rc<LocalRegistry>,
}

impl CitizenSubmitter {
    pub fn new(contract: ContractConfig, registry: Rc<LocalRegistry>) -> Self {
        Self { contract, registry }
    }

    /// Sends `addCitizen` through the wallet after connecting and moving it to
    /// the configured chain. A user rejection at any of those steps stores
    /// the record locally instead.
    pub async fn submit(
        &self,
        session: &WalletSessionManager,
        input: &NewCitizen,
    ) -> Result<Submission, SubmitError> {
        let input = input.trimmed();
        validate(&input)?;

        match self.send_on_chain(session, &input).await {
            Ok(tx_hash) => {
                info!("citizen_submitted tx_hash={tx_hash}");
                Ok(Submission::Sent { tx_hash })
            }
            Err(error) if error.is_user_rejected() => {
                let citizen = self.registry.add(&input);
                info!("citizen_stored_locally id={} reason=user_rejected", citizen.id);
                Ok(Submission::Local(citizen))
            }
            Err(error) => Err(error.into()),
        }
    }

    /// Looks up the receipt of `tx_hash` once through the session's current
    /// provider handle. A receipt with status `0x0` is [`SubmitError::Reverted`].
    pub async fn confirm(
        &self,
        session: &WalletSessionManager,
        tx_hash: &str,
    ) -> Result<Confirmation, SubmitError> {
        let handle = session
            .provider_handle()
            .ok_or(ProviderError::ProviderMissing)?;
        let raw = handle
            .request("eth_getTransactionReceipt", json!([tx_hash]))
            .await?;
        if raw.is_null() {
            debug!("citizen_receipt_pending tx_hash={tx_hash}");
            return Ok(Confirmation::Pending);
        }
        let receipt = serde_json::from_value::<RpcReceipt>(raw).map_err(|error| {
            ProviderError::MalformedResponse(format!(
                "failed to decode eth_getTransactionReceipt result: {error}"
            ))
        })?;
        if receipt.reverted() {
            warn!("citizen_tx_reverted tx_hash={tx_hash}");
            return Err(SubmitError::Reverted {
                tx_hash: tx_hash.to_string(),
            });
        }
        let block_number = receipt
            .block_number
            .as_deref()
            .and_then(|raw| parse_chain_id(raw).ok());
        info!("citizen_tx_committed tx_hash={tx_hash} block={block_number:?}");
        Ok(Confirmation::Committed { block_number })
    }

    async fn send_on_chain(
        &self,
        session: &WalletSessionManager,
        input: &NewCitizen,
    ) -> Result<String, ProviderError> {
        let connected = session.connect().await?;
        session.ensure_network().await?;
        let signer = session.signer().unwrap_or(connected);
        signer
            .send_transaction(&self.contract.address, &encode_add_citizen_call(input))
            .await
    }
}

/// Form-level checks on already trimmed input.
pub fn validate(input: &NewCitizen) -> Result<(), SubmitError> {
    check_text("name", &input.name, MAX_NAME_CHARS)?;
    if !(MIN_AGE..=MAX_AGE).contains(&input.age) {
        return Err(SubmitError::Invalid {
            field: "age",
            reason: format!("must be between {MIN_AGE} and {MAX_AGE}"),
        });
    }
    check_text("city", &input.city, MAX_CITY_CHARS)?;
    check_text("note", &input.note, MAX_NOTE_CHARS)
}

fn check_text(field: &'static str, value: &str, max_chars: usize) -> Result<(), SubmitError> {
    if value.is_empty() {
        return Err(SubmitError::Invalid {
            field,
            reason: "is required".to_string(),
        });
    }
    if value.chars().count() > max_chars {
        return Err(SubmitError::Invalid {
            field,
            reason: format!("exceeds {max_chars} characters"),
        });
    }
    Ok(())
}
