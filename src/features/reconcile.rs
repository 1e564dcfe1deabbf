//! Rebuilds the citizen list from contract event history plus the session
//! registry, and resolves notes on demand.

use crate::config::ContractConfig;
use crate::domain::types::{AddCitizenCall, Citizen, CitizenLog, CityField};
use crate::error::ProviderError;
use crate::features::abi::{
    citizen_topic0, decode_add_citizen_call, decode_citizen_log, decode_string_return,
    encode_get_note_call,
};
use crate::features::rpc::{ChainReader, LogFilter};
use crate::storage::local_registry::LocalRegistry;
use crate::storage::note_cache::NoteCache;
use futures_util::future::join_all;
use regex::Regex;
use std::collections::BTreeMap;
use std::rc::Rc;
use std::sync::OnceLock;
use tracing::{debug, info, warn};

pub const UNKNOWN_CITY: &str = "Unknown";

pub struct LedgerReconciler {
    contract: ContractConfig,
    registry: Rc<LocalRegistry>,
    notes: NoteCache,
}

impl LedgerReconciler {
    pub fn new(contract: ContractConfig, registry: Rc<LocalRegistry>) -> Self {
        Self {
            contract,
            registry,
            notes: NoteCache::new(),
        }
    }

    pub fn contract(&self) -> &ContractConfig {
        &self.contract
    }

    pub fn registry(&self) -> &Rc<LocalRegistry> {
        &self.registry
    }

    /// Every `Citizen` emission from the deployment block on.
    pub fn log_filter(&self) -> LogFilter {
        LogFilter {
            address: self.contract.address.clone(),
            from_block: self.contract.deploy_block,
            topics: vec![citizen_topic0()],
        }
    }

    /// De-duplicated, id-sorted list of on-chain and session-local citizens.
    ///
    /// Only the log query itself can fail the call. Per-log problems degrade
    /// to whatever the log alone yields.
    pub async fn fetch_citizens(
        &self,
        reader: &dyn ChainReader,
    ) -> Result<Vec<Citizen>, ProviderError> {
        let logs = reader.get_logs(&self.log_filter()).await?;
        let total = logs.len();

        let decoded = logs
            .into_iter()
            .filter_map(|log| {
                match decode_citizen_log(&log.topics, &log.data, log.transaction_hash.clone()) {
                    Ok(decoded) => Some(decoded),
                    Err(error) => {
                        warn!(
                            "citizen_log_skipped tx={} error={error}",
                            log.transaction_hash.as_deref().unwrap_or("-")
                        );
                        None
                    }
                }
            })
            .collect::<Vec<_>>();

        let mut combined =
            join_all(decoded.into_iter().map(|log| recover_citizen(reader, log))).await;
        let local = self.registry.list_all();
        let local_count = local.len();
        combined.extend(local);

        let citizens = dedup_by_id(combined);
        info!(
            "citizens_reconciled logs={total} local={local_count} citizens={}",
            citizens.len()
        );
        Ok(citizens)
    }

    /// Note for one citizen. Negative ids are answered from the session
    /// registry, everything else from the contract's read accessor.
    pub async fn fetch_note(
        &self,
        reader: &dyn ChainReader,
        id: i64,
    ) -> Result<Option<String>, ProviderError> {
        if id < 0 {
            return Ok(self.registry.note_for(id));
        }
        let raw = reader
            .call(&self.contract.address, &encode_get_note_call(id.unsigned_abs()))
            .await?;
        decode_string_return(&raw)
            .map(Some)
            .map_err(ProviderError::MalformedResponse)
    }

    /// [`Self::fetch_note`] behind the per-reconciler [`NoteCache`].
    pub async fn note(
        &self,
        reader: &dyn ChainReader,
        id: i64,
    ) -> Result<Option<String>, ProviderError> {
        self.notes
            .get_or_fetch(id, || self.fetch_note(reader, id))
            .await
    }
}

async fn recover_citizen(reader: &dyn ChainReader, log: CitizenLog) -> Citizen {
    let mut citizen = Citizen {
        id: log.id,
        name: log.name.clone(),
        age: log.age,
        city: city_label(log.city.as_ref()),
    };
    match recover_call(reader, log.transaction_hash.as_deref()).await {
        Ok(Some(call)) => {
            citizen.age = call.age;
            citizen.city = call.city;
            citizen.name = call.name;
        }
        Ok(None) => debug!("citizen_tx_recovery_skipped id={}", log.id),
        Err(error) => debug!("citizen_tx_recovery_failed id={} error={error}", log.id),
    }
    citizen
}

async fn recover_call(
    reader: &dyn ChainReader,
    transaction_hash: Option<&str>,
) -> Result<Option<AddCitizenCall>, String> {
    let Some(hash) = transaction_hash else {
        return Ok(None);
    };
    let transaction = reader
        .get_transaction(hash)
        .await
        .map_err(|error| error.to_string())?;
    match transaction {
        Some(transaction) => decode_add_citizen_call(&transaction.input),
        None => Ok(None),
    }
}

/// Display label for the city argument of a log.
pub fn city_label(city: Option<&CityField>) -> String {
    match city {
        Some(CityField::Text(text)) if is_topic_hash(text) => truncated_hash(text),
        Some(CityField::Text(text)) if !text.is_empty() => text.clone(),
        Some(CityField::Indexed { hash }) if is_topic_hash(hash) => truncated_hash(hash),
        _ => UNKNOWN_CITY.to_string(),
    }
}

fn is_topic_hash(value: &str) -> bool {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^0x[0-9a-fA-F]{64}$").ok())
        .as_ref()
        .is_some_and(|pattern| pattern.is_match(value))
}

fn truncated_hash(hash: &str) -> String {
    format!("{}...", &hash[..10])
}

/// Later entries win on id collisions; output is ascending by id.
fn dedup_by_id(citizens: Vec<Citizen>) -> Vec<Citizen> {
    let mut by_id = BTreeMap::new();
    for citizen in citizens {
        by_id.insert(citizen.id, citizen);
    }
    by_id.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::NewCitizen;
    use crate::features::abi::indexed_string_topic;
    use crate::features::rpc::{RpcLog, RpcTransaction};
    use crate::storage::session_store::MemorySessionStorage;
    use crate::test_support::{block_on_with_spin, FakeChain};

    fn reconciler() -> LedgerReconciler {
        let registry = Rc::new(LocalRegistry::new(Rc::new(MemorySessionStorage::new())));
        LedgerReconciler::new(ContractConfig::default(), registry)
    }

    fn citizen(id: i64, age: u64, city: &str, name: &str) -> Citizen {
        Citizen {
            id,
            name: name.to_string(),
            age,
            city: city.to_string(),
        }
    }

    #[test]
    fn issues_one_range_query_scoped_to_contract_and_topic() {
        let chain = FakeChain::default();
        let reconciler = reconciler();
        assert!(block_on_with_spin(reconciler.fetch_citizens(&chain))
            .unwrap()
            .is_empty());

        let filters = chain.filters();
        assert_eq!(filters.len(), 1);
        assert_eq!(filters[0].address, ContractConfig::default().address);
        assert_eq!(filters[0].from_block, 2_273_494);
        assert_eq!(filters[0].topics, vec![citizen_topic0()]);
    }

    #[test]
    fn plain_city_is_kept_without_a_transaction() {
        let chain = FakeChain::default();
        let hash = chain.push_unindexed_log(4, 52, "Lisbon", "Eve");
        chain.set_transaction(&hash, Ok(None));
        let citizens = block_on_with_spin(reconciler().fetch_citizens(&chain)).unwrap();
        assert_eq!(citizens, vec![citizen(4, 52, "Lisbon", "Eve")]);
    }

    #[test]
    fn indexed_city_renders_as_truncated_hash() {
        let chain = FakeChain::default();
        chain.push_log(2, 40, "Paris", "Bob");
        let citizens = block_on_with_spin(reconciler().fetch_citizens(&chain)).unwrap();
        let hash = indexed_string_topic("Paris");
        assert_eq!(citizens[0].city, format!("{}...", &hash[..10]));
        assert_eq!(citizens[0].name, "Bob");
    }

    #[test]
    fn hash_shaped_text_city_is_truncated_too() {
        let hash = indexed_string_topic("Oslo");
        let chain = FakeChain::default();
        chain.push_unindexed_log(3, 30, &hash, "Carol");
        let citizens = block_on_with_spin(reconciler().fetch_citizens(&chain)).unwrap();
        assert_eq!(citizens[0].city, format!("{}...", &hash[..10]));
    }

    #[test]
    fn city_label_defaults_to_unknown() {
        assert_eq!(city_label(None), UNKNOWN_CITY);
        assert_eq!(city_label(Some(&CityField::Text(String::new()))), UNKNOWN_CITY);
        assert_eq!(
            city_label(Some(&CityField::Indexed {
                hash: "0x1234".to_string()
            })),
            UNKNOWN_CITY
        );
    }

    #[test]
    fn add_citizen_transaction_overrides_log_fields() {
        let chain = FakeChain::default();
        let hash = chain.push_log(5, 1, "Paris", "log-name");
        chain.set_add_citizen_tx(&hash, 61, "Nairobi", "Dana");
        let citizens = block_on_with_spin(reconciler().fetch_citizens(&chain)).unwrap();
        assert_eq!(citizens, vec![citizen(5, 61, "Nairobi", "Dana")]);
    }

    #[test]
    fn foreign_call_data_keeps_log_values() {
        let chain = FakeChain::default();
        let hash = chain.push_unindexed_log(6, 18, "Quito", "Eli");
        chain.set_transaction(
            &hash,
            Ok(Some(RpcTransaction {
                hash: hash.clone(),
                input: "0xa9059cbb".to_string(),
                to: None,
            })),
        );
        let citizens = block_on_with_spin(reconciler().fetch_citizens(&chain)).unwrap();
        assert_eq!(citizens, vec![citizen(6, 18, "Quito", "Eli")]);
    }

    #[test]
    fn repeated_emissions_collapse_to_the_last_one() {
        let chain = FakeChain::default();
        let first = chain.push_log(1, 25, "x", "Eve");
        let second = chain.push_unindexed_log(1, 25, "x", "Eve");
        let third = chain.push_log(1, 25, "x", "Eve");
        chain.set_add_citizen_tx(&first, 33, "Dubai", "Alice");
        chain.set_transaction(&second, Err(ProviderError::transport("nope")));
        chain.set_add_citizen_tx(&third, 33, "Dubai", "Alice");

        let citizens = block_on_with_spin(reconciler().fetch_citizens(&chain)).unwrap();
        assert_eq!(citizens, vec![citizen(1, 33, "Dubai", "Alice")]);
    }

    #[test]
    fn later_payload_wins_for_duplicate_ids() {
        let chain = FakeChain::default();
        let older = chain.push_unindexed_log(9, 20, "Rome", "Old");
        let newer = chain.push_unindexed_log(9, 21, "Milan", "New");
        chain.set_transaction(&older, Ok(None));
        chain.set_transaction(&newer, Ok(None));
        chain.push_unindexed_log(8, 40, "Bern", "Zed");

        let citizens = block_on_with_spin(reconciler().fetch_citizens(&chain)).unwrap();
        assert_eq!(citizens.len(), 2);
        assert_eq!(citizens[0].id, 8);
        assert_eq!(citizens[1], citizen(9, 21, "Milan", "New"));
    }

    #[test]
    fn undecodable_log_does_not_abort_the_batch() {
        let chain = FakeChain::default();
        chain.push_raw_log(RpcLog {
            address: ContractConfig::default().address,
            topics: vec![citizen_topic0()],
            data: "0xzz".to_string(),
            transaction_hash: Some("0xbad".to_string()),
            block_number: None,
            log_index: None,
        });
        let hash = chain.push_log(7, 70, "Lima", "Gus");
        chain.set_add_citizen_tx(&hash, 70, "Lima", "Gus");
        let citizens = block_on_with_spin(reconciler().fetch_citizens(&chain)).unwrap();
        assert_eq!(citizens, vec![citizen(7, 70, "Lima", "Gus")]);
    }

    #[test]
    fn log_query_failure_propagates_unchanged() {
        let chain = FakeChain::default();
        let failure = ProviderError::transport("rpc down");
        chain.fail_logs_with(failure.clone());
        let err = block_on_with_spin(reconciler().fetch_citizens(&chain)).unwrap_err();
        assert_eq!(err, failure);
    }

    #[test]
    fn local_records_merge_and_notes_resolve_by_origin() {
        let chain = FakeChain::default();
        let reconciler = reconciler();
        let local = reconciler.registry().add(&NewCitizen {
            name: "Ana".to_string(),
            age: 29,
            city: "Porto".to_string(),
            note: "pending".to_string(),
        });
        assert_eq!(local.id, -1);

        let citizens = block_on_with_spin(reconciler.fetch_citizens(&chain)).unwrap();
        assert_eq!(citizens, vec![citizen(-1, 29, "Porto", "Ana")]);

        assert_eq!(
            block_on_with_spin(reconciler.fetch_note(&chain, -1))
                .unwrap()
                .as_deref(),
            Some("pending")
        );
        assert_eq!(chain.call_count(), 0);
        assert_eq!(block_on_with_spin(reconciler.fetch_note(&chain, -2)).unwrap(), None);

        assert_eq!(
            block_on_with_spin(reconciler.fetch_note(&chain, 999))
                .unwrap()
                .as_deref(),
            Some("")
        );
        assert_eq!(chain.call_count(), 1);
    }

    #[test]
    fn cached_note_is_read_once() {
        let chain = FakeChain::default();
        chain.set_note(7, "hello");
        let reconciler = reconciler();
        for _ in 0..2 {
            assert_eq!(
                block_on_with_spin(reconciler.note(&chain, 7)).unwrap().as_deref(),
                Some("hello")
            );
        }
        assert_eq!(chain.call_count(), 1);
        assert_eq!(
            block_on_with_spin(reconciler.fetch_note(&chain, 7)).unwrap().as_deref(),
            Some("hello")
        );
        assert_eq!(chain.call_count(), 2);
    }
}
