//! Session-lifetime registry of citizens that were never committed on-chain.
//!
//! The whole list is persisted as one JSON array under [`LOCAL_CITIZENS_KEY`].
//! Writes are read-modify-write without compare-and-swap; a single submission
//! flow at a time is assumed.

use crate::domain::types::{Citizen, LocalCitizen, NewCitizen};
use crate::error::StorageError;
use crate::storage::session_store::SessionStorage;
use serde_json::Value;
use std::rc::Rc;
use tracing::{debug, warn};

pub const LOCAL_CITIZENS_KEY: &str = "localCitizens";

pub struct LocalRegistry {
    storage: Rc<dyn SessionStorage>,
}

impl LocalRegistry {
    pub fn new(storage: Rc<dyn SessionStorage>) -> Self {
        Self { storage }
    }

    /// Stores `input` under the next negative id and returns its public shape.
    ///
    /// A failed write is logged and otherwise ignored; the returned record is
    /// valid either way.
    pub fn add(&self, input: &NewCitizen) -> Citizen {
        let mut list = self.read_all();
        let id = next_local_id(&list);
        let item = LocalCitizen {
            id,
            age: input.age,
            city: input.city.clone(),
            name: input.name.clone(),
            note: input.note.clone(),
        };
        let citizen = Citizen::from(&item);
        list.push(item);
        if let Err(error) = self.write_all(&list) {
            warn!("local_registry_write_failed id={id} error={error}");
        } else {
            debug!("local_registry_added id={id} total={}", list.len());
        }
        citizen
    }

    pub fn list_all(&self) -> Vec<Citizen> {
        self.read_all().iter().map(Citizen::from).collect()
    }

    pub fn note_for(&self, id: i64) -> Option<String> {
        self.read_all()
            .into_iter()
            .find(|citizen| citizen.id == id)
            .map(|citizen| citizen.note)
    }

    fn read_all(&self) -> Vec<LocalCitizen> {
        match self.try_read_all() {
            Ok(list) => list,
            Err(error) => {
                warn!("local_registry_read_failed error={error}");
                Vec::new()
            }
        }
    }

    fn try_read_all(&self) -> Result<Vec<LocalCitizen>, String> {
        let Some(raw) = self
            .storage
            .get_item(LOCAL_CITIZENS_KEY)
            .map_err(|error| error.to_string())?
        else {
            return Ok(Vec::new());
        };
        if raw.is_empty() {
            return Ok(Vec::new());
        }
        let value: Value = serde_json::from_str(&raw)
            .map_err(|error| format!("persisted registry is not JSON: {error}"))?;
        let Value::Array(entries) = value else {
            return Err("persisted registry is not an array".to_string());
        };
        Ok(entries
            .into_iter()
            .filter_map(|entry| serde_json::from_value::<LocalCitizen>(entry).ok())
            .collect())
    }

    fn write_all(&self, list: &[LocalCitizen]) -> Result<(), StorageError> {
        let encoded = serde_json::to_string(list)
            .map_err(|error| StorageError::Unavailable(error.to_string()))?;
        self.storage.set_item(LOCAL_CITIZENS_KEY, &encoded)
    }
}

/// `min(existing) - 1`, or `-1` for an empty registry.
fn next_local_id(list: &[LocalCitizen]) -> i64 {
    list.iter()
        .map(|citizen| citizen.id)
        .min()
        .map(|lowest| lowest.min(0).saturating_sub(1))
        .unwrap_or(-1)
}
