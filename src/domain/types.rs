use serde::{Deserialize, Serialize};

/// Public shape of a citizen record. On-chain ids are positive; records that
/// only live in the session registry carry negative ids.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Citizen {
    pub id: i64,
    pub name: String,
    pub age: u64,
    pub city: String,
}

impl Citizen {
    pub fn is_local(&self) -> bool {
        self.id < 0
    }
}

/// A citizen stored in the session registry together with its note.
///
/// Field names match the persisted JSON blob.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct LocalCitizen {
    pub id: i64,
    pub age: u64,
    pub city: String,
    pub name: String,
    #[serde(rename = "someNote")]
    pub note: String,
}

impl From<&LocalCitizen> for Citizen {
    fn from(local: &LocalCitizen) -> Self {
        Self {
            id: local.id,
            name: local.name.clone(),
            age: local.age,
            city: local.city.clone(),
        }
    }
}

/// User input for a new citizen, before an id is assigned.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct NewCitizen {
    pub name: String,
    pub age: u64,
    pub city: String,
    pub note: String,
}

impl NewCitizen {
    pub fn trimmed(&self) -> Self {
        Self {
            name: self.name.trim().to_string(),
            age: self.age,
            city: self.city.trim().to_string(),
            note: self.note.trim().to_string(),
        }
    }
}

/// The city argument of a citizen log as it comes off the wire.
///
/// An indexed `string` is replaced by its keccak hash in the topics, so the
/// log alone can only ever yield a hash for it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CityField {
    /// Carried in the data section (may still look like a hash).
    Text(String),
    /// Indexed topic value.
    Indexed { hash: String },
}

/// Fields decoded from a single `Citizen` event log.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CitizenLog {
    pub id: i64,
    pub age: u64,
    pub city: Option<CityField>,
    pub name: String,
    pub transaction_hash: Option<String>,
}

/// Arguments of an `addCitizen` call recovered from transaction input.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AddCitizenCall {
    pub age: u64,
    pub city: String,
    pub name: String,
    pub note: String,
}

/// Wallet identity as exposed to the presentation layer.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub ready: bool,
    pub account: Option<String>,
    pub chain_id: Option<u64>,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionPhase {
    Uninitialized,
    NoProvider,
    Initialized,
    Detached,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub enum SessionEvent {
    ProviderDetected,
    ProviderAbsent,
    TornDown,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct TransitionError {
    pub from: SessionPhase,
    pub event: String,
    pub reason: String,
}
