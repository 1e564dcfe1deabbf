//! ABI codec for the citizen registry contract.
//!
//! Only `uint256` and `string` ever cross this contract's surface, so the
//! head/tail layout is written out directly instead of going through a
//! generic type table.

use crate::domain::types::{AddCitizenCall, CityField, CitizenLog, NewCitizen};
use alloy_primitives::{keccak256, U256};

pub const CITIZEN_EVENT_SIGNATURE: &str = "Citizen(uint256,uint256,string,string)";
pub const ADD_CITIZEN_SIGNATURE: &str = "addCitizen(uint256,string,string,string)";
pub const GET_NOTE_SIGNATURE: &str = "getNoteByCitizenId(uint256)";
pub const ADD_CITIZEN_FUNCTION: &str = "addCitizen";

const WORD: usize = 32;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum AbiKind {
    Uint,
    Text,
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum AbiValue {
    Uint(U256),
    Text(String),
}

pub fn citizen_topic0() -> String {
    let hash = keccak256(CITIZEN_EVENT_SIGNATURE.as_bytes());
    format!("0x{}", hex::encode(hash.as_slice()))
}

pub fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    let mut out = [0u8; 4];
    out.copy_from_slice(&hash.as_slice()[..4]);
    out
}

/// Keccak hash of a string as it would appear in an indexed topic.
pub fn indexed_string_topic(value: &str) -> String {
    format!("0x{}", hex::encode(keccak256(value.as_bytes()).as_slice()))
}

pub fn encode_get_note_call(id: u64) -> String {
    encode_call(GET_NOTE_SIGNATURE, &[AbiValue::Uint(U256::from(id))])
}

pub fn encode_add_citizen_call(input: &NewCitizen) -> String {
    encode_call(
        ADD_CITIZEN_SIGNATURE,
        &[
            AbiValue::Uint(U256::from(input.age)),
            AbiValue::Text(input.city.clone()),
            AbiValue::Text(input.name.clone()),
            AbiValue::Text(input.note.clone()),
        ],
    )
}

/// Decodes transaction input as an `addCitizen` invocation.
///
/// Returns `Ok(None)` when the input targets a different function.
pub fn decode_add_citizen_call(input_hex: &str) -> Result<Option<AddCitizenCall>, String> {
    let bytes = decode_hex_blob(input_hex, "transaction input")?;
    if bytes.len() < 4 {
        return Ok(None);
    }
    if bytes[..4] != selector(ADD_CITIZEN_SIGNATURE) {
        return Ok(None);
    }
    let values = decode_params(
        &bytes[4..],
        &[AbiKind::Uint, AbiKind::Text, AbiKind::Text, AbiKind::Text],
    )?;
    match values.as_slice() {
        [AbiValue::Uint(age), AbiValue::Text(city), AbiValue::Text(name), AbiValue::Text(note)] => {
            Ok(Some(AddCitizenCall {
                age: u256_to_u64(*age, "age")?,
                city: city.clone(),
                name: name.clone(),
                note: note.clone(),
            }))
        }
        _ => Err("addCitizen arguments did not decode to (uint256,string,string,string)".to_string()),
    }
}

/// Decodes an `eth_call` result holding a single `string`.
pub fn decode_string_return(result_hex: &str) -> Result<String, String> {
    let bytes = decode_hex_blob(result_hex, "call result")?;
    match decode_params(&bytes, &[AbiKind::Text])?.pop() {
        Some(AbiValue::Text(text)) => Ok(text),
        _ => Err("call result did not decode to a string".to_string()),
    }
}

/// Decodes a `Citizen` log, positionally: id, age, city, name.
///
/// With `city` indexed the topics are `[topic0, id, age, keccak(city)]` and
/// the data holds `(string name)`. Deployments without the index put
/// `(string city, string name)` in the data section instead.
pub fn decode_citizen_log(
    topics: &[String],
    data_hex: &str,
    transaction_hash: Option<String>,
) -> Result<CitizenLog, String> {
    let topic0 = topics
        .first()
        .ok_or_else(|| "log has no topics".to_string())?;
    if !topic0.eq_ignore_ascii_case(&citizen_topic0()) {
        return Err(format!("log topic0 {topic0} is not a Citizen event"));
    }
    if topics.len() < 3 {
        return Err(format!("Citizen log needs at least 3 topics, got {}", topics.len()));
    }
    let id_word = decode_topic_word(&topics[1], "id topic")?;
    let age_word = decode_topic_word(&topics[2], "age topic")?;
    let id = i64::try_from(u256_to_u64(id_word, "id")?)
        .map_err(|_error| "citizen id does not fit in i64".to_string())?;
    let age = u256_to_u64(age_word, "age")?;

    let data = decode_hex_blob(data_hex, "log data")?;
    let (city, name) = match topics.get(3) {
        Some(city_topic) => {
            let hash = normalize_topic(city_topic)?;
            let name = match decode_params(&data, &[AbiKind::Text])?.pop() {
                Some(AbiValue::Text(name)) => name,
                _ => return Err("Citizen log data did not decode to (string)".to_string()),
            };
            (Some(CityField::Indexed { hash }), name)
        }
        None => match decode_params(&data, &[AbiKind::Text, AbiKind::Text])?.as_slice() {
            [AbiValue::Text(city), AbiValue::Text(name)] => {
                (Some(CityField::Text(city.clone())), name.clone())
            }
            _ => return Err("Citizen log data did not decode to (string,string)".to_string()),
        },
    };

    Ok(CitizenLog {
        id,
        age,
        city,
        name,
        transaction_hash,
    })
}

/// Encodes a full `Citizen` log (topics, data) the way the contract emits it.
#[doc(hidden)]
pub fn encode_citizen_log(id: u64, age: u64, city: &str, name: &str) -> (Vec<String>, String) {
    let topics = vec![
        citizen_topic0(),
        format!("0x{}", hex::encode(encode_u256_word(U256::from(id)))),
        format!("0x{}", hex::encode(encode_u256_word(U256::from(age)))),
        indexed_string_topic(city),
    ];
    let data = encode_params(&[AbiValue::Text(name.to_string())]);
    (topics, format!("0x{}", hex::encode(data)))
}

/// Same event from a deployment without the `city` index: three topics and
/// `(string city, string name)` in the data section.
#[doc(hidden)]
pub fn encode_unindexed_citizen_log(
    id: u64,
    age: u64,
    city: &str,
    name: &str,
) -> (Vec<String>, String) {
    let (mut topics, _) = encode_citizen_log(id, age, city, name);
    topics.truncate(3);
    let data = encode_params(&[
        AbiValue::Text(city.to_string()),
        AbiValue::Text(name.to_string()),
    ]);
    (topics, format!("0x{}", hex::encode(data)))
}

/// ABI-encodes a single `string` return value, as `eth_call` would yield it.
#[doc(hidden)]
pub fn encode_string_return(text: &str) -> String {
    format!(
        "0x{}",
        hex::encode(encode_params(&[AbiValue::Text(text.to_string())]))
    )
}

fn encode_call(signature: &str, values: &[AbiValue]) -> String {
    let mut out = selector(signature).to_vec();
    out.extend_from_slice(&encode_params(values));
    format!("0x{}", hex::encode(out))
}

fn encode_params(values: &[AbiValue]) -> Vec<u8> {
    let head_size_bytes = values.len().saturating_mul(WORD);
    let mut heads: Vec<Vec<u8>> = Vec::with_capacity(values.len());
    let mut tails: Vec<Vec<u8>> = Vec::new();
    let mut tail_size_bytes = 0usize;

    for value in values {
        match value {
            AbiValue::Uint(number) => heads.push(encode_u256_word(*number)),
            AbiValue::Text(text) => {
                let tail = encode_dynamic_bytes(text.as_bytes());
                let offset = head_size_bytes.saturating_add(tail_size_bytes);
                heads.push(encode_u256_word(U256::from(offset)));
                tail_size_bytes = tail_size_bytes.saturating_add(tail.len());
                tails.push(tail);
            }
        }
    }

    let mut out = Vec::with_capacity(head_size_bytes.saturating_add(tail_size_bytes));
    for head in heads {
        out.extend_from_slice(&head);
    }
    for tail in tails {
        out.extend_from_slice(&tail);
    }
    out
}

/// Length word followed by the payload zero-padded to a 32-byte boundary.
fn encode_dynamic_bytes(bytes: &[u8]) -> Vec<u8> {
    let mut out = encode_u256_word(U256::from(bytes.len()));
    out.extend_from_slice(bytes);
    let padding = (WORD.saturating_sub(bytes.len() % WORD)) % WORD;
    out.extend(std::iter::repeat(0u8).take(padding));
    out
}

fn encode_u256_word(value: U256) -> Vec<u8> {
    value.to_be_bytes::<32>().to_vec()
}

fn decode_params(data: &[u8], kinds: &[AbiKind]) -> Result<Vec<AbiValue>, String> {
    let mut values = Vec::with_capacity(kinds.len());
    for (index, kind) in kinds.iter().enumerate() {
        let head = read_word(data, index.saturating_mul(WORD))
            .ok_or_else(|| format!("abi data too short for arg[{index}]"))?;
        match kind {
            AbiKind::Uint => values.push(AbiValue::Uint(U256::from_be_bytes(head))),
            AbiKind::Text => {
                let offset = word_to_usize(head, &format!("arg[{index}] offset"))?;
                let length_word = read_word(data, offset)
                    .ok_or_else(|| format!("arg[{index}] offset {offset} is out of bounds"))?;
                let length = word_to_usize(length_word, &format!("arg[{index}] length"))?;
                let start = offset.saturating_add(WORD);
                let end = start
                    .checked_add(length)
                    .filter(|end| *end <= data.len())
                    .ok_or_else(|| format!("arg[{index}] string overruns abi data"))?;
                let text = std::str::from_utf8(&data[start..end])
                    .map_err(|error| format!("arg[{index}] is not valid utf-8: {error}"))?;
                values.push(AbiValue::Text(text.to_string()));
            }
        }
    }
    Ok(values)
}

fn read_word(data: &[u8], at: usize) -> Option<[u8; 32]> {
    let end = at.checked_add(WORD)?;
    let slice = data.get(at..end)?;
    let mut word = [0u8; 32];
    word.copy_from_slice(slice);
    Some(word)
}

fn word_to_usize(word: [u8; 32], field: &str) -> Result<usize, String> {
    let value = u256_to_u64(U256::from_be_bytes(word), field)?;
    usize::try_from(value).map_err(|_error| format!("{field} does not fit in usize"))
}

fn u256_to_u64(value: U256, field: &str) -> Result<u64, String> {
    if value > U256::from(u64::MAX) {
        return Err(format!("{field} exceeds u64 range"));
    }
    let bytes = value.to_be_bytes::<32>();
    let mut low = [0u8; 8];
    low.copy_from_slice(&bytes[24..]);
    Ok(u64::from_be_bytes(low))
}

fn decode_topic_word(raw: &str, field: &str) -> Result<U256, String> {
    let bytes = decode_hex_blob(raw, field)?;
    if bytes.len() != WORD {
        return Err(format!("{field} must be 32 bytes, got {}", bytes.len()));
    }
    let mut word = [0u8; 32];
    word.copy_from_slice(&bytes);
    Ok(U256::from_be_bytes(word))
}

fn normalize_topic(raw: &str) -> Result<String, String> {
    let bytes = decode_hex_blob(raw, "topic")?;
    if bytes.len() != WORD {
        return Err(format!("topic must be 32 bytes, got {}", bytes.len()));
    }
    Ok(format!("0x{}", hex::encode(bytes)))
}

pub(crate) fn decode_hex_blob(raw: &str, field: &str) -> Result<Vec<u8>, String> {
    let trimmed = raw.trim();
    let without_prefix = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .ok_or_else(|| format!("{field} must be 0x-prefixed hex"))?;
    if without_prefix.len() % 2 != 0 {
        return Err(format!("{field} hex length must be even"));
    }
    hex::decode(without_prefix).map_err(|error| format!("failed to decode {field}: {error}"))
}
