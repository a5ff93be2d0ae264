//! JSON helpers for the experiment layout.

use serde::{de::DeserializeOwned, Serialize};
use serde_json::ser::{PrettyFormatter, Serializer};
use surround_core::{ErrorInfo, SurroundError};

fn serde_error(code: &str, err: impl ToString) -> SurroundError {
    SurroundError::Serde(ErrorInfo::new(code, err.to_string()))
}

/// Serializes a value as UTF-8 JSON indented with four spaces.
pub fn to_pretty_json_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>, SurroundError> {
    let mut bytes = Vec::new();
    let mut serializer = Serializer::with_formatter(&mut bytes, PrettyFormatter::with_indent(b"    "));
    value
        .serialize(&mut serializer)
        .map_err(|err| serde_error("surround.exp.json_serialize", err))?;
    Ok(bytes)
}

/// Deserializes a JSON document.
pub fn from_json_slice<T: DeserializeOwned>(data: &[u8]) -> Result<T, SurroundError> {
    serde_json::from_slice(data).map_err(|err| serde_error("surround.exp.json_deserialize", err))
}
