//! JSON wire encoding of schemas and modules.
//!
//! The encoding is serde's: tagged objects with a `kind` discriminator and
//! camelCase field names. Absent optional fields and empty lists are omitted,
//! so `decode(encode(s)) == s` for every schema.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{Error, Result};
use crate::module::Module;
use crate::schema::Schema;

fn encode_value<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(Error::Encode)
}

fn decode_value<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes).map_err(|source| Error::Decode {
        message: source.to_string(),
        source,
    })
}

/// Encodes a schema to JSON.
///
/// # Errors
///
/// Returns [`Error::Encode`] if serialization fails.
pub fn encode(schema: &Schema) -> Result<Vec<u8>> {
    encode_value(schema)
}

/// Decodes a schema from JSON.
///
/// # Errors
///
/// Returns [`Error::Decode`] for malformed input.
pub fn decode(bytes: &[u8]) -> Result<Schema> {
    decode_value(bytes)
}

/// Encodes a single module to JSON.
///
/// # Errors
///
/// Returns [`Error::Encode`] if serialization fails.
pub fn encode_module(module: &Module) -> Result<Vec<u8>> {
    encode_value(module)
}

/// Decodes a single module from JSON.
///
/// # Errors
///
/// Returns [`Error::Decode`] for malformed input.
pub fn decode_module(bytes: &[u8]) -> Result<Module> {
    decode_value(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_rejects_unknown_decl_kind() {
        let err = decode_module(br#"{"name":"m","decls":[{"kind":"widget","name":"x"}]}"#)
            .unwrap_err();
        assert_eq!(err.kind(), ftl_core::ErrorKind::InvalidArgument);
    }

    #[test]
    fn minimal_module_decodes_with_defaults() {
        let module = decode_module(br#"{"name":"m"}"#).unwrap();
        assert_eq!(module, Module::new("m"));
        assert_eq!(encode_module(&module).unwrap(), br#"{"name":"m","builtin":false,"decls":[]}"#);
    }
}
