//! Configuration and secret management.
//!
//! Values are addressed by [`ConfigRef`] (`[module.]name`). Two collaborators
//! compose:
//!
//! - a [`Router`] maps each ref to an opaque [`AccessorKey`]; it holds no values
//! - a provider, picked by the key's scheme, turns the key back into bytes
//!
//! Synchronous providers ([`Provider`]) load on every read. Asynchronous
//! providers ([`AsyncProvider`]) are synced in the background into a
//! [`Cache`]; reads are served from it.
//!
//! The same machinery serves configuration and secrets. The [`Role`] type
//! parameter keeps the two apart at compile time. Sensitive roles store values
//! sealed by an [`Obfuscator`].

mod cache;
mod manager;
mod obfuscator;
mod provider;
mod router;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub use cache::{Cache, CacheConfig};
pub use manager::Manager;
pub use obfuscator::{KEY_LEN, Obfuscator};
pub use provider::{
    AsyncProvider, EnvarProvider, InMemoryAsyncProvider, InMemoryProvider, Provider,
    ProviderHandle, SyncedValue,
};
pub use router::{InMemoryRouter, Router};

use crate::error::{Error, Result};

/// Distinguishes configuration from secrets.
pub trait Role: Send + Sync + fmt::Debug + Default + 'static {
    /// Human-readable role name.
    const NAME: &'static str;
    /// Environment variable prefix for the `envar` provider.
    const ENV_PREFIX: &'static str;
    /// Whether values must stay out of logs.
    const SENSITIVE: bool;
}

/// The configuration role.
#[derive(Debug, Clone, Copy, Default)]
pub struct Configuration;

impl Role for Configuration {
    const NAME: &'static str = "configuration";
    const ENV_PREFIX: &'static str = "FTL_CONFIG_";
    const SENSITIVE: bool = false;
}

/// The secrets role.
#[derive(Debug, Clone, Copy, Default)]
pub struct Secrets;

impl Role for Secrets {
    const NAME: &'static str = "secrets";
    const ENV_PREFIX: &'static str = "FTL_SECRET_";
    const SENSITIVE: bool = true;
}

/// A possibly module-scoped configuration or secret name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConfigRef {
    /// Owning module; `None` for globals.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
    /// Entry name.
    pub name: String,
}

impl ConfigRef {
    /// A global ref.
    #[must_use]
    pub fn global(name: impl Into<String>) -> Self {
        Self {
            module: None,
            name: name.into(),
        }
    }

    /// A module-scoped ref.
    #[must_use]
    pub fn module(module: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            module: Some(module.into()),
            name: name.into(),
        }
    }

    /// The same name at global scope.
    #[must_use]
    pub fn to_global(&self) -> Self {
        Self::global(self.name.clone())
    }

    /// Parses `name` or `module.name`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if either part is empty or there
    /// are more than two parts.
    pub fn parse(text: &str) -> Result<Self> {
        let parts: Vec<&str> = text.split('.').collect();
        match parts.as_slice() {
            [name] if !name.is_empty() => Ok(Self::global(*name)),
            [module, name] if !module.is_empty() && !name.is_empty() => {
                Ok(Self::module(*module, *name))
            }
            _ => Err(Error::invalid(format!(
                "invalid ref {text:?}, expected [module.]name"
            ))),
        }
    }
}

impl fmt::Display for ConfigRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.module {
            Some(module) => write!(f, "{module}.{}", self.name),
            None => f.write_str(&self.name),
        }
    }
}

impl FromStr for ConfigRef {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// An opaque URL-shaped handle a provider can resolve to a value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AccessorKey(String);

impl AccessorKey {
    /// Builds `scheme://payload`.
    #[must_use]
    pub fn new(scheme: &str, payload: &str) -> Self {
        Self(format!("{scheme}://{payload}"))
    }

    /// Parses a key of the form `scheme://payload`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if there is no scheme.
    pub fn parse(text: &str) -> Result<Self> {
        match text.split_once("://") {
            Some((scheme, _))
                if !scheme.is_empty()
                    && scheme
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.')) =>
            {
                Ok(Self(text.to_string()))
            }
            _ => Err(Error::invalid(format!("invalid accessor key {text:?}"))),
        }
    }

    /// The part before `://`; selects the provider.
    #[must_use]
    pub fn scheme(&self) -> &str {
        self.0.split_once("://").map_or("", |(scheme, _)| scheme)
    }

    /// The part after `://`.
    #[must_use]
    pub fn payload(&self) -> &str {
        self.0.split_once("://").map_or("", |(_, payload)| payload)
    }

    /// The full key.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccessorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for AccessorKey {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<AccessorKey> for String {
    fn from(value: AccessorKey) -> Self {
        value.0
    }
}

/// A router entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// The ref.
    #[serde(rename = "ref")]
    pub reference: ConfigRef,
    /// Where its value lives.
    pub accessor: AccessorKey,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refs_parse_and_display() {
        assert_eq!(ConfigRef::parse("api_key").unwrap(), ConfigRef::global("api_key"));
        let scoped = ConfigRef::parse("echo.api_key").unwrap();
        assert_eq!(scoped, ConfigRef::module("echo", "api_key"));
        assert_eq!(scoped.to_string(), "echo.api_key");
        assert_eq!(scoped.to_global(), ConfigRef::global("api_key"));
        for bad in ["", ".x", "x.", "a.b.c"] {
            assert!(ConfigRef::parse(bad).is_err(), "{bad:?}");
        }
    }

    #[test]
    fn accessor_keys_split_scheme_and_payload() {
        let key = AccessorKey::parse("inline://ImJhciI").unwrap();
        assert_eq!(key.scheme(), "inline");
        assert_eq!(key.payload(), "ImJhciI");
        assert!(AccessorKey::parse("no-scheme").is_err());
        assert!(AccessorKey::parse("://x").is_err());
    }

    #[test]
    fn entry_serializes_ref_field() {
        let entry = Entry {
            reference: ConfigRef::module("echo", "key"),
            accessor: AccessorKey::new("envar", "key"),
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["ref"]["module"], "echo");
        assert_eq!(json["accessor"], "envar://key");
    }
}
