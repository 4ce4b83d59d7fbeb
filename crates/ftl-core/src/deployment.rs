//! Deployment keys.
//!
//! A deployment is a running instance of one module version. Its key renders
//! as `dpl-<module>-<suffix>` where the suffix is a lowercase ULID, so keys for
//! the same module sort by creation time.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::error::{Error, Result};

const PREFIX: &str = "dpl-";

/// Identifier of a single deployment of a module.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DeploymentKey {
    module: String,
    suffix: Ulid,
}

impl DeploymentKey {
    /// Generates a new key for `module`.
    #[must_use]
    pub fn generate(module: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            suffix: Ulid::new(),
        }
    }

    /// Creates a key from a module name and an explicit ULID.
    #[must_use]
    pub fn from_parts(module: impl Into<String>, suffix: Ulid) -> Self {
        Self {
            module: module.into(),
            suffix,
        }
    }

    /// Returns the module this deployment belongs to.
    #[must_use]
    pub fn module(&self) -> &str {
        &self.module
    }

    /// Returns the unique suffix.
    #[must_use]
    pub const fn suffix(&self) -> Ulid {
        self.suffix
    }
}

impl fmt::Display for DeploymentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{PREFIX}{}-{}",
            self.module,
            self.suffix.to_string().to_ascii_lowercase()
        )
    }
}

impl FromStr for DeploymentKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = |message: &str| Error::InvalidDeploymentKey {
            key: s.to_string(),
            message: message.to_string(),
        };
        let rest = s
            .strip_prefix(PREFIX)
            .ok_or_else(|| invalid("missing dpl- prefix"))?;
        let (module, suffix) = rest
            .rsplit_once('-')
            .ok_or_else(|| invalid("missing suffix"))?;
        if module.is_empty() {
            return Err(invalid("empty module name"));
        }
        let suffix = Ulid::from_string(&suffix.to_ascii_uppercase())
            .map_err(|e| invalid(&format!("bad suffix: {e}")))?;
        Ok(Self {
            module: module.to_string(),
            suffix,
        })
    }
}

impl TryFrom<String> for DeploymentKey {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<DeploymentKey> for String {
    fn from(key: DeploymentKey) -> Self {
        key.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_then_parse_preserves_key() {
        let key = DeploymentKey::generate("echo");
        let text = key.to_string();
        assert!(text.starts_with("dpl-echo-"));
        assert_eq!(text, text.to_ascii_lowercase());
        assert_eq!(text.parse::<DeploymentKey>().unwrap(), key);
    }

    #[test]
    fn rejects_malformed_keys() {
        for bad in ["echo-01h", "dpl-", "dpl-echo", "dpl--01hxyz", "dpl-echo-notaulid"] {
            assert!(bad.parse::<DeploymentKey>().is_err(), "{bad}");
        }
    }

    #[test]
    fn serializes_as_string() {
        let key = DeploymentKey::generate("time");
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, format!("\"{key}\""));
        let back: DeploymentKey = serde_json::from_str(&json).unwrap();
        assert_eq!(back, key);
    }
}
