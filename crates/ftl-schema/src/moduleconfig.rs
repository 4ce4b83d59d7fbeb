//! Per-module `ftl.toml` configuration.

use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::validate::is_valid_name;

/// File name of the module configuration inside a module directory.
pub const MODULE_CONFIG_FILE: &str = "ftl.toml";

fn default_realm() -> String {
    "home".to_string()
}

fn default_deploy_dir() -> PathBuf {
    PathBuf::from(".")
}

/// Configuration of a single module.
///
/// ```toml
/// module = "echo"
/// language = "go"
/// deploy-dir = "_ftl"
/// watch = ["**/*.go", "go.mod"]
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ModuleConfig {
    /// Module name.
    pub module: String,
    /// Language tag.
    pub language: String,
    /// Realm the module belongs to.
    #[serde(default = "default_realm")]
    pub realm: String,
    /// Directory holding deployment artefacts, relative to the module.
    #[serde(default = "default_deploy_dir")]
    pub deploy_dir: PathBuf,
    /// Build command.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build: Option<String>,
    /// File patterns that trigger a rebuild.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub watch: Vec<String>,
    /// Directory the file was loaded from.
    #[serde(skip)]
    pub dir: PathBuf,
}

impl ModuleConfig {
    /// Loads `ftl.toml` from `dir`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the file cannot be read and
    /// [`Error::ModuleConfig`] if it is malformed or invalid.
    pub fn load(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let path = dir.join(MODULE_CONFIG_FILE);
        let text = std::fs::read_to_string(&path).map_err(|source| Error::Io {
            path: path.clone(),
            source,
        })?;
        let mut config = Self::parse(&text).map_err(|message| Error::ModuleConfig {
            path: path.clone(),
            message,
        })?;
        config.dir = dir.to_path_buf();
        Ok(config)
    }

    /// Parses and validates configuration text.
    ///
    /// # Errors
    ///
    /// Returns a description of the first problem found.
    pub fn parse(text: &str) -> std::result::Result<Self, String> {
        let config: Self = toml::from_str(text).map_err(|e| e.message().to_string())?;
        if !is_valid_name(&config.module) {
            return Err(format!("invalid module name {:?}", config.module));
        }
        if config.language.is_empty() {
            return Err("language must not be empty".to_string());
        }
        if !stays_beneath(&config.deploy_dir) {
            return Err(format!(
                "deploy-dir {} must be a relative path beneath the module directory",
                config.deploy_dir.display()
            ));
        }
        Ok(config)
    }

    /// Absolute deployment directory.
    #[must_use]
    pub fn abs_deploy_dir(&self) -> PathBuf {
        self.dir.join(&self.deploy_dir)
    }
}

/// Lexically checks that `path` never climbs above its starting directory.
fn stays_beneath(path: &Path) -> bool {
    let mut depth: usize = 0;
    for component in path.components() {
        match component {
            Component::Normal(_) => depth += 1,
            Component::CurDir => {}
            Component::ParentDir => match depth.checked_sub(1) {
                Some(d) => depth = d,
                None => return false,
            },
            Component::RootDir | Component::Prefix(_) => return false,
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply() {
        let config = ModuleConfig::parse("module = \"echo\"\nlanguage = \"go\"\n").unwrap();
        assert_eq!(config.realm, "home");
        assert_eq!(config.deploy_dir, PathBuf::from("."));
        assert!(config.watch.is_empty());
        assert!(config.build.is_none());
    }

    #[test]
    fn rejects_escaping_deploy_dir() {
        for bad in ["../out", "/tmp/out", "a/../../b"] {
            let text = format!("module = \"echo\"\nlanguage = \"go\"\ndeploy-dir = \"{bad}\"\n");
            assert!(ModuleConfig::parse(&text).is_err(), "{bad}");
        }
        let ok = "module = \"echo\"\nlanguage = \"go\"\ndeploy-dir = \"a/../_ftl\"\n";
        assert!(ModuleConfig::parse(ok).is_ok());
    }

    #[test]
    fn rejects_invalid_module_name_and_unknown_keys() {
        assert!(ModuleConfig::parse("module = \"my-mod\"\nlanguage = \"go\"\n").is_err());
        assert!(ModuleConfig::parse("module = \"m\"\nlanguage = \"go\"\nfoo = 1\n").is_err());
        assert!(ModuleConfig::parse("language = \"go\"\n").is_err());
    }
}
