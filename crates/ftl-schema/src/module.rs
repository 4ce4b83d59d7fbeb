//! Modules and their runtime annotations.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use ftl_core::DeploymentKey;
use serde::{Deserialize, Serialize};

use crate::decl::{Decl, Verb};
use crate::metadata::Metadata;
use crate::types::Ref;

/// Build-time facts about a module version.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleRuntimeBase {
    /// When this version was created. Latest wins on re-deploy.
    pub create_time: DateTime<Utc>,
    /// Language tag (`go`, `kotlin`, `python`, ...).
    pub language: String,
    /// Target OS of the built artefacts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os: Option<String>,
    /// Target architecture of the built artefacts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arch: Option<String>,
    /// Container image, when deployed as one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

/// Scaling parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleRuntimeScaling {
    /// Minimum replica count.
    pub min_replicas: i32,
}

/// Where the module is currently running.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleRuntimeDeployment {
    /// Base URL calls are sent to. Empty while not yet routable.
    #[serde(default)]
    pub endpoint: String,
    /// Deployment identity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment_key: Option<DeploymentKey>,
    /// When the deployment was created.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    /// When the deployment started serving.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activated_at: Option<DateTime<Utc>>,
}

/// Runtime annotations of a module.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModuleRuntime {
    /// Build facts.
    pub base: ModuleRuntimeBase,
    /// Scaling, if configured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scaling: Option<ModuleRuntimeScaling>,
    /// Deployment, if deployed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment: Option<ModuleRuntimeDeployment>,
}

impl ModuleRuntime {
    /// Creates runtime annotations for a deployment at `endpoint`.
    #[must_use]
    pub fn deployed(
        language: impl Into<String>,
        create_time: DateTime<Utc>,
        endpoint: impl Into<String>,
        deployment_key: Option<DeploymentKey>,
    ) -> Self {
        Self {
            base: ModuleRuntimeBase {
                create_time,
                language: language.into(),
                os: None,
                arch: None,
                image: None,
            },
            scaling: None,
            deployment: Some(ModuleRuntimeDeployment {
                endpoint: endpoint.into(),
                deployment_key,
                created_at: Some(create_time),
                activated_at: None,
            }),
        }
    }

    /// The deployment endpoint, if set and non-empty.
    #[must_use]
    pub fn endpoint(&self) -> Option<&str> {
        self.deployment
            .as_ref()
            .map(|d| d.endpoint.as_str())
            .filter(|e| !e.is_empty())
    }

    /// The deployment key, if any.
    #[must_use]
    pub fn deployment_key(&self) -> Option<&DeploymentKey> {
        self.deployment.as_ref().and_then(|d| d.deployment_key.as_ref())
    }
}

/// A named bundle of declarations.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Module {
    /// Module name, unique within a schema.
    pub name: String,
    /// Whether this is the platform-provided builtin module.
    #[serde(default)]
    pub builtin: bool,
    /// Comment lines.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub comments: Vec<String>,
    /// Declarations in source order.
    #[serde(default)]
    pub decls: Vec<Decl>,
    /// Runtime annotations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime: Option<ModuleRuntime>,
}

impl Module {
    /// Creates an empty, non-builtin module.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            builtin: false,
            comments: Vec::new(),
            decls: Vec::new(),
            runtime: None,
        }
    }

    /// Appends a declaration.
    #[must_use]
    pub fn with_decl(mut self, decl: Decl) -> Self {
        self.decls.push(decl);
        self
    }

    /// Sets runtime annotations.
    #[must_use]
    pub fn with_runtime(mut self, runtime: ModuleRuntime) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Finds a declaration by name.
    #[must_use]
    pub fn decl(&self, name: &str) -> Option<&Decl> {
        self.decls.iter().find(|d| d.name() == name)
    }

    /// Finds a verb by name.
    #[must_use]
    pub fn verb(&self, name: &str) -> Option<&Verb> {
        self.verbs().find(|v| v.name == name)
    }

    /// Iterates the module's verbs.
    pub fn verbs(&self) -> impl Iterator<Item = &Verb> {
        self.decls.iter().filter_map(|d| match d {
            Decl::Verb(v) => Some(v),
            _ => None,
        })
    }

    /// The deployment endpoint, if deployed.
    #[must_use]
    pub fn endpoint(&self) -> Option<&str> {
        self.runtime.as_ref().and_then(ModuleRuntime::endpoint)
    }

    /// The deployment key, if deployed.
    #[must_use]
    pub fn deployment_key(&self) -> Option<&DeploymentKey> {
        self.runtime.as_ref().and_then(ModuleRuntime::deployment_key)
    }

    /// Creation time of this module version, if known.
    #[must_use]
    pub fn create_time(&self) -> Option<DateTime<Utc>> {
        self.runtime.as_ref().map(|r| r.base.create_time)
    }

    /// Other modules this module depends on.
    ///
    /// Edges come from `+calls` targets and the modules owning subscribed
    /// topics. References into the module itself and into `builtin` are not
    /// dependencies.
    #[must_use]
    pub fn dependencies(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        let mut add = |r: &Ref| {
            if !r.module.is_empty()
                && r.module != self.name
                && r.module != crate::builtin::BUILTIN_MODULE
            {
                out.insert(r.module.clone());
            }
        };
        for verb in self.verbs() {
            for meta in &verb.metadata {
                match meta {
                    Metadata::Calls { calls } => calls.iter().for_each(&mut add),
                    Metadata::Subscriber { topic, .. } => add(topic),
                    _ => {}
                }
            }
        }
        out
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in &self.comments {
            writeln!(f, "// {line}")?;
        }
        if self.builtin {
            f.write_str("builtin ")?;
        }
        write!(f, "module {} {{", self.name)?;
        for decl in &self.decls {
            f.write_str("\n")?;
            for line in decl.to_string().lines() {
                writeln!(f, "  {line}")?;
            }
        }
        f.write_str("}")
    }
}
