//! Metadata attached to declarations.
//!
//! Metadata is how a declaration opts into platform behaviour: HTTP ingress,
//! cron firing, topic subscription, retries and so on.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::Ref;

/// One segment of an ingress path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum IngressPathComponent {
    /// A literal segment that must match exactly.
    Literal {
        /// Segment text.
        text: String,
    },
    /// A `{name}` segment binding a path parameter.
    Parameter {
        /// Parameter name.
        name: String,
    },
}

impl IngressPathComponent {
    /// Parses one segment; `{name}` is a parameter, anything else is literal.
    #[must_use]
    pub fn parse(segment: &str) -> Self {
        match segment
            .strip_prefix('{')
            .and_then(|rest| rest.strip_suffix('}'))
        {
            Some(name) => Self::Parameter {
                name: name.to_string(),
            },
            None => Self::Literal {
                text: segment.to_string(),
            },
        }
    }
}

impl fmt::Display for IngressPathComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal { text } => f.write_str(text),
            Self::Parameter { name } => write!(f, "{{{name}}}"),
        }
    }
}

/// Splits `/a/{b}/c` into path components. Empty segments are dropped.
#[must_use]
pub fn parse_ingress_path(path: &str) -> Vec<IngressPathComponent> {
    path.split('/')
        .filter(|segment| !segment.is_empty())
        .map(IngressPathComponent::parse)
        .collect()
}

/// Renders path components back to `/a/{b}/c`.
#[must_use]
pub fn render_ingress_path(components: &[IngressPathComponent]) -> String {
    let mut out = String::new();
    for component in components {
        out.push('/');
        out.push_str(&component.to_string());
    }
    if out.is_empty() {
        out.push('/');
    }
    out
}

/// Where a new subscription starts reading a topic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FromOffset {
    /// Start at the earliest retained event.
    Beginning,
    /// Start at the next published event.
    #[default]
    Latest,
}

impl fmt::Display for FromOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Beginning => "beginning",
            Self::Latest => "latest",
        })
    }
}

/// Encoding an alias applies to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AliasKind {
    /// JSON field name.
    #[default]
    Json,
}

/// A metadata entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Metadata {
    /// Verbs this verb calls.
    Calls {
        /// Called verbs.
        calls: Vec<Ref>,
    },
    /// Databases this verb uses.
    Databases {
        /// Used databases.
        calls: Vec<Ref>,
    },
    /// HTTP ingress binding.
    #[serde(rename_all = "camelCase")]
    Ingress {
        /// Ingress flavour, always `http`.
        #[serde(rename = "type", default = "default_ingress_type")]
        ingress_type: String,
        /// HTTP method, upper case.
        method: String,
        /// Path pattern.
        path: Vec<IngressPathComponent>,
    },
    /// Cron trigger.
    CronJob {
        /// Pattern text as written.
        cron: String,
    },
    /// Alternative name under an encoding.
    Alias {
        /// Encoding the alias applies to.
        #[serde(rename = "aliasKind", default)]
        alias_kind: AliasKind,
        /// The alias.
        alias: String,
    },
    /// Topic subscription.
    #[serde(rename_all = "camelCase")]
    Subscriber {
        /// Subscribed topic.
        topic: Ref,
        /// Where a new subscription starts.
        #[serde(default)]
        from_offset: FromOffset,
        /// Whether failed events are published to a dead-letter topic.
        #[serde(default)]
        dead_letter: bool,
    },
    /// Topics this verb publishes to.
    Publisher {
        /// Published topics.
        topics: Vec<Ref>,
    },
    /// Native type mapping for a runtime.
    #[serde(rename_all = "camelCase")]
    TypeMap {
        /// Runtime name (`go`, `kotlin`, ...).
        runtime: String,
        /// Fully-qualified native type.
        native_name: String,
    },
    /// Retry policy.
    #[serde(rename_all = "camelCase")]
    Retry {
        /// Maximum attempts; absent means unlimited.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        count: Option<i64>,
        /// Minimum backoff, e.g. `5s`. Empty selects the default.
        #[serde(default)]
        min_backoff: String,
        /// Maximum backoff, e.g. `1h`. Empty selects the default.
        #[serde(default)]
        max_backoff: String,
        /// Verb invoked when retries are exhausted.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        catch: Option<Ref>,
    },
    /// SQL migration bundle.
    SqlMigration {
        /// Content digest.
        digest: String,
    },
    /// Deployment artefact.
    Artefact {
        /// Relative path.
        path: String,
        /// Content digest.
        digest: String,
        /// Whether the artefact is executable.
        #[serde(default)]
        executable: bool,
    },
    /// Configuration values this verb reads.
    Config {
        /// Config refs.
        config: Vec<Ref>,
    },
    /// Secrets this verb reads.
    Secrets {
        /// Secret refs.
        secrets: Vec<Ref>,
    },
    /// Relaxed decoding for ingress bodies.
    Encoding {
        /// Accept unknown fields when decoding.
        #[serde(default)]
        lenient: bool,
    },
}

fn default_ingress_type() -> String {
    "http".to_string()
}

impl Metadata {
    /// Builds an HTTP ingress entry from a method and a `/a/{b}` path.
    #[must_use]
    pub fn ingress(method: &str, path: &str) -> Self {
        Self::Ingress {
            ingress_type: default_ingress_type(),
            method: method.to_ascii_uppercase(),
            path: parse_ingress_path(path),
        }
    }

    /// Builds a cron entry.
    #[must_use]
    pub fn cron(pattern: impl Into<String>) -> Self {
        Self::CronJob {
            cron: pattern.into(),
        }
    }

    /// Builds a calls entry.
    #[must_use]
    pub fn calls(calls: Vec<Ref>) -> Self {
        Self::Calls { calls }
    }

    /// Builds a subscriber entry with default offset and no dead letter.
    #[must_use]
    pub fn subscriber(topic: Ref) -> Self {
        Self::Subscriber {
            topic,
            from_offset: FromOffset::default(),
            dead_letter: false,
        }
    }

    /// Stable kind name, used in diagnostics and duplicate detection.
    #[must_use]
    pub const fn kind_name(&self) -> &'static str {
        match self {
            Self::Calls { .. } => "calls",
            Self::Databases { .. } => "database",
            Self::Ingress { .. } => "ingress",
            Self::CronJob { .. } => "cron",
            Self::Alias { .. } => "alias",
            Self::Subscriber { .. } => "subscribe",
            Self::Publisher { .. } => "publish",
            Self::TypeMap { .. } => "typemap",
            Self::Retry { .. } => "retry",
            Self::SqlMigration { .. } => "migration",
            Self::Artefact { .. } => "artefact",
            Self::Config { .. } => "config",
            Self::Secrets { .. } => "secrets",
            Self::Encoding { .. } => "encoding",
        }
    }
}

fn write_refs(f: &mut fmt::Formatter<'_>, refs: &[Ref]) -> fmt::Result {
    for (idx, r) in refs.iter().enumerate() {
        if idx > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{r}")?;
    }
    Ok(())
}

impl fmt::Display for Metadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Calls { calls } => {
                f.write_str("+calls ")?;
                write_refs(f, calls)
            }
            Self::Databases { calls } => {
                f.write_str("+database calls ")?;
                write_refs(f, calls)
            }
            Self::Ingress {
                ingress_type,
                method,
                path,
            } => write!(f, "+ingress {ingress_type} {method} {}", render_ingress_path(path)),
            Self::CronJob { cron } => write!(f, "+cron {cron}"),
            Self::Alias { alias, .. } => write!(f, "+alias json {alias:?}"),
            Self::Subscriber {
                topic,
                from_offset,
                dead_letter,
            } => {
                write!(f, "+subscribe {topic} from={from_offset}")?;
                if *dead_letter {
                    f.write_str(" deadletter")?;
                }
                Ok(())
            }
            Self::Publisher { topics } => {
                f.write_str("+publish ")?;
                write_refs(f, topics)
            }
            Self::TypeMap {
                runtime,
                native_name,
            } => write!(f, "+typemap {runtime} {native_name:?}"),
            Self::Retry {
                count,
                min_backoff,
                max_backoff,
                catch,
            } => {
                f.write_str("+retry")?;
                if let Some(count) = count {
                    write!(f, " {count}")?;
                }
                for backoff in [min_backoff, max_backoff] {
                    if !backoff.is_empty() {
                        write!(f, " {backoff}")?;
                    }
                }
                if let Some(catch) = catch {
                    write!(f, " catch {catch}")?;
                }
                Ok(())
            }
            Self::SqlMigration { digest } => write!(f, "+migration {digest}"),
            Self::Artefact {
                path,
                digest,
                executable,
            } => {
                write!(f, "+artefact {path} {digest}")?;
                if *executable {
                    f.write_str(" executable")?;
                }
                Ok(())
            }
            Self::Config { config } => {
                f.write_str("+config ")?;
                write_refs(f, config)
            }
            Self::Secrets { secrets } => {
                f.write_str("+secrets ")?;
                write_refs(f, secrets)
            }
            Self::Encoding { lenient } => {
                f.write_str("+encoding json")?;
                if *lenient {
                    f.write_str(" lenient")?;
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ingress_path_parses_parameters() {
        let meta = Metadata::ingress("get", "/getPath/{username}");
        let Metadata::Ingress { method, path, .. } = &meta else {
            panic!("expected ingress");
        };
        assert_eq!(method, "GET");
        assert_eq!(
            path,
            &vec![
                IngressPathComponent::Literal {
                    text: "getPath".to_string()
                },
                IngressPathComponent::Parameter {
                    name: "username".to_string()
                },
            ]
        );
        assert_eq!(meta.to_string(), "+ingress http GET /getPath/{username}");
    }

    #[test]
    fn root_path_renders_as_slash() {
        assert_eq!(render_ingress_path(&parse_ingress_path("/")), "/");
    }

    #[test]
    fn retry_renders_present_parts_only() {
        let meta = Metadata::Retry {
            count: Some(3),
            min_backoff: "5s".to_string(),
            max_backoff: String::new(),
            catch: Some(Ref::new("echo", "recover")),
        };
        assert_eq!(meta.to_string(), "+retry 3 5s catch echo.recover");
    }

    #[test]
    fn json_uses_kind_tag() {
        let json = serde_json::to_value(Metadata::cron("*/2 * * * * * *")).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "cronJob", "cron": "*/2 * * * * * *"}));
    }
}
