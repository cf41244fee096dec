//! Persona profiles: named system prompts with sparse generation overrides.
//!
//! Raw profile values come from configuration as either a bare string or a
//! table. They are normalized once, at construction, into [`Profile`]
//! records; entries that fail to normalize are skipped with a warning.

use chatrelay_config::AppConfig;
use chatrelay_core::generation::ProfileOverrides;
use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// A profile as written in configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ProfileSource {
    /// Used verbatim as the system text; no overrides
    Bare(String),
    Structured(StructuredProfile),
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct StructuredProfile {
    #[serde(default)]
    pub system: Option<String>,
    #[serde(default)]
    pub backstory: Option<String>,
    #[serde(default)]
    pub style: Option<String>,
    #[serde(default)]
    pub rules: Option<String>,
    #[serde(default)]
    pub memory_hint: Option<String>,
    #[serde(default)]
    pub parameters: ProfileParameters,
    #[serde(default)]
    pub memory: ProfileMemory,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ProfileParameters {
    pub temperature: Option<f32>,
    pub frequency_penalty: Option<f32>,
    pub presence_penalty: Option<f32>,
    pub repetition_penalty: Option<f32>,
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ProfileMemory {
    pub turns: Option<usize>,
}

/// A normalized profile.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Profile {
    pub system_text: String,
    pub overrides: ProfileOverrides,
}

impl From<ProfileSource> for Profile {
    fn from(source: ProfileSource) -> Self {
        match source {
            ProfileSource::Bare(text) => Self {
                system_text: text,
                overrides: ProfileOverrides::default(),
            },
            ProfileSource::Structured(p) => {
                // Joined in this order
                let fields = [
                    p.system.as_deref(),
                    p.backstory.as_deref(),
                    p.style.as_deref(),
                    p.rules.as_deref(),
                    p.memory_hint.as_deref(),
                ];
                let system_text = fields
                    .into_iter()
                    .flatten()
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .collect::<Vec<_>>()
                    .join("\n\n");

                Self {
                    system_text,
                    overrides: ProfileOverrides {
                        temperature: p.parameters.temperature,
                        frequency_penalty: p.parameters.frequency_penalty,
                        presence_penalty: p.parameters.presence_penalty,
                        repetition_penalty: p.parameters.repetition_penalty,
                        max_tokens: p.parameters.max_tokens,
                        memory_turns: p.memory.turns,
                    },
                }
            }
        }
    }
}

/// Which tier supplied the system text of a resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProfileChoice {
    /// The caller turned system-prompt injection off
    Disabled,
    /// The requested profile
    Requested(String),
    /// The server default profile
    Default(String),
    /// The static fallback persona
    Fallback,
    /// Nothing configured
    None,
}

impl ProfileChoice {
    /// Short label for response metadata.
    pub fn label(&self) -> &str {
        match self {
            Self::Requested(key) | Self::Default(key) => key,
            Self::Fallback => "fallback",
            Self::Disabled | Self::None => "",
        }
    }
}

/// The outcome of [`ProfileResolver::resolve`].
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedProfile {
    pub system_text: String,
    pub overrides: ProfileOverrides,
    pub choice: ProfileChoice,
}

/// Picks the profile for a request.
#[derive(Debug, Clone, Default)]
pub struct ProfileResolver {
    profiles: BTreeMap<String, Profile>,
    default_key: String,
    fallback_system: String,
}

impl ProfileResolver {
    /// Normalize raw profile values, skipping malformed entries.
    pub fn new(
        raw: &BTreeMap<String, serde_json::Value>,
        default_key: impl Into<String>,
        fallback_system: impl Into<String>,
    ) -> Self {
        let mut profiles = BTreeMap::new();
        for (key, value) in raw {
            match serde_json::from_value::<ProfileSource>(value.clone()) {
                Ok(source) => {
                    profiles.insert(key.clone(), Profile::from(source));
                }
                Err(e) => warn!(profile = %key, error = %e, "Skipping malformed profile"),
            }
        }
        debug!(count = profiles.len(), "Profiles loaded");

        Self {
            profiles,
            default_key: default_key.into().trim().to_string(),
            fallback_system: fallback_system.into(),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(&config.profiles, &config.default_profile, &config.fallback_system)
    }

    /// Profile keys in sorted order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.profiles.keys().map(String::as_str)
    }

    pub fn get(&self, key: &str) -> Option<&Profile> {
        self.profiles.get(key)
    }

    pub fn default_key(&self) -> &str {
        &self.default_key
    }

    /// Resolve the system text and overrides for a request.
    ///
    /// Priority: a known requested key, then a known default key, then the
    /// fallback persona, then nothing. Unknown keys fall through silently.
    pub fn resolve(&self, requested: Option<&str>, kill_switch: bool) -> ResolvedProfile {
        if kill_switch {
            return ResolvedProfile {
                system_text: String::new(),
                overrides: ProfileOverrides::default(),
                choice: ProfileChoice::Disabled,
            };
        }

        let requested = requested.map(str::trim).filter(|k| !k.is_empty());
        let named = requested
            .and_then(|k| self.profiles.get(k).map(|p| (p, ProfileChoice::Requested(k.to_string()))))
            .or_else(|| {
                self.profiles
                    .get(&self.default_key)
                    .map(|p| (p, ProfileChoice::Default(self.default_key.clone())))
            });

        match named {
            Some((profile, choice)) => ResolvedProfile {
                system_text: profile.system_text.clone(),
                overrides: profile.overrides.clone(),
                choice,
            },
            None if !self.fallback_system.is_empty() => ResolvedProfile {
                system_text: self.fallback_system.clone(),
                overrides: ProfileOverrides::default(),
                choice: ProfileChoice::Fallback,
            },
            None => ResolvedProfile {
                system_text: String::new(),
                overrides: ProfileOverrides::default(),
                choice: ProfileChoice::None,
            },
        }
    }
}
