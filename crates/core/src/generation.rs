//! Generation parameters and per-profile overrides.

use serde::{Deserialize, Serialize};

/// Effective sampling parameters for one completion call.
///
/// Built from the server-wide defaults with a profile's [`ProfileOverrides`]
/// applied on top.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    /// Model name; omitted from the wire request when empty
    #[serde(default)]
    pub model: String,

    pub temperature: f32,

    pub frequency_penalty: f32,

    pub presence_penalty: f32,

    /// Omitted from the wire request when exactly 1.0
    pub repetition_penalty: f32,

    pub max_tokens: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,

    /// 0 disables
    #[serde(default)]
    pub top_k: u32,

    /// 0 disables
    #[serde(default)]
    pub min_tokens: u32,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            model: String::new(),
            temperature: 1.0,
            frequency_penalty: 0.0,
            presence_penalty: 0.0,
            repetition_penalty: 1.0,
            max_tokens: 220,
            top_p: None,
            top_k: 0,
            min_tokens: 0,
            stop: Vec::new(),
        }
    }
}

impl GenerationParams {
    /// Apply the keys a profile actually sets; everything else keeps its default.
    pub fn with_overrides(mut self, overrides: &ProfileOverrides) -> Self {
        if let Some(t) = overrides.temperature {
            self.temperature = t;
        }
        if let Some(p) = overrides.frequency_penalty {
            self.frequency_penalty = p;
        }
        if let Some(p) = overrides.presence_penalty {
            self.presence_penalty = p;
        }
        if let Some(p) = overrides.repetition_penalty {
            self.repetition_penalty = p;
        }
        if let Some(n) = overrides.max_tokens {
            self.max_tokens = n;
        }
        self
    }
}

/// The sparse parameter block of a profile.
///
/// Only keys present in the profile configuration are `Some`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repetition_penalty: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Conversational exchanges to keep (2N turns)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_turns: Option<usize>,
}

impl ProfileOverrides {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}
