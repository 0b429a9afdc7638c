//! Runtime settings read by every run.
//!
//! Settings are a fixed table of typed keys. Clients may change values but
//! never add or remove keys; an update is validated as a whole and applied
//! atomically by [`SettingsStore`].
//!
//! Seeding order at startup:
//! 1. Built-in defaults from [`DEFINITIONS`]
//! 2. Environment variables named exactly like the keys
//! 3. The persisted `settings.toml`, which holds committed client updates

mod store;

pub use store::*;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A candidate update: setting key to raw JSON value.
pub type SettingsPatch = BTreeMap<String, serde_json::Value>;

/// Domain of a setting value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SettingKind {
    /// Boolean toggle
    Flag,
    /// Number in [0.0, 1.0]
    Fraction,
    /// Integer >= 1
    PositiveInt,
    /// One of a fixed set of strings
    Choice(&'static [&'static str]),
    /// Free-form string
    Text,
}

/// A validated setting value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SettingValue {
    Flag(bool),
    Integer(u64),
    Fraction(f64),
    Text(String),
}

/// One row of the recognized key/kind table.
#[derive(Debug, Clone, Copy)]
pub struct SettingDefinition {
    pub key: &'static str,
    pub kind: SettingKind,
    /// Default in its textual form, parsed with [`SettingKind::parse_text`]
    pub default: &'static str,
}

const LOG_LEVELS: &[&str] = &["DEBUG", "INFO", "WARNING", "ERROR", "CRITICAL"];
const LANGUAGES: &[&str] = &["en", "es"];
const TEXT_MODELS: &[&str] = &[
    "gemini-1.5-pro-latest",
    "gemini-1.0-pro",
    "gemini-1.5-flash",
    "gemini-2.0-flash",
];
const IMAGE_MODELS: &[&str] = &["imagen-3.0-generate-002"];

const fn def(key: &'static str, kind: SettingKind, default: &'static str) -> SettingDefinition {
    SettingDefinition { key, kind, default }
}

/// Every recognized setting.
pub const DEFINITIONS: &[SettingDefinition] = &[
    def("ENABLE_WRITE_DATABASE", SettingKind::Flag, "true"),
    def("ENABLE_READ_DATABASE", SettingKind::Flag, "true"),
    def("ENABLE_BITWIT_RUN", SettingKind::Flag, "true"),
    def("ENABLE_X", SettingKind::Flag, "false"),
    def("ENABLE_TELEGRAM_ALERTS", SettingKind::Flag, "false"),
    def("ENABLE_IMAGE_GENERATION", SettingKind::Flag, "true"),
    def("ENABLE_MOCKS", SettingKind::Flag, "true"),
    def("IMAGE_GENERATION_CHANCE", SettingKind::Fraction, "0.5"),
    def("REPLY_CHANCE", SettingKind::Fraction, "0.3"),
    def("TOPIC_ITERATION_LIMIT", SettingKind::PositiveInt, "3"),
    def("LOG_LEVEL", SettingKind::Choice(LOG_LEVELS), "INFO"),
    def("BITWIT_LANGUAGE", SettingKind::Choice(LANGUAGES), "en"),
    def("GEMINI_TEXT_MODEL", SettingKind::Choice(TEXT_MODELS), "gemini-2.0-flash"),
    def(
        "IMAGEN_IMAGE_MODEL",
        SettingKind::Choice(IMAGE_MODELS),
        "imagen-3.0-generate-002",
    ),
    def(
        "IMAGE_MODEL_BASE_URL",
        SettingKind::Text,
        "https://generativelanguage.googleapis.com/v1beta/models/",
    ),
    def("TELEGRAM_CHANNEL_ID", SettingKind::Text, ""),
    def("TELEGRAM_BITWIT_USERNAME", SettingKind::Text, ""),
    def("TELEGRAM_VERITAS_USERNAME", SettingKind::Text, ""),
];

/// Look up the definition of a key.
pub fn definition(key: &str) -> Option<&'static SettingDefinition> {
    DEFINITIONS.iter().find(|d| d.key == key)
}

impl SettingKind {
    /// Validate a JSON value from a client update.
    pub fn coerce(&self, value: &serde_json::Value) -> Result<SettingValue, String> {
        use serde_json::Value;

        match (self, value) {
            (SettingKind::Flag, Value::Bool(b)) => Ok(SettingValue::Flag(*b)),
            (SettingKind::Fraction, Value::Number(n)) => match n.as_f64() {
                Some(f) => Self::check_fraction(f),
                None => Err(self.expected()),
            },
            (SettingKind::PositiveInt, Value::Number(n)) => match n.as_u64() {
                Some(i) if i >= 1 => Ok(SettingValue::Integer(i)),
                _ => Err(self.expected()),
            },
            (SettingKind::Choice(_), Value::String(s)) => self.check_choice(s),
            (SettingKind::Text, Value::String(s)) => Ok(SettingValue::Text(s.clone())),
            _ => Err(self.expected()),
        }
    }

    /// Parse a textual value (environment variable or built-in default).
    pub fn parse_text(&self, raw: &str) -> Result<SettingValue, String> {
        let trimmed = raw.trim();
        match self {
            SettingKind::Flag => match trimmed.to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => Ok(SettingValue::Flag(true)),
                "false" | "0" | "no" | "off" => Ok(SettingValue::Flag(false)),
                _ => Err(self.expected()),
            },
            SettingKind::Fraction => trimmed
                .parse::<f64>()
                .map_err(|_| self.expected())
                .and_then(Self::check_fraction),
            SettingKind::PositiveInt => match trimmed.parse::<u64>() {
                Ok(i) if i >= 1 => Ok(SettingValue::Integer(i)),
                _ => Err(self.expected()),
            },
            SettingKind::Choice(_) => self.check_choice(trimmed),
            SettingKind::Text => Ok(SettingValue::Text(raw.to_string())),
        }
    }

    fn check_fraction(f: f64) -> Result<SettingValue, String> {
        if (0.0..=1.0).contains(&f) {
            Ok(SettingValue::Fraction(f))
        } else {
            Err(format!("must be between 0.0 and 1.0, got {}", f))
        }
    }

    fn check_choice(&self, candidate: &str) -> Result<SettingValue, String> {
        let SettingKind::Choice(options) = self else {
            return Err(self.expected());
        };
        options
            .iter()
            .find(|o| o.eq_ignore_ascii_case(candidate))
            .map(|o| SettingValue::Text((*o).to_string()))
            .ok_or_else(|| format!("must be one of {}, got '{}'", options.join(", "), candidate))
    }

    fn expected(&self) -> String {
        format!("expected {}", self.describe())
    }

    /// Human-readable domain description
    pub fn describe(&self) -> String {
        match self {
            SettingKind::Flag => "a boolean".to_string(),
            SettingKind::Fraction => "a number between 0.0 and 1.0".to_string(),
            SettingKind::PositiveInt => "an integer >= 1".to_string(),
            SettingKind::Choice(options) => format!("one of {}", options.join(", ")),
            SettingKind::Text => "a string".to_string(),
        }
    }
}

/// Immutable snapshot of every setting.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Settings {
    values: BTreeMap<String, SettingValue>,
}

impl Settings {
    /// Snapshot holding the built-in defaults.
    pub fn defaults() -> Self {
        let values = DEFINITIONS
            .iter()
            .filter_map(|d| match d.kind.parse_text(d.default) {
                Ok(value) => Some((d.key.to_string(), value)),
                Err(_) => None,
            })
            .collect();
        Self { values }
    }

    pub fn get(&self, key: &str) -> Option<&SettingValue> {
        self.values.get(key)
    }

    pub fn flag(&self, key: &str) -> Option<bool> {
        match self.values.get(key) {
            Some(SettingValue::Flag(b)) => Some(*b),
            _ => None,
        }
    }

    pub fn fraction(&self, key: &str) -> Option<f64> {
        match self.values.get(key) {
            Some(SettingValue::Fraction(f)) => Some(*f),
            _ => None,
        }
    }

    pub fn integer(&self, key: &str) -> Option<u64> {
        match self.values.get(key) {
            Some(SettingValue::Integer(i)) => Some(*i),
            _ => None,
        }
    }

    pub fn text(&self, key: &str) -> Option<&str> {
        match self.values.get(key) {
            Some(SettingValue::Text(s)) => Some(s),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Overwrite one already-validated value. Unknown keys are ignored.
    pub(crate) fn set(&mut self, key: &str, value: SettingValue) {
        if let Some(slot) = self.values.get_mut(key) {
            *slot = value;
        }
    }
}
