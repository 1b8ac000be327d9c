//! Topic and safety policy for text crossing the API boundary.
//!
//! [`PolicyConfig`] is the loosely typed form read from TOML; [`SafetyPolicy`]
//! is the validated, compiled form handed to the guardrail filter. A policy is
//! a table of categories, each mapped to an action.

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CategoryAction {
    /// Block the text outright.
    Reject,
    /// Replace matches with the category's replacement token.
    Redact,
}

impl fmt::Display for CategoryAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CategoryAction::Reject => write!(f, "reject"),
            CategoryAction::Redact => write!(f, "redact"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// User text on its way to the model.
    Outbound,
    /// Model text on its way to the user.
    Inbound,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "verdict", content = "detail", rename_all = "lowercase")]
pub enum GuardrailVerdict {
    Allow,
    Reject(String),
    Rewrite(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryConfig {
    pub name: String,
    pub action: CategoryAction,
    pub patterns: Vec<String>,
    #[serde(default = "default_replacement")]
    pub replacement: String,
    /// Matches containing any of these substrings are left untouched.
    #[serde(default)]
    pub exempt: Vec<String>,
}

fn default_replacement() -> String {
    "[REDACTED]".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub categories: Vec<CategoryConfig>,
    #[serde(default)]
    pub topic_terms: Vec<String>,
    #[serde(default)]
    pub acknowledgements: Vec<String>,
    #[serde(default = "default_max_outbound_chars")]
    pub max_outbound_chars: usize,
    #[serde(default = "default_min_unique_ratio")]
    pub min_unique_word_ratio: f64,
    #[serde(default = "default_repetition_min_words")]
    pub repetition_min_words: usize,
    #[serde(default = "default_short_text_chars")]
    pub short_text_chars: usize,
    #[serde(default = "default_refusal")]
    pub refusal_template: String,
    #[serde(default)]
    pub topic_redirect_note: Option<String>,
}

fn default_true() -> bool {
    true
}
fn default_max_outbound_chars() -> usize {
    5000
}
fn default_min_unique_ratio() -> f64 {
    0.3
}
fn default_repetition_min_words() -> usize {
    10
}
fn default_short_text_chars() -> usize {
    200
}
fn default_refusal() -> String {
    "I can only help with audio, music and signal-processing questions, \
     and I can't share that response."
        .to_string()
}

fn category(
    name: &str,
    action: CategoryAction,
    patterns: &[&str],
    replacement: &str,
) -> CategoryConfig {
    CategoryConfig {
        name: name.to_string(),
        action,
        patterns: patterns.iter().map(|p| p.to_string()).collect(),
        replacement: replacement.to_string(),
        exempt: Vec::new(),
    }
}

impl Default for PolicyConfig {
    fn default() -> Self {
        let mut urls = category(
            "external_links",
            CategoryAction::Redact,
            &[r"https?://[^\s)]+"],
            "[URL_REMOVED]",
        );
        urls.exempt = ["wikipedia.org", "github.com", "docs.rs"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        Self {
            enabled: true,
            categories: vec![
                category(
                    "violence",
                    CategoryAction::Reject,
                    &[
                        r"\bkill(?:s|ed|ing)?\b",
                        r"\bmurder\w*",
                        r"\bbomb(?:s|ing)?\b",
                        r"\bweapons?\b",
                    ],
                    "[REMOVED]",
                ),
                category(
                    "hate",
                    CategoryAction::Reject,
                    &[r"\bhate\s+speech\b", r"\bracial\s+slurs?\b"],
                    "[REMOVED]",
                ),
                category(
                    "personal_information",
                    CategoryAction::Reject,
                    &[
                        r"\bssn\b",
                        r"\bsocial\s+security\s+numbers?\b",
                        r"\bcredit\s+card\b",
                        r"\bpersonal\s+information\b",
                        r"\bprivate\s+data\b",
                    ],
                    "[REMOVED]",
                ),
                category(
                    "email",
                    CategoryAction::Redact,
                    &[r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b"],
                    "[EMAIL_REMOVED]",
                ),
                category(
                    "phone",
                    CategoryAction::Redact,
                    &[r"\b\d{3}[-. ]\d{3}[-. ]\d{4}\b"],
                    "[PHONE_REMOVED]",
                ),
                urls,
            ],
            topic_terms: [
                "audio", "spectrogram", "frequency", "frequencies", "sound", "music", "acoustic",
                "signal", "processing", "analysis", "waveform", "amplitude", "decibel", "db",
                "hertz", "hz", "pitch", "tone", "harmony", "rhythm", "tempo", "bpm", "beat",
                "melody", "voice", "speech", "recording", "mfcc", "centroid", "rolloff",
                "bandwidth", "energy", "rms", "fft", "spectrum", "spectral", "noise", "song",
                "track", "mix", "instrument", "bass", "treble", "loudness",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            acknowledgements: ["ok", "okay", "yes", "no", "hello", "hi", "thanks", "thank"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            max_outbound_chars: default_max_outbound_chars(),
            min_unique_word_ratio: default_min_unique_ratio(),
            repetition_min_words: default_repetition_min_words(),
            short_text_chars: default_short_text_chars(),
            refusal_template: default_refusal(),
            topic_redirect_note: Some(
                "[Note: I focus on audio analysis topics. \
                 Ask me about spectrograms, audio features or sound analysis.]"
                    .to_string(),
            ),
        }
    }
}

impl PolicyConfig {
    /// Everything passes; used when the content filter is switched off.
    pub fn permissive() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    pub fn from_toml_str(text: &str) -> Result<Self, PolicyError> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: &Path) -> Result<Self, PolicyError> {
        let text = std::fs::read_to_string(path).map_err(|source| PolicyError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }
}

#[derive(Error, Debug)]
pub enum PolicyError {
    #[error("category name must not be empty")]
    UnnamedCategory,

    #[error("category `{0}` is defined more than once")]
    DuplicateCategory(String),

    #[error("category `{0}` has no patterns")]
    EmptyCategory(String),

    #[error("invalid pattern in category `{category}`: {source}")]
    InvalidPattern {
        category: String,
        #[source]
        source: regex::Error,
    },

    #[error("{0} must be between 0 and 1")]
    OutOfRange(&'static str),

    #[error("failed to read policy {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse policy: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone)]
pub struct PolicyCategory {
    pub name: String,
    pub action: CategoryAction,
    pub replacement: String,
    pub exempt: Vec<String>,
    pattern: Regex,
}

impl PolicyCategory {
    pub fn is_match(&self, text: &str) -> bool {
        self.pattern.find_iter(text).any(|m| !self.is_exempt(m.as_str()))
    }

    pub fn redact(&self, text: &str) -> String {
        self.pattern
            .replace_all(text, |caps: &regex::Captures| {
                let found = &caps[0];
                if self.is_exempt(found) {
                    found.to_string()
                } else {
                    self.replacement.clone()
                }
            })
            .into_owned()
    }

    fn is_exempt(&self, found: &str) -> bool {
        self.exempt.iter().any(|e| found.contains(e.as_str()))
    }
}

/// Validated policy. Immutable once compiled.
#[derive(Debug, Clone)]
pub struct SafetyPolicy {
    pub enabled: bool,
    pub categories: Vec<PolicyCategory>,
    pub topic_terms: HashSet<String>,
    pub acknowledgements: HashSet<String>,
    pub max_outbound_chars: usize,
    pub min_unique_word_ratio: f64,
    pub repetition_min_words: usize,
    pub short_text_chars: usize,
    pub refusal_template: String,
    pub topic_redirect_note: Option<String>,
}

impl SafetyPolicy {
    pub fn compile(config: PolicyConfig) -> Result<Self, PolicyError> {
        if !(0.0..=1.0).contains(&config.min_unique_word_ratio) {
            return Err(PolicyError::OutOfRange("min_unique_word_ratio"));
        }

        let mut seen = HashSet::new();
        let mut categories = Vec::with_capacity(config.categories.len());
        for cat in config.categories {
            let name = cat.name.trim().to_string();
            if name.is_empty() {
                return Err(PolicyError::UnnamedCategory);
            }
            if !seen.insert(name.clone()) {
                return Err(PolicyError::DuplicateCategory(name));
            }
            if cat.patterns.is_empty() {
                return Err(PolicyError::EmptyCategory(name));
            }
            let joined = cat
                .patterns
                .iter()
                .map(|p| format!("(?:{})", p))
                .collect::<Vec<_>>()
                .join("|");
            let pattern = RegexBuilder::new(&joined)
                .case_insensitive(true)
                .build()
                .map_err(|source| PolicyError::InvalidPattern {
                    category: name.clone(),
                    source,
                })?;
            categories.push(PolicyCategory {
                name,
                action: cat.action,
                replacement: cat.replacement,
                exempt: cat.exempt,
                pattern,
            });
        }

        Ok(Self {
            enabled: config.enabled,
            categories,
            topic_terms: lowercase_set(config.topic_terms),
            acknowledgements: lowercase_set(config.acknowledgements),
            max_outbound_chars: config.max_outbound_chars,
            min_unique_word_ratio: config.min_unique_word_ratio,
            repetition_min_words: config.repetition_min_words,
            short_text_chars: config.short_text_chars,
            refusal_template: config.refusal_template,
            topic_redirect_note: config.topic_redirect_note,
        })
    }

    /// The built-in policy. Compiling it cannot fail; the test suite pins that.
    pub fn builtin() -> Result<Self, PolicyError> {
        Self::compile(PolicyConfig::default())
    }

    pub fn first_match(&self, text: &str, action: CategoryAction) -> Option<&PolicyCategory> {
        self.categories
            .iter()
            .filter(|c| c.action == action)
            .find(|c| c.is_match(text))
    }
}

fn lowercase_set(items: Vec<String>) -> HashSet<String> {
    items.into_iter().map(|s| s.trim().to_lowercase()).collect()
}
