use domain::safety_policy::{
    CategoryAction, Direction, GuardrailVerdict, PolicyConfig, SafetyPolicy,
};
use shared::types::Result;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Standing instructions sent as the system message on every request.
pub const SYSTEM_CONTEXT: &str = "You are an audio analysis assistant. Your responses should be:\n\
1. Focused on audio, music, and sound analysis topics\n\
2. Educational and informative\n\
3. Professional and appropriate\n\
4. Clear and accessible to users with varying technical backgrounds\n\n\
Avoid discussing unrelated topics and maintain focus on audio analysis.";

/// Pure check of text against a compiled [`SafetyPolicy`]. Cloning is cheap;
/// the policy itself is shared.
#[derive(Debug, Clone)]
pub struct GuardrailFilter {
    policy: Arc<SafetyPolicy>,
}

impl GuardrailFilter {
    pub fn new(policy: SafetyPolicy) -> Self {
        Self {
            policy: Arc::new(policy),
        }
    }

    /// Resolve the active policy: the TOML file when given, the built-in table
    /// otherwise, and an allow-everything policy when filtering is switched off.
    pub fn from_settings(enabled: bool, policy_path: Option<&Path>) -> Result<Self> {
        let config = match (enabled, policy_path) {
            (false, _) => {
                info!("content filter disabled");
                PolicyConfig::permissive()
            }
            (true, Some(path)) => {
                debug!("loading guardrail policy from {}", path.display());
                PolicyConfig::load(path)?
            }
            (true, None) => PolicyConfig::default(),
        };
        Ok(Self::new(SafetyPolicy::compile(config)?))
    }

    /// `context_available` is true when prior analysis results back the
    /// conversation; off-topic follow-ups are then allowed through.
    pub fn check(
        &self,
        text: &str,
        direction: Direction,
        context_available: bool,
    ) -> GuardrailVerdict {
        if !self.policy.enabled {
            return GuardrailVerdict::Allow;
        }
        let verdict = match direction {
            Direction::Outbound => self.check_outbound(text, context_available),
            Direction::Inbound => self.check_inbound(text),
        };
        if let GuardrailVerdict::Reject(reason) = &verdict {
            warn!("{:?} text rejected: {}", direction, reason);
        }
        verdict
    }

    fn check_outbound(&self, text: &str, context_available: bool) -> GuardrailVerdict {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return GuardrailVerdict::Reject("message is empty".to_string());
        }
        if trimmed.chars().count() > self.policy.max_outbound_chars {
            return GuardrailVerdict::Reject(format!(
                "message exceeds {} characters",
                self.policy.max_outbound_chars
            ));
        }
        if let Some(category) = self.policy.first_match(trimmed, CategoryAction::Reject) {
            return GuardrailVerdict::Reject(format!(
                "message contains disallowed content ({})",
                category.name
            ));
        }
        if self.is_repetitive(trimmed) {
            return GuardrailVerdict::Reject("message is too repetitive".to_string());
        }

        let redacted = self.redact(trimmed);
        if !context_available && !self.is_on_topic(&redacted) {
            return GuardrailVerdict::Reject(
                "message is off-topic; ask about audio, music or sound analysis".to_string(),
            );
        }
        if redacted != trimmed {
            return GuardrailVerdict::Rewrite(redacted);
        }
        GuardrailVerdict::Allow
    }

    fn check_inbound(&self, text: &str) -> GuardrailVerdict {
        if let Some(category) = self.policy.first_match(text, CategoryAction::Reject) {
            debug!("model output matched category {}", category.name);
            return GuardrailVerdict::Rewrite(self.policy.refusal_template.clone());
        }

        let mut filtered = self.redact(text);
        let long = filtered.chars().count() >= self.policy.short_text_chars;
        if long && !self.is_on_topic(&filtered) {
            if let Some(note) = &self.policy.topic_redirect_note {
                filtered.push_str("\n\n");
                filtered.push_str(note);
            }
        }
        if filtered == text {
            GuardrailVerdict::Allow
        } else {
            GuardrailVerdict::Rewrite(filtered)
        }
    }

    fn redact(&self, text: &str) -> String {
        self.policy
            .categories
            .iter()
            .filter(|c| c.action == CategoryAction::Redact)
            .fold(text.to_string(), |acc, c| c.redact(&acc))
    }

    fn words(text: &str) -> Vec<String> {
        text.to_lowercase()
            .split(|c: char| !(c.is_alphanumeric() || c == '_'))
            .filter(|w| !w.is_empty())
            .map(str::to_string)
            .collect()
    }

    fn is_repetitive(&self, text: &str) -> bool {
        let words = Self::words(text);
        if words.len() <= self.policy.repetition_min_words {
            return false;
        }
        let unique: HashSet<&String> = words.iter().collect();
        (unique.len() as f64 / words.len() as f64) < self.policy.min_unique_word_ratio
    }

    pub fn is_on_topic(&self, text: &str) -> bool {
        let words: HashSet<String> = Self::words(text).into_iter().collect();
        let topic_hits = words.iter().filter(|w| self.policy.topic_terms.contains(*w)).count();
        let short = text.chars().count() < self.policy.short_text_chars;

        if short && topic_hits > 0 {
            return true;
        }
        if !short {
            return topic_hits >= 2;
        }
        words.len() <= 3 && words.iter().any(|w| self.policy.acknowledgements.contains(w))
    }
}
