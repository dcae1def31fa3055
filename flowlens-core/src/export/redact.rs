//! Pattern-based redaction applied to flows at export time
//!
//! Rules are regex pattern -> replacement pairs, applied in list order to
//! request/response text and header values. Patterns are compiled up front
//! so a malformed rule fails the export before any output is produced.

use crate::error::{Error, Result};
use crate::types::{Flow, FlowState, RedactionRule, ResponseRecord};
use regex::Regex;

/// Compiled, ordered redaction rule set
pub struct Redactor {
    rules: Vec<(Regex, String)>,
}

impl Redactor {
    /// Compile the enabled rules, in order. A malformed pattern is a
    /// validation error naming the offending rule.
    pub fn compile(rules: &[RedactionRule]) -> Result<Self> {
        let mut compiled = Vec::new();
        for rule in rules.iter().filter(|r| r.enabled) {
            let regex = Regex::new(&rule.pattern).map_err(|e| {
                Error::Validation(format!("redaction rule '{}': {}", rule.name, e))
            })?;
            compiled.push((regex, rule.replacement.clone()));
        }
        Ok(Self { rules: compiled })
    }

    /// Apply all rules to one string, first rule to last
    pub fn apply(&self, text: &str) -> String {
        let mut out = text.to_string();
        for (regex, replacement) in &self.rules {
            out = regex.replace_all(&out, replacement.as_str()).into_owned();
        }
        out
    }

    fn apply_opt(&self, text: &mut Option<String>) {
        if let Some(t) = text {
            *t = self.apply(t);
        }
    }

    /// Redact every text field of a flow in place
    pub fn redact_flow(&self, flow: &mut Flow) {
        for value in flow.request.headers.values_mut() {
            *value = self.apply(value);
        }
        self.apply_opt(&mut flow.request.body);
        self.apply_opt(&mut flow.request.system_prompt);
        for message in &mut flow.request.messages {
            message.content = self.apply(&message.content);
        }

        match &mut flow.state {
            FlowState::Completed { response } => self.redact_response(response),
            FlowState::Streaming { stream } => {
                for chunk in &mut stream.chunks {
                    self.apply_opt(&mut chunk.payload);
                    self.apply_opt(&mut chunk.content_delta);
                    self.apply_opt(&mut chunk.thinking_delta);
                }
            }
            FlowState::Failed { error } | FlowState::Cancelled { error } => {
                error.message = self.apply(&error.message);
                self.apply_opt(&mut error.raw);
            }
            FlowState::Pending => {}
        }
    }

    fn redact_response(&self, response: &mut ResponseRecord) {
        for value in response.headers.values_mut() {
            *value = self.apply(value);
        }
        self.apply_opt(&mut response.body);
        self.apply_opt(&mut response.content);
        self.apply_opt(&mut response.reasoning);
        if let Some(stream) = &mut response.stream {
            for chunk in &mut stream.chunks {
                self.apply_opt(&mut chunk.payload);
                self.apply_opt(&mut chunk.content_delta);
                self.apply_opt(&mut chunk.thinking_delta);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_redaction_rules;

    #[test]
    fn test_malformed_pattern_is_validation_error() {
        let rules = vec![RedactionRule {
            name: "bad".to_string(),
            pattern: "([unclosed".to_string(),
            replacement: "x".to_string(),
            enabled: true,
        }];
        let err = Redactor::compile(&rules);
        assert!(matches!(err, Err(Error::Validation(_))));
    }

    #[test]
    fn test_disabled_rules_are_skipped() {
        let rules = vec![RedactionRule {
            name: "off".to_string(),
            pattern: "secret".to_string(),
            replacement: "[X]".to_string(),
            enabled: false,
        }];
        let redactor = Redactor::compile(&rules).unwrap();
        assert_eq!(redactor.apply("secret stuff"), "secret stuff");
    }

    #[test]
    fn test_rules_apply_in_order() {
        let rules = vec![
            RedactionRule {
                name: "first".to_string(),
                pattern: "alpha".to_string(),
                replacement: "beta".to_string(),
                enabled: true,
            },
            RedactionRule {
                name: "second".to_string(),
                pattern: "beta".to_string(),
                replacement: "gamma".to_string(),
                enabled: true,
            },
        ];
        let redactor = Redactor::compile(&rules).unwrap();
        assert_eq!(redactor.apply("alpha"), "gamma");
    }

    #[test]
    fn test_default_rules_catch_api_keys() {
        let redactor = Redactor::compile(&default_redaction_rules()).unwrap();
        let text = "auth with sk-abcdefghijklmnopqrstuvwxyz123456 please";
        let redacted = redactor.apply(text);
        assert!(!redacted.contains("sk-abcdef"));
        assert!(redacted.contains("[REDACTED-API-KEY]"));
    }
}
