//! Model alias resolution.
//!
//! Maps the model names callers send (`4o`, `sonnet`, `claude-3-5-haiku-20241022`,
//! `anthropic/...`) onto the identifiers the backend accepts.

use crate::config::ModelsConfig;
use crate::error::{BridgeError, Result};
use serde::Serialize;
use std::collections::HashMap;

const PROVIDER_PREFIX: &str = "anthropic/";

/// One entry of the alias table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelAlias {
    pub id: String,
    pub real_id: String,
    pub provider: String,
}

const BUILTIN_ALIASES: &[(&str, &str, &str)] = &[
    ("gpt-4", "gpt-4", "OpenAI"),
    ("4", "gpt-4", "OpenAI"),
    ("gpt-4o", "gpt-4o", "OpenAI"),
    ("4o", "gpt-4o", "OpenAI"),
    ("gpt-4o-mini", "gpt-4o-mini", "OpenAI"),
    ("o1", "o1", "OpenAI"),
    ("o3-mini", "o3-mini", "OpenAI"),
    ("sonnet", "claude-3.7-sonnet", "Anthropic"),
    ("claude-3.5-sonnet", "claude-3.5-sonnet", "Anthropic"),
    ("claude-3.7-sonnet", "claude-3.7-sonnet", "Anthropic"),
    ("claude-3.7-sonnet-thought", "claude-3.7-sonnet-thought", "Anthropic"),
    ("gemini-2.0-flash", "gemini-2.0-flash-001", "Google"),
    ("gemini-2.5-pro", "gemini-2.5-pro-preview-03-25", "Google"),
    ("gemini-flash", "gemini-2.0-flash-001", "Google"),
    ("gemini-pro", "gemini-2.5-pro-preview-03-25", "Google"),
];

/// Which inbound schema the name came from. Family aliases only apply to
/// Anthropic-style callers, whose clients send dated Claude model names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    OpenAi,
    Anthropic,
}

/// Read-only alias table shared by all requests.
#[derive(Debug, Clone)]
pub struct ModelResolver {
    aliases: Vec<ModelAlias>,
    by_name: HashMap<String, usize>,
    default_model: String,
    big_model: String,
    small_model: String,
    family_aliases: bool,
}

impl ModelResolver {
    pub fn new(config: &ModelsConfig) -> Self {
        let mut aliases: Vec<ModelAlias> = BUILTIN_ALIASES
            .iter()
            .map(|(id, real_id, provider)| ModelAlias {
                id: (*id).to_string(),
                real_id: (*real_id).to_string(),
                provider: (*provider).to_string(),
            })
            .collect();

        // Sorted so table order is stable regardless of HashMap iteration
        let mut extra: Vec<_> = config.aliases.iter().collect();
        extra.sort();
        for (id, real_id) in extra {
            aliases.push(ModelAlias {
                id: id.clone(),
                real_id: real_id.clone(),
                provider: "Custom".to_string(),
            });
        }

        // Later entries override earlier ones, so configured aliases win
        let by_name = aliases
            .iter()
            .enumerate()
            .map(|(i, a)| (a.id.to_lowercase(), i))
            .collect();

        Self {
            aliases,
            by_name,
            default_model: config.default.clone(),
            big_model: config.big.clone(),
            small_model: config.small.clone(),
            family_aliases: config.family_aliases,
        }
    }

    /// Exact, case-insensitive alias lookup.
    pub fn lookup(&self, name: &str) -> Option<&ModelAlias> {
        self.by_name
            .get(&name.to_lowercase())
            .map(|&i| &self.aliases[i])
    }

    /// Resolve a caller-supplied model name to a backend model id.
    ///
    /// # Errors
    /// Returns `BridgeError::UnknownModel` carrying the name as sent.
    pub fn resolve(&self, name: &str, dialect: Dialect) -> Result<String> {
        let trimmed = name.trim();
        let candidate = if trimmed.is_empty() {
            self.default_model.as_str()
        } else {
            strip_provider_prefix(trimmed)
        };

        if let Some(alias) = self.lookup(candidate) {
            return Ok(alias.real_id.clone());
        }

        if dialect == Dialect::Anthropic && self.family_aliases {
            if let Some(target) = self.family_target(candidate) {
                tracing::debug!(from = %name, to = %target, "Mapped model family");
                return Ok(self
                    .lookup(target)
                    .map_or_else(|| target.to_string(), |a| a.real_id.clone()));
            }
        }

        Err(BridgeError::unknown_model(name))
    }

    fn family_target(&self, name: &str) -> Option<&str> {
        let lower = name.to_lowercase();
        if lower.contains("haiku") {
            Some(&self.small_model)
        } else if lower.contains("sonnet") {
            Some(&self.big_model)
        } else {
            None
        }
    }

    pub fn aliases(&self) -> &[ModelAlias] {
        &self.aliases
    }

    pub fn default_model(&self) -> &str {
        &self.default_model
    }
}

fn strip_provider_prefix(name: &str) -> &str {
    match name.get(..PROVIDER_PREFIX.len()) {
        Some(prefix) if prefix.eq_ignore_ascii_case(PROVIDER_PREFIX) => {
            &name[PROVIDER_PREFIX.len()..]
        }
        _ => name,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> ModelResolver {
        ModelResolver::new(&ModelsConfig::default())
    }

    #[test]
    fn test_exact_alias() {
        let r = resolver();
        assert_eq!(r.resolve("4o", Dialect::OpenAi).unwrap(), "gpt-4o");
        assert_eq!(
            r.resolve("gemini-pro", Dialect::OpenAi).unwrap(),
            "gemini-2.5-pro-preview-03-25"
        );
    }

    #[test]
    fn test_case_insensitive_and_idempotent() {
        let r = resolver();
        let upper = r.resolve("SONNET", Dialect::Anthropic).unwrap();
        let lower = r.resolve("sonnet", Dialect::Anthropic).unwrap();
        assert_eq!(upper, lower);
        assert_eq!(upper, "claude-3.7-sonnet");
        assert_eq!(r.resolve(&upper, Dialect::Anthropic).unwrap(), upper);

        for alias in r.aliases() {
            let once = r.resolve(&alias.id, Dialect::OpenAi).unwrap();
            let twice = r.resolve(&once, Dialect::OpenAi);
            // Every real id that is itself in the table resolves to itself
            if let Ok(twice) = twice {
                assert_eq!(once, twice);
            }
            assert_eq!(
                r.resolve(&alias.id.to_uppercase(), Dialect::OpenAi).unwrap(),
                once
            );
        }
    }

    #[test]
    fn test_family_aliases_for_anthropic_callers() {
        let r = resolver();
        assert_eq!(
            r.resolve("claude-3-5-haiku-20241022", Dialect::Anthropic)
                .unwrap(),
            "gpt-4o-mini"
        );
        assert_eq!(
            r.resolve("claude-sonnet-4-20250514", Dialect::Anthropic)
                .unwrap(),
            "gpt-4o"
        );
        assert_eq!(
            r.resolve("anthropic/claude-3-haiku", Dialect::Anthropic)
                .unwrap(),
            "gpt-4o-mini"
        );
    }

    #[test]
    fn test_family_aliases_not_used_for_openai_callers() {
        let r = resolver();
        let err = r
            .resolve("claude-3-5-haiku-20241022", Dialect::OpenAi)
            .unwrap_err();
        assert!(matches!(err, BridgeError::UnknownModel { ref name } if name == "claude-3-5-haiku-20241022"));
    }

    #[test]
    fn test_family_aliases_disabled() {
        let config = ModelsConfig {
            family_aliases: false,
            ..ModelsConfig::default()
        };
        let r = ModelResolver::new(&config);
        assert!(r.resolve("claude-3-opus-haiku", Dialect::Anthropic).is_err());
    }

    #[test]
    fn test_big_model_resolved_through_table() {
        let config = ModelsConfig {
            big: "sonnet".to_string(),
            ..ModelsConfig::default()
        };
        let r = ModelResolver::new(&config);
        assert_eq!(
            r.resolve("claude-sonnet-4", Dialect::Anthropic).unwrap(),
            "claude-3.7-sonnet"
        );
    }

    #[test]
    fn test_unknown_model_keeps_original_name() {
        let r = resolver();
        match r.resolve("anthropic/Mystery-Model", Dialect::Anthropic) {
            Err(BridgeError::UnknownModel { name }) => {
                assert_eq!(name, "anthropic/Mystery-Model");
            }
            other => panic!("expected UnknownModel, got {other:?}"),
        }
    }

    #[test]
    fn test_empty_name_uses_default() {
        let r = resolver();
        assert_eq!(r.resolve("", Dialect::OpenAi).unwrap(), "gpt-4o");
    }

    #[test]
    fn test_configured_aliases() {
        let mut config = ModelsConfig::default();
        config
            .aliases
            .insert("Fast".to_string(), "gpt-4o-mini".to_string());
        config
            .aliases
            .insert("4o".to_string(), "gpt-4o-2024-11-20".to_string());
        let r = ModelResolver::new(&config);
        assert_eq!(r.resolve("fast", Dialect::OpenAi).unwrap(), "gpt-4o-mini");
        assert_eq!(r.resolve("4o", Dialect::OpenAi).unwrap(), "gpt-4o-2024-11-20");
        assert_eq!(r.lookup("FAST").unwrap().provider, "Custom");
    }
}
