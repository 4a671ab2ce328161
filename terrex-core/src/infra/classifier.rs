use std::time::Duration;

use regex::{RegexSet, RegexSetBuilder};

use crate::{
    error::{OrchestratorError, Result},
    orchestration::config::{ClassifierConfig, ClassifierRule},
    ports::{ErrorClassifier, Resolution},
};

#[derive(Debug)]
struct CompiledRule {
    patterns: RegexSet,
    resolution: Resolution,
}

/// Error classifier driven by a configured table of log patterns.
///
/// Rules are tried in order and the first rule with any matching pattern
/// wins. Patterns are case-insensitive.
#[derive(Debug, Default)]
pub struct PatternClassifier {
    rules: Vec<CompiledRule>,
}

impl PatternClassifier {
    pub fn new(rules: &[ClassifierRule]) -> Result<Self> {
        let rules = rules
            .iter()
            .enumerate()
            .map(|(index, rule)| {
                let patterns = RegexSetBuilder::new(&rule.patterns)
                    .case_insensitive(true)
                    .build()
                    .map_err(|e| {
                        OrchestratorError::Configuration(format!(
                            "classifier rule {index}: {e}"
                        ))
                    })?;
                Ok(CompiledRule {
                    patterns,
                    resolution: Resolution {
                        status: rule.status,
                        reason: rule.reason.clone(),
                        retry_after: rule.retry_after_secs.map(Duration::from_secs),
                        retry_limit: rule.retry_limit,
                    },
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { rules })
    }

    pub fn from_config(config: &ClassifierConfig) -> Result<Self> {
        Self::new(&config.rules)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl ErrorClassifier for PatternClassifier {
    fn classify(&self, raw_log: &str, _scene_name: &str) -> Option<Resolution> {
        self.rules
            .iter()
            .find(|rule| rule.patterns.is_match(raw_log))
            .map(|rule| rule.resolution.clone())
    }
}
