// src/scoring/mod.rs

pub mod scorer;
pub mod strategy;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::config::DEFAULT_SCORING_SCHEME;
use strategy::{GeometricDecay, LinearDecay, ScoringStrategy};

/// Raised when a scheme name has no registered strategy. This is a
/// configuration error and is surfaced to the caller; the manager never
/// substitutes a default for an unknown name.
#[derive(Debug, Clone)]
pub struct UnknownSchemeError {
    pub scheme: String,
}

impl fmt::Display for UnknownSchemeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Unknown scoring scheme '{}'", self.scheme)
    }
}

impl std::error::Error for UnknownSchemeError {}

/// Resolves scheme names to strategy implementations.
///
/// `geometric-decay` and `linear-decay` are registered out of the box.
/// `LinearDecayWithZeros` ships as an implementation but is not reachable by
/// name unless a deployment registers it explicitly.
pub struct ScoringManager {
    default_scheme: String,
    registry: HashMap<String, Arc<dyn ScoringStrategy>>,
}

impl ScoringManager {
    pub fn new(default_scheme: impl Into<String>) -> Self {
        let mut registry: HashMap<String, Arc<dyn ScoringStrategy>> = HashMap::new();
        registry.insert("geometric-decay".to_string(), Arc::new(GeometricDecay));
        registry.insert("linear-decay".to_string(), Arc::new(LinearDecay));
        Self {
            default_scheme: default_scheme.into(),
            registry,
        }
    }

    /// Adds (or replaces) a named strategy.
    pub fn register(&mut self, name: impl Into<String>, strategy: Arc<dyn ScoringStrategy>) {
        self.registry.insert(name.into(), strategy);
    }

    /// Resolves `scheme`, falling back to the configured default when absent.
    pub fn for_scheme(
        &self,
        scheme: Option<&str>,
    ) -> Result<Arc<dyn ScoringStrategy>, UnknownSchemeError> {
        let name = scheme.unwrap_or(&self.default_scheme);
        self.registry
            .get(name)
            .cloned()
            .ok_or_else(|| UnknownSchemeError {
                scheme: name.to_string(),
            })
    }
}

impl Default for ScoringManager {
    fn default() -> Self {
        Self::new(DEFAULT_SCORING_SCHEME)
    }
}
