// rules-engine-providers/src/registry.rs
// ============================================================================
// Module: Extractor Registry
// Description: Resolves a numeric-extraction strategy by name.
// Purpose: Let configuration pick an extractor without the caller matching
//          on a hard-coded enum.
// Dependencies: rules-engine-providers::extraction
// ============================================================================

//! ## Overview
//! [`ExtractorRegistry`] is a small named-lookup table over
//! [`NumericExtractor`] trait objects, routing a numeric-extraction strategy
//! by name. It carries no access-policy layer: every registered extractor is
//! reachable by name, since extraction strategy choice carries no trust
//! boundary of its own.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::extraction::DefaultExtractor;
use crate::extraction::NumericExtractor;

/// Raised when [`ExtractorRegistry::resolve`] is asked for a name that was
/// never registered.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("no numeric extractor registered under name '{0}'")]
pub struct UnknownExtractorError(String);

/// A named lookup table over [`NumericExtractor`] strategies.
///
/// Always carries a `"default"` entry backed by [`DefaultExtractor`], so a
/// lookup by an unconfigured name still has a sane fallback path available
/// via [`Self::resolve_or_default`].
pub struct ExtractorRegistry {
    extractors: BTreeMap<String, Box<dyn NumericExtractor>>,
    default: Box<dyn NumericExtractor>,
}

impl ExtractorRegistry {
    /// Builds a registry containing only the built-in `"default"` strategy.
    #[must_use]
    pub fn new() -> Self {
        let mut extractors: BTreeMap<String, Box<dyn NumericExtractor>> = BTreeMap::new();
        extractors.insert("default".to_string(), Box::new(DefaultExtractor));
        Self { extractors, default: Box::new(DefaultExtractor) }
    }

    /// Registers `extractor` under `name`, replacing any prior registration.
    pub fn register(&mut self, name: impl Into<String>, extractor: Box<dyn NumericExtractor>) {
        self.extractors.insert(name.into(), extractor);
    }

    /// Looks up the extractor registered under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`UnknownExtractorError`] when `name` was never registered.
    pub fn resolve(&self, name: &str) -> Result<&dyn NumericExtractor, UnknownExtractorError> {
        self.extractors.get(name).map(AsRef::as_ref).ok_or_else(|| UnknownExtractorError(name.to_string()))
    }

    /// Looks up `name`, falling back to the built-in `"default"` strategy
    /// when it isn't registered.
    #[must_use]
    pub fn resolve_or_default(&self, name: &str) -> &dyn NumericExtractor {
        self.extractors.get(name).map_or_else(|| self.default.as_ref(), AsRef::as_ref)
    }
}

impl Default for ExtractorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use crate::extraction::ScalarFieldExtractor;

    use super::*;

    #[test]
    fn unregistered_name_is_an_error() {
        let registry = ExtractorRegistry::new();
        match registry.resolve("brightness") {
            Err(err) => assert_eq!(err, UnknownExtractorError("brightness".to_string())),
            Ok(_) => panic!("expected resolve to fail for an unregistered name"),
        }
    }

    #[test]
    fn resolve_or_default_falls_back() {
        let registry = ExtractorRegistry::new();
        let _ = registry.resolve_or_default("missing");
    }

    #[test]
    fn registered_extractor_is_reachable_by_name() {
        let mut registry = ExtractorRegistry::new();
        registry.register("brightness", Box::new(ScalarFieldExtractor::new("brightness")));
        assert!(registry.resolve("brightness").is_ok());
    }
}
