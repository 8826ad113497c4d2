//! # Module Resolver
//!
//! Maps a task to at most one module id.
//!
//! Resolution order:
//! 1. The task's explicit `module_hint`, if present.
//! 2. The first keyword rule (in table order) whose keyword occurs in the
//!    description, compared case-insensitively.
//! 3. Otherwise no module.
//!
//! The function is total and deterministic: every description yields
//! `Some(one id)` or `None`, and the same input always yields the same answer.

use crate::TaskRef;
use crate::config::KeywordRule;

/// Keyword table prepared for matching.
#[derive(Debug, Clone, Default)]
pub struct ModuleResolver {
    /// (lowercased keyword, module id), in table order.
    rules: Vec<(String, String)>,
}

impl ModuleResolver {
    #[must_use]
    pub fn new(rules: &[KeywordRule]) -> Self {
        Self {
            rules: rules
                .iter()
                .map(|r| (r.keyword.trim().to_lowercase(), r.module.trim().to_string()))
                .filter(|(keyword, _)| !keyword.is_empty())
                .collect(),
        }
    }

    /// Resolve a free-form description through the keyword table only.
    #[must_use]
    pub fn resolve_description(&self, description: &str) -> Option<&str> {
        let haystack = description.to_lowercase();
        self.rules
            .iter()
            .find(|(keyword, _)| haystack.contains(keyword.as_str()))
            .map(|(_, module)| module.as_str())
    }

    /// Resolve a task: explicit hint first, then the keyword table.
    #[must_use]
    pub fn resolve<'a>(&'a self, task: &'a TaskRef) -> Option<&'a str> {
        match task.module_hint.as_deref().map(str::trim) {
            Some(hint) if !hint.is_empty() => Some(hint),
            _ => self.resolve_description(&task.description),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> ModuleResolver {
        ModuleResolver::new(&KeywordRule::defaults())
    }

    #[test]
    fn first_matching_rule_wins() {
        // "database" precedes any later rule that might also match.
        assert_eq!(
            resolver().resolve_description("Complete database module testing"),
            Some("database")
        );
        assert_eq!(
            resolver().resolve_description("Fix API authentication bug"),
            Some("api")
        );
    }

    #[test]
    fn matching_is_case_insensitive() {
        assert_eq!(
            resolver().resolve_description("Update the DATABASE Schema"),
            Some("database")
        );
    }

    #[test]
    fn no_match_is_none() {
        assert_eq!(resolver().resolve_description("Write release notes"), None);
    }

    #[test]
    fn hint_overrides_keywords() {
        let task = TaskRef::new("Fix API authentication bug").with_module("auth");
        assert_eq!(resolver().resolve(&task), Some("auth"));
    }

    #[test]
    fn blank_hint_falls_back_to_keywords() {
        let task = TaskRef::new("Tune database indexes").with_module("  ");
        assert_eq!(resolver().resolve(&task), Some("database"));
    }

    #[test]
    fn empty_table_resolves_nothing() {
        let resolver = ModuleResolver::new(&[]);
        assert_eq!(resolver.resolve_description("database"), None);
    }
}
