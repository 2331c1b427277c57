//! Semantic-verb registry and role resolution.
//!
//! The intent classifier and callers may name roles by synonym
//! ("programming" -> `coding`). The resolver normalizes case and whitespace,
//! prefers an exact canonical-name match, and breaks synonym ties by the
//! canonical preference order: `router`, `reasoning`, `coding`,
//! `summarization`, `analysis`, then custom roles.

use std::collections::BTreeMap;
use thiserror::Error;

/// A canonical role with its known synonyms.
#[derive(Debug, Clone, Copy)]
pub struct SemanticVerb {
    pub role: &'static str,
    pub description: &'static str,
    pub synonyms: &'static [&'static str],
    pub required: bool,
}

/// The built-in verb table.
pub const BUILTIN_VERBS: [SemanticVerb; 5] = [
    SemanticVerb {
        role: "router",
        description: "Intent classification and task triage",
        synonyms: &["classifier", "triage", "intent"],
        required: true,
    },
    SemanticVerb {
        role: "reasoning",
        description: "Multi-step planning and architectural reasoning",
        synonyms: &["planner", "architect", "planning"],
        required: true,
    },
    SemanticVerb {
        role: "coding",
        description: "Code generation and implementation",
        synonyms: &["code generation", "programming", "developer"],
        required: true,
    },
    SemanticVerb {
        role: "summarization",
        description: "Text summarization and digest generation",
        synonyms: &["summarize", "tldr", "digest"],
        required: false,
    },
    SemanticVerb {
        role: "analysis",
        description: "Data analysis and evaluation",
        synonyms: &["analyze", "evaluate", "assess"],
        required: false,
    },
];

/// Roles that must be configured for the pipeline to run.
pub const REQUIRED_ROLES: [&str; 3] = ["router", "reasoning", "coding"];

/// Failure to map a requested role to a canonical one.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoleError {
    #[error("role_unknown: '{0}'")]
    Unknown(String),
}

/// Maps requested role strings (possibly synonyms) to canonical role names.
#[derive(Debug)]
pub struct RoleResolver {
    /// Canonical roles in tie-break preference order, each with its merged
    /// lowercased synonym set.
    ordered: Vec<(String, Vec<String>)>,
    /// Every name that resolves to itself: built-ins, custom verb roles,
    /// and roles that only exist as chain keys.
    canonical: Vec<String>,
}

impl RoleResolver {
    /// Builds a resolver from the config's custom verbs and the set of roles
    /// that have chains configured.
    pub fn new<'a>(
        custom_verbs: &BTreeMap<String, Vec<String>>,
        chain_roles: impl IntoIterator<Item = &'a String>,
    ) -> Self {
        let mut ordered: Vec<(String, Vec<String>)> = Vec::new();
        for verb in BUILTIN_VERBS {
            let mut synonyms: Vec<String> =
                verb.synonyms.iter().map(|s| s.to_lowercase()).collect();
            if let Some(extra) = custom_verbs.get(verb.role) {
                synonyms.extend(extra.iter().map(|s| s.to_lowercase()));
            }
            ordered.push((verb.role.to_string(), synonyms));
        }
        for (role, synonyms) in custom_verbs {
            if BUILTIN_VERBS.iter().any(|v| v.role == role) {
                continue;
            }
            ordered.push((
                role.clone(),
                synonyms.iter().map(|s| s.to_lowercase()).collect(),
            ));
        }

        let mut canonical: Vec<String> = ordered.iter().map(|(r, _)| r.clone()).collect();
        for role in chain_roles {
            if !canonical.iter().any(|r| r == role) {
                canonical.push(role.clone());
            }
        }

        Self { ordered, canonical }
    }

    /// Resolves a requested role (or synonym) to its canonical name.
    ///
    /// # Errors
    /// [`RoleError::Unknown`] when the normalized string is neither a
    /// canonical role nor a listed synonym.
    pub fn resolve(&self, verb: &str) -> Result<String, RoleError> {
        let key = verb.trim().to_lowercase();
        if key.is_empty() {
            return Err(RoleError::Unknown(verb.to_string()));
        }

        // Exact canonical-name match always wins over synonym matches.
        if let Some(role) = self.canonical.iter().find(|r| r.to_lowercase() == key) {
            return Ok(role.clone());
        }

        for (role, synonyms) in &self.ordered {
            if synonyms.iter().any(|s| s == &key) {
                return Ok(role.clone());
            }
        }

        Err(RoleError::Unknown(verb.to_string()))
    }
}
