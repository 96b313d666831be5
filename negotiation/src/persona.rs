//! Agent roster — role identifiers and their static persona definitions.
//!
//! Roles form a closed sum type; behavior never dispatches on free-form
//! strings. Each role carries a fixed persona (codename, decision framework,
//! vocabulary, per-turn token ceiling) resolved through a static lookup.

use serde::{Deserialize, Serialize};

/// Role of a participant in a negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// System design and technical trade-offs.
    Architect,
    /// Hands-on implementation and effort estimates.
    Implementer,
    /// Code quality, correctness, and regression risk.
    Reviewer,
    /// Operations, reliability, and rollout safety.
    Sre,
    /// User impact, scope, and delivery priorities.
    Product,
}

impl Role {
    /// All defined roles.
    pub fn all() -> &'static [Role] {
        &[
            Self::Architect,
            Self::Implementer,
            Self::Reviewer,
            Self::Sre,
            Self::Product,
        ]
    }

    /// Static persona definition for this role.
    pub fn persona(self) -> &'static Persona {
        match self {
            Self::Architect => &ARCHITECT,
            Self::Implementer => &IMPLEMENTER,
            Self::Reviewer => &REVIEWER,
            Self::Sre => &SRE,
            Self::Product => &PRODUCT,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Architect => write!(f, "architect"),
            Self::Implementer => write!(f, "implementer"),
            Self::Reviewer => write!(f, "reviewer"),
            Self::Sre => write!(f, "sre"),
            Self::Product => write!(f, "product"),
        }
    }
}

/// Static definition of one agent role's identity.
#[derive(Debug, Clone)]
pub struct Persona {
    /// Short codename used in prompts and transcripts.
    pub codename: &'static str,
    /// The decision framework the role argues from.
    pub framework: &'static str,
    /// Vocabulary the role is expected to reason in.
    pub vocabulary: &'static [&'static str],
    /// Per-turn output token ceiling for this role.
    pub max_turn_tokens: u32,
}

static ARCHITECT: Persona = Persona {
    codename: "Keystone",
    framework: "Evaluate proposals by long-term maintainability, coupling, and failure \
                domains. Prefer reversible decisions; name the irreversible ones explicitly.",
    vocabulary: &[
        "boundary",
        "coupling",
        "invariant",
        "migration path",
        "failure domain",
    ],
    max_turn_tokens: 1_200,
};

static IMPLEMENTER: Persona = Persona {
    codename: "Forge",
    framework: "Ground every argument in what can actually be built in the codebase at \
                hand. Estimate effort, call out hidden work, and propose the smallest \
                change that satisfies the requirement.",
    vocabulary: &["diff size", "refactor", "effort", "edge case", "test surface"],
    max_turn_tokens: 1_200,
};

static REVIEWER: Persona = Persona {
    codename: "Sentinel",
    framework: "Argue from correctness and regression risk. Every objection must name a \
                concrete failure mode; every approval must name what was checked.",
    vocabulary: &[
        "regression",
        "failure mode",
        "coverage",
        "assertion",
        "blast radius",
    ],
    max_turn_tokens: 1_000,
};

static SRE: Persona = Persona {
    codename: "Ballast",
    framework: "Weigh operability: rollout, rollback, observability, and on-call load. \
                A plan that cannot be rolled back safely is incomplete.",
    vocabulary: &["rollback", "canary", "alerting", "saturation", "toil"],
    max_turn_tokens: 1_000,
};

static PRODUCT: Persona = Persona {
    codename: "Compass",
    framework: "Represent the user and the deadline. Push back on scope that does not \
                change user-visible behavior; accept technical debt only with a named \
                payoff date.",
    vocabulary: &["scope", "user impact", "milestone", "trade-off", "debt"],
    max_turn_tokens: 800,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_role_has_persona() {
        for role in Role::all() {
            let p = role.persona();
            assert!(!p.codename.is_empty());
            assert!(!p.framework.is_empty());
            assert!(!p.vocabulary.is_empty());
            assert!(p.max_turn_tokens > 0);
        }
    }

    #[test]
    fn test_role_display() {
        assert_eq!(Role::Architect.to_string(), "architect");
        assert_eq!(Role::Implementer.to_string(), "implementer");
        assert_eq!(Role::Reviewer.to_string(), "reviewer");
        assert_eq!(Role::Sre.to_string(), "sre");
        assert_eq!(Role::Product.to_string(), "product");
    }

    #[test]
    fn test_role_serde_snake_case() {
        let json = serde_json::to_string(&Role::Sre).unwrap();
        assert_eq!(json, "\"sre\"");
        let parsed: Role = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, Role::Sre);
    }

    #[test]
    fn test_codenames_are_distinct() {
        let mut names: Vec<_> = Role::all().iter().map(|r| r.persona().codename).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), Role::all().len());
    }
}
