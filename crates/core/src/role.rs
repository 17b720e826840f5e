//! Role profiles — static, process-wide, read-only configuration.
//!
//! A role bounds how much context a request may assemble and which
//! capabilities its workers may use. Resolution fails closed: an absent or
//! unrecognized role hint always yields the most restrictive profile.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// The roles the platform recognizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// External/production consumers — tightest budget, minimal disclosure.
    Production,
    /// Internal analysts.
    Analyst,
    /// Model developers — widest budget, full disclosure.
    DataScientist,
}

impl Role {
    /// Parse a role hint. Returns `None` for unrecognized strings so the
    /// store can fail closed.
    pub fn parse(hint: &str) -> Option<Role> {
        match hint {
            "production" => Some(Role::Production),
            "analyst" => Some(Role::Analyst),
            "data_scientist" => Some(Role::DataScientist),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Production => "production",
            Role::Analyst => "analyst",
            Role::DataScientist => "data_scientist",
        }
    }
}

/// How much model internals a response may reveal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisclosureLevel {
    Minimal,
    Standard,
    Full,
}

/// A role's operating envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleProfile {
    pub role: Role,
    /// Cap on assembled context size, in estimated tokens. Always positive.
    pub token_budget: usize,
    /// Tool/capability names workers may use on behalf of this role.
    pub capability_set: BTreeSet<String>,
    pub disclosure_level: DisclosureLevel,
}

impl RoleProfile {
    fn production(token_budget: usize) -> Self {
        Self {
            role: Role::Production,
            token_budget,
            capability_set: ["predict".into()].into(),
            disclosure_level: DisclosureLevel::Minimal,
        }
    }

    fn analyst(token_budget: usize) -> Self {
        Self {
            role: Role::Analyst,
            token_budget,
            capability_set: ["predict".into(), "compare".into(), "fetch_stats".into()].into(),
            disclosure_level: DisclosureLevel::Standard,
        }
    }

    fn data_scientist(token_budget: usize) -> Self {
        Self {
            role: Role::DataScientist,
            token_budget,
            capability_set: [
                "predict".into(),
                "compare".into(),
                "fetch_stats".into(),
                "explain".into(),
                "inspect_model".into(),
            ]
            .into(),
            disclosure_level: DisclosureLevel::Full,
        }
    }
}

/// Lookup table from role hints to profiles. Built once at startup, never
/// mutated afterwards.
#[derive(Debug, Clone)]
pub struct RoleProfileStore {
    profiles: HashMap<Role, RoleProfile>,
}

impl RoleProfileStore {
    /// Build the store with per-role token budgets.
    pub fn new(production_budget: usize, analyst_budget: usize, scientist_budget: usize) -> Self {
        let mut profiles = HashMap::new();
        profiles.insert(Role::Production, RoleProfile::production(production_budget));
        profiles.insert(Role::Analyst, RoleProfile::analyst(analyst_budget));
        profiles.insert(
            Role::DataScientist,
            RoleProfile::data_scientist(scientist_budget),
        );
        Self { profiles }
    }

    /// Resolve a role hint, failing closed to the production profile.
    pub fn resolve(&self, hint: Option<&str>) -> &RoleProfile {
        let role = hint.and_then(Role::parse).unwrap_or(Role::Production);
        // All three roles are inserted in new(); the lookup cannot miss.
        self.profiles
            .get(&role)
            .unwrap_or_else(|| &self.profiles[&Role::Production])
    }

    /// The profile for an exact role.
    pub fn profile(&self, role: Role) -> &RoleProfile {
        &self.profiles[&role]
    }
}

impl Default for RoleProfileStore {
    fn default() -> Self {
        Self::new(2048, 4096, 8192)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_known_roles() {
        let store = RoleProfileStore::default();
        assert_eq!(store.resolve(Some("analyst")).role, Role::Analyst);
        assert_eq!(
            store.resolve(Some("data_scientist")).role,
            Role::DataScientist
        );
    }

    #[test]
    fn missing_hint_fails_closed() {
        let store = RoleProfileStore::default();
        let profile = store.resolve(None);
        assert_eq!(profile.role, Role::Production);
        assert_eq!(profile.disclosure_level, DisclosureLevel::Minimal);
    }

    #[test]
    fn unrecognized_hint_fails_closed() {
        let store = RoleProfileStore::default();
        assert_eq!(store.resolve(Some("superadmin")).role, Role::Production);
    }

    #[test]
    fn budgets_are_ordered_by_trust() {
        let store = RoleProfileStore::default();
        assert!(
            store.profile(Role::Production).token_budget
                < store.profile(Role::Analyst).token_budget
        );
        assert!(
            store.profile(Role::Analyst).token_budget
                < store.profile(Role::DataScientist).token_budget
        );
    }

    #[test]
    fn capability_sets_widen_with_disclosure() {
        let store = RoleProfileStore::default();
        let prod = &store.profile(Role::Production).capability_set;
        let sci = &store.profile(Role::DataScientist).capability_set;
        assert!(prod.is_subset(sci));
        assert!(sci.contains("inspect_model"));
    }
}
