use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::messages::{self, Locale, persona_text};
use crate::prompt::OutputFormat;

/// Closed set of assistant personas. Declaration order is the resolution
/// priority when a user holds several roles.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum AgentKey {
    Admin,
    Accountant,
    Teacher,
    Student,
    Parent,
}

impl AgentKey {
    pub const PRIORITY: [AgentKey; 5] = [
        AgentKey::Admin,
        AgentKey::Accountant,
        AgentKey::Teacher,
        AgentKey::Student,
        AgentKey::Parent,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AgentKey::Admin => "admin",
            AgentKey::Accountant => "accountant",
            AgentKey::Teacher => "teacher",
            AgentKey::Student => "student",
            AgentKey::Parent => "parent",
        }
    }

    /// Map an application role string to an agent key. Unmapped roles
    /// contribute nothing.
    pub fn from_role(role: &str) -> Option<Self> {
        let normalized = role.trim().to_lowercase();
        ROLE_TABLE
            .iter()
            .find(|(name, _)| *name == normalized)
            .map(|(_, key)| *key)
    }

    pub fn default_format(self) -> OutputFormat {
        match self {
            AgentKey::Admin => OutputFormat::Decision,
            AgentKey::Accountant => OutputFormat::Table,
            AgentKey::Teacher => OutputFormat::Actions,
            AgentKey::Student | AgentKey::Parent => OutputFormat::Summary,
        }
    }
}

impl std::fmt::Display for AgentKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

const ROLE_TABLE: &[(&str, AgentKey)] = &[
    ("admin", AgentKey::Admin),
    ("administrator", AgentKey::Admin),
    ("administrateur", AgentKey::Admin),
    ("super_admin", AgentKey::Admin),
    ("directeur", AgentKey::Admin),
    ("director", AgentKey::Admin),
    ("principal", AgentKey::Admin),
    ("accountant", AgentKey::Accountant),
    ("comptable", AgentKey::Accountant),
    ("finance", AgentKey::Accountant),
    ("economat", AgentKey::Accountant),
    ("teacher", AgentKey::Teacher),
    ("enseignant", AgentKey::Teacher),
    ("professeur", AgentKey::Teacher),
    ("prof", AgentKey::Teacher),
    ("student", AgentKey::Student),
    ("eleve", AgentKey::Student),
    ("élève", AgentKey::Student),
    ("etudiant", AgentKey::Student),
    ("parent", AgentKey::Parent),
    ("tuteur", AgentKey::Parent),
    ("guardian", AgentKey::Parent),
];

/// The authenticated principal as seen by the assistant gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchoolUser {
    pub id: Uuid,
    pub roles: Vec<String>,
    /// Tenant stored directly on the user row, if any.
    pub school_id: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AgentProfile {
    pub key: AgentKey,
    pub name: String,
    /// Display label of the persona's role.
    pub role: String,
    pub access_rules: Vec<String>,
    pub tasks: Vec<String>,
    pub style: Vec<String>,
    pub default_format: OutputFormat,
}

impl AgentProfile {
    pub fn builtin(key: AgentKey, locale: Locale) -> Self {
        let text = persona_text(key, locale);
        let owned = |items: &[&str]| -> Vec<String> {
            items.iter().map(|item| item.to_string()).collect()
        };
        Self {
            key,
            name: text.name.to_string(),
            role: text.role.to_string(),
            access_rules: owned(text.access_rules),
            tasks: owned(text.tasks),
            style: owned(text.style),
            default_format: key.default_format(),
        }
    }
}

/// Registry of agent profiles, built once at startup.
#[derive(Debug, Clone)]
pub struct AgentDirectory {
    locale: Locale,
    profiles: BTreeMap<AgentKey, AgentProfile>,
}

impl AgentDirectory {
    pub fn new(locale: Locale) -> Self {
        let profiles = AgentKey::PRIORITY
            .iter()
            .map(|key| AgentProfile::builtin(*key, locale));
        Self::with_profiles(locale, profiles)
    }

    pub fn with_profiles(locale: Locale, profiles: impl IntoIterator<Item = AgentProfile>) -> Self {
        Self {
            locale,
            profiles: profiles.into_iter().map(|p| (p.key, p)).collect(),
        }
    }

    pub fn locale(&self) -> Locale {
        self.locale
    }

    pub fn profile(&self, key: AgentKey) -> Option<&AgentProfile> {
        self.profiles.get(&key)
    }

    pub fn available_keys(&self, user: &SchoolUser) -> BTreeSet<AgentKey> {
        user.roles
            .iter()
            .filter_map(|role| AgentKey::from_role(role))
            .collect()
    }

    /// Pick exactly one profile for the user.
    ///
    /// An explicit `requested_role` wins only if it maps to a registered key
    /// the user holds; otherwise priority order applies.
    pub fn resolve_profile(
        &self,
        user: &SchoolUser,
        requested_role: Option<&str>,
    ) -> Option<&AgentProfile> {
        let available = self.available_keys(user);

        if let Some(requested) = requested_role.and_then(AgentKey::from_role)
            && available.contains(&requested)
            && let Some(profile) = self.profiles.get(&requested)
        {
            return Some(profile);
        }

        AgentKey::PRIORITY
            .iter()
            .filter(|key| available.contains(key))
            .find_map(|key| self.profiles.get(key))
    }

    /// Greeting for empty content, otherwise the isolated-mode echo reply.
    pub fn build_reply(&self, profile: &AgentProfile, content: &str) -> String {
        if content.trim().is_empty() {
            messages::greeting(profile, self.locale)
        } else {
            messages::isolated_reply(profile, content, self.locale)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(roles: &[&str]) -> SchoolUser {
        SchoolUser {
            id: Uuid::now_v7(),
            roles: roles.iter().map(|r| r.to_string()).collect(),
            school_id: None,
        }
    }

    #[test]
    fn role_table_is_case_and_whitespace_insensitive() {
        assert_eq!(AgentKey::from_role(" Enseignant "), Some(AgentKey::Teacher));
        assert_eq!(AgentKey::from_role("COMPTABLE"), Some(AgentKey::Accountant));
        assert_eq!(AgentKey::from_role("élève"), Some(AgentKey::Student));
        assert_eq!(AgentKey::from_role("janitor"), None);
    }

    #[test]
    fn unmapped_roles_resolve_to_no_profile() {
        let directory = AgentDirectory::new(Locale::Fr);
        assert!(directory.resolve_profile(&user(&[]), None).is_none());
        assert!(
            directory
                .resolve_profile(&user(&["janitor", "visitor"]), Some("admin"))
                .is_none()
        );
    }

    #[test]
    fn priority_order_applies_without_request() {
        let directory = AgentDirectory::new(Locale::Fr);
        let multi = user(&["parent", "enseignant", "comptable"]);
        let profile = directory.resolve_profile(&multi, None).unwrap();
        assert_eq!(profile.key, AgentKey::Accountant);
    }

    #[test]
    fn entitled_request_overrides_priority() {
        let directory = AgentDirectory::new(Locale::Fr);
        let multi = user(&["admin", "parent"]);
        let profile = directory.resolve_profile(&multi, Some("tuteur")).unwrap();
        assert_eq!(profile.key, AgentKey::Parent);
    }

    #[test]
    fn unentitled_request_falls_through_to_priority() {
        let directory = AgentDirectory::new(Locale::Fr);
        for role in ["admin", "accountant", "teacher", "student", "parent"] {
            let requester = user(&["student"]);
            let profile = directory.resolve_profile(&requester, Some(role)).unwrap();
            assert_eq!(profile.key, AgentKey::Student, "requested {role}");
        }
    }

    #[test]
    fn unregistered_keys_are_skipped() {
        let directory = AgentDirectory::with_profiles(
            Locale::En,
            [AgentProfile::builtin(AgentKey::Parent, Locale::En)],
        );
        let multi = user(&["teacher", "parent"]);
        let profile = directory.resolve_profile(&multi, Some("teacher")).unwrap();
        assert_eq!(profile.key, AgentKey::Parent);
        assert!(directory.resolve_profile(&user(&["teacher"]), None).is_none());
    }

    #[test]
    fn build_reply_switches_on_empty_content() {
        let directory = AgentDirectory::new(Locale::En);
        let profile = directory.profile(AgentKey::Teacher).unwrap();
        assert!(directory.build_reply(profile, "   ").starts_with("Hello"));
        assert!(
            directory
                .build_reply(profile, "who is absent?")
                .contains("isolated")
        );
    }
}
