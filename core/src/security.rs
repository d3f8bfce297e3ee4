//! Fail-closed allow-list check over retrieved documents.
//!
//! Runs after tenant scoping at the query layer. A single unexpected
//! document rejects the whole batch; nothing is filtered silently.

use std::collections::{BTreeSet, HashMap};

use serde::Serialize;

use crate::agents::AgentKey;
use crate::documents::RetrievedDocument;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SecurityViolation {
    #[error("role_not_allowed: {0}")]
    RoleNotAllowed(AgentKey),
    #[error("missing_document_type")]
    MissingDocumentType,
    #[error("missing_source_table")]
    MissingSourceTable,
    #[error("unexpected_document_type: {0}")]
    UnexpectedDocumentType(String),
    #[error("unexpected_source_table: {0}")]
    UnexpectedSourceTable(String),
}

impl SecurityViolation {
    /// Machine-readable reason, as written to the audit trail.
    pub fn reason(&self) -> String {
        self.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationResult {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllowList {
    pub document_types: BTreeSet<String>,
    pub source_tables: BTreeSet<String>,
}

impl AllowList {
    pub fn new(document_types: &[&str], source_tables: &[&str]) -> Self {
        Self {
            document_types: document_types.iter().map(|s| s.to_string()).collect(),
            source_tables: source_tables.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn check(&self, doc: &RetrievedDocument) -> Result<(), SecurityViolation> {
        // Compared verbatim: padded values are unexpected, blank ones missing.
        let document_type = doc
            .document_type
            .as_deref()
            .filter(|value| !value.trim().is_empty())
            .ok_or(SecurityViolation::MissingDocumentType)?;
        let source_table = doc
            .source_table
            .as_deref()
            .filter(|value| !value.trim().is_empty())
            .ok_or(SecurityViolation::MissingSourceTable)?;

        if !self.document_types.contains(document_type) {
            return Err(SecurityViolation::UnexpectedDocumentType(
                document_type.to_string(),
            ));
        }
        if !self.source_tables.contains(source_table) {
            return Err(SecurityViolation::UnexpectedSourceTable(
                source_table.to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct SecurityValidator {
    policies: HashMap<AgentKey, AllowList>,
}

impl Default for SecurityValidator {
    fn default() -> Self {
        Self::new(AgentKey::PRIORITY.iter().map(|key| (*key, default_allow_list(*key))))
    }
}

impl SecurityValidator {
    pub fn new(policies: impl IntoIterator<Item = (AgentKey, AllowList)>) -> Self {
        Self {
            policies: policies.into_iter().collect(),
        }
    }

    pub fn allow_list(&self, role: AgentKey) -> Option<&AllowList> {
        self.policies.get(&role)
    }

    pub fn assert_documents_allowed(
        &self,
        role: AgentKey,
        documents: &[RetrievedDocument],
    ) -> Result<(), SecurityViolation> {
        let policy = self
            .policies
            .get(&role)
            .ok_or(SecurityViolation::RoleNotAllowed(role))?;
        documents.iter().try_for_each(|doc| policy.check(doc))
    }

    pub fn validate_documents(
        &self,
        role: AgentKey,
        documents: &[RetrievedDocument],
    ) -> ValidationResult {
        match self.assert_documents_allowed(role, documents) {
            Ok(()) => ValidationResult {
                allowed: true,
                reason: None,
            },
            Err(violation) => ValidationResult {
                allowed: false,
                reason: Some(violation.reason()),
            },
        }
    }
}

pub fn default_allow_list(role: AgentKey) -> AllowList {
    match role {
        AgentKey::Admin => AllowList::new(
            &[
                "student_profile",
                "class_summary",
                "attendance_summary",
                "grade_summary",
                "payment_summary",
                "announcement",
                "timetable",
                "staff_profile",
            ],
            &[
                "students",
                "classes",
                "absences",
                "grades",
                "payments",
                "announcements",
                "timetables",
                "staff_members",
            ],
        ),
        AgentKey::Accountant => AllowList::new(
            &[
                "payment_summary",
                "invoice",
                "fee_schedule",
                "salary_summary",
                "announcement",
            ],
            &["payments", "invoices", "fees", "salaries", "announcements"],
        ),
        AgentKey::Teacher => AllowList::new(
            &[
                "class_summary",
                "attendance_summary",
                "grade_summary",
                "lesson",
                "announcement",
                "timetable",
            ],
            &[
                "classes",
                "absences",
                "grades",
                "lessons",
                "announcements",
                "timetables",
            ],
        ),
        AgentKey::Student => AllowList::new(
            &[
                "grade_summary",
                "attendance_summary",
                "timetable",
                "announcement",
                "lesson",
            ],
            &["grades", "absences", "timetables", "announcements", "lessons"],
        ),
        AgentKey::Parent => AllowList::new(
            &[
                "grade_summary",
                "attendance_summary",
                "payment_summary",
                "timetable",
                "announcement",
            ],
            &["grades", "absences", "payments", "timetables", "announcements"],
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn doc(document_type: Option<&str>, source_table: Option<&str>) -> RetrievedDocument {
        RetrievedDocument {
            doc_id: Uuid::now_v7(),
            text: "contenu".to_string(),
            document_type: document_type.map(str::to_string),
            source_table: source_table.map(str::to_string),
            source_id: Some(Uuid::now_v7()),
            rank: None,
        }
    }

    #[test]
    fn allowed_batch_passes() {
        let validator = SecurityValidator::default();
        let docs = vec![
            doc(Some("grade_summary"), Some("grades")),
            doc(Some("lesson"), Some("lessons")),
        ];
        let result = validator.validate_documents(AgentKey::Teacher, &docs);
        assert!(result.allowed);
        assert_eq!(result.reason, None);
    }

    #[test]
    fn padded_values_are_not_normalized() {
        let validator = SecurityValidator::default();
        let padded_type = validator.validate_documents(
            AgentKey::Teacher,
            &[doc(Some(" grade_summary\n"), Some("grades"))],
        );
        assert!(!padded_type.allowed);
        assert_eq!(
            padded_type.reason.as_deref(),
            Some("unexpected_document_type:  grade_summary\n")
        );

        let padded_table = validator
            .assert_documents_allowed(AgentKey::Teacher, &[doc(Some("grade_summary"), Some("grades "))])
            .unwrap_err();
        assert_eq!(
            padded_table,
            SecurityViolation::UnexpectedSourceTable("grades ".to_string())
        );

        let blank = validator
            .assert_documents_allowed(AgentKey::Teacher, &[doc(Some("  "), Some("grades"))])
            .unwrap_err();
        assert_eq!(blank, SecurityViolation::MissingDocumentType);
    }

    #[test]
    fn one_bad_type_fails_the_whole_batch() {
        let validator = SecurityValidator::default();
        let docs = vec![
            doc(Some("grade_summary"), Some("grades")),
            doc(Some("salary_summary"), Some("grades")),
            doc(Some("lesson"), Some("lessons")),
        ];
        let result = validator.validate_documents(AgentKey::Teacher, &docs);
        assert!(!result.allowed);
        assert_eq!(
            result.reason.as_deref(),
            Some("unexpected_document_type: salary_summary")
        );
    }

    #[test]
    fn disallowed_table_is_reported() {
        let validator = SecurityValidator::default();
        let err = validator
            .assert_documents_allowed(
                AgentKey::Teacher,
                &[doc(Some("grade_summary"), Some("salaries"))],
            )
            .unwrap_err();
        assert_eq!(err, SecurityViolation::UnexpectedSourceTable("salaries".into()));
        assert_eq!(err.reason(), "unexpected_source_table: salaries");
    }

    #[test]
    fn missing_fields_fail_closed() {
        let validator = SecurityValidator::default();
        assert_eq!(
            validator
                .assert_documents_allowed(AgentKey::Parent, &[doc(None, Some("grades"))])
                .unwrap_err()
                .reason(),
            "missing_document_type"
        );
        assert_eq!(
            validator
                .assert_documents_allowed(AgentKey::Parent, &[doc(Some("grade_summary"), Some("  "))])
                .unwrap_err()
                .reason(),
            "missing_source_table"
        );
    }

    #[test]
    fn role_without_policy_is_rejected() {
        let validator = SecurityValidator::new([(AgentKey::Admin, default_allow_list(AgentKey::Admin))]);
        let err = validator
            .assert_documents_allowed(AgentKey::Student, &[])
            .unwrap_err();
        assert_eq!(err.reason(), "role_not_allowed: student");
    }
}
