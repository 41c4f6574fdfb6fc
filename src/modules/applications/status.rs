use std::fmt;

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::web::policy::{Action, Role, is_allowed};

/// Lifecycle of an application. `Approved` and `Rejected` are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationStatus {
    Draft,
    Submitted,
    UnderReview,
    Approved,
    Rejected,
}

impl ApplicationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApplicationStatus::Draft => "draft",
            ApplicationStatus::Submitted => "submitted",
            ApplicationStatus::UnderReview => "under_review",
            ApplicationStatus::Approved => "approved",
            ApplicationStatus::Rejected => "rejected",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "draft" => Some(ApplicationStatus::Draft),
            "submitted" => Some(ApplicationStatus::Submitted),
            "under_review" => Some(ApplicationStatus::UnderReview),
            "approved" => Some(ApplicationStatus::Approved),
            "rejected" => Some(ApplicationStatus::Rejected),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ApplicationStatus::Approved | ApplicationStatus::Rejected
        )
    }
}

impl fmt::Display for ApplicationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
pub struct UnknownStatus(pub String);

impl fmt::Display for UnknownStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown application status `{}`", self.0)
    }
}

impl std::error::Error for UnknownStatus {}

impl TryFrom<String> for ApplicationStatus {
    type Error = UnknownStatus;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        ApplicationStatus::parse(&value).ok_or(UnknownStatus(value))
    }
}

/// Documents an applicant can provide. Everything but the proof of the
/// criminal record request counts towards completeness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    Cv,
    Recommendation,
    #[serde(rename = "recommendation_2")]
    Recommendation2,
    Motivation,
    CriminalRecord,
    CriminalRecordRequest,
}

pub const REQUIRED_DOCUMENTS: [DocumentType; 5] = [
    DocumentType::Cv,
    DocumentType::Recommendation,
    DocumentType::Recommendation2,
    DocumentType::Motivation,
    DocumentType::CriminalRecord,
];

impl DocumentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentType::Cv => "cv",
            DocumentType::Recommendation => "recommendation",
            DocumentType::Recommendation2 => "recommendation_2",
            DocumentType::Motivation => "motivation",
            DocumentType::CriminalRecord => "criminal_record",
            DocumentType::CriminalRecordRequest => "criminal_record_request",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "cv" => Some(DocumentType::Cv),
            "recommendation" => Some(DocumentType::Recommendation),
            "recommendation_2" => Some(DocumentType::Recommendation2),
            "motivation" => Some(DocumentType::Motivation),
            "criminal_record" => Some(DocumentType::CriminalRecord),
            "criminal_record_request" => Some(DocumentType::CriminalRecordRequest),
            _ => None,
        }
    }

    /// Binary documents live in the file store; the motivation letter is text.
    pub fn is_file(&self) -> bool {
        !matches!(self, DocumentType::Motivation)
    }
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Statements the applicant has to accept before submitting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, FromRow)]
#[serde(default)]
pub struct Declarations {
    #[sqlx(rename = "decl_participation_terms")]
    pub participation_terms: bool,
    #[sqlx(rename = "decl_monthly_availability")]
    pub monthly_availability: bool,
    #[sqlx(rename = "decl_privacy_policy")]
    pub privacy_policy: bool,
    #[sqlx(rename = "decl_additional_terms")]
    pub additional_terms: bool,
    #[sqlx(rename = "decl_training_schedule")]
    pub training_schedule: bool,
}

impl Declarations {
    pub fn missing(&self) -> Vec<&'static str> {
        [
            ("participation_terms", self.participation_terms),
            ("monthly_availability", self.monthly_availability),
            ("privacy_policy", self.privacy_policy),
            ("additional_terms", self.additional_terms),
            ("training_schedule", self.training_schedule),
        ]
        .into_iter()
        .filter(|(_, accepted)| !accepted)
        .map(|(name, _)| name)
        .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Completeness {
    pub completed: usize,
    pub required: usize,
    pub missing: Vec<&'static str>,
}

impl Completeness {
    pub fn evaluate(has_document: impl Fn(DocumentType) -> bool) -> Self {
        let missing: Vec<&'static str> = REQUIRED_DOCUMENTS
            .iter()
            .filter(|doc| !has_document(**doc))
            .map(DocumentType::as_str)
            .collect();

        Self {
            completed: REQUIRED_DOCUMENTS.len() - missing.len(),
            required: REQUIRED_DOCUMENTS.len(),
            missing,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }
}

/// Outcome of asking for a status change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Requested status equals the current one.
    Unchanged,
    Apply(ApplicationStatus),
    /// Submission requested but documents or declarations are outstanding.
    Held {
        missing_documents: Vec<&'static str>,
        missing_declarations: Vec<&'static str>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    /// The actor may not request this status at all.
    NotPermitted,
    Invalid(String),
}

/// Decide what a status request does. Submission is gated for everyone;
/// review outcomes are staff-only and skip the gate.
pub fn evaluate_transition(
    actor: Role,
    current: ApplicationStatus,
    requested: ApplicationStatus,
    completeness: &Completeness,
    declarations: &Declarations,
) -> Result<Transition, TransitionError> {
    if requested == current {
        return Ok(Transition::Unchanged);
    }

    if current.is_terminal() {
        return Err(TransitionError::Invalid(format!(
            "The application is already {current} and can no longer change"
        )));
    }

    match requested {
        ApplicationStatus::Draft => Err(TransitionError::Invalid(
            "An application cannot be moved back to draft".to_string(),
        )),
        ApplicationStatus::Submitted => {
            if current != ApplicationStatus::Draft {
                return Err(TransitionError::Invalid(format!(
                    "An application that is {current} cannot be submitted again"
                )));
            }
            let missing_declarations = declarations.missing();
            if completeness.is_complete() && missing_declarations.is_empty() {
                Ok(Transition::Apply(ApplicationStatus::Submitted))
            } else {
                Ok(Transition::Held {
                    missing_documents: completeness.missing.clone(),
                    missing_declarations,
                })
            }
        }
        ApplicationStatus::UnderReview | ApplicationStatus::Approved | ApplicationStatus::Rejected => {
            if is_allowed(actor, Action::TransitionApplication) {
                Ok(Transition::Apply(requested))
            } else {
                Err(TransitionError::NotPermitted)
            }
        }
    }
}
