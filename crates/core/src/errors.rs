use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::DocumentKind;

/// A single rejected input field, surfaced to callers as part of a 400-class response.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self { field: field.into(), message: message.into() }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationErrors {
    pub fields: Vec<FieldError>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.fields.push(FieldError::new(field, message));
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Returns `Ok(())` when nothing was collected, otherwise a `DomainError::Validation`.
    pub fn into_result(self) -> Result<(), DomainError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(DomainError::Validation(self))
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered = self
            .fields
            .iter()
            .map(|error| format!("{}: {}", error.field, error.message))
            .collect::<Vec<_>>()
            .join("; ");
        f.write_str(&rendered)
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("validation failed: {0}")]
    Validation(ValidationErrors),
    #[error("{document} is `{current}`; `{requested}` is not allowed from this state")]
    StateConflict { document: DocumentKind, current: String, requested: String },
    #[error("precondition failed: {0}")]
    Precondition(String),
    #[error("internal consistency violation: {0}")]
    InternalConsistency(String),
}

impl DomainError {
    pub fn invalid_field(field: impl Into<String>, message: impl Into<String>) -> Self {
        let mut errors = ValidationErrors::new();
        errors.push(field, message);
        Self::Validation(errors)
    }

    pub fn state_conflict(
        document: DocumentKind,
        current: impl Into<String>,
        requested: impl Into<String>,
    ) -> Self {
        Self::StateConflict { document, current: current.into(), requested: requested.into() }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("{document} `{id}` was not found")]
    NotFound { document: DocumentKind, id: String },
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, field_errors: Vec<FieldError>, correlation_id: String },
    #[error("not found: {message}")]
    NotFound { message: String, correlation_id: String },
    #[error("conflict: {message}")]
    Conflict { message: String, correlation_id: String },
    #[error("unprocessable: {message}")]
    Unprocessable { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    /// HTTP-equivalent status for the surrounding transport layer.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::BadRequest { .. } => 400,
            Self::NotFound { .. } => 404,
            Self::Conflict { .. } => 409,
            Self::Unprocessable { .. } => 422,
            Self::ServiceUnavailable { .. } => 503,
            Self::Internal { .. } => 500,
        }
    }

    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "The request could not be processed. Check inputs and try again."
            }
            Self::NotFound { .. } => "The requested document does not exist.",
            Self::Conflict { .. } => {
                "The document changed state. Reload it and decide whether to retry."
            }
            Self::Unprocessable { .. } => {
                "The document does not meet the business rules for this action."
            }
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::BadRequest { correlation_id, .. }
            | Self::NotFound { correlation_id, .. }
            | Self::Conflict { correlation_id, .. }
            | Self::Unprocessable { correlation_id, .. }
            | Self::ServiceUnavailable { correlation_id, .. }
            | Self::Internal { correlation_id, .. } => correlation_id,
        }
    }
}

impl ApplicationError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::NotFound { correlation_id: id, .. }
            | InterfaceError::Conflict { correlation_id: id, .. }
            | InterfaceError::Unprocessable { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }

    /// Stable snake_case class used by the CLI envelope and log fields.
    pub fn error_class(&self) -> &'static str {
        match self {
            Self::Domain(DomainError::Validation(_)) => "validation",
            Self::Domain(DomainError::StateConflict { .. }) => "state_conflict",
            Self::Domain(DomainError::Precondition(_)) => "precondition",
            Self::Domain(DomainError::InternalConsistency(_)) => "internal_consistency",
            Self::NotFound { .. } => "not_found",
            Self::Persistence(_) => "persistence",
            Self::Configuration(_) => "configuration",
        }
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        let unassigned = || "unassigned".to_owned();
        match value {
            ApplicationError::Domain(DomainError::Validation(errors)) => Self::BadRequest {
                message: "input validation failed".to_owned(),
                field_errors: errors.fields,
                correlation_id: unassigned(),
            },
            ApplicationError::Domain(error @ DomainError::StateConflict { .. }) => {
                Self::Conflict { message: error.to_string(), correlation_id: unassigned() }
            }
            ApplicationError::Domain(DomainError::Precondition(message)) => {
                Self::Unprocessable { message, correlation_id: unassigned() }
            }
            ApplicationError::Domain(DomainError::InternalConsistency(message)) => {
                Self::Internal { message, correlation_id: unassigned() }
            }
            error @ ApplicationError::NotFound { .. } => {
                Self::NotFound { message: error.to_string(), correlation_id: unassigned() }
            }
            ApplicationError::Persistence(message) => {
                Self::ServiceUnavailable { message, correlation_id: unassigned() }
            }
            ApplicationError::Configuration(message) => {
                Self::Internal { message, correlation_id: unassigned() }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::domain::DocumentKind;
    use crate::errors::{ApplicationError, DomainError, InterfaceError, ValidationErrors};

    #[test]
    fn validation_error_maps_to_bad_request_with_field_list() {
        let mut errors = ValidationErrors::new();
        errors.push("lines[0].quantity", "must be greater than zero");
        errors.push("title", "must not be empty");

        let interface =
            ApplicationError::from(DomainError::Validation(errors)).into_interface("req-1");

        assert_eq!(interface.status_code(), 400);
        assert_eq!(interface.correlation_id(), "req-1");
        match interface {
            InterfaceError::BadRequest { field_errors, .. } => {
                assert_eq!(field_errors.len(), 2);
                assert_eq!(field_errors[0].field, "lines[0].quantity");
            }
            other => panic!("expected bad request, got {other:?}"),
        }
    }

    #[test]
    fn state_conflict_maps_to_409() {
        let interface = ApplicationError::from(DomainError::state_conflict(
            DocumentKind::Invoice,
            "paid",
            "cancel",
        ))
        .into_interface("req-2");

        assert_eq!(interface.status_code(), 409);
        assert!(interface.to_string().contains("paid"));
    }

    #[test]
    fn precondition_and_not_found_have_distinct_statuses() {
        let precondition =
            ApplicationError::from(DomainError::Precondition("quote not accepted".to_owned()))
                .into_interface("req-3");
        let not_found =
            ApplicationError::NotFound { document: DocumentKind::Quote, id: "Q-1".to_owned() }
                .into_interface("req-4");

        assert_eq!(precondition.status_code(), 422);
        assert_eq!(not_found.status_code(), 404);
    }

    #[test]
    fn consistency_failure_is_a_server_side_error() {
        let error = ApplicationError::from(DomainError::InternalConsistency(
            "snapshot total 10.00 != quote total 11.00".to_owned(),
        ));
        assert_eq!(error.error_class(), "internal_consistency");

        let interface = error.into_interface("req-5");
        assert_eq!(interface.status_code(), 500);
        assert_eq!(interface.user_message(), "An unexpected internal error occurred.");
    }

    #[test]
    fn persistence_error_maps_to_service_unavailable() {
        let interface = ApplicationError::Persistence("database lock timeout".to_owned())
            .into_interface("req-6");

        assert!(matches!(interface, InterfaceError::ServiceUnavailable { .. }));
        assert_eq!(
            interface.user_message(),
            "The service is temporarily unavailable. Please retry shortly."
        );
    }

    #[test]
    fn empty_validation_collector_is_ok() {
        assert_eq!(ValidationErrors::new().into_result(), Ok(()));
    }
}
