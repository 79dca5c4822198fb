pub mod config;
pub mod doctor;
pub mod invoice;
pub mod migrate;
pub mod quote;

use std::future::Future;
use std::sync::Arc;

use fieldops_billing::Billing;
use fieldops_core::config::{AppConfig, LoadOptions};
use fieldops_core::{ApplicationError, DomainError};
use fieldops_db::{connect_with_config, migrations, SqlDocumentRepository};
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: u8,
    pub output: String,
}

#[derive(Debug, Serialize)]
struct CommandOutcome {
    command: String,
    status: String,
    error_class: Option<String>,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    document: Option<Value>,
}

impl CommandResult {
    pub fn success(command: &str, message: impl Into<String>) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "ok".to_string(),
            error_class: None,
            message: message.into(),
            document: None,
        };
        Self { exit_code: 0, output: serialize_payload(payload) }
    }

    /// Success carrying the resulting document (or list of documents).
    pub fn with_document(
        command: &str,
        message: impl Into<String>,
        document: &impl Serialize,
    ) -> Self {
        let document = match serde_json::to_value(document) {
            Ok(document) => document,
            Err(error) => {
                return Self::failure(command, "serialization", error.to_string(), 1);
            }
        };
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "ok".to_string(),
            error_class: None,
            message: message.into(),
            document: Some(document),
        };
        Self { exit_code: 0, output: serialize_payload(payload) }
    }

    pub fn failure(
        command: &str,
        error_class: &str,
        message: impl Into<String>,
        exit_code: u8,
    ) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "error".to_string(),
            error_class: Some(error_class.to_string()),
            message: message.into(),
            document: None,
        };
        Self { exit_code, output: serialize_payload(payload) }
    }

    pub fn from_error(command: &str, error: &ApplicationError) -> Self {
        Self::failure(command, error.error_class(), error.to_string(), exit_code_for(error))
    }
}

/// Exit codes 2-5 are the setup failures shared by every command.
pub fn exit_code_for(error: &ApplicationError) -> u8 {
    match error {
        ApplicationError::Configuration(_) => 2,
        ApplicationError::Domain(DomainError::Validation(_)) => 10,
        ApplicationError::NotFound { .. } => 11,
        ApplicationError::Domain(DomainError::StateConflict { .. }) => 12,
        ApplicationError::Domain(DomainError::Precondition(_)) => 13,
        ApplicationError::Domain(DomainError::InternalConsistency(_)) => 14,
        ApplicationError::Persistence(_) => 15,
    }
}

/// Loads config, opens and migrates the database, then hands a wired
/// [`Billing`] to `work` on a single-threaded runtime.
pub(crate) fn with_billing<F, Fut>(command: &str, work: F) -> CommandResult
where
    F: FnOnce(Billing<SqlDocumentRepository>) -> Fut,
    Fut: Future<Output = CommandResult>,
{
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                command,
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            );
        }
    };
    let numbering = match config.billing.numbering() {
        Ok(numbering) => numbering,
        Err(error) => {
            return CommandResult::failure(command, "config_validation", error.to_string(), 2);
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                command,
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                3,
            );
        }
    };

    runtime.block_on(async {
        let pool = match connect_with_config(&config.database).await {
            Ok(pool) => pool,
            Err(error) => {
                return CommandResult::failure(command, "db_connectivity", error.to_string(), 4);
            }
        };
        if let Err(error) = migrations::run_pending(&pool).await {
            pool.close().await;
            return CommandResult::failure(command, "migration", error.to_string(), 5);
        }

        let repository = Arc::new(SqlDocumentRepository::new(pool.clone(), numbering));
        let result = work(Billing::new(repository, &config.billing)).await;
        pool.close().await;
        result
    })
}

fn serialize_payload(payload: CommandOutcome) -> String {
    serde_json::to_string(&payload).unwrap_or_else(|error| {
        format!(
            "{{\"command\":\"unknown\",\"status\":\"error\",\"error_class\":\"serialization\",\
             \"message\":\"{}\"}}",
            error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
        )
    })
}

#[cfg(test)]
mod tests {
    use fieldops_core::{ApplicationError, DocumentKind, DomainError};
    use serde_json::Value;

    use super::{exit_code_for, CommandResult};

    #[test]
    fn error_envelope_carries_class_and_exit_code() {
        let error = ApplicationError::from(DomainError::state_conflict(
            DocumentKind::Invoice,
            "paid",
            "cancel",
        ));

        let result = CommandResult::from_error("invoice cancel", &error);
        let payload: Value = serde_json::from_str(&result.output).expect("json");

        assert_eq!(result.exit_code, 12);
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "state_conflict");
        assert!(payload.get("document").is_none());
    }

    #[test]
    fn each_error_class_has_its_own_exit_code() {
        let errors = [
            ApplicationError::from(DomainError::invalid_field("title", "must not be empty")),
            ApplicationError::NotFound { document: DocumentKind::Quote, id: "q".to_string() },
            ApplicationError::from(DomainError::Precondition("not accepted".to_string())),
            ApplicationError::from(DomainError::InternalConsistency("drift".to_string())),
            ApplicationError::Persistence("locked".to_string()),
        ];

        let mut codes: Vec<u8> = errors.iter().map(exit_code_for).collect();
        codes.dedup();
        assert_eq!(codes, vec![10, 11, 13, 14, 15]);
    }

    #[test]
    fn document_is_embedded_in_success_payload() {
        let result = CommandResult::with_document("quote show", "found", &vec!["a", "b"]);
        let payload: Value = serde_json::from_str(&result.output).expect("json");

        assert_eq!(result.exit_code, 0);
        assert_eq!(payload["document"][1], "b");
    }
}
