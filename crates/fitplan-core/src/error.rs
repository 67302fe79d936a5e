use uuid::Uuid;

use fitplan_db::models::GenerationStatus;

/// Caller-visible failures of the generation orchestration operations.
///
/// Rejections leave the database untouched. Execution failures of a job
/// never surface here; they are recorded on the job row.
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("plan generation already exists for this questionnaire{}", existing_suffix(.existing))]
    AlreadyExists { existing: Option<Uuid> },

    #[error("no successful payment found")]
    NoPayment,

    #[error("no completed questionnaire found")]
    NoQuestionnaire,

    #[error("plan generation {0} not found")]
    NotFound(Uuid),

    #[error("plan generation {id} is {status}, only failed generations can be retried")]
    NotFailed { id: Uuid, status: GenerationStatus },

    #[error("plan generation {id} has used {retry_count} of {max_retries} retries")]
    RetriesExhausted {
        id: Uuid,
        retry_count: i32,
        max_retries: i32,
    },

    #[error("max_retries must not be negative, got {0}")]
    InvalidMaxRetries(i32),

    #[error("plan generation {id} is {status} and cannot be cancelled")]
    NotCancellable { id: Uuid, status: GenerationStatus },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

fn existing_suffix(existing: &Option<Uuid>) -> String {
    existing.map(|id| format!(" (job {id})")).unwrap_or_default()
}

impl GenerationError {
    /// Short machine-readable code, stable across message wording changes.
    pub fn code(&self) -> &'static str {
        match self {
            Self::AlreadyExists { .. } => "already_exists",
            Self::NoPayment => "no_payment",
            Self::NoQuestionnaire => "no_questionnaire",
            Self::NotFound(_) => "not_found",
            Self::NotFailed { .. } => "not_failed",
            Self::RetriesExhausted { .. } => "retries_exhausted",
            Self::NotCancellable { .. } => "not_cancellable",
            Self::InvalidMaxRetries(_) => "invalid_max_retries",
            Self::Other(_) => "internal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn already_exists_message_names_job() {
        let id = Uuid::nil();
        let err = GenerationError::AlreadyExists { existing: Some(id) };
        assert_eq!(
            err.to_string(),
            format!("plan generation already exists for this questionnaire (job {id})")
        );
        let err = GenerationError::AlreadyExists { existing: None };
        assert_eq!(
            err.to_string(),
            "plan generation already exists for this questionnaire"
        );
    }

    #[test]
    fn codes_are_snake_case() {
        let err = GenerationError::RetriesExhausted {
            id: Uuid::nil(),
            retry_count: 3,
            max_retries: 3,
        };
        assert_eq!(err.code(), "retries_exhausted");
        assert_eq!(GenerationError::NoPayment.code(), "no_payment");
        let other: GenerationError = anyhow::anyhow!("db down").into();
        assert_eq!(other.code(), "internal");
        assert_eq!(other.to_string(), "db down");
    }

    #[test]
    fn invalid_max_retries_message() {
        let err = GenerationError::InvalidMaxRetries(-1);
        assert_eq!(err.code(), "invalid_max_retries");
        assert_eq!(err.to_string(), "max_retries must not be negative, got -1");
    }
}
