//! The plan assembler seam: questionnaire answers in, workout and diet
//! plan payloads out.
//!
//! Assemblers are pure with respect to job state and carry no retry
//! logic. They report bad input as a permanent [`AssembleError`] and
//! backend trouble as a transient one; the worker decides what to do.

pub mod answers;
pub mod profile;
pub mod rule_based;

use std::time::Duration;

use async_trait::async_trait;

use fitplan_db::payload::GeneratedPlans;

pub use answers::{AnswerValue, QuestionAnswer, QuestionnaireAnswers};
pub use profile::UserProfile;
pub use rule_based::RuleBasedAssembler;

/// Why an assembly attempt produced no plans.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AssembleError {
    #[error("questionnaire has no goal")]
    MissingGoal,

    #[error("malformed answer to {question:?}: {reason}")]
    MalformedAnswer { question: String, reason: String },

    #[error("assembler rejected the questionnaire: {0}")]
    Rejected(String),

    #[error("plan backend unavailable: {0}")]
    Unavailable(String),

    #[error("plan assembly timed out after {0:?}")]
    TimedOut(Duration),

    #[error("assembler panicked: {0}")]
    Panicked(String),
}

impl AssembleError {
    /// Transient errors are worth another attempt; the rest are not.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::TimedOut(_))
    }
}

/// Turns questionnaire answers into generated plans.
///
/// # Object Safety
///
/// This trait is object-safe so workers can hold an
/// `Arc<dyn PlanAssembler>` and swap a deterministic implementation for
/// one backed by a remote model.
#[async_trait]
pub trait PlanAssembler: Send + Sync {
    /// Provider name recorded on completed jobs (e.g. "rule-based").
    fn name(&self) -> &str;

    /// Version tag recorded on completed jobs and stored plans.
    fn algorithm_version(&self) -> &str {
        "v1.0"
    }

    /// Whether plans come from a generative model.
    fn is_ai(&self) -> bool {
        false
    }

    async fn assemble(
        &self,
        answers: &QuestionnaireAnswers,
    ) -> Result<GeneratedPlans, AssembleError>;
}

// Compile-time assertion: PlanAssembler must be object-safe.
const _: () = {
    fn _assert_object_safe(_: &dyn PlanAssembler) {}
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(AssembleError::Unavailable("503".into()).is_transient());
        assert!(AssembleError::TimedOut(Duration::from_secs(1)).is_transient());
        assert!(!AssembleError::MissingGoal.is_transient());
        assert!(!AssembleError::Rejected("nope".into()).is_transient());
        assert!(!AssembleError::Panicked("index out of bounds".into()).is_transient());
        assert!(
            !AssembleError::MalformedAnswer {
                question: "age".into(),
                reason: "not a number".into(),
            }
            .is_transient()
        );
    }

    #[test]
    fn malformed_answer_message() {
        let err = AssembleError::MalformedAnswer {
            question: "What is your age?".into(),
            reason: "expected a number, got \"old\"".into(),
        };
        assert_eq!(
            err.to_string(),
            "malformed answer to \"What is your age?\": expected a number, got \"old\""
        );
    }
}
