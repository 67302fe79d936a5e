//! Plan-generation core: funnel progress, the generation job state
//! machine, plan assembly, the background worker, and the collaborating
//! payment and questionnaire flows.

pub mod assembler;
pub mod error;
pub mod generation;
pub mod payment;
pub mod plans;
pub mod progress;
pub mod questionnaire;
pub mod queue;
pub mod worker;

pub use error::GenerationError;
