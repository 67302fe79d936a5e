pub mod generations;
pub mod payments;
pub mod plans;
pub mod progress;
pub mod questionnaire;
pub mod users;
