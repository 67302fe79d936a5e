use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use sqlx::types::Json;
use uuid::Uuid;

use crate::payload::{
    DietType, Difficulty, Exercise, MacroSplit, ShoppingItem, WeeklyMealPlan,
    WeeklyWorkoutSchedule,
};

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// A stage in the fixed, linear user funnel.
///
/// Variants are declared in funnel order, so the derived `Ord` is the
/// funnel order as well.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, sqlx::Type,
)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ProgressStep {
    GoalSelection,
    Questionnaire,
    PaymentPending,
    PaymentCompleted,
    PlanGeneration,
    PlanReady,
    Completed,
}

impl ProgressStep {
    /// Every step, in funnel order.
    pub const ALL: [ProgressStep; 7] = [
        Self::GoalSelection,
        Self::Questionnaire,
        Self::PaymentPending,
        Self::PaymentCompleted,
        Self::PlanGeneration,
        Self::PlanReady,
        Self::Completed,
    ];

    /// Zero-based position of this step in the funnel.
    pub fn position(self) -> usize {
        match self {
            Self::GoalSelection => 0,
            Self::Questionnaire => 1,
            Self::PaymentPending => 2,
            Self::PaymentCompleted => 3,
            Self::PlanGeneration => 4,
            Self::PlanReady => 5,
            Self::Completed => 6,
        }
    }
}

impl fmt::Display for ProgressStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::GoalSelection => "goal_selection",
            Self::Questionnaire => "questionnaire",
            Self::PaymentPending => "payment_pending",
            Self::PaymentCompleted => "payment_completed",
            Self::PlanGeneration => "plan_generation",
            Self::PlanReady => "plan_ready",
            Self::Completed => "completed",
        };
        f.write_str(s)
    }
}

impl FromStr for ProgressStep {
    type Err = ProgressStepParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "goal_selection" => Ok(Self::GoalSelection),
            "questionnaire" => Ok(Self::Questionnaire),
            "payment_pending" => Ok(Self::PaymentPending),
            "payment_completed" => Ok(Self::PaymentCompleted),
            "plan_generation" => Ok(Self::PlanGeneration),
            "plan_ready" => Ok(Self::PlanReady),
            "completed" => Ok(Self::Completed),
            other => Err(ProgressStepParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`ProgressStep`] string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressStepParseError(pub String);

impl fmt::Display for ProgressStepParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid progress step: {:?}", self.0)
    }
}

impl std::error::Error for ProgressStepParseError {}

// ---------------------------------------------------------------------------

/// Status of a plan generation job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum GenerationStatus {
    Pending,
    Queued,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl GenerationStatus {
    /// Queued or processing: the job still owns its questionnaire slot.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Queued | Self::Processing)
    }

    /// No worker will touch a job in this status again without a manual
    /// retry.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for GenerationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

impl FromStr for GenerationStatus {
    type Err = GenerationStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "queued" => Ok(Self::Queued),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(GenerationStatusParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`GenerationStatus`] string.
#[derive(Debug, Clone)]
pub struct GenerationStatusParseError(pub String);

impl fmt::Display for GenerationStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid generation status: {:?}", self.0)
    }
}

impl std::error::Error for GenerationStatusParseError {}

// ---------------------------------------------------------------------------

/// Status of a payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Successful,
    Failed,
    Refunded,
    Cancelled,
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Successful => "successful",
            Self::Failed => "failed",
            Self::Refunded => "refunded",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

impl FromStr for PaymentStatus {
    type Err = PaymentStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "successful" => Ok(Self::Successful),
            "failed" => Ok(Self::Failed),
            "refunded" => Ok(Self::Refunded),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(PaymentStatusParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`PaymentStatus`] string.
#[derive(Debug, Clone)]
pub struct PaymentStatusParseError(pub String);

impl fmt::Display for PaymentStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid payment status: {:?}", self.0)
    }
}

impl std::error::Error for PaymentStatusParseError {}

// ---------------------------------------------------------------------------

/// Payment currency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Irr,
    Usd,
    Eur,
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Irr => "IRR",
            Self::Usd => "USD",
            Self::Eur => "EUR",
        };
        f.write_str(s)
    }
}

impl FromStr for Currency {
    type Err = CurrencyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "IRR" => Ok(Self::Irr),
            "USD" => Ok(Self::Usd),
            "EUR" => Ok(Self::Eur),
            _ => Err(CurrencyParseError(s.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`Currency`] string.
#[derive(Debug, Clone)]
pub struct CurrencyParseError(pub String);

impl fmt::Display for CurrencyParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid currency: {:?}", self.0)
    }
}

impl std::error::Error for CurrencyParseError {}

// ---------------------------------------------------------------------------

/// Kind of answer a questionnaire question expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
    Text,
    Number,
    Choice,
    MultiChoice,
}

impl fmt::Display for QuestionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Text => "text",
            Self::Number => "number",
            Self::Choice => "choice",
            Self::MultiChoice => "multi_choice",
        };
        f.write_str(s)
    }
}

impl FromStr for QuestionType {
    type Err = QuestionTypeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Self::Text),
            "number" => Ok(Self::Number),
            "choice" => Ok(Self::Choice),
            "multi_choice" => Ok(Self::MultiChoice),
            other => Err(QuestionTypeParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`QuestionType`] string.
#[derive(Debug, Clone)]
pub struct QuestionTypeParseError(pub String);

impl fmt::Display for QuestionTypeParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid question type: {:?}", self.0)
    }
}

impl std::error::Error for QuestionTypeParseError {}

// ---------------------------------------------------------------------------

/// Which half of a plan a version belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PlanType {
    Workout,
    Diet,
}

impl fmt::Display for PlanType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Workout => "workout",
            Self::Diet => "diet",
        })
    }
}

impl FromStr for PlanType {
    type Err = PlanTypeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "workout" => Ok(Self::Workout),
            "diet" => Ok(Self::Diet),
            other => Err(PlanTypeParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`PlanType`] string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanTypeParseError(pub String);

impl fmt::Display for PlanTypeParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid plan type: {:?} (expected workout or diet)", self.0)
    }
}

impl std::error::Error for PlanTypeParseError {}

// ---------------------------------------------------------------------------
// Completed step set
// ---------------------------------------------------------------------------

/// The set of funnel steps a user has completed. Only ever grows.
///
/// Stored as a `TEXT[]` column; decoding rejects unknown names.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CompletedSteps(BTreeSet<ProgressStep>);

impl CompletedSteps {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a step. Returns `false` if it was already present.
    pub fn insert(&mut self, step: ProgressStep) -> bool {
        self.0.insert(step)
    }

    pub fn contains(&self, step: ProgressStep) -> bool {
        self.0.contains(&step)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Steps in funnel order.
    pub fn iter(&self) -> impl Iterator<Item = ProgressStep> + '_ {
        self.0.iter().copied()
    }

    /// The furthest step along the funnel that has been completed.
    pub fn furthest(&self) -> Option<ProgressStep> {
        self.0.last().copied()
    }

    /// Column representation for binding.
    pub fn to_names(&self) -> Vec<String> {
        self.iter().map(|s| s.to_string()).collect()
    }
}

impl TryFrom<Vec<String>> for CompletedSteps {
    type Error = ProgressStepParseError;

    fn try_from(names: Vec<String>) -> Result<Self, Self::Error> {
        names
            .iter()
            .map(|n| n.parse::<ProgressStep>())
            .collect::<Result<BTreeSet<_>, _>>()
            .map(Self)
    }
}

impl FromIterator<ProgressStep> for CompletedSteps {
    fn from_iter<I: IntoIterator<Item = ProgressStep>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

/// A registered user. Identity itself is issued elsewhere.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub phone: String,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A fitness goal a user can pick.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Goal {
    pub id: Uuid,
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Question {
    pub id: Uuid,
    pub goal_id: Option<Uuid>,
    pub question: String,
    pub question_type: QuestionType,
    pub position: i32,
}

/// A user's answer to one question. Exactly one value column is set.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Answer {
    pub id: Uuid,
    pub user_id: Uuid,
    pub question_id: Uuid,
    pub text_answer: Option<String>,
    pub numeric_answer: Option<f64>,
    pub choice_answer: Option<String>,
    pub multi_choice_answer: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// An answer joined with the question it belongs to.
#[derive(Debug, Clone, FromRow)]
pub struct AnsweredQuestion {
    pub question: String,
    pub question_type: QuestionType,
    pub text_answer: Option<String>,
    pub numeric_answer: Option<f64>,
    pub choice_answer: Option<String>,
    pub multi_choice_answer: Vec<String>,
}

/// A (user, goal) questionnaire completion. Identity of a generation job.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct UserGoal {
    pub id: Uuid,
    pub user_id: Uuid,
    pub goal_id: Uuid,
    pub is_completed: bool,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Payment {
    pub id: Uuid,
    pub user_id: Uuid,
    pub order_id: Uuid,
    pub amount: i64,
    pub currency: Currency,
    pub status: PaymentStatus,
    pub description: String,
    pub gateway: String,
    pub gateway_authority: Option<String>,
    pub gateway_response: Option<serde_json::Value>,
    pub ref_id: Option<String>,
    pub tracking_code: Option<String>,
    pub card_number_masked: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub verified_at: Option<DateTime<Utc>>,
}

/// A user's position in the funnel.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct UserProgress {
    pub user_id: Uuid,
    pub current_step: ProgressStep,
    #[sqlx(try_from = "Vec<String>")]
    pub completed_steps: CompletedSteps,
    pub selected_goal_id: Option<Uuid>,
    pub payment_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One plan generation job.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PlanGeneration {
    pub id: Uuid,
    pub user_goal_id: Uuid,
    pub user_id: Uuid,
    pub payment_id: Uuid,
    pub status: GenerationStatus,
    pub ai_provider: String,
    pub algorithm_version: String,
    pub workout_plan_id: Option<Uuid>,
    pub diet_plan_id: Option<Uuid>,
    pub processing_time_seconds: Option<f64>,
    pub error_message: String,
    pub retry_count: i32,
    pub max_retries: i32,
    pub created_at: DateTime<Utc>,
    pub queued_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl PlanGeneration {
    /// Whether a manual retry is currently allowed.
    pub fn can_retry(&self) -> bool {
        self.status == GenerationStatus::Failed && self.retry_count < self.max_retries
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WorkoutPlan {
    pub id: Uuid,
    pub user_id: Uuid,
    pub user_goal_id: Uuid,
    pub plan_generation_id: Uuid,
    pub name: String,
    pub description: String,
    pub difficulty_level: Difficulty,
    pub duration_weeks: i32,
    pub sessions_per_week: i32,
    pub schedule: Json<WeeklyWorkoutSchedule>,
    pub exercises: Json<Vec<Exercise>>,
    pub equipment_needed: Vec<String>,
    pub generated_from_ai: bool,
    pub algorithm_version: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DietPlan {
    pub id: Uuid,
    pub user_id: Uuid,
    pub user_goal_id: Uuid,
    pub plan_generation_id: Uuid,
    pub name: String,
    pub description: String,
    pub diet_type: DietType,
    pub daily_calorie_target: i32,
    pub duration_weeks: i32,
    pub protein_percentage: f64,
    pub carb_percentage: f64,
    pub fat_percentage: f64,
    pub meal_plan: Json<WeeklyMealPlan>,
    pub food_restrictions: Vec<String>,
    pub preferred_foods: Vec<String>,
    pub shopping_list: Json<Vec<ShoppingItem>>,
    pub generated_from_ai: bool,
    pub algorithm_version: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl DietPlan {
    pub fn macro_split(&self) -> MacroSplit {
        MacroSplit {
            protein_percentage: self.protein_percentage,
            carb_percentage: self.carb_percentage,
            fat_percentage: self.fat_percentage,
        }
    }
}

/// Per-user view over one workout plan and one diet plan.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PlanSummary {
    pub id: Uuid,
    pub user_id: Uuid,
    pub user_goal_id: Uuid,
    pub workout_plan_id: Uuid,
    pub diet_plan_id: Uuid,
    pub is_active: bool,
    pub start_date: NaiveDate,
    pub user_rating: Option<i32>,
    pub user_feedback: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One entry in a user's plan history for one [`PlanType`].
///
/// User modification requests are stored with `is_current = false` until
/// something turns them into a new plan.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PlanVersion {
    pub id: Uuid,
    pub user_id: Uuid,
    pub plan_type: PlanType,
    pub plan_id: Uuid,
    pub version_number: i32,
    pub plan_data: Json<serde_json::Value>,
    pub modification_reason: String,
    pub modified_by_user: bool,
    pub is_current: bool,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_step_display_roundtrip() {
        for v in ProgressStep::ALL {
            let parsed: ProgressStep = v.to_string().parse().expect("should parse");
            assert_eq!(v, parsed);
        }
    }

    #[test]
    fn progress_step_invalid() {
        let err = "checkout".parse::<ProgressStep>().unwrap_err();
        assert_eq!(err, ProgressStepParseError("checkout".to_owned()));
        assert_eq!(err.to_string(), "invalid progress step: \"checkout\"");
    }

    #[test]
    fn progress_step_positions_follow_declaration_order() {
        for (i, step) in ProgressStep::ALL.iter().enumerate() {
            assert_eq!(step.position(), i);
        }
        assert!(ProgressStep::GoalSelection < ProgressStep::Completed);
    }

    #[test]
    fn generation_status_display_roundtrip() {
        let variants = [
            GenerationStatus::Pending,
            GenerationStatus::Queued,
            GenerationStatus::Processing,
            GenerationStatus::Completed,
            GenerationStatus::Failed,
            GenerationStatus::Cancelled,
        ];
        for v in &variants {
            let parsed: GenerationStatus = v.to_string().parse().expect("should parse");
            assert_eq!(*v, parsed);
        }
    }

    #[test]
    fn generation_status_classification() {
        assert!(GenerationStatus::Queued.is_active());
        assert!(GenerationStatus::Processing.is_active());
        assert!(!GenerationStatus::Pending.is_active());
        assert!(!GenerationStatus::Pending.is_terminal());
        assert!(GenerationStatus::Cancelled.is_terminal());
        assert!(GenerationStatus::Failed.is_terminal());
    }

    #[test]
    fn payment_status_display_roundtrip() {
        let variants = [
            PaymentStatus::Pending,
            PaymentStatus::Successful,
            PaymentStatus::Failed,
            PaymentStatus::Refunded,
            PaymentStatus::Cancelled,
        ];
        for v in &variants {
            let parsed: PaymentStatus = v.to_string().parse().expect("should parse");
            assert_eq!(*v, parsed);
        }
    }

    #[test]
    fn currency_is_case_insensitive_on_parse() {
        assert_eq!("irr".parse::<Currency>().unwrap(), Currency::Irr);
        assert_eq!(Currency::Usd.to_string(), "USD");
        assert!("GBP".parse::<Currency>().is_err());
    }

    #[test]
    fn question_type_invalid() {
        assert!("slider".parse::<QuestionType>().is_err());
        assert_eq!(
            "multi_choice".parse::<QuestionType>().unwrap(),
            QuestionType::MultiChoice
        );
    }

    #[test]
    fn plan_type_parse() {
        assert_eq!("workout".parse::<PlanType>().unwrap(), PlanType::Workout);
        assert_eq!(PlanType::Diet.to_string(), "diet");
        let err = "meal".parse::<PlanType>().unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid plan type: \"meal\" (expected workout or diet)"
        );
    }

    #[test]
    fn completed_steps_from_column() {
        let steps = CompletedSteps::try_from(vec![
            "questionnaire".to_owned(),
            "goal_selection".to_owned(),
            "questionnaire".to_owned(),
        ])
        .expect("valid names");
        assert_eq!(steps.len(), 2);
        assert_eq!(steps.furthest(), Some(ProgressStep::Questionnaire));
        assert_eq!(steps.to_names(), vec!["goal_selection", "questionnaire"]);
    }

    #[test]
    fn completed_steps_rejects_unknown() {
        let result = CompletedSteps::try_from(vec!["warmup".to_owned()]);
        assert!(result.is_err());
    }

    #[test]
    fn completed_steps_insert_is_idempotent() {
        let mut steps = CompletedSteps::new();
        assert!(steps.insert(ProgressStep::GoalSelection));
        assert!(!steps.insert(ProgressStep::GoalSelection));
        assert!(steps.contains(ProgressStep::GoalSelection));
    }
}
