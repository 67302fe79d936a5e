//! `fitplan simulate` command: one demo user through the whole funnel.
//!
//! Goal selection, questionnaire, a mock-gateway payment, generation by an
//! in-process worker, and the resulting plans, all against the configured
//! database.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use rand::Rng;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;

use fitplan_core::assembler::profile::ProfileField;
use fitplan_core::assembler::{AnswerValue, RuleBasedAssembler};
use fitplan_core::generation::dispatch;
use fitplan_core::payment::{self, MockGateway, MockPaymentStore};
use fitplan_core::plans;
use fitplan_core::progress;
use fitplan_core::questionnaire::{self, SubmittedAnswer};
use fitplan_core::queue::ChannelQueue;
use fitplan_core::worker;
use fitplan_db::models::{GenerationStatus, Question, QuestionType};
use fitplan_db::queries::{questionnaire as questionnaire_db, users};

use crate::config::FitplanConfig;
use crate::generation_cmd::print_job;
use crate::plan_cmd::print_overview;

/// Questions created for a goal that has none yet.
const DEMO_QUESTIONS: &[(&str, QuestionType)] = &[
    ("What is your age?", QuestionType::Number),
    ("What is your gender?", QuestionType::Choice),
    ("What is your current weight in kg?", QuestionType::Number),
    ("What is your height in cm?", QuestionType::Number),
    ("What is your fitness experience level?", QuestionType::Choice),
    ("How active are you day to day?", QuestionType::Choice),
    ("Do you have any dietary restrictions?", QuestionType::MultiChoice),
    ("What equipment do you have access to?", QuestionType::MultiChoice),
    ("How much time can you train per session, in minutes?", QuestionType::Number),
];

const WAIT_LIMIT: Duration = Duration::from_secs(300);
const POLL_EVERY: Duration = Duration::from_millis(250);

pub async fn run_simulate(
    pool: &PgPool,
    config: &FitplanConfig,
    phone: Option<&str>,
    goal_name: &str,
) -> Result<()> {
    // 1. User.
    let phone = match phone {
        Some(p) => p.to_owned(),
        None => random_phone(),
    };
    let user = users::insert_user(pool, &phone, "Demo", "User").await?;
    println!("1. Created user {} ({phone})", user.id);

    // 2. Goal and questionnaire.
    let goal = match questionnaire_db::get_goal_by_name(pool, goal_name).await? {
        Some(goal) => goal,
        None => {
            let goal =
                questionnaire_db::upsert_goal(pool, goal_name, "created by fitplan simulate")
                    .await?;
            for (position, (text, kind)) in DEMO_QUESTIONS.iter().enumerate() {
                let position = i32::try_from(position).context("too many demo questions")?;
                questionnaire_db::insert_question(pool, Some(goal.id), text, *kind, position)
                    .await?;
            }
            goal
        }
    };
    let questions = questionnaire_db::list_questions_for_goal(pool, goal.id).await?;
    let answers: Vec<SubmittedAnswer> = questions
        .iter()
        .filter_map(|q| demo_answer(q).map(|value| SubmittedAnswer::new(q.id, value)))
        .collect();
    questionnaire::submit_questionnaire(pool, user.id, goal.id, &answers).await?;
    println!(
        "2. Answered {} of {} questions for goal {:?}",
        answers.len(),
        questions.len(),
        goal.name
    );

    // 3. Payment through the mock gateway.
    let gateway = MockGateway::with_success_rates(
        MockPaymentStore::new(),
        config.payment.request_success_rate,
        config.payment.verify_success_rate,
    );
    let created = payment::create_payment(
        pool,
        &gateway,
        user.id,
        config.payment.amount,
        config.payment.currency()?,
        Some(&phone),
    )
    .await?;
    println!("3. Payment requested: {}", created.payment_url);
    let paid = payment::verify_payment(pool, &gateway, &created.authority, true).await?;
    println!(
        "   verified: ref {} card {}",
        paid.ref_id.as_deref().unwrap_or("-"),
        paid.card_number_masked.as_deref().unwrap_or("-"),
    );

    // 4. Generation by an in-process worker.
    let (queue, receiver) = ChannelQueue::new(16);
    let cancel = CancellationToken::new();
    let worker_handle = tokio::spawn(worker::run_worker(
        pool.clone(),
        Arc::new(RuleBasedAssembler),
        Some(receiver),
        config.worker.to_worker_config(),
        cancel.clone(),
    ));

    let outcome = generate(pool, &queue, user.id).await;
    cancel.cancel();
    let stats = worker_handle.await.context("worker task panicked")??;
    let job = outcome?;
    tracing::debug!(processed = stats.processed(), "simulation worker stopped");

    println!("4. Generation finished");
    print_job(&job);
    if job.status != GenerationStatus::Completed {
        bail!("plan generation ended as {}", job.status);
    }

    // 5. Plans.
    println!();
    println!("5. Plans");
    let overview = plans::get_plan_overview(pool, user.id)
        .await?
        .context("completed generation left no active plan")?;
    print_overview(&overview);

    let state = progress::get_progress(pool, user.id).await?;
    println!();
    println!("Progress: {}", state.current_step);
    Ok(())
}

async fn generate(
    pool: &PgPool,
    queue: &ChannelQueue,
    user_id: uuid::Uuid,
) -> Result<fitplan_db::models::PlanGeneration> {
    let job = dispatch::enqueue_generation(pool, queue, user_id, dispatch::DEFAULT_MAX_RETRIES)
        .await?;

    let wait = async {
        loop {
            let current = dispatch::get_job_status(pool, job.id).await?;
            if current.status.is_terminal() {
                return Ok::<_, anyhow::Error>(current);
            }
            tokio::time::sleep(POLL_EVERY).await;
        }
    };
    tokio::time::timeout(WAIT_LIMIT, wait)
        .await
        .with_context(|| format!("generation {} did not finish in time", job.id))?
}

fn random_phone() -> String {
    let n: u32 = rand::rng().random_range(0..10_000_000);
    format!("+98912{n:07}")
}

/// A plausible answer for a question, shaped to its type. `None` when the
/// question is not recognised and takes no free text.
fn demo_answer(question: &Question) -> Option<AnswerValue> {
    let value = match ProfileField::classify(&question.question) {
        Some(ProfileField::Age) => AnswerValue::Number(29.0),
        Some(ProfileField::Gender) => AnswerValue::Choice("female".to_owned()),
        Some(ProfileField::Weight) => AnswerValue::Number(72.0),
        Some(ProfileField::Height) => AnswerValue::Number(168.0),
        Some(ProfileField::FitnessExperience) => AnswerValue::Choice("beginner".to_owned()),
        Some(ProfileField::ActivityLevel) => AnswerValue::Choice("moderately active".to_owned()),
        Some(ProfileField::DietaryRestrictions) => AnswerValue::MultiChoice(Vec::new()),
        Some(ProfileField::Equipment) => {
            AnswerValue::MultiChoice(vec!["dumbbells".to_owned(), "yoga mat".to_owned()])
        }
        Some(ProfileField::AvailableTime) => AnswerValue::Number(45.0),
        None => AnswerValue::Text("no preference".to_owned()),
    };

    let shaped = match (question.question_type, value) {
        (QuestionType::Number, v @ AnswerValue::Number(_)) => v,
        (QuestionType::Number, _) => return None,
        (QuestionType::Text, v) => AnswerValue::Text(v.as_text()),
        (QuestionType::Choice, v) => AnswerValue::Choice(v.as_text()),
        (QuestionType::MultiChoice, v) => AnswerValue::MultiChoice(v.as_list()),
    };
    questionnaire::value_matches(question.question_type, &shaped).then_some(shaped)
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;

    fn question(text: &str, kind: QuestionType) -> Question {
        Question {
            id: Uuid::new_v4(),
            goal_id: None,
            question: text.to_owned(),
            question_type: kind,
            position: 0,
        }
    }

    #[test]
    fn demo_questions_all_get_answers() {
        for (text, kind) in DEMO_QUESTIONS {
            let answer = demo_answer(&question(text, *kind));
            assert!(answer.is_some(), "no answer for {text:?}");
        }
    }

    #[test]
    fn answers_follow_question_type() {
        let q = question("What is your age?", QuestionType::Text);
        assert_eq!(demo_answer(&q), Some(AnswerValue::Text("29".to_owned())));

        let q = question("What equipment do you have?", QuestionType::Choice);
        assert_eq!(
            demo_answer(&q),
            Some(AnswerValue::Choice("dumbbells, yoga mat".to_owned()))
        );
    }

    #[test]
    fn unrecognised_number_question_is_skipped() {
        let q = question("Favourite number?", QuestionType::Number);
        assert_eq!(demo_answer(&q), None);
    }

    #[test]
    fn random_phone_shape() {
        let phone = random_phone();
        assert!(phone.starts_with("+98912"));
        assert_eq!(phone.len(), 13);
    }
}
