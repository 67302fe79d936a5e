//! Assembler input built from stored questionnaire answers.

use serde::{Deserialize, Serialize};

use fitplan_db::models::{AnsweredQuestion, QuestionType};

/// One answer value, typed by the kind of question it answers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum AnswerValue {
    Text(String),
    Number(f64),
    Choice(String),
    MultiChoice(Vec<String>),
}

impl AnswerValue {
    /// The value as display text. Multi-choice values are comma-joined.
    pub fn as_text(&self) -> String {
        match self {
            Self::Text(s) | Self::Choice(s) => s.clone(),
            Self::Number(n) => n.to_string(),
            Self::MultiChoice(items) => items.join(", "),
        }
    }

    /// The value as a list. Text answers are split on commas.
    pub fn as_list(&self) -> Vec<String> {
        match self {
            Self::MultiChoice(items) => items.clone(),
            Self::Number(n) => vec![n.to_string()],
            Self::Text(s) | Self::Choice(s) => s
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_owned)
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionAnswer {
    pub question: String,
    pub value: AnswerValue,
}

/// Everything an assembler knows about the user.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuestionnaireAnswers {
    /// Goal name, e.g. `"lose_weight"`.
    pub goal: String,
    pub answers: Vec<QuestionAnswer>,
}

impl QuestionnaireAnswers {
    pub fn new(goal: impl Into<String>) -> Self {
        Self {
            goal: goal.into(),
            answers: Vec::new(),
        }
    }

    pub fn with_answer(mut self, question: impl Into<String>, value: AnswerValue) -> Self {
        self.answers.push(QuestionAnswer {
            question: question.into(),
            value,
        });
        self
    }

    /// Build from stored rows. Rows that carry no value are skipped.
    pub fn from_rows(goal: impl Into<String>, rows: Vec<AnsweredQuestion>) -> Self {
        let answers = rows
            .into_iter()
            .filter_map(|row| {
                let value = row_value(&row)?;
                Some(QuestionAnswer {
                    question: row.question,
                    value,
                })
            })
            .collect();
        Self {
            goal: goal.into(),
            answers,
        }
    }
}

/// Prefer the column matching the question type, then any populated one.
fn row_value(row: &AnsweredQuestion) -> Option<AnswerValue> {
    let text = row
        .text_answer
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .map(|s| AnswerValue::Text(s.to_owned()));
    let number = row.numeric_answer.map(AnswerValue::Number);
    let choice = row
        .choice_answer
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .map(|s| AnswerValue::Choice(s.to_owned()));
    let multi = (!row.multi_choice_answer.is_empty())
        .then(|| AnswerValue::MultiChoice(row.multi_choice_answer.clone()));

    let typed = match row.question_type {
        QuestionType::Text => text.clone(),
        QuestionType::Number => number.clone(),
        QuestionType::Choice => choice.clone(),
        QuestionType::MultiChoice => multi.clone(),
    };
    typed.or(number).or(choice).or(multi).or(text)
}
