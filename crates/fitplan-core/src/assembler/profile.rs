//! Structured user profile extracted from free-form questionnaire answers.
//!
//! Questions are matched to profile fields by keywords in the question
//! text. Answers that match no field are kept as preferences.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::AssembleError;
use super::answers::{AnswerValue, QuestionAnswer, QuestionnaireAnswers};

/// Profile field a question feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileField {
    Age,
    Gender,
    Weight,
    Height,
    FitnessExperience,
    ActivityLevel,
    DietaryRestrictions,
    Equipment,
    AvailableTime,
}

/// First match wins, so more specific keywords come first.
const KEYWORDS: &[(&[&str], ProfileField)] = &[
    (&["age", "old"], ProfileField::Age),
    (&["gender", "sex"], ProfileField::Gender),
    (&["weight", "weigh"], ProfileField::Weight),
    (&["height", "tall"], ProfileField::Height),
    (&["experience", "experienced"], ProfileField::FitnessExperience),
    (&["activity", "active"], ProfileField::ActivityLevel),
    (
        &["dietary", "diet", "food", "foods", "allergies", "allergy"],
        ProfileField::DietaryRestrictions,
    ),
    (&["equipment"], ProfileField::Equipment),
    (&["time", "minutes", "hours"], ProfileField::AvailableTime),
];

impl ProfileField {
    /// Classify a question by whole-word keyword match.
    pub fn classify(question: &str) -> Option<Self> {
        let lowered = question.to_lowercase();
        let words: Vec<&str> = lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();
        KEYWORDS
            .iter()
            .find(|(keys, _)| keys.iter().any(|k| words.contains(k)))
            .map(|(_, field)| *field)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub goal: String,
    pub age: Option<u32>,
    pub gender: Option<String>,
    pub weight_kg: Option<f64>,
    pub height_cm: Option<f64>,
    pub fitness_experience: Option<String>,
    pub activity_level: Option<String>,
    pub dietary_restrictions: Vec<String>,
    pub equipment: Vec<String>,
    pub available_time: Option<String>,
    pub preferences: BTreeMap<String, String>,
}

impl UserProfile {
    /// Extract a profile, rejecting answers that cannot be interpreted.
    pub fn from_answers(answers: &QuestionnaireAnswers) -> Result<Self, AssembleError> {
        let goal = answers.goal.trim();
        if goal.is_empty() {
            return Err(AssembleError::MissingGoal);
        }

        let mut profile = Self {
            goal: goal.to_owned(),
            ..Self::default()
        };

        for answer in &answers.answers {
            match ProfileField::classify(&answer.question) {
                Some(ProfileField::Age) => {
                    let age = numeric(answer, 10.0..=100.0)?;
                    profile.age = Some(age.round() as u32);
                }
                Some(ProfileField::Gender) => profile.gender = Some(normalized(&answer.value)),
                Some(ProfileField::Weight) => {
                    profile.weight_kg = Some(numeric(answer, 25.0..=350.0)?);
                }
                Some(ProfileField::Height) => {
                    profile.height_cm = Some(numeric(answer, 100.0..=250.0)?);
                }
                Some(ProfileField::FitnessExperience) => {
                    profile.fitness_experience = Some(normalized(&answer.value));
                }
                Some(ProfileField::ActivityLevel) => {
                    profile.activity_level = Some(normalized(&answer.value));
                }
                Some(ProfileField::DietaryRestrictions) => {
                    profile.dietary_restrictions.extend(listed(&answer.value));
                }
                Some(ProfileField::Equipment) => profile.equipment.extend(listed(&answer.value)),
                Some(ProfileField::AvailableTime) => {
                    profile.available_time = Some(answer.value.as_text());
                }
                None => {
                    profile
                        .preferences
                        .insert(answer.question.clone(), answer.value.as_text());
                }
            }
        }

        Ok(profile)
    }

    /// Body mass index, when both weight and height are known.
    pub fn bmi(&self) -> Option<f64> {
        let weight = self.weight_kg?;
        let height_m = self.height_cm? / 100.0;
        Some(weight / (height_m * height_m))
    }

    pub fn restricts(&self, food: &str) -> bool {
        self.dietary_restrictions.iter().any(|r| r.contains(food))
    }
}

fn numeric(
    answer: &QuestionAnswer,
    range: std::ops::RangeInclusive<f64>,
) -> Result<f64, AssembleError> {
    let value = match &answer.value {
        AnswerValue::Number(n) => *n,
        other => {
            let text = other.as_text();
            leading_number(&text).ok_or_else(|| AssembleError::MalformedAnswer {
                question: answer.question.clone(),
                reason: format!("expected a number, got {text:?}"),
            })?
        }
    };
    if !range.contains(&value) {
        return Err(AssembleError::MalformedAnswer {
            question: answer.question.clone(),
            reason: format!(
                "{value} is outside {}..={}",
                range.start(),
                range.end()
            ),
        });
    }
    Ok(value)
}

/// Parse the leading number of strings like `"72 kg"` or `"29"`.
fn leading_number(text: &str) -> Option<f64> {
    let trimmed = text.trim();
    let end = trimmed
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(trimmed.len());
    trimmed[..end].parse().ok()
}

fn normalized(value: &AnswerValue) -> String {
    value.as_text().trim().to_lowercase()
}

fn listed(value: &AnswerValue) -> Vec<String> {
    value
        .as_list()
        .into_iter()
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty() && s != "none")
        .collect()
}
