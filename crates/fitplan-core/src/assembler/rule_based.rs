//! Deterministic assembler that builds plans from fixed templates.
//!
//! Used when no model backend is configured and as the reference output
//! shape for model-backed assemblers.

use async_trait::async_trait;

use fitplan_db::payload::{
    DayMeals, DietPlanPayload, DietType, Difficulty, Exercise, GeneratedPlans, MacroSplit, Meal,
    ShoppingItem, WeeklyMealPlan, WeeklyWorkoutSchedule, Weekday, WorkoutDay, WorkoutPlanPayload,
};

use super::profile::UserProfile;
use super::{AssembleError, PlanAssembler, QuestionnaireAnswers};

const BASE_CALORIES: i32 = 2000;
const DEFICIT_CALORIES: i32 = 300;
const SURPLUS_CALORIES: i32 = 400;
const DURATION_WEEKS: i32 = 12;
const DEFAULT_EQUIPMENT: [&str; 3] = ["dumbbells", "yoga mat", "resistance bands"];

/// Template-driven [`PlanAssembler`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleBasedAssembler;

impl RuleBasedAssembler {
    pub const NAME: &str = "rule-based";

    /// Build plans synchronously. Exposed for callers that do not need the
    /// async seam.
    pub fn build(&self, answers: &QuestionnaireAnswers) -> Result<GeneratedPlans, AssembleError> {
        let profile = UserProfile::from_answers(answers)?;
        let difficulty = difficulty_for(profile.fitness_experience.as_deref());
        let title = goal_title(&profile.goal);

        Ok(GeneratedPlans {
            workout: workout_plan(&profile, difficulty, &title),
            diet: diet_plan(&profile, &title),
        })
    }
}

#[async_trait]
impl PlanAssembler for RuleBasedAssembler {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn assemble(
        &self,
        answers: &QuestionnaireAnswers,
    ) -> Result<GeneratedPlans, AssembleError> {
        self.build(answers)
    }
}

fn difficulty_for(experience: Option<&str>) -> Difficulty {
    match experience {
        Some(e) if e.contains("advanced") || e.contains("expert") => Difficulty::Advanced,
        Some(e) if e.contains("intermediate") || e.contains("some") => Difficulty::Intermediate,
        _ => Difficulty::Beginner,
    }
}

/// `"lose_weight"` -> `"Lose Weight"`.
fn goal_title(goal: &str) -> String {
    goal.split(['_', ' '])
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GoalDirection {
    Lose,
    Gain,
    Maintain,
}

fn goal_direction(goal: &str) -> GoalDirection {
    let goal = goal.to_lowercase();
    if goal.contains("lose") || goal.contains("loss") {
        GoalDirection::Lose
    } else if goal.contains("gain") || goal.contains("bulk") {
        GoalDirection::Gain
    } else {
        GoalDirection::Maintain
    }
}

// ---------------------------------------------------------------------------
// Workout
// ---------------------------------------------------------------------------

fn workout_plan(profile: &UserProfile, difficulty: Difficulty, title: &str) -> WorkoutPlanPayload {
    let schedule = weekly_schedule(difficulty);
    let equipment: Vec<String> = if profile.equipment.is_empty() {
        DEFAULT_EQUIPMENT.iter().map(|e| (*e).to_owned()).collect()
    } else {
        profile.equipment.clone()
    };

    WorkoutPlanPayload {
        name: format!("{title} Workout Plan"),
        description: format!(
            "A {difficulty} level workout plan designed to help you {}.",
            title.to_lowercase()
        ),
        difficulty,
        duration_weeks: DURATION_WEEKS,
        sessions_per_week: schedule.training_days() as i32,
        exercises: exercises(difficulty, &equipment),
        schedule,
        equipment_needed: equipment,
    }
}

fn weekly_schedule(difficulty: Difficulty) -> WeeklyWorkoutSchedule {
    let upper = || WorkoutDay::training("Upper Body", &["Push-ups", "Plank"]);
    let lower = || WorkoutDay::training("Lower Body", &["Squats", "Lunges"]);
    let full = || WorkoutDay::training("Full Body", &["Push-ups", "Squats", "Plank"]);
    let cardio = || WorkoutDay::training("Cardio", &["Jumping Jacks"]);

    match difficulty {
        Difficulty::Beginner => WeeklyWorkoutSchedule {
            monday: full(),
            tuesday: WorkoutDay::Rest,
            wednesday: cardio(),
            thursday: WorkoutDay::Rest,
            friday: full(),
            saturday: WorkoutDay::Rest,
            sunday: WorkoutDay::Rest,
        },
        Difficulty::Intermediate => WeeklyWorkoutSchedule {
            monday: upper(),
            tuesday: cardio(),
            wednesday: WorkoutDay::Rest,
            thursday: lower(),
            friday: full(),
            saturday: WorkoutDay::Rest,
            sunday: WorkoutDay::Rest,
        },
        Difficulty::Advanced => WeeklyWorkoutSchedule {
            monday: upper(),
            tuesday: cardio(),
            wednesday: WorkoutDay::Rest,
            thursday: lower(),
            friday: full(),
            saturday: cardio(),
            sunday: WorkoutDay::Rest,
        },
    }
}

fn exercises(difficulty: Difficulty, equipment: &[String]) -> Vec<Exercise> {
    let sets = match difficulty {
        Difficulty::Beginner => 2,
        Difficulty::Intermediate => 3,
        Difficulty::Advanced => 4,
    };
    let exercise = |name: &str, category: &str, muscles: &[&str], reps: &str, how: &str| Exercise {
        name: name.to_owned(),
        category: category.to_owned(),
        muscle_groups: muscles.iter().map(|m| (*m).to_owned()).collect(),
        sets,
        reps: reps.to_owned(),
        instructions: how.to_owned(),
    };

    let mut list = vec![
        exercise(
            "Push-ups",
            "Strength",
            &["chest", "shoulders", "triceps"],
            "10-15",
            "Start in plank position, lower body until chest nearly touches floor, push back up.",
        ),
        exercise(
            "Squats",
            "Strength",
            &["quadriceps", "glutes", "hamstrings"],
            "12-20",
            "Stand with feet shoulder-width apart, lower hips back and down, return to standing.",
        ),
        exercise(
            "Lunges",
            "Strength",
            &["quadriceps", "glutes"],
            "10 per leg",
            "Step forward and lower the back knee towards the floor, push back to start.",
        ),
        exercise(
            "Plank",
            "Core",
            &["abdominals", "lower back"],
            "30-60s",
            "Hold a straight line from head to heels on forearms and toes.",
        ),
        exercise(
            "Jumping Jacks",
            "Cardio",
            &["full body"],
            "45s",
            "Jump feet apart while raising arms overhead, then return.",
        ),
    ];
    if equipment.iter().any(|e| e.contains("dumbbell")) {
        list.push(exercise(
            "Dumbbell Rows",
            "Strength",
            &["back", "biceps"],
            "8-12",
            "Hinge at the hips and pull the dumbbell to the lower ribs.",
        ));
    }
    list
}

// ---------------------------------------------------------------------------
// Diet
// ---------------------------------------------------------------------------

fn diet_plan(profile: &UserProfile, title: &str) -> DietPlanPayload {
    let direction = goal_direction(&profile.goal);
    let daily_calorie_target = match direction {
        GoalDirection::Lose => BASE_CALORIES - DEFICIT_CALORIES,
        GoalDirection::Gain => BASE_CALORIES + SURPLUS_CALORIES,
        GoalDirection::Maintain => BASE_CALORIES,
    };

    let diet_type = if profile.restricts("vegan") {
        DietType::Vegan
    } else if profile.restricts("vegetarian") {
        DietType::Vegetarian
    } else if direction == GoalDirection::Gain {
        DietType::HighProtein
    } else {
        DietType::Balanced
    };

    let macros = match diet_type {
        DietType::HighProtein => MacroSplit {
            protein_percentage: 30.0,
            carb_percentage: 45.0,
            fat_percentage: 25.0,
        },
        _ => MacroSplit {
            protein_percentage: 25.0,
            carb_percentage: 45.0,
            fat_percentage: 30.0,
        },
    };

    let plant_based = matches!(diet_type, DietType::Vegan | DietType::Vegetarian);

    DietPlanPayload {
        name: format!("{title} Nutrition Plan"),
        description: format!(
            "A {diet_type} nutrition plan to support your {} goals.",
            title.to_lowercase()
        ),
        diet_type,
        daily_calorie_target,
        duration_weeks: DURATION_WEEKS,
        macros,
        meal_plan: meal_plan(daily_calorie_target, plant_based),
        food_restrictions: profile.dietary_restrictions.clone(),
        preferred_foods: Vec::new(),
        shopping_list: shopping_list(plant_based),
    }
}

/// Every day gets the same template, scaled so the day hits the target:
/// breakfast 25%, lunch 35%, dinner 30%, snack 10%.
fn meal_plan(daily_calories: i32, plant_based: bool) -> WeeklyMealPlan {
    let kcal = |share: u32| (daily_calories.max(0) as u32) * share / 100;
    let (lunch, lunch_items, dinner, dinner_items) = if plant_based {
        (
            "Chickpea Salad",
            ["chickpeas", "mixed greens", "tomatoes", "olive oil"],
            "Tofu Stir-fry with Vegetables",
            ["tofu", "broccoli", "sweet potato", "herbs"],
        )
    } else {
        (
            "Grilled Chicken Salad",
            ["chicken breast", "mixed greens", "tomatoes", "olive oil"],
            "Baked Salmon with Vegetables",
            ["salmon fillet", "broccoli", "sweet potato", "herbs"],
        )
    };

    let days = Weekday::ALL
        .into_iter()
        .map(|day| DayMeals {
            day,
            breakfast: Meal::new(
                "Oatmeal with Berries",
                kcal(25),
                &["oats", "blueberries", "milk", "honey"],
            ),
            lunch: Meal::new(lunch, kcal(35), &lunch_items),
            dinner: Meal::new(dinner, kcal(30), &dinner_items),
            snacks: vec![Meal::new("Greek Yogurt", kcal(10), &["greek yogurt", "almonds"])],
        })
        .collect();

    WeeklyMealPlan { days }
}

fn shopping_list(plant_based: bool) -> Vec<ShoppingItem> {
    let item = |item: &str, quantity: &str, category: &str| ShoppingItem {
        item: item.to_owned(),
        quantity: quantity.to_owned(),
        category: category.to_owned(),
    };
    let mut list = if plant_based {
        vec![
            item("Chickpeas", "4 cans", "Protein"),
            item("Tofu", "2 blocks", "Protein"),
        ]
    } else {
        vec![
            item("Chicken breast", "1 kg", "Protein"),
            item("Salmon fillets", "500 g", "Protein"),
        ]
    };
    list.extend([
        item("Mixed greens", "2 bags", "Vegetables"),
        item("Broccoli", "3 heads", "Vegetables"),
        item("Sweet potatoes", "2 kg", "Carbohydrates"),
        item("Greek yogurt", "1 kg", "Dairy"),
        item("Oats", "1 container", "Carbohydrates"),
        item("Blueberries", "2 cups", "Fruits"),
    ]);
    list
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembler::AnswerValue;

    fn answers(goal: &str, experience: &str) -> QuestionnaireAnswers {
        QuestionnaireAnswers::new(goal).with_answer(
            "What is your fitness experience level?",
            AnswerValue::Choice(experience.into()),
        )
    }

    #[test]
    fn goal_title_formats_words() {
        assert_eq!(goal_title("lose_weight"), "Lose Weight");
        assert_eq!(goal_title("MUSCLE gain"), "Muscle Gain");
    }

    #[test]
    fn difficulty_follows_experience() {
        assert_eq!(difficulty_for(Some("expert")), Difficulty::Advanced);
        assert_eq!(difficulty_for(Some("some")), Difficulty::Intermediate);
        assert_eq!(difficulty_for(Some("never trained")), Difficulty::Beginner);
        assert_eq!(difficulty_for(None), Difficulty::Beginner);
    }

    #[test]
    fn calorie_target_follows_goal() {
        let a = RuleBasedAssembler;
        let lose = a.build(&answers("lose_weight", "beginner")).unwrap();
        let gain = a.build(&answers("gain_weight", "beginner")).unwrap();
        let keep = a.build(&answers("flexibility", "beginner")).unwrap();
        assert_eq!(lose.diet.daily_calorie_target, 1700);
        assert_eq!(gain.diet.daily_calorie_target, 2400);
        assert_eq!(keep.diet.daily_calorie_target, 2000);
        assert_eq!(gain.diet.diet_type, DietType::HighProtein);
    }

    #[test]
    fn sessions_match_schedule() {
        let a = RuleBasedAssembler;
        for (exp, sessions) in [("beginner", 3), ("intermediate", 4), ("advanced", 5)] {
            let plans = a.build(&answers("lose_weight", exp)).unwrap();
            assert_eq!(plans.workout.sessions_per_week, sessions, "{exp}");
            assert_eq!(
                plans.workout.schedule.training_days() as i32,
                plans.workout.sessions_per_week
            );
        }
    }

    #[test]
    fn scheduled_exercises_exist_in_plan() {
        let plans = RuleBasedAssembler
            .build(&answers("lose_weight", "advanced"))
            .unwrap();
        let names: Vec<&str> = plans.workout.exercises.iter().map(|e| e.name.as_str()).collect();
        for (_, day) in plans.workout.schedule.days() {
            if let WorkoutDay::Training { exercises, .. } = day {
                for e in exercises {
                    assert!(names.contains(&e.as_str()), "{e} missing from exercise list");
                }
            }
        }
    }

    #[test]
    fn meal_plan_covers_week_and_target() {
        let plans = RuleBasedAssembler
            .build(&answers("lose_weight", "beginner"))
            .unwrap();
        let meal_plan = &plans.diet.meal_plan;
        assert_eq!(meal_plan.days.len(), 7);
        for day in &meal_plan.days {
            assert_eq!(day.total_calories(), 1700);
        }
        assert!(plans.diet.macros.is_complete());
        assert_eq!(plans.workout.name, "Lose Weight Workout Plan");
        assert_eq!(plans.diet.name, "Lose Weight Nutrition Plan");
    }

    #[test]
    fn vegetarian_restriction_swaps_menu() {
        let input = answers("lose_weight", "beginner").with_answer(
            "Any dietary restrictions?",
            AnswerValue::MultiChoice(vec!["Vegetarian".into()]),
        );
        let plans = RuleBasedAssembler.build(&input).unwrap();
        assert_eq!(plans.diet.diet_type, DietType::Vegetarian);
        assert_eq!(plans.diet.food_restrictions, vec!["vegetarian"]);
        let monday = plans.diet.meal_plan.day(Weekday::Monday).unwrap();
        assert!(!monday.dinner.ingredients.iter().any(|i| i.contains("salmon")));
        assert!(!plans.diet.shopping_list.iter().any(|i| i.item.contains("Chicken")));
    }

    #[test]
    fn equipment_defaults_and_dumbbell_rows() {
        let plans = RuleBasedAssembler
            .build(&answers("gain_weight", "intermediate"))
            .unwrap();
        assert_eq!(plans.workout.equipment_needed, DEFAULT_EQUIPMENT.to_vec());
        assert!(plans.workout.exercises.iter().any(|e| e.name == "Dumbbell Rows"));
        assert!(plans.workout.exercises.iter().all(|e| e.sets == 3));
    }

    #[tokio::test]
    async fn malformed_input_surfaces_as_error() {
        let assembler: Box<dyn PlanAssembler> = Box::new(RuleBasedAssembler);
        let input = QuestionnaireAnswers::new("lose_weight")
            .with_answer("What is your age?", AnswerValue::Text("n/a".into()));
        let err = assembler.assemble(&input).await.unwrap_err();
        assert!(matches!(err, AssembleError::MalformedAnswer { .. }));
        assert_eq!(assembler.name(), "rule-based");
    }
}
