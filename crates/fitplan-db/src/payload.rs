//! Typed plan payloads.
//!
//! These are what a plan assembler produces and what the `JSONB` columns of
//! `workout_plans` and `diet_plans` hold. Schedules and meal plans are
//! explicit per-day structures rather than free-form maps.

use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Shared enums
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Weekday {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Sunday,
}

impl Weekday {
    pub const ALL: [Weekday; 7] = [
        Self::Monday,
        Self::Tuesday,
        Self::Wednesday,
        Self::Thursday,
        Self::Friday,
        Self::Saturday,
        Self::Sunday,
    ];
}

impl fmt::Display for Weekday {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Monday => "monday",
            Self::Tuesday => "tuesday",
            Self::Wednesday => "wednesday",
            Self::Thursday => "thursday",
            Self::Friday => "friday",
            Self::Saturday => "saturday",
            Self::Sunday => "sunday",
        };
        f.write_str(s)
    }
}

/// Workout difficulty level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    Beginner,
    Intermediate,
    Advanced,
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Beginner => "beginner",
            Self::Intermediate => "intermediate",
            Self::Advanced => "advanced",
        };
        f.write_str(s)
    }
}

/// Diet style.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DietType {
    Balanced,
    LowCarb,
    HighProtein,
    Keto,
    Vegetarian,
    Vegan,
    Mediterranean,
    IntermittentFasting,
}

impl fmt::Display for DietType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Balanced => "balanced",
            Self::LowCarb => "low_carb",
            Self::HighProtein => "high_protein",
            Self::Keto => "keto",
            Self::Vegetarian => "vegetarian",
            Self::Vegan => "vegan",
            Self::Mediterranean => "mediterranean",
            Self::IntermittentFasting => "intermittent_fasting",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Workout
// ---------------------------------------------------------------------------

/// What happens on one day of the training week.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkoutDay {
    Training {
        focus: String,
        /// Names of entries in the plan's exercise list.
        exercises: Vec<String>,
    },
    Rest,
}

impl WorkoutDay {
    pub fn training(focus: impl Into<String>, exercises: &[&str]) -> Self {
        Self::Training {
            focus: focus.into(),
            exercises: exercises.iter().map(|e| (*e).to_owned()).collect(),
        }
    }

    pub fn is_training(&self) -> bool {
        matches!(self, Self::Training { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeeklyWorkoutSchedule {
    pub monday: WorkoutDay,
    pub tuesday: WorkoutDay,
    pub wednesday: WorkoutDay,
    pub thursday: WorkoutDay,
    pub friday: WorkoutDay,
    pub saturday: WorkoutDay,
    pub sunday: WorkoutDay,
}

impl WeeklyWorkoutSchedule {
    pub fn day(&self, day: Weekday) -> &WorkoutDay {
        match day {
            Weekday::Monday => &self.monday,
            Weekday::Tuesday => &self.tuesday,
            Weekday::Wednesday => &self.wednesday,
            Weekday::Thursday => &self.thursday,
            Weekday::Friday => &self.friday,
            Weekday::Saturday => &self.saturday,
            Weekday::Sunday => &self.sunday,
        }
    }

    pub fn days(&self) -> impl Iterator<Item = (Weekday, &WorkoutDay)> {
        Weekday::ALL.into_iter().map(move |d| (d, self.day(d)))
    }

    pub fn training_days(&self) -> usize {
        self.days().filter(|(_, d)| d.is_training()).count()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exercise {
    pub name: String,
    pub category: String,
    pub muscle_groups: Vec<String>,
    pub sets: u32,
    /// Free text such as `"10-15"` or `"30s"`.
    pub reps: String,
    pub instructions: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkoutPlanPayload {
    pub name: String,
    pub description: String,
    pub difficulty: Difficulty,
    pub duration_weeks: i32,
    pub sessions_per_week: i32,
    pub schedule: WeeklyWorkoutSchedule,
    pub exercises: Vec<Exercise>,
    pub equipment_needed: Vec<String>,
}

// ---------------------------------------------------------------------------
// Diet
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Meal {
    pub name: String,
    pub calories: u32,
    pub ingredients: Vec<String>,
}

impl Meal {
    pub fn new(name: impl Into<String>, calories: u32, ingredients: &[&str]) -> Self {
        Self {
            name: name.into(),
            calories,
            ingredients: ingredients.iter().map(|i| (*i).to_owned()).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayMeals {
    pub day: Weekday,
    pub breakfast: Meal,
    pub lunch: Meal,
    pub dinner: Meal,
    #[serde(default)]
    pub snacks: Vec<Meal>,
}

impl DayMeals {
    pub fn total_calories(&self) -> u32 {
        self.breakfast.calories
            + self.lunch.calories
            + self.dinner.calories
            + self.snacks.iter().map(|s| s.calories).sum::<u32>()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeeklyMealPlan {
    pub days: Vec<DayMeals>,
}

impl WeeklyMealPlan {
    pub fn day(&self, day: Weekday) -> Option<&DayMeals> {
        self.days.iter().find(|d| d.day == day)
    }
}

/// Share of daily energy from each macronutrient, in percent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MacroSplit {
    pub protein_percentage: f64,
    pub carb_percentage: f64,
    pub fat_percentage: f64,
}

/// Daily macronutrient targets in grams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyMacros {
    pub protein_g: i64,
    pub carbs_g: i64,
    pub fat_g: i64,
}

impl MacroSplit {
    const KCAL_PER_G_PROTEIN: f64 = 4.0;
    const KCAL_PER_G_CARB: f64 = 4.0;
    const KCAL_PER_G_FAT: f64 = 9.0;

    /// Convert the split into grams for a daily calorie target.
    pub fn daily_macros(&self, daily_calories: i32) -> DailyMacros {
        let kcal = f64::from(daily_calories);
        let grams = |pct: f64, per_g: f64| (kcal * pct / 100.0 / per_g).round() as i64;
        DailyMacros {
            protein_g: grams(self.protein_percentage, Self::KCAL_PER_G_PROTEIN),
            carbs_g: grams(self.carb_percentage, Self::KCAL_PER_G_CARB),
            fat_g: grams(self.fat_percentage, Self::KCAL_PER_G_FAT),
        }
    }

    /// Whether the three shares add up to 100% (within half a percent).
    pub fn is_complete(&self) -> bool {
        let total = self.protein_percentage + self.carb_percentage + self.fat_percentage;
        (total - 100.0).abs() <= 0.5
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShoppingItem {
    pub item: String,
    pub quantity: String,
    pub category: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DietPlanPayload {
    pub name: String,
    pub description: String,
    pub diet_type: DietType,
    pub daily_calorie_target: i32,
    pub duration_weeks: i32,
    pub macros: MacroSplit,
    pub meal_plan: WeeklyMealPlan,
    pub food_restrictions: Vec<String>,
    pub preferred_foods: Vec<String>,
    pub shopping_list: Vec<ShoppingItem>,
}

/// Output of one plan assembly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedPlans {
    pub workout: WorkoutPlanPayload,
    pub diet: DietPlanPayload,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
