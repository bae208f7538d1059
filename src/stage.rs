/// Number of scored stages. Stages are numbered `1..=STAGE_COUNT`.
pub const STAGE_COUNT: u8 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregate {
    Max,
    Min,
    /// Arithmetic mean rounded to two decimal places.
    MeanRounded2,
}

impl Aggregate {
    /// Applies the aggregate to a column. Returns `None` for an empty column.
    pub fn apply(self, values: &[f64]) -> Option<f64> {
        if values.is_empty() {
            return None;
        }
        match self {
            Aggregate::Max => values.iter().copied().reduce(f64::max),
            Aggregate::Min => values.iter().copied().reduce(f64::min),
            Aggregate::MeanRounded2 => {
                let sum: f64 = values.iter().sum();
                Some(round_to_hundredths(sum / values.len() as f64))
            }
        }
    }
}

/// Rounds half to even at two decimals, so 0.125 becomes 0.12 and 0.135 becomes 0.14.
pub fn round_to_hundredths(value: f64) -> f64 {
    (value * 100.0).round_ties_even() / 100.0
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Equality {
    Exact,
    /// Accepts answers strictly closer than the tolerance.
    Tolerance(f64),
}

impl Equality {
    pub fn matches(self, submitted: f64, correct: f64) -> bool {
        match self {
            Equality::Exact => submitted == correct,
            Equality::Tolerance(tolerance) => (submitted - correct).abs() < tolerance,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StageDefinition {
    pub number: u8,
    pub title: &'static str,
    pub prompt: &'static str,
    pub dataset_file: &'static str,
    pub column: &'static str,
    pub aggregate: Aggregate,
    pub equality: Equality,
    pub hint: &'static str,
    /// Step for the answer input: 1 for whole-number answers, 0.01 for two decimals.
    pub input_step: f64,
}

pub static STAGES: [StageDefinition; STAGE_COUNT as usize] = [
    StageDefinition {
        number: 1,
        title: "Highest sales",
        prompt: "What is the highest value in the Sales column?",
        dataset_file: "1_sales_50.csv",
        column: "Sales",
        aggregate: Aggregate::Max,
        equality: Equality::Exact,
        hint: "Sort the Sales column from largest to smallest and read the first row.",
        input_step: 1.0,
    },
    StageDefinition {
        number: 2,
        title: "Least exercise",
        prompt: "What is the smallest value in the ExerciseMinutes column?",
        dataset_file: "2_exercise_50.csv",
        column: "ExerciseMinutes",
        aggregate: Aggregate::Min,
        equality: Equality::Exact,
        hint: "Use MIN over the ExerciseMinutes column.",
        input_step: 1.0,
    },
    StageDefinition {
        number: 3,
        title: "Peak electricity use",
        prompt: "What is the highest number of electricity units used?",
        dataset_file: "3_electricity_50.csv",
        column: "Units",
        aggregate: Aggregate::Max,
        equality: Equality::Tolerance(0.01),
        hint: "Use MAX over the Units column. Decimals count.",
        input_step: 0.01,
    },
    StageDefinition {
        number: 4,
        title: "Quietest day on the website",
        prompt: "What is the smallest number of website visitors in a day?",
        dataset_file: "4_web_traffic_50.csv",
        column: "Visitors",
        aggregate: Aggregate::Min,
        equality: Equality::Exact,
        hint: "Sort the Visitors column from smallest to largest and read the first row.",
        input_step: 1.0,
    },
    StageDefinition {
        number: 5,
        title: "Average internet time",
        prompt: "What is the average of HoursUsed, to two decimal places (e.g. 3.89)?",
        dataset_file: "5_internet_survey_50.csv",
        column: "HoursUsed",
        aggregate: Aggregate::MeanRounded2,
        equality: Equality::Exact,
        hint: "Use AVERAGE over the HoursUsed column, then round to two decimals.",
        input_step: 0.01,
    },
];

/// Looks up a stage by its 1-based number.
pub fn stage(number: u8) -> Option<&'static StageDefinition> {
    STAGES.iter().find(|s| s.number == number)
}

/// Looks up a stage by the file name of its dataset.
pub fn stage_for_file(file_name: &str) -> Option<&'static StageDefinition> {
    STAGES.iter().find(|s| s.dataset_file == file_name)
}

/// The result of checking one submission against a stage's dataset.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Verification {
    pub stage: u8,
    pub submitted: f64,
    pub expected: f64,
    pub correct: bool,
}

impl StageDefinition {
    /// Computes the expected answer from the column values and compares the submission against it.
    /// Returns `None` when the column is empty.
    pub fn verify(&self, values: &[f64], submitted: f64) -> Option<Verification> {
        let expected = self.aggregate.apply(values)?;
        Some(Verification {
            stage: self.number,
            submitted,
            expected,
            correct: self.equality.matches(submitted, expected),
        })
    }
}
