use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::stage::STAGE_COUNT;

/// Where a session currently is in the game.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Phase {
    #[default]
    Registration,
    /// One of the five stages, numbered 1 to 5.
    Stage(u8),
    Summary,
}

impl Phase {
    /// The phase as the 0..=6 integer used in logs and the UI.
    pub fn number(self) -> u8 {
        match self {
            Phase::Registration => 0,
            Phase::Stage(n) => n,
            Phase::Summary => 6,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Correct,
    Incorrect,
}

impl Verdict {
    /// The label written to the `result` column of the log.
    pub fn label(self) -> &'static str {
        match self {
            Verdict::Correct => "correct",
            Verdict::Incorrect => "incorrect",
        }
    }

    /// Parses a `result` cell. Rows written by earlier versions of the game use the Thai labels.
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim() {
            "correct" | "ถูกต้อง" => Some(Verdict::Correct),
            "incorrect" | "ผิด" => Some(Verdict::Incorrect),
            _ => None,
        }
    }
}

/// Presentation hint emitted with every accepted transition. The UI maps it to its success and
/// failure animations; the state machine never reads it back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Cue {
    Advance,
    Retry,
    Complete,
}

/// One logged submission, as sent to the webhook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub group_name: String,
    pub classroom: String,
    pub stage: u8,
    pub answer: f64,
    pub result: Verdict,
    /// Formatted elapsed time. Empty except on stage 5.
    pub time_used: String,
}

/// The client-facing snapshot of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionView {
    pub phase: Phase,
    pub group_name: String,
    pub room: String,
    pub started_at: Option<DateTime<Utc>>,
    pub badges: Vec<u8>,
    pub hints_used: Vec<u8>,
    pub answer_inputs: Vec<Option<f64>>,
    pub completed: bool,
    pub completion_duration: Option<String>,
}

/// A session that has not registered yet, with one empty input per stage.
impl Default for SessionView {
    fn default() -> Self {
        Self {
            phase: Phase::Registration,
            group_name: String::new(),
            room: String::new(),
            started_at: None,
            badges: Vec::new(),
            hints_used: Vec::new(),
            answer_inputs: vec![None; STAGE_COUNT as usize],
            completed: false,
            completion_duration: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitOutcome {
    pub session: SessionView,
    pub verdict: Verdict,
    pub cue: Cue,
    /// Set when the attempt could not be delivered to the webhook.
    pub delivery_error: Option<String>,
}

/// One row of the published results sheet. Every column is optional in the source, so missing
/// cells come through as empty strings or `None`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LogRow {
    pub group_name: String,
    pub classroom: String,
    pub stage: Option<u8>,
    pub answer: String,
    pub result: String,
    pub time_used: String,
    pub timestamp: Option<NaiveDateTime>,
}

impl LogRow {
    pub fn verdict(&self) -> Option<Verdict> {
        Verdict::from_label(&self.result)
    }

    pub fn is_correct(&self) -> bool {
        self.verdict() == Some(Verdict::Correct)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub rank: usize,
    pub group_name: String,
    pub classroom: String,
    pub best_seconds: u32,
    pub best_time: String,
}

/// One row per group and classroom with the latest correct answer for each stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupSummary {
    pub group_name: String,
    pub classroom: String,
    pub answers: Vec<Option<String>>,
    pub time_used: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DashboardSummary {
    pub group_count: usize,
    pub total_records: usize,
    pub correct: usize,
    pub incorrect: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageTally {
    pub stage: u8,
    pub correct: usize,
    pub incorrect: usize,
}

/// Group and classroom selection for the dashboard. An empty list selects everything.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LogFilter {
    pub groups: Vec<String>,
    pub rooms: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dashboard {
    pub summary: DashboardSummary,
    pub leaderboard: Vec<LeaderboardEntry>,
    pub group_summaries: Vec<GroupSummary>,
    pub stage_tallies: Vec<StageTally>,
    pub rows: Vec<LogRow>,
    pub all_groups: Vec<String>,
    pub all_rooms: Vec<String>,
    /// SVG QR code pointing players at the game, when a public URL is configured.
    pub join_qr_svg: Option<String>,
}
