use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::model::{AttemptRecord, Cue, Phase, SessionView, Verdict};
use crate::stage::{self, Verification, STAGE_COUNT};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("Please enter both a group name and a classroom before starting.")]
    MissingRegistration,
    #[error("This group has already started the game.")]
    AlreadyStarted,
    #[error("No stage is in progress.")]
    NotInStage,
    #[error("The answer was checked for stage {checked}, but the game is on stage {current}.")]
    StaleSubmission { checked: u8, current: u8 },
    #[error("Play again is only available once all stages are complete.")]
    NotFinished,
}

/// The effect of one answer submission.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub from: Phase,
    pub to: Phase,
    pub verdict: Verdict,
    pub cue: Cue,
    /// The attempt to append to the results log.
    pub record: AttemptRecord,
}

/// One group's run through the game. Every mutation goes through the transition methods below.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Session {
    pub phase: Phase,
    pub group_name: String,
    pub room: String,
    pub started_at: Option<DateTime<Utc>>,
    pub badges: BTreeSet<u8>,
    pub hints_used: BTreeSet<u8>,
    pub answer_inputs: [Option<f64>; STAGE_COUNT as usize],
    pub completed: bool,
    pub completion_duration: Option<String>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// The stage being played, if any.
    pub fn current_stage(&self) -> Option<u8> {
        match self.phase {
            Phase::Stage(n) => Some(n),
            _ => None,
        }
    }

    /// Registration -> Stage(1). Names are trimmed; both must be non-empty. A rejected
    /// registration leaves the session untouched.
    pub fn register(
        &mut self,
        group_name: &str,
        room: &str,
        now: DateTime<Utc>,
    ) -> Result<(), SessionError> {
        if self.phase != Phase::Registration {
            return Err(SessionError::AlreadyStarted);
        }
        let group_name = group_name.trim();
        let room = room.trim();
        if group_name.is_empty() || room.is_empty() {
            return Err(SessionError::MissingRegistration);
        }

        *self = Session {
            phase: Phase::Stage(1),
            group_name: group_name.to_string(),
            room: room.to_string(),
            started_at: Some(now),
            ..Session::default()
        };
        Ok(())
    }

    /// Applies a checked answer to the current stage.
    ///
    /// A correct answer unlocks the stage's badge and moves on: to the next stage, or from the
    /// final stage to the summary, recording the elapsed time. A wrong answer leaves the session
    /// on the same stage. Either way the returned transition carries the attempt to log.
    pub fn submit_answer(
        &mut self,
        verification: &Verification,
        now: DateTime<Utc>,
    ) -> Result<Transition, SessionError> {
        let current = self.current_stage().ok_or(SessionError::NotInStage)?;
        if verification.stage != current {
            return Err(SessionError::StaleSubmission {
                checked: verification.stage,
                current,
            });
        }

        let from = self.phase;
        let slot = usize::from(current - 1);
        self.answer_inputs[slot] = Some(verification.submitted);

        let time_used = if current == STAGE_COUNT {
            format_elapsed(self.elapsed_seconds(now))
        } else {
            String::new()
        };
        let verdict = if verification.correct {
            Verdict::Correct
        } else {
            Verdict::Incorrect
        };
        let record = AttemptRecord {
            group_name: self.group_name.clone(),
            classroom: self.room.clone(),
            stage: current,
            answer: verification.submitted,
            result: verdict,
            time_used: time_used.clone(),
        };

        if !verification.correct {
            return Ok(Transition {
                from,
                to: from,
                verdict,
                cue: Cue::Retry,
                record,
            });
        }

        self.badges.insert(current);
        let cue = if current < STAGE_COUNT {
            self.phase = Phase::Stage(current + 1);
            self.answer_inputs[slot + 1] = None;
            Cue::Advance
        } else {
            self.phase = Phase::Summary;
            self.completed = true;
            self.completion_duration = Some(time_used);
            Cue::Complete
        };

        Ok(Transition {
            from,
            to: self.phase,
            verdict,
            cue,
            record,
        })
    }

    /// Marks the current stage's hint as used and returns it.
    pub fn use_hint(&mut self) -> Result<&'static str, SessionError> {
        let current = self.current_stage().ok_or(SessionError::NotInStage)?;
        let definition = stage::stage(current).ok_or(SessionError::NotInStage)?;
        self.hints_used.insert(current);
        Ok(definition.hint)
    }

    /// Summary -> Registration, clearing everything.
    pub fn play_again(&mut self) -> Result<(), SessionError> {
        if self.phase != Phase::Summary {
            return Err(SessionError::NotFinished);
        }
        *self = Session::default();
        Ok(())
    }

    /// Whole seconds since registration, or 0 before the game starts.
    pub fn elapsed_seconds(&self, now: DateTime<Utc>) -> u64 {
        self.started_at
            .map(|start| (now - start).num_seconds().max(0) as u64)
            .unwrap_or(0)
    }

    pub fn view(&self) -> SessionView {
        SessionView {
            phase: self.phase,
            group_name: self.group_name.clone(),
            room: self.room.clone(),
            started_at: self.started_at,
            badges: self.badges.iter().copied().collect(),
            hints_used: self.hints_used.iter().copied().collect(),
            answer_inputs: self.answer_inputs.to_vec(),
            completed: self.completed,
            completion_duration: self.completion_duration.clone(),
        }
    }
}

/// Formats elapsed seconds as "M minutes S seconds".
pub fn format_elapsed(seconds: u64) -> String {
    format!("{} minutes {} seconds", seconds / 60, seconds % 60)
}
