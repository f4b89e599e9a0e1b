//! Betting window gate.
//!
//! Decides from the server clock alone whether a round accepts new bets. The
//! same evaluation backs the advisory status shown to clients and the
//! authoritative check performed when a bet is placed.

use chrono::{DateTime, NaiveDate, Utc};
use std::fmt;

use crate::model::Round;
use crate::schedule::Schedule;

/// Why a round is not accepting bets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClosedReason {
    /// The whole local day is the weekly rest day.
    RestDay,
    /// Today's cutoff for the round has passed.
    PastCutoff,
}

impl fmt::Display for ClosedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClosedReason::RestDay => f.write_str("market closed for the week, no draws today"),
            ClosedReason::PastCutoff => {
                f.write_str("betting closed for this round, wait for the next round or day")
            }
        }
    }
}

/// Status of one round at a given instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowStatus {
    pub round: Round,
    pub open: bool,
    pub reason: Option<ClosedReason>,
    /// Today's cutoff for the round.
    pub cutoff: DateTime<Utc>,
    /// Draw a bet would target if accepted now. Informational.
    pub draw_date: NaiveDate,
}

impl WindowStatus {
    pub fn message(&self) -> String {
        match self.reason {
            None => "betting is open".to_string(),
            Some(reason) => reason.to_string(),
        }
    }
}

/// Status of both rounds, as polled by clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BettingStatus {
    pub current_time: DateTime<Utc>,
    pub today: NaiveDate,
    pub round1: WindowStatus,
    pub round2: WindowStatus,
    pub is_rest_day: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Gate {
    schedule: Schedule,
}

impl Gate {
    pub fn new(schedule: Schedule) -> Self {
        Self { schedule }
    }

    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    /// Evaluate one round at `now`.
    pub fn window(&self, now: DateTime<Utc>, round: Round) -> WindowStatus {
        let today = self.schedule.local_date(now);
        let cutoff = self.schedule.cutoff(round, today);

        let reason = if self.schedule.is_rest_day(today) {
            Some(ClosedReason::RestDay)
        } else if now >= cutoff {
            Some(ClosedReason::PastCutoff)
        } else {
            None
        };

        let draw_date = match reason {
            None => today,
            Some(_) => today
                .succ_opt()
                .map(|tomorrow| self.schedule.next_draw_date(tomorrow))
                .unwrap_or(today),
        };

        WindowStatus {
            round,
            open: reason.is_none(),
            reason,
            cutoff,
            draw_date,
        }
    }

    /// `Ok` if `round` accepts bets at `now`.
    pub fn check(&self, now: DateTime<Utc>, round: Round) -> Result<(), ClosedReason> {
        match self.window(now, round).reason {
            None => Ok(()),
            Some(reason) => Err(reason),
        }
    }

    pub fn status(&self, now: DateTime<Utc>) -> BettingStatus {
        let today = self.schedule.local_date(now);
        BettingStatus {
            current_time: now,
            today,
            round1: self.window(now, Round::First),
            round2: self.window(now, Round::Second),
            is_rest_day: self.schedule.is_rest_day(today),
        }
    }
}
