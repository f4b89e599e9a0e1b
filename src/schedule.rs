//! Draw calendar: operating timezone, rest day and per-round cutoffs.
//!
//! Instants are always `DateTime<Utc>`; calendar dates are local to the
//! operating timezone.

use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveTime, Utc, Weekday};
use std::ops::Range;

use crate::model::Round;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schedule {
    offset: FixedOffset,
    rest_day: Weekday,
    cutoffs: [NaiveTime; 2],
}

impl Schedule {
    pub fn new(offset: FixedOffset, rest_day: Weekday, round1: NaiveTime, round2: NaiveTime) -> Self {
        Self {
            offset,
            rest_day,
            cutoffs: [round1, round2],
        }
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    pub fn rest_day(&self) -> Weekday {
        self.rest_day
    }

    /// Local calendar date of an instant.
    pub fn local_date(&self, instant: DateTime<Utc>) -> NaiveDate {
        instant.with_timezone(&self.offset).date_naive()
    }

    pub fn is_rest_day(&self, date: NaiveDate) -> bool {
        date.weekday() == self.rest_day
    }

    pub fn cutoff_time(&self, round: Round) -> NaiveTime {
        match round {
            Round::First => self.cutoffs[0],
            Round::Second => self.cutoffs[1],
        }
    }

    /// Instant at which `round` closes on `date`.
    pub fn cutoff(&self, round: Round, date: NaiveDate) -> DateTime<Utc> {
        self.to_utc(date, self.cutoff_time(round))
    }

    /// Local midnight of `date`.
    pub fn day_start(&self, date: NaiveDate) -> DateTime<Utc> {
        self.to_utc(date, NaiveTime::MIN)
    }

    /// Placement instants eligible for `round` on `date`: local midnight up to, excluding, the cutoff.
    pub fn eligible_window(&self, round: Round, date: NaiveDate) -> Range<DateTime<Utc>> {
        self.day_start(date)..self.cutoff(round, date)
    }

    /// First draw date on or after `from` that is not the rest day.
    pub fn next_draw_date(&self, from: NaiveDate) -> NaiveDate {
        from.iter_days()
            .find(|date| !self.is_rest_day(*date))
            .unwrap_or(from)
    }

    fn to_utc(&self, date: NaiveDate, time: NaiveTime) -> DateTime<Utc> {
        let local = date.and_time(time);
        let shift = Duration::seconds(i64::from(self.offset.local_minus_utc()));
        (local - shift).and_utc()
    }
}

const IST: FixedOffset = match FixedOffset::east_opt(5 * 3600 + 30 * 60) {
    Some(offset) => offset,
    None => panic!("invalid IST offset"),
};

const ROUND1_CUTOFF: NaiveTime = match NaiveTime::from_hms_opt(15, 30, 0) {
    Some(time) => time,
    None => panic!("invalid round 1 cutoff"),
};

const ROUND2_CUTOFF: NaiveTime = match NaiveTime::from_hms_opt(16, 30, 0) {
    Some(time) => time,
    None => panic!("invalid round 2 cutoff"),
};

impl Default for Schedule {
    /// IST, closed on Sundays, round 1 at 15:30, round 2 at 16:30.
    fn default() -> Self {
        Self::new(IST, Weekday::Sun, ROUND1_CUTOFF, ROUND2_CUTOFF)
    }
}
