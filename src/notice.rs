//! Advisory notices for a user once a result is out.
//!
//! Purely presentational. Settlement never reads these.

use crate::Amount;
use crate::model::{Bet, DrawResult, Round, StakeNumber};
use crate::schedule::Schedule;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// At least one bet matched; `total` is the sum of expected payouts.
    Win {
        round: Round,
        number: StakeNumber,
        total: Amount,
    },
    /// A bet missed by one step in a single digit.
    NearMiss {
        round: Round,
        number: StakeNumber,
        winning: StakeNumber,
    },
}

/// Notices for one user's `bets` against `result`, at most one of each kind per round.
pub fn notices(
    bets: &[Bet],
    result: &DrawResult,
    schedule: &Schedule,
    payout_multiplier: u32,
) -> Vec<Notice> {
    let mut notices = Vec::new();

    for (round, winning) in result.published() {
        let window = schedule.eligible_window(round, result.date);
        let relevant: Vec<&Bet> = bets
            .iter()
            .filter(|bet| bet.round == round && window.contains(&bet.placed_at))
            .collect();

        let total: Amount = relevant
            .iter()
            .filter(|bet| bet.number == winning)
            .filter_map(|bet| bet.amount.checked_mul(payout_multiplier))
            .sum();
        if total.is_positive() {
            notices.push(Notice::Win {
                round,
                number: winning,
                total,
            });
        }

        if let Some(bet) = relevant.iter().find(|bet| bet.number.is_near_miss(winning)) {
            notices.push(Notice::NearMiss {
                round,
                number: bet.number,
                winning,
            });
        }
    }

    notices
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn n(v: u32) -> StakeNumber {
        StakeNumber::new(v).unwrap()
    }

    fn bet(id: u32, number: u32, amount: i64, round: Round, at: &str) -> Bet {
        Bet {
            id,
            user: 1,
            number: n(number),
            amount: Amount::new(amount),
            round,
            placed_at: at.parse().unwrap(),
            outcome: None,
        }
    }

    fn result(round1: Option<u32>, round2: Option<u32>) -> DrawResult {
        DrawResult {
            id: 1,
            date: NaiveDate::from_ymd_opt(2025, 3, 28).unwrap(),
            round1: round1.map(n),
            round2: round2.map(n),
        }
    }

    #[test]
    fn wins_are_summed_per_round() {
        let bets = [
            bet(1, 42, 100, Round::First, "2025-03-28T08:30:00Z"),
            bet(2, 42, 10, Round::First, "2025-03-28T09:00:00Z"),
            bet(3, 42, 10, Round::Second, "2025-03-28T09:00:00Z"),
        ];
        let found = notices(&bets, &result(Some(42), None), &Schedule::default(), 80);
        assert_eq!(
            found,
            vec![Notice::Win {
                round: Round::First,
                number: n(42),
                total: Amount::new(8800),
            }]
        );
    }

    #[test]
    fn near_miss_is_reported_once() {
        let bets = [
            bet(1, 43, 10, Round::Second, "2025-03-28T10:30:00Z"),
            bet(2, 32, 10, Round::Second, "2025-03-28T10:40:00Z"),
        ];
        let found = notices(&bets, &result(None, Some(42)), &Schedule::default(), 80);
        assert_eq!(
            found,
            vec![Notice::NearMiss {
                round: Round::Second,
                number: n(43),
                winning: n(42),
            }]
        );
    }

    #[test]
    fn bets_outside_the_window_are_ignored() {
        // placed after the round 1 cutoff
        let bets = [bet(1, 42, 100, Round::First, "2025-03-28T10:00:00Z")];
        assert!(notices(&bets, &result(Some(42), None), &Schedule::default(), 80).is_empty());
    }
}
