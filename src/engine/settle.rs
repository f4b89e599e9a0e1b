//! Result settlement.
//!
//! For every published round of a result, the unsettled bets placed inside
//! that round's eligible window are resolved one at a time. A winning bet is
//! credited before it is marked, and the ledger refuses a second win entry
//! for the same bet, so an interrupted run can simply be repeated.

use chrono::{DateTime, NaiveDate, Utc};
use tracing::{info, warn};

use super::{Engine, SettleError};
use crate::Amount;
use crate::model::{Bet, BetId, DrawResult, NewEntry, Outcome, ResultId, Round, StakeNumber, UserId};
use crate::store::{Store, StoreError};

/// A bet paid out by a settlement run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WinDetail {
    pub bet: BetId,
    pub user: UserId,
    pub number: StakeNumber,
    pub stake: Amount,
    pub payout: Amount,
    pub round: Round,
}

/// A bet the run could not settle. It stays unsettled and is picked up by the next run.
#[derive(Debug)]
pub struct FailedBet {
    pub bet: BetId,
    pub user: UserId,
    pub round: Round,
    pub error: StoreError,
}

#[derive(Debug)]
pub struct SettlementReport {
    pub result: ResultId,
    pub date: NaiveDate,
    pub wins: Vec<WinDetail>,
    pub losses: usize,
    /// Bets another run settled between our query and our write.
    pub skipped: usize,
    pub failures: Vec<FailedBet>,
}

impl SettlementReport {
    fn new(result: &DrawResult) -> Self {
        Self {
            result: result.id,
            date: result.date,
            wins: Vec::new(),
            losses: 0,
            skipped: 0,
            failures: Vec::new(),
        }
    }

    pub fn wins_processed(&self) -> usize {
        self.wins.len()
    }

    pub fn total_paid(&self) -> Amount {
        self.wins.iter().map(|win| win.payout).sum()
    }

    /// No bet failed during the run.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

enum BetSettlement {
    Won(WinDetail),
    Lost,
    AlreadySettled,
}

impl<S: Store> Engine<S> {
    /// Settle a result at the current time.
    pub fn settle(&self, id: ResultId) -> Result<SettlementReport, SettleError> {
        self.settle_at(id, Utc::now())
    }

    /// Settle a result, stamping win entries with `now`.
    ///
    /// Safe to call repeatedly and concurrently: runs for the same result are
    /// serialized and every bet is resolved at most once. A failure on one bet
    /// is recorded in the report and does not abort the run.
    pub fn settle_at(
        &self,
        id: ResultId,
        now: DateTime<Utc>,
    ) -> Result<SettlementReport, SettleError> {
        let lock = self.locks.for_result(id);
        let report = {
            let _guard = lock.lock();
            self.settle_locked(id, now)
        };
        self.locks.release(id, lock);
        report
    }

    fn settle_locked(
        &self,
        id: ResultId,
        now: DateTime<Utc>,
    ) -> Result<SettlementReport, SettleError> {
        let result = self
            .store
            .result(id)?
            .ok_or(SettleError::ResultNotFound(id))?;
        let mut report = SettlementReport::new(&result);

        for (round, winning) in result.published() {
            let window = self.gate.schedule().eligible_window(round, result.date);
            let bets = self.store.unsettled_bets(round, window)?;

            for bet in bets {
                match self.settle_bet(&bet, winning, now) {
                    Ok(BetSettlement::Won(win)) => report.wins.push(win),
                    Ok(BetSettlement::Lost) => report.losses += 1,
                    Ok(BetSettlement::AlreadySettled) => report.skipped += 1,
                    Err(error) => {
                        warn!(bet = bet.id, user = bet.user, reason = %error, "bet settlement failed");
                        report.failures.push(FailedBet {
                            bet: bet.id,
                            user: bet.user,
                            round,
                            error,
                        });
                    }
                }
            }
        }

        info!(
            result = report.result,
            date = %report.date,
            wins = report.wins_processed(),
            losses = report.losses,
            paid = %report.total_paid(),
            failures = report.failures.len(),
            "settlement finished"
        );
        Ok(report)
    }

    /// Resolve one bet. Marking it settled is always the last write.
    fn settle_bet(
        &self,
        bet: &Bet,
        winning: StakeNumber,
        now: DateTime<Utc>,
    ) -> Result<BetSettlement, StoreError> {
        if bet.number != winning {
            return Ok(if self.store.mark_settled(bet.id, Outcome::Lost)? {
                BetSettlement::Lost
            } else {
                BetSettlement::AlreadySettled
            });
        }

        let payout = bet
            .amount
            .checked_mul(self.policy.payout_multiplier)
            .ok_or(StoreError::Overflow(bet.user))?;

        let payout = match self.store.post(NewEntry::win(bet, payout, now)) {
            Ok(posted) => {
                info!(user = bet.user, bet = bet.id, payout = %payout, balance = %posted.balance, "win credited");
                payout
            }
            // credited by an earlier run that stopped before marking
            Err(StoreError::AlreadyPosted(_)) => {
                let credited = self
                    .store
                    .win_entry_for(bet.id)?
                    .map_or(payout, |entry| entry.amount);
                info!(user = bet.user, bet = bet.id, payout = %credited, "win already credited");
                credited
            }
            Err(e) => return Err(e),
        };

        if !self.store.mark_settled(bet.id, Outcome::Won(payout))? {
            return Ok(BetSettlement::AlreadySettled);
        }

        Ok(BetSettlement::Won(WinDetail {
            bet: bet.id,
            user: bet.user,
            number: bet.number,
            stake: bet.amount,
            payout,
            round: bet.round,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configuration::Policy;
    use crate::model::{Account, BetRequest, LedgerEntry, NewBet, Posted, ResultPatch};
    use crate::schedule::Schedule;
    use crate::store::{AccountStore, BetStore, Ledger, MemoryStore, ResultFeed};
    use std::ops::Range;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Delegates to a memory store but refuses win postings for one user
    /// while `failing` is set.
    struct FlakyStore {
        inner: MemoryStore,
        victim: UserId,
        failing: AtomicBool,
    }

    impl AccountStore for FlakyStore {
        fn open_account(&self, user: UserId) -> Result<Account, StoreError> {
            self.inner.open_account(user)
        }
        fn account(&self, user: UserId) -> Result<Option<Account>, StoreError> {
            self.inner.account(user)
        }
        fn accounts(&self) -> Result<Vec<Account>, StoreError> {
            self.inner.accounts()
        }
    }

    impl Ledger for FlakyStore {
        fn entries_for(&self, user: UserId) -> Result<Vec<LedgerEntry>, StoreError> {
            self.inner.entries_for(user)
        }
        fn win_entry_for(&self, bet: BetId) -> Result<Option<LedgerEntry>, StoreError> {
            self.inner.win_entry_for(bet)
        }
    }

    impl BetStore for FlakyStore {
        fn bet(&self, id: BetId) -> Result<Option<Bet>, StoreError> {
            self.inner.bet(id)
        }
        fn bets_for_user(&self, user: UserId) -> Result<Vec<Bet>, StoreError> {
            self.inner.bets_for_user(user)
        }
        fn unsettled_bets(
            &self,
            round: Round,
            placed: Range<DateTime<Utc>>,
        ) -> Result<Vec<Bet>, StoreError> {
            self.inner.unsettled_bets(round, placed)
        }
        fn bets_between(
            &self,
            placed: Range<DateTime<Utc>>,
            round: Option<Round>,
        ) -> Result<Vec<Bet>, StoreError> {
            self.inner.bets_between(placed, round)
        }
        fn mark_settled(&self, id: BetId, outcome: Outcome) -> Result<bool, StoreError> {
            self.inner.mark_settled(id, outcome)
        }
    }

    impl ResultFeed for FlakyStore {
        fn result(&self, id: ResultId) -> Result<Option<DrawResult>, StoreError> {
            self.inner.result(id)
        }
        fn result_for_date(&self, date: NaiveDate) -> Result<Option<DrawResult>, StoreError> {
            self.inner.result_for_date(date)
        }
        fn results_between(
            &self,
            from: NaiveDate,
            to: NaiveDate,
        ) -> Result<Vec<DrawResult>, StoreError> {
            self.inner.results_between(from, to)
        }
        fn upsert_result(
            &self,
            date: NaiveDate,
            round1: Option<StakeNumber>,
            round2: Option<StakeNumber>,
        ) -> Result<DrawResult, StoreError> {
            self.inner.upsert_result(date, round1, round2)
        }
        fn update_result(
            &self,
            id: ResultId,
            patch: &ResultPatch,
        ) -> Result<Option<DrawResult>, StoreError> {
            self.inner.update_result(id, patch)
        }
        fn delete_result(&self, id: ResultId) -> Result<bool, StoreError> {
            self.inner.delete_result(id)
        }
    }

    impl Store for FlakyStore {
        fn post(&self, entry: NewEntry) -> Result<Posted, StoreError> {
            if entry.bet.is_some()
                && entry.user == self.victim
                && self.failing.load(Ordering::SeqCst)
            {
                return Err(StoreError::Corrupt("ledger unavailable".to_string()));
            }
            self.inner.post(entry)
        }
        fn stake(&self, bet: NewBet) -> Result<(Bet, Posted), StoreError> {
            self.inner.stake(bet)
        }
        fn withdraw(
            &self,
            entry: NewEntry,
            wins_since: DateTime<Utc>,
        ) -> Result<Posted, StoreError> {
            self.inner.withdraw(entry, wins_since)
        }
    }

    fn utc(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    #[test]
    fn failed_bet_does_not_abort_the_run_and_is_retried() {
        let store = FlakyStore {
            inner: MemoryStore::new(),
            victim: 2,
            failing: AtomicBool::new(true),
        };
        let engine = Engine::new(store, Schedule::default(), Policy::default());
        for user in [1, 2, 3] {
            engine.open_account(user).unwrap();
            engine
                .deposit(user, Amount::new(500), utc("2025-03-28T03:30:00Z"))
                .unwrap();
            engine
                .place_bet(
                    BetRequest {
                        user,
                        number: 42,
                        amount: Amount::new(10),
                        round: 1,
                    },
                    utc("2025-03-28T08:30:00Z"),
                )
                .unwrap();
        }
        let date = NaiveDate::from_ymd_opt(2025, 3, 28).unwrap();
        let result = engine.publish_result(date, Some(42), None).unwrap();
        let evening = utc("2025-03-28T12:30:00Z");

        let report = engine.settle_at(result.id, evening).unwrap();
        assert_eq!(report.wins_processed(), 2);
        assert!(!report.is_complete());
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].user, 2);
        assert_eq!(engine.store().balance(2).unwrap(), Amount::new(490));

        engine.store().failing.store(false, Ordering::SeqCst);
        let retry = engine.settle_at(result.id, evening).unwrap();
        assert!(retry.is_complete());
        assert_eq!(retry.wins_processed(), 1);
        assert_eq!(retry.wins[0].user, 2);
        assert_eq!(retry.total_paid(), Amount::new(800));

        for user in [1, 2, 3] {
            assert_eq!(engine.store().balance(user).unwrap(), Amount::new(1290));
        }
    }

    #[test]
    fn report_totals() {
        let engine = Engine::in_memory();
        engine.open_account(1).unwrap();
        engine
            .deposit(1, Amount::new(1000), utc("2025-03-28T03:30:00Z"))
            .unwrap();
        for (number, amount) in [(42, 100), (42, 25), (7, 10)] {
            engine
                .place_bet(
                    BetRequest {
                        user: 1,
                        number,
                        amount: Amount::new(amount),
                        round: 2,
                    },
                    utc("2025-03-28T10:30:00Z"),
                )
                .unwrap();
        }
        let date = NaiveDate::from_ymd_opt(2025, 3, 28).unwrap();
        let result = engine.publish_result(date, None, Some(42)).unwrap();

        let report = engine.settle_at(result.id, utc("2025-03-28T12:30:00Z")).unwrap();

        assert_eq!(report.date, date);
        assert_eq!(report.losses, 1);
        assert_eq!(report.skipped, 0);
        assert_eq!(report.total_paid(), Amount::new(125 * 80));
        assert!(report.wins.iter().all(|win| win.round == Round::Second));
    }

    #[test]
    fn credited_but_unmarked_bet_keeps_the_ledger_amount() {
        let engine = Engine::in_memory();
        engine.open_account(1).unwrap();
        engine
            .deposit(1, Amount::new(1000), utc("2025-03-28T03:30:00Z"))
            .unwrap();
        let bet = engine
            .place_bet(
                BetRequest {
                    user: 1,
                    number: 42,
                    amount: Amount::new(100),
                    round: 1,
                },
                utc("2025-03-28T08:30:00Z"),
            )
            .unwrap();
        let date = NaiveDate::from_ymd_opt(2025, 3, 28).unwrap();
        let result = engine.publish_result(date, Some(42), None).unwrap();

        // an earlier run credited at a different multiplier, then stopped
        let evening = utc("2025-03-28T12:30:00Z");
        engine
            .store()
            .post(NewEntry::win(&bet, Amount::new(7000), evening))
            .unwrap();

        let report = engine.settle_at(result.id, evening).unwrap();
        assert_eq!(report.wins_processed(), 1);
        assert_eq!(report.wins[0].payout, Amount::new(7000));

        let settled = engine.store().bet(bet.id).unwrap().unwrap();
        assert_eq!(settled.outcome, Some(Outcome::Won(Amount::new(7000))));
        assert_eq!(engine.store().balance(1).unwrap(), Amount::new(7900));
    }
}
