//! Betting engine.
//!
//! Enforces the betting window when bets are placed, moves money through the
//! store's atomic postings, administers results and settles them.
//! Also supports an async stream of journal commands.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use std::fmt::Display;
use tokio_stream::{Stream, StreamExt};
use tracing::{info, warn};

use crate::Amount;
use crate::configuration::Policy;
use crate::gate::{BettingStatus, Gate};
use crate::model::{
    Account, Bet, BetRequest, Command, DrawResult, LedgerEntry, NewBet, NewEntry, ResultId,
    ResultPatch, Round, StakeNumber, UserId,
};
use crate::schedule::Schedule;
use crate::store::{MemoryStore, Store, StoreError};

mod state;
use state::SettlementLocks;

mod settle;
pub use settle::{FailedBet, SettlementReport, WinDetail};

mod error;
pub use error::{BetError, EngineError, ResultError, SettleError, StakeError, WalletError};

/// The betting engine. All operations take `&self`; share it behind an `Arc`.
pub struct Engine<S> {
    store: S,
    gate: Gate,
    policy: Policy,
    locks: SettlementLocks,
}

impl Engine<MemoryStore> {
    /// Engine over a fresh in-memory store with the default schedule and policy.
    pub fn in_memory() -> Self {
        Self::new(MemoryStore::new(), Schedule::default(), Policy::default())
    }
}

/// Public API
impl<S: Store> Engine<S> {
    pub fn new(store: S, schedule: Schedule, policy: Policy) -> Self {
        Self {
            store,
            gate: Gate::new(schedule),
            policy,
            locks: SettlementLocks::default(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn gate(&self) -> &Gate {
        &self.gate
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    /// Run the engine over a stream of journal commands
    pub async fn run(&self, mut stream: impl Stream<Item = Command> + Unpin) {
        while let Some(command) = stream.next().await {
            // a rejected command must not stop the replay
            if let Err(e) = self.apply(command) {
                warn!(reason = %e, "command skipped");
            }
        }
    }

    /// Apply a single journal command
    pub fn apply(&self, command: Command) -> Result<(), EngineError> {
        match command {
            Command::OpenAccount { user } => {
                self.open_account(user)?;
            }
            Command::Deposit { user, amount, at } => {
                self.deposit(user, amount, at)?;
            }
            Command::Withdraw { user, amount, at } => {
                self.withdraw(user, amount, at)?;
            }
            Command::PlaceBet { request, at } => {
                self.place_bet(request, at)?;
            }
            Command::PublishResult {
                date,
                round1,
                round2,
            } => {
                self.publish_result(date, round1, round2)?;
            }
            Command::Settle { result, at } => {
                self.settle_at(result, at)?;
            }
        }
        Ok(())
    }

    /// Advisory status of both rounds. Placement re-checks on its own.
    pub fn betting_status(&self, now: DateTime<Utc>) -> BettingStatus {
        self.gate.status(now)
    }

    pub fn open_account(&self, user: UserId) -> Result<Account, StoreError> {
        let result = self.store.open_account(user);
        Self::log_result("open account", user, None, &result);
        result
    }

    /// Credit a deposit. Returns the new balance.
    pub fn deposit(
        &self,
        user: UserId,
        amount: Amount,
        now: DateTime<Utc>,
    ) -> Result<Amount, WalletError> {
        let result = self.apply_deposit(user, amount, now);
        Self::log_result("deposit", user, Some(amount), &result);
        result
    }

    /// Debit a withdrawal. Returns the new balance.
    pub fn withdraw(
        &self,
        user: UserId,
        amount: Amount,
        now: DateTime<Utc>,
    ) -> Result<Amount, WalletError> {
        let result = self.apply_withdrawal(user, amount, now);
        Self::log_result("withdrawal", user, Some(amount), &result);
        result
    }

    /// Place a bet at server time `now`.
    ///
    /// Input is validated first, then the gate is checked, then the stake is
    /// debited and the bet persisted in one store unit. Any rejection leaves
    /// no trace.
    pub fn place_bet(&self, request: BetRequest, now: DateTime<Utc>) -> Result<Bet, BetError> {
        let (user, amount) = (request.user, request.amount);
        let result = self.apply_bet(request, now);
        Self::log_result("bet", user, Some(amount), &result);
        result
    }

    /// A user's bets, newest first.
    pub fn bet_history(&self, user: UserId) -> Result<Vec<Bet>, StoreError> {
        self.store.bets_for_user(user)
    }

    /// A user's ledger entries, newest first.
    pub fn transactions(&self, user: UserId) -> Result<Vec<LedgerEntry>, StoreError> {
        self.store.entries_for(user)
    }

    pub fn accounts(&self) -> Result<Vec<Account>, StoreError> {
        self.store.accounts()
    }

    /// Create the result for `date` or publish into the existing one.
    /// A round given as `None` keeps whatever was published before.
    pub fn publish_result(
        &self,
        date: NaiveDate,
        round1: Option<u32>,
        round2: Option<u32>,
    ) -> Result<DrawResult, ResultError> {
        let round1 = round1.map(Self::winning_number).transpose()?;
        let round2 = round2.map(Self::winning_number).transpose()?;
        let result = self.store.upsert_result(date, round1, round2)?;
        info!(
            result = result.id,
            date = %result.date,
            round1 = ?result.round1.map(StakeNumber::value),
            round2 = ?result.round2.map(StakeNumber::value),
            "result published"
        );
        Ok(result)
    }

    pub fn update_result(
        &self,
        id: ResultId,
        patch: &ResultPatch,
    ) -> Result<DrawResult, ResultError> {
        self.store
            .update_result(id, patch)?
            .ok_or(ResultError::NotFound(id))
    }

    pub fn delete_result(&self, id: ResultId) -> Result<(), ResultError> {
        if self.store.delete_result(id)? {
            Ok(())
        } else {
            Err(ResultError::NotFound(id))
        }
    }

    pub fn results_between(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<DrawResult>, StoreError> {
        self.store.results_between(from, to)
    }

    /// Bets placed on local dates `from..=to`, oldest first, optionally for one round.
    pub fn bets_between(
        &self,
        from: NaiveDate,
        to: NaiveDate,
        round: Option<Round>,
    ) -> Result<Vec<Bet>, StoreError> {
        let schedule = self.gate.schedule();
        let end = to
            .succ_opt()
            .map_or(DateTime::<Utc>::MAX_UTC, |next| schedule.day_start(next));
        self.store.bets_between(schedule.day_start(from)..end, round)
    }
}

/// Private API
impl<S: Store> Engine<S> {
    /// Small helper to log operation results
    fn log_result<T, E: Display>(
        op: &str,
        user: UserId,
        amount: Option<Amount>,
        result: &Result<T, E>,
    ) {
        match (result, amount) {
            (Ok(_), Some(amt)) => info!(user, amount = %amt, "{op} applied"),
            (Ok(_), None) => info!(user, "{op} applied"),
            (Err(e), Some(amt)) => info!(user, amount = %amt, reason = %e, "{op} skipped"),
            (Err(e), None) => info!(user, reason = %e, "{op} skipped"),
        }
    }

    fn winning_number(n: u32) -> Result<StakeNumber, ResultError> {
        StakeNumber::new(n).ok_or(ResultError::NumberOutOfRange(n))
    }

    /// Check the raw request against the stake policy
    fn validate(&self, request: &BetRequest) -> Result<(StakeNumber, Round), StakeError> {
        let number = StakeNumber::new(request.number)
            .ok_or(StakeError::NumberOutOfRange(request.number))?;
        let round =
            Round::from_number(request.round).ok_or(StakeError::UnknownRound(request.round))?;

        if request.amount < self.policy.min_stake {
            return Err(StakeError::BelowMinimum {
                amount: request.amount,
                min: self.policy.min_stake,
            });
        }
        if request.amount > self.policy.max_stake {
            return Err(StakeError::AboveMaximum {
                amount: request.amount,
                max: self.policy.max_stake,
            });
        }

        Ok((number, round))
    }

    fn apply_bet(&self, request: BetRequest, now: DateTime<Utc>) -> Result<Bet, BetError> {
        let (number, round) = self.validate(&request)?;

        self.gate
            .check(now, round)
            .map_err(BetError::MarketClosed)?;

        let (bet, posted) = self.store.stake(NewBet {
            user: request.user,
            number,
            amount: request.amount,
            round,
            placed_at: now,
        })?;

        info!(
            user = bet.user,
            bet = bet.id,
            number = %bet.number,
            round = bet.round.number(),
            balance = %posted.balance,
            "bet placed"
        );
        Ok(bet)
    }

    fn apply_deposit(
        &self,
        user: UserId,
        amount: Amount,
        now: DateTime<Utc>,
    ) -> Result<Amount, WalletError> {
        if amount < self.policy.min_deposit {
            return Err(WalletError::BelowMinimum {
                amount,
                min: self.policy.min_deposit,
            });
        }
        let posted = self.store.post(NewEntry::deposit(user, amount, now))?;
        Ok(posted.balance)
    }

    /// Apply a withdrawal:
    /// - Ensure the amount reaches the minimum
    /// - Refuse if the balance does not cover it
    /// - Refuse while a recent win is inside the cooldown
    ///
    /// The last two checks and the debit are one store unit.
    fn apply_withdrawal(
        &self,
        user: UserId,
        amount: Amount,
        now: DateTime<Utc>,
    ) -> Result<Amount, WalletError> {
        if amount < self.policy.min_withdrawal {
            return Err(WalletError::BelowMinimum {
                amount,
                min: self.policy.min_withdrawal,
            });
        }

        let cooldown = Duration::minutes(self.policy.withdrawal_cooldown_minutes);
        match self
            .store
            .withdraw(NewEntry::withdrawal(user, amount, now), now - cooldown)
        {
            Ok(posted) => Ok(posted.balance),
            Err(StoreError::RecentWin { at, .. }) => Err(WalletError::WithdrawalLocked {
                until: at + cooldown,
            }),
            Err(e) => Err(e.into()),
        }
    }
}
