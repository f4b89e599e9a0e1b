//! Persistence collaborators of the engine.
//!
//! Reads go through the per-concern traits. Writes that touch a balance are
//! exposed only as whole units on [`Store`] so that a balance and its ledger
//! never diverge.

use chrono::{DateTime, NaiveDate, Utc};
use std::ops::Range;
use thiserror::Error;

use crate::Amount;
use crate::model::{
    Account, Bet, BetId, DrawResult, LedgerEntry, NewBet, NewEntry, Outcome, Posted, ResultId,
    ResultPatch, Round, StakeNumber, UserId,
};

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("account {0} does not exist")]
    UnknownAccount(UserId),

    #[error("account {0} already exists")]
    AccountExists(UserId),

    #[error("insufficient balance for account {user}: available {available}, requested {requested}")]
    InsufficientBalance {
        user: UserId,
        available: Amount,
        requested: Amount,
    },

    #[error("account {user} received a win at {at}")]
    RecentWin { user: UserId, at: DateTime<Utc> },

    #[error("win for bet {0} was already posted")]
    AlreadyPosted(BetId),

    #[error("bet {0} does not exist")]
    UnknownBet(BetId),

    #[error("a result for {0} already exists")]
    DuplicateDate(NaiveDate),

    #[error("timestamp {0} cannot be stored")]
    TimestampOutOfRange(DateTime<Utc>),

    #[error("balance overflow for account {0}")]
    Overflow(UserId),

    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("corrupt row: {0}")]
    Corrupt(String),
}

pub trait AccountStore {
    fn open_account(&self, user: UserId) -> Result<Account, StoreError>;

    fn account(&self, user: UserId) -> Result<Option<Account>, StoreError>;

    /// All accounts ordered by id.
    fn accounts(&self) -> Result<Vec<Account>, StoreError>;

    fn balance(&self, user: UserId) -> Result<Amount, StoreError> {
        self.account(user)?
            .map(|account| account.balance)
            .ok_or(StoreError::UnknownAccount(user))
    }
}

pub trait Ledger {
    /// A user's entries, newest first.
    fn entries_for(&self, user: UserId) -> Result<Vec<LedgerEntry>, StoreError>;

    /// The `win` entry posted for a bet, if any.
    fn win_entry_for(&self, bet: BetId) -> Result<Option<LedgerEntry>, StoreError>;
}

pub trait BetStore {
    fn bet(&self, id: BetId) -> Result<Option<Bet>, StoreError>;

    /// A user's bets, newest first.
    fn bets_for_user(&self, user: UserId) -> Result<Vec<Bet>, StoreError>;

    /// Unsettled bets on `round` placed inside `placed`, ordered by placement.
    fn unsettled_bets(
        &self,
        round: Round,
        placed: Range<DateTime<Utc>>,
    ) -> Result<Vec<Bet>, StoreError>;

    /// Bets placed inside `placed`, optionally on one round only, ordered by placement.
    fn bets_between(
        &self,
        placed: Range<DateTime<Utc>>,
        round: Option<Round>,
    ) -> Result<Vec<Bet>, StoreError>;

    /// Record the outcome of a bet if it has none yet.
    ///
    /// Returns `false` when the bet was already settled; the stored outcome is left untouched.
    fn mark_settled(&self, id: BetId, outcome: Outcome) -> Result<bool, StoreError>;
}

pub trait ResultFeed {
    fn result(&self, id: ResultId) -> Result<Option<DrawResult>, StoreError>;

    fn result_for_date(&self, date: NaiveDate) -> Result<Option<DrawResult>, StoreError>;

    /// Results with `from <= date <= to`, newest first.
    fn results_between(&self, from: NaiveDate, to: NaiveDate)
    -> Result<Vec<DrawResult>, StoreError>;

    /// Create the result for `date`, or publish into the existing one.
    ///
    /// A round passed as `None` keeps its stored number; clearing a round goes
    /// through [`ResultFeed::update_result`].
    fn upsert_result(
        &self,
        date: NaiveDate,
        round1: Option<StakeNumber>,
        round2: Option<StakeNumber>,
    ) -> Result<DrawResult, StoreError>;

    fn update_result(
        &self,
        id: ResultId,
        patch: &ResultPatch,
    ) -> Result<Option<DrawResult>, StoreError>;

    fn delete_result(&self, id: ResultId) -> Result<bool, StoreError>;
}

/// Everything the engine needs, plus the atomic write units.
pub trait Store: AccountStore + Ledger + BetStore + ResultFeed + Send + Sync {
    /// Apply `entry.amount` to the owner's balance and append the entry, as one unit.
    ///
    /// Fails with [`StoreError::InsufficientBalance`] if a debit would take the
    /// balance below zero, and with [`StoreError::AlreadyPosted`] if `entry` is a
    /// win for a bet that already has one.
    fn post(&self, entry: NewEntry) -> Result<Posted, StoreError>;

    /// Debit the stake, persist the bet and append its `bet` entry, as one unit.
    ///
    /// The debit is conditional on the balance covering the stake.
    fn stake(&self, bet: NewBet) -> Result<(Bet, Posted), StoreError>;

    /// Post a withdrawal debit unless the owner received a win after `wins_since`.
    ///
    /// The balance is checked first, so an uncovered withdrawal fails with
    /// [`StoreError::InsufficientBalance`] even inside the cooldown. A recent
    /// win fails with [`StoreError::RecentWin`] carrying the latest win time.
    fn withdraw(&self, entry: NewEntry, wins_since: DateTime<Utc>) -> Result<Posted, StoreError>;
}
