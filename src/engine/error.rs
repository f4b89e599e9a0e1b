//! Error types for engine operations.

use chrono::{DateTime, NaiveDate, Utc};
use thiserror::Error;

use crate::Amount;
use crate::gate::ClosedReason;
use crate::model::{ResultId, UserId};
use crate::store::StoreError;

/// Top-level error returned by [`Engine::apply`](super::Engine::apply).
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("bet rejected: {0}")]
    Bet(#[from] BetError),

    #[error("settlement failed: {0}")]
    Settle(#[from] SettleError),

    #[error("wallet operation rejected: {0}")]
    Wallet(#[from] WalletError),

    #[error("result update rejected: {0}")]
    Result(#[from] ResultError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Input validation failure, detected before the gate is consulted.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StakeError {
    #[error("number {0} is outside 00-99")]
    NumberOutOfRange(u32),
    #[error("round {0} does not exist")]
    UnknownRound(u32),
    #[error("stake {amount} is below the minimum of {min}")]
    BelowMinimum { amount: Amount, min: Amount },
    #[error("stake {amount} is above the maximum of {max}")]
    AboveMaximum { amount: Amount, max: Amount },
}

/// Rejection of a bet. Nothing is persisted when one of these is returned.
#[derive(Debug, Error)]
pub enum BetError {
    #[error("invalid stake: {0}")]
    InvalidStake(#[from] StakeError),

    #[error("market closed: {0}")]
    MarketClosed(ClosedReason),

    #[error("insufficient balance: available {available}, requested {requested}")]
    InsufficientBalance { available: Amount, requested: Amount },

    #[error("account {0} does not exist")]
    UnknownAccount(UserId),

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for BetError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::InsufficientBalance {
                available,
                requested,
                ..
            } => BetError::InsufficientBalance {
                available,
                requested,
            },
            StoreError::UnknownAccount(user) => BetError::UnknownAccount(user),
            other => BetError::Store(other),
        }
    }
}

#[derive(Debug, Error)]
pub enum SettleError {
    #[error("result {0} not found")]
    ResultNotFound(ResultId),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum WalletError {
    #[error("amount {amount} is below the minimum of {min}")]
    BelowMinimum { amount: Amount, min: Amount },

    #[error("insufficient balance: available {available}, requested {requested}")]
    InsufficientBalance { available: Amount, requested: Amount },

    #[error("withdrawals are locked until {until} after a recent win")]
    WithdrawalLocked { until: DateTime<Utc> },

    #[error("account {0} does not exist")]
    UnknownAccount(UserId),

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for WalletError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::InsufficientBalance {
                available,
                requested,
                ..
            } => WalletError::InsufficientBalance {
                available,
                requested,
            },
            StoreError::UnknownAccount(user) => WalletError::UnknownAccount(user),
            other => WalletError::Store(other),
        }
    }
}

#[derive(Debug, Error)]
pub enum ResultError {
    #[error("winning number {0} is outside 00-99")]
    NumberOutOfRange(u32),

    #[error("result {0} not found")]
    NotFound(ResultId),

    #[error("a result for {0} already exists")]
    DuplicateDate(NaiveDate),

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for ResultError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::DuplicateDate(date) => ResultError::DuplicateDate(date),
            other => ResultError::Store(other),
        }
    }
}
