//! Core domain types for the betting engine.

use chrono::{DateTime, NaiveDate, Utc};
use std::collections::BTreeMap;
use std::fmt;

use crate::Amount;

/// Account identifier.
pub type UserId = u32;

/// Bet identifier, assigned by the store.
pub type BetId = u32;

/// Result identifier, assigned by the store.
pub type ResultId = u32;

/// Ledger entry identifier, assigned by the store.
pub type EntryId = u32;

/// One of the two daily draws.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Round {
    First,
    Second,
}

impl Round {
    pub const ALL: [Round; 2] = [Round::First, Round::Second];

    pub fn number(self) -> u8 {
        match self {
            Round::First => 1,
            Round::Second => 2,
        }
    }

    pub fn from_number(n: u32) -> Option<Self> {
        match n {
            1 => Some(Round::First),
            2 => Some(Round::Second),
            _ => None,
        }
    }
}

impl fmt::Display for Round {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Round {}", self.number())
    }
}

/// A two-digit number in `00..=99`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StakeNumber(u8);

impl StakeNumber {
    pub fn new(n: u32) -> Option<Self> {
        (n <= 99).then_some(StakeNumber(n as u8))
    }

    pub fn value(self) -> u8 {
        self.0
    }

    /// (tens, units)
    pub fn digits(self) -> (u8, u8) {
        (self.0 / 10, self.0 % 10)
    }

    /// One digit off by exactly one, the other digit identical.
    /// Used for notification copy only.
    pub fn is_near_miss(self, winning: StakeNumber) -> bool {
        let (a1, a2) = self.digits();
        let (b1, b2) = winning.digits();
        let d1 = a1.abs_diff(b1);
        let d2 = a2.abs_diff(b2);
        (d1 == 1 && d2 == 0) || (d1 == 0 && d2 == 1)
    }
}

impl fmt::Display for StakeNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}", self.0)
    }
}

/// Settled state of a bet. A bet without an outcome has not been settled yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Won(Amount),
    Lost,
}

/// A persisted bet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bet {
    pub id: BetId,
    pub user: UserId,
    pub number: StakeNumber,
    pub amount: Amount,
    pub round: Round,
    /// Server clock at creation.
    pub placed_at: DateTime<Utc>,
    /// Write-once.
    pub outcome: Option<Outcome>,
}

impl Bet {
    pub fn is_settled(&self) -> bool {
        self.outcome.is_some()
    }

    /// `None` until settlement has run.
    pub fn is_win(&self) -> Option<bool> {
        self.outcome.map(|o| matches!(o, Outcome::Won(_)))
    }

    pub fn win_amount(&self) -> Amount {
        match self.outcome {
            Some(Outcome::Won(amount)) => amount,
            _ => Amount::ZERO,
        }
    }
}

/// A validated bet about to be persisted.
#[derive(Debug, Clone)]
pub struct NewBet {
    pub user: UserId,
    pub number: StakeNumber,
    pub amount: Amount,
    pub round: Round,
    pub placed_at: DateTime<Utc>,
}

impl NewBet {
    pub fn into_bet(self, id: BetId) -> Bet {
        Bet {
            id,
            user: self.user,
            number: self.number,
            amount: self.amount,
            round: self.round,
            placed_at: self.placed_at,
            outcome: None,
        }
    }
}

/// Untrusted bet input. Carries no timestamp: eligibility is decided on the server clock.
#[derive(Debug, Clone)]
pub struct BetRequest {
    pub user: UserId,
    pub number: u32,
    pub amount: Amount,
    pub round: u32,
}

/// Winning numbers for one calendar date.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrawResult {
    pub id: ResultId,
    /// Local date in the operating timezone.
    pub date: NaiveDate,
    pub round1: Option<StakeNumber>,
    pub round2: Option<StakeNumber>,
}

impl DrawResult {
    pub fn number(&self, round: Round) -> Option<StakeNumber> {
        match round {
            Round::First => self.round1,
            Round::Second => self.round2,
        }
    }

    /// Rounds whose winning number is known.
    pub fn published(&self) -> impl Iterator<Item = (Round, StakeNumber)> + '_ {
        Round::ALL
            .into_iter()
            .filter_map(|round| self.number(round).map(|n| (round, n)))
    }
}

/// Partial update of a result. `Some(None)` clears a round.
#[derive(Debug, Clone, Default)]
pub struct ResultPatch {
    pub date: Option<NaiveDate>,
    pub round1: Option<Option<StakeNumber>>,
    pub round2: Option<Option<StakeNumber>>,
}

impl ResultPatch {
    pub fn apply(&self, result: &mut DrawResult) {
        if let Some(date) = self.date {
            result.date = date;
        }
        if let Some(round1) = self.round1 {
            result.round1 = round1;
        }
        if let Some(round2) = self.round2 {
            result.round2 = round2;
        }
    }
}

/// Kind of balance-affecting event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    Bet,
    Win,
    Deposit,
    Withdraw,
}

impl EntryKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EntryKind::Bet => "bet",
            EntryKind::Win => "win",
            EntryKind::Deposit => "deposit",
            EntryKind::Withdraw => "withdraw",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "bet" => Some(EntryKind::Bet),
            "win" => Some(EntryKind::Win),
            "deposit" => Some(EntryKind::Deposit),
            "withdraw" => Some(EntryKind::Withdraw),
            _ => None,
        }
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Append-only ledger record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub id: EntryId,
    pub user: UserId,
    /// Signed: debits are negative.
    pub amount: Amount,
    pub kind: EntryKind,
    pub at: DateTime<Utc>,
    pub description: String,
    pub bet: Option<BetId>,
    /// Display only.
    pub metadata: BTreeMap<String, String>,
}

/// A ledger entry about to be posted.
#[derive(Debug, Clone)]
pub struct NewEntry {
    pub user: UserId,
    pub amount: Amount,
    pub kind: EntryKind,
    pub at: DateTime<Utc>,
    pub description: String,
    pub bet: Option<BetId>,
    pub metadata: BTreeMap<String, String>,
}

impl NewEntry {
    pub fn deposit(user: UserId, amount: Amount, at: DateTime<Utc>) -> Self {
        Self {
            user,
            amount,
            kind: EntryKind::Deposit,
            at,
            description: "Wallet deposit".to_string(),
            bet: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn withdrawal(user: UserId, amount: Amount, at: DateTime<Utc>) -> Self {
        Self {
            user,
            amount: -amount,
            kind: EntryKind::Withdraw,
            at,
            description: "Wallet withdrawal".to_string(),
            bet: None,
            metadata: BTreeMap::new(),
        }
    }

    /// Debit for a bet. The store fills in `bet` once the id is assigned.
    pub fn stake(bet: &NewBet) -> Self {
        Self {
            user: bet.user,
            amount: -bet.amount,
            kind: EntryKind::Bet,
            at: bet.placed_at,
            description: format!("Bet placed on number {} for {}", bet.number, bet.round),
            bet: None,
            metadata: bet_metadata(bet.number, bet.round),
        }
    }

    pub fn win(bet: &Bet, payout: Amount, at: DateTime<Utc>) -> Self {
        Self {
            user: bet.user,
            amount: payout,
            kind: EntryKind::Win,
            at,
            description: format!("Win on number {} for {}", bet.number, bet.round),
            bet: Some(bet.id),
            metadata: bet_metadata(bet.number, bet.round),
        }
    }

    pub fn into_entry(self, id: EntryId) -> LedgerEntry {
        LedgerEntry {
            id,
            user: self.user,
            amount: self.amount,
            kind: self.kind,
            at: self.at,
            description: self.description,
            bet: self.bet,
            metadata: self.metadata,
        }
    }
}

fn bet_metadata(number: StakeNumber, round: Round) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("number".to_string(), number.to_string()),
        ("round".to_string(), round.number().to_string()),
    ])
}

/// A user's wallet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Account {
    pub id: UserId,
    pub balance: Amount,
}

/// Outcome of a successful posting: the appended entry and the balance after it.
#[derive(Debug, Clone)]
pub struct Posted {
    pub entry: LedgerEntry,
    pub balance: Amount,
}

/// Inputs of the engine, as recorded in a server journal.
#[derive(Debug, Clone)]
pub enum Command {
    OpenAccount {
        user: UserId,
    },
    Deposit {
        user: UserId,
        amount: Amount,
        at: DateTime<Utc>,
    },
    Withdraw {
        user: UserId,
        amount: Amount,
        at: DateTime<Utc>,
    },
    /// `at` is the server receive time.
    PlaceBet {
        request: BetRequest,
        at: DateTime<Utc>,
    },
    PublishResult {
        date: NaiveDate,
        round1: Option<u32>,
        round2: Option<u32>,
    },
    Settle {
        result: ResultId,
        at: DateTime<Utc>,
    },
}
