use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, Row, Transaction, TransactionBehavior, params};
use std::collections::BTreeMap;
use std::ops::Range;
use std::path::Path;
use tracing::info;

use super::{AccountStore, BetStore, Ledger, ResultFeed, Store, StoreError};
use crate::Amount;
use crate::model::{
    Account, Bet, BetId, DrawResult, EntryKind, LedgerEntry, NewBet, NewEntry, Outcome, Posted,
    ResultId, ResultPatch, Round, StakeNumber, UserId,
};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS accounts (
    id INTEGER PRIMARY KEY,
    balance INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS bets (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL REFERENCES accounts(id),
    number INTEGER NOT NULL,
    amount INTEGER NOT NULL,
    round INTEGER NOT NULL,
    placed_at INTEGER NOT NULL, -- unix nanoseconds
    is_win INTEGER,
    win_amount INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS bets_unsettled ON bets (round, placed_at) WHERE is_win IS NULL;
CREATE INDEX IF NOT EXISTS bets_user ON bets (user_id);

CREATE TABLE IF NOT EXISTS results (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    date TEXT NOT NULL UNIQUE,
    round1 INTEGER,
    round2 INTEGER
);

CREATE TABLE IF NOT EXISTS ledger (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL REFERENCES accounts(id),
    amount INTEGER NOT NULL,
    kind TEXT NOT NULL,
    at INTEGER NOT NULL, -- unix nanoseconds
    description TEXT NOT NULL,
    bet_id INTEGER,
    metadata TEXT NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS ledger_win_per_bet ON ledger (bet_id) WHERE kind = 'win';
CREATE INDEX IF NOT EXISTS ledger_user ON ledger (user_id);
";

const BET_COLUMNS: &str = "id, user_id, number, amount, round, placed_at, is_win, win_amount";
const ENTRY_COLUMNS: &str = "id, user_id, amount, kind, at, description, bet_id, metadata";

/// SQLite-backed store. Balance-affecting units run in one immediate transaction.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;
        info!(path = %path.display(), "opened sqlite store");
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

struct BetRow {
    id: BetId,
    user: UserId,
    number: u32,
    amount: i64,
    round: u32,
    placed_at: i64,
    is_win: Option<bool>,
    win_amount: i64,
}

impl BetRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            user: row.get(1)?,
            number: row.get(2)?,
            amount: row.get(3)?,
            round: row.get(4)?,
            placed_at: row.get(5)?,
            is_win: row.get(6)?,
            win_amount: row.get(7)?,
        })
    }

    fn into_bet(self) -> Result<Bet, StoreError> {
        let corrupt = |what: &str| StoreError::Corrupt(format!("bet {}: {what}", self.id));
        Ok(Bet {
            id: self.id,
            user: self.user,
            number: StakeNumber::new(self.number).ok_or_else(|| corrupt("number"))?,
            amount: Amount::new(self.amount),
            round: Round::from_number(self.round).ok_or_else(|| corrupt("round"))?,
            placed_at: DateTime::from_timestamp_nanos(self.placed_at),
            outcome: match self.is_win {
                None => None,
                Some(true) => Some(Outcome::Won(Amount::new(self.win_amount))),
                Some(false) => Some(Outcome::Lost),
            },
        })
    }
}

struct EntryRow {
    id: u32,
    user: UserId,
    amount: i64,
    kind: String,
    at: i64,
    description: String,
    bet: Option<BetId>,
    metadata: String,
}

impl EntryRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            user: row.get(1)?,
            amount: row.get(2)?,
            kind: row.get(3)?,
            at: row.get(4)?,
            description: row.get(5)?,
            bet: row.get(6)?,
            metadata: row.get(7)?,
        })
    }

    fn into_entry(self) -> Result<LedgerEntry, StoreError> {
        let corrupt = |what: &str| StoreError::Corrupt(format!("ledger entry {}: {what}", self.id));
        Ok(LedgerEntry {
            id: self.id,
            user: self.user,
            amount: Amount::new(self.amount),
            kind: EntryKind::parse(&self.kind).ok_or_else(|| corrupt("kind"))?,
            at: DateTime::from_timestamp_nanos(self.at),
            bet: self.bet,
            metadata: serde_json::from_str(&self.metadata).map_err(|_| corrupt("metadata"))?,
            description: self.description,
        })
    }
}

type ResultRow = (ResultId, NaiveDate, Option<u32>, Option<u32>);

fn read_result(row: &Row<'_>) -> rusqlite::Result<ResultRow> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
}

fn into_result((id, date, round1, round2): ResultRow) -> Result<DrawResult, StoreError> {
    let number = |n: Option<u32>| match n {
        None => Ok(None),
        Some(n) => StakeNumber::new(n)
            .map(Some)
            .ok_or_else(|| StoreError::Corrupt(format!("result {id}: number {n}"))),
    };
    Ok(DrawResult {
        id,
        date,
        round1: number(round1)?,
        round2: number(round2)?,
    })
}

fn load_result(conn: &Connection, id: ResultId) -> Result<Option<DrawResult>, StoreError> {
    conn.query_row(
        "SELECT id, date, round1, round2 FROM results WHERE id = ?1",
        [id],
        read_result,
    )
    .optional()?
    .map(into_result)
    .transpose()
}

fn to_nanos(at: DateTime<Utc>) -> Result<i64, StoreError> {
    at.timestamp_nanos_opt()
        .ok_or(StoreError::TimestampOutOfRange(at))
}

/// Query bound in nanoseconds, saturated to the storable range.
fn bound_nanos(at: DateTime<Utc>) -> i64 {
    at.timestamp_nanos_opt().unwrap_or(if at < DateTime::UNIX_EPOCH {
        i64::MIN
    } else {
        i64::MAX
    })
}

fn insert_id(conn: &Connection) -> Result<u32, StoreError> {
    let id = conn.last_insert_rowid();
    u32::try_from(id).map_err(|_| StoreError::Corrupt(format!("row id {id} out of range")))
}

/// Balance update plus ledger append; the caller owns the transaction.
fn post_in(tx: &Transaction<'_>, entry: NewEntry) -> Result<Posted, StoreError> {
    let user = entry.user;
    if let (EntryKind::Win, Some(bet)) = (entry.kind, entry.bet) {
        let posted = tx
            .query_row(
                "SELECT 1 FROM ledger WHERE kind = 'win' AND bet_id = ?1",
                [bet],
                |_| Ok(()),
            )
            .optional()?;
        if posted.is_some() {
            return Err(StoreError::AlreadyPosted(bet));
        }
    }

    let current: i64 = tx
        .query_row("SELECT balance FROM accounts WHERE id = ?1", [user], |row| {
            row.get(0)
        })
        .optional()?
        .ok_or(StoreError::UnknownAccount(user))?;
    let current = Amount::new(current);
    let balance = current
        .checked_add(entry.amount)
        .ok_or(StoreError::Overflow(user))?;
    if entry.amount < Amount::ZERO && balance < Amount::ZERO {
        return Err(StoreError::InsufficientBalance {
            user,
            available: current,
            requested: -entry.amount,
        });
    }

    tx.execute(
        "UPDATE accounts SET balance = ?1 WHERE id = ?2",
        params![balance.value(), user],
    )?;
    let metadata =
        serde_json::to_string(&entry.metadata).map_err(|e| StoreError::Corrupt(e.to_string()))?;
    tx.execute(
        "INSERT INTO ledger (user_id, amount, kind, at, description, bet_id, metadata)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            user,
            entry.amount.value(),
            entry.kind.as_str(),
            to_nanos(entry.at)?,
            entry.description,
            entry.bet,
            metadata,
        ],
    )?;
    let id = insert_id(tx)?;

    Ok(Posted {
        entry: entry.into_entry(id),
        balance,
    })
}

impl AccountStore for SqliteStore {
    fn open_account(&self, user: UserId) -> Result<Account, StoreError> {
        let conn = self.conn.lock();
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO accounts (id, balance) VALUES (?1, 0)",
            [user],
        )?;
        if inserted == 0 {
            return Err(StoreError::AccountExists(user));
        }
        Ok(Account {
            id: user,
            balance: Amount::ZERO,
        })
    }

    fn account(&self, user: UserId) -> Result<Option<Account>, StoreError> {
        let conn = self.conn.lock();
        let balance: Option<i64> = conn
            .query_row("SELECT balance FROM accounts WHERE id = ?1", [user], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(balance.map(|balance| Account {
            id: user,
            balance: Amount::new(balance),
        }))
    }

    fn accounts(&self) -> Result<Vec<Account>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT id, balance FROM accounts ORDER BY id")?;
        let rows = stmt.query_map([], |row| {
            Ok(Account {
                id: row.get(0)?,
                balance: Amount::new(row.get(1)?),
            })
        })?;
        Ok(rows.collect::<Result<_, _>>()?)
    }
}

impl Ledger for SqliteStore {
    fn entries_for(&self, user: UserId) -> Result<Vec<LedgerEntry>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {ENTRY_COLUMNS} FROM ledger WHERE user_id = ?1 ORDER BY id DESC"
        ))?;
        let rows = stmt.query_map([user], EntryRow::read)?;
        rows.map(|row| row?.into_entry()).collect()
    }

    fn win_entry_for(&self, bet: BetId) -> Result<Option<LedgerEntry>, StoreError> {
        let conn = self.conn.lock();
        conn.query_row(
            &format!("SELECT {ENTRY_COLUMNS} FROM ledger WHERE kind = 'win' AND bet_id = ?1"),
            [bet],
            EntryRow::read,
        )
        .optional()?
        .map(EntryRow::into_entry)
        .transpose()
    }
}

impl BetStore for SqliteStore {
    fn bet(&self, id: BetId) -> Result<Option<Bet>, StoreError> {
        let conn = self.conn.lock();
        conn.query_row(
            &format!("SELECT {BET_COLUMNS} FROM bets WHERE id = ?1"),
            [id],
            BetRow::read,
        )
        .optional()?
        .map(BetRow::into_bet)
        .transpose()
    }

    fn bets_for_user(&self, user: UserId) -> Result<Vec<Bet>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {BET_COLUMNS} FROM bets WHERE user_id = ?1 ORDER BY id DESC"
        ))?;
        let rows = stmt.query_map([user], BetRow::read)?;
        rows.map(|row| row?.into_bet()).collect()
    }

    fn unsettled_bets(
        &self,
        round: Round,
        placed: Range<DateTime<Utc>>,
    ) -> Result<Vec<Bet>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {BET_COLUMNS} FROM bets
             WHERE round = ?1 AND is_win IS NULL AND placed_at >= ?2 AND placed_at < ?3
             ORDER BY placed_at, id"
        ))?;
        let rows = stmt.query_map(
            params![
                round.number(),
                bound_nanos(placed.start),
                bound_nanos(placed.end)
            ],
            BetRow::read,
        )?;
        rows.map(|row| row?.into_bet()).collect()
    }

    fn bets_between(
        &self,
        placed: Range<DateTime<Utc>>,
        round: Option<Round>,
    ) -> Result<Vec<Bet>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {BET_COLUMNS} FROM bets
             WHERE placed_at >= ?1 AND placed_at < ?2 AND (?3 IS NULL OR round = ?3)
             ORDER BY placed_at, id"
        ))?;
        let rows = stmt.query_map(
            params![
                bound_nanos(placed.start),
                bound_nanos(placed.end),
                round.map(Round::number)
            ],
            BetRow::read,
        )?;
        rows.map(|row| row?.into_bet()).collect()
    }

    fn mark_settled(&self, id: BetId, outcome: Outcome) -> Result<bool, StoreError> {
        let (is_win, win_amount) = match outcome {
            Outcome::Won(amount) => (true, amount),
            Outcome::Lost => (false, Amount::ZERO),
        };
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE bets SET is_win = ?1, win_amount = ?2 WHERE id = ?3 AND is_win IS NULL",
            params![is_win, win_amount.value(), id],
        )?;
        if changed == 1 {
            return Ok(true);
        }
        let exists = conn
            .query_row("SELECT 1 FROM bets WHERE id = ?1", [id], |_| Ok(()))
            .optional()?;
        match exists {
            Some(()) => Ok(false),
            None => Err(StoreError::UnknownBet(id)),
        }
    }
}

impl ResultFeed for SqliteStore {
    fn result(&self, id: ResultId) -> Result<Option<DrawResult>, StoreError> {
        load_result(&self.conn.lock(), id)
    }

    fn result_for_date(&self, date: NaiveDate) -> Result<Option<DrawResult>, StoreError> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT id, date, round1, round2 FROM results WHERE date = ?1",
            [date],
            read_result,
        )
        .optional()?
        .map(into_result)
        .transpose()
    }

    fn results_between(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<DrawResult>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, date, round1, round2 FROM results
             WHERE date BETWEEN ?1 AND ?2 ORDER BY date DESC",
        )?;
        let rows = stmt.query_map([from, to], read_result)?;
        rows.map(|row| into_result(row?)).collect()
    }

    fn upsert_result(
        &self,
        date: NaiveDate,
        round1: Option<StakeNumber>,
        round2: Option<StakeNumber>,
    ) -> Result<DrawResult, StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO results (date, round1, round2) VALUES (?1, ?2, ?3)
             ON CONFLICT(date) DO UPDATE SET
                 round1 = COALESCE(excluded.round1, round1),
                 round2 = COALESCE(excluded.round2, round2)",
            params![
                date,
                round1.map(StakeNumber::value),
                round2.map(StakeNumber::value)
            ],
        )?;
        let row = conn.query_row(
            "SELECT id, date, round1, round2 FROM results WHERE date = ?1",
            [date],
            read_result,
        )?;
        into_result(row)
    }

    fn update_result(
        &self,
        id: ResultId,
        patch: &ResultPatch,
    ) -> Result<Option<DrawResult>, StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let Some(mut result) = load_result(&tx, id)? else {
            return Ok(None);
        };
        patch.apply(&mut result);

        let taken = tx
            .query_row(
                "SELECT 1 FROM results WHERE date = ?1 AND id != ?2",
                params![result.date, id],
                |_| Ok(()),
            )
            .optional()?;
        if taken.is_some() {
            return Err(StoreError::DuplicateDate(result.date));
        }

        tx.execute(
            "UPDATE results SET date = ?1, round1 = ?2, round2 = ?3 WHERE id = ?4",
            params![
                result.date,
                result.round1.map(StakeNumber::value),
                result.round2.map(StakeNumber::value),
                id
            ],
        )?;
        tx.commit()?;
        Ok(Some(result))
    }

    fn delete_result(&self, id: ResultId) -> Result<bool, StoreError> {
        let conn = self.conn.lock();
        Ok(conn.execute("DELETE FROM results WHERE id = ?1", [id])? == 1)
    }
}

impl Store for SqliteStore {
    fn post(&self, entry: NewEntry) -> Result<Posted, StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let posted = post_in(&tx, entry)?;
        tx.commit()?;
        Ok(posted)
    }

    fn stake(&self, bet: NewBet) -> Result<(Bet, Posted), StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        tx.execute(
            "INSERT INTO bets (user_id, number, amount, round, placed_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                bet.user,
                bet.number.value(),
                bet.amount.value(),
                bet.round.number(),
                to_nanos(bet.placed_at)?
            ],
        )?;
        let id = insert_id(&tx)?;

        let mut entry = NewEntry::stake(&bet);
        entry.bet = Some(id);
        // dropping `tx` on error rolls the bet insert back
        let posted = post_in(&tx, entry)?;
        tx.commit()?;

        Ok((bet.into_bet(id), posted))
    }

    fn withdraw(&self, entry: NewEntry, wins_since: DateTime<Utc>) -> Result<Posted, StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let user = entry.user;
        let available: i64 = tx
            .query_row("SELECT balance FROM accounts WHERE id = ?1", [user], |row| {
                row.get(0)
            })
            .optional()?
            .ok_or(StoreError::UnknownAccount(user))?;
        let available = Amount::new(available);
        let requested = -entry.amount;
        if available < requested {
            return Err(StoreError::InsufficientBalance {
                user,
                available,
                requested,
            });
        }

        let last_win: Option<i64> = tx.query_row(
            "SELECT MAX(at) FROM ledger WHERE user_id = ?1 AND kind = 'win' AND at > ?2",
            params![user, bound_nanos(wins_since)],
            |row| row.get(0),
        )?;
        if let Some(at) = last_win {
            return Err(StoreError::RecentWin {
                user,
                at: DateTime::from_timestamp_nanos(at),
            });
        }

        let posted = post_in(&tx, entry)?;
        tx.commit()?;
        Ok(posted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn utc(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    fn new_bet(user: UserId, number: u32, amount: i64, round: Round, at: &str) -> NewBet {
        NewBet {
            user,
            number: StakeNumber::new(number).unwrap(),
            amount: Amount::new(amount),
            round,
            placed_at: utc(at),
        }
    }

    fn funded(user: UserId, amount: i64) -> SqliteStore {
        let store = SqliteStore::open_in_memory().unwrap();
        store.open_account(user).unwrap();
        store
            .post(NewEntry::deposit(user, Amount::new(amount), utc("2025-03-28T00:00:00Z")))
            .unwrap();
        store
    }

    #[test]
    fn duplicate_account_is_refused() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.open_account(1).unwrap();
        assert!(matches!(
            store.open_account(1),
            Err(StoreError::AccountExists(1))
        ));
    }

    #[test]
    fn stake_round_trips_through_the_database() {
        let store = funded(1, 500);
        let (bet, posted) = store
            .stake(new_bet(1, 42, 100, Round::First, "2025-03-28T08:30:00Z"))
            .unwrap();
        assert_eq!(posted.balance, Amount::new(400));
        assert_eq!(store.bet(bet.id).unwrap(), Some(bet.clone()));

        let entries = store.entries_for(1).unwrap();
        assert_eq!(entries[0].kind, EntryKind::Bet);
        assert_eq!(entries[0].bet, Some(bet.id));
        assert_eq!(entries[0].metadata["number"], "42");
    }

    #[test]
    fn failed_stake_rolls_back_the_bet_row() {
        let store = funded(1, 50);
        let result = store.stake(new_bet(1, 42, 100, Round::First, "2025-03-28T08:30:00Z"));
        assert!(matches!(
            result,
            Err(StoreError::InsufficientBalance { .. })
        ));
        assert!(store.bets_for_user(1).unwrap().is_empty());
        assert_eq!(store.balance(1).unwrap(), Amount::new(50));
    }

    #[test]
    fn unsettled_query_and_write_once_settlement() {
        let store = funded(1, 1000);
        let (bet, _) = store
            .stake(new_bet(1, 42, 10, Round::First, "2025-03-28T08:00:00Z"))
            .unwrap();
        store
            .stake(new_bet(1, 42, 10, Round::First, "2025-03-28T10:00:00Z"))
            .unwrap();

        let window = utc("2025-03-27T18:30:00Z")..utc("2025-03-28T10:00:00Z");
        assert_eq!(
            store.unsettled_bets(Round::First, window.clone()).unwrap(),
            vec![bet.clone()]
        );

        assert!(store.mark_settled(bet.id, Outcome::Won(Amount::new(800))).unwrap());
        assert!(!store.mark_settled(bet.id, Outcome::Lost).unwrap());
        assert!(store.unsettled_bets(Round::First, window).unwrap().is_empty());
        assert_eq!(store.bet(bet.id).unwrap().unwrap().is_win(), Some(true));
        assert!(matches!(
            store.mark_settled(999, Outcome::Lost),
            Err(StoreError::UnknownBet(999))
        ));
    }

    #[test]
    fn win_posting_is_unique_per_bet() {
        let store = funded(1, 1000);
        let (bet, _) = store
            .stake(new_bet(1, 42, 10, Round::First, "2025-03-28T08:00:00Z"))
            .unwrap();
        let at = utc("2025-03-28T12:00:00Z");
        store.post(NewEntry::win(&bet, Amount::new(800), at)).unwrap();
        assert!(matches!(
            store.post(NewEntry::win(&bet, Amount::new(800), at)),
            Err(StoreError::AlreadyPosted(_))
        ));
        assert_eq!(store.balance(1).unwrap(), Amount::new(1790));
        assert_eq!(
            store.win_entry_for(bet.id).unwrap().map(|e| e.amount),
            Some(Amount::new(800))
        );
    }

    #[test]
    fn results_upsert_update_and_range() {
        let store = SqliteStore::open_in_memory().unwrap();
        let d27 = NaiveDate::from_ymd_opt(2025, 3, 27).unwrap();
        let d28 = NaiveDate::from_ymd_opt(2025, 3, 28).unwrap();

        let a = store.upsert_result(d27, StakeNumber::new(0), StakeNumber::new(35)).unwrap();
        let b = store.upsert_result(d28, StakeNumber::new(86), None).unwrap();
        let b2 = store.upsert_result(d28, StakeNumber::new(86), StakeNumber::new(25)).unwrap();
        assert_eq!(b.id, b2.id);

        let range = store.results_between(d27, d28).unwrap();
        assert_eq!(range.iter().map(|r| r.id).collect::<Vec<_>>(), vec![b.id, a.id]);

        let clash = ResultPatch {
            date: Some(d27),
            ..Default::default()
        };
        assert!(matches!(
            store.update_result(b.id, &clash),
            Err(StoreError::DuplicateDate(_))
        ));

        let clear = ResultPatch {
            round2: Some(None),
            ..Default::default()
        };
        let updated = store.update_result(b.id, &clear).unwrap().unwrap();
        assert_eq!(updated.round2, None);
        assert_eq!(updated.round1, StakeNumber::new(86));

        assert!(store.delete_result(a.id).unwrap());
        assert_eq!(store.result(a.id).unwrap(), None);
    }

    #[test]
    fn sub_millisecond_times_survive_storage() {
        let store = funded(1, 500);
        let (bet, posted) = store
            .stake(new_bet(1, 42, 100, Round::First, "2025-03-28T08:30:00.123456789Z"))
            .unwrap();
        assert_eq!(store.bet(bet.id).unwrap(), Some(bet.clone()));
        assert_eq!(store.entries_for(1).unwrap()[0], posted.entry);

        let window = utc("2025-03-28T08:30:00.123456789Z")..utc("2025-03-28T08:30:00.12345679Z");
        assert_eq!(store.unsettled_bets(Round::First, window).unwrap(), vec![bet]);
    }

    #[test]
    fn publishing_one_round_keeps_the_other() {
        let store = SqliteStore::open_in_memory().unwrap();
        let date = NaiveDate::from_ymd_opt(2025, 3, 28).unwrap();
        let first = store.upsert_result(date, StakeNumber::new(42), None).unwrap();
        let merged = store.upsert_result(date, None, StakeNumber::new(25)).unwrap();
        assert_eq!(merged.id, first.id);
        assert_eq!(merged.round1, StakeNumber::new(42));
        assert_eq!(merged.round2, StakeNumber::new(25));
    }

    #[test]
    fn bets_between_filters_by_time_and_round() {
        let store = funded(1, 1000);
        let (a, _) = store
            .stake(new_bet(1, 1, 10, Round::Second, "2025-03-28T09:00:00Z"))
            .unwrap();
        let (b, _) = store
            .stake(new_bet(1, 2, 10, Round::First, "2025-03-28T08:00:00Z"))
            .unwrap();
        store
            .stake(new_bet(1, 3, 10, Round::First, "2025-03-28T18:30:00Z"))
            .unwrap();

        let day = utc("2025-03-27T18:30:00Z")..utc("2025-03-28T18:30:00Z");
        assert_eq!(store.bets_between(day.clone(), None).unwrap(), vec![b.clone(), a]);
        assert_eq!(store.bets_between(day, Some(Round::First)).unwrap(), vec![b]);
        let all = DateTime::<Utc>::MIN_UTC..DateTime::<Utc>::MAX_UTC;
        assert_eq!(store.bets_between(all, None).unwrap().len(), 3);
    }

    #[test]
    fn withdraw_checks_balance_before_recent_win() {
        let store = funded(1, 1000);
        let (bet, _) = store
            .stake(new_bet(1, 42, 10, Round::First, "2025-03-28T08:00:00Z"))
            .unwrap();
        let won_at = utc("2025-03-28T12:00:00Z");
        store.post(NewEntry::win(&bet, Amount::new(800), won_at)).unwrap();
        let now = utc("2025-03-28T13:00:00Z");
        let since = utc("2025-03-28T11:00:00Z");

        let uncovered = store.withdraw(NewEntry::withdrawal(1, Amount::new(5000), now), since);
        assert!(matches!(uncovered, Err(StoreError::InsufficientBalance { .. })));

        let locked = store.withdraw(NewEntry::withdrawal(1, Amount::new(500), now), since);
        assert!(matches!(locked, Err(StoreError::RecentWin { user: 1, at }) if at == won_at));

        let later = store
            .withdraw(NewEntry::withdrawal(1, Amount::new(500), now), won_at)
            .unwrap();
        assert_eq!(later.balance, Amount::new(1290));
    }

    #[test]
    fn state_survives_reopen() {
        let file = NamedTempFile::new().unwrap();
        {
            let store = SqliteStore::open(file.path()).unwrap();
            store.open_account(7).unwrap();
            store
                .post(NewEntry::deposit(7, Amount::new(250), utc("2025-03-28T00:00:00Z")))
                .unwrap();
        }
        let store = SqliteStore::open(file.path()).unwrap();
        assert_eq!(store.balance(7).unwrap(), Amount::new(250));
    }
}
