use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ops::Range;

use super::{AccountStore, BetStore, Ledger, ResultFeed, Store, StoreError};
use crate::Amount;
use crate::model::{
    Account, Bet, BetId, DrawResult, EntryId, EntryKind, LedgerEntry, NewBet, NewEntry, Outcome,
    Posted, ResultId, ResultPatch, Round, StakeNumber, UserId,
};

/// Process-local store. Every operation runs under one lock, so each
/// [`Store`] unit is trivially atomic. Nothing survives a restart.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[derive(Default)]
struct State {
    accounts: BTreeMap<UserId, Amount>,
    bets: BTreeMap<BetId, Bet>,
    /// Index of unsettled bets by (round, placement time).
    unsettled: BTreeSet<(Round, DateTime<Utc>, BetId)>,
    results: BTreeMap<ResultId, DrawResult>,
    result_dates: HashMap<NaiveDate, ResultId>,
    ledger: Vec<LedgerEntry>,
    /// Position in `ledger` of the win entry of each bet.
    wins: HashMap<BetId, usize>,
    last_bet: BetId,
    last_result: ResultId,
    last_entry: EntryId,
}

impl State {
    fn post(&mut self, entry: NewEntry) -> Result<Posted, StoreError> {
        let user = entry.user;
        let win_for = match (entry.kind, entry.bet) {
            (EntryKind::Win, Some(bet)) => Some(bet),
            _ => None,
        };
        if let Some(bet) = win_for
            && self.wins.contains_key(&bet)
        {
            return Err(StoreError::AlreadyPosted(bet));
        }

        let current = *self
            .accounts
            .get(&user)
            .ok_or(StoreError::UnknownAccount(user))?;
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

        self.accounts.insert(user, balance);
        self.last_entry += 1;
        let entry = entry.into_entry(self.last_entry);
        if let Some(bet) = win_for {
            self.wins.insert(bet, self.ledger.len());
        }
        self.ledger.push(entry.clone());

        Ok(Posted { entry, balance })
    }

    fn stake(&mut self, bet: NewBet) -> Result<(Bet, Posted), StoreError> {
        let id = self.last_bet + 1;
        let mut entry = NewEntry::stake(&bet);
        entry.bet = Some(id);

        // nothing is mutated if the debit is refused
        let posted = self.post(entry)?;

        self.last_bet = id;
        let bet = bet.into_bet(id);
        self.unsettled.insert((bet.round, bet.placed_at, id));
        self.bets.insert(id, bet.clone());

        Ok((bet, posted))
    }

    fn withdraw(&mut self, entry: NewEntry, wins_since: DateTime<Utc>) -> Result<Posted, StoreError> {
        let user = entry.user;
        let available = *self
            .accounts
            .get(&user)
            .ok_or(StoreError::UnknownAccount(user))?;
        let requested = -entry.amount;
        if available < requested {
            return Err(StoreError::InsufficientBalance {
                user,
                available,
                requested,
            });
        }

        let last_win = self
            .ledger
            .iter()
            .filter(|e| e.user == user && e.kind == EntryKind::Win && e.at > wins_since)
            .map(|e| e.at)
            .max();
        if let Some(at) = last_win {
            return Err(StoreError::RecentWin { user, at });
        }

        self.post(entry)
    }

    fn rebind_date(&mut self, id: ResultId, from: NaiveDate, to: NaiveDate) -> Result<(), StoreError> {
        if from == to {
            return Ok(());
        }
        if self.result_dates.contains_key(&to) {
            return Err(StoreError::DuplicateDate(to));
        }
        self.result_dates.remove(&from);
        self.result_dates.insert(to, id);
        Ok(())
    }
}

impl AccountStore for MemoryStore {
    fn open_account(&self, user: UserId) -> Result<Account, StoreError> {
        let mut state = self.state.lock();
        if state.accounts.contains_key(&user) {
            return Err(StoreError::AccountExists(user));
        }
        state.accounts.insert(user, Amount::ZERO);
        Ok(Account {
            id: user,
            balance: Amount::ZERO,
        })
    }

    fn account(&self, user: UserId) -> Result<Option<Account>, StoreError> {
        let state = self.state.lock();
        Ok(state
            .accounts
            .get(&user)
            .map(|&balance| Account { id: user, balance }))
    }

    fn accounts(&self) -> Result<Vec<Account>, StoreError> {
        let state = self.state.lock();
        Ok(state
            .accounts
            .iter()
            .map(|(&id, &balance)| Account { id, balance })
            .collect())
    }
}

impl Ledger for MemoryStore {
    fn entries_for(&self, user: UserId) -> Result<Vec<LedgerEntry>, StoreError> {
        let state = self.state.lock();
        Ok(state
            .ledger
            .iter()
            .rev()
            .filter(|entry| entry.user == user)
            .cloned()
            .collect())
    }

    fn win_entry_for(&self, bet: BetId) -> Result<Option<LedgerEntry>, StoreError> {
        let state = self.state.lock();
        Ok(state
            .wins
            .get(&bet)
            .and_then(|&idx| state.ledger.get(idx))
            .cloned())
    }
}

impl BetStore for MemoryStore {
    fn bet(&self, id: BetId) -> Result<Option<Bet>, StoreError> {
        Ok(self.state.lock().bets.get(&id).cloned())
    }

    fn bets_for_user(&self, user: UserId) -> Result<Vec<Bet>, StoreError> {
        let state = self.state.lock();
        Ok(state
            .bets
            .values()
            .rev()
            .filter(|bet| bet.user == user)
            .cloned()
            .collect())
    }

    fn unsettled_bets(
        &self,
        round: Round,
        placed: Range<DateTime<Utc>>,
    ) -> Result<Vec<Bet>, StoreError> {
        let state = self.state.lock();
        // BetId 0 is never assigned, so these bounds cover exactly [start, end)
        let lower = (round, placed.start, 0);
        let upper = (round, placed.end, 0);
        Ok(state
            .unsettled
            .range(lower..upper)
            .filter_map(|(_, _, id)| state.bets.get(id))
            .cloned()
            .collect())
    }

    fn bets_between(
        &self,
        placed: Range<DateTime<Utc>>,
        round: Option<Round>,
    ) -> Result<Vec<Bet>, StoreError> {
        let state = self.state.lock();
        let mut bets: Vec<Bet> = state
            .bets
            .values()
            .filter(|bet| placed.contains(&bet.placed_at))
            .filter(|bet| round.is_none_or(|round| bet.round == round))
            .cloned()
            .collect();
        bets.sort_by_key(|bet| (bet.placed_at, bet.id));
        Ok(bets)
    }

    fn mark_settled(&self, id: BetId, outcome: Outcome) -> Result<bool, StoreError> {
        let mut state = self.state.lock();
        let bet = state.bets.get_mut(&id).ok_or(StoreError::UnknownBet(id))?;
        if bet.is_settled() {
            return Ok(false);
        }
        bet.outcome = Some(outcome);
        let key = (bet.round, bet.placed_at, id);
        state.unsettled.remove(&key);
        Ok(true)
    }
}

impl ResultFeed for MemoryStore {
    fn result(&self, id: ResultId) -> Result<Option<DrawResult>, StoreError> {
        Ok(self.state.lock().results.get(&id).cloned())
    }

    fn result_for_date(&self, date: NaiveDate) -> Result<Option<DrawResult>, StoreError> {
        let state = self.state.lock();
        Ok(state
            .result_dates
            .get(&date)
            .and_then(|id| state.results.get(id))
            .cloned())
    }

    fn results_between(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<DrawResult>, StoreError> {
        let state = self.state.lock();
        let mut results: Vec<_> = state
            .results
            .values()
            .filter(|result| (from..=to).contains(&result.date))
            .cloned()
            .collect();
        results.sort_by(|a, b| b.date.cmp(&a.date));
        Ok(results)
    }

    fn upsert_result(
        &self,
        date: NaiveDate,
        round1: Option<StakeNumber>,
        round2: Option<StakeNumber>,
    ) -> Result<DrawResult, StoreError> {
        let mut state = self.state.lock();
        let existing = state.result_dates.get(&date).copied();
        if let Some(id) = existing
            && let Some(result) = state.results.get_mut(&id)
        {
            result.round1 = round1.or(result.round1);
            result.round2 = round2.or(result.round2);
            return Ok(result.clone());
        }

        state.last_result += 1;
        let result = DrawResult {
            id: state.last_result,
            date,
            round1,
            round2,
        };
        state.result_dates.insert(date, result.id);
        state.results.insert(result.id, result.clone());
        Ok(result)
    }

    fn update_result(
        &self,
        id: ResultId,
        patch: &ResultPatch,
    ) -> Result<Option<DrawResult>, StoreError> {
        let mut state = self.state.lock();
        let Some(mut result) = state.results.get(&id).cloned() else {
            return Ok(None);
        };
        let old_date = result.date;
        patch.apply(&mut result);
        state.rebind_date(id, old_date, result.date)?;
        state.results.insert(id, result.clone());
        Ok(Some(result))
    }

    fn delete_result(&self, id: ResultId) -> Result<bool, StoreError> {
        let mut state = self.state.lock();
        match state.results.remove(&id) {
            Some(result) => {
                state.result_dates.remove(&result.date);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

impl Store for MemoryStore {
    fn post(&self, entry: NewEntry) -> Result<Posted, StoreError> {
        self.state.lock().post(entry)
    }

    fn stake(&self, bet: NewBet) -> Result<(Bet, Posted), StoreError> {
        self.state.lock().stake(bet)
    }

    fn withdraw(&self, entry: NewEntry, wins_since: DateTime<Utc>) -> Result<Posted, StoreError> {
        self.state.lock().withdraw(entry, wins_since)
    }
}
