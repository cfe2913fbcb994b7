//! Bank - Per-Agent Account Registry
//!
//! Holds every agent's account behind its own lock. All mutation follows
//! the read-modify-atomically-replace cycle: the closure sees the current
//! immutable Account, returns a replacement, and the swap happens while
//! the per-agent lock is held. Operations spanning two accounts take the
//! locks in ascending agent-id order, so no interleaving can deadlock.

use std::collections::HashMap;
use std::sync::Arc;

use rust_decimal::Decimal;
use tokio::sync::{Mutex, RwLock};
use tracing::info;

use crate::domain::account::Account;
use crate::domain::error::MarketError;
use crate::domain::value::{AgentId, FullType, WorldState};

/// One account conversion produced by an instrument settlement sweep.
#[derive(Debug, Clone)]
pub struct Conversion {
  pub agent: AgentId,
  pub old: Account,
  pub new: Account,
  pub realized: Decimal,
}

pub struct Bank {
  accounts: RwLock<HashMap<AgentId, Arc<Mutex<Account>>>>,
  endowment: Decimal,
}

impl Bank {
  /// Create a bank that opens new accounts with the given cash endowment.
  pub fn new(endowment: Decimal) -> Self {
    Self {
      accounts: RwLock::new(HashMap::new()),
      endowment,
    }
  }

  /// Open an account for a newly registered agent. Idempotent: an
  /// existing account is returned untouched, never re-endowed.
  pub async fn open_account(&self, agent: AgentId) -> Account {
    {
      let accounts = self.accounts.read().await;
      if let Some(entry) = accounts.get(&agent) {
        return entry.lock().await.clone();
      }
    }
    let account = Account::with_endowment(agent, self.endowment);
    let mut accounts = self.accounts.write().await;
    let entry = accounts
      .entry(agent)
      .or_insert_with(|| Arc::new(Mutex::new(account)));
    let snapshot = entry.lock().await.clone();
    info!(agent = agent, cash = %snapshot.cash, "Account opened");
    snapshot
  }

  /// The lock entry for one agent's account. Dispatch uses this when a
  /// settlement must hold the account and an instrument lock together.
  pub async fn entry(&self, agent: AgentId) -> Result<Arc<Mutex<Account>>, MarketError> {
    let accounts = self.accounts.read().await;
    accounts
      .get(&agent)
      .cloned()
      .ok_or(MarketError::UnknownAgent(agent))
  }

  /// Current value of one account.
  pub async fn snapshot(&self, agent: AgentId) -> Result<Account, MarketError> {
    let entry = self.entry(agent).await?;
    let guard = entry.lock().await;
    Ok(guard.clone())
  }

  /// Read-modify-replace one account under its lock.
  ///
  /// Returns (old, new) on success; on error the stored account is
  /// untouched.
  pub async fn update<F>(&self, agent: AgentId, f: F) -> Result<(Account, Account), MarketError>
  where
    F: FnOnce(&Account) -> Result<Account, MarketError>,
  {
    let entry = self.entry(agent).await?;
    let mut guard = entry.lock().await;
    let old = guard.clone();
    let new = f(&old)?;
    *guard = new.clone();
    Ok((old, new))
  }

  /// Atomically update two distinct accounts, locking in ascending
  /// agent-id order. The closure receives (account of `a`, account of
  /// `b`) and returns their replacements in the same order; an error
  /// leaves both untouched.
  pub async fn transfer<F>(
    &self,
    a: AgentId,
    b: AgentId,
    f: F,
  ) -> Result<((Account, Account), (Account, Account)), MarketError>
  where
    F: FnOnce(&Account, &Account) -> Result<(Account, Account), MarketError>,
  {
    if a == b {
      return Err(MarketError::SelfTrade);
    }
    let entry_a = self.entry(a).await?;
    let entry_b = self.entry(b).await?;

    let (first, second) = if a < b {
      (&entry_a, &entry_b)
    } else {
      (&entry_b, &entry_a)
    };
    let mut guard_first = first.lock().await;
    let mut guard_second = second.lock().await;
    let (guard_a, guard_b) = if a < b {
      (&mut guard_first, &mut guard_second)
    } else {
      (&mut guard_second, &mut guard_first)
    };

    let old_a = guard_a.clone();
    let old_b = guard_b.clone();
    let (new_a, new_b) = f(&old_a, &old_b)?;
    **guard_a = new_a.clone();
    **guard_b = new_b.clone();
    Ok(((old_a, new_a), (old_b, new_b)))
  }

  /// Convert every account's live holdings of one security against a
  /// resolved world, swapping in the replacement accounts one at a time.
  pub async fn convert_all(&self, kind: &FullType, world: &WorldState) -> Vec<Conversion> {
    let entries: Vec<(AgentId, Arc<Mutex<Account>>)> = {
      let accounts = self.accounts.read().await;
      accounts.iter().map(|(id, e)| (*id, Arc::clone(e))).collect()
    };

    let mut conversions = Vec::new();
    for (agent, entry) in entries {
      let mut guard = entry.lock().await;
      if guard.quantity_of(kind) == Decimal::ZERO {
        continue;
      }
      let old = guard.clone();
      let (new, realized) = old.convert(kind, world);
      *guard = new.clone();
      conversions.push(Conversion {
        agent,
        old,
        new,
        realized,
      });
    }
    conversions
  }

  pub async fn agents(&self) -> Vec<AgentId> {
    self.accounts.read().await.keys().copied().collect()
  }

  pub async fn len(&self) -> usize {
    self.accounts.read().await.len()
  }

  /// Sum of cash across all accounts (conservation checks).
  pub async fn total_cash(&self) -> Decimal {
    let entries: Vec<Arc<Mutex<Account>>> = {
      let accounts = self.accounts.read().await;
      accounts.values().cloned().collect()
    };
    let mut total = Decimal::ZERO;
    for entry in entries {
      total += entry.lock().await.cash;
    }
    total
  }
}
