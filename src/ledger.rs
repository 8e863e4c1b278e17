// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Ledger store: append-only wallet transactions and derived balances.
//!
//! The ledger is the single source of truth for payee balances. Every
//! credit and debit is a [`WalletTransaction`] row keyed by a caller-chosen
//! reference; posting the same reference twice is a no-op, which is what
//! makes the escrow holder's money movements idempotent. Balances are a
//! materialized cache of the row sum and can be recomputed by replay.

use crate::base::{BookingId, WalletOwner};
use crate::error::EscrowError;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryDirection {
    Credit,
    Debit,
}

/// Only `Completed` rows count toward the available balance. `Pending`
/// rows are in-flight outbound transfers awaiting provider confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    Pending,
    Completed,
    Failed,
}

/// One append-only ledger row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalletTransaction {
    pub reference: String,
    pub owner: WalletOwner,
    pub direction: EntryDirection,
    pub amount: Decimal,
    pub status: EntryStatus,
    pub booking: Option<BookingId>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug)]
struct WalletData {
    available: Decimal,
    /// Sum of pending outbound debits. Withdrawable = available - pending.
    pending: Decimal,
}

impl WalletData {
    fn new() -> Self {
        Self {
            available: Decimal::ZERO,
            pending: Decimal::ZERO,
        }
    }

    fn assert_invariants(&self) {
        debug_assert!(
            self.available >= Decimal::ZERO,
            "Invariant violated: available balance went negative: {}",
            self.available
        );
        debug_assert!(
            self.pending >= Decimal::ZERO,
            "Invariant violated: pending balance went negative: {}",
            self.pending
        );
    }

    fn credit(&mut self, amount: Decimal) {
        self.available += amount;
        self.assert_invariants();
    }

    fn debit(&mut self, amount: Decimal) -> Result<(), EscrowError> {
        if self.available - self.pending < amount {
            return Err(EscrowError::InsufficientFunds);
        }
        self.available -= amount;
        self.assert_invariants();
        Ok(())
    }

    /// Reserves an outbound amount without touching available yet; the
    /// completed-row balance law stays exact while the transfer is in
    /// flight.
    fn reserve_debit(&mut self, amount: Decimal) -> Result<(), EscrowError> {
        if self.available - self.pending < amount {
            return Err(EscrowError::InsufficientFunds);
        }
        self.pending += amount;
        self.assert_invariants();
        Ok(())
    }

    fn settle_debit(&mut self, amount: Decimal) {
        self.pending -= amount;
        self.available -= amount;
        self.assert_invariants();
    }

    fn void_debit(&mut self, amount: Decimal) {
        self.pending -= amount;
        self.assert_invariants();
    }
}

/// Per-owner running balance.
#[derive(Debug)]
pub struct Wallet {
    inner: Mutex<WalletData>,
}

impl Wallet {
    fn new() -> Self {
        Self {
            inner: Mutex::new(WalletData::new()),
        }
    }

    pub fn available(&self) -> Decimal {
        self.inner.lock().available
    }

    pub fn pending(&self) -> Decimal {
        self.inner.lock().pending
    }

    /// Amount a new debit may draw on: `available - pending`.
    pub fn withdrawable(&self) -> Decimal {
        let data = self.inner.lock();
        data.available - data.pending
    }
}

/// Serializable balance snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalletBalance {
    pub owner: WalletOwner,
    pub available: Decimal,
    pub pending: Decimal,
}

/// Append-only ledger with idempotent posting and per-wallet serialized
/// updates.
#[derive(Debug, Default)]
pub struct LedgerStore {
    wallets: DashMap<WalletOwner, Wallet>,
    /// Rows indexed by reference for O(1) idempotency checks.
    rows: DashMap<String, Mutex<WalletTransaction>>,
    /// Per-owner insertion-ordered row references.
    by_owner: DashMap<WalletOwner, Mutex<Vec<String>>>,
}

impl LedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Posts a completed credit. Returns `false` if the reference was
    /// already posted (no-op).
    pub fn credit(
        &self,
        owner: WalletOwner,
        amount: Decimal,
        booking: Option<BookingId>,
        reference: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, EscrowError> {
        self.post(
            owner,
            EntryDirection::Credit,
            amount,
            EntryStatus::Completed,
            booking,
            reference,
            now,
        )
    }

    /// Posts a completed debit. Fails with `InsufficientFunds` if the
    /// wallet cannot cover it.
    pub fn debit(
        &self,
        owner: WalletOwner,
        amount: Decimal,
        booking: Option<BookingId>,
        reference: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, EscrowError> {
        self.post(
            owner,
            EntryDirection::Debit,
            amount,
            EntryStatus::Completed,
            booking,
            reference,
            now,
        )
    }

    /// Posts a pending debit for an in-flight outbound transfer. The
    /// amount is reserved but stays in `available` until [`complete`].
    ///
    /// [`complete`]: LedgerStore::complete
    pub fn debit_pending(
        &self,
        owner: WalletOwner,
        amount: Decimal,
        booking: Option<BookingId>,
        reference: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, EscrowError> {
        self.post(
            owner,
            EntryDirection::Debit,
            amount,
            EntryStatus::Pending,
            booking,
            reference,
            now,
        )
    }

    fn post(
        &self,
        owner: WalletOwner,
        direction: EntryDirection,
        amount: Decimal,
        status: EntryStatus,
        booking: Option<BookingId>,
        reference: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, EscrowError> {
        if amount <= Decimal::ZERO {
            return Err(EscrowError::InvalidAmount);
        }

        // Entry API reserves the reference atomically; a concurrent repost
        // of the same reference observes Occupied and becomes a no-op.
        match self.rows.entry(reference.to_string()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                {
                    let wallet = self.wallets.entry(owner).or_insert_with(Wallet::new);
                    let mut data = wallet.inner.lock();
                    match (direction, status) {
                        (EntryDirection::Credit, EntryStatus::Completed) => data.credit(amount),
                        (EntryDirection::Debit, EntryStatus::Completed) => data.debit(amount)?,
                        (EntryDirection::Debit, EntryStatus::Pending) => {
                            data.reserve_debit(amount)?
                        }
                        // Pending credits and pre-failed rows are never posted.
                        _ => return Err(EscrowError::InvalidAmount),
                    }
                }

                slot.insert(Mutex::new(WalletTransaction {
                    reference: reference.to_string(),
                    owner,
                    direction,
                    amount,
                    status,
                    booking,
                    created_at: now,
                }));
                self.by_owner
                    .entry(owner)
                    .or_default()
                    .lock()
                    .push(reference.to_string());
                Ok(true)
            }
        }
    }

    /// Marks a pending debit as completed: the transferred amount leaves
    /// the available balance. No-op if the row is already terminal.
    pub fn complete(&self, reference: &str) -> Result<(), EscrowError> {
        let row = self
            .rows
            .get(reference)
            .ok_or(EscrowError::WalletNotFound)?;
        let mut txn = row.lock();
        if txn.status != EntryStatus::Pending {
            return Ok(());
        }
        txn.status = EntryStatus::Completed;

        let wallet = self
            .wallets
            .get(&txn.owner)
            .ok_or(EscrowError::WalletNotFound)?;
        wallet.inner.lock().settle_debit(txn.amount);
        Ok(())
    }

    /// Marks a pending debit as failed: the reservation is voided and the
    /// funds stay withdrawable. No-op if the row is already terminal.
    pub fn fail(&self, reference: &str) -> Result<(), EscrowError> {
        let row = self
            .rows
            .get(reference)
            .ok_or(EscrowError::WalletNotFound)?;
        let mut txn = row.lock();
        if txn.status != EntryStatus::Pending {
            return Ok(());
        }
        txn.status = EntryStatus::Failed;

        let wallet = self
            .wallets
            .get(&txn.owner)
            .ok_or(EscrowError::WalletNotFound)?;
        wallet.inner.lock().void_debit(txn.amount);
        Ok(())
    }

    pub fn balance(&self, owner: WalletOwner) -> WalletBalance {
        match self.wallets.get(&owner) {
            Some(wallet) => WalletBalance {
                owner,
                available: wallet.available(),
                pending: wallet.pending(),
            },
            None => WalletBalance {
                owner,
                available: Decimal::ZERO,
                pending: Decimal::ZERO,
            },
        }
    }

    pub fn withdrawable(&self, owner: WalletOwner) -> Decimal {
        self.wallets
            .get(&owner)
            .map(|wallet| wallet.withdrawable())
            .unwrap_or(Decimal::ZERO)
    }

    /// All wallet balances, for reporting.
    pub fn balances(&self) -> Vec<WalletBalance> {
        self.wallets
            .iter()
            .map(|entry| WalletBalance {
                owner: *entry.key(),
                available: entry.value().available(),
                pending: entry.value().pending(),
            })
            .collect()
    }

    /// Row snapshots for one owner, in posting order.
    pub fn transactions_for(&self, owner: WalletOwner) -> Vec<WalletTransaction> {
        let Some(refs) = self.by_owner.get(&owner) else {
            return Vec::new();
        };
        let refs = refs.lock();
        refs.iter()
            .filter_map(|reference| self.rows.get(reference).map(|row| row.lock().clone()))
            .collect()
    }

    /// Recomputes `(available, pending)` for an owner by folding its rows.
    ///
    /// `available = Σ completed credits − Σ completed debits`; pending is
    /// the sum of pending debit rows. The materialized balance must always
    /// match this fold.
    pub fn recompute(&self, owner: WalletOwner) -> (Decimal, Decimal) {
        let mut available = Decimal::ZERO;
        let mut pending = Decimal::ZERO;
        for txn in self.transactions_for(owner) {
            match (txn.direction, txn.status) {
                (EntryDirection::Credit, EntryStatus::Completed) => available += txn.amount,
                (EntryDirection::Debit, EntryStatus::Completed) => available -= txn.amount,
                (EntryDirection::Debit, EntryStatus::Pending) => pending += txn.amount,
                _ => {}
            }
        }
        (available, pending)
    }
}
