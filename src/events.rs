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

//! Escrow event log: an append-only audit trail of every money movement.
//!
//! Events are never mutated. The current escrow position of a booking is a
//! fold over its events, which is what reconciliation and replay-based
//! tests lean on.

use crate::base::{BookingId, Party};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscrowEventKind {
    /// Funds captured from the guest and taken into custody.
    Hold,
    /// Held or captured funds credited to a payee wallet.
    ReleaseSplit,
    /// Held funds returned to the guest through the gateway.
    Refund,
    /// Deposit portion awarded to the operator after a dispute.
    DepositDeduction,
    /// A provider-side transfer attempt failed; funds stay held.
    TransferFailed,
}

impl EscrowEventKind {
    /// Whether the event moves money out of custody.
    pub fn is_outbound(&self) -> bool {
        matches!(
            self,
            EscrowEventKind::ReleaseSplit
                | EscrowEventKind::Refund
                | EscrowEventKind::DepositDeduction
        )
    }
}

/// Immutable audit record of one money movement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscrowEvent {
    pub kind: EscrowEventKind,
    pub booking: BookingId,
    pub amount: Decimal,
    pub currency: String,
    pub source: Party,
    pub destination: Party,
    pub executed_at: DateTime<Utc>,
    /// Idempotency reference; recording the same reference twice is a
    /// no-op.
    pub reference: String,
}

/// Append-only event log with idempotent recording.
#[derive(Debug, Default)]
pub struct EventLog {
    by_reference: DashMap<String, Arc<EscrowEvent>>,
    by_booking: DashMap<BookingId, Mutex<Vec<Arc<EscrowEvent>>>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an event. Returns `false` (and keeps the original) if the
    /// reference was already recorded.
    pub fn record(&self, event: EscrowEvent) -> bool {
        match self.by_reference.entry(event.reference.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                let event = Arc::new(event);
                slot.insert(Arc::clone(&event));
                self.by_booking
                    .entry(event.booking)
                    .or_default()
                    .lock()
                    .push(event);
                true
            }
        }
    }

    /// A booking's event history in recording order.
    pub fn for_booking(&self, booking: BookingId) -> Vec<Arc<EscrowEvent>> {
        self.by_booking
            .get(&booking)
            .map(|events| events.lock().clone())
            .unwrap_or_default()
    }

    /// Folds a booking's events to the amount currently in custody.
    pub fn held_for_booking(&self, booking: BookingId) -> Decimal {
        self.for_booking(booking)
            .iter()
            .fold(Decimal::ZERO, |held, event| match event.kind {
                EscrowEventKind::Hold => held + event.amount,
                kind if kind.is_outbound() => held - event.amount,
                _ => held,
            })
    }

    /// Total amount that has left custody for a booking. Must never
    /// exceed the captured amount.
    pub fn released_for_booking(&self, booking: BookingId) -> Decimal {
        self.for_booking(booking)
            .iter()
            .filter(|event| event.kind.is_outbound())
            .map(|event| event.amount)
            .sum()
    }

    pub fn len(&self) -> usize {
        self.by_reference.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_reference.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::{CURRENCY, GuestId, OperatorId};
    use rust_decimal_macros::dec;

    fn at() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-06-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn event(kind: EscrowEventKind, amount: Decimal, reference: &str) -> EscrowEvent {
        EscrowEvent {
            kind,
            booking: BookingId(1),
            amount,
            currency: CURRENCY.to_string(),
            source: Party::Guest(GuestId(10)),
            destination: Party::Operator(OperatorId(20)),
            executed_at: at(),
            reference: reference.to_string(),
        }
    }

    #[test]
    fn record_is_idempotent_by_reference() {
        let log = EventLog::new();
        assert!(log.record(event(EscrowEventKind::Hold, dec!(60000), "hold")));
        assert!(!log.record(event(EscrowEventKind::Hold, dec!(60000), "hold")));
        assert_eq!(log.len(), 1);
        assert_eq!(log.for_booking(BookingId(1)).len(), 1);
    }

    #[test]
    fn held_amount_is_a_fold_over_events() {
        let log = EventLog::new();
        log.record(event(EscrowEventKind::Hold, dec!(60000), "hold"));
        log.record(event(EscrowEventKind::ReleaseSplit, dec!(45000), "op"));
        log.record(event(EscrowEventKind::ReleaseSplit, dec!(5000), "pf"));
        log.record(event(EscrowEventKind::Refund, dec!(10000), "refund"));

        assert_eq!(log.held_for_booking(BookingId(1)), Decimal::ZERO);
        assert_eq!(log.released_for_booking(BookingId(1)), dec!(60000));
    }

    #[test]
    fn failed_transfers_do_not_move_custody() {
        let log = EventLog::new();
        log.record(event(EscrowEventKind::Hold, dec!(60000), "hold"));
        log.record(event(EscrowEventKind::TransferFailed, dec!(10000), "fail:1"));

        assert_eq!(log.held_for_booking(BookingId(1)), dec!(60000));
        assert_eq!(log.released_for_booking(BookingId(1)), Decimal::ZERO);
    }

    #[test]
    fn unknown_booking_has_no_history() {
        let log = EventLog::new();
        assert!(log.for_booking(BookingId(99)).is_empty());
        assert_eq!(log.held_for_booking(BookingId(99)), Decimal::ZERO);
    }
}
