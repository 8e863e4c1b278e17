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

//! Notification dispatch on state transitions.
//!
//! Fire-and-forget: a failed dispatch is logged and never rolls back the
//! financial transition that triggered it. Message content and delivery
//! live outside the engine.

use crate::base::{BookingId, Party, WalletOwner};
use crate::dispute::DisputeSubject;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// State transitions worth telling the outside world about.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Notification {
    BookingPaid {
        booking: BookingId,
        amount: Decimal,
    },
    DisputeOpened {
        booking: BookingId,
        subject: DisputeSubject,
    },
    DisputeEscalated {
        booking: BookingId,
        subject: DisputeSubject,
    },
    DisputeResolved {
        booking: BookingId,
        subject: DisputeSubject,
        awarded: Decimal,
    },
    PayoutCompleted {
        booking: BookingId,
        destination: Party,
        amount: Decimal,
    },
    DepositRefunded {
        booking: BookingId,
        amount: Decimal,
    },
    SettlementCompleted {
        booking: BookingId,
    },
    ReleaseFailed {
        booking: BookingId,
        subject: DisputeSubject,
        attempts: u32,
    },
    WithdrawalSettled {
        owner: WalletOwner,
        amount: Decimal,
    },
    WithdrawalFailed {
        owner: WalletOwner,
        amount: Decimal,
    },
}

/// Delivery failure. Carried for logging only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotifyError(pub String);

impl std::fmt::Display for NotifyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "notification dispatch failed: {}", self.0)
    }
}

/// Dispatches notifications to the outside world.
pub trait NotificationDispatcher: Send + Sync {
    fn dispatch(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Discards everything. The default for embedded and test use.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullDispatcher;

impl NotificationDispatcher for NullDispatcher {
    fn dispatch(&self, _notification: &Notification) -> Result<(), NotifyError> {
        Ok(())
    }
}

/// Records dispatched notifications for assertions.
#[derive(Debug, Default)]
pub struct RecordingDispatcher {
    sent: Mutex<Vec<Notification>>,
    /// When true, every dispatch reports failure (delivery still recorded).
    pub fail_all: std::sync::atomic::AtomicBool,
}

impl RecordingDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().clone()
    }
}

impl NotificationDispatcher for RecordingDispatcher {
    fn dispatch(&self, notification: &Notification) -> Result<(), NotifyError> {
        self.sent.lock().push(notification.clone());
        if self.fail_all.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(NotifyError("scripted failure".to_string()));
        }
        Ok(())
    }
}
