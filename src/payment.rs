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

//! Funds-custody record, one per booking.
//!
//! Payment status machine:
//!
//! ```text
//! Initiated ──capture──► Held ──room-fee split──► PartiallyReleased ──deposit──► Settled
//!     │                    │
//!     └────────────────────┴──► Refunded (cancellation) / Failed (retries exhausted)
//! ```

use crate::base::BookingId;
use crate::error::EscrowError;
use crate::fees::FeeQuote;
use crate::gateway::Provider;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Initiated,
    Held,
    PartiallyReleased,
    Settled,
    Refunded,
    Failed,
}

impl PaymentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PaymentStatus::Settled | PaymentStatus::Refunded | PaymentStatus::Failed
        )
    }
}

/// Custody record for one booking's captured funds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub booking: BookingId,
    pub provider: Provider,
    pub status: PaymentStatus,
    /// Amount charged to the guest; equals the fee breakdown total.
    pub captured: Decimal,
    pub provider_txn_id: Option<String>,
    /// Fee terms snapshotted at pricing time. Live config changes never
    /// re-price a captured booking.
    pub quote: FeeQuote,
    pub room_fee_in_escrow: bool,
    pub deposit_in_escrow: bool,
    pub room_fee_released_at: Option<DateTime<Utc>>,
    pub deposit_released_at: Option<DateTime<Utc>>,
    /// Dispute-awarded refund deducted from the room fee before the split.
    pub room_fee_refund: Decimal,
    /// Dispute-awarded deduction paid to the operator from the deposit.
    pub deposit_deduction: Decimal,
    pub room_fee_attempts: u32,
    pub deposit_attempts: u32,
    /// Set when the transfer retry budget is exhausted; the payment is
    /// parked for manual operator review.
    pub needs_review: bool,
}

impl Payment {
    pub fn new(booking: BookingId, provider: Provider, captured: Decimal, quote: FeeQuote) -> Self {
        Self {
            booking,
            provider,
            status: PaymentStatus::Initiated,
            captured,
            provider_txn_id: None,
            quote,
            room_fee_in_escrow: false,
            deposit_in_escrow: false,
            room_fee_released_at: None,
            deposit_released_at: None,
            room_fee_refund: Decimal::ZERO,
            deposit_deduction: Decimal::ZERO,
            room_fee_attempts: 0,
            deposit_attempts: 0,
            needs_review: false,
        }
    }

    pub fn mark_held(&mut self) -> Result<(), EscrowError> {
        if self.status != PaymentStatus::Initiated {
            return Err(EscrowError::InvalidTransition);
        }
        self.status = PaymentStatus::Held;
        self.room_fee_in_escrow = true;
        self.deposit_in_escrow = true;
        Ok(())
    }

    pub fn mark_room_fee_released(&mut self, now: DateTime<Utc>) -> Result<(), EscrowError> {
        if self.status != PaymentStatus::Held {
            return Err(EscrowError::InvalidTransition);
        }
        self.status = PaymentStatus::PartiallyReleased;
        self.room_fee_in_escrow = false;
        self.room_fee_released_at = Some(now);
        Ok(())
    }

    pub fn mark_settled(&mut self, now: DateTime<Utc>) -> Result<(), EscrowError> {
        if self.status != PaymentStatus::PartiallyReleased {
            return Err(EscrowError::InvalidTransition);
        }
        self.status = PaymentStatus::Settled;
        self.deposit_in_escrow = false;
        self.deposit_released_at = Some(now);
        Ok(())
    }

    pub fn mark_refunded(&mut self) -> Result<(), EscrowError> {
        if self.status.is_terminal() {
            return Err(EscrowError::InvalidTransition);
        }
        self.status = PaymentStatus::Refunded;
        self.room_fee_in_escrow = false;
        self.deposit_in_escrow = false;
        Ok(())
    }

    /// Parks the payment for manual review after the retry budget runs
    /// out. Escrow flags stay set: the funds are still in custody.
    pub fn mark_failed(&mut self) {
        self.status = PaymentStatus::Failed;
        self.needs_review = true;
    }

    /// Room-fee settlement has reached a terminal outcome (released,
    /// refunded, or parked for review). Deposit release is ordered after
    /// this.
    pub fn room_fee_settled(&self) -> bool {
        !self.room_fee_in_escrow
            || matches!(self.status, PaymentStatus::Refunded | PaymentStatus::Failed)
    }
}
