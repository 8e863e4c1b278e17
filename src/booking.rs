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

//! Booking lifecycle.
//!
//! Status machine:
//!
//! ```text
//! Pending ──paid──► Paid ──check-in──► CheckedIn ──checkout──► CheckedOut ──► Completed
//!    │               │                    │    ▲                   ▲
//!    │               │                 dispute │                   │
//!    └──cancel───────┴──► Cancelled       ▼    │ resolve/cancel    │
//!                                    DisputeOpened ──checkout──────┘
//! ```
//!
//! Timers are stamped on transitions: check-in sets the room-fee release
//! deadline (the room-fee dispute window), checkout sets the deposit
//! release deadline (the deposit dispute window).

use crate::base::{BookingId, GuestId, OperatorId, PropertyId};
use crate::error::EscrowError;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Pending,
    Paid,
    CheckedIn,
    DisputeOpened,
    CheckedOut,
    Completed,
    Cancelled,
}

/// Guest-facing price breakdown. The capture total is the exact sum of
/// these components.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeBreakdown {
    /// Nightly-rate portion, escrowed until after check-in.
    pub room_fee: Decimal,
    /// Paid to the operator immediately on capture.
    pub cleaning_fee: Decimal,
    /// Platform service fee, paid to the platform immediately on capture.
    pub service_fee: Decimal,
    /// Fixed platform surcharge; zero in the default schedule.
    pub platform_fee: Decimal,
    /// Escrowed until after checkout.
    pub security_deposit: Decimal,
}

impl FeeBreakdown {
    /// The amount the guest is charged.
    pub fn captured_total(&self) -> Decimal {
        self.room_fee
            + self.cleaning_fee
            + self.service_fee
            + self.platform_fee
            + self.security_deposit
    }
}

/// One guest stay. Never physically deleted; terminal states are reached
/// through status transitions only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Booking {
    pub id: BookingId,
    pub guest: GuestId,
    pub operator: OperatorId,
    pub property: PropertyId,
    pub scheduled_check_in: DateTime<Utc>,
    pub scheduled_check_out: DateTime<Utc>,
    pub fees: FeeBreakdown,
    pub status: BookingStatus,
    pub actual_check_in: Option<DateTime<Utc>>,
    pub actual_check_out: Option<DateTime<Utc>>,
    /// Room-fee release deadline; also the close of the room-fee dispute
    /// window. Stamped at check-in.
    pub room_fee_release_at: Option<DateTime<Utc>>,
    /// Deposit release deadline; also the close of the deposit dispute
    /// window. Stamped at checkout.
    pub deposit_release_at: Option<DateTime<Utc>>,
}

impl Booking {
    pub fn new(
        id: BookingId,
        guest: GuestId,
        operator: OperatorId,
        property: PropertyId,
        scheduled_check_in: DateTime<Utc>,
        scheduled_check_out: DateTime<Utc>,
        fees: FeeBreakdown,
    ) -> Result<Self, EscrowError> {
        if fees.room_fee <= Decimal::ZERO
            || fees.cleaning_fee < Decimal::ZERO
            || fees.service_fee < Decimal::ZERO
            || fees.platform_fee < Decimal::ZERO
            || fees.security_deposit < Decimal::ZERO
        {
            return Err(EscrowError::InvalidAmount);
        }
        if scheduled_check_out <= scheduled_check_in {
            return Err(EscrowError::InvalidDateRange);
        }

        Ok(Self {
            id,
            guest,
            operator,
            property,
            scheduled_check_in,
            scheduled_check_out,
            fees,
            status: BookingStatus::Pending,
            actual_check_in: None,
            actual_check_out: None,
            room_fee_release_at: None,
            deposit_release_at: None,
        })
    }

    pub fn mark_paid(&mut self) -> Result<(), EscrowError> {
        if self.status != BookingStatus::Pending {
            return Err(EscrowError::InvalidTransition);
        }
        self.status = BookingStatus::Paid;
        Ok(())
    }

    /// Confirms check-in and opens the room-fee dispute window.
    pub fn check_in(&mut self, now: DateTime<Utc>, hold: Duration) -> Result<(), EscrowError> {
        if self.status != BookingStatus::Paid {
            return Err(EscrowError::InvalidTransition);
        }
        self.status = BookingStatus::CheckedIn;
        self.actual_check_in = Some(now);
        self.room_fee_release_at = Some(now + hold);
        Ok(())
    }

    /// Flags an open room-fee dispute on the booking itself.
    pub fn mark_dispute_opened(&mut self) -> Result<(), EscrowError> {
        if self.status != BookingStatus::CheckedIn {
            return Err(EscrowError::InvalidTransition);
        }
        self.status = BookingStatus::DisputeOpened;
        Ok(())
    }

    /// Clears the dispute flag once the room-fee dispute terminates
    /// before checkout.
    pub fn clear_dispute_flag(&mut self) {
        if self.status == BookingStatus::DisputeOpened {
            self.status = BookingStatus::CheckedIn;
        }
    }

    /// Confirms checkout and opens the deposit dispute window.
    pub fn check_out(&mut self, now: DateTime<Utc>, hold: Duration) -> Result<(), EscrowError> {
        if !matches!(
            self.status,
            BookingStatus::CheckedIn | BookingStatus::DisputeOpened
        ) {
            return Err(EscrowError::InvalidTransition);
        }
        self.status = BookingStatus::CheckedOut;
        self.actual_check_out = Some(now);
        self.deposit_release_at = Some(now + hold);
        Ok(())
    }

    pub fn complete(&mut self) -> Result<(), EscrowError> {
        if self.status != BookingStatus::CheckedOut {
            return Err(EscrowError::InvalidTransition);
        }
        self.status = BookingStatus::Completed;
        Ok(())
    }

    pub fn cancel(&mut self) -> Result<(), EscrowError> {
        if !matches!(self.status, BookingStatus::Pending | BookingStatus::Paid) {
            return Err(EscrowError::InvalidTransition);
        }
        self.status = BookingStatus::Cancelled;
        Ok(())
    }

    /// Whether a room-fee dispute may still be opened.
    pub fn room_fee_window_open(&self, now: DateTime<Utc>) -> bool {
        matches!(self.status, BookingStatus::CheckedIn)
            && self
                .room_fee_release_at
                .map(|deadline| now < deadline)
                .unwrap_or(false)
    }

    /// Whether a deposit dispute may still be opened.
    pub fn deposit_window_open(&self, now: DateTime<Utc>) -> bool {
        matches!(self.status, BookingStatus::CheckedOut)
            && self
                .deposit_release_at
                .map(|deadline| now < deadline)
                .unwrap_or(false)
    }
}
