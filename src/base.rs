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

//! Core identifier types, settlement parties, and money helpers.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// ISO 4217 code for all amounts handled by the engine.
///
/// The engine performs no currency conversion; every captured amount,
/// ledger row, and escrow event is denominated in this currency.
pub const CURRENCY: &str = "NGN";

/// Number of decimal places in the minor currency unit.
pub const MINOR_UNIT_DP: u32 = 2;

/// Rounds an amount to the minor currency unit.
///
/// `Decimal::round_dp` uses banker's rounding (round half to even), which
/// keeps repeated fee computations from drifting in one direction.
pub fn round_minor(amount: Decimal) -> Decimal {
    amount.round_dp(MINOR_UNIT_DP)
}

/// Unique identifier for a booking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(transparent)]
pub struct BookingId(pub u64);

impl fmt::Display for BookingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a guest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(transparent)]
pub struct GuestId(pub u64);

impl fmt::Display for GuestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a property operator (host).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(transparent)]
pub struct OperatorId(pub u64);

impl fmt::Display for OperatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a property listing.
///
/// Listing CRUD lives outside the engine; bookings only carry the reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(transparent)]
pub struct PropertyId(pub u64);

impl fmt::Display for PropertyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a dispute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(transparent)]
pub struct DisputeId(pub u64);

impl fmt::Display for DisputeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A source or destination of a money movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Party {
    /// The paying guest. Guests hold no wallet; money reaching a guest
    /// leaves through a gateway refund transfer.
    Guest(GuestId),
    /// A property operator, paid into an operator wallet.
    Operator(OperatorId),
    /// The platform itself.
    Platform,
}

impl fmt::Display for Party {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Party::Guest(id) => write!(f, "guest:{id}"),
            Party::Operator(id) => write!(f, "operator:{id}"),
            Party::Platform => write!(f, "platform"),
        }
    }
}

/// Owner of a wallet in the ledger store.
///
/// Only operators and the platform accumulate balances; guest refunds are
/// executed through the payment gateway and recorded as escrow events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum WalletOwner {
    Operator(OperatorId),
    Platform,
}

impl WalletOwner {
    pub fn party(&self) -> Party {
        match self {
            WalletOwner::Operator(id) => Party::Operator(*id),
            WalletOwner::Platform => Party::Platform,
        }
    }
}

impl fmt::Display for WalletOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WalletOwner::Operator(id) => write!(f, "operator:{id}"),
            WalletOwner::Platform => write!(f, "platform"),
        }
    }
}
