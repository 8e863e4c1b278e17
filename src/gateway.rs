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

//! Payment gateway abstraction.
//!
//! The engine only depends on the verify/transfer capability contract.
//! Which provider serves a booking is per-booking configuration resolved
//! through the [`GatewayRegistry`]; the engine never branches on provider
//! identity beyond selecting the adapter.

use crate::base::Party;
use crate::error::EscrowError;
use dashmap::DashMap;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Supported gateway providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    Paystack,
    Flutterwave,
}

/// Result of verifying a charge reference with the provider.
#[derive(Debug, Clone, PartialEq)]
pub struct Verification {
    pub success: bool,
    pub amount: Decimal,
    pub provider_txn_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    Pending,
    Success,
    Failed,
}

/// Receipt for an initiated transfer.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferReceipt {
    pub reference: String,
    pub status: TransferStatus,
}

/// The capability contract the engine depends on.
pub trait PaymentGateway: Send + Sync + std::fmt::Debug {
    /// Verifies a charge reference and reports the captured amount.
    fn verify(&self, reference: &str) -> Result<Verification, EscrowError>;

    /// Initiates a transfer to a party. May settle immediately or stay
    /// pending for later polling.
    fn transfer(&self, destination: Party, amount: Decimal) -> Result<TransferReceipt, EscrowError>;

    /// Polls the status of an initiated transfer.
    fn transfer_status(&self, reference: &str) -> Result<TransferStatus, EscrowError>;
}

/// Maps providers to adapters. Bookings carry a [`Provider`]; the registry
/// resolves it at call time.
#[derive(Default)]
pub struct GatewayRegistry {
    adapters: HashMap<Provider, Arc<dyn PaymentGateway>>,
}

impl GatewayRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, provider: Provider, adapter: Arc<dyn PaymentGateway>) -> Self {
        self.adapters.insert(provider, adapter);
        self
    }

    pub fn get(&self, provider: Provider) -> Result<Arc<dyn PaymentGateway>, EscrowError> {
        self.adapters
            .get(&provider)
            .cloned()
            .ok_or(EscrowError::ProviderNotRegistered)
    }
}

/// Scriptable in-memory gateway for tests, the CSV replay CLI, and the
/// demo server.
#[derive(Debug, Default)]
pub struct MockGateway {
    /// Charge references primed for verification.
    charges: DashMap<String, Decimal>,
    /// Transfer outcomes: references mapped to their current status.
    transfers: DashMap<String, TransferStatus>,
    /// Executed transfer history `(destination, amount)`.
    history: Mutex<Vec<(Party, Decimal)>>,
    /// Remaining transfer calls that should fail outright.
    failures: AtomicUsize,
    /// When true, new transfers start `Pending` instead of `Success`.
    hold_transfers: std::sync::atomic::AtomicBool,
    sequence: AtomicU64,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Primes a charge reference so `verify` confirms this amount.
    pub fn prime_charge(&self, reference: &str, amount: Decimal) {
        self.charges.insert(reference.to_string(), amount);
    }

    /// Makes the next `n` transfer calls fail with a provider error.
    pub fn fail_next_transfers(&self, n: usize) {
        self.failures.store(n, Ordering::SeqCst);
    }

    /// New transfers stay `Pending` until [`settle_transfers`] is called.
    ///
    /// [`settle_transfers`]: MockGateway::settle_transfers
    pub fn hold_transfers(&self, hold: bool) {
        self.hold_transfers.store(hold, Ordering::SeqCst);
    }

    /// Marks every pending transfer as `Success`.
    pub fn settle_transfers(&self) {
        for mut entry in self.transfers.iter_mut() {
            if *entry.value() == TransferStatus::Pending {
                *entry.value_mut() = TransferStatus::Success;
            }
        }
    }

    /// Marks every pending transfer as `Failed`.
    pub fn reject_transfers(&self) {
        for mut entry in self.transfers.iter_mut() {
            if *entry.value() == TransferStatus::Pending {
                *entry.value_mut() = TransferStatus::Failed;
            }
        }
    }

    /// Executed transfers, in order.
    pub fn transfer_history(&self) -> Vec<(Party, Decimal)> {
        self.history.lock().clone()
    }
}

impl PaymentGateway for MockGateway {
    fn verify(&self, reference: &str) -> Result<Verification, EscrowError> {
        match self.charges.get(reference) {
            Some(amount) => Ok(Verification {
                success: true,
                amount: *amount,
                provider_txn_id: format!("mock-{reference}"),
            }),
            None => Ok(Verification {
                success: false,
                amount: Decimal::ZERO,
                provider_txn_id: String::new(),
            }),
        }
    }

    fn transfer(&self, destination: Party, amount: Decimal) -> Result<TransferReceipt, EscrowError> {
        loop {
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining == 0 {
                break;
            }
            if self
                .failures
                .compare_exchange(remaining, remaining - 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return Err(EscrowError::Provider("transfer declined".to_string()));
            }
        }

        let status = if self.hold_transfers.load(Ordering::SeqCst) {
            TransferStatus::Pending
        } else {
            TransferStatus::Success
        };
        let reference = format!("trf-{}", self.sequence.fetch_add(1, Ordering::SeqCst));
        self.transfers.insert(reference.clone(), status);
        self.history.lock().push((destination, amount));
        Ok(TransferReceipt { reference, status })
    }

    fn transfer_status(&self, reference: &str) -> Result<TransferStatus, EscrowError> {
        self.transfers
            .get(reference)
            .map(|status| *status)
            .ok_or_else(|| EscrowError::Provider("unknown transfer reference".to_string()))
    }
}
