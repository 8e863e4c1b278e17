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

//! Platform settings: commission tiers, fee terms, refund ceilings, and
//! escrow timing.
//!
//! Configuration is read at pricing time and snapshotted onto the payment
//! record, so replacing the live config never retroactively re-prices a
//! booking that has already been captured.

use crate::base::round_minor;
use crate::dispute::DisputeCategory;
use chrono::Duration;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// One commission bracket. The highest `min_volume` at or below the
/// operator's trailing monthly volume wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommissionTier {
    pub min_volume: Decimal,
    /// Base commission as a decimal fraction (0.10 = 10%).
    pub rate: Decimal,
}

/// One volume-discount bracket, matched like [`CommissionTier`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeDiscountRule {
    pub min_volume: Decimal,
    /// Reduction subtracted from the base commission rate.
    pub discount: Decimal,
}

/// Platform service fee: percentage plus fixed, capped above a trigger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceFeeTerms {
    pub rate: Decimal,
    pub fixed: Decimal,
    /// Maximum fee once the base amount reaches `cap_trigger`.
    pub cap: Decimal,
    pub cap_trigger: Decimal,
}

/// Payment-processing fee terms. `cap` is `Some` for local charges and
/// `None` for international ones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingFeeTerms {
    pub rate: Decimal,
    pub fixed: Decimal,
    pub cap: Option<Decimal>,
}

/// Flat withdrawal fee for amounts at or above `min_amount`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawalFeeBand {
    pub min_amount: Decimal,
    pub fee: Decimal,
}

/// Escrow timing policy and retry budget.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowTiming {
    /// Hours after the scheduled check-in before the sweep confirms
    /// check-in automatically.
    pub checkin_grace_hours: i64,
    /// Hours between actual check-in and room-fee release. This is the
    /// room-fee dispute window.
    pub room_fee_hold_hours: i64,
    /// Hours between actual check-out and deposit release. This is the
    /// deposit dispute window.
    pub deposit_hold_hours: i64,
    /// Hours an unanswered dispute may sit before the sweep escalates it
    /// to admin review.
    pub dispute_escalation_hours: i64,
    /// Provider transfer attempts per subject before the payment is
    /// flagged for manual review.
    pub max_transfer_attempts: u32,
}

impl EscrowTiming {
    pub fn checkin_grace(&self) -> Duration {
        Duration::hours(self.checkin_grace_hours)
    }

    pub fn room_fee_hold(&self) -> Duration {
        Duration::hours(self.room_fee_hold_hours)
    }

    pub fn deposit_hold(&self) -> Duration {
        Duration::hours(self.deposit_hold_hours)
    }

    pub fn dispute_escalation_age(&self) -> Duration {
        Duration::hours(self.dispute_escalation_hours)
    }
}

/// Versioned, immutable platform configuration snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlatformConfig {
    pub version: u32,
    pub commission_tiers: Vec<CommissionTier>,
    pub volume_discounts: Vec<VolumeDiscountRule>,
    /// Ceiling on the total volume-discount reduction.
    pub max_volume_discount: Decimal,
    pub service_fee: ServiceFeeTerms,
    pub processing_local: ProcessingFeeTerms,
    pub processing_international: ProcessingFeeTerms,
    /// Fixed platform surcharge added to the guest's capture total.
    pub platform_fixed_fee: Decimal,
    /// Maximum refund, as a fraction of the subject amount, per dispute
    /// category.
    pub dispute_ceilings: HashMap<DisputeCategory, Decimal>,
    pub withdrawal_fees: Vec<WithdrawalFeeBand>,
    pub timing: EscrowTiming,
}

impl PlatformConfig {
    /// The default fee schedule.
    pub fn default_config() -> Self {
        Self {
            version: 1,
            commission_tiers: vec![
                CommissionTier {
                    min_volume: Decimal::ZERO,
                    rate: dec!(0.10),
                },
                CommissionTier {
                    min_volume: dec!(500000),
                    rate: dec!(0.085),
                },
                CommissionTier {
                    min_volume: dec!(2000000),
                    rate: dec!(0.07),
                },
            ],
            volume_discounts: vec![
                VolumeDiscountRule {
                    min_volume: Decimal::ZERO,
                    discount: Decimal::ZERO,
                },
                VolumeDiscountRule {
                    min_volume: dec!(1000000),
                    discount: dec!(0.005),
                },
                VolumeDiscountRule {
                    min_volume: dec!(5000000),
                    discount: dec!(0.01),
                },
            ],
            max_volume_discount: dec!(0.02),
            service_fee: ServiceFeeTerms {
                rate: dec!(0.02),
                fixed: Decimal::ZERO,
                cap: dec!(50000),
                cap_trigger: dec!(2500000),
            },
            processing_local: ProcessingFeeTerms {
                rate: dec!(0.015),
                fixed: dec!(100),
                cap: Some(dec!(2000)),
            },
            processing_international: ProcessingFeeTerms {
                rate: dec!(0.039),
                fixed: dec!(100),
                cap: None,
            },
            platform_fixed_fee: Decimal::ZERO,
            dispute_ceilings: HashMap::from([
                (DisputeCategory::NotAsDescribed, dec!(0.5)),
                (DisputeCategory::Cleanliness, dec!(0.3)),
                (DisputeCategory::MissingAmenity, dec!(0.5)),
                (DisputeCategory::PropertyDamage, dec!(1.0)),
                (DisputeCategory::ExtraCleaning, dec!(0.5)),
                (DisputeCategory::MissingItem, dec!(0.8)),
            ]),
            withdrawal_fees: vec![
                WithdrawalFeeBand {
                    min_amount: Decimal::ZERO,
                    fee: dec!(50),
                },
                WithdrawalFeeBand {
                    min_amount: dec!(50000),
                    fee: dec!(100),
                },
            ],
            timing: EscrowTiming {
                checkin_grace_hours: 6,
                room_fee_hold_hours: 24,
                deposit_hold_hours: 48,
                dispute_escalation_hours: 72,
                max_transfer_attempts: 5,
            },
        }
    }

    /// Refund ceiling for a dispute category, if configured.
    pub fn ceiling_for(&self, category: DisputeCategory) -> Option<Decimal> {
        self.dispute_ceilings.get(&category).copied()
    }

    /// Flat withdrawal fee for an amount. Highest matching band wins.
    pub fn withdrawal_fee(&self, amount: Decimal) -> Option<Decimal> {
        self.withdrawal_fees
            .iter()
            .filter(|band| band.min_amount <= amount)
            .max_by_key(|band| band.min_amount)
            .map(|band| round_minor(band.fee))
    }
}

/// Read-only view of the live configuration.
pub trait SettingsStore: Send + Sync {
    fn current(&self) -> Arc<PlatformConfig>;
}

/// In-memory settings store with hot replacement.
///
/// Replacing the config affects future pricing only; captured bookings keep
/// the snapshot persisted on their payment record.
#[derive(Debug)]
pub struct InMemorySettings {
    inner: Mutex<Arc<PlatformConfig>>,
}

impl InMemorySettings {
    pub fn new(config: PlatformConfig) -> Self {
        Self {
            inner: Mutex::new(Arc::new(config)),
        }
    }

    pub fn replace(&self, config: PlatformConfig) {
        *self.inner.lock() = Arc::new(config);
    }
}

impl Default for InMemorySettings {
    fn default() -> Self {
        Self::new(PlatformConfig::default_config())
    }
}

impl SettingsStore for InMemorySettings {
    fn current(&self) -> Arc<PlatformConfig> {
        Arc::clone(&self.inner.lock())
    }
}
