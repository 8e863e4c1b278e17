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

//! Fee and commission calculator.
//!
//! Pure computation: given a room fee, the operator's trailing monthly
//! room-fee volume, and the processing mode, produce the full fee
//! breakdown. Callers persist the returned [`FeeQuote`] on the payment
//! record at capture time; recalculating the live config later never
//! changes an already-priced booking.

use crate::base::round_minor;
use crate::config::{PlatformConfig, ProcessingFeeTerms};
use crate::error::EscrowError;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// How the guest's charge is processed. Local charges have a capped
/// processing fee; international ones do not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingMode {
    Local,
    International,
}

/// Deterministic fee breakdown for one booking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeQuote {
    /// Version of the config this quote was priced against.
    pub config_version: u32,
    /// Commission rate from the matched volume tier.
    pub base_commission_rate: Decimal,
    /// Volume-discount reduction actually applied.
    pub volume_discount: Decimal,
    /// Effective commission rate: `base - discount`, floored at zero.
    pub commission_rate: Decimal,
    /// Guest-facing platform service fee, computed on room + cleaning.
    pub service_fee: Decimal,
    /// Provider processing cost, absorbed by the platform.
    pub processing_fee: Decimal,
}

/// Prices a booking against a configuration snapshot.
///
/// The commission rate applies to the room fee at release time; the
/// service fee is charged to the guest on `room_fee + cleaning_fee`.
///
/// # Errors
///
/// - [`EscrowError::InvalidAmount`] for a non-positive room fee or a
///   negative cleaning fee or trailing volume.
/// - [`EscrowError::ConfigurationMissing`] if no commission tier matches
///   the trailing volume.
pub fn quote(
    config: &PlatformConfig,
    room_fee: Decimal,
    cleaning_fee: Decimal,
    trailing_volume: Decimal,
    mode: ProcessingMode,
) -> Result<FeeQuote, EscrowError> {
    if room_fee <= Decimal::ZERO || cleaning_fee < Decimal::ZERO {
        return Err(EscrowError::InvalidAmount);
    }
    if trailing_volume < Decimal::ZERO {
        return Err(EscrowError::InvalidAmount);
    }

    let base_commission_rate = match_tier(config, trailing_volume)?;
    let volume_discount = match_discount(config, trailing_volume);
    let commission_rate = (base_commission_rate - volume_discount).max(Decimal::ZERO);

    let service_base = room_fee + cleaning_fee;
    let service_fee = service_fee_on(config, service_base);

    let charge_total = service_base + service_fee + config.platform_fixed_fee;
    let processing_fee = processing_fee_on(config.processing_terms(mode), charge_total);

    Ok(FeeQuote {
        config_version: config.version,
        base_commission_rate,
        volume_discount,
        commission_rate,
        service_fee,
        processing_fee,
    })
}

/// Highest tier whose floor is at or below the trailing volume.
fn match_tier(config: &PlatformConfig, trailing_volume: Decimal) -> Result<Decimal, EscrowError> {
    config
        .commission_tiers
        .iter()
        .filter(|tier| tier.min_volume <= trailing_volume)
        .max_by_key(|tier| tier.min_volume)
        .map(|tier| tier.rate)
        .ok_or(EscrowError::ConfigurationMissing)
}

/// Matched volume discount, clamped to the configured maximum.
fn match_discount(config: &PlatformConfig, trailing_volume: Decimal) -> Decimal {
    config
        .volume_discounts
        .iter()
        .filter(|rule| rule.min_volume <= trailing_volume)
        .max_by_key(|rule| rule.min_volume)
        .map(|rule| rule.discount.min(config.max_volume_discount))
        .unwrap_or(Decimal::ZERO)
}

fn service_fee_on(config: &PlatformConfig, base: Decimal) -> Decimal {
    let terms = &config.service_fee;
    let fee = terms.rate * base + terms.fixed;
    let fee = if base >= terms.cap_trigger {
        fee.min(terms.cap)
    } else {
        fee
    };
    round_minor(fee)
}

fn processing_fee_on(terms: &ProcessingFeeTerms, amount: Decimal) -> Decimal {
    let fee = terms.rate * amount + terms.fixed;
    let fee = match terms.cap {
        Some(cap) => fee.min(cap),
        None => fee,
    };
    round_minor(fee)
}

impl PlatformConfig {
    /// Processing terms for a charge mode.
    pub fn processing_terms(&self, mode: ProcessingMode) -> &ProcessingFeeTerms {
        match mode {
            ProcessingMode::Local => &self.processing_local,
            ProcessingMode::International => &self.processing_international,
        }
    }
}
