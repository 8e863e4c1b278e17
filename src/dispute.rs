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

//! Dispute adjudication records.
//!
//! Status machine:
//!
//! ```text
//! Open ──notify──► AwaitingResponse ──accept──────────► Resolved
//!   │                   │ reject-escalate                  ▲
//!   │                   ▼                                  │
//!   │               Escalated ──admin decision─────────────┘
//!   └── (any non-terminal) ──► Cancelled
//! ```
//!
//! Disputes never move money. Resolution computes an award, capped by the
//! category ceiling, which parameterizes the escrow holder's next release
//! for the same subject.

use crate::base::{BookingId, DisputeId, Party, round_minor};
use crate::error::EscrowError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Which held amount the claim pertains to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisputeSubject {
    RoomFee,
    Deposit,
}

/// Severity classification. Each category maps to a configured maximum
/// refund percentage; the classification itself is picked by the claimant
/// and checked by the responder or admin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisputeCategory {
    NotAsDescribed,
    Cleanliness,
    MissingAmenity,
    PropertyDamage,
    ExtraCleaning,
    MissingItem,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisputeStatus {
    Open,
    AwaitingResponse,
    Escalated,
    Resolved,
    Cancelled,
}

impl DisputeStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, DisputeStatus::Resolved | DisputeStatus::Cancelled)
    }
}

/// What the responder does with a claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponderAction {
    Accept,
    RejectEscalate,
}

/// Admin ruling on an escalated dispute.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum AdminDecision {
    FullRefund,
    PartialRefund { amount: Decimal },
    NoRefund,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalOutcome {
    FullRefund,
    PartialRefund,
    NoRefund,
}

/// One adjudication record. At most one non-terminal dispute may exist
/// per booking subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dispute {
    pub id: DisputeId,
    pub booking: BookingId,
    pub subject: DisputeSubject,
    pub category: DisputeCategory,
    pub opened_by: Party,
    /// Amount the claimant asks for. Never exceeds the subject amount.
    pub claimed: Decimal,
    /// Value of the disputed subject (room fee or deposit) at open time.
    pub subject_amount: Decimal,
    /// Category ceiling snapshotted from config at open time.
    pub ceiling_rate: Decimal,
    pub status: DisputeStatus,
    pub opened_at: DateTime<Utc>,
    pub responded_at: Option<DateTime<Utc>>,
    pub escalated_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub awarded: Option<Decimal>,
    pub final_outcome: Option<FinalOutcome>,
}

impl Dispute {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: DisputeId,
        booking: BookingId,
        subject: DisputeSubject,
        category: DisputeCategory,
        opened_by: Party,
        claimed: Decimal,
        subject_amount: Decimal,
        ceiling_rate: Decimal,
        opened_at: DateTime<Utc>,
    ) -> Result<Self, EscrowError> {
        if claimed <= Decimal::ZERO || claimed > subject_amount {
            return Err(EscrowError::InvalidAmount);
        }

        Ok(Self {
            id,
            booking,
            subject,
            category,
            opened_by,
            claimed,
            subject_amount,
            ceiling_rate,
            status: DisputeStatus::Open,
            opened_at,
            responded_at: None,
            escalated_at: None,
            resolved_at: None,
            awarded: None,
            final_outcome: None,
        })
    }

    /// Maximum the claimant can ever be awarded: the category ceiling
    /// applied to the subject amount.
    pub fn max_award(&self) -> Decimal {
        round_minor(self.ceiling_rate * self.subject_amount)
    }

    /// Caps a requested award at the claimed amount and the ceiling.
    fn capped(&self, requested: Decimal) -> Decimal {
        round_minor(requested.min(self.claimed).min(self.max_award()))
    }

    /// A dispute in this state blocks the pending release of its subject.
    pub fn is_blocking(&self) -> bool {
        !self.status.is_terminal()
    }

    /// The responder has been notified and may now act.
    pub fn await_response(&mut self) -> Result<(), EscrowError> {
        if self.status != DisputeStatus::Open {
            return Err(EscrowError::InvalidTransition);
        }
        self.status = DisputeStatus::AwaitingResponse;
        Ok(())
    }

    /// Responder accepts the claim: awards the claimed amount, capped at
    /// the ceiling.
    pub fn accept(&mut self, now: DateTime<Utc>) -> Result<Decimal, EscrowError> {
        if self.status != DisputeStatus::AwaitingResponse {
            return Err(EscrowError::DisputeNotAwaitingResponse);
        }
        let awarded = self.capped(self.claimed);
        self.status = DisputeStatus::Resolved;
        self.responded_at = Some(now);
        self.resolved_at = Some(now);
        self.awarded = Some(awarded);
        self.final_outcome = Some(if awarded == self.claimed {
            FinalOutcome::FullRefund
        } else {
            FinalOutcome::PartialRefund
        });
        Ok(awarded)
    }

    /// Responder rejects; the claim moves to admin review.
    pub fn escalate(&mut self, now: DateTime<Utc>) -> Result<(), EscrowError> {
        if self.status != DisputeStatus::AwaitingResponse {
            return Err(EscrowError::DisputeNotAwaitingResponse);
        }
        self.status = DisputeStatus::Escalated;
        self.responded_at = Some(now);
        self.escalated_at = Some(now);
        Ok(())
    }

    /// Admin decision terminates an escalated dispute.
    pub fn admin_resolve(
        &mut self,
        decision: AdminDecision,
        now: DateTime<Utc>,
    ) -> Result<Decimal, EscrowError> {
        if self.status != DisputeStatus::Escalated {
            return Err(EscrowError::DisputeNotEscalated);
        }
        let (awarded, outcome) = match decision {
            AdminDecision::FullRefund => {
                let awarded = self.capped(self.claimed);
                let outcome = if awarded == self.claimed {
                    FinalOutcome::FullRefund
                } else {
                    FinalOutcome::PartialRefund
                };
                (awarded, outcome)
            }
            AdminDecision::PartialRefund { amount } => {
                if amount <= Decimal::ZERO {
                    return Err(EscrowError::InvalidAmount);
                }
                (self.capped(amount), FinalOutcome::PartialRefund)
            }
            AdminDecision::NoRefund => (Decimal::ZERO, FinalOutcome::NoRefund),
        };
        self.status = DisputeStatus::Resolved;
        self.resolved_at = Some(now);
        self.awarded = Some(awarded);
        self.final_outcome = Some(outcome);
        Ok(awarded)
    }

    /// Claimant withdraws before resolution.
    pub fn cancel(&mut self, now: DateTime<Utc>) -> Result<(), EscrowError> {
        if self.status.is_terminal() {
            return Err(EscrowError::InvalidTransition);
        }
        self.status = DisputeStatus::Cancelled;
        self.resolved_at = Some(now);
        Ok(())
    }
}
