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

//! Escrow holder: custody choreography for one booking's captured funds.
//!
//! Every money movement posts an idempotent ledger row and an escrow
//! event under a deterministic reference derived from the booking id, so
//! a crashed or repeated sweep can safely re-drive any operation.
//! Releases are skipped, not failed, while a dispute blocks their subject;
//! the next sweep retries them.

use crate::base::{CURRENCY, Party, WalletOwner, round_minor};
use crate::booking::Booking;
use crate::clock::Clock;
use crate::config::SettingsStore;
use crate::dispute::{Dispute, DisputeSubject};
use crate::error::EscrowError;
use crate::events::{EscrowEvent, EscrowEventKind, EventLog};
use crate::gateway::GatewayRegistry;
use crate::ledger::LedgerStore;
use crate::payment::{Payment, PaymentStatus};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Mutable per-booking state: the booking, its payment, and its disputes,
/// locked together so capture and release decisions are atomic.
#[derive(Debug)]
pub struct BookingCase {
    pub booking: Booking,
    pub payment: Payment,
    pub disputes: Vec<Dispute>,
}

impl BookingCase {
    pub fn new(booking: Booking, payment: Payment) -> Self {
        Self {
            booking,
            payment,
            disputes: Vec::new(),
        }
    }

    /// The dispute currently blocking a subject's release, if any.
    pub fn blocking_dispute(&self, subject: DisputeSubject) -> Option<&Dispute> {
        self.disputes
            .iter()
            .find(|dispute| dispute.subject == subject && dispute.is_blocking())
    }

    pub fn blocking_dispute_mut(&mut self, subject: DisputeSubject) -> Option<&mut Dispute> {
        self.disputes
            .iter_mut()
            .find(|dispute| dispute.subject == subject && dispute.is_blocking())
    }
}

/// Amounts moved by an executed release.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitExecution {
    pub operator_credit: Decimal,
    pub platform_credit: Decimal,
    pub guest_refund: Decimal,
}

/// What a release attempt did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    Executed(SplitExecution),
    /// An open dispute blocks this subject; retried on the next sweep.
    Blocked,
    /// The subject already left escrow; nothing to do.
    AlreadyReleased,
    /// Deposit release is ordered after room-fee settlement.
    AwaitingRoomFee,
    /// The provider transfer failed; retried until the budget runs out.
    TransferFailed { attempts: u32, exhausted: bool },
    /// The payment is parked for manual review; the sweep leaves it alone.
    UnderReview,
}

/// Owns custody of booking funds from capture to final disbursement.
pub struct EscrowHolder {
    ledger: Arc<LedgerStore>,
    events: Arc<EventLog>,
    gateways: Arc<GatewayRegistry>,
    settings: Arc<dyn SettingsStore>,
    clock: Arc<dyn Clock>,
}

impl EscrowHolder {
    pub fn new(
        ledger: Arc<LedgerStore>,
        events: Arc<EventLog>,
        gateways: Arc<GatewayRegistry>,
        settings: Arc<dyn SettingsStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            ledger,
            events,
            gateways,
            settings,
            clock,
        }
    }

    /// Takes custody of a captured payment: pays out the immediate
    /// components (cleaning fee to the operator, service and platform
    /// fees to the platform) and escrow-holds the room fee and deposit.
    ///
    /// Idempotent on the booking: a repeat call with the same captured
    /// amount is a no-op.
    pub fn hold_funds(&self, case: &mut BookingCase) -> Result<(), EscrowError> {
        if case.payment.status != PaymentStatus::Initiated {
            // Already held (or further along): repeat capture is a no-op.
            debug!(booking = %case.booking.id, "hold_funds repeated, no-op");
            return Ok(());
        }

        let fees = case.booking.fees;
        if fees.captured_total() != case.payment.captured {
            return Err(EscrowError::CaptureMismatch);
        }

        let booking_id = case.booking.id;
        let guest = Party::Guest(case.booking.guest);
        let operator = WalletOwner::Operator(case.booking.operator);
        let now = self.clock.now();

        if fees.cleaning_fee > Decimal::ZERO {
            self.ledger.credit(
                operator,
                fees.cleaning_fee,
                Some(booking_id),
                &format!("led:{booking_id}:cleaning"),
                now,
            )?;
            self.record(
                EscrowEventKind::ReleaseSplit,
                booking_id,
                fees.cleaning_fee,
                guest,
                operator.party(),
                now,
                format!("esc:{booking_id}:cleaning"),
            );
        }

        let platform_income = fees.service_fee + fees.platform_fee;
        if platform_income > Decimal::ZERO {
            self.ledger.credit(
                WalletOwner::Platform,
                platform_income,
                Some(booking_id),
                &format!("led:{booking_id}:service"),
                now,
            )?;
            self.record(
                EscrowEventKind::ReleaseSplit,
                booking_id,
                platform_income,
                guest,
                Party::Platform,
                now,
                format!("esc:{booking_id}:service"),
            );
        }

        let escrowed = fees.room_fee + fees.security_deposit;
        self.record(
            EscrowEventKind::Hold,
            booking_id,
            escrowed,
            guest,
            Party::Platform,
            now,
            format!("esc:{booking_id}:hold"),
        );

        case.payment.mark_held()?;
        info!(
            booking = %booking_id,
            captured = %case.payment.captured,
            escrowed = %escrowed,
            "funds held"
        );
        Ok(())
    }

    /// Releases the held room fee: any dispute-awarded refund goes back
    /// to the guest through the gateway, and the remainder is split
    /// between operator and platform at the commission rate snapshotted
    /// at capture.
    pub fn execute_room_fee_split(
        &self,
        case: &mut BookingCase,
    ) -> Result<ReleaseOutcome, EscrowError> {
        if case.payment.needs_review {
            return Ok(ReleaseOutcome::UnderReview);
        }
        if !case.payment.room_fee_in_escrow {
            return Ok(ReleaseOutcome::AlreadyReleased);
        }
        if case.blocking_dispute(DisputeSubject::RoomFee).is_some() {
            debug!(booking = %case.booking.id, "room-fee release blocked by open dispute");
            return Ok(ReleaseOutcome::Blocked);
        }

        let booking_id = case.booking.id;
        let room_fee = case.booking.fees.room_fee;
        let refund = case.payment.room_fee_refund;
        let remainder = room_fee - refund;
        let platform_credit = round_minor(remainder * case.payment.quote.commission_rate);
        let operator_credit = remainder - platform_credit;
        let now = self.clock.now();

        if refund > Decimal::ZERO {
            if let Some(outcome) =
                self.transfer_to_guest(case, DisputeSubject::RoomFee, refund, now)?
            {
                return Ok(outcome);
            }
            self.record(
                EscrowEventKind::Refund,
                booking_id,
                refund,
                Party::Platform,
                Party::Guest(case.booking.guest),
                now,
                format!("esc:{booking_id}:room:refund"),
            );
        }

        let operator = WalletOwner::Operator(case.booking.operator);
        if operator_credit > Decimal::ZERO {
            self.ledger.credit(
                operator,
                operator_credit,
                Some(booking_id),
                &format!("led:{booking_id}:room:operator"),
                now,
            )?;
            self.record(
                EscrowEventKind::ReleaseSplit,
                booking_id,
                operator_credit,
                Party::Platform,
                operator.party(),
                now,
                format!("esc:{booking_id}:room:operator"),
            );
        }
        if platform_credit > Decimal::ZERO {
            self.ledger.credit(
                WalletOwner::Platform,
                platform_credit,
                Some(booking_id),
                &format!("led:{booking_id}:room:platform"),
                now,
            )?;
            self.record(
                EscrowEventKind::ReleaseSplit,
                booking_id,
                platform_credit,
                Party::Platform,
                Party::Platform,
                now,
                format!("esc:{booking_id}:room:platform"),
            );
        }

        case.payment.mark_room_fee_released(now)?;
        info!(
            booking = %booking_id,
            operator = %operator_credit,
            platform = %platform_credit,
            refund = %refund,
            "room-fee split executed"
        );
        Ok(ReleaseOutcome::Executed(SplitExecution {
            operator_credit,
            platform_credit,
            guest_refund: refund,
        }))
    }

    /// Releases the held deposit: the dispute-awarded deduction is
    /// credited to the operator and the remainder refunded to the guest.
    /// Always ordered after room-fee settlement.
    pub fn execute_deposit_release(
        &self,
        case: &mut BookingCase,
    ) -> Result<ReleaseOutcome, EscrowError> {
        if case.payment.needs_review {
            return Ok(ReleaseOutcome::UnderReview);
        }
        if !case.payment.deposit_in_escrow {
            return Ok(ReleaseOutcome::AlreadyReleased);
        }
        if !case.payment.room_fee_settled() {
            debug!(booking = %case.booking.id, "deposit release waiting on room-fee settlement");
            return Ok(ReleaseOutcome::AwaitingRoomFee);
        }
        if case.blocking_dispute(DisputeSubject::Deposit).is_some() {
            debug!(booking = %case.booking.id, "deposit release blocked by open dispute");
            return Ok(ReleaseOutcome::Blocked);
        }

        let booking_id = case.booking.id;
        let deposit = case.booking.fees.security_deposit;
        let deduction = case.payment.deposit_deduction;
        let refund = deposit - deduction;
        let now = self.clock.now();

        if refund > Decimal::ZERO {
            if let Some(outcome) =
                self.transfer_to_guest(case, DisputeSubject::Deposit, refund, now)?
            {
                return Ok(outcome);
            }
            self.record(
                EscrowEventKind::Refund,
                booking_id,
                refund,
                Party::Platform,
                Party::Guest(case.booking.guest),
                now,
                format!("esc:{booking_id}:deposit:refund"),
            );
        }

        if deduction > Decimal::ZERO {
            let operator = WalletOwner::Operator(case.booking.operator);
            self.ledger.credit(
                operator,
                deduction,
                Some(booking_id),
                &format!("led:{booking_id}:deposit:deduction"),
                now,
            )?;
            self.record(
                EscrowEventKind::DepositDeduction,
                booking_id,
                deduction,
                Party::Platform,
                operator.party(),
                now,
                format!("esc:{booking_id}:deposit:deduction"),
            );
        }

        case.payment.mark_settled(now)?;
        info!(
            booking = %booking_id,
            refund = %refund,
            deduction = %deduction,
            "deposit released"
        );
        Ok(ReleaseOutcome::Executed(SplitExecution {
            operator_credit: deduction,
            platform_credit: Decimal::ZERO,
            guest_refund: refund,
        }))
    }

    /// Refunds the escrowed remainder (room fee + deposit) to the guest
    /// on cancellation. Committed immediate payouts are never unwound;
    /// corrections there are a manual adjustment.
    pub fn refund_escrowed(&self, case: &mut BookingCase) -> Result<Decimal, EscrowError> {
        if case.payment.status != PaymentStatus::Held {
            return Err(EscrowError::InvalidTransition);
        }

        let booking_id = case.booking.id;
        let amount = case.booking.fees.room_fee + case.booking.fees.security_deposit;
        let now = self.clock.now();

        let gateway = self.gateways.get(case.payment.provider)?;
        gateway.transfer(Party::Guest(case.booking.guest), amount)?;

        self.record(
            EscrowEventKind::Refund,
            booking_id,
            amount,
            Party::Platform,
            Party::Guest(case.booking.guest),
            now,
            format!("esc:{booking_id}:cancel:refund"),
        );
        case.payment.mark_refunded()?;
        info!(booking = %booking_id, amount = %amount, "escrowed funds refunded on cancellation");
        Ok(amount)
    }

    /// Runs a guest-bound transfer. Returns `Some(outcome)` when the
    /// attempt failed and the caller should stop; `None` on success.
    fn transfer_to_guest(
        &self,
        case: &mut BookingCase,
        subject: DisputeSubject,
        amount: Decimal,
        now: DateTime<Utc>,
    ) -> Result<Option<ReleaseOutcome>, EscrowError> {
        let gateway = self.gateways.get(case.payment.provider)?;
        match gateway.transfer(Party::Guest(case.booking.guest), amount) {
            Ok(_) => Ok(None),
            Err(err) => {
                let attempts = match subject {
                    DisputeSubject::RoomFee => {
                        case.payment.room_fee_attempts += 1;
                        case.payment.room_fee_attempts
                    }
                    DisputeSubject::Deposit => {
                        case.payment.deposit_attempts += 1;
                        case.payment.deposit_attempts
                    }
                };
                let booking_id = case.booking.id;
                self.record(
                    EscrowEventKind::TransferFailed,
                    booking_id,
                    amount,
                    Party::Platform,
                    Party::Guest(case.booking.guest),
                    now,
                    format!("esc:{booking_id}:{subject:?}:fail:{attempts}"),
                );

                let max_attempts = self.settings.current().timing.max_transfer_attempts;
                let exhausted = attempts >= max_attempts;
                if exhausted {
                    case.payment.mark_failed();
                    warn!(
                        booking = %booking_id,
                        ?subject,
                        attempts,
                        "transfer retry budget exhausted, parked for manual review"
                    );
                } else {
                    warn!(booking = %booking_id, ?subject, attempts, error = %err, "transfer failed, will retry");
                }
                Ok(Some(ReleaseOutcome::TransferFailed {
                    attempts,
                    exhausted,
                }))
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn record(
        &self,
        kind: EscrowEventKind,
        booking: crate::base::BookingId,
        amount: Decimal,
        source: Party,
        destination: Party,
        executed_at: DateTime<Utc>,
        reference: String,
    ) {
        self.events.record(EscrowEvent {
            kind,
            booking,
            amount,
            currency: CURRENCY.to_string(),
            source,
            destination,
            executed_at,
            reference,
        });
    }
}
