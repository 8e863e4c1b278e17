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

//! Escrow and settlement engine.
//!
//! The [`Engine`] is the authoritative owner of booking funds from
//! capture to final disbursement. It composes the escrow holder, ledger
//! store, event log, dispute workflow, and sweep entry points behind one
//! concurrent facade.
//!
//! # Concurrency
//!
//! Bookings live in a [`DashMap`]; each booking's state (booking,
//! payment, disputes) sits behind one mutex so capture, release, and
//! dispute decisions for a booking are atomic while different bookings
//! proceed in parallel. Wallet updates serialize per wallet inside the
//! ledger store.

use crate::base::{BookingId, DisputeId, Party, WalletOwner};
use crate::booking::{Booking, BookingStatus, FeeBreakdown};
use crate::clock::Clock;
use crate::config::SettingsStore;
use crate::dispute::{
    AdminDecision, Dispute, DisputeCategory, DisputeStatus, DisputeSubject, ResponderAction,
};
use crate::error::EscrowError;
use crate::escrow::{BookingCase, EscrowHolder, ReleaseOutcome};
use crate::events::{EscrowEvent, EventLog};
use crate::fees::{ProcessingMode, quote};
use crate::gateway::{GatewayRegistry, Provider, TransferStatus};
use crate::ledger::{LedgerStore, WalletBalance};
use crate::notify::{Notification, NotificationDispatcher};
use crate::payment::{Payment, PaymentStatus};
use crate::scheduler::{JobLockTable, SweepReport};
use chrono::{DateTime, Utc};
use crossbeam::queue::SegQueue;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{info, warn};

/// Inputs for pricing and recording a new booking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingRequest {
    pub id: BookingId,
    pub guest: crate::base::GuestId,
    pub operator: crate::base::OperatorId,
    pub property: crate::base::PropertyId,
    pub provider: Provider,
    pub scheduled_check_in: DateTime<Utc>,
    pub scheduled_check_out: DateTime<Utc>,
    pub room_fee: Decimal,
    pub cleaning_fee: Decimal,
    pub security_deposit: Decimal,
    /// Operator's trailing monthly room-fee volume, for tier matching.
    pub trailing_volume: Decimal,
    pub mode: ProcessingMode,
}

/// Point-in-time copy of a booking's full state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookingSnapshot {
    pub booking: Booking,
    pub payment: Payment,
    pub disputes: Vec<Dispute>,
}

struct PendingWithdrawal {
    owner: WalletOwner,
    amount: Decimal,
    fee: Decimal,
    provider: Provider,
    ledger_ref: String,
}

/// Central escrow and settlement engine.
pub struct Engine {
    bookings: DashMap<BookingId, Mutex<BookingCase>>,
    ledger: Arc<LedgerStore>,
    events: Arc<EventLog>,
    escrow: EscrowHolder,
    settings: Arc<dyn SettingsStore>,
    gateways: Arc<GatewayRegistry>,
    notifier: Arc<dyn NotificationDispatcher>,
    clock: Arc<dyn Clock>,
    locks: JobLockTable,
    dispute_seq: AtomicU64,
    withdrawal_seq: AtomicU64,
    /// In-flight withdrawals keyed by gateway transfer reference.
    withdrawals: DashMap<String, PendingWithdrawal>,
    /// FIFO of transfer references awaiting a status poll.
    withdrawal_queue: SegQueue<String>,
}

impl Engine {
    pub fn new(
        settings: Arc<dyn SettingsStore>,
        gateways: Arc<GatewayRegistry>,
        notifier: Arc<dyn NotificationDispatcher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let ledger = Arc::new(LedgerStore::new());
        let events = Arc::new(EventLog::new());
        let escrow = EscrowHolder::new(
            Arc::clone(&ledger),
            Arc::clone(&events),
            Arc::clone(&gateways),
            Arc::clone(&settings),
            Arc::clone(&clock),
        );
        Self {
            bookings: DashMap::new(),
            ledger,
            events,
            escrow,
            settings,
            gateways,
            notifier,
            clock,
            locks: JobLockTable::new(),
            dispute_seq: AtomicU64::new(1),
            withdrawal_seq: AtomicU64::new(1),
            withdrawals: DashMap::new(),
            withdrawal_queue: SegQueue::new(),
        }
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    pub fn locks(&self) -> &JobLockTable {
        &self.locks
    }

    pub fn ledger(&self) -> &LedgerStore {
        &self.ledger
    }

    pub fn events_for(&self, booking: BookingId) -> Vec<Arc<EscrowEvent>> {
        self.events.for_booking(booking)
    }

    /// Prices the booking against the live config and records it as
    /// `Pending`. The fee quote is snapshotted onto the payment so later
    /// config changes never re-price it.
    pub fn create_booking(&self, req: BookingRequest) -> Result<BookingSnapshot, EscrowError> {
        let config = self.settings.current();
        let fee_quote = quote(
            &config,
            req.room_fee,
            req.cleaning_fee,
            req.trailing_volume,
            req.mode,
        )?;

        let fees = FeeBreakdown {
            room_fee: req.room_fee,
            cleaning_fee: req.cleaning_fee,
            service_fee: fee_quote.service_fee,
            platform_fee: config.platform_fixed_fee,
            security_deposit: req.security_deposit,
        };
        let booking = Booking::new(
            req.id,
            req.guest,
            req.operator,
            req.property,
            req.scheduled_check_in,
            req.scheduled_check_out,
            fees,
        )?;
        let payment = Payment::new(req.id, req.provider, fees.captured_total(), fee_quote);
        let snapshot = BookingSnapshot {
            booking: booking.clone(),
            payment: payment.clone(),
            disputes: Vec::new(),
        };

        match self.bookings.entry(req.id) {
            Entry::Occupied(_) => return Err(EscrowError::DuplicateBooking),
            Entry::Vacant(slot) => {
                slot.insert(Mutex::new(BookingCase::new(booking, payment)));
            }
        }
        info!(booking = %req.id, captured = %snapshot.payment.captured, "booking created");
        Ok(snapshot)
    }

    /// Verifies the charge with the booking's gateway and takes custody.
    /// Verification plus `hold_funds` plus the `Pending -> Paid`
    /// transition happen under the booking's lock: both succeed or the
    /// booking is left unchanged. Repeating a successful capture is a
    /// no-op.
    pub fn capture_payment(
        &self,
        id: BookingId,
        charge_reference: &str,
    ) -> Result<(), EscrowError> {
        let entry = self.bookings.get(&id).ok_or(EscrowError::BookingNotFound)?;
        let mut case = entry.lock();

        if case.booking.status == BookingStatus::Paid
            && case.payment.status != PaymentStatus::Initiated
        {
            return Ok(());
        }
        if case.booking.status != BookingStatus::Pending {
            return Err(EscrowError::InvalidTransition);
        }

        let gateway = self.gateways.get(case.payment.provider)?;
        let verification = gateway.verify(charge_reference)?;
        if !verification.success {
            return Err(EscrowError::VerificationFailed);
        }
        if verification.amount != case.payment.captured {
            return Err(EscrowError::CaptureMismatch);
        }

        self.escrow.hold_funds(&mut case)?;
        case.booking.mark_paid()?;
        case.payment.provider_txn_id = Some(verification.provider_txn_id);

        let amount = case.payment.captured;
        drop(case);
        drop(entry);
        self.notify(Notification::BookingPaid {
            booking: id,
            amount,
        });
        Ok(())
    }

    /// Confirms check-in (guest, operator, or the automatic fallback) and
    /// opens the room-fee dispute window.
    pub fn confirm_check_in(&self, id: BookingId) -> Result<(), EscrowError> {
        let entry = self.bookings.get(&id).ok_or(EscrowError::BookingNotFound)?;
        let mut case = entry.lock();
        let timing = self.settings.current().timing.clone();
        case.booking
            .check_in(self.clock.now(), timing.room_fee_hold())?;
        info!(booking = %id, release_at = ?case.booking.room_fee_release_at, "checked in");
        Ok(())
    }

    /// Confirms checkout and opens the deposit dispute window.
    pub fn confirm_check_out(&self, id: BookingId) -> Result<(), EscrowError> {
        let entry = self.bookings.get(&id).ok_or(EscrowError::BookingNotFound)?;
        let mut case = entry.lock();
        let timing = self.settings.current().timing.clone();
        case.booking
            .check_out(self.clock.now(), timing.deposit_hold())?;
        info!(booking = %id, release_at = ?case.booking.deposit_release_at, "checked out");
        Ok(())
    }

    /// Cancels a booking. Before capture nothing moves; after capture the
    /// escrowed remainder (room fee + deposit) is refunded to the guest.
    /// Committed immediate payouts stay committed.
    pub fn cancel_booking(&self, id: BookingId) -> Result<(), EscrowError> {
        let entry = self.bookings.get(&id).ok_or(EscrowError::BookingNotFound)?;
        let mut case = entry.lock();
        match case.booking.status {
            BookingStatus::Pending => case.booking.cancel(),
            BookingStatus::Paid => {
                let refunded = self.escrow.refund_escrowed(&mut case)?;
                case.booking.cancel()?;
                info!(booking = %id, %refunded, "booking cancelled after capture");
                Ok(())
            }
            _ => Err(EscrowError::InvalidTransition),
        }
    }

    /// Opens a dispute on a subject whose window is still open. The
    /// responder is notified immediately and the subject's pending
    /// release is blocked until the dispute terminates.
    pub fn open_dispute(
        &self,
        id: BookingId,
        subject: DisputeSubject,
        category: DisputeCategory,
        claimed: Decimal,
        opened_by: Party,
    ) -> Result<DisputeId, EscrowError> {
        let entry = self.bookings.get(&id).ok_or(EscrowError::BookingNotFound)?;
        let mut case = entry.lock();
        let now = self.clock.now();

        if case.blocking_dispute(subject).is_some() {
            return Err(EscrowError::DisputeAlreadyOpen);
        }

        let subject_amount = match subject {
            DisputeSubject::RoomFee => {
                if !case.payment.room_fee_in_escrow {
                    return Err(EscrowError::AlreadyReleased);
                }
                if !case.booking.room_fee_window_open(now) {
                    return Err(EscrowError::DisputeWindowClosed);
                }
                case.booking.fees.room_fee
            }
            DisputeSubject::Deposit => {
                if !case.payment.deposit_in_escrow {
                    return Err(EscrowError::AlreadyReleased);
                }
                if !case.booking.deposit_window_open(now) {
                    return Err(EscrowError::DisputeWindowClosed);
                }
                case.booking.fees.security_deposit
            }
        };

        let ceiling = self
            .settings
            .current()
            .ceiling_for(category)
            .ok_or(EscrowError::ConfigurationMissing)?;

        let dispute_id = DisputeId(self.dispute_seq.fetch_add(1, Ordering::SeqCst));
        let mut dispute = Dispute::new(
            dispute_id, id, subject, category, opened_by, claimed, subject_amount, ceiling, now,
        )?;
        // The responder notification goes out as part of opening, so the
        // dispute lands directly in AwaitingResponse.
        dispute.await_response()?;
        if subject == DisputeSubject::RoomFee {
            case.booking.mark_dispute_opened()?;
        }
        case.disputes.push(dispute);
        drop(case);
        drop(entry);

        info!(booking = %id, ?subject, %claimed, "dispute opened");
        self.notify(Notification::DisputeOpened {
            booking: id,
            subject,
        });
        Ok(dispute_id)
    }

    /// Responder action on an open dispute: accept executes the award
    /// immediately; reject hands the claim to admin review.
    pub fn respond_to_dispute(
        &self,
        id: BookingId,
        subject: DisputeSubject,
        action: ResponderAction,
    ) -> Result<Option<Decimal>, EscrowError> {
        let entry = self.bookings.get(&id).ok_or(EscrowError::BookingNotFound)?;
        let mut case = entry.lock();
        let now = self.clock.now();

        let dispute = case
            .blocking_dispute_mut(subject)
            .ok_or(EscrowError::DisputeNotFound)?;

        match action {
            ResponderAction::Accept => {
                let awarded = dispute.accept(now)?;
                self.settle_dispute_award(&mut case, subject, awarded)?;
                drop(case);
                drop(entry);
                self.notify(Notification::DisputeResolved {
                    booking: id,
                    subject,
                    awarded,
                });
                Ok(Some(awarded))
            }
            ResponderAction::RejectEscalate => {
                dispute.escalate(now)?;
                drop(case);
                drop(entry);
                self.notify(Notification::DisputeEscalated {
                    booking: id,
                    subject,
                });
                Ok(None)
            }
        }
    }

    /// Admin ruling on an escalated dispute.
    pub fn decide_dispute(
        &self,
        id: BookingId,
        subject: DisputeSubject,
        decision: AdminDecision,
    ) -> Result<Decimal, EscrowError> {
        let entry = self.bookings.get(&id).ok_or(EscrowError::BookingNotFound)?;
        let mut case = entry.lock();
        let now = self.clock.now();

        let dispute = case
            .blocking_dispute_mut(subject)
            .ok_or(EscrowError::DisputeNotFound)?;
        let awarded = dispute.admin_resolve(decision, now)?;
        self.settle_dispute_award(&mut case, subject, awarded)?;
        drop(case);
        drop(entry);

        self.notify(Notification::DisputeResolved {
            booking: id,
            subject,
            awarded,
        });
        Ok(awarded)
    }

    /// Claimant withdraws a dispute before resolution; the blocked
    /// release resumes on the next sweep.
    pub fn cancel_dispute(&self, id: BookingId, subject: DisputeSubject) -> Result<(), EscrowError> {
        let entry = self.bookings.get(&id).ok_or(EscrowError::BookingNotFound)?;
        let mut case = entry.lock();
        let now = self.clock.now();

        let dispute = case
            .blocking_dispute_mut(subject)
            .ok_or(EscrowError::DisputeNotFound)?;
        dispute.cancel(now)?;
        if subject == DisputeSubject::RoomFee {
            case.booking.clear_dispute_flag();
        }
        Ok(())
    }

    /// Applies a resolved award to the payment and drives the subject's
    /// release. Disputes never move money themselves; the award only
    /// parameterizes this escrow holder call.
    fn settle_dispute_award(
        &self,
        case: &mut BookingCase,
        subject: DisputeSubject,
        awarded: Decimal,
    ) -> Result<(), EscrowError> {
        match subject {
            DisputeSubject::RoomFee => {
                case.payment.room_fee_refund = awarded;
                case.booking.clear_dispute_flag();
                self.escrow.execute_room_fee_split(case)?;
            }
            DisputeSubject::Deposit => {
                case.payment.deposit_deduction = awarded;
                // May report AwaitingRoomFee; the deposit sweep retries.
                self.escrow.execute_deposit_release(case)?;
            }
        }
        self.maybe_complete(case);
        Ok(())
    }

    /// Moves a checked-out, fully-settled booking to `Completed`.
    fn maybe_complete(&self, case: &mut BookingCase) {
        if case.booking.status == BookingStatus::CheckedOut
            && case.payment.status == PaymentStatus::Settled
            && case.booking.complete().is_ok()
        {
            self.notify(Notification::SettlementCompleted {
                booking: case.booking.id,
            });
        }
    }

    // === Sweep entry points (called by `Sweeper` under a job lock) ===

    /// Confirms check-in for paid bookings whose grace period after the
    /// scheduled check-in has elapsed without an explicit confirmation.
    pub fn sweep_auto_check_in(&self) -> SweepReport {
        let now = self.clock.now();
        let timing = self.settings.current().timing.clone();
        let mut report = SweepReport::default();

        for id in self.due_bookings(|case| {
            case.booking.status == BookingStatus::Paid
                && now >= case.booking.scheduled_check_in + timing.checkin_grace()
        }) {
            match self.confirm_check_in(id) {
                Ok(()) => report.processed += 1,
                Err(err) => {
                    warn!(booking = %id, error = %err, "auto check-in failed");
                    report.failed += 1;
                }
            }
        }
        report
    }

    /// Executes room-fee splits whose deadline has passed and which no
    /// open dispute blocks.
    pub fn sweep_room_fee_releases(&self) -> SweepReport {
        let now = self.clock.now();
        let mut report = SweepReport::default();

        for id in self.due_bookings(|case| {
            case.payment.room_fee_in_escrow
                && !case.payment.needs_review
                && case
                    .booking
                    .room_fee_release_at
                    .map(|deadline| deadline <= now)
                    .unwrap_or(false)
        }) {
            let Some(entry) = self.bookings.get(&id) else {
                continue;
            };
            let mut case = entry.lock();
            match self.escrow.execute_room_fee_split(&mut case) {
                Ok(ReleaseOutcome::Executed(split)) => {
                    report.processed += 1;
                    let operator = case.booking.operator;
                    self.maybe_complete(&mut case);
                    drop(case);
                    drop(entry);
                    self.notify(Notification::PayoutCompleted {
                        booking: id,
                        destination: Party::Operator(operator),
                        amount: split.operator_credit,
                    });
                }
                Ok(ReleaseOutcome::TransferFailed {
                    attempts,
                    exhausted,
                }) => {
                    report.failed += 1;
                    drop(case);
                    drop(entry);
                    if exhausted {
                        self.notify(Notification::ReleaseFailed {
                            booking: id,
                            subject: DisputeSubject::RoomFee,
                            attempts,
                        });
                    }
                }
                Ok(_) => report.skipped += 1,
                Err(err) => {
                    warn!(booking = %id, error = %err, "room-fee release failed");
                    report.failed += 1;
                }
            }
        }
        report
    }

    /// Executes deposit releases whose deadline has passed, whose
    /// room-fee settlement has terminated, and which no open dispute
    /// blocks.
    pub fn sweep_deposit_releases(&self) -> SweepReport {
        let now = self.clock.now();
        let mut report = SweepReport::default();

        for id in self.due_bookings(|case| {
            case.payment.deposit_in_escrow
                && !case.payment.needs_review
                && case
                    .booking
                    .deposit_release_at
                    .map(|deadline| deadline <= now)
                    .unwrap_or(false)
        }) {
            let Some(entry) = self.bookings.get(&id) else {
                continue;
            };
            let mut case = entry.lock();
            match self.escrow.execute_deposit_release(&mut case) {
                Ok(ReleaseOutcome::Executed(split)) => {
                    report.processed += 1;
                    self.maybe_complete(&mut case);
                    drop(case);
                    drop(entry);
                    self.notify(Notification::DepositRefunded {
                        booking: id,
                        amount: split.guest_refund,
                    });
                }
                Ok(ReleaseOutcome::TransferFailed {
                    attempts,
                    exhausted,
                }) => {
                    report.failed += 1;
                    drop(case);
                    drop(entry);
                    if exhausted {
                        self.notify(Notification::ReleaseFailed {
                            booking: id,
                            subject: DisputeSubject::Deposit,
                            attempts,
                        });
                    }
                }
                Ok(_) => report.skipped += 1,
                Err(err) => {
                    warn!(booking = %id, error = %err, "deposit release failed");
                    report.failed += 1;
                }
            }
        }
        report
    }

    /// Escalates unanswered disputes past the escalation age to admin
    /// review. Silence never defaults to either party's win; it forces
    /// arbitration.
    pub fn sweep_dispute_escalations(&self) -> SweepReport {
        let now = self.clock.now();
        let age = self.settings.current().timing.dispute_escalation_age();
        let mut report = SweepReport::default();

        for id in self.due_bookings(|case| {
            case.disputes.iter().any(|dispute| {
                dispute.status == DisputeStatus::AwaitingResponse
                    && dispute.opened_at + age <= now
            })
        }) {
            let Some(entry) = self.bookings.get(&id) else {
                continue;
            };
            let mut case = entry.lock();
            let mut escalated = Vec::new();
            for dispute in case.disputes.iter_mut() {
                if dispute.status == DisputeStatus::AwaitingResponse
                    && dispute.opened_at + age <= now
                    && dispute.escalate(now).is_ok()
                {
                    escalated.push(dispute.subject);
                    report.processed += 1;
                }
            }
            drop(case);
            drop(entry);
            for subject in escalated {
                info!(booking = %id, ?subject, "unanswered dispute auto-escalated to admin review");
                self.notify(Notification::DisputeEscalated {
                    booking: id,
                    subject,
                });
            }
        }
        report
    }

    /// Polls in-flight withdrawal transfers and settles or voids their
    /// pending ledger rows. Still-pending references go back on the
    /// queue for the next cycle.
    pub fn sweep_withdrawals(&self) -> SweepReport {
        let mut report = SweepReport::default();

        for _ in 0..self.withdrawal_queue.len() {
            let Some(reference) = self.withdrawal_queue.pop() else {
                break;
            };
            let Some(entry) = self.withdrawals.get(&reference) else {
                continue;
            };
            let (owner, amount, fee, provider, ledger_ref) = (
                entry.owner,
                entry.amount,
                entry.fee,
                entry.provider,
                entry.ledger_ref.clone(),
            );
            drop(entry);

            let status = match self
                .gateways
                .get(provider)
                .and_then(|gateway| gateway.transfer_status(&reference))
            {
                Ok(status) => status,
                Err(err) => {
                    warn!(%reference, error = %err, "withdrawal status poll failed");
                    report.failed += 1;
                    self.withdrawal_queue.push(reference);
                    continue;
                }
            };

            match status {
                TransferStatus::Pending => {
                    report.skipped += 1;
                    self.withdrawal_queue.push(reference);
                }
                TransferStatus::Success => {
                    if let Err(err) = self.finish_withdrawal(&ledger_ref, owner, fee) {
                        warn!(%reference, error = %err, "withdrawal settlement failed");
                        report.failed += 1;
                        self.withdrawal_queue.push(reference);
                        continue;
                    }
                    self.withdrawals.remove(&reference);
                    report.processed += 1;
                    self.notify(Notification::WithdrawalSettled { owner, amount });
                }
                TransferStatus::Failed => {
                    if let Err(err) = self.ledger.fail(&ledger_ref) {
                        warn!(%reference, error = %err, "withdrawal void failed");
                    }
                    self.withdrawals.remove(&reference);
                    report.failed += 1;
                    self.notify(Notification::WithdrawalFailed { owner, amount });
                }
            }
        }
        report
    }

    /// Initiates a wallet withdrawal. The amount plus the scheduled fee
    /// is reserved as a pending debit; the withdrawal-poll sweep settles
    /// or voids it once the provider reports a terminal status.
    pub fn request_withdrawal(
        &self,
        owner: WalletOwner,
        amount: Decimal,
        provider: Provider,
    ) -> Result<String, EscrowError> {
        if amount <= Decimal::ZERO {
            return Err(EscrowError::InvalidAmount);
        }
        let fee = self
            .settings
            .current()
            .withdrawal_fee(amount)
            .ok_or(EscrowError::ConfigurationMissing)?;

        let seq = self.withdrawal_seq.fetch_add(1, Ordering::SeqCst);
        let ledger_ref = format!("wd:{seq}");
        let now = self.clock.now();
        self.ledger
            .debit_pending(owner, amount + fee, None, &ledger_ref, now)?;

        let gateway = self.gateways.get(provider)?;
        let receipt = match gateway.transfer(owner.party(), amount) {
            Ok(receipt) => receipt,
            Err(err) => {
                // Initiation never reached the provider; void the hold.
                self.ledger.fail(&ledger_ref)?;
                return Err(err);
            }
        };

        info!(%owner, %amount, %fee, reference = %receipt.reference, "withdrawal initiated");

        if receipt.status == TransferStatus::Success {
            self.finish_withdrawal(&ledger_ref, owner, fee)?;
            self.notify(Notification::WithdrawalSettled { owner, amount });
        } else {
            self.withdrawals.insert(
                receipt.reference.clone(),
                PendingWithdrawal {
                    owner,
                    amount,
                    fee,
                    provider,
                    ledger_ref,
                },
            );
            self.withdrawal_queue.push(receipt.reference.clone());
        }
        Ok(receipt.reference)
    }

    /// Settles a completed withdrawal: the pending debit completes and
    /// the fee lands in the platform wallet.
    fn finish_withdrawal(
        &self,
        ledger_ref: &str,
        owner: WalletOwner,
        fee: Decimal,
    ) -> Result<(), EscrowError> {
        self.ledger.complete(ledger_ref)?;
        if fee > Decimal::ZERO && owner != WalletOwner::Platform {
            self.ledger.credit(
                WalletOwner::Platform,
                fee,
                None,
                &format!("{ledger_ref}:fee"),
                self.clock.now(),
            )?;
        }
        Ok(())
    }

    // === Queries ===

    pub fn booking(&self, id: BookingId) -> Option<BookingSnapshot> {
        self.bookings.get(&id).map(|entry| {
            let case = entry.lock();
            BookingSnapshot {
                booking: case.booking.clone(),
                payment: case.payment.clone(),
                disputes: case.disputes.clone(),
            }
        })
    }

    pub fn bookings(&self) -> Vec<BookingSnapshot> {
        self.bookings
            .iter()
            .map(|entry| {
                let case = entry.lock();
                BookingSnapshot {
                    booking: case.booking.clone(),
                    payment: case.payment.clone(),
                    disputes: case.disputes.clone(),
                }
            })
            .collect()
    }

    pub fn wallet(&self, owner: WalletOwner) -> WalletBalance {
        self.ledger.balance(owner)
    }

    pub fn wallets(&self) -> Vec<WalletBalance> {
        self.ledger.balances()
    }

    /// Booking ids matching a predicate, collected before processing so
    /// no map shard stays referenced across provider calls.
    fn due_bookings<F>(&self, eligible: F) -> Vec<BookingId>
    where
        F: Fn(&BookingCase) -> bool,
    {
        self.bookings
            .iter()
            .filter_map(|entry| {
                let case = entry.lock();
                eligible(&case).then_some(case.booking.id)
            })
            .collect()
    }

    /// Best-effort dispatch: delivery failures are logged and never roll
    /// back the financial transition that triggered them.
    fn notify(&self, notification: Notification) {
        if let Err(err) = self.notifier.dispatch(&notification) {
            warn!(error = %err, "notification dispatch failed");
        }
    }
}
