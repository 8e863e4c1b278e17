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

//! # Booking Escrow
//!
//! This library provides the escrow and settlement engine for a booking
//! marketplace: it owns custody of captured booking funds, enforces timed
//! release windows, arbitrates disputes that alter payouts, maintains an
//! append-only ledger per payee, and computes tiered commission and fee
//! schedules.
//!
//! ## Core Components
//!
//! - [`Engine`]: central facade owning bookings, payments, and disputes
//! - [`EscrowHolder`]: idempotent hold/release/refund choreography
//! - [`LedgerStore`]: append-only wallet transactions and balances
//! - [`Sweeper`]: lock-guarded periodic sweep driving elapsed timers
//! - [`fees::quote`]: pure commission and fee calculator
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use booking_escrow_rs::{
//!     BookingId, BookingRequest, Clock, Engine, GatewayRegistry, GuestId,
//!     InMemorySettings, ManualClock, MockGateway, NullDispatcher, OperatorId,
//!     PaymentGateway, ProcessingMode, PropertyId, Provider, WalletOwner,
//! };
//! use chrono::{Duration, TimeZone, Utc};
//! use rust_decimal_macros::dec;
//!
//! let gateway = Arc::new(MockGateway::new());
//! let adapter: Arc<dyn PaymentGateway> = gateway.clone();
//! let clock = Arc::new(ManualClock::new(
//!     Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap(),
//! ));
//! let engine = Engine::new(
//!     Arc::new(InMemorySettings::default()),
//!     Arc::new(GatewayRegistry::new().register(Provider::Paystack, adapter)),
//!     Arc::new(NullDispatcher),
//!     clock.clone(),
//! );
//!
//! let start = clock.now();
//! engine
//!     .create_booking(BookingRequest {
//!         id: BookingId(1),
//!         guest: GuestId(10),
//!         operator: OperatorId(20),
//!         property: PropertyId(30),
//!         provider: Provider::Paystack,
//!         scheduled_check_in: start + Duration::hours(2),
//!         scheduled_check_out: start + Duration::days(3),
//!         room_fee: dec!(50000),
//!         cleaning_fee: dec!(5000),
//!         security_deposit: dec!(10000),
//!         trailing_volume: dec!(0),
//!         mode: ProcessingMode::Local,
//!     })
//!     .unwrap();
//!
//! // Capture: cleaning fee and service fee pay out immediately; the room
//! // fee and deposit stay in escrow.
//! gateway.prime_charge("charge:1", dec!(66100));
//! engine.capture_payment(BookingId(1), "charge:1").unwrap();
//!
//! assert_eq!(
//!     engine.wallet(WalletOwner::Operator(OperatorId(20))).available,
//!     dec!(5000)
//! );
//! assert_eq!(engine.wallet(WalletOwner::Platform).available, dec!(1100));
//! ```
//!
//! ## Thread Safety
//!
//! Bookings are processed under per-booking locks inside a concurrent
//! map, wallet updates serialize per wallet, and sweep workers coordinate
//! through a job-lock table, so multiple workers can drive different
//! bookings and job names in parallel.

pub mod base;
pub mod booking;
pub mod clock;
pub mod config;
pub mod dispute;
pub mod engine;
pub mod error;
pub mod escrow;
pub mod events;
pub mod fees;
pub mod gateway;
pub mod ledger;
pub mod notify;
pub mod payment;
pub mod scheduler;

pub use base::{
    BookingId, CURRENCY, DisputeId, GuestId, MINOR_UNIT_DP, OperatorId, Party, PropertyId,
    WalletOwner, round_minor,
};
pub use booking::{Booking, BookingStatus, FeeBreakdown};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{InMemorySettings, PlatformConfig, SettingsStore};
pub use dispute::{
    AdminDecision, Dispute, DisputeCategory, DisputeStatus, DisputeSubject, FinalOutcome,
    ResponderAction,
};
pub use engine::{BookingRequest, BookingSnapshot, Engine};
pub use error::{ErrorKind, EscrowError};
pub use escrow::{BookingCase, EscrowHolder, ReleaseOutcome, SplitExecution};
pub use events::{EscrowEvent, EscrowEventKind, EventLog};
pub use fees::{FeeQuote, ProcessingMode, quote};
pub use gateway::{
    GatewayRegistry, MockGateway, PaymentGateway, Provider, TransferReceipt, TransferStatus,
    Verification,
};
pub use ledger::{EntryDirection, EntryStatus, LedgerStore, WalletBalance, WalletTransaction};
pub use notify::{Notification, NotificationDispatcher, NullDispatcher, RecordingDispatcher};
pub use payment::{Payment, PaymentStatus};
pub use scheduler::{JobLock, JobLockTable, JobName, SweepOutcome, SweepReport, Sweeper};
