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

//! Scheduler integration tests: job-lock contention, crash recovery via
//! expiry, and idempotent re-sweeps.

use booking_escrow_rs::{
    BookingId, BookingRequest, Clock, Engine, GatewayRegistry, GuestId, InMemorySettings, JobName,
    ManualClock, MockGateway, OperatorId, PaymentGateway, PlatformConfig, ProcessingMode,
    PropertyId, Provider, NullDispatcher, SweepOutcome, Sweeper, WalletOwner,
};
use chrono::{DateTime, Duration, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::sync::Barrier;
use std::thread;

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
}

fn engine() -> (Arc<Engine>, Arc<MockGateway>, Arc<ManualClock>) {
    let gateway = Arc::new(MockGateway::new());
    let adapter: Arc<dyn PaymentGateway> = gateway.clone();
    let clock = Arc::new(ManualClock::new(start()));
    let mut config = PlatformConfig::default_config();
    config.timing.room_fee_hold_hours = 1;
    config.timing.deposit_hold_hours = 2;
    let engine = Arc::new(Engine::new(
        Arc::new(InMemorySettings::new(config)),
        Arc::new(GatewayRegistry::new().register(Provider::Paystack, adapter)),
        Arc::new(NullDispatcher),
        clock.clone(),
    ));
    (engine, gateway, clock)
}

fn captured_checked_in(engine: &Engine, gateway: &MockGateway, id: u64) -> BookingId {
    let booking = BookingId(id);
    engine
        .create_booking(BookingRequest {
            id: booking,
            guest: GuestId(id),
            operator: OperatorId(100 + id),
            property: PropertyId(id),
            provider: Provider::Paystack,
            scheduled_check_in: start() + Duration::hours(2),
            scheduled_check_out: start() + Duration::days(3),
            room_fee: dec!(50000),
            cleaning_fee: dec!(5000),
            security_deposit: dec!(10000),
            trailing_volume: Decimal::ZERO,
            mode: ProcessingMode::Local,
        })
        .unwrap();
    let reference = format!("charge:{id}");
    gateway.prime_charge(&reference, dec!(66100));
    engine.capture_payment(booking, &reference).unwrap();
    engine.confirm_check_in(booking).unwrap();
    booking
}

#[test]
fn concurrent_workers_race_for_one_lock() {
    let (engine, _, clock) = engine();
    let now = clock.now();

    // Many workers race acquire() for the same job name at the same
    // instant; exactly one must win.
    let workers = 8;
    let barrier = Arc::new(Barrier::new(workers));
    let handles: Vec<_> = (0..workers)
        .map(|i| {
            let engine = Arc::clone(&engine);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                engine.locks().acquire(
                    JobName::RoomFeeRelease,
                    &format!("worker-{i}"),
                    Duration::minutes(5),
                    now,
                )
            })
        })
        .collect();

    let wins = handles
        .into_iter()
        .map(|handle| handle.join().unwrap())
        .filter(|acquired| *acquired)
        .count();
    assert_eq!(wins, 1);
}

#[test]
fn held_lock_makes_the_other_sweeper_skip() {
    let (engine, gateway, clock) = engine();
    captured_checked_in(&engine, &gateway, 1);
    clock.advance(Duration::hours(2));

    // Worker one is mid-sweep and holds the lock.
    assert!(engine.locks().acquire(
        JobName::RoomFeeRelease,
        "worker-1",
        Duration::minutes(5),
        clock.now(),
    ));

    let sweeper = Sweeper::new(Arc::clone(&engine), "worker-2", Duration::minutes(5));
    assert_eq!(sweeper.run(JobName::RoomFeeRelease), SweepOutcome::LockHeld);

    // The booking was not processed while the other worker held the lock.
    assert!(
        engine
            .booking(BookingId(1))
            .unwrap()
            .payment
            .room_fee_in_escrow
    );
}

#[test]
fn expired_lock_is_taken_over_after_a_crash() {
    let (engine, gateway, clock) = engine();
    captured_checked_in(&engine, &gateway, 1);
    clock.advance(Duration::hours(2));

    // Worker one crashed mid-sweep without releasing.
    assert!(engine.locks().acquire(
        JobName::RoomFeeRelease,
        "crashed-worker",
        Duration::minutes(5),
        clock.now(),
    ));

    // Its expiry bounds how long progress is blocked.
    clock.advance(Duration::minutes(6));
    let sweeper = Sweeper::new(Arc::clone(&engine), "worker-2", Duration::minutes(5));
    match sweeper.run(JobName::RoomFeeRelease) {
        SweepOutcome::Completed(report) => assert_eq!(report.processed, 1),
        SweepOutcome::LockHeld => panic!("expired lock must be taken over"),
    }
    assert!(
        !engine
            .booking(BookingId(1))
            .unwrap()
            .payment
            .room_fee_in_escrow
    );
}

#[test]
fn resweeping_is_idempotent() {
    let (engine, gateway, clock) = engine();
    captured_checked_in(&engine, &gateway, 1);
    clock.advance(Duration::hours(2));

    let sweeper = Sweeper::new(Arc::clone(&engine), "worker", Duration::minutes(5));
    match sweeper.run(JobName::RoomFeeRelease) {
        SweepOutcome::Completed(report) => assert_eq!(report.processed, 1),
        SweepOutcome::LockHeld => panic!("lock unexpectedly held"),
    }
    let after_first = engine.wallet(WalletOwner::Operator(OperatorId(101))).available;

    // A crashed worker re-running the sweep must not double-credit.
    match sweeper.run(JobName::RoomFeeRelease) {
        SweepOutcome::Completed(report) => assert_eq!(report.processed, 0),
        SweepOutcome::LockHeld => panic!("lock unexpectedly held"),
    }
    assert_eq!(
        engine.wallet(WalletOwner::Operator(OperatorId(101))).available,
        after_first
    );
}

#[test]
fn different_jobs_sweep_concurrently() {
    let (engine, gateway, clock) = engine();
    for id in 1..=4 {
        captured_checked_in(&engine, &gateway, id);
    }
    clock.advance(Duration::hours(2));

    // Two workers run different job names at the same time.
    let barrier = Arc::new(Barrier::new(2));
    let room = {
        let engine = Arc::clone(&engine);
        let barrier = Arc::clone(&barrier);
        thread::spawn(move || {
            let sweeper = Sweeper::new(engine, "room-worker", Duration::minutes(5));
            barrier.wait();
            sweeper.run(JobName::RoomFeeRelease)
        })
    };
    let auto = {
        let engine = Arc::clone(&engine);
        let barrier = Arc::clone(&barrier);
        thread::spawn(move || {
            let sweeper = Sweeper::new(engine, "checkin-worker", Duration::minutes(5));
            barrier.wait();
            sweeper.run(JobName::AutoCheckIn)
        })
    };

    assert!(matches!(room.join().unwrap(), SweepOutcome::Completed(_)));
    assert!(matches!(auto.join().unwrap(), SweepOutcome::Completed(_)));

    // All four bookings had their room fee released exactly once.
    for id in 1..=4 {
        let operator = OperatorId(100 + id);
        assert_eq!(
            engine.wallet(WalletOwner::Operator(operator)).available,
            dec!(5000) + dec!(45000.00)
        );
    }
}
