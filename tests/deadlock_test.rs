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

//! Deadlock detection tests using parking_lot's built-in detector.
//!
//! Booking mutexes, wallet mutexes, and the job-lock table are taken in
//! a fixed order by the engine; these tests hammer captures, sweeps, and
//! withdrawals from many threads while a watcher checks the lock graph
//! for cycles.

use booking_escrow_rs::{
    BookingId, BookingRequest, Engine, GatewayRegistry, GuestId, InMemorySettings, ManualClock,
    MockGateway, NullDispatcher, OperatorId, PaymentGateway, PlatformConfig, ProcessingMode,
    PropertyId, Provider, Sweeper, WalletOwner,
};
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use parking_lot::deadlock;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
}

fn build_engine() -> (Arc<Engine>, Arc<MockGateway>, Arc<ManualClock>) {
    let gateway = Arc::new(MockGateway::new());
    let adapter: Arc<dyn PaymentGateway> = gateway.clone();
    let clock = Arc::new(ManualClock::new(start()));
    let mut config = PlatformConfig::default_config();
    config.timing.room_fee_hold_hours = 1;
    config.timing.deposit_hold_hours = 1;
    let engine = Arc::new(Engine::new(
        Arc::new(InMemorySettings::new(config)),
        Arc::new(GatewayRegistry::new().register(Provider::Paystack, adapter)),
        Arc::new(NullDispatcher),
        clock.clone(),
    ));
    (engine, gateway, clock)
}

/// Watches the lock graph while `work` runs; panics if a cycle appears.
fn with_deadlock_watcher<F: FnOnce()>(work: F) {
    let stop = Arc::new(AtomicBool::new(false));
    let found = Arc::new(AtomicBool::new(false));

    let watcher = {
        let stop = Arc::clone(&stop);
        let found = Arc::clone(&found);
        thread::spawn(move || {
            while !stop.load(Ordering::SeqCst) {
                thread::sleep(Duration::from_millis(50));
                if !deadlock::check_deadlock().is_empty() {
                    found.store(true, Ordering::SeqCst);
                    return;
                }
            }
        })
    };

    work();

    stop.store(true, Ordering::SeqCst);
    watcher.join().unwrap();
    assert!(!found.load(Ordering::SeqCst), "deadlock detected");
}

fn full_lifecycle(engine: &Engine, gateway: &MockGateway, id: u64) {
    let booking = BookingId(id);
    engine
        .create_booking(BookingRequest {
            id: booking,
            guest: GuestId(id),
            operator: OperatorId(id % 4),
            property: PropertyId(id),
            provider: Provider::Paystack,
            scheduled_check_in: start() + ChronoDuration::hours(1),
            scheduled_check_out: start() + ChronoDuration::days(2),
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
    engine.confirm_check_out(booking).unwrap();
}

#[test]
fn concurrent_lifecycles_and_sweeps_do_not_deadlock() {
    let (engine, gateway, clock) = build_engine();

    with_deadlock_watcher(|| {
        // Four threads drive lifecycles over disjoint bookings that share
        // four operator wallets.
        let writers: Vec<_> = (0..4)
            .map(|t| {
                let engine = Arc::clone(&engine);
                let gateway = Arc::clone(&gateway);
                thread::spawn(move || {
                    for i in 0..5 {
                        full_lifecycle(&engine, &gateway, t * 100 + i + 1);
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.join().unwrap();
        }

        clock.advance(ChronoDuration::hours(3));

        // Two sweep workers race every job name while withdrawals hit the
        // same wallets.
        let sweepers: Vec<_> = (0..2)
            .map(|w| {
                let engine = Arc::clone(&engine);
                thread::spawn(move || {
                    let sweeper =
                        Sweeper::new(engine, format!("worker-{w}"), ChronoDuration::minutes(5));
                    for _ in 0..3 {
                        sweeper.run_all();
                    }
                })
            })
            .collect();
        let withdrawer = {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                for operator in 0..4 {
                    let owner = WalletOwner::Operator(OperatorId(operator));
                    // May race the release sweeps and be refused; only the
                    // locking behavior is under test here.
                    let _ = engine.request_withdrawal(owner, dec!(1000), Provider::Paystack);
                }
            })
        };

        for sweeper in sweepers {
            sweeper.join().unwrap();
        }
        withdrawer.join().unwrap();
    });

    // Every booking settled exactly once despite racing sweepers.
    let mut released = Decimal::ZERO;
    for balance in engine.wallets() {
        released += balance.available;
    }
    // 20 bookings, each crediting cleaning 5,000 + service 1,100 +
    // split 50,000, minus whatever withdrawals drained.
    let credited_per_booking = dec!(5000) + dec!(1100.00) + dec!(50000.00);
    let expected_max = credited_per_booking * Decimal::from(20u32);
    assert!(released <= expected_max);
    assert!(released >= expected_max - dec!(4000) - dec!(200));
}

#[test]
fn capture_races_with_its_own_sweep() {
    let (engine, gateway, clock) = build_engine();

    with_deadlock_watcher(|| {
        for id in 1..=8 {
            full_lifecycle(&engine, &gateway, id);
        }
        clock.advance(ChronoDuration::hours(3));

        // Re-captures (idempotent no-ops) race the release sweep over the
        // same booking mutexes.
        let recapture = {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                for id in 1..=8u64 {
                    let reference = format!("charge:{id}");
                    let _ = engine.capture_payment(BookingId(id), &reference);
                }
            })
        };
        let sweep = {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                let sweeper = Sweeper::new(engine, "sweep", ChronoDuration::minutes(5));
                sweeper.run_all();
            })
        };

        recapture.join().unwrap();
        sweep.join().unwrap();
    });

    for id in 1..=8 {
        let snapshot = engine.booking(BookingId(id)).unwrap();
        assert!(!snapshot.payment.room_fee_in_escrow);
    }
}
