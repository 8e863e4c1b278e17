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

//! Benchmarks for the escrow engine.
//!
//! Run with: cargo bench
//!
//! Benchmarks include:
//! - Fee quoting
//! - Capture (verify + hold)
//! - Full settle lifecycle under sweeps
//! - Concurrent lifecycles across bookings

use booking_escrow_rs::{
    BookingId, BookingRequest, Engine, GatewayRegistry, GuestId, InMemorySettings, ManualClock,
    MockGateway, NullDispatcher, OperatorId, PaymentGateway, PlatformConfig, ProcessingMode,
    PropertyId, Provider, Sweeper, quote,
};
use chrono::{DateTime, Duration, TimeZone, Utc};
use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use rayon::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;

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

fn request(id: u64) -> BookingRequest {
    BookingRequest {
        id: BookingId(id),
        guest: GuestId(id),
        operator: OperatorId(id % 16),
        property: PropertyId(id),
        provider: Provider::Paystack,
        scheduled_check_in: start() + Duration::hours(1),
        scheduled_check_out: start() + Duration::days(2),
        room_fee: dec!(50000),
        cleaning_fee: dec!(5000),
        security_deposit: dec!(10000),
        trailing_volume: Decimal::ZERO,
        mode: ProcessingMode::Local,
    }
}

fn capture(engine: &Engine, gateway: &MockGateway, id: u64) {
    engine.create_booking(request(id)).unwrap();
    let reference = format!("charge:{id}");
    gateway.prime_charge(&reference, dec!(66100));
    engine.capture_payment(BookingId(id), &reference).unwrap();
}

fn settle(engine: &Arc<Engine>, gateway: &MockGateway, clock: &ManualClock, id: u64) {
    capture(engine, gateway, id);
    engine.confirm_check_in(BookingId(id)).unwrap();
    engine.confirm_check_out(BookingId(id)).unwrap();
    clock.advance(Duration::hours(2));
    let sweeper = Sweeper::new(Arc::clone(engine), "bench", Duration::minutes(5));
    sweeper.run_all();
}

// =============================================================================
// Fee Calculator
// =============================================================================

fn bench_fee_quote(c: &mut Criterion) {
    let config = PlatformConfig::default_config();
    c.bench_function("fee_quote", |b| {
        b.iter(|| {
            quote(
                black_box(&config),
                black_box(dec!(50000)),
                black_box(dec!(5000)),
                black_box(dec!(750000)),
                ProcessingMode::Local,
            )
            .unwrap()
        })
    });
}

// =============================================================================
// Single-Threaded Benchmarks
// =============================================================================

fn bench_capture(c: &mut Criterion) {
    c.bench_function("capture", |b| {
        let mut id = 0u64;
        b.iter(|| {
            let (engine, gateway, _) = build_engine();
            id += 1;
            capture(black_box(&engine), &gateway, id);
        })
    });
}

fn bench_full_lifecycle(c: &mut Criterion) {
    c.bench_function("full_lifecycle", |b| {
        let mut id = 0u64;
        b.iter(|| {
            let (engine, gateway, clock) = build_engine();
            id += 1;
            settle(black_box(&engine), &gateway, &clock, id);
        })
    });
}

// =============================================================================
// Concurrent Benchmarks
// =============================================================================

fn bench_concurrent_captures(c: &mut Criterion) {
    let mut group = c.benchmark_group("concurrent_captures");
    for bookings in [64u64, 256, 1024] {
        group.throughput(Throughput::Elements(bookings));
        group.bench_with_input(
            BenchmarkId::from_parameter(bookings),
            &bookings,
            |b, &bookings| {
                b.iter(|| {
                    let (engine, gateway, _) = build_engine();
                    (1..=bookings).into_par_iter().for_each(|id| {
                        capture(&engine, &gateway, id);
                    });
                })
            },
        );
    }
    group.finish();
}

fn bench_sweep_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("sweep_scan");
    for bookings in [100u64, 1000] {
        group.throughput(Throughput::Elements(bookings));
        group.bench_with_input(
            BenchmarkId::from_parameter(bookings),
            &bookings,
            |b, &bookings| {
                // One big escrow population, repeatedly scanned after all
                // releases have executed (worst-case no-op sweep).
                let (engine, gateway, clock) = build_engine();
                for id in 1..=bookings {
                    capture(&engine, &gateway, id);
                    engine.confirm_check_in(BookingId(id)).unwrap();
                }
                clock.advance(Duration::hours(2));
                let sweeper = Sweeper::new(Arc::clone(&engine), "bench", Duration::minutes(5));
                sweeper.run_all();

                b.iter(|| black_box(sweeper.run_all()));
            },
        );
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_fee_quote,
    bench_capture,
    bench_full_lifecycle,
    bench_concurrent_captures,
    bench_sweep_scan,
);
criterion_main!(benches);
