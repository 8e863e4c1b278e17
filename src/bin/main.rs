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

use booking_escrow_rs::{
    AdminDecision, BookingId, BookingRequest, Clock, DisputeCategory, DisputeSubject, Engine,
    GatewayRegistry, GuestId, InMemorySettings, ManualClock, MockGateway, NullDispatcher,
    OperatorId, Party, PaymentGateway, ProcessingMode, PropertyId, Provider, ResponderAction,
    Sweeper, WalletOwner,
};
use chrono::{DateTime, Duration, TimeZone, Utc};
use clap::Parser;
use csv::{ReaderBuilder, Trim, Writer};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tracing::warn;

/// Escrow Engine - Replay booking command CSV files
///
/// Reads a command CSV (bookings, captures, check-ins, disputes, sweeps)
/// under a deterministic clock and outputs wallet balances to stdout.
#[derive(Parser, Debug)]
#[command(name = "booking-escrow-rs")]
#[command(about = "Replays booking escrow commands from a CSV", long_about = None)]
struct Args {
    /// Path to CSV file with commands
    ///
    /// Expected columns (trailing columns may be omitted per row):
    /// op,at,booking,guest,operator,property,room_fee,cleaning_fee,deposit,
    /// check_in,check_out,subject,category,amount,decision
    #[arg(value_name = "FILE")]
    input: PathBuf,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let file = match File::open(&args.input) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Error opening file '{}': {}", args.input.display(), e);
            process::exit(1);
        }
    };

    let engine = match run_commands(BufReader::new(file)) {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("Error processing commands: {}", e);
            process::exit(1);
        }
    };

    if let Err(e) = write_wallets(&engine, std::io::stdout()) {
        eprintln!("Error writing output: {}", e);
        process::exit(1);
    }
}

/// Raw CSV record. Columns other than `op` are optional per operation;
/// `at` moves the replay clock forward before the row is applied.
#[derive(Debug, Deserialize)]
struct CsvRecord {
    op: String,
    #[serde(default)]
    at: Option<String>,
    #[serde(deserialize_with = "csv::invalid_option", default)]
    booking: Option<u64>,
    #[serde(deserialize_with = "csv::invalid_option", default)]
    guest: Option<u64>,
    #[serde(deserialize_with = "csv::invalid_option", default)]
    operator: Option<u64>,
    #[serde(deserialize_with = "csv::invalid_option", default)]
    property: Option<u64>,
    #[serde(deserialize_with = "csv::invalid_option", default)]
    room_fee: Option<Decimal>,
    #[serde(deserialize_with = "csv::invalid_option", default)]
    cleaning_fee: Option<Decimal>,
    #[serde(deserialize_with = "csv::invalid_option", default)]
    deposit: Option<Decimal>,
    #[serde(default)]
    check_in: Option<String>,
    #[serde(default)]
    check_out: Option<String>,
    #[serde(default)]
    subject: Option<String>,
    #[serde(default)]
    category: Option<String>,
    #[serde(deserialize_with = "csv::invalid_option", default)]
    amount: Option<Decimal>,
    #[serde(default)]
    decision: Option<String>,
}

fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

fn parse_subject(value: &str) -> Option<DisputeSubject> {
    match value {
        "room_fee" => Some(DisputeSubject::RoomFee),
        "deposit" => Some(DisputeSubject::Deposit),
        _ => None,
    }
}

fn parse_category(value: &str) -> Option<DisputeCategory> {
    match value {
        "not_as_described" => Some(DisputeCategory::NotAsDescribed),
        "cleanliness" => Some(DisputeCategory::Cleanliness),
        "missing_amenity" => Some(DisputeCategory::MissingAmenity),
        "property_damage" => Some(DisputeCategory::PropertyDamage),
        "extra_cleaning" => Some(DisputeCategory::ExtraCleaning),
        "missing_item" => Some(DisputeCategory::MissingItem),
        _ => None,
    }
}

/// Replays commands through a fresh engine under a manual clock.
///
/// Malformed rows and rejected operations are logged and skipped; the
/// replay continues, matching how a sweep tolerates individual failures.
pub fn run_commands<R: Read>(reader: R) -> Result<Arc<Engine>, csv::Error> {
    let gateway = Arc::new(MockGateway::new());
    let adapter: Arc<dyn PaymentGateway> = gateway.clone();
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
    ));
    let engine = Arc::new(Engine::new(
        Arc::new(InMemorySettings::default()),
        Arc::new(GatewayRegistry::new().register(Provider::Paystack, adapter)),
        Arc::new(NullDispatcher),
        clock.clone(),
    ));
    let sweeper = Sweeper::new(Arc::clone(&engine), "cli", Duration::minutes(5));

    let mut rdr = ReaderBuilder::new()
        .trim(Trim::All)
        .flexible(true)
        .has_headers(true)
        .from_reader(reader);

    for result in rdr.deserialize::<CsvRecord>() {
        let record = match result {
            Ok(record) => record,
            Err(e) => {
                warn!(error = %e, "skipping malformed row");
                continue;
            }
        };

        if let Some(at) = record.at.as_deref().and_then(parse_timestamp) {
            clock.set(at);
        }

        if let Err(e) = apply(&engine, &gateway, &sweeper, &clock, &record) {
            warn!(op = %record.op, error = %e, "command rejected");
        }
    }

    Ok(engine)
}

fn apply(
    engine: &Engine,
    gateway: &MockGateway,
    sweeper: &Sweeper,
    clock: &ManualClock,
    record: &CsvRecord,
) -> Result<(), String> {
    let booking = record.booking.map(BookingId);

    match record.op.as_str() {
        "create" => {
            let id = booking.ok_or("missing booking")?;
            let check_in = record
                .check_in
                .as_deref()
                .and_then(parse_timestamp)
                .unwrap_or_else(|| clock.now() + Duration::hours(2));
            let check_out = record
                .check_out
                .as_deref()
                .and_then(parse_timestamp)
                .unwrap_or_else(|| check_in + Duration::days(2));
            engine
                .create_booking(BookingRequest {
                    id,
                    guest: GuestId(record.guest.ok_or("missing guest")?),
                    operator: OperatorId(record.operator.ok_or("missing operator")?),
                    property: PropertyId(record.property.unwrap_or(id.0)),
                    provider: Provider::Paystack,
                    scheduled_check_in: check_in,
                    scheduled_check_out: check_out,
                    room_fee: record.room_fee.ok_or("missing room_fee")?,
                    cleaning_fee: record.cleaning_fee.unwrap_or(Decimal::ZERO),
                    security_deposit: record.deposit.unwrap_or(Decimal::ZERO),
                    trailing_volume: Decimal::ZERO,
                    mode: ProcessingMode::Local,
                })
                .map(|_| ())
                .map_err(|e| e.to_string())
        }
        "capture" => {
            let id = booking.ok_or("missing booking")?;
            let snapshot = engine.booking(id).ok_or("unknown booking")?;
            let reference = format!("charge:{id}");
            gateway.prime_charge(&reference, snapshot.payment.captured);
            engine
                .capture_payment(id, &reference)
                .map_err(|e| e.to_string())
        }
        "checkin" => engine
            .confirm_check_in(booking.ok_or("missing booking")?)
            .map_err(|e| e.to_string()),
        "checkout" => engine
            .confirm_check_out(booking.ok_or("missing booking")?)
            .map_err(|e| e.to_string()),
        "cancel" => engine
            .cancel_booking(booking.ok_or("missing booking")?)
            .map_err(|e| e.to_string()),
        "dispute" => {
            let id = booking.ok_or("missing booking")?;
            let subject = record
                .subject
                .as_deref()
                .and_then(parse_subject)
                .ok_or("bad subject")?;
            let category = record
                .category
                .as_deref()
                .and_then(parse_category)
                .ok_or("bad category")?;
            let claimed = record.amount.ok_or("missing amount")?;
            let snapshot = engine.booking(id).ok_or("unknown booking")?;
            let opened_by = match subject {
                DisputeSubject::RoomFee => Party::Guest(snapshot.booking.guest),
                DisputeSubject::Deposit => Party::Operator(snapshot.booking.operator),
            };
            engine
                .open_dispute(id, subject, category, claimed, opened_by)
                .map(|_| ())
                .map_err(|e| e.to_string())
        }
        "respond" => {
            let id = booking.ok_or("missing booking")?;
            let subject = record
                .subject
                .as_deref()
                .and_then(parse_subject)
                .ok_or("bad subject")?;
            let action = match record.decision.as_deref() {
                Some("accept") => ResponderAction::Accept,
                Some("escalate") => ResponderAction::RejectEscalate,
                _ => return Err("bad decision".to_string()),
            };
            engine
                .respond_to_dispute(id, subject, action)
                .map(|_| ())
                .map_err(|e| e.to_string())
        }
        "decide" => {
            let id = booking.ok_or("missing booking")?;
            let subject = record
                .subject
                .as_deref()
                .and_then(parse_subject)
                .ok_or("bad subject")?;
            let decision = match record.decision.as_deref() {
                Some("full") => AdminDecision::FullRefund,
                Some("partial") => AdminDecision::PartialRefund {
                    amount: record.amount.ok_or("missing amount")?,
                },
                Some("none") => AdminDecision::NoRefund,
                _ => return Err("bad decision".to_string()),
            };
            engine
                .decide_dispute(id, subject, decision)
                .map(|_| ())
                .map_err(|e| e.to_string())
        }
        "withdraw" => {
            let owner =
                WalletOwner::Operator(OperatorId(record.operator.ok_or("missing operator")?));
            engine
                .request_withdrawal(
                    owner,
                    record.amount.ok_or("missing amount")?,
                    Provider::Paystack,
                )
                .map(|_| ())
                .map_err(|e| e.to_string())
        }
        "sweep" => {
            sweeper.run_all();
            Ok(())
        }
        other => Err(format!("unknown op '{other}'")),
    }
}

/// Writes wallet balances as CSV: `owner,available,pending`.
pub fn write_wallets<W: Write>(engine: &Engine, writer: W) -> Result<(), csv::Error> {
    let mut wtr = Writer::from_writer(writer);
    wtr.write_record(["owner", "available", "pending"])?;

    let mut balances = engine.wallets();
    balances.sort_by_key(|balance| balance.owner.to_string());
    for balance in balances {
        wtr.write_record([
            balance.owner.to_string(),
            balance.available.to_string(),
            balance.pending.to_string(),
        ])?;
    }

    wtr.flush()?;
    Ok(())
}
