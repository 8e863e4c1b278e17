//! Simple REST API server example for the escrow engine.
//!
//! Run with: `cargo run --example server`
//!
//! ## Endpoints
//!
//! - `POST /bookings` - Create and price a booking
//! - `POST /bookings/{id}/capture` - Capture payment and take custody
//! - `POST /bookings/{id}/check-in` - Confirm check-in
//! - `POST /bookings/{id}/check-out` - Confirm checkout
//! - `POST /bookings/{id}/disputes` - Open a dispute
//! - `POST /bookings/{id}/disputes/{subject}/respond` - Responder action
//! - `POST /bookings/{id}/disputes/{subject}/decide` - Admin decision
//! - `POST /sweep` - Run all sweep jobs once
//! - `POST /clock/advance` - Advance the demo clock
//! - `GET /bookings/{id}` - Booking snapshot
//! - `GET /wallets` - Wallet balances
//!
//! ## Example Usage
//!
//! ```bash
//! curl -X POST http://localhost:3000/bookings \
//!   -H "Content-Type: application/json" \
//!   -d '{"booking_id": 1, "guest_id": 10, "operator_id": 20, "property_id": 30,
//!        "room_fee": "50000", "cleaning_fee": "5000", "security_deposit": "10000",
//!        "check_in_hours_from_now": 2, "nights": 3}'
//!
//! curl -X POST http://localhost:3000/bookings/1/capture
//! curl -X POST http://localhost:3000/bookings/1/check-in
//! curl -X POST http://localhost:3000/clock/advance -H "Content-Type: application/json" -d '{"hours": 25}'
//! curl -X POST http://localhost:3000/sweep
//! curl http://localhost:3000/wallets
//! ```

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use booking_escrow_rs::{
    AdminDecision, BookingId, BookingRequest, BookingSnapshot, Clock, DisputeCategory,
    DisputeSubject, Engine, ErrorKind, EscrowError, GatewayRegistry, GuestId, InMemorySettings,
    ManualClock, MockGateway, NullDispatcher, OperatorId, Party, PaymentGateway, ProcessingMode,
    PropertyId, Provider, ResponderAction, SweepReport, Sweeper, WalletBalance, WalletOwner,
};
use chrono::{Duration, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::net::TcpListener;

// === Request/Response DTOs ===

#[derive(Debug, Deserialize)]
pub struct CreateBookingRequest {
    pub booking_id: u64,
    pub guest_id: u64,
    pub operator_id: u64,
    pub property_id: u64,
    pub room_fee: Decimal,
    pub cleaning_fee: Decimal,
    pub security_deposit: Decimal,
    #[serde(default)]
    pub trailing_volume: Decimal,
    pub check_in_hours_from_now: i64,
    pub nights: i64,
}

#[derive(Debug, Deserialize)]
pub struct OpenDisputeRequest {
    pub subject: String,
    pub category: String,
    pub claimed: Decimal,
}

#[derive(Debug, Deserialize)]
pub struct RespondRequest {
    /// "accept" or "escalate"
    pub action: String,
}

#[derive(Debug, Deserialize)]
pub struct DecideRequest {
    /// "full", "partial", or "none"
    pub decision: String,
    pub amount: Option<Decimal>,
}

#[derive(Debug, Deserialize)]
pub struct AdvanceClockRequest {
    pub hours: i64,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

// === Application State ===

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub gateway: Arc<MockGateway>,
    pub clock: Arc<ManualClock>,
    pub sweeper: Arc<Sweeper>,
}

// === Error Handling ===

pub enum AppError {
    Escrow(EscrowError),
    BadRequest(String),
}

impl From<EscrowError> for AppError {
    fn from(err: EscrowError) -> Self {
        AppError::Escrow(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::Escrow(err) => {
                let (status, code) = match err.kind() {
                    ErrorKind::Validation => (StatusCode::BAD_REQUEST, "VALIDATION"),
                    ErrorKind::Conflict => (StatusCode::CONFLICT, "CONFLICT"),
                    ErrorKind::Provider => (StatusCode::BAD_GATEWAY, "PROVIDER"),
                    ErrorKind::Configuration => {
                        (StatusCode::UNPROCESSABLE_ENTITY, "CONFIGURATION")
                    }
                };
                (status, code, err.to_string())
            }
            AppError::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, "BAD_REQUEST", message.clone())
            }
        };

        (
            status,
            Json(ErrorResponse {
                error: message,
                code: code.to_string(),
            }),
        )
            .into_response()
    }
}

fn bad_request(message: &str) -> AppError {
    AppError::BadRequest(message.to_string())
}

fn parse_subject(value: &str) -> Result<DisputeSubject, AppError> {
    match value {
        "room_fee" => Ok(DisputeSubject::RoomFee),
        "deposit" => Ok(DisputeSubject::Deposit),
        _ => Err(bad_request("bad subject")),
    }
}

fn parse_category(value: &str) -> Result<DisputeCategory, AppError> {
    match value {
        "not_as_described" => Ok(DisputeCategory::NotAsDescribed),
        "cleanliness" => Ok(DisputeCategory::Cleanliness),
        "missing_amenity" => Ok(DisputeCategory::MissingAmenity),
        "property_damage" => Ok(DisputeCategory::PropertyDamage),
        "extra_cleaning" => Ok(DisputeCategory::ExtraCleaning),
        "missing_item" => Ok(DisputeCategory::MissingItem),
        _ => Err(bad_request("bad category")),
    }
}

// === Handlers ===

async fn create_booking(
    State(state): State<AppState>,
    Json(request): Json<CreateBookingRequest>,
) -> Result<(StatusCode, Json<BookingSnapshot>), AppError> {
    let check_in = state.clock.now() + Duration::hours(request.check_in_hours_from_now);
    let snapshot = state.engine.create_booking(BookingRequest {
        id: BookingId(request.booking_id),
        guest: GuestId(request.guest_id),
        operator: OperatorId(request.operator_id),
        property: PropertyId(request.property_id),
        provider: Provider::Paystack,
        scheduled_check_in: check_in,
        scheduled_check_out: check_in + Duration::days(request.nights),
        room_fee: request.room_fee,
        cleaning_fee: request.cleaning_fee,
        security_deposit: request.security_deposit,
        trailing_volume: request.trailing_volume,
        mode: ProcessingMode::Local,
    })?;
    Ok((StatusCode::CREATED, Json(snapshot)))
}

async fn capture_payment(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<StatusCode, AppError> {
    let booking = BookingId(id);
    let snapshot = state
        .engine
        .booking(booking)
        .ok_or(AppError::Escrow(EscrowError::BookingNotFound))?;
    let reference = format!("charge:{booking}");
    state
        .gateway
        .prime_charge(&reference, snapshot.payment.captured);
    state.engine.capture_payment(booking, &reference)?;
    Ok(StatusCode::OK)
}

async fn check_in(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<StatusCode, AppError> {
    state.engine.confirm_check_in(BookingId(id))?;
    Ok(StatusCode::OK)
}

async fn check_out(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<StatusCode, AppError> {
    state.engine.confirm_check_out(BookingId(id))?;
    Ok(StatusCode::OK)
}

async fn open_dispute(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Json(request): Json<OpenDisputeRequest>,
) -> Result<StatusCode, AppError> {
    let booking = BookingId(id);
    let subject = parse_subject(&request.subject)?;
    let category = parse_category(&request.category)?;
    let snapshot = state
        .engine
        .booking(booking)
        .ok_or(AppError::Escrow(EscrowError::BookingNotFound))?;
    let opened_by = match subject {
        DisputeSubject::RoomFee => Party::Guest(snapshot.booking.guest),
        DisputeSubject::Deposit => Party::Operator(snapshot.booking.operator),
    };
    state
        .engine
        .open_dispute(booking, subject, category, request.claimed, opened_by)?;
    Ok(StatusCode::CREATED)
}

async fn respond_to_dispute(
    State(state): State<AppState>,
    Path((id, subject)): Path<(u64, String)>,
    Json(request): Json<RespondRequest>,
) -> Result<StatusCode, AppError> {
    let subject = parse_subject(&subject)?;
    let action = match request.action.as_str() {
        "accept" => ResponderAction::Accept,
        "escalate" => ResponderAction::RejectEscalate,
        _ => return Err(bad_request("bad action")),
    };
    state
        .engine
        .respond_to_dispute(BookingId(id), subject, action)?;
    Ok(StatusCode::OK)
}

async fn decide_dispute(
    State(state): State<AppState>,
    Path((id, subject)): Path<(u64, String)>,
    Json(request): Json<DecideRequest>,
) -> Result<StatusCode, AppError> {
    let subject = parse_subject(&subject)?;
    let decision = match request.decision.as_str() {
        "full" => AdminDecision::FullRefund,
        "partial" => AdminDecision::PartialRefund {
            amount: request.amount.ok_or_else(|| bad_request("missing amount"))?,
        },
        "none" => AdminDecision::NoRefund,
        _ => return Err(bad_request("bad decision")),
    };
    state
        .engine
        .decide_dispute(BookingId(id), subject, decision)?;
    Ok(StatusCode::OK)
}

async fn run_sweep(State(state): State<AppState>) -> Json<SweepReport> {
    Json(state.sweeper.run_all())
}

async fn advance_clock(
    State(state): State<AppState>,
    Json(request): Json<AdvanceClockRequest>,
) -> StatusCode {
    state.clock.advance(Duration::hours(request.hours));
    StatusCode::OK
}

async fn get_booking(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<Json<BookingSnapshot>, (StatusCode, Json<ErrorResponse>)> {
    state
        .engine
        .booking(BookingId(id))
        .map(Json)
        .ok_or_else(|| {
            (
                StatusCode::NOT_FOUND,
                Json(ErrorResponse {
                    error: "Booking not found".to_string(),
                    code: "BOOKING_NOT_FOUND".to_string(),
                }),
            )
        })
}

async fn list_wallets(State(state): State<AppState>) -> Json<Vec<WalletBalance>> {
    let mut balances = state.engine.wallets();
    balances.sort_by_key(|balance| balance.owner.to_string());
    Json(balances)
}

async fn get_wallet(
    State(state): State<AppState>,
    Path(operator): Path<u64>,
) -> Json<WalletBalance> {
    Json(
        state
            .engine
            .wallet(WalletOwner::Operator(OperatorId(operator))),
    )
}

// === Router ===

fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/bookings", post(create_booking))
        .route("/bookings/{id}", get(get_booking))
        .route("/bookings/{id}/capture", post(capture_payment))
        .route("/bookings/{id}/check-in", post(check_in))
        .route("/bookings/{id}/check-out", post(check_out))
        .route("/bookings/{id}/disputes", post(open_dispute))
        .route(
            "/bookings/{id}/disputes/{subject}/respond",
            post(respond_to_dispute),
        )
        .route(
            "/bookings/{id}/disputes/{subject}/decide",
            post(decide_dispute),
        )
        .route("/sweep", post(run_sweep))
        .route("/clock/advance", post(advance_clock))
        .route("/wallets", get(list_wallets))
        .route("/wallets/operator/{id}", get(get_wallet))
        .with_state(state)
}

// === Main ===

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let gateway = Arc::new(MockGateway::new());
    let adapter: Arc<dyn PaymentGateway> = gateway.clone();
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap(),
    ));
    let engine = Arc::new(Engine::new(
        Arc::new(InMemorySettings::default()),
        Arc::new(GatewayRegistry::new().register(Provider::Paystack, adapter)),
        Arc::new(NullDispatcher),
        clock.clone(),
    ));
    let sweeper = Arc::new(Sweeper::new(
        Arc::clone(&engine),
        "demo-server",
        Duration::minutes(5),
    ));

    let state = AppState {
        engine,
        gateway,
        clock,
        sweeper,
    };
    let app = create_router(state);

    let listener = TcpListener::bind("127.0.0.1:3000").await.unwrap();
    println!("Escrow engine demo server running on http://127.0.0.1:3000");
    println!();
    println!("Endpoints:");
    println!("  POST /bookings                 - Create a booking");
    println!("  POST /bookings/:id/capture     - Capture payment");
    println!("  POST /bookings/:id/check-in    - Confirm check-in");
    println!("  POST /bookings/:id/check-out   - Confirm checkout");
    println!("  POST /bookings/:id/disputes    - Open a dispute");
    println!("  POST /sweep                    - Run sweep jobs");
    println!("  POST /clock/advance            - Advance the demo clock");
    println!("  GET  /bookings/:id             - Booking snapshot");
    println!("  GET  /wallets                  - Wallet balances");

    axum::serve(listener, app).await.unwrap();
}
