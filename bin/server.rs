// Meal Ledger - Web Server
// REST API with Axum over the SQLite ledger

use anyhow::Context;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{delete, get, post},
    Router,
};
use chrono::{Local, NaiveDate};
use meal_ledger::money::from_f64;
use meal_ledger::{
    retention_cutoff, AppConfig, Event, Item, LedgerError, LedgerReader, LedgerStore, Meal, MealId,
    Member, MenuItem, NewItem, Payment, Restaurant, SettlementEngine, SettlementReport,
    SqliteLedger,
};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn, Level};
use tracing_subscriber::EnvFilter;

/// Shared application state
#[derive(Clone)]
struct AppState {
    ledger: Arc<Mutex<SqliteLedger>>,
    engine: SettlementEngine,
    retention_months: u32,
}

impl AppState {
    fn new(ledger: SqliteLedger, engine: SettlementEngine, retention_months: u32) -> Self {
        Self {
            ledger: Arc::new(Mutex::new(ledger)),
            engine,
            retention_months,
        }
    }

    /// Every ledger write is one transaction, so a panicked request leaves
    /// nothing half-written and the lock can be taken over
    fn ledger(&self) -> MutexGuard<'_, SqliteLedger> {
        self.ledger.lock().unwrap_or_else(|poisoned| {
            warn!("ledger lock poisoned by a panicked request; recovering");
            poisoned.into_inner()
        })
    }
}

/// API Response wrapper
#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    data: T,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data,
        })
    }
}

type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        let status = if err.is_not_found() {
            StatusCode::NOT_FOUND
        } else if err.is_client_error() {
            StatusCode::BAD_REQUEST
        } else {
            error!(error = %err, "request failed");
            StatusCode::INTERNAL_SERVER_ERROR
        };

        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "success": false,
            "error": self.message,
        });
        (self.status, Json(body)).into_response()
    }
}

// ============================================================================
// Request / response bodies
// ============================================================================

#[derive(Deserialize)]
struct CreateMeal {
    restaurant: String,
    date: Option<NaiveDate>,
}

#[derive(Deserialize)]
struct CreateItem {
    #[serde(default)]
    person: String,
    item: String,
    price: f64,
    #[serde(default)]
    shared: bool,
}

#[derive(Deserialize)]
struct CreatePayment {
    person: String,
    amount: f64,
}

#[derive(Deserialize)]
struct CreateNamed {
    name: String,
}

#[derive(Deserialize)]
struct CreateMenuItem {
    name: String,
    price: Option<f64>,
}

/// Meal with its items and payments
#[derive(Serialize)]
struct MealDetail {
    #[serde(flatten)]
    meal: Meal,
    items: Vec<Item>,
    payments: Vec<Payment>,
}

#[derive(Serialize)]
struct CountResponse {
    count: usize,
}

#[derive(Serialize)]
struct CleanupResponse {
    deleted: usize,
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check() -> impl IntoResponse {
    ApiResponse::ok("OK")
}

/// GET /api/meals - All meals, newest first
async fn list_meals(State(state): State<AppState>) -> ApiResult<Vec<meal_ledger::MealOverview>> {
    let ledger = state.ledger();
    Ok(ApiResponse::ok(ledger.list_meals()?))
}

/// POST /api/meals - Create a meal (date defaults to today)
async fn create_meal(
    State(state): State<AppState>,
    Json(body): Json<CreateMeal>,
) -> ApiResult<Meal> {
    let date = body.date.unwrap_or_else(|| Local::now().date_naive());
    let mut ledger = state.ledger();
    Ok(ApiResponse::ok(ledger.create_meal(&body.restaurant, date)?))
}

/// GET /api/meals/:id - Meal with items and payments
async fn get_meal(State(state): State<AppState>, Path(id): Path<MealId>) -> ApiResult<MealDetail> {
    let ledger = state.ledger();
    let meal = ledger.get_meal(id)?.ok_or(LedgerError::MealNotFound(id))?;
    let items = ledger.list_items(id)?;
    let payments = ledger.list_payments(id)?;

    Ok(ApiResponse::ok(MealDetail {
        meal,
        items,
        payments,
    }))
}

/// GET /api/meals/:id/history - Audit events of one meal, oldest first
async fn meal_history(
    State(state): State<AppState>,
    Path(id): Path<MealId>,
) -> ApiResult<Vec<Event>> {
    let events = state.ledger().meal_history(id)?;
    if events.is_empty() {
        return Err(LedgerError::MealNotFound(id).into());
    }
    Ok(ApiResponse::ok(events))
}

/// DELETE /api/meals/:id
async fn delete_meal(State(state): State<AppState>, Path(id): Path<MealId>) -> ApiResult<()> {
    state.ledger().delete_meal(id)?;
    Ok(ApiResponse::ok(()))
}

/// POST /api/meals/:id/settle
async fn settle_meal(State(state): State<AppState>, Path(id): Path<MealId>) -> ApiResult<()> {
    state.ledger().set_meal_settled(id, true)?;
    Ok(ApiResponse::ok(()))
}

/// DELETE /api/meals/:id/settle - Reopen a settled meal
async fn unsettle_meal(State(state): State<AppState>, Path(id): Path<MealId>) -> ApiResult<()> {
    state.ledger().set_meal_settled(id, false)?;
    Ok(ApiResponse::ok(()))
}

/// POST /api/meals/:id/items
async fn add_item(
    State(state): State<AppState>,
    Path(meal_id): Path<MealId>,
    Json(body): Json<CreateItem>,
) -> ApiResult<Item> {
    let amount = from_f64(body.price)?;
    let item = if body.shared {
        NewItem::shared(&body.item, amount)
    } else {
        NewItem::personal(&body.person, &body.item, amount)
    };

    let mut ledger = state.ledger();
    Ok(ApiResponse::ok(ledger.add_item(meal_id, item)?))
}

/// DELETE /api/items/:id
async fn delete_item(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<()> {
    state.ledger().delete_item(id)?;
    Ok(ApiResponse::ok(()))
}

/// POST /api/meals/:id/payments
async fn add_payment(
    State(state): State<AppState>,
    Path(meal_id): Path<MealId>,
    Json(body): Json<CreatePayment>,
) -> ApiResult<Payment> {
    let amount = from_f64(body.amount)?;
    let mut ledger = state.ledger();
    Ok(ApiResponse::ok(ledger.add_payment(meal_id, &body.person, amount)?))
}

/// DELETE /api/payments/:id
async fn delete_payment(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<()> {
    state.ledger().delete_payment(id)?;
    Ok(ApiResponse::ok(()))
}

/// GET /api/settle - Balances and suggested transfers over unsettled meals
async fn settle(State(state): State<AppState>) -> ApiResult<SettlementReport> {
    // The guard is dropped before computing
    let snapshot = state.ledger().unsettled_snapshot()?;
    Ok(ApiResponse::ok(state.engine.compute(&snapshot)))
}

/// POST /api/settle/all - Mark every unsettled meal settled
async fn settle_all(State(state): State<AppState>) -> ApiResult<CountResponse> {
    let count = state.ledger().settle_all_unsettled()?;
    Ok(ApiResponse::ok(CountResponse { count }))
}

/// GET /api/members
async fn list_members(State(state): State<AppState>) -> ApiResult<Vec<Member>> {
    Ok(ApiResponse::ok(state.ledger().list_members()?))
}

/// POST /api/members - Idempotent by name
async fn create_member(
    State(state): State<AppState>,
    Json(body): Json<CreateNamed>,
) -> ApiResult<Member> {
    Ok(ApiResponse::ok(state.ledger().get_or_create_member(&body.name)?))
}

/// DELETE /api/members/:id
async fn delete_member(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<()> {
    state.ledger().delete_member(id)?;
    Ok(ApiResponse::ok(()))
}

/// GET /api/restaurants
async fn list_restaurants(State(state): State<AppState>) -> ApiResult<Vec<Restaurant>> {
    Ok(ApiResponse::ok(state.ledger().list_restaurants()?))
}

/// POST /api/restaurants - Idempotent by name
async fn create_restaurant(
    State(state): State<AppState>,
    Json(body): Json<CreateNamed>,
) -> ApiResult<Restaurant> {
    Ok(ApiResponse::ok(state.ledger().get_or_create_restaurant(&body.name)?))
}

/// DELETE /api/restaurants/:id - Also removes its menu
async fn delete_restaurant(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<()> {
    state.ledger().delete_restaurant(id)?;
    Ok(ApiResponse::ok(()))
}

/// GET /api/restaurants/:id/menu
async fn restaurant_menu(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Vec<MenuItem>> {
    Ok(ApiResponse::ok(state.ledger().list_menu(Some(id))?))
}

/// POST /api/restaurants/:id/menu
async fn add_menu_item(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<CreateMenuItem>,
) -> ApiResult<MenuItem> {
    let price = body.price.map(from_f64).transpose()?;
    let mut ledger = state.ledger();
    Ok(ApiResponse::ok(ledger.add_menu_item(id, &body.name, price)?))
}

/// GET /api/menu - Every menu item of every restaurant
async fn list_menu(State(state): State<AppState>) -> ApiResult<Vec<MenuItem>> {
    Ok(ApiResponse::ok(state.ledger().list_menu(None)?))
}

/// DELETE /api/menu/:id
async fn delete_menu_item(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<()> {
    state.ledger().delete_menu_item(id)?;
    Ok(ApiResponse::ok(()))
}

/// POST /api/cleanup - Drop settled meals older than the retention horizon
async fn cleanup(State(state): State<AppState>) -> ApiResult<CleanupResponse> {
    let cutoff = retention_cutoff(Local::now().date_naive(), state.retention_months);
    let deleted = state.ledger().cleanup_settled_before(cutoff)?;
    Ok(ApiResponse::ok(CleanupResponse { deleted }))
}

// ============================================================================
// Router
// ============================================================================

fn build_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/meals", get(list_meals).post(create_meal))
        .route("/meals/:id", get(get_meal).delete(delete_meal))
        .route("/meals/:id/history", get(meal_history))
        .route("/meals/:id/settle", post(settle_meal).delete(unsettle_meal))
        .route("/meals/:id/items", post(add_item))
        .route("/meals/:id/payments", post(add_payment))
        .route("/items/:id", delete(delete_item))
        .route("/payments/:id", delete(delete_payment))
        .route("/settle", get(settle))
        .route("/settle/all", post(settle_all))
        .route("/members", get(list_members).post(create_member))
        .route("/members/:id", delete(delete_member))
        .route("/restaurants", get(list_restaurants).post(create_restaurant))
        .route("/restaurants/:id", delete(delete_restaurant))
        .route("/restaurants/:id/menu", get(restaurant_menu).post(add_menu_item))
        .route("/menu", get(list_menu))
        .route("/menu/:id", delete(delete_menu_item))
        .route("/cleanup", post(cleanup))
        .with_state(state);

    Router::new()
        .nest("/api", api_routes)
        .layer(CorsLayer::permissive())
}

// ============================================================================
// Main Server
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    println!("🍱 Meal Ledger - Web Server");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let config = AppConfig::from_env().context("Failed to load configuration")?;
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;

    let ledger = SqliteLedger::open(&config.database.path)
        .with_context(|| format!("Failed to open {}", config.database.path.display()))?;
    println!("✓ Database opened: {}", config.database.path.display());

    let engine = SettlementEngine::with_tolerance(config.tolerance()?);
    let state = AppState::new(ledger, engine, config.retention.months);
    let app = build_router(state);

    let addr = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!(%addr, "server listening");
    println!("\n🚀 Server running on http://{}", addr);
    println!("   API: http://{}/api/settle", addr);
    println!("\n   Press Ctrl+C to stop\n");

    axum::serve(listener, app)
        .await
        .context("Failed to start server")?;

    Ok(())
}
