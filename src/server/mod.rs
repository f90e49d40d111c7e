//! HTTP server: state, router and handlers
//!
//! Request flow: CORS → rate limiter → bearer auth → handler. Handlers
//! read and write the context store, consult the cache-backed market
//! client, and call the configured text-generation provider.

use anyhow::{Context as _, Result};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{middleware, Extension, Form, Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;

use crate::auth::middleware::CurrentUser;
use crate::auth::{NewUser, RegisterError, TokenIssuer, User, UserRegistry};
use crate::cache::{Cache, RedisCache};
use crate::config::Config;
use crate::context::ContextStore;
use crate::error::ApiError;
use crate::llm::{self, prompt, Generator};
use crate::market::{self, MarketDataClient};
use crate::metrics::ServiceMetrics;
use crate::ratelimit::{self, RateLimiter};
use crate::training::{TrainingRunner, TrainingSpec};

/// Support responses below this confidence are queued for human review.
const REVIEW_THRESHOLD: f32 = 0.8;

/// Shared application state
pub struct AppState {
    pub config: Config,
    pub contexts: Arc<ContextStore>,
    pub limiter: Arc<RateLimiter>,
    pub cache: Cache,
    pub users: Arc<UserRegistry>,
    pub tokens: Arc<TokenIssuer>,
    pub generator: Arc<dyn Generator>,
    pub market: MarketDataClient,
    pub metrics: Arc<ServiceMetrics>,
    pub trainer: Arc<TrainingRunner>,
}

impl AppState {
    /// Build state from configuration, connecting to Redis when enabled.
    pub async fn from_config(config: Config) -> Result<Self> {
        let cache = if config.cache.redis_enabled {
            Cache::new(Arc::new(RedisCache::connect(&config.cache.url()).await?))
        } else {
            Cache::in_memory()
        };
        let generator: Arc<dyn Generator> =
            Arc::from(llm::create_generator(&config.llm.default_provider, &config.llm)?);
        Ok(Self::with_parts(config, cache, generator))
    }

    /// Assemble state from pre-built collaborators. Tests use this with
    /// the in-memory cache and the local provider.
    pub fn with_parts(config: Config, cache: Cache, generator: Arc<dyn Generator>) -> Self {
        let users = Arc::new(UserRegistry::new(config.auth.bcrypt_cost));
        bootstrap_admin(&users);

        Self {
            contexts: Arc::new(ContextStore::from_config(&config.context)),
            limiter: Arc::new(RateLimiter::from_config(&config.rate_limit)),
            users,
            tokens: Arc::new(TokenIssuer::new(
                &config.auth.secret(),
                config.auth.token_expire_minutes,
            )),
            market: MarketDataClient::new(&config.market, cache.clone()),
            metrics: Arc::new(ServiceMetrics::new()),
            trainer: Arc::new(TrainingRunner::new(config.training.output_dir.clone())),
            cache,
            generator,
            config,
        }
    }
}

/// Create the initial admin account when the environment provides one.
/// Without it, a fresh process only ever has the accounts registered over
/// the API, none of which carry the admin scope.
fn bootstrap_admin(users: &UserRegistry) {
    let (Ok(username), Ok(password)) = (
        std::env::var("TELLER_ADMIN_USER"),
        std::env::var("TELLER_ADMIN_PASSWORD"),
    ) else {
        return;
    };

    match users.register(NewUser {
        username: username.clone(),
        email: format!("{username}@localhost"),
        password,
        full_name: None,
    }) {
        Ok(_) => {
            users.grant_scope(&username, "admin");
            tracing::info!(%username, "bootstrapped admin account");
        }
        Err(e) => tracing::warn!("admin bootstrap failed: {e}"),
    }
}

/// Build the full router with middleware attached.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/token", post(issue_token))
        .route("/auth/login", post(issue_token))
        .route("/auth/register", post(register))
        .route("/auth/users/me", get(current_user))
        .route("/chat", post(chat))
        .route("/train", post(train))
        .route("/metrics", get(metrics))
        .route("/financial/analyze", post(financial_analyze))
        .route("/financial/market-data/:symbol", get(market_data))
        .route("/support/query", post(support_query))
        .route("/support/categories", get(support_categories))
        .route("/support/feedback", post(support_feedback))
        .layer(middleware::from_fn_with_state(
            state.tokens.clone(),
            crate::auth::middleware::middleware,
        ))
        .layer(middleware::from_fn_with_state(
            state.limiter.clone(),
            ratelimit::middleware,
        ))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Run the HTTP server until ctrl-c, then snapshot contexts if configured.
pub async fn run(config: Config) -> Result<()> {
    let state = Arc::new(AppState::from_config(config).await?);

    if let Some(path) = state.config.context.snapshot_path.clone() {
        if path.exists() {
            if let Err(e) = state.contexts.load(&path) {
                tracing::warn!("could not restore context snapshot: {e:#}");
            }
        }
    }

    tokio::spawn(run_context_sweeper(
        state.contexts.clone(),
        std::time::Duration::from_secs(state.config.context.sweep_interval_secs),
    ));
    tokio::spawn(ratelimit::run_sweeper(
        state.limiter.clone(),
        std::time::Duration::from_secs(state.limiter.window_secs().max(1) as u64),
    ));

    let addr: SocketAddr = format!("{}:{}", state.config.server.host, state.config.server.port)
        .parse()
        .context("Invalid listen address")?;
    tracing::info!("HTTP server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let router = app(state.clone());
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await?;

    if let Some(path) = &state.config.context.snapshot_path {
        if let Err(e) = state.contexts.save(path) {
            tracing::error!("context snapshot on shutdown failed: {e:#}");
        }
    }
    Ok(())
}

/// Expiry sweep loop for the context store. The store never schedules
/// itself; eviction also happens lazily on reads.
pub async fn run_context_sweeper(store: Arc<ContextStore>, interval: std::time::Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let evicted = store.sweep_expired();
        if evicted > 0 {
            tracing::debug!(evicted, "context sweep evicted expired conversations");
        }
    }
}

// ---- request/response bodies ----

#[derive(Debug, Deserialize)]
struct ChatMessage {
    text: String,
    #[serde(default)]
    context_id: Option<String>,
    #[serde(default = "default_language")]
    language: String,
}

fn default_language() -> String {
    "en".to_string()
}

#[derive(Debug, Serialize)]
struct ChatReply {
    response: String,
    confidence: f32,
    context_id: String,
    timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: String,
    timestamp: DateTime<Utc>,
    version: String,
}

#[derive(Debug, Deserialize)]
struct LoginForm {
    username: String,
    password: String,
}

#[derive(Debug, Serialize)]
struct TokenGrant {
    access_token: String,
    token_type: String,
    expires_in: i64,
}

#[derive(Debug, Deserialize)]
struct FinancialQuery {
    query: String,
    #[serde(default)]
    context: Option<serde_json::Map<String, Value>>,
    #[serde(default = "default_true")]
    include_market_data: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct SupportQuery {
    query: String,
    #[serde(default)]
    category: Option<String>,
    #[serde(default = "default_priority")]
    priority: String,
    #[serde(default)]
    context: Option<serde_json::Map<String, Value>>,
}

fn default_priority() -> String {
    "normal".to_string()
}

#[derive(Debug, Serialize)]
struct DomainReply {
    response: String,
    confidence: f32,
    context: Value,
    timestamp: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct Feedback {
    query_id: String,
    feedback: String,
    helpful: bool,
}

// ---- handlers ----

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: Utc::now(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn issue_token(
    State(state): State<Arc<AppState>>,
    Form(form): Form<LoginForm>,
) -> Result<Json<TokenGrant>, ApiError> {
    let user = state
        .users
        .authenticate(&form.username, &form.password)
        .ok_or(ApiError::Unauthorized)?;

    let token = state
        .tokens
        .issue(&user.username, &user.scopes, None)
        .map_err(ApiError::Internal)?;

    Ok(Json(TokenGrant {
        access_token: token,
        token_type: "bearer".to_string(),
        expires_in: state.config.auth.token_expire_minutes * 60,
    }))
}

async fn register(
    State(state): State<Arc<AppState>>,
    Json(new_user): Json<NewUser>,
) -> Result<(StatusCode, Json<User>), ApiError> {
    match state.users.register(new_user) {
        Ok(user) => Ok((StatusCode::CREATED, Json(user))),
        Err(RegisterError::UsernameTaken) => {
            Err(ApiError::BadRequest("Username already registered".to_string()))
        }
        Err(RegisterError::Hashing(e)) => Err(ApiError::Internal(e)),
    }
}

async fn current_user(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<CurrentUser>,
) -> Result<Json<User>, ApiError> {
    state
        .users
        .get(&user.subject)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("User".to_string()))
}

async fn chat(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<CurrentUser>,
    Json(message): Json<ChatMessage>,
) -> Result<Json<ChatReply>, ApiError> {
    state.metrics.record_request();

    // Unknown or malformed ids behave like absent ones: a fresh
    // conversation is allocated
    let context_id = message
        .context_id
        .as_deref()
        .and_then(|raw| Uuid::parse_str(raw).ok());
    let snapshot = context_id.and_then(|id| state.contexts.get(&id));

    let prompt = prompt::build_prompt(&message.text, snapshot.as_ref());
    let reply = state
        .generator
        .generate(&prompt)
        .await
        .map_err(ApiError::Internal)?;

    let id = state
        .contexts
        .record_turn(context_id, &message.text, &reply.text);
    state.metrics.record_success(reply.confidence);

    tracing::debug!(
        user = %user.subject,
        context = %id,
        language = %message.language,
        confidence = reply.confidence,
        "chat turn recorded"
    );

    Ok(Json(ChatReply {
        response: reply.text,
        confidence: reply.confidence,
        context_id: id.to_string(),
        timestamp: Utc::now(),
    }))
}

async fn train(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<CurrentUser>,
    Json(spec): Json<TrainingSpec>,
) -> Result<Json<Value>, ApiError> {
    user.require_scope("admin")?;

    let job = state
        .trainer
        .start(spec)
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    Ok(Json(serde_json::json!({
        "message": "Training started",
        "job_id": job.id,
        "model_path": job.model_path,
    })))
}

async fn metrics(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<CurrentUser>,
) -> Result<impl IntoResponse, ApiError> {
    user.require_scope("admin")?;
    Ok(Json(state.metrics.snapshot()))
}

/// Keys of ad-hoc context entries that flow into the prompt.
const PROMPT_CONTEXT_KEYS: &[&str] = &["previous_message", "topic", "user_intent", "category", "priority"];

fn prompt_extras(context: &serde_json::Map<String, Value>) -> Vec<(String, String)> {
    PROMPT_CONTEXT_KEYS
        .iter()
        .filter_map(|key| {
            context
                .get(*key)
                .and_then(Value::as_str)
                .map(|value| ((*key).to_string(), value.to_string()))
        })
        .collect()
}

async fn financial_analyze(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<CurrentUser>,
    Json(query): Json<FinancialQuery>,
) -> Result<Json<DomainReply>, ApiError> {
    state.metrics.record_request();

    let mut context = query.context.unwrap_or_default();
    if query.include_market_data {
        let symbols = market::extract_symbols(&query.query);
        if !symbols.is_empty() {
            context.insert("market_data".to_string(), state.market.quotes(&symbols).await);
        }
    }

    let prompt = prompt::build_domain_prompt("financial", &query.query, &prompt_extras(&context));
    let reply = state
        .generator
        .generate(&prompt)
        .await
        .map_err(ApiError::Internal)?;

    state.contexts.record_turn(None, &query.query, &reply.text);
    state.metrics.record_success(reply.confidence);
    tracing::debug!(user = %user.subject, "financial query answered");

    Ok(Json(DomainReply {
        response: reply.text,
        confidence: reply.confidence,
        context: Value::Object(context),
        timestamp: Utc::now(),
    }))
}

async fn market_data(
    State(state): State<Arc<AppState>>,
    Path(symbol): Path<String>,
) -> Result<Json<Value>, ApiError> {
    match state.market.quote(&symbol).await {
        Ok(snapshot) => Ok(Json(snapshot)),
        Err(e) => {
            tracing::debug!(%symbol, "market data lookup failed: {e:#}");
            Err(ApiError::NotFound(format!("Stock data for symbol {symbol}")))
        }
    }
}

async fn support_query(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<CurrentUser>,
    Json(query): Json<SupportQuery>,
) -> Result<Json<DomainReply>, ApiError> {
    state.metrics.record_request();

    let mut context = query.context.unwrap_or_default();
    if let Some(category) = &query.category {
        context.insert("category".to_string(), Value::String(category.clone()));
    }
    context.insert("priority".to_string(), Value::String(query.priority.clone()));

    let prompt = prompt::build_domain_prompt("support", &query.query, &prompt_extras(&context));
    let reply = state
        .generator
        .generate(&prompt)
        .await
        .map_err(ApiError::Internal)?;

    if reply.confidence < REVIEW_THRESHOLD {
        let question = query.query.clone();
        let answer = reply.text.clone();
        let confidence = reply.confidence;
        tokio::spawn(async move {
            schedule_human_review(&question, &answer, confidence).await;
        });
    }

    state.contexts.record_turn(None, &query.query, &reply.text);
    state.metrics.record_success(reply.confidence);
    tracing::debug!(user = %user.subject, "support query answered");

    Ok(Json(DomainReply {
        response: reply.text,
        confidence: reply.confidence,
        context: Value::Object(context),
        timestamp: Utc::now(),
    }))
}

async fn support_categories() -> Json<Vec<&'static str>> {
    Json(vec!["account", "billing", "technical", "product", "general"])
}

async fn support_feedback(
    State(_state): State<Arc<AppState>>,
    Extension(user): Extension<CurrentUser>,
    Json(feedback): Json<Feedback>,
) -> Json<Value> {
    let submitted_by = user.subject.clone();
    tokio::spawn(async move {
        store_feedback(&submitted_by, &feedback).await;
    });

    Json(serde_json::json!({
        "status": "Feedback received",
        "timestamp": Utc::now(),
    }))
}

/// Queue a low-confidence answer for a human to look at. The review
/// pipeline itself lives outside this service; here it is surfaced in the
/// log for the support tooling to pick up.
async fn schedule_human_review(query: &str, response: &str, confidence: f32) {
    tracing::warn!(
        confidence,
        query,
        response,
        "support answer below review threshold"
    );
}

async fn store_feedback(submitted_by: &str, feedback: &Feedback) {
    tracing::info!(
        submitted_by,
        query_id = %feedback.query_id,
        helpful = feedback.helpful,
        feedback = %feedback.feedback,
        "support feedback recorded"
    );
}
