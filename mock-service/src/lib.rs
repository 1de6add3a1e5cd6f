use axum::{
    debug_handler,
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
#[allow(unused)]
use metrics::{counter, gauge, histogram};
use rand_distr::{Distribution, SkewNormal};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::{
    num::NonZeroU32,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

pub use axum::http::StatusCode;

pub const PRODUCTS_PATH: &str = "/api/v1/products";

/// Behaviour of the products endpoint.
///
/// `delay_ms` and `status` can also be overridden per request through the query string,
/// e.g. `/api/v1/products?delay_ms=50&status=500`.
#[derive(Clone, Debug)]
pub struct MockConfig {
    pub delay: Duration,
    /// Standard deviation of a right-skewed jitter added to `delay`.
    pub jitter: Duration,
    pub status: StatusCode,
    /// Requests per second above which the service answers 503.
    pub max_rps: Option<NonZeroU32>,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            delay: Duration::ZERO,
            jitter: Duration::ZERO,
            status: StatusCode::OK,
            max_rps: None,
        }
    }
}

struct AppState {
    config: MockConfig,
    limiter: Option<DefaultDirectRateLimiter>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Overrides {
    delay_ms: Option<u64>,
    status: Option<u16>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Product {
    pub id: u32,
    pub name: String,
    pub price_cents: u64,
}

pub fn router(config: MockConfig) -> Router {
    let state = Arc::new(AppState {
        limiter: config.max_rps.map(rate_limiter),
        config,
    });

    Router::new()
        .route(PRODUCTS_PATH, get(products))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn run(addr: SocketAddr, config: MockConfig) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Mock service listening on {}", listener.local_addr()?);
    axum::serve(listener, router(config)).await?;
    Ok(())
}

/// Serves on an ephemeral localhost port in the background and returns its address.
pub async fn spawn(config: MockConfig) -> anyhow::Result<SocketAddr> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let app = router(config);
    tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, app).await {
            tracing::error!("Mock service stopped: {err}");
        }
    });
    debug!("Mock service spawned on {addr}");
    Ok(addr)
}

#[debug_handler]
async fn products(
    State(state): State<Arc<AppState>>,
    Query(overrides): Query<Overrides>,
) -> Result<Json<Vec<Product>>, StatusCode> {
    SERVED.fetch_add(1, Ordering::Relaxed);
    counter!("mock_service_requests_total").increment(1);

    let delay = overrides
        .delay_ms
        .map(Duration::from_millis)
        .unwrap_or(state.config.delay);
    tokio::time::sleep(delay + jitter(state.config.jitter)).await;

    if let Some(limiter) = &state.limiter {
        if limiter.check().is_err() {
            debug!("Rate cap exceeded");
            return Err(StatusCode::SERVICE_UNAVAILABLE);
        }
    }

    let status = match overrides.status {
        Some(status) => StatusCode::from_u16(status).map_err(|_| StatusCode::BAD_REQUEST)?,
        None => state.config.status,
    };
    if !status.is_success() {
        return Err(status);
    }

    Ok(Json(catalog()))
}

fn jitter(std: Duration) -> Duration {
    if std.is_zero() {
        return Duration::ZERO;
    }
    match SkewNormal::new(0., std.as_secs_f64(), 4.) {
        Ok(skew) => Duration::from_secs_f64(skew.sample(&mut rand::thread_rng()).max(0.)),
        Err(_) => Duration::ZERO,
    }
}

fn catalog() -> Vec<Product> {
    (1..=10)
        .map(|id| Product {
            id,
            name: format!("product-{id}"),
            price_cents: 100 * id as u64 + 99,
        })
        .collect()
}

/** Utils **/

pub fn rate_limiter(rps: NonZeroU32) -> DefaultDirectRateLimiter {
    RateLimiter::direct(Quota::per_second(rps))
}

/** RPS Printer **/

static SERVED: AtomicU64 = AtomicU64::new(0);

/// Requests served by every router in this process.
pub fn served() -> u64 {
    SERVED.load(Ordering::Relaxed)
}

/// Logs how many requests were served over each second.
pub async fn rps_measure_task() {
    let mut last = 0;
    loop {
        tokio::time::sleep(Duration::from_millis(1000)).await;
        let total = served();
        info!("{} RPS", total - last);
        gauge!("mock_service_rps").set((total - last) as f64);
        last = total;
    }
}
