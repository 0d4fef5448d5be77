//! Geo Prize Server
//!
//! HTTP surface over the admin gate and the prize distributor.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use crate::audit::{AuditLog, ReasonCode};
use crate::chain::{JsonRpcChain, Network, OwnerAuthority};
use crate::config::Config;
use crate::distributor::{distribution_digest, Distribution, PrizeDistributor};
use crate::error::ErrorCategory;
use crate::gate::{AdminGate, AuthorizationRequest, Outcome};
use crate::model::{amount, Address, CompetitionKey};
use crate::pg_storage::PgStorage;
use crate::prize::{PayoutTable, PrizeTier};
use crate::storage::{AuditStore, DistributionStore, SqliteStore};

pub const DISTRIBUTE_ROUTE: &str = "distribute";

pub struct AppState {
    pub gate: AdminGate,
    pub distributor: PrizeDistributor,
    pub default_tiers: Vec<PrizeTier>,
    pub network: Network,
    pub started_at: std::time::Instant,
}

impl AppState {
    /// Wire storage, chain reader, gate and distributor from configuration.
    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        let audit_store: Arc<dyn AuditStore>;
        let distribution_store: Arc<dyn DistributionStore>;
        match config.database_url() {
            Some(url) => {
                let storage = Arc::new(PgStorage::new(&url).await?);
                info!("PostgreSQL storage initialized");
                audit_store = storage.clone();
                distribution_store = storage;
            }
            None => {
                let storage = Arc::new(SqliteStore::new(&config.database.sqlite_path)?);
                info!("SQLite storage at {}", config.database.sqlite_path);
                audit_store = storage.clone();
                distribution_store = storage;
            }
        }

        let network = config.network()?;
        let endpoint = config
            .rpc_url(network)
            .ok_or_else(|| anyhow::anyhow!("No RPC endpoint configured for {}", network))?;
        info!("Reading contract owners from {} ({})", network, endpoint);
        let owners = OwnerAuthority::new(Arc::new(JsonRpcChain::new(network, endpoint)))
            .with_timeout(config.chain_timeout());

        let gate = AdminGate::new(
            config.contract_registry(),
            config.rate_limiter(),
            owners,
            AuditLog::new(audit_store),
        )
        .with_freshness(config.freshness());

        let distributor = PrizeDistributor::new(config.calculator(), distribution_store)
            .with_retry(config.distribution.persist_attempts, config.retry_backoff());

        Ok(Self {
            gate,
            distributor,
            default_tiers: config.prizes.tiers.clone(),
            network,
            started_at: std::time::Instant::now(),
        })
    }

    fn tiers<'a>(&'a self, requested: &'a Option<Vec<PrizeTier>>) -> &'a [PrizeTier] {
        requested.as_deref().unwrap_or(&self.default_tiers)
    }
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/payouts/preview", post(preview_handler))
        .route("/admin/distribute", post(distribute_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ============================================================================
// RESPONSES
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub healthy: bool,
    pub network: Network,
    pub uptime_secs: u64,
    pub version: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub category: ErrorCategory,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<ReasonCode>,
}

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ErrorResponse>)>;

fn reject(
    category: ErrorCategory,
    reason: Option<ReasonCode>,
    message: impl ToString,
) -> (StatusCode, Json<ErrorResponse>) {
    (
        status_for(category, reason),
        Json(ErrorResponse {
            error: message.to_string(),
            category,
            reason,
        }),
    )
}

/// HTTP status for a failure category, refined by the gate's reason code.
pub fn status_for(category: ErrorCategory, reason: Option<ReasonCode>) -> StatusCode {
    match (category, reason) {
        (_, Some(ReasonCode::RateLimited)) => StatusCode::TOO_MANY_REQUESTS,
        (_, Some(ReasonCode::NotOwner)) => StatusCode::FORBIDDEN,
        (ErrorCategory::Authorization, _) => StatusCode::UNAUTHORIZED,
        (ErrorCategory::Validation, _) => StatusCode::BAD_REQUEST,
        (ErrorCategory::Infrastructure, _) => StatusCode::SERVICE_UNAVAILABLE,
        (ErrorCategory::Computation, _) => StatusCode::UNPROCESSABLE_ENTITY,
    }
}

// ============================================================================
// HANDLERS
// ============================================================================

async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        healthy: true,
        network: state.network,
        uptime_secs: state.started_at.elapsed().as_secs(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

#[derive(Debug, Deserialize)]
pub struct PreviewRequest {
    pub ranking: Vec<Address>,
    #[serde(with = "amount")]
    pub pool: u128,
    #[serde(default)]
    pub tiers: Option<Vec<PrizeTier>>,
}

async fn preview_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<PreviewRequest>,
) -> ApiResult<PayoutTable> {
    state
        .distributor
        .calculator()
        .compute_payouts(&request.ranking, request.pool, state.tiers(&request.tiers))
        .map(Json)
        .map_err(|e| reject(e.category(), None, e))
}

#[derive(Debug, Deserialize)]
pub struct DistributeRequest {
    pub message: String,
    pub signature: String,
    pub signer: Address,
    pub contract: String,
    pub ranking: Vec<Address>,
    #[serde(with = "amount")]
    pub pool: u128,
    #[serde(default)]
    pub tiers: Option<Vec<PrizeTier>>,
}

async fn distribute_handler(
    State(state): State<Arc<AppState>>,
    ConnectInfo(client): ConnectInfo<SocketAddr>,
    Json(request): Json<DistributeRequest>,
) -> ApiResult<Distribution> {
    let tiers = state.tiers(&request.tiers);
    let auth = AuthorizationRequest {
        client_addr: client.ip().to_string(),
        route: DISTRIBUTE_ROUTE.to_string(),
        message: request.message.clone(),
        signature: request.signature.clone(),
        signer: request.signer,
        contract: request.contract.clone(),
        payload: distribution_digest(&request.ranking, request.pool, tiers),
    };

    let decision = state
        .gate
        .authorize(&auth)
        .await
        .map_err(|e| reject(e.category(), None, e))?;

    if let Outcome::Denied(reason) = decision.outcome {
        let category = reason
            .category()
            .unwrap_or(ErrorCategory::Authorization);
        return Err(reject(category, Some(reason), format!("request denied: {}", reason)));
    }

    // The competition is the resource the admin signed for, within the signed contract.
    let competition = CompetitionKey::new(decision.contract, decision.target);
    state
        .distributor
        .distribute(&competition, &request.ranking, request.pool, tiers)
        .await
        .map(Json)
        .map_err(|e| {
            error!("Distribution for {} failed: {}", competition, e);
            reject(e.category(), None, e)
        })
}

/// Run the server
pub async fn run_server(host: &str, port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);
    let addr = format!("{}:{}", host, port);

    info!("Starting Geo Prize server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{address_of, sign_personal_message, AdminMessage};
    use crate::chain::{ChainError, ChainReader, StaticChain};
    use crate::gate::ContractRegistry;
    use crate::prize::PrizeCalculator;
    use crate::rate_limit::{RateLimit, RateLimiter};
    use crate::storage::{DistributionState, MemoryStore};
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::extract::connect_info::MockConnectInfo;
    use axum::http::Request;
    use libsecp256k1::SecretKey;
    use rand::Rng;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn random_key() -> SecretKey {
        let mut rng = rand::thread_rng();
        loop {
            if let Ok(key) = SecretKey::parse(&rng.gen::<[u8; 32]>()) {
                return key;
            }
        }
    }

    fn addr(n: u8) -> Address {
        Address::from_bytes([n; 20])
    }

    fn contract() -> Address {
        addr(0xc0)
    }

    fn podium() -> Vec<PrizeTier> {
        vec![
            PrizeTier::fraction("gold", 1, 1, 1, 2),
            PrizeTier::fraction("silver", 2, 2, 3, 10),
            PrizeTier::fraction("bronze", 3, 3, 1, 5),
        ]
    }

    struct DownChain;

    #[async_trait]
    impl ChainReader for DownChain {
        async fn get_owner(&self, _contract: &Address) -> Result<Address, ChainError> {
            Err(ChainError::Transport("connection refused".to_string()))
        }
    }

    fn app(chain: Arc<dyn ChainReader>, limit: RateLimit) -> (Router, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let state = AppState {
            gate: AdminGate::new(
                ContractRegistry::new().with_contract("prize-pool", contract()),
                RateLimiter::new(limit),
                OwnerAuthority::new(chain),
                AuditLog::new(store.clone()),
            ),
            distributor: PrizeDistributor::new(PrizeCalculator::default(), store.clone()),
            default_tiers: podium(),
            network: Network::Testnet,
            started_at: std::time::Instant::now(),
        };
        let router = create_router(Arc::new(state))
            .layer(MockConnectInfo(SocketAddr::from(([10, 0, 0, 1], 4000))));
        (router, store)
    }

    fn owned_by(owner: &SecretKey) -> Arc<dyn ChainReader> {
        Arc::new(StaticChain::new().with_owner(contract(), address_of(owner)))
    }

    /// Body for `ranking`, signed over `signed_ranking`.
    fn distribute_body(secret: &SecretKey, signed_ranking: &[Address], ranking: &[Address]) -> Body {
        let payload = distribution_digest(signed_ranking, 1000, &podium());
        let message = AdminMessage::new(
            DISTRIBUTE_ROUTE,
            contract(),
            "geo-1",
            payload,
            chrono::Utc::now().timestamp(),
        )
        .unwrap()
        .to_string();
        Body::from(
            json!({
                "message": message,
                "signature": sign_personal_message(message.as_bytes(), secret),
                "signer": address_of(secret),
                "contract": "prize-pool",
                "ranking": ranking,
                "pool": "1000",
            })
            .to_string(),
        )
    }

    async fn post_distribute(router: &Router, body: Body) -> (StatusCode, Value) {
        let response = router
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/admin/distribute")
                    .header("content-type", "application/json")
                    .body(body)
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            status_for(ErrorCategory::Validation, None),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for(ErrorCategory::Authorization, Some(ReasonCode::RateLimited)),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            status_for(ErrorCategory::Authorization, Some(ReasonCode::NotOwner)),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            status_for(ErrorCategory::Authorization, Some(ReasonCode::ExpiredSignature)),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            status_for(ErrorCategory::Infrastructure, Some(ReasonCode::ChainUnavailable)),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_for(ErrorCategory::Computation, None),
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }

    #[test]
    fn test_preview_request_accepts_string_pool() {
        let request: PreviewRequest = serde_json::from_str(
            r#"{
                "ranking": ["0x0101010101010101010101010101010101010101"],
                "pool": "1000000000000000000000000"
            }"#,
        )
        .unwrap();
        assert_eq!(request.pool, 1_000_000_000_000_000_000_000_000);
        assert!(request.tiers.is_none());
    }

    #[tokio::test]
    async fn test_owner_distributes_under_signed_contract() {
        let owner = random_key();
        let (router, store) = app(owned_by(&owner), RateLimit::default());
        let ranking = [addr(1), addr(2), addr(3)];

        let (status, body) = post_distribute(&router, distribute_body(&owner, &ranking, &ranking)).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["competition"]["contract"], contract().to_string());
        assert_eq!(body["competition"]["id"], "geo-1");
        assert_eq!(body["newly_recorded"], true);
        assert_eq!(body["instructions"].as_array().unwrap().len(), 3);
        assert_eq!(body["instructions"][0]["amount"], "500");

        let recorded = store
            .distribution_state(&CompetitionKey::new(contract(), "geo-1"))
            .await
            .unwrap();
        assert!(matches!(recorded, DistributionState::Distributed(ref i) if i.len() == 3));
    }

    #[tokio::test]
    async fn test_non_owner_gets_forbidden() {
        let owner = random_key();
        let (router, _store) = app(owned_by(&owner), RateLimit::default());
        let ranking = [addr(1), addr(2)];

        let (status, body) =
            post_distribute(&router, distribute_body(&random_key(), &ranking, &ranking)).await;

        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["reason"], "not_owner");
        assert_eq!(body["category"], "authorization");
    }

    #[tokio::test]
    async fn test_rate_limited_caller_gets_429() {
        let owner = random_key();
        let (router, _store) = app(
            owned_by(&owner),
            RateLimit {
                window_secs: 60,
                max_requests: 1,
            },
        );
        let ranking = [addr(1)];

        let (first, _) = post_distribute(&router, distribute_body(&owner, &ranking, &ranking)).await;
        assert_eq!(first, StatusCode::OK);

        let (second, body) =
            post_distribute(&router, distribute_body(&owner, &ranking, &ranking)).await;
        assert_eq!(second, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body["reason"], "rate_limited");
    }

    #[tokio::test]
    async fn test_chain_outage_is_service_unavailable() {
        let (router, store) = app(Arc::new(DownChain), RateLimit::default());
        let ranking = [addr(1)];

        let (status, body) =
            post_distribute(&router, distribute_body(&random_key(), &ranking, &ranking)).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["reason"], "chain_unavailable");
        assert_eq!(
            store
                .distribution_state(&CompetitionKey::new(contract(), "geo-1"))
                .await
                .unwrap(),
            DistributionState::NotDistributed
        );
    }

    #[tokio::test]
    async fn test_swapped_ranking_is_rejected() {
        let owner = random_key();
        let (router, store) = app(owned_by(&owner), RateLimit::default());
        let signed = [addr(1), addr(2), addr(3)];
        let swapped = [addr(3), addr(2), addr(1)];

        let (status, body) = post_distribute(&router, distribute_body(&owner, &signed, &swapped)).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["category"], "validation");
        assert_eq!(
            store
                .distribution_state(&CompetitionKey::new(contract(), "geo-1"))
                .await
                .unwrap(),
            DistributionState::NotDistributed
        );
        assert!(store.audit_entries(10).await.unwrap().is_empty());
    }
}
