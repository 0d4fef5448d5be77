//! Chain read access
//!
//! Read-only contract calls used to resolve the on-chain owner of a
//! competition contract.
//!
//! - JSON-RPC `eth_call` reader, one per network (mainnet / testnet)
//! - Static owner table for local runs
//! - Owner check with a bounded timeout

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, warn};

use crate::model::Address;

/// `owner()` function selector
const OWNER_SELECTOR: &str = "0x8da5cb5b";

/// Default bound for a single owner lookup
pub const DEFAULT_CHAIN_TIMEOUT: Duration = Duration::from_secs(8);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChainError {
    #[error("chain request failed: {0}")]
    Transport(String),
    #[error("chain RPC error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("unexpected chain response: {0}")]
    InvalidResponse(String),
    #[error("chain call timed out after {0:?}")]
    Timeout(Duration),
    #[error("contract {0} is not known to this reader")]
    UnknownContract(Address),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Mainnet,
    Testnet,
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Network::Mainnet => write!(f, "mainnet"),
            Network::Testnet => write!(f, "testnet"),
        }
    }
}

impl FromStr for Network {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mainnet" => Ok(Network::Mainnet),
            "testnet" => Ok(Network::Testnet),
            other => Err(format!("unknown network: {}", other)),
        }
    }
}

/// Read-only view of the chain.
#[async_trait]
pub trait ChainReader: Send + Sync {
    async fn get_owner(&self, contract: &Address) -> Result<Address, ChainError>;
}

// ============================================================================
// JSON-RPC READER
// ============================================================================

pub struct JsonRpcChain {
    client: reqwest::Client,
    network: Network,
    endpoint: String,
}

#[derive(Deserialize)]
struct RpcResponse {
    result: Option<String>,
    error: Option<RpcErrorBody>,
}

#[derive(Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

impl JsonRpcChain {
    pub fn new(network: Network, endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            network,
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl ChainReader for JsonRpcChain {
    async fn get_owner(&self, contract: &Address) -> Result<Address, ChainError> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "eth_call",
            "params": [
                { "to": contract.to_string(), "data": OWNER_SELECTOR },
                "latest"
            ]
        });

        debug!("eth_call owner() on {} via {}", contract, self.network);

        let response = self
            .client
            .post(&self.endpoint)
            .header("User-Agent", "geo-prize/0.1.0")
            .json(&body)
            .send()
            .await
            .map_err(|e| ChainError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            warn!("Chain RPC returned HTTP {}", status);
            return Err(ChainError::Transport(format!("HTTP {}", status)));
        }

        let data: RpcResponse = response
            .json()
            .await
            .map_err(|e| ChainError::InvalidResponse(e.to_string()))?;

        if let Some(err) = data.error {
            return Err(ChainError::Rpc {
                code: err.code,
                message: err.message,
            });
        }

        let result = data
            .result
            .ok_or_else(|| ChainError::InvalidResponse("missing result".to_string()))?;
        // Zero means ownerless (renounced or never set); a valid answer, not a failure.
        decode_address_word(&result)
    }
}

/// Decode an ABI-encoded `address` return value.
pub fn decode_address_word(word: &str) -> Result<Address, ChainError> {
    let hex_part = word.strip_prefix("0x").unwrap_or(word);
    let bytes =
        hex::decode(hex_part).map_err(|e| ChainError::InvalidResponse(e.to_string()))?;
    if bytes.len() != 32 {
        return Err(ChainError::InvalidResponse(format!(
            "expected 32-byte word, got {} bytes",
            bytes.len()
        )));
    }
    if bytes[..12].iter().any(|b| *b != 0) {
        return Err(ChainError::InvalidResponse(
            "address word has dirty high bytes".to_string(),
        ));
    }
    let mut out = [0u8; 20];
    out.copy_from_slice(&bytes[12..]);
    Ok(Address::from_bytes(out))
}

// ============================================================================
// STATIC READER
// ============================================================================

/// Fixed owner table, for local runs and tests.
#[derive(Default)]
pub struct StaticChain {
    owners: RwLock<HashMap<Address, Address>>,
}

impl StaticChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_owner(self, contract: Address, owner: Address) -> Self {
        self.set_owner(contract, owner);
        self
    }

    pub fn set_owner(&self, contract: Address, owner: Address) {
        self.owners.write().insert(contract, owner);
    }
}

#[async_trait]
impl ChainReader for StaticChain {
    async fn get_owner(&self, contract: &Address) -> Result<Address, ChainError> {
        self.owners
            .read()
            .get(contract)
            .copied()
            .ok_or(ChainError::UnknownContract(*contract))
    }
}

// ============================================================================
// OWNER AUTHORITY
// ============================================================================

/// Decides whether an address currently owns a contract.
///
/// Ownership can change at any block, so results are never cached here.
#[derive(Clone)]
pub struct OwnerAuthority {
    chain: Arc<dyn ChainReader>,
    timeout: Duration,
}

impl OwnerAuthority {
    pub fn new(chain: Arc<dyn ChainReader>) -> Self {
        Self {
            chain,
            timeout: DEFAULT_CHAIN_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn current_owner(&self, contract: &Address) -> Result<Address, ChainError> {
        match tokio::time::timeout(self.timeout, self.chain.get_owner(contract)).await {
            Ok(result) => result,
            Err(_) => Err(ChainError::Timeout(self.timeout)),
        }
    }

    /// `Err` means the chain could not be asked; callers must fail closed.
    /// An ownerless contract has no admin.
    pub async fn is_owner(
        &self,
        contract: &Address,
        candidate: &Address,
    ) -> Result<bool, ChainError> {
        let owner = self.current_owner(contract).await?;
        Ok(!owner.is_zero() && &owner == candidate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode, routing::post, Json, Router};
    use serde_json::Value;

    fn addr(n: u8) -> Address {
        Address::from_bytes([n; 20])
    }

    struct SlowChain;

    #[async_trait]
    impl ChainReader for SlowChain {
        async fn get_owner(&self, _contract: &Address) -> Result<Address, ChainError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(addr(1))
        }
    }

    /// Local JSON-RPC endpoint that answers every owner() call with `reply`.
    async fn spawn_rpc(status: StatusCode, reply: Value) -> String {
        let app = Router::new().route(
            "/",
            post(move |Json(request): Json<Value>| {
                let reply = reply.clone();
                async move {
                    if request["method"] != "eth_call"
                        || request["params"][0]["data"] != OWNER_SELECTOR
                    {
                        return (StatusCode::BAD_REQUEST, Json(json!({})));
                    }
                    (status, Json(reply))
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let local = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", local)
    }

    fn owner_word(owner: &Address) -> String {
        format!("0x{}{}", "00".repeat(12), hex::encode(owner.as_bytes()))
    }

    #[tokio::test]
    async fn test_json_rpc_reads_owner() {
        let endpoint = spawn_rpc(
            StatusCode::OK,
            json!({ "jsonrpc": "2.0", "id": 1, "result": owner_word(&addr(0xab)) }),
        )
        .await;
        let chain = JsonRpcChain::new(Network::Testnet, endpoint);
        assert_eq!(chain.get_owner(&addr(9)).await, Ok(addr(0xab)));
    }

    #[tokio::test]
    async fn test_json_rpc_http_failure_is_transport_error() {
        let endpoint = spawn_rpc(StatusCode::INTERNAL_SERVER_ERROR, json!({})).await;
        let chain = JsonRpcChain::new(Network::Testnet, endpoint);
        assert!(matches!(
            chain.get_owner(&addr(9)).await,
            Err(ChainError::Transport(_))
        ));
    }

    #[tokio::test]
    async fn test_json_rpc_error_body() {
        let endpoint = spawn_rpc(
            StatusCode::OK,
            json!({
                "jsonrpc": "2.0",
                "id": 1,
                "error": { "code": -32000, "message": "execution reverted" }
            }),
        )
        .await;
        let chain = JsonRpcChain::new(Network::Mainnet, endpoint);
        assert_eq!(
            chain.get_owner(&addr(9)).await,
            Err(ChainError::Rpc {
                code: -32000,
                message: "execution reverted".to_string(),
            })
        );
    }

    #[tokio::test]
    async fn test_json_rpc_missing_result() {
        let endpoint = spawn_rpc(StatusCode::OK, json!({ "jsonrpc": "2.0", "id": 1 })).await;
        let chain = JsonRpcChain::new(Network::Testnet, endpoint);
        assert!(matches!(
            chain.get_owner(&addr(9)).await,
            Err(ChainError::InvalidResponse(_))
        ));
    }

    #[tokio::test]
    async fn test_ownerless_contract_has_no_admin() {
        let endpoint = spawn_rpc(
            StatusCode::OK,
            json!({ "jsonrpc": "2.0", "id": 1, "result": owner_word(&Address::ZERO) }),
        )
        .await;
        let chain = JsonRpcChain::new(Network::Testnet, endpoint);
        assert_eq!(chain.get_owner(&addr(9)).await, Ok(Address::ZERO));

        let authority = OwnerAuthority::new(Arc::new(chain));
        assert_eq!(authority.is_owner(&addr(9), &addr(1)).await, Ok(false));
        assert_eq!(authority.is_owner(&addr(9), &Address::ZERO).await, Ok(false));
    }

    #[test]
    fn test_decode_address_word() {
        let word = format!("0x{}{}", "00".repeat(12), "ab".repeat(20));
        assert_eq!(decode_address_word(&word).unwrap(), addr(0xab));

        assert!(decode_address_word("0x1234").is_err());
        let dirty = format!("0x{}{}", "01".repeat(12), "ab".repeat(20));
        assert!(decode_address_word(&dirty).is_err());
    }

    #[test]
    fn test_network_parse() {
        assert_eq!("Mainnet".parse::<Network>(), Ok(Network::Mainnet));
        assert_eq!("testnet".parse::<Network>(), Ok(Network::Testnet));
        assert!("devnet".parse::<Network>().is_err());
    }

    #[tokio::test]
    async fn test_is_owner() {
        let chain = StaticChain::new().with_owner(addr(9), addr(1));
        let authority = OwnerAuthority::new(Arc::new(chain));

        assert_eq!(authority.is_owner(&addr(9), &addr(1)).await, Ok(true));
        assert_eq!(authority.is_owner(&addr(9), &addr(2)).await, Ok(false));
        assert_eq!(
            authority.is_owner(&addr(7), &addr(1)).await,
            Err(ChainError::UnknownContract(addr(7)))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_chain_error_not_denial() {
        let authority =
            OwnerAuthority::new(Arc::new(SlowChain)).with_timeout(Duration::from_secs(5));
        assert_eq!(
            authority.is_owner(&addr(9), &addr(1)).await,
            Err(ChainError::Timeout(Duration::from_secs(5)))
        );
    }
}
