//! Node RPC client with timeout and failover.
//!
//! # Responsibilities
//! - Query chain state (head, blocks, account counters and keys)
//! - Inject signed operations
//! - Fail over to secondary nodes on network errors, timeouts and 5xx
//!
//! A 4xx answer is the node rejecting the request itself, so it is
//! returned at once instead of being replayed against the next node.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::config::BlockchainConfig;
use crate::error::{ConnectorError, ConnectorResult};
use crate::observability::metrics;
use crate::tezos::rpc::{Block, BlockHeader, BlockId, ContractInfo};
use crate::tezos::types::{Address, BlockHash, OpHash, PublicKey};

/// The node operations the connector depends on.
#[async_trait]
pub trait RpcClient: Send + Sync {
    async fn get_block_hash(&self, id: BlockId) -> ConnectorResult<BlockHash>;

    async fn get_head(&self) -> ConnectorResult<BlockHeader>;

    async fn get_block(&self, id: BlockId) -> ConnectorResult<Block>;

    async fn get_contract_info(&self, address: &Address) -> ConnectorResult<ContractInfo>;

    /// Inject a signed operation, returning its hash.
    async fn broadcast(&self, signed: &[u8]) -> ConnectorResult<OpHash>;
}

#[derive(Deserialize)]
struct RawContract {
    #[serde(default)]
    counter: Option<String>,
}

enum Attempt<T> {
    Done(ConnectorResult<T>),
    Failover(ConnectorError),
}

/// HTTP implementation of [`RpcClient`].
#[derive(Clone)]
pub struct TezosRpcClient {
    http: reqwest::Client,
    /// Primary first, then failovers.
    endpoints: Vec<String>,
    timeout_duration: Duration,
}

impl TezosRpcClient {
    pub fn new(config: &BlockchainConfig) -> ConnectorResult<Self> {
        let mut endpoints = Vec::with_capacity(1 + config.failover_urls.len());
        url::Url::parse(&config.rpc_url).map_err(|e| {
            ConnectorError::Config(format!("Invalid RPC URL '{}': {}", config.rpc_url, e))
        })?;
        endpoints.push(config.rpc_url.trim_end_matches('/').to_string());

        for url_str in &config.failover_urls {
            if url::Url::parse(url_str).is_ok() {
                endpoints.push(url_str.trim_end_matches('/').to_string());
            } else {
                tracing::warn!(url = %url_str, "Ignoring invalid failover RPC URL");
            }
        }

        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| ConnectorError::Config(format!("HTTP client: {}", e)))?;

        tracing::info!(
            rpc_url = %config.rpc_url,
            failovers = endpoints.len() - 1,
            network = %config.network,
            "Tezos RPC client initialized"
        );

        Ok(Self {
            http,
            endpoints,
            timeout_duration: Duration::from_secs(config.rpc_timeout_secs),
        })
    }

    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }

    async fn attempt<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Attempt<T> {
        let response = match tokio::time::timeout(self.timeout_duration, request.send()).await {
            Err(_) => {
                return Attempt::Failover(ConnectorError::Timeout(self.timeout_duration.as_secs()))
            }
            Ok(Err(e)) => return Attempt::Failover(ConnectorError::Rpc(e.to_string())),
            Ok(Ok(response)) => response,
        };

        let status = response.status();
        let body = match tokio::time::timeout(self.timeout_duration, response.text()).await {
            Err(_) => {
                return Attempt::Failover(ConnectorError::Timeout(self.timeout_duration.as_secs()))
            }
            Ok(Err(e)) => return Attempt::Failover(ConnectorError::Rpc(e.to_string())),
            Ok(Ok(body)) => body,
        };

        if status.is_server_error() {
            return Attempt::Failover(ConnectorError::Rpc(format!("{}: {}", status, body)));
        }
        if !status.is_success() {
            return Attempt::Done(Err(node_error(status, &body)));
        }

        Attempt::Done(
            serde_json::from_str(&body)
                .map_err(|e| ConnectorError::Rpc(format!("unexpected response: {}", e))),
        )
    }

    /// Run one RPC against each endpoint in order until one answers.
    async fn call<T, F>(&self, method: &'static str, build: F) -> ConnectorResult<T>
    where
        T: DeserializeOwned,
        F: Fn(&reqwest::Client, &str) -> reqwest::RequestBuilder,
    {
        let start = Instant::now();
        let mut last_error = ConnectorError::Rpc("no RPC endpoints configured".to_string());

        for (i, endpoint) in self.endpoints.iter().enumerate() {
            match self.attempt(build(&self.http, endpoint)).await {
                Attempt::Done(result) => {
                    metrics::record_rpc_call(method, result.is_ok(), start);
                    return result;
                }
                Attempt::Failover(e) => {
                    tracing::warn!(
                        provider_idx = i,
                        method = method,
                        error = %e,
                        "RPC error, trying next provider"
                    );
                    last_error = e;
                }
            }
        }

        metrics::record_rpc_call(method, false, start);
        Err(last_error)
    }

    async fn get<T: DeserializeOwned>(
        &self,
        method: &'static str,
        path: &str,
    ) -> ConnectorResult<T> {
        self.call(method, |http, endpoint| http.get(format!("{}{}", endpoint, path)))
            .await
    }
}

fn node_error(status: StatusCode, body: &str) -> ConnectorError {
    let body = body.trim();
    if body.is_empty() {
        ConnectorError::Rpc(format!("node returned {}", status))
    } else {
        ConnectorError::Rpc(format!("node returned {}: {}", status, body))
    }
}

#[async_trait]
impl RpcClient for TezosRpcClient {
    async fn get_block_hash(&self, id: BlockId) -> ConnectorResult<BlockHash> {
        self.get("get_block_hash", &format!("/chains/main/blocks/{}/hash", id))
            .await
    }

    async fn get_head(&self) -> ConnectorResult<BlockHeader> {
        self.get("get_head", "/chains/main/blocks/head/header").await
    }

    async fn get_block(&self, id: BlockId) -> ConnectorResult<Block> {
        self.get("get_block", &format!("/chains/main/blocks/{}", id))
            .await
    }

    async fn get_contract_info(&self, address: &Address) -> ConnectorResult<ContractInfo> {
        let path = format!("/chains/main/blocks/head/context/contracts/{}", address);
        let contract: RawContract = self.get("get_contract", &path).await?;
        let counter = match contract.counter {
            Some(counter) => counter
                .parse()
                .map_err(|_| ConnectorError::Rpc(format!("invalid counter '{}'", counter)))?,
            None => 0,
        };

        let manager_key: Option<PublicKey> = if address.is_implicit() {
            self.get("get_manager_key", &format!("{}/manager_key", path))
                .await?
        } else {
            None
        };

        Ok(ContractInfo {
            counter,
            manager_key,
        })
    }

    async fn broadcast(&self, signed: &[u8]) -> ConnectorResult<OpHash> {
        let payload = hex::encode(signed);
        self.call("broadcast", |http, endpoint| {
            http.post(format!("{}/injection/operation", endpoint))
                .json(&payload)
        })
        .await
    }
}

impl std::fmt::Debug for TezosRpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TezosRpcClient")
            .field("endpoints", &self.endpoints)
            .field("timeout_secs", &self.timeout_duration.as_secs())
            .finish()
    }
}
