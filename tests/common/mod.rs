//! Shared utilities for integration testing.
#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::DateTime;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use tezos_connector::config::ConnectorConfig;
use tezos_connector::error::{ConnectorError, ConnectorResult};
use tezos_connector::signer::Signer;
use tezos_connector::tezos::client::RpcClient;
use tezos_connector::tezos::rpc::{
    Block, BlockHeader, BlockId, BlockOperation, ContractInfo, ShellHeader,
};
use tezos_connector::tezos::types::{Address, BlockHash, OpHash, PublicKey, Signature};

pub const SOURCE: &str = "tz1Y6GnVhC4EpcDDSmD3ibcC4WX6DJ4Q1QLN";
pub const CONTRACT: &str = "KT1D254HTPKq5GZNVcF73XBinG9BLybHqu8s";
pub const PUBLIC_KEY: &str = "edpkv89Jj4aVWetK69CWm5ss1LayvK8dQoiFz7p995y1k3E8CZwqJ6";
pub const SIGNATURE: &str = "sigWetzF5zVM2qdYt8QToj7e5cNBm9neiPRc3rpePBDrr8N1brFbErv2YfXMSoSgemJ8AwZcLfmkBDg78bmUEzF1sf1YotnS";
pub const OP_HASH: &str = "oovD5cUigLGLT6kGDqsLMyF2sc3MLyfYhJWRymCPxUKEx3vtQ5v";

/// Forged call to `CONTRACT%pause` from `SOURCE` with counter 11.
pub const FORGED_CALL: &str = "424d426559724d4a704c577271437337555463466155514365574271736a434c6c00889816a17ae688c971be1ad34bfe1990f8fa5e0f000b0000000130a980e6e41028da2cacfca4ddefea252d18bed900ffff05706175736500000002030a";

/// Connector settings tuned for fast tests.
pub fn test_config() -> ConnectorConfig {
    let mut config = ConnectorConfig::default();
    config.events.filter_polling_interval_ms = 10;
    config.events.finality_depth = 5;
    config.retry.initial_delay_ms = 5;
    config.retry.max_delay_ms = 20;
    config
}

/// Deterministic hash for the block at `level` on branch `fork`.
pub fn block_hash(fork: u8, level: u64) -> BlockHash {
    let mut bytes = [0u8; 32];
    bytes[0] = fork;
    bytes[1..9].copy_from_slice(&level.to_be_bytes());
    BlockHash::from_bytes(bytes)
}

/// An operation calling `CONTRACT` with the given entrypoint.
pub fn contract_call(hash: &str, entrypoint: &str) -> BlockOperation {
    serde_json::from_value(serde_json::json!({
        "hash": hash,
        "contents": [{
            "kind": "transaction",
            "source": SOURCE,
            "destination": CONTRACT,
            "amount": "0",
            "parameters": {"entrypoint": entrypoint, "value": {"prim": "Unit"}},
            "metadata": {"operation_result": {"status": "applied"}}
        }]
    }))
    .unwrap()
}

#[derive(Default)]
pub struct CallCounts {
    pub get_head: AtomicUsize,
    pub get_block: AtomicUsize,
    pub get_block_hash: AtomicUsize,
    pub contract_info: AtomicUsize,
    pub broadcast: AtomicUsize,
}

/// Scripted chain served through [`RpcClient`].
pub struct MockRpc {
    /// Canonical chain, index = level.
    chain: Mutex<Vec<Block>>,
    operations: Mutex<HashMap<u64, Vec<BlockOperation>>>,
    contract: Mutex<ContractInfo>,
    contract_error: Mutex<Option<String>>,
    broadcast_error: Mutex<Option<String>>,
    block_hash_error: Mutex<Option<String>>,
    head_failures: AtomicUsize,
    pub broadcasts: Mutex<Vec<Vec<u8>>>,
    pub calls: CallCounts,
}

impl MockRpc {
    /// Chain with levels `0..=head` on fork 0.
    pub fn with_head(head: u64) -> Arc<Self> {
        let rpc = Self {
            chain: Mutex::new(Vec::new()),
            operations: Mutex::new(HashMap::new()),
            contract: Mutex::new(ContractInfo {
                counter: 10,
                manager_key: Some(PUBLIC_KEY.parse().unwrap()),
            }),
            contract_error: Mutex::new(None),
            broadcast_error: Mutex::new(None),
            block_hash_error: Mutex::new(None),
            head_failures: AtomicUsize::new(0),
            broadcasts: Mutex::new(Vec::new()),
            calls: CallCounts::default(),
        };
        rpc.extend_to(head, 0);
        Arc::new(rpc)
    }

    fn make_block(&self, level: u64, fork: u8, predecessor: BlockHash) -> Block {
        let operations = self
            .operations
            .lock()
            .unwrap()
            .get(&level)
            .cloned()
            .unwrap_or_default();
        Block {
            hash: block_hash(fork, level),
            header: ShellHeader {
                level,
                predecessor,
                timestamp: DateTime::from_timestamp(1_700_000_000 + level as i64, 0).unwrap(),
            },
            operations: vec![vec![], vec![], vec![], operations],
        }
    }

    /// Append blocks on `fork` until the head is at `head`.
    pub fn extend_to(&self, head: u64, fork: u8) {
        let mut chain = self.chain.lock().unwrap();
        self.grow(&mut chain, head, fork);
    }

    /// Replace every block from `level` through the current head with
    /// blocks on `fork`, then extend to `new_head`.
    pub fn reorg_from(&self, level: u64, fork: u8, new_head: u64) {
        let mut chain = self.chain.lock().unwrap();
        chain.truncate(level as usize);
        self.grow(&mut chain, new_head, fork);
    }

    fn grow(&self, chain: &mut Vec<Block>, head: u64, fork: u8) {
        while chain.len() as u64 <= head {
            let level = chain.len() as u64;
            let predecessor = chain
                .last()
                .map(|b| b.hash.clone())
                .unwrap_or_else(|| block_hash(0xff, 0));
            chain.push(self.make_block(level, fork, predecessor));
        }
    }

    /// Operations to include in the block at `level` when it is built.
    pub fn set_operations(&self, level: u64, operations: Vec<BlockOperation>) {
        self.operations.lock().unwrap().insert(level, operations);
    }

    pub fn hash_at(&self, level: u64) -> BlockHash {
        self.chain.lock().unwrap()[level as usize].hash.clone()
    }

    pub fn set_contract(&self, info: ContractInfo) {
        *self.contract.lock().unwrap() = info;
    }

    pub fn fail_contract_info(&self, message: &str) {
        *self.contract_error.lock().unwrap() = Some(message.to_string());
    }

    pub fn fail_broadcast(&self, message: &str) {
        *self.broadcast_error.lock().unwrap() = Some(message.to_string());
    }

    pub fn fail_block_hash(&self, message: &str) {
        *self.block_hash_error.lock().unwrap() = Some(message.to_string());
    }

    /// Make the next `count` head requests fail with a node error.
    pub fn fail_heads(&self, count: usize) {
        self.head_failures.store(count, Ordering::SeqCst);
    }

    fn find(&self, id: &BlockId) -> ConnectorResult<Block> {
        let chain = self.chain.lock().unwrap();
        let found = match id {
            BlockId::Head => chain.last(),
            BlockId::Level(level) => chain.get(*level as usize),
            BlockId::Hash(hash) => chain.iter().find(|b| &b.hash == hash),
        };
        found
            .cloned()
            .ok_or_else(|| ConnectorError::Rpc(format!("unknown block {}", id)))
    }
}

#[async_trait]
impl RpcClient for MockRpc {
    async fn get_block_hash(&self, id: BlockId) -> ConnectorResult<BlockHash> {
        self.calls.get_block_hash.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = self.block_hash_error.lock().unwrap().clone() {
            return Err(ConnectorError::Rpc(message));
        }
        Ok(self.find(&id)?.hash)
    }

    async fn get_head(&self) -> ConnectorResult<BlockHeader> {
        self.calls.get_head.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .head_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(ConnectorError::Rpc("node unavailable".to_string()));
        }
        Ok(self.find(&BlockId::Head)?.to_header())
    }

    async fn get_block(&self, id: BlockId) -> ConnectorResult<Block> {
        self.calls.get_block.fetch_add(1, Ordering::SeqCst);
        self.find(&id)
    }

    async fn get_contract_info(&self, _address: &Address) -> ConnectorResult<ContractInfo> {
        self.calls.contract_info.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = self.contract_error.lock().unwrap().clone() {
            return Err(ConnectorError::Rpc(message));
        }
        Ok(self.contract.lock().unwrap().clone())
    }

    async fn broadcast(&self, signed: &[u8]) -> ConnectorResult<OpHash> {
        self.calls.broadcast.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = self.broadcast_error.lock().unwrap().clone() {
            return Err(ConnectorError::Rpc(message));
        }
        self.broadcasts.lock().unwrap().push(signed.to_vec());
        Ok(OP_HASH.parse().unwrap())
    }
}

/// Signer answering with fixed values and recording what it was asked to sign.
#[derive(Default)]
pub struct StaticSigner {
    pub payloads: Mutex<Vec<Vec<u8>>>,
    pub key_requests: AtomicUsize,
}

#[async_trait]
impl Signer for StaticSigner {
    async fn sign(&self, _source: &Address, payload: &[u8]) -> ConnectorResult<Signature> {
        self.payloads.lock().unwrap().push(payload.to_vec());
        Ok(SIGNATURE.parse().unwrap())
    }

    async fn public_key(&self, _source: &Address) -> ConnectorResult<PublicKey> {
        self.key_requests.fetch_add(1, Ordering::SeqCst);
        Ok(PUBLIC_KEY.parse().unwrap())
    }
}

/// A request received by [`start_programmable_backend`].
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub body: String,
}

/// Start an HTTP backend on an ephemeral port. `f` maps each request to a
/// status and body. Returns the bound address and every request seen.
pub async fn start_programmable_backend<F>(f: F) -> (SocketAddr, Arc<Mutex<Vec<RecordedRequest>>>)
where
    F: Fn(&RecordedRequest) -> (u16, String) + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let f = Arc::new(f);

    let recorded = seen.clone();
    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            let f = f.clone();
            let recorded = recorded.clone();
            tokio::spawn(async move {
                let Some(request) = read_request(&mut socket).await else {
                    return;
                };
                let (status, body) = f(&request);
                recorded.lock().unwrap().push(request);

                let status_text = match status {
                    200 => "200 OK",
                    400 => "400 Bad Request",
                    404 => "404 Not Found",
                    500 => "500 Internal Server Error",
                    502 => "502 Bad Gateway",
                    503 => "503 Service Unavailable",
                    _ => "200 OK",
                };
                let response = format!(
                    "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status_text,
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    (addr, seen)
}

async fn read_request(socket: &mut tokio::net::TcpStream) -> Option<RecordedRequest> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let header_end = loop {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let mut lines = head.lines();
    let mut request_line = lines.next()?.split_whitespace();
    let method = request_line.next()?.to_string();
    let path = request_line.next()?.to_string();
    let content_length = lines
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(0);

    while buf.len() < header_end + content_length {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    let body = String::from_utf8_lossy(&buf[header_end..]).to_string();

    Some(RecordedRequest { method, path, body })
}

/// Wait until `condition` holds, polling every few milliseconds.
pub async fn eventually<F: Fn() -> bool>(condition: F, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
