//! Node RPC client over real HTTP.

mod common;

use common::{start_programmable_backend, OP_HASH, PUBLIC_KEY, SOURCE};
use tezos_connector::config::BlockchainConfig;
use tezos_connector::error::ConnectorError;
use tezos_connector::tezos::client::{RpcClient, TezosRpcClient};
use tezos_connector::tezos::rpc::BlockId;

const HEAD: &str = r#"{
    "hash": "BMBeYrMJpLWrqCs7UTcFaUQCeWBqsjCLejX5D8zE8m9syHqHnZg",
    "level": 5000000,
    "predecessor": "BMBeYrMJpLWrqCs7UTcFaUQCeWBqsjCLejX5D8zE8m9syHqHnZg",
    "timestamp": "2024-05-01T12:00:00Z"
}"#;

fn client(primary: String, failovers: Vec<String>) -> TezosRpcClient {
    TezosRpcClient::new(&BlockchainConfig {
        rpc_url: primary,
        failover_urls: failovers,
        rpc_timeout_secs: 2,
        ..Default::default()
    })
    .unwrap()
}

#[tokio::test]
async fn test_fails_over_on_server_error() {
    let (bad, bad_seen) = start_programmable_backend(|_| (503, "overloaded".to_string())).await;
    let (good, good_seen) = start_programmable_backend(|_| (200, HEAD.to_string())).await;

    let rpc = client(format!("http://{}", bad), vec![format!("http://{}", good)]);
    let head = rpc.get_head().await.unwrap();
    assert_eq!(head.level, 5_000_000);

    assert_eq!(bad_seen.lock().unwrap().len(), 1);
    let good_seen = good_seen.lock().unwrap();
    assert_eq!(good_seen[0].method, "GET");
    assert_eq!(good_seen[0].path, "/chains/main/blocks/head/header");
}

#[tokio::test]
async fn test_client_error_does_not_fail_over() {
    let (primary, _) = start_programmable_backend(|_| (404, "No service found".to_string())).await;
    let (backup, backup_seen) = start_programmable_backend(|_| (200, HEAD.to_string())).await;

    let rpc = client(format!("http://{}", primary), vec![format!("http://{}", backup)]);
    let err = rpc.get_block(BlockId::Level(7)).await.unwrap_err();
    assert!(matches!(err, ConnectorError::Rpc(ref msg) if msg.contains("No service found")));
    assert!(backup_seen.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_all_endpoints_down() {
    let (a, _) = start_programmable_backend(|_| (500, String::new())).await;
    let (b, _) = start_programmable_backend(|_| (502, String::new())).await;

    let rpc = client(format!("http://{}", a), vec![format!("http://{}", b)]);
    let err = rpc.get_block_hash(BlockId::Head).await.unwrap_err();
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_contract_info() {
    let (addr, seen) = start_programmable_backend(|request| {
        if request.path.ends_with("/manager_key") {
            (200, format!("\"{}\"", PUBLIC_KEY))
        } else {
            (200, r#"{"balance": "1000", "counter": "41"}"#.to_string())
        }
    })
    .await;

    let rpc = client(format!("http://{}", addr), vec![]);
    let info = rpc.get_contract_info(&SOURCE.parse().unwrap()).await.unwrap();
    assert_eq!(info.counter, 41);
    assert!(info.is_revealed());

    let paths: Vec<_> = seen.lock().unwrap().iter().map(|r| r.path.clone()).collect();
    assert_eq!(
        paths,
        vec![
            format!("/chains/main/blocks/head/context/contracts/{}", SOURCE),
            format!("/chains/main/blocks/head/context/contracts/{}/manager_key", SOURCE),
        ]
    );
}

#[tokio::test]
async fn test_unrevealed_manager_key() {
    let (addr, _) = start_programmable_backend(|request| {
        if request.path.ends_with("/manager_key") {
            (200, "null".to_string())
        } else {
            (200, r#"{"counter": "0"}"#.to_string())
        }
    })
    .await;

    let rpc = client(format!("http://{}", addr), vec![]);
    let info = rpc.get_contract_info(&SOURCE.parse().unwrap()).await.unwrap();
    assert_eq!(info.counter, 0);
    assert!(!info.is_revealed());
}

#[tokio::test]
async fn test_broadcast_posts_hex() {
    let (addr, seen) = start_programmable_backend(|_| (200, format!("\"{}\"", OP_HASH))).await;

    let rpc = client(format!("http://{}", addr), vec![]);
    let hash = rpc.broadcast(&[0xde, 0xad, 0xbe, 0xef]).await.unwrap();
    assert_eq!(hash.to_string(), OP_HASH);

    let seen = seen.lock().unwrap();
    assert_eq!(seen[0].method, "POST");
    assert_eq!(seen[0].path, "/injection/operation");
    assert_eq!(seen[0].body, "\"deadbeef\"");
}
