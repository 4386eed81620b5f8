use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context as _, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{Value, json};

use ln_starknet_swap::error::IntegrationError;
use ln_starknet_swap::starknet::rpc::{ReceiptBody, StarknetRpcClient, decode_receipt};
use ln_starknet_swap::starknet::{
    SettlementBackend, SettlementStatus, SettlementTransfer, TRANSFER_SELECTOR, felt_to_u128,
    is_valid_address, normalize_felt,
};

const TOKEN: &str = "0x03fe2b97c1fd336e750087d68b9b867997fd64a2661ff3ca5a7c771641e8e7ac";
const SENDER: &str = "0x0111";
const DEPOSIT: &str = "0x0222";

fn receipt(value: Value) -> Result<ReceiptBody> {
    serde_json::from_value(value).context("decode receipt body")
}

#[test]
fn felt_helpers_normalize_hex() {
    assert_eq!(normalize_felt("0x000ABC"), "0xabc");
    assert_eq!(normalize_felt("0X0"), "0x0");
    assert_eq!(normalize_felt(""), "0x0");
    assert_eq!(felt_to_u128("0x2710"), Some(10_000));
    assert_eq!(felt_to_u128("0xzz"), None);

    assert!(is_valid_address("0x1"));
    assert!(is_valid_address(TOKEN));
    assert!(!is_valid_address("1234"));
    assert!(!is_valid_address("0x"));
    assert!(!is_valid_address("0xgg"));
    assert!(!is_valid_address(&format!("0x{}", "1".repeat(65))));
}

#[test]
fn decodes_cairo1_transfer_events() -> Result<()> {
    let decoded = decode_receipt(receipt(json!({
        "finality_status": "ACCEPTED_ON_L2",
        "execution_status": "SUCCEEDED",
        "events": [
            {
                "from_address": TOKEN,
                "keys": [TRANSFER_SELECTOR, SENDER, DEPOSIT],
                "data": ["0x4e20", "0x0"],
            },
            {
                "from_address": TOKEN,
                "keys": ["0x1234"],
                "data": [SENDER, DEPOSIT, "0x1", "0x0"],
            },
        ],
    }))?);

    assert_eq!(decoded.status, SettlementStatus::Finalized);
    assert_eq!(decoded.transfers.len(), 1);
    assert_eq!(decoded.amount_received(TOKEN, DEPOSIT), 20_000);
    assert_eq!(decoded.amount_received(TOKEN, "0x222"), 20_000);
    assert_eq!(decoded.amount_received(TOKEN, SENDER), 0);
    assert_eq!(decoded.amount_received("0x999", DEPOSIT), 0);
    Ok(())
}

#[test]
fn transfers_are_attributed_to_their_sender() -> Result<()> {
    let decoded = decode_receipt(receipt(json!({
        "finality_status": "ACCEPTED_ON_L2",
        "execution_status": "SUCCEEDED",
        "events": [
            {
                "from_address": TOKEN,
                "keys": [TRANSFER_SELECTOR, SENDER, DEPOSIT],
                "data": ["0x2710", "0x0"],
            },
            {
                "from_address": TOKEN,
                "keys": [TRANSFER_SELECTOR, "0x0999", DEPOSIT],
                "data": ["0x1388", "0x0"],
            },
        ],
    }))?);

    assert_eq!(decoded.amount_received(TOKEN, DEPOSIT), 15_000);
    assert_eq!(decoded.amount_received_from(TOKEN, SENDER, DEPOSIT), 10_000);
    assert_eq!(decoded.amount_received_from(TOKEN, "0x111", DEPOSIT), 10_000);
    assert_eq!(decoded.amount_received_from(TOKEN, "0x999", DEPOSIT), 5_000);
    assert_eq!(decoded.amount_received_from(TOKEN, DEPOSIT, DEPOSIT), 0);
    assert!(decoded.sent_by("0x00111"));
    assert!(!decoded.sent_by("0x0333"));
    Ok(())
}

#[test]
fn decodes_legacy_transfer_events_and_skips_huge_amounts() -> Result<()> {
    let decoded = decode_receipt(receipt(json!({
        "finality_status": "ACCEPTED_ON_L1",
        "events": [
            {
                "from_address": TOKEN,
                "keys": [TRANSFER_SELECTOR],
                "data": [SENDER, DEPOSIT, "0x2710", "0x0"],
            },
            {
                "from_address": TOKEN,
                "keys": [TRANSFER_SELECTOR],
                "data": [SENDER, DEPOSIT, "0x5", "0x1"],
            },
            {
                "from_address": TOKEN,
                "keys": [TRANSFER_SELECTOR, SENDER, DEPOSIT],
                "data": ["0x2710", "0x0"],
            },
        ],
    }))?);

    assert_eq!(decoded.status, SettlementStatus::Finalized);
    assert_eq!(decoded.transfers.len(), 2);
    assert_eq!(decoded.amount_received(TOKEN, DEPOSIT), 20_000);
    Ok(())
}

#[test]
fn reverted_and_unfinalized_receipts() -> Result<()> {
    let reverted = decode_receipt(receipt(json!({
        "finality_status": "ACCEPTED_ON_L2",
        "execution_status": "REVERTED",
        "revert_reason": "u256_sub Overflow",
        "events": [{
            "from_address": TOKEN,
            "keys": [TRANSFER_SELECTOR, SENDER, DEPOSIT],
            "data": ["0x4e20", "0x0"],
        }],
    }))?);
    assert_eq!(
        reverted.status,
        SettlementStatus::Reverted("u256_sub Overflow".to_string())
    );
    assert!(reverted.transfers.is_empty());

    let received = decode_receipt(receipt(json!({ "finality_status": "RECEIVED" }))?);
    assert_eq!(received.status, SettlementStatus::Pending);

    let rejected = decode_receipt(receipt(json!({ "finality_status": "REJECTED" }))?);
    assert!(matches!(rejected.status, SettlementStatus::Reverted(_)));
    Ok(())
}

#[derive(Clone, Default)]
struct MockNode {
    requests: Arc<Mutex<Vec<Value>>>,
}

async fn rpc_handler(State(node): State<MockNode>, Json(body): Json<Value>) -> Response {
    node.requests
        .lock()
        .expect("requests poisoned")
        .push(body.clone());
    let tx_hash = body["params"]["transaction_hash"].as_str().unwrap_or_default();
    match tx_hash {
        "0xunknown" => Json(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "error": { "code": 29, "message": "Transaction hash not found" },
        }))
        .into_response(),
        "0xbroken" => Json(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "error": { "code": -32603, "message": "Internal error" },
        }))
        .into_response(),
        "0xunavailable" => (StatusCode::SERVICE_UNAVAILABLE, "node syncing").into_response(),
        _ => Json(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": {
                "finality_status": "ACCEPTED_ON_L2",
                "execution_status": "SUCCEEDED",
                "events": [{
                    "from_address": TOKEN,
                    "keys": [TRANSFER_SELECTOR, SENDER, DEPOSIT],
                    "data": ["0x4e20", "0x0"],
                }],
            },
        }))
        .into_response(),
    }
}

async fn transfer_handler(State(node): State<MockNode>, Json(body): Json<Value>) -> Response {
    node.requests
        .lock()
        .expect("requests poisoned")
        .push(body.clone());
    match body["reference"].as_str().unwrap_or_default() {
        "rejected" => (StatusCode::UNPROCESSABLE_ENTITY, "insufficient balance").into_response(),
        "flaky" => (StatusCode::BAD_GATEWAY, "upstream down").into_response(),
        _ => Json(json!({ "transactionHash": "0x0abc" })).into_response(),
    }
}

async fn start_mock() -> Result<(StarknetRpcClient, MockNode)> {
    let node = MockNode::default();
    let app = Router::new()
        .route("/rpc", post(rpc_handler))
        .route("/relayer/transfers", post(transfer_handler))
        .with_state(node.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    let client = StarknetRpcClient::new(
        format!("http://{addr}/rpc"),
        format!("http://{addr}/relayer/"),
        DEPOSIT.to_string(),
        Duration::from_secs(5),
    )?;
    Ok((client, node))
}

#[tokio::test]
async fn rpc_client_reads_receipts() -> Result<()> {
    let (client, node) = start_mock().await?;
    assert_eq!(client.deposit_address(), DEPOSIT);

    let found = client.transaction_receipt("0x0abc").await?;
    assert_eq!(found.status, SettlementStatus::Finalized);
    assert_eq!(found.amount_received(TOKEN, DEPOSIT), 20_000);

    let unknown = client.transaction_receipt("0xunknown").await?;
    assert_eq!(unknown.status, SettlementStatus::Pending);

    let err = client.transaction_receipt("0xbroken").await.unwrap_err();
    assert!(err.is_transient());
    let err = client.transaction_receipt("0xunavailable").await.unwrap_err();
    assert!(err.is_transient());

    let requests = node.requests.lock().expect("requests poisoned").clone();
    assert_eq!(requests[0]["method"], "starknet_getTransactionReceipt");
    assert_eq!(requests[0]["params"]["transaction_hash"], "0x0abc");
    Ok(())
}

#[tokio::test]
async fn relayer_transfers_classify_failures() -> Result<()> {
    let (client, node) = start_mock().await?;
    let transfer = |reference: &str| SettlementTransfer {
        reference: reference.to_string(),
        token_address: TOKEN.to_string(),
        recipient: "0x0333".to_string(),
        amount: 9_604,
    };

    let tx_hash = client.submit_transfer(&transfer("swap-1")).await?;
    assert_eq!(tx_hash, "0x0abc");

    let err = client.submit_transfer(&transfer("rejected")).await.unwrap_err();
    assert!(matches!(err, IntegrationError::Permanent(ref msg) if msg.contains("insufficient balance")));

    let err = client.submit_transfer(&transfer("flaky")).await.unwrap_err();
    assert!(err.is_transient());

    let requests = node.requests.lock().expect("requests poisoned").clone();
    assert_eq!(
        requests[0],
        json!({
            "reference": "swap-1",
            "tokenAddress": TOKEN,
            "recipient": "0x0333",
            "amount": "9604",
        })
    );
    Ok(())
}
