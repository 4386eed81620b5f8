use std::time::Duration;

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{
    SettlementBackend, SettlementReceipt, SettlementStatus, SettlementTransfer, TRANSFER_SELECTOR,
    TokenTransfer, felt_to_u128, normalize_felt,
};
use crate::error::IntegrationError;

const TXN_HASH_NOT_FOUND: i64 = 29;

/// Reads receipts from a Starknet JSON-RPC node and submits outbound
/// transfers through a relayer that holds the treasury account keys.
#[derive(Clone)]
pub struct StarknetRpcClient {
    http: Client,
    rpc_url: String,
    relayer_url: String,
    deposit_address: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RelayTransferRequest<'a> {
    reference: &'a str,
    token_address: &'a str,
    recipient: &'a str,
    amount: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RelayTransferResponse {
    transaction_hash: String,
}

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
pub struct ReceiptBody {
    pub finality_status: String,
    #[serde(default)]
    pub execution_status: Option<String>,
    #[serde(default)]
    pub revert_reason: Option<String>,
    #[serde(default)]
    pub events: Vec<EventBody>,
}

#[derive(Debug, Deserialize)]
pub struct EventBody {
    pub from_address: String,
    #[serde(default)]
    pub keys: Vec<String>,
    #[serde(default)]
    pub data: Vec<String>,
}

impl StarknetRpcClient {
    pub fn new(
        rpc_url: String,
        relayer_url: String,
        deposit_address: String,
        request_timeout: Duration,
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(request_timeout)
            .build()
            .context("build http client")?;
        Ok(Self {
            http,
            rpc_url,
            relayer_url: relayer_url.trim_end_matches('/').to_string(),
            deposit_address,
        })
    }
}

fn classify(context: &str, err: reqwest::Error) -> IntegrationError {
    if let Some(status) = err.status()
        && status.is_client_error()
    {
        return IntegrationError::Permanent(format!("{context}: {err}"));
    }
    IntegrationError::Transient(format!("{context}: {err}"))
}

fn classify_status(context: &str, status: StatusCode, body: &str) -> IntegrationError {
    if status.is_client_error() {
        IntegrationError::Permanent(format!("{context}: status={status} body={body}"))
    } else {
        IntegrationError::Transient(format!("{context}: status={status} body={body}"))
    }
}

/// Maps a `starknet_getTransactionReceipt` result into a settlement receipt.
pub fn decode_receipt(body: ReceiptBody) -> SettlementReceipt {
    if body.execution_status.as_deref() == Some("REVERTED") {
        return SettlementReceipt {
            status: SettlementStatus::Reverted(
                body.revert_reason
                    .unwrap_or_else(|| "transaction reverted".to_string()),
            ),
            transfers: Vec::new(),
        };
    }

    let status = match body.finality_status.as_str() {
        "ACCEPTED_ON_L2" | "ACCEPTED_ON_L1" => SettlementStatus::Finalized,
        "REJECTED" => SettlementStatus::Reverted("transaction rejected".to_string()),
        _ => SettlementStatus::Pending,
    };

    let selector = normalize_felt(TRANSFER_SELECTOR);
    let transfers = body
        .events
        .iter()
        .filter(|e| e.keys.first().map(|k| normalize_felt(k)) == Some(selector.clone()))
        .filter_map(|e| {
            // Cairo 1 tokens index from/to as keys; legacy tokens put everything in data.
            let (from, to, low, high) = if e.keys.len() >= 3 {
                (&e.keys[1], &e.keys[2], e.data.first()?, e.data.get(1))
            } else {
                (e.data.first()?, e.data.get(1)?, e.data.get(2)?, e.data.get(3))
            };
            if let Some(high) = high
                && felt_to_u128(high) != Some(0)
            {
                return None;
            }
            Some(TokenTransfer {
                token_address: e.from_address.clone(),
                from: from.clone(),
                to: to.clone(),
                amount: felt_to_u128(low)?,
            })
        })
        .collect();

    SettlementReceipt { status, transfers }
}

#[async_trait]
impl SettlementBackend for StarknetRpcClient {
    fn deposit_address(&self) -> &str {
        &self.deposit_address
    }

    async fn submit_transfer(
        &self,
        transfer: &SettlementTransfer,
    ) -> Result<String, IntegrationError> {
        let url = format!("{}/transfers", self.relayer_url);
        let response = self
            .http
            .post(&url)
            .json(&RelayTransferRequest {
                reference: &transfer.reference,
                token_address: &transfer.token_address,
                recipient: &transfer.recipient,
                amount: transfer.amount.to_string(),
            })
            .send()
            .await
            .map_err(|e| classify("relay transfer", e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status("relay transfer", status, &body));
        }

        let body: RelayTransferResponse = response
            .json()
            .await
            .map_err(|e| IntegrationError::Permanent(format!("decode relay response: {e}")))?;
        Ok(body.transaction_hash)
    }

    async fn transaction_receipt(
        &self,
        tx_hash: &str,
    ) -> Result<SettlementReceipt, IntegrationError> {
        let response = self
            .http
            .post(&self.rpc_url)
            .json(&json!({
                "jsonrpc": "2.0",
                "id": 1,
                "method": "starknet_getTransactionReceipt",
                "params": { "transaction_hash": tx_hash },
            }))
            .send()
            .await
            .map_err(|e| classify("starknet_getTransactionReceipt", e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status("starknet_getTransactionReceipt", status, &body));
        }

        let body: RpcResponse<ReceiptBody> = response
            .json()
            .await
            .map_err(|e| IntegrationError::Transient(format!("decode receipt: {e}")))?;

        match (body.result, body.error) {
            (Some(receipt), _) => Ok(decode_receipt(receipt)),
            (None, Some(err)) if err.code == TXN_HASH_NOT_FOUND => Ok(SettlementReceipt::pending()),
            (None, Some(err)) => Err(IntegrationError::Transient(format!(
                "starknet rpc error {}: {}",
                err.code, err.message
            ))),
            (None, None) => Err(IntegrationError::Transient(
                "starknet rpc returned neither result nor error".to_string(),
            )),
        }
    }
}
