//! On-chain confirmation of `mint_success` transactions.
//!
//! The verifier fails open: if the chain cannot be asked (timeout, RPC
//! error, receipt not yet indexed) the event is accepted and the gap is
//! logged. Only a receipt that positively contradicts the claim rejects it.

use anyhow::{bail, Context, Result};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::future::Future;
use std::time::Duration;

/// `Transfer(address,address,uint256)`; recipient in topic 2.
pub const ERC721_TRANSFER_TOPIC: &str =
    "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef";
/// `TransferSingle(address,address,address,uint256,uint256)`; recipient in topic 3.
pub const ERC1155_TRANSFER_SINGLE_TOPIC: &str =
    "0xc3d58168c5ae7397731d063d5bbf3d657854427343f4c083240f7aacaa2d0f62";
/// `TransferBatch(address,address,address,uint256[],uint256[])`; recipient in topic 3.
pub const ERC1155_TRANSFER_BATCH_TOPIC: &str =
    "0x4a39dc06d4c0dbc64b70af90fd698a233a518aa5d07e595d983b8c0521dbcdb1";

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TxLog {
    #[serde(default)]
    pub topics: Vec<String>,
}

/// The parts of a transaction receipt the verifier looks at.
#[derive(Debug, Clone, PartialEq)]
pub struct TxOutcome {
    pub success: bool,
    pub from: String,
    pub logs: Vec<TxLog>,
}

pub trait ChainClient: Send + Sync + 'static {
    /// `Ok(None)` when the node has no receipt for `tx_hash` (yet).
    fn transaction_outcome(
        &self,
        tx_hash: &str,
    ) -> impl Future<Output = Result<Option<TxOutcome>>> + Send;
}

#[derive(Debug, Deserialize)]
struct RpcReceipt {
    status: Option<String>,
    #[serde(default)]
    from: String,
    #[serde(default)]
    logs: Vec<TxLog>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: Option<RpcReceipt>,
    error: Option<RpcError>,
}

/// JSON-RPC client for `eth_getTransactionReceipt`.
#[derive(Clone)]
pub struct RpcChainClient {
    client: Client,
    rpc_url: String,
}

impl RpcChainClient {
    pub fn new(rpc_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent("mintpulse-ingest/chain")
            .build()
            .context("failed to build chain RPC client")?;
        Ok(Self {
            client,
            rpc_url: rpc_url.to_string(),
        })
    }
}

impl ChainClient for RpcChainClient {
    async fn transaction_outcome(&self, tx_hash: &str) -> Result<Option<TxOutcome>> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "eth_getTransactionReceipt",
            "params": [tx_hash],
        });

        let response = self
            .client
            .post(&self.rpc_url)
            .json(&body)
            .send()
            .await
            .context("receipt request failed")?;
        if !response.status().is_success() {
            bail!("receipt request returned HTTP {}", response.status());
        }

        let parsed: RpcResponse = response
            .json()
            .await
            .context("invalid JSON-RPC response")?;
        if let Some(err) = parsed.error {
            bail!("rpc error {}: {}", err.code, err.message);
        }

        Ok(parsed.result.map(|receipt| TxOutcome {
            success: receipt.status.as_deref() == Some("0x1"),
            from: receipt.from.to_lowercase(),
            logs: receipt.logs,
        }))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Verification {
    Valid,
    /// Could not check; accepted anyway.
    FailOpen(&'static str),
    /// Receipt contradicts the event.
    Invalid(String),
}

impl Verification {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Valid => "valid",
            Self::FailOpen(_) => "fail_open",
            Self::Invalid(_) => "invalid",
        }
    }
}

/// 32-byte topic encoding of an address.
fn address_topic(wallet: &str) -> String {
    let bare = wallet.trim_start_matches("0x").to_lowercase();
    format!("0x{bare:0>64}")
}

/// Whether any transfer log in the receipt credits `wallet`.
pub fn receipt_names_recipient(logs: &[TxLog], wallet: &str) -> bool {
    let expected = address_topic(wallet);
    logs.iter().any(|log| {
        let Some(signature) = log.topics.first() else {
            return false;
        };
        let recipient_index = match signature.to_lowercase().as_str() {
            ERC721_TRANSFER_TOPIC => 2,
            ERC1155_TRANSFER_SINGLE_TOPIC | ERC1155_TRANSFER_BATCH_TOPIC => 3,
            _ => return false,
        };
        log.topics
            .get(recipient_index)
            .is_some_and(|topic| topic.eq_ignore_ascii_case(&expected))
    })
}

/// Judge a fetched receipt against the wallet that reported the mint.
pub fn check_outcome(outcome: &TxOutcome, wallet: &str) -> Verification {
    if !outcome.success {
        return Verification::Invalid("transaction reverted".to_string());
    }
    if !outcome.from.eq_ignore_ascii_case(wallet) {
        return Verification::Invalid("sender does not match wallet".to_string());
    }
    if !receipt_names_recipient(&outcome.logs, wallet) {
        return Verification::Invalid("no token transfer to wallet".to_string());
    }
    Verification::Valid
}

pub struct ChainVerifier<C> {
    client: Option<C>,
    timeout: Duration,
}

impl<C: ChainClient> ChainVerifier<C> {
    /// `client: None` disables verification; every mint then fails open.
    pub fn new(client: Option<C>, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    pub async fn verify(&self, tx_hash: &str, wallet: &str) -> Verification {
        let Some(client) = &self.client else {
            return Verification::FailOpen("verification disabled");
        };

        let verification =
            match tokio::time::timeout(self.timeout, client.transaction_outcome(tx_hash)).await {
                Ok(Ok(Some(outcome))) => check_outcome(&outcome, wallet),
                Ok(Ok(None)) => Verification::FailOpen("receipt not found"),
                Ok(Err(e)) => {
                    tracing::warn!(tx_hash, error = %e, "chain lookup failed, accepting mint");
                    Verification::FailOpen("rpc error")
                }
                Err(_) => {
                    tracing::warn!(tx_hash, "chain lookup timed out, accepting mint");
                    Verification::FailOpen("rpc timeout")
                }
            };

        metrics::counter!("mintpulse_chain_verify_total", "result" => verification.label())
            .increment(1);
        verification
    }
}
