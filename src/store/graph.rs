//! Graph store sink: wallet/transaction topology over the Neo4j HTTP
//! transaction API.
//!
//! One transfer becomes: `MERGE`d `Wallet` nodes for both endpoints, a
//! `Transaction` node keyed by transfer id, a `SENT` edge between the
//! wallets, and `INITIATED`/`RECEIVED` edges from the wallets to the
//! transaction. Correlated pairs get a `LINKED` edge between their
//! transaction nodes. All statements are `MERGE`-shaped so retries are
//! idempotent.
//!
//! Every write is best-effort from the pipeline's point of view: the
//! relational row is authoritative, and a reconciliation pass can replay
//! missing graph entries.

use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use url::Url;
use uuid::Uuid;

use super::{GraphSink, StoreError};
use crate::config::GraphConfig;
use crate::types::CrossChainTransfer;

/// One Cypher statement plus parameters, in the transaction API shape.
#[derive(Debug, Clone, Serialize)]
pub struct Statement {
    pub statement: String,
    pub parameters: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct TransactionBody<'a> {
    statements: &'a [Statement],
}

#[derive(Debug, serde::Deserialize)]
struct TransactionResponse {
    #[serde(default)]
    errors: Vec<TransactionError>,
}

#[derive(Debug, serde::Deserialize)]
struct TransactionError {
    code: String,
    message: String,
}

/// Client over the `/db/{database}/tx/commit` endpoint.
#[derive(Clone)]
pub struct GraphStore {
    client: reqwest::Client,
    commit_url: Url,
    user: String,
    password: String,
}

impl GraphStore {
    pub fn new(
        config: &GraphConfig,
        pool_size: usize,
        timeout: Duration,
    ) -> Result<Self, StoreError> {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(pool_size)
            .timeout(timeout)
            .build()
            .map_err(|e| StoreError::Fatal(format!("graph client: {e}")))?;
        let commit_url = config
            .url
            .inner()
            .join(&format!("db/{}/tx/commit", config.database))
            .map_err(|e| StoreError::Fatal(format!("graph url: {e}")))?;
        Ok(Self {
            client,
            commit_url,
            user: config.user.inner().clone(),
            password: config.password.inner().clone(),
        })
    }

    async fn commit(&self, statements: &[Statement]) -> Result<(), StoreError> {
        let response = self
            .client
            .post(self.commit_url.clone())
            .basic_auth(&self.user, Some(&self.password))
            .json(&TransactionBody { statements })
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() || e.is_connect() {
                    StoreError::Transient(format!("graph transport: {e}"))
                } else {
                    StoreError::Fatal(format!("graph request: {e}"))
                }
            })?;

        let status = response.status();
        if status.is_server_error() {
            return Err(StoreError::Transient(format!("graph http {status}")));
        }
        if !status.is_success() {
            return Err(StoreError::Fatal(format!("graph http {status}")));
        }

        let body: TransactionResponse = response
            .json()
            .await
            .map_err(|e| StoreError::Fatal(format!("graph response: {e}")))?;
        if let Some(error) = body.errors.first() {
            return Err(StoreError::Fatal(format!(
                "graph statement failed: {} ({})",
                error.message, error.code
            )));
        }
        Ok(())
    }
}

/// Build the statements for one transfer. Pure, so the topology is testable
/// without a server.
pub(crate) fn transfer_statements(transfer: &CrossChainTransfer) -> Vec<Statement> {
    let mut statements = Vec::new();
    let source = transfer.source_address.map(|a| a.to_lowercase_hex());
    let destination = transfer.destination_address.map(|a| a.to_lowercase_hex());

    for address in [&source, &destination].into_iter().flatten() {
        statements.push(Statement {
            statement: "MERGE (w:Wallet {address: $address})".into(),
            parameters: serde_json::json!({ "address": address }),
        });
    }

    statements.push(Statement {
        statement: "MERGE (t:Transaction {id: $id}) \
                    SET t.hash = $hash, t.protocol = $protocol, t.amount = $amount, \
                        t.token = $token, t.sourceChain = $sourceChain, \
                        t.destinationChain = $destinationChain, t.timestamp = $timestamp"
            .into(),
        parameters: serde_json::json!({
            "id": transfer.id.to_string(),
            "hash": transfer.transaction_hash.to_string(),
            "protocol": transfer.protocol.as_str(),
            "amount": transfer.amount.canonical(),
            "token": transfer.token_address.map(|a| a.to_lowercase_hex()),
            "sourceChain": transfer.source_chain.map(|c| c.as_str()),
            "destinationChain": transfer.destination_chain.map(|c| c.as_str()),
            "timestamp": transfer.timestamp.seconds_since_epoch(),
        }),
    });

    if let (Some(from), Some(to)) = (&source, &destination) {
        statements.push(Statement {
            statement: "MATCH (a:Wallet {address: $from}), (b:Wallet {address: $to}) \
                        MERGE (a)-[s:SENT]->(b) \
                        SET s.amount = $amount, s.token = $token"
                .into(),
            parameters: serde_json::json!({
                "from": from,
                "to": to,
                "amount": transfer.amount.canonical(),
                "token": transfer.token_address.map(|a| a.to_lowercase_hex()),
            }),
        });
    }

    if let Some(from) = &source {
        statements.push(Statement {
            statement: "MATCH (w:Wallet {address: $address}), (t:Transaction {id: $id}) \
                        MERGE (w)-[:INITIATED]->(t)"
                .into(),
            parameters: serde_json::json!({
                "address": from,
                "id": transfer.id.to_string(),
            }),
        });
    }

    if let Some(to) = &destination {
        statements.push(Statement {
            statement: "MATCH (w:Wallet {address: $address}), (t:Transaction {id: $id}) \
                        MERGE (w)-[:RECEIVED]->(t)"
                .into(),
            parameters: serde_json::json!({
                "address": to,
                "id": transfer.id.to_string(),
            }),
        });
    }

    statements
}

pub(crate) fn link_statement(a: Uuid, b: Uuid) -> Statement {
    Statement {
        statement: "MATCH (a:Transaction {id: $a}), (b:Transaction {id: $b}) \
                    MERGE (a)-[:LINKED]->(b)"
            .into(),
        parameters: serde_json::json!({
            "a": a.to_string(),
            "b": b.to_string(),
        }),
    }
}

#[async_trait]
impl GraphSink for GraphStore {
    async fn write_transfer(&self, transfer: &CrossChainTransfer) -> Result<(), StoreError> {
        self.commit(&transfer_statements(transfer)).await
    }

    async fn link_transfers(&self, a: Uuid, b: Uuid) -> Result<(), StoreError> {
        self.commit(&[link_statement(a, b)]).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::Chain;
    use crate::protocol::BridgeProtocol;
    use crate::timestamp::UnixTimestamp;
    use crate::types::{TokenAmount, TransferStatus, TxHash};
    use alloy_primitives::B256;

    fn transfer(source: Option<&str>, destination: Option<&str>) -> CrossChainTransfer {
        CrossChainTransfer {
            id: Uuid::new_v4(),
            protocol: BridgeProtocol::Hop,
            source_chain: Some(Chain::Ethereum),
            destination_chain: Some(Chain::Optimism),
            source_address: source.map(|s| s.parse().unwrap()),
            destination_address: destination.map(|s| s.parse().unwrap()),
            token_address: None,
            token_symbol: "UNKNOWN".into(),
            amount: TokenAmount::parse("5").unwrap(),
            transaction_hash: TxHash(B256::repeat_byte(0x0f)),
            block_number: 1,
            timestamp: UnixTimestamp(1_700_000_000),
            event_type: "TransferSent".into(),
            status: TransferStatus::Pending,
            linked_transfer_id: None,
            risk_score: None,
            risk_flags: vec![],
            analyzed_at: None,
            metadata: serde_json::Map::new(),
        }
    }

    #[test]
    fn full_transfer_produces_all_edges() {
        let statements = transfer_statements(&transfer(
            Some("0x00000000000000000000000000000000000000aa"),
            Some("0x00000000000000000000000000000000000000bb"),
        ));
        // 2 wallets + transaction + SENT + INITIATED + RECEIVED.
        assert_eq!(statements.len(), 6);
        assert!(statements[3].statement.contains("SENT"));
        assert!(statements[4].statement.contains("INITIATED"));
        assert!(statements[5].statement.contains("RECEIVED"));
    }

    #[test]
    fn half_sided_transfer_skips_missing_endpoint() {
        let statements =
            transfer_statements(&transfer(None, Some("0x00000000000000000000000000000000000000bb")));
        // 1 wallet + transaction + RECEIVED; no SENT, no INITIATED.
        assert_eq!(statements.len(), 3);
        assert!(statements.iter().all(|s| !s.statement.contains("SENT")));
        assert!(statements.iter().all(|s| !s.statement.contains("INITIATED")));
    }

    #[test]
    fn transaction_node_is_merge_keyed_by_id() {
        let subject = transfer(Some("0x00000000000000000000000000000000000000aa"), None);
        let statements = transfer_statements(&subject);
        let tx_statement = &statements[1];
        assert!(tx_statement.statement.starts_with("MERGE (t:Transaction"));
        assert_eq!(
            tx_statement.parameters["id"],
            subject.id.to_string()
        );
    }

    #[test]
    fn link_statement_is_merge() {
        let statement = link_statement(Uuid::nil(), Uuid::max());
        assert!(statement.statement.contains("MERGE (a)-[:LINKED]->(b)"));
    }
}
