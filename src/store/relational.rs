//! Postgres store: authoritative transfer rows, dead letters, the sanctions
//! watchlist, and the query surface consumed by the external API layer.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use std::time::Duration;
use uuid::Uuid;

use super::{CorrelationCandidate, CorrelationStore, RiskWriteback, StoreError, TransferSink};
use crate::chain::Chain;
use crate::protocol::BridgeProtocol;
use crate::risk::{ActivityLookup, LookupError, SanctionsLookup};
use crate::timestamp::UnixTimestamp;
use crate::types::{
    CrossChainTransfer, EvmAddress, FlagSeverity, RiskFlag, RiskScore, SanctionsEntry,
    TokenAmount, TransferStatus, TxHash,
};

/// Filters for the recent-transfers listing.
#[derive(Debug, Clone, Default)]
pub struct TransferFilter {
    pub protocol: Option<BridgeProtocol>,
    pub chain: Option<Chain>,
    pub status: Option<TransferStatus>,
    pub min_risk: Option<f64>,
}

/// Offset pagination for the listing queries.
#[derive(Debug, Clone, Copy)]
pub struct Page {
    pub limit: i64,
    pub offset: i64,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            limit: 50,
            offset: 0,
        }
    }
}

/// Aggregate counters for the statistics endpoint.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct TransferStatistics {
    pub total: i64,
    pub pending: i64,
    pub completed: i64,
    pub failed: i64,
    pub high_risk: i64,
    pub last_24h: i64,
}

/// Handle over the shared Postgres pool.
#[derive(Clone)]
pub struct RelationalStore {
    pool: PgPool,
    db_timeout: Duration,
}

impl RelationalStore {
    /// Connect, size the pool, and run pending migrations.
    pub async fn connect(
        url: &str,
        pool_size: u32,
        db_timeout: Duration,
    ) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(pool_size)
            .acquire_timeout(db_timeout)
            .connect(url)
            .await?;
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| StoreError::Fatal(format!("migration failed: {e}")))?;
        Ok(Self { pool, db_timeout })
    }

    /// Close the pool. Called once at shutdown.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn deadline<T>(
        &self,
        fut: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, StoreError> {
        tokio::time::timeout(self.db_timeout, fut)
            .await
            .map_err(|_| StoreError::Transient("database deadline exceeded".to_string()))?
    }

    pub async fn get_by_id(&self, id: Uuid) -> Result<Option<CrossChainTransfer>, StoreError> {
        self.deadline(async {
            let row = sqlx::query("SELECT * FROM bridge_transfer WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
            row.map(|r| row_to_transfer(&r)).transpose()
        })
        .await
    }

    /// Recent transfers, newest first. Dead-lettered records live in their
    /// own table and never show up here.
    pub async fn list_recent(
        &self,
        filter: &TransferFilter,
        page: Page,
    ) -> Result<Vec<CrossChainTransfer>, StoreError> {
        self.deadline(async {
            let mut builder =
                sqlx::QueryBuilder::new("SELECT * FROM bridge_transfer WHERE TRUE");
            if let Some(protocol) = filter.protocol {
                builder.push(" AND protocol = ");
                builder.push_bind(protocol.as_str());
            }
            if let Some(chain) = filter.chain {
                let tag = chain.as_str();
                builder.push(" AND (source_chain = ");
                builder.push_bind(tag.clone());
                builder.push(" OR destination_chain = ");
                builder.push_bind(tag);
                builder.push(")");
            }
            if let Some(status) = filter.status {
                builder.push(" AND status = ");
                builder.push_bind(status.as_str());
            }
            if let Some(min_risk) = filter.min_risk {
                builder.push(" AND risk_score >= ");
                builder.push_bind(min_risk);
            }
            builder.push(" ORDER BY timestamp DESC LIMIT ");
            builder.push_bind(page.limit);
            builder.push(" OFFSET ");
            builder.push_bind(page.offset);

            let rows = builder.build().fetch_all(&self.pool).await?;
            rows.iter().map(row_to_transfer).collect()
        })
        .await
    }

    pub async fn list_by_wallet(
        &self,
        address: &EvmAddress,
        page: Page,
    ) -> Result<Vec<CrossChainTransfer>, StoreError> {
        self.deadline(async {
            let needle = address.to_lowercase_hex();
            let rows = sqlx::query(
                "SELECT * FROM bridge_transfer \
                 WHERE source_address = $1 OR destination_address = $1 \
                 ORDER BY timestamp DESC LIMIT $2 OFFSET $3",
            )
            .bind(needle)
            .bind(page.limit)
            .bind(page.offset)
            .fetch_all(&self.pool)
            .await?;
            rows.iter().map(row_to_transfer).collect()
        })
        .await
    }

    /// Human search: case-insensitive substring over addresses, tx hash and
    /// token symbol. (Correlation never uses this; it matches exactly.)
    pub async fn search(
        &self,
        query: &str,
        page: Page,
    ) -> Result<Vec<CrossChainTransfer>, StoreError> {
        self.deadline(async {
            let pattern = format!("%{}%", query.to_lowercase());
            let rows = sqlx::query(
                "SELECT * FROM bridge_transfer \
                 WHERE source_address ILIKE $1 \
                    OR destination_address ILIKE $1 \
                    OR transaction_hash ILIKE $1 \
                    OR token_symbol ILIKE $1 \
                 ORDER BY timestamp DESC LIMIT $2 OFFSET $3",
            )
            .bind(pattern)
            .bind(page.limit)
            .bind(page.offset)
            .fetch_all(&self.pool)
            .await?;
            rows.iter().map(row_to_transfer).collect()
        })
        .await
    }

    pub async fn statistics(&self) -> Result<TransferStatistics, StoreError> {
        self.deadline(async {
            let row = sqlx::query(
                "SELECT \
                    COUNT(*) AS total, \
                    COUNT(*) FILTER (WHERE status = 'PENDING') AS pending, \
                    COUNT(*) FILTER (WHERE status = 'COMPLETED') AS completed, \
                    COUNT(*) FILTER (WHERE status = 'FAILED') AS failed, \
                    COUNT(*) FILTER (WHERE risk_score > 0.7) AS high_risk, \
                    COUNT(*) FILTER (WHERE timestamp > now() - interval '24 hours') AS last_24h \
                 FROM bridge_transfer",
            )
            .fetch_one(&self.pool)
            .await?;
            Ok(TransferStatistics {
                total: row.try_get("total").map_err(StoreError::from)?,
                pending: row.try_get("pending").map_err(StoreError::from)?,
                completed: row.try_get("completed").map_err(StoreError::from)?,
                failed: row.try_get("failed").map_err(StoreError::from)?,
                high_risk: row.try_get("high_risk").map_err(StoreError::from)?,
                last_24h: row.try_get("last_24h").map_err(StoreError::from)?,
            })
        })
        .await
    }

    /// PENDING rows older than `older_than_secs`, for the correlation
    /// sweep's late-match pass.
    pub async fn stale_pending(
        &self,
        older_than_secs: u64,
        limit: i64,
    ) -> Result<Vec<CrossChainTransfer>, StoreError> {
        self.deadline(async {
            let cutoff = Utc::now() - ChronoDuration::seconds(older_than_secs as i64);
            let rows = sqlx::query(
                "SELECT * FROM bridge_transfer \
                 WHERE status = 'PENDING' AND timestamp < $1 \
                 ORDER BY timestamp ASC LIMIT $2",
            )
            .bind(cutoff)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
            rows.iter().map(row_to_transfer).collect()
        })
        .await
    }

    /// Flag long-unmatched PENDING rows with CORRELATION_TIMEOUT. Status
    /// stays PENDING; the flag is appended once. Returns flagged row count.
    pub async fn flag_correlation_timeouts(
        &self,
        older_than_secs: u64,
    ) -> Result<u64, StoreError> {
        self.deadline(async {
            let cutoff = Utc::now() - ChronoDuration::seconds(older_than_secs as i64);
            let flag = serde_json::to_value(RiskFlag::new(
                crate::types::RiskFlagKind::CorrelationTimeout,
                FlagSeverity::Low,
                "no counterpart observed inside the correlation window",
            ))
            .map_err(|e| StoreError::Fatal(e.to_string()))?;
            let result = sqlx::query(
                "UPDATE bridge_transfer \
                 SET risk_flags = risk_flags || $1::jsonb, updated_at = now() \
                 WHERE status = 'PENDING' \
                   AND timestamp < $2 \
                   AND NOT risk_flags @> $3::jsonb",
            )
            .bind(&flag)
            .bind(cutoff)
            .bind(serde_json::json!([{"type": "CORRELATION_TIMEOUT"}]))
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected())
        })
        .await
    }

    /// Transfers updated inside the rescoring window, bounded batch.
    pub async fn recently_updated(
        &self,
        window_secs: u64,
        limit: i64,
    ) -> Result<Vec<CrossChainTransfer>, StoreError> {
        self.deadline(async {
            let cutoff = Utc::now() - ChronoDuration::seconds(window_secs as i64);
            let rows = sqlx::query(
                "SELECT * FROM bridge_transfer \
                 WHERE updated_at > $1 \
                 ORDER BY updated_at DESC LIMIT $2",
            )
            .bind(cutoff)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
            rows.iter().map(row_to_transfer).collect()
        })
        .await
    }
}

#[async_trait]
impl TransferSink for RelationalStore {
    async fn upsert(&self, transfer: &CrossChainTransfer) -> Result<bool, StoreError> {
        self.deadline(async {
            let result = sqlx::query(
                "INSERT INTO bridge_transfer (\
                    id, protocol, source_chain, destination_chain, source_address, \
                    destination_address, token_address, token_symbol, amount, \
                    transaction_hash, block_number, timestamp, event_type, status, \
                    linked_transfer_id, risk_score, risk_flags, analyzed_at, metadata\
                 ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19) \
                 ON CONFLICT (protocol, transaction_hash, event_type) DO NOTHING",
            )
            .bind(transfer.id)
            .bind(transfer.protocol.as_str())
            .bind(transfer.source_chain.map(|c| c.as_str()))
            .bind(transfer.destination_chain.map(|c| c.as_str()))
            .bind(transfer.source_address.map(|a| a.to_lowercase_hex()))
            .bind(transfer.destination_address.map(|a| a.to_lowercase_hex()))
            .bind(transfer.token_address.map(|a| a.to_lowercase_hex()))
            .bind(&transfer.token_symbol)
            .bind(transfer.amount.canonical())
            .bind(transfer.transaction_hash.to_string())
            .bind(transfer.block_number as i64)
            .bind(transfer.timestamp.to_datetime())
            .bind(&transfer.event_type)
            .bind(transfer.status.as_str())
            .bind(transfer.linked_transfer_id)
            .bind(transfer.risk_score.map(|s| s.value()))
            .bind(
                serde_json::to_value(&transfer.risk_flags)
                    .map_err(|e| StoreError::Fatal(e.to_string()))?,
            )
            .bind(transfer.analyzed_at.map(|t| t.to_datetime()))
            .bind(serde_json::Value::Object(transfer.metadata.clone()))
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected() == 1)
        })
        .await
    }

    async fn dead_letter(
        &self,
        transfer: &CrossChainTransfer,
        reason: &str,
    ) -> Result<(), StoreError> {
        self.deadline(async {
            let payload =
                serde_json::to_value(transfer).map_err(|e| StoreError::Fatal(e.to_string()))?;
            sqlx::query("INSERT INTO bridge_dead_letter (payload, reason) VALUES ($1, $2)")
                .bind(payload)
                .bind(reason)
                .execute(&self.pool)
                .await?;
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl CorrelationStore for RelationalStore {
    async fn find_pending_counterparts(
        &self,
        subject: &CrossChainTransfer,
        window_secs: u64,
    ) -> Result<Vec<CorrelationCandidate>, StoreError> {
        self.deadline(async {
            // Unordered address pair: either side of the bridge names the
            // same two wallets, so compare (LEAST, GREATEST).
            let a = subject
                .source_address
                .map(|a| a.to_lowercase_hex())
                .unwrap_or_default();
            let b = subject
                .destination_address
                .map(|a| a.to_lowercase_hex())
                .unwrap_or_default();
            let (pair_lo, pair_hi) = if a <= b { (a, b) } else { (b, a) };

            let window = ChronoDuration::seconds(window_secs as i64);
            let at = subject.timestamp.to_datetime();
            let token = subject.token_address.map(|t| t.to_lowercase_hex());

            let rows = sqlx::query(
                "SELECT id, timestamp FROM bridge_transfer \
                 WHERE status = 'PENDING' \
                   AND id <> $1 \
                   AND protocol = $2 \
                   AND transaction_hash <> $3 \
                   AND amount = $4 \
                   AND LEAST(COALESCE(source_address, ''), COALESCE(destination_address, '')) = $5 \
                   AND GREATEST(COALESCE(source_address, ''), COALESCE(destination_address, '')) = $6 \
                   AND ($7::text IS NULL OR token_address IS NULL OR token_address = $7) \
                   AND ($8::text IS NULL OR source_chain IS NULL OR source_chain = $8) \
                   AND ($9::text IS NULL OR destination_chain IS NULL OR destination_chain = $9) \
                   AND timestamp BETWEEN $10 AND $11",
            )
            .bind(subject.id)
            .bind(subject.protocol.as_str())
            .bind(subject.transaction_hash.to_string())
            .bind(subject.amount.canonical())
            .bind(pair_lo)
            .bind(pair_hi)
            .bind(token)
            .bind(subject.source_chain.map(|c| c.as_str()))
            .bind(subject.destination_chain.map(|c| c.as_str()))
            .bind(at - window)
            .bind(at + window)
            .fetch_all(&self.pool)
            .await?;

            rows.iter()
                .map(|row| {
                    let id: Uuid = row.try_get("id").map_err(StoreError::from)?;
                    let at: DateTime<Utc> = row.try_get("timestamp").map_err(StoreError::from)?;
                    Ok(CorrelationCandidate {
                        id,
                        timestamp: UnixTimestamp::from(at),
                    })
                })
                .collect()
        })
        .await
    }

    async fn link_pair(&self, subject: Uuid, counterpart: Uuid) -> Result<bool, StoreError> {
        self.deadline(async {
            let mut tx = self.pool.begin().await?;
            let first = sqlx::query(
                "UPDATE bridge_transfer \
                 SET status = 'COMPLETED', linked_transfer_id = $2, updated_at = now() \
                 WHERE id = $1 AND status = 'PENDING'",
            )
            .bind(subject)
            .bind(counterpart)
            .execute(&mut *tx)
            .await?;
            let second = sqlx::query(
                "UPDATE bridge_transfer \
                 SET status = 'COMPLETED', linked_transfer_id = $2, updated_at = now() \
                 WHERE id = $1 AND status = 'PENDING'",
            )
            .bind(counterpart)
            .bind(subject)
            .execute(&mut *tx)
            .await?;

            if first.rows_affected() == 1 && second.rows_affected() == 1 {
                tx.commit().await?;
                Ok(true)
            } else {
                // Either row already left PENDING; linking is a no-op.
                tx.rollback().await?;
                Ok(false)
            }
        })
        .await
    }
}

#[async_trait]
impl RiskWriteback for RelationalStore {
    async fn update_risk(
        &self,
        id: Uuid,
        score: RiskScore,
        flags: &[RiskFlag],
        analyzed_at: UnixTimestamp,
    ) -> Result<(), StoreError> {
        self.deadline(async {
            let flags =
                serde_json::to_value(flags).map_err(|e| StoreError::Fatal(e.to_string()))?;
            sqlx::query(
                "UPDATE bridge_transfer \
                 SET risk_score = $2, risk_flags = $3, analyzed_at = $4, updated_at = now() \
                 WHERE id = $1",
            )
            .bind(id)
            .bind(score.value())
            .bind(flags)
            .bind(analyzed_at.to_datetime())
            .execute(&self.pool)
            .await?;
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl SanctionsLookup for RelationalStore {
    async fn active_entry(
        &self,
        address: EvmAddress,
    ) -> Result<Option<SanctionsEntry>, LookupError> {
        let needle = address.to_lowercase_hex();
        let row = sqlx::query(
            "SELECT source, entity_name, wallet_address, chain, risk_level, is_active \
             FROM sanctioned_wallet \
             WHERE lower(wallet_address) = $1 AND is_active \
             LIMIT 1",
        )
        .bind(needle)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| LookupError(e.to_string()))?;

        row.map(|row| {
            let wallet: Option<String> = row
                .try_get("wallet_address")
                .map_err(|e| LookupError(e.to_string()))?;
            let chain: Option<String> =
                row.try_get("chain").map_err(|e| LookupError(e.to_string()))?;
            let risk_level: String = row
                .try_get("risk_level")
                .map_err(|e| LookupError(e.to_string()))?;
            Ok(SanctionsEntry {
                source: row.try_get("source").map_err(|e| LookupError(e.to_string()))?,
                entity_name: row
                    .try_get("entity_name")
                    .map_err(|e| LookupError(e.to_string()))?,
                wallet_address: wallet.and_then(|w| w.parse().ok()),
                chain: chain.and_then(|c| c.parse().ok()),
                risk_level: match risk_level.as_str() {
                    "LOW" => FlagSeverity::Low,
                    "MEDIUM" => FlagSeverity::Medium,
                    _ => FlagSeverity::High,
                },
                is_active: row
                    .try_get("is_active")
                    .map_err(|e| LookupError(e.to_string()))?,
            })
        })
        .transpose()
    }
}

#[async_trait]
impl ActivityLookup for RelationalStore {
    async fn transfer_count(
        &self,
        address: EvmAddress,
        window_secs: u64,
    ) -> Result<u64, LookupError> {
        let needle = address.to_lowercase_hex();
        let cutoff = Utc::now() - ChronoDuration::seconds(window_secs as i64);
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM bridge_transfer \
             WHERE (source_address = $1 OR destination_address = $1) \
               AND timestamp > $2",
        )
        .bind(needle)
        .bind(cutoff)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| LookupError(e.to_string()))?;
        Ok(count.max(0) as u64)
    }
}

fn row_to_transfer(row: &PgRow) -> Result<CrossChainTransfer, StoreError> {
    let fatal = |e: sqlx::Error| StoreError::Fatal(e.to_string());
    let parse_fatal = |what: &str, e: String| StoreError::Fatal(format!("bad {what} in row: {e}"));

    let protocol: String = row.try_get("protocol").map_err(fatal)?;
    let source_chain: Option<String> = row.try_get("source_chain").map_err(fatal)?;
    let destination_chain: Option<String> = row.try_get("destination_chain").map_err(fatal)?;
    let source_address: Option<String> = row.try_get("source_address").map_err(fatal)?;
    let destination_address: Option<String> = row.try_get("destination_address").map_err(fatal)?;
    let token_address: Option<String> = row.try_get("token_address").map_err(fatal)?;
    let amount: String = row.try_get("amount").map_err(fatal)?;
    let transaction_hash: String = row.try_get("transaction_hash").map_err(fatal)?;
    let block_number: i64 = row.try_get("block_number").map_err(fatal)?;
    let timestamp: DateTime<Utc> = row.try_get("timestamp").map_err(fatal)?;
    let status: String = row.try_get("status").map_err(fatal)?;
    let risk_flags: serde_json::Value = row.try_get("risk_flags").map_err(fatal)?;
    let analyzed_at: Option<DateTime<Utc>> = row.try_get("analyzed_at").map_err(fatal)?;
    let metadata: serde_json::Value = row.try_get("metadata").map_err(fatal)?;

    let parse_address = |s: Option<String>, what: &str| -> Result<Option<EvmAddress>, StoreError> {
        s.map(|s| {
            s.parse::<EvmAddress>()
                .map_err(|e| parse_fatal(what, e.to_string()))
        })
        .transpose()
    };

    Ok(CrossChainTransfer {
        id: row.try_get("id").map_err(fatal)?,
        protocol: protocol
            .parse::<BridgeProtocol>()
            .map_err(|e| parse_fatal("protocol", e.to_string()))?,
        source_chain: source_chain
            .map(|c| c.parse::<Chain>())
            .transpose()
            .map_err(|e| parse_fatal("source_chain", e.to_string()))?,
        destination_chain: destination_chain
            .map(|c| c.parse::<Chain>())
            .transpose()
            .map_err(|e| parse_fatal("destination_chain", e.to_string()))?,
        source_address: parse_address(source_address, "source_address")?,
        destination_address: parse_address(destination_address, "destination_address")?,
        token_address: parse_address(token_address, "token_address")?,
        token_symbol: row.try_get("token_symbol").map_err(fatal)?,
        amount: TokenAmount::parse(&amount)
            .map_err(|e| parse_fatal("amount", e.to_string()))?,
        transaction_hash: transaction_hash
            .parse::<TxHash>()
            .map_err(|e| parse_fatal("transaction_hash", e.to_string()))?,
        block_number: block_number.max(0) as u64,
        timestamp: UnixTimestamp::from(timestamp),
        event_type: row.try_get("event_type").map_err(fatal)?,
        status: status
            .parse::<TransferStatus>()
            .map_err(|e| parse_fatal("status", e.to_string()))?,
        linked_transfer_id: row.try_get("linked_transfer_id").map_err(fatal)?,
        risk_score: row
            .try_get::<Option<f64>, _>("risk_score")
            .map_err(fatal)?
            .map(RiskScore::new),
        risk_flags: serde_json::from_value(risk_flags)
            .map_err(|e| parse_fatal("risk_flags", e.to_string()))?,
        analyzed_at: analyzed_at.map(UnixTimestamp::from),
        metadata: match metadata {
            serde_json::Value::Object(map) => map,
            _ => serde_json::Map::new(),
        },
    })
}
