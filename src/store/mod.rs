//! Dual-store persistence: a relational store (authoritative rows) and a
//! graph store (wallet/transaction topology).
//!
//! Both sinks receive the same record. The relational write comes first and
//! is the only gating one; the graph write is best-effort and a missed
//! graph entry is repairable by a later reconciliation pass. The traits
//! here are the seams the pipeline, correlator and sweeps are written
//! against, so every consumer is testable without a live database.

use async_trait::async_trait;
use uuid::Uuid;

use crate::timestamp::UnixTimestamp;
use crate::types::{CrossChainTransfer, RiskFlag, RiskScore};

pub mod graph;
pub mod relational;

pub use graph::GraphStore;
pub use relational::RelationalStore;

/// Persistence failure kinds.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Contention, connection loss, deadline. Retried with jitter.
    #[error("transient store error: {0}")]
    Transient(String),
    /// Schema/constraint violations and everything else that retrying will
    /// not fix. The record is dead-lettered.
    #[error("fatal store error: {0}")]
    Fatal(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(error: sqlx::Error) -> Self {
        match &error {
            sqlx::Error::Io(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => StoreError::Transient(error.to_string()),
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                // The upsert handles the uniqueness key; anything else
                // reaching here is a real conflict.
                StoreError::Fatal(error.to_string())
            }
            _ => StoreError::Fatal(error.to_string()),
        }
    }
}

/// The relational write surface the pipeline uses.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TransferSink: Send + Sync {
    /// Idempotent insert keyed by `(protocol, transaction_hash,
    /// event_type)`. Returns `true` when the row was newly inserted,
    /// `false` when the key already existed (replayed log).
    async fn upsert(&self, transfer: &CrossChainTransfer) -> Result<bool, StoreError>;

    /// Record a transfer that exhausted its persistence retries.
    async fn dead_letter(
        &self,
        transfer: &CrossChainTransfer,
        reason: &str,
    ) -> Result<(), StoreError>;
}

/// A candidate counterpart row, as seen by the correlator.
#[derive(Debug, Clone, PartialEq)]
pub struct CorrelationCandidate {
    pub id: Uuid,
    pub timestamp: UnixTimestamp,
}

/// Everything the correlator needs from the relational store.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CorrelationStore: Send + Sync {
    /// PENDING rows matching the subject's fingerprint inside the window,
    /// excluding the subject itself.
    async fn find_pending_counterparts(
        &self,
        subject: &CrossChainTransfer,
        window_secs: u64,
    ) -> Result<Vec<CorrelationCandidate>, StoreError>;

    /// Atomically mark both rows COMPLETED with mutual links. Conditional
    /// on both still being PENDING; returns `false` (no-op) otherwise. This
    /// is the linearization point: two observers cannot double-link a pair.
    async fn link_pair(&self, subject: Uuid, counterpart: Uuid) -> Result<bool, StoreError>;
}

/// Risk fields writeback, shared by the pipeline and the rescoring sweep.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RiskWriteback: Send + Sync {
    async fn update_risk(
        &self,
        id: Uuid,
        score: RiskScore,
        flags: &[RiskFlag],
        analyzed_at: UnixTimestamp,
    ) -> Result<(), StoreError>;
}

/// The graph write surface. Best-effort: failures are logged and counted by
/// callers, never propagated into the relational path.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GraphSink: Send + Sync {
    /// MERGE wallet nodes, CREATE the transaction node, MERGE
    /// SENT/INITIATED/RECEIVED edges for one transfer.
    async fn write_transfer(&self, transfer: &CrossChainTransfer) -> Result<(), StoreError>;

    /// MERGE a LINKED edge between two transaction nodes.
    async fn link_transfers(&self, a: Uuid, b: Uuid) -> Result<(), StoreError>;
}
