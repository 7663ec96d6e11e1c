//! Cross-chain correlator.
//!
//! For a newly inserted PENDING transfer, finds the counterpart on the
//! opposite side of the bridge — same fingerprint (protocol, unordered
//! address pair, token, exact amount), mirror-compatible chains, within the
//! time window — and atomically marks both rows COMPLETED with mutual
//! links. The conditional store update is the linearization point: if a
//! concurrent observer already linked either row, the update is a no-op
//! and the correlator never unlinks.

use std::sync::Arc;
use uuid::Uuid;

use crate::store::{CorrelationStore, GraphSink, StoreError};
use crate::types::{CrossChainTransfer, TransferStatus};

/// What happened for one subject transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorrelationOutcome {
    /// Both rows were linked; the id is the counterpart.
    Linked(Uuid),
    /// No candidate inside the window. Not an error: the record stays
    /// PENDING and a later arrival (or the sweep) will find it.
    NoMatch,
    /// A candidate existed but either row had already left PENDING.
    AlreadyLinked,
}

pub struct Correlator {
    store: Arc<dyn CorrelationStore>,
    graph: Arc<dyn GraphSink>,
    window_secs: u64,
}

impl Correlator {
    pub fn new(
        store: Arc<dyn CorrelationStore>,
        graph: Arc<dyn GraphSink>,
        window_secs: u64,
    ) -> Self {
        Self {
            store,
            graph,
            window_secs,
        }
    }

    /// Try to link `subject` with its counterpart.
    ///
    /// Only PENDING subjects correlate; FAILED and already-COMPLETED
    /// records pass through untouched. With multiple eligible candidates
    /// the nearest-in-time wins; never more than two records are merged.
    pub async fn correlate(
        &self,
        subject: &CrossChainTransfer,
    ) -> Result<CorrelationOutcome, StoreError> {
        if subject.status != TransferStatus::Pending {
            return Ok(CorrelationOutcome::NoMatch);
        }

        let candidates = self
            .store
            .find_pending_counterparts(subject, self.window_secs)
            .await?;
        let Some(nearest) = candidates
            .iter()
            .min_by_key(|c| c.timestamp.abs_diff(subject.timestamp))
        else {
            return Ok(CorrelationOutcome::NoMatch);
        };

        if !self.store.link_pair(subject.id, nearest.id).await? {
            return Ok(CorrelationOutcome::AlreadyLinked);
        }

        // Best-effort edge; the relational link is already authoritative.
        if let Err(error) = self.graph.link_transfers(subject.id, nearest.id).await {
            tracing::warn!(
                subject = %subject.id,
                counterpart = %nearest.id,
                %error,
                "LINKED edge write failed"
            );
        }
        tracing::info!(
            subject = %subject.id,
            counterpart = %nearest.id,
            protocol = %subject.protocol,
            "correlated cross-chain transfer pair"
        );
        Ok(CorrelationOutcome::Linked(nearest.id))
    }
}
