//! Downstream per-record pipeline: score → persist → correlate → graph.
//!
//! Observers call [`Pipeline::process`] inline, one record at a time, which
//! preserves per-observer FIFO ordering; a global semaphore bounds how many
//! records are in flight across the whole fleet (default 5) to cap memory
//! and store pressure.
//!
//! Scoring runs before correlation so the scored record is what the
//! counterpart sees. The relational upsert precedes the graph write and is
//! the only gating store: a record that exhausts its relational retries is
//! dead-lettered and the observer moves on — one bad record never stalls
//! the tail.

use rand::Rng;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Semaphore;

use crate::correlate::Correlator;
use crate::risk::RiskEngine;
use crate::store::{GraphSink, StoreError, TransferSink};
use crate::types::CrossChainTransfer;

/// Relational write attempts before dead-lettering.
const MAX_WRITE_ATTEMPTS: u32 = 3;
/// Base pause between retries; jitter is added on top.
const RETRY_BASE: Duration = Duration::from_millis(250);
const RETRY_JITTER_MS: u64 = 250;

/// Fleet-wide pipeline counters, read by the supervisor's status report.
#[derive(Debug, Default)]
pub struct PipelineCounters {
    pub persisted: AtomicU64,
    pub duplicates: AtomicU64,
    pub dead_lettered: AtomicU64,
    pub graph_failures: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineCountersSnapshot {
    pub persisted: u64,
    pub duplicates: u64,
    pub dead_lettered: u64,
    pub graph_failures: u64,
}

impl PipelineCounters {
    pub fn snapshot(&self) -> PipelineCountersSnapshot {
        PipelineCountersSnapshot {
            persisted: self.persisted.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
            graph_failures: self.graph_failures.load(Ordering::Relaxed),
        }
    }
}

pub struct Pipeline {
    risk: RiskEngine,
    correlator: Correlator,
    sink: Arc<dyn TransferSink>,
    graph: Arc<dyn GraphSink>,
    workers: Arc<Semaphore>,
    counters: Arc<PipelineCounters>,
}

impl Pipeline {
    pub fn new(
        risk: RiskEngine,
        correlator: Correlator,
        sink: Arc<dyn TransferSink>,
        graph: Arc<dyn GraphSink>,
        worker_concurrency: usize,
    ) -> Self {
        Self {
            risk,
            correlator,
            sink,
            graph,
            workers: Arc::new(Semaphore::new(worker_concurrency.max(1))),
            counters: Arc::new(PipelineCounters::default()),
        }
    }

    pub fn counters(&self) -> Arc<PipelineCounters> {
        Arc::clone(&self.counters)
    }

    /// Run one record through the full downstream path.
    pub async fn process(&self, mut transfer: CrossChainTransfer) {
        let _permit = self
            .workers
            .acquire()
            .await
            .expect("pipeline semaphore never closes");

        let assessment = self.risk.assess(&transfer).await;
        transfer.risk_score = Some(assessment.score);
        transfer.risk_flags = assessment.flags;
        transfer.analyzed_at = Some(assessment.analyzed_at);

        let inserted = match self.upsert_with_retry(&transfer).await {
            Ok(inserted) => inserted,
            Err(error) => {
                self.counters.dead_lettered.fetch_add(1, Ordering::Relaxed);
                tracing::error!(
                    id = %transfer.id,
                    tx = %transfer.transaction_hash,
                    %error,
                    "transfer dead-lettered after failed persistence"
                );
                if let Err(dl_error) = self
                    .sink
                    .dead_letter(&transfer, &error.to_string())
                    .await
                {
                    tracing::error!(id = %transfer.id, %dl_error, "dead-letter write failed");
                }
                return;
            }
        };

        if !inserted {
            // Replayed log: the row (and its graph node) already exist.
            self.counters.duplicates.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(
                tx = %transfer.transaction_hash,
                event = %transfer.event_type,
                "duplicate log replay skipped"
            );
            return;
        }
        self.counters.persisted.fetch_add(1, Ordering::Relaxed);

        if let Err(error) = self.correlator.correlate(&transfer).await {
            // CorrelationNoMatch is not an error; this is a store failure.
            // The record stays PENDING and the sweep retries later.
            tracing::warn!(id = %transfer.id, %error, "correlation attempt failed");
        }

        if let Err(error) = self.graph.write_transfer(&transfer).await {
            self.counters.graph_failures.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                id = %transfer.id,
                %error,
                "graph write failed; relational row remains authoritative"
            );
        }
    }

    async fn upsert_with_retry(
        &self,
        transfer: &CrossChainTransfer,
    ) -> Result<bool, StoreError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.sink.upsert(transfer).await {
                Ok(inserted) => return Ok(inserted),
                Err(error) if error.is_transient() && attempt < MAX_WRITE_ATTEMPTS => {
                    let jitter = rand::rng().random_range(0..RETRY_JITTER_MS);
                    let pause = RETRY_BASE * attempt + Duration::from_millis(jitter);
                    tracing::debug!(
                        id = %transfer.id,
                        attempt,
                        %error,
                        "transient persistence error, retrying"
                    );
                    tokio::time::sleep(pause).await;
                }
                Err(error) => return Err(error),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::Chain;
    use crate::config::EngineConfig;
    use crate::protocol::BridgeProtocol;
    use crate::risk::{MockActivityLookup, MockSanctionsLookup};
    use crate::store::{MockCorrelationStore, MockGraphSink, MockTransferSink};
    use crate::timestamp::UnixTimestamp;
    use crate::types::{TokenAmount, TransferStatus, TxHash};
    use alloy_primitives::B256;
    use std::sync::atomic::AtomicU32;
    use uuid::Uuid;

    fn transfer() -> CrossChainTransfer {
        CrossChainTransfer {
            id: Uuid::new_v4(),
            protocol: BridgeProtocol::CelerCBridge,
            source_chain: Some(Chain::Ethereum),
            destination_chain: Some(Chain::Bsc),
            source_address: Some("0x00000000000000000000000000000000000000aa".parse().unwrap()),
            destination_address: Some(
                "0x00000000000000000000000000000000000000bb".parse().unwrap(),
            ),
            token_address: None,
            token_symbol: "UNKNOWN".into(),
            amount: TokenAmount::parse("42").unwrap(),
            transaction_hash: TxHash(B256::repeat_byte(0x21)),
            block_number: 77,
            timestamp: UnixTimestamp(1_700_000_000),
            event_type: "Send".into(),
            status: TransferStatus::Pending,
            linked_transfer_id: None,
            risk_score: None,
            risk_flags: vec![],
            analyzed_at: None,
            metadata: serde_json::Map::new(),
        }
    }

    fn clean_risk() -> RiskEngine {
        let mut sanctions = MockSanctionsLookup::new();
        sanctions.expect_active_entry().returning(|_| Ok(None));
        let mut activity = MockActivityLookup::new();
        activity.expect_transfer_count().returning(|_, _| Ok(0));
        RiskEngine::new(
            Arc::new(sanctions),
            Arc::new(activity),
            &EngineConfig::default(),
        )
    }

    fn idle_correlator() -> Correlator {
        let mut store = MockCorrelationStore::new();
        store
            .expect_find_pending_counterparts()
            .returning(|_, _| Ok(vec![]));
        Correlator::new(Arc::new(store), Arc::new(MockGraphSink::new()), 1800)
    }

    fn pipeline_with(sink: MockTransferSink, graph: MockGraphSink) -> Pipeline {
        Pipeline::new(
            clean_risk(),
            idle_correlator(),
            Arc::new(sink),
            Arc::new(graph),
            5,
        )
    }

    #[tokio::test]
    async fn happy_path_persists_and_writes_graph() {
        let mut sink = MockTransferSink::new();
        sink.expect_upsert().times(1).returning(|_| Ok(true));
        let mut graph = MockGraphSink::new();
        graph.expect_write_transfer().times(1).returning(|_| Ok(()));

        let pipeline = pipeline_with(sink, graph);
        pipeline.process(transfer()).await;
        let counters = pipeline.counters().snapshot();
        assert_eq!(counters.persisted, 1);
        assert_eq!(counters.dead_lettered, 0);
    }

    #[tokio::test]
    async fn duplicate_replay_skips_graph_write() {
        let mut sink = MockTransferSink::new();
        sink.expect_upsert().times(1).returning(|_| Ok(false));
        let mut graph = MockGraphSink::new();
        graph.expect_write_transfer().times(0);

        let pipeline = pipeline_with(sink, graph);
        pipeline.process(transfer()).await;
        let counters = pipeline.counters().snapshot();
        assert_eq!(counters.persisted, 0);
        assert_eq!(counters.duplicates, 1);
    }

    #[tokio::test]
    async fn transient_errors_retry_then_succeed() {
        let attempts = Arc::new(AtomicU32::new(0));
        let seen = Arc::clone(&attempts);
        let mut sink = MockTransferSink::new();
        sink.expect_upsert().times(3).returning(move |_| {
            if seen.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(StoreError::Transient("connection reset".into()))
            } else {
                Ok(true)
            }
        });
        let mut graph = MockGraphSink::new();
        graph.expect_write_transfer().times(1).returning(|_| Ok(()));

        let pipeline = pipeline_with(sink, graph);
        pipeline.process(transfer()).await;
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert_eq!(pipeline.counters().snapshot().persisted, 1);
    }

    #[tokio::test]
    async fn exhausted_retries_dead_letter() {
        let mut sink = MockTransferSink::new();
        sink.expect_upsert()
            .times(3)
            .returning(|_| Err(StoreError::Transient("still down".into())));
        sink.expect_dead_letter().times(1).returning(|_, _| Ok(()));
        let mut graph = MockGraphSink::new();
        graph.expect_write_transfer().times(0);

        let pipeline = pipeline_with(sink, graph);
        pipeline.process(transfer()).await;
        assert_eq!(pipeline.counters().snapshot().dead_lettered, 1);
    }

    #[tokio::test]
    async fn fatal_error_dead_letters_without_retry() {
        let mut sink = MockTransferSink::new();
        sink.expect_upsert()
            .times(1)
            .returning(|_| Err(StoreError::Fatal("constraint violation".into())));
        sink.expect_dead_letter().times(1).returning(|_, _| Ok(()));

        let pipeline = pipeline_with(sink, MockGraphSink::new());
        pipeline.process(transfer()).await;
        assert_eq!(pipeline.counters().snapshot().dead_lettered, 1);
    }

    #[tokio::test]
    async fn graph_failure_never_gates_persistence() {
        let mut sink = MockTransferSink::new();
        sink.expect_upsert().times(1).returning(|_| Ok(true));
        let mut graph = MockGraphSink::new();
        graph
            .expect_write_transfer()
            .times(1)
            .returning(|_| Err(StoreError::Transient("neo4j down".into())));

        let pipeline = pipeline_with(sink, graph);
        pipeline.process(transfer()).await;
        let counters = pipeline.counters().snapshot();
        assert_eq!(counters.persisted, 1);
        assert_eq!(counters.graph_failures, 1);
    }

    #[tokio::test]
    async fn record_is_scored_before_persistence() {
        let mut sink = MockTransferSink::new();
        sink.expect_upsert()
            .times(1)
            .withf(|t| t.risk_score.is_some() && t.analyzed_at.is_some())
            .returning(|_| Ok(true));
        let mut graph = MockGraphSink::new();
        graph.expect_write_transfer().returning(|_| Ok(()));

        let pipeline = pipeline_with(sink, graph);
        pipeline.process(transfer()).await;
    }
}
