//! Fleet supervisor: builds observers from configuration, owns their
//! lifecycle and the periodic maintenance sweeps, and reports aggregate
//! status.
//!
//! The supervisor is the only owner of the observer registry; there are no
//! process-wide singletons. Every observer (and both sweeps) runs under a
//! child of the supervisor's cancellation token, so one `stop_all` (or the
//! process signal handler upstream) winds the whole fleet down within the
//! configured bound.

use alloy_primitives::Address;
use dashmap::DashMap;
use futures_util::future::join_all;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::chain::Chain;
use crate::config::{Config, EngineConfig, LimitsConfig, ObserverConfig};
use crate::correlate::Correlator;
use crate::observer::{BridgeObserver, ObserverState, ObserverTuning};
use crate::pipeline::{Pipeline, PipelineCountersSnapshot};
use crate::protocol::BridgeProtocol;
use crate::risk::RiskEngine;
use crate::rpc::{ChainClient, TimestampCache};
use crate::store::RelationalStore;
use crate::types::EvmAddress;

/// Why a configured observer was rejected at fleet construction.
#[derive(Debug, Clone, serde::Serialize)]
pub struct InvalidObserver {
    pub protocol: BridgeProtocol,
    pub chain: Chain,
    pub reason: String,
}

/// Outcome of `start_all`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct StartReport {
    pub running: usize,
    pub failed: usize,
    pub invalid: Vec<InvalidObserver>,
}

/// One observer's line in the status report.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ObserverStatus {
    pub protocol: BridgeProtocol,
    pub chain: Chain,
    pub contract: String,
    pub state: ObserverState,
    pub endpoint: Option<String>,
    pub processed: u64,
    pub decode_dropped: u64,
    pub decode_errors: u64,
}

/// Aggregate fleet status.
#[derive(Debug, Clone, serde::Serialize)]
pub struct FleetStatus {
    pub total_running: usize,
    pub total_failed: usize,
    pub by_observer: Vec<ObserverStatus>,
    #[serde(skip)]
    pub pipeline: Option<PipelineCountersSnapshot>,
}

struct RunningObserver {
    observer: Arc<BridgeObserver>,
    task: JoinHandle<()>,
}

struct ObserverSlot {
    config: ObserverConfig,
    contract: Address,
    runtime: tokio::sync::Mutex<Option<RunningObserver>>,
}

pub struct Supervisor {
    registry: DashMap<(BridgeProtocol, Chain), Arc<ObserverSlot>>,
    invalid: Vec<InvalidObserver>,
    pipeline: Arc<Pipeline>,
    timestamps: TimestampCache,
    limits: LimitsConfig,
    engine: EngineConfig,
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl Supervisor {
    /// Build the fleet from configuration. Invalid entries (malformed or
    /// zero contract address, duplicate tuple) are reported and skipped;
    /// they never affect sibling observers.
    pub fn new(config: &Config, pipeline: Arc<Pipeline>, cancel: CancellationToken) -> Self {
        let limits = config.limits().clone();
        let registry: DashMap<(BridgeProtocol, Chain), Arc<ObserverSlot>> = DashMap::new();
        let mut invalid = Vec::new();
        let timestamps = TimestampCache::new(limits.timestamp_cache_size);

        for entry in config.observers() {
            let key = (entry.protocol, entry.chain);
            let reject = |reason: String| InvalidObserver {
                protocol: entry.protocol,
                chain: entry.chain,
                reason,
            };

            let contract = match EvmAddress::from_str(&entry.contract_address) {
                Ok(address) => address,
                Err(error) => {
                    invalid.push(reject(error.to_string()));
                    continue;
                }
            };
            // Zero-address entries are placeholders for chains where the
            // real contract was unknown at config time: disabled, not
            // dialed.
            if contract.is_zero() {
                invalid.push(reject("zero contract address (disabled)".to_string()));
                continue;
            }
            if entry.endpoints().is_empty() {
                invalid.push(reject("no rpc endpoint configured".to_string()));
                continue;
            }
            if registry.contains_key(&key) {
                invalid.push(reject("duplicate (protocol, chain) tuple".to_string()));
                continue;
            }

            registry.insert(
                key,
                Arc::new(ObserverSlot {
                    config: entry.clone(),
                    contract: contract.0,
                    runtime: tokio::sync::Mutex::new(None),
                }),
            );
        }

        for entry in &invalid {
            tracing::warn!(
                protocol = %entry.protocol,
                chain = %entry.chain,
                reason = %entry.reason,
                "observer rejected"
            );
        }

        Self {
            registry,
            invalid,
            pipeline,
            timestamps,
            limits,
            engine: config.engine().clone(),
            cancel,
            tracker: TaskTracker::new(),
        }
    }

    fn tuning(&self) -> ObserverTuning {
        ObserverTuning {
            reconnect_base: Duration::from_secs(self.limits.reconnect_base_secs),
            reconnect_max_attempts: self.limits.reconnect_max_attempts,
            backfill_blocks: self.engine.backfill_blocks,
            poll_interval: self.limits.poll_interval(),
        }
    }

    async fn start_slot(&self, slot: &Arc<ObserverSlot>) -> bool {
        let mut runtime = slot.runtime.lock().await;
        if let Some(running) = runtime.as_ref() {
            let state = *running.observer.state().borrow();
            if state != ObserverState::Stopped && state != ObserverState::Failed {
                return true;
            }
        }

        let client = Arc::new(ChainClient::new(
            slot.config.chain,
            &slot.config.endpoints(),
            self.limits.rpc_timeout(),
            self.limits.log_chunk_blocks,
            self.timestamps.clone(),
        ));
        let observer = Arc::new(BridgeObserver::new(
            slot.config.protocol,
            slot.config.chain,
            slot.contract,
            client,
            Arc::clone(&self.pipeline),
            self.tuning(),
            self.cancel.child_token(),
        ));
        let task = self.tracker.spawn(Arc::clone(&observer).run());
        *runtime = Some(RunningObserver { observer, task });
        true
    }

    /// Start every configured observer concurrently.
    pub async fn start_all(&self) -> StartReport {
        let slots: Vec<_> = self
            .registry
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        let started = join_all(slots.iter().map(|slot| self.start_slot(slot))).await;
        let running = started.iter().filter(|ok| **ok).count();
        let report = StartReport {
            running,
            failed: (started.len() - running) + self.invalid.len(),
            invalid: self.invalid.clone(),
        };
        tracing::info!(
            running = report.running,
            failed = report.failed,
            "observer fleet started"
        );
        report
    }

    /// Start one observer. No-op if it is already running.
    pub async fn start(&self, protocol: BridgeProtocol, chain: Chain) -> bool {
        match self.registry.get(&(protocol, chain)) {
            Some(entry) => {
                let slot = Arc::clone(entry.value());
                drop(entry);
                self.start_slot(&slot).await
            }
            None => false,
        }
    }

    /// Stop one observer. Waits out the shutdown bound, then force-detaches.
    pub async fn stop(&self, protocol: BridgeProtocol, chain: Chain) -> bool {
        let Some(entry) = self.registry.get(&(protocol, chain)) else {
            return false;
        };
        let slot = Arc::clone(entry.value());
        drop(entry);

        let mut runtime = slot.runtime.lock().await;
        let Some(running) = runtime.take() else {
            return false;
        };
        running.observer.stop();
        if tokio::time::timeout(self.limits.shutdown_timeout(), running.task)
            .await
            .is_err()
        {
            tracing::warn!(%protocol, %chain, "observer did not stop in time, detaching");
        }
        true
    }

    /// Cooperative shutdown of the whole fleet: signal every observer, wait
    /// a bounded interval, force-detach the stragglers.
    pub async fn stop_all(&self) {
        self.cancel.cancel();
        self.tracker.close();
        if tokio::time::timeout(self.limits.shutdown_timeout(), self.tracker.wait())
            .await
            .is_err()
        {
            tracing::warn!("fleet did not drain within the shutdown bound; detaching");
        }
        for entry in self.registry.iter() {
            let slot = Arc::clone(entry.value());
            if let Ok(mut runtime) = slot.runtime.try_lock() {
                if let Some(running) = runtime.take() {
                    running.task.abort();
                }
            }
        }
        tracing::info!("observer fleet stopped");
    }

    /// Aggregate status: per-observer state plus fleet counters.
    pub async fn status(&self) -> FleetStatus {
        let slots: Vec<_> = self
            .registry
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        let mut by_observer = Vec::with_capacity(slots.len());
        for slot in slots {
            let runtime = slot.runtime.lock().await;
            let status = match runtime.as_ref() {
                Some(running) => {
                    let counters = running.observer.counters();
                    ObserverStatus {
                        protocol: slot.config.protocol,
                        chain: slot.config.chain,
                        contract: EvmAddress(slot.contract).to_lowercase_hex(),
                        state: *running.observer.state().borrow(),
                        endpoint: Some(running.observer.current_endpoint()),
                        processed: counters.processed.load(std::sync::atomic::Ordering::Relaxed),
                        decode_dropped: counters
                            .decode_dropped
                            .load(std::sync::atomic::Ordering::Relaxed),
                        decode_errors: counters
                            .decode_errors
                            .load(std::sync::atomic::Ordering::Relaxed),
                    }
                }
                None => ObserverStatus {
                    protocol: slot.config.protocol,
                    chain: slot.config.chain,
                    contract: EvmAddress(slot.contract).to_lowercase_hex(),
                    state: ObserverState::Init,
                    endpoint: None,
                    processed: 0,
                    decode_dropped: 0,
                    decode_errors: 0,
                },
            };
            by_observer.push(status);
        }

        let total_running = by_observer
            .iter()
            .filter(|s| {
                matches!(
                    s.state,
                    ObserverState::Connecting
                        | ObserverState::Listening
                        | ObserverState::Reconnecting
                )
            })
            .count();
        let total_failed = by_observer
            .iter()
            .filter(|s| s.state == ObserverState::Failed)
            .count()
            + self.invalid.len();

        FleetStatus {
            total_running,
            total_failed,
            by_observer,
            pipeline: Some(self.pipeline.counters().snapshot()),
        }
    }

    pub fn invalid_observers(&self) -> &[InvalidObserver] {
        &self.invalid
    }

    /// Spawn the periodic maintenance sweeps.
    ///
    /// Rescoring: re-run the risk engine over a bounded batch of recently
    /// updated rows. Correlation: retry late counterparts for stale PENDING
    /// rows, then flag long-unmatched ones with CORRELATION_TIMEOUT (status
    /// stays PENDING).
    pub fn spawn_maintenance(
        &self,
        store: RelationalStore,
        risk: RiskEngine,
        correlator: Correlator,
    ) {
        let engine = self.engine.clone();
        let cancel = self.cancel.child_token();

        {
            let store = store.clone();
            let cancel = cancel.clone();
            let interval = Duration::from_secs(engine.rescore_interval_secs);
            let batch = engine.rescore_batch_size;
            let window = engine.rescore_interval_secs;
            self.tracker.spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                ticker.tick().await;
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = ticker.tick() => {}
                    }
                    match store.recently_updated(window, batch).await {
                        Ok(transfers) => {
                            let count = transfers.len();
                            for transfer in transfers {
                                let assessment = risk.assess(&transfer).await;
                                if let Err(error) = crate::store::RiskWriteback::update_risk(
                                    &store,
                                    transfer.id,
                                    assessment.score,
                                    &assessment.flags,
                                    assessment.analyzed_at,
                                )
                                .await
                                {
                                    tracing::warn!(id = %transfer.id, %error, "rescore write failed");
                                }
                            }
                            tracing::debug!(count, "rescoring sweep complete");
                        }
                        Err(error) => {
                            tracing::warn!(%error, "rescoring sweep query failed");
                        }
                    }
                }
            });
        }

        {
            let cancel = cancel.clone();
            let interval = Duration::from_secs(engine.correlation_sweep_interval_secs);
            let stale_secs = engine.stale_pending_secs;
            let timeout_secs = engine.correlation_timeout_secs;
            let batch = engine.rescore_batch_size;
            self.tracker.spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                ticker.tick().await;
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = ticker.tick() => {}
                    }
                    match store.stale_pending(stale_secs, batch).await {
                        Ok(transfers) => {
                            let mut linked = 0usize;
                            for transfer in &transfers {
                                if let Ok(crate::correlate::CorrelationOutcome::Linked(_)) =
                                    correlator.correlate(transfer).await
                                {
                                    linked += 1;
                                }
                            }
                            tracing::debug!(
                                scanned = transfers.len(),
                                linked,
                                "correlation sweep complete"
                            );
                        }
                        Err(error) => {
                            tracing::warn!(%error, "correlation sweep query failed");
                        }
                    }
                    match store.flag_correlation_timeouts(timeout_secs).await {
                        Ok(flagged) if flagged > 0 => {
                            tracing::info!(flagged, "flagged long-unmatched transfers");
                        }
                        Ok(_) => {}
                        Err(error) => {
                            tracing::warn!(%error, "correlation timeout flagging failed");
                        }
                    }
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::risk::{MockActivityLookup, MockSanctionsLookup};
    use crate::store::{MockCorrelationStore, MockGraphSink, MockTransferSink};

    fn quiet_pipeline() -> Arc<Pipeline> {
        let mut sanctions = MockSanctionsLookup::new();
        sanctions.expect_active_entry().returning(|_| Ok(None));
        let mut activity = MockActivityLookup::new();
        activity.expect_transfer_count().returning(|_, _| Ok(0));
        let risk = RiskEngine::new(
            Arc::new(sanctions),
            Arc::new(activity),
            &EngineConfig::default(),
        );
        let mut correlation = MockCorrelationStore::new();
        correlation
            .expect_find_pending_counterparts()
            .returning(|_, _| Ok(vec![]));
        let correlator = Correlator::new(
            Arc::new(correlation),
            Arc::new(MockGraphSink::new()),
            1800,
        );
        let mut sink = MockTransferSink::new();
        sink.expect_upsert().returning(|_| Ok(true));
        let mut graph = MockGraphSink::new();
        graph.expect_write_transfer().returning(|_| Ok(()));
        Arc::new(Pipeline::new(risk, correlator, Arc::new(sink), Arc::new(graph), 5))
    }

    fn config(json: &str) -> Config {
        serde_json::from_str(json).unwrap()
    }

    #[tokio::test]
    async fn invalid_entries_are_skipped_without_affecting_siblings() {
        let config = config(
            r#"{
                "observers": [
                    {
                        "protocol": "stargate",
                        "chain": "ethereum",
                        "contract_address": "0x8731d54E9D02c286767d56ac03e8037C07e01e98",
                        "rpc_primary": "https://eth.example.com"
                    },
                    {
                        "protocol": "hop",
                        "chain": "polygon",
                        "contract_address": "0x0000000000000000000000000000000000000000",
                        "rpc_primary": "https://polygon.example.com"
                    },
                    {
                        "protocol": "synapse",
                        "chain": "bsc",
                        "contract_address": "not-an-address",
                        "rpc_primary": "https://bsc.example.com"
                    }
                ]
            }"#,
        );
        let supervisor =
            Supervisor::new(&config, quiet_pipeline(), CancellationToken::new());
        assert_eq!(supervisor.registry.len(), 1);
        assert_eq!(supervisor.invalid_observers().len(), 2);
        let reasons: Vec<_> = supervisor
            .invalid_observers()
            .iter()
            .map(|i| i.reason.as_str())
            .collect();
        assert!(reasons.iter().any(|r| r.contains("zero contract address")));
        assert!(reasons.iter().any(|r| r.contains("address")));
    }

    #[tokio::test]
    async fn duplicate_tuples_are_rejected() {
        let config = config(
            r#"{
                "observers": [
                    {
                        "protocol": "across",
                        "chain": "arbitrum",
                        "contract_address": "0xe35e9842fceaCA96570B734083f4a58e8F7C5f2A",
                        "rpc_primary": "https://arb.example.com"
                    },
                    {
                        "protocol": "across",
                        "chain": "arbitrum",
                        "contract_address": "0xe35e9842fceaCA96570B734083f4a58e8F7C5f2A",
                        "rpc_primary": "https://arb2.example.com"
                    }
                ]
            }"#,
        );
        let supervisor =
            Supervisor::new(&config, quiet_pipeline(), CancellationToken::new());
        assert_eq!(supervisor.registry.len(), 1);
        assert_eq!(supervisor.invalid_observers().len(), 1);
    }

    #[tokio::test]
    async fn status_before_start_reports_init() {
        let config = config(
            r#"{
                "observers": [{
                    "protocol": "multichain",
                    "chain": "fantom",
                    "contract_address": "0xb576C9403f39829565BD6051695E2AC7Ecf850E2",
                    "rpc_primary": "https://ftm.example.com"
                }]
            }"#,
        );
        let supervisor =
            Supervisor::new(&config, quiet_pipeline(), CancellationToken::new());
        let status = supervisor.status().await;
        assert_eq!(status.total_running, 0);
        assert_eq!(status.by_observer.len(), 1);
        assert_eq!(status.by_observer[0].state, ObserverState::Init);
        assert_eq!(status.by_observer[0].endpoint, None);
    }

    #[tokio::test]
    async fn start_unknown_observer_is_false() {
        let config = config(r#"{"observers": []}"#);
        let supervisor =
            Supervisor::new(&config, quiet_pipeline(), CancellationToken::new());
        assert!(!supervisor.start(BridgeProtocol::Hop, Chain::Base).await);
        assert!(!supervisor.stop(BridgeProtocol::Hop, Chain::Base).await);
    }
}
