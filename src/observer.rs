//! Bridge observer: one live tail per (protocol, chain, contract).
//!
//! Each observer owns its chain client and decoder binding and drives a
//! lifecycle state machine:
//!
//! ```text
//! INIT → CONNECTING → LISTENING ⇄ RECONNECTING → STOPPED | FAILED
//! ```
//!
//! Any transport error in LISTENING moves to RECONNECTING; reconnects use
//! exponential backoff from a fixed base with a bounded attempt count, and
//! FAILED is reached only when the attempts are exhausted. After a
//! reconnect the observer backfills the gap (bounded by the configured
//! catch-up window) before resuming the tail, so no event already produced
//! on the wire is lost. `stop()` is honored from every state.

use alloy_primitives::Address;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::chain::Chain;
use crate::decode::BridgeDecoder;
use crate::pipeline::Pipeline;
use crate::protocol::BridgeProtocol;
use crate::rpc::{ChainClient, ChainClientError};
use crate::timestamp::UnixTimestamp;
use crate::types::{CrossChainTransfer, TransferSide, TxHash, UNKNOWN_TOKEN_SYMBOL};

/// Observer lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ObserverState {
    Init,
    Connecting,
    Listening,
    Reconnecting,
    Stopped,
    Failed,
}

impl std::fmt::Display for ObserverState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ObserverState::Init => "INIT",
            ObserverState::Connecting => "CONNECTING",
            ObserverState::Listening => "LISTENING",
            ObserverState::Reconnecting => "RECONNECTING",
            ObserverState::Stopped => "STOPPED",
            ObserverState::Failed => "FAILED",
        };
        write!(f, "{s}")
    }
}

/// Per-observer counters, read by the status report.
#[derive(Debug, Default)]
pub struct ObserverCounters {
    pub processed: AtomicU64,
    pub decode_dropped: AtomicU64,
    pub decode_errors: AtomicU64,
}

/// Reconnect policy knobs, split out so tests can shrink the delays.
#[derive(Debug, Clone)]
pub struct ObserverTuning {
    pub reconnect_base: Duration,
    pub reconnect_max_attempts: u32,
    pub backfill_blocks: u64,
    pub poll_interval: Duration,
}

pub struct BridgeObserver {
    protocol: BridgeProtocol,
    chain: Chain,
    contract: Address,
    client: Arc<ChainClient>,
    decoder: &'static BridgeDecoder,
    pipeline: Arc<Pipeline>,
    tuning: ObserverTuning,
    state_tx: watch::Sender<ObserverState>,
    counters: Arc<ObserverCounters>,
    cancel: CancellationToken,
}

impl BridgeObserver {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        protocol: BridgeProtocol,
        chain: Chain,
        contract: Address,
        client: Arc<ChainClient>,
        pipeline: Arc<Pipeline>,
        tuning: ObserverTuning,
        cancel: CancellationToken,
    ) -> Self {
        let (state_tx, _) = watch::channel(ObserverState::Init);
        Self {
            protocol,
            chain,
            contract,
            client,
            decoder: BridgeDecoder::for_protocol(protocol),
            pipeline,
            tuning,
            state_tx,
            counters: Arc::new(ObserverCounters::default()),
            cancel,
        }
    }

    pub fn protocol(&self) -> BridgeProtocol {
        self.protocol
    }

    pub fn chain(&self) -> Chain {
        self.chain
    }

    pub fn contract(&self) -> Address {
        self.contract
    }

    pub fn state(&self) -> watch::Receiver<ObserverState> {
        self.state_tx.subscribe()
    }

    pub fn counters(&self) -> Arc<ObserverCounters> {
        Arc::clone(&self.counters)
    }

    pub fn current_endpoint(&self) -> String {
        self.client.current_endpoint().to_string()
    }

    /// Signal the observer to stop. Valid from any state; the run loop
    /// detaches its subscription and settles in STOPPED.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    fn set_state(&self, state: ObserverState) {
        let changed = *self.state_tx.borrow() != state;
        if changed {
            tracing::info!(
                protocol = %self.protocol,
                chain = %self.chain,
                %state,
                "observer state"
            );
        }
        let _ = self.state_tx.send(state);
    }

    /// Drive the observer until stopped or failed.
    pub async fn run(self: Arc<Self>) {
        let mut attempt: u32 = 0;
        let mut resume_from: Option<u64> = None;

        loop {
            if self.cancel.is_cancelled() {
                self.set_state(ObserverState::Stopped);
                return;
            }
            self.set_state(ObserverState::Connecting);

            let latest = match self.client.get_latest_block().await {
                Ok(latest) => latest,
                Err(error) => {
                    tracing::warn!(
                        protocol = %self.protocol,
                        chain = %self.chain,
                        %error,
                        "connect failed"
                    );
                    if !self.backoff(&mut attempt).await {
                        return;
                    }
                    continue;
                }
            };

            // Live tail from the head, or backfill a bounded window of the
            // gap after a reconnect.
            let from_block = match resume_from {
                Some(next) => next.max(latest.saturating_sub(self.tuning.backfill_blocks)),
                None => latest,
            };

            let stream_cancel = self.cancel.child_token();
            let mut stream = self.client.subscribe(
                self.contract,
                self.decoder.topics(),
                from_block,
                self.tuning.poll_interval,
                stream_cancel.clone(),
            );

            self.set_state(ObserverState::Listening);
            attempt = 0;

            let disconnect: Option<ChainClientError> = loop {
                tokio::select! {
                    _ = self.cancel.cancelled() => break None,
                    item = stream.recv() => match item {
                        Some(Ok(log)) => {
                            if let Some(block) = log.block_number {
                                resume_from = Some(block + 1);
                            }
                            self.handle_log(log).await;
                        }
                        Some(Err(error)) => break Some(error),
                        None => break None,
                    }
                }
            };
            stream_cancel.cancel();

            if self.cancel.is_cancelled() {
                self.set_state(ObserverState::Stopped);
                return;
            }
            if let Some(error) = disconnect {
                tracing::warn!(
                    protocol = %self.protocol,
                    chain = %self.chain,
                    %error,
                    "subscription terminated"
                );
            }
            if !self.backoff(&mut attempt).await {
                return;
            }
        }
    }

    /// Sleep out one reconnect delay. Returns `false` when attempts are
    /// exhausted (state moves to FAILED) or the observer was stopped.
    async fn backoff(&self, attempt: &mut u32) -> bool {
        *attempt += 1;
        if *attempt > self.tuning.reconnect_max_attempts {
            self.set_state(ObserverState::Failed);
            tracing::error!(
                protocol = %self.protocol,
                chain = %self.chain,
                attempts = *attempt - 1,
                "reconnect attempts exhausted"
            );
            return false;
        }
        self.set_state(ObserverState::Reconnecting);
        let delay = self.tuning.reconnect_base * 2u32.saturating_pow(*attempt - 1);
        tokio::select! {
            _ = self.cancel.cancelled() => {
                self.set_state(ObserverState::Stopped);
                false
            }
            _ = tokio::time::sleep(delay) => true,
        }
    }

    async fn handle_log(&self, log: alloy_rpc_types_eth::Log) {
        let decoded = match self.decoder.decode(&log) {
            Ok(Some(decoded)) => decoded,
            Ok(None) => {
                self.counters.decode_dropped.fetch_add(1, Ordering::Relaxed);
                return;
            }
            Err(error) => {
                self.counters.decode_errors.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    protocol = %self.protocol,
                    chain = %self.chain,
                    %error,
                    "decode failed, record dropped"
                );
                return;
            }
        };

        let (Some(tx_hash), Some(block_number)) = (log.transaction_hash, log.block_number)
        else {
            // Pending or malformed log envelope; nothing to persist.
            self.counters.decode_dropped.fetch_add(1, Ordering::Relaxed);
            return;
        };

        let timestamp = match self.client.get_block_timestamp(block_number).await {
            Ok(seconds) => UnixTimestamp(seconds),
            Err(error) => {
                tracing::warn!(
                    protocol = %self.protocol,
                    chain = %self.chain,
                    block = block_number,
                    %error,
                    "block timestamp unavailable, using wall clock"
                );
                UnixTimestamp::try_now().unwrap_or(UnixTimestamp(0))
            }
        };

        // Pin the observed chain to the event's side; the decoder's value
        // wins when the event itself names the chain.
        let (source_chain, destination_chain) = match decoded.side {
            TransferSide::Source => (
                decoded.source_chain.or(Some(self.chain)),
                decoded.destination_chain,
            ),
            TransferSide::Destination => (
                decoded.source_chain,
                decoded.destination_chain.or(Some(self.chain)),
            ),
        };

        let transfer = CrossChainTransfer {
            id: Uuid::new_v4(),
            protocol: self.protocol,
            source_chain,
            destination_chain,
            source_address: decoded.source_address,
            destination_address: decoded.destination_address,
            token_address: decoded.token_address,
            token_symbol: UNKNOWN_TOKEN_SYMBOL.to_string(),
            amount: decoded.amount,
            transaction_hash: TxHash(tx_hash),
            block_number,
            timestamp,
            event_type: decoded.event_type.to_string(),
            status: decoded.status,
            linked_transfer_id: None,
            risk_score: None,
            risk_flags: vec![],
            analyzed_at: None,
            metadata: decoded.metadata,
        };

        tracing::info!(
            protocol = %transfer.protocol,
            chain = %self.chain,
            event = %transfer.event_type,
            tx = %transfer.transaction_hash,
            block = transfer.block_number,
            amount = %transfer.amount,
            source = ?transfer.source_address,
            destination = ?transfer.destination_address,
            "bridge event observed"
        );
        self.counters.processed.fetch_add(1, Ordering::Relaxed);
        self.pipeline.process(transfer).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::correlate::Correlator;
    use crate::risk::{MockActivityLookup, MockSanctionsLookup, RiskEngine};
    use crate::rpc::ChainClient;
    use crate::store::{MockCorrelationStore, MockGraphSink, MockTransferSink};
    use alloy_primitives::U64;
    use alloy_rpc_client::RpcClient;
    use alloy_transport::mock::{Asserter, MockTransport};

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
        Arc::new(Pipeline::new(
            risk,
            correlator,
            Arc::new(sink),
            Arc::new(graph),
            5,
        ))
    }

    fn tuning() -> ObserverTuning {
        ObserverTuning {
            reconnect_base: Duration::from_millis(1),
            reconnect_max_attempts: 2,
            backfill_blocks: 100,
            poll_interval: Duration::from_millis(5),
        }
    }

    fn observer_with(clients: Vec<(String, RpcClient)>) -> Arc<BridgeObserver> {
        let client = Arc::new(ChainClient::from_clients(
            Chain::Ethereum,
            clients,
            Duration::from_millis(200),
            500,
        ));
        Arc::new(BridgeObserver::new(
            BridgeProtocol::Stargate,
            Chain::Ethereum,
            Address::ZERO,
            client,
            quiet_pipeline(),
            tuning(),
            CancellationToken::new(),
        ))
    }

    fn mocked(asserter: &Asserter, name: &str) -> (String, RpcClient) {
        (
            name.to_string(),
            RpcClient::new(MockTransport::new(asserter.clone()), false),
        )
    }

    #[tokio::test]
    async fn exhausted_reconnects_end_in_failed() {
        // Every endpoint always errors; connect never succeeds.
        let observer = observer_with(vec![mocked(&Asserter::new(), "only")]);
        Arc::clone(&observer).run().await;
        assert_eq!(*observer.state().borrow(), ObserverState::Failed);
    }

    #[tokio::test]
    async fn reaches_listening_via_fallback_endpoint() {
        // Primary always fails; the fallback serves the connect call and
        // the tail's polls. The observer must get to LISTENING without
        // passing through FAILED.
        let primary = Asserter::new();
        let fallback = Asserter::new();
        for _ in 0..50 {
            fallback.push_success(&U64::from(100u64));
        }
        let observer = observer_with(vec![
            mocked(&primary, "primary"),
            mocked(&fallback, "fallback"),
        ]);
        let mut state = observer.state();
        let task = tokio::spawn(Arc::clone(&observer).run());

        let listening = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                state.changed().await.expect("observer alive");
                let current = *state.borrow_and_update();
                assert_ne!(current, ObserverState::Failed);
                if current == ObserverState::Listening {
                    break;
                }
            }
        })
        .await;
        assert!(listening.is_ok(), "observer never reached LISTENING");
        assert_eq!(observer.current_endpoint(), "fallback");

        observer.stop();
        task.await.unwrap();
        assert_eq!(*observer.state().borrow(), ObserverState::Stopped);
    }

    #[tokio::test]
    async fn stop_during_reconnect_settles_in_stopped() {
        let observer = {
            let client = Arc::new(ChainClient::from_clients(
                Chain::Ethereum,
                vec![mocked(&Asserter::new(), "only")],
                Duration::from_millis(200),
                500,
            ));
            Arc::new(BridgeObserver::new(
                BridgeProtocol::Hop,
                Chain::Ethereum,
                Address::ZERO,
                client,
                quiet_pipeline(),
                ObserverTuning {
                    reconnect_base: Duration::from_secs(3600),
                    reconnect_max_attempts: 5,
                    backfill_blocks: 100,
                    poll_interval: Duration::from_millis(5),
                },
                CancellationToken::new(),
            ))
        };
        let task = tokio::spawn(Arc::clone(&observer).run());
        // Let it fail the first connect and enter the long backoff sleep.
        tokio::time::sleep(Duration::from_millis(300)).await;
        observer.stop();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("stop returns promptly")
            .unwrap();
        assert_eq!(*observer.state().borrow(), ObserverState::Stopped);
    }
}
