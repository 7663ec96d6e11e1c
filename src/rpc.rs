//! Chain client: a resilient read-only view over an EVM JSON-RPC endpoint
//! set.
//!
//! Each observer owns one [`ChainClient`] built from a primary URL plus an
//! ordered list of fallbacks. Endpoint-level failures (timeouts, transport
//! resets, 5xx) advance an internal cursor so subsequent calls use the next
//! endpoint; a scheduled health probe is the only thing that moves the
//! cursor back to the primary, so a single good response does not flap the
//! selection. Malformed responses and auth rejections are fatal and never
//! rotate.

use alloy_primitives::{Address, B256, Bytes, U64, U256};
use alloy_rpc_client::RpcClient;
use alloy_rpc_types_eth::{Block, BlockNumberOrTag, Filter, Log};
use alloy_transport::{RpcError, TransportErrorKind};
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::chain::Chain;

/// Floor for the adaptive `eth_getLogs` chunk.
const MIN_CHUNK_BLOCKS: u64 = 1;

/// Errors surfaced by the chain client.
#[derive(Debug, thiserror::Error)]
pub enum ChainClientError {
    /// Timeout, 5xx, or transport reset. Retryable; rotates endpoints.
    #[error("transient rpc error on {endpoint}: {message}")]
    Transient { endpoint: String, message: String },
    /// Auth rejection or malformed response. Not retryable; surfaces to the
    /// observer without endpoint rotation.
    #[error("fatal rpc error on {endpoint}: {message}")]
    Fatal { endpoint: String, message: String },
}

impl ChainClientError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ChainClientError::Transient { .. })
    }
}

/// How a raw transport error should be treated.
enum ErrorClass {
    Transient,
    Fatal,
    /// Provider rejected the range as too large; halve the chunk and retry.
    Oversized,
}

fn classify(error: &RpcError<TransportErrorKind>) -> ErrorClass {
    match error {
        RpcError::Transport(_) => ErrorClass::Transient,
        RpcError::ErrorResp(payload) => {
            let message = payload.message.to_lowercase();
            if message.contains("too large")
                || message.contains("too many")
                || message.contains("exceed")
                || message.contains("limit")
                || payload.code == -32005
            {
                ErrorClass::Oversized
            } else if payload.code == -32603 || message.contains("timeout") {
                ErrorClass::Transient
            } else {
                ErrorClass::Fatal
            }
        }
        // NullResp, SerError/DeserError (malformed response), unsupported
        // features and local usage errors: retrying will not help.
        _ => ErrorClass::Fatal,
    }
}

/// Process-wide LRU cache of block timestamps, keyed by (chain, block).
#[derive(Clone)]
pub struct TimestampCache {
    inner: Arc<Mutex<LruCache<(Chain, u64), u64>>>,
}

impl TimestampCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("max(1) is non-zero");
        Self {
            inner: Arc::new(Mutex::new(LruCache::new(capacity))),
        }
    }

    async fn get(&self, chain: Chain, block: u64) -> Option<u64> {
        self.inner.lock().await.get(&(chain, block)).copied()
    }

    async fn put(&self, chain: Chain, block: u64, timestamp: u64) {
        self.inner.lock().await.put((chain, block), timestamp);
    }
}

struct Endpoint {
    name: String,
    client: RpcClient,
}

/// A read-only EVM JSON-RPC client with resilient endpoint selection.
pub struct ChainClient {
    chain: Chain,
    endpoints: Vec<Endpoint>,
    cursor: AtomicUsize,
    chunk: AtomicU64,
    timeout: Duration,
    timestamps: TimestampCache,
}

impl ChainClient {
    /// Build a client from endpoint URLs in selection order (primary
    /// first). `urls` must be non-empty.
    pub fn new(
        chain: Chain,
        urls: &[Url],
        timeout: Duration,
        chunk_blocks: u64,
        timestamps: TimestampCache,
    ) -> Self {
        debug_assert!(!urls.is_empty());
        let endpoints = urls
            .iter()
            .map(|url| Endpoint {
                name: url.to_string(),
                client: RpcClient::new_http(url.clone()),
            })
            .collect();
        Self {
            chain,
            endpoints,
            cursor: AtomicUsize::new(0),
            chunk: AtomicU64::new(chunk_blocks.max(MIN_CHUNK_BLOCKS)),
            timeout,
            timestamps,
        }
    }

    /// Test constructor over pre-built transports.
    #[cfg(test)]
    pub(crate) fn from_clients(
        chain: Chain,
        clients: Vec<(String, RpcClient)>,
        timeout: Duration,
        chunk_blocks: u64,
    ) -> Self {
        Self {
            chain,
            endpoints: clients
                .into_iter()
                .map(|(name, client)| Endpoint { name, client })
                .collect(),
            cursor: AtomicUsize::new(0),
            chunk: AtomicU64::new(chunk_blocks.max(MIN_CHUNK_BLOCKS)),
            timeout,
            timestamps: TimestampCache::new(64),
        }
    }

    pub fn chain(&self) -> Chain {
        self.chain
    }

    /// The endpoint subsequent calls will use.
    pub fn current_endpoint(&self) -> &str {
        &self.endpoints[self.cursor.load(Ordering::Relaxed) % self.endpoints.len()].name
    }

    /// Probe the primary endpoint; on success, reset the cursor to it.
    ///
    /// This is the only path that moves selection back toward the primary.
    pub async fn probe_primary(&self) {
        if self.cursor.load(Ordering::Relaxed) == 0 {
            return;
        }
        let primary = &self.endpoints[0];
        let probe = async { primary.client.request_noparams::<U64>("eth_blockNumber").await };
        if tokio::time::timeout(self.timeout, probe).await.is_ok_and(|r| r.is_ok()) {
            tracing::debug!(chain = %self.chain, endpoint = %primary.name, "primary endpoint healthy again");
            self.cursor.store(0, Ordering::Relaxed);
        }
    }

    /// Run `request` against the current endpoint, rotating on transient
    /// failure until every endpoint has been tried once.
    async fn with_rotation<T, F, Fut>(&self, request: F) -> Result<T, ChainClientError>
    where
        F: Fn(RpcClient) -> Fut,
        Fut: Future<Output = Result<T, RpcError<TransportErrorKind>>>,
    {
        let total = self.endpoints.len();
        let mut last_transient: Option<ChainClientError> = None;
        for _ in 0..total {
            let index = self.cursor.load(Ordering::Relaxed) % total;
            let endpoint = &self.endpoints[index];
            let call = request(endpoint.client.clone());
            let outcome = match tokio::time::timeout(self.timeout, call).await {
                Ok(result) => result,
                Err(_elapsed) => {
                    tracing::warn!(chain = %self.chain, endpoint = %endpoint.name, "rpc call timed out");
                    self.advance(index);
                    last_transient = Some(ChainClientError::Transient {
                        endpoint: endpoint.name.clone(),
                        message: "deadline exceeded".to_string(),
                    });
                    continue;
                }
            };
            match outcome {
                Ok(value) => return Ok(value),
                Err(error) => match classify(&error) {
                    ErrorClass::Transient => {
                        tracing::warn!(
                            chain = %self.chain,
                            endpoint = %endpoint.name,
                            %error,
                            "transient rpc error, rotating endpoint"
                        );
                        self.advance(index);
                        last_transient = Some(ChainClientError::Transient {
                            endpoint: endpoint.name.clone(),
                            message: error.to_string(),
                        });
                    }
                    ErrorClass::Oversized | ErrorClass::Fatal => {
                        return Err(ChainClientError::Fatal {
                            endpoint: endpoint.name.clone(),
                            message: error.to_string(),
                        });
                    }
                },
            }
        }
        Err(last_transient.unwrap_or(ChainClientError::Transient {
            endpoint: self.current_endpoint().to_string(),
            message: "no endpoint reachable".to_string(),
        }))
    }

    fn advance(&self, observed: usize) {
        let total = self.endpoints.len();
        // Only advance if nobody else already moved past the failed index.
        let _ = self.cursor.compare_exchange(
            observed,
            (observed + 1) % total,
            Ordering::Relaxed,
            Ordering::Relaxed,
        );
    }

    pub async fn get_latest_block(&self) -> Result<u64, ChainClientError> {
        let number = self
            .with_rotation(|client| async move {
                client.request_noparams::<U64>("eth_blockNumber").await
            })
            .await?;
        Ok(number.to::<u64>())
    }

    /// Block timestamp in UTC seconds, served from the process-wide cache
    /// when possible.
    pub async fn get_block_timestamp(&self, block_number: u64) -> Result<u64, ChainClientError> {
        if let Some(timestamp) = self.timestamps.get(self.chain, block_number).await {
            return Ok(timestamp);
        }
        let block = self
            .with_rotation(|client| async move {
                client
                    .request::<_, Option<Block>>(
                        "eth_getBlockByNumber",
                        (BlockNumberOrTag::Number(block_number), false),
                    )
                    .await
            })
            .await?;
        let block = block.ok_or_else(|| ChainClientError::Fatal {
            endpoint: self.current_endpoint().to_string(),
            message: format!("block {block_number} not found"),
        })?;
        let timestamp = block.header.inner.timestamp;
        self.timestamps.put(self.chain, block_number, timestamp).await;
        Ok(timestamp)
    }

    /// Finite log history over `[from_block, to_block]`, chunked to stay
    /// under provider per-request limits. The chunk starts at the
    /// configured size and is halved (persistently) whenever a provider
    /// rejects a range as too large.
    pub async fn get_logs(
        &self,
        contract: Address,
        topics: &[B256],
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<Log>, ChainClientError> {
        let mut out = Vec::new();
        let mut cursor = from_block;
        while cursor <= to_block {
            let chunk = self.chunk.load(Ordering::Relaxed);
            let end = to_block.min(cursor.saturating_add(chunk - 1));
            match self.get_logs_range(contract, topics, cursor, end).await {
                Ok(mut logs) => {
                    out.append(&mut logs);
                    cursor = end + 1;
                }
                Err(RangeError::Oversized) if chunk > MIN_CHUNK_BLOCKS => {
                    let halved = (chunk / 2).max(MIN_CHUNK_BLOCKS);
                    self.chunk.store(halved, Ordering::Relaxed);
                    tracing::debug!(
                        chain = %self.chain,
                        from = cursor,
                        chunk = halved,
                        "provider rejected log range, halving chunk"
                    );
                }
                Err(RangeError::Oversized) => {
                    return Err(ChainClientError::Fatal {
                        endpoint: self.current_endpoint().to_string(),
                        message: "single-block log range still too large".to_string(),
                    });
                }
                Err(RangeError::Client(error)) => return Err(error),
            }
        }
        Ok(out)
    }

    async fn get_logs_range(
        &self,
        contract: Address,
        topics: &[B256],
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<Log>, RangeError> {
        let filter = Filter::new()
            .address(contract)
            .event_signature(topics.to_vec())
            .from_block(from_block)
            .to_block(to_block);
        let total = self.endpoints.len();
        let mut last_transient: Option<ChainClientError> = None;
        for _ in 0..total {
            let index = self.cursor.load(Ordering::Relaxed) % total;
            let endpoint = &self.endpoints[index];
            let filter = filter.clone();
            let call = async {
                endpoint
                    .client
                    .request::<_, Vec<Log>>("eth_getLogs", (filter,))
                    .await
            };
            let outcome = match tokio::time::timeout(self.timeout, call).await {
                Ok(result) => result,
                Err(_elapsed) => {
                    self.advance(index);
                    last_transient = Some(ChainClientError::Transient {
                        endpoint: endpoint.name.clone(),
                        message: "deadline exceeded".to_string(),
                    });
                    continue;
                }
            };
            match outcome {
                Ok(logs) => return Ok(logs),
                Err(error) => match classify(&error) {
                    ErrorClass::Oversized => return Err(RangeError::Oversized),
                    ErrorClass::Transient => {
                        self.advance(index);
                        last_transient = Some(ChainClientError::Transient {
                            endpoint: endpoint.name.clone(),
                            message: error.to_string(),
                        });
                    }
                    ErrorClass::Fatal => {
                        return Err(RangeError::Client(ChainClientError::Fatal {
                            endpoint: endpoint.name.clone(),
                            message: error.to_string(),
                        }));
                    }
                },
            }
        }
        Err(RangeError::Client(last_transient.unwrap_or(
            ChainClientError::Transient {
                endpoint: self.current_endpoint().to_string(),
                message: "no endpoint reachable".to_string(),
            },
        )))
    }

    /// Live tail: polls for new logs from `from_block` onward and yields
    /// them in chain order. The stream terminates (channel closes) on the
    /// first unrecovered transport error; the final error is delivered
    /// in-band so the observer can drive its reconnect state machine.
    pub fn subscribe(
        self: &Arc<Self>,
        contract: Address,
        topics: Vec<B256>,
        from_block: u64,
        poll_interval: Duration,
        cancel: CancellationToken,
    ) -> mpsc::Receiver<Result<Log, ChainClientError>> {
        let (tx, rx) = mpsc::channel(256);
        let client = Arc::clone(self);
        tokio::spawn(async move {
            let mut next_from = from_block;
            let mut ticker = tokio::time::interval(poll_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // Probe the primary every so many ticks so a rotated client
            // drifts back once the primary recovers.
            let mut ticks_until_probe: u32 = PROBE_EVERY_TICKS;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                if ticks_until_probe == 0 {
                    client.probe_primary().await;
                    ticks_until_probe = PROBE_EVERY_TICKS;
                } else {
                    ticks_until_probe -= 1;
                }
                let latest = match client.get_latest_block().await {
                    Ok(latest) => latest,
                    Err(error) => {
                        let _ = tx.send(Err(error)).await;
                        break;
                    }
                };
                if latest < next_from {
                    continue;
                }
                match client.get_logs(contract, &topics, next_from, latest).await {
                    Ok(logs) => {
                        for log in logs {
                            if tx.send(Ok(log)).await.is_err() {
                                return;
                            }
                        }
                        next_from = latest + 1;
                    }
                    Err(error) => {
                        let _ = tx.send(Err(error)).await;
                        break;
                    }
                }
            }
        });
        rx
    }

    /// Deployed bytecode at `address` (`eth_getCode`, latest block).
    pub async fn get_code(&self, address: Address) -> Result<Bytes, ChainClientError> {
        self.with_rotation(|client| async move {
            client
                .request::<_, Bytes>("eth_getCode", (address, "latest"))
                .await
        })
        .await
    }

    /// Native balance at `address` (`eth_getBalance`, latest block).
    pub async fn get_balance(&self, address: Address) -> Result<U256, ChainClientError> {
        self.with_rotation(|client| async move {
            client
                .request::<_, U256>("eth_getBalance", (address, "latest"))
                .await
        })
        .await
    }

    /// Current gas price (`eth_gasPrice`).
    pub async fn get_gas_price(&self) -> Result<U256, ChainClientError> {
        self.with_rotation(
            |client| async move { client.request_noparams::<U256>("eth_gasPrice").await },
        )
        .await
    }
}

const PROBE_EVERY_TICKS: u32 = 12;

enum RangeError {
    Oversized,
    Client(ChainClientError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_transport::mock::{Asserter, MockTransport};

    fn mocked(asserter: &Asserter, name: &str) -> (String, RpcClient) {
        let transport = MockTransport::new(asserter.clone());
        (name.to_string(), RpcClient::new(transport, false))
    }

    #[tokio::test]
    async fn rotates_to_fallback_on_transport_error() {
        // Primary has no queued responses: every request fails with a
        // transport error, which is transient.
        let primary = Asserter::new();
        let fallback = Asserter::new();
        fallback.push_success(&U64::from(1234u64));

        let client = ChainClient::from_clients(
            Chain::Ethereum,
            vec![mocked(&primary, "primary"), mocked(&fallback, "fallback")],
            Duration::from_secs(5),
            500,
        );

        let latest = client.get_latest_block().await.unwrap();
        assert_eq!(latest, 1234);
        assert_eq!(client.current_endpoint(), "fallback");
    }

    #[tokio::test]
    async fn reports_transient_when_all_endpoints_fail() {
        let a = Asserter::new();
        let b = Asserter::new();
        let client = ChainClient::from_clients(
            Chain::Polygon,
            vec![mocked(&a, "a"), mocked(&b, "b")],
            Duration::from_secs(5),
            500,
        );
        let error = client.get_latest_block().await.unwrap_err();
        assert!(error.is_transient());
    }

    #[tokio::test]
    async fn probe_primary_resets_cursor() {
        let primary = Asserter::new();
        let fallback = Asserter::new();
        fallback.push_success(&U64::from(1u64));
        let client = ChainClient::from_clients(
            Chain::Base,
            vec![mocked(&primary, "primary"), mocked(&fallback, "fallback")],
            Duration::from_secs(5),
            500,
        );
        client.get_latest_block().await.unwrap();
        assert_eq!(client.current_endpoint(), "fallback");

        // A successful call does not flap back; only the probe does.
        primary.push_success(&U64::from(2u64));
        client.probe_primary().await;
        assert_eq!(client.current_endpoint(), "primary");
    }

    #[tokio::test]
    async fn timestamp_cache_avoids_second_fetch() {
        let asserter = Asserter::new();
        let block = serde_json::json!({
            "hash": "0x9b83c12c69edb74f6c8dd5d052765c1adf940e320bd1291696e6fa07829eee71",
            "parentHash": "0x9b83c12c69edb74f6c8dd5d052765c1adf940e320bd1291696e6fa07829eee72",
            "sha3Uncles": "0x0000000000000000000000000000000000000000000000000000000000000000",
            "miner": "0x0000000000000000000000000000000000000000",
            "stateRoot": "0x0000000000000000000000000000000000000000000000000000000000000000",
            "transactionsRoot": "0x0000000000000000000000000000000000000000000000000000000000000000",
            "receiptsRoot": "0x0000000000000000000000000000000000000000000000000000000000000000",
            "logsBloom": format!("0x{}", "00".repeat(256)),
            "difficulty": "0x0",
            "number": "0x3e8",
            "gasLimit": "0x0",
            "gasUsed": "0x0",
            "timestamp": "0x64000000",
            "extraData": "0x",
            "mixHash": "0x0000000000000000000000000000000000000000000000000000000000000000",
            "nonce": "0x0000000000000000",
            "size": "0x0",
            "transactions": [],
            "uncles": []
        });
        asserter.push_success(&block);
        let client = ChainClient::from_clients(
            Chain::Ethereum,
            vec![mocked(&asserter, "only")],
            Duration::from_secs(5),
            500,
        );
        let first = client.get_block_timestamp(1000).await.unwrap();
        assert_eq!(first, 0x64000000);
        // Second call must hit the cache; the asserter queue is empty, so a
        // real fetch would error.
        let second = client.get_block_timestamp(1000).await.unwrap();
        assert_eq!(second, first);
    }

    #[test]
    fn chunking_math_never_exceeds_limit() {
        // get_logs walks [from, to] in chunk-sized windows.
        let chunk: u64 = 500;
        let from: u64 = 1000;
        let to: u64 = 2600;
        let mut cursor = from;
        let mut windows = Vec::new();
        while cursor <= to {
            let end = to.min(cursor + chunk - 1);
            windows.push((cursor, end));
            cursor = end + 1;
        }
        assert_eq!(windows, vec![(1000, 1499), (1500, 1999), (2000, 2499), (2500, 2600)]);
        assert!(windows.iter().all(|(a, b)| b - a + 1 <= chunk));
    }
}
