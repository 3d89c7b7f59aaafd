//! The pipeline driver: one planning cycle at a time.
//!
//! ```text
//! head ─► RangePlanner ─► Fetcher ─► FinalityGate ─► decode ─► BatchCommitter
//!   ▲                                                              │
//!   └──────────────────────── new cursor ◄─────────────────────────┘
//! ```
//!
//! Each cycle either commits one batch, finds nothing final to do, or
//! fails. Retryable failures are retried on the next cycle; fatal ones
//! halt the pipeline.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::checkpoint::CheckpointStore;
use crate::committer::{BatchCommitter, CommitResult, FinalBatch};
use crate::config::{PipelineConfig, TruncatedPolicy};
use crate::decode::{decode, RuleRegistry};
use crate::error::IngestError;
use crate::fetcher::Fetcher;
use crate::finality::FinalityGate;
use crate::handler::BatchHandler;
use crate::planner::RangePlanner;
use crate::types::LogFilter;

/// Result of a single [`Pipeline::step`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// Nothing was committed this cycle.
    Idle,
    Committed(CommitResult),
    /// A bounded backfill has delivered its end height.
    Finished,
}

/// Runtime state of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PipelineState {
    /// Not yet resumed.
    Idle,
    /// More final blocks are available than one batch holds.
    CatchingUp,
    /// At the finality horizon, waiting for the head to move.
    Following,
    /// Finished or cancelled.
    Stopped,
    /// Halted on an unrecoverable error.
    Failed,
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::CatchingUp => write!(f, "catching-up"),
            Self::Following => write!(f, "following"),
            Self::Stopped => write!(f, "stopped"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Counters accumulated over the pipeline's lifetime.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineStats {
    pub batches_committed: u64,
    pub events_delivered: u64,
    pub logs_skipped: u64,
    pub logs_unmatched: u64,
    pub truncated_fetches: u64,
    pub cycle_failures: u64,
}

/// An ingestion pipeline for one stream.
pub struct Pipeline<E, S, H> {
    config: PipelineConfig,
    fetcher: Fetcher,
    planner: RangePlanner,
    gate: FinalityGate,
    registry: RuleRegistry<E>,
    filter: LogFilter,
    committer: BatchCommitter<S>,
    handler: H,
    stats: PipelineStats,
    state: PipelineState,
}

impl<E, S, H> Pipeline<E, S, H>
where
    E: Send + Sync,
    S: CheckpointStore,
    H: BatchHandler<E>,
{
    pub(crate) fn new(
        config: PipelineConfig,
        fetcher: Fetcher,
        registry: RuleRegistry<E>,
        store: Arc<S>,
        handler: H,
    ) -> Self {
        let planner = RangePlanner::new(config.confirmation_depth, config.max_batch_size)
            .with_end_height(config.end_height);
        let gate = FinalityGate::new(config.confirmation_depth, config.window_size);
        let committer = BatchCommitter::new(
            store,
            config.chain.as_str(),
            config.stream_id.as_str(),
            config.start_height,
        )
        .with_handler_timeout(config.handler_timeout);
        let filter = registry.log_filter();
        Self {
            config,
            fetcher,
            planner,
            gate,
            registry,
            filter,
            committer,
            handler,
            stats: PipelineStats::default(),
            state: PipelineState::Idle,
        }
    }

    /// The committed cursor (next height to fetch).
    pub fn cursor(&self) -> u64 {
        self.committer.cursor()
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// The server-side filter derived from the registered rules.
    pub fn filter(&self) -> &LogFilter {
        &self.filter
    }

    /// Load the checkpoint and seed the finality gate with the last
    /// committed block. Returns the cursor to resume from.
    pub async fn resume(&mut self) -> Result<u64, IngestError> {
        match self.committer.resume(self.config.start_height).await? {
            Some(cp) => {
                tracing::info!(
                    chain = %self.config.chain,
                    stream = %self.config.stream_id,
                    cursor = cp.cursor,
                    hash = %cp.block_hash,
                    "Resuming from checkpoint"
                );
                if let Some(last) = cp.last_block() {
                    self.gate.seed(last);
                }
                // the cursor was planned below the horizon of a head at least this high
                self.gate
                    .observe_head(cp.cursor.saturating_add(self.config.confirmation_depth));
            }
            None => tracing::info!(
                chain = %self.config.chain,
                stream = %self.config.stream_id,
                start = self.config.start_height,
                "No checkpoint — starting fresh"
            ),
        }
        if self.state == PipelineState::Idle {
            self.state = PipelineState::CatchingUp;
        }
        Ok(self.cursor())
    }

    /// Run one cycle: head → plan → fetch → gate → decode → commit.
    pub async fn step(&mut self) -> Result<StepOutcome, IngestError> {
        if self.state == PipelineState::Idle {
            self.resume().await?;
        }

        let cursor = self.cursor();
        if self.planner.is_finished(cursor) {
            self.state = PipelineState::Stopped;
            return Ok(StepOutcome::Finished);
        }

        // a lagging source must not pull the horizon back below what was already seen
        let head = self.fetcher.chain_head().await?.max(self.gate.head());
        let Some(range) = self.planner.next_range(cursor, head)? else {
            self.state = PipelineState::Following;
            return Ok(StepOutcome::Idle);
        };

        let fetched = self.fetcher.fetch(range, &self.filter).await?;
        if fetched.truncated {
            self.stats.truncated_fetches += 1;
            if self.config.truncated == TruncatedPolicy::Discard {
                tracing::warn!(range = %range, covered = %fetched.covered(), "discarding truncated range");
                return Ok(StepOutcome::Idle);
            }
        }
        if fetched.blocks.is_empty() {
            return Ok(StepOutcome::Idle);
        }

        let gated = self.gate.admit(fetched.blocks, head)?;
        if gated.final_blocks.is_empty() {
            return Ok(StepOutcome::Idle);
        }

        let logs = gated.final_blocks.iter().flat_map(|b| b.logs.iter());
        let decoded = decode(logs, &self.registry, self.config.decode_errors)?;
        self.stats.logs_skipped += decoded.skipped.len() as u64;
        self.stats.logs_unmatched += decoded.unmatched as u64;

        let batch = FinalBatch::new(&gated.final_blocks, decoded.events, head)?;
        let result = self.committer.commit(batch, &self.handler).await?;

        self.gate.prune_below(result.cursor);
        self.stats.batches_committed += 1;
        self.stats.events_delivered += result.events as u64;
        self.state = if result.cursor < self.planner.safe_height(head) {
            PipelineState::CatchingUp
        } else {
            PipelineState::Following
        };
        Ok(StepOutcome::Committed(result))
    }

    /// Run cycles until `cancel` fires, a bounded backfill finishes, or a
    /// fatal error occurs.
    ///
    /// Cancellation is checked between cycles; a cycle in progress always
    /// runs to completion (its commit either lands or rolls back).
    pub async fn run(&mut self, cancel: CancellationToken) -> Result<PipelineStats, IngestError> {
        if self.state == PipelineState::Idle {
            self.resume().await?;
        }
        let mut consecutive_failures = 0u32;

        loop {
            if cancel.is_cancelled() {
                tracing::info!(cursor = self.cursor(), "Pipeline cancelled");
                self.state = PipelineState::Stopped;
                return Ok(self.stats.clone());
            }

            let pause = match self.step().await {
                Ok(StepOutcome::Committed(_)) => {
                    consecutive_failures = 0;
                    continue;
                }
                Ok(StepOutcome::Idle) => {
                    consecutive_failures = 0;
                    self.config.poll_interval
                }
                Ok(StepOutcome::Finished) => {
                    tracing::info!(cursor = self.cursor(), "Backfill complete");
                    return Ok(self.stats.clone());
                }
                Err(e) if e.is_fatal() => {
                    tracing::error!(error = %e, cursor = self.cursor(), "Pipeline halted");
                    self.state = PipelineState::Failed;
                    return Err(e);
                }
                Err(e) => {
                    consecutive_failures += 1;
                    self.stats.cycle_failures += 1;
                    tracing::warn!(
                        error = %e,
                        attempt = consecutive_failures,
                        max = self.config.max_cycle_failures,
                        cursor = self.cursor(),
                        "Cycle failed — retrying"
                    );
                    if consecutive_failures >= self.config.max_cycle_failures {
                        self.state = PipelineState::Failed;
                        return Err(IngestError::Aborted {
                            reason: format!("{consecutive_failures} consecutive failed cycles, last: {e}"),
                        });
                    }
                    self.config.poll_interval
                }
            };

            sleep_or_cancel(pause, &cancel).await;
        }
    }
}

async fn sleep_or_cancel(pause: Duration, cancel: &CancellationToken) {
    tokio::select! {
        _ = tokio::time::sleep(pause) => {}
        _ = cancel.cancelled() => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::PipelineBuilder;
    use crate::checkpoint::{MemoryCheckpointStore, RecordSink};
    use crate::decode::ErrorMode;
    use crate::fetcher::FetcherConfig;
    use crate::handler::BatchContext;
    use crate::policy::RetryConfig;
    use crate::source::LedgerSource;
    use crate::testing::{chain, hash, log_at, FirstByte, ScriptedSource, TOKEN};
    use crate::types::{BlockHeader, BlockRange, DecodedEvent, LogRecord};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Remembers every delivered batch; can be told to fail the next N calls.
    #[derive(Default)]
    struct Collect {
        batches: Mutex<Vec<(BlockRange, Vec<String>, Vec<u8>)>>,
        fail_next: AtomicU32,
    }

    #[async_trait]
    impl BatchHandler<u8> for Collect {
        fn name(&self) -> &str {
            "collect"
        }

        async fn handle(
            &self,
            ctx: &BatchContext,
            events: &[DecodedEvent<u8>],
            sink: &mut dyn RecordSink,
        ) -> Result<(), IngestError> {
            if self.fail_next.load(Ordering::SeqCst) > 0 {
                self.fail_next.fetch_sub(1, Ordering::SeqCst);
                return Err(IngestError::Handler {
                    handler: "collect".into(),
                    reason: "downstream unavailable".into(),
                });
            }
            for e in events {
                sink.put_record(&e.rule, &e.log_key(), serde_json::json!(e.payload))
                    .await?;
            }
            let hashes = ctx.blocks.iter().map(|b| b.hash.clone()).collect();
            let payloads = events.iter().map(|e| e.payload).collect();
            self.batches.lock().unwrap().push((ctx.range, hashes, payloads));
            Ok(())
        }
    }

    impl Collect {
        fn ranges(&self) -> Vec<BlockRange> {
            self.batches.lock().unwrap().iter().map(|b| b.0).collect()
        }
    }

    fn config() -> PipelineConfig {
        PipelineConfig {
            confirmation_depth: 75,
            max_batch_size: 1_000,
            requests_per_second: 0,
            fetcher: FetcherConfig {
                request_span: 10,
                concurrency: 2,
                attempt_timeout: Duration::from_secs(5),
                retry: RetryConfig {
                    max_retries: 1,
                    initial_backoff: Duration::from_millis(10),
                    max_backoff: Duration::from_millis(10),
                    multiplier: 1.0,
                    jitter_fraction: 0.0,
                    max_elapsed: None,
                },
            },
            poll_interval: Duration::from_millis(100),
            ..Default::default()
        }
    }

    fn transfers(headers: &[BlockHeader]) -> Vec<LogRecord> {
        headers
            .iter()
            .filter(|h| h.number % 5 == 0)
            .map(|h| log_at(h, 0, TOKEN, vec![h.number as u8]))
            .collect()
    }

    fn pipeline(
        cfg: PipelineConfig,
        source: Arc<ScriptedSource>,
        store: &MemoryCheckpointStore,
        handler: Arc<Collect>,
    ) -> Pipeline<u8, MemoryCheckpointStore, Arc<Collect>> {
        PipelineBuilder::<u8>::new()
            .config(cfg)
            .source(source as Arc<dyn LedgerSource>)
            .rule(TOKEN, Arc::new(FirstByte))
            .build(Arc::new(store.clone()), handler)
            .unwrap()
    }

    fn scripted(len: u64, head: u64) -> Arc<ScriptedSource> {
        let headers = chain(len, "a");
        let logs = transfers(&headers);
        Arc::new(ScriptedSource::new(headers, head).with_logs(logs))
    }

    #[tokio::test(start_paused = true)]
    async fn first_cycle_stops_at_finality_horizon() {
        let store = MemoryCheckpointStore::new();
        let handler = Arc::new(Collect::default());
        let mut p = pipeline(config(), scripted(200, 100), &store, handler.clone());

        let outcome = p.step().await.unwrap();
        let StepOutcome::Committed(res) = outcome else {
            panic!("expected a commit, got {outcome:?}");
        };
        assert_eq!(res.range, BlockRange::new(0, 25));
        assert_eq!(p.cursor(), 25);
        assert_eq!(store.load("ethereum", "default").await.unwrap().unwrap().cursor, 25);
        assert_eq!(handler.batches.lock().unwrap()[0].2, vec![0, 5, 10, 15, 20]);

        assert_eq!(p.step().await.unwrap(), StepOutcome::Idle);
        assert_eq!(p.state(), PipelineState::Following);
    }

    #[tokio::test(start_paused = true)]
    async fn heights_are_delivered_once_in_order() {
        let store = MemoryCheckpointStore::new();
        let handler = Arc::new(Collect::default());
        let source = scripted(300, 100);
        let cfg = PipelineConfig {
            max_batch_size: 20,
            ..config()
        };
        let mut p = pipeline(cfg, source.clone(), &store, handler.clone());

        for head in [100, 130, 131, 200, 260] {
            source.set_head(head);
            while let StepOutcome::Committed(_) = p.step().await.unwrap() {}
        }

        let ranges = handler.ranges();
        let mut expected_from = 0;
        for r in &ranges {
            assert_eq!(r.from, expected_from, "gap or overlap at {r}");
            assert!(r.len() <= 20);
            expected_from = r.to;
        }
        assert_eq!(expected_from, 260 - 75);
        assert_eq!(store.records("first_byte").len(), 37); // multiples of 5 below 185
    }

    #[tokio::test(start_paused = true)]
    async fn resume_never_redelivers_committed_heights() {
        let store = MemoryCheckpointStore::new();
        let source = scripted(300, 100);

        let first = Arc::new(Collect::default());
        let mut p = pipeline(config(), source.clone(), &store, first.clone());
        p.step().await.unwrap();
        drop(p);

        source.set_head(150);
        let second = Arc::new(Collect::default());
        let mut p = pipeline(config(), source, &store, second.clone());
        assert_eq!(p.resume().await.unwrap(), 25);
        p.step().await.unwrap();
        assert_eq!(second.ranges(), vec![BlockRange::new(25, 75)]);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_handler_replans_the_same_range() {
        let store = MemoryCheckpointStore::new();
        let handler = Arc::new(Collect::default());
        handler.fail_next.store(1, Ordering::SeqCst);
        let cfg = PipelineConfig {
            max_batch_size: 10,
            ..config()
        };
        let mut p = pipeline(cfg, scripted(200, 100), &store, handler.clone());

        let err = p.step().await.unwrap_err();
        assert!(matches!(err, IngestError::Commit { range, .. } if range == BlockRange::new(0, 10)));
        assert_eq!(p.cursor(), 0);
        assert!(store.load("ethereum", "default").await.unwrap().is_none());

        p.step().await.unwrap();
        assert_eq!(handler.ranges(), vec![BlockRange::new(0, 10)]);
        assert_eq!(p.cursor(), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn skip_mode_delivers_batch_without_bad_log() {
        let headers = chain(200, "a");
        let mut logs = transfers(&headers);
        logs.push(log_at(&headers[7], 3, TOKEN, vec![])); // undecodable
        let source = Arc::new(ScriptedSource::new(headers, 100).with_logs(logs));
        let store = MemoryCheckpointStore::new();
        let handler = Arc::new(Collect::default());
        let cfg = PipelineConfig {
            decode_errors: ErrorMode::Skip,
            ..config()
        };
        let mut p = pipeline(cfg, source, &store, handler.clone());

        p.step().await.unwrap();
        assert_eq!(p.cursor(), 25);
        assert_eq!(p.stats().logs_skipped, 1);
        assert_eq!(handler.batches.lock().unwrap()[0].2, vec![0, 5, 10, 15, 20]);
    }

    #[tokio::test(start_paused = true)]
    async fn abort_mode_halts_on_bad_log() {
        let headers = chain(200, "a");
        let logs = vec![log_at(&headers[7], 0, TOKEN, vec![])];
        let source = Arc::new(ScriptedSource::new(headers, 100).with_logs(logs));
        let store = MemoryCheckpointStore::new();
        let mut p = pipeline(config(), source, &store, Arc::new(Collect::default()));

        let err = p.run(CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, IngestError::Decode { block_number: 7, .. }));
        assert_eq!(p.cursor(), 0);
        assert_eq!(p.state(), PipelineState::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn reorg_below_committed_cursor_is_fatal() {
        let store = MemoryCheckpointStore::new();
        let source = scripted(300, 100);
        let mut p = pipeline(config(), source.clone(), &store, Arc::new(Collect::default()));
        p.step().await.unwrap();

        // the upstream switches to a fork from height 10, behind our cursor of 25
        let forked = chain(300, "b");
        let forked_logs = transfers(&forked);
        source.reorg(10, forked, forked_logs);
        source.set_head(130);

        let err = p.step().await.unwrap_err();
        assert!(matches!(
            err,
            IngestError::ReorgBeyondFinality { block_number: 24, .. }
        ));
        assert_eq!(p.cursor(), 25);
    }

    #[tokio::test(start_paused = true)]
    async fn fork_above_horizon_is_delivered_from_the_new_chain() {
        let store = MemoryCheckpointStore::new();
        let handler = Arc::new(Collect::default());
        let source = scripted(300, 100);
        let mut p = pipeline(config(), source.clone(), &store, handler.clone());
        p.step().await.unwrap();

        // blocks 40.. were above the horizon and never fetched; fork them at 39
        let mut forked = chain(300, "b");
        forked[40].parent_hash = hash(39, "a");
        let forked_logs = transfers(&forked);
        source.reorg(40, forked, forked_logs);
        source.set_head(125);

        p.step().await.unwrap();
        let batches = handler.batches.lock().unwrap();
        let (range, hashes, _) = &batches[1];
        assert_eq!(*range, BlockRange::new(25, 50));
        assert_eq!(hashes[14], hash(39, "a"));
        assert_eq!(hashes[15], hash(40, "b"));
    }

    #[tokio::test(start_paused = true)]
    async fn lagging_head_idles_instead_of_failing() {
        let store = MemoryCheckpointStore::new();
        let handler = Arc::new(Collect::default());
        let source = scripted(300, 50);
        let cfg = PipelineConfig {
            confirmation_depth: 0,
            ..config()
        };
        let mut p = pipeline(cfg.clone(), source.clone(), &store, handler.clone());
        p.step().await.unwrap();
        assert_eq!(p.cursor(), 50);

        // a fallback or load-balanced node answers with an older head
        source.set_head(45);
        assert_eq!(p.step().await.unwrap(), StepOutcome::Idle);
        assert_eq!(p.state(), PipelineState::Following);

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(250)).await;
            trigger.cancel();
        });
        let stats = p.run(cancel).await.unwrap();
        assert_eq!(stats.cycle_failures, 0);
        assert_eq!(p.state(), PipelineState::Stopped);

        // a restarted pipeline knows its committed block was final
        drop(p);
        let mut p = pipeline(cfg, source, &store, handler.clone());
        assert_eq!(p.step().await.unwrap(), StepOutcome::Idle);
        assert_eq!(p.cursor(), 50);
        assert_eq!(handler.ranges(), vec![BlockRange::new(0, 50)]);
    }

    #[tokio::test(start_paused = true)]
    async fn start_height_ahead_of_chain_is_a_config_error() {
        let store = MemoryCheckpointStore::new();
        let cfg = PipelineConfig {
            start_height: 500,
            ..config()
        };
        let mut p = pipeline(cfg, scripted(300, 100), &store, Arc::new(Collect::default()));

        let err = p.step().await.unwrap_err();
        assert!(matches!(err, IngestError::Config(_)), "{err}");
    }

    #[tokio::test(start_paused = true)]
    async fn truncated_fetch_commits_prefix() {
        let store = MemoryCheckpointStore::new();
        let handler = Arc::new(Collect::default());
        let source = scripted(300, 100);
        source.serve_below(Some(12));
        let mut p = pipeline(config(), source.clone(), &store, handler.clone());

        p.step().await.unwrap();
        assert_eq!(p.cursor(), 12);
        assert_eq!(p.stats().truncated_fetches, 1);

        source.serve_below(None);
        p.step().await.unwrap();
        assert_eq!(handler.ranges(), vec![BlockRange::new(0, 12), BlockRange::new(12, 25)]);
    }

    #[tokio::test(start_paused = true)]
    async fn truncated_fetch_can_be_discarded() {
        let store = MemoryCheckpointStore::new();
        let handler = Arc::new(Collect::default());
        let source = scripted(300, 100);
        source.serve_below(Some(12));
        let cfg = PipelineConfig {
            truncated: TruncatedPolicy::Discard,
            ..config()
        };
        let mut p = pipeline(cfg, source, &store, handler.clone());

        assert_eq!(p.step().await.unwrap(), StepOutcome::Idle);
        assert_eq!(p.cursor(), 0);
        assert!(handler.ranges().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn bounded_backfill_finishes() {
        let store = MemoryCheckpointStore::new();
        let handler = Arc::new(Collect::default());
        let cfg = PipelineConfig {
            start_height: 5,
            end_height: Some(30),
            max_batch_size: 10,
            ..config()
        };
        let mut p = pipeline(cfg, scripted(300, 200), &store, handler.clone());

        let stats = p.run(CancellationToken::new()).await.unwrap();
        assert_eq!(stats.batches_committed, 3);
        assert_eq!(
            handler.ranges(),
            vec![
                BlockRange::new(5, 15),
                BlockRange::new(15, 25),
                BlockRange::new(25, 31)
            ]
        );
        assert_eq!(p.state(), PipelineState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_cycle_failures_abort() {
        let store = MemoryCheckpointStore::new();
        let source = scripted(300, 100);
        source.transient_failures.store(u32::MAX, Ordering::SeqCst);
        let cfg = PipelineConfig {
            max_cycle_failures: 3,
            ..config()
        };
        let mut p = pipeline(cfg, source, &store, Arc::new(Collect::default()));

        let err = p.run(CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, IngestError::Aborted { .. }), "{err}");
        assert_eq!(p.stats().cycle_failures, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_between_cycles() {
        let store = MemoryCheckpointStore::new();
        let handler = Arc::new(Collect::default());
        let mut p = pipeline(config(), scripted(300, 100), &store, handler.clone());

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(250)).await;
            trigger.cancel();
        });

        let stats = p.run(cancel).await.unwrap();
        assert_eq!(stats.batches_committed, 1);
        assert_eq!(p.cursor(), 25);
        assert_eq!(p.state(), PipelineState::Stopped);
    }
}
