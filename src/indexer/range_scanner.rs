use ethers::types::{Address, Filter, Log, H256};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{sleep, Instant};

use super::polygon_client::{LogSource, RpcError};

#[derive(Debug, Clone)]
pub struct ScanConfig {
    pub initial_chunk: u64,
    pub min_chunk: u64,
    pub max_chunk: u64,
    pub retry_delay: Duration,
    pub max_retry_delay: Duration,
}

impl ScanConfig {
    fn clamp_chunk(&self, chunk: u64) -> u64 {
        let min = self.min_chunk.max(1);
        chunk.clamp(min, self.max_chunk.max(min))
    }

    // Exponential in the number of consecutive failures, capped.
    fn retry_delay_for(&self, consecutive_failures: u32) -> Duration {
        let exponent = consecutive_failures.saturating_sub(1).min(10);
        self.retry_delay
            .saturating_mul(1_u32 << exponent)
            .min(self.max_retry_delay)
    }
}

/// Which logs to look for: any of `addresses`, `topic0` as event id and an
/// optional indexed `topic1` (the buyer).
#[derive(Debug, Clone)]
pub struct LogFilter {
    pub addresses: Vec<Address>,
    pub topic0: H256,
    pub topic1: Option<H256>,
}

impl LogFilter {
    fn for_range(&self, from_block: u64, to_block: u64) -> Filter {
        let mut filter = Filter::new()
            .address(self.addresses.clone())
            .topic0(self.topic0)
            .from_block(from_block)
            .to_block(to_block);
        if let Some(topic1) = self.topic1 {
            filter = filter.topic1(topic1);
        }
        filter
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanStats {
    pub from_block: u64,
    pub to_block: u64,
    pub queries: u32,
    pub retries: u32,
    pub logs: usize,
    pub final_chunk_size: u64,
}

#[derive(Debug, Clone)]
pub struct ScanReport {
    pub logs: Vec<Log>,
    pub stats: ScanStats,
}

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("log scan exceeded its {}s budget after {}ms (next block {cursor})", .budget.as_secs(), .elapsed.as_millis())]
    Timeout {
        budget: Duration,
        elapsed: Duration,
        cursor: u64,
    },

    #[error("log scan failed at block {cursor}: {source}")]
    Rpc {
        cursor: u64,
        #[source]
        source: RpcError,
    },
}

/// Cursor state for one scan call.
struct ScanWindow {
    cursor: u64,
    to_block: u64,
    chunk: u64,
    exhausted: bool,
}

impl ScanWindow {
    fn new(from_block: u64, to_block: u64, chunk: u64) -> Self {
        Self {
            cursor: from_block,
            to_block,
            chunk,
            exhausted: from_block > to_block,
        }
    }

    fn next_range(&self) -> Option<(u64, u64)> {
        if self.exhausted {
            return None;
        }
        let end = self
            .cursor
            .saturating_add(self.chunk - 1)
            .min(self.to_block);
        Some((self.cursor, end))
    }

    fn advance_past(&mut self, end: u64) {
        match end.checked_add(1) {
            Some(next) if next <= self.to_block => self.cursor = next,
            _ => self.exhausted = true,
        }
    }

    fn grow(&mut self, max_chunk: u64) {
        self.chunk = self.chunk.saturating_mul(2).min(max_chunk);
    }

    fn shrink(&mut self, min_chunk: u64) {
        self.chunk = (self.chunk / 2).max(min_chunk);
    }
}

/// Range Scanner - walks a wide block range in adaptive chunks
pub struct RangeScanner {
    source: Arc<dyn LogSource>,
    config: ScanConfig,
}

impl RangeScanner {
    pub fn new(source: Arc<dyn LogSource>, config: ScanConfig) -> Self {
        Self { source, config }
    }

    /// Collects every log matching `filter` in `[from_block, to_block]`.
    ///
    /// Range, timeout and rate-limit failures halve the chunk and retry the
    /// same cursor; successes double it. Any other failure is returned as is.
    /// Once `budget` is spent no further query is issued and the whole scan
    /// fails with [`ScanError::Timeout`]; partial results are discarded.
    pub async fn scan(
        &self,
        filter: &LogFilter,
        from_block: u64,
        to_block: u64,
        budget: Duration,
    ) -> Result<ScanReport, ScanError> {
        let started = Instant::now();
        let min_chunk = self.config.min_chunk.max(1);
        let max_chunk = self.config.max_chunk.max(min_chunk);
        let mut window = ScanWindow::new(
            from_block,
            to_block,
            self.config.clamp_chunk(self.config.initial_chunk),
        );
        let mut logs = Vec::new();
        let mut stats = ScanStats {
            from_block,
            to_block,
            ..Default::default()
        };
        let mut consecutive_failures: u32 = 0;

        while let Some((start, end)) = window.next_range() {
            let elapsed = started.elapsed();
            if elapsed > budget {
                tracing::warn!(
                    "Log scan budget exhausted at block {} ({} of {} blocks left)",
                    start,
                    to_block.saturating_sub(start).saturating_add(1),
                    to_block.saturating_sub(from_block).saturating_add(1)
                );
                return Err(ScanError::Timeout {
                    budget,
                    elapsed,
                    cursor: start,
                });
            }

            stats.queries += 1;
            match self.source.get_logs(&filter.for_range(start, end)).await {
                Ok(batch) => {
                    tracing::debug!(
                        "Scanned blocks {}..={} (chunk {}): {} logs",
                        start,
                        end,
                        window.chunk,
                        batch.len()
                    );
                    logs.extend(batch);
                    window.advance_past(end);
                    window.grow(max_chunk);
                    consecutive_failures = 0;
                }
                Err(error) if error.kind.is_scan_retryable() => {
                    stats.retries += 1;
                    consecutive_failures = consecutive_failures.saturating_add(1);
                    let previous = window.chunk;
                    window.shrink(min_chunk);
                    let delay = self
                        .config
                        .retry_delay_for(consecutive_failures)
                        .min(budget.saturating_sub(started.elapsed()));
                    tracing::warn!(
                        "Log scan {} on {}..={}; chunk {} -> {}, retrying in {}ms",
                        error.kind,
                        start,
                        end,
                        previous,
                        window.chunk,
                        delay.as_millis()
                    );
                    if !delay.is_zero() {
                        sleep(delay).await;
                    }
                }
                Err(error) => {
                    tracing::error!("Log scan failed on {}..={}: {}", start, end, error);
                    return Err(ScanError::Rpc {
                        cursor: start,
                        source: error,
                    });
                }
            }
        }

        stats.logs = logs.len();
        stats.final_chunk_size = window.chunk;
        Ok(ScanReport { logs, stats })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexer::polygon_client::RpcErrorKind;
    use async_trait::async_trait;
    use ethers::types::U64;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    fn config() -> ScanConfig {
        ScanConfig {
            initial_chunk: 50_000,
            min_chunk: 10_000,
            max_chunk: 200_000,
            retry_delay: Duration::ZERO,
            max_retry_delay: Duration::ZERO,
        }
    }

    fn filter() -> LogFilter {
        LogFilter {
            addresses: vec![Address::repeat_byte(0x01)],
            topic0: H256::repeat_byte(0xaa),
            topic1: Some(H256::repeat_byte(0xbb)),
        }
    }

    fn log_at(block: u64) -> Log {
        Log {
            block_number: Some(U64::from(block)),
            ..Default::default()
        }
    }

    fn range_of(filter: &Filter) -> (u64, u64) {
        let from = filter.get_from_block().expect("from block").as_u64();
        let to = filter.get_to_block().expect("to block").as_u64();
        (from, to)
    }

    /// Serves logs stored at fixed blocks; failures are scripted per call.
    struct ScriptedSource {
        blocks_with_logs: Vec<u64>,
        failures: Mutex<VecDeque<Option<RpcErrorKind>>>,
        ranges: Mutex<Vec<(u64, u64)>>,
        delay: Duration,
    }

    impl ScriptedSource {
        fn new(blocks_with_logs: Vec<u64>, script: Vec<Option<RpcErrorKind>>) -> Self {
            Self {
                blocks_with_logs,
                failures: Mutex::new(script.into()),
                ranges: Mutex::new(Vec::new()),
                delay: Duration::ZERO,
            }
        }

        fn ranges(&self) -> Vec<(u64, u64)> {
            self.ranges.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl LogSource for ScriptedSource {
        async fn get_logs(&self, filter: &Filter) -> Result<Vec<Log>, RpcError> {
            if !self.delay.is_zero() {
                sleep(self.delay).await;
            }
            let (from, to) = range_of(filter);
            self.ranges.lock().unwrap().push((from, to));
            if let Some(Some(kind)) = self.failures.lock().unwrap().pop_front() {
                return Err(RpcError::new(kind, "scripted failure"));
            }
            Ok(self
                .blocks_with_logs
                .iter()
                .filter(|b| (from..=to).contains(*b))
                .map(|b| log_at(*b))
                .collect())
        }
    }

    #[tokio::test]
    async fn chunk_sequence_is_deterministic_after_failures_then_successes() {
        let script = vec![
            Some(RpcErrorKind::RangeTooLarge),
            Some(RpcErrorKind::RangeTooLarge),
            Some(RpcErrorKind::RangeTooLarge),
        ];
        let source = Arc::new(ScriptedSource::new(vec![], script));
        let scanner = RangeScanner::new(source.clone(), config());

        // 10k + 20k + 40k + 80k + 160k blocks = exactly five successes
        let to_block = 310_000 - 1;
        let report = scanner
            .scan(&filter(), 0, to_block, Duration::from_secs(60))
            .await
            .expect("scan completes");

        let widths: Vec<u64> = source.ranges().iter().map(|(f, t)| t - f + 1).collect();
        assert_eq!(
            widths,
            vec![50_000, 25_000, 12_500, 10_000, 20_000, 40_000, 80_000, 160_000]
        );
        assert_eq!(report.stats.queries, 8);
        assert_eq!(report.stats.retries, 3);
        assert_eq!(report.stats.final_chunk_size, 200_000);
    }

    #[tokio::test]
    async fn failed_query_retries_the_same_cursor() {
        let script = vec![None, Some(RpcErrorKind::RateLimited), None];
        let source = Arc::new(ScriptedSource::new(vec![], script));
        let scanner = RangeScanner::new(source.clone(), config());

        scanner
            .scan(&filter(), 1_000, 200_000, Duration::from_secs(60))
            .await
            .expect("scan completes");

        let ranges = source.ranges();
        assert_eq!(ranges[0], (1_000, 50_999));
        assert_eq!(ranges[1], (51_000, 150_999));
        assert_eq!(ranges[2], (51_000, 100_999));
    }

    #[tokio::test]
    async fn covers_every_block_exactly_once_under_mixed_failures() {
        let blocks: Vec<u64> = vec![5, 9_999, 10_000, 123_456, 400_001, 999_999, 1_000_000];
        let script: Vec<Option<RpcErrorKind>> = (0..40)
            .map(|i| match i % 5 {
                1 => Some(RpcErrorKind::RangeTooLarge),
                3 => Some(RpcErrorKind::Timeout),
                _ => None,
            })
            .collect();
        let source = Arc::new(ScriptedSource::new(blocks.clone(), script));
        let scanner = RangeScanner::new(source.clone(), config());

        let report = scanner
            .scan(&filter(), 0, 1_000_000, Duration::from_secs(60))
            .await
            .expect("scan completes");

        let found: Vec<u64> = report
            .logs
            .iter()
            .map(|l| l.block_number.unwrap().as_u64())
            .collect();
        assert_eq!(found, blocks);

        // Successful ranges tile [0, 1_000_000] with no gap or overlap.
        let failures_at: Vec<bool> = (0..source.ranges().len())
            .map(|i| matches!(i % 5, 1 | 3))
            .collect();
        let mut expected_next = 0;
        for ((from, to), failed) in source.ranges().into_iter().zip(failures_at) {
            assert_eq!(from, expected_next);
            if !failed {
                expected_next = to + 1;
            }
        }
        assert_eq!(expected_next, 1_000_001);
    }

    #[tokio::test]
    async fn chunk_never_drops_below_floor() {
        let script = vec![Some(RpcErrorKind::RangeTooLarge); 6];
        let source = Arc::new(ScriptedSource::new(vec![], script));
        let scanner = RangeScanner::new(source.clone(), config());

        scanner
            .scan(&filter(), 0, 9_999, Duration::from_secs(60))
            .await
            .expect("scan completes");

        let widths: Vec<u64> = source.ranges().iter().map(|(f, t)| t - f + 1).collect();
        // the range equals the floor, so every query spans all of it
        assert!(widths.iter().all(|w| *w == 10_000));
        assert_eq!(widths.len(), 7);
    }

    #[tokio::test]
    async fn fatal_errors_are_not_retried() {
        let source = Arc::new(ScriptedSource::new(
            vec![],
            vec![None, Some(RpcErrorKind::Fatal)],
        ));
        let scanner = RangeScanner::new(source.clone(), config());

        let err = scanner
            .scan(&filter(), 0, 500_000, Duration::from_secs(60))
            .await
            .unwrap_err();
        match err {
            ScanError::Rpc { cursor, source: rpc } => {
                assert_eq!(cursor, 50_000);
                assert_eq!(rpc.kind, RpcErrorKind::Fatal);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(source.ranges().len(), 2);
    }

    #[tokio::test]
    async fn empty_range_issues_no_query() {
        let source = Arc::new(ScriptedSource::new(vec![], vec![]));
        let scanner = RangeScanner::new(source.clone(), config());
        let report = scanner
            .scan(&filter(), 10, 9, Duration::from_secs(60))
            .await
            .expect("empty scan");
        assert!(report.logs.is_empty());
        assert!(source.ranges().is_empty());
    }

    #[tokio::test]
    async fn final_block_at_u64_max_terminates() {
        let source = Arc::new(ScriptedSource::new(vec![], vec![]));
        let scanner = RangeScanner::new(source.clone(), config());
        scanner
            .scan(&filter(), u64::MAX - 5, u64::MAX, Duration::from_secs(60))
            .await
            .expect("scan completes");
        assert_eq!(source.ranges(), vec![(u64::MAX - 5, u64::MAX)]);
    }

    #[tokio::test(start_paused = true)]
    async fn exceeding_budget_fails_without_partial_result() {
        let mut source = ScriptedSource::new(vec![1, 60_000, 120_000], vec![]);
        source.delay = Duration::from_secs(5);
        let source = Arc::new(source);
        let scanner = RangeScanner::new(source.clone(), config());

        let err = scanner
            .scan(&filter(), 0, 1_000_000, Duration::from_secs(3))
            .await
            .unwrap_err();

        assert!(matches!(err, ScanError::Timeout { cursor: 50_000, .. }));
        assert_eq!(source.ranges().len(), 1);
    }

    #[test]
    fn retry_delay_grows_and_caps() {
        let cfg = ScanConfig {
            retry_delay: Duration::from_millis(100),
            max_retry_delay: Duration::from_millis(500),
            ..config()
        };
        assert_eq!(cfg.retry_delay_for(1), Duration::from_millis(100));
        assert_eq!(cfg.retry_delay_for(2), Duration::from_millis(200));
        assert_eq!(cfg.retry_delay_for(3), Duration::from_millis(400));
        assert_eq!(cfg.retry_delay_for(4), Duration::from_millis(500));
    }
}
