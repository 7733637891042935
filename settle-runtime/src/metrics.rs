//! Evaluation metrics and profiling
//!
//! Counts fixpoints and rounds, and times every block evaluation so a
//! performance report can single out expensive user blocks.

use crate::block::BlockKey;
use dashmap::DashMap;
use settle_types::wire::BlockTiming;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Metrics for a single block
#[derive(Debug)]
pub struct BlockMetrics {
    /// Human-readable block name
    pub name: String,

    /// Whether the block belongs to user code
    pub user: bool,

    /// Number of times this block was evaluated
    pub execution_count: AtomicU64,

    /// Number of evaluations that found at least one solution
    pub match_count: AtomicU64,

    /// Total time spent evaluating (nanoseconds)
    pub total_time_ns: AtomicU64,
}

impl BlockMetrics {
    pub fn new(name: impl Into<String>, user: bool) -> Self {
        BlockMetrics {
            name: name.into(),
            user,
            execution_count: AtomicU64::new(0),
            match_count: AtomicU64::new(0),
            total_time_ns: AtomicU64::new(0),
        }
    }

    /// Record one evaluation
    pub fn record_execution(&self, duration: Duration, matched: bool) {
        self.execution_count.fetch_add(1, Ordering::Relaxed);
        if matched {
            self.match_count.fetch_add(1, Ordering::Relaxed);
        }
        self.total_time_ns
            .fetch_add(duration.as_nanos() as u64, Ordering::Relaxed);
    }

    /// Get average evaluation time
    pub fn avg_execution_time(&self) -> Duration {
        let total_ns = self.total_time_ns.load(Ordering::Relaxed);
        let count = self.execution_count.load(Ordering::Relaxed);

        if count == 0 {
            Duration::ZERO
        } else {
            Duration::from_nanos(total_ns / count)
        }
    }
}

/// Metrics for one evaluation
#[derive(Debug, Default)]
pub struct EvaluationMetrics {
    /// Number of completed fixpoints
    pub fixpoint_count: AtomicU64,

    /// Number of rounds across all fixpoints
    pub round_count: AtomicU64,

    /// Total time spent in fixpoints (nanoseconds)
    pub total_time_ns: AtomicU64,

    blocks: DashMap<BlockKey, BlockMetrics>,
}

impl EvaluationMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_block(
        &self,
        key: &BlockKey,
        name: &str,
        user: bool,
        duration: Duration,
        matched: bool,
    ) {
        self.blocks
            .entry(key.clone())
            .or_insert_with(|| BlockMetrics::new(name, user))
            .record_execution(duration, matched);
    }

    pub fn record_round(&self) {
        self.round_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fixpoint(&self, duration: Duration) {
        self.fixpoint_count.fetch_add(1, Ordering::Relaxed);
        self.total_time_ns
            .fetch_add(duration.as_nanos() as u64, Ordering::Relaxed);
    }

    /// Reset all metrics
    pub fn reset(&self) {
        self.fixpoint_count.store(0, Ordering::Relaxed);
        self.round_count.store(0, Ordering::Relaxed);
        self.total_time_ns.store(0, Ordering::Relaxed);
        self.blocks.clear();
    }

    /// Get a snapshot of current metrics, slowest blocks first
    pub fn snapshot(&self) -> MetricsSnapshot {
        let mut blocks: Vec<BlockTiming> = self
            .blocks
            .iter()
            .map(|entry| BlockTiming {
                block: entry.key().to_string(),
                user: entry.user,
                executions: entry.execution_count.load(Ordering::Relaxed),
                total_ns: entry.total_time_ns.load(Ordering::Relaxed),
            })
            .collect();
        blocks.sort_by(|a, b| b.total_ns.cmp(&a.total_ns).then_with(|| a.block.cmp(&b.block)));

        MetricsSnapshot {
            fixpoints: self.fixpoint_count.load(Ordering::Relaxed),
            rounds: self.round_count.load(Ordering::Relaxed),
            total_time_ns: self.total_time_ns.load(Ordering::Relaxed),
            blocks,
        }
    }
}

/// A point-in-time snapshot of evaluation metrics
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricsSnapshot {
    pub fixpoints: u64,
    pub rounds: u64,
    pub total_time_ns: u64,
    pub blocks: Vec<BlockTiming>,
}

impl MetricsSnapshot {
    /// Get average rounds per fixpoint
    pub fn avg_rounds(&self) -> f64 {
        if self.fixpoints == 0 {
            0.0
        } else {
            self.rounds as f64 / self.fixpoints as f64
        }
    }

    /// Only the blocks that belong to user code
    pub fn user_blocks(&self) -> impl Iterator<Item = &BlockTiming> {
        self.blocks.iter().filter(|b| b.user)
    }
}

/// Format metrics snapshot for display
impl std::fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "Fixpoints: {} | Rounds: {} | Avg Rounds: {:.1}",
            self.fixpoints,
            self.rounds,
            self.avg_rounds()
        )?;
        writeln!(
            f,
            "  Total Time: {:.2}ms",
            Duration::from_nanos(self.total_time_ns).as_secs_f64() * 1000.0
        )?;
        for block in &self.blocks {
            writeln!(
                f,
                "  {}{}: {} runs, {:.2}ms",
                block.block,
                if block.user { "" } else { " (system)" },
                block.executions,
                Duration::from_nanos(block.total_ns).as_secs_f64() * 1000.0
            )?;
        }
        Ok(())
    }
}
