//! Stress helpers for the engine.
//!
//! These drive many concurrent operations through one engine and tally how
//! their handles resolved.

use crate::fixtures::{draft_both, scenarios, TestEngine};
use std::time::{Duration, Instant};
use strata_core::{PersistResult, TaskHandle};

/// Result of a stress run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Total operations performed.
    pub total_ops: usize,
    /// Successful operations.
    pub successful_ops: usize,
    /// Failed operations.
    pub failed_ops: usize,
    /// Cancelled operations.
    pub cancelled_ops: usize,
    /// Total duration.
    pub duration: Duration,
    /// Operations per second.
    pub ops_per_second: f64,
}

impl StressTestResult {
    /// Tallies the outcomes of `results`.
    pub fn tally(results: &[PersistResult<()>], duration: Duration) -> Self {
        let successful = results.iter().filter(|r| r.is_ok()).count();
        let cancelled = results
            .iter()
            .filter(|r| r.as_ref().is_err_and(|e| e.is_cancelled()))
            .count();
        let total = results.len();
        let ops_per_second = if duration.as_secs_f64() > 0.0 {
            total as f64 / duration.as_secs_f64()
        } else {
            0.0
        };

        Self {
            total_ops: total,
            successful_ops: successful,
            failed_ops: total - successful - cancelled,
            cancelled_ops: cancelled,
            duration,
            ops_per_second,
        }
    }

    /// Prints a summary of the run.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {} ===", name);
        println!("Total operations: {}", self.total_ops);
        println!("Successful: {}", self.successful_ops);
        println!("Failed: {}", self.failed_ops);
        println!("Cancelled: {}", self.cancelled_ops);
        println!("Duration: {:?}", self.duration);
        println!("Throughput: {:.2} ops/sec", self.ops_per_second);
    }
}

/// Configuration for stress runs.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Number of independent moment trees.
    pub trees: usize,
    /// Media per moment.
    pub media_per_tree: usize,
    /// Cancel every n-th operation right after dispatch; zero cancels none.
    pub cancel_every: usize,
    /// Latency added to every remote call.
    pub remote_latency: Duration,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            trees: 50,
            media_per_tree: 4,
            cancel_every: 0,
            remote_latency: Duration::ZERO,
        }
    }
}

async fn collect(handles: Vec<TaskHandle>) -> Vec<PersistResult<()>> {
    let mut results = Vec::with_capacity(handles.len());
    for handle in handles {
        results.push(handle.await);
    }
    results
}

/// Saves `config.trees` moment trees concurrently, cancelling every
/// `config.cancel_every`-th save.
pub async fn stress_concurrent_saves(env: &TestEngine, config: &StressConfig) -> StressTestResult {
    env.remote.set_latency(config.remote_latency);
    let trees: Vec<_> = (0..config.trees)
        .map(|i| scenarios::moment_with_media(env, &format!("stress-{i}"), config.media_per_tree))
        .collect();

    let start = Instant::now();
    let handles: Vec<_> = trees
        .iter()
        .enumerate()
        .map(|(i, tree)| {
            let handle = env.save(tree, draft_both(), None);
            if config.cancel_every > 0 && i % config.cancel_every == 0 {
                handle.cancel();
            }
            handle
        })
        .collect();
    let results = collect(handles).await;
    StressTestResult::tally(&results, start.elapsed())
}

/// Queues `rounds` saves of one tree back to back, then cancels whatever is
/// still outstanding on its root.
pub async fn stress_queue_then_cancel(env: &TestEngine, rounds: usize) -> StressTestResult {
    let tree = scenarios::moment_with_media(env, "stress-queue", 2);

    let start = Instant::now();
    let handles: Vec<_> = (0..rounds)
        .map(|_| env.save(&tree, draft_both(), None))
        .collect();
    env.cancel_all(&tree);
    let results = collect(handles).await;
    StressTestResult::tally(&results, start.elapsed())
}
