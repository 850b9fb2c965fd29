//! Parallel chunk drivers.
//!
//! Both drivers split the record range `[0, n)` into `threads` contiguous
//! pieces of `⌊n/threads⌋` records, the last piece absorbing the remainder,
//! and block until every worker finishes. Wall-clock time around the barrier
//! is accumulated into the caller's timer, so timed phases measure the
//! slowest worker plus join overhead, not CPU time.
//!
//! Uses crossbeam scoped threads so workers can borrow the index, the chunk
//! buffer, and the writer without `Arc`. A panicking worker fails the whole
//! run.

use std::ops::Range;
use std::time::Instant;

use anyhow::{Result, anyhow};

/// Run `task` over the range partition of `[0, num_records)`.
///
/// For read-only phases: each worker receives its half-open record range.
pub fn run_ranges<F>(num_records: usize, threads: usize, elapsed: &mut f64, task: F) -> Result<()>
where
    F: Fn(Range<usize>) + Send + Sync,
{
    let threads = threads.max(1);
    let per_thread = num_records / threads;
    let start = Instant::now();

    crossbeam::scope(|scope| {
        for i in 0..threads {
            let lo = per_thread * i;
            let hi = if i == threads - 1 {
                num_records
            } else {
                per_thread * (i + 1)
            };
            let task = &task;
            scope.spawn(move |_| task(lo..hi));
        }
    })
    .map_err(|e| anyhow!("worker thread panicked: {:?}", e))?;

    *elapsed += start.elapsed().as_secs_f64();
    Ok(())
}

/// Run `task` over the same partition of `items`, handing each worker its
/// slice plus the slice's global start index.
///
/// For phases that mutate per-record state: the split hands every
/// accumulator to exactly one worker, so writes are contention-free by
/// construction.
pub fn run_slices<T, F>(items: &mut [T], threads: usize, elapsed: &mut f64, task: F) -> Result<()>
where
    T: Send,
    F: Fn(usize, &mut [T]) + Send + Sync,
{
    let threads = threads.max(1);
    let per_thread = items.len() / threads;
    let split = per_thread * (threads - 1);
    let (head, tail) = items.split_at_mut(split);
    let start = Instant::now();

    crossbeam::scope(|scope| {
        let task = &task;
        if per_thread > 0 {
            for (i, piece) in head.chunks_mut(per_thread).enumerate() {
                let lo = i * per_thread;
                scope.spawn(move |_| task(lo, piece));
            }
        }
        scope.spawn(move |_| task(split, tail));
    })
    .map_err(|e| anyhow!("worker thread panicked: {:?}", e))?;

    *elapsed += start.elapsed().as_secs_f64();
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
