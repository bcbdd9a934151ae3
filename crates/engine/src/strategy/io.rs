use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::FuturesUnordered;

use super::{DriveContext, Schedule};
use crate::unit::{WorkUnit, cancel_remaining};

/// Floor for the default I/O concurrency limit.
const MIN_IO_LIMIT: usize = 100;

/// Default I/O concurrency: `max(100, 10 × available cores)`.
pub fn default_io_limit() -> usize {
	let cores = std::thread::available_parallelism().map_or(1, |n| n.get());
	MIN_IO_LIMIT.max(cores.saturating_mul(10))
}

/// Bounded admission for latency-bound work.
///
/// Factories are polled directly on the driver task instead of being spawned
/// as separate tasks, trading CPU parallelism for lower scheduling overhead.
#[derive(Debug, Clone, Copy)]
pub struct IoOptimizedParallel {
	limit: usize,
}

impl Default for IoOptimizedParallel {
	fn default() -> Self {
		Self::new(default_io_limit())
	}
}

impl IoOptimizedParallel {
	/// Creates the strategy. `limit` is clamped to at least one.
	pub fn new(limit: usize) -> Self {
		Self { limit: limit.max(1) }
	}

	/// Maximum units in flight.
	pub const fn limit(&self) -> usize {
		self.limit
	}
}

#[async_trait]
impl<In, Out> Schedule<In, Out> for IoOptimizedParallel
where
	In: Send + 'static,
	Out: Send + Sync + 'static,
{
	fn name(&self) -> &'static str {
		"io_optimized_parallel"
	}

	async fn drive(&self, units: Vec<WorkUnit<In, Out>>, ctx: &DriveContext) {
		let mut running = FuturesUnordered::new();
		let mut units = units.into_iter();

		while let Some(unit) = units.next() {
			while running.len() >= self.limit {
				running.next().await;
			}
			if ctx.is_cancelled() {
				unit.cancel();
				let skipped = cancel_remaining(units.by_ref());
				tracing::trace!(skipped = skipped + 1, "fanout.io.canceled");
				break;
			}
			let token = ctx.token().clone();
			running.push(async move { unit.process(&token).await });
		}

		while running.next().await.is_some() {}
	}
}
