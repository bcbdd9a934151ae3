use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio::time::Instant;

use super::{DriveContext, InFlight, Schedule};
use crate::unit::{WorkUnit, cancel_remaining};

/// At most `limit` units in flight. Units wait for a permit in input order and
/// return it on reaching any terminal state.
#[derive(Debug, Clone, Copy)]
pub struct BoundedParallel {
	limit: usize,
}

impl BoundedParallel {
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
impl<In, Out> Schedule<In, Out> for BoundedParallel
where
	In: Send + 'static,
	Out: Send + Sync + 'static,
{
	fn name(&self) -> &'static str {
		"bounded_parallel"
	}

	async fn drive(&self, units: Vec<WorkUnit<In, Out>>, ctx: &DriveContext) {
		admit_with_permits(units, ctx, self.limit, None).await;
	}
}

/// Rate-limited admission: at most `limit` units start within any rolling
/// `window`.
///
/// A permit is held until the unit is terminal and `window` has elapsed since
/// its admission, whichever is later.
#[derive(Debug, Clone, Copy)]
pub struct BoundedParallelWindowed {
	limit: usize,
	window: Duration,
}

impl BoundedParallelWindowed {
	/// Creates the strategy. `limit` is clamped to at least one.
	pub fn new(limit: usize, window: Duration) -> Self {
		Self {
			limit: limit.max(1),
			window,
		}
	}

	/// Maximum starts per window.
	pub const fn limit(&self) -> usize {
		self.limit
	}

	/// Length of the rolling window.
	pub const fn window(&self) -> Duration {
		self.window
	}
}

#[async_trait]
impl<In, Out> Schedule<In, Out> for BoundedParallelWindowed
where
	In: Send + 'static,
	Out: Send + Sync + 'static,
{
	fn name(&self) -> &'static str {
		"bounded_parallel_windowed"
	}

	async fn drive(&self, units: Vec<WorkUnit<In, Out>>, ctx: &DriveContext) {
		admit_with_permits(units, ctx, self.limit, Some(self.window)).await;
	}
}

async fn admit_with_permits<In, Out>(units: Vec<WorkUnit<In, Out>>, ctx: &DriveContext, limit: usize, window: Option<Duration>)
where
	In: Send + 'static,
	Out: Send + Sync + 'static,
{
	// Tokio's semaphore is fair, so waiting units are admitted in input order.
	let permits = Arc::new(Semaphore::new(limit));
	let mut in_flight = InFlight::new();
	let mut units = units.into_iter();

	while let Some(unit) = units.next() {
		let permit = tokio::select! {
			biased;
			_ = ctx.token().cancelled() => None,
			permit = Arc::clone(&permits).acquire_owned() => permit.ok(),
		};
		let Some(permit) = permit else {
			unit.cancel();
			let skipped = cancel_remaining(units.by_ref());
			tracing::trace!(skipped = skipped + 1, "fanout.bounded.canceled");
			break;
		};

		let token = ctx.token().clone();
		in_flight.spawn(ctx, async move {
			let admitted = Instant::now();
			unit.process(&token).await;
			if let Some(window) = window {
				tokio::select! {
					_ = tokio::time::sleep_until(admitted + window) => {}
					_ = token.cancelled() => {}
				}
			}
			drop(permit);
		});
	}

	in_flight.join_all().await;
}
