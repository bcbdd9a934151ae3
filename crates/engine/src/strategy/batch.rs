use async_trait::async_trait;

use super::{DriveContext, InFlight, Schedule};
use crate::unit::{WorkUnit, cancel_remaining};

/// Admits units in consecutive groups of `size`. Every unit of a group starts
/// together; the next group waits until the whole group is terminal.
#[derive(Debug, Clone, Copy)]
pub struct Batch {
	size: usize,
}

impl Batch {
	/// Creates a batch strategy. `size` is clamped to at least one.
	pub fn new(size: usize) -> Self {
		Self { size: size.max(1) }
	}

	/// Units per batch.
	pub const fn size(&self) -> usize {
		self.size
	}
}

#[async_trait]
impl<In, Out> Schedule<In, Out> for Batch
where
	In: Send + 'static,
	Out: Send + Sync + 'static,
{
	fn name(&self) -> &'static str {
		"batch"
	}

	async fn drive(&self, units: Vec<WorkUnit<In, Out>>, ctx: &DriveContext) {
		let mut units = units.into_iter();
		let mut in_flight = InFlight::new();
		let mut batch_index = 0usize;
		loop {
			let batch: Vec<_> = units.by_ref().take(self.size).collect();
			if batch.is_empty() {
				break;
			}
			if ctx.is_cancelled() {
				let skipped = cancel_remaining(batch.into_iter().chain(units.by_ref()));
				tracing::trace!(batch = batch_index, skipped, "fanout.batch.canceled");
				break;
			}

			tracing::trace!(batch = batch_index, size = batch.len(), "fanout.batch.start");
			for unit in batch {
				let token = ctx.token().clone();
				in_flight.spawn(ctx, async move { unit.process(&token).await });
			}
			// A failing unit does not stop its siblings; the batch ends when all are terminal.
			in_flight.join_all().await;
			batch_index = batch_index.wrapping_add(1);
		}
	}
}
