//! Producer/consumer pipeline over a bounded or unbounded work queue.
//!
//! The driver task is the single producer: it pushes units into the queue in
//! input order, applying the queue's full-mode when it is at capacity. A fixed
//! number of consumer tasks pull units and run them. The run finishes when the
//! producer has closed the queue and every consumer has drained and exited.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::UnitError;
use crate::strategy::{DriveContext, InFlight, Schedule};
use crate::unit::{WorkUnit, cancel_remaining};

mod queue;
mod reorder;

pub use queue::{QueueReceiver, QueueSender, SendError, SendOutcome, WorkQueue};
pub use reorder::ReorderBuffer;

/// What a bounded queue does with a write while it is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FullMode {
	/// Suspend the producer until capacity frees up (backpressure).
	#[default]
	Wait,
	/// Evict the oldest queued unit; it fails as dropped.
	DropOldest,
	/// Reject the incoming unit; it fails as dropped.
	DropNewest,
	/// Fail the incoming unit and stop producing.
	Throw,
}

/// Channel pipeline settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelOptions {
	/// Queue capacity; `None` is unbounded.
	pub capacity: Option<usize>,
	/// Behaviour of a bounded queue at capacity.
	pub full_mode: FullMode,
	/// Number of independent consumer tasks.
	pub consumers: usize,
	/// Emit results in input order from [`Processor::stream`](crate::Processor::stream).
	pub preserve_order: bool,
}

impl Default for ChannelOptions {
	fn default() -> Self {
		Self {
			capacity: None,
			full_mode: FullMode::Wait,
			consumers: 1,
			preserve_order: false,
		}
	}
}

/// Channel pipeline strategy.
#[derive(Debug, Clone)]
pub struct ChannelPipeline {
	options: ChannelOptions,
}

impl ChannelPipeline {
	/// Creates the pipeline. The consumer count is clamped to at least one.
	pub fn new(mut options: ChannelOptions) -> Self {
		options.consumers = options.consumers.max(1);
		Self { options }
	}

	/// Pipeline settings.
	pub fn options(&self) -> &ChannelOptions {
		&self.options
	}
}

#[async_trait]
impl<In, Out> Schedule<In, Out> for ChannelPipeline
where
	In: Send + 'static,
	Out: Send + Sync + 'static,
{
	fn name(&self) -> &'static str {
		"channel"
	}

	async fn drive(&self, units: Vec<WorkUnit<In, Out>>, ctx: &DriveContext) {
		let queue = WorkQueue::new(self.options.capacity, self.options.full_mode);
		let tx = queue.sender();
		let closer = tx.clone();
		ctx.on_dispose(move || closer.close());

		let mut consumers = InFlight::new();
		for consumer in 0..self.options.consumers {
			consumers.spawn(ctx, consume(consumer, queue.receiver(), ctx.token().clone()));
		}

		let report = produce(units, &tx, ctx).await;
		tx.close();
		consumers.join_all().await;

		tracing::debug!(
			consumers = self.options.consumers,
			enqueued = report.enqueued,
			dropped = report.dropped,
			rejected = report.rejected,
			"fanout.channel.finish"
		);
	}
}

#[derive(Debug, Default)]
struct ProduceReport {
	enqueued: usize,
	dropped: u64,
	rejected: bool,
}

async fn produce<In, Out>(units: Vec<WorkUnit<In, Out>>, tx: &QueueSender<WorkUnit<In, Out>>, ctx: &DriveContext) -> ProduceReport
where
	In: Send + 'static,
	Out: Send + Sync + 'static,
{
	let mut report = ProduceReport::default();
	let mut units = units.into_iter();

	while let Some(unit) = units.next() {
		if ctx.is_cancelled() {
			unit.cancel();
			cancel_remaining(units.by_ref());
			break;
		}

		match tx.send(unit, ctx.token()).await {
			Ok(SendOutcome::Enqueued) => report.enqueued += 1,
			Ok(SendOutcome::DroppedNewest(dropped)) => {
				note_drop(&mut report);
				dropped.fail(UnitError::Dropped);
			}
			Ok(SendOutcome::EvictedOldest(evicted)) => {
				report.enqueued += 1;
				note_drop(&mut report);
				evicted.fail(UnitError::Dropped);
			}
			Err(SendError::Full(rejected)) => {
				report.rejected = true;
				let index = rejected.index();
				rejected.fail(UnitError::QueueFull);
				let skipped = cancel_remaining(units.by_ref());
				tracing::warn!(index, skipped, "fanout.channel.full");
				break;
			}
			Err(SendError::Closed(unit) | SendError::Canceled(unit)) => {
				unit.cancel();
				cancel_remaining(units.by_ref());
				break;
			}
		}
	}
	report
}

fn note_drop(report: &mut ProduceReport) {
	if report.dropped % 1024 == 0 {
		tracing::warn!(drops = report.dropped + 1, "fanout.channel.dropped");
	}
	report.dropped += 1;
}

async fn consume<In, Out>(consumer: usize, rx: QueueReceiver<WorkUnit<In, Out>>, token: CancellationToken)
where
	In: Send + 'static,
	Out: Send + Sync + 'static,
{
	let mut processed = 0usize;
	loop {
		let unit = tokio::select! {
			biased;
			_ = token.cancelled() => break,
			unit = rx.recv() => match unit {
				Some(unit) => unit,
				None => break,
			},
		};
		unit.process(&token).await;
		processed += 1;
	}
	tracing::trace!(consumer, processed, "fanout.channel.consumer.exit");
}
