//! Admission strategies.
//!
//! A strategy receives the run's units in input order and decides when each
//! one is admitted. Every strategy honours the shared cancellation token: once
//! it fires, no further unit invokes its factory and the units not yet
//! admitted are settled as canceled.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::channel::{ChannelOptions, ChannelPipeline};
use crate::registry::{DisposeHook, DisposeHooks};
use crate::unit::WorkUnit;

mod batch;
mod bounded;
mod in_flight;
mod io;
mod sequential;
mod unbounded;

pub use batch::Batch;
pub use bounded::{BoundedParallel, BoundedParallelWindowed};
pub(crate) use in_flight::InFlight;
pub use io::{IoOptimizedParallel, default_io_limit};
pub use sequential::OneAtATime;
pub use unbounded::UnboundedParallel;

/// Drives a run's units through admission.
#[async_trait]
pub trait Schedule<In, Out>: Send + Sync + 'static
where
	In: Send + 'static,
	Out: Send + Sync + 'static,
{
	/// Short name used in logs.
	fn name(&self) -> &'static str;

	/// Admits every unit and returns once each admitted unit is terminal.
	async fn drive(&self, units: Vec<WorkUnit<In, Out>>, ctx: &DriveContext);
}

/// Per-run services handed to a [`Schedule`].
#[derive(Clone)]
pub struct DriveContext {
	cancel: CancellationToken,
	tracker: TaskTracker,
	hooks: Arc<DisposeHooks>,
}

impl std::fmt::Debug for DriveContext {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("DriveContext")
			.field("canceled", &self.cancel.is_cancelled())
			.field("tracked", &self.tracker.len())
			.finish_non_exhaustive()
	}
}

impl DriveContext {
	pub(crate) fn new(cancel: CancellationToken, tracker: TaskTracker, hooks: Arc<DisposeHooks>) -> Self {
		Self { cancel, tracker, hooks }
	}

	/// The run's shared cancellation token.
	pub fn token(&self) -> &CancellationToken {
		&self.cancel
	}

	/// Returns true once the run has been canceled.
	pub fn is_cancelled(&self) -> bool {
		self.cancel.is_cancelled()
	}

	/// Registers cleanup run when the run is disposed or canceled.
	pub fn on_dispose(&self, hook: impl FnOnce() + Send + 'static) {
		let hook: DisposeHook = Box::new(hook);
		self.hooks.add(hook);
	}

	/// Wraps a future so disposal drains it.
	pub(crate) fn track<F>(&self, fut: F) -> tokio_util::task::task_tracker::TrackedFuture<F>
	where
		F: Future,
	{
		self.tracker.track_future(fut)
	}
}

/// Built-in admission strategies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Strategy {
	/// Strictly one unit at a time, in input order.
	OneAtATime,
	/// Fixed-size groups; a group starts once the previous one is terminal.
	Batch { size: usize },
	/// At most `limit` units in flight.
	BoundedParallel { limit: usize },
	/// At most `limit` starts per rolling `window`.
	BoundedParallelWindowed { limit: usize, window: Duration },
	/// Every unit starts immediately.
	UnboundedParallel,
	/// Bounded, with factories polled on the driver task.
	IoOptimizedParallel { limit: usize },
	/// Producer/consumer pipeline over a queue.
	Channel(ChannelOptions),
}

impl Strategy {
	/// Log name of the strategy.
	pub const fn name(&self) -> &'static str {
		match self {
			Self::OneAtATime => "one_at_a_time",
			Self::Batch { .. } => "batch",
			Self::BoundedParallel { .. } => "bounded_parallel",
			Self::BoundedParallelWindowed { .. } => "bounded_parallel_windowed",
			Self::UnboundedParallel => "unbounded_parallel",
			Self::IoOptimizedParallel { .. } => "io_optimized_parallel",
			Self::Channel(_) => "channel",
		}
	}

	/// Returns true when the run's default stream should be input-ordered.
	pub const fn preserves_order(&self) -> bool {
		matches!(self, Self::Channel(options) if options.preserve_order)
	}

	/// Instantiates the strategy for one run.
	pub fn into_schedule<In, Out>(self) -> Box<dyn Schedule<In, Out>>
	where
		In: Send + 'static,
		Out: Send + Sync + 'static,
	{
		match self {
			Self::OneAtATime => Box::new(OneAtATime),
			Self::Batch { size } => Box::new(Batch::new(size)),
			Self::BoundedParallel { limit } => Box::new(BoundedParallel::new(limit)),
			Self::BoundedParallelWindowed { limit, window } => Box::new(BoundedParallelWindowed::new(limit, window)),
			Self::UnboundedParallel => Box::new(UnboundedParallel),
			Self::IoOptimizedParallel { limit } => Box::new(IoOptimizedParallel::new(limit)),
			Self::Channel(options) => Box::new(ChannelPipeline::new(options)),
		}
	}
}
