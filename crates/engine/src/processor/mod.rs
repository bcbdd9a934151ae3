//! Run construction and the caller-facing output surface.
//!
//! A [`ProcessorBuilder`] validates its strategy, allocates one slot per unit
//! and starts the strategy's driver task. The returned [`Processor`] observes
//! the run: per-unit handles, the memoized aggregate, incremental streams,
//! cancellation and disposal.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::config::{Limits, ProcessorConfig};
use crate::error::{ConfigError, RunError};
use crate::registry::{DEFAULT_DRAIN_GRACE, DisposeHook, ProcessorRegistry, RunSnapshot};
use crate::slot::UnitHandle;
use crate::strategy::Strategy;
use crate::stream::{CompletionStream, OrderedStream};
use crate::unit::{Factory, WorkUnit, factory};

/// Configures and starts runs.
pub struct ProcessorBuilder {
	strategy: Strategy,
	limits: Limits,
	cancel: CancellationToken,
	drain_grace: Duration,
	hooks: Vec<DisposeHook>,
}

impl std::fmt::Debug for ProcessorBuilder {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ProcessorBuilder")
			.field("strategy", &self.strategy)
			.field("limits", &self.limits)
			.field("drain_grace", &self.drain_grace)
			.field("hooks", &self.hooks.len())
			.finish_non_exhaustive()
	}
}

impl ProcessorBuilder {
	/// Builder for `strategy` with default limits and a fresh token.
	pub fn new(strategy: Strategy) -> Self {
		Self {
			strategy,
			limits: Limits::default(),
			cancel: CancellationToken::new(),
			drain_grace: DEFAULT_DRAIN_GRACE,
			hooks: Vec::new(),
		}
	}

	/// Builder from declarative configuration. Fails on invalid values.
	pub fn from_config(config: &ProcessorConfig) -> Result<Self, ConfigError> {
		let strategy = config.strategy()?;
		Ok(Self::new(strategy).limits(config.limits).drain_grace(config.drain_grace()))
	}

	/// Replaces the validation ceilings.
	pub fn limits(mut self, limits: Limits) -> Self {
		self.limits = limits;
		self
	}

	/// Links the run to `parent`: canceling it cancels the run, never the
	/// other way round.
	pub fn cancellation(mut self, parent: &CancellationToken) -> Self {
		self.cancel = parent.child_token();
		self
	}

	/// The token the run will use.
	pub fn token(&self) -> &CancellationToken {
		&self.cancel
	}

	/// Bounds the drain wait in [`Processor::dispose_async`].
	pub fn drain_grace(mut self, grace: Duration) -> Self {
		self.drain_grace = grace;
		self
	}

	/// Registers cleanup run once when the run is disposed or canceled.
	pub fn on_dispose(mut self, hook: impl FnOnce() + Send + 'static) -> Self {
		self.hooks.push(Box::new(hook));
		self
	}

	/// Runs `f` `count` times.
	pub fn run_count<Out, F, Fut>(self, count: usize, f: F) -> Result<Processor<Out>, ConfigError>
	where
		Out: Send + Sync + 'static,
		F: Fn() -> Fut + Send + Sync + 'static,
		Fut: Future<Output = anyhow::Result<Out>> + Send + 'static,
	{
		self.launch(std::iter::repeat_n((), count).collect(), factory(move |()| f()))
	}

	/// Runs `f` once per item, preserving the source order as unit indices.
	pub fn run_items<I, In, Out, F, Fut>(self, items: I, f: F) -> Result<Processor<Out>, ConfigError>
	where
		I: IntoIterator<Item = In>,
		In: Send + 'static,
		Out: Send + Sync + 'static,
		F: Fn(In) -> Fut + Send + Sync + 'static,
		Fut: Future<Output = anyhow::Result<Out>> + Send + 'static,
	{
		self.launch(items.into_iter().collect(), factory(f))
	}

	/// Collects `items` to the end, then runs `f` once per item.
	pub async fn run_stream<S, In, Out, F, Fut>(self, items: S, f: F) -> Result<Processor<Out>, ConfigError>
	where
		S: Stream<Item = In>,
		In: Send + 'static,
		Out: Send + Sync + 'static,
		F: Fn(In) -> Fut + Send + Sync + 'static,
		Fut: Future<Output = anyhow::Result<Out>> + Send + 'static,
	{
		self.check()?;
		let items: Vec<In> = items.collect().await;
		self.launch(items, factory(f))
	}

	fn check(&self) -> Result<(), ConfigError> {
		self.limits.validate(&self.strategy)?;
		if self.cancel.is_cancelled() {
			return Err(ConfigError::AlreadyCanceled);
		}
		Ok(())
	}

	fn launch<In, Out>(self, inputs: Vec<In>, factory: Factory<In, Out>) -> Result<Processor<Out>, ConfigError>
	where
		In: Send + 'static,
		Out: Send + Sync + 'static,
	{
		self.check()?;
		let Self {
			strategy,
			cancel,
			drain_grace,
			hooks,
			..
		} = self;

		let strategy_name = strategy.name();
		let preserve_order = strategy.preserves_order();
		let registry = Arc::new(ProcessorRegistry::new(inputs.len(), cancel, drain_grace, hooks));
		let units: Vec<_> = inputs
			.into_iter()
			.zip(registry.handles())
			.map(|(input, handle)| WorkUnit::new(input, Arc::clone(&factory), handle))
			.collect();

		tracing::trace!(strategy = strategy_name, units = units.len(), "fanout.processor.build");
		registry.start(strategy.into_schedule(), units);

		Ok(Processor {
			registry,
			strategy: strategy_name,
			preserve_order,
		})
	}
}

/// Handle to a started run.
///
/// Dropping the processor disposes the run: pending units are canceled and
/// dispose hooks run. Use [`Processor::dispose_async`] to also wait for
/// in-flight work.
pub struct Processor<Out>
where
	Out: Send + Sync + 'static,
{
	registry: Arc<ProcessorRegistry<Out>>,
	strategy: &'static str,
	preserve_order: bool,
}

impl<Out> std::fmt::Debug for Processor<Out>
where
	Out: Send + Sync + 'static,
{
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Processor")
			.field("strategy", &self.strategy)
			.field("registry", &self.registry)
			.finish()
	}
}

impl<Out> Processor<Out>
where
	Out: Send + Sync + 'static,
{
	/// Number of units in the run.
	pub fn len(&self) -> usize {
		self.registry.len()
	}

	pub fn is_empty(&self) -> bool {
		self.registry.is_empty()
	}

	/// Log name of the strategy driving the run.
	pub fn strategy_name(&self) -> &'static str {
		self.strategy
	}

	/// Handle for the unit at `index`.
	pub fn unit(&self, index: usize) -> Option<UnitHandle<Out>> {
		self.registry.handle(index)
	}

	/// Handles for every unit, in input order.
	pub fn units(&self) -> Vec<UnitHandle<Out>> {
		self.registry.handles().collect()
	}

	/// Point-in-time counts by status.
	pub fn snapshot(&self) -> RunSnapshot {
		self.registry.snapshot()
	}

	/// The run's cancellation token.
	pub fn cancellation_token(&self) -> &CancellationToken {
		self.registry.token()
	}

	/// Registers cleanup run once on disposal. Runs immediately if the run was
	/// already disposed.
	pub fn on_dispose(&self, hook: impl FnOnce() + Send + 'static) {
		self.registry.on_dispose(hook);
	}

	/// Cancels every pending unit. Idempotent.
	pub fn cancel_all(&self) {
		self.registry.cancel_all();
	}

	/// Cancels the run without waiting. Idempotent.
	pub fn dispose(&self) {
		self.registry.dispose();
	}

	/// Cancels the run and waits, bounded by the drain grace, for in-flight
	/// work to finish. Idempotent.
	pub async fn dispose_async(&self) {
		self.registry.dispose_async().await;
	}
}

impl<Out> Processor<Out>
where
	Out: Clone + Send + Sync + 'static,
{
	/// Every output in input order, or the first failure or cancellation.
	pub async fn results(&self) -> Result<Vec<Out>, RunError> {
		self.registry.results().await
	}

	/// `(index, output)` pairs in completion order.
	pub fn as_completed(&self) -> CompletionStream<Out> {
		CompletionStream::new(self.registry.slots())
	}

	/// Outputs in input order.
	pub fn ordered(&self) -> OrderedStream<Out> {
		OrderedStream::new(self.registry.slots())
	}

	/// Default output stream: input-ordered when the strategy preserves
	/// order, completion-ordered otherwise.
	pub fn stream(&self) -> BoxStream<'static, Result<Out, RunError>> {
		if self.preserve_order {
			self.ordered().boxed()
		} else {
			self.as_completed().map(|item| item.map(|(_, value)| value)).boxed()
		}
	}
}

impl<Out> Drop for Processor<Out>
where
	Out: Send + Sync + 'static,
{
	fn drop(&mut self) {
		self.registry.dispose();
	}
}

#[cfg(test)]
mod tests;
