use std::future::Future;

use tokio::task::JoinSet;

use super::DriveContext;

/// Set of admitted units running as their own tasks.
///
/// Tasks are spawned on the active worker runtime and tracked for disposal
/// drain. Finished tasks are reaped on every spawn so the set stays sized to
/// what is actually in flight.
#[derive(Debug)]
pub(crate) struct InFlight {
	inner: JoinSet<()>,
}

impl InFlight {
	pub(crate) fn new() -> Self {
		Self { inner: JoinSet::new() }
	}

	/// Spawns one task onto the current worker runtime handle.
	pub(crate) fn spawn<F>(&mut self, ctx: &DriveContext, fut: F)
	where
		F: Future<Output = ()> + Send + 'static,
	{
		while self.inner.try_join_next().is_some() {}
		tracing::trace!(in_flight = self.inner.len(), "fanout.unit.spawn");
		let handle = crate::spawn::runtime_handle();
		self.inner.spawn_on(ctx.track(fut), &handle);
	}

	/// Waits for every task in the set.
	pub(crate) async fn join_all(&mut self) {
		while let Some(res) = self.inner.join_next().await {
			if let Err(err) = res
				&& err.is_panic()
			{
				tracing::warn!("fanout.unit.task_panicked");
			}
		}
	}
}
