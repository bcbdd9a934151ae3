use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use crate::error::UnitError;
use crate::slot::{Outcome, Settler, UnitHandle};

/// Boxed future produced by a unit factory.
pub type UnitFuture<Out> = BoxFuture<'static, anyhow::Result<Out>>;

/// Shared factory turning one input into one asynchronous result.
pub type Factory<In, Out> = Arc<dyn Fn(In) -> UnitFuture<Out> + Send + Sync>;

/// Wraps a closure returning any sendable future into a [`Factory`].
pub fn factory<In, Out, F, Fut>(f: F) -> Factory<In, Out>
where
	F: Fn(In) -> Fut + Send + Sync + 'static,
	Fut: Future<Output = anyhow::Result<Out>> + Send + 'static,
{
	Arc::new(move |input| f(input).boxed())
}

/// One independent asynchronous operation bound to its completion slot.
///
/// A unit is consumed by [`WorkUnit::process`]. If it is dropped without being
/// processed its slot is settled as canceled.
pub struct WorkUnit<In, Out> {
	input: In,
	factory: Factory<In, Out>,
	settler: Settler<Out>,
}

impl<In, Out> std::fmt::Debug for WorkUnit<In, Out> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("WorkUnit").field("index", &self.settler.index()).finish_non_exhaustive()
	}
}

impl<In, Out> WorkUnit<In, Out>
where
	In: Send + 'static,
	Out: Send + Sync + 'static,
{
	pub(crate) fn new(input: In, factory: Factory<In, Out>, slot: UnitHandle<Out>) -> Self {
		Self {
			input,
			factory,
			settler: Settler::new(slot),
		}
	}

	/// Admission index of this unit.
	pub fn index(&self) -> usize {
		self.settler.index()
	}

	/// Runs the factory and settles the slot.
	///
	/// Returns without invoking the factory when `cancel` has already fired.
	/// Never panics: errors and panics are recorded in the slot.
	pub async fn process(self, cancel: &CancellationToken) {
		let Self { input, factory, settler } = self;
		if cancel.is_cancelled() {
			settler.settle(Outcome::Canceled);
			return;
		}

		let run = AssertUnwindSafe(async move { factory(input).await }).catch_unwind();
		let outcome = match run.await {
			Ok(Ok(value)) => Outcome::Completed(value),
			Ok(Err(err)) => Outcome::Failed(UnitError::from(err)),
			Err(payload) => Outcome::Failed(UnitError::Panicked(panic_message(payload.as_ref()))),
		};

		if !settler.settle(outcome) {
			tracing::trace!(index = settler.index(), "fanout.unit.late_outcome");
		}
	}

	/// Settles the slot as canceled without running the factory.
	pub fn cancel(self) {
		self.settler.settle(Outcome::Canceled);
	}

	/// Settles the slot with a failure without running the factory.
	pub(crate) fn fail(self, error: UnitError) {
		self.settler.settle(Outcome::Failed(error));
	}
}

/// Cancels every unit left in `units`. Returns how many were drained.
pub(crate) fn cancel_remaining<In, Out>(units: impl Iterator<Item = WorkUnit<In, Out>>) -> usize
where
	In: Send + 'static,
	Out: Send + Sync + 'static,
{
	let mut count = 0usize;
	for unit in units {
		unit.cancel();
		count = count.wrapping_add(1);
	}
	count
}

/// Extracts a readable message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
	if let Some(msg) = payload.downcast_ref::<&'static str>() {
		(*msg).to_string()
	} else if let Some(msg) = payload.downcast_ref::<String>() {
		msg.clone()
	} else {
		"unknown panic payload".to_string()
	}
}

#[cfg(test)]
mod tests {
	use std::sync::atomic::{AtomicUsize, Ordering};

	use super::*;
	use crate::slot::{UnitStatus, slot_table};

	fn unit_with<F, Fut>(f: F) -> (WorkUnit<u32, u32>, UnitHandle<u32>)
	where
		F: Fn(u32) -> Fut + Send + Sync + 'static,
		Fut: Future<Output = anyhow::Result<u32>> + Send + 'static,
	{
		let slots = slot_table(1);
		let handle = UnitHandle::new(slots, 0);
		(WorkUnit::new(21, factory(f), handle.clone()), handle)
	}

	#[tokio::test]
	async fn completes_with_factory_value() {
		let (unit, handle) = unit_with(|x| async move { Ok(x * 2) });
		unit.process(&CancellationToken::new()).await;
		assert_eq!(handle.try_outcome().and_then(Outcome::value), Some(&42));
	}

	#[tokio::test]
	async fn factory_error_is_captured() {
		let (unit, handle) = unit_with(|_| async { Err(anyhow::anyhow!("nope")) });
		unit.process(&CancellationToken::new()).await;
		let err = handle.try_outcome().and_then(Outcome::error).cloned().expect("should fail");
		assert_eq!(err.source_error().map(|e| e.to_string()).as_deref(), Some("nope"));
	}

	#[tokio::test]
	async fn panics_are_captured() {
		fn boom(_: u32) -> anyhow::Result<u32> {
			panic!("boom-unit")
		}
		let (unit, handle) = unit_with(|x| async move { boom(x) });
		unit.process(&CancellationToken::new()).await;
		match handle.try_outcome() {
			Some(Outcome::Failed(UnitError::Panicked(msg))) => assert!(msg.contains("boom-unit"), "got: {msg}"),
			other => panic!("expected panic outcome, got {other:?}"),
		}
	}

	#[tokio::test]
	async fn pre_canceled_token_skips_factory() {
		let calls = Arc::new(AtomicUsize::new(0));
		let calls_clone = Arc::clone(&calls);
		let (unit, handle) = unit_with(move |x| {
			calls_clone.fetch_add(1, Ordering::SeqCst);
			async move { Ok(x) }
		});
		let cancel = CancellationToken::new();
		cancel.cancel();
		unit.process(&cancel).await;
		assert_eq!(calls.load(Ordering::SeqCst), 0);
		assert_eq!(handle.status(), UnitStatus::Canceled);
	}

	#[tokio::test]
	async fn late_outcome_does_not_overwrite_forced_cancel() {
		let (unit, handle) = unit_with(|x| async move { Ok(x) });
		assert!(handle.complete(Outcome::Canceled));
		unit.process(&CancellationToken::new()).await;
		assert_eq!(handle.status(), UnitStatus::Canceled);
	}

	#[test]
	fn extracts_string_payload() {
		let payload: Box<dyn Any + Send> = Box::new(String::from("boom-string"));
		assert_eq!(panic_message(payload.as_ref()), "boom-string");
	}
}
