//! Per-run ownership of completion slots, cancellation and disposal.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::StreamExt;
use futures::stream::FuturesUnordered;
use parking_lot::Mutex;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::error::RunError;
use crate::slot::{CompletionSlot, Outcome, SlotTable, UnitHandle, UnitStatus, slot_table};
use crate::strategy::{DriveContext, Schedule};
use crate::unit::{WorkUnit, panic_message};

/// Default bound on how long [`ProcessorRegistry::dispose_async`] waits for
/// in-flight work.
pub const DEFAULT_DRAIN_GRACE: Duration = Duration::from_secs(5);

/// Cleanup callback run once when a run is disposed or canceled.
pub type DisposeHook = Box<dyn FnOnce() + Send>;

/// Point-in-time slot counts for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSnapshot {
	/// Units in the run.
	pub total: usize,
	/// Slots not yet settled.
	pub pending: usize,
	/// Slots holding a value.
	pub completed: usize,
	/// Slots holding a failure.
	pub failed: usize,
	/// Slots settled as canceled.
	pub canceled: usize,
}

impl RunSnapshot {
	/// Returns true once every slot is terminal.
	pub const fn is_settled(&self) -> bool {
		self.pending == 0
	}
}

/// Dispose hooks, run at most once. Hooks added after that run immediately.
pub(crate) struct DisposeHooks {
	pending: Mutex<Option<Vec<DisposeHook>>>,
}

impl DisposeHooks {
	pub(crate) fn new(hooks: Vec<DisposeHook>) -> Self {
		Self {
			pending: Mutex::new(Some(hooks)),
		}
	}

	pub(crate) fn add(&self, hook: DisposeHook) {
		let mut guard = self.pending.lock();
		if let Some(hooks) = guard.as_mut() {
			hooks.push(hook);
			return;
		}
		drop(guard);
		run_hook(hook);
	}

	/// Runs every registered hook. Returns `false` if they already ran.
	fn run_all(&self) -> bool {
		let Some(hooks) = self.pending.lock().take() else {
			return false;
		};
		for hook in hooks {
			run_hook(hook);
		}
		true
	}
}

fn run_hook(hook: DisposeHook) {
	if let Err(payload) = std::panic::catch_unwind(AssertUnwindSafe(hook)) {
		tracing::warn!(message = %panic_message(payload.as_ref()), "fanout.dispose.hook_panicked");
	}
}

/// Owns the slots, cancellation token and in-flight task tracking for one run.
///
/// The slot count is fixed at construction. Cancellation and disposal are
/// idempotent and never panic.
pub struct ProcessorRegistry<Out> {
	slots: SlotTable<Out>,
	cancel: CancellationToken,
	cancel_requested: AtomicBool,
	hooks: Arc<DisposeHooks>,
	tracker: TaskTracker,
	aggregate: OnceCell<Result<Vec<Out>, RunError>>,
	drain_grace: Duration,
}

impl<Out> std::fmt::Debug for ProcessorRegistry<Out> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ProcessorRegistry")
			.field("len", &self.slots.len())
			.field("canceled", &self.cancel.is_cancelled())
			.field("in_flight", &self.tracker.len())
			.finish_non_exhaustive()
	}
}

impl<Out> ProcessorRegistry<Out>
where
	Out: Send + Sync + 'static,
{
	/// Allocates `len` pending slots.
	pub(crate) fn new(len: usize, cancel: CancellationToken, drain_grace: Duration, hooks: Vec<DisposeHook>) -> Self {
		Self {
			slots: slot_table(len),
			cancel,
			cancel_requested: AtomicBool::new(false),
			hooks: Arc::new(DisposeHooks::new(hooks)),
			tracker: TaskTracker::new(),
			aggregate: OnceCell::new(),
			drain_grace,
		}
	}

	/// Number of units in this run.
	pub fn len(&self) -> usize {
		self.slots.len()
	}

	/// Returns true for an empty run.
	pub fn is_empty(&self) -> bool {
		self.slots.is_empty()
	}

	/// Handle for the unit at `index`.
	pub fn handle(&self, index: usize) -> Option<UnitHandle<Out>> {
		(index < self.slots.len()).then(|| UnitHandle::new(Arc::clone(&self.slots), index))
	}

	/// Handles for every unit, in input order.
	pub fn handles(&self) -> impl Iterator<Item = UnitHandle<Out>> + '_ {
		(0..self.slots.len()).map(|index| UnitHandle::new(Arc::clone(&self.slots), index))
	}

	pub(crate) fn slots(&self) -> &SlotTable<Out> {
		&self.slots
	}

	/// The run's shared cancellation token.
	pub fn token(&self) -> &CancellationToken {
		&self.cancel
	}

	/// Counts slots by status.
	pub fn snapshot(&self) -> RunSnapshot {
		let mut snapshot = RunSnapshot {
			total: self.slots.len(),
			..RunSnapshot::default()
		};
		for slot in self.slots.iter() {
			match slot.status() {
				UnitStatus::Pending => snapshot.pending += 1,
				UnitStatus::Succeeded => snapshot.completed += 1,
				UnitStatus::Faulted => snapshot.failed += 1,
				UnitStatus::Canceled => snapshot.canceled += 1,
			}
		}
		snapshot
	}

	/// Registers a hook run once on disposal or cancellation.
	pub fn on_dispose(&self, hook: impl FnOnce() + Send + 'static) {
		self.hooks.add(Box::new(hook));
	}

	/// Cancels the run: fires the token once, forces every pending slot to
	/// canceled and runs dispose hooks. Terminal slots are left untouched.
	pub fn cancel_all(&self) {
		self.cancel_slots();
		self.hooks.run_all();
	}

	fn cancel_slots(&self) {
		if self.cancel_requested.swap(true, Ordering::AcqRel) {
			return;
		}
		self.cancel.cancel();
		let forced = self.slots.iter().filter(|slot| slot.complete(Outcome::Canceled)).count();
		tracing::debug!(forced, total = self.slots.len(), "fanout.cancel_all");
	}

	/// Runs dispose hooks and cancels the run without waiting for in-flight work.
	pub fn dispose(&self) {
		if self.hooks.run_all() {
			tracing::debug!(in_flight = self.tracker.len(), "fanout.dispose");
		}
		self.cancel_slots();
	}

	/// Disposes, then waits up to the drain grace period for in-flight tasks
	/// to finish. A drain timeout is swallowed.
	pub async fn dispose_async(&self) {
		self.dispose();
		if tokio::time::timeout(self.drain_grace, self.tracker.wait()).await.is_err() {
			tracing::debug!(
				grace_ms = self.drain_grace.as_millis() as u64,
				in_flight = self.tracker.len(),
				"fanout.dispose.drain_timeout"
			);
		}
	}

	/// Starts `schedule` as the run's driver task.
	pub(crate) fn start<In>(self: &Arc<Self>, schedule: Box<dyn Schedule<In, Out>>, units: Vec<WorkUnit<In, Out>>)
	where
		In: Send + 'static,
	{
		let done = CancellationToken::new();
		self.spawn_cancel_hook(done.clone());

		let ctx = DriveContext::new(self.cancel.clone(), self.tracker.clone(), Arc::clone(&self.hooks));
		let total = units.len();
		crate::spawn::spawn(
			"driver",
			self.tracker.track_future(async move {
				// Deregisters the cancel hook however the driver exits.
				let _done = done.drop_guard();
				let name = schedule.name();
				tracing::debug!(strategy = name, units = total, "fanout.run.start");
				schedule.drive(units, &ctx).await;
				tracing::debug!(strategy = name, units = total, "fanout.run.finish");
			}),
		);
		self.tracker.close();
	}

	/// Forces pending slots to canceled when the token fires mid-run. Exits
	/// without side effects once `done` fires.
	fn spawn_cancel_hook(self: &Arc<Self>, done: CancellationToken) {
		let registry = Arc::downgrade(self);
		let cancel = self.cancel.clone();
		crate::spawn::spawn(
			"cancel_hook",
			self.tracker.track_future(async move {
				tokio::select! {
					biased;
					_ = done.cancelled() => {}
					_ = cancel.cancelled() => {
						if let Some(registry) = registry.upgrade() {
							registry.cancel_all();
						}
					}
				}
			}),
		);
	}
}

impl<Out> ProcessorRegistry<Out>
where
	Out: Clone + Send + Sync + 'static,
{
	/// Aggregate result: every output in input order, or the first failure or
	/// cancellation observed. Computed once; later calls get a copy.
	pub async fn results(&self) -> Result<Vec<Out>, RunError> {
		self.aggregate.get_or_init(|| collect_all(&self.slots)).await.clone()
	}
}

async fn collect_all<Out: Clone>(slots: &[CompletionSlot<Out>]) -> Result<Vec<Out>, RunError> {
	let mut pending: FuturesUnordered<_> = slots
		.iter()
		.enumerate()
		.map(|(index, slot)| async move { (index, slot.wait().await) })
		.collect();
	let mut values: Vec<Option<Out>> = (0..slots.len()).map(|_| None).collect();

	while let Some((index, outcome)) = pending.next().await {
		match outcome {
			Outcome::Completed(value) => values[index] = Some(value.clone()),
			Outcome::Failed(error) => {
				return Err(RunError::Unit {
					index,
					error: error.clone(),
				});
			}
			Outcome::Canceled => return Err(RunError::Canceled),
		}
	}
	Ok(values.into_iter().flatten().collect())
}
