//! Single-assignment completion slots.
//!
//! Every work unit owns exactly one slot. A slot starts pending and accepts
//! exactly one terminal outcome; later writers lose silently. Any number of
//! observers may await a slot; awaiting never consumes the outcome.

use std::sync::{Arc, OnceLock};

use tokio::sync::Notify;

use crate::error::UnitError;

/// Terminal outcome of one work unit.
#[derive(Debug, Clone)]
pub enum Outcome<T> {
	/// The factory produced a value.
	Completed(T),
	/// The factory failed, panicked, or the unit was dropped by the channel.
	Failed(UnitError),
	/// The unit was canceled before it produced an outcome.
	Canceled,
}

impl<T> Outcome<T> {
	/// Non-blocking status classification.
	pub fn status(&self) -> UnitStatus {
		match self {
			Self::Completed(_) => UnitStatus::Succeeded,
			Self::Failed(_) => UnitStatus::Faulted,
			Self::Canceled => UnitStatus::Canceled,
		}
	}

	/// Returns the completed value, if any.
	pub fn value(&self) -> Option<&T> {
		match self {
			Self::Completed(value) => Some(value),
			_ => None,
		}
	}

	/// Returns the failure, if any.
	pub fn error(&self) -> Option<&UnitError> {
		match self {
			Self::Failed(err) => Some(err),
			_ => None,
		}
	}
}

/// Observable state of a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnitStatus {
	/// Not yet settled.
	Pending,
	/// The factory returned a value.
	Succeeded,
	/// The factory failed, panicked, or the unit was dropped by the channel.
	Faulted,
	/// Canceled before producing an outcome.
	Canceled,
}

impl UnitStatus {
	/// Returns true for every state except [`UnitStatus::Pending`].
	pub const fn is_terminal(self) -> bool {
		!matches!(self, Self::Pending)
	}
}

/// Single-assignment outcome holder.
#[derive(Debug)]
pub struct CompletionSlot<T> {
	cell: OnceLock<Outcome<T>>,
	settled: Notify,
}

impl<T> Default for CompletionSlot<T> {
	fn default() -> Self {
		Self::new()
	}
}

impl<T> CompletionSlot<T> {
	/// Creates a pending slot.
	pub fn new() -> Self {
		Self {
			cell: OnceLock::new(),
			settled: Notify::new(),
		}
	}

	/// Settles the slot. Returns `false` if it was already terminal, in which
	/// case `outcome` is discarded.
	pub fn complete(&self, outcome: Outcome<T>) -> bool {
		if self.cell.set(outcome).is_err() {
			return false;
		}
		self.settled.notify_waiters();
		true
	}

	/// Returns the outcome without waiting.
	pub fn try_outcome(&self) -> Option<&Outcome<T>> {
		self.cell.get()
	}

	/// Non-blocking status.
	pub fn status(&self) -> UnitStatus {
		self.cell.get().map_or(UnitStatus::Pending, Outcome::status)
	}

	/// Waits until the slot is terminal.
	pub async fn wait(&self) -> &Outcome<T> {
		loop {
			// Register before checking so a concurrent `complete` cannot slip
			// between the check and the await.
			let notified = self.settled.notified();
			if let Some(outcome) = self.cell.get() {
				return outcome;
			}
			notified.await;
		}
	}
}

/// Shared slot storage for one run. One allocation regardless of unit count.
pub(crate) type SlotTable<T> = Arc<[CompletionSlot<T>]>;

pub(crate) fn slot_table<T>(len: usize) -> SlotTable<T> {
	(0..len).map(|_| CompletionSlot::new()).collect()
}

/// Cheap, cloneable observer for one unit's slot.
pub struct UnitHandle<T> {
	slots: SlotTable<T>,
	index: usize,
}

impl<T> Clone for UnitHandle<T> {
	fn clone(&self) -> Self {
		Self {
			slots: Arc::clone(&self.slots),
			index: self.index,
		}
	}
}

impl<T> std::fmt::Debug for UnitHandle<T> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("UnitHandle")
			.field("index", &self.index)
			.field("status", &self.status())
			.finish()
	}
}

impl<T> UnitHandle<T> {
	pub(crate) fn new(slots: SlotTable<T>, index: usize) -> Self {
		debug_assert!(index < slots.len());
		Self { slots, index }
	}

	fn slot(&self) -> &CompletionSlot<T> {
		&self.slots[self.index]
	}

	/// Input index of this unit.
	pub const fn index(&self) -> usize {
		self.index
	}

	/// Non-blocking status.
	pub fn status(&self) -> UnitStatus {
		self.slot().status()
	}

	/// Returns the outcome without waiting.
	pub fn try_outcome(&self) -> Option<&Outcome<T>> {
		self.slot().try_outcome()
	}

	/// Waits for the terminal outcome.
	pub async fn wait(&self) -> &Outcome<T> {
		self.slot().wait().await
	}

	pub(crate) fn complete(&self, outcome: Outcome<T>) -> bool {
		self.slot().complete(outcome)
	}
}

impl<T: Clone> UnitHandle<T> {
	/// Waits for the terminal outcome and returns a copy.
	pub async fn outcome(&self) -> Outcome<T> {
		self.wait().await.clone()
	}
}

/// Write side of a slot held by the unit that will settle it.
///
/// Dropping a settler whose slot is still pending cancels the slot, so a unit
/// lost anywhere in a pipeline can never leave an observer waiting forever.
pub(crate) struct Settler<T> {
	handle: UnitHandle<T>,
}

impl<T> Settler<T> {
	pub(crate) fn new(handle: UnitHandle<T>) -> Self {
		Self { handle }
	}

	pub(crate) fn index(&self) -> usize {
		self.handle.index()
	}

	pub(crate) fn settle(&self, outcome: Outcome<T>) -> bool {
		self.handle.complete(outcome)
	}
}

impl<T> Drop for Settler<T> {
	fn drop(&mut self) {
		self.handle.complete(Outcome::Canceled);
	}
}
