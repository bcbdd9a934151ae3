use std::collections::BTreeMap;

/// Restores input order over out-of-order `(index, item)` pairs.
///
/// Pairs ahead of the next expected index are buffered; [`Self::pop_ready`]
/// releases them strictly in index order, with no gaps or repeats. Released
/// entries are removed from the buffer.
#[derive(Debug)]
pub struct ReorderBuffer<T> {
	next: usize,
	pending: BTreeMap<usize, T>,
}

impl<T> Default for ReorderBuffer<T> {
	fn default() -> Self {
		Self::new()
	}
}

impl<T> ReorderBuffer<T> {
	/// Creates a buffer expecting index 0 first.
	pub fn new() -> Self {
		Self::starting_at(0)
	}

	/// Creates a buffer expecting `next` first.
	pub fn starting_at(next: usize) -> Self {
		Self {
			next,
			pending: BTreeMap::new(),
		}
	}

	/// Index that will be released next.
	pub const fn next_index(&self) -> usize {
		self.next
	}

	/// Number of buffered pairs waiting on an earlier index.
	pub fn buffered(&self) -> usize {
		self.pending.len()
	}

	/// Buffers one pair. Returns `false` (and drops `item`) when `index` was
	/// already released or is already buffered.
	pub fn push(&mut self, index: usize, item: T) -> bool {
		if index < self.next || self.pending.contains_key(&index) {
			return false;
		}
		self.pending.insert(index, item);
		true
	}

	/// Releases the item at the next expected index, if it has arrived.
	pub fn pop_ready(&mut self) -> Option<T> {
		let item = self.pending.remove(&self.next)?;
		self.next = self.next.wrapping_add(1);
		Some(item)
	}
}
