use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use super::FullMode;

/// Outcome of a successful enqueue.
#[derive(Debug, PartialEq, Eq)]
pub enum SendOutcome<T> {
	/// The item was enqueued without displacing anything.
	Enqueued,
	/// The queue was full; the incoming item was rejected and is returned.
	DroppedNewest(T),
	/// The queue was full; the oldest queued item was evicted and is returned.
	EvictedOldest(T),
}

/// Enqueue failure. The item is handed back.
#[derive(Debug, PartialEq, Eq)]
pub enum SendError<T> {
	/// The queue is closed.
	Closed(T),
	/// The queue is full and the full-mode rejects writes.
	Full(T),
	/// Canceled while waiting for capacity.
	Canceled(T),
}

impl<T> SendError<T> {
	/// Recovers the item that could not be sent.
	pub fn into_inner(self) -> T {
		match self {
			Self::Closed(item) | Self::Full(item) | Self::Canceled(item) => item,
		}
	}
}

struct QueueState<T> {
	items: VecDeque<T>,
	closed: bool,
}

struct QueueInner<T> {
	capacity: Option<usize>,
	mode: FullMode,
	state: Mutex<QueueState<T>>,
	notify_recv: Notify,
	notify_send: Notify,
}

impl<T> QueueInner<T> {
	fn is_full(&self, state: &QueueState<T>) -> bool {
		self.capacity.is_some_and(|capacity| state.items.len() >= capacity)
	}
}

/// Multi-producer, multi-consumer work queue with a configurable full-mode.
///
/// `capacity = None` makes the queue unbounded; the full-mode is then never
/// consulted. Every enqueued item is received exactly once.
pub struct WorkQueue<T> {
	inner: Arc<QueueInner<T>>,
}

/// Sending half of a [`WorkQueue`].
pub struct QueueSender<T> {
	inner: Arc<QueueInner<T>>,
}

/// Receiving half of a [`WorkQueue`]. Clones compete for items.
pub struct QueueReceiver<T> {
	inner: Arc<QueueInner<T>>,
}

impl<T> Clone for QueueSender<T> {
	fn clone(&self) -> Self {
		Self {
			inner: Arc::clone(&self.inner),
		}
	}
}

impl<T> Clone for QueueReceiver<T> {
	fn clone(&self) -> Self {
		Self {
			inner: Arc::clone(&self.inner),
		}
	}
}

impl<T> WorkQueue<T> {
	/// Creates a queue.
	///
	/// # Panics
	///
	/// Panics if `capacity` is `Some(0)`.
	pub fn new(capacity: Option<usize>, mode: FullMode) -> Self {
		assert!(capacity != Some(0), "queue capacity must be > 0");
		Self {
			inner: Arc::new(QueueInner {
				capacity,
				mode,
				state: Mutex::new(QueueState {
					items: VecDeque::with_capacity(capacity.unwrap_or(0).min(1024)),
					closed: false,
				}),
				notify_recv: Notify::new(),
				notify_send: Notify::new(),
			}),
		}
	}

	/// Returns a sender handle.
	pub fn sender(&self) -> QueueSender<T> {
		QueueSender {
			inner: Arc::clone(&self.inner),
		}
	}

	/// Returns a receiver handle.
	pub fn receiver(&self) -> QueueReceiver<T> {
		QueueReceiver {
			inner: Arc::clone(&self.inner),
		}
	}
}

impl<T> QueueSender<T> {
	/// Closes the queue. Receivers drain what is queued, then get `None`.
	pub fn close(&self) {
		self.inner.state.lock().closed = true;
		self.inner.notify_recv.notify_waiters();
		self.inner.notify_send.notify_waiters();
	}

	/// Enqueue without waiting. In [`FullMode::Wait`] a full queue yields
	/// [`SendError::Full`].
	pub fn try_send(&self, item: T) -> Result<SendOutcome<T>, SendError<T>> {
		let mut state = self.inner.state.lock();
		enqueue_with_mode(&self.inner, &mut state, item)
	}

	/// Enqueue honoring the full-mode. [`FullMode::Wait`] suspends until a
	/// receiver frees capacity, the queue closes, or `cancel` fires.
	pub async fn send(&self, item: T, cancel: &CancellationToken) -> Result<SendOutcome<T>, SendError<T>> {
		if self.inner.mode != FullMode::Wait {
			return self.try_send(item);
		}

		loop {
			// Register before checking capacity so a receive or close between
			// the check and the await still wakes us.
			let notified = self.inner.notify_send.notified();
			tokio::pin!(notified);
			notified.as_mut().enable();
			{
				let mut state = self.inner.state.lock();
				if state.closed {
					return Err(SendError::Closed(item));
				}
				if !self.inner.is_full(&state) {
					state.items.push_back(item);
					drop(state);
					self.inner.notify_recv.notify_one();
					return Ok(SendOutcome::Enqueued);
				}
			}
			tokio::select! {
				biased;
				_ = cancel.cancelled() => return Err(SendError::Canceled(item)),
				_ = notified => {}
			}
		}
	}

	/// Current queue length.
	pub fn len(&self) -> usize {
		self.inner.state.lock().items.len()
	}

	/// Returns true when nothing is queued.
	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Queue capacity, `None` when unbounded.
	pub fn capacity(&self) -> Option<usize> {
		self.inner.capacity
	}
}

impl<T> QueueReceiver<T> {
	/// Receives one item. Returns `None` once the queue is closed and drained.
	pub async fn recv(&self) -> Option<T> {
		loop {
			let notified = self.inner.notify_recv.notified();
			tokio::pin!(notified);
			notified.as_mut().enable();
			{
				let mut state = self.inner.state.lock();
				if let Some(item) = state.items.pop_front() {
					drop(state);
					self.inner.notify_send.notify_one();
					return Some(item);
				}
				if state.closed {
					return None;
				}
			}
			notified.await;
		}
	}

	/// Current queue length.
	pub fn len(&self) -> usize {
		self.inner.state.lock().items.len()
	}

	/// Returns true when nothing is queued.
	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

fn enqueue_with_mode<T>(inner: &QueueInner<T>, state: &mut QueueState<T>, item: T) -> Result<SendOutcome<T>, SendError<T>> {
	if state.closed {
		return Err(SendError::Closed(item));
	}
	if !inner.is_full(state) {
		state.items.push_back(item);
		inner.notify_recv.notify_one();
		return Ok(SendOutcome::Enqueued);
	}

	match inner.mode {
		FullMode::Wait | FullMode::Throw => Err(SendError::Full(item)),
		FullMode::DropNewest => Ok(SendOutcome::DroppedNewest(item)),
		FullMode::DropOldest => {
			let evicted = state.items.pop_front();
			state.items.push_back(item);
			inner.notify_recv.notify_one();
			match evicted {
				Some(evicted) => Ok(SendOutcome::EvictedOldest(evicted)),
				None => Ok(SendOutcome::Enqueued),
			}
		}
	}
}
