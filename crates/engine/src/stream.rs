//! Incremental result streams over a run's slots.
//!
//! Both streams are lazy and forward-only. They are driven purely by slot
//! settlement: each poll wakes exactly when another unit becomes terminal.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::future::BoxFuture;
use futures::stream::{FusedStream, FuturesUnordered};
use futures::{FutureExt, Stream, StreamExt};

use crate::channel::ReorderBuffer;
use crate::error::RunError;
use crate::slot::{Outcome, SlotTable};

type Settled<Out> = BoxFuture<'static, (usize, Outcome<Out>)>;

fn settled_futures<Out>(slots: &SlotTable<Out>) -> FuturesUnordered<Settled<Out>>
where
	Out: Clone + Send + Sync + 'static,
{
	(0..slots.len())
		.map(|index| {
			let slots = Arc::clone(slots);
			async move { (index, slots[index].wait().await.clone()) }.boxed()
		})
		.collect()
}

/// Maps one terminal outcome to a stream item.
fn into_item<Out>(index: usize, outcome: Outcome<Out>) -> Result<(usize, Out), RunError> {
	match outcome {
		Outcome::Completed(value) => Ok((index, value)),
		Outcome::Failed(error) => Err(RunError::Unit { index, error }),
		Outcome::Canceled => Err(RunError::Canceled),
	}
}

/// Yields `(index, output)` pairs in completion order.
///
/// A failed unit yields [`RunError::Unit`] and the stream continues. A
/// canceled unit yields [`RunError::Canceled`] once and ends the stream.
pub struct CompletionStream<Out> {
	pending: FuturesUnordered<Settled<Out>>,
	finished: bool,
}

impl<Out> CompletionStream<Out>
where
	Out: Clone + Send + Sync + 'static,
{
	pub(crate) fn new(slots: &SlotTable<Out>) -> Self {
		Self {
			pending: settled_futures(slots),
			finished: false,
		}
	}
}

impl<Out> Stream for CompletionStream<Out> {
	type Item = Result<(usize, Out), RunError>;

	fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
		if self.finished {
			return Poll::Ready(None);
		}
		match self.pending.poll_next_unpin(cx) {
			Poll::Pending => Poll::Pending,
			Poll::Ready(None) => {
				self.finished = true;
				Poll::Ready(None)
			}
			Poll::Ready(Some((index, outcome))) => {
				let item = into_item(index, outcome);
				if matches!(item, Err(RunError::Canceled)) {
					self.finished = true;
				}
				Poll::Ready(Some(item))
			}
		}
	}

	fn size_hint(&self) -> (usize, Option<usize>) {
		if self.finished { (0, Some(0)) } else { (0, Some(self.pending.len())) }
	}
}

impl<Out> FusedStream for CompletionStream<Out> {
	fn is_terminated(&self) -> bool {
		self.finished
	}
}

/// Yields outputs strictly in input order.
///
/// Outcomes settling out of order are held in a [`ReorderBuffer`] until every
/// earlier index has been released.
pub struct OrderedStream<Out> {
	pending: FuturesUnordered<Settled<Out>>,
	buffer: ReorderBuffer<Outcome<Out>>,
	finished: bool,
}

impl<Out> OrderedStream<Out>
where
	Out: Clone + Send + Sync + 'static,
{
	pub(crate) fn new(slots: &SlotTable<Out>) -> Self {
		Self {
			pending: settled_futures(slots),
			buffer: ReorderBuffer::new(),
			finished: false,
		}
	}
}

impl<Out> Stream for OrderedStream<Out> {
	type Item = Result<Out, RunError>;

	fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
		let this = &mut *self;
		loop {
			if this.finished {
				return Poll::Ready(None);
			}
			if let Some(outcome) = this.buffer.pop_ready() {
				let index = this.buffer.next_index() - 1;
				let item = into_item(index, outcome).map(|(_, value)| value);
				if matches!(item, Err(RunError::Canceled)) {
					this.finished = true;
				}
				return Poll::Ready(Some(item));
			}
			match this.pending.poll_next_unpin(cx) {
				Poll::Pending => return Poll::Pending,
				Poll::Ready(Some((index, outcome))) => {
					this.buffer.push(index, outcome);
				}
				Poll::Ready(None) => {
					this.finished = true;
					return Poll::Ready(None);
				}
			}
		}
	}
}

impl<Out> FusedStream for OrderedStream<Out> {
	fn is_terminated(&self) -> bool {
		self.finished
	}
}
