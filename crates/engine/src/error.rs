//! Error types for processor construction, unit outcomes and run results.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// Invalid construction arguments. Raised before any unit is admitted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
	/// Batch size below one.
	#[error("batch size must be at least 1, got {0}")]
	InvalidBatchSize(usize),

	/// Batch size above the configured ceiling.
	#[error("batch size {size} exceeds the maximum of {max}")]
	BatchSizeTooLarge {
		/// Requested batch size.
		size: usize,
		/// Ceiling from [`Limits`](crate::Limits).
		max: usize,
	},

	/// `batch` strategy selected without a batch size.
	#[error("batch strategy requires `batch_size`")]
	MissingBatchSize,

	/// Concurrency limit of zero.
	#[error("concurrency limit must be at least 1")]
	InvalidConcurrency,

	/// Concurrency limit above the configured ceiling.
	#[error("concurrency limit {limit} exceeds the maximum of {max}")]
	ConcurrencyTooLarge {
		/// Requested limit.
		limit: usize,
		/// Ceiling from [`Limits`](crate::Limits).
		max: usize,
	},

	/// Rate window configured without a concurrency limit.
	#[error("rate window requires a concurrency limit")]
	WindowWithoutLimit,

	/// Zero-length rate window.
	#[error("rate window must be non-zero, got {0:?}")]
	InvalidWindow(Duration),

	/// Bounded channel with zero capacity.
	#[error("channel capacity must be at least 1")]
	InvalidCapacity,

	/// Channel pipeline without consumers.
	#[error("channel consumer count must be at least 1")]
	InvalidConsumerCount,

	/// The supplied cancellation token had already fired.
	#[error("cancellation token was already canceled at construction")]
	AlreadyCanceled,
}

/// Failure outcome of one work unit.
#[derive(Debug, Clone, Error)]
pub enum UnitError {
	/// The factory returned an error.
	#[error("work unit failed: {0}")]
	Failed(Arc<anyhow::Error>),

	/// The factory panicked.
	#[error("work unit panicked: {0}")]
	Panicked(String),

	/// The unit was evicted or rejected by a lossy channel full-mode.
	#[error("work unit dropped by a full channel")]
	Dropped,

	/// The channel was full and its full-mode rejects writes.
	#[error("channel full")]
	QueueFull,
}

impl UnitError {
	/// Returns the factory error, if this failure came from one.
	pub fn source_error(&self) -> Option<&anyhow::Error> {
		match self {
			Self::Failed(err) => Some(err),
			_ => None,
		}
	}
}

impl From<anyhow::Error> for UnitError {
	fn from(err: anyhow::Error) -> Self {
		Self::Failed(Arc::new(err))
	}
}

/// Error surfaced by the aggregate future and the result streams.
#[derive(Debug, Clone, Error)]
pub enum RunError {
	/// One unit failed; the first one observed is reported.
	#[error("unit {index} failed: {error}")]
	Unit {
		/// Input index of the failed unit.
		index: usize,
		/// The unit's failure.
		#[source]
		error: UnitError,
	},

	/// The run was canceled before every unit completed.
	#[error("run canceled")]
	Canceled,
}

impl RunError {
	/// Returns true for [`RunError::Canceled`].
	pub fn is_canceled(&self) -> bool {
		matches!(self, Self::Canceled)
	}

	/// Returns the failing unit index, if any.
	pub fn unit_index(&self) -> Option<usize> {
		match self {
			Self::Unit { index, .. } => Some(*index),
			Self::Canceled => None,
		}
	}
}
