//! Declarative processor configuration.
//!
//! [`ProcessorConfig`] is plain data that can be deserialized from any serde
//! format. [`ProcessorConfig::strategy`] resolves it to a validated
//! [`Strategy`].

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::channel::{ChannelOptions, FullMode};
use crate::class::WorkloadHint;
use crate::error::ConfigError;
use crate::registry::DEFAULT_DRAIN_GRACE;
use crate::strategy::{Strategy, default_io_limit};

/// Default ceiling for batch sizes.
pub const DEFAULT_MAX_BATCH_SIZE: usize = 10_000;

/// Default ceiling for concurrency limits and consumer counts.
pub const DEFAULT_MAX_PARALLELISM: usize = 10_000;

/// Validation ceilings applied at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Limits {
	pub max_batch_size: usize,
	pub max_parallelism: usize,
}

impl Default for Limits {
	fn default() -> Self {
		Self {
			max_batch_size: DEFAULT_MAX_BATCH_SIZE,
			max_parallelism: DEFAULT_MAX_PARALLELISM,
		}
	}
}

impl Limits {
	/// Checks `strategy` against these limits and basic sanity rules.
	pub fn validate(&self, strategy: &Strategy) -> Result<(), ConfigError> {
		match strategy {
			Strategy::OneAtATime | Strategy::UnboundedParallel => Ok(()),
			Strategy::Batch { size } => {
				if *size == 0 {
					return Err(ConfigError::InvalidBatchSize(*size));
				}
				if *size > self.max_batch_size {
					return Err(ConfigError::BatchSizeTooLarge {
						size: *size,
						max: self.max_batch_size,
					});
				}
				Ok(())
			}
			Strategy::BoundedParallel { limit } | Strategy::IoOptimizedParallel { limit } => self.check_parallelism(*limit),
			Strategy::BoundedParallelWindowed { limit, window } => {
				if window.is_zero() {
					return Err(ConfigError::InvalidWindow(*window));
				}
				self.check_parallelism(*limit)
			}
			Strategy::Channel(options) => {
				if options.capacity == Some(0) {
					return Err(ConfigError::InvalidCapacity);
				}
				if options.consumers == 0 {
					return Err(ConfigError::InvalidConsumerCount);
				}
				self.check_parallelism(options.consumers)
			}
		}
	}

	fn check_parallelism(&self, limit: usize) -> Result<(), ConfigError> {
		if limit == 0 {
			return Err(ConfigError::InvalidConcurrency);
		}
		if limit > self.max_parallelism {
			return Err(ConfigError::ConcurrencyTooLarge {
				limit,
				max: self.max_parallelism,
			});
		}
		Ok(())
	}
}

/// Strategy family selected by configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
	Sequential,
	Batch,
	#[default]
	Parallel,
	Channel,
}

/// Channel section of [`ProcessorConfig`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ChannelConfig {
	/// Absent means unbounded.
	pub capacity: Option<usize>,
	pub full_mode: FullMode,
	pub consumers: usize,
	pub preserve_order: bool,
}

impl Default for ChannelConfig {
	fn default() -> Self {
		let options = ChannelOptions::default();
		Self {
			capacity: options.capacity,
			full_mode: options.full_mode,
			consumers: options.consumers,
			preserve_order: options.preserve_order,
		}
	}
}

impl From<&ChannelConfig> for ChannelOptions {
	fn from(config: &ChannelConfig) -> Self {
		Self {
			capacity: config.capacity,
			full_mode: config.full_mode,
			consumers: config.consumers,
			preserve_order: config.preserve_order,
		}
	}
}

/// Recognized processor options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessorConfig {
	pub strategy: StrategyKind,
	/// Concurrency limit for `parallel`; absent means unbounded.
	pub concurrency: Option<usize>,
	/// Rolling rate window for `parallel`, in milliseconds.
	pub rate_window_ms: Option<u64>,
	/// Group size for `batch`.
	pub batch_size: Option<usize>,
	pub workload: WorkloadHint,
	/// Upper bound on the drain wait in `dispose_async`.
	pub drain_grace_ms: u64,
	pub channel: ChannelConfig,
	pub limits: Limits,
}

impl Default for ProcessorConfig {
	fn default() -> Self {
		Self {
			strategy: StrategyKind::default(),
			concurrency: None,
			rate_window_ms: None,
			batch_size: None,
			workload: WorkloadHint::default(),
			drain_grace_ms: DEFAULT_DRAIN_GRACE.as_millis() as u64,
			channel: ChannelConfig::default(),
			limits: Limits::default(),
		}
	}
}

impl ProcessorConfig {
	/// Resolves and validates the configured strategy.
	pub fn strategy(&self) -> Result<Strategy, ConfigError> {
		let window = self.rate_window_ms.map(Duration::from_millis);
		let strategy = match self.strategy {
			StrategyKind::Sequential => Strategy::OneAtATime,
			StrategyKind::Batch => Strategy::Batch {
				size: self.batch_size.ok_or(ConfigError::MissingBatchSize)?,
			},
			StrategyKind::Parallel => match (self.concurrency, window, self.workload) {
				(None, Some(_), _) => return Err(ConfigError::WindowWithoutLimit),
				(None, None, WorkloadHint::CpuBound) => Strategy::UnboundedParallel,
				(None, None, WorkloadHint::IoBound) => Strategy::IoOptimizedParallel { limit: default_io_limit() },
				(Some(limit), Some(window), _) => Strategy::BoundedParallelWindowed { limit, window },
				(Some(limit), None, WorkloadHint::IoBound) => Strategy::IoOptimizedParallel { limit },
				(Some(limit), None, WorkloadHint::CpuBound) => Strategy::BoundedParallel { limit },
			},
			StrategyKind::Channel => Strategy::Channel(ChannelOptions::from(&self.channel)),
		};
		self.limits.validate(&strategy)?;
		tracing::trace!(strategy = strategy.name(), workload = self.workload.as_str(), "fanout.config.resolved");
		Ok(strategy)
	}

	/// Drain grace period for disposal.
	pub fn drain_grace(&self) -> Duration {
		Duration::from_millis(self.drain_grace_ms)
	}
}
