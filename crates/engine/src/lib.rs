//! Async work-unit scheduling engine.
//!
//! A run is a fixed set of independent asynchronous operations ("units"), each
//! produced by a shared factory from one input. A pluggable [`Strategy`]
//! decides when each unit is admitted:
//! * [`Strategy::OneAtATime`]: strict sequential execution
//! * [`Strategy::Batch`]: fixed-size groups, one group at a time
//! * [`Strategy::BoundedParallel`] / [`Strategy::BoundedParallelWindowed`]: permit-limited or rate-limited admission
//! * [`Strategy::UnboundedParallel`] / [`Strategy::IoOptimizedParallel`]: eager admission
//! * [`Strategy::Channel`]: producer/consumer pipeline with a configurable full-mode
//!
//! Every unit settles exactly once into a [`CompletionSlot`]. The resulting
//! [`Processor`] exposes per-unit handles, an aggregate future, completion- and
//! input-ordered streams, cooperative cancellation and bounded disposal.

pub mod channel;
mod class;
pub mod config;
pub mod error;
pub mod processor;
pub mod registry;
pub mod slot;
mod spawn;
pub mod strategy;
pub mod stream;
pub mod unit;

pub use channel::{ChannelOptions, ChannelPipeline, FullMode, ReorderBuffer, WorkQueue};
pub use class::WorkloadHint;
pub use config::{ChannelConfig, Limits, ProcessorConfig, StrategyKind};
pub use error::{ConfigError, RunError, UnitError};
pub use processor::{Processor, ProcessorBuilder};
pub use registry::{DEFAULT_DRAIN_GRACE, DisposeHook, ProcessorRegistry, RunSnapshot};
pub use slot::{CompletionSlot, Outcome, UnitHandle, UnitStatus};
pub use strategy::{DriveContext, Schedule, Strategy, default_io_limit};
pub use stream::{CompletionStream, OrderedStream};
pub use unit::{Factory, UnitFuture, WorkUnit, factory};
