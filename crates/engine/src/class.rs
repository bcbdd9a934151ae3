use serde::{Deserialize, Serialize};

/// Workload hint used to pick an execution mode for parallel runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkloadHint {
	/// Work that occupies a worker thread; units are spawned onto the pool.
	#[default]
	CpuBound,
	/// Latency-bound work that mostly waits; units are polled on the driver task.
	IoBound,
}

impl WorkloadHint {
	pub(crate) const fn as_str(self) -> &'static str {
		match self {
			Self::CpuBound => "cpu_bound",
			Self::IoBound => "io_bound",
		}
	}
}
