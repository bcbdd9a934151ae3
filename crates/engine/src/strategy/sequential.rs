use async_trait::async_trait;

use super::{DriveContext, Schedule};
use crate::unit::{WorkUnit, cancel_remaining};

/// Runs units strictly one after another: unit `i + 1` is admitted only once
/// unit `i` is terminal. Units are polled on the driver task.
#[derive(Debug, Clone, Copy, Default)]
pub struct OneAtATime;

#[async_trait]
impl<In, Out> Schedule<In, Out> for OneAtATime
where
	In: Send + 'static,
	Out: Send + Sync + 'static,
{
	fn name(&self) -> &'static str {
		"one_at_a_time"
	}

	async fn drive(&self, units: Vec<WorkUnit<In, Out>>, ctx: &DriveContext) {
		let mut units = units.into_iter();
		while let Some(unit) = units.next() {
			if ctx.is_cancelled() {
				unit.cancel();
				let skipped = cancel_remaining(units.by_ref());
				tracing::trace!(skipped = skipped + 1, "fanout.sequential.canceled");
				break;
			}
			unit.process(ctx.token()).await;
		}
	}
}
