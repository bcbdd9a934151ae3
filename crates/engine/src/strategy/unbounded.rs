use async_trait::async_trait;

use super::{DriveContext, InFlight, Schedule};
use crate::unit::{WorkUnit, cancel_remaining};

/// Starts every unit immediately with no admission control.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnboundedParallel;

#[async_trait]
impl<In, Out> Schedule<In, Out> for UnboundedParallel
where
	In: Send + 'static,
	Out: Send + Sync + 'static,
{
	fn name(&self) -> &'static str {
		"unbounded_parallel"
	}

	async fn drive(&self, units: Vec<WorkUnit<In, Out>>, ctx: &DriveContext) {
		let mut units = units.into_iter();
		let mut in_flight = InFlight::new();
		while let Some(unit) = units.next() {
			if ctx.is_cancelled() {
				unit.cancel();
				cancel_remaining(units.by_ref());
				break;
			}
			let token = ctx.token().clone();
			in_flight.spawn(ctx, async move { unit.process(&token).await });
		}
		in_flight.join_all().await;
	}
}
