use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures::StreamExt;
use parking_lot::Mutex;
use rstest::rstest;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::*;
use crate::channel::ChannelOptions;
use crate::error::UnitError;
use crate::slot::{Outcome, UnitStatus};

/// Blocks every unit until released, counting starts and completions.
struct Gate {
	started: AtomicUsize,
	completed: AtomicUsize,
	release: Semaphore,
}

impl Gate {
	fn new() -> Arc<Self> {
		Arc::new(Self {
			started: AtomicUsize::new(0),
			completed: AtomicUsize::new(0),
			release: Semaphore::new(0),
		})
	}

	async fn pass(&self) -> anyhow::Result<()> {
		self.started.fetch_add(1, Ordering::SeqCst);
		self.release.acquire().await?.forget();
		self.completed.fetch_add(1, Ordering::SeqCst);
		Ok(())
	}

	fn release(&self, count: usize) {
		self.release.add_permits(count);
	}

	fn started(&self) -> usize {
		self.started.load(Ordering::SeqCst)
	}

	fn completed(&self) -> usize {
		self.completed.load(Ordering::SeqCst)
	}
}

fn gated(strategy: Strategy, count: usize, gate: &Arc<Gate>) -> Processor<()> {
	let gate = Arc::clone(gate);
	ProcessorBuilder::new(strategy)
		.run_count(count, move || {
			let gate = Arc::clone(&gate);
			async move { gate.pass().await }
		})
		.unwrap()
}

async fn wait_until(what: &str, mut done: impl FnMut() -> bool) {
	let polled = tokio::time::timeout(Duration::from_secs(5), async {
		while !done() {
			tokio::time::sleep(Duration::from_millis(1)).await;
		}
	})
	.await;
	assert!(polled.is_ok(), "timed out waiting for {what}");
}

async fn settle_briefly() {
	tokio::time::sleep(Duration::from_millis(30)).await;
}

#[rstest]
#[case::one_at_a_time(Strategy::OneAtATime)]
#[case::batch(Strategy::Batch { size: 4 })]
#[case::bounded(Strategy::BoundedParallel { limit: 3 })]
#[case::windowed(Strategy::BoundedParallelWindowed { limit: 8, window: Duration::from_millis(1) })]
#[case::unbounded(Strategy::UnboundedParallel)]
#[case::io_optimized(Strategy::IoOptimizedParallel { limit: 4 })]
#[case::channel(Strategy::Channel(ChannelOptions { capacity: Some(2), consumers: 3, ..ChannelOptions::default() }))]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn results_follow_input_order(#[case] strategy: Strategy) {
	let name = strategy.name();
	let processor = ProcessorBuilder::new(strategy)
		.run_items(0..20u64, |i| async move {
			tokio::time::sleep(Duration::from_millis((19 - i) % 5)).await;
			Ok(i * 2)
		})
		.unwrap();

	assert_eq!(processor.strategy_name(), name);
	assert_eq!(processor.len(), 20);
	assert_eq!(processor.results().await.unwrap(), (0..20).map(|i| i * 2).collect::<Vec<_>>());
	let snapshot = processor.snapshot();
	assert!(snapshot.is_settled());
	assert_eq!(snapshot.completed, 20);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn empty_run_resolves_immediately() {
	let processor = ProcessorBuilder::new(Strategy::Batch { size: 3 })
		.run_items(Vec::<u8>::new(), |i| async move { Ok(i) })
		.unwrap();
	assert!(processor.is_empty());
	assert!(processor.results().await.unwrap().is_empty());
	assert!(processor.as_completed().next().await.is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn batch_waits_for_the_whole_group() {
	let gate = Gate::new();
	let processor = gated(Strategy::Batch { size: 5 }, 50, &gate);

	wait_until("first batch to start", || gate.started() == 5).await;
	gate.release(4);
	wait_until("four completions", || gate.completed() == 4).await;
	settle_briefly().await;

	assert_eq!(gate.started(), 5);
	assert_eq!(gate.completed(), 4);
	let snapshot = processor.snapshot();
	assert_eq!(snapshot.completed, 4);
	assert_eq!(snapshot.pending, 46);

	gate.release(1);
	wait_until("second batch to start", || gate.started() == 10).await;
	processor.cancel_all();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn canceling_mid_batch_skips_later_batches() {
	let gate = Gate::new();
	let processor = gated(Strategy::Batch { size: 5 }, 15, &gate);

	wait_until("first batch to start", || gate.started() == 5).await;
	processor.cancel_all();
	gate.release(15);
	wait_until("first batch to finish", || gate.completed() == 5).await;
	settle_briefly().await;

	assert_eq!(gate.started(), 5);
	let snapshot = processor.snapshot();
	assert_eq!(snapshot.canceled, 15);
	assert!(processor.units()[5..].iter().all(|unit| unit.status() == UnitStatus::Canceled));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn bounded_admits_one_per_released_permit() {
	let gate = Gate::new();
	let processor = gated(Strategy::BoundedParallel { limit: 3 }, 100, &gate);

	wait_until("three starts", || gate.started() == 3).await;
	settle_briefly().await;
	assert_eq!(gate.started(), 3);

	gate.release(1);
	wait_until("fourth start", || gate.started() == 4).await;
	settle_briefly().await;
	assert_eq!(gate.started(), 4);
	assert_eq!(processor.snapshot().completed, 1);
	processor.cancel_all();
}

#[rstest]
#[case::bounded(Strategy::BoundedParallel { limit: 4 })]
#[case::io_optimized(Strategy::IoOptimizedParallel { limit: 4 })]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn permit_strategies_never_exceed_their_limit(#[case] strategy: Strategy) {
	let in_flight = Arc::new(AtomicUsize::new(0));
	let peak = Arc::new(AtomicUsize::new(0));
	let (in_flight_c, peak_c) = (Arc::clone(&in_flight), Arc::clone(&peak));

	let processor = ProcessorBuilder::new(strategy)
		.run_items(0..40u32, move |i| {
			let in_flight = Arc::clone(&in_flight_c);
			let peak = Arc::clone(&peak_c);
			async move {
				let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
				peak.fetch_max(now, Ordering::SeqCst);
				tokio::time::sleep(Duration::from_millis(2)).await;
				in_flight.fetch_sub(1, Ordering::SeqCst);
				Ok(i)
			}
		})
		.unwrap();

	assert_eq!(processor.results().await.unwrap().len(), 40);
	assert!(peak.load(Ordering::SeqCst) <= 4);
	assert!(peak.load(Ordering::SeqCst) >= 1);
}

#[tokio::test(start_paused = true)]
async fn windowed_limits_starts_per_rolling_window() {
	let window = Duration::from_millis(100);
	let starts = Arc::new(Mutex::new(Vec::new()));
	let starts_c = Arc::clone(&starts);
	let origin = Instant::now();

	let processor = ProcessorBuilder::new(Strategy::BoundedParallelWindowed { limit: 3, window })
		.run_count(9, move || {
			let starts = Arc::clone(&starts_c);
			async move {
				starts.lock().push(Instant::now());
				Ok(())
			}
		})
		.unwrap();
	processor.results().await.unwrap();

	let starts = starts.lock().clone();
	assert_eq!(starts.len(), 9);
	for (i, &start) in starts.iter().enumerate() {
		let in_window = starts[i..].iter().filter(|&&other| other < start + window).count();
		assert!(in_window <= 3, "{in_window} starts within one window");
	}
	let last = starts.iter().max().copied().unwrap_or(origin);
	assert!(last - origin >= Duration::from_millis(200));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancel_all_settles_everything_and_stops_admission() {
	let gate = Gate::new();
	let processor = gated(Strategy::BoundedParallel { limit: 2 }, 100, &gate);

	wait_until("two starts", || gate.started() == 2).await;
	processor.cancel_all();
	processor.cancel_all();

	let snapshot = processor.snapshot();
	assert!(snapshot.is_settled());
	assert_eq!(snapshot.canceled + snapshot.completed, 100);
	assert!(processor.cancellation_token().is_cancelled());

	// In-flight factories may finish; their late outcomes are ignored.
	gate.release(100);
	settle_briefly().await;
	assert_eq!(gate.started(), 2);
	assert!(processor.results().await.unwrap_err().is_canceled());
	assert_eq!(processor.unit(50).unwrap().status(), UnitStatus::Canceled);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn parent_cancellation_reaches_the_run() {
	let parent = CancellationToken::new();
	let gate = Gate::new();
	let gate_c = Arc::clone(&gate);
	let processor = ProcessorBuilder::new(Strategy::OneAtATime)
		.cancellation(&parent)
		.run_count(10, move || {
			let gate = Arc::clone(&gate_c);
			async move { gate.pass().await }
		})
		.unwrap();

	wait_until("first start", || gate.started() == 1).await;
	parent.cancel();
	wait_until("run to settle", || processor.snapshot().is_settled()).await;
	assert_eq!(processor.snapshot().canceled, 10);
	assert_eq!(gate.started(), 1);
}

#[tokio::test]
async fn canceling_the_run_leaves_the_parent_alone() {
	let parent = CancellationToken::new();
	let processor = ProcessorBuilder::new(Strategy::UnboundedParallel)
		.cancellation(&parent)
		.run_count(1, || std::future::pending::<anyhow::Result<()>>())
		.unwrap();
	processor.cancel_all();
	assert!(!parent.is_cancelled());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn failures_stay_local_to_their_unit() {
	let processor = ProcessorBuilder::new(Strategy::UnboundedParallel)
		.run_items(0..6u32, |i| async move {
			if i == 2 {
				anyhow::bail!("bad input {i}");
			}
			if i == 4 {
				panic!("unit {i} exploded");
			}
			Ok(i)
		})
		.unwrap();

	let err = processor.results().await.unwrap_err();
	assert!(matches!(err.unit_index(), Some(2 | 4)));

	let outcomes: Vec<_> = futures::future::join_all(processor.units().iter().map(|unit| unit.outcome())).await;
	assert_eq!(outcomes[0].value(), Some(&0));
	assert_eq!(outcomes[5].value(), Some(&5));
	assert!(matches!(outcomes[2], Outcome::Failed(UnitError::Failed(_))));
	match &outcomes[4] {
		Outcome::Failed(UnitError::Panicked(message)) => assert!(message.contains("exploded")),
		other => panic!("expected panic outcome, got {other:?}"),
	}
	let snapshot = processor.snapshot();
	assert_eq!((snapshot.completed, snapshot.failed), (4, 2));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn as_completed_yields_every_unit() {
	let processor = ProcessorBuilder::new(Strategy::IoOptimizedParallel { limit: 8 })
		.run_items(0..32u64, |i| async move {
			tokio::time::sleep(Duration::from_millis((i * 7) % 5)).await;
			Ok(i + 100)
		})
		.unwrap();

	let mut seen: Vec<(usize, u64)> = processor.as_completed().map(|item| item.unwrap()).collect().await;
	seen.sort_unstable();
	assert_eq!(seen, (0..32).map(|i| (i as usize, i + 100)).collect::<Vec<_>>());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn run_stream_collects_the_source_first() {
	let source = futures::stream::iter(["a", "bb", "ccc"]);
	let processor = ProcessorBuilder::new(Strategy::OneAtATime)
		.run_stream(source, |s: &'static str| async move { Ok(s.len()) })
		.await
		.unwrap();
	assert_eq!(processor.results().await.unwrap(), vec![1, 2, 3]);
	let streamed: Vec<_> = processor.stream().map(|item| item.unwrap()).collect().await;
	assert_eq!(streamed.len(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn from_config_builds_a_working_run() {
	let config: ProcessorConfig = toml::from_str(
		r#"
		strategy = "batch"
		batch_size = 3
		drain_grace_ms = 100
		"#,
	)
	.unwrap();
	let processor = ProcessorBuilder::from_config(&config)
		.unwrap()
		.run_items(1..=7u32, |i| async move { Ok(i * i) })
		.unwrap();
	assert_eq!(processor.strategy_name(), "batch");
	assert_eq!(processor.results().await.unwrap(), vec![1, 4, 9, 16, 25, 36, 49]);
}

#[test]
fn invalid_construction_is_rejected_before_any_unit_runs() {
	let calls = Arc::new(AtomicUsize::new(0));

	let parent = CancellationToken::new();
	parent.cancel();
	let calls_c = Arc::clone(&calls);
	let result = ProcessorBuilder::new(Strategy::OneAtATime)
		.cancellation(&parent)
		.run_count(3, move || {
			calls_c.fetch_add(1, Ordering::SeqCst);
			async { Ok(()) }
		});
	assert!(matches!(result, Err(ConfigError::AlreadyCanceled)));

	let result = ProcessorBuilder::new(Strategy::Batch { size: 0 }).run_items(0..3u8, |i| async move { Ok(i) });
	assert!(matches!(result, Err(ConfigError::InvalidBatchSize(0))));

	let result = ProcessorBuilder::new(Strategy::BoundedParallel { limit: 64 })
		.limits(Limits {
			max_parallelism: 16,
			..Limits::default()
		})
		.run_items(0..3u8, |i| async move { Ok(i) });
	assert!(matches!(result, Err(ConfigError::ConcurrencyTooLarge { limit: 64, max: 16 })));
	assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn disposal_is_idempotent() {
	let hook_runs = Arc::new(AtomicUsize::new(0));
	let hook_runs_c = Arc::clone(&hook_runs);
	let gate = Gate::new();
	let gate_c = Arc::clone(&gate);
	let processor = ProcessorBuilder::new(Strategy::UnboundedParallel)
		.drain_grace(Duration::from_millis(50))
		.on_dispose(move || {
			hook_runs_c.fetch_add(1, Ordering::SeqCst);
		})
		.run_count(4, move || {
			let gate = Arc::clone(&gate_c);
			async move { gate.pass().await }
		})
		.unwrap();
	let processor = Arc::new(processor);

	wait_until("all starts", || gate.started() == 4).await;
	let canceler = {
		let processor = Arc::clone(&processor);
		tokio::spawn(async move { processor.cancel_all() })
	};
	let started = Instant::now();
	processor.dispose_async().await;
	processor.dispose();
	processor.dispose_async().await;
	canceler.await.unwrap();

	// The blocked units keep running past the grace period; disposal does not wait for them.
	assert!(started.elapsed() < Duration::from_secs(2));
	assert_eq!(hook_runs.load(Ordering::SeqCst), 1);
	assert_eq!(processor.snapshot().canceled, 4);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn dropping_the_processor_cancels_the_run() {
	let gate = Gate::new();
	let processor = gated(Strategy::BoundedParallel { limit: 1 }, 5, &gate);
	let token = processor.cancellation_token().clone();
	let handles = processor.units();

	wait_until("first start", || gate.started() == 1).await;
	drop(processor);

	assert!(token.is_cancelled());
	assert!(handles.iter().all(|handle| handle.status() == UnitStatus::Canceled));
	gate.release(5);
	settle_briefly().await;
	assert_eq!(gate.started(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn hooks_registered_after_disposal_run_immediately() {
	let processor = ProcessorBuilder::new(Strategy::OneAtATime)
		.run_items([1u8], |i| async move { Ok(i) })
		.unwrap();
	processor.results().await.unwrap();
	processor.dispose();

	let ran = Arc::new(AtomicUsize::new(0));
	let ran_c = Arc::clone(&ran);
	processor.on_dispose(move || {
		ran_c.fetch_add(1, Ordering::SeqCst);
	});
	assert_eq!(ran.load(Ordering::SeqCst), 1);
	// Completed units keep their outcome through disposal.
	assert_eq!(processor.unit(0).unwrap().try_outcome().and_then(Outcome::value), Some(&1));
}
