use std::future::Future;
use std::sync::OnceLock;

use tokio::task::JoinHandle;

/// Returns the current runtime handle, or a lazily built shared runtime when
/// called from outside any runtime.
pub(crate) fn runtime_handle() -> tokio::runtime::Handle {
	if let Ok(handle) = tokio::runtime::Handle::try_current() {
		return handle;
	}

	static GLOBAL_RT: OnceLock<tokio::runtime::Runtime> = OnceLock::new();
	let runtime = GLOBAL_RT.get_or_init(|| {
		tokio::runtime::Builder::new_multi_thread()
			.enable_all()
			.thread_name("fanout-global")
			.build()
			.expect("failed to build fanout global tokio runtime")
	});
	runtime.handle().clone()
}

/// Spawns a task onto the active runtime.
pub(crate) fn spawn<F>(label: &'static str, fut: F) -> JoinHandle<F::Output>
where
	F: Future + Send + 'static,
	F::Output: Send + 'static,
{
	tracing::trace!(task = label, "fanout.spawn");
	runtime_handle().spawn(fut)
}
