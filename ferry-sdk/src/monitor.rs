use std::{
	collections::HashMap,
	sync::{
		atomic::{AtomicBool, Ordering},
		Mutex,
	},
	time::{Duration, Instant},
};

use tokio::sync::Notify;

use crate::error::Error;

/// Counters for one (sub-)task. Mutated only by the owning [`TaskMonitor`];
/// readers get snapshots.
#[derive(Debug, Clone, Default)]
pub struct TaskStats {
	pub name: String,
	pub todo: u64,
	pub done: u64,
	pub started: Option<Instant>,
	pub stopped: Option<Instant>,
	pub updated: Option<Instant>,
	pub finished: bool,
}

impl TaskStats {
	fn begin(name: &str, todo: u64) -> Self {
		Self {
			name: name.to_string(),
			todo,
			started: Some(Instant::now()),
			..Self::default()
		}
	}

	fn add_done(&mut self, amount: u64) {
		self.done += amount;
		self.updated = Some(Instant::now());
	}

	fn finish(&mut self) {
		self.finished = true;
		self.stopped = Some(Instant::now());
	}

	/// Time between start and stop, or until now while still running.
	pub fn elapsed(&self) -> Duration {
		match self.started {
			Some(started) => self.stopped.unwrap_or_else(Instant::now).duration_since(started),
			None => Duration::ZERO,
		}
	}
}

#[derive(Debug, Default)]
struct MonitorState {
	task: TaskStats,
	subtasks: HashMap<String, TaskStats>,
	current_subtask: Option<String>,
	error: Option<String>,
	log: String,
}

/// Thread-safe aggregation point for progress, cancellation, completion and
/// free-text logging, shared by every layer of one operation.
///
/// Counters live behind a mutex; completion uses a notify so callers can
/// block until done without polling. Cancellation is a plain flag that the
/// engine observes cooperatively at element boundaries.
#[derive(Debug, Default)]
pub struct TaskMonitor {
	state: Mutex<MonitorState>,
	cancelled: AtomicBool,
	completion: Notify,
}

impl TaskMonitor {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn start_task(&self, name: &str, todo: u64) {
		let mut state = self.state.lock().expect("monitor poisoned");
		state.task = TaskStats::begin(name, todo);
	}

	pub fn update_task_done(&self, amount: u64) {
		self.state.lock().expect("monitor poisoned").task.add_done(amount);
	}

	/// Marks the root task done and wakes every completion waiter.
	pub fn end_task(&self) {
		self.state.lock().expect("monitor poisoned").task.finish();
		self.completion.notify_waiters();
	}

	pub fn start_sub_task(&self, name: &str, todo: u64) {
		let mut state = self.state.lock().expect("monitor poisoned");
		state.subtasks.insert(name.to_string(), TaskStats::begin(name, todo));
		state.current_subtask = Some(name.to_string());
	}

	pub fn update_sub_task_done(&self, name: &str, amount: u64) {
		let mut state = self.state.lock().expect("monitor poisoned");
		if let Some(stats) = state.subtasks.get_mut(name) {
			stats.add_done(amount);
		}
	}

	pub fn end_sub_task(&self, name: &str) {
		let mut state = self.state.lock().expect("monitor poisoned");
		if let Some(stats) = state.subtasks.get_mut(name) {
			stats.finish();
		}
		if state.current_subtask.as_deref() == Some(name) {
			state.current_subtask = None;
		}
	}

	pub fn is_cancelled(&self) -> bool {
		self.cancelled.load(Ordering::SeqCst)
	}

	pub fn set_cancelled(&self) {
		self.cancelled.store(true, Ordering::SeqCst);
	}

	/// Records a failure so callers that only poll the monitor still observe
	/// it.
	pub fn set_error(&self, error: &Error) {
		self.state.lock().expect("monitor poisoned").error = Some(error.to_string());
	}

	pub fn has_error(&self) -> bool {
		self.state.lock().expect("monitor poisoned").error.is_some()
	}

	pub fn error_text(&self) -> Option<String> {
		self.state.lock().expect("monitor poisoned").error.clone()
	}

	/// Blocks until [`end_task`](Self::end_task) or the timeout. Returns
	/// whether the task finished; a task that is already done never blocks.
	pub async fn wait_for_completion(&self, timeout: Duration) -> bool {
		let deadline = tokio::time::Instant::now() + timeout;
		loop {
			let notified = self.completion.notified();
			tokio::pin!(notified);
			// notify_waiters only wakes waiters that are already registered,
			// and registration happens on first poll. Enable the waiter
			// before reading the flag so an end_task in between is not lost.
			notified.as_mut().enable();
			if self.state.lock().expect("monitor poisoned").task.finished {
				return true;
			}
			if tokio::time::timeout_at(deadline, notified).await.is_err() {
				return self.state.lock().expect("monitor poisoned").task.finished;
			}
		}
	}

	pub fn task_stats(&self) -> TaskStats {
		self.state.lock().expect("monitor poisoned").task.clone()
	}

	pub fn sub_task_stats(&self, name: &str) -> Option<TaskStats> {
		self.state.lock().expect("monitor poisoned").subtasks.get(name).cloned()
	}

	pub fn current_sub_task_name(&self) -> Option<String> {
		self.state.lock().expect("monitor poisoned").current_subtask.clone()
	}

	pub fn log(&self, line: &str) {
		tracing::debug!(target: "ferry::monitor", "{line}");
		let mut state = self.state.lock().expect("monitor poisoned");
		state.log.push_str(line);
		state.log.push('\n');
	}

	/// Log text starting at `offset` bytes, for incremental readers.
	pub fn log_text(&self, offset: usize) -> String {
		let state = self.state.lock().expect("monitor poisoned");
		state.log.get(offset..).unwrap_or("").to_string()
	}
}

/// Read-side speed and ETA derivation over a stats snapshot. Never touches
/// monitor state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Estimate {
	/// Units (bytes or items) per second since the task started.
	pub rate: f64,
	/// Projected time until `done` reaches `todo`, if the rate allows one.
	pub remaining: Option<Duration>,
}

impl Estimate {
	pub fn from_stats(stats: &TaskStats) -> Self {
		let elapsed = stats.elapsed().as_secs_f64();
		let rate = if elapsed > 0.0 { stats.done as f64 / elapsed } else { 0.0 };
		let remaining = if rate > 0.0 && stats.todo > stats.done {
			Some(Duration::from_secs_f64((stats.todo - stats.done) as f64 / rate))
		} else {
			None
		};
		Self { rate, remaining }
	}
}
