use std::sync::Arc;

use futures::{future::BoxFuture, StreamExt};

use crate::{
	backend::{ATTR_TARGET, ATTR_TITLE},
	error::Error,
	locator::Locator,
	monitor::TaskMonitor,
	path::VPath,
	transfer::Transfer,
};

/// Name of the monitor sub-task that tracks streamed bytes across the whole
/// operation, independent of the per-element root task.
pub const BYTES_SUB_TASK: &str = "bytes";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ElementKind {
	Directory,
	File,
	/// A source without the filesystem capability; replicated as a resource
	/// link, never as bytes.
	Opaque,
}

/// One unit of work produced by the scan phase.
#[derive(Debug, Clone)]
struct HeapElement {
	source: VPath,
	kind: ElementKind,
	/// Destination *directory*; the final path is re-joined with the source
	/// basename at execution time, not at scan time.
	dest_dir: VPath,
	/// Explicit target, used only by the single-file-onto-file variant.
	target: Option<VPath>,
	size: u64,
	done: bool,
	deleted: bool,
}

/// Replicates source trees under one destination directory in two phases:
/// a depth-first scan into a flat ordered work list, then sequential
/// execution with byte accounting and cooperative cancellation.
///
/// An instance runs exactly once; each operation constructs a fresh engine.
pub struct CopyHeap {
	dest_dir: VPath,
	move_files: bool,
	monitor: Arc<TaskMonitor>,
	heap: Vec<HeapElement>,
	bytes_todo: u64,
	bytes_done: u64,
	scanned: bool,
	ran: bool,
}

impl CopyHeap {
	pub fn new(dest_dir: VPath, move_files: bool, monitor: Arc<TaskMonitor>) -> Self {
		Self {
			dest_dir,
			move_files,
			monitor,
			heap: Vec::new(),
			bytes_todo: 0,
			bytes_done: 0,
			scanned: false,
			ran: false,
		}
	}

	/// Sum of the byte sizes recorded during the scan.
	pub fn bytes_todo(&self) -> u64 {
		self.bytes_todo
	}

	/// Bytes attributed to completed elements so far.
	pub fn bytes_done(&self) -> u64 {
		self.bytes_done
	}

	/// Source locators in execution order. Available after the scan.
	pub fn plan(&self) -> Vec<&Locator> {
		self.heap.iter().map(|element| element.source.locator()).collect()
	}

	/// Scan phase: expands the sources depth-first, composites before
	/// leaves within each level.
	pub async fn scan(&mut self, sources: &[VPath]) -> Result<(), Error> {
		if self.scanned {
			return Err(Error::EngineReused);
		}
		self.scanned = true;
		let dest_dir = self.dest_dir.clone();
		self.scan_level(sources.to_vec(), dest_dir).await?;
		tracing::debug!(elements = self.heap.len(), bytes = self.bytes_todo, "scan complete");
		Ok(())
	}

	fn scan_level<'a>(&'a mut self, nodes: Vec<VPath>, dest_dir: VPath) -> BoxFuture<'a, Result<(), Error>> {
		Box::pin(async move {
			let mut leaves = Vec::new();
			for node in nodes {
				if self.monitor.is_cancelled() {
					return Err(Error::Interrupted);
				}
				if node.is_composite().await? {
					// A composite moved within one resource system is
					// renamed whole; its subtree is not enumerated.
					let rename_whole = self.move_files && node.system() == dest_dir.system();
					let children = if rename_whole { Vec::new() } else { node.list().await? };
					let child_dest = dest_dir.resolve(&node.name())?;
					self.push(node, ElementKind::Directory, dest_dir.clone(), 0);
					if !rename_whole {
						self.scan_level(children, child_dest).await?;
					}
				} else {
					leaves.push(node);
				}
			}
			for leaf in leaves {
				let (kind, size) = if leaf.is_filesystem() {
					(ElementKind::File, leaf.len().await?)
				} else {
					(ElementKind::Opaque, 0)
				};
				self.push(leaf, kind, dest_dir.clone(), size);
			}
			Ok(())
		})
	}

	fn push(&mut self, source: VPath, kind: ElementKind, dest_dir: VPath, size: u64) {
		self.bytes_todo += size;
		self.heap.push(HeapElement {
			source,
			kind,
			dest_dir,
			target: None,
			size,
			done: false,
			deleted: false,
		});
	}

	/// Execute phase: runs the heap in scan order. Any failure aborts the
	/// whole run and is recorded on the monitor before propagating.
	pub async fn execute(&mut self) -> Result<Transfer, Error> {
		if self.ran {
			return Err(Error::EngineReused);
		}
		self.ran = true;

		let verb = if self.move_files { "move" } else { "copy" };
		self.monitor
			.start_task(&format!("{verb} to {}", self.dest_dir.locator()), self.heap.len() as u64);
		self.monitor.start_sub_task(BYTES_SUB_TASK, self.bytes_todo);

		match self.execute_inner().await {
			Ok(transfer) => {
				self.monitor.end_sub_task(BYTES_SUB_TASK);
				self.monitor.end_task();
				Ok(transfer)
			}
			Err(error) => {
				if error.is_interrupted() {
					self.monitor.set_cancelled();
				}
				self.monitor.set_error(&error);
				// Waiters are released even on failure; they observe the
				// error through `has_error`.
				self.monitor.end_task();
				Err(error)
			}
		}
	}

	/// Convenience: scan then execute.
	pub async fn run(&mut self, sources: &[VPath]) -> Result<Transfer, Error> {
		if self.scanned || self.ran {
			return Err(Error::EngineReused);
		}
		if let Err(error) = self.scan(sources).await {
			self.monitor.set_error(&error);
			return Err(error);
		}
		self.execute().await
	}

	/// The single-element variant used when the destination is an existing
	/// file rather than a directory.
	pub async fn run_onto_file(&mut self, source: VPath, target: VPath) -> Result<Transfer, Error> {
		if self.scanned || self.ran {
			return Err(Error::EngineReused);
		}
		self.scanned = true;
		let (kind, size) = if source.is_filesystem() {
			(ElementKind::File, source.len().await?)
		} else {
			(ElementKind::Opaque, 0)
		};
		let dest_dir = self.dest_dir.clone();
		self.push(source, kind, dest_dir, size);
		self.heap[0].target = Some(target);
		self.execute().await
	}

	async fn execute_inner(&mut self) -> Result<Transfer, Error> {
		let mut transfer = Transfer::default();
		for index in 0..self.heap.len() {
			if self.monitor.is_cancelled() {
				return Err(Error::Interrupted);
			}
			let element = self.heap[index].clone();

			// Re-resolved now rather than at scan time: earlier elements may
			// only just have created the directory this one lands in.
			let target = match &element.target {
				Some(target) => target.clone(),
				None => element.dest_dir.resolve(&element.source.name())?,
			};
			let same_system_move = self.move_files && element.source.system() == target.system();

			// The tree may have changed between scan and execute. A vanished
			// source aborts the operation; there is no skip-and-continue.
			if element.kind != ElementKind::Opaque && !element.source.exists(true).await? {
				return Err(Error::NotFound(element.source.locator().clone()));
			}

			let mut deleted = false;
			match element.kind {
				ElementKind::Directory => {
					if same_system_move {
						element.source.rename_to(&target).await?;
						deleted = true;
					} else {
						// Contents arrive through their own heap entries.
						target.mkdir(true).await?;
					}
				}
				ElementKind::File => {
					if same_system_move {
						element.source.rename_to(&target).await?;
						deleted = true;
					} else {
						self.stream_copy(&element.source, &target).await?;
						if self.move_files {
							// The original goes away only after the copy
							// stream has been fully flushed and closed.
							element.source.delete(false).await?;
							deleted = true;
						}
					}
				}
				ElementKind::Opaque => {
					let sink = target.system().backend().as_link_sink().ok_or_else(|| {
						Error::UnsupportedOperation(format!(
							"`{}` destinations cannot hold non-filesystem resources",
							target.locator().scheme()
						))
					})?;
					let mut attributes = element.source.attributes(&[ATTR_TARGET, ATTR_TITLE]).await?;
					if !attributes.iter().any(|(name, _)| name == ATTR_TARGET) {
						attributes = vec![
							(ATTR_TARGET.to_string(), element.source.locator().to_string()),
							(ATTR_TITLE.to_string(), element.source.name()),
						];
					}
					sink.create_link(target.locator().path(), attributes).await?;
				}
			}

			self.heap[index].done = true;
			self.heap[index].deleted = deleted;
			self.bytes_done += element.size;
			self.monitor.update_task_done(1);
			self.monitor.log(&format!("{} -> {}", element.source.locator(), target.locator()));

			transfer.results.push(target);
			if deleted {
				transfer.deleted.push(element.source.clone());
			}
		}
		Ok(transfer)
	}

	async fn stream_copy(&self, source: &VPath, target: &VPath) -> Result<(), Error> {
		let from = source.filesystem()?;
		let to = target.filesystem()?;
		let monitor = self.monitor.clone();
		let stream = from.download(source.locator().path()).map(move |chunk| {
			if let Ok(chunk) = &chunk {
				monitor.update_sub_task_done(BYTES_SUB_TASK, chunk.len() as u64);
			}
			chunk
		});
		to.upload(target.locator().path(), Box::pin(stream)).await
	}
}
