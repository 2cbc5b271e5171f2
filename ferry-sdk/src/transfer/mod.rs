use std::sync::Arc;

use crate::{
	backend::{ATTR_TARGET, ATTR_TITLE},
	error::Error,
	locator::Locator,
	monitor::TaskMonitor,
	path::VPath,
	registry::Registry,
};

pub mod heap;

pub use heap::{CopyHeap, BYTES_SUB_TASK};

/// The outcome of one transfer operation.
#[derive(Debug, Default)]
pub struct Transfer {
	/// Destination paths created, in execution order.
	pub results: Vec<VPath>,
	/// Originals removed by a move, in execution order.
	pub deleted: Vec<VPath>,
}

/// Top-level entry point: classifies the request and dispatches to the
/// right strategy.
///
/// A single source onto an existing file is a direct transfer; any source
/// list onto a directory goes through the heap engine; everything else is
/// rejected. Moves within one resource system become renames.
pub async fn copy_or_move(
	registry: &Registry,
	sources: &[Locator],
	destination: &Locator,
	move_files: bool,
	monitor: Arc<TaskMonitor>,
) -> Result<Transfer, Error> {
	let dest = resolve_destination(registry, destination).await?;
	let mut resolved = Vec::with_capacity(sources.len());
	for locator in sources {
		resolved.push(registry.resolve(locator).await?);
	}

	if dest.is_filesystem() {
		if !dest.exists(true).await? {
			return Err(Error::InvalidDestination {
				destination: destination.clone(),
				source: Box::new(Error::NotFound(dest.locator().clone())),
			});
		}
		if dest.is_file().await? {
			if resolved.len() != 1 {
				return Err(Error::MultipleSourcesToSingleFile {
					destination: dest.locator().clone(),
					sources: resolved.len(),
				});
			}
			let parent = dest.parent().unwrap_or_else(|| dest.clone());
			let source = resolved.remove(0);
			let mut engine = CopyHeap::new(parent, move_files, monitor);
			return engine.run_onto_file(source, dest).await;
		}
		if dest.is_dir().await? {
			let mut engine = CopyHeap::new(dest, move_files, monitor);
			return engine.run(&resolved).await;
		}
	}
	Err(Error::UnsupportedDestination(dest.locator().clone()))
}

/// Drops logical resource links for each source under the destination.
///
/// The destination must accept info-resource children; a filesystem
/// destination without that capability is rejected immediately — there is
/// no retry, no delay. A source that is itself a link contributes the
/// *original* resource's attributes, so a link is never created to another
/// link.
pub async fn link_drop(
	registry: &Registry,
	sources: &[Locator],
	destination: &Locator,
	monitor: Arc<TaskMonitor>,
) -> Result<Transfer, Error> {
	let dest = resolve_destination(registry, destination).await?;
	monitor.start_task(&format!("link into {}", dest.locator()), sources.len() as u64);
	match link_drop_inner(registry, sources, &dest, &monitor).await {
		Ok(transfer) => {
			monitor.end_task();
			Ok(transfer)
		}
		Err(error) => {
			monitor.set_error(&error);
			monitor.end_task();
			Err(error)
		}
	}
}

async fn link_drop_inner(
	registry: &Registry,
	sources: &[Locator],
	dest: &VPath,
	monitor: &TaskMonitor,
) -> Result<Transfer, Error> {
	let sink = dest.system().backend().as_link_sink().ok_or_else(|| {
		Error::UnsupportedOperation(format!(
			"`{}` destinations do not accept resource links",
			dest.locator().scheme()
		))
	})?;

	let mut transfer = Transfer::default();
	for locator in sources {
		if monitor.is_cancelled() {
			return Err(Error::Interrupted);
		}
		let source = registry.resolve(locator).await?;
		let target = dest.resolve(&source.name())?;

		let mut attributes = source.attributes(&[ATTR_TARGET, ATTR_TITLE]).await?;
		if !attributes.iter().any(|(name, _)| name == ATTR_TARGET) {
			attributes = vec![
				(ATTR_TARGET.to_string(), locator.to_string()),
				(ATTR_TITLE.to_string(), source.name()),
			];
		}
		sink.create_link(target.locator().path(), attributes).await?;
		transfer.results.push(target);
		monitor.update_task_done(1);
	}
	Ok(transfer)
}

async fn resolve_destination(registry: &Registry, destination: &Locator) -> Result<VPath, Error> {
	registry.resolve(destination).await.map_err(|e| Error::InvalidDestination {
		destination: destination.clone(),
		source: Box::new(e),
	})
}
