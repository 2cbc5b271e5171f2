//! End-to-end transfer scenarios over the in-memory backend, plus registry
//! behaviour that needs real factories.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use futures::{future::BoxFuture, stream::BoxStream};

use ferry_sdk::{
	backend::{Backend, FilesystemBackend, Metadata, ATTR_TARGET, ATTR_TITLE},
	error::Error,
	locator::Locator,
	monitor::TaskMonitor,
	registry::Registry,
	system::SystemFactory,
	transfer::{copy_or_move, link_drop, CopyHeap, BYTES_SUB_TASK},
};

use crate::{
	config::Mounts,
	local::LocalFactory,
	memory::{MemoryFactory, MemoryFs},
};

fn mem_registry(names: &[&str]) -> (Registry, Vec<Arc<MemoryFs>>) {
	let factory = MemoryFactory::new();
	let backends = names.iter().map(|name| factory.backend(name)).collect();
	let registry = Registry::new();
	registry.register(Arc::new(factory));
	(registry, backends)
}

fn loc(text: &str) -> Locator {
	Locator::parse(text).unwrap()
}

#[tokio::test]
async fn scan_orders_composites_before_leaves() {
	let (registry, backends) = mem_registry(&["box"]);
	let fs = &backends[0];
	fs.insert_file("/src/fileA", &[1u8; 100]);
	fs.insert_file("/src/dirB/fileC", &[2u8; 50]);
	fs.insert_dir("/dst");

	let sources = vec![
		registry.resolve(&loc("mem://box/src/fileA")).await.unwrap(),
		registry.resolve(&loc("mem://box/src/dirB")).await.unwrap(),
	];
	let dest = registry.resolve(&loc("mem://box/dst")).await.unwrap();

	let mut engine = CopyHeap::new(dest, false, Arc::new(TaskMonitor::new()));
	engine.scan(&sources).await.unwrap();

	let plan: Vec<String> = engine.plan().into_iter().map(|l| l.path().to_string()).collect();
	assert_eq!(plan, vec!["/src/dirB", "/src/dirB/fileC", "/src/fileA"]);
	assert_eq!(engine.bytes_todo(), 150);

	let transfer = engine.execute().await.unwrap();
	assert_eq!(engine.bytes_done(), engine.bytes_todo());
	assert_eq!(transfer.results.len(), 3);
	assert!(transfer.deleted.is_empty());
	assert_eq!(fs.content("/dst/fileA").unwrap().len(), 100);
	assert_eq!(fs.content("/dst/dirB/fileC").unwrap().len(), 50);
	assert!(fs.contains("/src/fileA"));
}

#[tokio::test]
async fn same_system_move_is_a_rename_without_byte_traffic() {
	let (registry, backends) = mem_registry(&["box"]);
	let fs = &backends[0];
	fs.insert_file("/src/big.bin", &[0u8; 4096]);
	fs.insert_dir("/dst");

	let monitor = Arc::new(TaskMonitor::new());
	let transfer = copy_or_move(
		&registry,
		&[loc("mem://box/src/big.bin")],
		&loc("mem://box/dst"),
		true,
		monitor.clone(),
	)
	.await
	.unwrap();

	assert_eq!(fs.rename_count(), 1);
	assert_eq!(fs.download_count(), 0);
	assert!(fs.contains("/dst/big.bin"));
	assert!(!fs.contains("/src/big.bin"));
	assert_eq!(transfer.deleted.len(), 1);

	// The element counter advances, the byte sub-task does not: no bytes
	// were streamed for a rename.
	assert_eq!(monitor.task_stats().done, 1);
	let bytes = monitor.sub_task_stats(BYTES_SUB_TASK).unwrap();
	assert_eq!(bytes.todo, 4096);
	assert_eq!(bytes.done, 0);
	assert!(monitor.wait_for_completion(Duration::from_secs(1)).await);
}

#[tokio::test]
async fn cross_system_move_streams_then_deletes() {
	let (registry, backends) = mem_registry(&["x", "y"]);
	let (from, to) = (&backends[0], &backends[1]);
	from.insert_file("/src/f", b"payload");
	to.insert_dir("/dst");

	let monitor = Arc::new(TaskMonitor::new());
	let transfer = copy_or_move(&registry, &[loc("mem://x/src/f")], &loc("mem://y/dst"), true, monitor.clone())
		.await
		.unwrap();

	assert_eq!(from.download_count(), 1);
	assert_eq!(to.upload_count(), 1);
	assert_eq!(to.content("/dst/f").unwrap(), bytes::Bytes::from_static(b"payload"));
	assert!(!from.contains("/src/f"));
	assert_eq!(transfer.results[0].locator().host(), Some("y"));

	let bytes = monitor.sub_task_stats(BYTES_SUB_TASK).unwrap();
	assert_eq!(bytes.done, 7);
	assert!(bytes.finished);
}

#[tokio::test]
async fn moved_directory_keeps_its_subtree_with_one_rename() {
	let (registry, backends) = mem_registry(&["box"]);
	let fs = &backends[0];
	fs.insert_file("/src/dir/deep/file", b"x");
	fs.insert_dir("/dst");

	let sources = vec![registry.resolve(&loc("mem://box/src/dir")).await.unwrap()];
	let dest = registry.resolve(&loc("mem://box/dst")).await.unwrap();

	let mut engine = CopyHeap::new(dest, true, Arc::new(TaskMonitor::new()));
	engine.scan(&sources).await.unwrap();
	// The subtree is not enumerated; the directory moves as one element.
	assert_eq!(engine.plan().len(), 1);

	engine.execute().await.unwrap();
	assert_eq!(fs.rename_count(), 1);
	assert!(fs.contains("/dst/dir/deep/file"));
	assert!(!fs.contains("/src/dir"));
}

#[tokio::test]
async fn single_source_onto_existing_file_overwrites_it() {
	let (registry, backends) = mem_registry(&["box"]);
	let fs = &backends[0];
	fs.insert_file("/src/a.txt", b"hello");
	fs.insert_file("/dst/target.txt", b"old");

	let transfer = copy_or_move(
		&registry,
		&[loc("mem://box/src/a.txt")],
		&loc("mem://box/dst/target.txt"),
		false,
		Arc::new(TaskMonitor::new()),
	)
	.await
	.unwrap();

	assert_eq!(fs.content("/dst/target.txt").unwrap(), bytes::Bytes::from_static(b"hello"));
	assert_eq!(transfer.results[0].locator().path(), "/dst/target.txt");
}

#[tokio::test]
async fn many_sources_onto_one_file_is_rejected() {
	let (registry, backends) = mem_registry(&["box"]);
	let fs = &backends[0];
	fs.insert_file("/a", b"1");
	fs.insert_file("/b", b"2");
	fs.insert_file("/dst.txt", b"");

	let err = copy_or_move(
		&registry,
		&[loc("mem://box/a"), loc("mem://box/b")],
		&loc("mem://box/dst.txt"),
		false,
		Arc::new(TaskMonitor::new()),
	)
	.await
	.unwrap_err();
	assert!(matches!(err, Error::MultipleSourcesToSingleFile { sources: 2, .. }));
	assert_eq!(fs.content("/dst.txt").unwrap().len(), 0);
}

#[tokio::test]
async fn missing_destination_is_invalid() {
	let (registry, backends) = mem_registry(&["box"]);
	backends[0].insert_file("/a", b"1");

	let err = copy_or_move(
		&registry,
		&[loc("mem://box/a")],
		&loc("mem://box/nowhere"),
		false,
		Arc::new(TaskMonitor::new()),
	)
	.await
	.unwrap_err();
	match err {
		Error::InvalidDestination { source, .. } => assert!(matches!(*source, Error::NotFound(_))),
		other => panic!("unexpected error: {other}"),
	}
}

#[tokio::test]
async fn engine_runs_exactly_once() {
	let (registry, backends) = mem_registry(&["box"]);
	let fs = &backends[0];
	fs.insert_file("/src/f", b"data");
	fs.insert_dir("/dst");

	let sources = vec![registry.resolve(&loc("mem://box/src/f")).await.unwrap()];
	let dest = registry.resolve(&loc("mem://box/dst")).await.unwrap();

	let mut engine = CopyHeap::new(dest, false, Arc::new(TaskMonitor::new()));
	engine.run(&sources).await.unwrap();
	assert_eq!(fs.upload_count(), 1);

	let err = engine.run(&sources).await.unwrap_err();
	assert!(matches!(err, Error::EngineReused));
	// Nothing ran a second time.
	assert_eq!(fs.upload_count(), 1);
}

#[tokio::test]
async fn cancellation_aborts_before_any_element_runs() {
	let (registry, backends) = mem_registry(&["box"]);
	let fs = &backends[0];
	fs.insert_file("/src/f", b"data");
	fs.insert_dir("/dst");

	let monitor = Arc::new(TaskMonitor::new());
	monitor.set_cancelled();

	let err = copy_or_move(&registry, &[loc("mem://box/src/f")], &loc("mem://box/dst"), false, monitor.clone())
		.await
		.unwrap_err();
	assert!(matches!(err, Error::Interrupted));
	assert!(monitor.has_error());
	assert!(!fs.contains("/dst/f"));
	assert_eq!(monitor.task_stats().done, 0);
}

#[tokio::test]
async fn source_vanishing_between_scan_and_execute_aborts() {
	let (registry, backends) = mem_registry(&["box"]);
	let fs = &backends[0];
	fs.insert_file("/src/a", b"1");
	fs.insert_file("/src/b", b"2");
	fs.insert_dir("/dst");

	let sources = vec![
		registry.resolve(&loc("mem://box/src/a")).await.unwrap(),
		registry.resolve(&loc("mem://box/src/b")).await.unwrap(),
	];
	let dest = registry.resolve(&loc("mem://box/dst")).await.unwrap();

	let monitor = Arc::new(TaskMonitor::new());
	let mut engine = CopyHeap::new(dest, false, monitor.clone());
	engine.scan(&sources).await.unwrap();
	fs.remove("/src/b").await.unwrap();

	let err = engine.execute().await.unwrap_err();
	assert!(matches!(err, Error::NotFound(_)));
	assert!(monitor.has_error());
	// Elements before the vanished one completed; there is no
	// skip-and-continue past it.
	assert!(fs.contains("/dst/a"));
	assert!(!fs.contains("/dst/b"));
	assert_eq!(monitor.task_stats().done, 1);
}

/// Forwards to an in-memory tree but flips the shared cancel flag once the
/// first upload lands.
#[derive(Debug)]
struct CancelAfterUpload {
	inner: Arc<MemoryFs>,
	monitor: Arc<TaskMonitor>,
}

#[async_trait]
impl Backend for CancelAfterUpload {
	fn scheme(&self) -> &str {
		"rig"
	}

	async fn is_composite(&self, path: &str) -> Result<bool, Error> {
		self.inner.is_composite(path).await
	}

	async fn list(&self, path: &str) -> Result<Vec<String>, Error> {
		self.inner.list(path).await
	}

	async fn attributes(&self, path: &str, names: &[&str]) -> Result<Vec<(String, String)>, Error> {
		self.inner.attributes(path, names).await
	}

	fn as_filesystem(&self) -> Option<&dyn FilesystemBackend> {
		Some(self)
	}
}

#[async_trait]
impl FilesystemBackend for CancelAfterUpload {
	async fn metadata(&self, path: &str) -> Result<Metadata, Error> {
		self.inner.metadata(path).await
	}

	async fn try_exists(&self, path: &str, follow_links: bool) -> Result<bool, Error> {
		self.inner.try_exists(path, follow_links).await
	}

	async fn create_file(&self, path: &str, ignore_existing: bool) -> Result<(), Error> {
		self.inner.create_file(path, ignore_existing).await
	}

	async fn mkdir(&self, path: &str, ignore_existing: bool) -> Result<(), Error> {
		self.inner.mkdir(path, ignore_existing).await
	}

	async fn remove(&self, path: &str) -> Result<(), Error> {
		self.inner.remove(path).await
	}

	async fn rename(&self, from: &str, to: &str) -> Result<(), Error> {
		self.inner.rename(from, to).await
	}

	fn download<'a>(&'a self, path: &'a str) -> BoxStream<'a, Result<Bytes, Error>> {
		self.inner.download(path)
	}

	fn upload<'a>(&'a self, to: &'a str, stream: BoxStream<'a, Result<Bytes, Error>>) -> BoxFuture<'a, Result<(), Error>> {
		Box::pin(async move {
			self.inner.upload(to, stream).await?;
			self.monitor.set_cancelled();
			Ok(())
		})
	}
}

#[derive(Debug)]
struct CancelAfterUploadFactory {
	inner: Arc<MemoryFs>,
	monitor: Arc<TaskMonitor>,
}

#[async_trait]
impl SystemFactory for CancelAfterUploadFactory {
	fn scheme(&self) -> &'static str {
		"rig"
	}

	async fn create(&self, _server: &Locator) -> Result<Arc<dyn Backend>, Error> {
		Ok(Arc::new(CancelAfterUpload {
			inner: self.inner.clone(),
			monitor: self.monitor.clone(),
		}))
	}
}

#[tokio::test]
async fn cancellation_mid_run_stops_at_the_next_element_boundary() {
	let inner = Arc::new(MemoryFs::new("rig"));
	inner.insert_file("/src/a", b"aa");
	inner.insert_file("/src/b", b"bb");
	inner.insert_dir("/dst");

	let monitor = Arc::new(TaskMonitor::new());
	let registry = Registry::new();
	registry.register(Arc::new(CancelAfterUploadFactory {
		inner: inner.clone(),
		monitor: monitor.clone(),
	}));

	let err = copy_or_move(
		&registry,
		&[loc("rig://h/src/a"), loc("rig://h/src/b")],
		&loc("rig://h/dst"),
		false,
		monitor.clone(),
	)
	.await
	.unwrap_err();

	// The flag went up during the first element; the second never ran.
	assert!(matches!(err, Error::Interrupted));
	assert!(monitor.is_cancelled());
	assert!(monitor.has_error());
	assert!(inner.contains("/dst/a"));
	assert!(!inner.contains("/dst/b"));
	assert_eq!(monitor.task_stats().done, 1);
}

/// A composite whose listing escapes its own subtree.
#[derive(Debug)]
struct EscapingFs;

#[async_trait]
impl Backend for EscapingFs {
	fn scheme(&self) -> &str {
		"trap"
	}

	async fn is_composite(&self, _path: &str) -> Result<bool, Error> {
		Ok(true)
	}

	async fn list(&self, _path: &str) -> Result<Vec<String>, Error> {
		Ok(vec!["/outside".to_string()])
	}

	async fn attributes(&self, _path: &str, _names: &[&str]) -> Result<Vec<(String, String)>, Error> {
		Ok(Vec::new())
	}

	fn as_filesystem(&self) -> Option<&dyn FilesystemBackend> {
		Some(self)
	}
}

#[async_trait]
impl FilesystemBackend for EscapingFs {
	async fn metadata(&self, _path: &str) -> Result<Metadata, Error> {
		Ok(Metadata {
			is_dir: true,
			..Metadata::default()
		})
	}

	async fn try_exists(&self, _path: &str, _follow_links: bool) -> Result<bool, Error> {
		Ok(true)
	}

	async fn create_file(&self, _path: &str, _ignore_existing: bool) -> Result<(), Error> {
		Ok(())
	}

	async fn mkdir(&self, _path: &str, _ignore_existing: bool) -> Result<(), Error> {
		Ok(())
	}

	async fn remove(&self, _path: &str) -> Result<(), Error> {
		Ok(())
	}

	async fn rename(&self, _from: &str, _to: &str) -> Result<(), Error> {
		Ok(())
	}

	fn download<'a>(&'a self, _path: &'a str) -> BoxStream<'a, Result<Bytes, Error>> {
		Box::pin(futures::stream::empty())
	}

	fn upload<'a>(&'a self, _to: &'a str, _stream: BoxStream<'a, Result<Bytes, Error>>) -> BoxFuture<'a, Result<(), Error>> {
		Box::pin(async { Ok(()) })
	}
}

#[derive(Debug)]
struct EscapingFactory;

#[async_trait]
impl SystemFactory for EscapingFactory {
	fn scheme(&self) -> &'static str {
		"trap"
	}

	async fn create(&self, _server: &Locator) -> Result<Arc<dyn Backend>, Error> {
		Ok(Arc::new(EscapingFs))
	}
}

#[tokio::test]
async fn recursive_delete_refuses_children_outside_the_subtree() {
	let registry = Registry::new();
	registry.register(Arc::new(EscapingFactory));

	let dir = registry.resolve(&loc("trap://h/d")).await.unwrap();
	let err = dir.delete(true).await.unwrap_err();
	assert!(matches!(err, Error::DeleteEscape { .. }));
}

#[tokio::test]
async fn factory_failures_keep_their_error_kind() {
	let registry = Registry::new();
	registry.register(Arc::new(crate::sftp::SftpFactory::new()));

	// No user-info on an sftp locator is a configuration mistake, and it
	// surfaces as such rather than as opaque backend text.
	let err = registry.resolve(&loc("sftp://files.example.com/p")).await.unwrap_err();
	assert!(matches!(err, Error::InvalidLocator { .. }));
}

#[tokio::test]
async fn mkdirs_creates_only_the_missing_levels() {
	let (registry, backends) = mem_registry(&["box"]);
	let fs = &backends[0];
	fs.insert_dir("/a");

	let path = registry.resolve(&loc("mem://box/a/b/c")).await.unwrap();
	path.mkdirs(true).await.unwrap();
	assert!(fs.contains("/a/b"));
	assert!(fs.contains("/a/b/c"));

	// A second call over a fully existing chain is a no-op when tolerated
	// and an error when not.
	path.mkdirs(true).await.unwrap();
	assert!(path.mkdirs(false).await.is_err());
}

#[tokio::test]
async fn recursive_delete_takes_the_whole_tree() {
	let (registry, backends) = mem_registry(&["box"]);
	let fs = &backends[0];
	fs.insert_file("/d/sub/f1", b"1");
	fs.insert_file("/d/f2", b"2");

	let path = registry.resolve(&loc("mem://box/d")).await.unwrap();
	path.delete(true).await.unwrap();
	assert!(!fs.contains("/d"));
	assert!(!fs.contains("/d/sub/f1"));
}

#[tokio::test]
async fn rename_across_systems_is_refused() {
	let (registry, backends) = mem_registry(&["x", "y"]);
	backends[0].insert_file("/f", b"1");
	backends[1].insert_dir("/dst");

	let from = registry.resolve(&loc("mem://x/f")).await.unwrap();
	let to = registry.resolve(&loc("mem://y/dst/f")).await.unwrap();
	let err = from.rename_to(&to).await.unwrap_err();
	assert!(matches!(err, Error::SystemMismatch { .. }));
}

#[tokio::test]
async fn link_drop_synthesizes_attributes_for_plain_files() {
	let (registry, backends) = mem_registry(&["box"]);
	let fs = &backends[0];
	fs.insert_file("/src/doc.txt", b"text");
	fs.insert_dir("/links");

	let monitor = Arc::new(TaskMonitor::new());
	let transfer = link_drop(&registry, &[loc("mem://box/src/doc.txt")], &loc("mem://box/links"), monitor.clone())
		.await
		.unwrap();

	let attrs = fs.link_attributes("/links/doc.txt").unwrap();
	assert!(attrs.contains(&(ATTR_TARGET.to_string(), "mem://box/src/doc.txt".to_string())));
	assert!(attrs.contains(&(ATTR_TITLE.to_string(), "doc.txt".to_string())));
	assert_eq!(transfer.results.len(), 1);
	assert_eq!(monitor.task_stats().done, 1);
	// The original is untouched; a link drop never moves bytes.
	assert!(fs.contains("/src/doc.txt"));
	assert_eq!(fs.download_count(), 0);
}

#[tokio::test]
async fn link_drop_on_a_link_points_at_the_original() {
	let (registry, backends) = mem_registry(&["box"]);
	let fs = &backends[0];
	fs.insert_link(
		"/src/orig.lnk",
		vec![
			(ATTR_TARGET.to_string(), "mem://elsewhere/thing".to_string()),
			(ATTR_TITLE.to_string(), "The Thing".to_string()),
		],
	);
	fs.insert_dir("/links");

	link_drop(
		&registry,
		&[loc("mem://box/src/orig.lnk")],
		&loc("mem://box/links"),
		Arc::new(TaskMonitor::new()),
	)
	.await
	.unwrap();

	// The new link carries the original resource's attributes, not a
	// pointer to the source link.
	let attrs = fs.link_attributes("/links/orig.lnk").unwrap();
	assert!(attrs.contains(&(ATTR_TARGET.to_string(), "mem://elsewhere/thing".to_string())));
	assert!(attrs.contains(&(ATTR_TITLE.to_string(), "The Thing".to_string())));
}

#[tokio::test]
async fn link_drop_needs_a_capable_destination() {
	let registry = Registry::new();
	registry.register(Arc::new(LocalFactory));
	let factory = MemoryFactory::new();
	factory.backend("box").insert_file("/src/f", b"1");
	registry.register(Arc::new(factory));

	let dir = tempfile::tempdir().unwrap();
	let dest = loc(&format!("file://{}", dir.path().to_string_lossy()));
	let err = link_drop(&registry, &[loc("mem://box/src/f")], &dest, Arc::new(TaskMonitor::new()))
		.await
		.unwrap_err();
	assert!(matches!(err, Error::UnsupportedOperation(_)));
}

#[tokio::test]
async fn registry_shares_systems_per_canonical_server() {
	let (registry, _backends) = mem_registry(&["x", "y"]);
	let a = registry.resolve(&loc("mem://x/one")).await.unwrap();
	let b = registry.resolve(&loc("mem://x/two")).await.unwrap();
	let c = registry.resolve(&loc("mem://y/one")).await.unwrap();
	assert!(Arc::ptr_eq(a.system(), b.system()));
	assert!(!Arc::ptr_eq(a.system(), c.system()));
}

#[tokio::test]
async fn unknown_schemes_are_rejected() {
	let (registry, _backends) = mem_registry(&["box"]);
	let err = registry.resolve(&loc("gopher://example/f")).await.unwrap_err();
	assert!(matches!(err, Error::UnsupportedScheme(scheme) if scheme == "gopher"));
}

#[tokio::test]
async fn cleanup_closes_cached_backends() {
	let (registry, backends) = mem_registry(&["box"]);
	registry.resolve(&loc("mem://box/")).await.unwrap();
	assert!(!backends[0].is_closed());
	registry.cleanup().await;
	assert!(backends[0].is_closed());
}

#[tokio::test]
async fn mounts_load_from_a_file() {
	let dir = tempfile::tempdir().unwrap();
	let path = dir.path().join("mounts.toml");
	tokio::fs::write(&path, "[[mounts]]\ntype = \"memory\"\nname = \"scratch\"\n").await.unwrap();

	let mounts = Mounts::from_file(&path).await.unwrap();
	let registry = mounts.registry();
	assert_eq!(registry.registered_schemes(), vec!["mem"]);
	registry.resolve(&loc("mem://scratch/")).await.unwrap();
}

#[test]
fn standard_registry_serves_every_scheme() {
	let registry = crate::standard_registry();
	assert_eq!(registry.registered_schemes(), vec!["file", "mem", "sftp"]);
}
