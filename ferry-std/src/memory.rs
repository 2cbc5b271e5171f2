use std::{
	sync::{
		atomic::{AtomicBool, AtomicU64, Ordering},
		Arc,
	},
	time::SystemTime,
};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use futures::{future::BoxFuture, stream::BoxStream, StreamExt};

use ferry_sdk::{
	backend::{Backend, FilesystemBackend, LinkSink, Metadata},
	error::Error,
	locator::Locator,
	system::SystemFactory,
};

const CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone)]
enum Node {
	Dir,
	File {
		content: Bytes,
		created: SystemTime,
		modified: SystemTime,
	},
	/// Logical resource link; holds attributes instead of bytes.
	Link { attributes: Vec<(String, String)> },
}

/// A named, fully in-memory filesystem.
///
/// Two different names are two distinct resource systems, which makes this
/// the backend of choice for exercising cross-backend transfers without
/// touching a disk or a network. Operation counters are plain observability
/// for exactly that purpose.
#[derive(Debug)]
pub struct MemoryFs {
	name: String,
	nodes: DashMap<String, Node>,
	downloads: AtomicU64,
	uploads: AtomicU64,
	renames: AtomicU64,
	removes: AtomicU64,
	lists: AtomicU64,
	closed: AtomicBool,
}

impl MemoryFs {
	pub fn new(name: &str) -> Self {
		let nodes = DashMap::new();
		nodes.insert("/".to_string(), Node::Dir);
		Self {
			name: name.to_string(),
			nodes,
			downloads: AtomicU64::new(0),
			uploads: AtomicU64::new(0),
			renames: AtomicU64::new(0),
			removes: AtomicU64::new(0),
			lists: AtomicU64::new(0),
			closed: AtomicBool::new(false),
		}
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn download_count(&self) -> u64 {
		self.downloads.load(Ordering::SeqCst)
	}

	pub fn upload_count(&self) -> u64 {
		self.uploads.load(Ordering::SeqCst)
	}

	pub fn rename_count(&self) -> u64 {
		self.renames.load(Ordering::SeqCst)
	}

	pub fn remove_count(&self) -> u64 {
		self.removes.load(Ordering::SeqCst)
	}

	pub fn list_count(&self) -> u64 {
		self.lists.load(Ordering::SeqCst)
	}

	pub fn is_closed(&self) -> bool {
		self.closed.load(Ordering::SeqCst)
	}

	/// Seeds a directory, creating missing ancestors.
	pub fn insert_dir(&self, path: &str) {
		self.insert_ancestors(path);
		self.nodes.insert(path.to_string(), Node::Dir);
	}

	/// Seeds a file, creating missing ancestors.
	pub fn insert_file(&self, path: &str, content: &[u8]) {
		self.insert_ancestors(path);
		let now = SystemTime::now();
		self.nodes.insert(
			path.to_string(),
			Node::File {
				content: Bytes::copy_from_slice(content),
				created: now,
				modified: now,
			},
		);
	}

	/// Seeds a logical link node.
	pub fn insert_link(&self, path: &str, attributes: Vec<(String, String)>) {
		self.insert_ancestors(path);
		self.nodes.insert(path.to_string(), Node::Link { attributes });
	}

	pub fn content(&self, path: &str) -> Option<Bytes> {
		match self.nodes.get(path).map(|entry| entry.value().clone()) {
			Some(Node::File { content, .. }) => Some(content),
			_ => None,
		}
	}

	pub fn link_attributes(&self, path: &str) -> Option<Vec<(String, String)>> {
		match self.nodes.get(path).map(|entry| entry.value().clone()) {
			Some(Node::Link { attributes }) => Some(attributes),
			_ => None,
		}
	}

	pub fn contains(&self, path: &str) -> bool {
		self.nodes.contains_key(path)
	}

	fn insert_ancestors(&self, path: &str) {
		let mut current = String::new();
		for segment in path.split('/').filter(|s| !s.is_empty()) {
			let parent = if current.is_empty() { "/".to_string() } else { current.clone() };
			if !self.nodes.contains_key(&parent) {
				self.nodes.insert(parent, Node::Dir);
			}
			current.push('/');
			current.push_str(segment);
		}
	}

	fn locator(&self, path: &str) -> Locator {
		Locator::parse(&format!("mem://{}{path}", self.name)).unwrap_or_else(|_| {
			Locator::parse("mem://invalid/").expect("static locator")
		})
	}

	fn get(&self, path: &str) -> Option<Node> {
		self.nodes.get(path).map(|entry| entry.value().clone())
	}

	fn require(&self, path: &str) -> Result<Node, Error> {
		self.get(path).ok_or_else(|| Error::NotFound(self.locator(path)))
	}

	fn require_parent_dir(&self, path: &str) -> Result<(), Error> {
		let parent = match path.rfind('/') {
			Some(0) => "/".to_string(),
			Some(cut) => path[..cut].to_string(),
			None => "/".to_string(),
		};
		match self.get(&parent) {
			Some(Node::Dir) => Ok(()),
			Some(_) => Err(Error::Io(std::io::Error::other(format!("`{parent}` is not a directory")))),
			None => Err(Error::NotFound(self.locator(&parent))),
		}
	}

	fn child_names(&self, path: &str) -> Vec<String> {
		let prefix = if path == "/" { "/".to_string() } else { format!("{path}/") };
		let mut names: Vec<String> = self
			.nodes
			.iter()
			.filter_map(|entry| {
				let key = entry.key();
				let rest = key.strip_prefix(&prefix)?;
				if rest.is_empty() || rest.contains('/') {
					None
				} else {
					Some(rest.to_string())
				}
			})
			.collect();
		names.sort();
		names
	}
}

#[async_trait]
impl Backend for MemoryFs {
	fn scheme(&self) -> &str {
		"mem"
	}

	async fn is_composite(&self, path: &str) -> Result<bool, Error> {
		Ok(matches!(self.require(path)?, Node::Dir))
	}

	async fn list(&self, path: &str) -> Result<Vec<String>, Error> {
		self.lists.fetch_add(1, Ordering::SeqCst);
		match self.require(path)? {
			Node::Dir => Ok(self.child_names(path)),
			_ => Err(Error::Io(std::io::Error::other(format!("`{path}` is not a directory")))),
		}
	}

	async fn attributes(&self, path: &str, names: &[&str]) -> Result<Vec<(String, String)>, Error> {
		let node = self.require(path)?;
		let mut pairs = Vec::new();
		for &name in names {
			let value = match (&node, name) {
				(Node::Link { attributes }, _) => attributes.iter().find(|(n, _)| n == name).map(|(_, v)| v.clone()),
				(Node::File { content, .. }, "size") => Some(content.len().to_string()),
				_ => None,
			};
			match value {
				Some(value) => pairs.push((name.to_string(), value)),
				None => tracing::debug!(path, attribute = name, "attribute not available"),
			}
		}
		Ok(pairs)
	}

	fn as_filesystem(&self) -> Option<&dyn FilesystemBackend> {
		Some(self)
	}

	fn as_link_sink(&self) -> Option<&dyn LinkSink> {
		Some(self)
	}

	async fn close(&self) -> Result<(), Error> {
		self.closed.store(true, Ordering::SeqCst);
		Ok(())
	}
}

#[async_trait]
impl FilesystemBackend for MemoryFs {
	async fn metadata(&self, path: &str) -> Result<Metadata, Error> {
		match self.require(path)? {
			Node::Dir => Ok(Metadata {
				is_dir: true,
				..Metadata::default()
			}),
			Node::File { content, created, modified } => Ok(Metadata {
				size: Some(content.len() as u64),
				created: Some(created),
				modified: Some(modified),
				is_file: true,
				..Metadata::default()
			}),
			Node::Link { attributes } => Ok(Metadata {
				extra: attributes.into_iter().collect(),
				..Metadata::default()
			}),
		}
	}

	async fn try_exists(&self, path: &str, _follow_links: bool) -> Result<bool, Error> {
		Ok(self.nodes.contains_key(path))
	}

	async fn create_file(&self, path: &str, ignore_existing: bool) -> Result<(), Error> {
		self.require_parent_dir(path)?;
		if self.nodes.contains_key(path) {
			if ignore_existing {
				return Ok(());
			}
			return Err(Error::Io(std::io::Error::new(
				std::io::ErrorKind::AlreadyExists,
				format!("`{path}` already exists"),
			)));
		}
		let now = SystemTime::now();
		self.nodes.insert(
			path.to_string(),
			Node::File {
				content: Bytes::new(),
				created: now,
				modified: now,
			},
		);
		Ok(())
	}

	async fn mkdir(&self, path: &str, ignore_existing: bool) -> Result<(), Error> {
		if let Some(node) = self.get(path) {
			return match node {
				Node::Dir if ignore_existing => Ok(()),
				_ => Err(Error::Io(std::io::Error::new(
					std::io::ErrorKind::AlreadyExists,
					format!("`{path}` already exists"),
				))),
			};
		}
		self.require_parent_dir(path)?;
		self.nodes.insert(path.to_string(), Node::Dir);
		Ok(())
	}

	async fn remove(&self, path: &str) -> Result<(), Error> {
		let node = self.require(path)?;
		if matches!(node, Node::Dir) && !self.child_names(path).is_empty() {
			return Err(Error::Io(std::io::Error::other(format!("directory `{path}` is not empty"))));
		}
		self.removes.fetch_add(1, Ordering::SeqCst);
		self.nodes.remove(path);
		Ok(())
	}

	async fn rename(&self, from: &str, to: &str) -> Result<(), Error> {
		self.require(from)?;
		self.require_parent_dir(to)?;
		self.renames.fetch_add(1, Ordering::SeqCst);

		// The whole subtree moves with the node.
		let prefix = format!("{from}/");
		let moved: Vec<String> = self
			.nodes
			.iter()
			.filter(|entry| entry.key() == from || entry.key().starts_with(&prefix))
			.map(|entry| entry.key().clone())
			.collect();
		for old_key in moved {
			if let Some((_, node)) = self.nodes.remove(&old_key) {
				let new_key = format!("{to}{}", &old_key[from.len()..]);
				self.nodes.insert(new_key, node);
			}
		}
		Ok(())
	}

	fn download<'a>(&'a self, path: &'a str) -> BoxStream<'a, Result<Bytes, Error>> {
		self.downloads.fetch_add(1, Ordering::SeqCst);
		let stream = async_stream::try_stream! {
			let content = match self.require(path)? {
				Node::File { content, .. } => content,
				_ => Err(Error::Io(std::io::Error::other(format!("`{path}` is not a file"))))?,
			};
			for chunk in content.chunks(CHUNK_SIZE) {
				yield Bytes::copy_from_slice(chunk);
			}
		};
		Box::pin(stream)
	}

	fn upload<'a>(&'a self, to: &'a str, mut stream: BoxStream<'a, Result<Bytes, Error>>) -> BoxFuture<'a, Result<(), Error>> {
		Box::pin(async move {
			self.uploads.fetch_add(1, Ordering::SeqCst);
			self.require_parent_dir(to)?;
			let mut content = Vec::new();
			while let Some(chunk) = stream.next().await {
				content.extend_from_slice(&chunk?);
			}
			let now = SystemTime::now();
			self.nodes.insert(
				to.to_string(),
				Node::File {
					content: Bytes::from(content),
					created: now,
					modified: now,
				},
			);
			Ok(())
		})
	}
}

#[async_trait]
impl LinkSink for MemoryFs {
	async fn create_link(&self, path: &str, attributes: Vec<(String, String)>) -> Result<(), Error> {
		self.require_parent_dir(path)?;
		self.nodes.insert(path.to_string(), Node::Link { attributes });
		Ok(())
	}
}

/// Hands out one shared [`MemoryFs`] per host name, so tests can seed a
/// backend and then reach the very same instance through the registry.
#[derive(Debug, Default)]
pub struct MemoryFactory {
	instances: DashMap<String, Arc<MemoryFs>>,
}

impl MemoryFactory {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn backend(&self, name: &str) -> Arc<MemoryFs> {
		self.instances
			.entry(name.to_string())
			.or_insert_with(|| Arc::new(MemoryFs::new(name)))
			.clone()
	}
}

#[async_trait]
impl SystemFactory for MemoryFactory {
	fn scheme(&self) -> &'static str {
		"mem"
	}

	async fn create(&self, server: &Locator) -> Result<Arc<dyn Backend>, Error> {
		Ok(self.backend(server.host().unwrap_or("default")))
	}
}
