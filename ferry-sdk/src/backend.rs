use std::{collections::HashMap, fmt::Debug, time::SystemTime};

use async_trait::async_trait;
use bytes::Bytes;
use futures::{future::BoxFuture, stream::BoxStream};

use crate::error::Error;

/// Backend-reported attributes of a single resource.
#[derive(Debug, Clone, Default)]
pub struct Metadata {
	pub size: Option<u64>,
	pub modified: Option<SystemTime>,
	pub created: Option<SystemTime>,
	pub is_dir: bool,
	pub is_file: bool,
	pub extra: HashMap<String, String>,
}

/// The base capability every backing store must provide.
///
/// Paths are the locator path component: absolute, `/`-separated strings.
/// A backend serves exactly one resource system instance and never sees
/// locators from another authority.
#[async_trait]
pub trait Backend: Debug + Send + Sync {
	fn scheme(&self) -> &str;

	/// Whether the resource can have children.
	async fn is_composite(&self, path: &str) -> Result<bool, Error>;

	/// Ordered child names of a composite resource.
	async fn list(&self, path: &str) -> Result<Vec<String>, Error>;

	/// Name/value pairs for the requested attribute names. Unknown names are
	/// omitted, not fatal; implementations log them at debug level.
	async fn attributes(&self, path: &str, names: &[&str]) -> Result<Vec<(String, String)>, Error>;

	/// The extended filesystem capability, if this backend has one.
	fn as_filesystem(&self) -> Option<&dyn FilesystemBackend> {
		None
	}

	/// The info-resource link capability, if this backend has one.
	fn as_link_sink(&self) -> Option<&dyn LinkSink> {
		None
	}

	/// Releases backend connections. Called by the registry on cleanup.
	async fn close(&self) -> Result<(), Error> {
		Ok(())
	}
}

/// Extended capability for backends that behave like a filesystem.
#[async_trait]
pub trait FilesystemBackend: Backend {
	async fn metadata(&self, path: &str) -> Result<Metadata, Error>;

	async fn try_exists(&self, path: &str, follow_links: bool) -> Result<bool, Error>;

	async fn create_file(&self, path: &str, ignore_existing: bool) -> Result<(), Error>;

	/// Creates one directory level. The parent must already exist.
	async fn mkdir(&self, path: &str, ignore_existing: bool) -> Result<(), Error>;

	/// Removes a single node. Composite nodes must be empty.
	async fn remove(&self, path: &str) -> Result<(), Error>;

	async fn rename(&self, from: &str, to: &str) -> Result<(), Error>;

	/// Streams the file content in bounded chunks.
	fn download<'a>(&'a self, path: &'a str) -> BoxStream<'a, Result<Bytes, Error>>;

	/// Writes the stream to `to`. The returned future resolves only once the
	/// content has been fully flushed and the handle closed.
	fn upload<'a>(&'a self, to: &'a str, stream: BoxStream<'a, Result<Bytes, Error>>) -> BoxFuture<'a, Result<(), Error>>;
}

/// Capability for destinations that accept logical resource links
/// ("info-resource" children) instead of byte content.
#[async_trait]
pub trait LinkSink: Send + Sync {
	async fn create_link(&self, path: &str, attributes: Vec<(String, String)>) -> Result<(), Error>;
}

/// Attribute name under which a logical link stores the locator it points at.
pub const ATTR_TARGET: &str = "target";
/// Attribute name for a human-readable link title.
pub const ATTR_TITLE: &str = "title";
