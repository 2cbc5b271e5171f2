use std::{collections::HashSet, sync::Arc};

use futures::future::BoxFuture;

use crate::{
	backend::FilesystemBackend,
	error::Error,
	locator::Locator,
	system::ResourceSystem,
};

/// A polymorphic handle to one addressable resource, as exposed by its
/// owning resource system.
///
/// Base operations work on every backend; the filesystem operations fail
/// with [`Error::TypeMismatch`] when the backend does not provide the
/// extended capability.
#[derive(Debug, Clone)]
pub struct VPath {
	locator: Locator,
	system: Arc<ResourceSystem>,
}

impl PartialEq for VPath {
	fn eq(&self, other: &Self) -> bool {
		self.locator == other.locator && self.system == other.system
	}
}

impl Eq for VPath {}

impl VPath {
	pub(crate) fn new(locator: Locator, system: Arc<ResourceSystem>) -> Self {
		Self { locator, system }
	}

	pub fn locator(&self) -> &Locator {
		&self.locator
	}

	pub fn system(&self) -> &Arc<ResourceSystem> {
		&self.system
	}

	pub fn name(&self) -> String {
		self.locator.name().to_string()
	}

	pub fn mime_type(&self) -> String {
		mime_guess::from_path(self.locator.name()).first_or_octet_stream().to_string()
	}

	/// Whether this path has the extended filesystem capability.
	pub fn is_filesystem(&self) -> bool {
		self.system.backend().as_filesystem().is_some()
	}

	pub(crate) fn filesystem(&self) -> Result<&dyn FilesystemBackend, Error> {
		self.system.backend().as_filesystem().ok_or_else(|| Error::TypeMismatch {
			locator: self.locator.clone(),
			expected: "filesystem",
		})
	}

	pub async fn is_composite(&self) -> Result<bool, Error> {
		self.system.backend().is_composite(self.locator.path()).await
	}

	/// Ordered children of a composite resource.
	pub async fn list(&self) -> Result<Vec<VPath>, Error> {
		let names = self.system.backend().list(self.locator.path()).await?;
		Ok(names
			.into_iter()
			.map(|name| VPath::new(self.locator.resolve(&name), self.system.clone()))
			.collect())
	}

	/// Resolves a relative name against this path within the same system.
	pub fn resolve(&self, relative: &str) -> Result<VPath, Error> {
		self.system.resolve(&self.locator.resolve(relative))
	}

	/// The parent path, or `None` at the resource-system root.
	pub fn parent(&self) -> Option<VPath> {
		self.locator.parent().map(|locator| VPath::new(locator, self.system.clone()))
	}

	pub async fn attributes(&self, names: &[&str]) -> Result<Vec<(String, String)>, Error> {
		self.system.backend().attributes(self.locator.path(), names).await
	}

	// --- filesystem capability ---

	pub async fn exists(&self, follow_links: bool) -> Result<bool, Error> {
		self.filesystem()?.try_exists(self.locator.path(), follow_links).await
	}

	pub async fn is_dir(&self) -> Result<bool, Error> {
		Ok(self.filesystem()?.metadata(self.locator.path()).await?.is_dir)
	}

	pub async fn is_file(&self) -> Result<bool, Error> {
		Ok(self.filesystem()?.metadata(self.locator.path()).await?.is_file)
	}

	/// Byte size; 0 when the backend reports none.
	pub async fn len(&self) -> Result<u64, Error> {
		Ok(self.filesystem()?.metadata(self.locator.path()).await?.size.unwrap_or(0))
	}

	pub async fn create_file(&self, ignore_existing: bool) -> Result<(), Error> {
		self.filesystem()?.create_file(self.locator.path(), ignore_existing).await
	}

	pub async fn mkdir(&self, ignore_existing: bool) -> Result<(), Error> {
		self.filesystem()?.mkdir(self.locator.path(), ignore_existing).await
	}

	/// Creates this directory and every missing ancestor, leaving existing
	/// levels untouched. The upward walk refuses any locator it has already
	/// visited.
	pub async fn mkdirs(&self, ignore_existing: bool) -> Result<(), Error> {
		let fs = self.filesystem()?;

		let mut missing: Vec<VPath> = Vec::new();
		let mut seen: HashSet<Locator> = HashSet::new();
		let mut current = self.clone();
		loop {
			if !seen.insert(current.locator.clone()) {
				return Err(Error::CyclicPath(current.locator.clone()));
			}
			if fs.try_exists(current.locator.path(), true).await? {
				break;
			}
			missing.push(current.clone());
			match current.parent() {
				Some(parent) => current = parent,
				None => break,
			}
		}

		if missing.is_empty() {
			// Already present; surface the backend's own error unless told
			// to tolerate it.
			if !ignore_existing {
				fs.mkdir(self.locator.path(), false).await?;
			}
			return Ok(());
		}

		for dir in missing.into_iter().rev() {
			fs.mkdir(dir.locator.path(), true).await?;
		}
		Ok(())
	}

	/// Deletes this node, recursing into children first when asked to.
	///
	/// A recursive delete refuses any child whose locator is not strictly
	/// below this node; such a child would make the delete escape upward,
	/// which is a consistency error, not something to retry.
	pub fn delete(&self, recursive: bool) -> BoxFuture<'_, Result<(), Error>> {
		Box::pin(async move {
			let fs = self.filesystem()?;
			if recursive && fs.metadata(self.locator.path()).await?.is_dir {
				for child in self.list().await? {
					if !self.locator.is_ancestor_of(child.locator()) {
						return Err(Error::DeleteEscape {
							root: self.locator.clone(),
							child: child.locator().clone(),
						});
					}
					child.delete(true).await?;
				}
			}
			fs.remove(self.locator.path()).await
		})
	}

	/// Renames this node onto `other`, which must live on the same resource
	/// system.
	pub async fn rename_to(&self, other: &VPath) -> Result<(), Error> {
		if self.system != other.system {
			return Err(Error::SystemMismatch {
				system: self.system.server().clone(),
				locator: other.locator.clone(),
			});
		}
		self.filesystem()?.rename(self.locator.path(), other.locator.path()).await
	}
}

impl std::fmt::Display for VPath {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.locator)
	}
}
