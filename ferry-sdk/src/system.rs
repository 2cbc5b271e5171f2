use std::{
	fmt::Debug,
	hash::{Hash, Hasher},
	sync::Arc,
};

use async_trait::async_trait;

use crate::{backend::Backend, error::Error, locator::Locator, path::VPath};

/// One live backend instance: the identity boundary and path-node factory
/// for everything addressed under one server locator.
///
/// Systems are shared through the registry cache; equality and hashing are
/// defined solely by the server locator.
#[derive(Debug)]
pub struct ResourceSystem {
	server: Locator,
	backend: Arc<dyn Backend>,
}

impl ResourceSystem {
	pub fn new(server: Locator, backend: Arc<dyn Backend>) -> Arc<Self> {
		Arc::new(Self {
			server: server.server(),
			backend,
		})
	}

	pub fn server(&self) -> &Locator {
		&self.server
	}

	pub fn backend(&self) -> &Arc<dyn Backend> {
		&self.backend
	}

	/// Creates the path node for `locator`.
	///
	/// Checked precondition: the locator must actually belong to this system
	/// (same scheme and authority). Delegating a foreign locator here is a
	/// programming error and is rejected instead of silently recursing.
	pub fn resolve(self: &Arc<Self>, locator: &Locator) -> Result<VPath, Error> {
		if !self.server.same_authority(locator) {
			return Err(Error::SystemMismatch {
				system: self.server.clone(),
				locator: locator.clone(),
			});
		}
		Ok(VPath::new(locator.clone(), self.clone()))
	}

	/// The path node at the server root.
	pub fn root(self: &Arc<Self>) -> VPath {
		VPath::new(self.server.clone(), self.clone())
	}
}

impl PartialEq for ResourceSystem {
	fn eq(&self, other: &Self) -> bool {
		self.server == other.server
	}
}

impl Eq for ResourceSystem {}

impl Hash for ResourceSystem {
	fn hash<H: Hasher>(&self, state: &mut H) {
		self.server.hash(state);
	}
}

/// Constructs backends for one URI scheme. Registered with the registry as
/// an explicit table entry; there is no runtime discovery.
#[async_trait]
pub trait SystemFactory: Debug + Send + Sync {
	fn scheme(&self) -> &'static str;

	/// Collapses a locator to the server locator that identifies its backend
	/// instance. The factory decides equivalence: two locators on the same
	/// host and port are the same backend even with different paths.
	fn canonical_server(&self, locator: &Locator) -> Locator {
		locator.server()
	}

	async fn create(&self, server: &Locator) -> Result<Arc<dyn Backend>, Error>;
}
