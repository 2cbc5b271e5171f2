use std::{
	collections::HashMap,
	sync::{Arc, RwLock},
};

use moka::future::Cache;

use crate::{
	error::Error,
	locator::Locator,
	path::VPath,
	system::{ResourceSystem, SystemFactory},
};

/// Context-scoped mapping from URI scheme to resource-system factory, plus
/// the cache of live resource-system instances.
///
/// There is deliberately no process-wide instance: callers construct a
/// registry, register factories explicitly and pass the handle down to
/// every component that resolves locators. Two locators that a factory
/// collapses to the same canonical server locator share one live system.
#[derive(Debug)]
pub struct Registry {
	factories: RwLock<HashMap<String, Arc<dyn SystemFactory>>>,
	systems: Cache<Locator, Arc<ResourceSystem>>,
}

impl Default for Registry {
	fn default() -> Self {
		Self::new()
	}
}

impl Registry {
	pub fn new() -> Self {
		Self {
			factories: RwLock::new(HashMap::new()),
			systems: Cache::new(256),
		}
	}

	/// Adds an entry to the scheme table, replacing any previous factory for
	/// the same scheme.
	pub fn register(&self, factory: Arc<dyn SystemFactory>) {
		let scheme = factory.scheme().to_string();
		tracing::debug!(scheme, "registering resource-system factory");
		self.factories.write().expect("factory table poisoned").insert(scheme, factory);
	}

	pub fn registered_schemes(&self) -> Vec<String> {
		let mut schemes: Vec<String> = self.factories.read().expect("factory table poisoned").keys().cloned().collect();
		schemes.sort();
		schemes
	}

	/// Returns the live resource system serving `locator`, constructing it
	/// through the registered factory on first use.
	///
	/// Concurrent callers asking for the same canonical server are
	/// coalesced: exactly one backend is constructed.
	pub async fn get_or_create(&self, locator: &Locator) -> Result<Arc<ResourceSystem>, Error> {
		let factory = self
			.factories
			.read()
			.expect("factory table poisoned")
			.get(locator.scheme())
			.cloned()
			.ok_or_else(|| Error::UnsupportedScheme(locator.scheme().to_string()))?;

		let server = factory.canonical_server(locator);
		self.systems
			.try_get_with(server.clone(), async {
				tracing::info!(server = %server, "creating resource system");
				let backend = factory.create(&server).await?;
				Ok(ResourceSystem::new(server.clone(), backend))
			})
			.await
			.map_err(Error::from_shared)
	}

	/// Resolves a locator all the way to a path node.
	pub async fn resolve(&self, locator: &Locator) -> Result<VPath, Error> {
		self.get_or_create(locator).await?.resolve(locator)
	}

	/// Closes every cached backend and clears the cache. Never invoked
	/// implicitly; the owning context decides when connections die.
	pub async fn cleanup(&self) {
		for (server, system) in self.systems.iter() {
			if let Err(e) = system.backend().close().await {
				tracing::warn!(server = %server, error = %e, "backend close failed during cleanup");
			}
		}
		self.systems.invalidate_all();
	}
}
