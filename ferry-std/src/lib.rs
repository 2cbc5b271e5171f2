//! The standard backends for the ferry virtual resource system: the local
//! filesystem, named in-memory filesystems and remote SFTP servers, plus a
//! declarative mount configuration for wiring them into a registry.

pub mod config;
pub mod local;
pub mod memory;
pub mod sftp;

use std::sync::Arc;

use ferry_sdk::registry::Registry;

/// A registry with every standard backend registered. Callers that need a
/// different set of mounts build one through [`config::Mounts`] instead.
pub fn standard_registry() -> Registry {
	let registry = Registry::new();
	registry.register(Arc::new(local::LocalFactory));
	registry.register(Arc::new(memory::MemoryFactory::new()));
	registry.register(Arc::new(sftp::SftpFactory::new()));
	registry
}

#[cfg(test)]
mod tests;
