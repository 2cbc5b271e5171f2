use std::{
	path::{Path, PathBuf},
	sync::Arc,
};

use serde::Deserialize;

use ferry_sdk::{error::Error, registry::Registry};

use crate::{local::LocalFactory, memory::MemoryFactory, sftp::SftpFactory};

/// Declarative description of which backends a registry should serve.
///
/// ```toml
/// [[mounts]]
/// type = "local"
///
/// [[mounts]]
/// type = "memory"
/// name = "scratch"
///
/// [[mounts]]
/// type = "sftp"
/// ```
#[derive(Debug, Default, Deserialize)]
pub struct Mounts {
	#[serde(default)]
	pub mounts: Vec<Mount>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Mount {
	Local,
	Memory {
		name: String,
	},
	Sftp {
		#[serde(default)]
		agent_socket: Option<PathBuf>,
	},
}

impl Mounts {
	pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, Error> {
		let text = tokio::fs::read_to_string(path.as_ref()).await?;
		Self::from_str(&text)
	}

	pub fn from_str(text: &str) -> Result<Self, Error> {
		toml::from_str(text).map_err(|e| Error::Config(e.to_string()))
	}

	/// Builds a registry serving exactly the configured mounts. A scheme that
	/// appears more than once keeps the last factory registered for it.
	pub fn registry(&self) -> Registry {
		let registry = Registry::new();
		let memory = MemoryFactory::new();
		let mut use_memory = false;
		for mount in &self.mounts {
			match mount {
				Mount::Local => registry.register(Arc::new(LocalFactory)),
				Mount::Memory { name } => {
					// Warm the named instance so it exists before the first
					// locator touches it.
					memory.backend(name);
					use_memory = true;
				}
				Mount::Sftp { agent_socket } => registry.register(Arc::new(match agent_socket {
					Some(socket) => SftpFactory::with_agent_socket(socket.clone()),
					None => SftpFactory::new(),
				})),
			}
		}
		if use_memory {
			registry.register(Arc::new(memory));
		}
		registry
	}
}
