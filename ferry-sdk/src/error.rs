use thiserror::Error;

use crate::locator::Locator;

/// The primary error type for every layer of the resource system.
#[derive(Error, Debug)]
pub enum Error {
	#[error("no resource system registered for scheme `{0}`")]
	UnsupportedScheme(String),

	#[error("invalid locator `{input}`: {reason}")]
	InvalidLocator { input: String, reason: String },

	#[error("could not use `{destination}` as a destination")]
	InvalidDestination {
		destination: Locator,
		#[source]
		source: Box<Error>,
	},

	#[error("`{0}` is not a destination this operation can write to")]
	UnsupportedDestination(Locator),

	#[error("resource not found: {0}")]
	NotFound(Locator),

	#[error("`{locator}` does not provide the {expected} capability")]
	TypeMismatch { locator: Locator, expected: &'static str },

	#[error("{sources} sources given but `{destination}` is a single file")]
	MultipleSourcesToSingleFile { destination: Locator, sources: usize },

	#[error("unsupported operation: {0}")]
	UnsupportedOperation(String),

	#[error("`{locator}` does not belong to the resource system at `{system}`")]
	SystemMismatch { system: Locator, locator: Locator },

	#[error("cycle detected while walking ancestors of `{0}`")]
	CyclicPath(Locator),

	#[error("refusing to delete `{child}`: it is not below `{root}`")]
	DeleteEscape { root: Locator, child: Locator },

	#[error("this copy engine instance has already run")]
	EngineReused,

	#[error("invalid configuration: {0}")]
	Config(String),

	#[error("operation was cancelled")]
	Interrupted,

	#[error(transparent)]
	Io(#[from] std::io::Error),

	#[error(transparent)]
	Backend(#[from] anyhow::Error),
}

impl Error {
	pub fn is_interrupted(&self) -> bool {
		matches!(self, Error::Interrupted)
	}

	/// Recovers a typed error out of a shared handle, as produced by cache
	/// layers that hand the same failure to every coalesced waiter. Sole
	/// owners get the original back; otherwise cloneable variants are
	/// rebuilt and the rest degrade to rendered text.
	pub fn from_shared(error: std::sync::Arc<Error>) -> Error {
		match std::sync::Arc::try_unwrap(error) {
			Ok(error) => error,
			Err(shared) => match &*shared {
				Error::UnsupportedScheme(scheme) => Error::UnsupportedScheme(scheme.clone()),
				Error::InvalidLocator { input, reason } => Error::InvalidLocator {
					input: input.clone(),
					reason: reason.clone(),
				},
				Error::NotFound(locator) => Error::NotFound(locator.clone()),
				Error::SystemMismatch { system, locator } => Error::SystemMismatch {
					system: system.clone(),
					locator: locator.clone(),
				},
				Error::Config(message) => Error::Config(message.clone()),
				Error::Interrupted => Error::Interrupted,
				other => Error::Backend(anyhow::anyhow!("{other}")),
			},
		}
	}
}

#[cfg(test)]
mod tests {
	use std::sync::Arc;

	use super::*;

	#[test]
	fn shared_errors_keep_their_kind() {
		let shared = Arc::new(Error::InvalidLocator {
			input: "sftp://host/p".to_string(),
			reason: "missing user".to_string(),
		});
		let _other_waiter = shared.clone();
		assert!(matches!(Error::from_shared(shared), Error::InvalidLocator { .. }));
	}

	#[test]
	fn sole_owner_gets_the_original_back() {
		let shared = Arc::new(Error::Io(std::io::Error::other("boom")));
		assert!(matches!(Error::from_shared(shared), Error::Io(_)));
	}
}
