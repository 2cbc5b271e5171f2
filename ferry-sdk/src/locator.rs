use std::fmt::{self, Display};

use crate::error::Error;

/// A parsed, immutable, absolute resource identifier.
///
/// Everything above the backend layer addresses resources through locators;
/// equality and hashing are structural.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Locator {
	scheme: String,
	user_info: Option<String>,
	host: Option<String>,
	port: Option<u16>,
	path: String,
	query: Option<String>,
	fragment: Option<String>,
}

impl Locator {
	/// Parses `scheme://[user@]host[:port]/path[?query][#fragment]`.
	pub fn parse(input: &str) -> Result<Self, Error> {
		let invalid = |reason: &str| Error::InvalidLocator {
			input: input.to_string(),
			reason: reason.to_string(),
		};

		let (scheme, rest) = input.split_once("://").ok_or_else(|| invalid("missing `://`"))?;
		if scheme.is_empty() || !scheme.chars().all(|c| c.is_ascii_alphanumeric() || "+-.".contains(c)) {
			return Err(invalid("bad scheme"));
		}

		let (rest, fragment) = match rest.split_once('#') {
			Some((r, f)) => (r, Some(f.to_string())),
			None => (rest, None),
		};
		let (rest, query) = match rest.split_once('?') {
			Some((r, q)) => (r, Some(q.to_string())),
			None => (rest, None),
		};

		let (authority, path) = match rest.find('/') {
			Some(i) => (&rest[..i], &rest[i..]),
			None => (rest, "/"),
		};

		let (user_info, host_port) = match authority.split_once('@') {
			Some((u, hp)) => (Some(u.to_string()), hp),
			None => (None, authority),
		};
		let (host, port) = match host_port.rsplit_once(':') {
			Some((h, p)) => {
				let port = p.parse::<u16>().map_err(|_| invalid("bad port"))?;
				(h, Some(port))
			}
			None => (host_port, None),
		};
		let host = if host.is_empty() { None } else { Some(host.to_string()) };

		Ok(Self {
			scheme: scheme.to_ascii_lowercase(),
			user_info,
			host,
			port,
			path: normalize(path),
			query,
			fragment,
		})
	}

	pub fn scheme(&self) -> &str {
		&self.scheme
	}

	pub fn user_info(&self) -> Option<&str> {
		self.user_info.as_deref()
	}

	pub fn host(&self) -> Option<&str> {
		self.host.as_deref()
	}

	pub fn port(&self) -> Option<u16> {
		self.port
	}

	/// The absolute, normalized path component. Always begins with `/`.
	pub fn path(&self) -> &str {
		&self.path
	}

	pub fn query(&self) -> Option<&str> {
		self.query.as_deref()
	}

	pub fn fragment(&self) -> Option<&str> {
		self.fragment.as_deref()
	}

	pub fn is_root(&self) -> bool {
		self.path == "/"
	}

	/// Last path segment; empty at the root.
	pub fn name(&self) -> &str {
		self.path.rsplit('/').next().unwrap_or("")
	}

	/// The locator one level up, or `None` at the root.
	pub fn parent(&self) -> Option<Locator> {
		if self.is_root() {
			return None;
		}
		let cut = self.path.rfind('/').unwrap_or(0);
		let parent = if cut == 0 { "/" } else { &self.path[..cut] };
		Some(self.with_path(parent))
	}

	/// Joins a relative name onto this locator and renormalizes. An absolute
	/// argument replaces the path outright.
	pub fn resolve(&self, relative: &str) -> Locator {
		if relative.starts_with('/') {
			self.with_path(relative)
		} else if self.is_root() {
			self.with_path(&format!("/{relative}"))
		} else {
			self.with_path(&format!("{}/{relative}", self.path))
		}
	}

	/// The server-level locator: same authority, root path, no query or
	/// fragment. Resource-system identity is defined over this.
	pub fn server(&self) -> Locator {
		Locator {
			scheme: self.scheme.clone(),
			user_info: self.user_info.clone(),
			host: self.host.clone(),
			port: self.port,
			path: "/".to_string(),
			query: None,
			fragment: None,
		}
	}

	/// True when `other` lives strictly below this locator on the same
	/// authority.
	pub fn is_ancestor_of(&self, other: &Locator) -> bool {
		if !self.same_authority(other) {
			return false;
		}
		if self.is_root() {
			return !other.is_root();
		}
		other.path.starts_with(&format!("{}/", self.path))
	}

	pub fn same_authority(&self, other: &Locator) -> bool {
		self.scheme == other.scheme && self.user_info == other.user_info && self.host == other.host && self.port == other.port
	}

	fn with_path(&self, path: &str) -> Locator {
		Locator {
			scheme: self.scheme.clone(),
			user_info: self.user_info.clone(),
			host: self.host.clone(),
			port: self.port,
			path: normalize(path),
			query: None,
			fragment: None,
		}
	}
}

/// Collapses `.`, `..` and duplicate separators. `..` at the root stays at
/// the root.
fn normalize(path: &str) -> String {
	let mut segments: Vec<&str> = Vec::new();
	for segment in path.split('/') {
		match segment {
			"" | "." => {}
			".." => {
				segments.pop();
			}
			other => segments.push(other),
		}
	}
	if segments.is_empty() {
		"/".to_string()
	} else {
		format!("/{}", segments.join("/"))
	}
}

impl Display for Locator {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}://", self.scheme)?;
		if let Some(user) = &self.user_info {
			write!(f, "{user}@")?;
		}
		if let Some(host) = &self.host {
			write!(f, "{host}")?;
			if let Some(port) = self.port {
				write!(f, ":{port}")?;
			}
		}
		write!(f, "{}", self.path)?;
		if let Some(query) = &self.query {
			write!(f, "?{query}")?;
		}
		if let Some(fragment) = &self.fragment {
			write!(f, "#{fragment}")?;
		}
		Ok(())
	}
}
