use std::{
	fmt::{Debug, Formatter},
	path::PathBuf,
	sync::Arc,
	time::{Duration, UNIX_EPOCH},
};

use anyhow::Context;
use async_trait::async_trait;
use bytes::Bytes;
use deadpool::managed::{self, Metrics as PoolMetrics, Pool, RecycleResult};
use futures::{future::BoxFuture, stream::BoxStream, StreamExt};
use russh::{
	client::{self, Handle},
	keys::{agent::client::AgentClient, Algorithm},
	Channel,
};
use russh_sftp::{client::SftpSession, protocol::FileAttributes};
use tokio::{
	io::AsyncWriteExt,
	net::UnixStream,
	sync::{Mutex, OnceCell},
};
use tokio_util::codec::{BytesCodec, FramedRead};

use ferry_sdk::{
	backend::{Backend, FilesystemBackend, Metadata},
	error::Error,
	locator::Locator,
	system::SystemFactory,
};

/// A remote SFTP server behind the capability contract.
///
/// Sessions come from a small connection pool; authentication goes through
/// the running SSH agent. Identity (host, port, user) lives in the server
/// locator, so two locators on the same server share one instance through
/// the registry.
pub struct Sftp {
	host: String,
	port: u16,
	username: String,
	agent_socket: Option<PathBuf>,
	pool: OnceCell<Arc<Pool<Sftp>>>,
	agent: OnceCell<Mutex<AgentClient<UnixStream>>>,
}

impl Sftp {
	pub fn new(host: &str, port: u16, username: &str, agent_socket: Option<PathBuf>) -> Self {
		Self {
			host: host.to_string(),
			port,
			username: username.to_string(),
			agent_socket,
			pool: OnceCell::new(),
			agent: OnceCell::new(),
		}
	}
}

impl Debug for Sftp {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Sftp")
			.field("host", &self.host)
			.field("port", &self.port)
			.field("username", &self.username)
			.finish()
	}
}

impl Clone for Sftp {
	fn clone(&self) -> Self {
		Self {
			host: self.host.clone(),
			port: self.port,
			username: self.username.clone(),
			agent_socket: self.agent_socket.clone(),
			pool: self.pool.clone(),
			agent: OnceCell::new(),
		}
	}
}

struct Client;

impl client::Handler for Client {
	type Error = anyhow::Error;

	async fn check_server_key(&mut self, _server_public_key: &russh::keys::PublicKey) -> Result<bool, Self::Error> {
		Ok(true)
	}
}

impl managed::Manager for Sftp {
	type Error = Error;
	type Type = SftpSession;

	async fn create(&self) -> Result<SftpSession, Self::Error> {
		let session = self.connect().await?;
		let channel: Channel<client::Msg> = session.channel_open_session().await.context("failed to open session channel")?;
		channel
			.request_subsystem(true, "sftp")
			.await
			.context("failed to request the SFTP subsystem")?;
		Ok(SftpSession::new(channel.into_stream())
			.await
			.context("failed to start the SFTP session")?)
	}

	async fn recycle(&self, session: &mut Self::Type, _metrics: &PoolMetrics) -> RecycleResult<Self::Error> {
		// Low-cost probe to check the session is still alive.
		match session.canonicalize(".").await {
			Ok(_) => Ok(()),
			Err(e) => {
				tracing::warn!(host = %self.host, error = %e, "discarding stale SFTP session");
				Err(managed::RecycleError::Message(e.to_string().into()))
			}
		}
	}
}

impl Sftp {
	async fn pool(&self) -> Result<&Arc<Pool<Sftp>>, Error> {
		self.pool
			.get_or_try_init(|| async {
				let pool = Pool::builder(self.clone())
					.max_size(5)
					.build()
					.map(Arc::new)
					.map_err(|e| Error::Backend(e.into()))?;
				Ok::<Arc<Pool<Sftp>>, Error>(pool)
			})
			.await
	}

	async fn session(&self) -> Result<managed::Object<Sftp>, Error> {
		self.pool().await?.get().await.map_err(|e| Error::Backend(anyhow::anyhow!(e)))
	}

	async fn connect(&self) -> Result<Handle<Client>, Error> {
		let config = Arc::new(client::Config::default());
		let mut session = client::connect(config, (self.host.as_str(), self.port), Client)
			.await
			.context("could not establish SSH connection")?;

		let agent_client = self
			.agent
			.get_or_try_init(|| async {
				let socket = match &self.agent_socket {
					Some(socket) => socket.clone(),
					None => std::env::var_os("SSH_AUTH_SOCK")
						.map(PathBuf::from)
						.context("SSH_AUTH_SOCK is not set and no agent socket was configured")?,
				};
				let stream = UnixStream::connect(&socket)
					.await
					.context("could not connect to the SSH agent socket")?;
				Ok::<Mutex<AgentClient<UnixStream>>, Error>(Mutex::new(AgentClient::connect(stream)))
			})
			.await?;

		let mut agent = agent_client.lock().await;
		let hash_alg = session
			.best_supported_rsa_hash()
			.await
			.context("could not negotiate an RSA hash")?
			.flatten();

		let identities = agent.request_identities().await.context("could not list agent identities")?;
		for identity in identities {
			let alg = match identity.algorithm() {
				Algorithm::Dsa | Algorithm::Rsa { .. } => hash_alg,
				_ => None,
			};
			let auth = session
				.authenticate_publickey_with(&self.username, identity, alg, &mut *agent)
				.await
				.context("public-key authentication failed")?;
			if auth.success() {
				tracing::debug!(host = %self.host, user = %self.username, "authenticated via SSH agent");
				return Ok(session);
			}
		}
		Err(Error::Backend(anyhow::anyhow!(
			"no agent identity was accepted for {}@{}",
			self.username,
			self.host
		)))
	}
}

fn convert(attrs: FileAttributes) -> Metadata {
	let mut extra = std::collections::HashMap::new();
	if let Some(uid) = attrs.uid {
		extra.insert("uid".to_string(), uid.to_string());
	}
	if let Some(gid) = attrs.gid {
		extra.insert("gid".to_string(), gid.to_string());
	}
	if let Some(permissions) = attrs.permissions {
		extra.insert("permissions".to_string(), format!("{permissions:#o}"));
	}
	Metadata {
		size: attrs.size,
		modified: attrs.mtime.map(|t| UNIX_EPOCH + Duration::from_secs(t as u64)),
		// The SFTP protocol carries no creation time.
		created: None,
		is_dir: attrs.is_dir(),
		is_file: !attrs.is_dir(),
		extra,
	}
}

#[async_trait]
impl Backend for Sftp {
	fn scheme(&self) -> &str {
		"sftp"
	}

	async fn is_composite(&self, path: &str) -> Result<bool, Error> {
		Ok(self.metadata(path).await?.is_dir)
	}

	async fn list(&self, path: &str) -> Result<Vec<String>, Error> {
		let session = self.session().await?;
		let entries = session.read_dir(path).await.context("read_dir failed")?;
		let mut names: Vec<String> = entries.into_iter().map(|entry| entry.file_name()).collect();
		names.sort();
		Ok(names)
	}

	async fn attributes(&self, path: &str, names: &[&str]) -> Result<Vec<(String, String)>, Error> {
		let metadata = self.metadata(path).await?;
		let mut pairs = Vec::new();
		for &name in names {
			let value = match name {
				"size" => metadata.size.map(|s| s.to_string()),
				"modified" => metadata
					.modified
					.and_then(|t| t.duration_since(UNIX_EPOCH).ok())
					.map(|d| d.as_secs().to_string()),
				other => metadata.extra.get(other).cloned(),
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

	async fn close(&self) -> Result<(), Error> {
		if let Some(pool) = self.pool.get() {
			pool.close();
		}
		Ok(())
	}
}

#[async_trait]
impl FilesystemBackend for Sftp {
	async fn metadata(&self, path: &str) -> Result<Metadata, Error> {
		let session = self.session().await?;
		let attrs = session.metadata(path).await.context("metadata failed")?;
		Ok(convert(attrs))
	}

	async fn try_exists(&self, path: &str, _follow_links: bool) -> Result<bool, Error> {
		let session = self.session().await?;
		Ok(session.try_exists(path).await.context("try_exists failed")?)
	}

	async fn create_file(&self, path: &str, ignore_existing: bool) -> Result<(), Error> {
		if !ignore_existing && self.try_exists(path, true).await? {
			return Err(Error::Io(std::io::Error::new(
				std::io::ErrorKind::AlreadyExists,
				format!("`{path}` already exists"),
			)));
		}
		let session = self.session().await?;
		session.create(path).await.context("create failed")?;
		Ok(())
	}

	async fn mkdir(&self, path: &str, ignore_existing: bool) -> Result<(), Error> {
		if self.try_exists(path, true).await? {
			if ignore_existing && self.metadata(path).await?.is_dir {
				return Ok(());
			}
			return Err(Error::Io(std::io::Error::new(
				std::io::ErrorKind::AlreadyExists,
				format!("`{path}` already exists"),
			)));
		}
		let session = self.session().await?;
		session.create_dir(path).await.context("create_dir failed")?;
		Ok(())
	}

	async fn remove(&self, path: &str) -> Result<(), Error> {
		let session = self.session().await?;
		if self.metadata(path).await?.is_dir {
			session.remove_dir(path).await.context("remove_dir failed")?;
		} else {
			session.remove_file(path).await.context("remove_file failed")?;
		}
		Ok(())
	}

	async fn rename(&self, from: &str, to: &str) -> Result<(), Error> {
		let session = self.session().await?;
		session.rename(from, to).await.context("rename failed")?;
		Ok(())
	}

	fn download<'a>(&'a self, path: &'a str) -> BoxStream<'a, Result<Bytes, Error>> {
		let stream = async_stream::try_stream! {
			let session = self.session().await?;
			let file = session.open(path).await.context("open failed")?;
			let mut reader = FramedRead::new(file, BytesCodec::new());
			while let Some(chunk) = reader.next().await {
				yield chunk?.freeze();
			}
		};
		Box::pin(stream)
	}

	fn upload<'a>(&'a self, to: &'a str, mut stream: BoxStream<'a, Result<Bytes, Error>>) -> BoxFuture<'a, Result<(), Error>> {
		Box::pin(async move {
			let session = self.session().await?;
			let mut file = session.create(to).await.context("create failed")?;
			while let Some(chunk) = stream.next().await {
				file.write_all(&chunk?).await?;
			}
			// Flush and close before reporting success; a move deletes the
			// source right after this future resolves.
			file.shutdown().await?;
			Ok(())
		})
	}
}

/// Factory for `sftp://user@host:port/...` locators. The canonical server
/// locator keeps user, host and port, so two paths on one server share a
/// single pooled backend.
#[derive(Debug, Default)]
pub struct SftpFactory {
	agent_socket: Option<PathBuf>,
}

impl SftpFactory {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_agent_socket(socket: PathBuf) -> Self {
		Self { agent_socket: Some(socket) }
	}
}

#[async_trait]
impl SystemFactory for SftpFactory {
	fn scheme(&self) -> &'static str {
		"sftp"
	}

	async fn create(&self, server: &Locator) -> Result<Arc<dyn Backend>, Error> {
		let host = server.host().ok_or_else(|| Error::InvalidLocator {
			input: server.to_string(),
			reason: "sftp locators need a host".to_string(),
		})?;
		let username = server.user_info().ok_or_else(|| Error::InvalidLocator {
			input: server.to_string(),
			reason: "sftp locators need `user@host`".to_string(),
		})?;
		Ok(Arc::new(Sftp::new(host, server.port().unwrap_or(22), username, self.agent_socket.clone())))
	}
}
