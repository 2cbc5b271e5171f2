use std::{path::Path, sync::Arc, time::UNIX_EPOCH};

use async_trait::async_trait;
use bytes::Bytes;
use futures::{future::BoxFuture, stream::BoxStream, StreamExt};
use tokio::io::AsyncWriteExt;
use tokio_util::codec::{BytesCodec, FramedRead};

use ferry_sdk::{
	backend::{Backend, FilesystemBackend, LinkSink, Metadata},
	error::Error,
	locator::Locator,
	system::SystemFactory,
};

/// The local machine's filesystem behind the capability contract.
///
/// Locator paths map directly onto absolute native paths.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LocalFs;

fn convert(metadata: std::fs::Metadata) -> Metadata {
	Metadata {
		size: Some(metadata.len()),
		modified: metadata.modified().ok(),
		created: metadata.created().ok(),
		is_dir: metadata.is_dir(),
		is_file: metadata.is_file(),
		extra: Default::default(),
	}
}

#[async_trait]
impl Backend for LocalFs {
	fn scheme(&self) -> &str {
		"file"
	}

	async fn is_composite(&self, path: &str) -> Result<bool, Error> {
		Ok(tokio::fs::metadata(path).await?.is_dir())
	}

	async fn list(&self, path: &str) -> Result<Vec<String>, Error> {
		let mut dir = tokio::fs::read_dir(path).await?;
		let mut names = Vec::new();
		while let Some(entry) = dir.next_entry().await? {
			names.push(entry.file_name().to_string_lossy().into_owned());
		}
		names.sort();
		Ok(names)
	}

	async fn attributes(&self, path: &str, names: &[&str]) -> Result<Vec<(String, String)>, Error> {
		let metadata = tokio::fs::metadata(path).await?;
		let mut pairs = Vec::new();
		for &name in names {
			let value = match name {
				"size" => Some(metadata.len().to_string()),
				"modified" => metadata
					.modified()
					.ok()
					.and_then(|t| t.duration_since(UNIX_EPOCH).ok())
					.map(|d| d.as_secs().to_string()),
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
		// Plain filesystems hold bytes, not logical resource links.
		None
	}
}

#[async_trait]
impl FilesystemBackend for LocalFs {
	async fn metadata(&self, path: &str) -> Result<Metadata, Error> {
		Ok(convert(tokio::fs::metadata(path).await?))
	}

	async fn try_exists(&self, path: &str, follow_links: bool) -> Result<bool, Error> {
		if follow_links {
			Ok(tokio::fs::try_exists(path).await?)
		} else {
			Ok(tokio::fs::symlink_metadata(path).await.is_ok())
		}
	}

	async fn create_file(&self, path: &str, ignore_existing: bool) -> Result<(), Error> {
		let mut options = tokio::fs::OpenOptions::new();
		options.write(true);
		if ignore_existing {
			options.create(true);
		} else {
			options.create_new(true);
		}
		options.open(path).await?;
		Ok(())
	}

	async fn mkdir(&self, path: &str, ignore_existing: bool) -> Result<(), Error> {
		match tokio::fs::create_dir(path).await {
			Ok(()) => Ok(()),
			Err(e) if ignore_existing && e.kind() == std::io::ErrorKind::AlreadyExists && Path::new(path).is_dir() => Ok(()),
			Err(e) => Err(Error::Io(e)),
		}
	}

	async fn remove(&self, path: &str) -> Result<(), Error> {
		if tokio::fs::metadata(path).await?.is_dir() {
			tokio::fs::remove_dir(path).await.map_err(Error::Io)
		} else {
			tokio::fs::remove_file(path).await.map_err(Error::Io)
		}
	}

	async fn rename(&self, from: &str, to: &str) -> Result<(), Error> {
		tokio::fs::rename(from, to).await.map_err(Error::Io)
	}

	fn download<'a>(&'a self, path: &'a str) -> BoxStream<'a, Result<Bytes, Error>> {
		let stream = async_stream::try_stream! {
			let file = tokio::fs::File::open(path).await?;
			let mut reader = FramedRead::new(file, BytesCodec::new());
			while let Some(chunk) = reader.next().await {
				yield chunk?.freeze();
			}
		};
		Box::pin(stream)
	}

	fn upload<'a>(&'a self, to: &'a str, mut stream: BoxStream<'a, Result<Bytes, Error>>) -> BoxFuture<'a, Result<(), Error>> {
		Box::pin(async move {
			let mut file = tokio::fs::File::create(to).await?;
			while let Some(chunk) = stream.next().await {
				file.write_all(&chunk?).await?;
			}
			file.flush().await?;
			Ok(())
		})
	}
}

/// Factory for `file://` locators. Every locator collapses onto one local
/// system per authority; in practice that means a single instance.
#[derive(Debug, Default)]
pub struct LocalFactory;

#[async_trait]
impl SystemFactory for LocalFactory {
	fn scheme(&self) -> &'static str {
		"file"
	}

	async fn create(&self, _server: &Locator) -> Result<Arc<dyn Backend>, Error> {
		Ok(Arc::new(LocalFs))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn metadata_and_listing() {
		let dir = tempfile::tempdir().unwrap();
		let root = dir.path().to_string_lossy().into_owned();
		tokio::fs::write(format!("{root}/b.txt"), b"12345").await.unwrap();
		tokio::fs::write(format!("{root}/a.txt"), b"x").await.unwrap();

		let fs = LocalFs;
		assert!(fs.is_composite(&root).await.unwrap());
		assert_eq!(fs.list(&root).await.unwrap(), vec!["a.txt", "b.txt"]);
		let meta = fs.metadata(&format!("{root}/b.txt")).await.unwrap();
		assert_eq!(meta.size, Some(5));
		assert!(meta.is_file);
	}

	#[tokio::test]
	async fn download_upload_round_trip() {
		let dir = tempfile::tempdir().unwrap();
		let root = dir.path().to_string_lossy().into_owned();
		let from = format!("{root}/in.bin");
		let to = format!("{root}/out.bin");
		tokio::fs::write(&from, vec![42u8; 100_000]).await.unwrap();

		let fs = LocalFs;
		let stream = fs.download(&from);
		fs.upload(&to, stream).await.unwrap();
		assert_eq!(tokio::fs::read(&to).await.unwrap(), vec![42u8; 100_000]);
	}

	#[tokio::test]
	async fn mkdir_tolerates_existing_when_asked() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("sub");
		let path = path.to_string_lossy().into_owned();

		let fs = LocalFs;
		fs.mkdir(&path, false).await.unwrap();
		assert!(fs.mkdir(&path, false).await.is_err());
		fs.mkdir(&path, true).await.unwrap();
	}

	#[tokio::test]
	async fn create_file_respects_existing_flag() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("f");
		let path = path.to_string_lossy().into_owned();

		let fs = LocalFs;
		fs.create_file(&path, false).await.unwrap();
		assert!(fs.create_file(&path, false).await.is_err());
		fs.create_file(&path, true).await.unwrap();
	}
}
