pub const PROJECT_NAME: &str = "ferry";

pub mod backend;
pub mod error;
pub mod locator;
pub mod monitor;
pub mod path;
pub mod registry;
pub mod system;
pub mod transfer;

pub use backend::{Backend, FilesystemBackend, LinkSink, Metadata};
pub use error::Error;
pub use locator::Locator;
pub use monitor::{Estimate, TaskMonitor, TaskStats};
pub use path::VPath;
pub use registry::Registry;
pub use system::{ResourceSystem, SystemFactory};
pub use transfer::{copy_or_move, link_drop, CopyHeap, Transfer};
