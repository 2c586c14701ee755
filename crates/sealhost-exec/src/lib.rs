//! sealhost-exec: Remote execution abstraction
//!
//! Provides traits and implementations for running commands and streaming
//! files to hosts, locally or over SSH.

pub mod error;
pub mod keys;
pub mod local;
pub mod result;
pub mod session;
pub mod ssh;
pub mod traits;

pub use error::ExecError;
pub use keys::{KeyError, KeySource, ResolvedKey};
pub use local::LocalExecutor;
pub use result::{CommandResult, ConnectionInfo};
pub use session::{SessionFactory, SshSessionFactory};
pub use ssh::{SshExecutor, SshExecutorBuilder};
pub use traits::{FileSink, RemoteExecutor, shell_quote};
