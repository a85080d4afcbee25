//! Filesystem backends for ferry destinations.
//!
//! A filesystem decides where a destination keeps job directories and how a
//! job directory prepared locally gets there and back.

pub mod local;
pub mod sftp;

pub use local::LocalFileSystem;
pub use sftp::{SftpConfig, SftpFileSystem};
