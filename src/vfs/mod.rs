//! VFS layer: what a path means, independent of how FUSE addresses it.
//!
//! Submodules:
//! - `error`: `FsError` and its errno mapping
//! - `handles`: the open-file table of buffered, uncommitted files
//! - `ops`: the `GridOps` operation set
//! - `fs`: `GridFs`, the implementation over a pooled document store
pub mod error;
pub mod fs;
pub mod handles;
pub mod ops;

pub use error::{FsError, FsResult};
pub use fs::GridFs;
pub use handles::{OpenFile, OpenFileTable};
pub use ops::{Caller, DirEntry, GridOps};
