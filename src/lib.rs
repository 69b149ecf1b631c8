//! gridfuse: expose a GridFS-style chunked document store as a POSIX filesystem.
//!
//! Layering, leaves first:
//! - `chuck`: chunk arithmetic and the in-memory write-back buffer.
//! - `cadapter`: the document-store boundary (records, connectors, pooling).
//! - `meta`: attribute, ownership and xattr mapping helpers.
//! - `vfs`: the open-file table and the path-based operation layer.
//! - `fuse`: rfuse3 adapter and mount helpers.

pub mod cadapter;
pub mod chuck;
pub mod config;
pub mod fuse;
pub mod meta;
pub mod vfs;
