//! Extended attributes live in a record's `metadata` map under bare keys;
//! the mount exposes them in the `user.` namespace.

#[cfg(not(target_os = "macos"))]
pub const XATTR_NAMESPACE: &str = "user.";
#[cfg(target_os = "macos")]
pub const XATTR_NAMESPACE: &str = "";

pub fn namespace_xattr(key: &str) -> String {
    format!("{XATTR_NAMESPACE}{key}")
}

/// Stored key for an external attribute name, if it is in our namespace.
pub fn unnamespace_xattr(name: &str) -> Option<&str> {
    name.strip_prefix(XATTR_NAMESPACE).filter(|k| !k.is_empty())
}

/// NUL-terminated concatenation of the external names of `keys`.
pub fn encode_name_list<'a>(keys: impl IntoIterator<Item = &'a String>) -> Vec<u8> {
    let mut out = Vec::new();
    for key in keys {
        out.extend_from_slice(namespace_xattr(key).as_bytes());
        out.push(0);
    }
    out
}

/// Answer to a get/list attribute call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XattrReply {
    /// Caller passed size 0 and asked how big the payload is.
    Size(u32),
    Data(Vec<u8>),
}

/// Fit `payload` into a caller buffer of `size` bytes. `None` when the buffer
/// is too small.
pub fn fit_to_buffer(payload: Vec<u8>, size: u32) -> Option<XattrReply> {
    let len = payload.len();
    if size == 0 {
        Some(XattrReply::Size(len as u32))
    } else if (size as usize) < len {
        None
    } else {
        Some(XattrReply::Data(payload))
    }
}
