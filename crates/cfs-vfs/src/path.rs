//! Remote path composition.

use crate::config::ExportRoot;
use crate::error::{VfsError, VfsResult};

/// Capacity of a composed remote path, terminator included.
pub const PATH_CAPACITY: usize = 4096;

/// Joins a session's export root with host-relative paths.
///
/// Composition is purely textual: `root + "/" + relative`. No `..` resolution
/// or canonicalization happens here; the remote service owns path semantics.
#[derive(Debug, Clone)]
pub struct PathBuilder {
    root: String,
    capacity: usize,
}

impl PathBuilder {
    /// Create a builder with the default [`PATH_CAPACITY`].
    pub fn new(root: &ExportRoot) -> Self {
        Self::with_capacity(root, PATH_CAPACITY)
    }

    /// Create a builder with an explicit capacity (terminator included).
    pub fn with_capacity(root: &ExportRoot, capacity: usize) -> Self {
        Self {
            root: root.as_str().to_string(),
            capacity,
        }
    }

    /// The export root every path is prefixed with.
    pub fn root(&self) -> &str {
        &self.root
    }

    /// Compose the absolute remote path for `relative`.
    ///
    /// Fails with [`VfsError::NameTooLong`] when the result plus its terminator
    /// would not fit the capacity. Nothing is allocated on failure.
    pub fn build(&self, relative: &str) -> VfsResult<String> {
        let needed = self.root.len() + 1 + relative.len() + 1;
        if needed > self.capacity {
            return Err(VfsError::NameTooLong);
        }
        let mut path = String::with_capacity(needed - 1);
        path.push_str(&self.root);
        path.push('/');
        path.push_str(relative);
        Ok(path)
    }
}
