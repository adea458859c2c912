use serde::{Deserialize, Serialize};

/// Conventional volume name for the mounted source's node_modules dir.
pub const DEFAULT_SOURCE_CACHE: &str = "node-modules";

/// A named, persistent cache volume attached at a path inside the build
/// filesystem.  The name is the identity: the same name always refers to the
/// same underlying volume, across sessions and across pipelines.
///
/// Binding two volumes at the same mount path is not an error; the later
/// binding simply layers over the earlier one.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheBinding {
	pub name: String,
	pub mount_path: String,
}

impl CacheBinding {
	pub fn new(name: impl Into<String>, mount_path: impl Into<String>) -> Self {
		CacheBinding {
			name: name.into(),
			mount_path: mount_path.into(),
		}
	}
}
