use derive_more::{Display, FromStr};
use serde::{Deserialize, Serialize};

/// Reference to a container base image, e.g. "node:22-alpine".
///
/// We keep this as freetext that engines interpret; the only thing checked
/// here is that the reference is plausibly shaped at all, so that obviously
/// broken values are rejected before anything reaches out to a registry.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, FromStr, Display)]
pub struct ImageRef(pub String);

impl ImageRef {
	pub fn is_wellformed(&self) -> bool {
		!self.0.is_empty()
			&& !self.0.ends_with(':')
			&& self
				.0
				.chars()
				.all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | ':' | '/' | '@'))
	}
}

/// Version tag of the node base image.  Picked once at pipeline construction
/// and immutable thereafter.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, FromStr, Display)]
pub struct RuntimeVersion(pub String);

pub const DEFAULT_RUNTIME_VERSION: &str = "22-alpine";

impl Default for RuntimeVersion {
	fn default() -> Self {
		RuntimeVersion(DEFAULT_RUNTIME_VERSION.into())
	}
}

impl RuntimeVersion {
	/// The base image this version resolves to.
	pub fn image(&self) -> ImageRef {
		ImageRef(format!("node:{}", self.0))
	}
}
