use std::fmt;

use derive_more::{Display, FromStr};
use serde::{Deserialize, Serialize};

/// Opaque reference to secret material held by a secret store.
/// This is the only secret-shaped thing that may appear in a recorded
/// build step, so steps stay serializable without carrying material.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, FromStr, Display)]
pub struct SecretRef(pub String);

/// Resolved secret material.
///
/// Deliberately not serializable, and `Debug` is redacted.  The value is
/// reachable only through [`Secret::expose`], which engines use to place it
/// in the environment of a single command execution; it must never end up in
/// a persisted layer or a recorded step.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
	pub fn new(material: impl Into<String>) -> Self {
		Secret(material.into())
	}

	/// Hands out the raw material.  Callers are expected to scope this to
	/// one command execution and drop it afterwards.
	pub fn expose(&self) -> &str {
		&self.0
	}
}

impl fmt::Debug for Secret {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("Secret(<redacted>)")
	}
}
