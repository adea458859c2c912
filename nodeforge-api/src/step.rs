use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::cache::CacheBinding;
use crate::image::ImageRef;
use crate::secret::SecretRef;

/// Host directory to be mounted into the build filesystem.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryRef(pub PathBuf);

/// One declarative mutation applied to a build pipeline.
///
/// Steps are immutable once appended, and insertion order is significant:
/// a pipeline's resolved state is always recomputable by replaying its steps
/// in order from the initial base-image step.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BuildStep {
	#[serde(rename = "from")]
	SetBaseImage { image: ImageRef },

	#[serde(rename = "workdir")]
	SetWorkdir { path: String },

	#[serde(rename = "directory")]
	MountDirectory { path: String, source: DirectoryRef },

	#[serde(rename = "cache")]
	MountCache { binding: CacheBinding },

	/// Binds an environment variable name to a secret *reference*.
	/// The material itself is resolved at execution time and never recorded.
	#[serde(rename = "secret-env")]
	InjectSecretEnv { name: String, secret: SecretRef },

	#[serde(rename = "entrypoint")]
	SetEntrypoint { argv: Vec<String> },

	#[serde(rename = "exec")]
	RunCommand { argv: Vec<String> },
}

impl BuildStep {
	/// Short name of the step, used when wrapping collaborator errors with
	/// the step that triggered them.
	pub fn kind(&self) -> &'static str {
		match self {
			BuildStep::SetBaseImage { .. } => "from",
			BuildStep::SetWorkdir { .. } => "workdir",
			BuildStep::MountDirectory { .. } => "directory",
			BuildStep::MountCache { .. } => "cache",
			BuildStep::InjectSecretEnv { .. } => "secret-env",
			BuildStep::SetEntrypoint { .. } => "entrypoint",
			BuildStep::RunCommand { .. } => "exec",
		}
	}
}
