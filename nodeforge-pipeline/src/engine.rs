use std::path::PathBuf;

use crossbeam_channel::Sender;
use indexmap::IndexMap;
use tokio_util::sync::CancellationToken;

use nodeforge_api::cache::CacheBinding;
use nodeforge_api::image::ImageRef;
use nodeforge_api::secret::{Secret, SecretRef};
use nodeforge_api::step::BuildStep;

use crate::{Event, Result};

/// Upper bound on captured bytes per output stream.  Whole lines past the
/// cap are dropped and the truncation flag is set on the result.
pub const OUTPUT_CAP: usize = 10 * 1024 * 1024;

/// Captured outcome of one command execution.  Both streams are always
/// captured, success or not, so diagnostics don't depend on exit status.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExecutionResult {
	pub exit_code: Option<i32>,
	pub stdout: String,
	pub stderr: String,
	pub stdout_truncated: bool,
	pub stderr_truncated: bool,
}

impl ExecutionResult {
	pub fn success(&self) -> bool {
		self.exit_code == Some(0)
	}
}

/// Appends a line (plus its linebreak) to a capture buffer, respecting
/// [`OUTPUT_CAP`].  Once the cap would be crossed the buffer stops growing
/// and `truncated` latches.
pub(crate) fn push_capped(buf: &mut String, truncated: &mut bool, line: &str) {
	if *truncated {
		return;
	}
	if buf.len() + line.len() + 1 > OUTPUT_CAP {
		*truncated = true;
		return;
	}
	buf.push_str(line);
	buf.push('\n');
}

/// Ident used as the event topic of one execution.
pub(crate) fn execution_ident() -> String {
	format!("nodeforge-{:08x}", rand::random::<u32>())
}

/// Handle to a named cache volume.  The store guarantees that the same name
/// always yields the same underlying volume; concurrent access to a volume
/// is the store's problem, not ours.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VolumeHandle {
	pub name: String,
	/// Where the volume lives on the host, for stores that have one.
	pub host_path: Option<PathBuf>,
}

/// The build engine collaborator: takes declarative steps and produces
/// filesystem snapshots, and executes commands against a snapshot.
///
/// Snapshots are values.  Applying a step never mutates its input snapshot;
/// that is what gives pipelines their copy-on-branch semantics.
pub trait BuildEngine {
	type Snapshot: Clone;

	fn resolve_base_image(&self, image: &ImageRef) -> Result<Self::Snapshot>;

	fn apply_step(&self, snapshot: &Self::Snapshot, step: &BuildStep) -> Result<Self::Snapshot>;

	/// Runs `argv` against the snapshot.  `env` is injected for this one
	/// execution only and must not be persisted anywhere.  Implementations
	/// must check the cancellation token and report [`crate::Error::Canceled`]
	/// rather than silently succeeding; when an outbox is given, output is
	/// streamed line by line and the execution ends with an `ExitCode` event.
	fn execute(
		&self,
		snapshot: &Self::Snapshot,
		argv: &[String],
		env: &IndexMap<String, String>,
		cancel: &CancellationToken,
		outbox: Option<&Sender<Event>>,
	) -> Result<ExecutionResult>;
}

/// Keyed volume storage surviving across builds.
pub trait CacheStore {
	fn get_or_create_volume(&self, binding: &CacheBinding) -> Result<VolumeHandle>;
}

/// Resolves opaque secret references to material.  There is deliberately no
/// way to enumerate or serialize what comes out of here.
pub trait SecretStore {
	fn resolve(&self, reference: &SecretRef) -> Result<Secret>;
}
