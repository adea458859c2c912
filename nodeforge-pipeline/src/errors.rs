use crate::engine::ExecutionResult;

pub type Result<T> = std::result::Result<T, Error>;

type ErrorCause = Box<dyn ::std::error::Error + Send + Sync>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
	/// The configured base image could not be resolved to a filesystem
	/// snapshot -- malformed reference, or the engine doesn't know it.
	#[error("failed to resolve base image '{image}': {cause}")]
	BaseImageResolution { image: String, cause: ErrorCause },

	/// A mount instruction was rejected before it touched any state.
	/// Note that binding two caches at the same path is *not* a mount error;
	/// that's layering, and the later binding wins.
	#[error("invalid mount at '{path}': {msg}")]
	Mount { path: String, msg: String },

	#[error("failed to resolve secret '{reference}': {cause}")]
	SecretResolution { reference: String, cause: ErrorCause },

	/// A command ran to completion and exited nonzero.  Captured output is
	/// attached for diagnostics (capped per stream, see
	/// [`crate::engine::OUTPUT_CAP`]).
	#[error("command terminated with exit code {exit_code:?}")]
	CommandExecution {
		exit_code: Option<i32>,
		result: ExecutionResult,
	},

	/// An in-flight operation was canceled via its cancellation token.
	/// The pipeline's step sequence is unchanged: no partial step is ever
	/// appended.
	#[error("build step canceled")]
	Canceled,

	#[error("unknown recipe '{name}'")]
	UnknownRecipe { name: String },

	/// Wraps a collaborator error with the step that triggered it.
	#[error("step {index} ({kind}) failed: {source}")]
	Step {
		index: usize,
		kind: &'static str,
		source: Box<Error>,
	},

	#[error("{msg}: {cause}")]
	Catchall { msg: String, cause: ErrorCause },
}

impl Error {
	pub(crate) fn for_step(self, index: usize, kind: &'static str) -> Error {
		Error::Step {
			index,
			kind,
			source: Box::new(self),
		}
	}
}
