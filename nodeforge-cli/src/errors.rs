type ErrorCause = Box<dyn ::std::error::Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
	// InvalidArguments is for CLI level parse errors.  Don't use it any deeper inside.
	#[error("invalid arguments: {cause}")]
	InvalidArguments { cause: ErrorCause },

	/// Something in the host environment is off in a way that requires
	/// human intervention (unreadable plan file, missing directories, ...).
	/// Make sure the cause describes itself well.
	#[error("halting due to strange environment: {cause}")]
	BizarreEnvironment { cause: ErrorCause },

	#[error(transparent)]
	Pipeline(#[from] nodeforge_pipeline::Error),
}

impl Error {
	pub fn code(&self) -> i32 {
		match self {
			Error::InvalidArguments { .. } => 1,
			Error::BizarreEnvironment { .. } => 4,
			// A recipe that ran and failed passes its exit code through.
			Error::Pipeline(nodeforge_pipeline::Error::CommandExecution {
				exit_code: Some(code),
				..
			}) => *code,
			Error::Pipeline(_) => 9,
		}
	}
}
