use std::path::PathBuf;
use std::sync::Arc;

use nodeforge_pipeline::memory::{MemoryCacheStore, MemoryEngine, MemorySecretStore};

use crate::cmds::Root;
use crate::{plan, Error};

#[derive(clap::Args, Debug)]
pub struct Cmd {
	/// Path to the plan file.
	pub plan: PathBuf,
}

pub fn execute(cli: &Root, cmd: &Cmd) -> Result<(), Error> {
	let plan = plan::load(&cmd.plan)?;
	if cli.verbosity >= 2 {
		eprintln!("plan: {plan:?}");
	}

	// Resolution only; nothing is executed, so the in-memory engine is
	// exactly the right amount of engine.
	let pipeline = plan::build_pipeline(
		Arc::new(MemoryEngine::new()),
		Arc::new(MemoryCacheStore::new()),
		Arc::new(MemorySecretStore::new()),
		&plan,
	)?;

	let rendered = serde_json::to_string_pretty(pipeline.resolved())
		.map_err(|e| Error::BizarreEnvironment { cause: Box::new(e) })?;
	println!("{rendered}");
	Ok(())
}
