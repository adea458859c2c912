use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use tokio_util::sync::CancellationToken;

use nodeforge_pipeline::engine::{BuildEngine, CacheStore};
use nodeforge_pipeline::memory::{MemoryCacheStore, MemoryEngine, MemorySecretStore};
use nodeforge_pipeline::shell::{DiskCacheStore, ShellEngine};
use nodeforge_pipeline::{Event, EventBody, OutputChannel};

use crate::cmds::Root;
use crate::{plan, Error};

#[derive(clap::Args, Debug)]
pub struct Cmd {
	/// Path to the plan file.
	pub plan: PathBuf,

	/// Recipe to execute (e.g. "test", "lint", "build").
	pub recipe: String,

	/// Extra arguments appended to the recipe command.
	pub args: Vec<String>,

	/// Resolve and execute against the in-memory engine instead of
	/// spawning host processes.
	#[arg(long)]
	pub dry_run: bool,

	/// Directory where cache volumes are materialized.
	#[arg(long)]
	pub cache_root: Option<PathBuf>,
}

pub fn execute(cli: &Root, cmd: &Cmd) -> Result<(), Error> {
	if cmd.dry_run {
		return run_plan(
			cli,
			cmd,
			Arc::new(MemoryEngine::new()),
			Arc::new(MemoryCacheStore::new()),
		);
	}

	let cache_root = cmd
		.cache_root
		.clone()
		.unwrap_or_else(|| std::env::temp_dir().join("nodeforge/caches"));
	run_plan(
		cli,
		cmd,
		Arc::new(ShellEngine {
			cache_root: cache_root.clone(),
		}),
		Arc::new(DiskCacheStore::new(cache_root)),
	)
}

fn run_plan<E: BuildEngine>(
	cli: &Root,
	cmd: &Cmd,
	engine: Arc<E>,
	caches: Arc<dyn CacheStore>,
) -> Result<(), Error> {
	let plan = plan::load(&cmd.plan)?;
	let pipeline = plan::build_pipeline(engine, caches, Arc::new(MemorySecretStore::new()), &plan)?;
	let surface = pipeline.to_command_surface();

	let (sender, receiver) = crossbeam_channel::bounded::<Event>(32);
	let printer = thread::spawn(move || {
		while let Ok(event) = receiver.recv() {
			match event.body {
				EventBody::Output {
					channel: OutputChannel::Stdout,
					line,
				} => println!("[container] {line}"),
				EventBody::Output {
					channel: OutputChannel::Stderr,
					line,
				} => eprintln!("[container] {line}"),
				EventBody::ExitCode(_) => {}
			}
		}
	});

	let cancel = CancellationToken::new();
	let result = surface.run(&cmd.recipe, &cmd.args, &cancel, Some(&sender));
	drop(sender);
	let _ = printer.join();

	let result = result?;
	if cli.verbosity >= 1 {
		eprintln!("recipe '{}' exited {:?}", cmd.recipe, result.exit_code);
	}
	Ok(())
}
