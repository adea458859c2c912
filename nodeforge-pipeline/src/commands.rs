use std::sync::Arc;

use crossbeam_channel::Sender;
use indexmap::IndexMap;
use tokio_util::sync::CancellationToken;

use crate::engine::{BuildEngine, ExecutionResult};
use crate::pipeline::ResolvedState;
use crate::{Error, Event, Result};

/// Read-only view over one resolved pipeline snapshot, exposing named
/// recipe execution.  The surface never mutates the pipeline it came from:
/// every `run` is ephemeral, executed against the captured snapshot.
pub struct CommandSurface<E: BuildEngine> {
	engine: Arc<E>,
	snapshot: E::Snapshot,
	resolved: ResolvedState,
	recipes: IndexMap<String, Vec<String>>,
}

fn default_recipes() -> IndexMap<String, Vec<String>> {
	IndexMap::from([
		("test".to_string(), vec!["run".to_string(), "test".to_string()]),
		("lint".to_string(), vec!["run".to_string(), "lint".to_string()]),
		("build".to_string(), vec!["run".to_string(), "build".to_string()]),
		("start".to_string(), vec!["start".to_string()]),
	])
}

impl<E: BuildEngine> CommandSurface<E> {
	pub(crate) fn new(engine: Arc<E>, snapshot: E::Snapshot, resolved: ResolvedState) -> Self {
		CommandSurface {
			engine,
			snapshot,
			resolved,
			recipes: default_recipes(),
		}
	}

	/// Registers (or overrides) a named recipe.
	pub fn with_recipe(mut self, name: impl Into<String>, argv: Vec<String>) -> Self {
		self.recipes.insert(name.into(), argv);
		self
	}

	pub fn recipes(&self) -> impl Iterator<Item = &str> {
		self.recipes.keys().map(String::as_str)
	}

	pub fn resolved(&self) -> &ResolvedState {
		&self.resolved
	}

	/// Executes a named recipe under the captured entrypoint, with `args`
	/// appended.  Nonzero exit is reported as an error carrying the exit
	/// code and the captured output of both streams.
	pub fn run(
		&self,
		recipe: &str,
		args: &[String],
		cancel: &CancellationToken,
		outbox: Option<&Sender<Event>>,
	) -> Result<ExecutionResult> {
		let Some(base) = self.recipes.get(recipe) else {
			return Err(Error::UnknownRecipe {
				name: recipe.to_string(),
			});
		};

		let mut argv = self.resolved.entrypoint.clone();
		argv.extend(base.iter().cloned());
		argv.extend(args.iter().cloned());

		let result = self
			.engine
			.execute(&self.snapshot, &argv, &IndexMap::new(), cancel, outbox)?;
		if !result.success() {
			return Err(Error::CommandExecution {
				exit_code: result.exit_code,
				result,
			});
		}
		Ok(result)
	}
}
