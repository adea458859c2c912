use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;

use nodeforge_api::cache::CacheBinding;
use nodeforge_api::image::RuntimeVersion;
use nodeforge_api::manager::PackageManager;
use nodeforge_api::step::{BuildStep, DirectoryRef};
use nodeforge_pipeline::engine::{BuildEngine, CacheStore, SecretStore};
use nodeforge_pipeline::{Pipeline, PipelineConfig, SourceOptions};

use crate::Error;

/// Declarative plan file consumed by `nodeforge plan` and `nodeforge run`.
#[derive(Debug, Deserialize)]
pub struct Plan {
	#[serde(default)]
	pub version: RuntimeVersion,

	/// Source directory to mount at /src.
	pub source: PathBuf,

	/// Cache volume name for /src/node_modules ("node-modules" if unset).
	#[serde(default)]
	pub source_cache: Option<String>,

	#[serde(default)]
	pub package_manager: Option<PackageManager>,

	/// Cache volume name for the manager's download cache.
	#[serde(default)]
	pub manager_cache: Option<String>,

	/// Extra packages to install.  Present (even empty) queues an install layer.
	#[serde(default)]
	pub install: Option<Vec<String>>,

	/// Additional cache bindings, mounted after everything above.
	#[serde(default)]
	pub caches: Vec<CacheBinding>,
}

pub fn load(path: &Path) -> Result<Plan, Error> {
	let file = File::open(path).map_err(|e| Error::InvalidArguments { cause: Box::new(e) })?;
	let reader = BufReader::new(file);
	serde_json::from_reader(reader).map_err(|e| Error::InvalidArguments {
		cause: format!("invalid plan file: {e}").into(),
	})
}

/// Folds a plan through a fresh pipeline, in the fixed order the plan
/// format promises: source, package manager, extra caches, install.
pub fn build_pipeline<E: BuildEngine>(
	engine: Arc<E>,
	caches: Arc<dyn CacheStore>,
	secrets: Arc<dyn SecretStore>,
	plan: &Plan,
) -> Result<Pipeline<E>, Error> {
	let mut pipeline = Pipeline::new(
		engine,
		caches,
		secrets,
		PipelineConfig {
			version: plan.version.clone(),
		},
	)?;

	pipeline.attach_source(
		DirectoryRef(plan.source.clone()),
		SourceOptions {
			cache: plan.source_cache.clone(),
		},
	)?;

	if let Some(kind) = plan.package_manager {
		pipeline.use_package_manager(kind, plan.manager_cache.clone())?;
	}

	for binding in &plan.caches {
		pipeline.append(BuildStep::MountCache {
			binding: binding.clone(),
		})?;
	}

	if let Some(extra) = &plan.install {
		pipeline.install(extra)?;
	}

	Ok(pipeline)
}
