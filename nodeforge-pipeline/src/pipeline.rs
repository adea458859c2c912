use std::sync::Arc;

use crossbeam_channel::Sender;
use indexmap::IndexMap;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use nodeforge_api::cache::{CacheBinding, DEFAULT_SOURCE_CACHE};
use nodeforge_api::image::{ImageRef, RuntimeVersion};
use nodeforge_api::manager::PackageManager;
use nodeforge_api::secret::SecretRef;
use nodeforge_api::step::{BuildStep, DirectoryRef};

use crate::commands::CommandSurface;
use crate::engine::{BuildEngine, CacheStore, ExecutionResult, SecretStore};
use crate::{Error, Event, Result};

/// Where `attach_source` lands the source tree.
pub const SOURCE_WORKDIR: &str = "/src";

/// Defaults for the registry-auth helper.
pub const REGISTRY_AUTH_ENV: &str = "NODE_AUTH_TOKEN";
pub const REGISTRY_AUTH_CACHE: &str = "node-registry-auth";
pub const REGISTRY_AUTH_MOUNT: &str = "/root/.cache/node-registry-auth";

/// Construction-time configuration.  All fields have conventional defaults.
#[derive(Clone, Debug, Default)]
pub struct PipelineConfig {
	pub version: RuntimeVersion,
}

#[derive(Clone, Debug, Default)]
pub struct SourceOptions {
	/// Cache volume name for the node_modules mount ("node-modules" if unset).
	pub cache: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct RegistryAuthOptions {
	/// Env var the secret is exposed under during the verification probe
	/// ("NODE_AUTH_TOKEN" if unset).
	pub env_name: Option<String>,
	/// Cache volume name ("node-registry-auth" if unset).
	pub cache: Option<String>,
	/// Mount path for the cache volume.
	pub mount_path: Option<String>,
}

/// The current materialized view of a pipeline: always the deterministic
/// in-order fold of its steps, never anything else.
///
/// Mounts are keyed by destination path; re-binding a path layers over the
/// earlier binding (last-write-wins).  Secret env records *names* only.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ResolvedState {
	pub base_image: Option<ImageRef>,
	pub workdir: Option<String>,
	pub entrypoint: Vec<String>,
	pub directories: IndexMap<String, DirectoryRef>,
	/// Mount path -> cache volume name.
	pub caches: IndexMap<String, String>,
	pub secret_env: Vec<String>,
	/// Commands queued as build layers, in order.
	pub queued: Vec<Vec<String>>,
}

impl ResolvedState {
	pub(crate) fn apply(&mut self, step: &BuildStep) {
		match step {
			BuildStep::SetBaseImage { image } => self.base_image = Some(image.clone()),
			BuildStep::SetWorkdir { path } => self.workdir = Some(path.clone()),
			BuildStep::MountDirectory { path, source } => {
				self.directories.insert(path.clone(), source.clone());
			}
			BuildStep::MountCache { binding } => {
				self.caches.insert(binding.mount_path.clone(), binding.name.clone());
			}
			BuildStep::InjectSecretEnv { name, .. } => {
				if !self.secret_env.contains(name) {
					self.secret_env.push(name.clone());
				}
			}
			BuildStep::SetEntrypoint { argv } => self.entrypoint = argv.clone(),
			BuildStep::RunCommand { argv } => self.queued.push(argv.clone()),
		}
	}
}

/// An ordered, mutable sequence of build steps plus the resolved state and
/// engine snapshot that mirror their fold.
///
/// Chaining contract: mutation methods take `&mut self` and hand back
/// `Result<&mut Self>`, so callers chain with `?` and always observe the
/// update in the value they hold.  A failed call leaves the pipeline exactly
/// as it was -- every fallible thing happens before anything is committed.
pub struct Pipeline<E: BuildEngine> {
	engine: Arc<E>,
	caches: Arc<dyn CacheStore>,
	secrets: Arc<dyn SecretStore>,
	version: Option<RuntimeVersion>,
	/// Resolved state at construction time; `replay` folds `steps` onto this.
	base: ResolvedState,
	steps: Vec<BuildStep>,
	resolved: ResolvedState,
	snapshot: E::Snapshot,
}

impl<E: BuildEngine> Pipeline<E> {
	/// Creates a fresh pipeline by resolving the configured runtime version
	/// to a base image snapshot.
	pub fn new(
		engine: Arc<E>,
		caches: Arc<dyn CacheStore>,
		secrets: Arc<dyn SecretStore>,
		config: PipelineConfig,
	) -> Result<Self> {
		let image = config.version.image();
		if !image.is_wellformed() {
			return Err(Error::BaseImageResolution {
				image: image.to_string(),
				cause: "malformed image reference".into(),
			});
		}
		let snapshot = engine.resolve_base_image(&image)?;

		let base = ResolvedState::default();
		let step = BuildStep::SetBaseImage { image };
		let mut resolved = base.clone();
		resolved.apply(&step);

		Ok(Pipeline {
			engine,
			caches,
			secrets,
			version: Some(config.version),
			base,
			steps: vec![step],
			resolved,
			snapshot,
		})
	}

	/// Wraps an existing build context, bypassing base-image resolution.
	///
	/// The snapshot and resolved state are taken by value and owned here:
	/// two pipelines constructed from clones of the same snapshot are fully
	/// independent, and mutating one never affects the other.
	pub fn from_snapshot(
		engine: Arc<E>,
		caches: Arc<dyn CacheStore>,
		secrets: Arc<dyn SecretStore>,
		snapshot: E::Snapshot,
		resolved: ResolvedState,
	) -> Self {
		Pipeline {
			engine,
			caches,
			secrets,
			version: None,
			base: resolved.clone(),
			steps: Vec::new(),
			resolved,
			snapshot,
		}
	}

	pub fn version(&self) -> Option<&RuntimeVersion> {
		self.version.as_ref()
	}

	pub fn steps(&self) -> &[BuildStep] {
		&self.steps
	}

	pub fn resolved(&self) -> &ResolvedState {
		&self.resolved
	}

	pub fn snapshot(&self) -> &E::Snapshot {
		&self.snapshot
	}

	/// Recomputes the fold of all steps from the construction-time state.
	/// By construction this always equals [`Pipeline::resolved`]; it exists
	/// so that the invariant is checkable.
	pub fn replay(&self) -> ResolvedState {
		let mut state = self.base.clone();
		for step in &self.steps {
			state.apply(step);
		}
		state
	}

	/// Appends one step.  See [`Pipeline::append_all`].
	pub fn append(&mut self, step: BuildStep) -> Result<&mut Self> {
		self.append_all(vec![step])
	}

	/// Appends a batch of steps atomically: each step is validated and
	/// staged against the engine first, and only a fully staged batch is
	/// committed.  On error the pipeline is untouched.
	pub fn append_all(&mut self, steps: Vec<BuildStep>) -> Result<&mut Self> {
		for step in &steps {
			self.validate(step)?;
		}

		let mut snapshot = self.snapshot.clone();
		for (offset, step) in steps.iter().enumerate() {
			snapshot = self
				.engine
				.apply_step(&snapshot, step)
				.map_err(|e| e.for_step(self.steps.len() + offset, step.kind()))?;
		}

		for step in &steps {
			self.resolved.apply(step);
		}
		self.steps.extend(steps);
		self.snapshot = snapshot;
		Ok(self)
	}

	fn validate(&self, step: &BuildStep) -> Result<()> {
		match step {
			BuildStep::SetWorkdir { path } if !path.starts_with('/') => Err(Error::Mount {
				path: path.clone(),
				msg: "working directory must be an absolute path".into(),
			}),
			BuildStep::MountDirectory { path, .. } if !path.starts_with('/') => Err(Error::Mount {
				path: path.clone(),
				msg: "mount destination must be an absolute path".into(),
			}),
			BuildStep::MountCache { binding } if !binding.mount_path.starts_with('/') => {
				Err(Error::Mount {
					path: binding.mount_path.clone(),
					msg: "mount destination must be an absolute path".into(),
				})
			}
			BuildStep::MountCache { binding } if binding.name.is_empty() => Err(Error::Mount {
				path: binding.mount_path.clone(),
				msg: "cache volume name must not be empty".into(),
			}),
			_ => Ok(()),
		}
	}

	/// Attaches the source tree: sets the working directory to `/src`,
	/// mounts the directory there, and mounts a node_modules cache volume
	/// (named "node-modules" unless overridden).
	pub fn attach_source(
		&mut self,
		source: DirectoryRef,
		options: SourceOptions,
	) -> Result<&mut Self> {
		let name = options.cache.unwrap_or_else(|| DEFAULT_SOURCE_CACHE.into());
		let binding = CacheBinding::new(name, format!("{SOURCE_WORKDIR}/node_modules"));
		self.caches.get_or_create_volume(&binding)?;

		self.append_all(vec![
			BuildStep::SetWorkdir {
				path: SOURCE_WORKDIR.into(),
			},
			BuildStep::MountDirectory {
				path: SOURCE_WORKDIR.into(),
				source,
			},
			BuildStep::MountCache { binding },
		])
	}

	/// Verifies registry credentials and mounts the auth cache volume.
	///
	/// The verification is an ephemeral probe: the resolved secret is
	/// injected into the environment of a single command execution against
	/// the current snapshot and goes nowhere else.  It is never written to a
	/// file, never recorded in a step, and never lands in a persisted layer.
	/// The only step appended to the pipeline is the cache mount.
	pub fn attach_registry_auth(
		&mut self,
		secret: SecretRef,
		options: RegistryAuthOptions,
		cancel: &CancellationToken,
	) -> Result<&mut Self> {
		let env_name = options.env_name.unwrap_or_else(|| REGISTRY_AUTH_ENV.into());
		let material = self.secrets.resolve(&secret)?;

		let mut env = IndexMap::new();
		env.insert(env_name.clone(), material.expose().to_string());
		let probe = vec![
			"sh".to_string(),
			"-c".to_string(),
			format!("test -n \"${env_name}\""),
		];
		let result = self.engine.execute(&self.snapshot, &probe, &env, cancel, None)?;
		if !result.success() {
			return Err(Error::CommandExecution {
				exit_code: result.exit_code,
				result,
			});
		}

		let binding = CacheBinding::new(
			options.cache.unwrap_or_else(|| REGISTRY_AUTH_CACHE.into()),
			options.mount_path.unwrap_or_else(|| REGISTRY_AUTH_MOUNT.into()),
		);
		self.caches.get_or_create_volume(&binding)?;
		self.append(BuildStep::MountCache { binding })
	}

	/// Installs `kind` as the container entrypoint and mounts its package
	/// download cache (named "node-module-<kind>" unless overridden).
	pub fn use_package_manager(
		&mut self,
		kind: PackageManager,
		cache: Option<String>,
	) -> Result<&mut Self> {
		let name = cache.unwrap_or_else(|| kind.default_cache_name());
		let binding = CacheBinding::new(name, kind.cache_path());
		self.caches.get_or_create_volume(&binding)?;

		self.append_all(vec![
			BuildStep::SetEntrypoint {
				argv: kind.entrypoint(),
			},
			BuildStep::MountCache { binding },
		])
	}

	/// Queues a dependency download, executed under whatever entrypoint is
	/// currently set: `install(&[])` queues exactly `["install"]`.
	pub fn install(&mut self, extra_packages: &[String]) -> Result<&mut Self> {
		let mut argv = vec!["install".to_string()];
		argv.extend(extra_packages.iter().cloned());
		self.append(BuildStep::RunCommand { argv })
	}

	/// Ephemeral execution of `argv` (under the current entrypoint) against
	/// the current snapshot.  Nothing is appended to the step sequence, so
	/// cancellation or failure leaves the pipeline exactly as it was.
	pub fn run(
		&self,
		argv: &[String],
		cancel: &CancellationToken,
		outbox: Option<&Sender<Event>>,
	) -> Result<ExecutionResult> {
		let mut full = self.resolved.entrypoint.clone();
		full.extend(argv.iter().cloned());
		let result = self
			.engine
			.execute(&self.snapshot, &full, &IndexMap::new(), cancel, outbox)?;
		if !result.success() {
			return Err(Error::CommandExecution {
				exit_code: result.exit_code,
				result,
			});
		}
		Ok(result)
	}

	/// Snapshots the current resolved state into a command surface.  The
	/// pipeline stays usable; later mutations are not visible to the surface.
	pub fn to_command_surface(&self) -> CommandSurface<E> {
		CommandSurface::new(
			self.engine.clone(),
			self.snapshot.clone(),
			self.resolved.clone(),
		)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::engine::OUTPUT_CAP;
	use crate::memory::{MemoryCacheStore, MemoryEngine, MemorySecretStore};

	struct Fixture {
		engine: Arc<MemoryEngine>,
		caches: Arc<MemoryCacheStore>,
		secrets: Arc<MemorySecretStore>,
	}

	impl Fixture {
		fn new() -> Self {
			Fixture {
				engine: Arc::new(MemoryEngine::new()),
				caches: Arc::new(MemoryCacheStore::new()),
				secrets: Arc::new(MemorySecretStore::new()),
			}
		}

		fn pipeline(&self) -> Pipeline<MemoryEngine> {
			Pipeline::new(
				self.engine.clone(),
				self.caches.clone(),
				self.secrets.clone(),
				PipelineConfig::default(),
			)
			.expect("default pipeline resolves")
		}
	}

	fn source() -> DirectoryRef {
		DirectoryRef("/home/user/app".into())
	}

	#[test]
	fn default_version_resolves_node_alpine() {
		let fixture = Fixture::new();
		let pipeline = fixture.pipeline();
		assert_eq!(
			pipeline.resolved().base_image,
			Some(ImageRef("node:22-alpine".into()))
		);
		assert_eq!(pipeline.steps().len(), 1);
		assert_eq!(pipeline.version().unwrap().0, "22-alpine");
	}

	#[test]
	fn unknown_base_image_is_a_resolution_error() {
		let fixture = Fixture::new();
		let engine = Arc::new(MemoryEngine::with_known_images(vec![ImageRef(
			"node:22-alpine".into(),
		)]));
		let result = Pipeline::new(
			engine,
			fixture.caches.clone(),
			fixture.secrets.clone(),
			PipelineConfig {
				version: RuntimeVersion("99-nonexistent".into()),
			},
		);
		assert!(matches!(result, Err(Error::BaseImageResolution { .. })));
	}

	#[test]
	fn malformed_version_is_rejected_before_the_engine() {
		let fixture = Fixture::new();
		let result = Pipeline::new(
			fixture.engine.clone(),
			fixture.caches.clone(),
			fixture.secrets.clone(),
			PipelineConfig {
				version: RuntimeVersion("22 alpine".into()),
			},
		);
		assert!(matches!(result, Err(Error::BaseImageResolution { .. })));
	}

	#[test]
	fn attach_source_sets_workdir_and_default_cache() {
		let fixture = Fixture::new();
		let mut pipeline = fixture.pipeline();
		pipeline
			.attach_source(source(), SourceOptions::default())
			.unwrap();

		let resolved = pipeline.resolved();
		assert_eq!(resolved.workdir.as_deref(), Some("/src"));
		assert_eq!(resolved.directories.get("/src"), Some(&source()));
		assert_eq!(
			resolved.caches.get("/src/node_modules").map(String::as_str),
			Some("node-modules")
		);
		assert_eq!(fixture.caches.volume_names(), vec!["node-modules"]);
	}

	#[test]
	fn attach_source_honors_cache_override() {
		let fixture = Fixture::new();
		let mut pipeline = fixture.pipeline();
		pipeline
			.attach_source(
				source(),
				SourceOptions {
					cache: Some("custom-cache".into()),
				},
			)
			.unwrap();
		assert_eq!(
			pipeline
				.resolved()
				.caches
				.get("/src/node_modules")
				.map(String::as_str),
			Some("custom-cache")
		);
	}

	#[test]
	fn later_cache_binding_at_same_path_wins() {
		let fixture = Fixture::new();
		let mut pipeline = fixture.pipeline();
		pipeline
			.append(BuildStep::MountCache {
				binding: CacheBinding::new("first", "/root/.npm"),
			})
			.unwrap()
			.append(BuildStep::MountCache {
				binding: CacheBinding::new("second", "/root/.npm"),
			})
			.unwrap();

		let resolved = pipeline.resolved();
		assert_eq!(resolved.caches.len(), 1);
		assert_eq!(resolved.caches.get("/root/.npm").map(String::as_str), Some("second"));
		// Both steps stay recorded; only the fold is last-write-wins.
		assert_eq!(pipeline.steps().len(), 3);
	}

	#[test]
	fn install_issues_exact_argv() {
		let fixture = Fixture::new();
		let mut pipeline = fixture.pipeline();
		pipeline.install(&[]).unwrap();
		assert_eq!(pipeline.resolved().queued, vec![vec!["install".to_string()]]);

		pipeline
			.install(&["lodash".to_string(), "axios".to_string()])
			.unwrap();
		assert_eq!(
			pipeline.resolved().queued[1],
			vec!["install".to_string(), "lodash".to_string(), "axios".to_string()]
		);
	}

	#[test]
	fn replay_reproduces_resolved_state() {
		let fixture = Fixture::new();
		let mut pipeline = fixture.pipeline();
		pipeline
			.attach_source(source(), SourceOptions::default())
			.unwrap()
			.use_package_manager(PackageManager::Npm, None)
			.unwrap()
			.install(&["left-pad".to_string()])
			.unwrap();

		assert_eq!(&pipeline.replay(), pipeline.resolved());
	}

	#[test]
	fn invalid_mount_leaves_pipeline_untouched() {
		let fixture = Fixture::new();
		let mut pipeline = fixture.pipeline();
		let before = pipeline.steps().len();

		let result = pipeline.append(BuildStep::MountCache {
			binding: CacheBinding::new("bad", "relative/path"),
		});
		assert!(matches!(result, Err(Error::Mount { .. })));
		assert_eq!(pipeline.steps().len(), before);
		assert_eq!(&pipeline.replay(), pipeline.resolved());
	}

	#[test]
	fn rejected_batch_commits_nothing() {
		let fixture = Fixture::new();
		let mut pipeline = fixture.pipeline();
		// Engine refuses cache mounts: the whole attach_source batch must
		// roll back, including the workdir and directory steps staged first.
		fixture.engine.deny_step_kind("cache");
		let before = pipeline.steps().len();

		let result = pipeline.attach_source(source(), SourceOptions::default());
		match result {
			Err(Error::Step { index, kind, .. }) => {
				assert_eq!(kind, "cache");
				assert_eq!(index, before + 2);
			}
			other => panic!("expected step error, got {:?}", other.map(|_| ())),
		}
		assert_eq!(pipeline.steps().len(), before);
		assert_eq!(pipeline.resolved().workdir, None);
	}

	#[test]
	fn canceled_run_leaves_steps_unchanged() {
		let fixture = Fixture::new();
		let mut pipeline = fixture.pipeline();
		pipeline
			.use_package_manager(PackageManager::Npm, None)
			.unwrap();
		let before = pipeline.steps().len();

		let cancel = CancellationToken::new();
		cancel.cancel();
		let result = pipeline.run(&["test".to_string()], &cancel, None);
		assert!(matches!(result, Err(Error::Canceled)));
		assert_eq!(pipeline.steps().len(), before);
	}

	#[test]
	fn run_prepends_entrypoint_and_reports_nonzero_exit() {
		let fixture = Fixture::new();
		let mut pipeline = fixture.pipeline();
		pipeline
			.use_package_manager(PackageManager::Npm, None)
			.unwrap();

		fixture.engine.script(
			&["npm".into(), "test".into()],
			ExecutionResult {
				exit_code: Some(1),
				stderr: "1 failing\n".into(),
				..Default::default()
			},
		);

		let cancel = CancellationToken::new();
		let result = pipeline.run(&["test".to_string()], &cancel, None);
		match result {
			Err(Error::CommandExecution { exit_code, result }) => {
				assert_eq!(exit_code, Some(1));
				assert_eq!(result.stderr, "1 failing\n");
				assert!(!result.stderr_truncated);
			}
			other => panic!("expected execution error, got {:?}", other.map(|_| ())),
		}
	}

	#[test]
	fn registry_auth_probes_ephemerally_and_mounts_cache() {
		let fixture = Fixture::new();
		fixture.secrets.insert("registry-token", "hunter2");
		let mut pipeline = fixture.pipeline();
		let before = pipeline.steps().len();

		let cancel = CancellationToken::new();
		pipeline
			.attach_registry_auth(
				SecretRef("registry-token".into()),
				RegistryAuthOptions::default(),
				&cancel,
			)
			.unwrap();

		// Exactly one intentional step: the cache mount.
		assert_eq!(pipeline.steps().len(), before + 1);
		assert_eq!(
			pipeline
				.resolved()
				.caches
				.get(REGISTRY_AUTH_MOUNT)
				.map(String::as_str),
			Some(REGISTRY_AUTH_CACHE)
		);

		// The probe ran, with the secret in env for that execution only.
		let executed = fixture.engine.executed();
		assert_eq!(executed.len(), 1);
		assert_eq!(executed[0][0], "sh");

		// No secret material anywhere in the recorded steps.
		let recorded = serde_json::to_string(pipeline.steps()).unwrap();
		assert!(!recorded.contains("hunter2"));
	}

	#[test]
	fn registry_auth_missing_secret_mutates_nothing() {
		let fixture = Fixture::new();
		let mut pipeline = fixture.pipeline();
		let before = pipeline.steps().len();

		let cancel = CancellationToken::new();
		let result = pipeline.attach_registry_auth(
			SecretRef("nope".into()),
			RegistryAuthOptions::default(),
			&cancel,
		);
		assert!(matches!(result, Err(Error::SecretResolution { .. })));
		assert_eq!(pipeline.steps().len(), before);
	}

	#[test]
	fn registry_auth_failed_probe_mutates_nothing() {
		let fixture = Fixture::new();
		fixture.secrets.insert("registry-token", "hunter2");
		let mut pipeline = fixture.pipeline();
		let before = pipeline.steps().len();

		fixture.engine.script(
			&[
				"sh".into(),
				"-c".into(),
				format!("test -n \"${REGISTRY_AUTH_ENV}\""),
			],
			ExecutionResult {
				exit_code: Some(1),
				..Default::default()
			},
		);

		let cancel = CancellationToken::new();
		let result = pipeline.attach_registry_auth(
			SecretRef("registry-token".into()),
			RegistryAuthOptions::default(),
			&cancel,
		);
		assert!(matches!(result, Err(Error::CommandExecution { .. })));
		assert_eq!(pipeline.steps().len(), before);
	}

	#[test]
	fn siblings_from_shared_snapshot_are_independent() {
		let fixture = Fixture::new();
		let parent = fixture.pipeline();
		let snapshot = parent.snapshot().clone();
		let resolved = parent.resolved().clone();

		let mut left = Pipeline::from_snapshot(
			fixture.engine.clone(),
			fixture.caches.clone(),
			fixture.secrets.clone(),
			snapshot.clone(),
			resolved.clone(),
		);
		let right = Pipeline::from_snapshot(
			fixture.engine.clone(),
			fixture.caches.clone(),
			fixture.secrets.clone(),
			snapshot,
			resolved.clone(),
		);

		left.attach_source(source(), SourceOptions::default())
			.unwrap()
			.use_package_manager(PackageManager::Yarn, None)
			.unwrap();

		assert_eq!(right.resolved(), &resolved);
		assert!(right.steps().is_empty());
		assert_ne!(left.resolved(), right.resolved());
		assert_eq!(&left.replay(), left.resolved());
	}

	#[test]
	fn secret_env_step_records_name_only() {
		let fixture = Fixture::new();
		let mut pipeline = fixture.pipeline();
		pipeline
			.append(BuildStep::InjectSecretEnv {
				name: "NODE_AUTH_TOKEN".into(),
				secret: SecretRef("registry-token".into()),
			})
			.unwrap();
		assert_eq!(pipeline.resolved().secret_env, vec!["NODE_AUTH_TOKEN".to_string()]);
	}

	#[test]
	fn output_cap_is_ten_mebibytes() {
		assert_eq!(OUTPUT_CAP, 10 * 1024 * 1024);
	}
}
