//! End-to-end walk of the documented build session: fresh pipeline, source
//! attach with a custom cache, npm as package manager, one install layer,
//! then recipe execution through the command surface.

use std::sync::Arc;

use expect_test::expect;
use tokio_util::sync::CancellationToken;

use nodeforge_api::manager::PackageManager;
use nodeforge_api::step::{BuildStep, DirectoryRef};
use nodeforge_pipeline::engine::ExecutionResult;
use nodeforge_pipeline::memory::{MemoryCacheStore, MemoryEngine, MemorySecretStore};
use nodeforge_pipeline::{Pipeline, PipelineConfig, SourceOptions};

fn session(engine: Arc<MemoryEngine>, caches: Arc<MemoryCacheStore>) -> Pipeline<MemoryEngine> {
	let mut pipeline = Pipeline::new(
		engine,
		caches,
		Arc::new(MemorySecretStore::new()),
		PipelineConfig::default(),
	)
	.expect("base image resolves");

	pipeline
		.attach_source(
			DirectoryRef("/home/user/app".into()),
			SourceOptions {
				cache: Some("custom-cache".into()),
			},
		)
		.expect("source attaches")
		.use_package_manager(PackageManager::Npm, None)
		.expect("npm wires up")
		.install(&["left-pad".to_string()])
		.expect("install queues");

	pipeline
}

#[test]
fn documented_session_resolves_as_specified() {
	let engine = Arc::new(MemoryEngine::new());
	let caches = Arc::new(MemoryCacheStore::new());
	let pipeline = session(engine, caches.clone());

	let rendered = serde_json::to_string_pretty(pipeline.resolved()).unwrap();
	expect![[r#"
        {
          "base_image": "node:22-alpine",
          "workdir": "/src",
          "entrypoint": [
            "npm"
          ],
          "directories": {
            "/src": "/home/user/app"
          },
          "caches": {
            "/src/node_modules": "custom-cache",
            "/root/.npm": "node-module-npm"
          },
          "secret_env": [],
          "queued": [
            [
              "install",
              "left-pad"
            ]
          ]
        }"#]]
	.assert_eq(&rendered);

	// The fold is replayable, and cache volumes were requested under their
	// canonical names exactly once each.
	assert_eq!(&pipeline.replay(), pipeline.resolved());
	assert_eq!(caches.volume_names(), vec!["custom-cache", "node-module-npm"]);
}

#[test]
fn engine_snapshot_layers_mirror_the_steps() {
	let engine = Arc::new(MemoryEngine::new());
	let pipeline = session(engine, Arc::new(MemoryCacheStore::new()));

	// The base-image step seeds the snapshot rather than layering onto it.
	let kinds: Vec<&str> = pipeline.snapshot().layers.iter().map(BuildStep::kind).collect();
	assert_eq!(
		kinds,
		vec!["workdir", "directory", "cache", "entrypoint", "cache", "exec"]
	);
}

#[test]
fn recipes_run_against_the_surfaced_session() {
	let engine = Arc::new(MemoryEngine::new());
	engine.script(
		&["npm".into(), "run".into(), "test".into()],
		ExecutionResult {
			exit_code: Some(0),
			stdout: "12 passing\n".into(),
			..Default::default()
		},
	);
	let mut pipeline = session(engine.clone(), Arc::new(MemoryCacheStore::new()));
	let surface = pipeline.to_command_surface();

	let result = surface
		.run("test", &[], &CancellationToken::new(), None)
		.expect("recipe succeeds");
	assert_eq!(result.stdout, "12 passing\n");

	// The surface captured a snapshot: mutating the pipeline afterwards is
	// fine and does not shift what the surface executes against.
	pipeline.install(&["axios".to_string()]).unwrap();
	surface
		.run("test", &[], &CancellationToken::new(), None)
		.expect("recipe still succeeds");
	assert_eq!(surface.resolved().queued.len(), 1);
	assert_eq!(pipeline.resolved().queued.len(), 2);
}
