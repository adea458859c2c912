//! Deterministic in-memory collaborators, used by tests and dry runs.
//! Snapshots are plain values recording the layered steps, so the engine
//! side of the pipeline fold is fully observable without any container
//! runtime in the picture.

use std::sync::Mutex;

use crossbeam_channel::Sender;
use indexmap::IndexMap;
use tokio_util::sync::CancellationToken;

use nodeforge_api::cache::CacheBinding;
use nodeforge_api::image::ImageRef;
use nodeforge_api::secret::{Secret, SecretRef};
use nodeforge_api::step::BuildStep;

use crate::engine::{
	execution_ident, BuildEngine, CacheStore, ExecutionResult, SecretStore, VolumeHandle,
};
use crate::{Error, Event, EventBody, OutputChannel, Result};

#[derive(Clone, Debug, PartialEq)]
pub struct MemorySnapshot {
	pub image: ImageRef,
	pub layers: Vec<BuildStep>,
}

#[derive(Default)]
pub struct MemoryEngine {
	/// When set, only these refs resolve; anything else reports a
	/// resolution failure.  Unset accepts every well-formed ref.
	known_images: Option<Vec<ImageRef>>,
	/// Scripted results keyed by space-joined argv.  Executions without a
	/// script succeed with empty output.
	scripted: Mutex<IndexMap<String, ExecutionResult>>,
	/// Step kind this engine refuses to apply, for failure-path tests.
	denied_step_kind: Mutex<Option<&'static str>>,
	executed: Mutex<Vec<Vec<String>>>,
}

impl MemoryEngine {
	pub fn new() -> Self {
		MemoryEngine::default()
	}

	pub fn with_known_images(images: Vec<ImageRef>) -> Self {
		MemoryEngine {
			known_images: Some(images),
			..MemoryEngine::default()
		}
	}

	pub fn script(&self, argv: &[String], result: ExecutionResult) {
		self.scripted.lock().unwrap().insert(argv.join(" "), result);
	}

	pub fn deny_step_kind(&self, kind: &'static str) {
		*self.denied_step_kind.lock().unwrap() = Some(kind);
	}

	/// Every argv this engine has executed, in order.
	pub fn executed(&self) -> Vec<Vec<String>> {
		self.executed.lock().unwrap().clone()
	}
}

impl BuildEngine for MemoryEngine {
	type Snapshot = MemorySnapshot;

	fn resolve_base_image(&self, image: &ImageRef) -> Result<MemorySnapshot> {
		if !image.is_wellformed() {
			return Err(Error::BaseImageResolution {
				image: image.to_string(),
				cause: "malformed image reference".into(),
			});
		}
		if let Some(known) = &self.known_images {
			if !known.contains(image) {
				return Err(Error::BaseImageResolution {
					image: image.to_string(),
					cause: "image not present in engine catalog".into(),
				});
			}
		}
		Ok(MemorySnapshot {
			image: image.clone(),
			layers: Vec::new(),
		})
	}

	fn apply_step(&self, snapshot: &MemorySnapshot, step: &BuildStep) -> Result<MemorySnapshot> {
		if *self.denied_step_kind.lock().unwrap() == Some(step.kind()) {
			return Err(Error::Catchall {
				msg: "engine rejected step".into(),
				cause: step.kind().into(),
			});
		}
		let mut next = snapshot.clone();
		next.layers.push(step.clone());
		Ok(next)
	}

	fn execute(
		&self,
		_snapshot: &MemorySnapshot,
		argv: &[String],
		_env: &IndexMap<String, String>,
		cancel: &CancellationToken,
		outbox: Option<&Sender<Event>>,
	) -> Result<ExecutionResult> {
		if cancel.is_cancelled() {
			return Err(Error::Canceled);
		}
		self.executed.lock().unwrap().push(argv.to_vec());

		let result = self
			.scripted
			.lock()
			.unwrap()
			.get(&argv.join(" "))
			.cloned()
			.unwrap_or(ExecutionResult {
				exit_code: Some(0),
				..Default::default()
			});

		if let Some(outbox) = outbox {
			let topic = execution_ident();
			for line in result.stdout.lines() {
				let _ = outbox.send(Event {
					topic: topic.clone(),
					body: EventBody::Output {
						channel: OutputChannel::Stdout,
						line: line.to_string(),
					},
				});
			}
			for line in result.stderr.lines() {
				let _ = outbox.send(Event {
					topic: topic.clone(),
					body: EventBody::Output {
						channel: OutputChannel::Stderr,
						line: line.to_string(),
					},
				});
			}
			let _ = outbox.send(Event {
				topic,
				body: EventBody::ExitCode(result.exit_code),
			});
		}

		Ok(result)
	}
}

/// In-memory cache store.  Volume identity is the name, full stop: asking
/// twice with different mount paths still yields the same volume.
#[derive(Default)]
pub struct MemoryCacheStore {
	volumes: Mutex<IndexMap<String, VolumeHandle>>,
}

impl MemoryCacheStore {
	pub fn new() -> Self {
		MemoryCacheStore::default()
	}

	pub fn volume_names(&self) -> Vec<String> {
		self.volumes.lock().unwrap().keys().cloned().collect()
	}
}

impl CacheStore for MemoryCacheStore {
	fn get_or_create_volume(&self, binding: &CacheBinding) -> Result<VolumeHandle> {
		let mut volumes = self.volumes.lock().unwrap();
		let handle = volumes
			.entry(binding.name.clone())
			.or_insert_with(|| VolumeHandle {
				name: binding.name.clone(),
				host_path: None,
			});
		Ok(handle.clone())
	}
}

#[derive(Default)]
pub struct MemorySecretStore {
	secrets: Mutex<IndexMap<String, Secret>>,
}

impl MemorySecretStore {
	pub fn new() -> Self {
		MemorySecretStore::default()
	}

	pub fn insert(&self, reference: impl Into<String>, material: impl Into<String>) {
		self.secrets
			.lock()
			.unwrap()
			.insert(reference.into(), Secret::new(material));
	}
}

impl SecretStore for MemorySecretStore {
	fn resolve(&self, reference: &SecretRef) -> Result<Secret> {
		self.secrets
			.lock()
			.unwrap()
			.get(&reference.0)
			.cloned()
			.ok_or_else(|| Error::SecretResolution {
				reference: reference.to_string(),
				cause: "no such secret".into(),
			})
	}
}
