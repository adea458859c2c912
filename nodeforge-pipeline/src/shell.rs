//! A build engine that runs commands as host subprocesses.
//!
//! There is no image store and no container runtime down here: base image
//! resolution just records the reference, directory mounts become path
//! mappings onto the host filesystem, and cache volumes are directories
//! under a configured root.  This is the engine behind `nodeforge run` for
//! local development; anything needing real isolation belongs to an
//! external engine implementing the same trait.

use std::fs;
use std::io::{BufRead, BufReader, Lines};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::Duration;

use crossbeam_channel::Sender;
use indexmap::IndexMap;
use tokio_util::sync::CancellationToken;

use nodeforge_api::cache::CacheBinding;
use nodeforge_api::image::ImageRef;
use nodeforge_api::step::BuildStep;

use crate::engine::{
	execution_ident, push_capped, BuildEngine, CacheStore, ExecutionResult, VolumeHandle,
};
use crate::{Error, Event, EventBody, OutputChannel, Result};

const WAIT_POLL: Duration = Duration::from_millis(20);

pub struct ShellEngine {
	/// Directory under which cache volumes are materialized, one dir per
	/// volume name.  Should match the root of the [`DiskCacheStore`] in use.
	pub cache_root: PathBuf,
}

/// Snapshots here are path mappings, not filesystems.  `binds` maps
/// destination paths inside the "build filesystem" to host paths.
#[derive(Clone, Debug)]
pub struct ShellSnapshot {
	pub image: ImageRef,
	pub cwd: String,
	pub binds: IndexMap<String, PathBuf>,
}

impl ShellSnapshot {
	/// Resolves `cwd` to a host path via the longest matching bind prefix.
	fn host_cwd(&self) -> Result<Option<PathBuf>> {
		let mut best: Option<(&str, &PathBuf)> = None;
		for (dest, host) in &self.binds {
			let matches = self.cwd == *dest || self.cwd.starts_with(&format!("{dest}/"));
			if matches && best.map_or(true, |(prev, _)| dest.len() > prev.len()) {
				best = Some((dest, host));
			}
		}
		match best {
			Some((dest, host)) => {
				let rest = self.cwd[dest.len()..].trim_start_matches('/');
				Ok(Some(if rest.is_empty() {
					host.clone()
				} else {
					host.join(rest)
				}))
			}
			None if self.cwd == "/" => Ok(None),
			None => Err(Error::Mount {
				path: self.cwd.clone(),
				msg: "working directory is not mapped to a host path".into(),
			}),
		}
	}
}

impl BuildEngine for ShellEngine {
	type Snapshot = ShellSnapshot;

	fn resolve_base_image(&self, image: &ImageRef) -> Result<ShellSnapshot> {
		if !image.is_wellformed() {
			return Err(Error::BaseImageResolution {
				image: image.to_string(),
				cause: "malformed image reference".into(),
			});
		}
		Ok(ShellSnapshot {
			image: image.clone(),
			cwd: "/".into(),
			binds: IndexMap::new(),
		})
	}

	fn apply_step(&self, snapshot: &ShellSnapshot, step: &BuildStep) -> Result<ShellSnapshot> {
		let mut next = snapshot.clone();
		match step {
			BuildStep::SetBaseImage { image } => next.image = image.clone(),
			BuildStep::SetWorkdir { path } => next.cwd = path.clone(),
			BuildStep::MountDirectory { path, source } => {
				if !source.0.is_dir() {
					return Err(Error::Mount {
						path: path.clone(),
						msg: format!("host directory '{}' does not exist", source.0.display()),
					});
				}
				next.binds.insert(path.clone(), source.0.clone());
			}
			BuildStep::MountCache { binding } => {
				let host = self.cache_root.join(&binding.name);
				fs::create_dir_all(&host).map_err(|e| Error::Catchall {
					msg: format!("failed to materialize cache volume '{}'", binding.name),
					cause: Box::new(e),
				})?;
				next.binds.insert(binding.mount_path.clone(), host);
			}
			// Secret refs are resolved at execution time, entrypoints are
			// composed by the caller, and queued commands are build layers
			// this engine does not replay.  All three are recorded in the
			// pipeline, not here.
			BuildStep::InjectSecretEnv { .. } => {}
			BuildStep::SetEntrypoint { .. } => {}
			BuildStep::RunCommand { .. } => {}
		}
		Ok(next)
	}

	fn execute(
		&self,
		snapshot: &ShellSnapshot,
		argv: &[String],
		env: &IndexMap<String, String>,
		cancel: &CancellationToken,
		outbox: Option<&Sender<Event>>,
	) -> Result<ExecutionResult> {
		let Some((program, args)) = argv.split_first() else {
			return Err(Error::Catchall {
				msg: "cannot execute empty command".into(),
				cause: "argv was empty".into(),
			});
		};
		if cancel.is_cancelled() {
			return Err(Error::Canceled);
		}

		let topic = execution_ident();

		let mut cmd = Command::new(program);
		cmd.args(args);
		if let Some(dir) = snapshot.host_cwd()? {
			cmd.current_dir(dir);
		}
		for (var, val) in env {
			cmd.env(var, val);
		}
		cmd.stdin(Stdio::null());
		cmd.stdout(Stdio::piped());
		cmd.stderr(Stdio::piped());

		let mut child = cmd.spawn().map_err(|e| Error::Catchall {
			msg: format!("failed to spawn command '{program}'"),
			cause: Box::new(e),
		})?;

		// Take the IO handles before waiting; the readers own them.
		let stdout = BufReader::new(
			child
				.stdout
				.take()
				.expect("child did not have a handle to stdout"),
		);
		let stderr = BufReader::new(
			child
				.stderr
				.take()
				.expect("child did not have a handle to stderr"),
		);

		let stdout_handle = {
			let topic = topic.clone();
			let outbox = outbox.cloned();
			thread::spawn(move || {
				collect_output(&topic, OutputChannel::Stdout, stdout.lines(), outbox)
			})
		};
		let stderr_handle = {
			let topic = topic.clone();
			let outbox = outbox.cloned();
			thread::spawn(move || {
				collect_output(&topic, OutputChannel::Stderr, stderr.lines(), outbox)
			})
		};

		let status = loop {
			if cancel.is_cancelled() {
				let _ = child.kill();
				let _ = child.wait();
				// Pipes are closed now; let the readers drain and finish.
				let _ = stdout_handle.join();
				let _ = stderr_handle.join();
				return Err(Error::Canceled);
			}
			match child.try_wait() {
				Ok(Some(status)) => break status,
				Ok(None) => thread::sleep(WAIT_POLL),
				Err(e) => {
					return Err(Error::Catchall {
						msg: "failed to wait for command".into(),
						cause: Box::new(e),
					})
				}
			}
		};

		let (stdout, stdout_truncated) = stdout_handle
			.join()
			.expect("stdout reader panicked")
			.map_err(|e| Error::Catchall {
				msg: "failed to read stdout from command".into(),
				cause: Box::new(e),
			})?;
		let (stderr, stderr_truncated) = stderr_handle
			.join()
			.expect("stderr reader panicked")
			.map_err(|e| Error::Catchall {
				msg: "failed to read stderr from command".into(),
				cause: Box::new(e),
			})?;

		if let Some(outbox) = outbox {
			let _ = outbox.send(Event {
				topic,
				body: EventBody::ExitCode(status.code()),
			});
		}

		Ok(ExecutionResult {
			exit_code: status.code(),
			stdout,
			stderr,
			stdout_truncated,
			stderr_truncated,
		})
	}
}

fn collect_output<R: BufRead>(
	topic: &str,
	channel: OutputChannel,
	lines: Lines<R>,
	outbox: Option<Sender<Event>>,
) -> std::io::Result<(String, bool)> {
	let mut buf = String::new();
	let mut truncated = false;
	for line in lines {
		let line = line?;
		if let Some(outbox) = &outbox {
			let _ = outbox.send(Event {
				topic: topic.to_string(),
				body: EventBody::Output {
					channel,
					line: line.clone(),
				},
			});
		}
		push_capped(&mut buf, &mut truncated, &line);
	}
	Ok((buf, truncated))
}

/// Cache volumes as directories under a root, one per volume name.
pub struct DiskCacheStore {
	pub root: PathBuf,
}

impl DiskCacheStore {
	pub fn new(root: impl AsRef<Path>) -> Self {
		DiskCacheStore {
			root: root.as_ref().to_owned(),
		}
	}
}

impl CacheStore for DiskCacheStore {
	fn get_or_create_volume(&self, binding: &CacheBinding) -> Result<VolumeHandle> {
		let path = self.root.join(&binding.name);
		fs::create_dir_all(&path).map_err(|e| Error::Catchall {
			msg: format!("failed to create cache volume '{}'", binding.name),
			cause: Box::new(e),
		})?;
		Ok(VolumeHandle {
			name: binding.name.clone(),
			host_path: Some(path),
		})
	}
}
