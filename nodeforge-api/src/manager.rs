use std::fmt;
use std::str::FromStr;

use serde_with::{DeserializeFromStr, SerializeDisplay};

/// Node package managers the pipeline knows how to wire up.
///
/// Each kind carries two conventions: the path inside the build filesystem
/// where it keeps its download cache, and the default name of the cache
/// volume mounted there.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, SerializeDisplay, DeserializeFromStr)]
pub enum PackageManager {
	Npm,
	Yarn,
	Pnpm,
}

impl PackageManager {
	/// Where this manager keeps downloaded packages inside the container.
	pub fn cache_path(&self) -> &'static str {
		match self {
			PackageManager::Npm => "/root/.npm",
			PackageManager::Yarn => "/root/.cache/yarn",
			PackageManager::Pnpm => "/root/.local/share/pnpm/store",
		}
	}

	/// Conventional cache volume name, e.g. "node-module-npm".
	pub fn default_cache_name(&self) -> String {
		format!("node-module-{}", self)
	}

	/// Entrypoint argv installed by `use_package_manager`.
	pub fn entrypoint(&self) -> Vec<String> {
		vec![self.to_string()]
	}
}

impl fmt::Display for PackageManager {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(match self {
			PackageManager::Npm => "npm",
			PackageManager::Yarn => "yarn",
			PackageManager::Pnpm => "pnpm",
		})
	}
}

impl FromStr for PackageManager {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"npm" => Ok(PackageManager::Npm),
			"yarn" => Ok(PackageManager::Yarn),
			"pnpm" => Ok(PackageManager::Pnpm),
			_ => Err(format!("unknown package manager: '{s}'")),
		}
	}
}
