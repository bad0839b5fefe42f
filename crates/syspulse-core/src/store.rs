use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::Daemon;

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreFile {
	#[serde(default)]
	daemons: Vec<Daemon>,
}

/// Registered definitions on disk, so a restarted supervisor knows its
/// daemons again. Callers serialize writes.
pub struct DefinitionStore {
	path: PathBuf,
}

impl DefinitionStore {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self { path: path.into() }
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	/// A missing file is an empty store.
	pub fn load(&self) -> Result<Vec<Daemon>> {
		let content = match std::fs::read_to_string(&self.path) {
			Ok(c) => c,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
			Err(e) => return Err(e.into()),
		};
		let file: StoreFile = serde_json::from_str(&content)?;
		Ok(file.daemons)
	}

	/// Replace the stored set. Written to a temp file first, then renamed.
	pub fn save(&self, mut daemons: Vec<Daemon>) -> Result<()> {
		daemons.sort_by(|a, b| a.name.cmp(&b.name));

		if let Some(parent) = self.path.parent() {
			std::fs::create_dir_all(parent)?;
		}
		let json = serde_json::to_vec_pretty(&StoreFile { daemons })?;
		let tmp = self.path.with_extension("json.tmp");
		std::fs::write(&tmp, json)?;
		std::fs::rename(&tmp, &self.path)?;
		Ok(())
	}
}
