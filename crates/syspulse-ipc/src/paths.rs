use std::path::PathBuf;

/// Filesystem locations for one supervisor installation.
///
/// Everything lives under a per-user data directory unless explicitly
/// overridden.
#[derive(Debug, Clone)]
pub struct DaemonPaths {
	pub app_name: String,
	data_dir: Option<PathBuf>,
	socket: Option<PathBuf>,
}

impl DaemonPaths {
	pub fn new(app_name: impl Into<String>) -> Self {
		Self {
			app_name: app_name.into(),
			data_dir: None,
			socket: None,
		}
	}

	pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
		self.data_dir = Some(dir.into());
		self
	}

	pub fn with_socket_path(mut self, path: impl Into<PathBuf>) -> Self {
		self.socket = Some(path.into());
		self
	}

	/// `<APP>_DATA_DIR`, then `$XDG_DATA_HOME/<app>`, then
	/// `~/.local/share/<app>`, then `/tmp/<app>`.
	pub fn data_dir(&self) -> PathBuf {
		if let Some(dir) = &self.data_dir {
			return dir.clone();
		}
		if let Ok(dir) = std::env::var(self.env_var("DATA_DIR")) {
			PathBuf::from(dir)
		} else if let Ok(dir) = std::env::var("XDG_DATA_HOME") {
			PathBuf::from(dir).join(&self.app_name)
		} else if let Some(home) = home_dir() {
			home.join(".local").join("share").join(&self.app_name)
		} else {
			PathBuf::from("/tmp").join(&self.app_name)
		}
	}

	pub fn config_dir(&self) -> PathBuf {
		if let Ok(dir) = std::env::var("XDG_CONFIG_HOME") {
			PathBuf::from(dir).join(&self.app_name)
		} else if let Some(home) = home_dir() {
			home.join(".config").join(&self.app_name)
		} else {
			PathBuf::from("/tmp").join(&self.app_name).join("config")
		}
	}

	pub fn socket_path(&self) -> PathBuf {
		match &self.socket {
			Some(path) => path.clone(),
			None => self.data_dir().join(format!("{}.sock", self.app_name)),
		}
	}

	pub fn pid_path(&self) -> PathBuf {
		self.data_dir().join(format!("{}.pid", self.app_name))
	}

	fn env_var(&self, suffix: &str) -> String {
		let prefix: String = self
			.app_name
			.chars()
			.map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
			.collect();
		format!("{}_{}", prefix, suffix)
	}
}

fn home_dir() -> Option<PathBuf> {
	std::env::var("HOME").ok().map(PathBuf::from)
}
