use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::output::OutputCapture;
use crate::types::LogConfig;

const TAIL_CHUNK: u64 = 8 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
	Stdout,
	Stderr,
}

impl Stream {
	pub fn file_name(self) -> &'static str {
		match self {
			Stream::Stdout => "stdout.log",
			Stream::Stderr => "stderr.log",
		}
	}
}

/// Layout: `<root>/<daemon>/stdout.log`, `stderr.log`, and rotated
/// siblings `stdout.log.1` (newest) up to `stdout.log.<retain>`.
#[derive(Debug, Clone)]
pub struct LogManager {
	root: PathBuf,
}

impl LogManager {
	pub fn new(root: impl Into<PathBuf>) -> Self {
		Self { root: root.into() }
	}

	pub fn daemon_dir(&self, name: &str) -> PathBuf {
		self.root.join(name)
	}

	pub fn path(&self, name: &str, stream: Stream) -> PathBuf {
		self.daemon_dir(name).join(stream.file_name())
	}

	pub fn capture(&self, name: &str, stream: Stream, config: &LogConfig) -> io::Result<OutputCapture> {
		fs::create_dir_all(self.daemon_dir(name))?;
		OutputCapture::open(self.path(name, stream), config.clone())
	}

	/// Last `lines` lines of a stream, reaching into the newest rotated file
	/// when the active one is too short.
	pub fn tail(&self, name: &str, stream: Stream, lines: usize) -> io::Result<Vec<String>> {
		let active = self.path(name, stream);
		let mut out = tail_file(&active, lines)?;
		if out.len() < lines {
			let mut older = tail_file(&rotated_path(&active, 1), lines - out.len())?;
			older.append(&mut out);
			out = older;
		}
		Ok(out)
	}
}

pub fn rotated_path(path: &Path, index: u32) -> PathBuf {
	let mut name = path.file_name().unwrap_or_default().to_os_string();
	name.push(format!(".{}", index));
	path.with_file_name(name)
}

/// Shift `path` into `path.1`, `path.1` into `path.2` and so on, dropping
/// anything past `retain`. With `retain == 0` the active file is deleted.
pub fn rotate(path: &Path, retain: u32) -> io::Result<()> {
	let mut stale = retain + 1;
	while rotated_path(path, stale).exists() {
		remove_if_exists(&rotated_path(path, stale))?;
		stale += 1;
	}

	if retain == 0 {
		return remove_if_exists(path);
	}

	for i in (1..retain).rev() {
		let from = rotated_path(path, i);
		if from.exists() {
			fs::rename(&from, rotated_path(path, i + 1))?;
		}
	}
	if path.exists() {
		fs::rename(path, rotated_path(path, 1))?;
	}
	Ok(())
}

fn remove_if_exists(path: &Path) -> io::Result<()> {
	match fs::remove_file(path) {
		Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
		_ => Ok(()),
	}
}

/// Read `path` backwards in chunks until `lines` complete lines are found.
pub fn tail_file(path: &Path, lines: usize) -> io::Result<Vec<String>> {
	if lines == 0 {
		return Ok(Vec::new());
	}
	let mut file = match File::open(path) {
		Ok(f) => f,
		Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
		Err(e) => return Err(e),
	};

	let mut pos = file.metadata()?.len();
	let mut buf: Vec<u8> = Vec::new();
	while pos > 0 {
		let len = TAIL_CHUNK.min(pos);
		pos -= len;
		file.seek(SeekFrom::Start(pos))?;
		let mut chunk = vec![0u8; len as usize];
		file.read_exact(&mut chunk)?;
		chunk.extend_from_slice(&buf);
		buf = chunk;

		// one extra newline guarantees the first kept line is complete
		if buf.iter().filter(|&&b| b == b'\n').count() > lines {
			break;
		}
	}

	let text = String::from_utf8_lossy(&buf);
	let all: Vec<&str> = text.lines().collect();
	let skip = all.len().saturating_sub(lines);
	Ok(all[skip..].iter().map(|s| s.to_string()).collect())
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::atomic::{AtomicU32, Ordering};

	static COUNTER: AtomicU32 = AtomicU32::new(0);

	fn temp_dir(name: &str) -> PathBuf {
		let n = COUNTER.fetch_add(1, Ordering::SeqCst);
		let dir = std::env::temp_dir().join(format!("syspulse-logs-{}-{}-{}", std::process::id(), name, n));
		let _ = fs::remove_dir_all(&dir);
		fs::create_dir_all(&dir).unwrap();
		dir
	}

	#[test]
	fn tail_returns_last_lines() {
		let dir = temp_dir("tail");
		let path = dir.join("stdout.log");
		fs::write(&path, "one\ntwo\nthree\nfour\n").unwrap();
		assert_eq!(tail_file(&path, 2).unwrap(), vec!["three", "four"]);
		assert_eq!(tail_file(&path, 10).unwrap().len(), 4);
		assert!(tail_file(&path, 0).unwrap().is_empty());
		assert!(tail_file(&dir.join("missing.log"), 5).unwrap().is_empty());
		let _ = fs::remove_dir_all(&dir);
	}

	#[test]
	fn tail_spans_chunks() {
		let dir = temp_dir("chunks");
		let path = dir.join("stdout.log");
		let content: String = (0..5000).map(|i| format!("line {}\n", i)).collect();
		fs::write(&path, content).unwrap();
		let lines = tail_file(&path, 3000).unwrap();
		assert_eq!(lines.len(), 3000);
		assert_eq!(lines[0], "line 2000");
		assert_eq!(lines[2999], "line 4999");
		let _ = fs::remove_dir_all(&dir);
	}

	#[test]
	fn tail_reaches_into_rotated_file() {
		let dir = temp_dir("rotated");
		let manager = LogManager::new(&dir);
		let active = manager.path("web", Stream::Stdout);
		fs::create_dir_all(active.parent().unwrap()).unwrap();
		fs::write(rotated_path(&active, 1), "a\nb\nc\n").unwrap();
		fs::write(&active, "d\n").unwrap();
		assert_eq!(manager.tail("web", Stream::Stdout, 3).unwrap(), vec!["b", "c", "d"]);
		let _ = fs::remove_dir_all(&dir);
	}

	#[test]
	fn rotate_shifts_and_prunes() {
		let dir = temp_dir("shift");
		let path = dir.join("stderr.log");
		for round in 0..5 {
			fs::write(&path, format!("round {}\n", round)).unwrap();
			rotate(&path, 3).unwrap();
		}
		assert!(!path.exists());
		assert_eq!(fs::read_to_string(rotated_path(&path, 1)).unwrap(), "round 4\n");
		assert_eq!(fs::read_to_string(rotated_path(&path, 3)).unwrap(), "round 2\n");
		assert!(!rotated_path(&path, 4).exists());

		rotate(&path, 1).unwrap();
		assert!(rotated_path(&path, 1).exists());
		assert!(!rotated_path(&path, 2).exists());
		let _ = fs::remove_dir_all(&dir);
	}

	#[test]
	fn rotate_without_retention_deletes() {
		let dir = temp_dir("noretain");
		let path = dir.join("stdout.log");
		fs::write(&path, "x\n").unwrap();
		rotate(&path, 0).unwrap();
		assert!(!path.exists());
		assert!(!rotated_path(&path, 1).exists());
		let _ = fs::remove_dir_all(&dir);
	}
}
