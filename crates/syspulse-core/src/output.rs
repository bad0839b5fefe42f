use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::io::AsyncReadExt;
use tokio::sync::Mutex;

use crate::logs;
use crate::types::LogConfig;

/// Size-bounded append-only sink for one output stream of one daemon.
#[derive(Clone)]
pub struct OutputCapture {
	path: PathBuf,
	writer: Arc<Mutex<LogWriter>>,
}

struct LogWriter {
	file: Option<File>,
	path: PathBuf,
	bytes_written: u64,
	config: LogConfig,
}

impl OutputCapture {
	pub fn open(path: PathBuf, config: LogConfig) -> io::Result<Self> {
		let file = open_append(&path)?;
		let bytes_written = file.metadata()?.len();
		Ok(Self {
			path: path.clone(),
			writer: Arc::new(Mutex::new(LogWriter {
				file: Some(file),
				path,
				bytes_written,
				config,
			})),
		})
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	pub async fn write(&self, data: &[u8]) {
		let mut writer = self.writer.lock().await;
		writer.write(data);
	}
}

impl LogWriter {
	/// No file grows past `max_size_bytes`. Chunks too large for an empty
	/// file are split, at the last newline that fits when there is one.
	fn write(&mut self, mut data: &[u8]) {
		let max = self.config.max_size_bytes.max(1);
		while !data.is_empty() {
			let mut room = max.saturating_sub(self.bytes_written) as usize;
			if data.len() > room && self.bytes_written > 0 {
				self.rotate();
				if self.bytes_written == 0 {
					continue;
				}
				// rotation failed, keep appending
				room = data.len();
			}

			let piece = if data.len() <= room {
				data
			} else {
				let window = &data[..room];
				match window.iter().rposition(|&b| b == b'\n') {
					Some(pos) => &data[..=pos],
					None => window,
				}
			};
			data = &data[piece.len()..];

			let Some(file) = self.file.as_mut() else {
				return;
			};
			if let Err(e) = file.write_all(piece) {
				tracing::warn!(path = %self.path.display(), "log write failed: {}", e);
				return;
			}
			self.bytes_written += piece.len() as u64;
		}
	}

	fn rotate(&mut self) {
		if let Some(file) = self.file.take() {
			drop(file);
		}

		if let Err(e) = logs::rotate(&self.path, self.config.retain_count) {
			tracing::warn!(path = %self.path.display(), "log rotation failed: {}", e);
		}

		self.file = match open_append(&self.path) {
			Ok(f) => Some(f),
			Err(e) => {
				tracing::error!(path = %self.path.display(), "failed to reopen log: {}", e);
				None
			}
		};
		self.bytes_written = self
			.file
			.as_ref()
			.and_then(|f| f.metadata().ok())
			.map(|m| m.len())
			.unwrap_or(0);
	}
}

fn open_append(path: &Path) -> io::Result<File> {
	OpenOptions::new().create(true).append(true).open(path)
}

/// Drain `reader` into `output` until EOF.
pub async fn pipe_output<R: tokio::io::AsyncRead + Unpin>(mut reader: R, output: OutputCapture) {
	let mut buf = [0u8; 4096];
	loop {
		match reader.read(&mut buf).await {
			Ok(0) => break,
			Ok(n) => output.write(&buf[..n]).await,
			Err(e) => {
				tracing::debug!(path = %output.path().display(), "output pipe closed: {}", e);
				break;
			}
		}
	}
}
