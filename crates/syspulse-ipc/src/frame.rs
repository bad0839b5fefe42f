//! Versioned, newline-delimited JSON frames.
//!
//! A frame is `{"version":N,"body":...}` followed by `\n`. JSON never
//! contains a raw newline, so the terminator alone delimits the frame.

use std::io::{self, BufRead, Read, Write};

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const PROTOCOL_VERSION: u32 = 1;

/// Upper bound on a single frame, newline included.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<T> {
	pub version: u32,
	pub body: T,
}

#[derive(Debug)]
pub enum FrameError {
	/// Peer closed the connection before sending anything.
	Closed,
	TooLarge,
	Malformed(String),
	Version { expected: u32, found: u32 },
	Io(io::Error),
}

impl std::fmt::Display for FrameError {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			FrameError::Closed => write!(f, "connection closed"),
			FrameError::TooLarge => write!(f, "frame exceeds {} bytes", MAX_FRAME_LEN),
			FrameError::Malformed(e) => write!(f, "malformed frame: {}", e),
			FrameError::Version { expected, found } => write!(
				f,
				"unsupported protocol version {} (expected {})",
				found, expected
			),
			FrameError::Io(e) => write!(f, "io error: {}", e),
		}
	}
}

impl std::error::Error for FrameError {}

impl From<io::Error> for FrameError {
	fn from(e: io::Error) -> Self {
		FrameError::Io(e)
	}
}

pub fn encode<T: Serialize>(body: &T) -> Result<Vec<u8>, FrameError> {
	let envelope = Envelope {
		version: PROTOCOL_VERSION,
		body,
	};
	let mut data = serde_json::to_vec(&envelope).map_err(|e| FrameError::Malformed(e.to_string()))?;
	data.push(b'\n');
	Ok(data)
}

pub fn decode<T: DeserializeOwned>(line: &[u8]) -> Result<T, FrameError> {
	let envelope: Envelope<serde_json::Value> =
		serde_json::from_slice(line).map_err(|e| FrameError::Malformed(e.to_string()))?;
	if envelope.version != PROTOCOL_VERSION {
		return Err(FrameError::Version {
			expected: PROTOCOL_VERSION,
			found: envelope.version,
		});
	}
	serde_json::from_value(envelope.body).map_err(|e| FrameError::Malformed(e.to_string()))
}

pub async fn read_frame<R, T>(reader: &mut R) -> Result<T, FrameError>
where
	R: AsyncBufRead + Unpin,
	T: DeserializeOwned,
{
	let mut buf = Vec::new();
	let n = reader
		.take(MAX_FRAME_LEN as u64)
		.read_until(b'\n', &mut buf)
		.await?;
	finish_read(buf, n)
}

/// Write a frame produced by [`encode`]. Encoding stays outside the async
/// part so the body never has to be held across an await.
pub async fn write_frame<W>(writer: &mut W, data: &[u8]) -> Result<(), FrameError>
where
	W: AsyncWrite + Unpin,
{
	writer.write_all(data).await?;
	writer.flush().await?;
	Ok(())
}

pub fn read_frame_blocking<R, T>(reader: &mut R) -> Result<T, FrameError>
where
	R: BufRead,
	T: DeserializeOwned,
{
	let mut buf = Vec::new();
	let n = reader
		.by_ref()
		.take(MAX_FRAME_LEN as u64)
		.read_until(b'\n', &mut buf)?;
	finish_read(buf, n)
}

pub fn write_frame_blocking<W, T>(writer: &mut W, body: &T) -> Result<(), FrameError>
where
	W: Write,
	T: Serialize,
{
	let data = encode(body)?;
	writer.write_all(&data)?;
	writer.flush()?;
	Ok(())
}

fn finish_read<T: DeserializeOwned>(mut buf: Vec<u8>, n: usize) -> Result<T, FrameError> {
	if n == 0 {
		return Err(FrameError::Closed);
	}
	if buf.last() == Some(&b'\n') {
		buf.pop();
	} else if buf.len() >= MAX_FRAME_LEN {
		return Err(FrameError::TooLarge);
	}
	decode(&buf)
}
