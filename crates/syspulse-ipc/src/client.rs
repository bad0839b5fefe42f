use std::io::{self, BufReader};
use std::marker::PhantomData;
use std::os::unix::net::UnixStream;
use std::time::Duration;

use serde::{de::DeserializeOwned, Serialize};

use crate::frame::{self, FrameError};
use crate::paths::DaemonPaths;

/// Errors from daemon client operations.
#[derive(Debug)]
pub enum ClientError {
	/// Nothing is serving the socket.
	NotRunning,
	/// IO error during communication.
	Io(io::Error),
	/// The exchange did not produce a valid response frame.
	Frame(FrameError),
}

impl std::fmt::Display for ClientError {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			ClientError::NotRunning => write!(f, "supervisor not running"),
			ClientError::Io(e) => write!(f, "io error: {}", e),
			ClientError::Frame(e) => write!(f, "protocol error: {}", e),
		}
	}
}

impl std::error::Error for ClientError {}

impl From<io::Error> for ClientError {
	fn from(e: io::Error) -> Self {
		ClientError::Io(e)
	}
}

impl From<FrameError> for ClientError {
	fn from(e: FrameError) -> Self {
		match e {
			FrameError::Io(e) => ClientError::Io(e),
			other => ClientError::Frame(other),
		}
	}
}

/// Synchronous one-shot client: one connection, one request, one response.
pub struct DaemonClient<Req, Resp> {
	stream: UnixStream,
	_phantom: PhantomData<(Req, Resp)>,
}

impl<Req, Resp> DaemonClient<Req, Resp>
where
	Req: Serialize,
	Resp: DeserializeOwned,
{
	/// Returns `Err(ClientError::NotRunning)` if the socket cannot be reached.
	pub fn connect(paths: &DaemonPaths) -> Result<Self, ClientError> {
		let stream = UnixStream::connect(paths.socket_path()).map_err(|_| ClientError::NotRunning)?;
		Ok(Self {
			stream,
			_phantom: PhantomData,
		})
	}

	/// Bound how long [`send`](Self::send) waits for the response.
	pub fn with_timeout(self, timeout: Duration) -> Result<Self, ClientError> {
		self.stream.set_read_timeout(Some(timeout))?;
		Ok(self)
	}

	pub fn send(mut self, request: &Req) -> Result<Resp, ClientError> {
		frame::write_frame_blocking(&mut self.stream, request)?;
		let mut reader = BufReader::new(&self.stream);
		Ok(frame::read_frame_blocking(&mut reader)?)
	}
}

/// Check whether something is serving the socket.
pub fn is_running(paths: &DaemonPaths) -> bool {
	UnixStream::connect(paths.socket_path()).is_ok()
}

/// Read the PID of a running daemon from its PID file.
pub fn read_pid(paths: &DaemonPaths) -> Option<u32> {
	std::fs::read_to_string(paths.pid_path())
		.ok()
		.and_then(|s| s.trim().parse().ok())
}
