use std::time::Duration;

use syspulse_ipc::{ClientError, DaemonClient, DaemonPaths};

use crate::error::{Error, Result};
use crate::protocol::{Request, Response};

/// One blocking round trip to a running supervisor. An error response is
/// turned into [`Error::Remote`].
pub fn call(paths: &DaemonPaths, request: &Request, timeout: Option<Duration>) -> Result<Response> {
	let mut client = DaemonClient::<Request, Response>::connect(paths).map_err(transport)?;
	if let Some(timeout) = timeout {
		client = client.with_timeout(timeout).map_err(transport)?;
	}
	match client.send(request).map_err(transport)? {
		Response::Error { kind, message } => Err(Error::Remote { kind, message }),
		response => Ok(response),
	}
}

/// Same as [`call`], run on the blocking pool.
pub async fn call_async(paths: DaemonPaths, request: Request, timeout: Option<Duration>) -> Result<Response> {
	tokio::task::spawn_blocking(move || call(&paths, &request, timeout))
		.await
		.map_err(|e| Error::Transport(format!("client task failed: {}", e)))?
}

fn transport(e: ClientError) -> Error {
	match e {
		ClientError::NotRunning => Error::Transport("supervisor not running".into()),
		other => Error::Transport(other.to_string()),
	}
}
