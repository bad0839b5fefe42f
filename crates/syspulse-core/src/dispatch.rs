use std::sync::Arc;
use std::time::Duration;

use crate::error::ErrorKind;
use crate::protocol::{Request, Response};
use crate::supervisor::Supervisor;

/// Map one wire request onto the supervisor. Every request yields exactly
/// one response.
pub async fn handle_request(supervisor: &Arc<Supervisor>, request: Request) -> Response {
	match request {
		Request::Ping => Response::Pong,
		Request::IsRunning => Response::Running {
			running: supervisor.is_running(),
		},
		Request::Add { daemon } => match supervisor.add(daemon).await {
			Ok(instance) => Response::Instance { instance },
			Err(e) => e.into(),
		},
		Request::Start {
			name,
			wait,
			timeout_secs,
		} => match supervisor.start(&name, wait, timeout_secs.map(Duration::from_secs)).await {
			Ok(instance) => Response::Instance { instance },
			Err(e) => e.into(),
		},
		Request::Stop {
			name,
			force,
			timeout_secs,
		} => match supervisor.stop(&name, force, timeout_secs.map(Duration::from_secs)).await {
			Ok(instance) => Response::Instance { instance },
			Err(e) => e.into(),
		},
		Request::Restart { name, force, wait } => match supervisor.restart(&name, force, wait).await {
			Ok(instance) => Response::Instance { instance },
			Err(e) => e.into(),
		},
		Request::Status { name } => match supervisor.status(&name).await {
			Ok(instance) => Response::Instance { instance },
			Err(e) => e.into(),
		},
		Request::List => Response::Instances {
			instances: supervisor.list().await,
		},
		Request::Logs { name, lines, stderr } => match supervisor.logs(&name, lines, stderr).await {
			Ok(lines) => Response::Logs { lines },
			Err(e) => e.into(),
		},
		Request::Remove { name, force } => match supervisor.remove(&name, force).await {
			Ok(()) => Response::ok(format!("removed {}", name)),
			Err(e) => e.into(),
		},
		Request::Shutdown => {
			if !supervisor.is_running() {
				return Response::ok("already shutting down");
			}
			let sup = Arc::clone(supervisor);
			tokio::spawn(async move {
				sup.shutdown().await;
			});
			Response::ok("shutting down")
		}
	}
}

/// Reply for frames that never reached [`handle_request`].
pub fn invalid_request(message: String) -> Response {
	Response::error(ErrorKind::InvalidRequest, message)
}
