use std::future::Future;
use std::io;

use serde::{de::DeserializeOwned, Serialize};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;

use crate::paths::DaemonPaths;
use crate::server;

/// Process-level wrapper around the socket server: PID file, stale socket
/// cleanup and signal handling.
pub struct Daemon {
	pub paths: DaemonPaths,
}

impl Daemon {
	pub fn new(paths: DaemonPaths) -> Self {
		Self { paths }
	}

	/// Serve until `shutdown` turns true or the process receives SIGINT or
	/// SIGTERM. Refuses to start when another live daemon already answers on
	/// the socket.
	pub async fn run<Req, Resp, F, Fut, E>(
		&self,
		handler: F,
		on_error: E,
		shutdown: watch::Receiver<bool>,
	) -> io::Result<()>
	where
		Req: DeserializeOwned + Send + 'static,
		Resp: Serialize + Send + 'static,
		F: Fn(Req) -> Fut + Send + Sync + 'static,
		Fut: Future<Output = Resp> + Send,
		E: Fn(String) -> Resp + Send + Sync + 'static,
	{
		if crate::client::is_running(&self.paths) {
			return Err(io::Error::new(
				io::ErrorKind::AddrInUse,
				format!("daemon already running on {}", self.paths.socket_path().display()),
			));
		}

		let socket_path = self.paths.socket_path();
		if let Some(parent) = socket_path.parent() {
			std::fs::create_dir_all(parent)?;
		}
		std::fs::create_dir_all(self.paths.data_dir())?;

		if socket_path.exists() {
			tracing::debug!(socket = %socket_path.display(), "removing stale socket");
			let _ = std::fs::remove_file(&socket_path);
		}

		std::fs::write(self.paths.pid_path(), std::process::id().to_string())?;

		tracing::info!("daemon started (pid {})", std::process::id());

		let mut terminate = signal(SignalKind::terminate())?;
		let mut server_handle = tokio::spawn(async move {
			server::run_socket_server(&socket_path, handler, on_error, shutdown).await
		});

		let result = tokio::select! {
			joined = &mut server_handle => match joined {
				Ok(res) => res,
				Err(e) => Err(io::Error::new(io::ErrorKind::Other, e)),
			},
			_ = tokio::signal::ctrl_c() => {
				tracing::info!("interrupt received, shutting down");
				server_handle.abort();
				Ok(())
			}
			_ = terminate.recv() => {
				tracing::info!("SIGTERM received, shutting down");
				server_handle.abort();
				Ok(())
			}
		};

		self.cleanup();
		result
	}

	pub fn cleanup(&self) {
		let _ = std::fs::remove_file(self.paths.socket_path());
		let _ = std::fs::remove_file(self.paths.pid_path());
	}
}
