use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use serde::{de::DeserializeOwned, Serialize};
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::watch;

use crate::frame::{self, FrameError};

/// Serve one-request-per-connection on `socket_path` until `shutdown` turns
/// true.
///
/// Every accepted connection runs on its own task, so a slow handler never
/// delays unrelated callers. A frame that cannot be decoded is answered with
/// `on_error(reason)` instead of reaching the handler.
pub async fn run_socket_server<Req, Resp, F, Fut, E>(
	socket_path: &Path,
	handler: F,
	on_error: E,
	mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<()>
where
	Req: DeserializeOwned + Send + 'static,
	Resp: Serialize + Send + 'static,
	F: Fn(Req) -> Fut + Send + Sync + 'static,
	Fut: Future<Output = Resp> + Send,
	E: Fn(String) -> Resp + Send + Sync + 'static,
{
	let listener = UnixListener::bind(socket_path)?;
	restrict_permissions(socket_path);

	tracing::info!(socket = %socket_path.display(), "listening");

	let handler = Arc::new(handler);
	let on_error = Arc::new(on_error);

	loop {
		tokio::select! {
			accepted = listener.accept() => {
				let (stream, _) = match accepted {
					Ok(s) => s,
					Err(e) => {
						tracing::error!("accept error: {}", e);
						continue;
					}
				};
				let handler = Arc::clone(&handler);
				let on_error = Arc::clone(&on_error);
				tokio::spawn(async move {
					handle_connection::<Req, Resp, _, _, _>(stream, handler, on_error).await;
				});
			}
			changed = shutdown.changed() => {
				if changed.is_err() || *shutdown.borrow() {
					tracing::info!("socket server stopping");
					break;
				}
			}
		}
	}

	Ok(())
}

async fn handle_connection<Req, Resp, F, Fut, E>(
	stream: UnixStream,
	handler: Arc<F>,
	on_error: Arc<E>,
) where
	Req: DeserializeOwned + Send + 'static,
	Resp: Serialize + Send + 'static,
	F: Fn(Req) -> Fut + Send + Sync + 'static,
	Fut: Future<Output = Resp> + Send,
	E: Fn(String) -> Resp + Send + Sync + 'static,
{
	let (reader, mut writer) = stream.into_split();
	let mut reader = BufReader::new(reader);

	let response = match frame::read_frame::<_, Req>(&mut reader).await {
		Ok(request) => handler(request).await,
		Err(FrameError::Closed) => return,
		Err(e) => {
			tracing::warn!("invalid request: {}", e);
			on_error(format!("invalid request: {}", e))
		}
	};
	let data = match frame::encode(&response) {
		Ok(data) => data,
		Err(e) => {
			tracing::error!("failed to encode response: {}", e);
			return;
		}
	};
	drop(response);

	if let Err(e) = frame::write_frame(&mut writer, &data).await {
		tracing::debug!("failed to write response: {}", e);
		return;
	}
	let _ = writer.shutdown().await;
}

fn restrict_permissions(socket_path: &Path) {
	use std::os::unix::fs::PermissionsExt;
	let perms = std::fs::Permissions::from_mode(0o600);
	if let Err(e) = std::fs::set_permissions(socket_path, perms) {
		tracing::warn!(socket = %socket_path.display(), "failed to restrict socket permissions: {}", e);
	}
}
