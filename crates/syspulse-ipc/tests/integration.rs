use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use syspulse_ipc::client::{self, ClientError, DaemonClient};
use syspulse_ipc::paths::DaemonPaths;
use syspulse_ipc::Daemon;

#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "op", rename_all = "snake_case")]
enum Req {
	Ping,
	Echo { text: String },
	Slow { millis: u64 },
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Resp {
	Pong,
	Echo { text: String },
	Done,
	Error { message: String },
}

static TEST_COUNTER: AtomicU32 = AtomicU32::new(0);

fn temp_paths(name: &str) -> DaemonPaths {
	let n = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
	// /tmp keeps socket paths under the SUN_LEN limit
	let dir = std::path::PathBuf::from("/tmp").join(format!("spi{}{}", n, name));
	let _ = std::fs::create_dir_all(&dir);
	DaemonPaths::new("pulse").with_data_dir(dir)
}

fn cleanup_paths(paths: &DaemonPaths) {
	let _ = std::fs::remove_dir_all(paths.data_dir());
}

async fn handle(req: Req) -> Resp {
	match req {
		Req::Ping => Resp::Pong,
		Req::Echo { text } => Resp::Echo { text },
		Req::Slow { millis } => {
			tokio::time::sleep(Duration::from_millis(millis)).await;
			Resp::Done
		}
	}
}

fn on_error(message: String) -> Resp {
	Resp::Error { message }
}

fn spawn_server(paths: &DaemonPaths) -> (tokio::task::JoinHandle<()>, watch::Sender<bool>) {
	let (tx, rx) = watch::channel(false);
	let socket = paths.socket_path();
	let server = tokio::spawn(async move {
		syspulse_ipc::server::run_socket_server(&socket, handle, on_error, rx)
			.await
			.unwrap();
	});
	(server, tx)
}

// --- Client helpers ---

#[test]
fn is_running_false_when_no_socket() {
	let paths = temp_paths("nosock");
	assert!(!client::is_running(&paths));
	cleanup_paths(&paths);
}

#[test]
fn read_pid_parses_file() {
	let paths = temp_paths("pid");
	std::fs::write(paths.pid_path(), "4242\n").unwrap();
	assert_eq!(client::read_pid(&paths), Some(4242));
	std::fs::write(paths.pid_path(), "garbage").unwrap();
	assert_eq!(client::read_pid(&paths), None);
	cleanup_paths(&paths);
}

#[test]
fn client_connect_returns_not_running() {
	let paths = temp_paths("noserver");
	match DaemonClient::<Req, Resp>::connect(&paths) {
		Err(ClientError::NotRunning) => {}
		Err(other) => panic!("expected NotRunning, got {:?}", other),
		Ok(_) => panic!("expected error, got Ok"),
	}
	cleanup_paths(&paths);
}

// --- Client + server ---

#[tokio::test]
async fn server_client_roundtrip() {
	let paths = temp_paths("roundtrip");
	let (server, _tx) = spawn_server(&paths);
	tokio::time::sleep(Duration::from_millis(100)).await;

	let client_paths = paths.clone();
	tokio::task::spawn_blocking(move || {
		let resp = DaemonClient::<Req, Resp>::connect(&client_paths)
			.unwrap()
			.send(&Req::Ping)
			.unwrap();
		assert_eq!(resp, Resp::Pong);

		let resp = DaemonClient::<Req, Resp>::connect(&client_paths)
			.unwrap()
			.send(&Req::Echo { text: "hello".into() })
			.unwrap();
		assert_eq!(resp, Resp::Echo { text: "hello".into() });
	})
	.await
	.unwrap();

	server.abort();
	cleanup_paths(&paths);
}

// Cell makes the response Send but not Sync.
#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct Counted {
	hits: std::cell::Cell<u32>,
}

#[tokio::test]
async fn server_accepts_responses_that_are_not_sync() {
	let paths = temp_paths("notsync");
	let (tx, rx) = watch::channel(false);
	let socket = paths.socket_path();
	let server = tokio::spawn(async move {
		syspulse_ipc::server::run_socket_server(
			&socket,
			|_: Req| async { Counted { hits: std::cell::Cell::new(1) } },
			|_| Counted { hits: std::cell::Cell::new(0) },
			rx,
		)
		.await
		.unwrap();
	});
	tokio::time::sleep(Duration::from_millis(100)).await;

	let client_paths = paths.clone();
	let resp = tokio::task::spawn_blocking(move || {
		DaemonClient::<Req, Counted>::connect(&client_paths)
			.unwrap()
			.send(&Req::Ping)
			.unwrap()
	})
	.await
	.unwrap();
	assert_eq!(resp.hits.get(), 1);

	let _ = tx.send(true);
	let _ = server.await;
	cleanup_paths(&paths);
}

#[tokio::test]
async fn slow_request_does_not_block_other_connections() {
	let paths = temp_paths("concurrent");
	let (server, _tx) = spawn_server(&paths);
	tokio::time::sleep(Duration::from_millis(100)).await;

	let slow_paths = paths.clone();
	let slow = tokio::task::spawn_blocking(move || {
		DaemonClient::<Req, Resp>::connect(&slow_paths)
			.unwrap()
			.send(&Req::Slow { millis: 1500 })
			.unwrap()
	});
	tokio::time::sleep(Duration::from_millis(100)).await;

	let fast_paths = paths.clone();
	let started = std::time::Instant::now();
	let fast = tokio::task::spawn_blocking(move || {
		DaemonClient::<Req, Resp>::connect(&fast_paths)
			.unwrap()
			.send(&Req::Ping)
			.unwrap()
	})
	.await
	.unwrap();
	assert_eq!(fast, Resp::Pong);
	assert!(started.elapsed() < Duration::from_millis(1000));

	assert_eq!(slow.await.unwrap(), Resp::Done);
	server.abort();
	cleanup_paths(&paths);
}

#[tokio::test]
async fn malformed_frame_gets_error_reply() {
	let paths = temp_paths("malformed");
	let (server, _tx) = spawn_server(&paths);
	tokio::time::sleep(Duration::from_millis(100)).await;

	let client_paths = paths.clone();
	tokio::task::spawn_blocking(move || {
		let mut stream = UnixStream::connect(client_paths.socket_path()).unwrap();
		stream.write_all(b"this is not json\n").unwrap();

		let mut reader = BufReader::new(&stream);
		let mut line = String::new();
		reader.read_line(&mut line).unwrap();

		let resp: Resp = syspulse_ipc::frame::decode(line.trim_end().as_bytes()).unwrap();
		match resp {
			Resp::Error { message } => assert!(message.contains("invalid request"), "got: {}", message),
			other => panic!("expected Error, got {:?}", other),
		}
	})
	.await
	.unwrap();

	server.abort();
	cleanup_paths(&paths);
}

#[tokio::test]
async fn version_mismatch_gets_error_reply() {
	let paths = temp_paths("version");
	let (server, _tx) = spawn_server(&paths);
	tokio::time::sleep(Duration::from_millis(100)).await;

	let client_paths = paths.clone();
	tokio::task::spawn_blocking(move || {
		let mut stream = UnixStream::connect(client_paths.socket_path()).unwrap();
		stream
			.write_all(b"{\"version\":99,\"body\":{\"op\":\"ping\"}}\n")
			.unwrap();

		let mut reader = BufReader::new(&stream);
		let resp: Resp = syspulse_ipc::frame::read_frame_blocking(&mut reader).unwrap();
		match resp {
			Resp::Error { message } => assert!(message.contains("version 99"), "got: {}", message),
			other => panic!("expected Error, got {:?}", other),
		}
	})
	.await
	.unwrap();

	server.abort();
	cleanup_paths(&paths);
}

#[tokio::test]
async fn server_stops_on_shutdown_signal() {
	let paths = temp_paths("shutdown");
	let (server, tx) = spawn_server(&paths);
	tokio::time::sleep(Duration::from_millis(100)).await;

	tx.send(true).unwrap();
	tokio::time::timeout(Duration::from_secs(2), server)
		.await
		.expect("server did not stop")
		.unwrap();
	cleanup_paths(&paths);
}

// --- Daemon wrapper ---

#[tokio::test]
async fn daemon_writes_pid_and_cleans_up() {
	let paths = temp_paths("daemon");
	let (tx, rx) = watch::channel(false);

	let daemon_paths = paths.clone();
	let run = tokio::spawn(async move {
		Daemon::new(daemon_paths).run(handle, on_error, rx).await
	});
	tokio::time::sleep(Duration::from_millis(200)).await;

	assert_eq!(client::read_pid(&paths), Some(std::process::id()));
	assert!(client::is_running(&paths));

	tx.send(true).unwrap();
	run.await.unwrap().unwrap();

	assert!(!paths.socket_path().exists());
	assert!(!paths.pid_path().exists());
	cleanup_paths(&paths);
}

#[tokio::test]
async fn daemon_refuses_second_instance() {
	let paths = temp_paths("second");
	let (server, _tx) = spawn_server(&paths);
	tokio::time::sleep(Duration::from_millis(100)).await;

	let (_tx2, rx2) = watch::channel(false);
	let err = Daemon::new(paths.clone())
		.run(handle, on_error, rx2)
		.await
		.unwrap_err();
	assert_eq!(err.kind(), std::io::ErrorKind::AddrInUse);

	server.abort();
	cleanup_paths(&paths);
}

#[test]
fn daemon_cleanup_removes_files() {
	let paths = temp_paths("cleanup");
	std::fs::write(paths.socket_path(), "fake").unwrap();
	std::fs::write(paths.pid_path(), "99999").unwrap();

	Daemon::new(paths.clone()).cleanup();

	assert!(!paths.socket_path().exists());
	assert!(!paths.pid_path().exists());
	cleanup_paths(&paths);
}

#[test]
fn client_error_display() {
	assert_eq!(format!("{}", ClientError::NotRunning), "supervisor not running");
}
