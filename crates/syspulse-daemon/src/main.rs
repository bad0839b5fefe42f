use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use syspulse_core::config::{GlobalConfig, APP_NAME};
use syspulse_core::dispatch;
use syspulse_core::{Request, Supervisor};
use syspulse_ipc::{Daemon, DaemonPaths};

#[derive(Debug, Parser)]
#[command(name = "syspulse-daemon", version, about = "Supervise long-running processes over a local socket")]
struct Args {
	/// Config file (default: $XDG_CONFIG_HOME/syspulse/config.toml)
	#[arg(long)]
	config: Option<PathBuf>,

	/// Directory for the socket, PID file, logs and stored definitions
	#[arg(long)]
	data_dir: Option<PathBuf>,

	/// Socket path (default: <data-dir>/syspulse.sock)
	#[arg(long)]
	socket: Option<PathBuf>,

	/// tracing filter, overridden by RUST_LOG
	#[arg(long)]
	log_filter: Option<String>,
}

#[tokio::main]
async fn main() {
	let args = Args::parse();

	let config = match GlobalConfig::load(args.config.as_deref()) {
		Ok(c) => c,
		Err(e) => {
			eprintln!("error: {}", e);
			std::process::exit(1);
		}
	};

	let filter = resolve_filter(std::env::var("RUST_LOG").ok(), args.log_filter.clone(), &config);
	tracing_subscriber::fmt()
		.with_env_filter(EnvFilter::try_new(&filter).unwrap_or_else(|_| EnvFilter::new("info")))
		.init();

	let paths = resolve_paths(&args, &config);
	let data_dir = paths.data_dir();
	tracing::info!(data_dir = %data_dir.display(), socket = %paths.socket_path().display(), "starting");

	let supervisor = Supervisor::new(config.supervisor_config(data_dir));
	if let Err(e) = supervisor.restore().await {
		tracing::error!("failed to load stored definitions: {}", e);
		std::process::exit(1);
	}

	let handler_sup = Arc::clone(&supervisor);
	let result = Daemon::new(paths)
		.run(
			move |req: Request| {
				let sup = Arc::clone(&handler_sup);
				async move { dispatch::handle_request(&sup, req).await }
			},
			dispatch::invalid_request,
			supervisor.shutdown_signal(),
		)
		.await;

	// also covers SIGINT/SIGTERM, which end `run` early
	supervisor.shutdown().await;

	if let Err(e) = result {
		tracing::error!("daemon exited with error: {}", e);
		std::process::exit(1);
	}
	tracing::info!("daemon stopped");
}

fn resolve_filter(env: Option<String>, flag: Option<String>, config: &GlobalConfig) -> String {
	env.filter(|f| !f.is_empty())
		.or(flag)
		.unwrap_or_else(|| config.log_filter.clone())
}

fn resolve_paths(args: &Args, config: &GlobalConfig) -> DaemonPaths {
	let mut paths = DaemonPaths::new(APP_NAME);
	if let Some(dir) = args.data_dir.as_ref().or(config.daemon.data_dir.as_ref()) {
		paths = paths.with_data_dir(dir);
	}
	if let Some(socket) = args.socket.as_ref().or(config.daemon.socket_path.as_ref()) {
		paths = paths.with_socket_path(socket);
	}
	paths
}
