use crate::error::{Error, ErrorKind};
use crate::types::{Daemon, DaemonInstance};
use serde::{Deserialize, Serialize};

fn default_lines() -> usize {
	100
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
	Add {
		daemon: Daemon,
	},
	Start {
		name: String,
		#[serde(default)]
		wait: bool,
		#[serde(default)]
		timeout_secs: Option<u64>,
	},
	Stop {
		name: String,
		#[serde(default)]
		force: bool,
		#[serde(default)]
		timeout_secs: Option<u64>,
	},
	Restart {
		name: String,
		#[serde(default)]
		force: bool,
		#[serde(default)]
		wait: bool,
	},
	Status {
		name: String,
	},
	List,
	Logs {
		name: String,
		#[serde(default = "default_lines")]
		lines: usize,
		#[serde(default)]
		stderr: bool,
	},
	Remove {
		name: String,
		#[serde(default)]
		force: bool,
	},
	IsRunning,
	Ping,
	Shutdown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
	Ok { message: String },
	Instance { instance: DaemonInstance },
	Instances { instances: Vec<DaemonInstance> },
	Logs { lines: Vec<String> },
	Running { running: bool },
	Pong,
	Error { kind: ErrorKind, message: String },
}

impl Response {
	pub fn ok(message: impl Into<String>) -> Self {
		Response::Ok { message: message.into() }
	}

	pub fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
		Response::Error {
			kind,
			message: message.into(),
		}
	}
}

impl From<Error> for Response {
	fn from(e: Error) -> Self {
		Response::Error {
			kind: e.kind(),
			message: e.to_string(),
		}
	}
}
