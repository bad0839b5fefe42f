use serde::{Deserialize, Serialize};

pub type Result<T> = std::result::Result<T, Error>;

/// Error category carried in wire-level error responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
	DaemonNotFound,
	DaemonAlreadyExists,
	InvalidState,
	Timeout,
	Transport,
	Process,
	InvalidRequest,
	Internal,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("daemon '{0}' not found")]
	DaemonNotFound(String),

	#[error("daemon '{0}' already exists")]
	DaemonAlreadyExists(String),

	#[error("{name}: {message}")]
	InvalidState { name: String, message: String },

	#[error("{0}")]
	Timeout(String),

	#[error("{0}")]
	Transport(String),

	#[error("{0}")]
	Process(String),

	#[error("invalid definition: {0}")]
	InvalidDefinition(String),

	#[error("config error: {0}")]
	Config(String),

	#[error(transparent)]
	Io(#[from] std::io::Error),

	#[error(transparent)]
	Json(#[from] serde_json::Error),

	#[error("{message}")]
	Remote { kind: ErrorKind, message: String },
}

impl Error {
	pub fn invalid_state(name: &str, message: impl Into<String>) -> Self {
		Error::InvalidState {
			name: name.to_string(),
			message: message.into(),
		}
	}

	pub fn kind(&self) -> ErrorKind {
		match self {
			Error::DaemonNotFound(_) => ErrorKind::DaemonNotFound,
			Error::DaemonAlreadyExists(_) => ErrorKind::DaemonAlreadyExists,
			Error::InvalidState { .. } => ErrorKind::InvalidState,
			Error::Timeout(_) => ErrorKind::Timeout,
			Error::Transport(_) => ErrorKind::Transport,
			Error::Process(_) => ErrorKind::Process,
			Error::InvalidDefinition(_) => ErrorKind::InvalidRequest,
			Error::Config(_) | Error::Io(_) | Error::Json(_) => ErrorKind::Internal,
			Error::Remote { kind, .. } => *kind,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn kinds_follow_variants() {
		assert_eq!(Error::DaemonNotFound("x".into()).kind(), ErrorKind::DaemonNotFound);
		assert_eq!(Error::invalid_state("x", "busy").kind(), ErrorKind::InvalidState);
		assert_eq!(Error::InvalidDefinition("bad".into()).kind(), ErrorKind::InvalidRequest);
		let remote = Error::Remote {
			kind: ErrorKind::Timeout,
			message: "slow".into(),
		};
		assert_eq!(remote.kind(), ErrorKind::Timeout);
		assert_eq!(remote.to_string(), "slow");
	}

	#[test]
	fn kind_serializes_snake_case() {
		let json = serde_json::to_string(&ErrorKind::DaemonAlreadyExists).unwrap();
		assert_eq!(json, "\"daemon_already_exists\"");
	}

	#[test]
	fn invalid_state_message_names_daemon() {
		let err = Error::invalid_state("web", "operation already in progress");
		assert_eq!(err.to_string(), "web: operation already in progress");
	}
}
