//! # syspulse-ipc
//!
//! Local-socket plumbing for the syspulse supervisor.
//!
//! Every call is one connection carrying one request frame and one response
//! frame. Frames are single lines of JSON wrapped in a versioned envelope,
//! see [`frame`].

pub mod paths;
pub mod frame;
pub mod server;
pub mod client;
pub mod daemon;

pub use paths::DaemonPaths;
pub use frame::{Envelope, FrameError, PROTOCOL_VERSION};
pub use client::{DaemonClient, ClientError};
pub use daemon::Daemon;
