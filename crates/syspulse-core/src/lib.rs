//! # syspulse-core
//!
//! Supervision engine behind the syspulse daemon.
//!
//! A [`Supervisor`] keeps a registry of named [`Daemon`] definitions and
//! drives one [`DaemonInstance`] per definition through
//! `Stopped -> Starting -> Running -> Stopping -> Stopped`, with
//! `Running -> Failed` on an unplanned exit. Output is captured into rotated
//! log files, optional health probes run while an instance is up, and a
//! restart policy decides what happens after a crash. Definitions with a
//! cron `schedule` rest in `Scheduled` between runs.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use syspulse_core::{Daemon, Supervisor, SupervisorConfig};
//!
//! # #[tokio::main]
//! # async fn main() -> syspulse_core::Result<()> {
//! let sup = Supervisor::new(SupervisorConfig::new("/tmp/syspulse"));
//! sup.add(Daemon::new("web", vec!["python3".into(), "-m".into(), "http.server".into()]))
//!     .await?;
//! let instance = sup.start("web", false, None).await?;
//! println!("web running as pid {:?}", instance.pid);
//! sup.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod types;
pub mod error;
pub mod protocol;
pub mod config;
pub mod process;
pub mod output;
pub mod logs;
pub mod health;
pub mod restart;
pub mod schedule;
pub mod store;
pub mod supervisor;
pub mod dispatch;
pub mod client;

pub use types::*;
pub use error::{Error, ErrorKind, Result};
pub use protocol::{Request, Response};
pub use config::{GlobalConfig, SupervisorConfig};
pub use supervisor::Supervisor;
