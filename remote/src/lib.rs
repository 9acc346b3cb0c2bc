//! Remote side of sftpcp: SSH connections, the SFTP-backed file system and the push/pull entry
//! points that tie them to the copy engine.
//!
//! A transfer acquires one [`Connection`] and one [`FileClient`] up front and releases both when
//! the copy finishes:
//!
//! ```no_run
//! # async fn example() -> anyhow::Result<()> {
//! use common::copy::StreamErrors;
//! use common::ignore::IgnoreList;
//!
//! let params = remote::ConnectionParameters::new("example.com", "deploy", "secret");
//! let summary = remote::push(
//!     &params,
//!     "/srv/build",
//!     "/var/www",
//!     &mut [],
//!     &IgnoreList::new(),
//!     StreamErrors::default(),
//! )
//! .await?;
//! println!("{summary}");
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod session;
pub mod sftp;
pub mod transfer;

pub use config::{ConnectionParameters, HostKeyPolicy};
pub use session::{CommandOutput, ConnectError, Connection};
pub use sftp::FileClient;
pub use transfer::{Direction, exec, pull, push, transfer};
