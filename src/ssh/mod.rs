//! SSH module - the production session transport
//!
//! Built on the russh library.
//!
//! # Features
//! - Password authentication against each rig node
//! - One owner task per connection (see `handle_owner`)
//! - Host key fingerprint logging with optional strict pinning
//! - Script execution with exit status, stdout and stderr capture

mod client;
mod config;
mod error;
mod handle_owner;
mod transport;

pub use client::{fingerprint, ClientHandler, SshClient};
pub use config::{SshConfig, SshOptions};
pub use error::SshError;
pub use handle_owner::{spawn_handle_owner_task, HandleCommand, HandleController};
pub use transport::{SshNodeSession, SshTransport};
