//! Container exec sessions over the engine's HTTP API.
//!
//! An exec is created with the shell as its command, then started with an
//! upgrade request; from that point the engine connection carries the TTY.

pub mod client;
pub mod connector;
pub mod http;
pub mod stream;
pub mod session;

pub use client::{EngineClient, EngineDialer, EngineStream, HijackedStream};
#[cfg(unix)]
pub use client::UnixDialer;
#[cfg(not(unix))]
pub use client::UnsupportedDialer;
pub use connector::{ExecConnector, shell_candidates};
pub use session::ExecSession;
pub use stream::ReplayStream;
