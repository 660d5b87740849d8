//! SSH and SFTP tests against a real OpenSSH server
//!
//! These tests need Docker. The server container starts on first use and is
//! reused afterwards; without Docker every test returns early.
//!
//! ```bash
//! cargo test --test ssh_integration
//!
//! # Cleanup (optional)
//! cd tests/docker && docker compose down -v
//! ```

#[macro_use]
pub mod fixtures;

mod shell_tests;
