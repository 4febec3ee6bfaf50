//! DeltaDeFi Market-Making Bot - Main Library
//!
//! This crate provides the main library for the cross-venue market-making
//! bot, following Clean Architecture principles.
//!
//! ## Architecture
//!
//! - **bin_common**: Common utilities for binary executables (CLI, runners)
//! - **deltadefi**: Core engine (re-exported from workspace)
//! - **flowsockets**: WebSocket library (re-exported from workspace)
//!
//! ## Usage in Binaries
//!
//! ```rust
//! use deltadefi_mm_bot::bin_common::{load_config_from_env, ConfigType};
//! use deltadefi_mm_bot::deltadefi::application::Supervisor;
//! ```

// Re-export workspace libraries for convenience
pub use deltadefi;
pub use flowsockets;

// Binary common utilities
pub mod bin_common {
    //! Common utilities for binary executables
    //!
    //! Provides shared functionality for the presentation layer (binaries)
    //! following Clean Architecture principles.

    pub mod cli;
    pub mod runner;

    pub use cli::{load_config_from_env, parse_args, ConfigType};
    pub use runner::{BinaryRunner, RunConfig};
}
