//! CLI command implementations.
//!
//! | Module    | Commands handled |
//! |-----------|------------------|
//! | `serve`   | `Serve`          |
//! | `resolve` | `Resolve`        |
//! | `config`  | `Config`         |

pub mod config;
pub mod resolve;
pub mod serve;

pub use config::cmd_config;
pub use resolve::cmd_resolve;
pub use serve::{ServeOptions, cmd_serve};
