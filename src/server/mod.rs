//! HTTP surface: control API, event stream and subdomain proxy.
//!
//! | Module    | Role                                                    |
//! |-----------|---------------------------------------------------------|
//! | `api`     | `AppState`, error envelope, lifecycle and refresh routes |
//! | `stream`  | `GET /containers/events` server-sent events              |
//! | `http`    | host dispatch, router assembly, `start_server`           |

pub mod api;
pub mod http;
pub mod stream;

pub use api::{AppState, SharedState};
pub use http::{build_router, start_server};
