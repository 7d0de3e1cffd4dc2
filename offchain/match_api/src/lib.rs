//! HTTP and websocket front end for the match engine, plus the per-session
//! background drivers (feed recorder, host clock, house bot).

pub mod config;
pub mod error;
pub mod feed;
pub mod routes;
pub mod runtime;
pub mod settlement;
pub mod state;
pub mod view;

pub use config::ServerConfig;
pub use error::{ApiError, ApiResult};
pub use routes::router;
pub use state::AppState;
