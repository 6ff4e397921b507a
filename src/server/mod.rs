pub mod config;
mod errors;
mod events_route;
mod file_routes;
mod http_layers;
mod job_routes;
pub mod metrics;
pub mod server;
mod session;
pub mod state;

pub use config::ServerConfig;
pub use errors::ApiError;
pub use http_layers::*;
pub use server::{make_app, run_server};
pub use session::HEADER_USER_ID;
