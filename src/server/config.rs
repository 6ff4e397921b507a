use std::time::Duration;

use super::RequestsLoggingLevel;

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub requests_logging_level: RequestsLoggingLevel,
    pub port: u16,
    /// Interval between keep-alive comments on live update streams.
    pub keepalive: Duration,
    /// Upper bound for `GET /v1/jobs?limit=`.
    pub max_jobs_listed: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            requests_logging_level: RequestsLoggingLevel::Path,
            port: 3001,
            keepalive: Duration::from_secs(15),
            max_jobs_listed: 200,
        }
    }
}
