//! # Helpers to build the reqwest blocking client used to reach external APIs
use reqwest::blocking::{Client, ClientBuilder};
use std::time::Duration;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_CONN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(thiserror::Error, Debug)]
pub enum ReqwestBuildError {
    #[error("could not build the reqwest client: {0}")]
    ClientBuilder(String),
}

/// Builds a reqwest blocking client with the default timeouts.
pub fn try_build_reqwest_client() -> Result<Client, ReqwestBuildError> {
    reqwest_builder_with_timeout(DEFAULT_TIMEOUT, DEFAULT_CONN_TIMEOUT)
        .build()
        .map_err(|err| ReqwestBuildError::ClientBuilder(err.to_string()))
}

/// Returns a reqwest [ClientBuilder] with the rustls backend and the provided timeout values.
pub fn reqwest_builder_with_timeout(timeout: Duration, conn_timeout: Duration) -> ClientBuilder {
    Client::builder()
        .use_rustls_tls() // Use rust-tls backend
        .timeout(timeout)
        .connect_timeout(conn_timeout)
}
