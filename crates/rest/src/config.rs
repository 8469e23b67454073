use crate::server::ServerError;
use serde::Deserialize;
use std::net::{SocketAddr, ToSocketAddrs};

/// Server settings, usually embedded into an application's own configuration file.
///
/// ```
/// use micro_rest::ServerConfig;
///
/// let config = ServerConfig::from_json(r#"{ "address": "0.0.0.0:3000", "versions": ["1.0.0"] }"#).unwrap();
/// assert_eq!(config.name, "micro-rest");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Sent as the `server` header; empty disables the header.
    pub name: String,
    pub address: String,
    /// Default versions for routes that declare none.
    pub versions: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { name: "micro-rest".to_owned(), address: "127.0.0.1:8080".to_owned(), versions: Vec::new() }
    }
}

impl ServerConfig {
    pub fn from_json(json: &str) -> Result<Self, ServerError> {
        serde_json::from_str(json).map_err(ServerError::from)
    }

    pub(crate) fn socket_addrs(&self) -> Result<Vec<SocketAddr>, ServerError> {
        let addrs = self
            .address
            .to_socket_addrs()
            .map_err(|source| ServerError::InvalidAddress { address: self.address.clone(), source })?
            .collect::<Vec<_>>();
        if addrs.is_empty() {
            return Err(ServerError::InvalidAddress {
                address: self.address.clone(),
                source: std::io::Error::new(std::io::ErrorKind::AddrNotAvailable, "address resolved to nothing"),
            });
        }
        Ok(addrs)
    }
}
