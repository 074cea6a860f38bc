//! Server configuration.

use std::path::PathBuf;

/// Default cap on a single stored object: 4 GiB.
pub const DEFAULT_MAX_OBJECT_SIZE: u64 = 4 * 1024 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Directory holding objects and in-flight uploads.
    pub storage_dir: PathBuf,
    pub max_object_size: u64,
    pub bind_address: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            storage_dir: PathBuf::from("./cache"),
            max_object_size: DEFAULT_MAX_OBJECT_SIZE,
            bind_address: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

impl ServerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_storage_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.storage_dir = dir.into();
        self
    }

    pub fn with_max_object_size(mut self, size: u64) -> Self {
        self.max_object_size = size;
        self
    }

    pub fn with_bind_address(mut self, address: impl Into<String>) -> Self {
        self.bind_address = address.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// `address:port` to listen on.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let config = ServerConfig::new()
            .with_storage_dir("/var/cache/cairn")
            .with_max_object_size(1024)
            .with_bind_address("0.0.0.0")
            .with_port(9000);

        assert_eq!(config.storage_dir, PathBuf::from("/var/cache/cairn"));
        assert_eq!(config.max_object_size, 1024);
        assert_eq!(config.bind_addr(), "0.0.0.0:9000");
    }
}
