//! Common test utilities and fixtures for integration tests.

use std::sync::Arc;

use treefs_naming::{MemoryStorageServer, NamingConfig, NamingService, Path};

/// Parses a path literal.
pub fn p(text: &str) -> Path {
    Path::parse(text).unwrap()
}

/// A naming service with in-memory storage servers registered in order.
pub struct TestCluster {
    pub service: NamingService,
    servers: Vec<Arc<MemoryStorageServer>>,
}

impl TestCluster {
    /// Start a service with the default config and no storage servers.
    pub fn new() -> Self {
        Self::with_config(NamingConfig::default())
    }

    pub fn with_config(config: NamingConfig) -> Self {
        Self {
            service: NamingService::start(config).unwrap(),
            servers: Vec::new(),
        }
    }

    /// Register a server holding `files`. Returns its delete-list.
    pub async fn add_server(&mut self, capacity: u64, files: &[&str]) -> Vec<Path> {
        let files: Vec<Path> = files.iter().map(|f| p(f)).collect();
        let server = Arc::new(MemoryStorageServer::with_files(files.clone()));
        self.servers.push(server.clone());
        self.service
            .register(server.clone(), server, capacity, files)
            .await
            .unwrap()
    }

    /// Server registered at position `index` (0-based).
    pub fn server(&self, index: usize) -> &Arc<MemoryStorageServer> {
        &self.servers[index]
    }
}
