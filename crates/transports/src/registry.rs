use parley_core::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::transport::Transport;

/// Named lookup of transport instances. Constructed once at the wiring
/// point and passed to whoever needs it; lifecycle is tied to the
/// process, not to any one agent.
#[derive(Clone, Default)]
pub struct TransportRegistry {
    transports: HashMap<String, Arc<dyn Transport>>,
}

impl TransportRegistry {
    pub fn new() -> Self {
        Self {
            transports: HashMap::new(),
        }
    }

    /// Register a transport under its own name. A second registration
    /// under the same name is a wiring bug and fails hard.
    pub fn register(&mut self, transport: Arc<dyn Transport>) -> Result<()> {
        let name = transport.name().to_string();
        if self.transports.contains_key(&name) {
            return Err(Error::Config(format!(
                "transport '{}' registered twice",
                name
            )));
        }
        debug!(name = %name, "Registering transport");
        self.transports.insert(name, transport);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Transport>> {
        self.transports.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.transports.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn is_empty(&self) -> bool {
        self.transports.is_empty()
    }

    /// Initialize every registered transport. The first failure aborts;
    /// partial initialization is reported in the error detail.
    pub async fn initialize_all(&self) -> Result<()> {
        for (name, transport) in &self.transports {
            info!(name = %name, "Initializing transport");
            transport.initialize().await.map_err(|e| {
                Error::Config(format!("failed to initialize transport '{}': {}", name, e))
            })?;
        }
        Ok(())
    }

    /// Shut down every registered transport. Failures are logged and do
    /// not stop the remaining shutdowns.
    pub async fn shutdown_all(&self) {
        for (name, transport) in &self.transports {
            if let Err(e) = transport.shutdown().await {
                warn!(name = %name, error = %e, "Transport shutdown failed");
            }
        }
    }
}
