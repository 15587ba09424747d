//! Tool/service client registry port.
//!
//! Before a run starts, the engine asks the registry to register every tool
//! the workflow declares. Step executors then `load` clients by name. The
//! registry is an explicitly constructed value passed to `execute`, never a
//! process-wide global.

use std::collections::HashMap;
use std::sync::Arc;

use conductor_types::workflow::ToolConfig;
use dashmap::DashMap;
use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("required tool '{0}' is not available")]
    MissingTool(String),

    #[error("tool '{0}' has not been loaded")]
    NotLoaded(String),

    #[error("failed to initialize tool '{name}': {reason}")]
    InitFailed { name: String, reason: String },
}

/// A loaded tool client. Concrete executors downcast through `as_any`.
pub trait ToolClient: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &str;

    fn config(&self) -> &Value;

    fn as_any(&self) -> &dyn std::any::Any;
}

/// Registry of tool clients available to step executors.
pub trait SdkRegistry: Send + Sync {
    fn has(&self, name: &str) -> bool;

    fn load(&self, name: &str) -> Result<Arc<dyn ToolClient>, RegistryError>;

    /// Make every declared tool loadable. A missing required tool fails.
    fn register_tools(
        &self,
        tools: &HashMap<String, ToolConfig>,
    ) -> impl std::future::Future<Output = Result<(), RegistryError>> + Send;
}

// ---------------------------------------------------------------------------
// InMemorySdkRegistry
// ---------------------------------------------------------------------------

/// Builds a client for a tool from its declared configuration.
pub type ToolFactory =
    Arc<dyn Fn(&str, &Value) -> Result<Arc<dyn ToolClient>, String> + Send + Sync>;

/// Client that carries only its name and declared configuration.
#[derive(Debug, Clone)]
pub struct ConfiguredTool {
    name: String,
    config: Value,
}

impl ConfiguredTool {
    pub fn new(name: impl Into<String>, config: Value) -> Self {
        Self {
            name: name.into(),
            config,
        }
    }
}

impl ToolClient for ConfiguredTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn config(&self) -> &Value {
        &self.config
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

/// Registry backed by a table of factories and a table of loaded clients.
#[derive(Default)]
pub struct InMemorySdkRegistry {
    factories: DashMap<String, ToolFactory>,
    clients: DashMap<String, Arc<dyn ToolClient>>,
}

impl InMemorySdkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register how to build the named tool.
    pub fn register_factory(&self, name: impl Into<String>, factory: ToolFactory) {
        self.factories.insert(name.into(), factory);
    }

    /// Register a ready-made client.
    pub fn insert_client(&self, client: Arc<dyn ToolClient>) {
        self.clients.insert(client.name().to_string(), client);
    }

    fn build(&self, name: &str, config: &Value) -> Option<Result<Arc<dyn ToolClient>, String>> {
        let factory = self.factories.get(name)?.value().clone();
        Some(factory(name, config))
    }
}

impl SdkRegistry for InMemorySdkRegistry {
    fn has(&self, name: &str) -> bool {
        self.clients.contains_key(name)
    }

    fn load(&self, name: &str) -> Result<Arc<dyn ToolClient>, RegistryError> {
        self.clients
            .get(name)
            .map(|c| c.value().clone())
            .ok_or_else(|| RegistryError::NotLoaded(name.to_string()))
    }

    async fn register_tools(&self, tools: &HashMap<String, ToolConfig>) -> Result<(), RegistryError> {
        for (name, tool) in tools {
            if self.has(name) {
                continue;
            }
            match self.build(name, &tool.config) {
                Some(Ok(client)) => {
                    self.clients.insert(name.clone(), client);
                    tracing::debug!(tool = %name, "registered tool");
                }
                Some(Err(reason)) if tool.required => {
                    return Err(RegistryError::InitFailed {
                        name: name.clone(),
                        reason,
                    });
                }
                Some(Err(reason)) => {
                    tracing::warn!(tool = %name, %reason, "optional tool failed to initialize");
                }
                None if tool.required => return Err(RegistryError::MissingTool(name.clone())),
                None => {
                    tracing::warn!(tool = %name, "optional tool has no factory, skipping");
                }
            }
        }
        Ok(())
    }
}
