//! Filesystem workflow source.
//!
//! Resolves a workflow reference to a definition file under a root
//! directory. A reference with a `.json` or `.toml` extension names the file
//! directly; a bare id tries `{id}.json` then `{id}.toml`.

use std::path::{Path, PathBuf};

use conductor_core::queue::WorkflowSource;
use conductor_types::workflow::Workflow;

#[derive(Debug, thiserror::Error)]
pub enum WorkflowLoadError {
    #[error("workflow '{0}' not found")]
    NotFound(String),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid workflow in {path}: {reason}")]
    Parse { path: PathBuf, reason: String },
}

#[derive(Debug, Clone)]
pub struct FileWorkflowSource {
    root: PathBuf,
}

impl FileWorkflowSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn candidates(&self, reference: &str) -> Vec<PathBuf> {
        let path = Path::new(reference);
        let base = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        };
        match path.extension().and_then(|e| e.to_str()) {
            Some("json" | "toml") => vec![base],
            _ => vec![base.with_extension("json"), base.with_extension("toml")],
        }
    }

    /// Read and parse the workflow named by `reference`.
    pub async fn read(&self, reference: &str) -> Result<Workflow, WorkflowLoadError> {
        for path in self.candidates(reference) {
            let content = match tokio::fs::read_to_string(&path).await {
                Ok(content) => content,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(source) => return Err(WorkflowLoadError::Io { path, source }),
            };
            return parse_workflow(&path, &content);
        }
        Err(WorkflowLoadError::NotFound(reference.to_string()))
    }
}

fn parse_workflow(path: &Path, content: &str) -> Result<Workflow, WorkflowLoadError> {
    let parsed = match path.extension().and_then(|e| e.to_str()) {
        Some("toml") => toml::from_str::<Workflow>(content).map_err(|e| e.to_string()),
        _ => serde_json::from_str::<Workflow>(content).map_err(|e| e.to_string()),
    };
    parsed.map_err(|reason| WorkflowLoadError::Parse {
        path: path.to_path_buf(),
        reason,
    })
}

impl WorkflowSource for FileWorkflowSource {
    async fn load(&self, workflow_id: &str) -> Result<Workflow, String> {
        self.read(workflow_id).await.map_err(|e| e.to_string())
    }
}
