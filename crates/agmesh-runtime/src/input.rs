use crate::Result;
use agmesh_types::InputData;
use std::path::Path;

/// Fetches normalized issue data for the cluster to work on. Tracker
/// integrations implement this; the runtime only cares about the output.
pub trait IssueProvider: Send + Sync {
    fn fetch(&self, reference: &str) -> Result<InputData>;
}

/// Default provider: a path to a local file (first line is the title), or
/// failing that, the reference itself as literal issue text.
pub struct LocalIssueProvider;

impl IssueProvider for LocalIssueProvider {
    fn fetch(&self, reference: &str) -> Result<InputData> {
        let path = Path::new(reference);
        if path.is_file() {
            let body = std::fs::read_to_string(path)?;
            let title = body.lines().next().unwrap_or_default().to_string();
            return Ok(InputData {
                source: "file".to_string(),
                reference: reference.to_string(),
                title,
                body,
                labels: Vec::new(),
            });
        }

        Ok(InputData {
            source: "inline".to_string(),
            reference: reference.to_string(),
            title: reference.chars().take(80).collect(),
            body: reference.to_string(),
            labels: Vec::new(),
        })
    }
}
