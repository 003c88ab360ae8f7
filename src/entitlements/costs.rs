//! Per-tool unit costs.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::ConfigError;

/// Unit cost charged per tool call.
///
/// Loaded from YAML of the form:
///
/// ```yaml
/// default_unit_cost: 1
/// tools:
///   search_threads: 3
///   send_reply: 5
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostTable {
    #[serde(default)]
    pub default_unit_cost: i64,
    #[serde(default)]
    pub tools: HashMap<String, i64>,
}

impl CostTable {
    pub fn new(default_unit_cost: i64) -> Self {
        Self {
            default_unit_cost,
            tools: HashMap::new(),
        }
    }

    pub fn with_tool(mut self, tool_name: impl Into<String>, cost: i64) -> Self {
        self.tools.insert(tool_name.into(), cost);
        self
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        serde_yaml_ng::from_str(content).map_err(|e| ConfigError::Yaml {
            message: e.to_string(),
        })
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let table = Self::from_yaml(&content)?;
        tracing::debug!(
            path = %path.as_ref().display(),
            tools = table.tools.len(),
            default_unit_cost = table.default_unit_cost,
            "Loaded tool cost table"
        );
        Ok(table)
    }

    /// Configured positive cost, else the positive default, else 1.
    pub fn cost_for(&self, tool_name: &str) -> i64 {
        match self.tools.get(tool_name) {
            Some(&cost) if cost > 0 => cost,
            _ if self.default_unit_cost > 0 => self.default_unit_cost,
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_cost_resolution() {
        let table = CostTable::new(2)
            .with_tool("send_reply", 5)
            .with_tool("broken", 0)
            .with_tool("negative", -3);

        assert_eq!(table.cost_for("send_reply"), 5);
        assert_eq!(table.cost_for("broken"), 2);
        assert_eq!(table.cost_for("negative"), 2);
        assert_eq!(table.cost_for("unlisted"), 2);
    }

    #[test]
    fn test_non_positive_default_falls_back_to_one() {
        assert_eq!(CostTable::new(0).cost_for("anything"), 1);
        assert_eq!(CostTable::new(-4).with_tool("x", -1).cost_for("x"), 1);
    }

    #[test]
    fn test_load_yaml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "default_unit_cost: 1\ntools:\n  search_threads: 3\n  send_reply: 5"
        )
        .unwrap();

        let table = CostTable::load(file.path()).unwrap();
        assert_eq!(table.cost_for("search_threads"), 3);
        assert_eq!(table.cost_for("send_reply"), 5);
        assert_eq!(table.cost_for("list_threads"), 1);
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let table = CostTable::from_yaml("tools:\n  send_reply: 4\n").unwrap();
        assert_eq!(table.default_unit_cost, 0);
        assert_eq!(table.cost_for("send_reply"), 4);
        assert_eq!(table.cost_for("other"), 1);
    }

    #[test]
    fn test_invalid_yaml() {
        assert!(matches!(
            CostTable::from_yaml("tools: [unterminated"),
            Err(ConfigError::Yaml { .. })
        ));
    }
}
