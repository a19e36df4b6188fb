//! Computation configuration descriptor stored in `worker/configuration`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::SetupError;

/// Document key naming the plugin to instantiate.
pub const TASK_KEY: &str = "task";

/// What to run, as prepared by the control plane.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WorkerConfiguration {
    /// Registered plugin key plus extra libraries.
    Plugin {
        key: String,
        #[serde(default)]
        libraries: Vec<String>,
    },
    /// JSON document with `${name}` placeholders and a `task` key.
    Document {
        document: String,
        #[serde(default)]
        properties: BTreeMap<String, String>,
        #[serde(default)]
        libraries: Vec<String>,
    },
}

impl WorkerConfiguration {
    pub fn plugin(key: impl Into<String>) -> Self {
        WorkerConfiguration::Plugin {
            key: key.into(),
            libraries: Vec::new(),
        }
    }

    pub fn document(document: impl Into<String>, properties: BTreeMap<String, String>) -> Self {
        WorkerConfiguration::Document {
            document: document.into(),
            properties,
            libraries: Vec::new(),
        }
    }

    pub fn libraries(&self) -> &[String] {
        match self {
            WorkerConfiguration::Plugin { libraries, .. }
            | WorkerConfiguration::Document { libraries, .. } => libraries,
        }
    }

    /// Parsed document after placeholder substitution; `None` for plugin configurations.
    ///
    /// # Errors
    /// [`SetupError::InvalidDocument`] on an unresolved placeholder or malformed JSON.
    pub fn resolve_document(&self) -> Result<Option<Value>, SetupError> {
        let WorkerConfiguration::Document {
            document,
            properties,
            ..
        } = self
        else {
            return Ok(None);
        };
        let text = substitute(document, properties)?;
        serde_json::from_str(&text)
            .map(Some)
            .map_err(|e| SetupError::InvalidDocument(e.to_string()))
    }

    /// Plugin key: the `key` field, or the document's `task` entry.
    pub fn plugin_key(&self, document: Option<&Value>) -> Result<String, SetupError> {
        match self {
            WorkerConfiguration::Plugin { key, .. } => Ok(key.clone()),
            WorkerConfiguration::Document { .. } => document
                .and_then(|d| d.get(TASK_KEY))
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| {
                    SetupError::InvalidDocument(format!("missing string key '{TASK_KEY}'"))
                }),
        }
    }
}

fn substitute(text: &str, properties: &BTreeMap<String, String>) -> Result<String, SetupError> {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after
            .find('}')
            .ok_or_else(|| SetupError::InvalidDocument("unterminated placeholder".into()))?;
        let name = &after[..end];
        let value = properties
            .get(name)
            .ok_or_else(|| SetupError::InvalidDocument(format!("unresolved placeholder '{name}'")))?;
        out.push_str(value);
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_placeholders_are_substituted() {
        let cfg = WorkerConfiguration::document(
            r#"{"task": "${plugin}", "rounds": ${rounds}}"#,
            BTreeMap::from([
                ("plugin".to_string(), "counter".to_string()),
                ("rounds".to_string(), "3".to_string()),
            ]),
        );
        let doc = cfg.resolve_document().unwrap().unwrap();
        assert_eq!(doc["rounds"], 3);
        assert_eq!(cfg.plugin_key(Some(&doc)).unwrap(), "counter");
    }

    #[test]
    fn unresolved_placeholder_is_rejected() {
        let cfg = WorkerConfiguration::document(r#"{"task": "${missing}"}"#, BTreeMap::new());
        assert_eq!(
            cfg.resolve_document().unwrap_err().as_label(),
            "setup_invalid_document"
        );
    }

    #[test]
    fn document_without_task_key_is_rejected() {
        let cfg = WorkerConfiguration::document(r#"{"rounds": 1}"#, BTreeMap::new());
        let doc = cfg.resolve_document().unwrap();
        assert!(cfg.plugin_key(doc.as_ref()).is_err());
    }

    #[test]
    fn plugin_configuration_has_no_document() {
        let cfg = WorkerConfiguration::plugin("noop");
        assert!(cfg.resolve_document().unwrap().is_none());
        assert_eq!(cfg.plugin_key(None).unwrap(), "noop");
        let stored = serde_json::to_value(&cfg).unwrap();
        assert_eq!(stored["kind"], "plugin");
    }
}
