//! Declarative graph definitions in JSON or YAML.
//!
//! Example:
//! ```yaml
//! metadata:
//!   people:
//!     name: people
//!     fields:
//!       - { name: id,   type: long }
//!       - { name: name, type: string }
//! components:
//!   - { id: src,  type: GENERATOR, attrs: { records: [[2, "b"], [1, "a"]] } }
//!   - { id: sort, type: SORT,      attrs: { key: "id(a)" } }
//!   - { id: out,  type: TRASH }
//! edges:
//!   - { from: "src:0",  to: "sort:0", metadata: people }
//!   - { from: "sort:0", to: "out:0",  metadata: people }
//! ```

use std::path::Path;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use rivulet_core::config::EngineConfig;
use rivulet_core::schema::RecordMetadata;

use crate::error::{GraphError, Result};
use crate::graph::Graph;
use crate::registry::{ComponentRegistry, TransformRegistry};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphSpec {
    /// Engine settings; the environment is used when absent.
    #[serde(default)]
    pub config: Option<EngineConfig>,
    /// Record layouts referenced by name from edges.
    #[serde(default)]
    pub metadata: IndexMap<String, RecordMetadata>,
    pub components: Vec<ComponentSpec>,
    #[serde(default)]
    pub edges: Vec<EdgeSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentSpec {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub phase: u32,
    #[serde(default)]
    pub attrs: Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeSpec {
    /// `component:port`; the port defaults to 0.
    pub from: String,
    pub to: String,
    /// Name of an entry in `GraphSpec::metadata`.
    pub metadata: String,
}

impl GraphSpec {
    pub fn from_json(src: &str) -> Result<Self> {
        Ok(serde_json::from_str(src)?)
    }

    pub fn from_yaml(src: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(src)?)
    }

    /// Load a `.json` file as JSON and anything else as YAML.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let src = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json(&src),
            _ => Self::from_yaml(&src),
        }
    }

    /// Create a graph with this definition's config and add everything to it.
    pub fn build(
        &self,
        components: &ComponentRegistry,
        transforms: &TransformRegistry,
    ) -> Result<Graph> {
        let config = self.config.clone().unwrap_or_else(EngineConfig::from_env);
        let mut graph = Graph::with_config(config)?;
        self.instantiate(&mut graph, components, transforms)?;
        Ok(graph)
    }

    /// Add the components and edges to an existing graph.
    pub fn instantiate(
        &self,
        graph: &mut Graph,
        components: &ComponentRegistry,
        transforms: &TransformRegistry,
    ) -> Result<()> {
        let mut layouts = IndexMap::with_capacity(self.metadata.len());
        for (name, meta) in &self.metadata {
            meta.validate()
                .map_err(|e| GraphError::Spec(format!("metadata '{name}': {e}")))?;
            layouts.insert(name.as_str(), Arc::new(meta.clone()));
        }

        for c in &self.components {
            let component = components.create(&c.id, &c.kind, &c.attrs, transforms)?;
            graph.add_boxed(&c.id, c.phase, component)?;
        }

        for e in &self.edges {
            let meta = layouts.get(e.metadata.as_str()).ok_or_else(|| {
                GraphError::Spec(format!(
                    "edge {} -> {} uses unknown metadata '{}'",
                    e.from, e.to, e.metadata
                ))
            })?;
            let from = parse_endpoint(&e.from)?;
            let to = parse_endpoint(&e.to)?;
            graph.connect(from, to, Arc::clone(meta))?;
        }
        tracing::debug!(
            components = self.components.len(),
            edges = self.edges.len(),
            "graph definition instantiated"
        );
        Ok(())
    }
}

fn parse_endpoint(s: &str) -> Result<(&str, usize)> {
    match s.rsplit_once(':') {
        None => Ok((s.trim(), 0)),
        Some((id, port)) => {
            let port = port
                .trim()
                .parse()
                .map_err(|_| GraphError::Spec(format!("bad port in endpoint '{s}'")))?;
            Ok((id.trim(), port))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const YAML: &str = r#"
metadata:
  people:
    name: people
    fields:
      - { name: id,   type: long }
      - { name: name, type: string }
components:
  - { id: src,  type: GENERATOR, attrs: { records: [[2, "b"], [1, "a"]] } }
  - { id: sort, type: SORT,      attrs: { key: "id(a)" } }
  - { id: out,  type: TRASH,     phase: 1 }
edges:
  - { from: "src:0", to: "sort", metadata: people }
  - { from: "sort:0", to: "out:0", metadata: people }
"#;

    #[test]
    fn parses_yaml() {
        let spec = GraphSpec::from_yaml(YAML).expect("yaml");
        assert_eq!(spec.components.len(), 3);
        assert_eq!(spec.components[2].phase, 1);
        assert_eq!(spec.components[1].kind, "SORT");
        assert_eq!(spec.metadata["people"].fields.len(), 2);
    }

    #[test]
    fn endpoints_default_to_port_zero() {
        assert_eq!(parse_endpoint("a").expect("ok"), ("a", 0));
        assert_eq!(parse_endpoint("join:1").expect("ok"), ("join", 1));
        assert!(parse_endpoint("join:x").is_err());
    }

    #[test]
    fn unknown_metadata_is_reported() {
        let mut spec = GraphSpec::from_yaml(YAML).expect("yaml");
        spec.edges[0].metadata = "nope".into();
        spec.config = Some(EngineConfig {
            spill_dir: "memory://dsl-test".into(),
            ..EngineConfig::default()
        });
        let err = spec
            .build(&ComponentRegistry::with_builtins(), &TransformRegistry::new())
            .err()
            .expect("unknown metadata");
        assert!(err.to_string().contains("unknown metadata 'nope'"), "{err}");
    }
}
