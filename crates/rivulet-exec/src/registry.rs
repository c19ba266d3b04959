//! Name → constructor tables used when a graph is built from a declarative
//! definition.
//!
//! `ComponentRegistry` maps type tags to constructors that read a
//! component's attribute map. `TransformRegistry` maps names to the user
//! collaborators (transforms, filters, generators) and to the shared handles
//! of `COLLECT` sinks.

use std::collections::HashMap;

use serde_json::Value as Json;

use rivulet_components as comp;
use rivulet_components::{
    Attrs, CollectHandle, Component, ComponentError, CopyByName, RecordFilter, RecordGenerate,
    RecordTransform,
};

use crate::error::{GraphError, Result};

type ComponentCtor = Box<
    dyn Fn(&Attrs<'_>, &TransformRegistry) -> comp::Result<Box<dyn Component>> + Send + Sync,
>;
type TransformFactory = Box<dyn Fn() -> Box<dyn RecordTransform> + Send + Sync>;
type FilterFactory = Box<dyn Fn() -> Box<dyn RecordFilter> + Send + Sync>;
type GenerateFactory = Box<dyn Fn() -> Box<dyn RecordGenerate> + Send + Sync>;

pub const DEFAULT_TRANSFORM: &str = "copy_by_name";

#[derive(Default)]
pub struct TransformRegistry {
    transforms: HashMap<String, TransformFactory>,
    filters: HashMap<String, FilterFactory>,
    generators: HashMap<String, GenerateFactory>,
    sinks: HashMap<String, CollectHandle>,
}

impl TransformRegistry {
    /// A registry holding only `copy_by_name`.
    pub fn new() -> Self {
        let mut reg = Self::default();
        reg.register_transform(DEFAULT_TRANSFORM, || Box::new(CopyByName));
        reg
    }

    pub fn register_transform<F>(&mut self, name: &str, factory: F) -> &mut Self
    where
        F: Fn() -> Box<dyn RecordTransform> + Send + Sync + 'static,
    {
        self.transforms.insert(name.to_string(), Box::new(factory));
        self
    }

    pub fn register_filter<F>(&mut self, name: &str, factory: F) -> &mut Self
    where
        F: Fn() -> Box<dyn RecordFilter> + Send + Sync + 'static,
    {
        self.filters.insert(name.to_string(), Box::new(factory));
        self
    }

    pub fn register_generator<F>(&mut self, name: &str, factory: F) -> &mut Self
    where
        F: Fn() -> Box<dyn RecordGenerate> + Send + Sync + 'static,
    {
        self.generators.insert(name.to_string(), Box::new(factory));
        self
    }

    /// A `COLLECT` component with `handle: <name>` stores into this handle.
    pub fn register_sink(&mut self, name: &str, handle: CollectHandle) -> &mut Self {
        self.sinks.insert(name.to_string(), handle);
        self
    }

    /// The transform named by the `transform` attribute, or `copy_by_name`.
    pub fn transform(&self, attrs: &Attrs<'_>) -> comp::Result<Box<dyn RecordTransform>> {
        let name = attrs.str("transform")?.unwrap_or(DEFAULT_TRANSFORM);
        self.transforms
            .get(name)
            .map(|f| f())
            .ok_or_else(|| ComponentError::config(format!("unknown transform '{name}'")))
    }

    pub fn filter(&self, attrs: &Attrs<'_>) -> comp::Result<Option<Box<dyn RecordFilter>>> {
        lookup(&self.filters, "filter", attrs.str("filter")?)
    }

    pub fn generator(&self, attrs: &Attrs<'_>) -> comp::Result<Option<Box<dyn RecordGenerate>>> {
        lookup(&self.generators, "generator", attrs.str("generator")?)
    }

    pub fn sink(&self, attrs: &Attrs<'_>) -> comp::Result<CollectHandle> {
        match attrs.str("handle")? {
            None => Ok(CollectHandle::new()),
            Some(name) => self
                .sinks
                .get(name)
                .cloned()
                .ok_or_else(|| ComponentError::config(format!("unknown collect handle '{name}'"))),
        }
    }
}

fn lookup<T: ?Sized>(
    table: &HashMap<String, Box<dyn Fn() -> Box<T> + Send + Sync>>,
    kind: &str,
    name: Option<&str>,
) -> comp::Result<Option<Box<T>>> {
    match name {
        None => Ok(None),
        Some(name) => table
            .get(name)
            .map(|f| Some(f()))
            .ok_or_else(|| ComponentError::config(format!("unknown {kind} '{name}'"))),
    }
}

pub struct ComponentRegistry {
    ctors: HashMap<String, ComponentCtor>,
}

impl Default for ComponentRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl ComponentRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            ctors: HashMap::new(),
        }
    }

    /// Every component type this crate family ships.
    pub fn with_builtins() -> Self {
        let mut reg = Self::new();
        reg.register(comp::sort::TYPE, |a, _| Ok(Box::new(comp::Sort::from_attrs(a)?)));
        reg.register(comp::dedup::TYPE, |a, _| Ok(Box::new(comp::Dedup::from_attrs(a)?)));
        reg.register(comp::aggregate::TYPE, |a, _| {
            Ok(Box::new(comp::Aggregate::from_attrs(a)?))
        });
        reg.register(comp::partition::TYPE, |a, _| {
            Ok(Box::new(comp::Partition::from_attrs(a)?))
        });
        reg.register(comp::merge::TYPE, |a, _| Ok(Box::new(comp::Merge::from_attrs(a)?)));
        reg.register(comp::copy::TYPE, |_, _| Ok(Box::new(comp::SimpleCopy)));
        reg.register(comp::trash::TYPE, |_, _| Ok(Box::new(comp::Trash)));
        reg.register(comp::collect::TYPE, |a, t| Ok(Box::new(comp::Collect::new(t.sink(a)?))));
        reg.register(comp::filter::TYPE, |a, t| match t.filter(a)? {
            Some(f) => Ok(Box::new(comp::ExtFilter::new(f))),
            None => Ok(Box::new(comp::ExtFilter::from_attrs(a)?)),
        });
        reg.register(comp::reformat::TYPE, |a, t| {
            Ok(Box::new(comp::Reformat::from_attrs(a, t.transform(a)?)?))
        });
        reg.register(comp::generator::TYPE, |a, t| {
            Ok(Box::new(comp::Generator::from_attrs(a, t.generator(a)?)?))
        });
        reg.register(comp::join::merge::TYPE, |a, t| {
            Ok(Box::new(comp::MergeJoin::from_attrs(a, t.transform(a)?)?))
        });
        reg.register(comp::join::hash::TYPE, |a, t| {
            Ok(Box::new(comp::HashJoin::from_attrs(a, t.transform(a)?)?))
        });
        reg.register(comp::join::intersection::TYPE, |a, t| {
            Ok(Box::new(comp::DataIntersection::from_attrs(a, t.transform(a)?)?))
        });
        reg
    }

    pub fn register<F>(&mut self, type_tag: &str, ctor: F) -> &mut Self
    where
        F: Fn(&Attrs<'_>, &TransformRegistry) -> comp::Result<Box<dyn Component>>
            + Send
            + Sync
            + 'static,
    {
        self.ctors.insert(type_tag.to_string(), Box::new(ctor));
        self
    }

    pub fn contains(&self, type_tag: &str) -> bool {
        self.ctors.contains_key(type_tag)
    }

    /// Registered type tags, sorted.
    pub fn types(&self) -> Vec<&str> {
        let mut tags: Vec<&str> = self.ctors.keys().map(String::as_str).collect();
        tags.sort_unstable();
        tags
    }

    /// Construct component `id` of type `type_tag` from its attributes.
    pub fn create(
        &self,
        id: &str,
        type_tag: &str,
        attrs: &Json,
        transforms: &TransformRegistry,
    ) -> Result<Box<dyn Component>> {
        let ctor = self
            .ctors
            .get(type_tag)
            .ok_or_else(|| GraphError::UnknownType(type_tag.to_string()))?;
        ctor(&Attrs::new(attrs), transforms).map_err(|source| GraphError::Component {
            id: id.to_string(),
            kind: type_tag.to_string(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builtins_cover_every_component() {
        let reg = ComponentRegistry::with_builtins();
        for tag in [
            "SORT",
            "DEDUP",
            "AGGREGATE",
            "PARTITION",
            "MERGE",
            "SIMPLE_COPY",
            "TRASH",
            "COLLECT",
            "EXT_FILTER",
            "REFORMAT",
            "GENERATOR",
            "MERGE_JOIN",
            "HASH_JOIN",
            "DATA_INTERSECTION",
        ] {
            assert!(reg.contains(tag), "{tag} missing");
        }
        assert_eq!(reg.types().len(), 14);
    }

    #[test]
    fn unknown_names_are_errors() {
        let reg = ComponentRegistry::with_builtins();
        let transforms = TransformRegistry::new();
        assert!(matches!(
            reg.create("x", "NOPE", &json!({}), &transforms),
            Err(GraphError::UnknownType(_))
        ));
        let err = reg
            .create("j", "REFORMAT", &json!({"transform": "missing"}), &transforms)
            .err()
            .expect("unknown transform");
        assert!(err.to_string().contains("unknown transform 'missing'"), "{err}");
    }

    #[test]
    fn bad_attributes_carry_the_component_id() {
        let reg = ComponentRegistry::with_builtins();
        let err = reg
            .create("sorter", "SORT", &json!({}), &TransformRegistry::new())
            .err()
            .expect("missing key");
        assert!(matches!(err, GraphError::Component { ref id, .. } if id == "sorter"));
    }

    #[test]
    fn collect_uses_the_registered_handle() {
        let reg = ComponentRegistry::with_builtins();
        let mut transforms = TransformRegistry::new();
        let handle = CollectHandle::new();
        transforms.register_sink("out", handle.clone());
        assert!(reg
            .create("c", "COLLECT", &json!({"handle": "out"}), &transforms)
            .is_ok());
        assert!(reg
            .create("c", "COLLECT", &json!({"handle": "other"}), &transforms)
            .is_err());
    }
}
