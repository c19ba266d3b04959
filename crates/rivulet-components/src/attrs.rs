//! Typed access to a component's declarative attributes.

use rivulet_core::key::{parse_key_spec, KeyField};
use serde_json::Value as Json;

use crate::error::{ComponentError, Result};

/// Attribute map of one component, as given in a graph definition.
#[derive(Debug, Clone, Copy)]
pub struct Attrs<'a> {
    raw: &'a Json,
}

impl<'a> Attrs<'a> {
    pub fn new(raw: &'a Json) -> Self {
        Self { raw }
    }

    pub fn raw(&self, name: &str) -> Option<&'a Json> {
        self.raw.get(name).filter(|v| !v.is_null())
    }

    pub fn str(&self, name: &str) -> Result<Option<&'a str>> {
        match self.raw(name) {
            None => Ok(None),
            Some(Json::String(s)) => Ok(Some(s.as_str())),
            Some(_) => Err(ComponentError::config(format!("attribute '{name}' must be a string"))),
        }
    }

    pub fn require_str(&self, name: &str) -> Result<&'a str> {
        self.str(name)?
            .ok_or_else(|| ComponentError::config(format!("attribute '{name}' is required")))
    }

    pub fn bool(&self, name: &str, default: bool) -> Result<bool> {
        match self.raw(name) {
            None => Ok(default),
            Some(Json::Bool(b)) => Ok(*b),
            Some(Json::String(s)) => s
                .trim()
                .parse()
                .map_err(|_| ComponentError::config(format!("attribute '{name}' must be a boolean"))),
            Some(_) => Err(ComponentError::config(format!("attribute '{name}' must be a boolean"))),
        }
    }

    pub fn usize(&self, name: &str, default: usize) -> Result<usize> {
        match self.raw(name) {
            None => Ok(default),
            Some(Json::Number(n)) => n
                .as_u64()
                .map(|v| v as usize)
                .ok_or_else(|| ComponentError::config(format!("attribute '{name}' must be a non-negative integer"))),
            Some(Json::String(s)) => s.trim().parse().map_err(|_| {
                ComponentError::config(format!("attribute '{name}' must be a non-negative integer"))
            }),
            Some(_) => Err(ComponentError::config(format!(
                "attribute '{name}' must be a non-negative integer"
            ))),
        }
    }

    /// A `;`-separated string or an array of strings.
    pub fn list(&self, name: &str) -> Result<Option<Vec<String>>> {
        match self.raw(name) {
            None => Ok(None),
            Some(Json::String(s)) => Ok(Some(
                s.split(';')
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .map(str::to_string)
                    .collect(),
            )),
            Some(Json::Array(items)) => items
                .iter()
                .map(|v| match v {
                    Json::String(s) => Ok(s.trim().to_string()),
                    Json::Number(n) => Ok(n.to_string()),
                    Json::Bool(b) => Ok(b.to_string()),
                    _ => Err(ComponentError::config(format!(
                        "attribute '{name}' must hold strings"
                    ))),
                })
                .collect::<Result<Vec<_>>>()
                .map(Some),
            Some(_) => Err(ComponentError::config(format!(
                "attribute '{name}' must be a string or a list"
            ))),
        }
    }

    /// Key specification: `"a;b(d)"` or `["a", "b(d)"]`.
    pub fn key(&self, name: &str) -> Result<Option<Vec<KeyField>>> {
        let Some(parts) = self.list(name)? else {
            return Ok(None);
        };
        parse_key_spec(&parts.join(";"))
            .map(Some)
            .map_err(ComponentError::config)
    }

    pub fn require_key(&self, name: &str) -> Result<Vec<KeyField>> {
        self.key(name)?
            .filter(|k| !k.is_empty())
            .ok_or_else(|| ComponentError::config(format!("attribute '{name}' is required")))
    }
}
