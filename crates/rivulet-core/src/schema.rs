//! Record metadata: an ordered list of typed field descriptors.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    String,
    /// 32-bit signed integer.
    Integer,
    /// 64-bit signed integer.
    Long,
    /// 64-bit float.
    Number,
    /// Fixed-point decimal; values carry an unscaled i128 at `scale`.
    Decimal { precision: u8, scale: u8 },
    /// Milliseconds since the Unix epoch.
    Date,
    Boolean,
    /// Raw bytes.
    Byte,
    /// Ordered list of strings.
    Sequence,
}

impl DataType {
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            DataType::Integer | DataType::Long | DataType::Number | DataType::Decimal { .. }
        )
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::String => f.write_str("string"),
            DataType::Integer => f.write_str("integer"),
            DataType::Long => f.write_str("long"),
            DataType::Number => f.write_str("number"),
            DataType::Decimal { precision, scale } => write!(f, "decimal({precision},{scale})"),
            DataType::Date => f.write_str("date"),
            DataType::Boolean => f.write_str("boolean"),
            DataType::Byte => f.write_str("byte"),
            DataType::Sequence => f.write_str("sequence"),
        }
    }
}

fn default_nullable() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMetadata {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: DataType,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
    /// Textual default, parsed with the field's type when a record is reset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    /// Formatting hint for connectors (date pattern, number format).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}

impl FieldMetadata {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable: true,
            default: None,
            format: None,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn with_default(mut self, default: impl Into<String>) -> Self {
        self.default = Some(default.into());
        self
    }

    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordMetadata {
    pub name: String,
    pub fields: Vec<FieldMetadata>,
}

impl RecordMetadata {
    pub fn new(name: impl Into<String>, fields: Vec<FieldMetadata>) -> Self {
        Self {
            name: name.into(),
            fields,
        }
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn field(&self, idx: usize) -> Option<&FieldMetadata> {
        self.fields.get(idx)
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    /// Structural compatibility: same arity and pairwise identical types.
    /// Field names are not compared.
    pub fn is_compatible(&self, other: &RecordMetadata) -> bool {
        self.fields.len() == other.fields.len()
            && self
                .fields
                .iter()
                .zip(other.fields.iter())
                .all(|(a, b)| a.data_type == b.data_type)
    }

    pub fn check_compatible(&self, other: &RecordMetadata) -> Result<()> {
        if self.fields.len() != other.fields.len() {
            return Err(Error::Schema(format!(
                "metadata '{}' has {} fields, '{}' has {}",
                self.name,
                self.fields.len(),
                other.name,
                other.fields.len()
            )));
        }
        for (i, (a, b)) in self.fields.iter().zip(other.fields.iter()).enumerate() {
            if a.data_type != b.data_type {
                return Err(Error::Schema(format!(
                    "field {i} differs: '{}.{}' is {}, '{}.{}' is {}",
                    self.name, a.name, a.data_type, other.name, b.name, b.data_type
                )));
            }
        }
        Ok(())
    }

    /// Reject duplicate field names and unparseable defaults.
    pub fn validate(&self) -> Result<()> {
        for (i, f) in self.fields.iter().enumerate() {
            if self.fields[..i].iter().any(|g| g.name == f.name) {
                return Err(Error::Schema(format!(
                    "duplicate field '{}' in metadata '{}'",
                    f.name, self.name
                )));
            }
            if let Some(default) = &f.default {
                crate::value::Value::parse_as(&f.data_type, default).map_err(|e| {
                    Error::Schema(format!("bad default for '{}.{}': {e}", self.name, f.name))
                })?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(name: &str, types: &[DataType]) -> RecordMetadata {
        RecordMetadata::new(
            name,
            types
                .iter()
                .enumerate()
                .map(|(i, t)| FieldMetadata::new(format!("f{i}"), *t))
                .collect(),
        )
    }

    #[test]
    fn compatibility_ignores_names_but_not_types() {
        let a = meta("a", &[DataType::String, DataType::Integer]);
        let mut b = meta("b", &[DataType::String, DataType::Integer]);
        b.fields[0].name = "other".into();
        assert!(a.is_compatible(&b));

        let c = meta("c", &[DataType::String, DataType::Long]);
        assert!(!a.is_compatible(&c));
        assert!(a.check_compatible(&c).is_err());

        let d = meta("d", &[DataType::String]);
        assert!(a.check_compatible(&d).is_err());
    }

    #[test]
    fn validate_rejects_duplicate_names_and_bad_defaults() {
        let dup = RecordMetadata::new(
            "dup",
            vec![
                FieldMetadata::new("x", DataType::Integer),
                FieldMetadata::new("x", DataType::Long),
            ],
        );
        assert!(dup.validate().is_err());

        let bad = RecordMetadata::new(
            "bad",
            vec![FieldMetadata::new("x", DataType::Integer).with_default("abc")],
        );
        assert!(bad.validate().is_err());
    }

    #[test]
    fn metadata_deserializes_from_json() {
        let json = r#"{"name":"people","fields":[
            {"name":"id","type":"long","nullable":false},
            {"name":"price","type":{"decimal":{"precision":10,"scale":2}}}
        ]}"#;
        let m: RecordMetadata = serde_json::from_str(json).expect("metadata json");
        assert_eq!(m.len(), 2);
        assert!(!m.fields[0].nullable);
        assert!(m.fields[1].nullable);
        assert_eq!(
            m.fields[1].data_type,
            DataType::Decimal {
                precision: 10,
                scale: 2
            }
        );
    }
}
