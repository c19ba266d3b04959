//! Record keys: ordered field projections used for sorting, grouping and
//! joining.
//!
//! A key is written as a list of field names, each optionally suffixed with
//! `(a)` (ascending, the default) or `(d)` (descending), separated by `;`:
//! `"last_name;first_name(d)"`.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::hash::hash_values;
use crate::record::DataRecord;
use crate::schema::{DataType, RecordMetadata};
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    #[default]
    Ascending,
    Descending,
}

impl SortOrder {
    fn apply(self, ord: Ordering) -> Ordering {
        match self {
            SortOrder::Ascending => ord,
            SortOrder::Descending => ord.reverse(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyField {
    pub name: String,
    #[serde(default)]
    pub order: SortOrder,
}

impl KeyField {
    pub fn asc(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            order: SortOrder::Ascending,
        }
    }

    pub fn desc(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            order: SortOrder::Descending,
        }
    }

    /// Parse `name`, `name(a)` or `name(d)`.
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        let (name, order) = match s.find('(') {
            Some(open) => {
                let flag = s[open + 1..]
                    .strip_suffix(')')
                    .ok_or_else(|| Error::Key(format!("unterminated order flag in '{s}'")))?;
                let order = match flag.trim().to_ascii_lowercase().as_str() {
                    "a" | "asc" => SortOrder::Ascending,
                    "d" | "desc" => SortOrder::Descending,
                    other => {
                        return Err(Error::Key(format!(
                            "unknown order flag '{other}' in '{s}'"
                        )))
                    }
                };
                (s[..open].trim(), order)
            }
            None => (s, SortOrder::Ascending),
        };
        if name.is_empty() {
            return Err(Error::Key(format!("empty key field in '{s}'")));
        }
        Ok(Self {
            name: name.to_string(),
            order,
        })
    }
}

impl fmt::Display for KeyField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.order {
            SortOrder::Ascending => write!(f, "{}(a)", self.name),
            SortOrder::Descending => write!(f, "{}(d)", self.name),
        }
    }
}

/// Parse a `;`-separated key specification. An empty string is an empty key.
pub fn parse_key_spec(spec: &str) -> Result<Vec<KeyField>> {
    spec.split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(KeyField::parse)
        .collect()
}

/// Compare two key projections field by field under `orders`.
pub fn compare_key_values(a: &[Value], b: &[Value], orders: &[SortOrder]) -> Ordering {
    for ((x, y), order) in a.iter().zip(b.iter()).zip(orders.iter()) {
        match order.apply(x.compare(y)) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    Ordering::Equal
}

static NULL_VALUE: Value = Value::Null;

/// Ordered field positions over one record metadata.
#[derive(Debug, Clone)]
pub struct RecordKey {
    metadata: Arc<RecordMetadata>,
    fields: Vec<usize>,
    orders: Vec<SortOrder>,
    equal_nulls: bool,
}

impl RecordKey {
    pub fn new(metadata: &Arc<RecordMetadata>, key: &[KeyField]) -> Result<Self> {
        let mut fields = Vec::with_capacity(key.len());
        let mut orders = Vec::with_capacity(key.len());
        for kf in key {
            let idx = metadata.field_index(&kf.name).ok_or_else(|| {
                Error::Key(format!(
                    "key field '{}' not found in metadata '{}'",
                    kf.name, metadata.name
                ))
            })?;
            fields.push(idx);
            orders.push(kf.order);
        }
        Ok(Self {
            metadata: Arc::clone(metadata),
            fields,
            orders,
            equal_nulls: true,
        })
    }

    pub fn parse(metadata: &Arc<RecordMetadata>, spec: &str) -> Result<Self> {
        Self::new(metadata, &parse_key_spec(spec)?)
    }

    /// Whether two nulls at the same key position are equal (default true).
    pub fn with_equal_nulls(mut self, equal_nulls: bool) -> Self {
        self.equal_nulls = equal_nulls;
        self
    }

    pub fn equal_nulls(&self) -> bool {
        self.equal_nulls
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn metadata(&self) -> &Arc<RecordMetadata> {
        &self.metadata
    }

    pub fn field_indices(&self) -> &[usize] {
        &self.fields
    }

    pub fn orders(&self) -> &[SortOrder] {
        &self.orders
    }

    pub fn data_types(&self) -> Vec<DataType> {
        self.fields
            .iter()
            .map(|idx| self.metadata.fields[*idx].data_type)
            .collect()
    }

    fn value_at(record: &DataRecord, idx: usize) -> &Value {
        record.get(idx).unwrap_or(&NULL_VALUE)
    }

    fn compare_pair(&self, i: usize, a: &Value, b: &Value) -> Ordering {
        if a.is_null() && b.is_null() {
            // unequal nulls always read as a key change, never as disorder
            return if self.equal_nulls {
                Ordering::Equal
            } else {
                Ordering::Less
            };
        }
        self.orders[i].apply(a.compare(b))
    }

    /// Three-way comparison of two records of this key's metadata.
    pub fn compare(&self, a: &DataRecord, b: &DataRecord) -> Ordering {
        for (i, idx) in self.fields.iter().enumerate() {
            match self.compare_pair(i, Self::value_at(a, *idx), Self::value_at(b, *idx)) {
                Ordering::Equal => continue,
                other => return other,
            }
        }
        Ordering::Equal
    }

    /// Positional comparison across schemas: field `i` of this key on `a`
    /// against field `i` of `other` on `b`. Orders and null handling follow
    /// this key.
    pub fn compare_with(&self, a: &DataRecord, other: &RecordKey, b: &DataRecord) -> Ordering {
        for (i, (ia, ib)) in self.fields.iter().zip(other.fields.iter()).enumerate() {
            match self.compare_pair(i, Self::value_at(a, *ia), Self::value_at(b, *ib)) {
                Ordering::Equal => continue,
                other => return other,
            }
        }
        Ordering::Equal
    }

    /// Ensure `other` can be compared positionally with this key.
    pub fn check_comparable(&self, other: &RecordKey) -> Result<()> {
        if self.len() != other.len() {
            return Err(Error::Key(format!(
                "keys have different lengths ({} vs {})",
                self.len(),
                other.len()
            )));
        }
        for (i, (a, b)) in self
            .data_types()
            .iter()
            .zip(other.data_types().iter())
            .enumerate()
        {
            if a != b {
                let name_a = &self.metadata.fields[self.fields[i]].name;
                let name_b = &other.metadata.fields[other.fields[i]].name;
                return Err(Error::Key(format!(
                    "key field {i} types differ: '{name_a}' is {a}, '{name_b}' is {b}"
                )));
            }
        }
        Ok(())
    }

    /// Owned projection of the key values.
    pub fn key_values(&self, record: &DataRecord) -> Vec<Value> {
        self.fields
            .iter()
            .map(|idx| Self::value_at(record, *idx).clone())
            .collect()
    }

    pub fn has_null(&self, record: &DataRecord) -> bool {
        self.fields
            .iter()
            .any(|idx| Self::value_at(record, *idx).is_null())
    }

    /// Key values joined with `|`; nulls render as empty.
    pub fn key_string(&self, record: &DataRecord) -> String {
        let mut out = String::new();
        for (i, idx) in self.fields.iter().enumerate() {
            if i > 0 {
                out.push('|');
            }
            let v = Self::value_at(record, *idx);
            if !v.is_null() {
                use std::fmt::Write as _;
                let _ = write!(out, "{v}");
            }
        }
        out
    }

    /// Hashable projection. `None` when nulls are unequal and the key holds a
    /// null, since such a record can never match another.
    pub fn hash_key(&self, record: &DataRecord) -> Option<HashKey> {
        if !self.equal_nulls && self.has_null(record) {
            return None;
        }
        Some(HashKey {
            values: self.key_values(record),
        })
    }

    /// Stable 64-bit hash of the key values.
    pub fn hash_code(&self, record: &DataRecord) -> u64 {
        hash_values(&self.key_values(record))
    }
}

/// Owned key projection with `Hash`/`Eq`, usable as a hash-table key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HashKey {
    values: Vec<Value>,
}

impl HashKey {
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Stable hash suitable for partition routing.
    pub fn hash_code(&self) -> u64 {
        hash_values(&self.values)
    }
}

impl fmt::Display for HashKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, v) in self.values.iter().enumerate() {
            if i > 0 {
                f.write_str("|")?;
            }
            if !v.is_null() {
                write!(f, "{v}")?;
            }
        }
        Ok(())
    }
}
