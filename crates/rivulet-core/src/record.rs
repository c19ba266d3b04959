//! `DataRecord`: a fixed-arity row of typed values over shared metadata.
//!
//! Records are reused: a component allocates one per port and overwrites it
//! every cycle through `deserialize_from`, which keeps string and byte
//! allocations alive between reads.
//!
//! Binary layout, fields in declaration order, each as a null flag byte
//! (0 = null, 1 = present) followed by the payload when present:
//!
//! | type       | payload                                   |
//! |------------|-------------------------------------------|
//! | string     | u32 length, UTF-8 bytes                   |
//! | integer    | i32                                       |
//! | long, date | i64                                       |
//! | number     | f64 bits                                  |
//! | decimal    | i128 unscaled, u8 scale                   |
//! | boolean    | u8                                        |
//! | byte       | u32 length, bytes                         |
//! | sequence   | u32 count, then u32 length + bytes each   |
//!
//! All integers are little-endian.

use std::fmt;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::schema::{DataType, RecordMetadata};
use crate::value::{Decimal, Value};

#[derive(Debug, Clone)]
pub struct DataRecord {
    metadata: Arc<RecordMetadata>,
    defaults: Arc<[Value]>,
    values: Vec<Value>,
}

fn parse_defaults(metadata: &RecordMetadata) -> Arc<[Value]> {
    metadata
        .fields
        .iter()
        .map(|f| match &f.default {
            Some(d) => Value::parse_as(&f.data_type, d).unwrap_or(Value::Null),
            None => Value::Null,
        })
        .collect()
}

impl DataRecord {
    /// A record with every field at its default (or null).
    pub fn new(metadata: Arc<RecordMetadata>) -> Self {
        let defaults = parse_defaults(&metadata);
        let values = defaults.to_vec();
        Self {
            metadata,
            defaults,
            values,
        }
    }

    pub fn from_values(metadata: Arc<RecordMetadata>, values: Vec<Value>) -> Result<Self> {
        if values.len() != metadata.len() {
            return Err(Error::Schema(format!(
                "metadata '{}' has {} fields, got {} values",
                metadata.name,
                metadata.len(),
                values.len()
            )));
        }
        let mut rec = DataRecord::new(metadata);
        for (i, v) in values.into_iter().enumerate() {
            rec.set(i, v)?;
        }
        Ok(rec)
    }

    pub fn metadata(&self) -> &Arc<RecordMetadata> {
        &self.metadata
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, idx: usize) -> Option<&Value> {
        self.values.get(idx)
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.metadata
            .field_index(name)
            .and_then(|i| self.values.get(i))
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Set field `idx`, converting numeric widths and decimal scales to the
    /// field's declared type. Nulls are rejected for non-nullable fields.
    pub fn set(&mut self, idx: usize, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        let field = self.metadata.field(idx).ok_or_else(|| {
            Error::Schema(format!(
                "field index {idx} out of range for '{}'",
                self.metadata.name
            ))
        })?;
        if value.is_null() && !field.nullable {
            return Err(Error::Schema(format!(
                "field '{}.{}' is not nullable",
                self.metadata.name, field.name
            )));
        }
        let value = if value.matches(&field.data_type)
            && !matches!(field.data_type, DataType::Decimal { .. })
        {
            value
        } else {
            value.coerce_to(&field.data_type)?
        };
        self.values[idx] = value;
        Ok(())
    }

    pub fn set_by_name(&mut self, name: &str, value: impl Into<Value>) -> Result<()> {
        let idx = self.metadata.field_index(name).ok_or_else(|| {
            Error::Schema(format!(
                "no field '{name}' in metadata '{}'",
                self.metadata.name
            ))
        })?;
        self.set(idx, value)
    }

    /// Return every field to its default value (or null).
    pub fn reset(&mut self) {
        self.values.clone_from_slice(&self.defaults);
    }

    /// Overwrite this record with `other`'s values. Both must have
    /// structurally compatible metadata.
    pub fn copy_from(&mut self, other: &DataRecord) -> Result<()> {
        if !Arc::ptr_eq(&self.metadata, &other.metadata) {
            self.metadata.check_compatible(&other.metadata)?;
        }
        self.values.clone_from_slice(&other.values);
        Ok(())
    }

    /// Copy every field whose name also exists in `other`. Returns the number
    /// of fields copied.
    pub fn copy_fields_by_name(&mut self, other: &DataRecord) -> Result<usize> {
        let mut copied = 0;
        for idx in 0..self.metadata.len() {
            let name = &self.metadata.fields[idx].name;
            if let Some(v) = other.field(name) {
                let v = v.clone();
                self.set(idx, v)?;
                copied += 1;
            }
        }
        Ok(copied)
    }

    /// Check nullability of every field.
    pub fn validate(&self) -> Result<()> {
        for (f, v) in self.metadata.fields.iter().zip(self.values.iter()) {
            if v.is_null() && !f.nullable {
                return Err(Error::Schema(format!(
                    "field '{}.{}' is null but not nullable",
                    self.metadata.name, f.name
                )));
            }
        }
        Ok(())
    }

    pub fn serialize_into(&self, out: &mut Vec<u8>, max_size: usize) -> Result<()> {
        out.clear();
        for v in &self.values {
            write_value(out, v)?;
        }
        if out.len() > max_size {
            return Err(Error::RecordTooLarge {
                size: out.len(),
                max: max_size,
            });
        }
        Ok(())
    }

    pub fn to_bytes(&self, max_size: usize) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(64);
        self.serialize_into(&mut out, max_size)?;
        Ok(out)
    }

    /// Overwrite this record from its binary form.
    pub fn deserialize_from(&mut self, bytes: &[u8]) -> Result<()> {
        let mut r = Reader { buf: bytes, pos: 0 };
        for (slot, field) in self.values.iter_mut().zip(self.metadata.fields.iter()) {
            read_value(&mut r, &field.data_type, slot)?;
        }
        if r.pos != bytes.len() {
            return Err(Error::Serialize(format!(
                "{} trailing bytes after record '{}'",
                bytes.len() - r.pos,
                self.metadata.name
            )));
        }
        Ok(())
    }
}

impl PartialEq for DataRecord {
    fn eq(&self, other: &Self) -> bool {
        self.values == other.values
    }
}

impl fmt::Display for DataRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[", self.metadata.name)?;
        for (i, v) in self.values.iter().enumerate() {
            if i > 0 {
                f.write_str("|")?;
            }
            write!(f, "{v}")?;
        }
        f.write_str("]")
    }
}

fn write_len(out: &mut Vec<u8>, len: usize) -> Result<()> {
    let len = u32::try_from(len)
        .map_err(|_| Error::Serialize(format!("length {len} does not fit in u32")))?;
    out.extend_from_slice(&len.to_le_bytes());
    Ok(())
}

fn write_value(out: &mut Vec<u8>, v: &Value) -> Result<()> {
    if v.is_null() {
        out.push(0);
        return Ok(());
    }
    out.push(1);
    match v {
        Value::Null => {}
        Value::String(s) => {
            write_len(out, s.len())?;
            out.extend_from_slice(s.as_bytes());
        }
        Value::Integer(i) => out.extend_from_slice(&i.to_le_bytes()),
        Value::Long(i) | Value::Date(i) => out.extend_from_slice(&i.to_le_bytes()),
        Value::Number(f) => out.extend_from_slice(&f.to_bits().to_le_bytes()),
        Value::Decimal(d) => {
            out.extend_from_slice(&d.unscaled().to_le_bytes());
            out.push(d.scale());
        }
        Value::Boolean(b) => out.push(u8::from(*b)),
        Value::Byte(b) => {
            write_len(out, b.len())?;
            out.extend_from_slice(b);
        }
        Value::Sequence(items) => {
            write_len(out, items.len())?;
            for item in items {
                write_len(out, item.len())?;
                out.extend_from_slice(item.as_bytes());
            }
        }
    }
    Ok(())
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.buf.len())
            .ok_or_else(|| Error::Serialize("truncated record".into()))?;
        let out = &self.buf[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut a = [0u8; N];
        a.copy_from_slice(self.take(N)?);
        Ok(a)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.array::<1>()?[0])
    }

    fn len(&mut self) -> Result<usize> {
        Ok(u32::from_le_bytes(self.array::<4>()?) as usize)
    }

    fn str(&mut self) -> Result<&'a str> {
        let n = self.len()?;
        std::str::from_utf8(self.take(n)?)
            .map_err(|e| Error::Serialize(format!("invalid UTF-8 in record: {e}")))
    }
}

fn read_value(r: &mut Reader<'_>, dt: &DataType, slot: &mut Value) -> Result<()> {
    match r.u8()? {
        0 => {
            *slot = Value::Null;
            return Ok(());
        }
        1 => {}
        flag => {
            return Err(Error::Serialize(format!("bad null flag {flag}")));
        }
    }
    match dt {
        DataType::String => {
            let s = r.str()?;
            if let Value::String(existing) = slot {
                existing.clear();
                existing.push_str(s);
            } else {
                *slot = Value::String(s.to_string());
            }
        }
        DataType::Integer => *slot = Value::Integer(i32::from_le_bytes(r.array()?)),
        DataType::Long => *slot = Value::Long(i64::from_le_bytes(r.array()?)),
        DataType::Date => *slot = Value::Date(i64::from_le_bytes(r.array()?)),
        DataType::Number => *slot = Value::Number(f64::from_bits(u64::from_le_bytes(r.array()?))),
        DataType::Decimal { .. } => {
            let unscaled = i128::from_le_bytes(r.array()?);
            let scale = r.u8()?;
            *slot = Value::Decimal(Decimal::new(unscaled, scale));
        }
        DataType::Boolean => *slot = Value::Boolean(r.u8()? != 0),
        DataType::Byte => {
            let n = r.len()?;
            let bytes = r.take(n)?;
            if let Value::Byte(existing) = slot {
                existing.clear();
                existing.extend_from_slice(bytes);
            } else {
                *slot = Value::Byte(bytes.to_vec());
            }
        }
        DataType::Sequence => {
            let count = r.len()?;
            let mut items = Vec::with_capacity(count.min(1024));
            for _ in 0..count {
                items.push(r.str()?.to_string());
            }
            *slot = Value::Sequence(items);
        }
    }
    Ok(())
}
