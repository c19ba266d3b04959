//! Field values.
//!
//! `Value::compare` is the total order used by keys: nulls first, numeric
//! variants compare by magnitude across types, and mismatched non-numeric
//! variants fall back to a fixed type rank. Equality and hashing are
//! structural (same variant, same value), which is what hash tables need once
//! key types have been checked for compatibility.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::schema::DataType;

fn pow10(n: u32) -> Option<i128> {
    10i128.checked_pow(n)
}

/// Fixed-point decimal: `unscaled * 10^-scale`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Decimal {
    unscaled: i128,
    scale: u8,
}

impl Decimal {
    pub const fn new(unscaled: i128, scale: u8) -> Self {
        Self { unscaled, scale }
    }

    pub fn unscaled(&self) -> i128 {
        self.unscaled
    }

    pub fn scale(&self) -> u8 {
        self.scale
    }

    /// Change the scale, rounding half away from zero when digits are dropped.
    pub fn rescale(&self, scale: u8) -> Option<Decimal> {
        match scale.cmp(&self.scale) {
            Ordering::Equal => Some(*self),
            Ordering::Greater => {
                let factor = pow10(u32::from(scale - self.scale))?;
                Some(Decimal::new(self.unscaled.checked_mul(factor)?, scale))
            }
            Ordering::Less => {
                let factor = pow10(u32::from(self.scale - scale))?;
                let q = self.unscaled / factor;
                let r = self.unscaled % factor;
                let q = if r.abs() * 2 >= factor {
                    q + self.unscaled.signum()
                } else {
                    q
                };
                Some(Decimal::new(q, scale))
            }
        }
    }

    pub fn to_f64(&self) -> f64 {
        self.unscaled as f64 / 10f64.powi(i32::from(self.scale))
    }

    pub fn from_f64(v: f64, scale: u8) -> Option<Decimal> {
        if !v.is_finite() {
            return None;
        }
        let scaled = (v * 10f64.powi(i32::from(scale))).round();
        if scaled.abs() >= i128::MAX as f64 {
            return None;
        }
        Some(Decimal::new(scaled as i128, scale))
    }

    pub fn from_i64(v: i64, scale: u8) -> Option<Decimal> {
        Decimal::new(i128::from(v), 0).rescale(scale)
    }

    /// Truncates toward zero.
    pub fn to_i64(&self) -> Option<i64> {
        let factor = pow10(u32::from(self.scale))?;
        i64::try_from(self.unscaled / factor).ok()
    }

    pub fn parse(s: &str, scale: u8) -> Result<Decimal> {
        let s = s.trim();
        let (negative, digits) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s.strip_prefix('+').unwrap_or(s)),
        };
        let (int_part, frac_part) = match digits.split_once('.') {
            Some((i, f)) => (i, f),
            None => (digits, ""),
        };
        let valid = |p: &str| p.chars().all(|c| c.is_ascii_digit());
        if (int_part.is_empty() && frac_part.is_empty()) || !valid(int_part) || !valid(frac_part) {
            return Err(Error::Serialize(format!("invalid decimal literal '{s}'")));
        }
        let combined = format!("{int_part}{frac_part}");
        let unscaled: i128 = if combined.is_empty() {
            0
        } else {
            combined
                .parse()
                .map_err(|_| Error::Serialize(format!("decimal literal '{s}' out of range")))?
        };
        let parsed_scale = u8::try_from(frac_part.len())
            .map_err(|_| Error::Serialize(format!("decimal literal '{s}' has too many digits")))?;
        let unscaled = if negative { -unscaled } else { unscaled };
        Decimal::new(unscaled, parsed_scale)
            .rescale(scale)
            .ok_or_else(|| Error::Serialize(format!("decimal literal '{s}' out of range")))
    }

    pub fn checked_add(&self, other: &Decimal) -> Option<Decimal> {
        let scale = self.scale.max(other.scale);
        let a = self.rescale(scale)?;
        let b = other.rescale(scale)?;
        Some(Decimal::new(a.unscaled.checked_add(b.unscaled)?, scale))
    }

    fn normalized(&self) -> Decimal {
        let mut d = *self;
        while d.scale > 0 && d.unscaled % 10 == 0 {
            d.unscaled /= 10;
            d.scale -= 1;
        }
        d
    }
}

impl PartialEq for Decimal {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Decimal {}

impl PartialOrd for Decimal {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Decimal {
    fn cmp(&self, other: &Self) -> Ordering {
        let scale = self.scale.max(other.scale);
        match (self.rescale(scale), other.rescale(scale)) {
            (Some(a), Some(b)) => a.unscaled.cmp(&b.unscaled),
            _ => self.to_f64().total_cmp(&other.to_f64()),
        }
    }
}

impl Hash for Decimal {
    fn hash<H: Hasher>(&self, state: &mut H) {
        let n = self.normalized();
        n.unscaled.hash(state);
        n.scale.hash(state);
    }
}

impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let digits = self.unscaled.unsigned_abs().to_string();
        let scale = usize::from(self.scale);
        let sign = if self.unscaled < 0 { "-" } else { "" };
        if scale == 0 {
            return write!(f, "{sign}{digits}");
        }
        let padded = format!("{digits:0>width$}", width = scale + 1);
        let (int_part, frac_part) = padded.split_at(padded.len() - scale);
        write!(f, "{sign}{int_part}.{frac_part}")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Value {
    Null,
    String(String),
    Integer(i32),
    Long(i64),
    Number(f64),
    Decimal(Decimal),
    Date(i64),
    Boolean(bool),
    Byte(Vec<u8>),
    Sequence(Vec<String>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Whether this value may be stored in a field of type `dt`.
    pub fn matches(&self, dt: &DataType) -> bool {
        matches!(
            (self, dt),
            (Value::Null, _)
                | (Value::String(_), DataType::String)
                | (Value::Integer(_), DataType::Integer)
                | (Value::Long(_), DataType::Long)
                | (Value::Number(_), DataType::Number)
                | (Value::Decimal(_), DataType::Decimal { .. })
                | (Value::Date(_), DataType::Date)
                | (Value::Boolean(_), DataType::Boolean)
                | (Value::Byte(_), DataType::Byte)
                | (Value::Sequence(_), DataType::Sequence)
        )
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::String(_) => "string",
            Value::Integer(_) => "integer",
            Value::Long(_) => "long",
            Value::Number(_) => "number",
            Value::Decimal(_) => "decimal",
            Value::Date(_) => "date",
            Value::Boolean(_) => "boolean",
            Value::Byte(_) => "byte",
            Value::Sequence(_) => "sequence",
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Boolean(_) => 1,
            Value::Integer(_) | Value::Long(_) | Value::Number(_) | Value::Decimal(_) => 2,
            Value::Date(_) => 3,
            Value::String(_) => 4,
            Value::Byte(_) => 5,
            Value::Sequence(_) => 6,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(v) => Some(i64::from(*v)),
            Value::Long(v) | Value::Date(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(v) => Some(f64::from(*v)),
            Value::Long(v) => Some(*v as f64),
            Value::Number(v) => Some(*v),
            Value::Decimal(d) => Some(d.to_f64()),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Total order used by keys. Nulls sort first.
    pub fn compare(&self, other: &Value) -> Ordering {
        use Value::*;
        match (self, other) {
            (Null, Null) => Ordering::Equal,
            (Null, _) => Ordering::Less,
            (_, Null) => Ordering::Greater,
            (String(a), String(b)) => a.cmp(b),
            (Integer(a), Integer(b)) => a.cmp(b),
            (Long(a), Long(b)) => a.cmp(b),
            (Date(a), Date(b)) => a.cmp(b),
            (Number(a), Number(b)) => a.total_cmp(b),
            (Decimal(a), Decimal(b)) => a.cmp(b),
            (Boolean(a), Boolean(b)) => a.cmp(b),
            (Byte(a), Byte(b)) => a.cmp(b),
            (Sequence(a), Sequence(b)) => a.cmp(b),
            (Integer(_) | Long(_), Integer(_) | Long(_)) => {
                // both sides are integral here
                self.as_i64().cmp(&other.as_i64())
            }
            (Decimal(a), Integer(_) | Long(_)) => {
                compare_decimal_int(a, other.as_i64().unwrap_or_default())
            }
            (Integer(_) | Long(_), Decimal(b)) => {
                compare_decimal_int(b, self.as_i64().unwrap_or_default()).reverse()
            }
            (Number(_) | Integer(_) | Long(_) | Decimal(_), Number(_) | Integer(_) | Long(_) | Decimal(_)) => {
                let a = self.as_f64().unwrap_or(f64::NAN);
                let b = other.as_f64().unwrap_or(f64::NAN);
                a.total_cmp(&b)
            }
            _ => self.rank().cmp(&other.rank()),
        }
    }

    /// Parse a textual literal as a value of type `dt`.
    pub fn parse_as(dt: &DataType, s: &str) -> Result<Value> {
        let bad = |what: &str| Error::Serialize(format!("cannot parse '{s}' as {what}"));
        let t = s.trim();
        Ok(match dt {
            DataType::String => Value::String(s.to_string()),
            DataType::Integer => Value::Integer(t.parse().map_err(|_| bad("integer"))?),
            DataType::Long => Value::Long(t.parse().map_err(|_| bad("long"))?),
            DataType::Number => Value::Number(t.parse().map_err(|_| bad("number"))?),
            DataType::Decimal { scale, .. } => Value::Decimal(Decimal::parse(t, *scale)?),
            DataType::Date => Value::Date(t.parse().map_err(|_| bad("date (epoch millis)"))?),
            DataType::Boolean => match t.to_ascii_lowercase().as_str() {
                "true" | "t" | "yes" | "y" | "1" => Value::Boolean(true),
                "false" | "f" | "no" | "n" | "0" => Value::Boolean(false),
                _ => return Err(bad("boolean")),
            },
            DataType::Byte => Value::Byte(s.as_bytes().to_vec()),
            DataType::Sequence => {
                if t.is_empty() {
                    Value::Sequence(Vec::new())
                } else {
                    Value::Sequence(t.split(',').map(|p| p.trim().to_string()).collect())
                }
            }
        })
    }

    /// Convert a JSON scalar (or array, for sequences and bytes) into a value of type `dt`.
    pub fn from_json(dt: &DataType, json: &serde_json::Value) -> Result<Value> {
        use serde_json::Value as J;
        let mismatch = || Error::Serialize(format!("cannot convert JSON {json} to {dt}"));
        match (dt, json) {
            (_, J::Null) => Ok(Value::Null),
            (_, J::String(s)) => Value::parse_as(dt, s),
            (DataType::Integer, J::Number(n)) => n
                .as_i64()
                .and_then(|v| i32::try_from(v).ok())
                .map(Value::Integer)
                .ok_or_else(mismatch),
            (DataType::Long, J::Number(n)) => n.as_i64().map(Value::Long).ok_or_else(mismatch),
            (DataType::Date, J::Number(n)) => n.as_i64().map(Value::Date).ok_or_else(mismatch),
            (DataType::Number, J::Number(n)) => n.as_f64().map(Value::Number).ok_or_else(mismatch),
            (DataType::Decimal { scale, .. }, J::Number(n)) => {
                Ok(Value::Decimal(Decimal::parse(&n.to_string(), *scale)?))
            }
            (DataType::Boolean, J::Bool(b)) => Ok(Value::Boolean(*b)),
            (DataType::Sequence, J::Array(items)) => items
                .iter()
                .map(|i| match i {
                    J::String(s) => Ok(s.clone()),
                    other => Ok(other.to_string()),
                })
                .collect::<Result<Vec<_>>>()
                .map(Value::Sequence),
            (DataType::Byte, J::Array(items)) => items
                .iter()
                .map(|i| {
                    i.as_u64()
                        .and_then(|b| u8::try_from(b).ok())
                        .ok_or_else(mismatch)
                })
                .collect::<Result<Vec<_>>>()
                .map(Value::Byte),
            _ => Err(mismatch()),
        }
    }

    /// Convert to a value storable in a field of type `dt`.
    pub fn coerce_to(&self, dt: &DataType) -> Result<Value> {
        let fail = || {
            Error::Schema(format!(
                "cannot convert {} value '{}' to {dt}",
                self.type_name(),
                self
            ))
        };
        Ok(match (self, dt) {
            (Value::Null, _) => Value::Null,
            (Value::Decimal(d), DataType::Decimal { scale, .. }) => {
                Value::Decimal(d.rescale(*scale).ok_or_else(fail)?)
            }
            (v, dt) if v.matches(dt) => v.clone(),
            (v, DataType::String) => Value::String(v.to_string()),
            (Value::String(s), dt) => Value::parse_as(dt, s)?,
            (Value::Integer(_) | Value::Long(_) | Value::Date(_), DataType::Integer) => {
                let v = self.as_i64().ok_or_else(fail)?;
                Value::Integer(i32::try_from(v).map_err(|_| fail())?)
            }
            (Value::Integer(_) | Value::Long(_) | Value::Date(_), DataType::Long) => {
                Value::Long(self.as_i64().ok_or_else(fail)?)
            }
            (Value::Integer(_) | Value::Long(_), DataType::Date) => {
                Value::Date(self.as_i64().ok_or_else(fail)?)
            }
            (Value::Integer(_) | Value::Long(_) | Value::Decimal(_), DataType::Number) => {
                Value::Number(self.as_f64().ok_or_else(fail)?)
            }
            (Value::Integer(_) | Value::Long(_), DataType::Decimal { scale, .. }) => {
                let v = self.as_i64().ok_or_else(fail)?;
                Value::Decimal(Decimal::from_i64(v, *scale).ok_or_else(fail)?)
            }
            (Value::Number(f), DataType::Decimal { scale, .. }) => {
                Value::Decimal(Decimal::from_f64(*f, *scale).ok_or_else(fail)?)
            }
            (Value::Number(f), DataType::Integer) => {
                if !f.is_finite() || f.trunc() < f64::from(i32::MIN) || f.trunc() > f64::from(i32::MAX) {
                    return Err(fail());
                }
                Value::Integer(f.trunc() as i32)
            }
            (Value::Number(f), DataType::Long) => {
                if !f.is_finite() || f.trunc() < i64::MIN as f64 || f.trunc() > i64::MAX as f64 {
                    return Err(fail());
                }
                Value::Long(f.trunc() as i64)
            }
            (Value::Decimal(d), DataType::Long) => Value::Long(d.to_i64().ok_or_else(fail)?),
            (Value::Decimal(d), DataType::Integer) => {
                let v = d.to_i64().ok_or_else(fail)?;
                Value::Integer(i32::try_from(v).map_err(|_| fail())?)
            }
            _ => return Err(fail()),
        })
    }
}

fn compare_decimal_int(d: &Decimal, i: i64) -> Ordering {
    match Decimal::from_i64(i, d.scale()) {
        Some(other) => d.cmp(&other),
        None => d.to_f64().total_cmp(&(i as f64)),
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        use Value::*;
        match (self, other) {
            (Null, Null) => true,
            (String(a), String(b)) => a == b,
            (Integer(a), Integer(b)) => a == b,
            (Long(a), Long(b)) => a == b,
            (Number(a), Number(b)) => a.to_bits() == b.to_bits(),
            (Decimal(a), Decimal(b)) => a == b,
            (Date(a), Date(b)) => a == b,
            (Boolean(a), Boolean(b)) => a == b,
            (Byte(a), Byte(b)) => a == b,
            (Sequence(a), Sequence(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Null => {}
            Value::String(s) => s.hash(state),
            Value::Integer(v) => v.hash(state),
            Value::Long(v) | Value::Date(v) => v.hash(state),
            Value::Number(v) => v.to_bits().hash(state),
            Value::Decimal(d) => d.hash(state),
            Value::Boolean(b) => b.hash(state),
            Value::Byte(b) => b.hash(state),
            Value::Sequence(s) => s.hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::String(s) => f.write_str(s),
            Value::Integer(v) => write!(f, "{v}"),
            Value::Long(v) | Value::Date(v) => write!(f, "{v}"),
            Value::Number(v) => write!(f, "{v}"),
            Value::Decimal(d) => write!(f, "{d}"),
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Byte(b) => {
                for byte in b {
                    write!(f, "{byte:02x}")?;
                }
                Ok(())
            }
            Value::Sequence(items) => write!(f, "[{}]", items.join(",")),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Long(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Number(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nulls_sort_first_and_numbers_compare_across_types() {
        assert_eq!(Value::Null.compare(&Value::Integer(-5)), Ordering::Less);
        assert_eq!(Value::Integer(3).compare(&Value::Long(3)), Ordering::Equal);
        assert_eq!(Value::Long(2).compare(&Value::Number(2.5)), Ordering::Less);
        let d = Value::Decimal(Decimal::new(150, 2));
        assert_eq!(d.compare(&Value::Integer(1)), Ordering::Greater);
        assert_eq!(d.compare(&Value::Integer(2)), Ordering::Less);
    }

    #[test]
    fn decimal_parse_display_and_rescale() {
        let d = Decimal::parse("-12.345", 2).expect("parse decimal");
        assert_eq!(d.to_string(), "-12.35");
        assert_eq!(Decimal::parse("0.5", 3).expect("parse").to_string(), "0.500");
        assert_eq!(Decimal::new(5, 2).to_string(), "0.05");
        assert_eq!(Decimal::new(100, 2), Decimal::new(1, 0));
        assert!(Decimal::parse("1.2.3", 2).is_err());
        let sum = Decimal::new(125, 2)
            .checked_add(&Decimal::new(3, 1))
            .expect("add");
        assert_eq!(sum.to_string(), "1.55");
    }

    #[test]
    fn equal_decimals_hash_identically() {
        use std::collections::HashSet;
        let mut set = HashSet::new();
        set.insert(Value::Decimal(Decimal::new(100, 2)));
        assert!(set.contains(&Value::Decimal(Decimal::new(1, 0))));
    }

    #[test]
    fn parse_and_coerce() {
        assert_eq!(
            Value::parse_as(&DataType::Boolean, "Yes").expect("bool"),
            Value::Boolean(true)
        );
        assert_eq!(
            Value::parse_as(&DataType::Sequence, "a, b").expect("seq"),
            Value::Sequence(vec!["a".into(), "b".into()])
        );
        assert!(Value::parse_as(&DataType::Integer, "x").is_err());

        assert_eq!(
            Value::Long(4).coerce_to(&DataType::Integer).expect("narrow"),
            Value::Integer(4)
        );
        assert!(Value::Long(i64::MAX)
            .coerce_to(&DataType::Integer)
            .is_err());
        assert_eq!(
            Value::Number(2.5)
                .coerce_to(&DataType::Decimal {
                    precision: 10,
                    scale: 1
                })
                .expect("to decimal"),
            Value::Decimal(Decimal::new(25, 1))
        );
        assert_eq!(
            Value::Integer(7).coerce_to(&DataType::String).expect("to string"),
            Value::String("7".into())
        );
    }

    #[test]
    fn json_conversion() {
        let v = Value::from_json(&DataType::Integer, &serde_json::json!(12)).expect("int");
        assert_eq!(v, Value::Integer(12));
        let v = Value::from_json(&DataType::Long, &serde_json::json!("12")).expect("long");
        assert_eq!(v, Value::Long(12));
        let v = Value::from_json(&DataType::Sequence, &serde_json::json!(["x", "y"]))
            .expect("seq");
        assert_eq!(v, Value::Sequence(vec!["x".into(), "y".into()]));
        assert!(Value::from_json(&DataType::Integer, &serde_json::json!(true)).is_err());
    }
}
