//! Stable hashing of key values for partitioning and hash keys.
//!
//! Partition routing must not depend on the process (std's `RandomState` is
//! seeded per process), so key values are hashed with blake3.

use blake3::Hasher;

use crate::value::Value;

/// Stable 64-bit hash of a key projection.
///
/// Integral values hash through a common i64 form so an Integer key on one
/// side and a Long key on the other route identically.
pub fn hash_values(values: &[Value]) -> u64 {
    let mut hasher = Hasher::new();
    for v in values {
        hash_value(v, &mut hasher);
    }
    let out = hasher.finalize();
    let mut first = [0u8; 8];
    first.copy_from_slice(&out.as_bytes()[0..8]);
    u64::from_le_bytes(first)
}

fn hash_value(v: &Value, hasher: &mut Hasher) {
    match v {
        Value::Null => {
            hasher.update(&[0]);
        }
        Value::Boolean(b) => {
            hasher.update(&[1, u8::from(*b)]);
        }
        Value::Integer(_) | Value::Long(_) => {
            hasher.update(&[2]);
            hasher.update(&v.as_i64().unwrap_or_default().to_le_bytes());
        }
        Value::Number(f) => {
            hasher.update(&[3]);
            hasher.update(&f.to_bits().to_le_bytes());
        }
        Value::Decimal(d) => {
            // normalise so 1.50 and 1.5 agree
            let mut unscaled = d.unscaled();
            let mut scale = d.scale();
            while scale > 0 && unscaled % 10 == 0 {
                unscaled /= 10;
                scale -= 1;
            }
            hasher.update(&[4, scale]);
            hasher.update(&unscaled.to_le_bytes());
        }
        Value::Date(ms) => {
            hasher.update(&[5]);
            hasher.update(&ms.to_le_bytes());
        }
        Value::String(s) => {
            hasher.update(&[6]);
            hasher.update(&(s.len() as u64).to_le_bytes());
            hasher.update(s.as_bytes());
        }
        Value::Byte(b) => {
            hasher.update(&[7]);
            hasher.update(&(b.len() as u64).to_le_bytes());
            hasher.update(b);
        }
        Value::Sequence(items) => {
            hasher.update(&[8]);
            hasher.update(&(items.len() as u64).to_le_bytes());
            for item in items {
                hasher.update(&(item.len() as u64).to_le_bytes());
                hasher.update(item.as_bytes());
            }
        }
    }
}
