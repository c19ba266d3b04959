//! Joins over a driver (port 0) and a slave (port 1) input.

pub mod hash;
pub mod intersection;
pub mod merge;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use rivulet_core::key::{KeyField, RecordKey};
use rivulet_core::schema::RecordMetadata;

use crate::attrs::Attrs;
use crate::error::{ComponentError, Result};

pub use hash::HashJoin;
pub use intersection::DataIntersection;
pub use merge::MergeJoin;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinType {
    #[default]
    Inner,
    /// Unmatched driver records are emitted with a null slave.
    LeftOuter,
    /// Unmatched records of either side are emitted.
    FullOuter,
}

impl JoinType {
    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "inner" => Ok(JoinType::Inner),
            "left_outer" | "left" | "leftouter" => Ok(JoinType::LeftOuter),
            "full_outer" | "full" | "fullouter" => Ok(JoinType::FullOuter),
            other => Err(ComponentError::config(format!("unknown join type '{other}'"))),
        }
    }

    pub fn emits_unmatched_driver(self) -> bool {
        matches!(self, JoinType::LeftOuter | JoinType::FullOuter)
    }

    pub fn emits_unmatched_slave(self) -> bool {
        self == JoinType::FullOuter
    }

    pub(crate) fn from_attrs(attrs: &Attrs<'_>) -> Result<Self> {
        match attrs.str("join_type")? {
            Some(s) => Self::parse(s),
            None if attrs.bool("left_outer_join", false)? => Ok(JoinType::LeftOuter),
            None => Ok(JoinType::Inner),
        }
    }
}

/// Key configuration shared by the join components.
#[derive(Debug, Clone)]
pub struct JoinKeys {
    pub driver: Vec<KeyField>,
    /// Slave field names when they differ from the driver's.
    pub slave: Option<Vec<KeyField>>,
    pub equal_nulls: bool,
}

impl JoinKeys {
    pub fn new(driver: Vec<KeyField>) -> Self {
        Self {
            driver,
            slave: None,
            equal_nulls: true,
        }
    }

    pub(crate) fn from_attrs(attrs: &Attrs<'_>) -> Result<Self> {
        Ok(Self {
            driver: attrs.require_key("key")?,
            slave: attrs.key("slave_key")?,
            equal_nulls: attrs.bool("equal_nulls", true)?,
        })
    }

    /// Bind the keys to the port schemas and check they compare positionally.
    pub(crate) fn resolve(
        &self,
        driver: &Arc<RecordMetadata>,
        slave: &Arc<RecordMetadata>,
    ) -> Result<(RecordKey, RecordKey)> {
        let slave_fields = self.slave.as_deref().unwrap_or(&self.driver);
        let dk = RecordKey::new(driver, &self.driver)
            .map_err(ComponentError::config)?
            .with_equal_nulls(self.equal_nulls);
        let sk = RecordKey::new(slave, slave_fields)
            .map_err(ComponentError::config)?
            .with_equal_nulls(self.equal_nulls);
        dk.check_comparable(&sk).map_err(ComponentError::config)?;
        Ok((dk, sk))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rivulet_core::schema::{DataType, FieldMetadata};

    #[test]
    fn join_type_names() {
        assert_eq!(JoinType::parse("left-outer").expect("parse"), JoinType::LeftOuter);
        assert_eq!(JoinType::parse("FULL_OUTER").expect("parse"), JoinType::FullOuter);
        assert!(JoinType::parse("cross").is_err());
    }

    #[test]
    fn slave_key_override_and_type_check() {
        let d = Arc::new(RecordMetadata::new(
            "d",
            vec![FieldMetadata::new("id", DataType::Integer)],
        ));
        let s = Arc::new(RecordMetadata::new(
            "s",
            vec![
                FieldMetadata::new("name", DataType::String),
                FieldMetadata::new("cust_id", DataType::Integer),
            ],
        ));
        let mut keys = JoinKeys::new(vec![KeyField::asc("id")]);
        assert!(keys.resolve(&d, &s).is_err(), "slave has no 'id'");

        keys.slave = Some(vec![KeyField::asc("cust_id")]);
        let (_, sk) = keys.resolve(&d, &s).expect("resolve");
        assert_eq!(sk.field_indices(), &[1]);

        keys.slave = Some(vec![KeyField::asc("name")]);
        assert!(keys.resolve(&d, &s).is_err(), "integer vs string");
    }
}
