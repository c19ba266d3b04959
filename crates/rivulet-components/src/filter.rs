//! EXT_FILTER: pass records accepted by a `RecordFilter`.
//!
//! Rejected records go to output 1 when it is connected. Without a
//! collaborator the `predicate` attribute is used: `field OP literal` with
//! OP one of `==`, `!=`, `<=`, `>=`, `<`, `>`.

use std::cmp::Ordering;
use std::sync::Arc;

use rivulet_core::record::DataRecord;
use rivulet_core::schema::RecordMetadata;
use rivulet_core::value::Value;

use crate::attrs::Attrs;
use crate::error::{ComponentError, Result};
use crate::port::Ports;
use crate::traits::{Component, InitContext, RunContext};
use crate::transform::{RecordFilter, TransformError};

pub const TYPE: &str = "EXT_FILTER";

const PORT_ACCEPTED: usize = 0;
const PORT_REJECTED: usize = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    fn holds(self, ord: Ordering) -> bool {
        match self {
            CmpOp::Eq => ord == Ordering::Equal,
            CmpOp::Ne => ord != Ordering::Equal,
            CmpOp::Lt => ord == Ordering::Less,
            CmpOp::Le => ord != Ordering::Greater,
            CmpOp::Gt => ord == Ordering::Greater,
            CmpOp::Ge => ord != Ordering::Less,
        }
    }
}

/// `field OP literal`. The literal is parsed with the field's type once
/// the input metadata is known; a null field never matches.
#[derive(Debug, Clone)]
pub struct Predicate {
    field: String,
    op: CmpOp,
    literal: String,
    bound: Option<(usize, Value)>,
}

impl Predicate {
    pub fn parse(expr: &str) -> Result<Self> {
        // two-character operators first so "<=" is not read as "<"
        const OPS: [(&str, CmpOp); 6] = [
            ("==", CmpOp::Eq),
            ("!=", CmpOp::Ne),
            ("<=", CmpOp::Le),
            (">=", CmpOp::Ge),
            ("<", CmpOp::Lt),
            (">", CmpOp::Gt),
        ];
        for (token, op) in OPS {
            if let Some(pos) = expr.find(token) {
                let field = expr[..pos].trim();
                let literal = expr[pos + token.len()..].trim();
                if field.is_empty() {
                    break;
                }
                return Ok(Self {
                    field: field.to_string(),
                    op,
                    literal: literal.trim_matches('"').to_string(),
                    bound: None,
                });
            }
        }
        Err(ComponentError::config(format!("unparseable predicate: {expr}")))
    }
}

impl RecordFilter for Predicate {
    fn init(&mut self, metadata: &Arc<RecordMetadata>) -> std::result::Result<(), TransformError> {
        let idx = metadata.field_index(&self.field).ok_or_else(|| {
            TransformError::failed(format!("predicate field '{}' not found", self.field))
        })?;
        let dt = metadata.fields[idx].data_type;
        let literal = Value::parse_as(&dt, &self.literal)?;
        self.bound = Some((idx, literal));
        Ok(())
    }

    fn is_valid(&mut self, record: &DataRecord) -> std::result::Result<bool, TransformError> {
        let (idx, literal) = self
            .bound
            .as_ref()
            .ok_or_else(|| TransformError::failed("predicate used before init"))?;
        Ok(match record.get(*idx) {
            None | Some(Value::Null) => false,
            Some(v) => self.op.holds(v.compare(literal)),
        })
    }
}

pub struct ExtFilter {
    filter: Box<dyn RecordFilter>,
}

impl ExtFilter {
    pub fn new(filter: Box<dyn RecordFilter>) -> Self {
        Self { filter }
    }

    pub fn from_attrs(attrs: &Attrs<'_>) -> Result<Self> {
        Ok(Self::new(Box::new(Predicate::parse(
            attrs.require_str("predicate")?,
        )?)))
    }
}

impl Component for ExtFilter {
    fn type_tag(&self) -> &'static str {
        TYPE
    }

    fn init(&mut self, ctx: &InitContext<'_>) -> Result<()> {
        ctx.require_inputs(1, Some(1))?;
        ctx.require_outputs(1, Some(2))?;
        let meta = ctx.input(0)?;
        ctx.require_outputs_compatible(meta)?;
        self.filter.init(meta).map_err(ComponentError::config)
    }

    fn run(&mut self, ports: &mut Ports, ctx: &RunContext) -> Result<()> {
        let mut input = ports.take_input(0)?;
        let mut rec = DataRecord::new(Arc::clone(input.metadata()));
        let mut bytes = Vec::new();
        let reject = ports.has_output(PORT_REJECTED);
        while input.read_direct(&mut bytes)? {
            ctx.checkpoint()?;
            rec.deserialize_from(&bytes)?;
            if self.filter.is_valid(&rec)? {
                ports.output(PORT_ACCEPTED)?.write_direct(&bytes)?;
            } else if reject {
                ports.output(PORT_REJECTED)?.write_direct(&bytes)?;
            }
        }
        Ok(())
    }
}
