//! User logic plugged into components: transforms, filters and generators.
//!
//! Implementations are plain trait objects resolved when the graph is built.
//! `transform` fills the output records and says where they go.

use std::sync::Arc;

use thiserror::Error;

use rivulet_core::record::DataRecord;
use rivulet_core::schema::RecordMetadata;

use crate::context::GraphContext;
use crate::error::{ComponentError, Result};
use crate::port::Ports;

#[derive(Debug, Error)]
pub enum TransformError {
    #[error("{0}")]
    Failed(String),

    #[error(transparent)]
    Record(#[from] rivulet_core::error::Error),
}

impl TransformError {
    pub fn failed(msg: impl Into<String>) -> Self {
        TransformError::Failed(msg.into())
    }
}

/// Routing decision returned by `RecordTransform::transform`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformOutcome {
    /// Output record `i` goes to output port `i`.
    All,
    /// Only output record `n` goes out, to port `n`.
    Port(usize),
    /// Nothing is written for this call.
    Skip,
}

pub struct TransformInit<'a> {
    pub params: &'a serde_json::Value,
    pub inputs: &'a [Arc<RecordMetadata>],
    pub outputs: &'a [Arc<RecordMetadata>],
    pub graph: &'a GraphContext,
}

pub trait RecordTransform: Send {
    fn init(&mut self, _ctx: &TransformInit<'_>) -> std::result::Result<(), TransformError> {
        Ok(())
    }

    /// `inputs[i]` is `None` on the unmatched side of an outer join.
    fn transform(
        &mut self,
        inputs: &[Option<&DataRecord>],
        outputs: &mut [DataRecord],
    ) -> std::result::Result<TransformOutcome, TransformError>;

    /// Detail for the last failure, if the transform keeps one.
    fn message(&self) -> Option<String> {
        None
    }

    /// Called once after the last record.
    fn finished(&mut self) {}

    fn reset(&mut self) {}

    fn signal(&mut self, _signal: &serde_json::Value) {}

    fn semi_result(&self) -> Option<serde_json::Value> {
        None
    }
}

pub trait RecordFilter: Send {
    fn init(&mut self, _metadata: &Arc<RecordMetadata>) -> std::result::Result<(), TransformError> {
        Ok(())
    }

    fn is_valid(&mut self, record: &DataRecord) -> std::result::Result<bool, TransformError>;
}

pub trait RecordGenerate: Send {
    fn init(&mut self, _ctx: &TransformInit<'_>) -> std::result::Result<(), TransformError> {
        Ok(())
    }

    /// Fill `outputs` with the next record(s). `Ok(None)` ends generation.
    fn generate(
        &mut self,
        outputs: &mut [DataRecord],
    ) -> std::result::Result<Option<TransformOutcome>, TransformError>;
}

/// Closure-backed transform.
pub struct FnTransform<F>(F);

pub fn transform_fn<F>(f: F) -> FnTransform<F>
where
    F: FnMut(&[Option<&DataRecord>], &mut [DataRecord]) -> std::result::Result<TransformOutcome, TransformError>
        + Send,
{
    FnTransform(f)
}

impl<F> RecordTransform for FnTransform<F>
where
    F: FnMut(&[Option<&DataRecord>], &mut [DataRecord]) -> std::result::Result<TransformOutcome, TransformError>
        + Send,
{
    fn transform(
        &mut self,
        inputs: &[Option<&DataRecord>],
        outputs: &mut [DataRecord],
    ) -> std::result::Result<TransformOutcome, TransformError> {
        (self.0)(inputs, outputs)
    }
}

/// Closure-backed filter.
pub struct FnFilter<F>(F);

pub fn filter_fn<F>(f: F) -> FnFilter<F>
where
    F: FnMut(&DataRecord) -> bool + Send,
{
    FnFilter(f)
}

impl<F> RecordFilter for FnFilter<F>
where
    F: FnMut(&DataRecord) -> bool + Send,
{
    fn is_valid(&mut self, record: &DataRecord) -> std::result::Result<bool, TransformError> {
        Ok((self.0)(record))
    }
}

/// Closure-backed generator.
pub struct FnGenerate<F>(F);

pub fn generate_fn<F>(f: F) -> FnGenerate<F>
where
    F: FnMut(&mut [DataRecord]) -> std::result::Result<Option<TransformOutcome>, TransformError> + Send,
{
    FnGenerate(f)
}

impl<F> RecordGenerate for FnGenerate<F>
where
    F: FnMut(&mut [DataRecord]) -> std::result::Result<Option<TransformOutcome>, TransformError> + Send,
{
    fn generate(
        &mut self,
        outputs: &mut [DataRecord],
    ) -> std::result::Result<Option<TransformOutcome>, TransformError> {
        (self.0)(outputs)
    }
}

/// Copies same-named fields from the inputs into every output. Earlier
/// inputs win on name clashes.
#[derive(Debug, Default, Clone, Copy)]
pub struct CopyByName;

impl RecordTransform for CopyByName {
    fn transform(
        &mut self,
        inputs: &[Option<&DataRecord>],
        outputs: &mut [DataRecord],
    ) -> std::result::Result<TransformOutcome, TransformError> {
        for out in outputs.iter_mut() {
            for rec in inputs.iter().rev().flatten() {
                out.copy_fields_by_name(rec)?;
            }
        }
        Ok(TransformOutcome::All)
    }
}

/// Run one transform call and write its outputs according to the outcome.
///
/// Outputs are reset before the call. A failure carries the transform's own
/// message when it has one.
pub(crate) fn apply(
    transform: &mut dyn RecordTransform,
    inputs: &[Option<&DataRecord>],
    outputs: &mut [DataRecord],
    ports: &mut Ports,
) -> Result<()> {
    for out in outputs.iter_mut() {
        out.reset();
    }
    let outcome = transform.transform(inputs, outputs).map_err(|e| {
        ComponentError::Transform(transform.message().unwrap_or_else(|| e.to_string()))
    })?;
    route(outcome, outputs, ports)
}

pub(crate) fn route(outcome: TransformOutcome, outputs: &[DataRecord], ports: &mut Ports) -> Result<()> {
    match outcome {
        TransformOutcome::Skip => Ok(()),
        TransformOutcome::All => {
            for (i, rec) in outputs.iter().enumerate() {
                if ports.has_output(i) {
                    ports.output(i)?.write(rec)?;
                }
            }
            Ok(())
        }
        TransformOutcome::Port(n) => {
            let rec = outputs.get(n).ok_or_else(|| {
                ComponentError::Transform(format!("transform routed to unknown output port {n}"))
            })?;
            if ports.has_output(n) {
                ports.output(n)?.write(rec)?;
            }
            Ok(())
        }
    }
}
