//! Aggregate functions and their per-group accumulators.

use std::collections::HashSet;
use std::fmt;

use rivulet_core::record::DataRecord;
use rivulet_core::schema::{DataType, RecordMetadata};
use rivulet_core::value::{Decimal, Value};

use crate::error::{ComponentError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggFunction {
    /// `count()` counts records, `count(f)` counts non-null values of `f`.
    Count,
    Min,
    Max,
    Sum,
    Avg,
    /// Sample standard deviation; null for fewer than two values.
    Stdev,
    First,
    Last,
    CountDistinct,
}

impl AggFunction {
    pub fn parse(name: &str) -> Result<Self> {
        Ok(match name.trim().to_ascii_lowercase().as_str() {
            "count" => AggFunction::Count,
            "min" => AggFunction::Min,
            "max" => AggFunction::Max,
            "sum" => AggFunction::Sum,
            "avg" => AggFunction::Avg,
            "stdev" | "stddev" => AggFunction::Stdev,
            "first" => AggFunction::First,
            "last" => AggFunction::Last,
            "count_distinct" | "count_unique" => AggFunction::CountDistinct,
            other => {
                return Err(ComponentError::config(format!(
                    "unknown aggregate function '{other}'"
                )))
            }
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            AggFunction::Count => "count",
            AggFunction::Min => "min",
            AggFunction::Max => "max",
            AggFunction::Sum => "sum",
            AggFunction::Avg => "avg",
            AggFunction::Stdev => "stdev",
            AggFunction::First => "first",
            AggFunction::Last => "last",
            AggFunction::CountDistinct => "count_distinct",
        }
    }

    fn needs_input(self) -> bool {
        self != AggFunction::Count
    }

    fn needs_numeric(self) -> bool {
        matches!(self, AggFunction::Sum | AggFunction::Avg | AggFunction::Stdev)
    }

    /// Type of the result given the input field type.
    pub fn result_type(self, input: Option<DataType>) -> DataType {
        match (self, input) {
            (AggFunction::Count | AggFunction::CountDistinct, _) => DataType::Long,
            (AggFunction::Avg | AggFunction::Stdev, _) => DataType::Number,
            (AggFunction::Sum, Some(DataType::Integer | DataType::Long)) => DataType::Long,
            (_, Some(dt)) => dt,
            (_, None) => DataType::Long,
        }
    }
}

impl fmt::Display for AggFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One `output := function(input)` entry of an aggregate mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggSpec {
    pub output: String,
    pub function: AggFunction,
    pub input: Option<String>,
}

impl AggSpec {
    pub fn new(output: impl Into<String>, function: AggFunction, input: Option<&str>) -> Self {
        Self {
            output: output.into(),
            function,
            input: input.map(str::to_string),
        }
    }

    /// Parse `$out:=fn($in)`; the `$` sigils are optional.
    pub fn parse(s: &str) -> Result<Self> {
        let bad = || ComponentError::config(format!("malformed aggregate mapping '{s}'"));
        let (output, call) = s.split_once(":=").ok_or_else(bad)?;
        let output = output.trim().trim_start_matches('$').trim();
        let call = call.trim();
        let open = call.find('(').ok_or_else(bad)?;
        let inner = call.strip_suffix(')').ok_or_else(bad)?.get(open + 1..).ok_or_else(bad)?;
        if output.is_empty() {
            return Err(bad());
        }
        let function = AggFunction::parse(&call[..open])?;
        let input = inner.trim().trim_start_matches('$').trim();
        let input = (!input.is_empty()).then_some(input);
        if function.needs_input() && input.is_none() {
            return Err(ComponentError::config(format!(
                "aggregate function {function} needs an input field in '{s}'"
            )));
        }
        Ok(Self::new(output, function, input))
    }

    /// Parse a `;` separated list of mappings.
    pub fn parse_list(s: &str) -> Result<Vec<Self>> {
        s.split(';')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(Self::parse)
            .collect()
    }
}

/// A spec resolved against the input and output metadata.
#[derive(Debug, Clone)]
pub(crate) struct BoundFunction {
    pub function: AggFunction,
    pub input: Option<usize>,
    pub output: usize,
    pub output_type: DataType,
}

impl BoundFunction {
    pub fn bind(spec: &AggSpec, input: &RecordMetadata, output: &RecordMetadata) -> Result<Self> {
        let in_idx = match &spec.input {
            Some(name) => Some(input.field_index(name).ok_or_else(|| {
                ComponentError::config(format!(
                    "aggregate input field '{name}' not found in '{}'",
                    input.name
                ))
            })?),
            None => None,
        };
        if spec.function.needs_numeric() {
            let dt = in_idx.and_then(|i| input.field(i)).map(|f| f.data_type);
            if !dt.is_some_and(|dt| dt.is_numeric()) {
                return Err(ComponentError::config(format!(
                    "{} requires a numeric input field, '{}' is not",
                    spec.function,
                    spec.input.as_deref().unwrap_or_default()
                )));
            }
        }
        let out_idx = output.field_index(&spec.output).ok_or_else(|| {
            ComponentError::config(format!(
                "aggregate output field '{}' not found in '{}'",
                spec.output, output.name
            ))
        })?;
        let output_type = output.fields[out_idx].data_type;
        Ok(Self {
            function: spec.function,
            input: in_idx,
            output: out_idx,
            output_type,
        })
    }

    pub fn accumulator(&self) -> Accumulator {
        match self.function {
            AggFunction::Count => Accumulator::Count(0),
            AggFunction::Min => Accumulator::Min(Value::Null),
            AggFunction::Max => Accumulator::Max(Value::Null),
            AggFunction::Sum => Accumulator::Sum(Sum::Empty),
            AggFunction::Avg => Accumulator::Avg { sum: 0.0, n: 0 },
            AggFunction::Stdev => Accumulator::Stdev {
                n: 0,
                mean: 0.0,
                m2: 0.0,
            },
            AggFunction::First => Accumulator::First(None),
            AggFunction::Last => Accumulator::Last(Value::Null),
            AggFunction::CountDistinct => Accumulator::Distinct(HashSet::new()),
        }
    }

    pub fn update(&self, acc: &mut Accumulator, record: &DataRecord) -> Result<()> {
        let value = match self.input {
            Some(idx) => record.get(idx).unwrap_or(&Value::Null),
            None => {
                if let Accumulator::Count(n) = acc {
                    *n += 1;
                }
                return Ok(());
            }
        };
        acc.update(value)
    }

    /// Write the accumulator's result into `out`, converted to the output
    /// field's type.
    pub fn write(&self, acc: &Accumulator, out: &mut DataRecord) -> Result<()> {
        let v = acc.result().coerce_to(&self.output_type)?;
        out.set(self.output, v)?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub(crate) enum Sum {
    Empty,
    Int(i64),
    Float(f64),
    Dec(Decimal),
}

#[derive(Debug, Clone)]
pub(crate) enum Accumulator {
    Count(u64),
    Min(Value),
    Max(Value),
    Sum(Sum),
    Avg { sum: f64, n: u64 },
    // Welford's running mean and sum of squared deviations
    Stdev { n: u64, mean: f64, m2: f64 },
    First(Option<Value>),
    Last(Value),
    Distinct(HashSet<Value>),
}

fn overflow(what: &str) -> ComponentError {
    ComponentError::Io(format!("{what} overflow while aggregating"))
}

impl Accumulator {
    fn update(&mut self, value: &Value) -> Result<()> {
        match self {
            Accumulator::First(slot) => {
                if slot.is_none() {
                    *slot = Some(value.clone());
                }
                return Ok(());
            }
            Accumulator::Last(slot) => {
                *slot = value.clone();
                return Ok(());
            }
            _ => {}
        }
        if value.is_null() {
            return Ok(());
        }
        match self {
            Accumulator::Count(n) => *n += 1,
            Accumulator::Min(cur) => {
                if cur.is_null() || value.compare(cur).is_lt() {
                    *cur = value.clone();
                }
            }
            Accumulator::Max(cur) => {
                if cur.is_null() || value.compare(cur).is_gt() {
                    *cur = value.clone();
                }
            }
            Accumulator::Sum(sum) => {
                *sum = match (&*sum, value) {
                    (Sum::Empty, Value::Decimal(d)) => Sum::Dec(*d),
                    (Sum::Empty, Value::Number(f)) => Sum::Float(*f),
                    (Sum::Empty, v) => Sum::Int(v.as_i64().ok_or_else(|| overflow("sum"))?),
                    (Sum::Int(a), v) => match v.as_i64() {
                        Some(b) => Sum::Int(a.checked_add(b).ok_or_else(|| overflow("long sum"))?),
                        None => Sum::Float(*a as f64 + v.as_f64().unwrap_or_default()),
                    },
                    (Sum::Float(a), v) => Sum::Float(a + v.as_f64().unwrap_or_default()),
                    (Sum::Dec(a), Value::Decimal(b)) => {
                        Sum::Dec(a.checked_add(b).ok_or_else(|| overflow("decimal sum"))?)
                    }
                    (Sum::Dec(a), v) => Sum::Float(a.to_f64() + v.as_f64().unwrap_or_default()),
                };
            }
            Accumulator::Avg { sum, n } => {
                *sum += value.as_f64().unwrap_or_default();
                *n += 1;
            }
            Accumulator::Stdev { n, mean, m2 } => {
                let x = value.as_f64().unwrap_or_default();
                *n += 1;
                let delta = x - *mean;
                *mean += delta / *n as f64;
                *m2 += delta * (x - *mean);
            }
            Accumulator::Distinct(set) => {
                set.insert(value.clone());
            }
            Accumulator::First(_) | Accumulator::Last(_) => {}
        }
        Ok(())
    }

    fn result(&self) -> Value {
        match self {
            Accumulator::Count(n) => Value::Long(*n as i64),
            Accumulator::Min(v) | Accumulator::Max(v) | Accumulator::Last(v) => v.clone(),
            Accumulator::First(v) => v.clone().unwrap_or(Value::Null),
            Accumulator::Sum(Sum::Empty) => Value::Null,
            Accumulator::Sum(Sum::Int(v)) => Value::Long(*v),
            Accumulator::Sum(Sum::Float(v)) => Value::Number(*v),
            Accumulator::Sum(Sum::Dec(v)) => Value::Decimal(*v),
            Accumulator::Avg { n: 0, .. } => Value::Null,
            Accumulator::Avg { sum, n } => Value::Number(sum / *n as f64),
            Accumulator::Stdev { n, m2, .. } if *n > 1 => Value::Number((m2 / (*n - 1) as f64).sqrt()),
            Accumulator::Stdev { .. } => Value::Null,
            Accumulator::Distinct(set) => Value::Long(set.len() as i64),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_mapping_with_and_without_sigils() {
        let spec = AggSpec::parse("$total:=sum($amount)").expect("parse");
        assert_eq!(spec, AggSpec::new("total", AggFunction::Sum, Some("amount")));
        let spec = AggSpec::parse(" n := count() ").expect("parse");
        assert_eq!(spec, AggSpec::new("n", AggFunction::Count, None));

        let list = AggSpec::parse_list("a:=min(x); b:=count_unique(y);").expect("list");
        assert_eq!(list.len(), 2);
        assert_eq!(list[1].function, AggFunction::CountDistinct);
    }

    #[test]
    fn rejects_malformed_mappings() {
        assert!(AggSpec::parse("total=sum(x)").is_err());
        assert!(AggSpec::parse("total:=median(x)").is_err());
        assert!(AggSpec::parse("total:=sum()").is_err());
        assert!(AggSpec::parse(":=count()").is_err());
    }

    fn feed(acc: &mut Accumulator, values: &[Value]) {
        for v in values {
            acc.update(v).expect("update");
        }
    }

    #[test]
    fn sample_stdev() {
        let mut acc = Accumulator::Stdev {
            n: 0,
            mean: 0.0,
            m2: 0.0,
        };
        feed(&mut acc, &[Value::Number(2.0)]);
        assert!(acc.result().is_null());
        feed(
            &mut acc,
            &[4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0].map(Value::Number),
        );
        let Value::Number(sd) = acc.result() else {
            panic!("expected a number");
        };
        // sample stdev of 2,4,4,4,5,5,7,9
        assert!((sd - 2.138_089_935).abs() < 1e-6);
    }

    #[test]
    fn nulls_are_ignored_except_by_first_and_last() {
        let vals = [Value::Null, Value::Integer(3), Value::Integer(1), Value::Null];
        let mut sum = Accumulator::Sum(Sum::Empty);
        let mut min = Accumulator::Min(Value::Null);
        let mut first = Accumulator::First(None);
        let mut last = Accumulator::Last(Value::Null);
        let mut distinct = Accumulator::Distinct(HashSet::new());
        for acc in [&mut sum, &mut min, &mut first, &mut last, &mut distinct] {
            feed(acc, &vals);
        }
        assert_eq!(sum.result(), Value::Long(4));
        assert_eq!(min.result(), Value::Integer(1));
        assert!(first.result().is_null());
        assert!(last.result().is_null());
        assert_eq!(distinct.result(), Value::Long(2));

        let mut empty = Accumulator::Sum(Sum::Empty);
        feed(&mut empty, &[Value::Null]);
        assert!(empty.result().is_null());
    }

    #[test]
    fn long_sum_overflow_is_an_error() {
        let mut acc = Accumulator::Sum(Sum::Empty);
        feed(&mut acc, &[Value::Long(i64::MAX)]);
        assert!(acc.update(&Value::Long(1)).is_err());
    }
}
