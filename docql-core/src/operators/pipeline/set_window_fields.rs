//! `$setWindowFields`
//!
//! The input is sorted by `sortBy`, partitioned by `partitionBy` (in
//! first-seen order) and every output field is computed per document from
//! either the whole partition or the document's window slice. Accumulators
//! receive the slice as their collection; window operators additionally get
//! the document position and a cache that lives as long as the partition.

use super::{expect_object, sort_values};
use crate::context::{is_operator, AccumulatorOperator, WindowOperator};
use crate::error::{bail, ensure, EngineError, Result};
use crate::evaluator::compute_value;
use crate::lazy::Lazy;
use crate::operators::expression::date::add_date_units;
use crate::operators::window::{
    WindowCache, WindowOperatorInput, SORTED_OPERATORS, UNBOUNDED_OPERATORS,
};
use crate::options::{ComputeOptions, Options};
use crate::value::{group_by, remove_value, resolve, set_value, Map, Value};
use std::borrow::Cow;
use tracing::{trace, warn};

/// One edge of a window
#[derive(Debug, Clone, PartialEq)]
enum Bound {
    Current,
    Unbounded,
    Offset(f64),
}

impl Bound {
    fn parse(value: &Value, integral: bool) -> Result<Self> {
        match value {
            Value::String(s) if s == "current" => Ok(Self::Current),
            Value::String(s) if s == "unbounded" => Ok(Self::Unbounded),
            n if n.is_number() => {
                let offset = n.as_f64().unwrap_or_default();
                ensure!(
                    !integral || offset.fract() == 0.0,
                    "'documents' window bounds must be integers, found {}",
                    n
                );
                Ok(Self::Offset(offset))
            }
            other => bail!(
                "window bounds must be 'current', 'unbounded' or a number, found {}",
                other
            ),
        }
    }
}

/// Window of a single output field
#[derive(Debug, Clone, PartialEq)]
enum Window {
    Documents(Bound, Bound),
    Range {
        lower: Bound,
        upper: Bound,
        unit: Option<String>,
    },
}

impl Window {
    fn parse(spec: &Value) -> Result<Self> {
        let Value::Object(spec) = spec else {
            bail!("'window' option must be an object");
        };
        let bounds = |value: &Value, integral: bool| -> Result<(Bound, Bound)> {
            match value {
                Value::Array(items) if items.len() == 2 => Ok((
                    Bound::parse(&items[0], integral)?,
                    Bound::parse(&items[1], integral)?,
                )),
                _ => bail!("window bounds must be an array of two elements"),
            }
        };
        let unit = match spec.get("unit") {
            None => None,
            Some(Value::String(unit)) => Some(unit.clone()),
            Some(other) => bail!("window 'unit' must be a string, found {}", other),
        };
        match (spec.get("documents"), spec.get("range")) {
            (Some(documents), None) => {
                ensure!(unit.is_none(), "window 'unit' requires a 'range' window");
                let (lower, upper) = bounds(documents, true)?;
                Ok(Self::Documents(lower, upper))
            }
            (None, Some(range)) => {
                let (lower, upper) = bounds(range, false)?;
                Ok(Self::Range { lower, upper, unit })
            }
            _ => bail!("'window' option supports only one of 'documents' and 'range'."),
        }
    }

    fn is_unbounded(&self) -> bool {
        let (lower, upper) = match self {
            Self::Documents(lower, upper) => (lower, upper),
            Self::Range { lower, upper, .. } => (lower, upper),
        };
        *lower == Bound::Unbounded && *upper == Bound::Unbounded
    }
}

/// Operator behind an output field
#[derive(Clone, Copy)]
enum FieldOperator {
    Accumulator(AccumulatorOperator),
    Window(WindowOperator),
}

/// Compiled output field
struct OutputField {
    name: String,
    operator: String,
    args: Value,
    spec: Value,
    window: Option<Window>,
    f: FieldOperator,
}

fn parse_output(
    name: &str,
    spec: &Value,
    sort_by: Option<&Map>,
    options: &Options,
) -> Result<OutputField> {
    let Value::Object(map) = spec else {
        bail!("'output' field '{}' must be an object", name);
    };
    let operators: Vec<&String> = map.keys().filter(|k| is_operator(k)).collect();
    let valid_keys = map.keys().all(|k| is_operator(k) || k == "window");
    let [operator] = operators.as_slice() else {
        bail!("'output' option should have a single window operator.");
    };
    ensure!(valid_keys, "'output' option should have a single window operator.");
    let operator = operator.to_string();

    let f = match (
        options.accumulator_operator(&operator),
        options.window_operator(&operator),
    ) {
        (Some(f), _) => FieldOperator::Accumulator(f),
        (None, Some(f)) => FieldOperator::Window(f),
        (None, None) => bail!("'{}' is not a valid window operator", operator),
    };

    let window = map
        .get("window")
        .map(Window::parse)
        .transpose()?
        .filter(|w| !w.is_unbounded());
    ensure!(
        sort_by.is_some() || !SORTED_OPERATORS.contains(&operator.as_str()),
        "{} requires a 'sortBy'.",
        operator
    );
    ensure!(
        !map.contains_key("window") || !UNBOUNDED_OPERATORS.contains(&operator.as_str()),
        "{} does not accept a 'window' field.",
        operator
    );
    if let Some(Window::Range { .. }) = window {
        ensure!(
            sort_by.is_some_and(|s| s.len() == 1),
            "a 'range' window requires a 'sortBy' with exactly one field"
        );
    }

    Ok(OutputField {
        name: name.to_string(),
        args: map.get(&operator).cloned().unwrap_or(Value::Null),
        operator,
        spec: spec.clone(),
        window,
        f,
    })
}

/// Numeric position of a sort value; dates count in milliseconds
fn position(value: &Value) -> Option<f64> {
    match value {
        Value::DateTime(d) => Some(d.timestamp_millis() as f64),
        other if other.is_number() => other.as_f64(),
        _ => None,
    }
}

fn range_edge(current: &Value, bound: &Bound, unit: Option<&str>) -> Result<Option<f64>> {
    let offset = match bound {
        Bound::Unbounded => return Ok(None),
        Bound::Current => 0.0,
        Bound::Offset(n) => *n,
    };
    match (unit, current) {
        (Some(unit), Value::DateTime(date)) => {
            let shifted = add_date_units(*date, unit, offset as i64)?;
            Ok(Some(shifted.timestamp_millis() as f64))
        }
        (Some(_), other) => bail!(
            "a 'range' window with a 'unit' requires date sort values, found {}",
            other.type_name()
        ),
        (None, _) => match position(current) {
            Some(x) => Ok(Some(x + offset)),
            None => bail!(
                "a 'range' window requires numeric sort values, found {}",
                current.type_name()
            ),
        },
    }
}

/// Documents in the window of the document at `index`
fn window_slice<'p>(
    items: &'p [Value],
    index: usize,
    window: &Window,
    sort_field: Option<&str>,
) -> Result<Cow<'p, [Value]>> {
    match window {
        Window::Documents(lower, upper) => {
            let len = items.len() as i64;
            let i = index as i64;
            let begin = match lower {
                Bound::Current => i,
                Bound::Unbounded => 0,
                Bound::Offset(n) => i.saturating_add(*n as i64).max(0),
            };
            let end = match upper {
                Bound::Current => i + 1,
                Bound::Unbounded => len,
                Bound::Offset(n) => i.saturating_add(*n as i64).saturating_add(1).min(len),
            };
            let (begin, end) = (begin.min(len) as usize, end.max(0) as usize);
            let slice: &'p [Value] = if begin < end { &items[begin..end] } else { &[] };
            Ok(Cow::Borrowed(slice))
        }
        Window::Range { lower, upper, unit } => {
            let Some(field) = sort_field else {
                bail!("a 'range' window requires a 'sortBy'");
            };
            let current = resolve(&items[index], field);
            let lo = range_edge(&current, lower, unit.as_deref())?;
            let hi = range_edge(&current, upper, unit.as_deref())?;
            Ok(Cow::Owned(
                items
                    .iter()
                    .filter(|doc| {
                        position(&resolve(doc, field)).is_some_and(|x| {
                            lo.map_or(true, |lo| x >= lo) && hi.map_or(true, |hi| x <= hi)
                        })
                    })
                    .cloned()
                    .collect(),
            ))
        }
    }
}

/// Compute every output field for one partition
fn evaluate_partition(
    items: Vec<Value>,
    fields: &[OutputField],
    stage: &Value,
    sort_field: Option<&str>,
    options: &Options,
    cache: &WindowCache,
) -> Result<Vec<Value>> {
    let copts = ComputeOptions::new(options);
    let mut computed: Vec<Vec<Value>> = vec![Vec::with_capacity(fields.len()); items.len()];

    for field in fields {
        for (index, obj) in items.iter().enumerate() {
            let slice = match &field.window {
                Some(window) => window_slice(&items, index, window, sort_field),
                None => Ok(Cow::Borrowed(items.as_slice())),
            };
            let value = slice.and_then(|slice| match field.f {
                FieldOperator::Accumulator(f) => f(&slice, &field.args, &copts),
                FieldOperator::Window(f) => {
                    let input = WindowOperatorInput {
                        parent_expr: stage,
                        input_expr: &field.spec,
                        operator: &field.operator,
                        document_number: index + 1,
                        field: &field.name,
                        cache,
                    };
                    f(obj, &slice, &input, &copts)
                }
            });
            match value {
                Ok(value) => computed[index].push(value),
                Err(e) => {
                    if cache.evict(&field.name) {
                        warn!(field = %field.name, error = %e, "window cache evicted after failure");
                    }
                    cache.clear();
                    return Err(e);
                }
            }
        }
    }

    Ok(items
        .into_iter()
        .zip(computed)
        .map(|(mut obj, values)| {
            for (field, value) in fields.iter().zip(values) {
                if value.is_missing() {
                    remove_value(&mut obj, &field.name, false);
                } else {
                    set_value(&mut obj, &field.name, value);
                }
            }
            obj
        })
        .collect())
}

/// Add fields computed over partitions and windows
pub fn set_window_fields(collection: Lazy, expr: &Value, options: &Options) -> Result<Lazy> {
    let spec = expect_object("$setWindowFields", expr)?;
    let sort_by = match spec.get("sortBy") {
        None => None,
        Some(Value::Object(sort_by)) => Some(sort_by.clone()),
        Some(other) => bail!("$setWindowFields 'sortBy' must be an object, found {}", other),
    };
    let Some(Value::Object(output)) = spec.get("output") else {
        bail!("$setWindowFields requires an 'output' object");
    };
    let fields = output
        .iter()
        .map(|(name, field)| parse_output(name, field, sort_by.as_ref(), options))
        .collect::<Result<Vec<_>>>()?;
    let partition_by = spec.get("partitionBy").cloned().unwrap_or(Value::Null);
    let sort_field = sort_by
        .as_ref()
        .filter(|s| s.len() == 1)
        .and_then(|s| s.keys().next().cloned());
    let stage = expr.clone();
    let options = options.clone();
    trace!(fields = fields.len(), "attached $setWindowFields");

    Ok(collection.flat_transform(move |mut values| {
        if let Some(sort_by) = &sort_by {
            sort_values(&mut values, sort_by, &options)?;
        }
        let partitions = group_by(
            values,
            |obj| {
                let key = compute_value(obj, &partition_by, None, &ComputeOptions::new(&options))?;
                Ok(if key.is_missing() { Value::Null } else { key })
            },
            options.hash_function(),
        )?;
        trace!(partitions = partitions.len(), "partitioned window input");

        let results = partitions.into_iter().flat_map(move |(_, items)| {
            let cache = WindowCache::new();
            let sort_field = sort_field.as_deref();
            match evaluate_partition(items, &fields, &stage, sort_field, &options, &cache) {
                Ok(docs) => docs.into_iter().map(Ok).collect::<Vec<_>>(),
                Err(e) => vec![Err::<Value, EngineError>(e)],
            }
        });
        Ok(Lazy::from_results(results))
    }))
}
