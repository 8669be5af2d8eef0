//! `$group`

use super::expect_object;
use crate::context::is_operator;
use crate::error::{bail, ensure, Result};
use crate::evaluator::compute_value;
use crate::lazy::Lazy;
use crate::options::{ComputeOptions, Options};
use crate::value::{group_by, Map, Value};
use tracing::trace;

const ID_KEY: &str = "_id";

/// Output field computed from a partition
pub(crate) struct GroupField {
    name: String,
    operator: String,
    args: Value,
}

/// Parse `{field: {<operator>: <args>}}` entries, skipping `_id`
pub(crate) fn parse_fields(spec: &Map, options: &Options) -> Result<Vec<GroupField>> {
    let mut fields = Vec::with_capacity(spec.len().saturating_sub(1));
    for (name, expr) in spec {
        if name == ID_KEY {
            continue;
        }
        ensure!(
            !name.contains('.'),
            "$group field name '{}' must not contain '.'",
            name
        );
        let operator = match expr {
            Value::Object(map) if map.len() == 1 => map.iter().next(),
            _ => None,
        };
        let Some((operator, args)) = operator.filter(|(op, _)| is_operator(op)) else {
            bail!("The field '{}' must specify exactly one accumulator operator", name);
        };
        ensure!(
            options.accumulator_operator(operator).is_some()
                || options.expression_operator(operator).is_some(),
            "unknown group operator '{}'",
            operator
        );
        fields.push(GroupField {
            name: name.clone(),
            operator: operator.clone(),
            args: args.clone(),
        });
    }
    Ok(fields)
}

fn accumulate(
    partition: &[Value],
    field: &GroupField,
    copts: &ComputeOptions<'_>,
) -> Result<Value> {
    if let Some(f) = copts.options().accumulator_operator(&field.operator) {
        return f(partition, &field.args, copts);
    }
    let collection = Value::Array(partition.to_vec());
    compute_value(&collection, &field.args, Some(&field.operator), copts)
}

/// Build `{_id, <field>: <accumulated>...}` for one partition
pub(crate) fn summarize(
    id: Value,
    partition: &[Value],
    fields: &[GroupField],
    options: &Options,
) -> Result<Value> {
    let copts = ComputeOptions::new(options).with_group_id(id.clone());
    let mut out = Map::with_capacity(fields.len() + 1);
    out.insert(ID_KEY.to_string(), id);
    for field in fields {
        let value = accumulate(partition, field, &copts)?;
        out.insert(field.name.clone(), value);
    }
    Ok(Value::Object(out))
}

/// Partition by `_id` and summarize each partition.
///
/// Partitions are emitted in the order their key was first seen. A missing
/// key groups with null.
pub fn group(collection: Lazy, expr: &Value, options: &Options) -> Result<Lazy> {
    let spec = expect_object("$group", expr)?;
    let Some(id_expr) = spec.get(ID_KEY).cloned() else {
        bail!("a group specification must include an _id");
    };
    let fields = parse_fields(spec, options)?;
    let options = options.clone();

    Ok(collection.flat_transform(move |values| {
        let partitions = group_by(
            values,
            |obj| {
                let key = compute_value(obj, &id_expr, None, &ComputeOptions::new(&options))?;
                Ok(if key.is_missing() { Value::Null } else { key })
            },
            options.hash_function(),
        )?;
        trace!(partitions = partitions.len(), "grouped input");

        Ok(Lazy::from_results(
            partitions
                .into_iter()
                .map(move |(id, partition)| summarize(id, &partition, &fields, &options)),
        ))
    }))
}
