//! Date arithmetic operators and the shared date-delta helper

use crate::error::{bail, EngineError, Result};
use crate::evaluator::compute_value;
use crate::options::ComputeOptions;
use crate::value::Value;
use chrono::{DateTime, Duration, Months, Utc};

/// Shift a date by `amount` units; calendar units keep the day of month
/// where possible.
pub(crate) fn add_date_units(date: DateTime<Utc>, unit: &str, amount: i64) -> Result<DateTime<Utc>> {
    let overflow = || EngineError::assertion(format!("date overflow adding {} {}", amount, unit));
    let months = |n: i64| -> Result<DateTime<Utc>> {
        let count = u32::try_from(n.unsigned_abs()).map_err(|_| overflow())?;
        let shifted = if n >= 0 {
            date.checked_add_months(Months::new(count))
        } else {
            date.checked_sub_months(Months::new(count))
        };
        shifted.ok_or_else(overflow)
    };
    let delta = match unit {
        "year" => return months(amount.checked_mul(12).ok_or_else(overflow)?),
        "quarter" => return months(amount.checked_mul(3).ok_or_else(overflow)?),
        "month" => return months(amount),
        "week" => Duration::try_weeks(amount),
        "day" => Duration::try_days(amount),
        "hour" => Duration::try_hours(amount),
        "minute" => Duration::try_minutes(amount),
        "second" => Duration::try_seconds(amount),
        "millisecond" => Duration::try_milliseconds(amount),
        other => bail!("unsupported date unit '{}'", other),
    };
    delta
        .and_then(|d| date.checked_add_signed(d))
        .ok_or_else(overflow)
}

fn shift(
    name: &str,
    obj: &Value,
    expr: &Value,
    options: &ComputeOptions<'_>,
    sign: i64,
) -> Result<Value> {
    let Some(spec) = expr.as_object() else {
        bail!("{} expects an object", name);
    };
    let field = |key: &str| -> Result<Value> {
        match spec.get(key) {
            Some(e) => compute_value(obj, e, None, options),
            None => bail!("{} requires '{}'", name, key),
        }
    };
    let (start, unit, amount) = (field("startDate")?, field("unit")?, field("amount")?);
    if start.is_nil() || unit.is_nil() || amount.is_nil() {
        return Ok(Value::Null);
    }
    let Some(date) = start.as_datetime() else {
        bail!("{} 'startDate' must be a date, got {}", name, start.type_name());
    };
    let Some(unit) = unit.as_str() else {
        bail!("{} 'unit' must be a string", name);
    };
    let Some(amount) = amount.as_i64() else {
        bail!("{} 'amount' must be an integer", name);
    };
    add_date_units(*date, unit, sign * amount).map(Value::DateTime)
}

pub fn date_add(obj: &Value, expr: &Value, options: &ComputeOptions<'_>) -> Result<Value> {
    shift("$dateAdd", obj, expr, options, 1)
}

pub fn date_subtract(obj: &Value, expr: &Value, options: &ComputeOptions<'_>) -> Result<Value> {
    shift("$dateSubtract", obj, expr, options, -1)
}
