//! Arithmetic expression operators

use super::{compute_args, compute_single};
use crate::error::{bail, ensure, Result};
use crate::operators::{add_numbers, multiply_numbers, normalize_number};
use crate::options::ComputeOptions;
use crate::value::Value;
use chrono::Duration;

pub fn add(obj: &Value, expr: &Value, options: &ComputeOptions<'_>) -> Result<Value> {
    let args = compute_args(obj, expr, options)?;
    let mut total = Value::Int64(0);
    let mut date = None;
    for arg in &args {
        match arg {
            Value::Missing | Value::Null => return Ok(Value::Null),
            Value::DateTime(d) => {
                ensure!(date.is_none(), "$add only supports one date argument");
                date = Some(*d);
            }
            n if n.is_number() => total = add_numbers(&total, n).unwrap_or(total),
            other => bail!("$add only supports numeric or date types, got {}", other.type_name()),
        }
    }
    match date {
        Some(d) => {
            let millis = total.as_f64().unwrap_or(0.0).round() as i64;
            Ok(Value::DateTime(d + Duration::milliseconds(millis)))
        }
        None => Ok(total),
    }
}

pub fn subtract(obj: &Value, expr: &Value, options: &ComputeOptions<'_>) -> Result<Value> {
    let args = compute_args(obj, expr, options)?;
    let [a, b] = args.as_slice() else {
        bail!("$subtract expects an array of 2 arguments");
    };
    match (a, b) {
        (x, y) if x.is_nil() || y.is_nil() => Ok(Value::Null),
        (Value::DateTime(x), Value::DateTime(y)) => {
            Ok(Value::Int64((*x - *y).num_milliseconds()))
        }
        (Value::DateTime(x), n) if n.is_number() => {
            let millis = n.as_f64().unwrap_or(0.0).round() as i64;
            Ok(Value::DateTime(*x - Duration::milliseconds(millis)))
        }
        (Value::DateTime(_), other) => bail!(
            "$subtract can only subtract a number or a date from a date, got {}",
            other.type_name()
        ),
        (Value::Int64(x), Value::Int64(y)) => Ok(x
            .checked_sub(*y)
            .map(Value::Int64)
            .unwrap_or(Value::Float64(*x as f64 - *y as f64))),
        (x, y) if x.is_number() && y.is_number() => Ok(Value::Float64(
            x.as_f64().unwrap_or(0.0) - y.as_f64().unwrap_or(0.0),
        )),
        (x, Value::DateTime(_)) if x.is_number() => {
            bail!("$subtract cannot subtract a date from a number")
        }
        (x, y) => bail!(
            "$subtract only supports numeric or date types, got {} and {}",
            x.type_name(),
            y.type_name()
        ),
    }
}

pub fn multiply(obj: &Value, expr: &Value, options: &ComputeOptions<'_>) -> Result<Value> {
    let args = compute_args(obj, expr, options)?;
    let mut product = Value::Int64(1);
    for arg in &args {
        if arg.is_nil() {
            return Ok(Value::Null);
        }
        ensure!(arg.is_number(), "$multiply only supports numeric types, got {}", arg.type_name());
        product = multiply_numbers(&product, arg).unwrap_or(product);
    }
    Ok(product)
}

pub fn divide(obj: &Value, expr: &Value, options: &ComputeOptions<'_>) -> Result<Value> {
    let args = compute_args(obj, expr, options)?;
    let [a, b] = args.as_slice() else {
        bail!("$divide expects an array of 2 arguments");
    };
    if a.is_nil() || b.is_nil() {
        return Ok(Value::Null);
    }
    let (Some(x), Some(y)) = (a.as_f64(), b.as_f64()) else {
        bail!("$divide only supports numeric types");
    };
    ensure!(y != 0.0, "$divide cannot divide by zero");
    Ok(Value::Float64(x / y))
}

pub fn modulo(obj: &Value, expr: &Value, options: &ComputeOptions<'_>) -> Result<Value> {
    let args = compute_args(obj, expr, options)?;
    let [a, b] = args.as_slice() else {
        bail!("$mod expects an array of 2 arguments");
    };
    if a.is_nil() || b.is_nil() {
        return Ok(Value::Null);
    }
    match (a, b) {
        (Value::Int64(x), Value::Int64(y)) => {
            ensure!(*y != 0, "$mod cannot divide by zero");
            Ok(Value::Int64(x.wrapping_rem(*y)))
        }
        _ => {
            let (Some(x), Some(y)) = (a.as_f64(), b.as_f64()) else {
                bail!("$mod only supports numeric types");
            };
            ensure!(y != 0.0, "$mod cannot divide by zero");
            Ok(Value::Float64(x % y))
        }
    }
}

fn unary(
    name: &str,
    obj: &Value,
    expr: &Value,
    options: &ComputeOptions<'_>,
    int_op: fn(i64) -> Option<i64>,
    float_op: fn(f64) -> f64,
) -> Result<Value> {
    match compute_single(obj, expr, options)? {
        Value::Missing | Value::Null => Ok(Value::Null),
        Value::Int64(i) => Ok(int_op(i)
            .map(Value::Int64)
            .unwrap_or_else(|| Value::Float64(float_op(i as f64)))),
        Value::Float64(f) => Ok(Value::Float64(float_op(f))),
        other => bail!("{} only supports numeric types, got {}", name, other.type_name()),
    }
}

pub fn abs(obj: &Value, expr: &Value, options: &ComputeOptions<'_>) -> Result<Value> {
    unary("$abs", obj, expr, options, i64::checked_abs, f64::abs)
}

pub fn ceil(obj: &Value, expr: &Value, options: &ComputeOptions<'_>) -> Result<Value> {
    unary("$ceil", obj, expr, options, Some, f64::ceil)
}

pub fn floor(obj: &Value, expr: &Value, options: &ComputeOptions<'_>) -> Result<Value> {
    unary("$floor", obj, expr, options, Some, f64::floor)
}

/// Round half to even at `place` decimal digits
fn round_half_even(x: f64, place: i32) -> f64 {
    let half_even = |scaled: f64| {
        if (scaled - scaled.trunc()).abs() == 0.5 {
            2.0 * (scaled / 2.0).round()
        } else {
            scaled.round()
        }
    };
    if place >= 0 {
        let scale = 10f64.powi(place);
        half_even(x * scale) / scale
    } else {
        let scale = 10f64.powi(-place);
        half_even(x / scale) * scale
    }
}

pub fn round(obj: &Value, expr: &Value, options: &ComputeOptions<'_>) -> Result<Value> {
    let args = compute_args(obj, expr, options)?;
    let (num, place) = match args.as_slice() {
        [num] => (num, 0),
        [num, place] => match place.as_i64() {
            Some(p) if (-20..100).contains(&p) => (num, p as i32),
            _ => bail!("$round place must be an integer between -20 and 100"),
        },
        _ => bail!("$round expects 1 or 2 arguments"),
    };
    match num {
        Value::Missing | Value::Null => Ok(Value::Null),
        Value::Int64(i) if place >= 0 => Ok(Value::Int64(*i)),
        Value::Int64(i) => Ok(normalize_number(round_half_even(*i as f64, place))),
        Value::Float64(f) => Ok(Value::Float64(round_half_even(*f, place))),
        other => bail!("$round only supports numeric types, got {}", other.type_name()),
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_util::{eval, v};
    use crate::value::Value;
    use serde_json::json;

    #[test]
    fn test_add_and_multiply() {
        assert_eq!(eval(json!({"a": 2}), json!({"$add": ["$a", 3]})).unwrap(), Value::Int64(5));
        assert_eq!(eval(json!({}), json!({"$add": [1, 0.5]})).unwrap(), Value::Float64(1.5));
        assert_eq!(eval(json!({}), json!({"$add": [1, "$nope"]})).unwrap(), Value::Null);
        assert_eq!(eval(json!({}), json!({"$multiply": [2, 3, 4]})).unwrap(), Value::Int64(24));
    }

    #[test]
    fn test_add_date() {
        let out = eval(
            json!({"d": {"$date": "2024-01-01T00:00:00Z"}}),
            json!({"$add": ["$d", 1000]}),
        )
        .unwrap();
        assert_eq!(out, v(json!({"$date": "2024-01-01T00:00:01Z"})));
    }

    #[test]
    fn test_subtract_modes() {
        assert_eq!(eval(json!({}), json!({"$subtract": [5, 7]})).unwrap(), Value::Int64(-2));
        let doc = json!({
            "a": {"$date": "2024-01-01T00:00:10Z"},
            "b": {"$date": "2024-01-01T00:00:00Z"}
        });
        assert_eq!(eval(doc.clone(), json!({"$subtract": ["$a", "$b"]})).unwrap(), Value::Int64(10_000));
        assert_eq!(
            eval(doc.clone(), json!({"$subtract": ["$a", 10_000]})).unwrap(),
            v(json!({"$date": "2024-01-01T00:00:00Z"}))
        );
        let err = eval(doc.clone(), json!({"$subtract": [1, "$a"]})).unwrap_err();
        assert_eq!(err.message(), "$subtract cannot subtract a date from a number");
        let err = eval(doc, json!({"$subtract": ["$a", "x"]})).unwrap_err();
        assert!(err.message().contains("from a date"));
    }

    #[test]
    fn test_divide_and_mod() {
        assert_eq!(eval(json!({}), json!({"$divide": [9, 2]})).unwrap(), Value::Float64(4.5));
        assert!(eval(json!({}), json!({"$divide": [1, 0]})).is_err());
        assert_eq!(eval(json!({}), json!({"$mod": [9, 4]})).unwrap(), Value::Int64(1));
    }

    #[test]
    fn test_unary_and_round() {
        assert_eq!(eval(json!({"x": -3}), json!({"$abs": "$x"})).unwrap(), Value::Int64(3));
        assert_eq!(eval(json!({}), json!({"$ceil": 1.2})).unwrap(), Value::Float64(2.0));
        assert_eq!(eval(json!({}), json!({"$floor": [1.8]})).unwrap(), Value::Float64(1.0));
        assert_eq!(eval(json!({}), json!({"$round": [2.5]})).unwrap(), Value::Float64(2.0));
        assert_eq!(eval(json!({}), json!({"$round": [3.14159, 2]})).unwrap(), Value::Float64(3.14));
        assert_eq!(eval(json!({}), json!({"$round": [1250, -2]})).unwrap(), Value::Int64(1200));
    }
}
