//! Total ordering and deep equality over values
//!
//! Values of different types order by a fixed type rank; values of the same
//! type compare naturally. Integers and floats share one numeric rank and are
//! compared exactly. Objects compare by their sorted keys so that ordering
//! agrees with equality, which ignores field insertion order.

use super::{Map, Value};
use std::cmp::Ordering;

/// Rank used to order values of different types
pub(crate) fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Missing => 0,
        Value::Null => 1,
        Value::Int64(_) | Value::Float64(_) => 2,
        Value::String(_) => 3,
        Value::Object(_) => 4,
        Value::Array(_) => 5,
        Value::Binary(_) => 6,
        Value::Bool(_) => 7,
        Value::DateTime(_) => 8,
        Value::Regex(_) => 9,
    }
}

/// Compare two values with a total order
pub fn compare(a: &Value, b: &Value) -> Ordering {
    let (ra, rb) = (type_rank(a), type_rank(b));
    if ra != rb {
        return ra.cmp(&rb);
    }

    match (a, b) {
        (Value::Int64(x), Value::Int64(y)) => x.cmp(y),
        (Value::Float64(x), Value::Float64(y)) => compare_floats(*x, *y),
        (Value::Int64(x), Value::Float64(y)) => compare_int_float(*x, *y),
        (Value::Float64(x), Value::Int64(y)) => compare_int_float(*y, *x).reverse(),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::DateTime(x), Value::DateTime(y)) => x.cmp(y),
        (Value::Binary(x), Value::Binary(y)) => x.len().cmp(&y.len()).then_with(|| x.cmp(y)),
        (Value::Regex(x), Value::Regex(y)) => x
            .pattern
            .cmp(&y.pattern)
            .then_with(|| x.options.cmp(&y.options)),
        (Value::Array(x), Value::Array(y)) => compare_arrays(x, y),
        (Value::Object(x), Value::Object(y)) => compare_objects(x, y),
        _ => Ordering::Equal,
    }
}

/// Deep structural equality; key order of objects is ignored
pub fn is_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(l, r)| is_equal(l, r))
        }
        (Value::Object(x), Value::Object(y)) => {
            let present = |m: &Map| m.values().filter(|v| !v.is_missing()).count();
            present(x) == present(y)
                && x.iter()
                    .filter(|(_, v)| !v.is_missing())
                    .all(|(k, v)| y.get(k).map_or(false, |other| is_equal(v, other)))
        }
        _ => compare(a, b) == Ordering::Equal,
    }
}

/// NaN equals NaN and sorts below every other number
fn compare_floats(x: f64, y: f64) -> Ordering {
    match (x.is_nan(), y.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        _ => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
    }
}

/// Exact comparison of an integer against a float
fn compare_int_float(i: i64, f: f64) -> Ordering {
    if f.is_nan() {
        return Ordering::Greater;
    }
    if f >= 9_223_372_036_854_775_808.0 {
        return Ordering::Less;
    }
    if f < -9_223_372_036_854_775_808.0 {
        return Ordering::Greater;
    }
    let floor = f.floor();
    let whole = floor as i64;
    if floor == f {
        i.cmp(&whole)
    } else if i <= whole {
        Ordering::Less
    } else {
        Ordering::Greater
    }
}

fn compare_arrays(x: &[Value], y: &[Value]) -> Ordering {
    for (l, r) in x.iter().zip(y) {
        let ord = compare(l, r);
        if ord != Ordering::Equal {
            return ord;
        }
    }
    x.len().cmp(&y.len())
}

fn compare_objects(x: &Map, y: &Map) -> Ordering {
    fn sorted(m: &Map) -> Vec<(&String, &Value)> {
        let mut entries: Vec<_> = m.iter().filter(|(_, v)| !v.is_missing()).collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        entries
    }
    let (ex, ey) = (sorted(x), sorted(y));
    for ((kx, vx), (ky, vy)) in ex.iter().zip(&ey) {
        let ord = kx.cmp(ky).then_with(|| compare(vx, vy));
        if ord != Ordering::Equal {
            return ord;
        }
    }
    ex.len().cmp(&ey.len())
}
