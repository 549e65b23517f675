//! Numeric Methods
//!
//! Arithmetic, comparison, and shift methods for the four integer widths
//! and three decimal widths. Binary operators promote along the fixed
//! lattice Byte ⊂ Int16 ⊂ Int32 ⊂ Int64 and Real32 ⊂ Real64 ⊂ Real128,
//! with any integer promoting into any decimal; the result keeps the
//! promoted kind. Integer arithmetic wraps at its width.
//!
//! Integer division and modulo by zero raise `divide-by-zero`; decimal
//! division by zero produces ±Inf or NaN per IEEE-754.

use smile_core::real::{Real32, Real64, Real128};
use smile_core::value::{Exception, Host, NativeError, NativeResult, Value};
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IntWidth {
    Byte,
    I16,
    I32,
    I64,
}

enum NumPair {
    Int(IntWidth, i64, i64),
    R32(Real32, Real32),
    R64(Real64, Real64),
    R128(Real128, Real128),
}

fn rank(v: &Value) -> Option<u8> {
    match v {
        Value::Byte(_) => Some(0),
        Value::Int16(_) => Some(1),
        Value::Int32(_) => Some(2),
        Value::Int64(_) => Some(3),
        Value::Real32(_) => Some(4),
        Value::Real64(_) => Some(5),
        Value::Real128(_) => Some(6),
        _ => None,
    }
}

fn to_r32(v: &Value) -> Real32 {
    match v {
        Value::Real32(r) => *r,
        _ => Real32::from_i64(v.as_int().unwrap_or(0)),
    }
}

fn to_r64(v: &Value) -> Real64 {
    match v {
        Value::Real64(r) => *r,
        Value::Real32(r) => r.widen(),
        _ => Real64::from_i64(v.as_int().unwrap_or(0)),
    }
}

fn to_r128(v: &Value) -> Real128 {
    match v {
        Value::Real128(r) => *r,
        Value::Real64(r) => r.widen(),
        Value::Real32(r) => r.widen().widen(),
        _ => Real128::from_i64(v.as_int().unwrap_or(0)),
    }
}

fn promote(a: &Value, b: &Value) -> Option<NumPair> {
    let target = rank(a)?.max(rank(b)?);
    Some(match target {
        0 => NumPair::Int(IntWidth::Byte, a.as_int()?, b.as_int()?),
        1 => NumPair::Int(IntWidth::I16, a.as_int()?, b.as_int()?),
        2 => NumPair::Int(IntWidth::I32, a.as_int()?, b.as_int()?),
        3 => NumPair::Int(IntWidth::I64, a.as_int()?, b.as_int()?),
        4 => NumPair::R32(to_r32(a), to_r32(b)),
        5 => NumPair::R64(to_r64(a), to_r64(b)),
        _ => NumPair::R128(to_r128(a), to_r128(b)),
    })
}

fn wrap_int(width: IntWidth, n: i64) -> Value {
    match width {
        IntWidth::Byte => Value::Byte(n as u8),
        IntWidth::I16 => Value::Int16(n as i16),
        IntWidth::I32 => Value::Int32(n as i32),
        IntWidth::I64 => Value::Int64(n),
    }
}

fn bits(width: IntWidth) -> u32 {
    match width {
        IntWidth::Byte => 8,
        IntWidth::I16 => 16,
        IntWidth::I32 => 32,
        IntWidth::I64 => 64,
    }
}

/// The value reinterpreted as its width's unsigned form, for logical ops.
fn unsigned(width: IntWidth, n: i64) -> u64 {
    match width {
        IntWidth::Byte => n as u8 as u64,
        IntWidth::I16 => n as u16 as u64,
        IntWidth::I32 => n as u32 as u64,
        IntWidth::I64 => n as u64,
    }
}

fn type_error(host: &mut dyn Host, op: &str, v: &Value) -> NativeError {
    let kind = host.intern("type-mismatch");
    NativeError::Exception(Exception::new(
        kind,
        format!("'{}' is not defined between these kinds ({})", op, v.kind().name()),
    ))
}

fn divide_by_zero(host: &mut dyn Host) -> NativeError {
    let kind = host.intern("divide-by-zero");
    NativeError::Exception(Exception::new(kind, "division by zero"))
}

// ---------------------------------------------------------------------------
// Arithmetic

pub fn num_add(host: &mut dyn Host, args: &[Value]) -> NativeResult {
    if args.len() == 1 {
        // Unary plus is the identity on numerics.
        return match rank(&args[0]) {
            Some(_) => Ok(args[0].clone()),
            None => Err(type_error(host, "+", &args[0])),
        };
    }
    fold(host, args, "+", |pair| match pair {
        NumPair::Int(w, a, b) => wrap_int(w, a.wrapping_add(b)),
        NumPair::R32(a, b) => Value::Real32(a.add(b)),
        NumPair::R64(a, b) => Value::Real64(a.add(b)),
        NumPair::R128(a, b) => Value::Real128(a.add(b)),
    })
}

pub fn num_sub(host: &mut dyn Host, args: &[Value]) -> NativeResult {
    if args.len() == 1 {
        // Unary minus negates.
        return match &args[0] {
            Value::Byte(n) => Ok(Value::Byte(n.wrapping_neg())),
            Value::Int16(n) => Ok(Value::Int16(n.wrapping_neg())),
            Value::Int32(n) => Ok(Value::Int32(n.wrapping_neg())),
            Value::Int64(n) => Ok(Value::Int64(n.wrapping_neg())),
            Value::Real32(r) => Ok(Value::Real32(r.neg())),
            Value::Real64(r) => Ok(Value::Real64(r.neg())),
            Value::Real128(r) => Ok(Value::Real128(r.neg())),
            other => Err(type_error(host, "-", other)),
        };
    }
    fold(host, args, "-", |pair| match pair {
        NumPair::Int(w, a, b) => wrap_int(w, a.wrapping_sub(b)),
        NumPair::R32(a, b) => Value::Real32(a.sub(b)),
        NumPair::R64(a, b) => Value::Real64(a.sub(b)),
        NumPair::R128(a, b) => Value::Real128(a.sub(b)),
    })
}

pub fn num_mul(host: &mut dyn Host, args: &[Value]) -> NativeResult {
    fold(host, args, "*", |pair| match pair {
        NumPair::Int(w, a, b) => wrap_int(w, a.wrapping_mul(b)),
        NumPair::R32(a, b) => Value::Real32(a.mul(b)),
        NumPair::R64(a, b) => Value::Real64(a.mul(b)),
        NumPair::R128(a, b) => Value::Real128(a.mul(b)),
    })
}

pub fn num_div(host: &mut dyn Host, args: &[Value]) -> NativeResult {
    let mut result = args.first().cloned().unwrap_or(Value::Null);
    for next in args.get(1..).unwrap_or(&[]) {
        result = match promote(&result, next) {
            Some(NumPair::Int(w, a, b)) => {
                if b == 0 {
                    return Err(divide_by_zero(host));
                }
                wrap_int(w, a.wrapping_div(b))
            }
            Some(NumPair::R32(a, b)) => Value::Real32(a.div(b)),
            Some(NumPair::R64(a, b)) => Value::Real64(a.div(b)),
            Some(NumPair::R128(a, b)) => Value::Real128(a.div(b)),
            None => return Err(type_error(host, "/", next)),
        };
    }
    Ok(result)
}

pub fn num_mod(host: &mut dyn Host, args: &[Value]) -> NativeResult {
    binary(host, args, "mod", |host, pair| match pair {
        NumPair::Int(w, a, b) => {
            if b == 0 {
                return Err(divide_by_zero(host));
            }
            // Floored modulo: the result takes the divisor's sign.
            Ok(wrap_int(w, a.wrapping_rem(b).wrapping_add(b).wrapping_rem(b)))
        }
        NumPair::R32(a, b) => Ok(Value::Real32(a.rem(b))),
        NumPair::R64(a, b) => Ok(Value::Real64(a.rem(b))),
        NumPair::R128(a, b) => Ok(Value::Real128(a.rem(b))),
    })
}

pub fn num_rem(host: &mut dyn Host, args: &[Value]) -> NativeResult {
    binary(host, args, "rem", |host, pair| match pair {
        NumPair::Int(w, a, b) => {
            if b == 0 {
                return Err(divide_by_zero(host));
            }
            Ok(wrap_int(w, a.wrapping_rem(b)))
        }
        NumPair::R32(a, b) => Ok(Value::Real32(a.rem(b))),
        NumPair::R64(a, b) => Ok(Value::Real64(a.rem(b))),
        NumPair::R128(a, b) => Ok(Value::Real128(a.rem(b))),
    })
}

// ---------------------------------------------------------------------------
// Comparison

fn compare(pair: &NumPair) -> Option<Ordering> {
    match pair {
        NumPair::Int(_, a, b) => Some(a.cmp(b)),
        NumPair::R32(a, b) => a.partial_cmp(b),
        NumPair::R64(a, b) => a.partial_cmp(b),
        NumPair::R128(a, b) => a.partial_cmp(b),
    }
}

fn comparison(
    host: &mut dyn Host,
    args: &[Value],
    op: &str,
    accept: fn(Ordering) -> bool,
) -> NativeResult {
    let a = args.first().cloned().unwrap_or(Value::Null);
    let b = args.get(1).cloned().unwrap_or(Value::Null);
    match promote(&a, &b) {
        Some(pair) => Ok(Value::Bool(compare(&pair).map(accept).unwrap_or(false))),
        None => Err(type_error(host, op, &b)),
    }
}

pub fn num_lt(host: &mut dyn Host, args: &[Value]) -> NativeResult {
    comparison(host, args, "<", |o| o == Ordering::Less)
}

pub fn num_gt(host: &mut dyn Host, args: &[Value]) -> NativeResult {
    comparison(host, args, ">", |o| o == Ordering::Greater)
}

pub fn num_le(host: &mut dyn Host, args: &[Value]) -> NativeResult {
    comparison(host, args, "<=", |o| o != Ordering::Greater)
}

pub fn num_ge(host: &mut dyn Host, args: &[Value]) -> NativeResult {
    comparison(host, args, ">=", |o| o != Ordering::Less)
}

// ---------------------------------------------------------------------------
// Shifts (integers only)

fn shift(
    host: &mut dyn Host,
    args: &[Value],
    op: &str,
    apply: fn(IntWidth, i64, u32) -> i64,
) -> NativeResult {
    let a = args.first().cloned().unwrap_or(Value::Null);
    let b = args.get(1).cloned().unwrap_or(Value::Null);
    match promote(&a, &b) {
        Some(NumPair::Int(w, a, s)) => {
            let s = s.clamp(0, 64) as u32;
            Ok(wrap_int(w, apply(w, a, s)))
        }
        _ => Err(type_error(host, op, &b)),
    }
}

/// `<<<`: logical shift left within the width.
pub fn num_ushl(host: &mut dyn Host, args: &[Value]) -> NativeResult {
    shift(host, args, "<<<", |w, a, s| {
        if s >= bits(w) {
            0
        } else {
            (unsigned(w, a) << s) as i64
        }
    })
}

/// `>>>`: logical shift right within the width.
pub fn num_ushr(host: &mut dyn Host, args: &[Value]) -> NativeResult {
    shift(host, args, ">>>", |w, a, s| {
        if s >= bits(w) {
            0
        } else {
            (unsigned(w, a) >> s) as i64
        }
    })
}

/// `<<`: arithmetic shift left (same bit pattern as logical).
pub fn num_shl(host: &mut dyn Host, args: &[Value]) -> NativeResult {
    shift(host, args, "<<", |w, a, s| {
        if s >= bits(w) {
            0
        } else {
            (unsigned(w, a) << s) as i64
        }
    })
}

/// `>>`: arithmetic shift right, spreading the sign bit.
pub fn num_shr(host: &mut dyn Host, args: &[Value]) -> NativeResult {
    shift(host, args, ">>", |w, a, s| {
        if s >= bits(w) {
            if a < 0 { -1 } else { 0 }
        } else {
            a >> s
        }
    })
}

// ---------------------------------------------------------------------------
// Predicates and conversion

pub fn num_even(host: &mut dyn Host, args: &[Value]) -> NativeResult {
    let a = args.first().cloned().unwrap_or(Value::Null);
    match a.as_int() {
        Some(n) => Ok(Value::Bool(n % 2 == 0)),
        None => Err(type_error(host, "even?", &a)),
    }
}

pub fn num_odd(host: &mut dyn Host, args: &[Value]) -> NativeResult {
    let a = args.first().cloned().unwrap_or(Value::Null);
    match a.as_int() {
        Some(n) => Ok(Value::Bool(n % 2 != 0)),
        None => Err(type_error(host, "odd?", &a)),
    }
}

/// `recv parse text`: parse text as the receiver's numeric kind. Null on
/// malformed input.
pub fn num_parse(host: &mut dyn Host, args: &[Value]) -> NativeResult {
    let Some(Value::String(text)) = args.get(1) else {
        return Err(type_error(host, "parse", args.get(1).unwrap_or(&Value::Null)));
    };
    let text = text.trim();
    let receiver = args.first().cloned().unwrap_or(Value::Null);
    let parsed = match &receiver {
        Value::Byte(_) => text.parse::<i64>().ok().map(|n| Value::Byte(n as u8)),
        Value::Int16(_) => text.parse::<i64>().ok().map(|n| Value::Int16(n as i16)),
        Value::Int32(_) => text.parse::<i64>().ok().map(|n| Value::Int32(n as i32)),
        Value::Int64(_) => text.parse::<i64>().ok().map(Value::Int64),
        Value::Real32(_) => Real32::parse(text).map(Value::Real32),
        Value::Real64(_) => Real64::parse(text).map(Value::Real64),
        Value::Real128(_) => Real128::parse(text).map(Value::Real128),
        other => return Err(type_error(host, "parse", other)),
    };
    Ok(parsed.unwrap_or(Value::Null))
}

// ---------------------------------------------------------------------------
// Helpers

/// Left-fold a promoted binary operation across the arguments, so the
/// direct-call forms (`[Integer64.+ a b c]`) work with any arity.
fn fold(
    host: &mut dyn Host,
    args: &[Value],
    op: &str,
    apply: fn(NumPair) -> Value,
) -> NativeResult {
    let mut result = args.first().cloned().unwrap_or(Value::Null);
    for next in args.get(1..).unwrap_or(&[]) {
        result = match promote(&result, next) {
            Some(pair) => apply(pair),
            None => return Err(type_error(host, op, next)),
        };
    }
    Ok(result)
}

fn binary(
    host: &mut dyn Host,
    args: &[Value],
    op: &str,
    apply: fn(&mut dyn Host, NumPair) -> NativeResult,
) -> NativeResult {
    let a = args.first().cloned().unwrap_or(Value::Null);
    let b = args.get(1).cloned().unwrap_or(Value::Null);
    match promote(&a, &b) {
        Some(pair) => apply(host, pair),
        None => Err(type_error(host, op, &b)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_promotion_keeps_the_wider_kind() {
        let pair = promote(&Value::Byte(5), &Value::Int32(7)).unwrap();
        assert!(matches!(pair, NumPair::Int(IntWidth::I32, 5, 7)));
        let pair = promote(&Value::Int64(2), &Value::Real64(Real64::from_i64(3))).unwrap();
        assert!(matches!(pair, NumPair::R64(_, _)));
    }

    #[test]
    fn test_byte_arithmetic_wraps() {
        assert!(matches!(
            wrap_int(IntWidth::Byte, 200i64.wrapping_add(100)),
            Value::Byte(44)
        ));
    }

    #[test]
    fn test_logical_shift_right_is_unsigned() {
        let shifted = if 1 >= bits(IntWidth::I64) {
            0
        } else {
            (unsigned(IntWidth::I64, -2) >> 1) as i64
        };
        assert_eq!(shifted, i64::MAX);
    }
}
