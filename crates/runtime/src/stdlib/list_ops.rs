//! List Methods
//!
//! The list traversal family (`each`,
//! `map`, `where`, `any?`, `all?`, `first`, `contains?`, `index-of`,
//! `count`) plus `join` and the emptiness predicates. Every method is
//! registered on both the List kind and the Null kind, because the empty
//! list *is* Null.
//!
//! Methods taking a probe accept either a predicate function (applied to
//! each element) or a plain value (compared with `==` semantics). An
//! escape triggered inside a callback propagates straight through: the
//! iteration performs no cleanup and returns immediately.

use smile_core::value::{Host, NativeError, NativeResult, Value};
use std::rc::Rc;

fn receiver(args: &[Value]) -> Value {
    args.first().cloned().unwrap_or(Value::Null)
}

fn elements(args: &[Value]) -> Vec<Value> {
    receiver(args).iter_list().cloned().collect()
}

fn is_function(v: &Value) -> bool {
    matches!(v, Value::UserFunction(_) | Value::NativeFunction(_))
}

/// Apply a probe to one element: call it if it is a function, compare
/// otherwise.
fn probe_matches(host: &mut dyn Host, probe: &Value, element: &Value) -> Result<bool, NativeError> {
    if is_function(probe) {
        let result = host.apply(probe, std::slice::from_ref(element))?;
        Ok(result.is_truthy())
    } else {
        Ok(probe.smile_eq(element))
    }
}

/// `each`: run the callback over every element; the list itself is the
/// result.
pub fn list_each(host: &mut dyn Host, args: &[Value]) -> NativeResult {
    let recv = receiver(args);
    if let Some(f) = args.get(1) {
        for element in elements(args) {
            host.apply(f, &[element])?;
        }
    }
    Ok(recv)
}

/// `map`: a fresh list of callback results; Null for the empty list.
pub fn list_map(host: &mut dyn Host, args: &[Value]) -> NativeResult {
    let Some(f) = args.get(1).cloned() else {
        return Ok(receiver(args));
    };
    let mut results = Vec::new();
    for element in elements(args) {
        results.push(host.apply(&f, &[element])?);
    }
    Ok(Value::list_from(results))
}

/// `where`: the elements the predicate accepts; Null when none do.
pub fn list_where(host: &mut dyn Host, args: &[Value]) -> NativeResult {
    let Some(f) = args.get(1).cloned() else {
        return Ok(receiver(args));
    };
    let mut kept = Vec::new();
    for element in elements(args) {
        if host.apply(&f, std::slice::from_ref(&element))?.is_truthy() {
            kept.push(element);
        }
    }
    Ok(Value::list_from(kept))
}

/// `any?`: with a probe, whether any element matches; unary, whether the
/// list is nonempty.
pub fn list_any(host: &mut dyn Host, args: &[Value]) -> NativeResult {
    match args.get(1).cloned() {
        None => Ok(Value::Bool(!receiver(args).is_null())),
        Some(probe) => {
            for element in elements(args) {
                if probe_matches(host, &probe, &element)? {
                    return Ok(Value::Bool(true));
                }
            }
            Ok(Value::Bool(false))
        }
    }
}

/// `all?`: whether every element matches; vacuously true for the empty
/// list.
pub fn list_all(host: &mut dyn Host, args: &[Value]) -> NativeResult {
    let probe = args.get(1).cloned().unwrap_or(Value::Null);
    for element in elements(args) {
        if !probe_matches(host, &probe, &element)? {
            return Ok(Value::Bool(false));
        }
    }
    Ok(Value::Bool(true))
}

/// `first`: with a probe, the first matching element; unary, the head.
/// Null when nothing matches or the list is empty.
pub fn list_first(host: &mut dyn Host, args: &[Value]) -> NativeResult {
    match args.get(1).cloned() {
        None => Ok(elements(args).into_iter().next().unwrap_or(Value::Null)),
        Some(probe) => {
            for element in elements(args) {
                if probe_matches(host, &probe, &element)? {
                    return Ok(element);
                }
            }
            Ok(Value::Null)
        }
    }
}

/// `contains?`: like `any?` but only in probe form.
pub fn list_contains(host: &mut dyn Host, args: &[Value]) -> NativeResult {
    let probe = args.get(1).cloned().unwrap_or(Value::Null);
    for element in elements(args) {
        if probe_matches(host, &probe, &element)? {
            return Ok(Value::Bool(true));
        }
    }
    Ok(Value::Bool(false))
}

/// `index-of`: the zero-based index of the first match, or Null.
pub fn list_index_of(host: &mut dyn Host, args: &[Value]) -> NativeResult {
    let probe = args.get(1).cloned().unwrap_or(Value::Null);
    for (i, element) in elements(args).into_iter().enumerate() {
        if probe_matches(host, &probe, &element)? {
            return Ok(Value::Int64(i as i64));
        }
    }
    Ok(Value::Null)
}

/// `count`: with a probe, how many elements match; unary, the length.
pub fn list_count(host: &mut dyn Host, args: &[Value]) -> NativeResult {
    match args.get(1).cloned() {
        None => Ok(Value::Int64(elements(args).len() as i64)),
        Some(probe) => {
            let mut count = 0i64;
            for element in elements(args) {
                if probe_matches(host, &probe, &element)? {
                    count += 1;
                }
            }
            Ok(Value::Int64(count))
        }
    }
}

/// `empty?` / `null?`: the empty list is Null and vice versa.
pub fn list_empty(_host: &mut dyn Host, args: &[Value]) -> NativeResult {
    Ok(Value::Bool(receiver(args).is_null()))
}

/// `join`: concatenate the elements' textual forms with an optional
/// separator.
pub fn list_join(host: &mut dyn Host, args: &[Value]) -> NativeResult {
    let separator = args
        .get(1)
        .map(|s| host.stringify(s))
        .unwrap_or_default();
    let parts: Vec<String> = elements(args)
        .iter()
        .map(|element| host.stringify(element))
        .collect();
    Ok(Value::String(Rc::from(parts.join(&separator).as_str())))
}
