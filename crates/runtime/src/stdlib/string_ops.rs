//! String Methods

use smile_core::value::{Host, NativeResult, Value};
use std::rc::Rc;

/// `+` on strings: concatenate every argument's textual form. Accepts any
/// argument count, so `[String.+ a b c ...]` builds the result in one pass.
pub fn str_concat(host: &mut dyn Host, args: &[Value]) -> NativeResult {
    let mut out = String::new();
    for arg in args {
        out.push_str(&host.stringify(arg));
    }
    Ok(Value::String(Rc::from(out.as_str())))
}

/// `empty?` on strings.
pub fn str_empty(_host: &mut dyn Host, args: &[Value]) -> NativeResult {
    Ok(Value::Bool(matches!(
        args.first(),
        Some(Value::String(s)) if s.is_empty()
    ) || args.first().is_none()))
}

/// `count` on strings: byte length.
pub fn str_count(_host: &mut dyn Host, args: &[Value]) -> NativeResult {
    match args.first() {
        Some(Value::String(s)) => Ok(Value::Int64(s.len() as i64)),
        _ => Ok(Value::Int64(0)),
    }
}
