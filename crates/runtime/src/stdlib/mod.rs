//! The Built-In Method Library
//!
//! Populates an environment's dispatch tables and seeds its global closure:
//!
//! - numeric methods on the seven numeric kinds
//! - string concatenation and measurement
//! - the list state machines (on List and Null both)
//! - a common table (`==`, `!=`, `===`, `string`, `hash`) every kind falls
//!   back to
//! - type objects (`Integer64`, `String`, ...) whose properties are the
//!   kind's methods as first-class function values, plus the `true`,
//!   `false`, and `null` constants

pub mod arithmetic;
pub mod list_ops;
pub mod string_ops;

use crate::env::{Env, VTables};
use smile_core::symbols::{KnownSymbols, SymbolTable};
use smile_core::tables::ClosureInfo;
use smile_core::value::{
    Host, Kind, NativeFn, NativeFunctionInfo, NativeResult, ObjectData, Value,
};
use std::cell::RefCell;
use std::rc::Rc;

fn native(name: &str, func: NativeFn) -> Value {
    Value::NativeFunction(Rc::new(NativeFunctionInfo {
        name: Rc::from(name),
        func,
    }))
}

// ---------------------------------------------------------------------------
// Common methods (every kind)

fn common_eq(_host: &mut dyn Host, args: &[Value]) -> NativeResult {
    let a = args.first().cloned().unwrap_or(Value::Null);
    let b = args.get(1).cloned().unwrap_or(Value::Null);
    Ok(Value::Bool(a.smile_eq(&b)))
}

fn common_ne(_host: &mut dyn Host, args: &[Value]) -> NativeResult {
    let a = args.first().cloned().unwrap_or(Value::Null);
    let b = args.get(1).cloned().unwrap_or(Value::Null);
    Ok(Value::Bool(!a.smile_eq(&b)))
}

fn common_identical(_host: &mut dyn Host, args: &[Value]) -> NativeResult {
    let a = args.first().cloned().unwrap_or(Value::Null);
    let b = args.get(1).cloned().unwrap_or(Value::Null);
    Ok(Value::Bool(a.identical(&b)))
}

fn common_string(host: &mut dyn Host, args: &[Value]) -> NativeResult {
    let a = args.first().cloned().unwrap_or(Value::Null);
    Ok(Value::String(Rc::from(host.stringify(&a).as_str())))
}

fn common_hash(_host: &mut dyn Host, args: &[Value]) -> NativeResult {
    let a = args.first().cloned().unwrap_or(Value::Null);
    Ok(a.structural_hash()
        .map(|h| Value::Int64(h as i64))
        .unwrap_or(Value::Null))
}

// ---------------------------------------------------------------------------
// Installation

const NUMERIC_KINDS: [Kind; 7] = [
    Kind::Byte,
    Kind::Int16,
    Kind::Int32,
    Kind::Int64,
    Kind::Real32,
    Kind::Real64,
    Kind::Real128,
];

const INTEGER_KINDS: [Kind; 4] = [Kind::Byte, Kind::Int16, Kind::Int32, Kind::Int64];

const LISTY_KINDS: [Kind; 2] = [Kind::List, Kind::Null];

fn build_vtables(known: &KnownSymbols) -> VTables {
    let mut vt = VTables::new();

    for kind in NUMERIC_KINDS {
        vt.register(kind, known.plus, native("+", arithmetic::num_add));
        vt.register(kind, known.minus, native("-", arithmetic::num_sub));
        vt.register(kind, known.star, native("*", arithmetic::num_mul));
        vt.register(kind, known.slash, native("/", arithmetic::num_div));
        vt.register(kind, known.modulo, native("mod", arithmetic::num_mod));
        vt.register(kind, known.remainder, native("rem", arithmetic::num_rem));
        vt.register(kind, known.lt, native("<", arithmetic::num_lt));
        vt.register(kind, known.gt, native(">", arithmetic::num_gt));
        vt.register(kind, known.le, native("<=", arithmetic::num_le));
        vt.register(kind, known.ge, native(">=", arithmetic::num_ge));
        vt.register(kind, known.parse, native("parse", arithmetic::num_parse));
    }
    for kind in INTEGER_KINDS {
        vt.register(kind, known.ushl, native("<<<", arithmetic::num_ushl));
        vt.register(kind, known.ushr, native(">>>", arithmetic::num_ushr));
        vt.register(kind, known.shl, native("<<", arithmetic::num_shl));
        vt.register(kind, known.shr, native(">>", arithmetic::num_shr));
        vt.register(kind, known.even, native("even?", arithmetic::num_even));
        vt.register(kind, known.odd, native("odd?", arithmetic::num_odd));
    }

    vt.register(Kind::String, known.plus, native("+", string_ops::str_concat));
    vt.register(
        Kind::String,
        known.empty,
        native("empty?", string_ops::str_empty),
    );
    vt.register(
        Kind::String,
        known.count,
        native("count", string_ops::str_count),
    );

    for kind in LISTY_KINDS {
        vt.register(kind, known.each, native("each", list_ops::list_each));
        vt.register(kind, known.map, native("map", list_ops::list_map));
        vt.register(kind, known.where_, native("where", list_ops::list_where));
        vt.register(kind, known.any, native("any?", list_ops::list_any));
        vt.register(kind, known.all, native("all?", list_ops::list_all));
        vt.register(kind, known.first, native("first", list_ops::list_first));
        vt.register(
            kind,
            known.contains,
            native("contains?", list_ops::list_contains),
        );
        vt.register(
            kind,
            known.index_of,
            native("index-of", list_ops::list_index_of),
        );
        vt.register(kind, known.count, native("count", list_ops::list_count));
        vt.register(kind, known.empty, native("empty?", list_ops::list_empty));
        vt.register(kind, known.null_p, native("null?", list_ops::list_empty));
        vt.register(kind, known.join, native("join", list_ops::list_join));
    }

    vt.register_common(known.eq, native("==", common_eq));
    vt.register_common(known.ne, native("!=", common_ne));
    vt.register_common(known.identical, native("===", common_identical));
    vt.register_common(known.string, native("string", common_string));
    vt.register_common(known.hash, native("hash", common_hash));

    vt
}

/// Build a type object whose properties are `kind`'s methods.
fn type_object(vtables: &VTables, kind: Kind) -> Value {
    let data = ObjectData::default();
    {
        let mut props = data.props.borrow_mut();
        for (&method, function) in vtables.methods_of(kind) {
            props.insert(method, function.clone());
        }
    }
    Value::Object(Rc::new(data))
}

/// Build a complete environment: dispatch tables plus the seeded global
/// closure.
pub fn install() -> Env {
    let mut symbols = SymbolTable::new();
    let known = KnownSymbols::new(&mut symbols);
    let vtables = build_vtables(&known);

    let globals = ClosureInfo::new_global();
    globals.set_global(known.true_, Value::Bool(true));
    globals.set_global(known.false_, Value::Bool(false));
    globals.set_global(known.null, Value::Null);

    let type_objects: [(&str, Kind); 11] = [
        ("Byte", Kind::Byte),
        ("Integer16", Kind::Int16),
        ("Integer32", Kind::Int32),
        ("Integer64", Kind::Int64),
        ("Real32", Kind::Real32),
        ("Real64", Kind::Real64),
        ("Real128", Kind::Real128),
        ("String", Kind::String),
        ("List", Kind::List),
        ("Bool", Kind::Bool),
        ("Symbol", Kind::Symbol),
    ];
    for (name, kind) in type_objects {
        let sym = symbols.intern(name);
        globals.set_global(sym, type_object(&vtables, kind));
    }

    Env {
        symbols: RefCell::new(symbols),
        known,
        globals,
        vtables,
    }
}
