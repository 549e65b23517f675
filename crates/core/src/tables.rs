//! Compiled Tables
//!
//! The output of one compilation unit: every compiled function, the interned
//! string and constant-object pools, the source-location table that byte
//! codes index into, and the till metadata used by the escape machinery.
//! Nothing here is mutated after the compiler returns.
//!
//! Closures are stored in two pieces: `ClosureInfo` is the reusable shape
//! shared by every activation of the same function (slot count, variable
//! names, max temp depth), while the per-call activation record lives on the
//! VM's costack and stays as small as possible.

use crate::bytecode::ByteCodeSegment;
use crate::symbols::Symbol;
use crate::value::{SourcePos, Value};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// What kind of scope a `ClosureInfo` describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClosureKind {
    /// Module-level state: a mutable symbol-to-value dictionary.
    Global,
    /// A function frame with indexed slots.
    Local,
    /// A lexical block; shares the enclosing function's frame.
    Block,
}

/// Shape metadata shared among all activations of the same function.
#[derive(Debug)]
pub struct ClosureInfo {
    pub parent: Option<Rc<ClosureInfo>>,
    pub kind: ClosureKind,
    /// Arguments occupy the first `num_args` slots of the frame.
    pub num_args: u32,
    /// Total frame slots: the maximum concurrent live local count.
    pub num_variables: u32,
    /// Maximum operand-stack depth this function's code can reach.
    pub temp_size: u32,
    /// Best-effort slot names (latest binding wins when blocks reuse slots).
    pub variable_names: Vec<Symbol>,
    /// Final symbol-to-slot mapping snapshot.
    pub indices: HashMap<Symbol, u32>,
    /// Module-level variables; present only for `ClosureKind::Global`.
    pub globals: Option<RefCell<HashMap<Symbol, Value>>>,
}

impl ClosureInfo {
    /// A fresh global scope with an empty variable dictionary.
    pub fn new_global() -> Rc<ClosureInfo> {
        Rc::new(ClosureInfo {
            parent: None,
            kind: ClosureKind::Global,
            num_args: 0,
            num_variables: 0,
            temp_size: 0,
            variable_names: Vec::new(),
            indices: HashMap::new(),
            globals: Some(RefCell::new(HashMap::new())),
        })
    }

    /// Define or overwrite a global variable. Panics if this is not a
    /// global scope.
    pub fn set_global(&self, name: Symbol, value: Value) {
        self.globals
            .as_ref()
            .expect("set_global on a non-global closure")
            .borrow_mut()
            .insert(name, value);
    }

    pub fn get_global(&self, name: Symbol) -> Option<Value> {
        self.globals.as_ref()?.borrow().get(&name).cloned()
    }

    pub fn has_global(&self, name: Symbol) -> bool {
        self.globals
            .as_ref()
            .map(|g| g.borrow().contains_key(&name))
            .unwrap_or(false)
    }
}

/// One declared parameter of a user function.
#[derive(Debug)]
pub struct FunctionArg {
    pub name: Symbol,
    /// Compiled default-value expression, invoked in the callee's scope
    /// when the caller omits this argument.
    pub default: Option<Rc<UserFunctionInfo>>,
}

/// Immutable compiled representation of one function.
#[derive(Debug)]
pub struct UserFunctionInfo {
    pub closure_info: Rc<ClosureInfo>,
    pub segment: ByteCodeSegment,
    pub args: Vec<FunctionArg>,
    /// Collects surplus arguments into a fresh list when present.
    pub rest_arg: Option<Symbol>,
    /// Where the function was defined, for stack traces.
    pub position: Option<SourcePos>,
}

/// Escape-target metadata for one `till` block: its label symbols and,
/// after label resolution, the pc each label resumes at.
#[derive(Debug)]
pub struct TillInfo {
    pub labels: Vec<Symbol>,
    pub resume_pcs: Vec<u32>,
}

/// The operand of a `TillDo`: which till, which of its labels.
#[derive(Debug, Clone, Copy)]
pub struct TillTarget {
    pub till: u32,
    pub label: u32,
}

/// Everything one compilation produced.
#[derive(Debug, Default)]
pub struct CompiledTables {
    pub global_function: Option<Rc<UserFunctionInfo>>,
    /// All user functions; `NewFn` operands index here.
    pub functions: Vec<Rc<UserFunctionInfo>>,
    /// Interned string literals; `LdStr` operands index here.
    pub strings: Vec<Rc<str>>,
    /// Precomputed constant objects (quoted lists, decimal literals);
    /// `LdObj` operands index here.
    pub objects: Vec<Value>,
    /// `{filename, line, column}` records; byte codes hold indices. Index 0
    /// is the unknown location.
    pub source_locations: Vec<SourcePos>,
    pub tills: Vec<TillInfo>,
    /// `TillDo` operands index here.
    pub till_targets: Vec<TillTarget>,
}

impl CompiledTables {
    pub fn new() -> Self {
        CompiledTables {
            source_locations: vec![SourcePos {
                filename: Rc::from(""),
                line: 0,
                column: 0,
            }],
            ..Default::default()
        }
    }

    /// Intern a string literal, reusing an existing pool entry.
    pub fn add_string(&mut self, text: &str) -> u32 {
        if let Some(i) = self.strings.iter().position(|s| &**s == text) {
            return i as u32;
        }
        self.strings.push(Rc::from(text));
        (self.strings.len() - 1) as u32
    }

    pub fn add_object(&mut self, value: Value) -> u32 {
        self.objects.push(value);
        (self.objects.len() - 1) as u32
    }

    pub fn add_function(&mut self, func: Rc<UserFunctionInfo>) -> u32 {
        self.functions.push(func);
        (self.functions.len() - 1) as u32
    }

    /// Intern a source position, reusing the most recent entry when the
    /// compiler walks several nodes on the same line.
    pub fn add_source_location(&mut self, pos: &SourcePos) -> i32 {
        if let Some(last) = self.source_locations.last()
            && last == pos
        {
            return (self.source_locations.len() - 1) as i32;
        }
        self.source_locations.push(pos.clone());
        (self.source_locations.len() - 1) as i32
    }

    pub fn source_location(&self, index: i32) -> Option<&SourcePos> {
        if index <= 0 {
            return None;
        }
        self.source_locations.get(index as usize)
    }

    /// The label symbol a `TillDo` operand escapes to, for disassembly.
    pub fn till_label_name(&self, target_index: usize) -> Option<Symbol> {
        let target = self.till_targets.get(target_index)?;
        self.tills
            .get(target.till as usize)?
            .labels
            .get(target.label as usize)
            .copied()
    }
}
