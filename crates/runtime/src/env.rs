//! Interpreter Environment
//!
//! Everything that could have been process-wide state (the symbol table,
//! the global closure, the kind dispatch tables) is an explicit input
//! here, so multiple independent interpreters can coexist in one host
//! process. Nothing in this crate touches a global.

use smile_core::symbols::{KnownSymbols, Symbol, SymbolTable};
use smile_core::tables::ClosureInfo;
use smile_core::value::{Kind, NUM_KINDS, Value};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// Two-level kind dispatch: a dense outer array indexed by kind tag, an
/// inner map keyed by method symbol, and a common table shared by every
/// kind as the fallback.
pub struct VTables {
    kind_tables: Vec<HashMap<Symbol, Value>>,
    common: HashMap<Symbol, Value>,
}

impl VTables {
    pub fn new() -> Self {
        VTables {
            kind_tables: (0..NUM_KINDS).map(|_| HashMap::new()).collect(),
            common: HashMap::new(),
        }
    }

    pub fn register(&mut self, kind: Kind, method: Symbol, function: Value) {
        self.kind_tables[kind as usize].insert(method, function);
    }

    pub fn register_common(&mut self, method: Symbol, function: Value) {
        self.common.insert(method, function);
    }

    /// Resolve a method: the receiver's kind table first, then the common
    /// table. None means `unknown-method`.
    pub fn lookup(&self, kind: Kind, method: Symbol) -> Option<Value> {
        self.kind_tables[kind as usize]
            .get(&method)
            .or_else(|| self.common.get(&method))
            .cloned()
    }

    /// All methods of one kind, used to build its type object.
    pub fn methods_of(&self, kind: Kind) -> impl Iterator<Item = (&Symbol, &Value)> {
        self.kind_tables[kind as usize].iter()
    }
}

impl Default for VTables {
    fn default() -> Self {
        VTables::new()
    }
}

/// One interpreter environment: symbols, the global closure, and the
/// dispatch tables. Single-threaded by design.
pub struct Env {
    pub symbols: RefCell<SymbolTable>,
    pub known: KnownSymbols,
    pub globals: Rc<ClosureInfo>,
    pub vtables: VTables,
}

impl Env {
    /// A fresh environment with the standard method library installed and
    /// the global closure seeded with type objects and constants.
    pub fn new() -> Env {
        crate::stdlib::install()
    }

    /// Define a global variable (host configuration, `-D` defines, tests).
    pub fn declare_global(&self, name: &str, value: Value) {
        let sym = self.symbols.borrow_mut().intern(name);
        self.globals.set_global(sym, value);
    }
}

impl Default for Env {
    fn default() -> Self {
        Env::new()
    }
}
