//! Smile Compiler Library
//!
//! Translates parsed syntax trees (nested `smile_core::Value` lists whose
//! heads are special-form symbols) into linear bytecode plus the compiled
//! tables the VM executes. The lexer and parser are external collaborators;
//! this crate starts from a fully-formed tree.
//!
//! Compilation never throws: diagnostics accumulate on the [`Compiler`] and
//! any `Error`-severity message means the produced code must not be run.
//!
//! ```rust,ignore
//! use smilec::Compiler;
//! use smile_core::{SymbolTable, ClosureInfo, Value};
//!
//! let mut symbols = SymbolTable::new();
//! let globals = ClosureInfo::new_global();
//! let mut compiler = Compiler::new(&mut symbols, globals);
//! let main = compiler.compile_global(&Value::Int64(42));
//! assert!(!compiler.has_errors());
//! let tables = compiler.finish();
//! ```

pub mod compiler;
pub mod diagnostics;
pub mod scope;

pub use compiler::Compiler;
pub use diagnostics::{Diagnostic, Severity, has_errors};
pub use scope::{CompileScope, Declaration};
