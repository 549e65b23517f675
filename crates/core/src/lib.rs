//! Smile Core: the shared foundation of the Smile interpreter
//!
//! This crate holds everything both the compiler and the VM depend on, with
//! no dependencies of its own beyond the decimal backend:
//!
//! - `symbols`: name interning to stable small-integer ids
//! - `value`: the tagged runtime value union and kind dispatch rules
//! - `real`: IEEE-754-2008 decimal floats (32/64/128-bit) over `dec`
//! - `bytecode`: instruction encoding, label resolution, disassembly
//! - `tables`: compiled-function metadata and the side tables
//!
//! Leaves first: `symbols` stands alone; `value` builds on `symbols`;
//! `bytecode` and `tables` build on both. The compiler and VM live in their
//! own crates above this one.

pub mod bytecode;
pub mod real;
pub mod symbols;
pub mod tables;
pub mod value;

// Re-export key types and functions
pub use bytecode::{ByteCode, ByteCodeSegment, Opcode, Operand, stack_effect};
pub use real::{Real32, Real64, Real128};
pub use symbols::{KnownSymbols, Symbol, SymbolTable};
pub use tables::{
    ClosureInfo, ClosureKind, CompiledTables, FunctionArg, TillInfo, TillTarget, UserFunctionInfo,
};
pub use value::{
    Cons, Exception, Host, Kind, NUM_KINDS, NativeError, NativeFn, NativeFunctionInfo,
    NativeResult, ObjectData, PairData, SourcePos, UserFunction, Value, Variables,
};
