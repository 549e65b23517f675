//! Bytecode
//!
//! Instruction encoding for the stack VM. A segment is a flat vector of
//! `{opcode, operand, source-location}` records.
//!
//! ## Labels and branches
//!
//! During compilation, branch operands hold symbolic label ids and `Label`
//! pseudo-ops mark targets. [`ByteCodeSegment::resolve_labels`] rewrites
//! branches to signed deltas relative to the emitting instruction's index
//! and strips the `Label` records; it must run before execution.
//!
//! ## Disassembly
//!
//! Two textual formats, both contracts of the test suite:
//!
//! - [`ByteCodeSegment::decompile`]: raw format with instruction indices,
//!   mnemonics padded to eight columns, and symbols rendered `` `name (id)``.
//! - [`ByteCodeSegment::decompile_with`]: compiled-function format, one
//!   tab-indented instruction per line with a single space before operands
//!   and symbol operands followed by a `\t; name` comment.
//!
//! In both formats a branch target prints as `>L<n>` when forward and
//! `L<n>` when backward, where `n` is the target instruction index.

use crate::symbols::{Symbol, SymbolTable};
use crate::tables::{CompiledTables, UserFunctionInfo};
use std::collections::HashMap;

/// Operation codes. `Met0` and `Met1` are spelled `Unary` and `Binary`;
/// they are the same dispatch family with arities 0 and 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    Nop,
    Brk,

    // Stack shuffling
    Dup1,
    Dup2,
    Dup,
    Pop1,
    Pop2,
    Pop,
    Rep1,
    Rep2,
    Rep,

    // Constants
    Ld8,
    Ld16,
    Ld32,
    Ld64,
    LdNull,
    LdBool,
    LdSym,
    LdStr,
    LdObj,

    // Locals and globals
    LdLoc0,
    StLoc0,
    StpLoc0,
    LdLocN,
    StLocN,
    StpLocN,
    LdX,
    StX,
    StpX,

    // Property/member access
    LdProp,
    StProp,
    LdMember,
    StMember,

    // Calls
    Unary,
    Binary,
    Met2,
    Met3,
    Met4,
    Met5,
    Met6,
    Met7,
    Call,
    NewFn,

    // Control flow
    Jmp,
    Bt,
    Bf,
    Label,
    Ret,

    // Escape/unwind
    TillBegin,
    TillDo,
    TillEnd,
    TryBegin,
    TryEnd,
}

impl Opcode {
    pub fn mnemonic(self) -> &'static str {
        match self {
            Opcode::Nop => "Nop",
            Opcode::Brk => "Brk",
            Opcode::Dup1 => "Dup1",
            Opcode::Dup2 => "Dup2",
            Opcode::Dup => "Dup",
            Opcode::Pop1 => "Pop1",
            Opcode::Pop2 => "Pop2",
            Opcode::Pop => "Pop",
            Opcode::Rep1 => "Rep1",
            Opcode::Rep2 => "Rep2",
            Opcode::Rep => "Rep",
            Opcode::Ld8 => "Ld8",
            Opcode::Ld16 => "Ld16",
            Opcode::Ld32 => "Ld32",
            Opcode::Ld64 => "Ld64",
            Opcode::LdNull => "LdNull",
            Opcode::LdBool => "LdBool",
            Opcode::LdSym => "LdSym",
            Opcode::LdStr => "LdStr",
            Opcode::LdObj => "LdObj",
            Opcode::LdLoc0 => "LdLoc0",
            Opcode::StLoc0 => "StLoc0",
            Opcode::StpLoc0 => "StpLoc0",
            Opcode::LdLocN => "LdLocN",
            Opcode::StLocN => "StLocN",
            Opcode::StpLocN => "StpLocN",
            Opcode::LdX => "LdX",
            Opcode::StX => "StX",
            Opcode::StpX => "StpX",
            Opcode::LdProp => "LdProp",
            Opcode::StProp => "StProp",
            Opcode::LdMember => "LdMember",
            Opcode::StMember => "StMember",
            Opcode::Unary => "Unary",
            Opcode::Binary => "Binary",
            Opcode::Met2 => "Met2",
            Opcode::Met3 => "Met3",
            Opcode::Met4 => "Met4",
            Opcode::Met5 => "Met5",
            Opcode::Met6 => "Met6",
            Opcode::Met7 => "Met7",
            Opcode::Call => "Call",
            Opcode::NewFn => "NewFn",
            Opcode::Jmp => "Jmp",
            Opcode::Bt => "Bt",
            Opcode::Bf => "Bf",
            Opcode::Label => "Label",
            Opcode::Ret => "Ret",
            Opcode::TillBegin => "TillBegin",
            Opcode::TillDo => "TillDo",
            Opcode::TillEnd => "TillEnd",
            Opcode::TryBegin => "TryBegin",
            Opcode::TryEnd => "TryEnd",
        }
    }

    /// True for `Jmp`/`Bt`/`Bf`/`TryBegin`, whose operand is a branch
    /// target (a label id before resolution, a signed delta after).
    pub fn is_branch(self) -> bool {
        matches!(
            self,
            Opcode::Jmp | Opcode::Bt | Opcode::Bf | Opcode::TryBegin
        )
    }

    /// Method-dispatch arity for the `Unary`..`Met7` family.
    pub fn method_arity(self) -> Option<u32> {
        match self {
            Opcode::Unary => Some(0),
            Opcode::Binary => Some(1),
            Opcode::Met2 => Some(2),
            Opcode::Met3 => Some(3),
            Opcode::Met4 => Some(4),
            Opcode::Met5 => Some(5),
            Opcode::Met6 => Some(6),
            Opcode::Met7 => Some(7),
            _ => None,
        }
    }

    /// The `MetN` opcode for a given dispatch arity, if one exists.
    pub fn for_method_arity(arity: usize) -> Option<Opcode> {
        match arity {
            0 => Some(Opcode::Unary),
            1 => Some(Opcode::Binary),
            2 => Some(Opcode::Met2),
            3 => Some(Opcode::Met3),
            4 => Some(Opcode::Met4),
            5 => Some(Opcode::Met5),
            6 => Some(Opcode::Met6),
            7 => Some(Opcode::Met7),
            _ => None,
        }
    }
}

/// One operand. Conceptually a union; exactly one variant is meaningful
/// for any given opcode.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Operand {
    None,
    Byte(u8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Bool(bool),
    Symbol(Symbol),
    /// Branch delta (after resolution), label id (before resolution), a
    /// count for `Dup`/`Pop`/`Rep`/`Call`, or a pointer-index into one of
    /// the side tables (strings, objects, functions, tills).
    Index(i32),
    /// Lexical-scope walk for the `LocN` family: `scope` frames up, then
    /// slot `index`.
    Loc { scope: u32, index: u32 },
}

impl Operand {
    pub fn as_index(self) -> i32 {
        match self {
            Operand::Index(n) => n,
            _ => 0,
        }
    }
}

/// One instruction record.
#[derive(Debug, Clone, Copy)]
pub struct ByteCode {
    pub opcode: Opcode,
    pub operand: Operand,
    /// Index into the compiled tables' source-location vector; 0 is the
    /// unknown location.
    pub source_location: i32,
}

/// Net stack effect of one instruction as `(pops, pushes)`. Used by the
/// compiler's temp-depth simulation and by the VM's underflow assertions.
pub fn stack_effect(code: &ByteCode) -> (u32, u32) {
    let n = code.operand.as_index().max(0) as u32;
    match code.opcode {
        Opcode::Nop | Opcode::Brk | Opcode::Label | Opcode::Jmp => (0, 0),
        Opcode::TillBegin | Opcode::TillEnd | Opcode::TryBegin | Opcode::TryEnd => (0, 0),
        Opcode::Dup1 | Opcode::Dup2 | Opcode::Dup => (0, 1),
        Opcode::Pop1 => (1, 0),
        Opcode::Pop2 => (2, 0),
        Opcode::Pop => (n, 0),
        Opcode::Rep1 => (2, 1),
        Opcode::Rep2 => (3, 1),
        Opcode::Rep => (n + 1, 1),
        Opcode::Ld8
        | Opcode::Ld16
        | Opcode::Ld32
        | Opcode::Ld64
        | Opcode::LdNull
        | Opcode::LdBool
        | Opcode::LdSym
        | Opcode::LdStr
        | Opcode::LdObj
        | Opcode::LdLoc0
        | Opcode::LdLocN
        | Opcode::LdX
        | Opcode::NewFn => (0, 1),
        Opcode::StLoc0 | Opcode::StLocN | Opcode::StX => (1, 1),
        Opcode::StpLoc0 | Opcode::StpLocN | Opcode::StpX => (1, 0),
        Opcode::LdProp => (1, 1),
        Opcode::StProp => (2, 1),
        Opcode::LdMember => (2, 1),
        Opcode::StMember => (3, 1),
        Opcode::Unary => (1, 1),
        Opcode::Binary => (2, 1),
        Opcode::Met2 => (3, 1),
        Opcode::Met3 => (4, 1),
        Opcode::Met4 => (5, 1),
        Opcode::Met5 => (6, 1),
        Opcode::Met6 => (7, 1),
        Opcode::Met7 => (8, 1),
        Opcode::Call => (n + 1, 1),
        Opcode::Bt | Opcode::Bf => (1, 0),
        Opcode::Ret => (1, 0),
        // Control never falls through, but the expression position expects
        // a value; model it as a push.
        Opcode::TillDo => (0, 1),
    }
}

/// A compiled instruction stream plus tooling metadata.
#[derive(Debug, Default)]
pub struct ByteCodeSegment {
    pub codes: Vec<ByteCode>,
    /// Per-instruction variable names for the `Loc` families, disassembly
    /// only. Keyed by instruction index; remapped by label resolution.
    pub debug_names: HashMap<u32, Symbol>,
    next_label: u32,
}

impl ByteCodeSegment {
    pub fn new() -> Self {
        ByteCodeSegment::default()
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    /// Append an instruction, returning its index.
    pub fn emit(&mut self, opcode: Opcode, operand: Operand, source_location: i32) -> usize {
        self.codes.push(ByteCode {
            opcode,
            operand,
            source_location,
        });
        self.codes.len() - 1
    }

    /// Record the variable name for a `Loc`-family instruction.
    pub fn set_debug_name(&mut self, index: usize, name: Symbol) {
        self.debug_names.insert(index as u32, name);
    }

    /// Allocate a fresh symbolic label id.
    pub fn alloc_label(&mut self) -> u32 {
        let id = self.next_label;
        self.next_label += 1;
        id
    }

    /// Emit the `Label` pseudo-op marking where `label` resolves to.
    pub fn mark_label(&mut self, label: u32, source_location: i32) {
        self.emit(Opcode::Label, Operand::Index(label as i32), source_location);
    }

    /// Rewrite branch operands from label ids to signed deltas, strip the
    /// `Label` pseudo-ops, and return the map from label id to resolved
    /// instruction index.
    pub fn resolve_labels(&mut self) -> HashMap<u32, u32> {
        // A label resolves to the next real instruction after it (or one
        // past the end).
        let mut targets: HashMap<u32, u32> = HashMap::new();
        let mut new_index_of: Vec<u32> = Vec::with_capacity(self.codes.len());
        let mut new_index = 0u32;
        for code in &self.codes {
            new_index_of.push(new_index);
            if code.opcode == Opcode::Label {
                targets.insert(code.operand.as_index() as u32, new_index);
            } else {
                new_index += 1;
            }
        }

        let mut resolved = Vec::with_capacity(new_index as usize);
        let mut debug_names = HashMap::new();
        for (old_index, code) in self.codes.iter().enumerate() {
            if code.opcode == Opcode::Label {
                continue;
            }
            let mut code = *code;
            if code.opcode.is_branch() {
                let label = code.operand.as_index() as u32;
                let target = *targets
                    .get(&label)
                    .unwrap_or_else(|| panic!("unresolved label L{}", label));
                let here = new_index_of[old_index] as i32;
                code.operand = Operand::Index(target as i32 - here);
            }
            if let Some(name) = self.debug_names.get(&(old_index as u32)) {
                debug_names.insert(resolved.len() as u32, *name);
            }
            resolved.push(code);
        }
        self.codes = resolved;
        self.debug_names = debug_names;
        targets
    }

    /// Raw disassembly: indexed lines, eight-column mnemonics, symbols as
    /// `` `name (id)``.
    pub fn decompile(&self, symbols: &SymbolTable) -> String {
        let mut out = String::new();
        for (i, code) in self.codes.iter().enumerate() {
            if code.opcode == Opcode::Label {
                out.push_str(&format!("{}: L{}:\n", i, i));
                continue;
            }
            let operand = self.raw_operand_text(i, code, symbols);
            if operand.is_empty() {
                out.push_str(&format!("{}: \t{}\n", i, code.opcode.mnemonic()));
            } else {
                out.push_str(&format!(
                    "{}: \t{:<8}{}\n",
                    i,
                    code.opcode.mnemonic(),
                    operand
                ));
            }
        }
        out
    }

    fn raw_operand_text(&self, index: usize, code: &ByteCode, symbols: &SymbolTable) -> String {
        match (code.opcode, code.operand) {
            (op, Operand::Index(delta)) if op.is_branch() => branch_target_text(index, delta),
            (_, Operand::Symbol(sym)) => {
                format!("`{} ({})", symbols.name(sym), sym.id())
            }
            (_, Operand::None) => String::new(),
            (_, Operand::Byte(n)) => n.to_string(),
            (_, Operand::Int16(n)) => n.to_string(),
            (_, Operand::Int32(n)) => n.to_string(),
            (_, Operand::Int64(n)) => n.to_string(),
            (_, Operand::Bool(b)) => b.to_string(),
            (_, Operand::Index(n)) => n.to_string(),
            (_, Operand::Loc { scope, index }) => format!("{} {}", scope, index),
        }
    }

    /// Compiled-function disassembly: tab-indented, single-space operands,
    /// `\t; name` comments for symbols, locals, strings, and till labels.
    pub fn decompile_with(
        &self,
        _func: &UserFunctionInfo,
        tables: &CompiledTables,
        symbols: &SymbolTable,
    ) -> String {
        let mut out = String::new();
        for (i, code) in self.codes.iter().enumerate() {
            if code.opcode == Opcode::Label {
                out.push_str(&format!("L{}:\n", i));
                continue;
            }
            let mnemonic = code.opcode.mnemonic();
            match code.operand {
                Operand::None => out.push_str(&format!("\t{}\n", mnemonic)),
                Operand::Byte(n) => out.push_str(&format!("\t{} {}\n", mnemonic, n)),
                Operand::Int16(n) => out.push_str(&format!("\t{} {}\n", mnemonic, n)),
                Operand::Int32(n) => out.push_str(&format!("\t{} {}\n", mnemonic, n)),
                Operand::Int64(n) => out.push_str(&format!("\t{} {}\n", mnemonic, n)),
                Operand::Bool(b) => out.push_str(&format!("\t{} {}\n", mnemonic, b)),
                Operand::Symbol(sym) => out.push_str(&format!(
                    "\t{} {}\t; {}\n",
                    mnemonic,
                    sym.id(),
                    symbols.name(sym)
                )),
                Operand::Index(n) if code.opcode.is_branch() => {
                    out.push_str(&format!("\t{} {}\n", mnemonic, branch_target_text(i, n)))
                }
                Operand::Index(n) => match code.opcode {
                    Opcode::LdStr => {
                        let text = tables
                            .strings
                            .get(n as usize)
                            .map(|s| s.to_string())
                            .unwrap_or_default();
                        out.push_str(&format!("\t{} {}\t; {:?}\n", mnemonic, n, text));
                    }
                    Opcode::TillDo => {
                        let comment = tables.till_label_name(n as usize);
                        match comment {
                            Some(sym) => out.push_str(&format!(
                                "\t{} {}\t; {}\n",
                                mnemonic,
                                n,
                                symbols.name(sym)
                            )),
                            None => out.push_str(&format!("\t{} {}\n", mnemonic, n)),
                        }
                    }
                    _ => out.push_str(&format!("\t{} {}\n", mnemonic, n)),
                },
                Operand::Loc { scope, index } => {
                    let comment = self
                        .debug_names
                        .get(&(i as u32))
                        .map(|sym| format!("\t; {}", symbols.name(*sym)))
                        .unwrap_or_default();
                    match code.opcode {
                        Opcode::LdLoc0 | Opcode::StLoc0 | Opcode::StpLoc0 => {
                            out.push_str(&format!("\t{} {}{}\n", mnemonic, index, comment))
                        }
                        _ => out.push_str(&format!(
                            "\t{} {} {}{}\n",
                            mnemonic, scope, index, comment
                        )),
                    }
                }
            }
        }
        out
    }
}

fn branch_target_text(index: usize, delta: i32) -> String {
    let target = index as i64 + delta as i64;
    if delta > 0 {
        format!(">L{}", target)
    } else {
        format!("L{}", target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seg() -> ByteCodeSegment {
        ByteCodeSegment::new()
    }

    #[test]
    fn test_label_resolution_strips_labels_and_patches_deltas() {
        let mut s = seg();
        let l_end = s.alloc_label();
        let l_top = s.alloc_label();
        s.emit(Opcode::Ld64, Operand::Int64(0), 0);
        s.mark_label(l_top, 0);
        s.emit(Opcode::Dup1, Operand::None, 0);
        s.emit(Opcode::Bf, Operand::Index(l_end as i32), 0);
        s.emit(Opcode::Jmp, Operand::Index(l_top as i32), 0);
        s.mark_label(l_end, 0);
        s.emit(Opcode::Ret, Operand::None, 0);

        let targets = s.resolve_labels();
        assert_eq!(targets.get(&l_top), Some(&1));
        assert_eq!(targets.get(&l_end), Some(&4));
        // Ld64, Dup1, Bf, Jmp, Ret
        assert_eq!(s.len(), 5);
        assert_eq!(s.codes[2].operand, Operand::Index(2)); // 2 + 2 = 4 (Ret)
        assert_eq!(s.codes[3].operand, Operand::Index(-2)); // 3 - 2 = 1 (Dup1)
    }

    #[test]
    fn test_resolution_remaps_debug_names() {
        let mut s = seg();
        let l = s.alloc_label();
        s.mark_label(l, 0);
        let i = s.emit(Opcode::LdLoc0, Operand::Loc { scope: 0, index: 0 }, 0);
        let mut table = SymbolTable::new();
        let x = table.intern("x");
        s.set_debug_name(i, x);
        s.emit(Opcode::Ret, Operand::None, 0);
        s.resolve_labels();
        assert_eq!(s.debug_names.get(&0), Some(&x));
    }

    #[test]
    fn test_stack_effects_of_shuffles() {
        let code = |opcode, operand| ByteCode {
            opcode,
            operand,
            source_location: 0,
        };
        assert_eq!(stack_effect(&code(Opcode::Rep, Operand::Index(3))), (4, 1));
        assert_eq!(stack_effect(&code(Opcode::Pop, Operand::Index(3))), (3, 0));
        assert_eq!(stack_effect(&code(Opcode::Dup, Operand::Index(4))), (0, 1));
        assert_eq!(stack_effect(&code(Opcode::Call, Operand::Index(2))), (3, 1));
        assert_eq!(stack_effect(&code(Opcode::Met7, Operand::Symbol(
            SymbolTable::new().lookup("+").unwrap()
        ))), (8, 1));
    }

    #[test]
    fn test_disassembling_twice_is_identical() {
        let mut s = seg();
        s.emit(Opcode::Ld64, Operand::Int64(42), 0);
        s.emit(Opcode::Dup1, Operand::None, 0);
        s.emit(Opcode::Ret, Operand::None, 0);
        let symbols = SymbolTable::new();
        assert_eq!(s.decompile(&symbols), s.decompile(&symbols));
    }
}
