//! Compile Scopes
//!
//! A stack of symbol-to-declaration maps, nested by lexical block. Blocks
//! within one function share that function's frame: entering a block saves
//! the slot allocator's high-water mark and leaving it frees the block's
//! slots back to the pool, so sibling blocks reuse the same slot numbers.
//! The function's final slot count is the maximum ever live at once.

use smile_core::symbols::Symbol;
use std::collections::HashMap;

/// How a name is bound, resolved innermost-first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Declaration {
    /// A module-level variable, reached by `LdX`/`StX`.
    Global,
    /// A function parameter: slot `index` in the frame of the function at
    /// `function_depth` (0 = outermost function being compiled).
    Argument { index: u32, function_depth: u32 },
    /// A block or function local, same addressing as arguments.
    Local { index: u32, function_depth: u32 },
    /// A till escape label; `target` indexes the compiled tables'
    /// till-target vector.
    TillLabel { target: u32 },
}

#[derive(Debug, Default)]
pub struct ScopeFrame {
    decls: HashMap<Symbol, Declaration>,
    /// The owning function's slot watermark at block entry, restored on
    /// exit. None for frames that do not own block locals (function roots
    /// handle their own slots).
    pub saved_local_top: Option<u32>,
}

/// The scope chain used during compilation only.
#[derive(Debug, Default)]
pub struct CompileScope {
    frames: Vec<ScopeFrame>,
}

impl CompileScope {
    pub fn new() -> Self {
        CompileScope::default()
    }

    pub fn push(&mut self, saved_local_top: Option<u32>) {
        self.frames.push(ScopeFrame {
            decls: HashMap::new(),
            saved_local_top,
        });
    }

    pub fn pop(&mut self) -> Option<ScopeFrame> {
        self.frames.pop()
    }

    pub fn declare(&mut self, name: Symbol, decl: Declaration) {
        self.frames
            .last_mut()
            .expect("declare with no open scope")
            .decls
            .insert(name, decl);
    }

    /// Innermost declaration of `name`, if any.
    pub fn resolve(&self, name: Symbol) -> Option<Declaration> {
        self.frames
            .iter()
            .rev()
            .find_map(|frame| frame.decls.get(&name).copied())
    }

    /// True if `name` is already declared in the innermost frame (used for
    /// shadowing warnings).
    pub fn declared_here(&self, name: Symbol) -> bool {
        self.frames
            .last()
            .map(|frame| frame.decls.contains_key(&name))
            .unwrap_or(false)
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smile_core::symbols::SymbolTable;

    #[test]
    fn test_inner_declarations_shadow_outer() {
        let mut symbols = SymbolTable::new();
        let x = symbols.intern("x");
        let mut scope = CompileScope::new();
        scope.push(None);
        scope.declare(x, Declaration::Global);
        scope.push(Some(0));
        scope.declare(
            x,
            Declaration::Local {
                index: 0,
                function_depth: 0,
            },
        );
        assert_eq!(
            scope.resolve(x),
            Some(Declaration::Local {
                index: 0,
                function_depth: 0
            })
        );
        scope.pop();
        assert_eq!(scope.resolve(x), Some(Declaration::Global));
    }

    #[test]
    fn test_unresolved_names_are_none() {
        let mut symbols = SymbolTable::new();
        let y = symbols.intern("y");
        let mut scope = CompileScope::new();
        scope.push(None);
        assert_eq!(scope.resolve(y), None);
    }
}
