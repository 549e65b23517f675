//! The Bytecode Compiler
//!
//! Recursive descent over syntax-tree values, dispatching on the head
//! symbol of each list node. Emission is single-pass: branches are emitted
//! against symbolic labels and resolved to signed deltas when each function
//! ends, and the operand-stack depth is simulated instruction by
//! instruction to size each function's temp area.
//!
//! Statement positions compile with `want_result = false`, which is what
//! turns `StLoc0` into `StpLoc0` in the listings and drops side-effect-free
//! subexpressions entirely.

use crate::diagnostics::{Diagnostic, Severity, has_errors};
use crate::scope::{CompileScope, Declaration};
use smile_core::bytecode::{ByteCodeSegment, Opcode, Operand, stack_effect};
use smile_core::symbols::{KnownSymbols, Symbol, SymbolTable};
use smile_core::tables::{
    ClosureInfo, ClosureKind, CompiledTables, FunctionArg, TillInfo, TillTarget, UserFunctionInfo,
};
use smile_core::value::{Cons, SourcePos, Value};
use std::collections::HashMap;
use std::rc::Rc;

/// Per-function compilation state, stacked for nested `$fn` forms.
struct CompilerFunction {
    segment: ByteCodeSegment,
    args: Vec<FunctionArg>,
    rest_arg: Option<Symbol>,
    num_args: u32,
    /// Next free frame slot. Blocks save and restore this so sibling
    /// blocks reuse slot numbers.
    local_top: u32,
    /// High-water mark; becomes the function's `num_variables`.
    local_max: u32,
    variable_names: Vec<Symbol>,
    indices: HashMap<Symbol, u32>,
    cur_stack: i32,
    max_stack: i32,
    position: Option<SourcePos>,
    /// Tills compiled in this function: table index plus the label id each
    /// escape label resumes at, patched to pcs at function end.
    pending_tills: Vec<(usize, Vec<u32>)>,
}

impl CompilerFunction {
    fn new(num_args: u32, rest_arg: Option<Symbol>, position: Option<SourcePos>) -> Self {
        let base = num_args + rest_arg.is_some() as u32;
        CompilerFunction {
            segment: ByteCodeSegment::new(),
            args: Vec::new(),
            rest_arg,
            num_args,
            local_top: base,
            local_max: base,
            variable_names: Vec::new(),
            indices: HashMap::new(),
            cur_stack: 0,
            max_stack: 0,
            position,
            pending_tills: Vec::new(),
        }
    }
}

/// The compiler for one compilation unit.
pub struct Compiler<'a> {
    pub symbols: &'a mut SymbolTable,
    pub tables: CompiledTables,
    pub diagnostics: Vec<Diagnostic>,
    known: KnownSymbols,
    globals: Rc<ClosureInfo>,
    functions: Vec<CompilerFunction>,
    scope: CompileScope,
    current_loc: i32,
    current_pos: Option<SourcePos>,
    tmp_name: Symbol,
}

impl<'a> Compiler<'a> {
    pub fn new(symbols: &'a mut SymbolTable, globals: Rc<ClosureInfo>) -> Self {
        let known = KnownSymbols::new(symbols);
        let tmp_name = symbols.intern("$tmp");
        Compiler {
            symbols,
            tables: CompiledTables::new(),
            diagnostics: Vec::new(),
            known,
            globals,
            functions: Vec::new(),
            scope: CompileScope::new(),
            current_loc: 0,
            current_pos: None,
            tmp_name,
        }
    }

    /// Compile a whole program into its global function. Diagnostics
    /// accumulate on the compiler; check [`Compiler::has_errors`] before
    /// running the result.
    pub fn compile_global(&mut self, expr: &Value) -> Rc<UserFunctionInfo> {
        self.begin_function(&[], None, None);
        self.compile_expr(expr, true);
        self.emit(Opcode::Ret, Operand::None);
        let func = self.end_function();
        self.tables.global_function = Some(func.clone());
        func
    }

    pub fn has_errors(&self) -> bool {
        has_errors(&self.diagnostics, false)
    }

    /// Consume the compiler, yielding the immutable compiled tables.
    pub fn finish(self) -> CompiledTables {
        self.tables
    }

    // ---------------------------------------------------------------------
    // Function lifecycle

    fn begin_function(
        &mut self,
        params: &[Symbol],
        rest_arg: Option<Symbol>,
        position: Option<SourcePos>,
    ) {
        let depth = self.functions.len() as u32;
        let mut func = CompilerFunction::new(params.len() as u32, rest_arg, position);
        self.scope.push(None);
        for (i, &name) in params.iter().enumerate() {
            self.scope.declare(
                name,
                Declaration::Argument {
                    index: i as u32,
                    function_depth: depth,
                },
            );
            func.variable_names.push(name);
            func.indices.insert(name, i as u32);
        }
        if let Some(rest) = rest_arg {
            let index = params.len() as u32;
            self.scope.declare(
                rest,
                Declaration::Argument {
                    index,
                    function_depth: depth,
                },
            );
            func.variable_names.push(rest);
            func.indices.insert(rest, index);
        }
        self.functions.push(func);
    }

    fn end_function(&mut self) -> Rc<UserFunctionInfo> {
        let mut func = self.functions.pop().expect("function stack underflow");
        self.scope.pop();

        let label_map = func.segment.resolve_labels();
        for (till_index, resume_labels) in func.pending_tills.drain(..) {
            let pcs: Vec<u32> = resume_labels
                .iter()
                .map(|label| *label_map.get(label).expect("unresolved till label"))
                .collect();
            self.tables.tills[till_index].resume_pcs = pcs;
        }

        let parent = if self.functions.is_empty() {
            Some(self.globals.clone())
        } else {
            None
        };
        let closure_info = Rc::new(ClosureInfo {
            parent,
            kind: ClosureKind::Local,
            num_args: func.num_args,
            num_variables: func.local_max,
            temp_size: func.max_stack as u32,
            variable_names: func.variable_names,
            indices: func.indices,
            globals: None,
        });
        Rc::new(UserFunctionInfo {
            closure_info,
            segment: func.segment,
            args: func.args,
            rest_arg: func.rest_arg,
            position: func.position,
        })
    }

    // ---------------------------------------------------------------------
    // Emission helpers

    fn func(&mut self) -> &mut CompilerFunction {
        self.functions.last_mut().expect("no open function")
    }

    fn function_depth(&self) -> u32 {
        (self.functions.len() - 1) as u32
    }

    fn emit(&mut self, opcode: Opcode, operand: Operand) -> usize {
        let loc = self.current_loc;
        let func = self.func();
        let index = func.segment.emit(opcode, operand, loc);
        let code = func.segment.codes[index];
        let (pops, pushes) = stack_effect(&code);
        func.cur_stack = (func.cur_stack - pops as i32).max(0) + pushes as i32;
        func.max_stack = func.max_stack.max(func.cur_stack);
        index
    }

    fn alloc_label(&mut self) -> u32 {
        self.func().segment.alloc_label()
    }

    fn mark_label(&mut self, label: u32) {
        let loc = self.current_loc;
        self.func().segment.mark_label(label, loc);
    }

    fn emit_branch(&mut self, opcode: Opcode, label: u32) {
        self.emit(opcode, Operand::Index(label as i32));
    }

    fn depth(&mut self) -> i32 {
        self.func().cur_stack
    }

    /// Reset the simulated depth at a control-flow join.
    fn set_depth(&mut self, depth: i32) {
        self.func().cur_stack = depth;
    }

    fn alloc_local(&mut self, name: Symbol) -> u32 {
        let func = self.func();
        let index = func.local_top;
        func.local_top += 1;
        func.local_max = func.local_max.max(func.local_top);
        if (index as usize) < func.variable_names.len() {
            func.variable_names[index as usize] = name;
        } else {
            func.variable_names.push(name);
        }
        func.indices.insert(name, index);
        index
    }

    fn error(&mut self, message: impl Into<String>) {
        self.diagnostics
            .push(Diagnostic::error(self.current_pos.as_ref(), message));
    }

    fn warning(&mut self, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic::new(
            Severity::Warning,
            self.current_pos.as_ref(),
            message,
        ));
    }

    // ---------------------------------------------------------------------
    // Expression compilation

    fn compile_expr(&mut self, expr: &Value, want: bool) {
        match expr {
            Value::List(cell) => {
                if let Some(pos) = &cell.pos {
                    self.current_loc = self.tables.add_source_location(pos);
                    self.current_pos = Some(pos.clone());
                }
                self.compile_form(cell, want);
            }
            Value::Symbol(sym) => self.compile_symbol_load(*sym, want),
            atom => {
                if want {
                    self.compile_constant(atom);
                }
            }
        }
    }

    fn compile_constant(&mut self, value: &Value) {
        match value {
            Value::Null => {
                self.emit(Opcode::LdNull, Operand::None);
            }
            Value::Bool(b) => {
                self.emit(Opcode::LdBool, Operand::Bool(*b));
            }
            Value::Byte(n) => {
                self.emit(Opcode::Ld8, Operand::Byte(*n));
            }
            Value::Int16(n) => {
                self.emit(Opcode::Ld16, Operand::Int16(*n));
            }
            Value::Int32(n) => {
                self.emit(Opcode::Ld32, Operand::Int32(*n));
            }
            Value::Int64(n) => {
                self.emit(Opcode::Ld64, Operand::Int64(*n));
            }
            Value::String(s) => {
                let index = self.tables.add_string(s);
                self.emit(Opcode::LdStr, Operand::Index(index as i32));
            }
            Value::Symbol(sym) => {
                self.emit(Opcode::LdSym, Operand::Symbol(*sym));
            }
            other => {
                // Reals, pairs, prebuilt lists, and function values become
                // constant-object pool entries.
                let index = self.tables.add_object(other.clone());
                self.emit(Opcode::LdObj, Operand::Index(index as i32));
            }
        }
    }

    fn compile_symbol_load(&mut self, sym: Symbol, want: bool) {
        match self.resolve(sym) {
            Some(Declaration::Local {
                index,
                function_depth,
            })
            | Some(Declaration::Argument {
                index,
                function_depth,
            }) => {
                if want {
                    let scope = self.function_depth() - function_depth;
                    let idx = if scope == 0 {
                        self.emit(Opcode::LdLoc0, Operand::Loc { scope: 0, index })
                    } else {
                        self.emit(Opcode::LdLocN, Operand::Loc { scope, index })
                    };
                    self.func().segment.set_debug_name(idx, sym);
                }
            }
            Some(Declaration::Global) => {
                if want {
                    self.emit(Opcode::LdX, Operand::Symbol(sym));
                }
            }
            Some(Declaration::TillLabel { target }) => {
                // Escaping never falls through; the simulated push only
                // matters in value position.
                self.emit(Opcode::TillDo, Operand::Index(target as i32));
                if !want {
                    self.func().cur_stack -= 1;
                }
            }
            None => {
                let name = self.symbols.name(sym);
                self.error(format!("variable '{}' is not declared", name));
                if want {
                    self.emit(Opcode::LdNull, Operand::None);
                }
            }
        }
    }

    /// Scope-chain resolution with the global closure as the outermost
    /// fallback.
    fn resolve(&self, sym: Symbol) -> Option<Declaration> {
        if let Some(decl) = self.scope.resolve(sym) {
            return Some(decl);
        }
        if self.globals.has_global(sym) {
            return Some(Declaration::Global);
        }
        None
    }

    fn compile_form(&mut self, cell: &Rc<Cons>, want: bool) {
        let args: Vec<Value> = cell.rest.iter_list().cloned().collect();
        if let Value::Symbol(head) = &cell.first {
            let head = *head;
            let k = self.known.clone();
            if head == k.progn {
                return self.compile_progn(&args, want);
            } else if head == k.set {
                return self.compile_set(&args, want);
            } else if head == k.if_ {
                return self.compile_if(&args, want);
            } else if head == k.while_ {
                return self.compile_while(&args, want);
            } else if head == k.till {
                return self.compile_till(&args, want);
            } else if head == k.fn_ {
                return self.compile_fn(&args, want);
            } else if head == k.quote {
                return self.compile_quote(&args, want);
            } else if head == k.dot {
                return self.compile_dot_load(&args, want);
            } else if head == k.index {
                return self.compile_index_load(&args, want);
            } else if head == k.scope {
                return self.compile_scope(&args, want);
            } else if head == k.and {
                return self.compile_and_or(&args, want, true);
            } else if head == k.or {
                return self.compile_and_or(&args, want, false);
            } else if head == k.try_ {
                return self.compile_try(&args, want);
            }
        }
        self.compile_application(&cell.first, &args, want);
    }

    fn compile_progn(&mut self, args: &[Value], want: bool) {
        match args.split_last() {
            None => {
                if want {
                    self.emit(Opcode::LdNull, Operand::None);
                }
            }
            Some((last, init)) => {
                for stmt in init {
                    self.compile_expr(stmt, false);
                }
                self.compile_expr(last, want);
            }
        }
    }

    fn compile_scope(&mut self, args: &[Value], want: bool) {
        let Some((vars, body)) = args.split_first() else {
            if want {
                self.emit(Opcode::LdNull, Operand::None);
            }
            return;
        };
        let saved = self.func().local_top;
        self.scope.push(Some(saved));
        let depth = self.function_depth();
        for var in vars.iter_list() {
            match var {
                Value::Symbol(sym) => {
                    if self.scope.declared_here(*sym) {
                        let name = self.symbols.name(*sym);
                        self.warning(format!("variable '{}' is declared twice", name));
                    }
                    let index = self.alloc_local(*sym);
                    self.scope.declare(
                        *sym,
                        Declaration::Local {
                            index,
                            function_depth: depth,
                        },
                    );
                }
                _ => self.error("scope declarations must be symbols"),
            }
        }
        self.compile_progn(body, want);
        self.scope.pop();
        self.func().local_top = saved;
    }

    fn compile_set(&mut self, args: &[Value], want: bool) {
        if args.len() != 2 {
            self.error("$set requires a target and a value");
            if want {
                self.emit(Opcode::LdNull, Operand::None);
            }
            return;
        }
        let (target, value) = (&args[0], &args[1]);
        match target {
            Value::Symbol(sym) => self.compile_store(*sym, value, want),
            Value::List(cell) => {
                let inner: Vec<Value> = cell.rest.iter_list().cloned().collect();
                match &cell.first {
                    Value::Symbol(head) if *head == self.known.dot && inner.len() == 2 => {
                        let Value::Symbol(prop) = inner[1].clone() else {
                            self.error("property name must be a symbol");
                            return;
                        };
                        self.compile_expr(&inner[0], true);
                        self.compile_expr(value, true);
                        self.emit(Opcode::StProp, Operand::Symbol(prop));
                        if !want {
                            self.emit(Opcode::Pop1, Operand::None);
                        }
                    }
                    Value::Symbol(head) if *head == self.known.index && inner.len() == 2 => {
                        self.compile_expr(&inner[0], true);
                        self.compile_expr(&inner[1], true);
                        self.compile_expr(value, true);
                        self.emit(Opcode::StMember, Operand::None);
                        if !want {
                            self.emit(Opcode::Pop1, Operand::None);
                        }
                    }
                    _ => self.error("invalid assignment target"),
                }
            }
            _ => self.error("invalid assignment target"),
        }
    }

    fn compile_store(&mut self, sym: Symbol, value: &Value, want: bool) {
        match self.resolve(sym) {
            Some(Declaration::Local {
                index,
                function_depth,
            })
            | Some(Declaration::Argument {
                index,
                function_depth,
            }) => {
                self.compile_expr(value, true);
                let scope = self.function_depth() - function_depth;
                let opcode = match (scope, want) {
                    (0, true) => Opcode::StLoc0,
                    (0, false) => Opcode::StpLoc0,
                    (_, true) => Opcode::StLocN,
                    (_, false) => Opcode::StpLocN,
                };
                let idx = self.emit(opcode, Operand::Loc { scope, index });
                self.func().segment.set_debug_name(idx, sym);
            }
            Some(Declaration::Global) => {
                self.compile_expr(value, true);
                let opcode = if want { Opcode::StX } else { Opcode::StpX };
                self.emit(opcode, Operand::Symbol(sym));
            }
            Some(Declaration::TillLabel { .. }) => {
                let name = self.symbols.name(sym);
                self.error(format!("cannot assign to till label '{}'", name));
            }
            None => {
                let name = self.symbols.name(sym);
                self.error(format!("variable '{}' is not declared", name));
            }
        }
    }

    fn compile_if(&mut self, args: &[Value], want: bool) {
        if args.is_empty() {
            self.error("$if requires a condition");
            return;
        }
        let cond = &args[0];
        let then = args.get(1).cloned().unwrap_or(Value::Null);
        let els = args.get(2).cloned();

        if !want {
            let then_dead = is_meaningless(&then, &self.known);
            let else_dead = els.as_ref().is_none_or(|e| is_meaningless(e, &self.known));
            if then_dead && else_dead {
                self.compile_expr(cond, false);
                return;
            }
            if then_dead {
                self.compile_expr(cond, true);
                let l_end = self.alloc_label();
                self.emit_branch(Opcode::Bt, l_end);
                self.compile_expr(els.as_ref().unwrap(), false);
                self.mark_label(l_end);
                return;
            }
            if else_dead {
                self.compile_expr(cond, true);
                let l_end = self.alloc_label();
                self.emit_branch(Opcode::Bf, l_end);
                self.compile_expr(&then, false);
                self.mark_label(l_end);
                return;
            }
            self.compile_expr(cond, true);
            let l_else = self.alloc_label();
            let l_end = self.alloc_label();
            self.emit_branch(Opcode::Bf, l_else);
            let join = self.depth();
            self.compile_expr(&then, false);
            self.emit_branch(Opcode::Jmp, l_end);
            self.mark_label(l_else);
            self.set_depth(join);
            self.compile_expr(els.as_ref().unwrap(), false);
            self.mark_label(l_end);
            return;
        }

        self.compile_expr(cond, true);
        let l_else = self.alloc_label();
        let l_end = self.alloc_label();
        self.emit_branch(Opcode::Bf, l_else);
        let join = self.depth();
        self.compile_expr(&then, true);
        self.emit_branch(Opcode::Jmp, l_end);
        self.mark_label(l_else);
        self.set_depth(join);
        match &els {
            Some(e) => self.compile_expr(e, true),
            None => {
                self.emit(Opcode::LdNull, Operand::None);
            }
        }
        self.mark_label(l_end);
    }

    fn compile_while(&mut self, args: &[Value], want: bool) {
        // Two-element form is [cond post]; three-element is [pre cond post].
        let (pre, cond, post) = match args.len() {
            2 => (Value::Null, args[0].clone(), args[1].clone()),
            3 => (args[0].clone(), args[1].clone(), args[2].clone()),
            _ => {
                self.error("$while requires two or three operands");
                return;
            }
        };
        let pre_null = pre.is_null();
        let cond_null = cond.is_null();
        let post_null = post.is_null();
        let base = self.depth();

        if cond_null {
            // Infinite loop; only an escape leaves it.
            let l_top = self.alloc_label();
            self.mark_label(l_top);
            self.compile_expr(&pre, false);
            self.compile_expr(&post, false);
            self.emit_branch(Opcode::Jmp, l_top);
            if want {
                self.emit(Opcode::LdNull, Operand::None);
            }
            return;
        }

        if pre_null && post_null {
            // Condition-only loop; its value is Null.
            let l_cond = self.alloc_label();
            self.mark_label(l_cond);
            self.compile_expr(&cond, true);
            self.emit_branch(Opcode::Bt, l_cond);
            if want {
                self.emit(Opcode::LdNull, Operand::None);
            }
            return;
        }

        if pre_null {
            // Condition at top; each iteration's body value replaces the
            // last, Null if the body never runs.
            let l_body = self.alloc_label();
            let l_cond = self.alloc_label();
            if want {
                self.emit(Opcode::LdNull, Operand::None);
                self.emit_branch(Opcode::Jmp, l_cond);
                self.mark_label(l_body);
                self.set_depth(base + 1);
                self.emit(Opcode::Pop1, Operand::None);
                self.compile_expr(&post, true);
            } else {
                self.emit_branch(Opcode::Jmp, l_cond);
                self.mark_label(l_body);
                self.compile_expr(&post, false);
            }
            self.mark_label(l_cond);
            self.compile_expr(&cond, true);
            self.emit_branch(Opcode::Bt, l_body);
            return;
        }

        if post_null {
            // "pre; cond" form: the loop's value is the last pre value.
            if want {
                let l_body = self.alloc_label();
                let l_pre = self.alloc_label();
                self.emit_branch(Opcode::Jmp, l_pre);
                self.mark_label(l_body);
                self.set_depth(base + 1);
                self.emit(Opcode::Pop1, Operand::None);
                self.mark_label(l_pre);
                self.compile_expr(&pre, true);
                self.compile_expr(&cond, true);
                self.emit_branch(Opcode::Bt, l_body);
            } else {
                let l_pre = self.alloc_label();
                self.mark_label(l_pre);
                self.compile_expr(&pre, false);
                self.compile_expr(&cond, true);
                self.emit_branch(Opcode::Bt, l_pre);
            }
            return;
        }

        // Full pre-cond-post shape. Exits when the condition goes false,
        // with the last pre value as the loop's value.
        let l_pre = self.alloc_label();
        let l_exit = self.alloc_label();
        self.mark_label(l_pre);
        if want {
            self.compile_expr(&pre, true);
            self.compile_expr(&cond, true);
            self.emit_branch(Opcode::Bf, l_exit);
            self.emit(Opcode::Pop1, Operand::None);
            self.compile_expr(&post, false);
            self.emit_branch(Opcode::Jmp, l_pre);
            self.mark_label(l_exit);
            self.set_depth(base + 1);
        } else {
            self.compile_expr(&pre, false);
            self.compile_expr(&cond, true);
            self.emit_branch(Opcode::Bf, l_exit);
            self.compile_expr(&post, false);
            self.emit_branch(Opcode::Jmp, l_pre);
            self.mark_label(l_exit);
        }
    }

    fn compile_till(&mut self, args: &[Value], want: bool) {
        if args.len() < 2 {
            self.error("$till requires a label list and a body");
            if want {
                self.emit(Opcode::LdNull, Operand::None);
            }
            return;
        }
        let mut labels = Vec::new();
        for label in args[0].iter_list() {
            match label {
                Value::Symbol(sym) => labels.push(*sym),
                _ => self.error("till labels must be symbols"),
            }
        }
        let body = &args[1];
        let whens = args.get(2);

        let till_index = self.tables.tills.len();
        self.tables.tills.push(TillInfo {
            labels: labels.clone(),
            resume_pcs: Vec::new(),
        });
        let target_base = self.tables.till_targets.len() as u32;
        for k in 0..labels.len() as u32 {
            self.tables.till_targets.push(TillTarget {
                till: till_index as u32,
                label: k,
            });
        }

        let saved = self.func().local_top;
        self.scope.push(Some(saved));
        for (k, &sym) in labels.iter().enumerate() {
            self.scope.declare(
                sym,
                Declaration::TillLabel {
                    target: target_base + k as u32,
                },
            );
        }

        let base = self.depth();
        self.emit(Opcode::TillBegin, Operand::Index(till_index as i32));

        // The body repeats until one of the labels escapes. Each resume
        // point starts with the TillEnd that retires the catch entry;
        // labels without a when clause yield Null.
        let l_top = self.alloc_label();
        let l_null = self.alloc_label();
        let l_end = self.alloc_label();
        self.mark_label(l_top);
        self.compile_expr(body, false);
        self.emit_branch(Opcode::Jmp, l_top);

        self.mark_label(l_null);
        self.set_depth(base);
        self.emit(Opcode::TillEnd, Operand::None);
        self.emit(Opcode::LdNull, Operand::None);

        let mut resume_labels = vec![l_null; labels.len()];
        let mut when_clauses: Vec<(usize, Value)> = Vec::new();
        if let Some(whens) = whens {
            for clause in whens.iter_list() {
                let parts: Vec<Value> = clause.iter_list().cloned().collect();
                if parts.len() != 2 {
                    self.error("each when clause must be a [label handler] pair");
                    continue;
                }
                let Value::Symbol(label_sym) = parts[0].clone() else {
                    self.error("when clause label must be a symbol");
                    continue;
                };
                match labels.iter().position(|&l| l == label_sym) {
                    Some(k) => when_clauses.push((k, parts[1].clone())),
                    None => {
                        let name = self.symbols.name(label_sym);
                        self.error(format!("'{}' is not a label of this till", name));
                    }
                }
            }
        }
        if !when_clauses.is_empty() {
            self.emit_branch(Opcode::Jmp, l_end);
            let last = when_clauses.len() - 1;
            for (i, (k, handler)) in when_clauses.iter().enumerate() {
                let l_when = self.alloc_label();
                resume_labels[*k] = l_when;
                self.mark_label(l_when);
                self.set_depth(base);
                self.emit(Opcode::TillEnd, Operand::None);
                self.compile_expr(handler, true);
                if i != last {
                    self.emit_branch(Opcode::Jmp, l_end);
                }
            }
        }
        self.mark_label(l_end);
        self.set_depth(base + 1);
        self.func().pending_tills.push((till_index, resume_labels));

        self.scope.pop();
        self.func().local_top = saved;
        if !want {
            self.emit(Opcode::Pop1, Operand::None);
        }
    }

    fn compile_fn(&mut self, args: &[Value], want: bool) {
        if args.is_empty() {
            self.error("$fn requires an argument list");
            if want {
                self.emit(Opcode::LdNull, Operand::None);
            }
            return;
        }
        let mut params: Vec<Symbol> = Vec::new();
        let mut defaults: Vec<Option<Value>> = Vec::new();
        let mut rest_arg: Option<Symbol> = None;
        for param in args[0].iter_list() {
            if rest_arg.is_some() {
                self.error("rest argument must be last");
                break;
            }
            match param {
                Value::Symbol(sym) => {
                    let name = self.symbols.name(*sym);
                    if let Some(stripped) = name.strip_suffix("...") {
                        rest_arg = Some(self.symbols.intern(stripped));
                    } else {
                        params.push(*sym);
                        defaults.push(None);
                    }
                }
                Value::List(_) => {
                    let parts: Vec<Value> = param.iter_list().cloned().collect();
                    match parts.as_slice() {
                        [Value::Symbol(sym), default] => {
                            params.push(*sym);
                            defaults.push(Some(default.clone()));
                        }
                        _ => self.error("defaulted argument must be [name default]"),
                    }
                }
                _ => self.error("function arguments must be symbols"),
            }
        }

        self.begin_function(&params, rest_arg, self.current_pos.clone());
        let arg_infos: Vec<FunctionArg> = params
            .iter()
            .zip(defaults.iter())
            .map(|(&name, default)| FunctionArg {
                name,
                default: default.as_ref().map(|expr| self.compile_thunk(expr)),
            })
            .collect();
        self.func().args = arg_infos;
        self.compile_progn(&args[1..], true);
        self.emit(Opcode::Ret, Operand::None);
        let func = self.end_function();

        let index = self.tables.add_function(func);
        self.emit(Opcode::NewFn, Operand::Index(index as i32));
        if !want {
            self.emit(Opcode::Pop1, Operand::None);
        }
    }

    /// Compile a parameterless nested function around one expression,
    /// used for default argument values.
    fn compile_thunk(&mut self, expr: &Value) -> Rc<UserFunctionInfo> {
        self.begin_function(&[], None, self.current_pos.clone());
        self.compile_expr(expr, true);
        self.emit(Opcode::Ret, Operand::None);
        let func = self.end_function();
        self.tables.add_function(func.clone());
        func
    }

    fn compile_quote(&mut self, args: &[Value], want: bool) {
        let quoted = args.first().cloned().unwrap_or(Value::Null);
        if !want {
            return;
        }
        match &quoted {
            Value::Symbol(sym) => {
                self.emit(Opcode::LdSym, Operand::Symbol(*sym));
            }
            Value::List(_) | Value::Pair(_) => {
                let index = self.tables.add_object(quoted.clone());
                self.emit(Opcode::LdObj, Operand::Index(index as i32));
            }
            atom => self.compile_constant(atom),
        }
    }

    fn compile_dot_load(&mut self, args: &[Value], want: bool) {
        if args.len() != 2 {
            self.error("$dot requires an object and a property name");
            return;
        }
        let Value::Symbol(prop) = args[1].clone() else {
            self.error("property name must be a symbol");
            return;
        };
        self.compile_expr(&args[0], true);
        self.emit(Opcode::LdProp, Operand::Symbol(prop));
        if !want {
            self.emit(Opcode::Pop1, Operand::None);
        }
    }

    fn compile_index_load(&mut self, args: &[Value], want: bool) {
        if args.len() != 2 {
            self.error("$index requires an object and an index");
            return;
        }
        self.compile_expr(&args[0], true);
        self.compile_expr(&args[1], true);
        self.emit(Opcode::LdMember, Operand::None);
        if !want {
            self.emit(Opcode::Pop1, Operand::None);
        }
    }

    fn compile_and_or(&mut self, args: &[Value], want: bool, is_and: bool) {
        let l_short = self.alloc_label();
        let l_end = self.alloc_label();
        let base = self.depth();
        let (short_branch, result, short_result) = if is_and {
            (Opcode::Bf, true, false)
        } else {
            (Opcode::Bt, false, true)
        };
        for operand in args {
            self.compile_expr(operand, true);
            self.emit_branch(short_branch, l_short);
        }
        self.emit(Opcode::LdBool, Operand::Bool(result));
        self.emit_branch(Opcode::Jmp, l_end);
        self.mark_label(l_short);
        self.set_depth(base);
        self.emit(Opcode::LdBool, Operand::Bool(short_result));
        self.mark_label(l_end);
        if !want {
            self.emit(Opcode::Pop1, Operand::None);
        }
    }

    fn compile_try(&mut self, args: &[Value], want: bool) {
        if args.len() != 2 {
            self.error("$try requires a body and a handler");
            if want {
                self.emit(Opcode::LdNull, Operand::None);
            }
            return;
        }
        let saved = self.func().local_top;
        let handler_slot = self.alloc_local(self.tmp_name);
        let exception_slot = self.alloc_local(self.tmp_name);
        let l_catch = self.alloc_label();
        let l_end = self.alloc_label();

        self.compile_expr(&args[1], true);
        self.emit(
            Opcode::StpLoc0,
            Operand::Loc {
                scope: 0,
                index: handler_slot,
            },
        );
        let base = self.depth();
        self.emit_branch(Opcode::TryBegin, l_catch);
        self.compile_expr(&args[0], true);
        self.emit(Opcode::TryEnd, Operand::None);
        self.emit_branch(Opcode::Jmp, l_end);

        // The unwinder resumes here with the exception value pushed.
        self.mark_label(l_catch);
        self.set_depth(base + 1);
        self.emit(
            Opcode::StpLoc0,
            Operand::Loc {
                scope: 0,
                index: exception_slot,
            },
        );
        self.emit(
            Opcode::LdLoc0,
            Operand::Loc {
                scope: 0,
                index: handler_slot,
            },
        );
        self.emit(
            Opcode::LdLoc0,
            Operand::Loc {
                scope: 0,
                index: exception_slot,
            },
        );
        self.emit(Opcode::Call, Operand::Index(1));
        self.mark_label(l_end);
        self.set_depth(base + 1);
        self.func().local_top = saved;
        if !want {
            self.emit(Opcode::Pop1, Operand::None);
        }
    }

    fn compile_application(&mut self, head: &Value, args: &[Value], want: bool) {
        // Method fast path: an application whose head is a property lookup
        // dispatches on the receiver's kind instead of going through Call.
        if let Value::List(head_cell) = head
            && let Value::Symbol(hs) = &head_cell.first
            && *hs == self.known.dot
        {
            let dot_args: Vec<Value> = head_cell.rest.iter_list().cloned().collect();
            if let [receiver, Value::Symbol(method)] = dot_args.as_slice() {
                match Opcode::for_method_arity(args.len()) {
                    Some(opcode) => {
                        let method = *method;
                        self.compile_expr(receiver, true);
                        for arg in args {
                            self.compile_expr(arg, true);
                        }
                        self.emit(opcode, Operand::Symbol(method));
                        if !want {
                            self.emit(Opcode::Pop1, Operand::None);
                        }
                        return;
                    }
                    None => {
                        self.error("too many arguments for a method call (limit 7)");
                        return;
                    }
                }
            }
        }
        self.compile_expr(head, true);
        for arg in args {
            self.compile_expr(arg, true);
        }
        self.emit(Opcode::Call, Operand::Index(args.len() as i32));
        if !want {
            self.emit(Opcode::Pop1, Operand::None);
        }
    }
}

/// True for expressions whose evaluation has no effect, which statement
/// positions drop entirely.
fn is_meaningless(expr: &Value, known: &KnownSymbols) -> bool {
    match expr {
        Value::Null
        | Value::Bool(_)
        | Value::Byte(_)
        | Value::Int16(_)
        | Value::Int32(_)
        | Value::Int64(_)
        | Value::Real32(_)
        | Value::Real64(_)
        | Value::Real128(_)
        | Value::String(_) => true,
        Value::List(cell) => matches!(&cell.first, Value::Symbol(head) if *head == known.quote),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sym(t: &mut SymbolTable, name: &str) -> Value {
        Value::Symbol(t.intern(name))
    }

    fn form(t: &mut SymbolTable, head: &str, mut items: Vec<Value>) -> Value {
        items.insert(0, sym(t, head));
        Value::list_from(items)
    }

    fn binop(t: &mut SymbolTable, a: Value, op: &str, b: Value) -> Value {
        let dotted = {
            let op = sym(t, op);
            form(t, "$dot", vec![a, op])
        };
        Value::list_from(vec![dotted, b])
    }

    fn compile_one(expr: &Value, symbols: &mut SymbolTable) -> (Rc<UserFunctionInfo>, CompiledTables) {
        let globals = ClosureInfo::new_global();
        let mut compiler = Compiler::new(symbols, globals);
        let func = compiler.compile_global(expr);
        assert!(!compiler.has_errors(), "{:?}", compiler.diagnostics);
        (func, compiler.finish())
    }

    #[test]
    fn test_and_emits_short_circuit_branches() {
        let mut t = SymbolTable::new();
        let a = binop(&mut t, Value::Int64(1), "<", Value::Int64(2));
        let b = binop(&mut t, Value::Int64(3), "<", Value::Int64(4));
        let expr = form(&mut t, "$and", vec![a, b]);
        let (func, tables) = compile_one(&expr, &mut t);
        let lt = t.lookup("<").unwrap().id();
        let expected = format!(
            "\tLd64 1\n\tLd64 2\n\tBinary {lt}\t; <\n\tBf >L10\n\
             \tLd64 3\n\tLd64 4\n\tBinary {lt}\t; <\n\tBf >L10\n\
             \tLdBool true\n\tJmp >L11\n\tLdBool false\n\tRet\n"
        );
        assert_eq!(func.segment.decompile_with(&func, &tables, &t), expected);
        assert_eq!(func.closure_info.temp_size, 2);
    }

    #[test]
    fn test_or_inverts_the_short_circuit_sense() {
        let mut t = SymbolTable::new();
        let a = binop(&mut t, Value::Int64(1), "<", Value::Int64(2));
        let expr = form(&mut t, "$or", vec![a]);
        let (func, tables) = compile_one(&expr, &mut t);
        let listing = func.segment.decompile_with(&func, &tables, &t);
        assert!(listing.contains("\tBt >L"));
        assert!(listing.contains("\tLdBool false\n\tJmp >L"));
    }

    #[test]
    fn test_string_literals_intern_into_the_pool() {
        let mut t = SymbolTable::new();
        let expr = Value::String("hi".into());
        let (func, tables) = compile_one(&expr, &mut t);
        assert_eq!(
            func.segment.decompile_with(&func, &tables, &t),
            "\tLdStr 0\t; \"hi\"\n\tRet\n"
        );
        assert_eq!(tables.strings.len(), 1);
    }

    #[test]
    fn test_try_stashes_the_handler_and_branches_to_it() {
        let mut t = SymbolTable::new();
        let params = Value::list_from(vec![sym(&mut t, "e")]);
        let handler = form(&mut t, "$fn", vec![params, Value::Int64(2)]);
        let expr = form(&mut t, "$try", vec![Value::Int64(1), handler]);
        let (func, tables) = compile_one(&expr, &mut t);
        let expected = "\tNewFn 0\n\
                        \tStpLoc0 0\n\
                        \tTryBegin >L6\n\
                        \tLd64 1\n\
                        \tTryEnd\n\
                        \tJmp >L10\n\
                        \tStpLoc0 1\n\
                        \tLdLoc0 0\n\
                        \tLdLoc0 1\n\
                        \tCall 1\n\
                        \tRet\n";
        assert_eq!(func.segment.decompile_with(&func, &tables, &t), expected);
    }

    #[test]
    fn test_nested_functions_address_enclosing_locals_lexically() {
        let mut t = SymbolTable::new();
        let set_x = {
            let x = sym(&mut t, "x");
            form(&mut t, "$set", vec![x, Value::Int64(1)])
        };
        let inner = {
            let x = sym(&mut t, "x");
            form(&mut t, "$fn", vec![Value::Null, x])
        };
        let set_f = {
            let f = sym(&mut t, "f");
            form(&mut t, "$set", vec![f, inner])
        };
        let vars = Value::list_from(vec![sym(&mut t, "x"), sym(&mut t, "f")]);
        let expr = form(&mut t, "$scope", vec![vars, set_x, set_f]);
        let (_func, tables) = compile_one(&expr, &mut t);
        let child = &tables.functions[0];
        assert_eq!(
            child.segment.decompile_with(child, &tables, &t),
            "\tLdLocN 1 0\t; x\n\tRet\n"
        );
    }

    #[test]
    fn test_temp_depth_simulation_tracks_nested_operands() {
        let mut t = SymbolTable::new();
        let left = binop(&mut t, Value::Int64(1), "+", Value::Int64(2));
        let right = binop(&mut t, Value::Int64(3), "+", Value::Int64(4));
        let expr = binop(&mut t, left, "+", right);
        let (func, _tables) = compile_one(&expr, &mut t);
        assert_eq!(func.closure_info.temp_size, 3);
    }

    #[test]
    fn test_rest_arguments_take_the_slot_after_the_last_parameter() {
        let mut t = SymbolTable::new();
        let params = Value::list_from(vec![sym(&mut t, "a"), sym(&mut t, "more...")]);
        let body = sym(&mut t, "more");
        let expr = form(&mut t, "$fn", vec![params, body]);
        let (_func, tables) = compile_one(&expr, &mut t);
        let child = &tables.functions[0];
        assert_eq!(child.closure_info.num_args, 1);
        assert_eq!(child.closure_info.num_variables, 2);
        let more = t.lookup("more").unwrap();
        assert_eq!(child.rest_arg, Some(more));
        assert_eq!(
            child.segment.decompile_with(child, &tables, &t),
            "\tLdLoc0 1\t; more\n\tRet\n"
        );
    }

    #[test]
    fn test_quoted_lists_become_constant_objects() {
        let mut t = SymbolTable::new();
        let quoted = Value::list_from(vec![Value::Int64(1), Value::Int64(2)]);
        let expr = form(&mut t, "$quote", vec![quoted]);
        let (func, tables) = compile_one(&expr, &mut t);
        assert_eq!(
            func.segment.decompile_with(&func, &tables, &t),
            "\tLdObj 0\n\tRet\n"
        );
        assert_eq!(tables.objects.len(), 1);
        assert_eq!(tables.objects[0].iter_list().count(), 2);
    }
}
