//! The Evaluator
//!
//! A fetch-decode-execute loop over the current frame's bytecode segment.
//! Plain user-function calls are iterative (a new frame on the costack, no
//! host recursion); only native functions that apply callbacks re-enter the
//! loop, and escapes crossing such a re-entry propagate outward as
//! `NativeError::Unwind` until the loop that owns the target frame resumes.
//!
//! Invariants maintained at every instruction boundary:
//! 1. The operand stack top is at or above the current frame's temps base.
//! 2. A `Ret` with an empty temp area pushes Null, so a caller always
//!    receives exactly one value.
//! 3. After a function returns, the caller's stack is one deeper than at
//!    the call.

use crate::costack::{BreakInfo, CatchEntry, CatchKind, Frame, MAX_CALL_DEPTH};
use crate::env::Env;
use smile_core::bytecode::{Opcode, Operand};
use smile_core::symbols::Symbol;
use smile_core::tables::{CompiledTables, UserFunctionInfo};
use smile_core::value::{
    Exception, Host, NativeError, NativeResult, ObjectData, UserFunction, Value, Variables,
};
use smilec::compiler::Compiler;
use smilec::diagnostics::Diagnostic;
use std::rc::Rc;

/// The outcome of one evaluation.
#[derive(Debug)]
pub enum EvalResult {
    /// Normal completion with a single result value.
    Value(Value),
    /// An uncaught runtime exception.
    Exception(Exception),
    /// Compile-time messages; produced only by [`eval_in_scope`].
    ParseErrors(Vec<Diagnostic>),
    /// The VM hit a `Brk` opcode (testing only).
    Break(BreakInfo),
}

/// Why a nested execute loop stopped.
enum Flow {
    /// The loop's base frame returned; the value is on the stack.
    Done,
    /// An escape or handled exception resumed below this loop's frames.
    Unwound,
}

/// Why execution stopped entirely.
enum Termination {
    Exception(Exception),
    Break(BreakInfo),
}

/// One VM instance. Owns the costack; borrows the environment.
pub struct Eval<'e> {
    env: &'e Env,
    tables: Rc<CompiledTables>,
    stack: Vec<Value>,
    frames: Vec<Frame>,
    catches: Vec<CatchEntry>,
    pc: usize,
}

/// Execute an already-compiled function to completion.
pub fn eval_run(
    env: &Env,
    tables: &Rc<CompiledTables>,
    function: &Rc<UserFunctionInfo>,
) -> EvalResult {
    Eval::new(env, tables.clone()).run_function(function)
}

/// Compile an expression against the environment's global closure and run
/// it. The only entry point that can return `ParseErrors`.
pub fn eval_in_scope(env: &Env, expr: &Value) -> EvalResult {
    let (tables, function) = {
        let mut symbols = env.symbols.borrow_mut();
        let mut compiler = Compiler::new(&mut symbols, env.globals.clone());
        let function = compiler.compile_global(expr);
        if compiler.has_errors() {
            return EvalResult::ParseErrors(compiler.diagnostics);
        }
        (Rc::new(compiler.finish()), function)
    };
    eval_run(env, &tables, &function)
}

impl<'e> Eval<'e> {
    pub fn new(env: &'e Env, tables: Rc<CompiledTables>) -> Eval<'e> {
        Eval {
            env,
            tables,
            stack: Vec::new(),
            frames: Vec::new(),
            catches: Vec::new(),
            pc: 0,
        }
    }

    pub fn run_function(&mut self, function: &Rc<UserFunctionInfo>) -> EvalResult {
        let main = UserFunction {
            info: function.clone(),
            parent: None,
        };
        if let Err(err) = self.push_frame(&main, Vec::new()) {
            return match err {
                NativeError::Exception(e) => EvalResult::Exception(e),
                NativeError::Unwind => unreachable!("unwind before execution"),
            };
        }
        match self.execute(0) {
            Ok(Flow::Done) => EvalResult::Value(self.stack.pop().unwrap_or(Value::Null)),
            Ok(Flow::Unwound) => unreachable!("unwound past the root frame"),
            Err(Termination::Exception(e)) => EvalResult::Exception(e),
            Err(Termination::Break(info)) => EvalResult::Break(info),
        }
    }

    // ---------------------------------------------------------------------
    // Frame management

    fn push_frame(&mut self, f: &UserFunction, args: Vec<Value>) -> Result<(), NativeError> {
        if self.frames.len() >= MAX_CALL_DEPTH {
            return Err(NativeError::Exception(Exception::new(
                self.env.known.stack_overflow,
                "call stack exhausted",
            )));
        }
        let info = &f.info;
        let declared = info.args.len();
        if args.len() > declared && info.rest_arg.is_none() {
            return Err(NativeError::Exception(Exception::new(
                self.env.known.arity,
                format!(
                    "expected at most {} arguments, got {}",
                    declared,
                    args.len()
                ),
            )));
        }
        let vars = Variables::new(
            f.parent.clone(),
            info.closure_info.num_variables as usize,
        );
        {
            let mut slots = vars.slots.borrow_mut();
            for (i, arg) in args.iter().take(declared).enumerate() {
                slots[i] = arg.clone();
            }
            if info.rest_arg.is_some() {
                let surplus: Vec<Value> = args.iter().skip(declared).cloned().collect();
                slots[declared] = Value::list_from(surplus);
            }
        }
        self.frames.push(Frame {
            function: info.clone(),
            vars: vars.clone(),
            temps_base: self.stack.len(),
            ret_pc: self.pc,
        });
        self.pc = 0;

        // Fill omitted optional arguments by running their default thunks
        // in the new scope.
        for i in args.len()..declared {
            if let Some(default) = info.args[i].default.clone() {
                let thunk = Rc::new(UserFunction {
                    info: default,
                    parent: Some(vars.clone()),
                });
                let value = self.apply_user(&thunk, Vec::new())?;
                vars.slots.borrow_mut()[i] = value;
            }
        }
        Ok(())
    }

    /// Run a user function to completion on top of the current state and
    /// hand back its value. Used by native callbacks and default thunks.
    fn apply_user(&mut self, f: &Rc<UserFunction>, args: Vec<Value>) -> NativeResult {
        let saved_pc = self.pc;
        let min_frames = self.frames.len();
        self.push_frame(f, args)?;
        match self.execute(min_frames) {
            Ok(Flow::Done) => {
                let value = self.stack.pop().expect("missing return value");
                self.pc = saved_pc;
                Ok(value)
            }
            Ok(Flow::Unwound) => Err(NativeError::Unwind),
            Err(Termination::Exception(e)) => Err(NativeError::Exception(e)),
            Err(Termination::Break(_)) => {
                let kind = self.env.symbols.borrow_mut().intern("breakpoint");
                Err(NativeError::Exception(Exception::new(
                    kind,
                    "breakpoint inside a nested call",
                )))
            }
        }
    }

    fn do_return(&mut self, min_frames: usize) -> Option<Flow> {
        let frame = self.frames.last().expect("return with no frame");
        let temps_base = frame.temps_base;
        let ret_pc = frame.ret_pc;
        let value = if self.stack.len() > temps_base {
            self.stack.pop().expect("operand stack underflow")
        } else {
            Value::Null
        };
        self.stack.truncate(temps_base);
        self.frames.pop();
        self.stack.push(value);
        if self.frames.len() <= min_frames {
            return Some(Flow::Done);
        }
        self.pc = ret_pc;
        None
    }

    // ---------------------------------------------------------------------
    // Unwinding

    /// Raise a runtime exception: unwind to the newest `try` handler, or
    /// terminate if none exists. Returns whether execution resumed within
    /// this loop's frames.
    fn raise(&mut self, mut e: Exception, min_frames: usize) -> Result<bool, Termination> {
        if e.stack_trace.is_null() {
            e.stack_trace = self.capture_stack_trace();
        }
        let Some(index) = self
            .catches
            .iter()
            .rposition(|c| c.kind == CatchKind::Try)
        else {
            return Err(Termination::Exception(e));
        };
        let entry = self.catches[index];
        self.catches.truncate(index);
        self.frames.truncate(entry.frame_index + 1);
        self.stack.truncate(entry.temps_base);
        let value = self.exception_value(&e);
        self.stack.push(value);
        self.pc = entry.resume_pc;
        Ok(self.frames.len() > min_frames)
    }

    /// Escape to a till label: unwind to the matching till frame and resume
    /// at the label's continuation. The entry itself survives the unwind;
    /// the `TillEnd` at the resume point retires it.
    fn till_do(&mut self, target_index: usize, min_frames: usize) -> Result<bool, Termination> {
        let target = self.tables.till_targets[target_index];
        let found = self.catches.iter().rposition(
            |c| matches!(c.kind, CatchKind::Till { till } if till == target.till),
        );
        let Some(index) = found else {
            let e = Exception::new(
                self.env.known.expired_escape,
                "till label invoked outside its till's lifetime",
            );
            return self.raise(e, min_frames);
        };
        let entry = self.catches[index];
        self.catches.truncate(index + 1);
        self.frames.truncate(entry.frame_index + 1);
        self.stack.truncate(entry.temps_base);
        self.pc = self.tables.tills[target.till as usize].resume_pcs[target.label as usize] as usize;
        Ok(self.frames.len() > min_frames)
    }

    fn handle_native_error(
        &mut self,
        err: NativeError,
        min_frames: usize,
    ) -> Result<bool, Termination> {
        match err {
            NativeError::Exception(e) => self.raise(e, min_frames),
            NativeError::Unwind => Ok(self.frames.len() > min_frames),
        }
    }

    // ---------------------------------------------------------------------
    // The interpreter loop

    fn execute(&mut self, min_frames: usize) -> Result<Flow, Termination> {
        'frame: loop {
            let function = self.frames.last().expect("no frame to execute").function.clone();
            let codes = &function.segment.codes;
            loop {
                if self.pc >= codes.len() {
                    // Falling off the end behaves like Ret.
                    match self.do_return(min_frames) {
                        Some(flow) => return Ok(flow),
                        None => continue 'frame,
                    }
                }
                let ip = self.pc;
                let code = codes[ip];
                self.pc = ip + 1;
                match code.opcode {
                    Opcode::Nop | Opcode::Label => {}
                    Opcode::Brk => {
                        let frame = self.frames.last().unwrap();
                        return Err(Termination::Break(BreakInfo {
                            pc: ip,
                            locals: frame.vars.slots.borrow().clone(),
                            temps: self.stack[frame.temps_base..].to_vec(),
                        }));
                    }

                    // Stack shuffling
                    Opcode::Dup1 => {
                        let v = self.stack.last().expect("Dup1 underflow").clone();
                        self.stack.push(v);
                    }
                    Opcode::Dup2 => {
                        let v = self.stack[self.stack.len() - 2].clone();
                        self.stack.push(v);
                    }
                    Opcode::Dup => {
                        let n = code.operand.as_index().max(1) as usize;
                        let v = self.stack[self.stack.len() - n].clone();
                        self.stack.push(v);
                    }
                    Opcode::Pop1 => {
                        self.stack.pop();
                    }
                    Opcode::Pop2 => {
                        self.stack.truncate(self.stack.len() - 2);
                    }
                    Opcode::Pop => {
                        let n = code.operand.as_index().max(0) as usize;
                        self.stack.truncate(self.stack.len() - n);
                    }
                    Opcode::Rep1 => self.replace_under_top(1),
                    Opcode::Rep2 => self.replace_under_top(2),
                    Opcode::Rep => {
                        let n = code.operand.as_index().max(0) as usize;
                        self.replace_under_top(n);
                    }

                    // Constants
                    Opcode::Ld8 => {
                        let Operand::Byte(n) = code.operand else { unreachable!() };
                        self.stack.push(Value::Byte(n));
                    }
                    Opcode::Ld16 => {
                        let Operand::Int16(n) = code.operand else { unreachable!() };
                        self.stack.push(Value::Int16(n));
                    }
                    Opcode::Ld32 => {
                        let Operand::Int32(n) = code.operand else { unreachable!() };
                        self.stack.push(Value::Int32(n));
                    }
                    Opcode::Ld64 => {
                        let Operand::Int64(n) = code.operand else { unreachable!() };
                        self.stack.push(Value::Int64(n));
                    }
                    Opcode::LdNull => self.stack.push(Value::Null),
                    Opcode::LdBool => {
                        let Operand::Bool(b) = code.operand else { unreachable!() };
                        self.stack.push(Value::Bool(b));
                    }
                    Opcode::LdSym => {
                        let Operand::Symbol(sym) = code.operand else { unreachable!() };
                        self.stack.push(Value::Symbol(sym));
                    }
                    Opcode::LdStr => {
                        let index = code.operand.as_index() as usize;
                        self.stack.push(Value::String(self.tables.strings[index].clone()));
                    }
                    Opcode::LdObj => {
                        let index = code.operand.as_index() as usize;
                        self.stack.push(self.tables.objects[index].clone());
                    }

                    // Locals and globals
                    Opcode::LdLoc0 | Opcode::LdLocN => {
                        let Operand::Loc { scope, index } = code.operand else { unreachable!() };
                        let vars = self.lexical_frame(scope);
                        let value = vars.slots.borrow()[index as usize].clone();
                        self.stack.push(value);
                    }
                    Opcode::StLoc0 | Opcode::StLocN => {
                        let Operand::Loc { scope, index } = code.operand else { unreachable!() };
                        let value = self.stack.last().expect("store underflow").clone();
                        let vars = self.lexical_frame(scope);
                        vars.slots.borrow_mut()[index as usize] = value;
                    }
                    Opcode::StpLoc0 | Opcode::StpLocN => {
                        let Operand::Loc { scope, index } = code.operand else { unreachable!() };
                        let value = self.pop();
                        let vars = self.lexical_frame(scope);
                        vars.slots.borrow_mut()[index as usize] = value;
                    }
                    Opcode::LdX => {
                        let Operand::Symbol(sym) = code.operand else { unreachable!() };
                        match self.env.globals.get_global(sym) {
                            Some(value) => self.stack.push(value),
                            None => {
                                let name = self.env.symbols.borrow().name(sym);
                                let e = Exception::new(
                                    self.env.known.name_not_defined,
                                    format!("'{}' is not defined", name),
                                );
                                if self.raise(e, min_frames)? {
                                    continue 'frame;
                                }
                                return Ok(Flow::Unwound);
                            }
                        }
                    }
                    Opcode::StX => {
                        let Operand::Symbol(sym) = code.operand else { unreachable!() };
                        let value = self.stack.last().expect("store underflow").clone();
                        self.env.globals.set_global(sym, value);
                    }
                    Opcode::StpX => {
                        let Operand::Symbol(sym) = code.operand else { unreachable!() };
                        let value = self.pop();
                        self.env.globals.set_global(sym, value);
                    }

                    // Property/member access
                    Opcode::LdProp => {
                        let Operand::Symbol(sym) = code.operand else { unreachable!() };
                        let obj = self.pop();
                        let value = self.load_property(&obj, sym);
                        self.stack.push(value);
                    }
                    Opcode::StProp => {
                        let Operand::Symbol(sym) = code.operand else { unreachable!() };
                        let value = self.pop();
                        let obj = self.pop();
                        match &obj {
                            Value::Object(o) => {
                                o.props.borrow_mut().insert(sym, value.clone());
                                self.stack.push(value);
                            }
                            other => {
                                let e = Exception::new(
                                    self.env.known.type_mismatch,
                                    format!("cannot set a property on {}", other.kind().name()),
                                );
                                if self.raise(e, min_frames)? {
                                    continue 'frame;
                                }
                                return Ok(Flow::Unwound);
                            }
                        }
                    }
                    Opcode::LdMember => {
                        let index = self.pop();
                        let obj = self.pop();
                        match self.load_member(&obj, &index) {
                            Ok(value) => self.stack.push(value),
                            Err(e) => {
                                if self.raise(e, min_frames)? {
                                    continue 'frame;
                                }
                                return Ok(Flow::Unwound);
                            }
                        }
                    }
                    Opcode::StMember => {
                        let value = self.pop();
                        let index = self.pop();
                        let obj = self.pop();
                        match (&obj, index.as_int()) {
                            (Value::Object(o), Some(i)) => {
                                o.elems.borrow_mut().insert(i, value.clone());
                                self.stack.push(value);
                            }
                            _ => {
                                let e = Exception::new(
                                    self.env.known.type_mismatch,
                                    format!("cannot set a member on {}", obj.kind().name()),
                                );
                                if self.raise(e, min_frames)? {
                                    continue 'frame;
                                }
                                return Ok(Flow::Unwound);
                            }
                        }
                    }

                    // Calls
                    op @ (Opcode::Unary
                    | Opcode::Binary
                    | Opcode::Met2
                    | Opcode::Met3
                    | Opcode::Met4
                    | Opcode::Met5
                    | Opcode::Met6
                    | Opcode::Met7) => {
                        let arity = op.method_arity().expect("method opcode") as usize;
                        let Operand::Symbol(method) = code.operand else { unreachable!() };
                        let recv_index = self.stack.len() - 1 - arity;
                        let kind = self.stack[recv_index].kind();
                        // An object's own properties are its methods, and
                        // they are plain functions: the object itself is
                        // not passed (this is what makes `[String.+ a b]`
                        // and `list each f` meet in the middle).
                        let own_method = match &self.stack[recv_index] {
                            Value::Object(o) => o.props.borrow().get(&method).cloned(),
                            _ => None,
                        };
                        if let Some(function) = own_method {
                            let mut args = self.stack.split_off(recv_index);
                            args.remove(0);
                            match function {
                                Value::UserFunction(f) => match self.push_frame(&f, args) {
                                    Ok(()) => continue 'frame,
                                    Err(err) => {
                                        if self.handle_native_error(err, min_frames)? {
                                            continue 'frame;
                                        }
                                        return Ok(Flow::Unwound);
                                    }
                                },
                                Value::NativeFunction(nf) => match (nf.func)(self, &args) {
                                    Ok(value) => self.stack.push(value),
                                    Err(err) => {
                                        if self.handle_native_error(err, min_frames)? {
                                            continue 'frame;
                                        }
                                        return Ok(Flow::Unwound);
                                    }
                                },
                                other => {
                                    let e = Exception::new(
                                        self.env.known.not_a_function,
                                        format!("{} is not callable", other.kind().name()),
                                    );
                                    if self.raise(e, min_frames)? {
                                        continue 'frame;
                                    }
                                    return Ok(Flow::Unwound);
                                }
                            }
                            continue;
                        }
                        match self.env.vtables.lookup(kind, method) {
                            Some(Value::NativeFunction(nf)) => {
                                let args = self.stack.split_off(recv_index);
                                match (nf.func)(self, &args) {
                                    Ok(value) => self.stack.push(value),
                                    Err(err) => {
                                        if self.handle_native_error(err, min_frames)? {
                                            continue 'frame;
                                        }
                                        return Ok(Flow::Unwound);
                                    }
                                }
                            }
                            Some(Value::UserFunction(f)) => {
                                let args = self.stack.split_off(recv_index);
                                match self.push_frame(&f, args) {
                                    Ok(()) => continue 'frame,
                                    Err(err) => {
                                        if self.handle_native_error(err, min_frames)? {
                                            continue 'frame;
                                        }
                                        return Ok(Flow::Unwound);
                                    }
                                }
                            }
                            _ => {
                                let name = self.env.symbols.borrow().name(method);
                                let e = Exception::new(
                                    self.env.known.unknown_method,
                                    format!(
                                        "{} does not understand '{}'",
                                        kind.name(),
                                        name
                                    ),
                                );
                                if self.raise(e, min_frames)? {
                                    continue 'frame;
                                }
                                return Ok(Flow::Unwound);
                            }
                        }
                    }
                    Opcode::Call => {
                        let argc = code.operand.as_index().max(0) as usize;
                        let args = self.stack.split_off(self.stack.len() - argc);
                        let callee = self.pop();
                        match callee {
                            Value::UserFunction(f) => match self.push_frame(&f, args) {
                                Ok(()) => continue 'frame,
                                Err(err) => {
                                    if self.handle_native_error(err, min_frames)? {
                                        continue 'frame;
                                    }
                                    return Ok(Flow::Unwound);
                                }
                            },
                            Value::NativeFunction(nf) => match (nf.func)(self, &args) {
                                Ok(value) => self.stack.push(value),
                                Err(err) => {
                                    if self.handle_native_error(err, min_frames)? {
                                        continue 'frame;
                                    }
                                    return Ok(Flow::Unwound);
                                }
                            },
                            other => {
                                let e = Exception::new(
                                    self.env.known.not_a_function,
                                    format!("{} is not callable", other.kind().name()),
                                );
                                if self.raise(e, min_frames)? {
                                    continue 'frame;
                                }
                                return Ok(Flow::Unwound);
                            }
                        }
                    }
                    Opcode::NewFn => {
                        let index = code.operand.as_index() as usize;
                        let parent = self.frames.last().unwrap().vars.clone();
                        self.stack.push(Value::UserFunction(Rc::new(UserFunction {
                            info: self.tables.functions[index].clone(),
                            parent: Some(parent),
                        })));
                    }

                    // Control flow
                    Opcode::Jmp => {
                        self.pc = offset_pc(ip, code.operand.as_index());
                    }
                    Opcode::Bt => {
                        let cond = self.pop();
                        if cond.is_truthy() {
                            self.pc = offset_pc(ip, code.operand.as_index());
                        }
                    }
                    Opcode::Bf => {
                        let cond = self.pop();
                        if !cond.is_truthy() {
                            self.pc = offset_pc(ip, code.operand.as_index());
                        }
                    }
                    Opcode::Ret => match self.do_return(min_frames) {
                        Some(flow) => return Ok(flow),
                        None => continue 'frame,
                    },

                    // Escape/unwind
                    Opcode::TillBegin => {
                        self.catches.push(CatchEntry {
                            kind: CatchKind::Till {
                                till: code.operand.as_index() as u32,
                            },
                            frame_index: self.frames.len() - 1,
                            temps_base: self.stack.len(),
                            resume_pc: 0,
                        });
                    }
                    Opcode::TillEnd | Opcode::TryEnd => {
                        self.catches.pop();
                    }
                    Opcode::TillDo => {
                        let target = code.operand.as_index() as usize;
                        if self.till_do(target, min_frames)? {
                            continue 'frame;
                        }
                        return Ok(Flow::Unwound);
                    }
                    Opcode::TryBegin => {
                        self.catches.push(CatchEntry {
                            kind: CatchKind::Try,
                            frame_index: self.frames.len() - 1,
                            temps_base: self.stack.len(),
                            resume_pc: offset_pc(ip, code.operand.as_index()),
                        });
                    }
                }
            }
        }
    }

    // ---------------------------------------------------------------------
    // Operand helpers

    fn pop(&mut self) -> Value {
        self.stack.pop().expect("operand stack underflow")
    }

    /// Remove `n` values beneath the top, leaving the top in place.
    fn replace_under_top(&mut self, n: usize) {
        let top = self.pop();
        let len = self.stack.len();
        self.stack.truncate(len - n);
        self.stack.push(top);
    }

    fn lexical_frame(&self, scope: u32) -> Rc<Variables> {
        let vars = &self.frames.last().expect("no current frame").vars;
        Variables::ancestor(vars, scope).expect("lexical scope out of range")
    }

    fn load_property(&self, obj: &Value, sym: Symbol) -> Value {
        match obj {
            Value::Object(o) => o.props.borrow().get(&sym).cloned().unwrap_or(Value::Null),
            Value::Pair(p) => {
                if sym == self.env.known.left {
                    p.left.clone()
                } else if sym == self.env.known.right {
                    p.right.clone()
                } else {
                    Value::Null
                }
            }
            Value::List(c) => {
                if sym == self.env.known.first {
                    c.first.clone()
                } else if sym == self.env.known.rest {
                    c.rest.clone()
                } else {
                    Value::Null
                }
            }
            other => self
                .env
                .vtables
                .lookup(other.kind(), sym)
                .unwrap_or(Value::Null),
        }
    }

    fn load_member(&self, obj: &Value, index: &Value) -> Result<Value, Exception> {
        let i = index.as_int();
        match (obj, i) {
            (Value::List(_), Some(i)) => {
                if i < 0 {
                    return Ok(Value::Null);
                }
                Ok(obj
                    .iter_list()
                    .nth(i as usize)
                    .cloned()
                    .unwrap_or(Value::Null))
            }
            (Value::Null, Some(_)) => Ok(Value::Null),
            (Value::String(s), Some(i)) => {
                if i < 0 {
                    return Ok(Value::Null);
                }
                Ok(s.as_bytes()
                    .get(i as usize)
                    .map(|b| Value::Byte(*b))
                    .unwrap_or(Value::Null))
            }
            (Value::Object(o), Some(i)) => {
                Ok(o.elems.borrow().get(&i).cloned().unwrap_or(Value::Null))
            }
            _ => Err(Exception::new(
                self.env.known.type_mismatch,
                format!("cannot index {} here", obj.kind().name()),
            )),
        }
    }

    // ---------------------------------------------------------------------
    // Exceptions

    /// The language-visible form of an exception.
    fn exception_value(&self, e: &Exception) -> Value {
        let data = ObjectData::default();
        {
            let mut props = data.props.borrow_mut();
            props.insert(self.env.known.kind, Value::Symbol(e.kind));
            props.insert(self.env.known.message, Value::String(e.message.clone()));
            props.insert(self.env.known.stack_trace, e.stack_trace.clone());
        }
        Value::Object(Rc::new(data))
    }

    /// Walk the dynamic chain, innermost first, mapping each frame's pc to
    /// its source location.
    fn capture_stack_trace(&self) -> Value {
        let mut entries = Vec::new();
        for (i, frame) in self.frames.iter().enumerate().rev() {
            let pc = if i + 1 == self.frames.len() {
                self.pc.saturating_sub(1)
            } else {
                self.frames[i + 1].ret_pc.saturating_sub(1)
            };
            let loc_index = frame
                .function
                .segment
                .codes
                .get(pc)
                .map(|c| c.source_location)
                .unwrap_or(0);
            let text = match self.tables.source_location(loc_index) {
                Some(p) => format!("{}:{}:{}", p.filename, p.line, p.column),
                None => "<unknown>".to_string(),
            };
            entries.push(Value::String(Rc::from(text.as_str())));
        }
        Value::list_from(entries)
    }
}

fn offset_pc(ip: usize, delta: i32) -> usize {
    (ip as i64 + delta as i64).max(0) as usize
}

impl Host for Eval<'_> {
    fn apply(&mut self, target: &Value, args: &[Value]) -> NativeResult {
        match target {
            Value::UserFunction(f) => {
                let f = f.clone();
                self.apply_user(&f, args.to_vec())
            }
            Value::NativeFunction(nf) => (nf.func)(self, args),
            other => Err(NativeError::Exception(Exception::new(
                self.env.known.not_a_function,
                format!("{} is not callable", other.kind().name()),
            ))),
        }
    }

    fn symbol_name(&self, sym: Symbol) -> Rc<str> {
        self.env.symbols.borrow().name(sym)
    }

    fn intern(&mut self, name: &str) -> Symbol {
        self.env.symbols.borrow_mut().intern(name)
    }

    fn stringify(&self, value: &Value) -> String {
        value.stringify(&self.env.symbols.borrow())
    }
}
