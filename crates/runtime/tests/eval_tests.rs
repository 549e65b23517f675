//! End-to-end evaluation scenarios: core-form trees compiled against a
//! fresh environment and run to completion.

use smile_core::symbols::SymbolTable;
use smile_core::value::Value;
use smile_runtime::{Env, EvalResult, eval_in_scope};

// ---------------------------------------------------------------------------
// Tree builders

fn s(env: &Env, name: &str) -> Value {
    Value::Symbol(env.symbols.borrow_mut().intern(name))
}

fn form(env: &Env, head: &str, mut items: Vec<Value>) -> Value {
    items.insert(0, s(env, head));
    Value::list_from(items)
}

fn apply(f: Value, mut args: Vec<Value>) -> Value {
    args.insert(0, f);
    Value::list_from(args)
}

fn dot(env: &Env, obj: Value, name: &str) -> Value {
    let prop = s(env, name);
    form(env, "$dot", vec![obj, prop])
}

fn binop(env: &Env, a: Value, op: &str, b: Value) -> Value {
    apply(dot(env, a, op), vec![b])
}

fn unop(env: &Env, op: &str, a: Value) -> Value {
    apply(dot(env, a, op), vec![])
}

fn setv(env: &Env, name: &str, value: Value) -> Value {
    let target = s(env, name);
    form(env, "$set", vec![target, value])
}

fn scope(env: &Env, vars: &[&str], body: Vec<Value>) -> Value {
    let var_list = Value::list_from(vars.iter().map(|v| s(env, v)).collect::<Vec<_>>());
    let mut items = vec![var_list];
    items.extend(body);
    form(env, "$scope", items)
}

fn quote(env: &Env, quoted: Value) -> Value {
    form(env, "$quote", vec![quoted])
}

fn quoted_ints(env: &Env, ints: &[i64]) -> Value {
    quote(
        env,
        Value::list_from(ints.iter().map(|&n| Value::Int64(n)).collect::<Vec<_>>()),
    )
}

fn lambda(env: &Env, params: &[&str], body: Vec<Value>) -> Value {
    let param_list = Value::list_from(params.iter().map(|p| s(env, p)).collect::<Vec<_>>());
    let mut items = vec![param_list];
    items.extend(body);
    form(env, "$fn", items)
}

fn var(env: &Env, name: &str) -> Value {
    s(env, name)
}

// ---------------------------------------------------------------------------
// Result helpers

fn eval(env: &Env, expr: &Value) -> EvalResult {
    eval_in_scope(env, expr)
}

fn expect_value(result: EvalResult) -> Value {
    match result {
        EvalResult::Value(value) => value,
        other => panic!("expected a value, got {:?}", other),
    }
}

fn expect_i64(result: EvalResult) -> i64 {
    match expect_value(result) {
        Value::Int64(n) => n,
        other => panic!("expected Int64, got {:?}", other),
    }
}

fn expect_bool(result: EvalResult) -> bool {
    match expect_value(result) {
        Value::Bool(b) => b,
        other => panic!("expected Bool, got {:?}", other),
    }
}

fn expect_string(result: EvalResult) -> String {
    match expect_value(result) {
        Value::String(text) => text.to_string(),
        other => panic!("expected String, got {:?}", other),
    }
}

fn expect_ints(result: EvalResult) -> Vec<i64> {
    let value = expect_value(result);
    value
        .iter_list()
        .map(|v| v.as_int().expect("integer element"))
        .collect()
}

fn expect_exception_kind(env: &Env, result: EvalResult) -> String {
    match result {
        EvalResult::Exception(e) => env.symbols.borrow().name(e.kind).to_string(),
        other => panic!("expected an exception, got {:?}", other),
    }
}

// ---------------------------------------------------------------------------
// Constants and variables

#[test]
fn evaluates_a_constant_integer() {
    let env = Env::new();
    assert_eq!(expect_i64(eval(&env, &Value::Int64(1))), 1);
}

#[test]
fn evaluates_a_constant_symbol() {
    let env = Env::new();
    let a = s(&env, "a");
    let expr = quote(&env, a.clone());
    let result = expect_value(eval(&env, &expr));
    assert!(result.smile_eq(&a));
}

#[test]
fn evaluates_local_variable_assignments() {
    let env = Env::new();
    let a = s(&env, "a");
    let qa = quote(&env, a.clone());
    let b = s(&env, "b");
    let qb = quote(&env, b);
    let set_x = setv(&env, "x", qa);
    let set_y = setv(&env, "y", qb);
    let read_x = var(&env, "x");
    let expr = scope(&env, &["x", "y"], vec![set_x, set_y, read_x]);
    let result = expect_value(eval(&env, &expr));
    assert!(result.smile_eq(&a));
}

#[test]
fn evaluates_globals_through_the_global_closure() {
    let env = Env::new();
    env.declare_global("counter", Value::Int64(5));
    let counter = var(&env, "counter");
    let bumped = binop(&env, counter, "+", Value::Int64(1));
    let expr = setv(&env, "counter", bumped);
    assert_eq!(expect_i64(eval(&env, &expr)), 6);
    let sym = env.symbols.borrow().lookup("counter").unwrap();
    assert!(matches!(
        env.globals.get_global(sym),
        Some(Value::Int64(6))
    ));
}

// ---------------------------------------------------------------------------
// Arithmetic and control flow

#[test]
fn evaluates_binary_method_calls() {
    let env = Env::new();
    let sum = binop(&env, Value::Int64(1), "+", Value::Int64(2));
    let expr = scope(&env, &["x"], vec![setv(&env, "x", sum)]);
    assert_eq!(expect_i64(eval(&env, &expr)), 3);
}

#[test]
fn evaluates_complex_piles_of_unary_and_binary_calls() {
    let env = Env::new();
    // (-3 + 2 * 5) * 7
    let neg3 = unop(&env, "-", Value::Int64(3));
    let product = binop(&env, Value::Int64(2), "*", Value::Int64(5));
    let sum = binop(&env, neg3, "+", product);
    let expr = binop(&env, sum, "*", Value::Int64(7));
    assert_eq!(expect_i64(eval(&env, &expr)), 49);
}

#[test]
fn evaluates_if_then_else() {
    let env = Env::new();
    let set_x = setv(&env, "x", Value::Int64(1));
    let x = var(&env, "x");
    let then = setv(&env, "y", Value::Int64(123));
    let els = setv(&env, "y", Value::Int64(456));
    let cond_form = form(&env, "$if", vec![x, then, els]);
    let y = var(&env, "y");
    let expr = scope(&env, &["x", "y"], vec![set_x, cond_form, y]);
    assert_eq!(expect_i64(eval(&env, &expr)), 123);
}

#[test]
fn evaluates_a_while_loop_that_computes_a_logarithm() {
    let env = Env::new();
    let set_n = setv(&env, "n", Value::Int64(12345678));
    let set_log = setv(&env, "log", Value::Int64(0));
    let n1 = var(&env, "n");
    let shifted = binop(&env, n1, ">>>", Value::Int64(1));
    let shift_n = setv(&env, "n", shifted);
    let log1 = var(&env, "log");
    let bumped = binop(&env, log1, "+", Value::Int64(1));
    let bump_log = setv(&env, "log", bumped);
    let body = form(&env, "$progn", vec![shift_n, bump_log]);
    let n2 = var(&env, "n");
    let while_form = form(&env, "$while", vec![Value::Null, n2, body]);
    let log2 = var(&env, "log");
    let expr = scope(&env, &["n", "log"], vec![set_n, set_log, while_form, log2]);
    assert_eq!(expect_i64(eval(&env, &expr)), 24);
}

#[test]
fn evaluates_a_till_loop_that_computes_an_exponent() {
    let env = Env::new();
    let set_x = setv(&env, "x", Value::Int64(1));
    let x1 = var(&env, "x");
    let past_byte = binop(&env, x1, ">", Value::Int64(0xFF));
    let reached = s(&env, "reached-eight-bits");
    let escape_if = form(&env, "$if", vec![past_byte, reached.clone()]);
    let x2 = var(&env, "x");
    let doubled = binop(&env, x2, "<<", Value::Int64(1));
    let shift_x = setv(&env, "x", doubled);
    let body = form(&env, "$progn", vec![escape_if, shift_x]);
    let labels = Value::list_from(vec![reached]);
    let till = form(&env, "$till", vec![labels, body]);
    let x3 = var(&env, "x");
    let expr = scope(&env, &["x"], vec![set_x, till, x3]);
    assert_eq!(expect_i64(eval(&env, &expr)), 256);
}

#[test]
fn evaluates_and_or_with_short_circuit() {
    let env = Env::new();
    let t = binop(&env, Value::Int64(4), ">", Value::Int64(3));
    let f = binop(&env, Value::Int64(4), ">", Value::Int64(5));
    let and_form = form(&env, "$and", vec![t.clone(), f.clone()]);
    assert!(!expect_bool(eval(&env, &and_form)));
    let or_form = form(&env, "$or", vec![f, t]);
    assert!(expect_bool(eval(&env, &or_form)));
}

// ---------------------------------------------------------------------------
// Conversions and direct native calls

#[test]
fn evaluates_code_that_converts_between_types() {
    let env = Env::new();
    let set_str = setv(&env, "str", Value::String("1234".into()));
    let str1 = var(&env, "str");
    let parse1 = binop(&env, Value::Int64(0), "parse", str1);
    let set_n = setv(&env, "n", parse1);
    let parse2 = binop(&env, Value::Int64(0), "parse", Value::String("1111".into()));
    let n = var(&env, "n");
    let sum = binop(&env, n, "+", parse2);
    let set_m = setv(&env, "m", sum);
    let m = var(&env, "m");
    let to_string = unop(&env, "string", m);
    let set_result = setv(&env, "result", to_string);
    let expr = scope(
        &env,
        &["str", "n", "m", "result"],
        vec![set_str, set_n, set_m, set_result],
    );
    assert_eq!(expect_string(eval(&env, &expr)), "2345");
}

#[test]
fn evaluates_direct_calls_to_native_functions() {
    let env = Env::new();
    let set_n = setv(&env, "n", Value::Int64(12345));
    let set_m = setv(&env, "m", Value::Int64(11111));
    let integer64 = var(&env, "Integer64");
    let plus_fn = dot(&env, integer64, "+");
    let set_f = setv(&env, "f", plus_fn);
    let f = var(&env, "f");
    let n = var(&env, "n");
    let m = var(&env, "m");
    let call = apply(f, vec![n, m]);
    let set_sum = setv(&env, "sum", call);
    let expr = scope(
        &env,
        &["n", "m", "f", "sum"],
        vec![set_n, set_m, set_f, set_sum],
    );
    assert_eq!(expect_i64(eval(&env, &expr)), 23456);
}

// ---------------------------------------------------------------------------
// User functions

#[test]
fn evaluates_calls_to_user_functions() {
    let env = Env::new();
    let x = var(&env, "x");
    let body = binop(&env, x, "+", Value::Int64(111));
    let f_def = lambda(&env, &["x"], vec![body]);
    let set_f = setv(&env, "f", f_def);
    let set_n = setv(&env, "n", Value::Int64(123));
    let f = var(&env, "f");
    let n = var(&env, "n");
    let set_m = setv(&env, "m", apply(f, vec![n]));
    let expr = scope(&env, &["f", "n", "m"], vec![set_f, set_n, set_m]);
    assert_eq!(expect_i64(eval(&env, &expr)), 234);
}

#[test]
fn evaluates_recursive_calls_to_user_functions() {
    let env = Env::new();
    // factorial = |x| if x <= 1 then x else x * [factorial x - 1]
    let x1 = var(&env, "x");
    let at_base = binop(&env, x1, "<=", Value::Int64(1));
    let x2 = var(&env, "x");
    let x3 = var(&env, "x");
    let less_one = binop(&env, x3, "-", Value::Int64(1));
    let factorial1 = var(&env, "factorial");
    let recurse = apply(factorial1, vec![less_one]);
    let x4 = var(&env, "x");
    let product = binop(&env, x4, "*", recurse);
    let body = form(&env, "$if", vec![at_base, x2, product]);
    let f_def = lambda(&env, &["x"], vec![body]);
    let set_f = setv(&env, "factorial", f_def);
    let factorial2 = var(&env, "factorial");
    let call = apply(factorial2, vec![Value::Int64(10)]);
    let set_n = setv(&env, "n", call);
    let expr = scope(&env, &["factorial", "n"], vec![set_f, set_n]);
    assert_eq!(expect_i64(eval(&env, &expr)), 3628800);
}

#[test]
fn user_functions_can_influence_their_parent_scope() {
    let env = Env::new();
    let set_x1 = setv(&env, "x", Value::Int64(10));
    let x = var(&env, "x");
    let z = var(&env, "z");
    let sum = binop(&env, x, "+", z);
    let write_y = setv(&env, "y", sum);
    let f_def = lambda(&env, &["z"], vec![write_y]);
    let set_f = setv(&env, "f", f_def);
    let set_x2 = setv(&env, "x", Value::Int64(5));
    let f = var(&env, "f");
    let call = apply(f, vec![Value::Int64(30)]);
    let y = var(&env, "y");
    let expr = scope(
        &env,
        &["x", "y", "f"],
        vec![set_x1, set_f, set_x2, call, y],
    );
    assert_eq!(expect_i64(eval(&env, &expr)), 35);
}

#[test]
fn user_functions_can_have_zero_parameters() {
    let env = Env::new();
    let set_x1 = setv(&env, "x", Value::Int64(10));
    let x = var(&env, "x");
    let body = binop(&env, x, "+", Value::Int64(100));
    let f_def = lambda(&env, &[], vec![body]);
    let set_f = setv(&env, "f", f_def);
    let set_x2 = setv(&env, "x", Value::Int64(5));
    let f = var(&env, "f");
    let call = apply(f, vec![]);
    let expr = scope(&env, &["x", "f"], vec![set_x1, set_f, set_x2, call]);
    assert_eq!(expect_i64(eval(&env, &expr)), 105);
}

#[test]
fn user_functions_can_have_two_parameters() {
    let env = Env::new();
    let a = var(&env, "a");
    let b = var(&env, "b");
    let body = binop(&env, a, "+", b);
    let f_def = lambda(&env, &["a", "b"], vec![body]);
    let set_f = setv(&env, "f", f_def);
    let f = var(&env, "f");
    let call = apply(f, vec![Value::Int64(10), Value::Int64(20)]);
    let expr = scope(&env, &["f"], vec![set_f, call]);
    assert_eq!(expect_i64(eval(&env, &expr)), 30);
}

#[test]
fn user_functions_can_have_ten_parameters() {
    let env = Env::new();
    // |a b c d e f g h i j| a * b + c * d + e * f + g * h + i * j
    let names = ["a", "b", "c", "d", "e", "f", "g", "h", "i", "j"];
    let mut products = Vec::new();
    for pair in names.chunks(2) {
        let lhs = var(&env, pair[0]);
        let rhs = var(&env, pair[1]);
        products.push(binop(&env, lhs, "*", rhs));
    }
    let mut body = products.remove(0);
    for product in products {
        body = binop(&env, body, "+", product);
    }
    let f_def = lambda(&env, &names, vec![body]);
    let set_f = setv(&env, "fn10", f_def);
    let f = var(&env, "fn10");
    let args = (1..=10).map(|n| Value::Int64(n * 10)).collect::<Vec<_>>();
    let call = apply(f, args);
    let expr = scope(&env, &["fn10"], vec![set_f, call]);
    assert_eq!(expect_i64(eval(&env, &expr)), 19000);
}

#[test]
fn user_functions_can_have_rest_parameters() {
    let env = Env::new();
    // f = |a b c rest...| rest join " "
    let rest = var(&env, "rest");
    let body = binop(&env, rest, "join", Value::String(" ".into()));
    let f_def = lambda(&env, &["a", "b", "c", "rest..."], vec![body]);
    let set_f = setv(&env, "f", f_def);
    let f = var(&env, "f");
    let args = [10, 20, 30, 40, 50, 60]
        .iter()
        .map(|&n| Value::Int64(n))
        .collect::<Vec<_>>();
    let call = apply(f, args);
    let expr = scope(&env, &["f"], vec![set_f, call]);
    assert_eq!(expect_string(eval(&env, &expr)), "40 50 60");
}

#[test]
fn optional_arguments_fill_in_when_omitted() {
    let env = Env::new();
    // f = |x y=3| x + y
    let x = var(&env, "x");
    let y = var(&env, "y");
    let body = binop(&env, x, "+", y);
    let y_param = {
        let y_sym = s(&env, "y");
        Value::list_from(vec![y_sym, Value::Int64(3)])
    };
    let x_sym = s(&env, "x");
    let params = Value::list_from(vec![x_sym, y_param]);
    let f_def = form(&env, "$fn", vec![params, body]);
    let set_f = setv(&env, "f", f_def);

    let f1 = var(&env, "f");
    let call_full = apply(f1, vec![Value::Int64(2), Value::Int64(5)]);
    let expr_full = scope(&env, &["f"], vec![set_f.clone(), call_full]);
    assert_eq!(expect_i64(eval(&env, &expr_full)), 7);

    let f2 = var(&env, "f");
    let call_short = apply(f2, vec![Value::Int64(2)]);
    let expr_short = scope(&env, &["f"], vec![set_f, call_short]);
    assert_eq!(expect_i64(eval(&env, &expr_short)), 5);
}

// ---------------------------------------------------------------------------
// List state machines

#[test]
fn each_iterates_lists() {
    let env = Env::new();
    let set_y = setv(&env, "y", Value::Int64(0));
    let x1 = var(&env, "x");
    let x2 = var(&env, "x");
    let squared = binop(&env, x1, "*", x2);
    let y = var(&env, "y");
    let sum = binop(&env, y, "+", squared);
    let accumulate = setv(&env, "y", sum);
    let callback = lambda(&env, &["x"], vec![accumulate]);
    let list = quoted_ints(&env, &[1, 2, 3, 4, 5, 6, 7, 8, 9, 10]);
    let each_call = apply(dot(&env, list, "each"), vec![callback]);
    let y2 = var(&env, "y");
    let expr = scope(&env, &["y"], vec![set_y, each_call, y2]);
    assert_eq!(expect_i64(eval(&env, &expr)), 385);
}

#[test]
fn map_projects_lists() {
    let env = Env::new();
    let x1 = var(&env, "x");
    let x2 = var(&env, "x");
    let squared = binop(&env, x1, "*", x2);
    let callback = lambda(&env, &["x"], vec![squared]);
    let list = quoted_ints(&env, &[1, 2, 3, 4, 5, 6, 7, 8, 9, 10]);
    let expr = apply(dot(&env, list, "map"), vec![callback]);
    assert_eq!(
        expect_ints(eval(&env, &expr)),
        vec![1, 4, 9, 16, 25, 36, 49, 64, 81, 100]
    );
}

#[test]
fn map_returns_null_for_an_empty_list() {
    let env = Env::new();
    let x = var(&env, "x");
    let bumped = binop(&env, x, "+", Value::Int64(1));
    let callback = lambda(&env, &["x"], vec![bumped]);
    let list = quoted_ints(&env, &[]);
    let expr = apply(dot(&env, list, "map"), vec![callback]);
    assert!(expect_value(eval(&env, &expr)).is_null());
}

fn mod3_predicate(env: &Env) -> Value {
    let x = var(env, "x");
    let modded = binop(env, x, "mod", Value::Int64(3));
    let test = binop(env, modded, "==", Value::Int64(0));
    lambda(env, &["x"], vec![test])
}

#[test]
fn where_filters_lists() {
    let env = Env::new();
    let x = var(&env, "x");
    let modded = binop(&env, x, "mod", Value::Int64(3));
    let test = binop(&env, modded, "!=", Value::Int64(0));
    let callback = lambda(&env, &["x"], vec![test]);
    let list = quoted_ints(&env, &[1, 2, 3, 4, 5, 6, 7, 8, 9, 10]);
    let expr = apply(dot(&env, list, "where"), vec![callback]);
    assert_eq!(expect_ints(eval(&env, &expr)), vec![1, 2, 4, 5, 7, 8, 10]);
}

#[test]
fn where_returns_null_for_an_empty_list() {
    let env = Env::new();
    let callback = mod3_predicate(&env);
    let list = quoted_ints(&env, &[]);
    let expr = apply(dot(&env, list, "where"), vec![callback]);
    assert!(expect_value(eval(&env, &expr)).is_null());
}

#[test]
fn any_tests_membership_by_value() {
    let env = Env::new();
    let list = quoted_ints(&env, &[1, 2, 4, 8, 16, 32, 64, 128]);
    let expr = apply(dot(&env, list, "any?"), vec![Value::Int64(15)]);
    assert!(!expect_bool(eval(&env, &expr)));

    let list = quoted_ints(&env, &[1, 2, 4, 8, 15, 16, 32, 64, 128]);
    let expr = apply(dot(&env, list, "any?"), vec![Value::Int64(15)]);
    assert!(expect_bool(eval(&env, &expr)));
}

#[test]
fn any_tests_membership_with_predicates() {
    let env = Env::new();
    let pred = mod3_predicate(&env);
    let list = quoted_ints(&env, &[1, 2, 4, 8, 16, 32, 64, 128]);
    let expr = apply(dot(&env, list, "any?"), vec![pred.clone()]);
    assert!(!expect_bool(eval(&env, &expr)));

    let list = quoted_ints(&env, &[1, 2, 4, 8, 15, 16, 32, 64, 128]);
    let expr = apply(dot(&env, list, "any?"), vec![pred]);
    assert!(expect_bool(eval(&env, &expr)));
}

#[test]
fn any_is_false_on_empty_lists() {
    let env = Env::new();
    let pred = mod3_predicate(&env);
    let list = quoted_ints(&env, &[]);
    let expr = apply(dot(&env, list, "any?"), vec![pred]);
    assert!(!expect_bool(eval(&env, &expr)));
}

#[test]
fn any_in_unary_form_answers_nonemptiness() {
    let env = Env::new();
    let list = quoted_ints(&env, &[]);
    let expr = unop(&env, "any?", list);
    assert!(!expect_bool(eval(&env, &expr)));

    let list = quoted_ints(&env, &[1, 2, 3]);
    let expr = unop(&env, "any?", list);
    assert!(expect_bool(eval(&env, &expr)));
}

#[test]
fn empty_and_null_answer_emptiness() {
    let env = Env::new();
    for method in ["empty?", "null?"] {
        let list = quoted_ints(&env, &[]);
        let expr = unop(&env, method, list);
        assert!(expect_bool(eval(&env, &expr)), "{} on []", method);

        let list = quoted_ints(&env, &[1, 2, 3]);
        let expr = unop(&env, method, list);
        assert!(!expect_bool(eval(&env, &expr)), "{} on [1 2 3]", method);
    }
}

#[test]
fn contains_tests_membership() {
    let env = Env::new();
    let list = quoted_ints(&env, &[1, 2, 4, 8, 16, 32, 64, 128]);
    let expr = apply(dot(&env, list, "contains?"), vec![Value::Int64(15)]);
    assert!(!expect_bool(eval(&env, &expr)));

    let pred = mod3_predicate(&env);
    let list = quoted_ints(&env, &[1, 2, 4, 8, 15, 16, 32, 64, 128]);
    let expr = apply(dot(&env, list, "contains?"), vec![pred]);
    assert!(expect_bool(eval(&env, &expr)));
}

#[test]
fn all_tests_every_element() {
    let env = Env::new();
    let list = quoted_ints(&env, &[1, 2, 4, 8, 16, 32, 64, 128]);
    let expr = apply(dot(&env, list, "all?"), vec![Value::Int64(15)]);
    assert!(!expect_bool(eval(&env, &expr)));

    let list = quoted_ints(&env, &[15, 15, 15, 15, 15, 15]);
    let expr = apply(dot(&env, list, "all?"), vec![Value::Int64(15)]);
    assert!(expect_bool(eval(&env, &expr)));

    let pred = mod3_predicate(&env);
    let list = quoted_ints(&env, &[3, 6, 9, 12, 15, 18, 21]);
    let expr = apply(dot(&env, list, "all?"), vec![pred]);
    assert!(expect_bool(eval(&env, &expr)));

    // Vacuously true on the empty list.
    let pred = mod3_predicate(&env);
    let list = quoted_ints(&env, &[]);
    let expr = apply(dot(&env, list, "all?"), vec![pred]);
    assert!(expect_bool(eval(&env, &expr)));
}

#[test]
fn first_finds_elements() {
    let env = Env::new();
    let list = quoted_ints(&env, &[1, 2, 4, 8, 16, 32, 64, 128]);
    let expr = apply(dot(&env, list, "first"), vec![Value::Int64(15)]);
    assert!(expect_value(eval(&env, &expr)).is_null());

    let list = quoted_ints(&env, &[1, 2, 4, 8, 15, 16, 32, 64, 128]);
    let expr = apply(dot(&env, list, "first"), vec![Value::Int64(15)]);
    assert_eq!(expect_i64(eval(&env, &expr)), 15);

    let pred = mod3_predicate(&env);
    let list = quoted_ints(&env, &[1, 2, 4, 8, 15, 16, 32, 64, 128]);
    let expr = apply(dot(&env, list, "first"), vec![pred]);
    assert_eq!(expect_i64(eval(&env, &expr)), 15);
}

#[test]
fn first_in_unary_form_returns_the_head() {
    let env = Env::new();
    let list = quoted_ints(&env, &[]);
    let expr = unop(&env, "first", list);
    assert!(expect_value(eval(&env, &expr)).is_null());

    let list = quoted_ints(&env, &[8, 16, 32, 64, 128]);
    let expr = unop(&env, "first", list);
    assert_eq!(expect_i64(eval(&env, &expr)), 8);
}

#[test]
fn index_of_finds_positions() {
    let env = Env::new();
    let list = quoted_ints(&env, &[1, 2, 4, 8, 16, 32, 64, 128]);
    let expr = apply(dot(&env, list, "index-of"), vec![Value::Int64(15)]);
    assert!(expect_value(eval(&env, &expr)).is_null());

    let list = quoted_ints(&env, &[1, 2, 4, 8, 15, 16, 32, 64, 128]);
    let expr = apply(dot(&env, list, "index-of"), vec![Value::Int64(15)]);
    assert_eq!(expect_i64(eval(&env, &expr)), 4);

    let pred = mod3_predicate(&env);
    let list = quoted_ints(&env, &[1, 2, 4, 8, 15, 16, 32, 64, 128]);
    let expr = apply(dot(&env, list, "index-of"), vec![pred]);
    assert_eq!(expect_i64(eval(&env, &expr)), 4);
}

#[test]
fn count_counts_matches_and_lengths() {
    let env = Env::new();
    let list = quoted_ints(&env, &[1, 2, 3, 1, 2, 3, 3, 9, 5, 1, 3]);
    let expr = apply(dot(&env, list, "count"), vec![Value::Int64(3)]);
    assert_eq!(expect_i64(eval(&env, &expr)), 4);

    let pred = mod3_predicate(&env);
    let list = quoted_ints(&env, &[1, 2, 3, 4, 5, 8, 15, 16, 32, 60, 64, 90, 93, 128]);
    let expr = apply(dot(&env, list, "count"), vec![pred]);
    assert_eq!(expect_i64(eval(&env, &expr)), 5);

    let list = quoted_ints(&env, &[]);
    let expr = unop(&env, "count", list);
    assert_eq!(expect_i64(eval(&env, &expr)), 0);

    let list = quoted_ints(&env, &[9, 8, 7, 6, 5, 4, 3]);
    let expr = unop(&env, "count", list);
    assert_eq!(expect_i64(eval(&env, &expr)), 7);
}

// ---------------------------------------------------------------------------
// Strings

#[test]
fn concatenates_strings() {
    let env = Env::new();
    let expr = binop(
        &env,
        Value::String("foo".into()),
        "+",
        Value::String("bar".into()),
    );
    assert_eq!(expect_string(eval(&env, &expr)), "foobar");
}

const LYRIC: &str = "You say goodbye, and I say hello.";

fn lyric_pieces() -> Vec<Value> {
    [" say", " goodbye,", " and", " I", " say", " hello."]
        .iter()
        .map(|&p| Value::String(p.into()))
        .collect()
}

#[test]
fn concatenates_many_strings() {
    let env = Env::new();
    let mut expr = Value::String("You".into());
    for piece in lyric_pieces() {
        expr = binop(&env, expr, "+", piece);
    }
    assert_eq!(expect_string(eval(&env, &expr)), LYRIC);
}

#[test]
fn concatenates_many_strings_through_the_method_value() {
    let env = Env::new();
    // ["You".+ " say" " goodbye," ...]
    let head = dot(&env, Value::String("You".into()), "+");
    let expr = apply(head, lyric_pieces());
    assert_eq!(expect_string(eval(&env, &expr)), LYRIC);
}

#[test]
fn concatenates_many_strings_through_the_type_object() {
    let env = Env::new();
    // [String.+ "You" " say" ...]
    let string_type = var(&env, "String");
    let head = dot(&env, string_type, "+");
    let mut pieces = vec![Value::String("You".into())];
    pieces.extend(lyric_pieces());
    let expr = apply(head, pieces);
    assert_eq!(expect_string(eval(&env, &expr)), LYRIC);

    // concat = String.+ ; [concat "You" ...]
    let string_type = var(&env, "String");
    let concat_fn = dot(&env, string_type, "+");
    let set_concat = setv(&env, "concat", concat_fn);
    let concat = var(&env, "concat");
    let mut pieces = vec![Value::String("You".into())];
    pieces.extend(lyric_pieces());
    let call = apply(concat, pieces);
    let expr = scope(&env, &["concat"], vec![set_concat, call]);
    assert_eq!(expect_string(eval(&env, &expr)), LYRIC);
}

// ---------------------------------------------------------------------------
// Escapes across frames

fn even_escape_scenario(env: &Env, threshold: i64) -> Value {
    // var list = `[1 2 3 4 5]; var value = 0
    // till found-even, not-found do {
    //   list each |x| { if x > threshold and even? x then { value = x; found-even } }
    //   not-found
    // }
    // when found-even { value }  when not-found { -1 }
    let set_list = setv(env, "list", quoted_ints(env, &[1, 2, 3, 4, 5]));
    let set_value = setv(env, "value", Value::Int64(0));
    let x1 = var(env, "x");
    let above = binop(env, x1, ">", Value::Int64(threshold));
    let x2 = var(env, "x");
    let even = unop(env, "even?", x2);
    let both = form(env, "$and", vec![above, even]);
    let x3 = var(env, "x");
    let remember = setv(env, "value", x3);
    let found = s(env, "found-even");
    let escape = form(env, "$progn", vec![remember, found.clone()]);
    let check = form(env, "$if", vec![both, escape]);
    let callback = lambda(env, &["x"], vec![check]);
    let list = var(env, "list");
    let each_call = apply(dot(env, list, "each"), vec![callback]);
    let not_found = s(env, "not-found");
    let body = form(env, "$progn", vec![each_call, not_found.clone()]);
    let labels = Value::list_from(vec![found.clone(), not_found.clone()]);
    let value = var(env, "value");
    let when_found = Value::list_from(vec![found, value]);
    let when_not_found = Value::list_from(vec![not_found, Value::Int64(-1)]);
    let whens = Value::list_from(vec![when_found, when_not_found]);
    let till = form(env, "$till", vec![labels, body, whens]);
    scope(env, &["list", "value"], vec![set_list, set_value, till])
}

#[test]
fn a_till_escape_can_cross_a_nested_function() {
    let env = Env::new();
    // till found-even do list each |x| if even? x then found-even
    let x = var(&env, "x");
    let even = unop(&env, "even?", x);
    let found = s(&env, "found-even");
    let check = form(&env, "$if", vec![even, found.clone()]);
    let callback = lambda(&env, &["x"], vec![check]);
    let list = quoted_ints(&env, &[1, 2, 3, 4, 5]);
    let each_call = apply(dot(&env, list, "each"), vec![callback]);
    let labels = Value::list_from(vec![found]);
    let expr = form(&env, "$till", vec![labels, each_call]);
    assert!(expect_value(eval(&env, &expr)).is_null());
}

#[test]
fn a_till_escape_picks_the_right_when_clause() {
    let env = Env::new();
    let expr = even_escape_scenario(&env, 3);
    assert_eq!(expect_i64(eval(&env, &expr)), 4);
}

#[test]
fn a_till_escape_falls_back_to_the_other_when_clause() {
    let env = Env::new();
    let expr = even_escape_scenario(&env, 5);
    assert_eq!(expect_i64(eval(&env, &expr)), -1);
}

#[test]
fn a_till_label_expires_with_its_till() {
    let env = Env::new();
    // The till body stores a closure over `esc`, then leaves via `done`;
    // invoking the closure afterwards escapes a dead till.
    let esc = s(&env, "esc");
    let done = s(&env, "done");
    let thunk = lambda(&env, &[], vec![esc.clone()]);
    let save = setv(&env, "f", thunk);
    let body = form(&env, "$progn", vec![save, done.clone()]);
    let labels = Value::list_from(vec![esc, done]);
    let till = form(&env, "$till", vec![labels, body]);
    let f = var(&env, "f");
    let call = apply(f, vec![]);
    let expr = scope(&env, &["f"], vec![till, call]);
    assert_eq!(expect_exception_kind(&env, eval(&env, &expr)), "expired-escape");
}

// ---------------------------------------------------------------------------
// Exceptions

#[test]
fn integer_division_by_zero_raises() {
    let env = Env::new();
    let expr = binop(&env, Value::Int64(1), "/", Value::Int64(0));
    assert_eq!(expect_exception_kind(&env, eval(&env, &expr)), "divide-by-zero");
}

#[test]
fn decimal_division_by_zero_is_infinite() {
    let env = Env::new();
    let one = Value::Real64(smile_core::Real64::from_i64(1));
    let zero = Value::Real64(smile_core::Real64::zero());
    let expr = binop(&env, one, "/", zero);
    match expect_value(eval(&env, &expr)) {
        Value::Real64(r) => assert!(r.is_infinite()),
        other => panic!("expected Real64, got {:?}", other),
    }
}

#[test]
fn deep_recursion_raises_stack_overflow() {
    let env = Env::new();
    let f1 = var(&env, "f");
    let x = var(&env, "x");
    let bumped = binop(&env, x, "+", Value::Int64(1));
    let body = apply(f1, vec![bumped]);
    let f_def = lambda(&env, &["x"], vec![body]);
    let set_f = setv(&env, "f", f_def);
    let f2 = var(&env, "f");
    let call = apply(f2, vec![Value::Int64(0)]);
    let expr = scope(&env, &["f"], vec![set_f, call]);
    assert_eq!(expect_exception_kind(&env, eval(&env, &expr)), "stack-overflow");
}

#[test]
fn surplus_arguments_raise_arity() {
    let env = Env::new();
    let x = var(&env, "x");
    let f_def = lambda(&env, &["x"], vec![x]);
    let set_f = setv(&env, "f", f_def);
    let f = var(&env, "f");
    let call = apply(f, vec![Value::Int64(1), Value::Int64(2)]);
    let expr = scope(&env, &["f"], vec![set_f, call]);
    assert_eq!(expect_exception_kind(&env, eval(&env, &expr)), "arity");
}

#[test]
fn unknown_methods_raise() {
    let env = Env::new();
    let expr = unop(&env, "each", Value::Int64(5));
    assert_eq!(expect_exception_kind(&env, eval(&env, &expr)), "unknown-method");
}

#[test]
fn exceptions_carry_stack_traces() {
    let env = Env::new();
    let body = binop(&env, Value::Int64(1), "/", Value::Int64(0));
    let f_def = lambda(&env, &[], vec![body]);
    let set_f = setv(&env, "f", f_def);
    let f = var(&env, "f");
    let call = apply(f, vec![]);
    let expr = scope(&env, &["f"], vec![set_f, call]);
    match eval(&env, &expr) {
        EvalResult::Exception(e) => {
            // One trace entry per live frame at the raise point.
            assert!(e.stack_trace.iter_list().count() >= 2);
        }
        other => panic!("expected an exception, got {:?}", other),
    }
}

#[test]
fn try_catches_and_applies_the_handler() {
    let env = Env::new();
    let body = binop(&env, Value::Int64(1), "/", Value::Int64(0));
    let e = var(&env, "e");
    let kind = dot(&env, e, "kind");
    let handler = lambda(&env, &["e"], vec![kind]);
    let expr = form(&env, "$try", vec![body, handler]);
    let result = expect_value(eval(&env, &expr));
    let divide_by_zero = s(&env, "divide-by-zero");
    assert!(result.smile_eq(&divide_by_zero));
}

#[test]
fn try_passes_values_through_unchanged() {
    let env = Env::new();
    let body = binop(&env, Value::Int64(20), "+", Value::Int64(22));
    let e = var(&env, "e");
    let handler = lambda(&env, &["e"], vec![e]);
    let expr = form(&env, "$try", vec![body, handler]);
    assert_eq!(expect_i64(eval(&env, &expr)), 42);
}

// ---------------------------------------------------------------------------
// Compile-time results

#[test]
fn undeclared_names_surface_as_parse_errors() {
    let env = Env::new();
    let expr = setv(&env, "no-such-name", Value::Int64(1));
    match eval(&env, &expr) {
        EvalResult::ParseErrors(diagnostics) => {
            assert!(!diagnostics.is_empty());
        }
        other => panic!("expected parse errors, got {:?}", other),
    }
}

#[test]
fn symbol_table_round_trips_through_the_env() {
    let mut symbols = SymbolTable::new();
    let sym = symbols.intern("round-trip-check");
    assert_eq!(&*symbols.name(sym), "round-trip-check");
}
