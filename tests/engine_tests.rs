// End-to-end tests through the public `Engine`, `CompiledScript` and
// `Sandbox` API.

use pretty_assertions::assert_eq;
use rust_decimal::Decimal;
use sbx::{
    AllowedNodes, DeniedMembers, Engine, EngineOptions, Error, ErrorKind, ExecutionOptions, Inputs, NodeKind,
    Record, Sandbox, ScriptObject, Value,
};
use std::rc::Rc;
use std::str::FromStr;

fn invoice() -> Rc<dyn ScriptObject> {
    let customer = Record::new("Customer")
        .with("name", "Ada")
        .with("save", "never visible");
    Rc::new(
        Record::new("Invoice")
            .with("total", 120i64)
            .with("lines", vec![Value::Int(1), Value::Int(2)])
            .with("customer", Value::object(customer))
            .with("save", "never visible"),
    )
}

fn run(source: &str) -> Result<Value, Error> {
    Engine::new().evaluate(source, invoice(), &Inputs::type_object(7))
}

#[test]
fn result_channel_carries_the_outcome() {
    assert_eq!(run("result = 42").unwrap(), Value::Int(42));
    assert_eq!(run("x = 1").unwrap(), Value::None);
    assert_eq!(run("a = 1\na += 1\nresult = a").unwrap(), Value::Int(2));
    assert_eq!(run("for i in range(3):\n    result = i\n").unwrap(), Value::Int(2));
}

#[test]
fn disallowed_kinds_are_named_wherever_they_appear() {
    let engine = Engine::new();
    let cases = [
        ("import os", NodeKind::Import),
        ("if True:\n    x = [y for y in z]\n", NodeKind::Comprehension),
        ("result = len(lambda: 1)", NodeKind::Lambda),
        ("while False:\n    for i in x:\n        result = x[0]\n", NodeKind::Subscript),
        ("result = round(1.5, ndigits=0)", NodeKind::Keyword),
    ];
    for (source, kind) in cases {
        let error = engine.compile(source).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Disallowed, "{}", source);
        assert!(error.message().contains(&format!("`{}`", kind)), "{}", error);
    }
}

#[test]
fn empty_and_non_text_input_fail_to_compile() {
    let engine = Engine::new();
    assert_eq!(engine.compile("").unwrap_err().kind(), ErrorKind::InvalidInput);
    assert_eq!(
        engine.compile_bytes(b"result = '\xc3\x28'").unwrap_err().kind(),
        ErrorKind::InvalidInput
    );
    assert_eq!(
        engine.compile_bytes("result = 'é'".as_bytes()).unwrap().run(invoice(), &Inputs::new()).unwrap(),
        Value::str("é")
    );
}

#[test]
fn run_without_compile_executes_nothing() {
    let mut sandbox = Sandbox::new(Engine::new(), invoice(), Inputs::new());
    let error = sandbox.run().unwrap_err();
    assert_eq!(error.kind(), ErrorKind::InvalidInput);
    assert!(sandbox.script().is_none());

    assert!(sandbox.compile("import os").is_err());
    assert!(sandbox.run().is_err());
}

#[test]
fn denied_members_fail_like_missing_ones() {
    let denied = run("result = object.save").unwrap_err();
    let missing = run("result = object.nothing_here").unwrap_err();
    let (Error::Runtime(denied), Error::Runtime(missing)) = (denied, missing) else {
        panic!("expected runtime errors");
    };
    assert_eq!(denied.kind(), ErrorKind::AttributeError);
    assert_eq!(denied.kind(), missing.kind());
    assert_eq!(denied.message(), "'Invoice' object has no attribute 'save'");
}

#[test]
fn nested_context_objects_keep_the_denylist() {
    assert_eq!(run("result = object.customer.name").unwrap(), Value::str("Ada"));

    let Err(Error::Runtime(error)) = run("result = object.customer.save") else {
        panic!("expected a runtime error");
    };
    assert_eq!(error.kind(), ErrorKind::AttributeError);
    assert_eq!(error.message(), "'Customer' object has no attribute 'save'");
}

#[test]
fn custom_denylist_replaces_the_default() {
    let engine = Engine::with_options(EngineOptions {
        denied_members: DeniedMembers::none().with("total"),
        ..EngineOptions::default()
    });
    let script = engine.compile("result = object.save").unwrap();
    assert_eq!(script.run(invoice(), &Inputs::new()).unwrap(), Value::str("never visible"));

    let script = engine.compile("result = object.total").unwrap();
    assert_eq!(script.run(invoice(), &Inputs::new()).unwrap_err().kind(), ErrorKind::AttributeError);
}

#[test]
fn context_containers_are_copies() {
    let source = "items = object.lines\nitems.append(3)\nresult = len(object.lines)";
    assert_eq!(run(source).unwrap(), Value::Int(2));
}

#[test]
fn lists_alias_within_a_script() {
    assert_eq!(run("a = []\nb = a\nb.append(1)\nresult = len(a)").unwrap(), Value::Int(1));
}

#[test]
fn division_by_zero_shows_surrounding_lines() {
    let source = "a = 1\nb = 2\nc = 3\nd = 0\ne = a / d\nf = 5\ng = 6\nh = 7\ni = 8\nj = 9\n";
    let Err(Error::Runtime(error)) = run(source) else {
        panic!("expected a runtime error");
    };
    assert_eq!(error.kind(), ErrorKind::ZeroDivisionError);
    assert_eq!(error.line(), Some(5));

    let window: Vec<(usize, bool)> = error
        .diagnostic()
        .window()
        .iter()
        .map(|line| (line.number, line.is_error))
        .collect();
    assert_eq!(window, vec![(4, false), (5, true), (6, false)]);
}

#[test]
fn compiling_twice_gives_the_same_result() {
    let source = "total = 0\nfor n in object.lines:\n    total += n * type_object\nresult = total";
    let engine = Engine::new();
    let first = engine.compile(source).unwrap();
    let second = engine.compile(source).unwrap();
    let inputs = Inputs::type_object(7);
    assert_eq!(first.run(invoice(), &inputs).unwrap(), Value::Int(21));
    assert_eq!(first.run(invoice(), &inputs).unwrap(), second.run(invoice(), &inputs).unwrap());
}

#[test]
fn narrowed_allowlist_rejects_while() {
    let engine = Engine::with_options(EngineOptions {
        allowed_nodes: AllowedNodes::default().without(NodeKind::While),
        ..EngineOptions::default()
    });
    let error = engine.compile("n = 0\nwhile n < 3:\n    n += 1\n").unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Disallowed);
    assert_eq!(error.line(), Some(2));
    assert!(error.message().contains("`While`"));
}

#[test]
fn widened_allowlist_enables_subscripts_and_break() {
    let engine = Engine::with_options(EngineOptions {
        allowed_nodes: AllowedNodes::default()
            .with(NodeKind::Subscript)
            .with(NodeKind::Slice)
            .with(NodeKind::Break),
        ..EngineOptions::default()
    });
    let source = "items = [5, 6, 7, 8]\nfor i in items[1:]:\n    if i > 6:\n        break\n    result = i\n";
    let value = engine.compile(source).unwrap().run(invoice(), &Inputs::new()).unwrap();
    assert_eq!(value, Value::Int(6));
}

#[test]
fn infinite_loops_exhaust_the_budget() {
    let engine = Engine::with_options(EngineOptions {
        execution: ExecutionOptions {
            max_iterations: Some(1_000),
            ..ExecutionOptions::default()
        },
        ..EngineOptions::default()
    });
    let error = engine
        .compile("while True:\n    pass\n")
        .unwrap()
        .run(invoice(), &Inputs::new())
        .unwrap_err();
    assert_eq!(error.kind(), ErrorKind::ResourceExceeded);
    assert!(error.message().contains("1000"));
}

#[test]
fn reserved_names_cannot_be_rebound() {
    for source in ["object = 1", "type_object = 2", "type_object += 1"] {
        let Err(Error::Runtime(error)) = run(source) else {
            panic!("expected a runtime error for {}", source);
        };
        assert_eq!(error.kind(), ErrorKind::ReservedName);
        assert!(error.message().contains("cannot rebind reserved name"));
    }
}

#[test]
fn reserved_input_names_are_refused() {
    let script = Engine::new().compile("result = 1").unwrap();
    let error = script.run(invoice(), &Inputs::new().with("result", 3i64)).unwrap_err();
    assert_eq!(error.kind(), ErrorKind::InvalidInput);
}

#[test]
fn fstrings_format_expressions() {
    assert_eq!(run("a = 5\nresult = f'{a=}'").unwrap(), Value::str("a=5"));
    assert_eq!(run("x = 2.0 / 3\nresult = f'{x:.2f}'").unwrap(), Value::str("0.67"));
    assert_eq!(
        run("result = f'{object.customer.name!r:>8}|{object.total:,}'").unwrap(),
        Value::str("   'Ada'|120")
    );
}

#[test]
fn decimals_and_dates_are_available() {
    assert_eq!(
        run("result = Decimal('0.10') + Decimal('0.20')").unwrap(),
        Value::Decimal(Decimal::from_str("0.30").unwrap())
    );
    assert_eq!(
        run("result = date(2024, 2, 29).isoformat()").unwrap(),
        Value::str("2024-02-29")
    );
    assert_eq!(
        run("d = datetime(2024, 3, 1, 9, 30)\nresult = d.strftime('%H:%M') + ' ' + str(d.year)").unwrap(),
        Value::str("09:30 2024")
    );
}

#[test]
fn exit_stops_the_script_cleanly() {
    assert_eq!(run("result = 1\nexit()\nresult = 2").unwrap(), Value::Int(1));
}

#[test]
fn runtime_errors_point_at_their_line() {
    let Err(Error::Runtime(error)) = run("x = 1\ny = 2\nresult = undefined_name + x") else {
        panic!("expected a runtime error");
    };
    assert_eq!(error.kind(), ErrorKind::NameError);
    assert_eq!(error.line(), Some(3));
    assert!(error.to_string().contains(">>>    3. result = undefined_name + x"));
}

#[test]
fn long_elif_chains_compile_and_run() {
    let mut source = String::from("x = 4999\nif x == -1:\n    result = -1\n");
    for i in 0..5_000 {
        source.push_str(&format!("elif x == {}:\n    result = {}\n", i, i));
    }
    source.push_str("else:\n    result = 'none'\n");
    assert_eq!(run(&source).unwrap(), Value::Int(4999));
}

#[test]
fn deeply_nested_script_values_are_released() {
    let wrapped = "a = []\nfor i in range(100000):\n    a = [a]\nresult = 1";
    assert_eq!(run(wrapped).unwrap(), Value::Int(1));

    let linked = "root = {}\ncur = root\nfor i in range(100000):\n    nxt = {}\n    cur['next'] = nxt\n    cur = nxt\nresult = 2";
    let engine = Engine::with_options(EngineOptions {
        allowed_nodes: AllowedNodes::default().with(NodeKind::Subscript),
        ..EngineOptions::default()
    });
    let value = engine.compile(linked).unwrap().run(invoice(), &Inputs::new()).unwrap();
    assert_eq!(value, Value::Int(2));

    let tuples = "t = ()\nfor i in range(100000):\n    t = (t, i)\nresult = 3";
    assert_eq!(run(tuples).unwrap(), Value::Int(3));
}

#[test]
fn comparing_deep_values_fails_cleanly() {
    let source = "a = []\nb = [0]\nfor i in range(1000):\n    a = [a]\n    b = [b, 0]\nresult = a < b";
    let Err(Error::Runtime(error)) = run(source) else {
        panic!("expected a runtime error");
    };
    assert_eq!(error.kind(), ErrorKind::ResourceExceeded);
    assert_eq!(error.line(), Some(6));
    assert_eq!(error.cause().message, "maximum recursion depth exceeded in comparison");
}

#[test]
fn decimal_rounding_overflow_is_a_runtime_error() {
    let Err(Error::Runtime(error)) = run("result = round(Decimal('79228162514264337593543950335'), -1)") else {
        panic!("expected a runtime error");
    };
    assert_eq!(error.kind(), ErrorKind::OverflowError);
}

#[test]
fn compile_failures_carry_a_context_window() {
    let error = Engine::new().compile("a = 1\nimport os\nb = 2").unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Disallowed);
    assert_eq!(error.cause().line(), Some(2));

    let window: Vec<(usize, bool)> = error
        .diagnostic()
        .window()
        .iter()
        .map(|line| (line.number, line.is_error))
        .collect();
    assert_eq!(window, vec![(1, false), (2, true), (3, false)]);
    assert!(error.to_string().contains(">>>    2. import os"));
}

#[test]
fn errors_inside_multiline_fstrings_report_the_field_line() {
    let Err(Error::Runtime(error)) = run("x = 1\nresult = f'''a\n{1/0}'''") else {
        panic!("expected a runtime error");
    };
    assert_eq!(error.kind(), ErrorKind::ZeroDivisionError);
    assert_eq!(error.line(), Some(3));
}
