// Compile-stage integration tests
//
// Every case goes through `Engine::compile`, so both the parser and the
// allowlist validator are exercised. Each test checks a table of cases and
// reports every mismatch at once.

use sbx::Engine;

/// One script and what compiling it should do.
struct Case {
    name: String,
    source: String,
    outcome: Outcome,
}

enum Outcome {
    Compiles,
    /// Fails; when set, the rendered `kind: message` must contain the text.
    Fails(Option<String>),
}

impl Case {
    fn compiles(name: &str, source: &str) -> Self {
        Self::new(name, source, Outcome::Compiles)
    }

    fn fails(name: &str, source: &str) -> Self {
        Self::new(name, source, Outcome::Fails(None))
    }

    fn fails_with(name: &str, source: &str, expected: &str) -> Self {
        Self::new(name, source, Outcome::Fails(Some(expected.to_string())))
    }

    fn new(name: &str, source: &str, outcome: Outcome) -> Self {
        Self {
            name: name.to_string(),
            source: source.to_string(),
            outcome,
        }
    }

    fn mismatch(&self, engine: &Engine) -> Option<String> {
        let result = engine.compile(&self.source);
        match (&self.outcome, result) {
            (Outcome::Compiles, Ok(_)) => None,
            (Outcome::Compiles, Err(error)) => Some(format!("unexpected {}: {}", error.kind(), error.message())),
            (Outcome::Fails(_), Ok(_)) => Some("compiled, expected an error".to_string()),
            (Outcome::Fails(expected), Err(error)) => {
                let rendered = format!("{}: {}", error.kind(), error.message());
                expected
                    .as_ref()
                    .filter(|expected| !rendered.contains(expected.as_str()))
                    .map(|expected| format!("'{}' does not contain '{}'", rendered, expected))
            }
        }
    }
}

fn check(cases: &[Case]) {
    let engine = Engine::new();
    let failures: Vec<String> = cases
        .iter()
        .filter_map(|case| case.mismatch(&engine).map(|reason| format!("{}: {}", case.name, reason)))
        .collect();
    assert!(failures.is_empty(), "failing cases:\n  {}", failures.join("\n  "));
}

#[test]
fn malformed_expressions() {
    let mut cases = Vec::new();

    cases.push(Case::fails_with(
        "dangling_plus",
        "result = 1 +",
        "Expected expression after '+'",
    ));
    cases.push(Case::fails_with(
        "dangling_star",
        "result = 2 *",
        "Expected expression after '*'",
    ));
    cases.push(Case::fails("unclosed_paren", "result = (1 + 2"));
    cases.push(Case::fails("unclosed_list", "result = [1, 2"));
    cases.push(Case::fails("unclosed_dict", "result = {'a': 1"));
    cases.push(Case::fails("unclosed_call", "result = len([1]"));
    cases.push(Case::fails("stray_close_paren", "result = 1)"));
    cases.push(Case::fails_with(
        "unterminated_string",
        "result = 'abc",
        "unterminated string literal",
    ));
    cases.push(Case::fails("assign_to_literal", "1 = x"));
    cases.push(Case::fails("keyword_before_positional", "result = max(a=1, 2)"));
    cases.push(Case::fails_with(
        "empty_fstring_field",
        "result = f'{}'",
        "f-string: empty expression not allowed",
    ));
    cases.push(Case::fails_with(
        "single_closing_brace_in_fstring",
        "result = f'a}'",
        "f-string: single '}' is not allowed",
    ));

    check(&cases);
}

#[test]
fn edge_cases() {
    let mut cases = Vec::new();

    cases.push(Case::fails_with("empty_source", "", "InvalidInput"));
    cases.push(Case::fails_with(
        "integer_too_large",
        "result = 99999999999999999999",
        "too large",
    ));
    cases.push(Case::fails_with(
        "deeply_nested_parens",
        &format!("result = {}1{}", "(".repeat(300), ")".repeat(300)),
        "nested",
    ));
    cases.push(Case::fails_with(
        "long_operator_chain",
        &format!("result = 1{}", " + 1".repeat(400)),
        "nested",
    ));
    cases.push(Case::compiles(
        "moderate_nesting",
        &format!("result = {}1{}", "(".repeat(20), ")".repeat(20)),
    ));
    cases.push(Case::compiles("trailing_comment", "result = 1  # answer"));
    cases.push(Case::compiles("blank_lines_between", "a = 1\n\n\nresult = a\n"));
    cases.push(Case::compiles("no_trailing_newline", "result = 1"));
    cases.push(Case::fails_with(
        "unexpected_indent",
        "x = 1\n    y = 2\n",
        "unexpected indent",
    ));

    check(&cases);
}

#[test]
fn operators() {
    let mut cases = Vec::new();

    cases.push(Case::compiles("arithmetic", "result = 1 + 2 * 3 - 4 / 5"));
    cases.push(Case::compiles("floor_div_and_mod", "result = 7 // 2 % 3"));
    cases.push(Case::compiles("power", "result = -2 ** 10"));
    cases.push(Case::compiles("unary_plus", "result = +x"));
    cases.push(Case::compiles("comparison_chain", "result = 1 < x <= 3"));
    cases.push(Case::compiles("membership", "result = x in [1, 2] and y not in (3, 4)"));
    cases.push(Case::compiles("identity", "result = x is None or x is not None"));
    cases.push(Case::compiles("not", "result = not x"));
    cases.push(Case::fails_with(
        "bit_xor_rejected",
        "result = 1 ^ 2",
        "disallowed syntax element `BitXor`",
    ));
    cases.push(Case::fails_with(
        "bit_and_rejected",
        "result = 6 & 3",
        "disallowed syntax element `BitAnd`",
    ));
    cases.push(Case::fails_with(
        "shift_rejected",
        "result = 1 << 4",
        "disallowed syntax element `LShift`",
    ));
    cases.push(Case::fails_with(
        "invert_rejected",
        "result = ~1",
        "disallowed syntax element `Invert`",
    ));
    cases.push(Case::fails_with(
        "augmented_bit_or_rejected",
        "x = 1\nx |= 2",
        "disallowed syntax element `BitOr`",
    ));

    check(&cases);
}

#[test]
fn control_flow() {
    let mut cases = Vec::new();

    cases.push(Case::compiles(
        "if_elif_else",
        "if x > 0:\n    result = 'pos'\nelif x < 0:\n    result = 'neg'\nelse:\n    result = 'zero'\n",
    ));
    let chain: String = (0..3_000).map(|i| format!("elif x == {}:\n    result = {}\n", i, i)).collect();
    cases.push(Case::compiles("long_elif_chain", &format!("if x:\n    pass\n{}", chain)));
    cases.push(Case::compiles("for_range", "for i in range(3):\n    result = i\n"));
    cases.push(Case::compiles(
        "for_else",
        "for i in items:\n    pass\nelse:\n    result = 1\n",
    ));
    cases.push(Case::compiles("while_loop", "n = 0\nwhile n < 3:\n    n += 1\n"));
    cases.push(Case::compiles(
        "nested_blocks",
        "for a in xs:\n    for b in ys:\n        if a == b:\n            result = a\n",
    ));
    cases.push(Case::fails_with(
        "missing_colon",
        "x = 1\nif x\n    pass\n",
        "Expected ':'",
    ));
    cases.push(Case::fails_with(
        "break_outside_loop",
        "break",
        "'break' outside loop",
    ));
    cases.push(Case::fails_with(
        "break_is_not_allowed_by_default",
        "while True:\n    break\n",
        "disallowed syntax element `Break`",
    ));
    cases.push(Case::fails_with(
        "continue_is_not_allowed_by_default",
        "for i in xs:\n    continue\n",
        "disallowed syntax element `Continue`",
    ));

    check(&cases);
}

#[test]
fn literals() {
    let mut cases = Vec::new();

    cases.push(Case::compiles("int", "result = 42"));
    cases.push(Case::compiles("float", "result = 3.25"));
    cases.push(Case::compiles("string_single", "result = 'text'"));
    cases.push(Case::compiles("string_double", "result = \"text\""));
    cases.push(Case::compiles("adjacent_strings", "result = 'a' 'b'"));
    cases.push(Case::compiles("escapes", "result = 'tab\\tnewline\\n'"));
    cases.push(Case::compiles("booleans_and_none", "result = [True, False, None]"));
    cases.push(Case::compiles("list", "result = [1, 2, 3]"));
    cases.push(Case::compiles("tuple", "result = (1, 'a')"));
    cases.push(Case::compiles("single_tuple", "result = (1,)"));
    cases.push(Case::compiles("empty_tuple", "result = ()"));
    cases.push(Case::compiles("dict", "result = {'a': 1, 'b': [2]}"));
    cases.push(Case::compiles("empty_dict", "result = {}"));
    cases.push(Case::compiles("set", "result = {1, 2}"));
    cases.push(Case::compiles("fstring", "result = f'{x:>5} and {y!r}'"));
    cases.push(Case::fails_with(
        "bytes_literal",
        "result = b'abc'",
        "bytes literals are not supported",
    ));

    check(&cases);
}

#[test]
fn calls_and_attributes() {
    let mut cases = Vec::new();

    cases.push(Case::compiles("builtin_call", "result = abs(-1)"));
    cases.push(Case::compiles("nested_calls", "result = len(sorted([3, 1, 2]))"));
    cases.push(Case::compiles("context_attribute", "result = object.total"));
    cases.push(Case::compiles("method_call", "result = 'a,b'.split(',')"));
    cases.push(Case::compiles("chained_attributes", "result = object.customer.name.upper()"));
    cases.push(Case::compiles("trailing_comma_in_call", "result = max(1, 2,)"));
    cases.push(Case::fails_with(
        "keyword_argument_rejected",
        "result = round(x, ndigits=2)",
        "disallowed syntax element `Keyword`",
    ));
    cases.push(Case::fails_with(
        "subscript_rejected",
        "result = items[0]",
        "disallowed syntax element `Subscript`",
    ));

    check(&cases);
}

#[test]
fn assignment() {
    let mut cases = Vec::new();

    cases.push(Case::compiles("simple", "x = 1"));
    cases.push(Case::compiles("chained", "a = b = 1"));
    cases.push(Case::compiles("tuple_unpack", "a, b = 1, 2"));
    cases.push(Case::compiles("parenthesized_unpack", "(a, b) = pair"));
    cases.push(Case::compiles("augmented", "x = 1\nx += 2\nx *= 3\nx -= 1"));
    cases.push(Case::compiles("semicolons", "x = 1; y = 2; result = x + y"));
    cases.push(Case::fails("assign_to_call", "f() = 1"));
    cases.push(Case::fails_with(
        "walrus_rejected",
        "result = (y := 2)",
        "disallowed syntax element `NamedExpr`",
    ));

    check(&cases);
}

#[test]
fn rejected_constructs() {
    let mut cases = Vec::new();

    let constructs = [
        ("import", "import os", "Import"),
        ("from_import", "from os import path", "Import"),
        ("function_def", "def f():\n    return 1\n", "FunctionDef"),
        ("class_def", "class A:\n    pass\n", "ClassDef"),
        ("try", "try:\n    x = 1\nexcept Exception:\n    pass\n", "Try"),
        ("with", "with open('f') as f:\n    pass\n", "With"),
        ("raise", "raise ValueError('x')", "Raise"),
        ("delete", "x = 1\ndel x", "Delete"),
        ("global", "global x", "Global"),
        ("assert", "assert x", "Assert"),
        ("lambda", "result = lambda x: x", "Lambda"),
        ("comprehension", "result = [x for x in xs]", "Comprehension"),
    ];
    for (name, input, kind) in constructs {
        cases.push(Case::fails_with(
            name,
            input,
            &format!("DisallowedSyntax: disallowed syntax element `{}`", kind),
        ));
    }

    check(&cases);
}

#[test]
fn first_violation_is_reported_with_its_line() {
    let error = Engine::new()
        .compile("x = 1\ny = x ^ 2\nimport os\n")
        .unwrap_err();
    assert_eq!(error.line(), Some(2));
    assert!(error.message().contains("BitXor"));
}
