use rox::interpreter::Interpreter;
use rox::parser::{Expr, Parser, Stmt};
use rox::resolver::Resolver;
use rox::runner::{self, Outcome};

/// Every `print <variable>;` in the program, innermost blocks included, with
/// the depth the resolver recorded for it.
fn printed_variable_depths(source: &str) -> Vec<(String, Option<usize>)> {
    let (tokens, diagnostics) = runner::scan(source);
    assert!(diagnostics.is_empty());

    let (statements, diagnostics) = Parser::new(&tokens).parse();
    assert!(diagnostics.is_empty(), "parse errors: {}", diagnostics);

    let mut interpreter = Interpreter::with_output(Vec::new());
    let diagnostics = Resolver::new(&mut interpreter).resolve(&statements);
    assert!(diagnostics.is_empty(), "resolve errors: {}", diagnostics);

    let mut found = Vec::new();
    collect(&statements, &interpreter, &mut found);
    found
}

fn collect(statements: &[Stmt<'_>], interpreter: &Interpreter<'_>, found: &mut Vec<(String, Option<usize>)>) {
    for stmt in statements {
        match stmt {
            Stmt::Print(Expr::Variable { id, name }) => {
                found.push((name.lexeme.to_string(), interpreter.depth_of(*id)));
            }
            Stmt::Block(inner) => collect(inner, interpreter, found),
            Stmt::Function(declaration) => collect(&declaration.body, interpreter, found),
            _ => {}
        }
    }
}

fn static_errors(source: &str) -> Vec<String> {
    let mut out = Vec::new();
    match runner::run(source, &mut out) {
        Outcome::StaticErrors(diagnostics) => {
            assert!(out.is_empty(), "nothing may run after a static error");
            diagnostics.iter().map(|e| e.to_string()).collect()
        }
        other => panic!("expected static errors, got {:?}", other),
    }
}

#[test]
fn globals_are_left_unresolved() {
    assert_eq!(
        printed_variable_depths("var a = 1; print a;"),
        [("a".to_string(), None)]
    );
}

#[test]
fn depth_counts_scopes_outward() {
    assert_eq!(
        printed_variable_depths("{ var a = 1; { { print a; } print a; } }"),
        [("a".to_string(), Some(2)), ("a".to_string(), Some(1))]
    );
}

#[test]
fn shadowing_picks_the_innermost_binding() {
    assert_eq!(
        printed_variable_depths("{ var a = 1; { var a = 2; print a; } print a; }"),
        [("a".to_string(), Some(0)), ("a".to_string(), Some(0))]
    );
}

#[test]
fn parameters_live_in_the_function_scope() {
    assert_eq!(
        printed_variable_depths("fun f(x) { print x; { print x; } }"),
        [("x".to_string(), Some(0)), ("x".to_string(), Some(1))]
    );
}

#[test]
fn static_errors_prevent_execution() {
    assert_eq!(
        static_errors("print \"first\";\n{ var a = 1; var a = 2; }"),
        ["[line 2] Error at 'a': Already a variable with this name in this scope."]
    );
}

#[test]
fn every_static_error_is_reported() {
    let errors = static_errors(
        "return 1;\n\
         class A { init() { return 2; } }\n\
         print this;\n\
         class B < B {}\n\
         fun f() { super.x(); }",
    );

    assert_eq!(
        errors,
        [
            "[line 1] Error at 'return': Can't return from top-level code.",
            "[line 2] Error at 'return': Can't return a value from an initializer.",
            "[line 3] Error at 'this': Can't use 'this' outside of a class.",
            "[line 4] Error at 'B': A class can't inherit from itself.",
            "[line 5] Error at 'super': Can't use 'super' outside of a class.",
        ]
    );
}

#[test]
fn own_initializer_read() {
    assert_eq!(
        static_errors("fun f() { var a = a; }"),
        ["[line 1] Error at 'a': Can't read local variable in its own initializer."]
    );
}
