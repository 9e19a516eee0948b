//! End‑to‑end pipelines: source text in, program output and an [`Outcome`]
//! out.
//!
//! `run` mirrors the classic driver: scan, parse, stop if anything static went
//! wrong, resolve, stop again on resolver errors, then interpret.  Nothing
//! here prints diagnostics; the caller decides where they go.

use std::io::Write;

use log::{debug, error, info};

use crate::error::{Diagnostics, RuntimeError};
use crate::interpreter::Interpreter;
use crate::parser::Parser;
use crate::resolver::Resolver;
use crate::scanner::Scanner;
use crate::token::Token;

/// How a pipeline finished.
#[derive(Debug)]
pub enum Outcome {
    Success,
    /// Scanner, parser or resolver errors.  Nothing was executed.
    StaticErrors(Diagnostics),
    /// The first runtime error.  Output printed before it stays printed.
    RuntimeError(RuntimeError),
}

impl Outcome {
    /// Conventional process exit status: 0, 65 (static) or 70 (runtime).
    pub fn exit_code(&self) -> i32 {
        match self {
            Outcome::Success => 0,
            Outcome::StaticErrors(_) => 65,
            Outcome::RuntimeError(_) => 70,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success)
    }
}

/// Scan the whole source, collecting tokens and lexical errors side by side.
pub fn scan(source: &str) -> (Vec<Token<'_>>, Diagnostics) {
    let mut tokens = Vec::new();
    let mut diagnostics = Diagnostics::new();

    for result in Scanner::new(source) {
        match result {
            Ok(token) => tokens.push(token),
            Err(e) => diagnostics.push(e),
        }
    }

    debug!(
        "Scanned {} token(s), {} lexical error(s)",
        tokens.len(),
        diagnostics.len()
    );

    (tokens, diagnostics)
}

/// Run `source` as a Lox program, writing `print` output to `out`.
pub fn run(source: &str, out: &mut dyn Write) -> Outcome {
    info!("Running program ({} bytes)", source.len());

    let (tokens, mut diagnostics) = scan(source);

    let (statements, parse_errors) = Parser::new(&tokens).parse();
    diagnostics.append(parse_errors);

    if diagnostics.has_errors() {
        info!("Stopping before resolution: {} error(s)", diagnostics.len());
        return Outcome::StaticErrors(diagnostics);
    }

    let mut interpreter = Interpreter::with_output(&mut *out);

    let resolve_errors = Resolver::new(&mut interpreter).resolve(&statements);
    if resolve_errors.has_errors() {
        info!("Stopping before execution: {} error(s)", resolve_errors.len());
        return Outcome::StaticErrors(resolve_errors);
    }

    match interpreter.interpret(&statements) {
        Ok(()) => Outcome::Success,
        Err(e) => {
            info!("Program aborted by runtime error on line {}", e.line);
            Outcome::RuntimeError(e)
        }
    }
}

/// Parse `source` as a single expression, evaluate it, and print the value.
pub fn evaluate(source: &str, out: &mut dyn Write) -> Outcome {
    info!("Evaluating expression ({} bytes)", source.len());

    let (tokens, mut diagnostics) = scan(source);
    if diagnostics.has_errors() {
        return Outcome::StaticErrors(diagnostics);
    }

    let expr = match Parser::new(&tokens).parse_expression() {
        Ok(expr) => expr,
        Err(e) => {
            diagnostics.push(e);
            return Outcome::StaticErrors(diagnostics);
        }
    };

    let mut interpreter = Interpreter::with_output(&mut *out);
    let value = match interpreter.evaluate(&expr) {
        Ok(value) => value.to_string(),
        Err(e) => return Outcome::RuntimeError(e),
    };
    drop(interpreter);

    if let Err(e) = writeln!(out, "{}", value) {
        error!("Failed to write program output: {}", e);
    }

    Outcome::Success
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output_of(source: &str) -> (String, Outcome) {
        let mut out = Vec::new();
        let outcome = run(source, &mut out);
        (String::from_utf8(out).unwrap(), outcome)
    }

    #[test]
    fn exit_codes() {
        assert_eq!(output_of("print 1;").1.exit_code(), 0);
        assert_eq!(output_of("print ;").1.exit_code(), 65);
        assert_eq!(output_of("return;").1.exit_code(), 65);
        assert_eq!(output_of("print -nil;").1.exit_code(), 70);
    }

    #[test]
    fn lexical_and_parse_errors_are_reported_together() {
        let (out, outcome) = output_of("print 1 @;\nvar = 2;");

        assert!(out.is_empty());
        let Outcome::StaticErrors(diagnostics) = outcome else {
            panic!("expected static errors");
        };
        assert_eq!(diagnostics.len(), 2);
    }

    #[test]
    fn output_before_a_runtime_error_is_kept() {
        let (out, outcome) = output_of("print \"before\";\nprint 1 + nil;\nprint \"after\";");

        assert_eq!(out, "before\n");
        let Outcome::RuntimeError(e) = outcome else {
            panic!("expected a runtime error");
        };
        assert_eq!(e.to_string(), "Operands must be two numbers or two strings.\n[line 2]");
    }

    #[test]
    fn evaluate_prints_one_value() {
        let mut out = Vec::new();
        let outcome = evaluate("(1 + 2) * 4 == 12", &mut out);

        assert!(outcome.is_success());
        assert_eq!(String::from_utf8(out).unwrap(), "true\n");
    }
}
