use crate::parser::{Expr, FunctionDecl, LiteralValue};

/// Converts an expression to the Crafting‑Interpreters parenthesized
/// prefix form used by the `parse` subcommand.
pub struct AstPrinter;

impl AstPrinter {
    pub fn print(expr: &Expr<'_>) -> String {
        match expr {
            // ── literals ────────────────────────────────────────────────
            Expr::Literal(lit) => match lit {
                LiteralValue::True => "true".into(),

                LiteralValue::False => "false".into(),

                LiteralValue::Nil => "nil".into(),

                LiteralValue::Str(s) => s.clone(),

                LiteralValue::Number(n) => {
                    if n.fract() == 0.0 {
                        // 3 → 3.0
                        format!("{:.1}", n)
                    } else {
                        n.to_string()
                    }
                }
            },

            // ── grouping ────────────────────────────────────────────────
            Expr::Grouping(inner) => format!("(group {})", Self::print(inner)),

            // ── unary operator ──────────────────────────────────────────
            Expr::Unary { operator, right } => {
                format!("({} {})", operator.lexeme, Self::print(right))
            }

            // ── binary / logical operator ──────────────────────────────
            Expr::Binary {
                left,
                operator,
                right,
            }
            | Expr::Logical {
                left,
                operator,
                right,
            } => format!(
                "({} {} {})",
                operator.lexeme,
                Self::print(left),
                Self::print(right)
            ),

            // ── variables ───────────────────────────────────────────────
            Expr::Variable { name, .. } => name.lexeme.into(),

            Expr::Assign { name, value, .. } => {
                format!("(= {} {})", name.lexeme, Self::print(value))
            }

            // ── calls ───────────────────────────────────────────────────
            Expr::Call {
                callee, arguments, ..
            } => {
                let mut s = format!("(call {}", Self::print(callee));
                for arg in arguments {
                    s.push(' ');
                    s.push_str(&Self::print(arg));
                }
                s.push(')');
                s
            }

            // ── properties ──────────────────────────────────────────────
            Expr::Get { object, name } => format!("(. {} {})", Self::print(object), name.lexeme),

            Expr::Set {
                object,
                name,
                value,
            } => format!(
                "(= (. {} {}) {})",
                Self::print(object),
                name.lexeme,
                Self::print(value)
            ),

            Expr::This { .. } => "this".into(),

            Expr::Super { method, .. } => format!("(super {})", method.lexeme),

            Expr::Lambda(declaration) => Self::print_lambda(declaration),
        }
    }

    fn print_lambda(declaration: &FunctionDecl<'_>) -> String {
        let params: Vec<&str> = declaration.params.iter().map(|p| p.lexeme).collect();

        format!(
            "(fun ({}) <{} stmt>)",
            params.join(" "),
            declaration.body.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser;
    use crate::scanner::Scanner;
    use crate::token::Token;

    fn printed(source: &str) -> String {
        let tokens: Vec<Token<'_>> = Scanner::new(source).filter_map(|t| t.ok()).collect();
        let expr = Parser::new(&tokens).parse_expression().unwrap();
        AstPrinter::print(&expr)
    }

    #[test]
    fn precedence_and_grouping() {
        assert_eq!(printed("1 + 2 * 3"), "(+ 1.0 (* 2.0 3.0))");
        assert_eq!(printed("(1 + 2) * 3"), "(* (group (+ 1.0 2.0)) 3.0)");
        assert_eq!(printed("-1.5 < !true"), "(< (- 1.5) (! true))");
    }

    #[test]
    fn literals() {
        assert_eq!(printed("\"hi\""), "hi");
        assert_eq!(printed("nil"), "nil");
        assert_eq!(printed("false"), "false");
    }

    #[test]
    fn logical_and_assignment() {
        assert_eq!(printed("a = b or c and d"), "(= a (or b (and c d)))");
    }

    #[test]
    fn calls_and_properties() {
        assert_eq!(printed("f(1, x)"), "(call f 1.0 x)");
        assert_eq!(printed("a.b.c"), "(. (. a b) c)");
        assert_eq!(printed("a.b = 2"), "(= (. a b) 2.0)");
    }

    #[test]
    fn lambda() {
        assert_eq!(printed("fun (a, b) { return a; }"), "(fun (a b) <1 stmt>)");
    }
}
