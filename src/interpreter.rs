//! Tree‑walking evaluator.
//!
//! Statements report how they finished through [`Flow`]: a `return` travels
//! up through blocks and loops as `Flow::Return` until the enclosing call
//! consumes it.  Runtime errors travel as `Err(RuntimeError)` and abort the
//! program.
//!
//! Variable accesses that the resolver annotated use a fixed‑depth lookup;
//! everything else is a global and is looked up by name in the global scope.
//!
//! Calls nest at most [`MAX_CALL_DEPTH`] deep.  Past that the program fails
//! with a "Stack overflow." runtime error instead of exhausting the host
//! stack, which is grown on demand below the limit.

use std::collections::HashMap;
use std::io::{self, Write};
use std::rc::Rc;

use log::{debug, error, info};

use crate::callable::{Callable, LoxFunction, NativeFunction};
use crate::class::{LoxClass, LoxInstance};
use crate::environment::{EnvId, Environments};
use crate::error::RuntimeError;
use crate::parser::{Expr, ExprId, FunctionDecl, LiteralValue, Stmt};
use crate::token::{Token, TokenType};
use crate::value::Value;

/// Convenient alias for interpreter results.
pub type IResult<T> = Result<T, RuntimeError>;

/// Deepest chain of active calls a program may build.
pub const MAX_CALL_DEPTH: usize = 2048;

/// Host stack left before a call switches to a freshly allocated segment.
const RED_ZONE: usize = 256 * 1024;

/// Size of each extra stack segment.
const STACK_PER_SEGMENT: usize = 2 * 1024 * 1024;

/// How a statement finished.
#[derive(Debug, Clone, PartialEq)]
pub enum Flow<'a> {
    Normal,
    Return(Value<'a>),
}

pub struct Interpreter<'a> {
    environments: Environments<'a>,
    globals: EnvId,
    environment: EnvId,
    locals: HashMap<ExprId, usize>,
    call_depth: usize,
    out: Box<dyn Write + 'a>,
}

impl<'a> Interpreter<'a> {
    /// Creates a new Interpreter printing to stdout.
    pub fn new() -> Self {
        Self::with_output(io::stdout())
    }

    /// Creates a new Interpreter whose `print` statements go to `out`, and
    /// defines native functions such as `clock`.
    pub fn with_output<W: Write + 'a>(out: W) -> Self {
        info!("Initializing Interpreter");

        let mut environments = Environments::new();
        let globals = environments.global();

        debug!("Defining native function 'clock'");

        environments.define(
            &globals,
            "clock",
            Value::NativeFunction(Rc::new(NativeFunction {
                name: "clock",
                arity: 0,
                func: |_args| Value::Number(chrono::Utc::now().timestamp_millis() as f64),
            })),
        );

        Self {
            environments,
            environment: globals.clone(),
            globals,
            locals: HashMap::new(),
            call_depth: 0,
            out: Box::new(out),
        }
    }

    /// Called by the resolver: `id` refers to a binding `depth` scopes out.
    pub fn note_local(&mut self, id: ExprId, depth: usize) {
        debug!("Noting {:?} at depth {}", id, depth);

        self.locals.insert(id, depth);
    }

    /// The resolved depth of `id`, or `None` for a global.
    pub fn depth_of(&self, id: ExprId) -> Option<usize> {
        self.locals.get(&id).copied()
    }

    pub fn environments(&self) -> &Environments<'a> {
        &self.environments
    }

    pub fn environments_mut(&mut self) -> &mut Environments<'a> {
        &mut self.environments
    }

    /// Interprets a list of statements (a "program").  Stops at the first
    /// runtime error.
    pub fn interpret(&mut self, statements: &'a [Stmt<'a>]) -> IResult<()> {
        debug!("Interpreting {} statements", statements.len());

        for stmt in statements {
            self.execute(stmt)?;
        }

        if let Err(e) = self.out.flush() {
            error!("Failed to flush program output: {}", e);
        }

        info!("Interpretation completed successfully");
        Ok(())
    }

    /// Run `statements` with `env` as the current environment.  The previous
    /// environment is restored however the block exits.  Dropping `env` there
    /// frees the block's scope unless a closure captured it.
    pub fn execute_block(&mut self, statements: &'a [Stmt<'a>], env: EnvId) -> IResult<Flow<'a>> {
        let previous = std::mem::replace(&mut self.environment, env);

        let result = self.execute_sequence(statements);

        self.environment = previous;
        self.environments.reclaim();
        result
    }

    /// Number of calls currently on the Lox call stack.
    pub fn call_depth(&self) -> usize {
        self.call_depth
    }

    fn execute_sequence(&mut self, statements: &'a [Stmt<'a>]) -> IResult<Flow<'a>> {
        for stmt in statements {
            if let Flow::Return(value) = self.execute(stmt)? {
                return Ok(Flow::Return(value));
            }
        }

        Ok(Flow::Normal)
    }

    /// Executes a single statement.
    pub fn execute(&mut self, stmt: &'a Stmt<'a>) -> IResult<Flow<'a>> {
        match stmt {
            Stmt::Expression(expr) => {
                self.evaluate(expr)?;
                Ok(Flow::Normal)
            }

            Stmt::Print(expr) => {
                let value = self.evaluate(expr)?;

                if let Err(e) = writeln!(self.out, "{}", value) {
                    error!("Failed to write program output: {}", e);
                }

                debug!("Printed value: {}", value);
                Ok(Flow::Normal)
            }

            Stmt::Var { name, initializer } => {
                let value = match initializer {
                    Some(expr) => self.evaluate(expr)?,
                    None => Value::Nil,
                };

                debug!("Defining variable '{}' = {}", name.lexeme, value);

                self.environments
                    .define(&self.environment, name.lexeme, value);
                Ok(Flow::Normal)
            }

            Stmt::Block(statements) => {
                let env = self.environments.push(&self.environment);
                self.execute_block(statements, env)
            }

            Stmt::If {
                condition,
                then_branch,
                else_branch,
            } => {
                if self.evaluate(condition)?.is_truthy() {
                    self.execute(then_branch)
                } else if let Some(else_stmt) = else_branch {
                    self.execute(else_stmt)
                } else {
                    Ok(Flow::Normal)
                }
            }

            Stmt::While { condition, body } => {
                while self.evaluate(condition)?.is_truthy() {
                    if let Flow::Return(value) = self.execute(body)? {
                        return Ok(Flow::Return(value));
                    }
                }

                Ok(Flow::Normal)
            }

            Stmt::Function(declaration) => {
                debug!("Defining function '{}'", declaration.name.lexeme);

                let function = LoxFunction::new(
                    Some(declaration.name.lexeme),
                    declaration,
                    self.environment.clone(),
                    false,
                );

                self.environments.define(
                    &self.environment,
                    declaration.name.lexeme,
                    Value::Function(Rc::new(function)),
                );
                Ok(Flow::Normal)
            }

            Stmt::Return { value, .. } => {
                let value = match value {
                    Some(expr) => self.evaluate(expr)?,
                    None => Value::Nil,
                };

                debug!("Returning value: {}", value);
                Ok(Flow::Return(value))
            }

            Stmt::Class {
                name,
                superclass,
                methods,
            } => self.execute_class(name, superclass.as_ref(), methods),
        }
    }

    fn execute_class(
        &mut self,
        name: &'a Token<'a>,
        superclass: Option<&'a Expr<'a>>,
        methods: &'a [FunctionDecl<'a>],
    ) -> IResult<Flow<'a>> {
        let superclass = match superclass {
            Some(expr) => match self.evaluate(expr)? {
                Value::Class(class) => Some(class),
                _ => {
                    let token = match expr {
                        Expr::Variable { name, .. } => *name,
                        _ => name,
                    };
                    return Err(RuntimeError::new(token, "Superclass must be a class."));
                }
            },
            None => None,
        };

        let enclosing = self.environment.clone();
        self.environments.define(&enclosing, name.lexeme, Value::Nil);

        // Methods of a subclass close over one extra scope holding `super`.
        let method_env = match &superclass {
            Some(class) => {
                let env = self.environments.push(&enclosing);
                self.environments
                    .define(&env, "super", Value::Class(Rc::clone(class)));
                env
            }
            None => enclosing.clone(),
        };

        let mut table = HashMap::new();
        for method in methods {
            let is_initializer = method.name.lexeme == "init";
            let function = LoxFunction::new(
                Some(method.name.lexeme),
                method,
                method_env.clone(),
                is_initializer,
            );
            table.insert(method.name.lexeme, Rc::new(function));
        }

        let class = LoxClass::new(name.lexeme, superclass, table);
        self.environments
            .assign(&enclosing, name, Value::Class(Rc::new(class)))?;

        Ok(Flow::Normal)
    }

    /// Evaluates an expression and returns a Value.
    pub fn evaluate(&mut self, expr: &'a Expr<'a>) -> IResult<Value<'a>> {
        match expr {
            Expr::Literal(literal) => Ok(match literal {
                LiteralValue::Number(n) => Value::Number(*n),
                LiteralValue::Str(s) => Value::String(s.clone()),
                LiteralValue::True => Value::Bool(true),
                LiteralValue::False => Value::Bool(false),
                LiteralValue::Nil => Value::Nil,
            }),

            Expr::Grouping(inner) => self.evaluate(inner),

            Expr::Unary { operator, right } => self.evaluate_unary(operator, right),

            Expr::Binary {
                left,
                operator,
                right,
            } => self.evaluate_binary(left, operator, right),

            Expr::Logical {
                left,
                operator,
                right,
            } => {
                let left_val = self.evaluate(left)?;

                let short_circuit = if operator.token_type == TokenType::OR {
                    left_val.is_truthy()
                } else {
                    !left_val.is_truthy()
                };

                if short_circuit {
                    Ok(left_val)
                } else {
                    self.evaluate(right)
                }
            }

            Expr::Variable { id, name } => self.lookup_variable(*id, name),

            Expr::Assign { id, name, value } => {
                let value = self.evaluate(value)?;

                match self.depth_of(*id) {
                    Some(depth) => {
                        self.environments
                            .assign_at(&self.environment, depth, name, value.clone())
                    }
                    None => self.environments.assign(&self.globals, name, value.clone())?,
                }

                debug!("Assigned {} to '{}'", value, name.lexeme);
                Ok(value)
            }

            Expr::Call {
                callee,
                paren,
                arguments,
            } => {
                let callee_val = self.evaluate(callee)?;

                let mut arg_values = Vec::with_capacity(arguments.len());
                for arg in arguments {
                    arg_values.push(self.evaluate(arg)?);
                }

                self.invoke_callable(&callee_val, paren, arg_values)
            }

            Expr::Get { object, name } => match self.evaluate(object)? {
                Value::Instance(instance) => {
                    LoxInstance::get(&instance, name, &mut self.environments)
                }
                _ => Err(RuntimeError::new(name, "Only instances have properties.")),
            },

            Expr::Set {
                object,
                name,
                value,
            } => {
                let Value::Instance(instance) = self.evaluate(object)? else {
                    return Err(RuntimeError::new(name, "Only instances have fields."));
                };

                let value = self.evaluate(value)?;
                instance.borrow_mut().set(name, value.clone());
                Ok(value)
            }

            Expr::This { id, keyword } => self.lookup_variable(*id, keyword),

            Expr::Super {
                id,
                keyword,
                method,
            } => self.evaluate_super(*id, keyword, method),

            Expr::Lambda(declaration) => {
                let function =
                    LoxFunction::new(None, declaration, self.environment.clone(), false);
                Ok(Value::Function(Rc::new(function)))
            }
        }
    }

    fn lookup_variable(&self, id: ExprId, name: &Token<'a>) -> IResult<Value<'a>> {
        match self.depth_of(id) {
            Some(depth) => self
                .environments
                .get_at(&self.environment, depth, name.lexeme)
                .ok_or_else(|| {
                    RuntimeError::new(name, format!("Undefined variable '{}'.", name.lexeme))
                }),
            None => self.environments.get(&self.globals, name),
        }
    }

    /// `super.method`: the superclass sits `depth` scopes out, and the
    /// receiver (`this`) one scope closer.
    fn evaluate_super(
        &mut self,
        id: ExprId,
        keyword: &'a Token<'a>,
        method: &'a Token<'a>,
    ) -> IResult<Value<'a>> {
        let outside_class = || RuntimeError::new(keyword, "Can't use 'super' outside of a class.");

        let depth = self.depth_of(id).ok_or_else(outside_class)?;
        let this_depth = depth.checked_sub(1).ok_or_else(outside_class)?;

        let superclass = match self.environments.get_at(&self.environment, depth, "super") {
            Some(Value::Class(class)) => class,
            _ => return Err(outside_class()),
        };

        let instance = match self.environments.get_at(&self.environment, this_depth, "this") {
            Some(Value::Instance(instance)) => instance,
            _ => return Err(outside_class()),
        };

        let Some(found) = superclass.find_method(method.lexeme) else {
            return Err(RuntimeError::new(
                method,
                format!("Undefined property '{}'.", method.lexeme),
            ));
        };

        let bound = found.bind(instance, &mut self.environments);
        Ok(Value::Function(Rc::new(bound)))
    }

    /// Evaluates a unary expression.
    fn evaluate_unary(&mut self, op: &'a Token<'a>, expr: &'a Expr<'a>) -> IResult<Value<'a>> {
        let right_val = self.evaluate(expr)?;

        match op.token_type {
            TokenType::MINUS => match right_val {
                Value::Number(n) => Ok(Value::Number(-n)),
                _ => Err(RuntimeError::new(op, "Operand must be a number.")),
            },
            TokenType::BANG => Ok(Value::Bool(!right_val.is_truthy())),
            _ => Err(RuntimeError::new(op, "Invalid unary operator.")),
        }
    }

    /// Evaluates a binary expression.  Division by zero follows IEEE‑754.
    fn evaluate_binary(
        &mut self,
        left: &'a Expr<'a>,
        op: &'a Token<'a>,
        right: &'a Expr<'a>,
    ) -> IResult<Value<'a>> {
        let left_val = self.evaluate(left)?;
        let right_val = self.evaluate(right)?;

        trace_binary(op, &left_val, &right_val);

        match op.token_type {
            TokenType::PLUS => match (left_val, right_val) {
                (Value::Number(a), Value::Number(b)) => Ok(Value::Number(a + b)),
                (Value::String(a), Value::String(b)) => Ok(Value::String(a + &b)),
                _ => Err(RuntimeError::new(
                    op,
                    "Operands must be two numbers or two strings.",
                )),
            },

            TokenType::EQUAL_EQUAL => Ok(Value::Bool(left_val == right_val)),

            TokenType::BANG_EQUAL => Ok(Value::Bool(left_val != right_val)),

            _ => {
                let (Value::Number(a), Value::Number(b)) = (&left_val, &right_val) else {
                    return Err(RuntimeError::new(op, "Operands must be numbers."));
                };
                let (a, b) = (*a, *b);

                match op.token_type {
                    TokenType::MINUS => Ok(Value::Number(a - b)),
                    TokenType::STAR => Ok(Value::Number(a * b)),
                    TokenType::SLASH => Ok(Value::Number(a / b)),
                    TokenType::GREATER => Ok(Value::Bool(a > b)),
                    TokenType::GREATER_EQUAL => Ok(Value::Bool(a >= b)),
                    TokenType::LESS => Ok(Value::Bool(a < b)),
                    TokenType::LESS_EQUAL => Ok(Value::Bool(a <= b)),
                    _ => Err(RuntimeError::new(op, "Invalid binary operator.")),
                }
            }
        }
    }

    /// Checks arity and call depth, then hands over to the callable on a
    /// stack with room for it.
    fn invoke_callable(
        &mut self,
        callee_val: &Value<'a>,
        paren: &'a Token<'a>,
        arguments: Vec<Value<'a>>,
    ) -> IResult<Value<'a>> {
        let callable: &dyn Callable<'a> = match callee_val {
            Value::NativeFunction(native) => &**native,
            Value::Function(function) => &**function,
            Value::Class(class) => class,
            _ => {
                return Err(RuntimeError::new(
                    paren,
                    "Can only call functions and classes.",
                ))
            }
        };

        if arguments.len() != callable.arity() {
            return Err(RuntimeError::new(
                paren,
                format!(
                    "Expected {} arguments but got {}.",
                    callable.arity(),
                    arguments.len()
                ),
            ));
        }

        if self.call_depth >= MAX_CALL_DEPTH {
            return Err(RuntimeError::new(paren, "Stack overflow."));
        }

        trace_call(callee_val, paren);

        self.call_depth += 1;
        let result = stacker::maybe_grow(RED_ZONE, STACK_PER_SEGMENT, || {
            callable.call(self, arguments)
        });
        self.call_depth -= 1;

        let result = result?;
        trace_return(callee_val, &result);
        Ok(result)
    }
}

// Logging for the hot paths lives out of line so the evaluator's own frames
// stay small.

#[inline(never)]
fn trace_binary(op: &Token<'_>, left: &Value<'_>, right: &Value<'_>) {
    debug!(
        "Binary '{}' on {} and {}",
        op.lexeme,
        left.type_name(),
        right.type_name()
    );
}

#[inline(never)]
fn trace_call(callee: &Value<'_>, paren: &Token<'_>) {
    debug!("Calling {} on line {}", callee, paren.line);
}

#[inline(never)]
fn trace_return(callee: &Value<'_>, result: &Value<'_>) {
    debug!("{} returned: {}", callee, result);
}

impl<'a> Default for Interpreter<'a> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser;
    use crate::resolver::Resolver;
    use crate::runner::scan;

    /// Resolves and runs `$source`, then hands the interpreter and the
    /// program's result to `$body`.
    macro_rules! with_program {
        ($source:expr, |$interp:ident, $result:ident| $body:block) => {{
            let (tokens, _) = scan($source);
            let (statements, diagnostics) = Parser::new(&tokens).parse();
            assert!(diagnostics.is_empty(), "{}", diagnostics);
            let mut $interp = Interpreter::with_output(Vec::new());
            let errors = Resolver::new(&mut $interp).resolve(&statements);
            assert!(errors.is_empty(), "{}", errors);
            let $result = $interp.interpret(&statements);
            $body
        }};
    }

    fn global<'a>(interpreter: &Interpreter<'a>, name: &str) -> Option<Value<'a>> {
        let envs = interpreter.environments();
        envs.get_at(&envs.global(), 0, name)
    }

    #[test]
    fn loop_blocks_release_their_scopes() {
        with_program!(
            "var s = 0; for (var i = 0; i < 10000; i = i + 1) { var x = i; s = s + x; }",
            |interp, result| {
                assert!(result.is_ok());
                assert_eq!(global(&interp, "s"), Some(Value::Number(49995000.0)));
                assert_eq!(interp.environments().len(), 1);
                assert!(interp.environments().allocated() <= 4);
            }
        );
    }

    #[test]
    fn call_scopes_are_released_on_return() {
        with_program!(
            "fun f(n) { var twice = n * 2; return twice; }\n\
             var last; for (var i = 0; i < 10000; i = i + 1) last = f(i);",
            |interp, result| {
                assert!(result.is_ok());
                assert_eq!(global(&interp, "last"), Some(Value::Number(19998.0)));
                assert_eq!(interp.environments().len(), 1);
                assert!(interp.environments().allocated() <= 4);
            }
        );
    }

    #[test]
    fn bound_method_scopes_are_released() {
        with_program!(
            "class Acc { init() { this.total = 0; } add(n) { this.total = this.total + n; } }\n\
             var acc = Acc(); for (var i = 0; i < 10000; i = i + 1) acc.add(1);\n\
             var total = acc.total;",
            |interp, result| {
                assert!(result.is_ok());
                assert_eq!(global(&interp, "total"), Some(Value::Number(10000.0)));
                assert_eq!(interp.environments().len(), 1);
                assert!(interp.environments().allocated() <= 6);
            }
        );
    }

    #[test]
    fn captured_scopes_outlive_their_call() {
        with_program!(
            "fun make() { var c = 0; fun inc() { c = c + 1; return c; } return inc; }\n\
             var counter = make(); counter(); var seen = counter();",
            |interp, result| {
                assert!(result.is_ok());
                assert_eq!(global(&interp, "seen"), Some(Value::Number(2.0)));
                // The global scope plus the one `inc` closed over.
                assert_eq!(interp.environments().len(), 2);
            }
        );
    }

    #[test]
    fn deep_recursion_below_the_limit_succeeds() {
        with_program!(
            "fun down(n) { if (n > 0) return down(n - 1); return \"bottom\"; }\n\
             var reached = down(2000);",
            |interp, result| {
                assert!(result.is_ok(), "{:?}", result);
                assert_eq!(global(&interp, "reached"), Some(Value::String("bottom".into())));
                assert_eq!(interp.call_depth(), 0);
            }
        );
    }

    #[test]
    fn runaway_recursion_is_a_runtime_error() {
        with_program!(
            "fun forever(n) {\n  return forever(n + 1);\n}\nforever(0);",
            |interp, result| {
                let err = result.unwrap_err();
                assert_eq!(err.message, "Stack overflow.");
                assert_eq!(err.line, 2);
                assert_eq!(interp.call_depth(), 0);
            }
        );
    }
}
