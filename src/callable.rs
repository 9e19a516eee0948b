//! Everything that can appear to the left of `(...)`.
//!
//! Functions, natives and classes share the [`Callable`] contract.  The call
//! site checks the argument count against [`Callable::arity`] before calling.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use log::debug;

use crate::class::LoxInstance;
use crate::environment::{EnvId, Environments};
use crate::error::RuntimeError;
use crate::interpreter::{Flow, Interpreter};
use crate::parser::FunctionDecl;
use crate::value::Value;

pub trait Callable<'a> {
    fn arity(&self) -> usize;

    /// `arguments.len() == self.arity()` is guaranteed by the caller.
    fn call(
        &self,
        interpreter: &mut Interpreter<'a>,
        arguments: Vec<Value<'a>>,
    ) -> Result<Value<'a>, RuntimeError>;
}

/// A function implemented by the host.
pub struct NativeFunction<'a> {
    pub name: &'static str,
    pub arity: usize,
    pub func: fn(&[Value<'a>]) -> Value<'a>,
}

impl<'a> Callable<'a> for NativeFunction<'a> {
    fn arity(&self) -> usize {
        self.arity
    }

    fn call(
        &self,
        _interpreter: &mut Interpreter<'a>,
        arguments: Vec<Value<'a>>,
    ) -> Result<Value<'a>, RuntimeError> {
        debug!("Calling native function '{}'", self.name);

        Ok((self.func)(&arguments))
    }
}

impl<'a> fmt::Debug for NativeFunction<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeFunction")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .finish()
    }
}

impl<'a> fmt::Display for NativeFunction<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<native fn>")
    }
}

/// A user function or method: its declaration plus the environment it closed
/// over.  The captured environment is fixed when the value is created.
pub struct LoxFunction<'a> {
    /// `None` for anonymous functions.
    name: Option<&'a str>,
    declaration: &'a FunctionDecl<'a>,
    closure: EnvId,
    is_initializer: bool,
}

impl<'a> LoxFunction<'a> {
    pub fn new(
        name: Option<&'a str>,
        declaration: &'a FunctionDecl<'a>,
        closure: EnvId,
        is_initializer: bool,
    ) -> Self {
        Self {
            name,
            declaration,
            closure,
            is_initializer,
        }
    }

    pub fn closure(&self) -> &EnvId {
        &self.closure
    }

    pub fn is_initializer(&self) -> bool {
        self.is_initializer
    }

    /// A copy of this method whose closure is extended with one scope binding
    /// `this` to `instance`.  The original (shared by the class) is untouched.
    pub fn bind(
        &self,
        instance: Rc<RefCell<LoxInstance<'a>>>,
        environments: &mut Environments<'a>,
    ) -> LoxFunction<'a> {
        let env = environments.push(&self.closure);
        environments.define(&env, "this", Value::Instance(instance));

        LoxFunction {
            name: self.name,
            declaration: self.declaration,
            closure: env,
            is_initializer: self.is_initializer,
        }
    }
}

impl<'a> Callable<'a> for LoxFunction<'a> {
    fn arity(&self) -> usize {
        self.declaration.params.len()
    }

    fn call(
        &self,
        interpreter: &mut Interpreter<'a>,
        arguments: Vec<Value<'a>>,
    ) -> Result<Value<'a>, RuntimeError> {
        debug!("Calling {} with {} argument(s)", self, arguments.len());

        // Enclosed by the captured environment, not the caller's.
        let env = interpreter.environments_mut().push(&self.closure);

        for (param, argument) in self.declaration.params.iter().zip(arguments) {
            interpreter
                .environments_mut()
                .define(&env, param.lexeme, argument);
        }

        let flow = interpreter.execute_block(&self.declaration.body, env)?;

        if self.is_initializer {
            return interpreter
                .environments()
                .get_at(&self.closure, 0, "this")
                .ok_or_else(|| {
                    RuntimeError::new(self.declaration.name, "Undefined variable 'this'.")
                });
        }

        match flow {
            Flow::Return(value) => Ok(value),
            Flow::Normal => Ok(Value::Nil),
        }
    }
}

impl<'a> fmt::Debug for LoxFunction<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoxFunction")
            .field("name", &self.name)
            .field("arity", &self.declaration.params.len())
            .field("closure", &self.closure)
            .field("is_initializer", &self.is_initializer)
            .finish()
    }
}

impl<'a> fmt::Display for LoxFunction<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name {
            Some(name) => write!(f, "<fn {}>", name),
            None => write!(f, "<fn lambda>"),
        }
    }
}
