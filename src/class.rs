use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use log::{debug, info};

use crate::callable::{Callable, LoxFunction};
use crate::environment::Environments;
use crate::error::RuntimeError;
use crate::interpreter::Interpreter;
use crate::token::Token;
use crate::value::Value;

const INITIALIZER: &str = "init";

/// A class: its name, optional superclass and method table.
pub struct LoxClass<'a> {
    name: &'a str,
    superclass: Option<Rc<LoxClass<'a>>>,
    methods: HashMap<&'a str, Rc<LoxFunction<'a>>>,
}

impl<'a> LoxClass<'a> {
    pub fn new(
        name: &'a str,
        superclass: Option<Rc<LoxClass<'a>>>,
        methods: HashMap<&'a str, Rc<LoxFunction<'a>>>,
    ) -> Self {
        info!(
            "Class '{}' created with {} method(s)",
            name,
            methods.len()
        );

        Self {
            name,
            superclass,
            methods,
        }
    }

    pub fn name(&self) -> &'a str {
        self.name
    }

    pub fn superclass(&self) -> Option<&Rc<LoxClass<'a>>> {
        self.superclass.as_ref()
    }

    /// Own table first, then up the superclass chain.  Absence is not an error.
    pub fn find_method(&self, name: &str) -> Option<Rc<LoxFunction<'a>>> {
        if let Some(method) = self.methods.get(name) {
            return Some(Rc::clone(method));
        }

        match &self.superclass {
            Some(superclass) => superclass.find_method(name),
            None => None,
        }
    }
}

/// Calling a class constructs an instance.
impl<'a> Callable<'a> for Rc<LoxClass<'a>> {
    fn arity(&self) -> usize {
        match self.find_method(INITIALIZER) {
            Some(initializer) => initializer.arity(),
            None => 0,
        }
    }

    fn call(
        &self,
        interpreter: &mut Interpreter<'a>,
        arguments: Vec<Value<'a>>,
    ) -> Result<Value<'a>, RuntimeError> {
        debug!("Instantiating class '{}'", self.name);

        let instance = Rc::new(RefCell::new(LoxInstance::new(Rc::clone(self))));

        if let Some(initializer) = self.find_method(INITIALIZER) {
            let bound = initializer.bind(Rc::clone(&instance), interpreter.environments_mut());
            bound.call(interpreter, arguments)?;
        }

        Ok(Value::Instance(instance))
    }
}

impl<'a> fmt::Debug for LoxClass<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut methods: Vec<&&str> = self.methods.keys().collect();
        methods.sort();

        f.debug_struct("LoxClass")
            .field("name", &self.name)
            .field("superclass", &self.superclass.as_ref().map(|s| s.name))
            .field("methods", &methods)
            .finish()
    }
}

impl<'a> fmt::Display for LoxClass<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// An object created by calling a class.  Fields are per instance.
pub struct LoxInstance<'a> {
    class: Rc<LoxClass<'a>>,
    fields: HashMap<&'a str, Value<'a>>,
}

impl<'a> LoxInstance<'a> {
    pub fn new(class: Rc<LoxClass<'a>>) -> Self {
        Self {
            class,
            fields: HashMap::new(),
        }
    }

    pub fn class(&self) -> &Rc<LoxClass<'a>> {
        &self.class
    }

    /// Field first, then a method bound to `instance`.
    pub fn get(
        instance: &Rc<RefCell<LoxInstance<'a>>>,
        name: &Token<'a>,
        environments: &mut Environments<'a>,
    ) -> Result<Value<'a>, RuntimeError> {
        let method = {
            let this = instance.borrow();

            if let Some(value) = this.fields.get(name.lexeme) {
                return Ok(value.clone());
            }

            this.class.find_method(name.lexeme)
        };

        match method {
            Some(method) => {
                let bound = method.bind(Rc::clone(instance), environments);
                Ok(Value::Function(Rc::new(bound)))
            }
            None => Err(RuntimeError::new(
                name,
                format!("Undefined property '{}'.", name.lexeme),
            )),
        }
    }

    /// Writes always land in this instance's own field map.
    pub fn set(&mut self, name: &Token<'a>, value: Value<'a>) {
        self.fields.insert(name.lexeme, value);
    }
}

impl<'a> fmt::Debug for LoxInstance<'a> {
    // Fields may point back at this instance; list names only.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut fields: Vec<&&str> = self.fields.keys().collect();
        fields.sort();

        f.debug_struct("LoxInstance")
            .field("class", &self.class.name)
            .field("fields", &fields)
            .finish()
    }
}

impl<'a> fmt::Display for LoxInstance<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} instance", self.class.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser;
    use crate::resolver::Resolver;
    use crate::runner::scan;
    use crate::token::TokenType;

    macro_rules! with_program {
        ($source:expr, |$interp:ident| $body:block) => {{
            let (tokens, _) = scan($source);
            let (statements, diagnostics) = Parser::new(&tokens).parse();
            assert!(diagnostics.is_empty(), "{}", diagnostics);
            let mut $interp = Interpreter::with_output(Vec::new());
            let errors = Resolver::new(&mut $interp).resolve(&statements);
            assert!(errors.is_empty(), "{}", errors);
            $interp.interpret(&statements).unwrap();
            $body
        }};
    }

    fn global<'a>(interpreter: &Interpreter<'a>, name: &str) -> Value<'a> {
        let envs = interpreter.environments();
        envs.get_at(&envs.global(), 0, name).unwrap()
    }

    fn class<'a>(interpreter: &Interpreter<'a>, name: &str) -> Rc<LoxClass<'a>> {
        match global(interpreter, name) {
            Value::Class(class) => class,
            other => panic!("{} is not a class: {:?}", name, other),
        }
    }

    fn instance<'a>(interpreter: &Interpreter<'a>, name: &str) -> Rc<RefCell<LoxInstance<'a>>> {
        match global(interpreter, name) {
            Value::Instance(instance) => instance,
            other => panic!("{} is not an instance: {:?}", name, other),
        }
    }

    #[test]
    fn find_method_walks_the_superclass_chain() {
        with_program!("class A { a() {} } class B < A { b() {} }", |interp| {
            let a = class(&interp, "A");
            let b = class(&interp, "B");

            assert!(b.find_method("a").is_some());
            assert!(b.find_method("b").is_some());
            assert!(a.find_method("b").is_none());
            assert_eq!(b.superclass().map(|s| s.name()), Some("A"));
        });
    }

    #[test]
    fn arity_follows_init() {
        with_program!(
            "class P { init(x, y) {} } class Q {} class R < P {}",
            |interp| {
                assert_eq!(class(&interp, "P").arity(), 2);
                assert_eq!(class(&interp, "Q").arity(), 0);
                assert_eq!(class(&interp, "R").arity(), 2);
            }
        );
    }

    #[test]
    fn fields_shadow_methods_and_missing_names_fail() {
        with_program!(
            "class A { m() { return 1; } } var a = A(); a.f = \"field\";",
            |interp| {
                let a = instance(&interp, "a");
                let field = Token::new(TokenType::IDENTIFIER, "f", 1);
                let method = Token::new(TokenType::IDENTIFIER, "m", 1);
                let missing = Token::new(TokenType::IDENTIFIER, "zzz", 1);

                assert_eq!(
                    LoxInstance::get(&a, &field, interp.environments_mut()),
                    Ok(Value::String("field".into()))
                );
                assert!(matches!(
                    LoxInstance::get(&a, &method, interp.environments_mut()),
                    Ok(Value::Function(_))
                ));

                let err = LoxInstance::get(&a, &missing, interp.environments_mut()).unwrap_err();
                assert_eq!(err.message, "Undefined property 'zzz'.");
            }
        );
    }

    #[test]
    fn set_writes_the_instance_own_map() {
        with_program!("class A {} var a = A(); var b = A();", |interp| {
            let a = instance(&interp, "a");
            let b = instance(&interp, "b");
            let x = Token::new(TokenType::IDENTIFIER, "x", 1);

            a.borrow_mut().set(&x, Value::Number(1.0));

            assert!(LoxInstance::get(&a, &x, interp.environments_mut()).is_ok());
            assert!(LoxInstance::get(&b, &x, interp.environments_mut()).is_err());
        });
    }

    #[test]
    fn display() {
        with_program!("class Bagel {} var b = Bagel();", |interp| {
            assert_eq!(global(&interp, "Bagel").to_string(), "Bagel");
            assert_eq!(global(&interp, "b").to_string(), "Bagel instance");
            assert!(Rc::ptr_eq(instance(&interp, "b").borrow().class(), &class(&interp, "Bagel")));
        });
    }
}
