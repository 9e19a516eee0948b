use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::callable::{LoxFunction, NativeFunction};
use crate::class::{LoxClass, LoxInstance};

/// Every value a Lox program can produce.
///
/// Reference values (functions, classes, instances) are shared through `Rc`;
/// instances additionally need interior mutability for their field map.
#[derive(Debug, Clone)]
pub enum Value<'a> {
    Nil,
    Bool(bool),
    Number(f64),
    String(String),
    NativeFunction(Rc<NativeFunction<'a>>),
    Function(Rc<LoxFunction<'a>>),
    Class(Rc<LoxClass<'a>>),
    Instance(Rc<RefCell<LoxInstance<'a>>>),
}

impl<'a> Value<'a> {
    /// Only `nil` and `false` are falsy.
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Nil | Value::Bool(false))
    }

    /// Name of the value's type, used in log lines.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::NativeFunction(_) | Value::Function(_) => "function",
            Value::Class(_) => "class",
            Value::Instance(_) => "instance",
        }
    }
}

/// No cross‑type coercion: values of different variants are never equal.
/// Reference values compare by identity.
impl<'a> PartialEq for Value<'a> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::NativeFunction(a), Value::NativeFunction(b)) => Rc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::Class(a), Value::Class(b)) => Rc::ptr_eq(a, b),
            (Value::Instance(a), Value::Instance(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl<'a> fmt::Display for Value<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),

            Value::Bool(b) => write!(f, "{}", b),

            Value::Number(n) => write_number(f, *n),

            Value::String(s) => write!(f, "{}", s),

            Value::NativeFunction(native) => write!(f, "{}", native),

            Value::Function(function) => write!(f, "{}", function),

            Value::Class(class) => write!(f, "{}", class),

            Value::Instance(instance) => write!(f, "{}", instance.borrow()),
        }
    }
}

/// Integral values print without a trailing ".0".  From 1e16 up, where an
/// `f64` no longer holds every integer, the shortest exponent form is used.
fn write_number(f: &mut fmt::Formatter<'_>, n: f64) -> fmt::Result {
    if n.is_finite() && n.abs() >= 1e16 {
        let text = format!("{:e}", n);

        return match text.split_once('e') {
            Some((mantissa, exponent)) => write!(f, "{}e+{}", mantissa, exponent),
            None => f.write_str(&text),
        };
    }

    if n.fract() == 0.0 && n.is_finite() {
        write!(f, "{:.0}", n)
    } else {
        write!(f, "{}", n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthiness() {
        assert!(!Value::Nil.is_truthy());
        assert!(!Value::Bool(false).is_truthy());
        assert!(Value::Bool(true).is_truthy());
        assert!(Value::Number(0.0).is_truthy());
        assert!(Value::String(String::new()).is_truthy());
    }

    #[test]
    fn equality_never_coerces() {
        assert_eq!(Value::Nil, Value::Nil);
        assert_ne!(Value::Number(0.0), Value::Bool(false));
        assert_ne!(Value::Nil, Value::Bool(false));
        assert_ne!(Value::String("1".into()), Value::Number(1.0));
        assert_eq!(Value::String("a".into()), Value::String("a".into()));
    }

    #[test]
    fn number_display() {
        assert_eq!(Value::Number(3.0).to_string(), "3");
        assert_eq!(Value::Number(-0.5).to_string(), "-0.5");
        assert_eq!(Value::Number(2.25).to_string(), "2.25");
        assert_eq!(Value::Number(f64::INFINITY).to_string(), "inf");
    }

    #[test]
    fn huge_numbers_use_exponent_form() {
        assert_eq!(
            Value::Number(123456789012345678901234567890.0).to_string(),
            "1.2345678901234568e+29"
        );
        assert_eq!(Value::Number(1e16).to_string(), "1e+16");
        assert_eq!(Value::Number(-2.5e20).to_string(), "-2.5e+20");
        assert_eq!(Value::Number(9007199254740992.0).to_string(), "9007199254740992");
    }

    #[test]
    fn scalar_display() {
        assert_eq!(Value::Nil.to_string(), "nil");
        assert_eq!(Value::Bool(true).to_string(), "true");
        assert_eq!(Value::String("hi".into()).to_string(), "hi");
    }
}
