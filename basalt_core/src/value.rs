//! Interpreter values and captured execution state.
//!
//! [`InterpreterState`] is what the interpreter hands the JIT at a hot loop
//! back-edge. The JIT keeps its own copy; `Value` has no interior
//! mutability, so `Clone` yields a fully independent snapshot.

use std::fmt;
use std::sync::Arc;

use crate::bytecode::Constant;

/// An interpreter-level value.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    /// The absent value.
    #[default]
    None,
    /// Boolean.
    Bool(bool),
    /// 64-bit signed integer.
    Int(i64),
    /// 64-bit float.
    Float(f64),
    /// Immutable string.
    Str(Arc<str>),
    /// Owned list of values.
    List(Vec<Value>),
}

impl Value {
    /// Raw 64-bit payload for values that fit in a machine word.
    ///
    /// Heap-backed values (`Str`, `List`) have no word representation.
    #[inline]
    pub fn as_word(&self) -> Option<i64> {
        match *self {
            Value::None => Some(0),
            Value::Bool(b) => Some(b as i64),
            Value::Int(i) => Some(i),
            Value::Float(f) => Some(f.to_bits() as i64),
            Value::Str(_) | Value::List(_) => None,
        }
    }

    /// Interpreter truthiness.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(items) => !items.is_empty(),
        }
    }
}

impl From<&Constant> for Value {
    fn from(constant: &Constant) -> Self {
        match constant {
            Constant::None => Value::None,
            Constant::Bool(b) => Value::Bool(*b),
            Constant::Int(i) => Value::Int(*i),
            Constant::Float(f) => Value::Float(*f),
            Constant::Str(s) => Value::Str(Arc::clone(s)),
        }
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => write!(f, "None"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Str(s) => write!(f, "{:?}", s),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
        }
    }
}

// =============================================================================
// Interpreter State
// =============================================================================

/// Snapshot of an interpreter frame: value stack and locals.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct InterpreterState {
    /// Operand stack, bottom first.
    pub stack: Vec<Value>,
    /// Local variable slots.
    pub locals: Vec<Value>,
}

impl InterpreterState {
    /// Create a state from its parts.
    pub fn new(stack: Vec<Value>, locals: Vec<Value>) -> Self {
        InterpreterState { stack, locals }
    }

    /// Total number of captured values.
    #[inline]
    pub fn value_count(&self) -> usize {
        self.stack.len() + self.locals.len()
    }

    /// Check if nothing was captured.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.stack.is_empty() && self.locals.is_empty()
    }
}
