/*!
 * Call Arguments
 * Caller-side arguments and the callee-side view of a decoded tuple
 */

use super::handle::RemoteFunction;
use super::pending::PendingResult;
use crate::protocol::Value;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Callable registered as a local function
pub type LocalFn = Arc<dyn Fn(Args) -> anyhow::Result<Value> + Send + Sync>;

/// Client-side hook invoked once with the value of a resolved call
pub type ResultCallback = Box<dyn FnOnce(Value) + Send>;

/// Argument passed to a remote call
pub enum Arg {
    /// Concrete value
    Value(Value),
    /// Result of an earlier call; sent as a reference while unresolved
    Pending(PendingResult),
    /// Local closure for a CALLBACK slot; the peer receives a callable handle
    Callback(LocalFn),
}

impl Arg {
    pub fn callback<F>(f: F) -> Self
    where
        F: Fn(Args) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        Arg::Callback(Arc::new(f))
    }
}

impl fmt::Debug for Arg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arg::Value(v) => f.debug_tuple("Value").field(v).finish(),
            Arg::Pending(p) => f.debug_tuple("Pending").field(&p.call_id()).finish(),
            Arg::Callback(_) => f.write_str("Callback(..)"),
        }
    }
}

impl From<Value> for Arg {
    fn from(value: Value) -> Self {
        Arg::Value(value)
    }
}

impl From<PendingResult> for Arg {
    fn from(pending: PendingResult) -> Self {
        Arg::Pending(pending)
    }
}

impl From<&PendingResult> for Arg {
    fn from(pending: &PendingResult) -> Self {
        Arg::Pending(pending.clone())
    }
}

macro_rules! impl_arg_from_value {
    ($($t:ty),*) => {
        $(impl From<$t> for Arg {
            fn from(v: $t) -> Self {
                Arg::Value(Value::from(v))
            }
        })*
    };
}

impl_arg_from_value!(
    (),
    bool,
    i8,
    i16,
    i32,
    i64,
    u8,
    u16,
    u32,
    f32,
    f64,
    &str,
    String,
    Vec<u8>,
    &[u8],
    Vec<Value>
);

/// Build a `Vec<Arg>` from values, futures and callbacks
///
/// ```ignore
/// let total = endpoint.call("add", args![2, 4])?;
/// ```
#[macro_export]
macro_rules! args {
    () => { ::std::vec::Vec::<$crate::endpoint::Arg>::new() };
    ($($arg:expr),+ $(,)?) => {
        ::std::vec![$($crate::endpoint::Arg::from($arg)),+]
    };
}

/// Decoded argument as seen by a local function
#[derive(Debug, Clone)]
pub enum Param {
    Value(Value),
    /// Callable handle to a function the peer registered for this slot
    Function(RemoteFunction),
}

/// Accessor failure inside a local function
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ArgError {
    #[error("argument {index} missing (got {len})")]
    Missing { index: usize, len: usize },

    #[error("argument {index}: expected {expected}, got {found}")]
    WrongKind {
        index: usize,
        expected: &'static str,
        found: &'static str,
    },
}

/// Argument tuple handed to a local function
#[derive(Debug, Clone, Default)]
pub struct Args(Vec<Param>);

impl Args {
    pub fn new(params: Vec<Param>) -> Self {
        Self(params)
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, index: usize) -> Result<&Param, ArgError> {
        self.0.get(index).ok_or(ArgError::Missing {
            index,
            len: self.0.len(),
        })
    }

    pub fn value(&self, index: usize) -> Result<&Value, ArgError> {
        match self.get(index)? {
            Param::Value(v) => Ok(v),
            Param::Function(_) => Err(ArgError::WrongKind {
                index,
                expected: "value",
                found: "function",
            }),
        }
    }

    pub fn int(&self, index: usize) -> Result<i64, ArgError> {
        let value = self.value(index)?;
        value.as_int().ok_or(ArgError::WrongKind {
            index,
            expected: "int",
            found: value.kind(),
        })
    }

    pub fn float(&self, index: usize) -> Result<f64, ArgError> {
        let value = self.value(index)?;
        value.as_float().ok_or(ArgError::WrongKind {
            index,
            expected: "float",
            found: value.kind(),
        })
    }

    pub fn str(&self, index: usize) -> Result<&str, ArgError> {
        let value = self.value(index)?;
        value.as_str().ok_or(ArgError::WrongKind {
            index,
            expected: "str",
            found: value.kind(),
        })
    }

    pub fn bytes(&self, index: usize) -> Result<&[u8], ArgError> {
        let value = self.value(index)?;
        value.as_bytes().ok_or(ArgError::WrongKind {
            index,
            expected: "bytes",
            found: value.kind(),
        })
    }

    /// Callable handle passed in a CALLBACK slot
    pub fn function(&self, index: usize) -> Result<RemoteFunction, ArgError> {
        match self.get(index)? {
            Param::Function(f) => Ok(f.clone()),
            Param::Value(v) => Err(ArgError::WrongKind {
                index,
                expected: "function",
                found: v.kind(),
            }),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Param> {
        self.0.iter()
    }

    pub fn into_inner(self) -> Vec<Param> {
        self.0
    }
}

impl From<Vec<Value>> for Args {
    fn from(values: Vec<Value>) -> Self {
        Self(values.into_iter().map(Param::Value).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_accessors() {
        let args = Args::from(vec![Value::Int(2), Value::from("lap"), Value::Float(1.5)]);
        assert_eq!(args.len(), 3);
        assert_eq!(args.int(0).unwrap(), 2);
        assert_eq!(args.str(1).unwrap(), "lap");
        assert_eq!(args.float(0).unwrap(), 2.0);
        assert_eq!(
            args.int(1).unwrap_err(),
            ArgError::WrongKind {
                index: 1,
                expected: "int",
                found: "str"
            }
        );
        assert_eq!(args.bytes(5).unwrap_err(), ArgError::Missing { index: 5, len: 3 });
        assert!(args.function(0).is_err());
    }

    #[test]
    fn test_arg_error_converts_to_anyhow() {
        fn body(args: Args) -> anyhow::Result<Value> {
            Ok(Value::Int(args.int(0)? + 1))
        }
        let err = body(Args::from(vec![Value::from("7")])).unwrap_err();
        assert!(err.to_string().contains("expected int, got str"));
    }

    #[test]
    fn test_args_macro() {
        let built: Vec<Arg> = crate::args![2, "x", Value::Nil];
        assert_eq!(built.len(), 3);
        assert!(matches!(built[1], Arg::Value(Value::Str(ref s)) if s == "x"));
        assert!(crate::args![].is_empty());
    }
}
