/*!
 * Type Descriptors
 * Parameter and return descriptors announced with every function
 */

use super::message::WireArg;
use super::value::Value;
use crate::core::errors::RpcError;
use crate::core::types::RpcResult;
use serde::{Deserialize, Serialize};

/// Tag of a single argument slot
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArgType {
    /// Any generic value
    Pickle,
    /// Text only, never coerced
    String,
    /// Raw bytes only
    Bytes,
    /// A remote-callable reference taking the nested parameters
    Callback(Vec<ArgType>),
}

static PICKLE: ArgType = ArgType::Pickle;

impl ArgType {
    pub fn callback(params: impl Into<Vec<ArgType>>) -> Self {
        ArgType::Callback(params.into())
    }

    /// Whether a plain value fits this slot
    #[must_use]
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            ArgType::Pickle => true,
            ArgType::String => matches!(value, Value::Str(_)),
            ArgType::Bytes => matches!(value, Value::Bytes(_)),
            ArgType::Callback(_) => false,
        }
    }

    #[inline]
    #[must_use]
    pub fn is_callback(&self) -> bool {
        matches!(self, ArgType::Callback(_))
    }

    fn name(&self) -> &'static str {
        match self {
            ArgType::Pickle => "PICKLE",
            ArgType::String => "STRING",
            ArgType::Bytes => "BYTES",
            ArgType::Callback(_) => "CALLBACK",
        }
    }

    /// Check a value against this slot, naming the slot on failure
    pub fn check_value(&self, slot: usize, value: &Value) -> Result<(), String> {
        if self.accepts(value) {
            Ok(())
        } else if self.is_callback() {
            Err(format!(
                "argument {}: CALLBACK slot requires a function, got {}",
                slot,
                value.kind()
            ))
        } else {
            Err(format!(
                "argument {}: {} slot does not accept {}",
                slot,
                self.name(),
                value.kind()
            ))
        }
    }
}

/// Parameter descriptor of a function
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Params {
    /// Any number of generic values
    Any,
    /// Exactly these slots, in order
    Exact(Vec<ArgType>),
}

impl Params {
    pub fn exact(slots: impl Into<Vec<ArgType>>) -> Self {
        Params::Exact(slots.into())
    }

    /// No parameters at all
    pub fn none() -> Self {
        Params::Exact(Vec::new())
    }

    /// Slot descriptor for position `index`
    #[must_use]
    pub fn slot(&self, index: usize) -> Option<&ArgType> {
        match self {
            Params::Any => Some(&PICKLE),
            Params::Exact(slots) => slots.get(index),
        }
    }

    pub fn check_arity(&self, count: usize) -> Result<(), String> {
        match self {
            Params::Exact(slots) if slots.len() != count => Err(format!(
                "expected {} argument(s), got {}",
                slots.len(),
                count
            )),
            _ => Ok(()),
        }
    }

    /// Validate an encoded argument tuple
    ///
    /// References pass any slot but a callback one; their value is checked by
    /// the receiver once substituted.
    pub fn check(&self, args: &[WireArg]) -> RpcResult<()> {
        self.check_arity(args.len()).map_err(RpcError::Pack)?;

        for (index, arg) in args.iter().enumerate() {
            let slot = self.slot(index).unwrap_or(&PICKLE);
            match arg {
                WireArg::Value(value) => slot.check_value(index, value).map_err(RpcError::Pack)?,
                WireArg::Reference(call_id) if slot.is_callback() => {
                    return Err(RpcError::Pack(format!(
                        "argument {}: CALLBACK slot cannot take the result of call {}",
                        index, call_id
                    )))
                }
                WireArg::Reference(_) => {}
                WireArg::Function(_) if !slot.is_callback() => {
                    return Err(RpcError::Pack(format!(
                        "argument {}: function passed to {} slot",
                        index,
                        slot.name()
                    )))
                }
                WireArg::Function(_) => {}
            }
        }

        Ok(())
    }
}

/// Return descriptor; `None` means the function returns nothing
pub type ReturnType = Option<ArgType>;

/// Validate a return value against its descriptor
pub fn check_return(ret: &ReturnType, value: &Value) -> RpcResult<()> {
    match ret {
        None => Ok(()),
        Some(ArgType::Callback(_)) => Err(RpcError::Pack(
            "functions cannot be returned".to_string(),
        )),
        Some(slot) if slot.accepts(value) => Ok(()),
        Some(slot) => Err(RpcError::Pack(format!(
            "return value: {} descriptor does not accept {}",
            slot.name(),
            value.kind()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::message::FunctionRef;

    #[test]
    fn test_string_slot_never_coerces() {
        let params = Params::exact([ArgType::String]);
        assert!(params.check(&[WireArg::Value(Value::from("lap"))]).is_ok());

        let err = params.check(&[WireArg::Value(Value::Int(3))]).unwrap_err();
        assert!(matches!(err, RpcError::Pack(ref msg) if msg.contains("STRING")));
    }

    #[test]
    fn test_arity_is_enforced_for_exact() {
        let params = Params::exact([ArgType::Pickle, ArgType::Pickle]);
        assert!(params.check(&[WireArg::Value(Value::Int(1))]).is_err());
        assert!(Params::Any.check(&[]).is_ok());
        assert!(Params::Any
            .check(&[WireArg::Value(Value::Int(1)), WireArg::Value(Value::Nil)])
            .is_ok());
    }

    #[test]
    fn test_references_defer_checks() {
        let params = Params::exact([ArgType::Bytes]);
        assert!(params.check(&[WireArg::Reference(12)]).is_ok());

        let callback = Params::exact([ArgType::callback([ArgType::Pickle])]);
        assert!(callback.check(&[WireArg::Reference(12)]).is_err());
    }

    #[test]
    fn test_functions_only_in_callback_slots() {
        let func = WireArg::Function(FunctionRef {
            id: 4,
            params: Params::Any,
            ret: None,
        });
        let callback = Params::exact([ArgType::callback([ArgType::Pickle, ArgType::String])]);
        assert!(callback.check(std::slice::from_ref(&func)).is_ok());
        assert!(Params::Any.check(&[func]).is_err());
        assert!(callback.check(&[WireArg::Value(Value::Nil)]).is_err());
    }

    #[test]
    fn test_check_return() {
        assert!(check_return(&None, &Value::Int(1)).is_ok());
        assert!(check_return(&Some(ArgType::Bytes), &Value::Bytes(vec![1])).is_ok());
        assert!(check_return(&Some(ArgType::Bytes), &Value::from("x")).is_err());
        assert!(check_return(&Some(ArgType::callback(Vec::new())), &Value::Nil).is_err());
    }
}
