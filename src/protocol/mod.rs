/*!
 * Protocol Module
 * Values, type descriptors and message framing shared by every transport
 */

pub mod descriptor;
pub mod message;
pub mod value;

// Re-export for convenience
pub use descriptor::{check_return, ArgType, Params, ReturnType};
pub use message::{AnswerStatus, FunctionDescriptor, FunctionRef, MessageKind, WireArg};
pub use value::Value;
