/*!
 * Monitoring
 * Tracing setup and transport usage statistics
 */

mod stats;
mod tracer;

pub use stats::{TransportKind, TransportStats};
pub use tracer::{init_tracing, span_call, span_drain};
