/*!
 * Monitoring
 * Structured tracing for semaphore transactions
 */

mod tracer;

pub use tracer::{generate_trace_id, init_tracing, span_operation, OperationSpan};
