//! Java Debug Wire Protocol (JDWP) client for jtrace.
//!
//! This crate speaks the JDWP binary protocol over TCP. It is async (`tokio`)
//! and covers the subset of commands the tracer needs to drive a debuggee:
//! class/method/field metadata, frame and object inspection, remote method
//! invocation, and breakpoint / class-prepare / method-exit event requests.
//!
//! Events are delivered in composite batches through an unbounded channel so
//! a single consumer can process each batch before resuming the VM.

mod client;
mod codec;
pub mod signature;
pub mod types;

/// Length of the fixed JDWP packet header (`length`, `id`, `flags`, then
/// either `command_set`+`command` or `error_code`).
pub const JDWP_HEADER_LEN: usize = 11;

/// Upper bound on a single packet we are willing to buffer.
pub const MAX_JDWP_PACKET_BYTES: usize = 16 * 1024 * 1024;

pub use client::{EventModifier, EventReceiver, JdwpClient, JdwpClientConfig};
pub use types::{
    ClassInfo, EventSet, FieldId, FieldInfo, FrameId, FrameInfo, InvokeResult, JdwpError,
    JdwpEvent, JdwpIdSizes, JdwpValue, LineTable, LineTableEntry, Location, MethodId, MethodInfo,
    ObjectId, ReferenceTypeId, Result, ThreadId, VariableInfo,
};

// The mock VM is compiled for this crate's own tests unconditionally, and
// behind `test-support` for downstream crates.
#[cfg(any(test, feature = "test-support"))]
pub mod mock;
