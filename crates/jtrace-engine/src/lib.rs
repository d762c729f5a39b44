//! Debug trace engine.
//!
//! Runs a compiled Java program under JDWP control, captures its call stack,
//! loaded statics and reachable heap at requested source lines (and at the
//! exit of `main`), and renders each capture as an execution-tutor trace
//! document.
//!
//! The pipeline is:
//!
//! 1. [`compile`] a single source file with `javac` into an owned temp dir,
//! 2. [`trace`] it: launch `java` with the JDWP agent, arm class-prepare,
//!    breakpoint and method-exit requests, and build an
//!    [`ExecutionSnapshot`] at every stop,
//! 3. [`TraceSerializer::serialize`] each snapshot into JSON.

mod compile;
mod error;
mod launcher;
mod mirror;
mod model;
mod serialize;
mod session;
mod snapshot;
mod source_index;
mod value;

pub use compile::{compile, CompiledProgram, ProgramClasses};
pub use error::{Result, TraceError};
pub use launcher::{Debuggee, OutputCapture};
pub use model::{ExecutionSnapshot, Field, HeapId, Primitive, StackFrame, ThisObject, Value};
pub use serialize::{FormatOptions, TraceSerializer};
pub use session::{
    breakpoint_lines_connected, trace, trace_connected, valid_breakpoint_lines, TraceResult,
    MAIN_EXIT_LINE,
};
pub use source_index::{MethodOutline, SourceIndex, TypeKind, TypeOutline};
