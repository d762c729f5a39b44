//! The debugger session: arming watches, driving the event loop and turning
//! stops into snapshots.
//!
//! A session is single-threaded. Every event batch is handled to completion
//! (breakpoints armed, snapshots captured) before the debuggee is resumed, so
//! nothing observed in a batch can change underneath the handler.

use std::collections::{BTreeMap, BTreeSet};

use jtrace_config::TracerConfig;
use jtrace_jdwp::signature::signature_to_type_name;
use jtrace_jdwp::types::{
    ERROR_VM_DEAD, EVENT_KIND_BREAKPOINT, EVENT_KIND_CLASS_PREPARE, EVENT_KIND_METHOD_EXIT,
    SUSPEND_POLICY_ALL, SUSPEND_POLICY_NONE,
};
use jtrace_jdwp::{
    EventModifier, EventReceiver, EventSet, JdwpClient, JdwpError, JdwpEvent, Location,
    ReferenceTypeId, ThreadId,
};

use crate::compile::{CompiledProgram, ProgramClasses};
use crate::error::Result;
use crate::launcher::{Debuggee, OutputCapture};
use crate::mirror::Mirror;
use crate::model::ExecutionSnapshot;
use crate::snapshot::{self, SnapshotContext};
use crate::source_index::SourceIndex;

/// Result key for the snapshot taken when `main` returns.
pub const MAIN_EXIT_LINE: i32 = -1;

/// Snapshots keyed by source line, in hit order.
pub type TraceResult = BTreeMap<i32, Vec<ExecutionSnapshot>>;

const MAIN_NAME: &str = "main";
const MAIN_SIGNATURE: &str = "([Ljava/lang/String;)V";

/// Run `program` under the debugger and capture a snapshot at every hit of
/// the requested `breakpoints`.
///
/// With no breakpoints (or when the list contains [`MAIN_EXIT_LINE`]) the
/// state at the end of `main` is recorded under [`MAIN_EXIT_LINE`]. It is also
/// recorded when none of the requested breakpoints fired.
pub async fn trace(
    program: &CompiledProgram,
    breakpoints: Option<&[i32]>,
    config: &TracerConfig,
) -> Result<TraceResult> {
    let debuggee = Debuggee::launch(program, config).await?;
    let result = trace_connected(
        debuggee.client().clone(),
        debuggee.output(),
        program.classes(),
        breakpoints,
        program.source_index(),
        config,
    )
    .await;
    debuggee.shutdown().await;
    result
}

/// Every source line with executable code in a program class that got loaded.
pub async fn valid_breakpoint_lines(
    program: &CompiledProgram,
    config: &TracerConfig,
) -> Result<BTreeSet<i32>> {
    let debuggee = Debuggee::launch(program, config).await?;
    let result = breakpoint_lines_connected(debuggee.client().clone(), program.classes()).await;
    debuggee.shutdown().await;
    result
}

/// [`trace`] against an already attached, still suspended VM.
pub async fn trace_connected(
    client: JdwpClient,
    output: &OutputCapture,
    classes: &ProgramClasses,
    breakpoints: Option<&[i32]>,
    index: &SourceIndex,
    config: &TracerConfig,
) -> Result<TraceResult> {
    let mut events = take_events(&client)?;
    arm_class_prepare(&client, classes).await?;
    client
        .event_request_set(
            EVENT_KIND_METHOD_EXIT,
            SUSPEND_POLICY_ALL,
            vec![EventModifier::ClassMatch {
                pattern: classes.entry_point.clone(),
            }],
        )
        .await?;

    let mut session = TraceSession {
        mirror: Mirror::new(client),
        classes,
        index,
        config,
        output,
        lines: requested_lines(breakpoints),
        snap_main_end: breakpoints
            .map_or(true, |lines| lines.is_empty() || lines.contains(&MAIN_EXIT_LINE)),
        loaded: Vec::new(),
        result: TraceResult::new(),
    };

    while let Some(batch) = events.recv().await {
        let mut died = false;
        for event in &batch.events {
            died |= session.handle(event).await?;
        }
        if died || !resume(session.mirror.client(), &batch).await? {
            break;
        }
    }

    tracing::debug!(
        target: "jtrace.engine",
        lines = session.result.len(),
        snapshots = session.result.values().map(Vec::len).sum::<usize>(),
        "trace finished"
    );
    Ok(session.result)
}

/// [`valid_breakpoint_lines`] against an already attached, still suspended VM.
pub async fn breakpoint_lines_connected(
    client: JdwpClient,
    classes: &ProgramClasses,
) -> Result<BTreeSet<i32>> {
    let mut events = take_events(&client)?;
    arm_class_prepare(&client, classes).await?;

    let mut mirror = Mirror::new(client);
    let mut pending: BTreeSet<&str> = classes.names.iter().map(String::as_str).collect();
    let mut lines = BTreeSet::new();

    'events: while let Some(batch) = events.recv().await {
        for event in &batch.events {
            match event {
                JdwpEvent::ClassPrepare {
                    type_id, signature, ..
                } => {
                    let name = signature_to_type_name(signature);
                    if !pending.remove(name.as_str()) {
                        continue;
                    }
                    for method in mirror.methods(*type_id).await? {
                        if let Some(table) = mirror.line_table(*type_id, method.method_id).await? {
                            lines.extend(table.lines.iter().map(|entry| entry.line).filter(|&l| l > 0));
                        }
                    }
                }
                JdwpEvent::VmDeath { .. } => break 'events,
                _ => {}
            }
        }
        if pending.is_empty() || !resume(mirror.client(), &batch).await? {
            break;
        }
    }

    tracing::debug!(target: "jtrace.engine", lines = lines.len(), "collected breakpoint lines");
    Ok(lines)
}

struct TraceSession<'a> {
    mirror: Mirror,
    classes: &'a ProgramClasses,
    index: &'a SourceIndex,
    config: &'a TracerConfig,
    output: &'a OutputCapture,
    lines: Vec<i32>,
    snap_main_end: bool,
    loaded: Vec<ReferenceTypeId>,
    result: TraceResult,
}

impl TraceSession<'_> {
    /// Handle one event. Returns `true` once the VM has died.
    async fn handle(&mut self, event: &JdwpEvent) -> Result<bool> {
        match event {
            JdwpEvent::VmStart { .. } => {
                tracing::debug!(target: "jtrace.engine", "debuggee started");
            }
            JdwpEvent::ClassPrepare {
                type_id, signature, ..
            } => {
                let name = signature_to_type_name(signature);
                if self.classes.names.contains(&name) {
                    self.class_prepared(*type_id, &name).await?;
                }
            }
            JdwpEvent::Breakpoint {
                thread, location, ..
            } => {
                if self.is_program_class(location.class_id).await? {
                    let line = self.mirror.line_of(location).await?;
                    let snapshot = self.capture(*thread).await?;
                    self.result.entry(line).or_default().push(snapshot);
                }
            }
            JdwpEvent::MethodExit {
                thread, location, ..
            } => {
                if self.is_main(location).await?
                    && (self.snap_main_end || self.result.is_empty())
                {
                    let snapshot = self.capture(*thread).await?;
                    self.result.insert(MAIN_EXIT_LINE, vec![snapshot]);
                }
            }
            JdwpEvent::VmDeath { .. } => {
                tracing::debug!(target: "jtrace.engine", "debuggee exited");
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn class_prepared(&mut self, type_id: ReferenceTypeId, name: &str) -> Result<()> {
        for line in self.lines.clone() {
            let Some(location) = self.resolve_line(type_id, line).await? else {
                tracing::debug!(target: "jtrace.engine", class = name, line, "line has no code in class");
                continue;
            };
            self.mirror
                .client()
                .event_request_set(
                    EVENT_KIND_BREAKPOINT,
                    SUSPEND_POLICY_ALL,
                    vec![EventModifier::LocationOnly { location }],
                )
                .await?;
            tracing::debug!(target: "jtrace.engine", class = name, line, index = location.index, "armed breakpoint");
        }
        if !self.loaded.contains(&type_id) {
            self.loaded.push(type_id);
        }
        Ok(())
    }

    /// The first executable location of `line` in `type_id`, searching
    /// methods in declaration order.
    async fn resolve_line(&mut self, type_id: ReferenceTypeId, line: i32) -> Result<Option<Location>> {
        for method in self.mirror.methods(type_id).await? {
            let Some(table) = self.mirror.line_table(type_id, method.method_id).await? else {
                continue;
            };
            if let Some(index) = table.first_index_of(line) {
                return Ok(Some(Location {
                    type_tag: jtrace_jdwp::types::TYPE_TAG_CLASS,
                    class_id: type_id,
                    method_id: method.method_id,
                    index,
                }));
            }
        }
        Ok(None)
    }

    async fn is_program_class(&mut self, type_id: ReferenceTypeId) -> Result<bool> {
        if self.loaded.contains(&type_id) {
            return Ok(true);
        }
        let name = self.mirror.type_name(type_id).await?;
        Ok(self.classes.names.contains(&name))
    }

    async fn is_main(&mut self, location: &Location) -> Result<bool> {
        if self.mirror.type_name(location.class_id).await? != self.classes.entry_point {
            return Ok(false);
        }
        Ok(self
            .mirror
            .method(location.class_id, location.method_id)
            .await?
            .is_some_and(|method| {
                method.is_public()
                    && method.is_static()
                    && method.name == MAIN_NAME
                    && method.signature == MAIN_SIGNATURE
            }))
    }

    async fn capture(&mut self, thread: ThreadId) -> Result<ExecutionSnapshot> {
        let cx = SnapshotContext {
            index: self.index,
            config: self.config,
            output: self.output,
            loaded: &self.loaded,
        };
        snapshot::capture(&mut self.mirror, &cx, thread).await
    }
}

fn take_events(client: &JdwpClient) -> Result<EventReceiver> {
    client.take_events().ok_or_else(|| {
        JdwpError::Protocol("the JDWP event stream is already being consumed".to_owned()).into()
    })
}

async fn arm_class_prepare(client: &JdwpClient, classes: &ProgramClasses) -> Result<()> {
    for name in &classes.names {
        client
            .event_request_set(
                EVENT_KIND_CLASS_PREPARE,
                SUSPEND_POLICY_ALL,
                vec![EventModifier::ClassMatch {
                    pattern: name.clone(),
                }],
            )
            .await?;
    }
    Ok(())
}

/// Requested source lines, deduplicated, without the main-exit sentinel.
fn requested_lines(breakpoints: Option<&[i32]>) -> Vec<i32> {
    let mut lines = Vec::new();
    for &line in breakpoints.unwrap_or_default() {
        if line != MAIN_EXIT_LINE && !lines.contains(&line) {
            lines.push(line);
        }
    }
    lines
}

/// Resume after a batch. Returns `false` when the VM is already gone.
async fn resume(client: &JdwpClient, batch: &EventSet) -> Result<bool> {
    if batch.suspend_policy == SUSPEND_POLICY_NONE {
        return Ok(true);
    }
    match client.vm_resume().await {
        Ok(()) => Ok(true),
        Err(JdwpError::VmError(ERROR_VM_DEAD) | JdwpError::ConnectionClosed | JdwpError::Cancelled) => {
            tracing::debug!(target: "jtrace.engine", "debuggee gone while resuming");
            Ok(false)
        }
        Err(err) => Err(err.into()),
    }
}
