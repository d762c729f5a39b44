use std::collections::{BTreeMap, VecDeque};

use jtrace_config::TracerConfig;
use jtrace_jdwp::signature::signature_to_type_name;
use jtrace_jdwp::{FrameInfo, JdwpError, JdwpValue, ObjectId, ReferenceTypeId, ThreadId, VariableInfo};

use crate::error::Result;
use crate::launcher::OutputCapture;
use crate::mirror::Mirror;
use crate::model::{ExecutionSnapshot, Field, HeapId, StackFrame, ThisObject, Value};
use crate::source_index::{runtime_method_key, SourceIndex};
use crate::value::{slot_value, ValueConverter};

/// Everything a capture needs besides the stopped thread.
pub(crate) struct SnapshotContext<'a> {
    pub(crate) index: &'a SourceIndex,
    pub(crate) config: &'a TracerConfig,
    pub(crate) output: &'a OutputCapture,
    /// Prepared program classes in load order.
    pub(crate) loaded: &'a [ReferenceTypeId],
}

/// Capture the stack of `thread`, the statics of every loaded program class
/// and everything reachable from them.
pub(crate) async fn capture(
    mirror: &mut Mirror,
    cx: &SnapshotContext<'_>,
    thread: ThreadId,
) -> Result<ExecutionSnapshot> {
    let mut walk = HeapWalk::default();

    let mut frames = mirror.client().frames(thread, 0, -1).await?;
    frames.reverse();
    let mut stack = Vec::with_capacity(frames.len());
    for frame in &frames {
        stack.push(stack_frame(mirror, cx, thread, frame, &mut walk).await?);
    }

    let mut statics = Vec::new();
    for &class in cx.loaded {
        statics.extend(class_statics(mirror, cx, class, &mut walk).await?);
    }

    let mut converter = ValueConverter::new(mirror, cx.config, thread);
    while let Some(id) = walk.frontier.pop_front() {
        if walk.heap.contains_key(&id) {
            continue;
        }
        let value = converter.heap_value(id, &mut walk.frontier).await?;
        walk.heap.insert(id, value);
    }

    tracing::debug!(
        target: "jtrace.engine",
        frames = stack.len(),
        statics = statics.len(),
        heap = walk.heap.len(),
        "captured snapshot"
    );

    Ok(ExecutionSnapshot {
        stack,
        statics,
        heap: walk.heap,
        stdout: cx.output.stdout(),
        stderr: cx.output.stderr(),
    })
}

#[derive(Default)]
struct HeapWalk {
    heap: BTreeMap<HeapId, Value>,
    frontier: VecDeque<ObjectId>,
}

impl HeapWalk {
    /// Convert a root slot. A reference whose source initializer is a lambda
    /// gets the reconstructed text as its heap entry and is not walked.
    fn root(&mut self, value: JdwpValue, lambda: Option<&str>) -> Value {
        match (value.object_id(), lambda) {
            (Some(id), Some(text)) => {
                self.heap.insert(id, Value::Lambda(text.to_owned()));
                Value::Reference(id)
            }
            _ => slot_value(value, &mut self.frontier),
        }
    }
}

async fn stack_frame(
    mirror: &mut Mirror,
    cx: &SnapshotContext<'_>,
    thread: ThreadId,
    frame: &FrameInfo,
    walk: &mut HeapWalk,
) -> Result<StackFrame> {
    let location = frame.location;
    let class_name = mirror.type_name(location.class_id).await?;
    let method = mirror.method(location.class_id, location.method_id).await?;
    let (method_name, method_key) = match &method {
        Some(method) => (
            method.name.clone(),
            runtime_method_key(&class_name, &method.name, &method.signature),
        ),
        None => ("<unknown>".to_owned(), String::new()),
    };
    let line = mirror.line_of(&location).await?;

    let visible = match mirror.variables(location.class_id, location.method_id).await? {
        Some(vars) => visible_variables(vars, location.index),
        None => Vec::new(),
    };
    let values = if visible.is_empty() {
        Vec::new()
    } else {
        let slots: Vec<_> = visible
            .iter()
            .map(|var| (var.slot, var.signature.clone()))
            .collect();
        match mirror
            .client()
            .stack_frame_get_values(thread, frame.frame_id, &slots)
            .await
        {
            Ok(values) => values,
            Err(JdwpError::VmError(code)) => {
                tracing::warn!(target: "jtrace.engine", method = %method_name, code, "could not read frame locals");
                Vec::new()
            }
            Err(err) => return Err(err.into()),
        }
    };

    let variables = visible
        .into_iter()
        .zip(values)
        .map(|(var, value)| {
            let lambda = cx.index.local_lambda(&method_key, &var.name);
            Field {
                type_name: signature_to_type_name(&var.signature),
                is_final: cx.index.is_final_local(&method_key, &var.name),
                value: walk.root(value, lambda),
                name: var.name,
            }
        })
        .collect();

    let this = mirror
        .client()
        .stack_frame_this_object(thread, frame.frame_id)
        .await?
        .map(|id| ThisObject {
            type_name: class_name.clone(),
            value: slot_value(
                JdwpValue::Object {
                    tag: jtrace_jdwp::types::TAG_OBJECT,
                    id,
                },
                &mut walk.frontier,
            ),
        });

    Ok(StackFrame {
        method_name,
        line,
        variables,
        this,
    })
}

/// Variables in scope at `code_index`, parameters first then locals in
/// declaration order. A name declared twice keeps only its latest slot.
fn visible_variables(vars: Vec<VariableInfo>, code_index: u64) -> Vec<VariableInfo> {
    let mut visible: Vec<VariableInfo> = vars
        .into_iter()
        .filter(|var| var.is_visible_at(code_index))
        .collect();
    visible.sort_by_key(|var| (var.code_index, var.slot));

    let mut out: Vec<VariableInfo> = Vec::with_capacity(visible.len());
    for var in visible {
        out.retain(|seen| seen.name != var.name);
        out.push(var);
    }
    out
}

async fn class_statics(
    mirror: &mut Mirror,
    cx: &SnapshotContext<'_>,
    class: ReferenceTypeId,
    walk: &mut HeapWalk,
) -> Result<Vec<Field>> {
    let class_name = mirror.type_name(class).await?;
    let fields: Vec<_> = mirror
        .fields(class)
        .await?
        .into_iter()
        .filter(|field| field.is_static() && !field.is_synthetic())
        .collect();
    if fields.is_empty() {
        return Ok(Vec::new());
    }

    let ids: Vec<_> = fields.iter().map(|field| field.field_id).collect();
    let values = mirror
        .client()
        .reference_type_get_values(class, &ids)
        .await?;

    Ok(fields
        .into_iter()
        .zip(values)
        .map(|(field, value)| {
            let lambda = cx.index.field_lambda(&class_name, &field.name);
            Field {
                name: format!("{class_name}.{}", field.name),
                type_name: signature_to_type_name(&field.signature),
                is_final: field.is_final(),
                value: walk.root(value, lambda),
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn var(code_index: u64, name: &str, length: u32, slot: u32) -> VariableInfo {
        VariableInfo {
            code_index,
            name: name.to_owned(),
            signature: "I".to_owned(),
            length,
            slot,
        }
    }

    #[test]
    fn visible_variables_are_in_declaration_order() {
        let vars = vec![
            var(8, "b", 10, 2),
            var(0, "args", 20, 0),
            var(4, "a", 16, 1),
            var(12, "out_of_scope", 2, 3),
        ];
        let names: Vec<_> = visible_variables(vars, 10)
            .into_iter()
            .map(|v| v.name)
            .collect();
        assert_eq!(names, vec!["args", "a", "b"]);
    }

    #[test]
    fn shadowed_names_keep_the_latest_declaration() {
        let vars = vec![var(0, "i", 20, 1), var(6, "i", 10, 2)];
        let visible = visible_variables(vars, 8);
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].slot, 2);
    }

    #[test]
    fn lambda_roots_are_installed_and_not_walked() {
        let mut walk = HeapWalk::default();
        let closure = JdwpValue::Object {
            tag: jtrace_jdwp::types::TAG_OBJECT,
            id: 9,
        };
        assert_eq!(walk.root(closure, Some("void run() {}")), Value::Reference(9));
        assert!(walk.frontier.is_empty());
        assert_eq!(walk.heap[&9], Value::Lambda("void run() {}".to_owned()));

        assert_eq!(walk.root(closure, None), Value::Reference(9));
        assert_eq!(walk.frontier, VecDeque::from([9]));
    }
}
