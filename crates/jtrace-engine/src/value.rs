//! Conversion of debuggee values into [`Value`]s.
//!
//! Slot values (locals, fields, statics, array elements) convert without
//! talking to the VM: primitives inline, references become
//! [`Value::Reference`] and are queued for the heap walk. Heap objects are
//! converted by [`ValueConverter::heap_value`], which may invoke methods in
//! the suspended debuggee to look through strings, boxed primitives and
//! library collections.

use std::collections::VecDeque;

use jtrace_config::TracerConfig;
use jtrace_jdwp::signature::signature_to_type_name;
use jtrace_jdwp::types::{ERROR_THREAD_NOT_SUSPENDED, ERROR_VM_DEAD, INVOKE_SINGLE_THREADED};
use jtrace_jdwp::{JdwpError, JdwpValue, ObjectId, ReferenceTypeId, ThreadId};
use thiserror::Error;

use crate::error::Result;
use crate::mirror::Mirror;
use crate::model::{Field, Primitive, Value};

const STRING_SIGNATURE: &str = "Ljava/lang/String;";
const TO_ARRAY: (&str, &str) = ("toArray", "()[Ljava/lang/Object;");
const ENTRY_SET: (&str, &str) = ("entrySet", "()Ljava/util/Set;");
const GET_KEY: (&str, &str) = ("getKey", "()Ljava/lang/Object;");
const GET_VALUE: (&str, &str) = ("getValue", "()Ljava/lang/Object;");

/// Unboxing accessor for each primitive wrapper class.
fn unboxing_accessor(signature: &str) -> Option<(&'static str, &'static str)> {
    Some(match signature {
        "Ljava/lang/Boolean;" => ("booleanValue", "()Z"),
        "Ljava/lang/Byte;" => ("byteValue", "()B"),
        "Ljava/lang/Character;" => ("charValue", "()C"),
        "Ljava/lang/Short;" => ("shortValue", "()S"),
        "Ljava/lang/Integer;" => ("intValue", "()I"),
        "Ljava/lang/Long;" => ("longValue", "()J"),
        "Ljava/lang/Float;" => ("floatValue", "()F"),
        "Ljava/lang/Double;" => ("doubleValue", "()D"),
        _ => return None,
    })
}

pub(crate) fn primitive(value: JdwpValue) -> Option<Primitive> {
    Some(match value {
        JdwpValue::Boolean(v) => Primitive::Boolean(v),
        JdwpValue::Byte(v) => Primitive::Byte(v),
        JdwpValue::Char(v) => Primitive::Char(v),
        JdwpValue::Short(v) => Primitive::Short(v),
        JdwpValue::Int(v) => Primitive::Int(v),
        JdwpValue::Long(v) => Primitive::Long(v),
        JdwpValue::Float(v) => Primitive::Float(v),
        JdwpValue::Double(v) => Primitive::Double(v),
        JdwpValue::Object { .. } | JdwpValue::Void => return None,
    })
}

/// Convert a value held in a slot. References are queued on `frontier`.
pub(crate) fn slot_value(value: JdwpValue, frontier: &mut VecDeque<ObjectId>) -> Value {
    if let Some(primitive) = primitive(value) {
        return Value::Primitive(primitive);
    }
    match value.object_id() {
        Some(id) => {
            frontier.push_back(id);
            Value::Reference(id)
        }
        None => Value::Null,
    }
}

/// Why a method invoked in the debuggee did not produce a value.
#[derive(Debug, Error)]
enum RemoteFailure {
    #[error("{method} threw {exception:#x} in the debuggee")]
    Threw {
        method: &'static str,
        exception: ObjectId,
    },
    #[error("{type_name} has no method {method}{signature}")]
    MissingMethod {
        type_name: String,
        method: &'static str,
        signature: &'static str,
    },
    #[error("{method} returned a value of the wrong kind")]
    UnexpectedResult { method: &'static str },
    #[error(transparent)]
    Protocol(#[from] JdwpError),
}

/// Errors that mean the session itself is broken, not just one value.
fn is_session_error(err: &JdwpError) -> bool {
    match err {
        JdwpError::VmError(code) => matches!(*code, ERROR_THREAD_NOT_SUSPENDED | ERROR_VM_DEAD),
        _ => true,
    }
}

type RemoteResult<T> = std::result::Result<T, RemoteFailure>;

/// Converts heap objects observed on one suspended thread.
pub(crate) struct ValueConverter<'a> {
    mirror: &'a mut Mirror,
    config: &'a TracerConfig,
    thread: ThreadId,
}

impl<'a> ValueConverter<'a> {
    pub(crate) fn new(mirror: &'a mut Mirror, config: &'a TracerConfig, thread: ThreadId) -> Self {
        Self {
            mirror,
            config,
            thread,
        }
    }

    /// Convert the object `id` into its heap entry, queueing every object it
    /// refers to. Objects that disappeared from the VM convert to `Null`.
    pub(crate) async fn heap_value(
        &mut self,
        id: ObjectId,
        frontier: &mut VecDeque<ObjectId>,
    ) -> Result<Value> {
        match self.convert(id, frontier).await {
            Ok(value) => Ok(value),
            Err(err) if err.is_stale_id() => {
                tracing::debug!(target: "jtrace.engine", id, error = %err, "object vanished");
                Ok(Value::Null)
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn convert(
        &mut self,
        id: ObjectId,
        frontier: &mut VecDeque<ObjectId>,
    ) -> std::result::Result<Value, JdwpError> {
        let client = self.mirror.client().clone();
        let type_id = client.object_reference_reference_type(id).await?;
        let signature = self.mirror.signature(type_id).await?;
        let type_name = signature_to_type_name(&signature);

        if signature.starts_with('[') {
            let length = client.array_reference_length(id).await?.max(0);
            let values = if length == 0 {
                Vec::new()
            } else {
                client.array_reference_get_values(id, 0, length).await?
            };
            return Ok(Value::List {
                type_name,
                elements: values
                    .into_iter()
                    .map(|value| slot_value(value, frontier))
                    .collect(),
            });
        }

        if signature == STRING_SIGNATURE {
            return Ok(Value::String(client.string_reference_value(id).await?));
        }

        if let Some(accessor) = unboxing_accessor(&signature) {
            match self.unbox(id, type_id, accessor).await {
                Ok(primitive) => return Ok(Value::Primitive(primitive)),
                Err(failure) => self.recover(id, failure)?,
            }
        }

        let interfaces = self.mirror.interface_names(type_id).await?;
        if interfaces.contains("java.util.Collection") {
            return match self.collection_elements(id, type_id, frontier).await {
                Ok(elements) if interfaces.contains("java.util.List") => {
                    Ok(Value::List { type_name, elements })
                }
                Ok(elements) => Ok(Value::Collection(elements)),
                Err(failure) => {
                    self.recover(id, failure)?;
                    Ok(Value::Object {
                        type_name,
                        fields: Vec::new(),
                    })
                }
            };
        }

        if interfaces.contains("java.util.Map") {
            return match self.map_entries(id, type_id, frontier).await {
                Ok(entries) => Ok(Value::Map(entries)),
                Err(failure) => {
                    self.recover(id, failure)?;
                    Ok(Value::Object {
                        type_name,
                        fields: Vec::new(),
                    })
                }
            };
        }

        if self.config.is_builtin_type(&type_name) {
            return Ok(Value::Object {
                type_name,
                fields: Vec::new(),
            });
        }

        let declared = self.mirror.instance_fields(type_id).await?;
        let values = if declared.is_empty() {
            Vec::new()
        } else {
            let ids: Vec<_> = declared.iter().map(|field| field.field_id).collect();
            client.object_reference_get_values(id, &ids).await?
        };
        let fields = declared
            .into_iter()
            .zip(values)
            .map(|(field, value)| Field {
                type_name: signature_to_type_name(&field.signature),
                is_final: field.is_final(),
                name: field.name,
                value: slot_value(value, frontier),
            })
            .collect();
        Ok(Value::Object { type_name, fields })
    }

    /// Log a recoverable failure, or hand back the protocol error that makes
    /// it fatal.
    fn recover(&self, id: ObjectId, failure: RemoteFailure) -> std::result::Result<(), JdwpError> {
        match failure {
            RemoteFailure::Protocol(err) if is_session_error(&err) => Err(err),
            failure => {
                tracing::debug!(target: "jtrace.engine", id, error = %failure, "remote conversion failed");
                Ok(())
            }
        }
    }

    async fn invoke(
        &mut self,
        object: ObjectId,
        type_id: ReferenceTypeId,
        (method, signature): (&'static str, &'static str),
    ) -> RemoteResult<JdwpValue> {
        let Some((declaring, method_id)) =
            self.mirror.find_method(type_id, method, signature).await?
        else {
            return Err(RemoteFailure::MissingMethod {
                type_name: self.mirror.type_name(type_id).await?,
                method,
                signature,
            });
        };

        let result = self
            .mirror
            .client()
            .object_reference_invoke_method(
                object,
                self.thread,
                declaring,
                method_id,
                &[],
                INVOKE_SINGLE_THREADED,
            )
            .await?;
        if result.exception != 0 {
            return Err(RemoteFailure::Threw {
                method,
                exception: result.exception,
            });
        }
        Ok(result.value)
    }

    /// Invoke a method returning an object and get the object's id.
    async fn invoke_for_object(
        &mut self,
        object: ObjectId,
        type_id: ReferenceTypeId,
        accessor: (&'static str, &'static str),
    ) -> RemoteResult<ObjectId> {
        self.invoke(object, type_id, accessor)
            .await?
            .object_id()
            .ok_or(RemoteFailure::UnexpectedResult { method: accessor.0 })
    }

    async fn unbox(
        &mut self,
        id: ObjectId,
        type_id: ReferenceTypeId,
        accessor: (&'static str, &'static str),
    ) -> RemoteResult<Primitive> {
        let value = self.invoke(id, type_id, accessor).await?;
        primitive(value).ok_or(RemoteFailure::UnexpectedResult { method: accessor.0 })
    }

    /// Elements of an `Object[]` returned by `toArray()` on `id`.
    async fn to_array(
        &mut self,
        id: ObjectId,
        type_id: ReferenceTypeId,
    ) -> RemoteResult<Vec<JdwpValue>> {
        let array = self.invoke_for_object(id, type_id, TO_ARRAY).await?;
        let client = self.mirror.client();
        let length = client.array_reference_length(array).await?.max(0);
        if length == 0 {
            return Ok(Vec::new());
        }
        Ok(client.array_reference_get_values(array, 0, length).await?)
    }

    async fn collection_elements(
        &mut self,
        id: ObjectId,
        type_id: ReferenceTypeId,
        frontier: &mut VecDeque<ObjectId>,
    ) -> RemoteResult<Vec<Value>> {
        let elements = self.to_array(id, type_id).await?;
        Ok(elements
            .into_iter()
            .map(|value| slot_value(value, frontier))
            .collect())
    }

    async fn map_entries(
        &mut self,
        id: ObjectId,
        type_id: ReferenceTypeId,
        frontier: &mut VecDeque<ObjectId>,
    ) -> RemoteResult<Vec<(Value, Value)>> {
        let entry_set = self.invoke_for_object(id, type_id, ENTRY_SET).await?;
        let set_type = self
            .mirror
            .client()
            .object_reference_reference_type(entry_set)
            .await?;
        let entries = self.to_array(entry_set, set_type).await?;

        // Read every pair before queueing anything so a failure part way
        // through leaves the frontier untouched.
        let mut pairs = Vec::with_capacity(entries.len());
        for entry in entries {
            let Some(entry) = entry.object_id() else {
                continue;
            };
            let entry_type = self
                .mirror
                .client()
                .object_reference_reference_type(entry)
                .await?;
            let key = self.invoke(entry, entry_type, GET_KEY).await?;
            let value = self.invoke(entry, entry_type, GET_VALUE).await?;
            pairs.push((key, value));
        }

        Ok(pairs
            .into_iter()
            .map(|(key, value)| (slot_value(key, frontier), slot_value(value, frontier)))
            .collect())
    }
}
