//! Rendering of snapshots as Online Python Tutor trace documents.

use std::collections::BTreeMap;

use serde_json::{json, Map, Value as Json};

use crate::model::{ExecutionSnapshot, Field, HeapId, Primitive, StackFrame, Value};

const NO_LABEL: &str = "___NO_LABEL!___";

/// Presentation switches for [`TraceSerializer`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FormatOptions {
    /// Hide the first variable of the bottom frame (`main`'s `args`).
    pub remove_main_args: bool,
    /// Render strings as JSON string literals at every use site instead of
    /// heap instances.
    pub inline_strings: bool,
    /// Hide the `this` pseudo-variable of instance frames.
    pub remove_method_this: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TraceSerializer {
    options: FormatOptions,
}

impl TraceSerializer {
    pub fn new(options: FormatOptions) -> Self {
        Self { options }
    }

    /// One complete trace document with a single `step_line` step.
    pub fn serialize(&self, source: &str, snapshot: &ExecutionSnapshot) -> Json {
        let heap = &snapshot.heap;
        let (func_name, line) = snapshot
            .top_frame()
            .map_or((String::new(), -1), |frame| (frame.method_name.clone(), frame.line));

        let mut globals = Map::new();
        let mut globals_attrs = Map::new();
        let mut ordered_globals = Vec::with_capacity(snapshot.statics.len());
        for field in &snapshot.statics {
            globals.insert(field.name.clone(), self.value(&field.value, heap));
            globals_attrs.insert(field.name.clone(), field_attrs(field));
            ordered_globals.push(Json::String(field.name.clone()));
        }

        let mut heap_json = Map::new();
        let mut heap_attrs = Map::new();
        for (id, value) in heap {
            let key = id.to_string();
            if !(self.options.inline_strings && value.is_string()) {
                heap_json.insert(key.clone(), self.value(value, heap));
            }
            match value {
                Value::Object { fields, .. } => {
                    let types: Vec<_> = fields.iter().map(|f| f.type_name.clone()).collect();
                    let finals: Vec<_> = fields.iter().map(|f| f.is_final).collect();
                    heap_attrs.insert(key, json!({ "type": types, "final": finals }));
                }
                Value::List { type_name, .. } => {
                    heap_attrs.insert(key, json!({ "type": type_name }));
                }
                _ => {}
            }
        }

        let top = snapshot.stack.len().saturating_sub(1);
        let stack_to_render: Vec<Json> = snapshot
            .stack
            .iter()
            .enumerate()
            .map(|(frame_id, frame)| {
                let skip = usize::from(frame_id == 0 && self.options.remove_main_args);
                self.frame(frame, skip, frame_id, frame_id == top, heap)
            })
            .collect();

        json!({
            "code": source,
            "stdin": "",
            "trace": [{
                "stdout": String::from_utf8_lossy(&snapshot.stdout),
                "stderr": String::from_utf8_lossy(&snapshot.stderr),
                "event": "step_line",
                "func_name": func_name,
                "line": line,
                "stack_to_render": stack_to_render,
                "globals": globals,
                "globals_attrs": globals_attrs,
                "ordered_globals": ordered_globals,
                "heap": heap_json,
                "heap_attrs": heap_attrs,
            }],
            "userlog": "",
        })
    }

    fn frame(
        &self,
        frame: &StackFrame,
        skip: usize,
        frame_id: usize,
        is_current: bool,
        heap: &BTreeMap<HeapId, Value>,
    ) -> Json {
        let mut encoded_locals = Map::new();
        let mut locals_attrs = Map::new();
        let mut ordered_varnames = Vec::new();

        if let Some(this) = frame.this.as_ref().filter(|_| !self.options.remove_method_this) {
            encoded_locals.insert("this".to_owned(), self.value(&this.value, heap));
            locals_attrs.insert(
                "this".to_owned(),
                json!({ "type": this.type_name, "final": true }),
            );
            ordered_varnames.push(Json::from("this"));
        }
        for variable in frame.variables.iter().skip(skip) {
            encoded_locals.insert(variable.name.clone(), self.value(&variable.value, heap));
            locals_attrs.insert(variable.name.clone(), field_attrs(variable));
            ordered_varnames.push(Json::String(variable.name.clone()));
        }

        json!({
            "func_name": format!("{}:{}", frame.method_name, frame.line),
            "encoded_locals": encoded_locals,
            "locals_attrs": locals_attrs,
            "ordered_varnames": ordered_varnames,
            "parent_frame_id_list": [],
            "is_highlighted": is_current,
            "is_zombie": false,
            "is_parent": false,
            "unique_hash": frame_id.to_string(),
            "frame_id": frame_id,
        })
    }

    fn value(&self, value: &Value, heap: &BTreeMap<HeapId, Value>) -> Json {
        match value {
            Value::Null => Json::Null,
            Value::Primitive(primitive) => primitive_json(*primitive),
            Value::Reference(id) => match heap.get(id) {
                Some(target @ Value::String(_)) if self.options.inline_strings => {
                    self.value(target, heap)
                }
                _ => json!(["REF", id]),
            },
            Value::String(text) if self.options.inline_strings => Json::String(text.clone()),
            Value::String(text) => json!(["INSTANCE", "String", [NO_LABEL, text]]),
            Value::List { elements, .. } => self.tagged("LIST", elements.iter(), heap),
            Value::Collection(elements) => self.tagged("SET", elements.iter(), heap),
            Value::Map(entries) => {
                let mut out = vec![Json::from("DICT")];
                out.extend(
                    entries
                        .iter()
                        .map(|(k, v)| json!([self.value(k, heap), self.value(v, heap)])),
                );
                Json::Array(out)
            }
            Value::Object { type_name, fields } => {
                let mut out = vec![Json::from("INSTANCE"), Json::from(type_name.as_str())];
                out.extend(
                    fields
                        .iter()
                        .map(|f| json!([f.name, self.value(&f.value, heap)])),
                );
                Json::Array(out)
            }
            Value::Lambda(text) => json!(["JAVA_LAMBDA", text]),
        }
    }

    fn tagged<'v>(
        &self,
        tag: &str,
        elements: impl Iterator<Item = &'v Value>,
        heap: &BTreeMap<HeapId, Value>,
    ) -> Json {
        let mut out = vec![Json::from(tag)];
        out.extend(elements.map(|element| self.value(element, heap)));
        Json::Array(out)
    }
}

fn field_attrs(field: &Field) -> Json {
    json!({ "type": field.type_name, "final": field.is_final })
}

fn primitive_json(primitive: Primitive) -> Json {
    match primitive {
        Primitive::Boolean(v) => Json::Bool(v),
        Primitive::Byte(v) => Json::from(v),
        Primitive::Short(v) => Json::from(v),
        Primitive::Int(v) => Json::from(v),
        Primitive::Long(v) => Json::from(v),
        Primitive::Char(unit) => json!(["CHAR-LITERAL", char_text(unit)]),
        Primitive::Float(v) => float_json(f64::from(v), || java_float_text(&format!("{v:e}"))),
        Primitive::Double(v) => float_json(v, || java_float_text(&format!("{v:e}"))),
    }
}

fn float_json(value: f64, text: impl FnOnce() -> String) -> Json {
    if value.is_nan() {
        json!(["SPECIAL_FLOAT", "NaN"])
    } else if value == f64::INFINITY {
        json!(["SPECIAL_FLOAT", "Infinity"])
    } else if value == f64::NEG_INFINITY {
        json!(["SPECIAL_FLOAT", "-Infinity"])
    } else {
        json!(["NUMBER-LITERAL", text()])
    }
}

/// A lone surrogate has no `char`; it renders as U+FFFD.
fn char_text(unit: u16) -> String {
    char::decode_utf16([unit])
        .map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect()
}

/// Java's `Double.toString` layout for the shortest round-trip digits that
/// Rust's `{:e}` produces: plain decimal for magnitudes in `[1e-3, 1e7)`,
/// `d.dddE±n` otherwise, always with a fractional digit.
fn java_float_text(scientific: &str) -> String {
    let (sign, rest) = match scientific.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", scientific),
    };
    let (mantissa, exponent) = rest.split_once('e').unwrap_or((rest, "0"));
    let exponent: i32 = exponent.parse().unwrap_or(0);
    let digits: String = mantissa.chars().filter(|c| *c != '.').collect();

    if !(-3..7).contains(&exponent) {
        let (first, tail) = digits.split_at(1);
        let tail = if tail.is_empty() { "0" } else { tail };
        return format!("{sign}{first}.{tail}E{exponent}");
    }

    if exponent < 0 {
        let zeros = "0".repeat((-exponent - 1) as usize);
        return format!("{sign}0.{zeros}{digits}");
    }

    let int_len = exponent as usize + 1;
    if digits.len() > int_len {
        let (int_part, frac) = digits.split_at(int_len);
        format!("{sign}{int_part}.{frac}")
    } else {
        let zeros = "0".repeat(int_len - digits.len());
        format!("{sign}{digits}{zeros}.0")
    }
}
