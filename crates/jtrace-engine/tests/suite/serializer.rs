use std::collections::BTreeMap;

use jtrace_engine::{
    ExecutionSnapshot, Field, FormatOptions, Primitive, StackFrame, ThisObject, TraceSerializer,
    Value,
};
use pretty_assertions::assert_eq;
use serde_json::json;

const SOURCE: &str = "public class Main { /* ... */ }\n";

fn field(name: &str, type_name: &str, is_final: bool, value: Value) -> Field {
    Field {
        name: name.to_owned(),
        type_name: type_name.to_owned(),
        is_final,
        value,
    }
}

/// `main` calling `greet` on a `Person`, stopped inside `greet`.
fn snapshot() -> ExecutionSnapshot {
    let main = StackFrame {
        method_name: "main".to_owned(),
        line: 9,
        variables: vec![
            field("args", "java.lang.String[]", false, Value::Reference(1)),
            field("x", "int", true, Value::Primitive(Primitive::Int(5))),
            field("p", "Person", false, Value::Reference(2)),
        ],
        this: None,
    };
    let greet = StackFrame {
        method_name: "greet".to_owned(),
        line: 15,
        variables: vec![field(
            "greeting",
            "java.lang.String",
            false,
            Value::Reference(3),
        )],
        this: Some(ThisObject {
            type_name: "Person".to_owned(),
            value: Value::Reference(2),
        }),
    };

    let heap = BTreeMap::from([
        (
            1,
            Value::List {
                type_name: "java.lang.String[]".to_owned(),
                elements: Vec::new(),
            },
        ),
        (
            2,
            Value::Object {
                type_name: "Person".to_owned(),
                fields: vec![
                    field("name", "java.lang.String", true, Value::Reference(3)),
                    field("age", "int", false, Value::Primitive(Primitive::Int(30))),
                ],
            },
        ),
        (3, Value::String("Ada".to_owned())),
    ]);

    ExecutionSnapshot {
        stack: vec![main, greet],
        statics: vec![field(
            "Main.RATIO",
            "double",
            true,
            Value::Primitive(Primitive::Double(0.5)),
        )],
        heap,
        stdout: b"Hello world!\n".to_vec(),
        stderr: Vec::new(),
    }
}

#[test]
fn default_options_render_strings_as_heap_instances() {
    let doc = TraceSerializer::default().serialize(SOURCE, &snapshot());

    assert_eq!(
        doc,
        json!({
            "code": SOURCE,
            "stdin": "",
            "trace": [{
                "stdout": "Hello world!\n",
                "stderr": "",
                "event": "step_line",
                "func_name": "greet",
                "line": 15,
                "stack_to_render": [
                    {
                        "func_name": "main:9",
                        "encoded_locals": {
                            "args": ["REF", 1],
                            "x": 5,
                            "p": ["REF", 2],
                        },
                        "locals_attrs": {
                            "args": { "type": "java.lang.String[]", "final": false },
                            "x": { "type": "int", "final": true },
                            "p": { "type": "Person", "final": false },
                        },
                        "ordered_varnames": ["args", "x", "p"],
                        "parent_frame_id_list": [],
                        "is_highlighted": false,
                        "is_zombie": false,
                        "is_parent": false,
                        "unique_hash": "0",
                        "frame_id": 0,
                    },
                    {
                        "func_name": "greet:15",
                        "encoded_locals": {
                            "this": ["REF", 2],
                            "greeting": ["REF", 3],
                        },
                        "locals_attrs": {
                            "this": { "type": "Person", "final": true },
                            "greeting": { "type": "java.lang.String", "final": false },
                        },
                        "ordered_varnames": ["this", "greeting"],
                        "parent_frame_id_list": [],
                        "is_highlighted": true,
                        "is_zombie": false,
                        "is_parent": false,
                        "unique_hash": "1",
                        "frame_id": 1,
                    },
                ],
                "globals": { "Main.RATIO": ["NUMBER-LITERAL", "0.5"] },
                "globals_attrs": { "Main.RATIO": { "type": "double", "final": true } },
                "ordered_globals": ["Main.RATIO"],
                "heap": {
                    "1": ["LIST"],
                    "2": ["INSTANCE", "Person", ["name", ["REF", 3]], ["age", 30]],
                    "3": ["INSTANCE", "String", ["___NO_LABEL!___", "Ada"]],
                },
                "heap_attrs": {
                    "1": { "type": "java.lang.String[]" },
                    "2": { "type": ["java.lang.String", "int"], "final": [true, false] },
                },
            }],
            "userlog": "",
        })
    );
}

#[test]
fn inline_strings_embed_contents_and_drop_string_entries() {
    let serializer = TraceSerializer::new(FormatOptions {
        inline_strings: true,
        ..FormatOptions::default()
    });
    let doc = serializer.serialize(SOURCE, &snapshot());
    let step = &doc["trace"][0];

    assert_eq!(step["stack_to_render"][1]["encoded_locals"]["greeting"], json!("Ada"));
    assert_eq!(
        step["heap"],
        json!({
            "1": ["LIST"],
            "2": ["INSTANCE", "Person", ["name", "Ada"], ["age", 30]],
        })
    );
    // Attributes are not filtered.
    assert_eq!(step["heap_attrs"]["2"]["final"], json!([true, false]));
}

#[test]
fn main_args_and_method_this_can_be_hidden() {
    let serializer = TraceSerializer::new(FormatOptions {
        remove_main_args: true,
        remove_method_this: true,
        ..FormatOptions::default()
    });
    let doc = serializer.serialize(SOURCE, &snapshot());
    let frames = &doc["trace"][0]["stack_to_render"];

    assert_eq!(frames[0]["ordered_varnames"], json!(["x", "p"]));
    assert_eq!(frames[0]["encoded_locals"].get("args"), None);
    assert_eq!(frames[1]["ordered_varnames"], json!(["greeting"]));
    assert_eq!(frames[1]["locals_attrs"].get("this"), None);
}

#[test]
fn value_shapes() {
    let mut snapshot = snapshot();
    snapshot.heap.insert(
        10,
        Value::Collection(vec![
            Value::Primitive(Primitive::Char(u16::from(b'a'))),
            Value::Null,
        ]),
    );
    snapshot.heap.insert(
        11,
        Value::Map(vec![(
            Value::Reference(3),
            Value::Primitive(Primitive::Float(f32::INFINITY)),
        )]),
    );
    snapshot.heap.insert(
        12,
        Value::Lambda("int applyAsInt(int x) {\n    return x;\n}".to_owned()),
    );
    snapshot.heap.insert(
        13,
        Value::List {
            type_name: "java.util.ArrayList".to_owned(),
            elements: vec![
                Value::Primitive(Primitive::Long(-7)),
                Value::Primitive(Primitive::Boolean(false)),
                Value::Primitive(Primitive::Double(f64::NAN)),
            ],
        },
    );

    let doc = TraceSerializer::default().serialize(SOURCE, &snapshot);
    let heap = &doc["trace"][0]["heap"];

    assert_eq!(heap["10"], json!(["SET", ["CHAR-LITERAL", "a"], null]));
    assert_eq!(
        heap["11"],
        json!(["DICT", [["REF", 3], ["SPECIAL_FLOAT", "Infinity"]]])
    );
    assert_eq!(
        heap["12"],
        json!(["JAVA_LAMBDA", "int applyAsInt(int x) {\n    return x;\n}"])
    );
    assert_eq!(
        heap["13"],
        json!(["LIST", -7, false, ["SPECIAL_FLOAT", "NaN"]])
    );
    assert_eq!(
        doc["trace"][0]["heap_attrs"]["13"],
        json!({ "type": "java.util.ArrayList" })
    );
    assert_eq!(doc["trace"][0]["heap_attrs"].get("10"), None);
}

#[test]
fn invalid_utf8_output_is_replaced_not_dropped() {
    let mut snapshot = snapshot();
    snapshot.stdout = b"caf\xe9\n".to_vec();
    let doc = TraceSerializer::default().serialize(SOURCE, &snapshot);

    assert_eq!(doc["trace"][0]["stdout"], json!("caf\u{FFFD}\n"));
}
