use std::collections::BTreeSet;

use jtrace_engine::{
    breakpoint_lines_connected, ExecutionSnapshot, Field, Primitive, ThisObject, Value,
    MAIN_EXIT_LINE,
};
use jtrace_jdwp::mock::{MockStop, MockVm, MOCK_THREAD_ID};
use jtrace_jdwp::types::{
    EVENT_KIND_BREAKPOINT, EVENT_KIND_CLASS_PREPARE, EVENT_KIND_METHOD_EXIT, INVOKE_SINGLE_THREADED,
    SUSPEND_POLICY_ALL,
};
use jtrace_jdwp::EventModifier;
use pretty_assertions::assert_eq;

use super::fixture::{self, *};

fn names(fields: &[Field]) -> Vec<&str> {
    fields.iter().map(|field| field.name.as_str()).collect()
}

fn only(result: &jtrace_engine::TraceResult, line: i32) -> &ExecutionSnapshot {
    let snapshots = &result[&line];
    assert_eq!(snapshots.len(), 1, "snapshots under line {line}");
    &snapshots[0]
}

#[tokio::test]
async fn without_breakpoints_main_exit_is_the_only_snapshot() {
    let clinit_exit = MockStop::MethodExit {
        location: location(MAIN_CLASS, MAIN_CLINIT, 6),
        frames: Vec::new(),
    };
    let vm = MockVm::spawn(program(vec![clinit_exit, main_exit()]))
        .await
        .unwrap();
    let result = fixture::trace(&vm, None, b"node 1\n").await;

    assert_eq!(result.keys().copied().collect::<Vec<_>>(), vec![MAIN_EXIT_LINE]);
    let snapshot = only(&result, MAIN_EXIT_LINE);
    assert_eq!(snapshot.stdout, b"node 1\n");
    assert_eq!(snapshot.stack.len(), 1);

    let main = snapshot.top_frame().unwrap();
    assert_eq!(main.method_name, "main");
    assert_eq!(main.line, 16);
    assert_eq!(main.this, None);
    assert_eq!(
        names(&main.variables),
        vec![
            "args",
            "count",
            "task",
            "node",
            "boxed",
            "list",
            "map",
            "broken",
            "set",
            "brokenSet",
            "random"
        ]
    );
    assert_eq!(
        main.variables[1],
        Field {
            name: "count".to_owned(),
            type_name: "int".to_owned(),
            is_final: true,
            value: Value::Primitive(Primitive::Int(3)),
        }
    );
    assert_eq!(main.variables[0].type_name, "java.lang.String[]");
    assert_eq!(main.variables[4].type_name, "java.lang.Integer");
    assert!(main.variables.iter().skip(2).all(|var| !var.is_final));

    let requests = vm.event_requests();
    let prepare: Vec<_> = requests
        .iter()
        .filter(|req| req.event_kind == EVENT_KIND_CLASS_PREPARE)
        .map(|req| req.modifiers.clone())
        .collect();
    assert_eq!(
        prepare,
        vec![
            vec![EventModifier::ClassMatch {
                pattern: "Main".to_owned()
            }],
            vec![EventModifier::ClassMatch {
                pattern: "Node".to_owned()
            }],
        ]
    );
    assert!(requests
        .iter()
        .any(|req| req.event_kind == EVENT_KIND_METHOD_EXIT
            && req.modifiers
                == vec![EventModifier::ClassMatch {
                    pattern: "Main".to_owned()
                }]));
    assert!(requests
        .iter()
        .all(|req| req.suspend_policy == SUSPEND_POLICY_ALL));
    assert!(requests
        .iter()
        .all(|req| req.event_kind != EVENT_KIND_BREAKPOINT));
}

#[tokio::test]
async fn statics_skip_synthetic_fields_and_keep_class_order() {
    let vm = MockVm::spawn(program(vec![main_exit()])).await.unwrap();
    let result = fixture::trace(&vm, None, b"").await;
    let snapshot = only(&result, MAIN_EXIT_LINE);

    assert_eq!(names(&snapshot.statics), vec!["Main.GREETING", "Main.TASK"]);
    assert_eq!(
        snapshot.statics[0],
        Field {
            name: "Main.GREETING".to_owned(),
            type_name: "java.lang.String".to_owned(),
            is_final: true,
            value: Value::Reference(GREETING),
        }
    );
    assert_eq!(snapshot.heap[&GREETING], Value::String("hi".to_owned()));
}

#[tokio::test]
async fn heap_walk_converts_each_reachable_object_once() {
    let vm = MockVm::spawn(program(vec![main_exit()])).await.unwrap();
    let result = fixture::trace(&vm, None, b"").await;
    let heap = &only(&result, MAIN_EXIT_LINE).heap;

    assert_eq!(
        heap.keys().copied().collect::<BTreeSet<_>>(),
        BTreeSet::from([
            ARGS,
            GREETING,
            NODE_A,
            NODE_B,
            BOXED,
            LIST,
            MAP,
            BROKEN_MAP,
            SET,
            BROKEN_SET,
            RANDOM,
            STATIC_TASK,
            LOCAL_TASK
        ])
    );

    // The two nodes point at each other.
    let Value::Object { type_name, fields } = &heap[&NODE_A] else {
        panic!("node is not an object: {:?}", heap[&NODE_A]);
    };
    assert_eq!(type_name, "Node");
    assert_eq!(names(fields), vec!["value", "next"]);
    assert!(fields[0].is_final);
    assert_eq!(fields[1].value, Value::Reference(NODE_B));
    let Value::Object { fields, .. } = &heap[&NODE_B] else {
        panic!("node is not an object: {:?}", heap[&NODE_B]);
    };
    assert_eq!(fields[1].value, Value::Reference(NODE_A));

    assert_eq!(
        heap[&ARGS],
        Value::List {
            type_name: "java.lang.String[]".to_owned(),
            elements: Vec::new(),
        }
    );
}

#[tokio::test]
async fn library_values_are_looked_through() {
    let vm = MockVm::spawn(program(vec![main_exit()])).await.unwrap();
    let result = fixture::trace(&vm, None, b"").await;
    let heap = &only(&result, MAIN_EXIT_LINE).heap;

    assert_eq!(heap[&BOXED], Value::Primitive(Primitive::Int(42)));
    assert_eq!(
        heap[&LIST],
        Value::List {
            type_name: "java.util.ArrayList".to_owned(),
            elements: vec![Value::Reference(GREETING), Value::Reference(BOXED)],
        }
    );
    assert_eq!(
        heap[&MAP],
        Value::Map(vec![(Value::Reference(GREETING), Value::Reference(BOXED))])
    );

    let calls = vm.invoke_calls();
    assert!(!calls.is_empty());
    assert!(calls
        .iter()
        .all(|call| call.thread == MOCK_THREAD_ID && call.options == INVOKE_SINGLE_THREADED));
}

#[tokio::test]
async fn unordered_collections_become_plain_collections() {
    let vm = MockVm::spawn(program(vec![main_exit()])).await.unwrap();
    let result = fixture::trace(&vm, None, b"").await;
    let heap = &only(&result, MAIN_EXIT_LINE).heap;

    assert_eq!(heap[&SET], Value::Collection(vec![Value::Reference(BOXED)]));
}

#[tokio::test]
async fn failed_enumeration_leaves_an_empty_object_of_the_runtime_type() {
    let vm = MockVm::spawn(program(vec![main_exit()])).await.unwrap();
    let result = fixture::trace(&vm, None, b"").await;
    let heap = &only(&result, MAIN_EXIT_LINE).heap;

    assert_eq!(
        heap[&BROKEN_MAP],
        Value::Object {
            type_name: "java.util.HashMap".to_owned(),
            fields: Vec::new(),
        }
    );
    assert_eq!(
        heap[&BROKEN_SET],
        Value::Object {
            type_name: "java.util.HashSet".to_owned(),
            fields: Vec::new(),
        }
    );
}

#[tokio::test]
async fn library_objects_are_shown_without_fields() {
    let vm = MockVm::spawn(program(vec![main_exit()])).await.unwrap();
    let result = fixture::trace(&vm, None, b"").await;
    let heap = &only(&result, MAIN_EXIT_LINE).heap;

    assert_eq!(
        heap[&RANDOM],
        Value::Object {
            type_name: "java.util.Random".to_owned(),
            fields: Vec::new(),
        }
    );
}

#[tokio::test]
async fn lambdas_are_reconstructed_from_source() {
    let vm = MockVm::spawn(program(vec![main_exit()])).await.unwrap();
    let result = fixture::trace(&vm, None, b"").await;
    let heap = &only(&result, MAIN_EXIT_LINE).heap;

    assert_eq!(
        heap[&LOCAL_TASK],
        Value::Lambda("void run() {\n    System.out.println(count);\n}".to_owned())
    );
    assert_eq!(
        heap[&STATIC_TASK],
        Value::Lambda("void run() {\n    System.out.println(GREETING);\n}".to_owned())
    );
}

#[tokio::test]
async fn breakpoints_record_every_hit_in_order() {
    let stops = vec![
        MockStop::Breakpoint {
            location: location(MAIN_CLASS, MAIN_METHOD, 12),
            frames: vec![fixture::main_frame(1, 12)],
        },
        // Line 12 was not requested, so the VM never reports it.
        MockStop::Breakpoint {
            location: location(MAIN_CLASS, MAIN_METHOD, 16),
            frames: vec![fixture::main_frame(1, 16)],
        },
        MockStop::Breakpoint {
            location: location(NODE_CLASS, NODE_DESCRIBE, 0),
            frames: describe_stack(),
        },
        MockStop::Breakpoint {
            location: location(MAIN_CLASS, MAIN_METHOD, 12),
            frames: vec![fixture::main_frame(1, 12)],
        },
        main_exit(),
    ];
    let vm = MockVm::spawn(program(stops)).await.unwrap();
    let result = fixture::trace(&vm, Some(&[11, 33, 99]), b"").await;

    assert_eq!(result.keys().copied().collect::<Vec<_>>(), vec![11, 33]);
    assert_eq!(result[&11].len(), 2);

    let first = &result[&11][0];
    assert_eq!(first.top_frame().unwrap().line, 11);
    assert_eq!(
        names(&first.top_frame().unwrap().variables),
        vec!["args", "count", "task", "node"]
    );

    let armed: Vec<_> = vm
        .event_requests()
        .into_iter()
        .filter(|req| req.event_kind == EVENT_KIND_BREAKPOINT)
        .map(|req| req.modifiers)
        .collect();
    assert_eq!(
        armed,
        vec![
            vec![EventModifier::LocationOnly {
                location: location(MAIN_CLASS, MAIN_METHOD, 12)
            }],
            vec![EventModifier::LocationOnly {
                location: location(NODE_CLASS, NODE_DESCRIBE, 0)
            }],
        ]
    );
}

#[tokio::test]
async fn instance_frames_carry_this_and_stack_is_oldest_first() {
    let stops = vec![MockStop::Breakpoint {
        location: location(NODE_CLASS, NODE_DESCRIBE, 0),
        frames: describe_stack(),
    }];
    let vm = MockVm::spawn(program(stops)).await.unwrap();
    let result = fixture::trace(&vm, Some(&[33]), b"").await;
    let snapshot = only(&result, 33);

    let methods: Vec<_> = snapshot
        .stack
        .iter()
        .map(|frame| (frame.method_name.as_str(), frame.line))
        .collect();
    assert_eq!(methods, vec![("main", 15), ("describe", 33)]);

    let describe = snapshot.top_frame().unwrap();
    assert!(describe.variables.is_empty());
    assert_eq!(
        describe.this,
        Some(ThisObject {
            type_name: "Node".to_owned(),
            value: Value::Reference(NODE_A),
        })
    );
    assert!(matches!(snapshot.heap[&NODE_A], Value::Object { .. }));
}

#[tokio::test]
async fn main_exit_stands_in_when_no_breakpoint_fired() {
    let vm = MockVm::spawn(program(vec![main_exit()])).await.unwrap();
    let result = fixture::trace(&vm, Some(&[11]), b"").await;

    assert_eq!(result.keys().copied().collect::<Vec<_>>(), vec![MAIN_EXIT_LINE]);
}

#[tokio::test]
async fn sentinel_in_the_breakpoint_list_also_snaps_main_exit() {
    let stops = vec![
        MockStop::Breakpoint {
            location: location(MAIN_CLASS, MAIN_METHOD, 12),
            frames: vec![fixture::main_frame(1, 12)],
        },
        main_exit(),
    ];
    let vm = MockVm::spawn(program(stops)).await.unwrap();
    let result = fixture::trace(&vm, Some(&[11, MAIN_EXIT_LINE]), b"").await;

    assert_eq!(
        result.keys().copied().collect::<Vec<_>>(),
        vec![MAIN_EXIT_LINE, 11]
    );
}

#[tokio::test]
async fn breakpoint_lines_cover_every_prepared_program_class() {
    let vm = MockVm::spawn(program(vec![main_exit()])).await.unwrap();
    let client = fixture::connect(&vm).await;
    let lines = breakpoint_lines_connected(client.clone(), &classes())
        .await
        .unwrap();
    client.shutdown();

    assert_eq!(
        lines,
        BTreeSet::from([3, 4, 5, 8, 9, 10, 11, 12, 13, 14, 15, 16, 23, 26, 27, 28, 29, 33])
    );
}
