//! A scripted debuggee mirroring [`SOURCE`], shared by the session tests.

use std::collections::BTreeSet;

use jtrace_config::TracerConfig;
use jtrace_engine::{trace_connected, OutputCapture, ProgramClasses, SourceIndex, TraceResult};
use jtrace_jdwp::mock::{
    MockClass, MockField, MockFrame, MockMethod, MockObject, MockProgram, MockStop, MockVm,
};
use jtrace_jdwp::types::{
    MODIFIER_FINAL, MODIFIER_PUBLIC, MODIFIER_STATIC, MODIFIER_SYNTHETIC_MASK, TAG_ARRAY,
    TAG_OBJECT, TAG_STRING, TYPE_TAG_CLASS,
};
use jtrace_jdwp::{JdwpClient, JdwpValue, Location, ObjectId};

pub const SOURCE: &str = r#"import java.util.*;

public class Main {
    static final String GREETING = "hi";
    static Runnable TASK = () -> System.out.println(GREETING);

    public static void main(String[] args) {
        final int count = 3;
        Runnable task = () -> System.out.println(count);
        Node node = Node.pair(1, 2);
        Integer boxed = 42;
        List<Object> list = new ArrayList<>(List.of(GREETING, boxed));
        Map<String, Integer> map = new HashMap<>(Map.of(GREETING, boxed));
        Map<String, Integer> broken = new HashMap<>(); Set<Integer> set = new HashSet<>(Set.of(boxed)); Set<Integer> brokenSet = new HashSet<>(); Random random = new Random(7);
        System.out.println(node.describe());
    }
}

class Node {
    final int value;
    Node next;

    Node(int value) { this.value = value; }

    static Node pair(int a, int b) {
        Node first = new Node(a);
        first.next = new Node(b);
        first.next.next = first;
        return first;
    }

    String describe() {
        return "node " + value;
    }
}
"#;

pub const MAIN_CLASS: u64 = 0x100;
pub const NODE_CLASS: u64 = 0x101;
const STRING_CLASS: u64 = 0x200;
const STRING_ARRAY_CLASS: u64 = 0x201;
const OBJECT_ARRAY_CLASS: u64 = 0x202;
const INTEGER_CLASS: u64 = 0x203;
const COLLECTION_IFACE: u64 = 0x210;
const LIST_IFACE: u64 = 0x211;
const MAP_IFACE: u64 = 0x212;
const ARRAY_LIST_CLASS: u64 = 0x220;
const HASH_MAP_CLASS: u64 = 0x221;
const ENTRY_SET_CLASS: u64 = 0x222;
const ENTRY_CLASS: u64 = 0x223;
const HASH_SET_CLASS: u64 = 0x224;
const RANDOM_CLASS: u64 = 0x225;

pub const MAIN_METHOD: u64 = 0x10;
const MAIN_INIT: u64 = 0x11;
pub const MAIN_CLINIT: u64 = 0x12;
const NODE_INIT: u64 = 0x13;
const NODE_PAIR: u64 = 0x14;
pub const NODE_DESCRIBE: u64 = 0x15;
const INT_VALUE: u64 = 0x20;
const LIST_TO_ARRAY: u64 = 0x21;
const ENTRY_SET: u64 = 0x22;
const SET_TO_ARRAY: u64 = 0x23;
const GET_KEY: u64 = 0x24;
const GET_VALUE: u64 = 0x25;
const HASH_SET_TO_ARRAY: u64 = 0x26;

pub const ARGS: ObjectId = 0x500;
pub const GREETING: ObjectId = 0x501;
pub const NODE_A: ObjectId = 0x600;
pub const NODE_B: ObjectId = 0x601;
pub const BOXED: ObjectId = 0x610;
pub const LIST: ObjectId = 0x620;
const LIST_ARRAY: ObjectId = 0x621;
pub const MAP: ObjectId = 0x630;
const ENTRIES: ObjectId = 0x631;
const ENTRY_ARRAY: ObjectId = 0x632;
const ENTRY: ObjectId = 0x633;
pub const BROKEN_MAP: ObjectId = 0x640;
pub const SET: ObjectId = 0x650;
const SET_ARRAY: ObjectId = 0x651;
pub const BROKEN_SET: ObjectId = 0x652;
pub const RANDOM: ObjectId = 0x660;
pub const STATIC_TASK: ObjectId = 0x700;
pub const LOCAL_TASK: ObjectId = 0x701;

/// Code index of `main`'s closing brace (line 16).
pub const MAIN_END: u64 = 32;

pub fn object(id: ObjectId) -> JdwpValue {
    JdwpValue::Object { tag: TAG_OBJECT, id }
}

fn string(id: ObjectId) -> JdwpValue {
    JdwpValue::Object { tag: TAG_STRING, id }
}

pub fn location(class_id: u64, method_id: u64, index: u64) -> Location {
    Location {
        type_tag: TYPE_TAG_CLASS,
        class_id,
        method_id,
        index,
    }
}

/// `main`'s frame stopped at `index`, with every local slot filled.
pub fn main_frame(frame_id: u64, index: u64) -> MockFrame {
    MockFrame {
        frame_id,
        location: location(MAIN_CLASS, MAIN_METHOD, index),
        locals: vec![
            (0, JdwpValue::Object { tag: TAG_ARRAY, id: ARGS }),
            (1, JdwpValue::Int(3)),
            (2, object(LOCAL_TASK)),
            (3, object(NODE_A)),
            (4, object(BOXED)),
            (5, object(LIST)),
            (6, object(MAP)),
            (7, object(BROKEN_MAP)),
            (8, object(SET)),
            (9, object(BROKEN_SET)),
            (10, object(RANDOM)),
        ],
        this_object: 0,
    }
}

/// `node.describe()` on line 33, called from line 15.
pub fn describe_stack() -> Vec<MockFrame> {
    vec![
        MockFrame {
            frame_id: 2,
            location: location(NODE_CLASS, NODE_DESCRIBE, 0),
            locals: Vec::new(),
            this_object: NODE_A,
        },
        main_frame(1, 28),
    ]
}

pub fn main_exit() -> MockStop {
    MockStop::MethodExit {
        location: location(MAIN_CLASS, MAIN_METHOD, MAIN_END),
        frames: vec![main_frame(1, MAIN_END)],
    }
}

fn main_class() -> MockClass {
    MockClass::new(MAIN_CLASS, "LMain;")
        .field(
            MockField::new(0x30, "GREETING", "Ljava/lang/String;", MODIFIER_STATIC | MODIFIER_FINAL)
                .with_static_value(string(GREETING)),
        )
        .field(
            MockField::new(0x31, "TASK", "Ljava/lang/Runnable;", MODIFIER_STATIC)
                .with_static_value(object(STATIC_TASK)),
        )
        .field(
            MockField::new(
                0x34,
                "$assertionsDisabled",
                "Z",
                MODIFIER_STATIC | MODIFIER_FINAL | MODIFIER_SYNTHETIC_MASK,
            )
            .with_static_value(JdwpValue::Boolean(true)),
        )
        .method(MockMethod::new(MAIN_INIT, "<init>", "()V", MODIFIER_PUBLIC).lines(&[(0, 3)]))
        .method(
            MockMethod::new(
                MAIN_METHOD,
                "main",
                "([Ljava/lang/String;)V",
                MODIFIER_PUBLIC | MODIFIER_STATIC,
            )
            .lines(&[
                (0, 8),
                (4, 9),
                (8, 10),
                (12, 11),
                (16, 12),
                (20, 13),
                (24, 14),
                (28, 15),
                (32, 16),
            ])
            .arg_count(1)
            .variable(0, "args", "[Ljava/lang/String;", 40, 0)
            .variable(4, "count", "I", 36, 1)
            .variable(8, "task", "Ljava/lang/Runnable;", 32, 2)
            .variable(12, "node", "LNode;", 28, 3)
            .variable(16, "boxed", "Ljava/lang/Integer;", 24, 4)
            .variable(20, "list", "Ljava/util/List;", 20, 5)
            .variable(24, "map", "Ljava/util/Map;", 16, 6)
            .variable(28, "broken", "Ljava/util/Map;", 12, 7)
            .variable(28, "set", "Ljava/util/Set;", 12, 8)
            .variable(28, "brokenSet", "Ljava/util/Set;", 12, 9)
            .variable(28, "random", "Ljava/util/Random;", 12, 10),
        )
        .method(
            MockMethod::new(MAIN_CLINIT, "<clinit>", "()V", MODIFIER_STATIC)
                .lines(&[(0, 4), (6, 5)]),
        )
}

fn node_class() -> MockClass {
    MockClass::new(NODE_CLASS, "LNode;")
        .field(MockField::new(0x32, "value", "I", MODIFIER_FINAL))
        .field(MockField::new(0x33, "next", "LNode;", 0))
        .method(MockMethod::new(NODE_INIT, "<init>", "(I)V", 0).lines(&[(0, 23)]))
        .method(
            MockMethod::new(NODE_PAIR, "pair", "(II)LNode;", MODIFIER_STATIC)
                .lines(&[(0, 26), (8, 27), (16, 28), (24, 29)]),
        )
        .method(
            MockMethod::new(NODE_DESCRIBE, "describe", "()Ljava/lang/String;", 0)
                .lines(&[(0, 33)]),
        )
}

fn library_classes(program: MockProgram) -> MockProgram {
    program
        .class(MockClass::new(STRING_CLASS, "Ljava/lang/String;"))
        .class(MockClass::new(STRING_ARRAY_CLASS, "[Ljava/lang/String;"))
        .class(MockClass::new(OBJECT_ARRAY_CLASS, "[Ljava/lang/Object;"))
        .class(
            MockClass::new(INTEGER_CLASS, "Ljava/lang/Integer;")
                .method(MockMethod::new(INT_VALUE, "intValue", "()I", MODIFIER_PUBLIC)),
        )
        .class(MockClass::interface(COLLECTION_IFACE, "Ljava/util/Collection;"))
        .class(MockClass::interface(LIST_IFACE, "Ljava/util/List;").implements(COLLECTION_IFACE))
        .class(MockClass::interface(MAP_IFACE, "Ljava/util/Map;"))
        .class(
            MockClass::new(ARRAY_LIST_CLASS, "Ljava/util/ArrayList;")
                .implements(LIST_IFACE)
                .method(MockMethod::new(
                    LIST_TO_ARRAY,
                    "toArray",
                    "()[Ljava/lang/Object;",
                    MODIFIER_PUBLIC,
                )),
        )
        .class(
            MockClass::new(HASH_MAP_CLASS, "Ljava/util/HashMap;")
                .implements(MAP_IFACE)
                .method(MockMethod::new(ENTRY_SET, "entrySet", "()Ljava/util/Set;", MODIFIER_PUBLIC)),
        )
        .class(
            MockClass::new(ENTRY_SET_CLASS, "Ljava/util/HashMap$EntrySet;")
                .implements(COLLECTION_IFACE)
                .method(MockMethod::new(
                    SET_TO_ARRAY,
                    "toArray",
                    "()[Ljava/lang/Object;",
                    MODIFIER_PUBLIC,
                )),
        )
        .class(
            MockClass::new(ENTRY_CLASS, "Ljava/util/HashMap$Node;")
                .method(MockMethod::new(GET_KEY, "getKey", "()Ljava/lang/Object;", MODIFIER_PUBLIC))
                .method(MockMethod::new(
                    GET_VALUE,
                    "getValue",
                    "()Ljava/lang/Object;",
                    MODIFIER_PUBLIC,
                )),
        )
        .class(
            MockClass::new(HASH_SET_CLASS, "Ljava/util/HashSet;")
                .implements(COLLECTION_IFACE)
                .method(MockMethod::new(
                    HASH_SET_TO_ARRAY,
                    "toArray",
                    "()[Ljava/lang/Object;",
                    MODIFIER_PUBLIC,
                )),
        )
        .class(
            MockClass::new(RANDOM_CLASS, "Ljava/util/Random;").field(MockField::new(
                0x36,
                "seed",
                "Ljava/util/concurrent/atomic/AtomicLong;",
                MODIFIER_FINAL,
            )),
        )
}

fn heap(program: MockProgram) -> MockProgram {
    program
        .object(
            ARGS,
            MockObject::Array {
                class: STRING_ARRAY_CLASS,
                element_tag: TAG_STRING,
                values: Vec::new(),
            },
        )
        .object(
            GREETING,
            MockObject::String {
                class: STRING_CLASS,
                value: "hi".to_owned(),
            },
        )
        .object(
            NODE_A,
            MockObject::Instance {
                class: NODE_CLASS,
                fields: vec![(0x32, JdwpValue::Int(1)), (0x33, object(NODE_B))],
            },
        )
        .object(
            NODE_B,
            MockObject::Instance {
                class: NODE_CLASS,
                fields: vec![(0x32, JdwpValue::Int(2)), (0x33, object(NODE_A))],
            },
        )
        .object(
            BOXED,
            MockObject::Instance {
                class: INTEGER_CLASS,
                fields: Vec::new(),
            },
        )
        .invocation(BOXED, INT_VALUE, JdwpValue::Int(42))
        .object(
            LIST,
            MockObject::Instance {
                class: ARRAY_LIST_CLASS,
                fields: Vec::new(),
            },
        )
        .invocation(LIST, LIST_TO_ARRAY, JdwpValue::Object { tag: TAG_ARRAY, id: LIST_ARRAY })
        .object(
            LIST_ARRAY,
            MockObject::Array {
                class: OBJECT_ARRAY_CLASS,
                element_tag: TAG_OBJECT,
                values: vec![string(GREETING), object(BOXED)],
            },
        )
        .object(
            MAP,
            MockObject::Instance {
                class: HASH_MAP_CLASS,
                fields: Vec::new(),
            },
        )
        .invocation(MAP, ENTRY_SET, object(ENTRIES))
        .object(
            ENTRIES,
            MockObject::Instance {
                class: ENTRY_SET_CLASS,
                fields: Vec::new(),
            },
        )
        .invocation(ENTRIES, SET_TO_ARRAY, JdwpValue::Object { tag: TAG_ARRAY, id: ENTRY_ARRAY })
        .object(
            ENTRY_ARRAY,
            MockObject::Array {
                class: OBJECT_ARRAY_CLASS,
                element_tag: TAG_OBJECT,
                values: vec![object(ENTRY)],
            },
        )
        .object(
            ENTRY,
            MockObject::Instance {
                class: ENTRY_CLASS,
                fields: Vec::new(),
            },
        )
        .invocation(ENTRY, GET_KEY, string(GREETING))
        .invocation(ENTRY, GET_VALUE, object(BOXED))
        .object(
            BROKEN_MAP,
            MockObject::Instance {
                class: HASH_MAP_CLASS,
                fields: Vec::new(),
            },
        )
        .throwing_invocation(BROKEN_MAP, ENTRY_SET, 0x6ff)
        .object(
            SET,
            MockObject::Instance {
                class: HASH_SET_CLASS,
                fields: Vec::new(),
            },
        )
        .invocation(SET, HASH_SET_TO_ARRAY, JdwpValue::Object { tag: TAG_ARRAY, id: SET_ARRAY })
        .object(
            SET_ARRAY,
            MockObject::Array {
                class: OBJECT_ARRAY_CLASS,
                element_tag: TAG_OBJECT,
                values: vec![object(BOXED)],
            },
        )
        .object(
            BROKEN_SET,
            MockObject::Instance {
                class: HASH_SET_CLASS,
                fields: Vec::new(),
            },
        )
        .throwing_invocation(BROKEN_SET, HASH_SET_TO_ARRAY, 0x6fe)
        .object(
            RANDOM,
            MockObject::Instance {
                class: RANDOM_CLASS,
                fields: vec![(0x36, object(0x661))],
            },
        )
}

/// The program's classes and heap, playing `stops` after the class-prepare
/// events for `Main` and `Node`.
pub fn program(stops: Vec<MockStop>) -> MockProgram {
    let mut program = heap(library_classes(
        MockProgram::new().class(main_class()).class(node_class()),
    ))
    .stop(MockStop::ClassPrepare {
        class_id: MAIN_CLASS,
    })
    .stop(MockStop::ClassPrepare {
        class_id: NODE_CLASS,
    });
    for stop in stops {
        program = program.stop(stop);
    }
    program
}

pub fn classes() -> ProgramClasses {
    ProgramClasses {
        names: BTreeSet::from(["Main".to_owned(), "Node".to_owned()]),
        entry_point: "Main".to_owned(),
    }
}

pub async fn connect(vm: &MockVm) -> JdwpClient {
    JdwpClient::connect(vm.addr())
        .await
        .expect("connect to mock VM")
}

/// Trace the scripted VM with `stdout` already captured.
pub async fn trace(vm: &MockVm, breakpoints: Option<&[i32]>, stdout: &[u8]) -> TraceResult {
    let client = connect(vm).await;
    let output = OutputCapture::new();
    output.append_stdout(stdout);
    let index = SourceIndex::parse(SOURCE);
    let result = trace_connected(
        client.clone(),
        &output,
        &classes(),
        breakpoints,
        &index,
        &TracerConfig::default(),
    )
    .await
    .expect("trace mock VM");
    client.shutdown();
    result
}
