use std::{
    collections::VecDeque,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::{
        atomic::{AtomicBool, AtomicI32, AtomicU32, Ordering},
        Arc,
    },
};

use parking_lot::Mutex;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{tcp::OwnedWriteHalf, TcpListener},
};
use tokio_util::sync::CancellationToken;

use super::{
    client::EventModifier,
    codec::{
        encode_command, encode_reply, JdwpReader, JdwpWriter, COMPOSITE_COMMAND,
        COMPOSITE_COMMAND_SET, HANDSHAKE, HEADER_LEN,
    },
    signature::signature_to_type_name,
    types::{
        is_primitive_tag, FieldId, JdwpIdSizes, JdwpValue, LineTableEntry, Location, MethodId,
        ObjectId, ReferenceTypeId, ThreadId, VariableInfo, CLASS_STATUS_INITIALIZED,
        CLASS_STATUS_PREPARED, CLASS_STATUS_VERIFIED, ERROR_ABSENT_INFORMATION,
        ERROR_INVALID_CLASS, ERROR_INVALID_FIELDID, ERROR_INVALID_FRAMEID,
        ERROR_INVALID_METHODID, ERROR_INVALID_OBJECT, ERROR_INVALID_SLOT, ERROR_NOT_IMPLEMENTED,
        EVENT_KIND_BREAKPOINT, EVENT_KIND_CLASS_PREPARE, EVENT_KIND_METHOD_EXIT,
        EVENT_KIND_VM_DEATH, EVENT_KIND_VM_START, EVENT_MODIFIER_KIND_CLASS_EXCLUDE,
        EVENT_MODIFIER_KIND_CLASS_MATCH, EVENT_MODIFIER_KIND_CLASS_ONLY,
        EVENT_MODIFIER_KIND_COUNT, EVENT_MODIFIER_KIND_LOCATION_ONLY, SUSPEND_POLICY_ALL,
        TAG_OBJECT, TYPE_TAG_ARRAY, TYPE_TAG_CLASS, TYPE_TAG_INTERFACE,
    },
};

/// The single application thread every scripted stop happens on.
pub const MOCK_THREAD_ID: ThreadId = 0x7001;

/// A tiny scripted JVM speaking JDWP, used for tests.
///
/// The VM is described up front by a [`MockProgram`]: its classes, heap
/// objects, canned results for method invocations, and a script of stops.
/// Each `VirtualMachine.Resume` plays the next stop for which the debugger has
/// armed a matching event request, so tests observe the same
/// "only armed breakpoints fire" behavior as a real VM. When the script runs
/// out the VM reports its death and closes the connection.
pub struct MockVm {
    addr: SocketAddr,
    shutdown: CancellationToken,
    state: Arc<State>,
}

#[derive(Clone, Debug, Default)]
pub struct MockProgram {
    pub id_sizes: JdwpIdSizes,
    pub classes: Vec<MockClass>,
    pub objects: Vec<(ObjectId, MockObject)>,
    pub invocations: Vec<MockInvocation>,
    pub stops: Vec<MockStop>,
}

impl MockProgram {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn class(mut self, class: MockClass) -> Self {
        self.classes.push(class);
        self
    }

    pub fn object(mut self, id: ObjectId, object: MockObject) -> Self {
        self.objects.push((id, object));
        self
    }

    /// Canned reply for invoking `method` on `object`.
    pub fn invocation(mut self, object: ObjectId, method: MethodId, value: JdwpValue) -> Self {
        self.invocations.push(MockInvocation {
            object,
            method,
            value,
            exception: 0,
        });
        self
    }

    /// Invoking `method` on `object` throws the exception object `exception`.
    pub fn throwing_invocation(
        mut self,
        object: ObjectId,
        method: MethodId,
        exception: ObjectId,
    ) -> Self {
        self.invocations.push(MockInvocation {
            object,
            method,
            value: JdwpValue::NULL,
            exception,
        });
        self
    }

    pub fn stop(mut self, stop: MockStop) -> Self {
        self.stops.push(stop);
        self
    }

    fn class_by_id(&self, id: ReferenceTypeId) -> Option<&MockClass> {
        self.classes.iter().find(|class| class.type_id == id)
    }

    fn object_by_id(&self, id: ObjectId) -> Option<&MockObject> {
        self.objects
            .iter()
            .find(|(object_id, _)| *object_id == id)
            .map(|(_, object)| object)
    }
}

#[derive(Clone, Debug)]
pub struct MockClass {
    pub type_id: ReferenceTypeId,
    pub ref_type_tag: u8,
    pub signature: String,
    pub superclass: ReferenceTypeId,
    pub interfaces: Vec<ReferenceTypeId>,
    pub fields: Vec<MockField>,
    pub methods: Vec<MockMethod>,
}

impl MockClass {
    pub fn new(type_id: ReferenceTypeId, signature: &str) -> Self {
        let ref_type_tag = if signature.starts_with('[') {
            TYPE_TAG_ARRAY
        } else {
            TYPE_TAG_CLASS
        };
        Self {
            type_id,
            ref_type_tag,
            signature: signature.to_string(),
            superclass: 0,
            interfaces: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
        }
    }

    pub fn interface(type_id: ReferenceTypeId, signature: &str) -> Self {
        Self {
            ref_type_tag: TYPE_TAG_INTERFACE,
            ..Self::new(type_id, signature)
        }
    }

    pub fn extends(mut self, superclass: ReferenceTypeId) -> Self {
        self.superclass = superclass;
        self
    }

    pub fn implements(mut self, interface: ReferenceTypeId) -> Self {
        self.interfaces.push(interface);
        self
    }

    pub fn field(mut self, field: MockField) -> Self {
        self.fields.push(field);
        self
    }

    pub fn method(mut self, method: MockMethod) -> Self {
        self.methods.push(method);
        self
    }

    fn name(&self) -> String {
        signature_to_type_name(&self.signature)
    }
}

#[derive(Clone, Debug)]
pub struct MockField {
    pub field_id: FieldId,
    pub name: String,
    pub signature: String,
    pub mod_bits: u32,
    /// Value returned by `ReferenceType.GetValues` for static fields.
    pub static_value: JdwpValue,
}

impl MockField {
    pub fn new(field_id: FieldId, name: &str, signature: &str, mod_bits: u32) -> Self {
        Self {
            field_id,
            name: name.to_string(),
            signature: signature.to_string(),
            mod_bits,
            static_value: JdwpValue::NULL,
        }
    }

    pub fn with_static_value(mut self, value: JdwpValue) -> Self {
        self.static_value = value;
        self
    }
}

#[derive(Clone, Debug)]
pub struct MockMethod {
    pub method_id: MethodId,
    pub name: String,
    pub signature: String,
    pub mod_bits: u32,
    pub lines: Vec<LineTableEntry>,
    /// `None` models a class compiled without `-g` (ABSENT_INFORMATION).
    pub variables: Option<(u32, Vec<VariableInfo>)>,
}

impl MockMethod {
    pub fn new(method_id: MethodId, name: &str, signature: &str, mod_bits: u32) -> Self {
        Self {
            method_id,
            name: name.to_string(),
            signature: signature.to_string(),
            mod_bits,
            lines: Vec::new(),
            variables: None,
        }
    }

    /// Line table as `(code_index, line)` pairs.
    pub fn lines(mut self, lines: &[(u64, i32)]) -> Self {
        self.lines = lines
            .iter()
            .map(|&(code_index, line)| LineTableEntry { code_index, line })
            .collect();
        self
    }

    pub fn arg_count(mut self, count: u32) -> Self {
        self.variables.get_or_insert_with(|| (0, Vec::new())).0 = count;
        self
    }

    pub fn variable(
        mut self,
        code_index: u64,
        name: &str,
        signature: &str,
        length: u32,
        slot: u32,
    ) -> Self {
        self.variables
            .get_or_insert_with(|| (0, Vec::new()))
            .1
            .push(VariableInfo {
                code_index,
                name: name.to_string(),
                signature: signature.to_string(),
                length,
                slot,
            });
        self
    }
}

#[derive(Clone, Debug)]
pub enum MockObject {
    Instance {
        class: ReferenceTypeId,
        fields: Vec<(FieldId, JdwpValue)>,
    },
    String {
        class: ReferenceTypeId,
        value: String,
    },
    Array {
        class: ReferenceTypeId,
        element_tag: u8,
        values: Vec<JdwpValue>,
    },
}

impl MockObject {
    fn class(&self) -> ReferenceTypeId {
        match self {
            MockObject::Instance { class, .. }
            | MockObject::String { class, .. }
            | MockObject::Array { class, .. } => *class,
        }
    }
}

#[derive(Clone, Debug)]
pub struct MockInvocation {
    pub object: ObjectId,
    pub method: MethodId,
    pub value: JdwpValue,
    pub exception: ObjectId,
}

#[derive(Clone, Debug)]
pub struct MockFrame {
    pub frame_id: u64,
    pub location: Location,
    pub locals: Vec<(u32, JdwpValue)>,
    pub this_object: ObjectId,
}

#[derive(Clone, Debug)]
pub enum MockStop {
    ClassPrepare {
        class_id: ReferenceTypeId,
    },
    /// `frames` is the thread's stack at the stop, top frame first.
    Breakpoint {
        location: Location,
        frames: Vec<MockFrame>,
    },
    MethodExit {
        location: Location,
        frames: Vec<MockFrame>,
    },
    VmDeath,
}

#[derive(Clone, Debug, PartialEq)]
pub struct MockEventRequest {
    pub request_id: i32,
    pub event_kind: u8,
    pub suspend_policy: u8,
    pub modifiers: Vec<EventModifier>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct MockInvokeCall {
    pub object: ObjectId,
    pub thread: ThreadId,
    pub method: MethodId,
    pub options: u32,
}

impl MockVm {
    pub async fn spawn(program: MockProgram) -> std::io::Result<Self> {
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0);
        let listener = TcpListener::bind(addr).await?;
        let addr = listener.local_addr()?;
        let shutdown = CancellationToken::new();

        let state = Arc::new(State::new(program));
        let task_shutdown = shutdown.clone();
        let task_state = state.clone();

        tokio::spawn(async move {
            if let Err(err) = run(listener, task_state, task_shutdown).await {
                tracing::debug!(target: "jtrace.jdwp", error = %err, "mock VM stopped");
            }
        });

        Ok(Self {
            addr,
            shutdown,
            state,
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn event_requests(&self) -> Vec<MockEventRequest> {
        self.state.requests.lock().clone()
    }

    pub fn resume_calls(&self) -> u32 {
        self.state.resume_calls.load(Ordering::SeqCst)
    }

    pub fn invoke_calls(&self) -> Vec<MockInvokeCall> {
        self.state.invoke_calls.lock().clone()
    }

    pub fn disposed(&self) -> bool {
        self.state.disposed.load(Ordering::SeqCst)
    }
}

impl Drop for MockVm {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

struct State {
    program: MockProgram,
    stops: Mutex<VecDeque<MockStop>>,
    frames: Mutex<Vec<MockFrame>>,
    requests: Mutex<Vec<MockEventRequest>>,
    invoke_calls: Mutex<Vec<MockInvokeCall>>,
    next_request_id: AtomicI32,
    next_packet_id: AtomicU32,
    resume_calls: AtomicU32,
    disposed: AtomicBool,
}

impl State {
    fn new(program: MockProgram) -> Self {
        let stops = program.stops.iter().cloned().collect();
        Self {
            program,
            stops: Mutex::new(stops),
            frames: Mutex::new(Vec::new()),
            requests: Mutex::new(Vec::new()),
            invoke_calls: Mutex::new(Vec::new()),
            next_request_id: AtomicI32::new(1),
            next_packet_id: AtomicU32::new(0x4000_0000),
            resume_calls: AtomicU32::new(0),
            disposed: AtomicBool::new(false),
        }
    }

    fn sizes(&self) -> &JdwpIdSizes {
        &self.program.id_sizes
    }

    fn composite(&self, suspend_policy: u8, events: Vec<(u8, i32, Vec<u8>)>) -> Vec<u8> {
        let mut w = JdwpWriter::new();
        w.write_u8(suspend_policy);
        w.write_u32(events.len() as u32);
        for (kind, request_id, body) in events {
            w.write_u8(kind);
            w.write_i32(request_id);
            for byte in body {
                w.write_u8(byte);
            }
        }
        let id = self.next_packet_id.fetch_add(1, Ordering::Relaxed);
        encode_command(id, COMPOSITE_COMMAND_SET, COMPOSITE_COMMAND, &w.into_vec())
    }

    fn matching_requests(&self, event_kind: u8, matches: impl Fn(&EventModifier) -> bool) -> Vec<(i32, u8)> {
        self.requests
            .lock()
            .iter()
            .filter(|req| req.event_kind == event_kind && req.modifiers.iter().all(&matches))
            .map(|req| (req.request_id, req.suspend_policy))
            .collect()
    }

    fn class_filter(&self, class_id: ReferenceTypeId) -> impl Fn(&EventModifier) -> bool + '_ {
        let name = self
            .program
            .class_by_id(class_id)
            .map(MockClass::name)
            .unwrap_or_default();
        move |modifier| match modifier {
            EventModifier::ClassOnly { class_id: only } => *only == class_id,
            EventModifier::ClassMatch { pattern } => class_pattern_matches(pattern, &name),
            EventModifier::ClassExclude { pattern } => !class_pattern_matches(pattern, &name),
            EventModifier::Count { .. } => true,
            EventModifier::LocationOnly { .. } => false,
        }
    }

    /// Play stops until one produces an event. Returns the packet and whether
    /// the VM is now dead.
    fn next_event_packet(&self) -> (Vec<u8>, bool) {
        loop {
            let next = self.stops.lock().pop_front();
            let Some(stop) = next else {
                return (self.death_packet(), true);
            };

            let (kind, requests, body, frames) = match &stop {
                MockStop::VmDeath => return (self.death_packet(), true),
                MockStop::ClassPrepare { class_id } => {
                    let Some(class) = self.program.class_by_id(*class_id) else {
                        continue;
                    };
                    let mut w = JdwpWriter::new();
                    w.write_object_id(MOCK_THREAD_ID, self.sizes());
                    w.write_u8(class.ref_type_tag);
                    w.write_reference_type_id(class.type_id, self.sizes());
                    w.write_string(&class.signature);
                    w.write_u32(CLASS_STATUS_VERIFIED | CLASS_STATUS_PREPARED);
                    let requests =
                        self.matching_requests(EVENT_KIND_CLASS_PREPARE, self.class_filter(*class_id));
                    (EVENT_KIND_CLASS_PREPARE, requests, w.into_vec(), None)
                }
                MockStop::Breakpoint { location, frames } => {
                    let requests = self.matching_requests(EVENT_KIND_BREAKPOINT, |m| match m {
                        EventModifier::LocationOnly { location: at } => at == location,
                        EventModifier::Count { .. } => true,
                        _ => false,
                    });
                    let mut w = JdwpWriter::new();
                    w.write_object_id(MOCK_THREAD_ID, self.sizes());
                    w.write_location(location, self.sizes());
                    (EVENT_KIND_BREAKPOINT, requests, w.into_vec(), Some(frames.clone()))
                }
                MockStop::MethodExit { location, frames } => {
                    let requests = self.matching_requests(
                        EVENT_KIND_METHOD_EXIT,
                        self.class_filter(location.class_id),
                    );
                    let mut w = JdwpWriter::new();
                    w.write_object_id(MOCK_THREAD_ID, self.sizes());
                    w.write_location(location, self.sizes());
                    (EVENT_KIND_METHOD_EXIT, requests, w.into_vec(), Some(frames.clone()))
                }
            };

            if requests.is_empty() {
                tracing::trace!(target: "jtrace.jdwp", ?stop, "mock VM skipping unrequested stop");
                continue;
            }

            if let Some(frames) = frames {
                *self.frames.lock() = frames;
            }
            let policy = requests
                .iter()
                .map(|(_, policy)| *policy)
                .max()
                .unwrap_or(SUSPEND_POLICY_ALL);
            let events = requests
                .into_iter()
                .map(|(request_id, _)| (kind, request_id, body.clone()))
                .collect();
            return (self.composite(policy, events), false);
        }
    }

    fn death_packet(&self) -> Vec<u8> {
        self.composite(0, vec![(EVENT_KIND_VM_DEATH, 0, Vec::new())])
    }

    fn start_packet(&self) -> Vec<u8> {
        let mut w = JdwpWriter::new();
        w.write_object_id(MOCK_THREAD_ID, self.sizes());
        self.composite(
            SUSPEND_POLICY_ALL,
            vec![(EVENT_KIND_VM_START, 0, w.into_vec())],
        )
    }
}

/// JDWP `ClassMatch` semantics: exact, or a single leading/trailing `*`.
fn class_pattern_matches(pattern: &str, name: &str) -> bool {
    if let Some(suffix) = pattern.strip_prefix('*') {
        name.ends_with(suffix)
    } else if let Some(prefix) = pattern.strip_suffix('*') {
        name.starts_with(prefix)
    } else {
        pattern == name
    }
}

async fn run(
    listener: TcpListener,
    state: Arc<State>,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let (mut socket, _) = tokio::select! {
        _ = shutdown.cancelled() => return Ok(()),
        accept = listener.accept() => accept?,
    };

    let mut hs = [0u8; HANDSHAKE.len()];
    socket.read_exact(&mut hs).await?;
    if hs != *HANDSHAKE {
        return Ok(());
    }
    socket.write_all(HANDSHAKE).await?;

    let (mut reader, mut writer) = socket.into_split();
    writer.write_all(&state.start_packet()).await?;

    loop {
        let packet = tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            res = read_packet(&mut reader) => res?,
        };
        let Some(packet) = packet else {
            return Ok(());
        };
        if !handle_packet(&mut writer, &state, packet).await? {
            let _ = writer.shutdown().await;
            return Ok(());
        }
    }
}

struct Packet {
    id: u32,
    command_set: u8,
    command: u8,
    payload: Vec<u8>,
}

async fn read_packet(
    socket: &mut tokio::net::tcp::OwnedReadHalf,
) -> std::io::Result<Option<Packet>> {
    let mut header = [0u8; HEADER_LEN];
    match socket.read_exact(&mut header).await {
        Ok(_n) => {}
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err),
    }

    let length = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
    if length < HEADER_LEN || header[8] != 0 {
        // The mock only expects well-formed commands from the debugger.
        return Ok(None);
    }
    let mut payload = vec![0u8; length - HEADER_LEN];
    socket.read_exact(&mut payload).await?;
    Ok(Some(Packet {
        id: u32::from_be_bytes([header[4], header[5], header[6], header[7]]),
        command_set: header[9],
        command: header[10],
        payload,
    }))
}

type Reply = std::result::Result<Vec<u8>, u16>;

/// Answer one command. Returns `false` once the connection should close.
async fn handle_packet(
    writer: &mut OwnedWriteHalf,
    state: &State,
    packet: Packet,
) -> std::io::Result<bool> {
    let sizes = *state.sizes();
    let program = &state.program;
    let mut r = JdwpReader::new(&packet.payload);
    let mut follow_up = None;
    let mut keep_open = true;

    let reply: Reply = match (packet.command_set, packet.command) {
        // VirtualMachine.IDSizes
        (1, 7) => {
            let mut w = JdwpWriter::new();
            w.write_u32(sizes.field_id as u32);
            w.write_u32(sizes.method_id as u32);
            w.write_u32(sizes.object_id as u32);
            w.write_u32(sizes.reference_type_id as u32);
            w.write_u32(sizes.frame_id as u32);
            Ok(w.into_vec())
        }
        // VirtualMachine.ClassesBySignature
        (1, 2) => {
            let signature = r.read_string().unwrap_or_default();
            let matches: Vec<_> = program
                .classes
                .iter()
                .filter(|class| class.signature == signature)
                .collect();
            let mut w = JdwpWriter::new();
            w.write_u32(matches.len() as u32);
            for class in matches {
                w.write_u8(class.ref_type_tag);
                w.write_reference_type_id(class.type_id, &sizes);
                w.write_u32(CLASS_STATUS_VERIFIED | CLASS_STATUS_PREPARED | CLASS_STATUS_INITIALIZED);
            }
            Ok(w.into_vec())
        }
        // VirtualMachine.Dispose
        (1, 6) => {
            state.disposed.store(true, Ordering::SeqCst);
            keep_open = false;
            Ok(Vec::new())
        }
        // VirtualMachine.Resume
        (1, 9) => {
            state.resume_calls.fetch_add(1, Ordering::SeqCst);
            let (packet, dead) = state.next_event_packet();
            follow_up = Some(packet);
            keep_open = !dead;
            Ok(Vec::new())
        }
        // ReferenceType.Signature
        (2, 1) => with_class(program, &mut r, &sizes, |class| {
            let mut w = JdwpWriter::new();
            w.write_string(&class.signature);
            w.into_vec()
        }),
        // ReferenceType.Fields
        (2, 4) => with_class(program, &mut r, &sizes, |class| {
            let mut w = JdwpWriter::new();
            w.write_u32(class.fields.len() as u32);
            for field in &class.fields {
                w.write_id(field.field_id, sizes.field_id);
                w.write_string(&field.name);
                w.write_string(&field.signature);
                w.write_u32(field.mod_bits);
            }
            w.into_vec()
        }),
        // ReferenceType.Methods
        (2, 5) => with_class(program, &mut r, &sizes, |class| {
            let mut w = JdwpWriter::new();
            w.write_u32(class.methods.len() as u32);
            for method in &class.methods {
                w.write_id(method.method_id, sizes.method_id);
                w.write_string(&method.name);
                w.write_string(&method.signature);
                w.write_u32(method.mod_bits);
            }
            w.into_vec()
        }),
        // ReferenceType.GetValues
        (2, 6) => static_values(program, &mut r, &sizes),
        // ReferenceType.Interfaces
        (2, 10) => with_class(program, &mut r, &sizes, |class| {
            let mut w = JdwpWriter::new();
            w.write_u32(class.interfaces.len() as u32);
            for interface in &class.interfaces {
                w.write_reference_type_id(*interface, &sizes);
            }
            w.into_vec()
        }),
        // ClassType.Superclass
        (3, 1) => with_class(program, &mut r, &sizes, |class| {
            let mut w = JdwpWriter::new();
            w.write_reference_type_id(class.superclass, &sizes);
            w.into_vec()
        }),
        // Method.LineTable
        (6, 1) => with_method(program, &mut r, &sizes).map(|method| {
            let mut w = JdwpWriter::new();
            let end = method.lines.iter().map(|l| l.code_index).max().unwrap_or(0);
            w.write_u64(0);
            w.write_u64(end);
            w.write_u32(method.lines.len() as u32);
            for entry in &method.lines {
                w.write_u64(entry.code_index);
                w.write_i32(entry.line);
            }
            w.into_vec()
        }),
        // Method.VariableTable
        (6, 2) => with_method(program, &mut r, &sizes).and_then(|method| {
            let (arg_count, vars) = method.variables.as_ref().ok_or(ERROR_ABSENT_INFORMATION)?;
            let mut w = JdwpWriter::new();
            w.write_u32(*arg_count);
            w.write_u32(vars.len() as u32);
            for var in vars {
                w.write_u64(var.code_index);
                w.write_string(&var.name);
                w.write_string(&var.signature);
                w.write_u32(var.length);
                w.write_u32(var.slot);
            }
            Ok(w.into_vec())
        }),
        // ObjectReference.ReferenceType
        (9, 1) => with_object(program, &mut r, &sizes).and_then(|object| {
            let class = program
                .class_by_id(object.class())
                .ok_or(ERROR_INVALID_CLASS)?;
            let mut w = JdwpWriter::new();
            w.write_u8(class.ref_type_tag);
            w.write_reference_type_id(class.type_id, &sizes);
            Ok(w.into_vec())
        }),
        // ObjectReference.GetValues
        (9, 2) => with_object(program, &mut r, &sizes).and_then(|object| {
            let MockObject::Instance { fields, .. } = object else {
                return Err(ERROR_INVALID_FIELDID);
            };
            let count = r.read_u32().map_err(|_| ERROR_INVALID_FIELDID)?;
            let mut w = JdwpWriter::new();
            w.write_u32(count);
            for _ in 0..count {
                let field_id = r.read_id(sizes.field_id).map_err(|_| ERROR_INVALID_FIELDID)?;
                let value = fields
                    .iter()
                    .find(|(id, _)| *id == field_id)
                    .map(|(_, value)| *value)
                    .ok_or(ERROR_INVALID_FIELDID)?;
                w.write_tagged_value(&value, &sizes);
            }
            Ok(w.into_vec())
        }),
        // ObjectReference.InvokeMethod
        (9, 6) => invoke_method(state, &mut r, &sizes),
        // StringReference.Value
        (10, 1) => with_object(program, &mut r, &sizes).and_then(|object| match object {
            MockObject::String { value, .. } => {
                let mut w = JdwpWriter::new();
                w.write_string(value);
                Ok(w.into_vec())
            }
            _ => Err(ERROR_INVALID_OBJECT),
        }),
        // ThreadReference.Frames
        (11, 6) => {
            let frames = state.frames.lock().clone();
            let mut w = JdwpWriter::new();
            w.write_u32(frames.len() as u32);
            for frame in &frames {
                w.write_id(frame.frame_id, sizes.frame_id);
                w.write_location(&frame.location, &sizes);
            }
            Ok(w.into_vec())
        }
        // ArrayReference.Length
        (13, 1) => with_object(program, &mut r, &sizes).and_then(|object| match object {
            MockObject::Array { values, .. } => {
                let mut w = JdwpWriter::new();
                w.write_i32(values.len() as i32);
                Ok(w.into_vec())
            }
            _ => Err(ERROR_INVALID_OBJECT),
        }),
        // ArrayReference.GetValues
        (13, 2) => with_object(program, &mut r, &sizes).and_then(|object| {
            let MockObject::Array {
                element_tag,
                values,
                ..
            } = object
            else {
                return Err(ERROR_INVALID_OBJECT);
            };
            let first = r.read_i32().unwrap_or(0).max(0) as usize;
            let length = r.read_i32().unwrap_or(0).max(0) as usize;
            let region = values.iter().skip(first).take(length);
            let mut w = JdwpWriter::new();
            w.write_u8(*element_tag);
            w.write_u32(region.len() as u32);
            for value in region {
                if is_primitive_tag(*element_tag) {
                    w.write_value(value, &sizes);
                } else {
                    w.write_tagged_value(value, &sizes);
                }
            }
            Ok(w.into_vec())
        }),
        // EventRequest.Set
        (15, 1) => match decode_event_request(&mut r, &sizes) {
            Some((event_kind, suspend_policy, modifiers)) => {
                let request_id = state.next_request_id.fetch_add(1, Ordering::Relaxed);
                state.requests.lock().push(MockEventRequest {
                    request_id,
                    event_kind,
                    suspend_policy,
                    modifiers,
                });
                let mut w = JdwpWriter::new();
                w.write_i32(request_id);
                Ok(w.into_vec())
            }
            None => Err(ERROR_NOT_IMPLEMENTED),
        },
        // EventRequest.Clear
        (15, 2) => {
            let event_kind = r.read_u8().unwrap_or(0);
            let request_id = r.read_i32().unwrap_or(0);
            state
                .requests
                .lock()
                .retain(|req| !(req.event_kind == event_kind && req.request_id == request_id));
            Ok(Vec::new())
        }
        // StackFrame.GetValues
        (16, 1) => frame_values(state, &mut r, &sizes),
        // StackFrame.ThisObject
        (16, 3) => with_frame(state, &mut r, &sizes).map(|frame| {
            let mut w = JdwpWriter::new();
            w.write_tagged_object_id(TAG_OBJECT, frame.this_object, &sizes);
            w.into_vec()
        }),
        _ => Err(ERROR_NOT_IMPLEMENTED),
    };

    let packet = match reply {
        Ok(payload) => encode_reply(packet.id, 0, &payload),
        Err(code) => encode_reply(packet.id, code, &[]),
    };
    writer.write_all(&packet).await?;
    if let Some(follow_up) = follow_up {
        writer.write_all(&follow_up).await?;
    }
    Ok(keep_open)
}

fn with_class(
    program: &MockProgram,
    r: &mut JdwpReader<'_>,
    sizes: &JdwpIdSizes,
    f: impl FnOnce(&MockClass) -> Vec<u8>,
) -> Reply {
    let id = r
        .read_reference_type_id(sizes)
        .map_err(|_| ERROR_INVALID_CLASS)?;
    program.class_by_id(id).map(f).ok_or(ERROR_INVALID_CLASS)
}

fn with_method<'p>(
    program: &'p MockProgram,
    r: &mut JdwpReader<'_>,
    sizes: &JdwpIdSizes,
) -> std::result::Result<&'p MockMethod, u16> {
    let class_id = r
        .read_reference_type_id(sizes)
        .map_err(|_| ERROR_INVALID_CLASS)?;
    let method_id = r
        .read_id(sizes.method_id)
        .map_err(|_| ERROR_INVALID_METHODID)?;
    let class = program.class_by_id(class_id).ok_or(ERROR_INVALID_CLASS)?;
    class
        .methods
        .iter()
        .find(|method| method.method_id == method_id)
        .ok_or(ERROR_INVALID_METHODID)
}

fn with_object<'p>(
    program: &'p MockProgram,
    r: &mut JdwpReader<'_>,
    sizes: &JdwpIdSizes,
) -> std::result::Result<&'p MockObject, u16> {
    let id = r.read_object_id(sizes).map_err(|_| ERROR_INVALID_OBJECT)?;
    program.object_by_id(id).ok_or(ERROR_INVALID_OBJECT)
}

fn with_frame(
    state: &State,
    r: &mut JdwpReader<'_>,
    sizes: &JdwpIdSizes,
) -> std::result::Result<MockFrame, u16> {
    let _thread = r.read_object_id(sizes).map_err(|_| ERROR_INVALID_FRAMEID)?;
    let frame_id = r
        .read_id(sizes.frame_id)
        .map_err(|_| ERROR_INVALID_FRAMEID)?;
    state
        .frames
        .lock()
        .iter()
        .find(|frame| frame.frame_id == frame_id)
        .cloned()
        .ok_or(ERROR_INVALID_FRAMEID)
}

fn static_values(program: &MockProgram, r: &mut JdwpReader<'_>, sizes: &JdwpIdSizes) -> Reply {
    let class_id = r
        .read_reference_type_id(sizes)
        .map_err(|_| ERROR_INVALID_CLASS)?;
    let class = program.class_by_id(class_id).ok_or(ERROR_INVALID_CLASS)?;
    let count = r.read_u32().map_err(|_| ERROR_INVALID_FIELDID)?;
    let mut w = JdwpWriter::new();
    w.write_u32(count);
    for _ in 0..count {
        let field_id = r.read_id(sizes.field_id).map_err(|_| ERROR_INVALID_FIELDID)?;
        let field = class
            .fields
            .iter()
            .find(|field| field.field_id == field_id)
            .ok_or(ERROR_INVALID_FIELDID)?;
        w.write_tagged_value(&field.static_value, sizes);
    }
    Ok(w.into_vec())
}

fn frame_values(state: &State, r: &mut JdwpReader<'_>, sizes: &JdwpIdSizes) -> Reply {
    let frame = with_frame(state, r, sizes)?;
    let count = r.read_u32().map_err(|_| ERROR_INVALID_SLOT)?;
    let mut w = JdwpWriter::new();
    w.write_u32(count);
    for _ in 0..count {
        let slot = r.read_u32().map_err(|_| ERROR_INVALID_SLOT)?;
        let _tag = r.read_u8().map_err(|_| ERROR_INVALID_SLOT)?;
        let value = frame
            .locals
            .iter()
            .find(|(s, _)| *s == slot)
            .map(|(_, value)| *value)
            .ok_or(ERROR_INVALID_SLOT)?;
        w.write_tagged_value(&value, sizes);
    }
    Ok(w.into_vec())
}

fn invoke_method(state: &State, r: &mut JdwpReader<'_>, sizes: &JdwpIdSizes) -> Reply {
    let object = r.read_object_id(sizes).map_err(|_| ERROR_INVALID_OBJECT)?;
    let thread = r.read_object_id(sizes).map_err(|_| ERROR_INVALID_OBJECT)?;
    let _class = r
        .read_reference_type_id(sizes)
        .map_err(|_| ERROR_INVALID_CLASS)?;
    let method = r
        .read_id(sizes.method_id)
        .map_err(|_| ERROR_INVALID_METHODID)?;
    let arg_count = r.read_u32().map_err(|_| ERROR_INVALID_METHODID)?;
    for _ in 0..arg_count {
        r.read_tagged_value(sizes)
            .map_err(|_| ERROR_INVALID_METHODID)?;
    }
    let options = r.read_u32().unwrap_or(0);

    state.invoke_calls.lock().push(MockInvokeCall {
        object,
        thread,
        method,
        options,
    });

    let invocation = state
        .program
        .invocations
        .iter()
        .find(|inv| inv.object == object && inv.method == method)
        .ok_or(ERROR_INVALID_METHODID)?;
    let mut w = JdwpWriter::new();
    w.write_tagged_value(&invocation.value, sizes);
    w.write_tagged_object_id(TAG_OBJECT, invocation.exception, sizes);
    Ok(w.into_vec())
}

fn decode_event_request(
    r: &mut JdwpReader<'_>,
    sizes: &JdwpIdSizes,
) -> Option<(u8, u8, Vec<EventModifier>)> {
    let event_kind = r.read_u8().ok()?;
    let suspend_policy = r.read_u8().ok()?;
    let count = r.read_u32().ok()?;
    let mut modifiers = Vec::new();
    for _ in 0..count {
        let modifier = match r.read_u8().ok()? {
            EVENT_MODIFIER_KIND_COUNT => EventModifier::Count {
                count: r.read_i32().ok()?,
            },
            EVENT_MODIFIER_KIND_CLASS_ONLY => EventModifier::ClassOnly {
                class_id: r.read_reference_type_id(sizes).ok()?,
            },
            EVENT_MODIFIER_KIND_CLASS_MATCH => EventModifier::ClassMatch {
                pattern: r.read_string().ok()?,
            },
            EVENT_MODIFIER_KIND_CLASS_EXCLUDE => EventModifier::ClassExclude {
                pattern: r.read_string().ok()?,
            },
            EVENT_MODIFIER_KIND_LOCATION_ONLY => EventModifier::LocationOnly {
                location: r.read_location(sizes).ok()?,
            },
            _ => return None,
        };
        modifiers.push(modifier);
    }
    Some((event_kind, suspend_policy, modifiers))
}
