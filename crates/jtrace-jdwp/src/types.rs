use thiserror::Error;

pub type ObjectId = u64;
pub type ThreadId = ObjectId;
pub type ReferenceTypeId = u64;
pub type MethodId = u64;
pub type FieldId = u64;
pub type FrameId = u64;

pub type Result<T> = std::result::Result<T, JdwpError>;

#[derive(Debug, Error)]
pub enum JdwpError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JDWP protocol error: {0}")]
    Protocol(String),

    #[error("JDWP error {0} ({name})", name = error_code_name(*.0))]
    VmError(u16),

    #[error("timed out waiting for JDWP reply")]
    Timeout,

    #[error("JDWP request cancelled")]
    Cancelled,

    #[error("JDWP connection closed")]
    ConnectionClosed,
}

impl JdwpError {
    /// Whether the VM refused the request because the object or type it names
    /// no longer exists (collected or unloaded).
    pub fn is_stale_id(&self) -> bool {
        matches!(
            self,
            JdwpError::VmError(ERROR_INVALID_OBJECT | ERROR_INVALID_CLASS)
        )
    }
}

pub const ERROR_INVALID_THREAD: u16 = 10;
pub const ERROR_THREAD_NOT_SUSPENDED: u16 = 13;
pub const ERROR_INVALID_OBJECT: u16 = 20;
pub const ERROR_INVALID_CLASS: u16 = 21;
pub const ERROR_INVALID_METHODID: u16 = 23;
pub const ERROR_INVALID_FIELDID: u16 = 25;
pub const ERROR_INVALID_FRAMEID: u16 = 30;
pub const ERROR_INVALID_SLOT: u16 = 35;
pub const ERROR_TYPE_MISMATCH: u16 = 34;
pub const ERROR_NOT_IMPLEMENTED: u16 = 99;
pub const ERROR_ABSENT_INFORMATION: u16 = 101;
pub const ERROR_INVALID_EVENT_TYPE: u16 = 102;
pub const ERROR_VM_DEAD: u16 = 112;
pub const ERROR_INVALID_LENGTH: u16 = 504;
pub const ERROR_NATIVE_METHOD: u16 = 511;

fn error_code_name(code: u16) -> &'static str {
    match code {
        ERROR_INVALID_THREAD => "INVALID_THREAD",
        ERROR_THREAD_NOT_SUSPENDED => "THREAD_NOT_SUSPENDED",
        ERROR_INVALID_OBJECT => "INVALID_OBJECT",
        ERROR_INVALID_CLASS => "INVALID_CLASS",
        ERROR_INVALID_METHODID => "INVALID_METHODID",
        ERROR_INVALID_FIELDID => "INVALID_FIELDID",
        ERROR_INVALID_FRAMEID => "INVALID_FRAMEID",
        ERROR_TYPE_MISMATCH => "TYPE_MISMATCH",
        ERROR_INVALID_SLOT => "INVALID_SLOT",
        ERROR_NOT_IMPLEMENTED => "NOT_IMPLEMENTED",
        ERROR_ABSENT_INFORMATION => "ABSENT_INFORMATION",
        ERROR_INVALID_EVENT_TYPE => "INVALID_EVENT_TYPE",
        ERROR_VM_DEAD => "VM_DEAD",
        ERROR_INVALID_LENGTH => "INVALID_LENGTH",
        ERROR_NATIVE_METHOD => "NATIVE_METHOD",
        _ => "unknown",
    }
}

pub const EVENT_KIND_BREAKPOINT: u8 = 2;
pub const EVENT_KIND_CLASS_PREPARE: u8 = 8;
pub const EVENT_KIND_METHOD_EXIT: u8 = 41;
pub const EVENT_KIND_VM_START: u8 = 90;
pub const EVENT_KIND_VM_DEATH: u8 = 99;

pub const EVENT_MODIFIER_KIND_COUNT: u8 = 1;
pub const EVENT_MODIFIER_KIND_CLASS_ONLY: u8 = 4;
pub const EVENT_MODIFIER_KIND_CLASS_MATCH: u8 = 5;
pub const EVENT_MODIFIER_KIND_CLASS_EXCLUDE: u8 = 6;
pub const EVENT_MODIFIER_KIND_LOCATION_ONLY: u8 = 7;

pub const SUSPEND_POLICY_NONE: u8 = 0;
pub const SUSPEND_POLICY_EVENT_THREAD: u8 = 1;
pub const SUSPEND_POLICY_ALL: u8 = 2;

/// `ObjectReference.InvokeMethod` option: resume only the invoking thread.
pub const INVOKE_SINGLE_THREADED: u32 = 0x01;

pub const TYPE_TAG_CLASS: u8 = 1;
pub const TYPE_TAG_INTERFACE: u8 = 2;
pub const TYPE_TAG_ARRAY: u8 = 3;

/// `ClassStatus` bits reported for prepared classes.
pub const CLASS_STATUS_VERIFIED: u32 = 1;
pub const CLASS_STATUS_PREPARED: u32 = 2;
pub const CLASS_STATUS_INITIALIZED: u32 = 4;

pub const MODIFIER_PUBLIC: u32 = 0x0001;
pub const MODIFIER_STATIC: u32 = 0x0008;
pub const MODIFIER_FINAL: u32 = 0x0010;
pub const MODIFIER_VARARGS: u32 = 0x0080;
/// JDWP reports compiler-generated members by setting bits in this mask.
pub const MODIFIER_SYNTHETIC_MASK: u32 = 0xf000_0000;

pub const TAG_ARRAY: u8 = b'[';
pub const TAG_OBJECT: u8 = b'L';
pub const TAG_STRING: u8 = b's';
pub const TAG_THREAD: u8 = b't';
pub const TAG_THREAD_GROUP: u8 = b'g';
pub const TAG_CLASS_LOADER: u8 = b'l';
pub const TAG_CLASS_OBJECT: u8 = b'c';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JdwpIdSizes {
    pub field_id: usize,
    pub method_id: usize,
    pub object_id: usize,
    pub reference_type_id: usize,
    pub frame_id: usize,
}

impl Default for JdwpIdSizes {
    fn default() -> Self {
        Self {
            field_id: 8,
            method_id: 8,
            object_id: 8,
            reference_type_id: 8,
            frame_id: 8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Location {
    pub type_tag: u8,
    pub class_id: ReferenceTypeId,
    pub method_id: MethodId,
    pub index: u64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum JdwpValue {
    Boolean(bool),
    Byte(i8),
    Char(u16),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    /// Any reference value. `id == 0` is `null`.
    Object { tag: u8, id: ObjectId },
    Void,
}

impl JdwpValue {
    pub const NULL: JdwpValue = JdwpValue::Object {
        tag: TAG_OBJECT,
        id: 0,
    };

    pub fn tag(&self) -> u8 {
        match *self {
            JdwpValue::Boolean(_) => b'Z',
            JdwpValue::Byte(_) => b'B',
            JdwpValue::Char(_) => b'C',
            JdwpValue::Short(_) => b'S',
            JdwpValue::Int(_) => b'I',
            JdwpValue::Long(_) => b'J',
            JdwpValue::Float(_) => b'F',
            JdwpValue::Double(_) => b'D',
            JdwpValue::Object { tag, .. } => tag,
            JdwpValue::Void => b'V',
        }
    }

    /// The referenced object, if this is a non-null reference.
    pub fn object_id(&self) -> Option<ObjectId> {
        match *self {
            JdwpValue::Object { id, .. } if id != 0 => Some(id),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, JdwpValue::Object { id: 0, .. })
    }
}

/// Whether `tag` denotes a primitive (untagged in array regions) value.
pub fn is_primitive_tag(tag: u8) -> bool {
    matches!(tag, b'Z' | b'B' | b'C' | b'S' | b'I' | b'J' | b'F' | b'D')
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassInfo {
    pub ref_type_tag: u8,
    pub type_id: ReferenceTypeId,
    pub signature: String,
    pub status: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodInfo {
    pub method_id: MethodId,
    pub name: String,
    pub signature: String,
    pub mod_bits: u32,
}

impl MethodInfo {
    pub fn is_public(&self) -> bool {
        self.mod_bits & MODIFIER_PUBLIC != 0
    }

    pub fn is_static(&self) -> bool {
        self.mod_bits & MODIFIER_STATIC != 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldInfo {
    pub field_id: FieldId,
    pub name: String,
    pub signature: String,
    pub mod_bits: u32,
}

impl FieldInfo {
    pub fn is_static(&self) -> bool {
        self.mod_bits & MODIFIER_STATIC != 0
    }

    pub fn is_final(&self) -> bool {
        self.mod_bits & MODIFIER_FINAL != 0
    }

    pub fn is_synthetic(&self) -> bool {
        self.mod_bits & MODIFIER_SYNTHETIC_MASK != 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineTableEntry {
    pub code_index: u64,
    pub line: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LineTable {
    pub start: u64,
    pub end: u64,
    pub lines: Vec<LineTableEntry>,
}

impl LineTable {
    /// The source line for `code_index`: the entry with the greatest code
    /// index not past it.
    pub fn line_for(&self, code_index: u64) -> Option<i32> {
        self.lines
            .iter()
            .filter(|entry| entry.code_index <= code_index)
            .max_by_key(|entry| entry.code_index)
            .map(|entry| entry.line)
    }

    /// The lowest code index mapped to `line`.
    pub fn first_index_of(&self, line: i32) -> Option<u64> {
        self.lines
            .iter()
            .filter(|entry| entry.line == line)
            .map(|entry| entry.code_index)
            .min()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableInfo {
    pub code_index: u64,
    pub name: String,
    pub signature: String,
    pub length: u32,
    pub slot: u32,
}

impl VariableInfo {
    /// Whether the variable is in scope at `code_index`.
    pub fn is_visible_at(&self, code_index: u64) -> bool {
        code_index >= self.code_index && code_index < self.code_index + u64::from(self.length)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameInfo {
    pub frame_id: FrameId,
    pub location: Location,
}

/// Reply of `ObjectReference.InvokeMethod`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InvokeResult {
    pub value: JdwpValue,
    /// Object id of the thrown exception, `0` when the call returned normally.
    pub exception: ObjectId,
}

#[derive(Debug, Clone, PartialEq)]
pub enum JdwpEvent {
    VmStart {
        request_id: i32,
        thread: ThreadId,
    },
    ClassPrepare {
        request_id: i32,
        thread: ThreadId,
        ref_type_tag: u8,
        type_id: ReferenceTypeId,
        signature: String,
        status: u32,
    },
    Breakpoint {
        request_id: i32,
        thread: ThreadId,
        location: Location,
    },
    MethodExit {
        request_id: i32,
        thread: ThreadId,
        location: Location,
    },
    VmDeath {
        request_id: i32,
    },
}

/// One composite event packet. The VM is suspended according to
/// `suspend_policy` until the batch is resumed.
#[derive(Debug, Clone, PartialEq)]
pub struct EventSet {
    pub suspend_policy: u8,
    pub events: Vec<JdwpEvent>,
}
