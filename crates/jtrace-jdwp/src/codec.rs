use super::types::{
    is_primitive_tag, JdwpError, JdwpIdSizes, JdwpValue, Location, ObjectId, ReferenceTypeId,
    Result,
};

pub const HANDSHAKE: &[u8] = b"JDWP-Handshake";
pub const HEADER_LEN: usize = crate::JDWP_HEADER_LEN;
pub const FLAG_REPLY: u8 = 0x80;

pub const COMPOSITE_COMMAND_SET: u8 = 64;
pub const COMPOSITE_COMMAND: u8 = 100;

/// The JDWP tag byte for a value declared with `signature`.
pub fn signature_to_tag(signature: &str) -> u8 {
    signature.as_bytes().first().copied().unwrap_or(b'V')
}

#[derive(Default)]
pub struct JdwpWriter {
    buf: Vec<u8>,
}

impl JdwpWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.buf
    }

    pub fn write_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn write_bool(&mut self, v: bool) {
        self.buf.push(u8::from(v));
    }

    pub fn write_string(&mut self, s: &str) {
        // Length-prefixed with a u32 byte count.
        self.write_u32(s.len() as u32);
        self.buf.extend_from_slice(s.as_bytes());
    }

    pub fn write_id(&mut self, id: u64, size: usize) {
        let be = id.to_be_bytes();
        self.buf.extend_from_slice(&be[8 - size..]);
    }

    pub fn write_object_id(&mut self, id: ObjectId, sizes: &JdwpIdSizes) {
        self.write_id(id, sizes.object_id);
    }

    pub fn write_tagged_object_id(&mut self, tag: u8, id: ObjectId, sizes: &JdwpIdSizes) {
        self.write_u8(tag);
        self.write_object_id(id, sizes);
    }

    pub fn write_reference_type_id(&mut self, id: ReferenceTypeId, sizes: &JdwpIdSizes) {
        self.write_id(id, sizes.reference_type_id);
    }

    pub fn write_location(&mut self, loc: &Location, sizes: &JdwpIdSizes) {
        self.write_u8(loc.type_tag);
        self.write_reference_type_id(loc.class_id, sizes);
        self.write_id(loc.method_id, sizes.method_id);
        self.write_u64(loc.index);
    }

    pub fn write_value(&mut self, v: &JdwpValue, sizes: &JdwpIdSizes) {
        match *v {
            JdwpValue::Boolean(v) => self.write_bool(v),
            JdwpValue::Byte(v) => self.write_u8(v as u8),
            JdwpValue::Char(v) => self.write_u16(v),
            JdwpValue::Short(v) => self.write_u16(v as u16),
            JdwpValue::Int(v) => self.write_i32(v),
            JdwpValue::Long(v) => self.write_i64(v),
            JdwpValue::Float(v) => self.write_f32(v),
            JdwpValue::Double(v) => self.write_f64(v),
            JdwpValue::Object { id, .. } => self.write_object_id(id, sizes),
            JdwpValue::Void => {}
        }
    }

    pub fn write_tagged_value(&mut self, v: &JdwpValue, sizes: &JdwpIdSizes) {
        self.write_u8(v.tag());
        self.write_value(v, sizes);
    }
}

pub struct JdwpReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> JdwpReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.buf.len())
            .ok_or_else(|| {
                JdwpError::Protocol(format!(
                    "buffer underflow: need {n} bytes at {}, have {}",
                    self.pos,
                    self.buf.len()
                ))
            })?;
        let bytes = &self.buf[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take_array::<1>()?[0])
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_string(&mut self) -> Result<String> {
        let len = self.read_u32()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| JdwpError::Protocol(format!("invalid utf-8 string: {e}")))
    }

    pub fn read_id(&mut self, size: usize) -> Result<u64> {
        if size == 0 || size > 8 {
            return Err(JdwpError::Protocol(format!("invalid id size: {size}")));
        }
        let mut be = [0u8; 8];
        be[8 - size..].copy_from_slice(self.take(size)?);
        Ok(u64::from_be_bytes(be))
    }

    pub fn read_object_id(&mut self, sizes: &JdwpIdSizes) -> Result<ObjectId> {
        self.read_id(sizes.object_id)
    }

    pub fn read_tagged_object_id(&mut self, sizes: &JdwpIdSizes) -> Result<(u8, ObjectId)> {
        let tag = self.read_u8()?;
        let id = self.read_object_id(sizes)?;
        Ok((tag, id))
    }

    pub fn read_reference_type_id(&mut self, sizes: &JdwpIdSizes) -> Result<ReferenceTypeId> {
        self.read_id(sizes.reference_type_id)
    }

    pub fn read_location(&mut self, sizes: &JdwpIdSizes) -> Result<Location> {
        Ok(Location {
            type_tag: self.read_u8()?,
            class_id: self.read_reference_type_id(sizes)?,
            method_id: self.read_id(sizes.method_id)?,
            index: self.read_u64()?,
        })
    }

    pub fn read_value(&mut self, tag: u8, sizes: &JdwpIdSizes) -> Result<JdwpValue> {
        let v = match tag {
            b'Z' => JdwpValue::Boolean(self.read_bool()?),
            b'B' => JdwpValue::Byte(self.read_u8()? as i8),
            b'C' => JdwpValue::Char(self.read_u16()?),
            b'S' => JdwpValue::Short(self.read_u16()? as i16),
            b'I' => JdwpValue::Int(self.read_i32()?),
            b'J' => JdwpValue::Long(self.read_i64()?),
            b'F' => JdwpValue::Float(self.read_f32()?),
            b'D' => JdwpValue::Double(self.read_f64()?),
            b'V' => JdwpValue::Void,
            // Every other tag names a reference kind carried as an object id.
            _ => JdwpValue::Object {
                tag,
                id: self.read_object_id(sizes)?,
            },
        };
        Ok(v)
    }

    pub fn read_tagged_value(&mut self, sizes: &JdwpIdSizes) -> Result<JdwpValue> {
        let tag = self.read_u8()?;
        self.read_value(tag, sizes)
    }

    /// An `arrayregion`: one element tag, a count, then untagged values for
    /// primitive arrays or tagged values for reference arrays.
    pub fn read_array_region(&mut self, sizes: &JdwpIdSizes) -> Result<Vec<JdwpValue>> {
        let tag = self.read_u8()?;
        let count = self.read_u32()? as usize;
        let mut values = Vec::with_capacity(count.min(self.remaining()));
        for _ in 0..count {
            if is_primitive_tag(tag) {
                values.push(self.read_value(tag, sizes)?);
            } else {
                values.push(self.read_tagged_value(sizes)?);
            }
        }
        Ok(values)
    }
}

/// Big-endian fixed-width accessors, one writer and one reader method per type.
macro_rules! fixed_width {
    ($($write:ident / $read:ident : $ty:ty),* $(,)?) => {
        impl JdwpWriter {
            $(
                pub fn $write(&mut self, v: $ty) {
                    self.buf.extend_from_slice(&v.to_be_bytes());
                }
            )*
        }

        impl JdwpReader<'_> {
            $(
                pub fn $read(&mut self) -> Result<$ty> {
                    Ok(<$ty>::from_be_bytes(self.take_array()?))
                }
            )*
        }
    };
}

fixed_width! {
    write_u16 / read_u16: u16,
    write_u32 / read_u32: u32,
    write_i32 / read_i32: i32,
    write_u64 / read_u64: u64,
    write_i64 / read_i64: i64,
    write_f32 / read_f32: f32,
    write_f64 / read_f64: f64,
}

pub fn encode_command(id: u32, command_set: u8, command: u8, payload: &[u8]) -> Vec<u8> {
    let length = (HEADER_LEN + payload.len()) as u32;
    let mut out = Vec::with_capacity(length as usize);
    out.extend_from_slice(&length.to_be_bytes());
    out.extend_from_slice(&id.to_be_bytes());
    out.push(0); // flags
    out.push(command_set);
    out.push(command);
    out.extend_from_slice(payload);
    out
}

#[cfg_attr(not(any(test, feature = "test-support")), allow(dead_code))]
pub fn encode_reply(id: u32, error_code: u16, payload: &[u8]) -> Vec<u8> {
    let length = (HEADER_LEN + payload.len()) as u32;
    let mut out = Vec::with_capacity(length as usize);
    out.extend_from_slice(&length.to_be_bytes());
    out.extend_from_slice(&id.to_be_bytes());
    out.push(FLAG_REPLY);
    out.extend_from_slice(&error_code.to_be_bytes());
    out.extend_from_slice(payload);
    out
}
