use std::sync::Arc;

use indexmap::IndexMap;

use crate::{
    byte_buffer::ByteBuffer,
    error::{CoreError, CoreResult},
    flatten::{DataFlattener, DataUnflattener, Endian},
    geom::{Point, Rect},
};

/// `'PM00'`, the only protocol version this implementation accepts.
pub const PROTOCOL_VERSION: u32 = 1_347_235_888;

const fn pack_code(s: &[u8; 4]) -> u32 {
    ((s[0] as u32) << 24) | ((s[1] as u32) << 16) | ((s[2] as u32) << 8) | (s[3] as u32)
}

/// Type code of a Message field, matching the four-character-code convention of the
/// wire format this crate interoperates with.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum FieldType {
    Bool = pack_code(b"BOOL"),
    Int8 = pack_code(b"BYTE"),
    Int16 = pack_code(b"SHRT"),
    Int32 = pack_code(b"LONG"),
    Int64 = pack_code(b"LLNG"),
    Float = pack_code(b"FLOT"),
    Double = pack_code(b"DBLE"),
    Point = pack_code(b"BPNT"),
    Rect = pack_code(b"RECT"),
    String = pack_code(b"STR "),
    Raw = pack_code(b"RAWT"),
    Message = pack_code(b"MSGG"),
    /// never flattened; process-local only
    Pointer = pack_code(b"PNTR"),
}

impl FieldType {
    pub fn code(self) -> u32 {
        self as u32
    }

    pub fn from_code(code: u32) -> Option<Self> {
        use FieldType::*;
        [Bool, Int8, Int16, Int32, Int64, Float, Double, Point, Rect, String, Raw, Message, Pointer]
            .into_iter()
            .find(|t| t.code() == code)
    }

    /// True for types whose per-item encoding has no length prefix.
    pub fn is_fixed_size(self) -> bool {
        !matches!(self, FieldType::String | FieldType::Raw | FieldType::Message)
    }
}

/// One field's worth of values. Every variant is a reference-counted slice so that
/// cloning a Message (e.g. to embed it in another Message) is cheap for large fields,
/// and so that a field transparently "becomes an array" the moment a second value is
/// added -- there is no separate single-value representation to migrate out of.
#[derive(Clone, Debug)]
pub enum FieldValue {
    Bool(Arc<[bool]>),
    Int8(Arc<[i8]>),
    Int16(Arc<[i16]>),
    Int32(Arc<[i32]>),
    Int64(Arc<[i64]>),
    Float(Arc<[f32]>),
    Double(Arc<[f64]>),
    Point(Arc<[Point]>),
    Rect(Arc<[Rect]>),
    String(Arc<[String]>),
    Raw(Arc<[Vec<u8>]>),
    Message(Arc<[Message]>),
    Pointer(Arc<[usize]>),
}

impl FieldValue {
    pub fn field_type(&self) -> FieldType {
        match self {
            FieldValue::Bool(_) => FieldType::Bool,
            FieldValue::Int8(_) => FieldType::Int8,
            FieldValue::Int16(_) => FieldType::Int16,
            FieldValue::Int32(_) => FieldType::Int32,
            FieldValue::Int64(_) => FieldType::Int64,
            FieldValue::Float(_) => FieldType::Float,
            FieldValue::Double(_) => FieldType::Double,
            FieldValue::Point(_) => FieldType::Point,
            FieldValue::Rect(_) => FieldType::Rect,
            FieldValue::String(_) => FieldType::String,
            FieldValue::Raw(_) => FieldType::Raw,
            FieldValue::Message(_) => FieldType::Message,
            FieldValue::Pointer(_) => FieldType::Pointer,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            FieldValue::Bool(v) => v.len(),
            FieldValue::Int8(v) => v.len(),
            FieldValue::Int16(v) => v.len(),
            FieldValue::Int32(v) => v.len(),
            FieldValue::Int64(v) => v.len(),
            FieldValue::Float(v) => v.len(),
            FieldValue::Double(v) => v.len(),
            FieldValue::Point(v) => v.len(),
            FieldValue::Rect(v) => v.len(),
            FieldValue::String(v) => v.len(),
            FieldValue::Raw(v) => v.len(),
            FieldValue::Message(v) => v.len(),
            FieldValue::Pointer(v) => v.len(),
        }
    }
}

/// A hierarchical, self-describing typed record: a 32-bit `what` code plus an
/// insertion-ordered name -> field map. See the crate-level docs for the wire format.
#[derive(Clone, Debug, Default)]
pub struct Message {
    what: u32,
    fields: IndexMap<String, FieldValue>,
}

macro_rules! accessor {
    ($add_name:ident, $find_name:ident, $variant:ident, $item:ty) => {
        pub fn $add_name(&mut self, name: impl Into<String>, value: $item) -> CoreResult<()> {
            self.add_value(name.into(), FieldValue::$variant(Arc::from(vec![value])))
        }

        pub fn $find_name(&self, name: &str) -> Option<$item>
        where
            $item: Clone,
        {
            match self.fields.get(name)? {
                FieldValue::$variant(v) => v.first().cloned(),
                _ => None,
            }
        }
    };
}

impl Message {
    pub fn new(what: u32) -> Self {
        Self { what, fields: IndexMap::new() }
    }

    pub fn what(&self) -> u32 {
        self.what
    }

    pub fn set_what(&mut self, what: u32) {
        self.what = what;
    }

    /// In-memory field count, including any `Pointer` fields (which are never
    /// serialized and so are excluded from the wire `num_fields` count).
    pub fn num_fields(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn remove_field(&mut self, name: &str) -> Option<FieldValue> {
        self.fields.shift_remove(name)
    }

    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    /// Adds one value to `name`, appending to the existing field if its type matches,
    /// or creating a new single-valued field otherwise.
    fn add_value(&mut self, name: String, value: FieldValue) -> CoreResult<()> {
        match self.fields.get_mut(&name) {
            Some(existing) => {
                if existing.field_type() != value.field_type() {
                    return Err(CoreError::BadArgument(format!(
                        "field '{name}' already holds type {:?}, cannot add {:?}",
                        existing.field_type(),
                        value.field_type()
                    )));
                }
                merge_field(existing, value);
            }
            None => {
                self.fields.insert(name, value);
            }
        }
        Ok(())
    }

    accessor!(add_bool, find_bool, Bool, bool);
    accessor!(add_int8, find_int8, Int8, i8);
    accessor!(add_int16, find_int16, Int16, i16);
    accessor!(add_int32, find_int32, Int32, i32);
    accessor!(add_int64, find_int64, Int64, i64);
    accessor!(add_float, find_float, Float, f32);
    accessor!(add_double, find_double, Double, f64);
    accessor!(add_point, find_point, Point, Point);
    accessor!(add_rect, find_rect, Rect, Rect);

    pub fn add_string(&mut self, name: impl Into<String>, value: impl Into<String>) -> CoreResult<()> {
        self.add_value(name.into(), FieldValue::String(Arc::from(vec![value.into()])))
    }

    pub fn find_string(&self, name: &str) -> Option<&str> {
        match self.fields.get(name)? {
            FieldValue::String(v) => v.first().map(String::as_str),
            _ => None,
        }
    }

    pub fn add_raw(&mut self, name: impl Into<String>, value: Vec<u8>) -> CoreResult<()> {
        self.add_value(name.into(), FieldValue::Raw(Arc::from(vec![value])))
    }

    pub fn find_raw(&self, name: &str) -> Option<&[u8]> {
        match self.fields.get(name)? {
            FieldValue::Raw(v) => v.first().map(Vec::as_slice),
            _ => None,
        }
    }

    pub fn add_message(&mut self, name: impl Into<String>, value: Message) -> CoreResult<()> {
        self.add_value(name.into(), FieldValue::Message(Arc::from(vec![value])))
    }

    pub fn find_message(&self, name: &str) -> Option<&Message> {
        match self.fields.get(name)? {
            FieldValue::Message(v) => v.first(),
            _ => None,
        }
    }

    /// Pointer fields are process-local and are never flattened.
    pub fn add_pointer(&mut self, name: impl Into<String>, value: usize) -> CoreResult<()> {
        self.add_value(name.into(), FieldValue::Pointer(Arc::from(vec![value])))
    }

    pub fn find_pointer(&self, name: &str) -> Option<usize> {
        match self.fields.get(name)? {
            FieldValue::Pointer(v) => v.first().copied(),
            _ => None,
        }
    }

    /// A stable content checksum: the sum of each field's name, type, and payload
    /// contribution. Not part of the wire format; useful for detecting accidental
    /// mutation or for coarse equality checks without a full `Flatten`.
    pub fn checksum(&self) -> u32 {
        let mut sum: u32 = self.what;
        for (name, value) in &self.fields {
            if matches!(value, FieldValue::Pointer(_)) {
                continue;
            }
            sum = sum.wrapping_add(name.bytes().fold(0u32, |a, b| a.wrapping_add(b as u32)));
            sum = sum.wrapping_add(value.field_type().code());
            sum = sum.wrapping_add(field_checksum(value));
        }
        sum
    }

    /// Serializes this Message to its wire format (§4.3): a 12-byte header followed by
    /// one `{name, type, payload}` entry per flattenable field, in insertion order.
    pub fn flatten(&self) -> CoreResult<ByteBuffer> {
        let mut f = DataFlattener::new(Endian::Little);
        f.write_u32(PROTOCOL_VERSION);
        f.write_u32(self.what);

        let flattenable: Vec<_> =
            self.fields.iter().filter(|(_, v)| !matches!(v, FieldValue::Pointer(_))).collect();
        f.write_u32(flattenable.len() as u32);

        for (name, value) in flattenable {
            f.write_u32((name.len() + 1) as u32);
            f.write_cstring(name);
            f.write_u32(value.field_type().code());

            let payload_len_pos = f.current_write_pointer();
            f.write_u32(0); // patched below
            let payload_start = f.current_write_pointer();
            write_field_payload(&mut f, value)?;
            let payload_len = (f.current_write_pointer() - payload_start) as u32;
            f.patch_u32_at(payload_len_pos, payload_len);
        }

        Ok(ByteBuffer::adopt_buffer(f.into_bytes()?))
    }

    /// Parses a Message from its wire format. Any truncation, unsupported protocol
    /// version, or length that overflows its enclosing payload yields `BadData`.
    pub fn unflatten(bytes: &[u8]) -> CoreResult<Message> {
        let mut u = DataUnflattener::new(bytes, Endian::Little);
        let version = u.read_u32();
        u.status()?;
        if version != PROTOCOL_VERSION {
            return Err(CoreError::BadData(format!("unsupported protocol version {version:#x}")));
        }
        let what = u.read_u32();
        let num_fields = u.read_u32();
        u.status()?;

        let mut msg = Message::new(what);
        for _ in 0..num_fields {
            let name_len = u.read_u32() as usize;
            if name_len == 0 {
                return Err(CoreError::BadData("zero-length field name".into()));
            }
            let name_bytes = u.read_bytes(name_len);
            u.status()?;
            let name = std::str::from_utf8(
                name_bytes.strip_suffix(&[0]).unwrap_or(name_bytes),
            )
            .map_err(|e| CoreError::BadData(format!("invalid utf8 field name: {e}")))?
            .to_owned();

            let type_code = u.read_u32();
            let data_len = u.read_u32() as usize;
            u.status()?;
            if u.remaining() < data_len {
                return Err(CoreError::BadData(format!(
                    "field '{name}' claims {data_len} bytes, only {} remain",
                    u.remaining()
                )));
            }
            let field_type = FieldType::from_code(type_code)
                .ok_or_else(|| CoreError::BadData(format!("unknown type code {type_code:#x}")))?;
            let payload = u.read_bytes(data_len);
            let value = read_field_payload(field_type, payload)?;
            msg.fields.insert(name, value);
        }
        Ok(msg)
    }
}

fn merge_field(existing: &mut FieldValue, incoming: FieldValue) {
    macro_rules! merge_arm {
        ($variant:ident) => {
            if let (FieldValue::$variant(a), FieldValue::$variant(b)) = (&existing, &incoming) {
                let merged: Vec<_> = a.iter().cloned().chain(b.iter().cloned()).collect();
                *existing = FieldValue::$variant(Arc::from(merged));
                return;
            }
        };
    }
    merge_arm!(Bool);
    merge_arm!(Int8);
    merge_arm!(Int16);
    merge_arm!(Int32);
    merge_arm!(Int64);
    merge_arm!(Float);
    merge_arm!(Double);
    merge_arm!(Point);
    merge_arm!(Rect);
    merge_arm!(String);
    merge_arm!(Raw);
    merge_arm!(Message);
    merge_arm!(Pointer);
}

fn field_checksum(value: &FieldValue) -> u32 {
    match value {
        FieldValue::Bool(v) => v.iter().fold(0u32, |a, &b| a.wrapping_add(u32::from(b))),
        FieldValue::Int8(v) => v.iter().fold(0u32, |a, &b| a.wrapping_add(b as u32)),
        FieldValue::Int16(v) => v.iter().fold(0u32, |a, &b| a.wrapping_add(b as u32)),
        FieldValue::Int32(v) => v.iter().fold(0u32, |a, &b| a.wrapping_add(b as u32)),
        FieldValue::Int64(v) => v.iter().fold(0u32, |a, &b| a.wrapping_add(b as u32)),
        FieldValue::Float(v) => v.iter().fold(0u32, |a, &b| a.wrapping_add(b.to_bits())),
        FieldValue::Double(v) => v.iter().fold(0u32, |a, &b| a.wrapping_add(b.to_bits() as u32)),
        FieldValue::Point(v) => {
            v.iter().fold(0u32, |a, p| a.wrapping_add(p.x.to_bits()).wrapping_add(p.y.to_bits()))
        }
        FieldValue::Rect(v) => v.iter().fold(0u32, |a, r| {
            a.wrapping_add(r.left.to_bits())
                .wrapping_add(r.top.to_bits())
                .wrapping_add(r.right.to_bits())
                .wrapping_add(r.bottom.to_bits())
        }),
        FieldValue::String(v) => v.iter().fold(0u32, |a, s| {
            a.wrapping_add(s.bytes().fold(0u32, |a2, b| a2.wrapping_add(b as u32)))
        }),
        FieldValue::Raw(v) => v.iter().fold(0u32, |a, b| {
            a.wrapping_add(b.iter().fold(0u32, |a2, &x| a2.wrapping_add(x as u32)))
        }),
        FieldValue::Message(v) => v.iter().fold(0u32, |a, m| a.wrapping_add(m.checksum())),
        FieldValue::Pointer(_) => 0,
    }
}

fn write_field_payload(f: &mut DataFlattener, value: &FieldValue) -> CoreResult<()> {
    match value {
        FieldValue::Bool(v) => v.iter().for_each(|&x| f.write_bool(x)),
        FieldValue::Int8(v) => v.iter().for_each(|&x| f.write_i8(x)),
        FieldValue::Int16(v) => v.iter().for_each(|&x| f.write_i16(x)),
        FieldValue::Int32(v) => v.iter().for_each(|&x| f.write_i32(x)),
        FieldValue::Int64(v) => v.iter().for_each(|&x| f.write_i64(x)),
        FieldValue::Float(v) => v.iter().for_each(|&x| f.write_f32(x)),
        FieldValue::Double(v) => v.iter().for_each(|&x| f.write_f64(x)),
        FieldValue::Point(v) => v.iter().for_each(|p| {
            f.write_f32(p.x);
            f.write_f32(p.y);
        }),
        FieldValue::Rect(v) => v.iter().for_each(|r| {
            f.write_f32(r.left);
            f.write_f32(r.top);
            f.write_f32(r.right);
            f.write_f32(r.bottom);
        }),
        FieldValue::String(v) => {
            f.write_u32(v.len() as u32);
            for s in v.iter() {
                f.write_u32((s.len() + 1) as u32);
                f.write_cstring(s);
            }
        }
        FieldValue::Raw(v) => {
            f.write_u32(v.len() as u32);
            for chunk in v.iter() {
                f.write_u32(chunk.len() as u32);
                f.write_bytes(chunk);
            }
        }
        FieldValue::Message(v) => {
            for sub in v.iter() {
                let flat = sub.flatten()?;
                f.write_u32(flat.num_bytes() as u32);
                f.write_bytes(flat.as_slice());
            }
        }
        FieldValue::Pointer(_) => {
            return Err(CoreError::BadObject("pointer fields cannot be flattened".into()));
        }
    }
    Ok(())
}

fn read_field_payload(field_type: FieldType, payload: &[u8]) -> CoreResult<FieldValue> {
    let mut u = DataUnflattener::new(payload, Endian::Little);
    let value = match field_type {
        FieldType::Bool => {
            let n = payload.len();
            FieldValue::Bool(Arc::from((0..n).map(|_| u.read_bool()).collect::<Vec<_>>()))
        }
        FieldType::Int8 => {
            FieldValue::Int8(Arc::from((0..payload.len()).map(|_| u.read_i8()).collect::<Vec<_>>()))
        }
        FieldType::Int16 => FieldValue::Int16(Arc::from(
            (0..payload.len() / 2).map(|_| u.read_i16()).collect::<Vec<_>>(),
        )),
        FieldType::Int32 => FieldValue::Int32(Arc::from(
            (0..payload.len() / 4).map(|_| u.read_i32()).collect::<Vec<_>>(),
        )),
        FieldType::Int64 => FieldValue::Int64(Arc::from(
            (0..payload.len() / 8).map(|_| u.read_i64()).collect::<Vec<_>>(),
        )),
        FieldType::Float => FieldValue::Float(Arc::from(
            (0..payload.len() / 4).map(|_| u.read_f32()).collect::<Vec<_>>(),
        )),
        FieldType::Double => FieldValue::Double(Arc::from(
            (0..payload.len() / 8).map(|_| u.read_f64()).collect::<Vec<_>>(),
        )),
        FieldType::Point => FieldValue::Point(Arc::from(
            (0..payload.len() / 8).map(|_| Point::new(u.read_f32(), u.read_f32())).collect::<Vec<_>>(),
        )),
        FieldType::Rect => FieldValue::Rect(Arc::from(
            (0..payload.len() / 16)
                .map(|_| Rect::new(u.read_f32(), u.read_f32(), u.read_f32(), u.read_f32()))
                .collect::<Vec<_>>(),
        )),
        FieldType::String => {
            let num_items = u.read_u32();
            let mut items = Vec::with_capacity(num_items as usize);
            for _ in 0..num_items {
                items.push(u.read_string()?);
            }
            FieldValue::String(Arc::from(items))
        }
        FieldType::Raw => {
            let num_items = u.read_u32();
            let mut items = Vec::with_capacity(num_items as usize);
            for _ in 0..num_items {
                let len = u.read_u32() as usize;
                if u.remaining() < len {
                    return Err(CoreError::BadData("raw chunk overflows field payload".into()));
                }
                items.push(u.read_bytes(len).to_vec());
            }
            FieldValue::Raw(Arc::from(items))
        }
        FieldType::Message => {
            let mut items = Vec::new();
            while u.remaining() > 0 {
                let sub_len = u.read_u32() as usize;
                if u.remaining() < sub_len {
                    return Err(CoreError::BadData("sub-message overflows field payload".into()));
                }
                let sub_bytes = u.read_bytes(sub_len);
                items.push(Message::unflatten(sub_bytes)?);
            }
            FieldValue::Message(Arc::from(items))
        }
        FieldType::Pointer => {
            return Err(CoreError::BadData("pointer fields cannot appear on the wire".into()));
        }
    };
    u.status()?;
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flatten_unflatten_round_trip() {
        let mut msg = Message::new(0x1234_5678);
        msg.add_int32("count", 7).unwrap();
        msg.add_int32("count", 8).unwrap();
        msg.add_string("name", "telegraph").unwrap();
        msg.add_bool("flag", true).unwrap();
        let mut sub = Message::new(1);
        sub.add_string("inner", "value").unwrap();
        msg.add_message("child", sub).unwrap();

        let flat = msg.flatten().unwrap();
        let parsed = Message::unflatten(flat.as_slice()).unwrap();

        assert_eq!(parsed.what(), 0x1234_5678);
        assert_eq!(parsed.find_string("name"), Some("telegraph"));
        assert_eq!(parsed.find_bool("flag"), Some(true));
        assert_eq!(parsed.find_message("child").unwrap().find_string("inner"), Some("value"));
        match parsed.field("count").unwrap() {
            FieldValue::Int32(v) => assert_eq!(&**v, &[7, 8]),
            _ => panic!("wrong type"),
        }
        assert_eq!(parsed.checksum(), msg.checksum());
    }

    #[test]
    fn pointer_fields_are_excluded_from_wire_count() {
        let mut msg = Message::new(1);
        msg.add_pointer("p", 0xdead).unwrap();
        msg.add_int32("x", 1).unwrap();
        assert_eq!(msg.num_fields(), 2);
        let flat = msg.flatten().unwrap();
        let parsed = Message::unflatten(flat.as_slice()).unwrap();
        assert_eq!(parsed.num_fields(), 1);
        assert!(parsed.find_pointer("p").is_none());
    }

    #[test]
    fn mismatched_field_type_is_rejected() {
        let mut msg = Message::new(1);
        msg.add_int32("x", 1).unwrap();
        assert!(msg.add_string("x", "oops").is_err());
    }

    #[test]
    fn truncated_bytes_fail_to_unflatten() {
        let mut msg = Message::new(1);
        msg.add_int32("x", 1).unwrap();
        let flat = msg.flatten().unwrap();
        let truncated = &flat.as_slice()[..flat.num_bytes() - 2];
        assert!(Message::unflatten(truncated).is_err());
    }

    #[test]
    fn wrong_protocol_version_is_rejected() {
        let mut f = DataFlattener::new(Endian::Little);
        f.write_u32(0xFFFF_FFFF);
        f.write_u32(0);
        f.write_u32(0);
        let bytes = f.into_bytes().unwrap();
        assert!(Message::unflatten(&bytes).is_err());
    }
}
