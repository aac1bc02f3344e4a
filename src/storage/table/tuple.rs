use byteorder::{ByteOrder, LittleEndian};

/// An opaque tuple: the engine core never interprets tuple contents, it only
/// moves them between pages and log records. Wire form is a u32 length
/// prefix followed by the raw bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tuple {
    data: Vec<u8>,
}

/// Size of the length prefix in the serialized form
pub const TUPLE_LENGTH_PREFIX: usize = 4;

impl Tuple {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Total bytes this tuple occupies in serialized form
    pub fn serialized_size(&self) -> usize {
        TUPLE_LENGTH_PREFIX + self.data.len()
    }

    /// Write the length-prefixed form into `buf`, returning the bytes written
    pub fn serialize_into(&self, buf: &mut [u8]) -> usize {
        LittleEndian::write_u32(&mut buf[0..4], self.data.len() as u32);
        buf[4..4 + self.data.len()].copy_from_slice(&self.data);
        self.serialized_size()
    }

    /// Parse a length-prefixed tuple from `buf`. Returns None if the prefix
    /// or body does not fit.
    pub fn deserialize_from(buf: &[u8]) -> Option<Self> {
        if buf.len() < TUPLE_LENGTH_PREFIX {
            return None;
        }
        let len = LittleEndian::read_u32(&buf[0..4]) as usize;
        if buf.len() < TUPLE_LENGTH_PREFIX + len {
            return None;
        }
        Some(Self {
            data: buf[4..4 + len].to_vec(),
        })
    }
}
