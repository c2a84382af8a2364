//! Binary encoding used to move graph state between hosts.
//!
//! Values are written in field order with big-endian primitives; there are
//! no type tags or field names on the wire, so both ends must agree on the
//! type being read.

use std::convert::TryFrom;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::directory::Addr;
use crate::error::{GraphError, Result};
use crate::gptr::Gptr;

pub trait Serializable: Sized {
    fn serialize(&self, s: &mut SerializeBuffer);
    fn deserialize(s: &mut DeserializeBuffer) -> Result<Self>;
}

#[derive(Default)]
pub struct SerializeBuffer {
    buf: BytesMut,
}

impl SerializeBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push<T: Serializable>(&mut self, value: &T) {
        value.serialize(self)
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn freeze(self) -> Bytes {
        self.buf.freeze()
    }
}

pub struct DeserializeBuffer {
    buf: Bytes,
}

impl DeserializeBuffer {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self { buf: bytes.into() }
    }

    pub fn pull<T: Serializable>(&mut self) -> Result<T> {
        T::deserialize(self)
    }

    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    fn need(&self, needed: usize) -> Result<()> {
        let remaining = self.buf.remaining();
        if remaining < needed {
            return Err(GraphError::Truncated { needed, remaining });
        }
        Ok(())
    }

    fn pull_len(&mut self) -> Result<usize> {
        let len = u64::deserialize(self)?;
        usize::try_from(len).map_err(|_| GraphError::Parse(format!("length {} overflows usize", len)))
    }
}

impl From<SerializeBuffer> for DeserializeBuffer {
    fn from(s: SerializeBuffer) -> Self {
        Self::new(s.freeze())
    }
}

macro_rules! primitive {
    ($ty:ty, $put:ident, $get:ident) => {
        impl Serializable for $ty {
            fn serialize(&self, s: &mut SerializeBuffer) {
                s.buf.$put(*self)
            }

            fn deserialize(s: &mut DeserializeBuffer) -> Result<Self> {
                s.need(std::mem::size_of::<$ty>())?;
                Ok(s.buf.$get())
            }
        }
    };
}

primitive!(u8, put_u8, get_u8);
primitive!(u32, put_u32, get_u32);
primitive!(u64, put_u64, get_u64);
primitive!(i64, put_i64, get_i64);
primitive!(f32, put_f32, get_f32);
primitive!(f64, put_f64, get_f64);

impl Serializable for () {
    fn serialize(&self, _: &mut SerializeBuffer) {}

    fn deserialize(_: &mut DeserializeBuffer) -> Result<Self> {
        Ok(())
    }
}

impl Serializable for bool {
    fn serialize(&self, s: &mut SerializeBuffer) {
        s.buf.put_u8(*self as u8)
    }

    fn deserialize(s: &mut DeserializeBuffer) -> Result<Self> {
        match u8::deserialize(s)? {
            0 => Ok(false),
            1 => Ok(true),
            tag => Err(GraphError::InvalidTag { what: "bool", tag }),
        }
    }
}

impl Serializable for usize {
    fn serialize(&self, s: &mut SerializeBuffer) {
        s.buf.put_u64(*self as u64)
    }

    fn deserialize(s: &mut DeserializeBuffer) -> Result<Self> {
        s.pull_len()
    }
}

impl Serializable for String {
    fn serialize(&self, s: &mut SerializeBuffer) {
        s.buf.put_u64(self.len() as u64);
        s.buf.put_slice(self.as_bytes());
    }

    fn deserialize(s: &mut DeserializeBuffer) -> Result<Self> {
        let len = s.pull_len()?;
        s.need(len)?;
        let bytes = s.buf.split_to(len);
        Ok(std::str::from_utf8(&bytes)?.to_owned())
    }
}

impl<T: Serializable> Serializable for Vec<T> {
    fn serialize(&self, s: &mut SerializeBuffer) {
        s.buf.put_u64(self.len() as u64);
        for item in self {
            item.serialize(s);
        }
    }

    fn deserialize(s: &mut DeserializeBuffer) -> Result<Self> {
        let len = s.pull_len()?;
        // the length is untrusted; don't let it drive the allocation
        let mut items = Vec::with_capacity(len.min(s.remaining()));
        for _ in 0..len {
            items.push(T::deserialize(s)?);
        }
        Ok(items)
    }
}

impl<T: Serializable> Serializable for Option<T> {
    fn serialize(&self, s: &mut SerializeBuffer) {
        match self {
            None => s.buf.put_u8(0),
            Some(value) => {
                s.buf.put_u8(1);
                value.serialize(s);
            }
        }
    }

    fn deserialize(s: &mut DeserializeBuffer) -> Result<Self> {
        match u8::deserialize(s)? {
            0 => Ok(None),
            1 => Ok(Some(T::deserialize(s)?)),
            tag => Err(GraphError::InvalidTag { what: "option", tag }),
        }
    }
}

impl<T> Serializable for Gptr<T> {
    fn serialize(&self, s: &mut SerializeBuffer) {
        match self.addr() {
            None => s.buf.put_u8(0),
            Some(addr) => {
                s.buf.put_u8(1);
                s.buf.put_u32(addr.host);
                s.buf.put_u32(addr.worker);
                s.buf.put_u32(addr.slot);
            }
        }
    }

    fn deserialize(s: &mut DeserializeBuffer) -> Result<Self> {
        match u8::deserialize(s)? {
            0 => Ok(Gptr::null()),
            1 => {
                let host = u32::deserialize(s)?;
                let worker = u32::deserialize(s)?;
                let slot = u32::deserialize(s)?;
                Ok(Gptr::from_addr(Addr { host, worker, slot }))
            }
            tag => Err(GraphError::InvalidTag { what: "handle", tag }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_keep_their_address() {
        let h: Gptr<u32> = Gptr::from_addr(Addr {
            host: 2,
            worker: 5,
            slot: 77,
        });
        let mut s = SerializeBuffer::new();
        s.push(&h);
        s.push(&Gptr::<u32>::null());
        assert_eq!(s.len(), 1 + 12 + 1);
        let mut d = DeserializeBuffer::from(s);
        assert_eq!(d.pull::<Gptr<u32>>().unwrap(), h);
        assert!(d.pull::<Gptr<u32>>().unwrap().is_null());
        assert_eq!(d.remaining(), 0);
    }

    #[test]
    fn field_order_is_preserved() {
        let mut s = SerializeBuffer::new();
        s.push(&true);
        s.push(&String::from("rank"));
        s.push(&vec![1.5f32, -2.0]);
        let mut d = DeserializeBuffer::from(s);
        assert!(d.pull::<bool>().unwrap());
        assert_eq!(d.pull::<String>().unwrap(), "rank");
        assert_eq!(d.pull::<Vec<f32>>().unwrap(), vec![1.5, -2.0]);
    }

    #[test]
    fn truncated_input_is_an_error() {
        let mut d = DeserializeBuffer::new(vec![0u8, 0, 1]);
        match d.pull::<u32>() {
            Err(GraphError::Truncated { needed, remaining }) => {
                assert_eq!((needed, remaining), (4, 3));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn bad_tags_are_rejected() {
        let mut d = DeserializeBuffer::new(vec![9u8]);
        assert!(matches!(
            d.pull::<Gptr<u32>>(),
            Err(GraphError::InvalidTag { what: "handle", tag: 9 })
        ));
        let mut d = DeserializeBuffer::new(vec![2u8]);
        assert!(matches!(d.pull::<bool>(), Err(GraphError::InvalidTag { .. })));
    }

    #[test]
    fn oversized_vec_length_fails_without_allocating() {
        let mut s = SerializeBuffer::new();
        s.push(&(u64::MAX / 2));
        let mut d = DeserializeBuffer::from(s);
        assert!(d.pull::<Vec<u64>>().is_err());
    }
}
