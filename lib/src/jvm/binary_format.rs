use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::Result;

/// Utility trait for serializing data inside class files
///
/// Java class files have some peculiarities that make it useful to define an extra trait (instead
/// of just using `serde`):
///
///   - tags are always `u8`
///   - when serializing a sequence, the length of the sequence is usually `u16`
///
pub trait Serialize: Sized {
    /// Serialize construct into a binary output stream
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()>;
}

/// Inverse of [`Serialize`], for reading class files back in
pub trait Deserialize: Sized {
    /// Deserialize construct from a binary input stream
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> Result<Self>;
}

macro_rules! big_endian_primitive {
    ($typ:ty, $write:ident, $read:ident) => {
        impl Serialize for $typ {
            fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
                writer.$write::<BigEndian>(*self)
            }
        }

        impl Deserialize for $typ {
            fn deserialize<R: ReadBytesExt>(reader: &mut R) -> Result<Self> {
                reader.$read::<BigEndian>()
            }
        }
    };
}

impl Serialize for u8 {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        writer.write_u8(*self)
    }
}

impl Deserialize for u8 {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> Result<Self> {
        reader.read_u8()
    }
}

big_endian_primitive!(u16, write_u16, read_u16);
big_endian_primitive!(u32, write_u32, read_u32);
big_endian_primitive!(i32, write_i32, read_i32);
big_endian_primitive!(i64, write_i64, read_i64);
big_endian_primitive!(f32, write_f32, read_f32);
big_endian_primitive!(f64, write_f64, read_f64);

/// Size in `u16` is the first thing serialized/deserialized
impl<A: Serialize> Serialize for Vec<A> {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        (self.len() as u16).serialize(writer)?;
        for elem in self {
            elem.serialize(writer)?;
        }
        Ok(())
    }
}

impl<A: Deserialize> Deserialize for Vec<A> {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> Result<Self> {
        let len = u16::deserialize(reader)?;
        (0..len).map(|_| A::deserialize(reader)).collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn vectors_are_u16_prefixed() {
        let mut buffer = vec![];
        vec![1u16, 0x0203].serialize(&mut buffer).unwrap();
        assert_eq!(buffer, [0, 2, 0, 1, 2, 3]);

        let read: Vec<u16> = Vec::deserialize(&mut Cursor::new(&buffer)).unwrap();
        assert_eq!(read, [1, 0x0203]);
    }

    #[test]
    fn truncated_input() {
        let buffer = [0u8, 3, 0, 1];
        assert!(Vec::<u16>::deserialize(&mut Cursor::new(&buffer[..])).is_err());
    }
}
