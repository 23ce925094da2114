use crate::cds::archive::RegionKind;
use crate::cds::{Error, MapError};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Read};

/// Append-only buffer for one region, bounded by its budget
///
/// Every write checks the remaining capacity first, so a region that would overflow fails the
/// dump instead of being cut short.
pub struct RegionWriter {
    kind: RegionKind,
    capacity: usize,
    bytes: Vec<u8>,
}

impl RegionWriter {
    pub fn new(kind: RegionKind, capacity: usize) -> RegionWriter {
        RegionWriter {
            kind,
            capacity,
            bytes: vec![],
        }
    }

    pub fn kind(&self) -> RegionKind {
        self.kind
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    fn reserve(&mut self, additional: usize) -> Result<(), Error> {
        let needed = self.bytes.len() + additional;
        if needed > self.capacity {
            return Err(Error::RegionOverflow {
                region: self.kind,
                needed,
                capacity: self.capacity,
            });
        }
        Ok(())
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), Error> {
        self.reserve(bytes.len())?;
        self.bytes.extend_from_slice(bytes);
        Ok(())
    }

    pub fn write_u8(&mut self, value: u8) -> Result<(), Error> {
        self.reserve(1)?;
        self.bytes.write_u8(value)?;
        Ok(())
    }

    pub fn write_u16(&mut self, value: u16) -> Result<(), Error> {
        self.reserve(2)?;
        self.bytes.write_u16::<LittleEndian>(value)?;
        Ok(())
    }

    pub fn write_i16(&mut self, value: i16) -> Result<(), Error> {
        self.reserve(2)?;
        self.bytes.write_i16::<LittleEndian>(value)?;
        Ok(())
    }

    pub fn write_u32(&mut self, value: u32) -> Result<(), Error> {
        self.reserve(4)?;
        self.bytes.write_u32::<LittleEndian>(value)?;
        Ok(())
    }

    pub fn write_u64(&mut self, value: u64) -> Result<(), Error> {
        self.reserve(8)?;
        self.bytes.write_u64::<LittleEndian>(value)?;
        Ok(())
    }

    /// Length (`u32`) prefixed blob
    pub fn write_blob(&mut self, bytes: &[u8]) -> Result<(), Error> {
        self.write_u32(bytes.len() as u32)?;
        self.write_bytes(bytes)
    }

    /// Length prefixed UTF-8
    pub fn write_str(&mut self, string: &str) -> Result<(), Error> {
        self.write_blob(string.as_bytes())
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

/// Sequential reader over the bytes of a mapped region
///
/// Running off the end of the region is reported as [`MapError::Truncated`].
pub struct RegionReader<'a> {
    cursor: Cursor<&'a [u8]>,
}

impl<'a> RegionReader<'a> {
    pub fn new(bytes: &'a [u8]) -> RegionReader<'a> {
        RegionReader {
            cursor: Cursor::new(bytes),
        }
    }

    pub fn position(&self) -> u64 {
        self.cursor.position()
    }

    pub fn is_at_end(&self) -> bool {
        self.cursor.position() == self.cursor.get_ref().len() as u64
    }

    pub fn read_u8(&mut self) -> Result<u8, MapError> {
        Ok(self.cursor.read_u8()?)
    }

    pub fn read_u16(&mut self) -> Result<u16, MapError> {
        Ok(self.cursor.read_u16::<LittleEndian>()?)
    }

    pub fn read_i16(&mut self) -> Result<i16, MapError> {
        Ok(self.cursor.read_i16::<LittleEndian>()?)
    }

    pub fn read_u32(&mut self) -> Result<u32, MapError> {
        Ok(self.cursor.read_u32::<LittleEndian>()?)
    }

    pub fn read_u64(&mut self) -> Result<u64, MapError> {
        Ok(self.cursor.read_u64::<LittleEndian>()?)
    }

    /// Read a count, rejecting counts that could not possibly fit in what is left
    pub fn read_count(&mut self, min_element_size: usize) -> Result<usize, MapError> {
        let count = self.read_u32()? as usize;
        let remaining = self.cursor.get_ref().len() as u64 - self.cursor.position();
        if (count.saturating_mul(min_element_size) as u64) > remaining {
            return Err(MapError::Truncated);
        }
        Ok(count)
    }

    pub fn read_blob(&mut self) -> Result<&'a [u8], MapError> {
        let len = self.read_count(1)?;
        let start = self.cursor.position() as usize;
        let bytes: &'a [u8] = *self.cursor.get_ref();
        let blob = &bytes[start..start + len];
        self.cursor.set_position((start + len) as u64);
        Ok(blob)
    }

    pub fn read_str(&mut self) -> Result<&'a str, MapError> {
        let blob = self.read_blob()?;
        std::str::from_utf8(blob).map_err(|err| MapError::Corrupt(err.to_string()))
    }

    pub fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), MapError> {
        Ok(self.cursor.read_exact(buf)?)
    }

    /// Read a tag and check that it is the one the stream should have at this point
    pub fn expect_tag(&mut self, expected: u32) -> Result<(), MapError> {
        let found = self.read_u32()?;
        if found != expected {
            return Err(MapError::BadTag { expected, found });
        }
        Ok(())
    }
}
