use crate::cds::MapError;
use bitflags::bitflags;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Result};

/// Regions of an archive, in file order
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum RegionKind {
    /// Class, method, and field records
    ReadOnly,

    /// Per-class state which the runtime updates after mapping
    ReadWrite,

    /// Symbol table, shared dictionary, and the other tables (a tagged stream)
    MiscData,

    /// Table of metadata kinds, checked against the process's own before any record is used
    MiscCode,
}

impl RegionKind {
    pub const ALL: [RegionKind; 4] = [
        RegionKind::ReadOnly,
        RegionKind::ReadWrite,
        RegionKind::MiscData,
        RegionKind::MiscCode,
    ];

    pub const fn name(&self) -> &'static str {
        match self {
            RegionKind::ReadOnly => "ro",
            RegionKind::ReadWrite => "rw",
            RegionKind::MiscData => "md",
            RegionKind::MiscCode => "mc",
        }
    }

    pub const fn index(&self) -> usize {
        match self {
            RegionKind::ReadOnly => 0,
            RegionKind::ReadWrite => 1,
            RegionKind::MiscData => 2,
            RegionKind::MiscCode => 3,
        }
    }

    pub const fn read_only(&self) -> bool {
        !matches!(self, RegionKind::ReadWrite)
    }
}

bitflags! {
    /// Summary of the settings an archive was dumped under
    pub struct HeaderFlags: u32 {
        const VERIFY_LOCAL = 0x0001;
        const VERIFY_REMOTE = 0x0002;

        /// Some classes came from the platform class path
        const HAS_PLATFORM = 0x0004;

        /// Some classes came from the app class path
        const HAS_APP = 0x0008;

        /// Some classes were archived for custom loaders
        const HAS_UNREGISTERED = 0x0010;

        /// Loader hashes were recorded
        const EXTENDED = 0x0020;
    }
}

/// Location of one region in the file
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
pub struct RegionInfo {
    pub file_offset: u64,
    pub size: u64,
    pub crc32: u32,
    pub read_only: bool,
}

impl RegionInfo {
    pub const fn end(&self) -> u64 {
        self.file_offset.saturating_add(self.size)
    }
}

/// Fixed-size header at the start of an archive file (little-endian)
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct FileHeader {
    pub magic: u32,
    pub version: u32,
    pub header_size: u32,
    pub header_crc32: u32,
    pub alignment: u64,
    pub flags: HeaderFlags,

    /// Size of the whole file, header included
    pub total_size: u64,
    pub regions: [RegionInfo; 4],
}

impl FileHeader {
    pub const MAGIC: u32 = 0xf00b_aba2;
    pub const CURRENT_VERSION: u32 = 1;

    /// Serialized size of the header
    pub const SIZE: u32 = 4 + 4 + 4 + 4 + 8 + 4 + 8 + 4 * (8 + 8 + 4 + 4);

    /// Header with placeholder region information
    pub fn new(alignment: u64, flags: HeaderFlags) -> FileHeader {
        FileHeader {
            magic: FileHeader::MAGIC,
            version: FileHeader::CURRENT_VERSION,
            header_size: FileHeader::SIZE,
            header_crc32: 0,
            alignment,
            flags,
            total_size: 0,
            regions: [RegionInfo::default(); 4],
        }
    }

    pub fn region(&self, kind: RegionKind) -> &RegionInfo {
        &self.regions[kind.index()]
    }

    pub fn write_to<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        writer.write_u32::<LittleEndian>(self.magic)?;
        writer.write_u32::<LittleEndian>(self.version)?;
        writer.write_u32::<LittleEndian>(self.header_size)?;
        writer.write_u32::<LittleEndian>(self.header_crc32)?;
        writer.write_u64::<LittleEndian>(self.alignment)?;
        writer.write_u32::<LittleEndian>(self.flags.bits())?;
        writer.write_u64::<LittleEndian>(self.total_size)?;
        for region in &self.regions {
            writer.write_u64::<LittleEndian>(region.file_offset)?;
            writer.write_u64::<LittleEndian>(region.size)?;
            writer.write_u32::<LittleEndian>(region.crc32)?;
            writer.write_u8(region.read_only as u8)?;
            writer.write_all(&[0; 3])?;
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(FileHeader::SIZE as usize);
        // Writing to a `Vec` cannot fail
        let _ = self.write_to(&mut bytes);
        bytes
    }

    /// Checksum of the header, taken with the checksum field zeroed
    pub fn compute_crc32(&self) -> u32 {
        let mut zeroed = self.clone();
        zeroed.header_crc32 = 0;
        crc32fast::hash(&zeroed.to_bytes())
    }

    /// Parse and sanity check a header (magic, version, checksum)
    pub fn parse(bytes: &[u8]) -> std::result::Result<FileHeader, MapError> {
        let mut reader = Cursor::new(bytes);
        let magic = reader.read_u32::<LittleEndian>()?;
        if magic != FileHeader::MAGIC {
            return Err(MapError::BadMagic(magic));
        }
        let version = reader.read_u32::<LittleEndian>()?;
        if version != FileHeader::CURRENT_VERSION {
            return Err(MapError::UnsupportedVersion(version));
        }
        let header_size = reader.read_u32::<LittleEndian>()?;
        if header_size != FileHeader::SIZE {
            return Err(MapError::Corrupt(format!("header size {}", header_size)));
        }
        let header_crc32 = reader.read_u32::<LittleEndian>()?;
        let alignment = reader.read_u64::<LittleEndian>()?;
        let flags = HeaderFlags::from_bits_truncate(reader.read_u32::<LittleEndian>()?);
        let total_size = reader.read_u64::<LittleEndian>()?;
        let mut regions = [RegionInfo::default(); 4];
        for region in &mut regions {
            region.file_offset = reader.read_u64::<LittleEndian>()?;
            region.size = reader.read_u64::<LittleEndian>()?;
            region.crc32 = reader.read_u32::<LittleEndian>()?;
            region.read_only = reader.read_u8()? != 0;
            let mut padding = [0; 3];
            std::io::Read::read_exact(&mut reader, &mut padding)?;
        }

        let header = FileHeader {
            magic,
            version,
            header_size,
            header_crc32,
            alignment,
            flags,
            total_size,
            regions,
        };
        if header.compute_crc32() != header_crc32 {
            return Err(MapError::HeaderChecksum);
        }
        Ok(header)
    }

    /// Check that regions are aligned, in order, non-overlapping, and inside the file
    pub fn validate_layout(&self, file_len: u64) -> std::result::Result<(), MapError> {
        if self.total_size != file_len {
            return Err(MapError::RegionLayout(format!(
                "header records {} bytes but the file has {}",
                self.total_size, file_len
            )));
        }
        let mut previous_end = self.header_size as u64;
        for kind in RegionKind::ALL {
            let region = self.region(kind);
            if self.alignment == 0 || region.file_offset % self.alignment != 0 {
                return Err(MapError::RegionLayout(format!(
                    "{} region at {} is not aligned to {}",
                    kind.name(),
                    region.file_offset,
                    self.alignment
                )));
            }
            let end = region.file_offset.checked_add(region.size).ok_or_else(|| {
                MapError::RegionLayout(format!(
                    "{} region at {} with {} bytes overflows",
                    kind.name(),
                    region.file_offset,
                    region.size
                ))
            })?;
            if region.file_offset < previous_end || end > self.total_size {
                return Err(MapError::RegionLayout(format!(
                    "{} region [{}, {}) is out of place",
                    kind.name(),
                    region.file_offset,
                    end
                )));
            }
            if region.read_only != kind.read_only() {
                return Err(MapError::RegionLayout(format!(
                    "{} region has the wrong protection",
                    kind.name()
                )));
            }
            previous_end = end;
        }
        Ok(())
    }
}

/// Round `offset` up to a multiple of `alignment`
pub const fn align_up(offset: u64, alignment: u64) -> u64 {
    (offset + alignment - 1) / alignment * alignment
}

#[cfg(test)]
mod test {
    use super::*;

    fn sample() -> FileHeader {
        let mut header = FileHeader::new(4096, HeaderFlags::VERIFY_REMOTE);
        let mut offset = 4096;
        for kind in RegionKind::ALL {
            header.regions[kind.index()] = RegionInfo {
                file_offset: offset,
                size: 100,
                crc32: 0xdead_beef,
                read_only: kind.read_only(),
            };
            offset += 4096;
        }
        header.total_size = offset - 4096 + 100;
        header.header_crc32 = header.compute_crc32();
        header
    }

    #[test]
    fn header_parses_back() {
        let header = sample();
        let bytes = header.to_bytes();
        assert_eq!(bytes.len(), FileHeader::SIZE as usize);
        assert_eq!(FileHeader::parse(&bytes).unwrap(), header);
        header.validate_layout(header.total_size).unwrap();
    }

    #[test]
    fn header_checksum_detects_flips() {
        let mut bytes = sample().to_bytes();
        bytes[40] ^= 0x01;
        assert!(matches!(
            FileHeader::parse(&bytes),
            Err(MapError::HeaderChecksum)
        ));
        assert!(matches!(
            FileHeader::parse(&bytes[..20]),
            Err(MapError::Truncated)
        ));
    }

    #[test]
    fn misaligned_region_rejected() {
        let mut header = sample();
        header.regions[2].file_offset += 8;
        assert!(matches!(
            header.validate_layout(header.total_size),
            Err(MapError::RegionLayout(_))
        ));
    }

    #[test]
    fn overflowing_region_rejected() {
        let mut header = sample();
        header.regions[0].size = u64::MAX - 100;
        header.header_crc32 = header.compute_crc32();
        let header = FileHeader::parse(&header.to_bytes()).unwrap();
        assert!(matches!(
            header.validate_layout(header.total_size),
            Err(MapError::RegionLayout(_))
        ));
    }

    #[test]
    fn rounding() {
        assert_eq!(align_up(0, 4096), 0);
        assert_eq!(align_up(1, 4096), 4096);
        assert_eq!(align_up(4096, 4096), 4096);
        assert_eq!(align_up(133, 8), 136);
    }
}
