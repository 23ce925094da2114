//! Capability to bring archive regions into memory
//!
//! The loader only talks to a [`RegionMapper`]: it reserves room for the whole archive, maps the
//! regions one at a time, and hands every region back (then releases the reservation) if anything
//! goes wrong. [`FileMapper`] is the implementation backed by `mmap`.

use crate::cds::archive::{RegionInfo, RegionKind};
use crate::cds::MapError;
use memmap2::{Mmap, MmapOptions};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

/// Bytes of one region, either mapped from the file or copied into memory
pub enum MappedRegion {
    Mapped { kind: RegionKind, map: Mmap },
    Owned { kind: RegionKind, bytes: Vec<u8> },
}

impl MappedRegion {
    pub fn kind(&self) -> RegionKind {
        match self {
            MappedRegion::Mapped { kind, .. } => *kind,
            MappedRegion::Owned { kind, .. } => *kind,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        match self {
            MappedRegion::Mapped { map, .. } => map,
            MappedRegion::Owned { bytes, .. } => bytes,
        }
    }
}

pub trait RegionMapper {
    /// Alignment this process requires of every region
    fn alignment(&self) -> u64;

    /// Size of the archive file
    fn file_len(&mut self) -> Result<u64, MapError>;

    /// First `len` bytes of the archive file
    fn read_header(&mut self, len: usize) -> Result<Vec<u8>, MapError>;

    /// Reserve room for the whole archive
    fn reserve(&mut self, size: u64) -> Result<(), MapError>;

    /// Map one region of the file inside the reservation
    fn map_region(&mut self, kind: RegionKind, info: &RegionInfo)
        -> Result<MappedRegion, MapError>;

    fn unmap_region(&mut self, region: MappedRegion);

    /// Give back the reservation (every region must be unmapped first)
    fn release(&mut self);
}

/// Maps regions straight out of an archive file
pub struct FileMapper {
    file: File,
    alignment: u64,
    reserved: Option<u64>,
}

impl FileMapper {
    pub fn open<P: AsRef<Path>>(path: P, alignment: u64) -> Result<FileMapper, MapError> {
        Ok(FileMapper {
            file: File::open(path)?,
            alignment,
            reserved: None,
        })
    }
}

impl RegionMapper for FileMapper {
    fn alignment(&self) -> u64 {
        self.alignment
    }

    fn file_len(&mut self) -> Result<u64, MapError> {
        Ok(self.file.metadata()?.len())
    }

    fn read_header(&mut self, len: usize) -> Result<Vec<u8>, MapError> {
        let mut header = vec![0; len];
        self.file.seek(SeekFrom::Start(0))?;
        self.file.read_exact(&mut header)?;
        Ok(header)
    }

    fn reserve(&mut self, size: u64) -> Result<(), MapError> {
        if self.reserved.is_some() {
            return Err(MapError::RegionLayout(String::from(
                "archive space is already reserved",
            )));
        }
        if size > self.file_len()? {
            return Err(MapError::Truncated);
        }
        self.reserved = Some(size);
        Ok(())
    }

    fn map_region(
        &mut self,
        kind: RegionKind,
        info: &RegionInfo,
    ) -> Result<MappedRegion, MapError> {
        match self.reserved {
            Some(reserved) if info.end() <= reserved => (),
            _ => {
                return Err(MapError::RegionLayout(format!(
                    "{} region lies outside the reserved space",
                    kind.name()
                )))
            }
        }
        if info.size == 0 {
            return Ok(MappedRegion::Owned {
                kind,
                bytes: vec![],
            });
        }
        let len = usize::try_from(info.size).map_err(|_| MapError::Truncated)?;
        // The file is opened read-only and archives are never rewritten in place
        let map = unsafe {
            MmapOptions::new()
                .offset(info.file_offset)
                .len(len)
                .map(&self.file)?
        };
        Ok(MappedRegion::Mapped { kind, map })
    }

    fn unmap_region(&mut self, region: MappedRegion) {
        drop(region);
    }

    fn release(&mut self) {
        self.reserved = None;
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn maps_inside_reservation_only() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, &[7u8; 8192]).unwrap();

        let mut mapper = FileMapper::open(file.path(), 4096).unwrap();
        assert_eq!(mapper.file_len().unwrap(), 8192);
        assert_eq!(mapper.read_header(4).unwrap(), [7, 7, 7, 7]);

        let info = RegionInfo {
            file_offset: 4096,
            size: 10,
            crc32: 0,
            read_only: true,
        };
        assert!(mapper.map_region(RegionKind::ReadOnly, &info).is_err());
        assert!(matches!(mapper.reserve(1 << 20), Err(MapError::Truncated)));

        mapper.reserve(8192).unwrap();
        let region = mapper.map_region(RegionKind::ReadOnly, &info).unwrap();
        assert_eq!(region.kind(), RegionKind::ReadOnly);
        assert_eq!(region.bytes(), &[7u8; 10][..]);
        mapper.unmap_region(region);
        mapper.release();
    }
}
