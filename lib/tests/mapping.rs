mod common;

use appcds::cds::archive::{
    ArchiveLoader, FileHeader, MappedRegion, RegionInfo, RegionKind, RegionMapper,
};
use appcds::cds::{MapError, MapSettings};
use common::*;
use std::fs;
use std::path::Path;

/// In-memory mapper that counts every reservation and mapping
struct CountingMapper {
    bytes: Vec<u8>,
    alignment: u64,
    reserves: usize,
    releases: usize,
    maps: usize,
    unmaps: usize,
}

impl CountingMapper {
    fn new(bytes: Vec<u8>, alignment: u64) -> CountingMapper {
        CountingMapper {
            bytes,
            alignment,
            reserves: 0,
            releases: 0,
            maps: 0,
            unmaps: 0,
        }
    }

    fn assert_balanced(&self) {
        assert_eq!(self.maps, self.unmaps, "regions left mapped");
        assert_eq!(self.reserves, self.releases, "reservation left behind");
    }
}

impl RegionMapper for CountingMapper {
    fn alignment(&self) -> u64 {
        self.alignment
    }

    fn file_len(&mut self) -> Result<u64, MapError> {
        Ok(self.bytes.len() as u64)
    }

    fn read_header(&mut self, len: usize) -> Result<Vec<u8>, MapError> {
        self.bytes
            .get(..len)
            .map(<[u8]>::to_vec)
            .ok_or(MapError::Truncated)
    }

    fn reserve(&mut self, size: u64) -> Result<(), MapError> {
        if size > self.bytes.len() as u64 {
            return Err(MapError::Truncated);
        }
        self.reserves += 1;
        Ok(())
    }

    fn map_region(
        &mut self,
        kind: RegionKind,
        info: &RegionInfo,
    ) -> Result<MappedRegion, MapError> {
        let bytes = self
            .bytes
            .get(info.file_offset as usize..info.end() as usize)
            .ok_or(MapError::Truncated)?
            .to_vec();
        self.maps += 1;
        Ok(MappedRegion::Owned { kind, bytes })
    }

    fn unmap_region(&mut self, _region: MappedRegion) {
        self.unmaps += 1;
    }

    fn release(&mut self) {
        self.releases += 1;
    }
}

/// A small archive and the settings that accept it
fn archive(root: &Path) -> (Vec<u8>, MapSettings) {
    let jdk = root.join("jdk");
    write_jdk(&jdk);
    let settings = boot_settings(&jdk);
    let path = root.join("app.jsa");
    dump(settings.clone(), "java/lang/String\njava/lang/Throwable\n", &path);
    let map_settings = MapSettings {
        class_paths: settings.class_paths,
        ..MapSettings::default()
    };
    (fs::read(path).unwrap(), map_settings)
}

#[test]
fn intact_archive_maps_and_unmaps() {
    let root = tempfile::tempdir().unwrap();
    let (bytes, settings) = archive(root.path());
    let mut mapper = CountingMapper::new(bytes, settings.alignment);

    let archive = ArchiveLoader::new(settings).map(&mut mapper).unwrap();
    assert_eq!(mapper.maps, RegionKind::ALL.len());
    assert_eq!(mapper.reserves, 1);
    assert!(archive.dictionary().len() > 0);

    archive.unmap(&mut mapper);
    mapper.assert_balanced();
}

#[test]
fn flipped_region_byte_unmaps_everything() {
    let root = tempfile::tempdir().unwrap();
    let (bytes, settings) = archive(root.path());
    let header = FileHeader::parse(&bytes).unwrap();

    for kind in RegionKind::ALL {
        let region = header.region(kind);
        assert!(region.size > 0);
        let mut corrupted = bytes.clone();
        corrupted[(region.file_offset + region.size / 2) as usize] ^= 0x40;

        let mut mapper = CountingMapper::new(corrupted, settings.alignment);
        let result = ArchiveLoader::new(settings.clone()).map(&mut mapper);
        match result {
            Err(MapError::RegionChecksum(bad)) => assert_eq!(bad, kind),
            Err(err) => panic!("unexpected error {}", err),
            Ok(_) => panic!("corrupted {} region was accepted", kind.name()),
        }
        assert_eq!(mapper.maps, kind.index() + 1);
        mapper.assert_balanced();
    }
}

#[test]
fn flipped_header_byte_is_rejected() {
    let root = tempfile::tempdir().unwrap();
    let (mut bytes, settings) = archive(root.path());
    // Somewhere in the region table
    bytes[FileHeader::SIZE as usize - 20] ^= 0x01;

    let mut mapper = CountingMapper::new(bytes, settings.alignment);
    let result = ArchiveLoader::new(settings).map(&mut mapper);
    assert!(matches!(result, Err(MapError::HeaderChecksum)));
    assert_eq!(mapper.maps, 0);
    mapper.assert_balanced();
}

#[test]
fn truncated_archive_maps_nothing() {
    let root = tempfile::tempdir().unwrap();
    let (bytes, settings) = archive(root.path());

    for len in [bytes.len() - 1, bytes.len() / 2, FileHeader::SIZE as usize - 1, 0] {
        let mut mapper = CountingMapper::new(bytes[..len].to_vec(), settings.alignment);
        let result = ArchiveLoader::new(settings.clone()).map(&mut mapper);
        assert!(result.is_err(), "archive cut at {} bytes was accepted", len);
        assert_eq!(mapper.maps, 0);
        mapper.assert_balanced();
    }
}

#[test]
fn wrong_alignment_maps_nothing() {
    let root = tempfile::tempdir().unwrap();
    let (bytes, settings) = archive(root.path());

    let mut mapper = CountingMapper::new(bytes, settings.alignment * 2);
    let result = ArchiveLoader::new(settings).map(&mut mapper);
    match result {
        Err(MapError::AlignmentMismatch { expected, found }) => {
            assert_eq!(expected, 8192);
            assert_eq!(found, 4096);
        }
        Err(err) => panic!("unexpected error {}", err),
        Ok(_) => panic!("misaligned archive was accepted"),
    }
    assert_eq!(mapper.reserves, 0);
    mapper.assert_balanced();
}

#[test]
fn verification_settings_must_be_covered() {
    let root = tempfile::tempdir().unwrap();
    let (bytes, settings) = archive(root.path());
    let settings = MapSettings {
        bytecode_verify_local: true,
        ..settings
    };

    let mut mapper = CountingMapper::new(bytes, settings.alignment);
    let result = ArchiveLoader::new(settings).map(&mut mapper);
    assert!(matches!(result, Err(MapError::IncompatibleVerification)));
    mapper.assert_balanced();
}
