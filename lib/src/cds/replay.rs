//! Reusing archived classes of custom loaders whose supertypes are not the archived ones
//!
//! An archived unregistered class records the dictionary entries of its super class and local
//! interfaces. When a custom loader later presents a different class for one of those, the
//! archived class can still be reused if that class was itself restored from an unregistered
//! entry with the same contents, all the way up the hierarchy.

use crate::cds::{ArchivedClassEntry, ClassRef, EntryIndex, SharedDictionary};
use crate::jvm::class_graph::{ClassData, ClassIndex};
use log::trace;
use std::collections::HashMap;

/// Deepest hierarchy the validator will walk before giving up on a pair
pub const MAX_REPLAY_DEPTH: usize = 256;

pub struct HierarchyReplayValidator<'d> {
    dictionary: &'d SharedDictionary,
    memo: HashMap<(EntryIndex, ClassIndex), bool>,
}

impl<'d> HierarchyReplayValidator<'d> {
    pub fn new(dictionary: &'d SharedDictionary) -> HierarchyReplayValidator<'d> {
        HierarchyReplayValidator {
            dictionary,
            memo: HashMap::new(),
        }
    }

    /// Entry a class was restored from, if it was restored from this dictionary's archive
    pub fn entry_of(&self, class: &ClassData) -> Option<&'d ArchivedClassEntry> {
        let record = class.shared_record?;
        self.dictionary.entry_for_class(ClassRef::Record(record))
    }

    /// Was `actual` restored from `expected` itself?
    pub fn is_identical(&self, expected: &ArchivedClassEntry, actual: &ClassData) -> bool {
        self.entry_of(actual)
            .map_or(false, |entry| entry.index == expected.index)
    }

    /// Can `actual` stand in for the class archived as `expected`?
    pub fn is_compatible(&mut self, expected: &ArchivedClassEntry, actual: &ClassData) -> bool {
        self.compatible_at(expected, actual, 0)
    }

    fn compatible_at(
        &mut self,
        expected: &ArchivedClassEntry,
        actual: &ClassData,
        depth: usize,
    ) -> bool {
        if self.is_identical(expected, actual) {
            return true;
        }
        if depth >= MAX_REPLAY_DEPTH {
            trace!("Giving up on {} at depth {}", expected.name, depth);
            return false;
        }
        let key = (expected.index, actual.index);
        if let Some(compatible) = self.memo.get(&key) {
            return *compatible;
        }
        let compatible = self.compare(expected, actual, depth);
        self.memo.insert(key, compatible);
        trace!(
            "{} (entry {}) {} compatible with class {}",
            expected.name,
            expected.index.0,
            if compatible { "is" } else { "is not" },
            actual.index.0
        );
        compatible
    }

    fn compare(
        &mut self,
        expected: &ArchivedClassEntry,
        actual: &ClassData,
        depth: usize,
    ) -> bool {
        let actual_entry = match self.entry_of(actual) {
            Some(entry) => entry,
            None => return false,
        };
        if !expected.is_unregistered() || !actual_entry.is_unregistered() {
            return false;
        }
        if !expected.same_contents(actual_entry.raw_size, actual_entry.raw_crc32) {
            return false;
        }

        let dictionary = self.dictionary;
        match (expected.recorded_super, actual.superclass) {
            (None, None) => (),
            (Some(expected_super), Some(actual_super)) => match dictionary.entry(expected_super) {
                Some(expected_super) => {
                    if !self.compatible_at(expected_super, actual_super, depth + 1) {
                        return false;
                    }
                }
                None => return false,
            },
            _ => return false,
        }

        let actual_interfaces = actual.interface_list();
        if expected.recorded_interfaces.len() != actual_interfaces.len() {
            return false;
        }
        for (expected_interface, actual_interface) in
            expected.recorded_interfaces.iter().zip(actual_interfaces)
        {
            match dictionary.entry(*expected_interface) {
                Some(expected_interface) => {
                    if !self.compatible_at(expected_interface, actual_interface, depth + 1) {
                        return false;
                    }
                }
                None => return false,
            }
        }
        true
    }
}

/// A supertype of an archived class, before or after it has been matched to a live class
#[derive(Copy, Clone, Debug)]
pub enum Slot<'g> {
    Archived(EntryIndex),
    Live(&'g ClassData<'g>),
}

impl<'g> Slot<'g> {
    pub fn live(&self) -> Option<&'g ClassData<'g>> {
        match self {
            Slot::Live(class) => Some(class),
            Slot::Archived(_) => None,
        }
    }
}

/// Put `actual` in every slot still holding `expected`
///
/// Slots that hold anything else (including live classes already in place) are left untouched.
/// Returns how many slots were replaced.
pub fn splice<'g>(
    slots: &mut [Slot<'g>],
    expected: EntryIndex,
    actual: &'g ClassData<'g>,
) -> usize {
    let mut replaced = 0;
    for slot in slots.iter_mut() {
        if let Slot::Archived(index) = slot {
            if *index == expected {
                *slot = Slot::Live(actual);
                replaced += 1;
            }
        }
    }
    replaced
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::cds::archive::{
        RegionKind, RegionReader, RegionWriter, SharedSymbolTable, SymbolTable,
    };
    use crate::jvm::class_file::ConstantPool;
    use crate::jvm::class_graph::{ClassGraph, ClassGraphArenas, ClassKind, ClassSource, LoaderId};
    use crate::jvm::{BinaryName, ClassAccessFlags, Name};

    /// A class as if restored from `record`, and its unregistered dictionary entry
    fn restored<'g>(
        graph: &'g ClassGraph<'g>,
        dictionary: &mut SharedDictionary,
        name: &str,
        contents: &[u8],
        defining_loader_hash: u32,
        superclass: Option<&'g ClassData<'g>>,
    ) -> &'g ClassData<'g> {
        let mut data = ClassData::new(
            BinaryName::from_string(name.to_owned()).unwrap(),
            LoaderId::Custom(defining_loader_hash),
            ClassAccessFlags::PUBLIC,
            ClassKind::Instance,
            superclass,
            ClassSource::from_bytes(ClassSource::UNREGISTERED_INDEX, contents),
            ConstantPool::new(),
        );
        data.shared_record = Some(graph.len() as u32);
        let class = graph.add_unregistered_class(data);
        assert!(dictionary.add_unregistered(class, defining_loader_hash, 0));
        class
    }

    /// Turn the live entries of a dump-time dictionary into archived ones
    fn archive<'g>(graph: &'g ClassGraph<'g>, dictionary: SharedDictionary) -> SharedDictionary {
        let mut dictionary = dictionary;
        dictionary.record_hierarchy(graph).unwrap();
        dictionary.finalize_verification_constraints();
        let mut writer = RegionWriter::new(RegionKind::MiscData, 1 << 20);
        let mut symbols = SymbolTable::new();
        dictionary
            .write(&mut writer, &mut symbols, |class| Some(class.0))
            .unwrap();
        let mut symbol_writer = RegionWriter::new(RegionKind::MiscData, 1 << 20);
        symbols.write(&mut symbol_writer).unwrap();
        let symbol_bytes = symbol_writer.into_bytes();
        let symbols = SharedSymbolTable::read(&mut RegionReader::new(&symbol_bytes)).unwrap();
        let bytes = writer.into_bytes();
        SharedDictionary::read(&mut RegionReader::new(&bytes), &symbols, graph.len() as u32)
            .unwrap()
    }

    #[test]
    fn content_is_identity() {
        let arenas = ClassGraphArenas::new();
        let graph = ClassGraph::new(&arenas);
        let mut dump = SharedDictionary::new();

        // Two copies of the same hierarchy, from two loaders
        let base_1 = restored(&graph, &mut dump, "Base", b"base", 1, None);
        let sub_1 = restored(&graph, &mut dump, "Sub", b"sub", 1, Some(base_1));
        let base_2 = restored(&graph, &mut dump, "Base", b"base", 2, None);
        let sub_2 = restored(&graph, &mut dump, "Sub", b"sub", 2, Some(base_2));
        // Same name, other contents
        let base_3 = restored(&graph, &mut dump, "Base", b"other base", 3, None);
        let sub_3 = restored(&graph, &mut dump, "Sub", b"sub", 3, Some(base_3));

        let dictionary = archive(&graph, dump);
        let mut validator = HierarchyReplayValidator::new(&dictionary);
        let entry = |class: &ClassData| {
            dictionary
                .entry_for_class(ClassRef::Record(class.shared_record.unwrap()))
                .unwrap()
        };

        assert!(validator.is_identical(entry(sub_1), sub_1));
        assert!(!validator.is_identical(entry(sub_1), sub_2));
        assert!(validator.is_compatible(entry(sub_1), sub_2));
        assert!(validator.is_compatible(entry(base_1), base_2));
        assert!(!validator.is_compatible(entry(base_1), base_3));
        assert!(!validator.is_compatible(entry(sub_1), sub_3));
        assert!(!validator.is_compatible(entry(sub_1), base_2));

        // A class that was never archived can't stand in for anything
        let fresh = graph.add_class(ClassData::new(
            BinaryName::from_string(String::from("Base")).unwrap(),
            LoaderId::Custom(9),
            ClassAccessFlags::PUBLIC,
            ClassKind::Instance,
            None,
            ClassSource::from_bytes(ClassSource::NO_CLASS_PATH, b"base"),
            ConstantPool::new(),
        ));
        assert!(!validator.is_compatible(entry(base_1), fresh));
    }

    #[test]
    fn symmetric() {
        let arenas = ClassGraphArenas::new();
        let graph = ClassGraph::new(&arenas);
        let mut dump = SharedDictionary::new();
        let mut classes = vec![];
        for (hash, base_contents) in [(1, &b"base"[..]), (2, &b"base"[..]), (3, &b"esab"[..])] {
            let base = restored(&graph, &mut dump, "Base", base_contents, hash, None);
            classes.push(base);
            classes.push(restored(&graph, &mut dump, "Sub", b"sub", hash, Some(base)));
        }
        let dictionary = archive(&graph, dump);
        let entry = |class: &ClassData| {
            dictionary
                .entry_for_class(ClassRef::Record(class.shared_record.unwrap()))
                .unwrap()
        };

        for a in &classes {
            for b in &classes {
                let forward = HierarchyReplayValidator::new(&dictionary).is_compatible(entry(a), b);
                let backward =
                    HierarchyReplayValidator::new(&dictionary).is_compatible(entry(b), a);
                assert_eq!(forward, backward, "{} / {}", a.index.0, b.index.0);
            }
        }
    }

    #[test]
    fn splice_keeps_other_slots() {
        let arenas = ClassGraphArenas::new();
        let graph = ClassGraph::new(&arenas);
        let live = graph.add_class(ClassData::new(
            BinaryName::OBJECT,
            LoaderId::Boot,
            ClassAccessFlags::PUBLIC,
            ClassKind::Instance,
            None,
            ClassSource::synthetic(),
            ConstantPool::new(),
        ));
        let mut slots = [
            Slot::Archived(EntryIndex(4)),
            Slot::Archived(EntryIndex(7)),
            Slot::Archived(EntryIndex(4)),
        ];
        assert_eq!(splice(&mut slots, EntryIndex(4), live), 2);
        assert!(slots[0].live().is_some());
        assert!(matches!(slots[1], Slot::Archived(EntryIndex(7))));
        assert!(std::ptr::eq(slots[2].live().unwrap(), live));
        assert_eq!(splice(&mut slots, EntryIndex(4), live), 0);
    }
}
