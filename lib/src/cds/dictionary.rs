//! Index over every archived class
//!
//! Entries live in a dense arena (`Vec<Option<ArchivedClassEntry>>` plus a list of free slots)
//! and refer to each other by [`EntryIndex`], so the whole table can be written out as one flat
//! array. While dumping, lookups go through hash maps; once read back from an archive, they go
//! through [`CompactTable`]s and the dictionary is never mutated again.

use crate::cds::archive::{
    hash_symbol, CompactTable, RegionReader, RegionWriter, SharedSymbolTable, SymbolId,
    SymbolTable,
};
use crate::cds::{Error, MapError};
use crate::jvm::class_graph::{ClassData, ClassGraph, ClassIndex, LoaderId};
use crate::jvm::verifier::{ConstraintFlags, VerificationConstraint};
use crate::jvm::{BinaryName, Name};
use std::collections::HashMap;

/// Position of an entry in a [`SharedDictionary`]
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, PartialOrd, Ord)]
pub struct EntryIndex(pub u32);

/// How an archived class is found again at runtime
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum ClassCategory {
    /// Defined by a builtin loader and looked up by name
    Builtin,

    /// Defined from a classlist `source:` and matched by size and checksum
    Unregistered,
}

/// Which kind of loader defined a class
///
/// Only used for bookkeeping: statistics, the package table, and checking that an archived
/// builtin class is offered to the loader that would have defined it anyway.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, PartialOrd, Ord)]
pub enum LoaderType {
    Boot,
    Platform,
    App,
    Custom,
}

impl LoaderType {
    pub const ALL: [LoaderType; 4] = [
        LoaderType::Boot,
        LoaderType::Platform,
        LoaderType::App,
        LoaderType::Custom,
    ];

    pub const fn of(loader: LoaderId) -> LoaderType {
        match loader {
            LoaderId::Boot => LoaderType::Boot,
            LoaderId::Platform => LoaderType::Platform,
            LoaderId::App => LoaderType::App,
            LoaderId::Custom(_) => LoaderType::Custom,
        }
    }

    pub const fn name(&self) -> &'static str {
        match self {
            LoaderType::Boot => "BOOT",
            LoaderType::Platform => "EXT",
            LoaderType::App => "APP",
            LoaderType::Custom => "CUSTOM",
        }
    }

    pub const fn tag(&self) -> u8 {
        match self {
            LoaderType::Boot => 1,
            LoaderType::Platform => 2,
            LoaderType::App => 3,
            LoaderType::Custom => 4,
        }
    }

    pub const fn from_tag(tag: u8) -> Option<LoaderType> {
        Some(match tag {
            1 => LoaderType::Boot,
            2 => LoaderType::Platform,
            3 => LoaderType::App,
            4 => LoaderType::Custom,
            _ => return None,
        })
    }

    /// Builtin loader of this type
    pub const fn loader_id(&self) -> Option<LoaderId> {
        match self {
            LoaderType::Boot => Some(LoaderId::Boot),
            LoaderType::Platform => Some(LoaderId::Platform),
            LoaderType::App => Some(LoaderId::App),
            LoaderType::Custom => None,
        }
    }
}

/// The class an entry describes
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum ClassRef {
    /// A class in the class graph being dumped
    Live(ClassIndex),

    /// A class record in a mapped archive
    Record(u32),
}

#[derive(Debug)]
enum Constraints {
    Accumulating(Vec<VerificationConstraint>),
    Finalized(Box<[VerificationConstraint]>),
}

#[derive(Debug)]
pub struct ArchivedClassEntry {
    pub index: EntryIndex,
    pub name: BinaryName,
    pub category: ClassCategory,
    pub loader_type: LoaderType,
    pub class: ClassRef,
    pub raw_size: u32,
    pub raw_crc32: u32,
    pub defining_loader_hash: u32,
    pub initiating_loader_hash: u32,

    /// Only filled in for unregistered entries (see [`SharedDictionary::record_hierarchy`])
    pub recorded_super: Option<EntryIndex>,
    pub recorded_interfaces: Vec<EntryIndex>,
    constraints: Constraints,
}

impl ArchivedClassEntry {
    /// Subtyping obligations the verifier relied on when it approved the class
    pub fn verification_constraints(&self) -> &[VerificationConstraint] {
        match &self.constraints {
            Constraints::Accumulating(constraints) => constraints,
            Constraints::Finalized(constraints) => constraints,
        }
    }

    pub fn is_unregistered(&self) -> bool {
        self.category == ClassCategory::Unregistered
    }

    /// Same class file contents (size and CRC32)?
    pub fn same_contents(&self, raw_size: u32, raw_crc32: u32) -> bool {
        self.raw_size == raw_size && self.raw_crc32 == raw_crc32
    }
}

enum Lookup {
    Dynamic {
        builtin: HashMap<BinaryName, EntryIndex>,
        unregistered: HashMap<BinaryName, Vec<EntryIndex>>,
    },
    Compact {
        builtin: CompactTable,
        unregistered: CompactTable,
    },
}

pub struct SharedDictionary {
    entries: Vec<Option<ArchivedClassEntry>>,
    free: Vec<u32>,
    by_class: HashMap<ClassRef, EntryIndex>,
    lookup: Lookup,
}

impl Default for SharedDictionary {
    fn default() -> Self {
        SharedDictionary::new()
    }
}

impl SharedDictionary {
    /// Empty dictionary, to be filled during a dump
    pub fn new() -> SharedDictionary {
        SharedDictionary {
            entries: vec![],
            free: vec![],
            by_class: HashMap::new(),
            lookup: Lookup::Dynamic {
                builtin: HashMap::new(),
                unregistered: HashMap::new(),
            },
        }
    }

    fn allocate(&mut self, mut entry: ArchivedClassEntry) -> EntryIndex {
        let index = match self.free.pop() {
            Some(free) => EntryIndex(free),
            None => {
                self.entries.push(None);
                EntryIndex(self.entries.len() as u32 - 1)
            }
        };
        entry.index = index;
        self.by_class.insert(entry.class, index);
        self.entries[index.0 as usize] = Some(entry);
        index
    }

    fn new_entry(
        class: &ClassData,
        category: ClassCategory,
        defining_loader_hash: u32,
        initiating_loader_hash: u32,
    ) -> ArchivedClassEntry {
        ArchivedClassEntry {
            index: EntryIndex(u32::MAX),
            name: class.name.clone(),
            category,
            loader_type: match category {
                ClassCategory::Builtin => LoaderType::of(class.loader),
                ClassCategory::Unregistered => LoaderType::Custom,
            },
            class: ClassRef::Live(class.index),
            raw_size: class.source.raw_size,
            raw_crc32: class.source.raw_crc32,
            defining_loader_hash,
            initiating_loader_hash,
            recorded_super: None,
            recorded_interfaces: vec![],
            constraints: Constraints::Accumulating(vec![]),
        }
    }

    /// Add a class defined by a builtin loader
    ///
    /// Returns `false` (and adds nothing) if a builtin class by that name is already present.
    pub fn add_builtin(&mut self, class: &ClassData) -> bool {
        let entry = SharedDictionary::new_entry(class, ClassCategory::Builtin, 0, 0);
        match &self.lookup {
            Lookup::Dynamic { builtin, .. } if !builtin.contains_key(&class.name) => (),
            _ => return false,
        }
        let index = self.allocate(entry);
        if let Lookup::Dynamic { builtin, .. } = &mut self.lookup {
            builtin.insert(class.name.clone(), index);
        }
        true
    }

    /// Add a class defined straight from a classlist `source:`
    ///
    /// Returns `false` (and adds nothing) if there is already an unregistered class with this
    /// name and defining loader hash.
    pub fn add_unregistered(
        &mut self,
        class: &ClassData,
        defining_loader_hash: u32,
        initiating_loader_hash: u32,
    ) -> bool {
        let entry = SharedDictionary::new_entry(
            class,
            ClassCategory::Unregistered,
            defining_loader_hash,
            initiating_loader_hash,
        );
        let duplicate = match &self.lookup {
            Lookup::Dynamic { unregistered, .. } => unregistered
                .get(&class.name)
                .into_iter()
                .flatten()
                .filter_map(|index| self.entry(*index))
                .any(|existing| existing.defining_loader_hash == defining_loader_hash),
            Lookup::Compact { .. } => true,
        };
        if duplicate {
            return false;
        }
        let index = self.allocate(entry);
        if let Lookup::Dynamic { unregistered, .. } = &mut self.lookup {
            unregistered
                .entry(class.name.clone())
                .or_insert_with(Vec::new)
                .push(index);
        }
        true
    }

    /// Builtin class with exactly this name
    pub fn find_for_builtin_loader(&self, name: &BinaryName) -> Option<&ArchivedClassEntry> {
        match &self.lookup {
            Lookup::Dynamic { builtin, .. } => builtin.get(name).and_then(|idx| self.entry(*idx)),
            Lookup::Compact { builtin, .. } => builtin
                .lookup(hash_symbol(name.as_str()))
                .filter_map(|idx| self.entry(EntryIndex(idx)))
                .find(|entry| &entry.name == name),
        }
    }

    /// Every unregistered class with this name, in the order they were archived
    pub fn find_for_unregistered_loader(&self, name: &BinaryName) -> Vec<&ArchivedClassEntry> {
        match &self.lookup {
            Lookup::Dynamic { unregistered, .. } => unregistered
                .get(name)
                .into_iter()
                .flatten()
                .filter_map(|idx| self.entry(*idx))
                .collect(),
            Lookup::Compact { unregistered, .. } => unregistered
                .lookup(hash_symbol(name.as_str()))
                .filter_map(|idx| self.entry(EntryIndex(idx)))
                .filter(|entry| &entry.name == name)
                .collect(),
        }
    }

    pub fn entry(&self, index: EntryIndex) -> Option<&ArchivedClassEntry> {
        self.entries.get(index.0 as usize).and_then(Option::as_ref)
    }

    pub fn entry_for_class(&self, class: ClassRef) -> Option<&ArchivedClassEntry> {
        self.by_class.get(&class).and_then(|idx| self.entry(*idx))
    }

    /// Live entries, in index order
    pub fn entries(&self) -> impl Iterator<Item = &ArchivedClassEntry> {
        self.entries.iter().flatten()
    }

    pub fn len(&self) -> usize {
        self.entries().count()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().next().is_none()
    }

    /// Remove an entry (only possible while dumping)
    pub fn remove(&mut self, index: EntryIndex) -> Option<ArchivedClassEntry> {
        if let Lookup::Compact { .. } = self.lookup {
            return None;
        }
        let entry = self.entries.get_mut(index.0 as usize)?.take()?;
        self.free.push(index.0);
        self.by_class.remove(&entry.class);
        if let Lookup::Dynamic {
            builtin,
            unregistered,
        } = &mut self.lookup
        {
            match entry.category {
                ClassCategory::Builtin => {
                    builtin.remove(&entry.name);
                }
                ClassCategory::Unregistered => {
                    if let Some(indices) = unregistered.get_mut(&entry.name) {
                        indices.retain(|idx| *idx != index);
                        if indices.is_empty() {
                            unregistered.remove(&entry.name);
                        }
                    }
                }
            }
        }
        Some(entry)
    }

    /// Snapshot the super class and local interfaces of every unregistered class
    ///
    /// Must run once every class is resolved, and before anything about the classes is
    /// stripped. Every supertype must itself have an entry.
    pub fn record_hierarchy<'g>(&mut self, graph: &'g ClassGraph<'g>) -> Result<(), Error> {
        let mut recorded = vec![];
        for entry in self.entries() {
            let class_index = match (entry.category, entry.class) {
                (ClassCategory::Unregistered, ClassRef::Live(class_index)) => class_index,
                _ => continue,
            };
            let class = graph.class_at(class_index).ok_or_else(|| {
                Error::Inconsistent(format!("{} is not in the class graph", entry.name))
            })?;
            let supertype_entry = |supertype: &ClassData| {
                self.entry_for_class(ClassRef::Live(supertype.index))
                    .map(|entry| entry.index)
                    .ok_or_else(|| Error::MissingSupertype {
                        class: class.name.to_string(),
                        supertype: supertype.name.to_string(),
                    })
            };
            let recorded_super = class.superclass.map(supertype_entry).transpose()?;
            let recorded_interfaces = class
                .interface_list()
                .into_iter()
                .map(supertype_entry)
                .collect::<Result<Vec<_>, _>>()?;
            recorded.push((entry.index, recorded_super, recorded_interfaces));
        }

        for (index, recorded_super, recorded_interfaces) in recorded {
            if let Some(Some(entry)) = self.entries.get_mut(index.0 as usize) {
                entry.recorded_super = recorded_super;
                entry.recorded_interfaces = recorded_interfaces;
            }
        }
        Ok(())
    }

    /// Attach verification constraints to the entry of a class
    pub fn add_constraints(
        &mut self,
        class: ClassIndex,
        constraints: Vec<VerificationConstraint>,
    ) -> bool {
        let index = match self.by_class.get(&ClassRef::Live(class)) {
            Some(index) => *index,
            None => return false,
        };
        match self.entries.get_mut(index.0 as usize) {
            Some(Some(entry)) => match &mut entry.constraints {
                Constraints::Accumulating(existing) => {
                    for constraint in constraints {
                        if !existing.contains(&constraint) {
                            existing.push(constraint);
                        }
                    }
                    true
                }
                Constraints::Finalized(_) => false,
            },
            _ => false,
        }
    }

    /// Freeze the accumulated verification constraints of every entry
    pub fn finalize_verification_constraints(&mut self) {
        for entry in self.entries.iter_mut().flatten() {
            if let Constraints::Accumulating(constraints) = &mut entry.constraints {
                let finalized = std::mem::take(constraints).into_boxed_slice();
                entry.constraints = Constraints::Finalized(finalized);
            }
        }
    }

    /// Write both lookup tables, then the entries (renumbered densely)
    ///
    /// `record_of` maps a class in the graph to its record in the read-only region.
    pub fn write(
        &self,
        writer: &mut RegionWriter,
        symbols: &mut SymbolTable,
        record_of: impl Fn(ClassIndex) -> Option<u32>,
    ) -> Result<(), Error> {
        let dense: HashMap<EntryIndex, u32> = self
            .entries()
            .enumerate()
            .map(|(dense, entry)| (entry.index, dense as u32))
            .collect();
        let dense_of = |index: EntryIndex| {
            dense.get(&index).copied().ok_or_else(|| {
                Error::Inconsistent(format!("dangling dictionary reference {}", index.0))
            })
        };

        let mut builtin_items = vec![];
        let mut unregistered_items = vec![];
        for entry in self.entries() {
            let item = (hash_symbol(entry.name.as_str()), dense_of(entry.index)?);
            match entry.category {
                ClassCategory::Builtin => builtin_items.push(item),
                ClassCategory::Unregistered => unregistered_items.push(item),
            }
        }
        CompactTable::build(&builtin_items).write(writer)?;
        CompactTable::build(&unregistered_items).write(writer)?;

        writer.write_u32(dense.len() as u32)?;
        for entry in self.entries() {
            let record = match entry.class {
                ClassRef::Live(class) => record_of(class),
                ClassRef::Record(record) => Some(record),
            };
            let record = record.ok_or_else(|| {
                Error::Inconsistent(format!("{} has no archived record", entry.name))
            })?;

            writer.write_u32(symbols.intern(entry.name.as_str()).0)?;
            writer.write_u8(match entry.category {
                ClassCategory::Builtin => 0,
                ClassCategory::Unregistered => 1,
            })?;
            writer.write_u8(entry.loader_type.tag())?;
            writer.write_u32(record)?;
            writer.write_u32(entry.raw_size)?;
            writer.write_u32(entry.raw_crc32)?;
            writer.write_u32(entry.defining_loader_hash)?;
            writer.write_u32(entry.initiating_loader_hash)?;
            match entry.recorded_super {
                Some(recorded_super) => writer.write_u32(dense_of(recorded_super)?)?,
                None => writer.write_u32(u32::MAX)?,
            }
            writer.write_u32(entry.recorded_interfaces.len() as u32)?;
            for interface in &entry.recorded_interfaces {
                writer.write_u32(dense_of(*interface)?)?;
            }
            let constraints = entry.verification_constraints();
            writer.write_u32(constraints.len() as u32)?;
            for constraint in constraints {
                writer.write_u32(symbols.intern(constraint.required_supertype.as_str()).0)?;
                writer.write_u32(symbols.intern(constraint.referencing_type.as_str()).0)?;
                writer.write_u8(constraint.flags.bits())?;
            }
        }
        Ok(())
    }

    /// Read a dictionary written by [`SharedDictionary::write`]
    ///
    /// Entries refer to class records by index, and there are `record_count` of those.
    pub fn read(
        reader: &mut RegionReader,
        symbols: &SharedSymbolTable,
        record_count: u32,
    ) -> Result<SharedDictionary, MapError> {
        const MIN_ENTRY_SIZE: usize = 34;
        let builtin = CompactTable::read(reader)?;
        let unregistered = CompactTable::read(reader)?;
        let count = reader.read_count(MIN_ENTRY_SIZE)?;
        let entry_index = |raw: u32| {
            if (raw as usize) < count {
                Ok(EntryIndex(raw))
            } else {
                Err(MapError::Corrupt(format!("dictionary entry {} out of range", raw)))
            }
        };
        let name = |id: u32| -> Result<BinaryName, MapError> {
            let symbol = symbols.get(SymbolId(id))?;
            BinaryName::from_string(symbol.to_owned()).map_err(MapError::Corrupt)
        };

        let mut entries = Vec::with_capacity(count);
        let mut by_class = HashMap::new();
        for position in 0..count {
            let index = EntryIndex(position as u32);
            let entry_name = name(reader.read_u32()?)?;
            let category = match reader.read_u8()? {
                0 => ClassCategory::Builtin,
                1 => ClassCategory::Unregistered,
                other => return Err(MapError::Corrupt(format!("class category {}", other))),
            };
            let loader_type = LoaderType::from_tag(reader.read_u8()?)
                .ok_or_else(|| MapError::Corrupt(String::from("bad loader type")))?;
            let record = reader.read_u32()?;
            if record >= record_count {
                return Err(MapError::Corrupt(format!("class record {} out of range", record)));
            }
            let raw_size = reader.read_u32()?;
            let raw_crc32 = reader.read_u32()?;
            let defining_loader_hash = reader.read_u32()?;
            let initiating_loader_hash = reader.read_u32()?;
            let recorded_super = match reader.read_u32()? {
                u32::MAX => None,
                raw => Some(entry_index(raw)?),
            };
            let interface_count = reader.read_count(4)?;
            let mut recorded_interfaces = Vec::with_capacity(interface_count);
            for _ in 0..interface_count {
                recorded_interfaces.push(entry_index(reader.read_u32()?)?);
            }
            let constraint_count = reader.read_count(9)?;
            let mut constraints = Vec::with_capacity(constraint_count);
            for _ in 0..constraint_count {
                let required_supertype = name(reader.read_u32()?)?;
                let referencing_type = name(reader.read_u32()?)?;
                let flags = ConstraintFlags::from_bits_truncate(reader.read_u8()?);
                constraints.push(VerificationConstraint {
                    required_supertype,
                    referencing_type,
                    flags,
                });
            }

            if by_class.insert(ClassRef::Record(record), index).is_some() {
                return Err(MapError::Corrupt(format!(
                    "class record {} archived twice",
                    record
                )));
            }
            entries.push(Some(ArchivedClassEntry {
                index,
                name: entry_name,
                category,
                loader_type,
                class: ClassRef::Record(record),
                raw_size,
                raw_crc32,
                defining_loader_hash,
                initiating_loader_hash,
                recorded_super,
                recorded_interfaces,
                constraints: Constraints::Finalized(constraints.into_boxed_slice()),
            }));
        }

        for (table, category) in [
            (&builtin, ClassCategory::Builtin),
            (&unregistered, ClassCategory::Unregistered),
        ] {
            let well_formed = table.values().all(|value| {
                matches!(
                    entries.get(value as usize),
                    Some(Some(entry)) if entry.category == category
                )
            });
            if !well_formed {
                return Err(MapError::Corrupt(String::from(
                    "dictionary table points at the wrong entries",
                )));
            }
        }

        Ok(SharedDictionary {
            entries,
            free: vec![],
            by_class,
            lookup: Lookup::Compact {
                builtin,
                unregistered,
            },
        })
    }
}
