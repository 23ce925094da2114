//! Archived class records
//!
//! The read-only region holds one record per archived class: its shape, its supertypes by name,
//! its constant pool (in class file encoding), and its methods and fields. Names are symbol ids
//! into the symbol table of the misc data region. The read-write region holds the per-class state
//! that a process may change after restoring the class.
//!
//! Every record starts with its [`MetadataKind`] tag. The misc code region holds the table of
//! kinds the archive was written with, and a reader refuses an archive whose kind table differs
//! from its own, so a tag is never reinterpreted.

use crate::cds::archive::{RegionReader, RegionWriter, SharedSymbolTable, SymbolId, SymbolTable};
use crate::cds::{Error, LoaderType, MapError};
use crate::jvm::class_file::{Code, ConstantPool};
use crate::jvm::class_graph::{ClassData, ClassKind, ClassSource, ClassState};
use crate::jvm::{
    ArrayType, BaseType, BinaryName, ClassAccessFlags, Deserialize, FieldAccessFlags, FieldType,
    MethodAccessFlags, MethodDescriptor, Name, ParseDescriptor, RenderDescriptor, Serialize,
    UnqualifiedName,
};
use std::io::Cursor;

/// Every kind of metadata that can appear in an archive
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum MetadataKind {
    InstanceClass,
    ObjectArrayClass,
    TypeArrayClass,
    Method,
    Field,
    ConstantPool,
}

impl MetadataKind {
    pub const ALL: [MetadataKind; 6] = [
        MetadataKind::InstanceClass,
        MetadataKind::ObjectArrayClass,
        MetadataKind::TypeArrayClass,
        MetadataKind::Method,
        MetadataKind::Field,
        MetadataKind::ConstantPool,
    ];

    pub const fn tag(&self) -> u32 {
        match self {
            MetadataKind::InstanceClass => 1,
            MetadataKind::ObjectArrayClass => 2,
            MetadataKind::TypeArrayClass => 3,
            MetadataKind::Method => 4,
            MetadataKind::Field => 5,
            MetadataKind::ConstantPool => 6,
        }
    }

    pub const fn from_tag(tag: u32) -> Option<MetadataKind> {
        Some(match tag {
            1 => MetadataKind::InstanceClass,
            2 => MetadataKind::ObjectArrayClass,
            3 => MetadataKind::TypeArrayClass,
            4 => MetadataKind::Method,
            5 => MetadataKind::Field,
            6 => MetadataKind::ConstantPool,
            _ => return None,
        })
    }

    pub const fn name(&self) -> &'static str {
        match self {
            MetadataKind::InstanceClass => "InstanceKlass",
            MetadataKind::ObjectArrayClass => "ObjArrayKlass",
            MetadataKind::TypeArrayClass => "TypeArrayKlass",
            MetadataKind::Method => "Method",
            MetadataKind::Field => "Field",
            MetadataKind::ConstantPool => "ConstantPool",
        }
    }

    /// Write the kind table into the misc code region
    pub fn write_table(writer: &mut RegionWriter) -> Result<(), Error> {
        writer.write_u32(MetadataKind::ALL.len() as u32)?;
        for kind in &MetadataKind::ALL {
            writer.write_u32(kind.tag())?;
            writer.write_str(kind.name())?;
        }
        Ok(())
    }

    /// Check that an archive uses exactly the kinds this process knows about
    pub fn check_table(reader: &mut RegionReader) -> Result<(), MapError> {
        let count = reader.read_count(8)?;
        if count != MetadataKind::ALL.len() {
            return Err(MapError::Corrupt(format!(
                "archive knows {} metadata kinds, expected {}",
                count,
                MetadataKind::ALL.len()
            )));
        }
        for expected in &MetadataKind::ALL {
            let tag = reader.read_u32()?;
            let name = reader.read_str()?;
            match MetadataKind::from_tag(tag) {
                Some(kind) if kind == *expected && kind.name() == name => (),
                Some(_) => {
                    return Err(MapError::Corrupt(format!(
                        "metadata kind {} is {} in the archive",
                        tag, name
                    )))
                }
                None => return Err(MapError::UnknownMetadataKind(tag)),
            }
        }
        Ok(())
    }

    fn expect(reader: &mut RegionReader, kind: MetadataKind) -> Result<(), MapError> {
        reader.expect_tag(kind.tag())
    }
}

/// Shape of an archived class, with element classes by name
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ArchivedKind {
    Instance,
    ObjectArray(ArrayType<BinaryName>),
    TypeArray(ArrayType<BaseType>),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArchivedMethod {
    pub name: UnqualifiedName,
    pub descriptor: MethodDescriptor<BinaryName>,
    pub access_flags: MethodAccessFlags,
    pub code: Option<Code>,
    pub fingerprint: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArchivedField {
    pub name: UnqualifiedName,
    pub descriptor: FieldType<BinaryName>,
    pub access_flags: FieldAccessFlags,
}

/// Everything needed to recreate a class without its class file
#[derive(Clone, Debug)]
pub struct ArchivedClass {
    pub name: BinaryName,
    pub kind: ArchivedKind,
    pub access_flags: ClassAccessFlags,
    pub loader_type: LoaderType,
    pub source: ClassSource,
    pub super_name: Option<BinaryName>,
    pub interface_names: Vec<BinaryName>,
    pub constants: ConstantPool,
    pub methods: Vec<ArchivedMethod>,
    pub fields: Vec<ArchivedField>,

    /// Filled in from the read-write region
    pub state: ClassState,
}

impl ArchivedClass {
    pub fn metadata_kind(&self) -> MetadataKind {
        match self.kind {
            ArchivedKind::Instance => MetadataKind::InstanceClass,
            ArchivedKind::ObjectArray(_) => MetadataKind::ObjectArrayClass,
            ArchivedKind::TypeArray(_) => MetadataKind::TypeArrayClass,
        }
    }

    /// Loader type recorded for a class being dumped
    pub fn loader_type_of(class: &ClassData) -> LoaderType {
        if class.source.is_unregistered() {
            LoaderType::Custom
        } else {
            LoaderType::of(class.loader)
        }
    }

    /// Write the read-only record of a class
    ///
    /// Methods must already have their fingerprints.
    pub fn write(
        class: &ClassData,
        writer: &mut RegionWriter,
        symbols: &mut SymbolTable,
    ) -> Result<(), Error> {
        let kind = match &class.kind {
            ClassKind::Instance => MetadataKind::InstanceClass,
            ClassKind::ObjectArray(_) => MetadataKind::ObjectArrayClass,
            ClassKind::TypeArray(_) => MetadataKind::TypeArrayClass,
        };
        writer.write_u32(kind.tag())?;
        writer.write_u32(symbols.intern(class.name.as_str()).0)?;
        writer.write_u16(class.access_flags.bits())?;
        writer.write_u8(ArchivedClass::loader_type_of(class).tag())?;
        writer.write_i16(class.source.classpath_index)?;
        writer.write_u32(class.source.raw_size)?;
        writer.write_u32(class.source.raw_crc32)?;
        match class.superclass {
            Some(superclass) => writer.write_u32(symbols.intern(superclass.name.as_str()).0)?,
            None => writer.write_u32(SymbolId::NONE.0)?,
        }
        let interfaces = class.interface_list();
        writer.write_u32(interfaces.len() as u32)?;
        for interface in interfaces {
            writer.write_u32(symbols.intern(interface.name.as_str()).0)?;
        }

        match &class.kind {
            ClassKind::Instance => (),
            ClassKind::ObjectArray(array) => {
                writer.write_u32(array.additional_dimensions as u32)?;
                writer.write_u32(symbols.intern(array.element_type.name.as_str()).0)?;
            }
            ClassKind::TypeArray(array) => {
                writer.write_u32(array.additional_dimensions as u32)?;
                writer.write_u8(array.element_type.basic_type())?;
            }
        }

        writer.write_u32(MetadataKind::ConstantPool.tag())?;
        let mut pool = vec![];
        class.constants.serialize(&mut pool)?;
        writer.write_blob(&pool)?;

        let methods = class.method_list();
        writer.write_u32(methods.len() as u32)?;
        for method in methods {
            let fingerprint = method.fingerprint.get().ok_or_else(|| {
                Error::Inconsistent(format!(
                    "method {}.{} has no fingerprint",
                    class.name, method.name
                ))
            })?;
            writer.write_u32(MetadataKind::Method.tag())?;
            writer.write_u32(symbols.intern(method.name.as_str()).0)?;
            writer.write_u32(symbols.intern(&method.descriptor.render()).0)?;
            writer.write_u16(method.access_flags.bits())?;
            writer.write_u64(fingerprint)?;
            match &method.code {
                Some(code) => {
                    let mut bytes = vec![];
                    code.serialize(&mut bytes)?;
                    writer.write_u8(1)?;
                    writer.write_blob(&bytes)?;
                }
                None => writer.write_u8(0)?,
            }
        }

        let fields = class.field_list();
        writer.write_u32(fields.len() as u32)?;
        for field in fields {
            writer.write_u32(MetadataKind::Field.tag())?;
            writer.write_u32(symbols.intern(field.name.as_str()).0)?;
            writer.write_u32(symbols.intern(&field.descriptor.render()).0)?;
            writer.write_u16(field.access_flags.bits())?;
        }
        Ok(())
    }

    /// Read a record written by [`ArchivedClass::write`]
    pub fn read(
        reader: &mut RegionReader,
        symbols: &SharedSymbolTable,
    ) -> Result<ArchivedClass, MapError> {
        let tag = reader.read_u32()?;
        let kind = MetadataKind::from_tag(tag).ok_or(MapError::UnknownMetadataKind(tag))?;
        let name = binary_name(symbols, reader.read_u32()?)?;
        let access_flags = ClassAccessFlags::from_bits_truncate(reader.read_u16()?);
        let loader_type = LoaderType::from_tag(reader.read_u8()?)
            .ok_or_else(|| MapError::Corrupt(format!("bad loader type for {}", name)))?;
        let source = ClassSource {
            classpath_index: reader.read_i16()?,
            raw_size: reader.read_u32()?,
            raw_crc32: reader.read_u32()?,
        };
        let super_name = match SymbolId(reader.read_u32()?) {
            SymbolId::NONE => None,
            id => Some(binary_name(symbols, id.0)?),
        };
        let interface_count = reader.read_count(4)?;
        let mut interface_names = Vec::with_capacity(interface_count);
        for _ in 0..interface_count {
            interface_names.push(binary_name(symbols, reader.read_u32()?)?);
        }

        let kind = match kind {
            MetadataKind::InstanceClass => ArchivedKind::Instance,
            MetadataKind::ObjectArrayClass => ArchivedKind::ObjectArray(ArrayType {
                additional_dimensions: reader.read_u32()? as usize,
                element_type: binary_name(symbols, reader.read_u32()?)?,
            }),
            MetadataKind::TypeArrayClass => {
                let additional_dimensions = reader.read_u32()? as usize;
                let basic_type = reader.read_u8()?;
                let element_type = BaseType::from_basic_type(basic_type).ok_or_else(|| {
                    MapError::Corrupt(format!("bad array element type {}", basic_type))
                })?;
                ArchivedKind::TypeArray(ArrayType {
                    additional_dimensions,
                    element_type,
                })
            }
            other => {
                return Err(MapError::BadTag {
                    expected: MetadataKind::InstanceClass.tag(),
                    found: other.tag(),
                })
            }
        };

        MetadataKind::expect(reader, MetadataKind::ConstantPool)?;
        let pool = reader.read_blob()?;
        let mut cursor = Cursor::new(pool);
        let constants = ConstantPool::deserialize(&mut cursor)
            .map_err(|err| MapError::Corrupt(format!("constant pool of {}: {}", name, err)))?;
        if cursor.position() != pool.len() as u64 {
            return Err(MapError::Corrupt(format!(
                "constant pool of {} has trailing bytes",
                name
            )));
        }

        let method_count = reader.read_count(23)?;
        let mut methods = Vec::with_capacity(method_count);
        for _ in 0..method_count {
            MetadataKind::expect(reader, MetadataKind::Method)?;
            let method_name = unqualified_name(symbols, reader.read_u32()?)?;
            let descriptor = symbols.get(SymbolId(reader.read_u32()?))?;
            let descriptor = MethodDescriptor::parse(descriptor)
                .map_err(|err| MapError::Corrupt(format!("method {}: {}", method_name, err)))?;
            let access_flags = MethodAccessFlags::from_bits_truncate(reader.read_u16()?);
            let fingerprint = reader.read_u64()?;
            let code = match reader.read_u8()? {
                0 => None,
                1 => {
                    let bytes = reader.read_blob()?;
                    let code = Code::deserialize(&mut Cursor::new(bytes)).map_err(|err| {
                        MapError::Corrupt(format!("code of {}: {}", method_name, err))
                    })?;
                    Some(code)
                }
                other => return Err(MapError::Corrupt(format!("code marker {}", other))),
            };
            methods.push(ArchivedMethod {
                name: method_name,
                descriptor,
                access_flags,
                code,
                fingerprint,
            });
        }

        let field_count = reader.read_count(14)?;
        let mut fields = Vec::with_capacity(field_count);
        for _ in 0..field_count {
            MetadataKind::expect(reader, MetadataKind::Field)?;
            let field_name = unqualified_name(symbols, reader.read_u32()?)?;
            let descriptor = symbols.get(SymbolId(reader.read_u32()?))?;
            let descriptor = FieldType::parse(descriptor)
                .map_err(|err| MapError::Corrupt(format!("field {}: {}", field_name, err)))?;
            fields.push(ArchivedField {
                name: field_name,
                descriptor,
                access_flags: FieldAccessFlags::from_bits_truncate(reader.read_u16()?),
            });
        }

        Ok(ArchivedClass {
            name,
            kind,
            access_flags,
            loader_type,
            source,
            super_name,
            interface_names,
            constants,
            methods,
            fields,
            state: ClassState::Loaded,
        })
    }
}

/// Per-class state which lives in the read-write region
///
/// Only the state of the class and the invocation counters survive a dump, and stripping resets
/// those; mirrors and resolved constant pool entries never do.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClassStateRecord {
    pub state: ClassState,
    pub invocation_counts: Vec<u32>,
}

impl ClassStateRecord {
    pub fn of(class: &ClassData) -> ClassStateRecord {
        ClassStateRecord {
            state: class.state.get(),
            invocation_counts: class
                .method_list()
                .iter()
                .map(|method| method.invocation_count.get())
                .collect(),
        }
    }

    pub fn write(&self, writer: &mut RegionWriter) -> Result<(), Error> {
        writer.write_u8(self.state.tag())?;
        writer.write_u32(self.invocation_counts.len() as u32)?;
        for count in &self.invocation_counts {
            writer.write_u32(*count)?;
        }
        Ok(())
    }

    pub fn read(reader: &mut RegionReader) -> Result<ClassStateRecord, MapError> {
        let tag = reader.read_u8()?;
        let state = ClassState::from_tag(tag)
            .ok_or_else(|| MapError::Corrupt(format!("bad class state {}", tag)))?;
        let count = reader.read_count(4)?;
        let mut invocation_counts = Vec::with_capacity(count);
        for _ in 0..count {
            invocation_counts.push(reader.read_u32()?);
        }
        Ok(ClassStateRecord {
            state,
            invocation_counts,
        })
    }
}

fn binary_name(symbols: &SharedSymbolTable, id: u32) -> Result<BinaryName, MapError> {
    let symbol = symbols.get(SymbolId(id))?;
    BinaryName::from_string(symbol.to_owned()).map_err(MapError::Corrupt)
}

fn unqualified_name(symbols: &SharedSymbolTable, id: u32) -> Result<UnqualifiedName, MapError> {
    let symbol = symbols.get(SymbolId(id))?;
    UnqualifiedName::from_string(symbol.to_owned()).map_err(MapError::Corrupt)
}
