use crate::jvm::class_file::{
    Attribute, ClassConstantIndex, ConstantIndex, ConstantPool, Field, Method, Version,
};
use crate::jvm::{ClassAccessFlags, Deserialize, Error, Serialize};
use byteorder::{ReadBytesExt, WriteBytesExt};
use std::fs;
use std::io::{Cursor, ErrorKind};
use std::path::Path;

/// Representation of the [`class` file format of the JVM][0]
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-4.html
#[derive(Debug, Clone)]
pub struct ClassFile {
    pub version: Version,
    pub constants: ConstantPool,
    pub access_flags: ClassAccessFlags,
    pub this_class: ClassConstantIndex,

    /// Only `java/lang/Object` has no super class (encoded as index 0)
    pub super_class: Option<ClassConstantIndex>,
    pub interfaces: Vec<ClassConstantIndex>,
    pub fields: Vec<Field>,
    pub methods: Vec<Method>,
    pub attributes: Vec<Attribute>,
}

impl ClassFile {
    /// Magic header bytes that go at the front of the serialized class file
    const MAGIC: [u8; 4] = [0xCA, 0xFE, 0xBA, 0xBE];

    /// Parse a class file, rejecting trailing bytes
    pub fn parse(bytes: &[u8]) -> Result<ClassFile, Error> {
        let mut cursor = Cursor::new(bytes);
        let class_file = ClassFile::deserialize(&mut cursor).map_err(|err| {
            if err.kind() == ErrorKind::UnexpectedEof {
                Error::ClassFormat(String::from("Truncated class file"))
            } else {
                Error::ClassFormat(err.to_string())
            }
        })?;
        if cursor.position() != bytes.len() as u64 {
            return Err(Error::ClassFormat(String::from(
                "Extra bytes at the end of class file",
            )));
        }
        Ok(class_file)
    }

    /// Serialize the class file into a fresh buffer
    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        let mut bytes = vec![];
        self.serialize(&mut bytes)?;
        Ok(bytes)
    }

    /// Save the class file to disk
    pub fn save_to_path<P: AsRef<Path>>(
        &self,
        path: P,
        create_missing_directories: bool,
    ) -> std::io::Result<()> {
        let path = path.as_ref();
        if create_missing_directories {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
        }
        let mut class_file = fs::File::create(path)?;
        self.serialize(&mut class_file)
    }

    pub fn this_class_name(&self) -> Result<&str, Error> {
        self.constants.class_name(self.this_class)
    }

    pub fn super_class_name(&self) -> Result<Option<&str>, Error> {
        self.super_class
            .map(|idx| self.constants.class_name(idx))
            .transpose()
    }

    /// Names of the directly implemented interfaces, in declaration order
    pub fn interface_names(&self) -> Result<Vec<&str>, Error> {
        self.interfaces
            .iter()
            .map(|idx| self.constants.class_name(*idx))
            .collect()
    }
}

impl Serialize for ClassFile {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        writer.write_all(&ClassFile::MAGIC)?;
        self.version.serialize(writer)?;
        self.constants.serialize(writer)?;
        self.access_flags.serialize(writer)?;
        self.this_class.serialize(writer)?;
        match self.super_class {
            Some(super_class) => super_class.serialize(writer)?,
            None => 0u16.serialize(writer)?,
        }
        self.interfaces.serialize(writer)?;
        self.fields.serialize(writer)?;
        self.methods.serialize(writer)?;
        self.attributes.serialize(writer)?;
        Ok(())
    }
}

impl Deserialize for ClassFile {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> std::io::Result<Self> {
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if magic != ClassFile::MAGIC {
            let msg = format!("Incompatible magic value {:02x?} in class file", magic);
            return Err(std::io::Error::new(ErrorKind::InvalidData, msg));
        }
        let version = Version::deserialize(reader)?;
        let constants = ConstantPool::deserialize(reader)?;
        let access_flags = ClassAccessFlags::deserialize(reader)?;
        let this_class = ClassConstantIndex::deserialize(reader)?;
        let super_class = match ConstantIndex::deserialize(reader)? {
            ConstantIndex(0) => None,
            idx => Some(ClassConstantIndex(idx)),
        };
        Ok(ClassFile {
            version,
            constants,
            access_flags,
            this_class,
            super_class,
            interfaces: Vec::deserialize(reader)?,
            fields: Vec::deserialize(reader)?,
            methods: Vec::deserialize(reader)?,
            attributes: Vec::deserialize(reader)?,
        })
    }
}
