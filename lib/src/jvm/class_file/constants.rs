use crate::jvm::{Deserialize, Error, Serialize};
use byteorder::{ReadBytesExt, WriteBytesExt};
use std::collections::HashMap;
use std::io::{Error as IoError, ErrorKind};

/// Constants pool of a class file
///
/// Entries are addressed by their constant pool index. Index 0 is never valid and the slot after a
/// `Long` or `Double` constant is unusable, so both are represented as empty slots.
#[derive(Debug, Clone, PartialEq)]
pub struct ConstantPool {
    slots: Vec<Option<Constant>>,
}

impl Default for ConstantPool {
    fn default() -> Self {
        ConstantPool { slots: vec![None] }
    }
}

impl ConstantPool {
    /// Make a fresh empty constants pool
    pub fn new() -> ConstantPool {
        ConstantPool::default()
    }

    /// Value of `constant_pool_count` in the class file (one more than the largest index)
    pub fn count(&self) -> u16 {
        self.slots.len() as u16
    }

    /// Push a constant into the constant pool, provided there is space for it
    ///
    /// Note: the largest valid index is 65535, indexing starts at 1, and some constants take two
    /// spaces.
    pub fn push(&mut self, constant: Constant) -> Result<ConstantIndex, Error> {
        let offset = self.slots.len();
        let width = constant.width();
        if offset + width > u16::MAX as usize {
            return Err(Error::ConstantPoolOverflow {
                constant,
                offset: offset as u16,
            });
        }
        self.slots.push(Some(constant));
        if width == 2 {
            self.slots.push(None);
        }
        Ok(ConstantIndex(offset as u16))
    }

    pub fn get(&self, index: ConstantIndex) -> Option<&Constant> {
        self.slots.get(index.0 as usize).and_then(Option::as_ref)
    }

    /// Iterate over the constants along with their indices
    pub fn iter(&self) -> impl Iterator<Item = (ConstantIndex, &Constant)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(idx, slot)| Some((ConstantIndex(idx as u16), slot.as_ref()?)))
    }

    pub fn utf8(&self, index: Utf8ConstantIndex) -> Result<&str, Error> {
        match self.get(index.0) {
            Some(Constant::Utf8(string)) => Ok(string),
            _ => Err(Error::BadConstantIndex {
                index: (index.0).0,
                expected: "Utf8",
            }),
        }
    }

    /// Name of a `CONSTANT_Class_info` entry
    pub fn class_name(&self, index: ClassConstantIndex) -> Result<&str, Error> {
        match self.get(index.0) {
            Some(Constant::Class(name)) => self.utf8(*name),
            _ => Err(Error::BadConstantIndex {
                index: (index.0).0,
                expected: "Class",
            }),
        }
    }

    /// Names of every `CONSTANT_Class_info` in the pool, in pool order
    pub fn class_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.iter().filter_map(move |(_, constant)| match constant {
            Constant::Class(name) => self.utf8(*name).ok(),
            _ => None,
        })
    }
}

impl Serialize for ConstantPool {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.count().serialize(writer)?;
        for (_, constant) in self.iter() {
            constant.serialize(writer)?;
        }
        Ok(())
    }
}

impl Deserialize for ConstantPool {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> std::io::Result<Self> {
        let count = u16::deserialize(reader)?;
        if count == 0 {
            let msg = "constant_pool_count must be at least 1";
            return Err(IoError::new(ErrorKind::InvalidData, msg));
        }
        let mut slots = Vec::with_capacity(count as usize);
        slots.push(None);
        while slots.len() < count as usize {
            let constant = Constant::deserialize(reader)?;
            let width = constant.width();
            slots.push(Some(constant));
            if width == 2 {
                slots.push(None);
            }
        }
        if slots.len() != count as usize {
            let msg = "8-byte constant straddles the end of the constant pool";
            return Err(IoError::new(ErrorKind::InvalidData, msg));
        }
        Ok(ConstantPool { slots })
    }
}

/// Class file constants pool builder
///
/// Deduplicates the constants it is asked for and hands out indices into the underlying
/// [`ConstantPool`].
#[derive(Default)]
pub struct ConstantsPool {
    constants: ConstantPool,
    utf8s: HashMap<String, Utf8ConstantIndex>,
    classes: HashMap<Utf8ConstantIndex, ClassConstantIndex>,
    strings: HashMap<Utf8ConstantIndex, StringConstantIndex>,
    name_and_types: HashMap<(Utf8ConstantIndex, Utf8ConstantIndex), NameAndTypeConstantIndex>,
    longs: HashMap<i64, ConstantIndex>,
}

impl ConstantsPool {
    pub fn new() -> ConstantsPool {
        ConstantsPool::default()
    }

    /// Consume the builder and return the final pool
    pub fn into_pool(self) -> ConstantPool {
        self.constants
    }

    /// Get or insert a utf8 constant from the constant pool
    pub fn get_utf8(&mut self, utf8: &str) -> Result<Utf8ConstantIndex, Error> {
        if let Some(idx) = self.utf8s.get(utf8) {
            return Ok(*idx);
        }
        let idx = Utf8ConstantIndex(self.constants.push(Constant::Utf8(utf8.to_owned()))?);
        self.utf8s.insert(utf8.to_owned(), idx);
        Ok(idx)
    }

    /// Get or insert a class constant (the name may also be an array descriptor)
    pub fn get_class(&mut self, name: &str) -> Result<ClassConstantIndex, Error> {
        let utf8 = self.get_utf8(name)?;
        if let Some(idx) = self.classes.get(&utf8) {
            return Ok(*idx);
        }
        let idx = ClassConstantIndex(self.constants.push(Constant::Class(utf8))?);
        self.classes.insert(utf8, idx);
        Ok(idx)
    }

    /// Get or insert a string constant from the constant pool
    pub fn get_string(&mut self, string: &str) -> Result<StringConstantIndex, Error> {
        let utf8 = self.get_utf8(string)?;
        if let Some(idx) = self.strings.get(&utf8) {
            return Ok(*idx);
        }
        let idx = StringConstantIndex(self.constants.push(Constant::String(utf8))?);
        self.strings.insert(utf8, idx);
        Ok(idx)
    }

    /// Get or insert a name & type constant from the constant pool
    pub fn get_name_and_type(
        &mut self,
        name: &str,
        descriptor: &str,
    ) -> Result<NameAndTypeConstantIndex, Error> {
        let key = (self.get_utf8(name)?, self.get_utf8(descriptor)?);
        if let Some(idx) = self.name_and_types.get(&key) {
            return Ok(*idx);
        }
        let constant = Constant::NameAndType {
            name: key.0,
            descriptor: key.1,
        };
        let idx = NameAndTypeConstantIndex(self.constants.push(constant)?);
        self.name_and_types.insert(key, idx);
        Ok(idx)
    }

    /// Get or insert a method reference
    pub fn get_method_ref(
        &mut self,
        class: &str,
        name: &str,
        descriptor: &str,
        is_interface: bool,
    ) -> Result<ConstantIndex, Error> {
        let class = self.get_class(class)?;
        let name_and_type = self.get_name_and_type(name, descriptor)?;
        self.constants.push(Constant::MethodRef {
            class,
            name_and_type,
            is_interface,
        })
    }

    pub fn get_long(&mut self, long: i64) -> Result<ConstantIndex, Error> {
        if let Some(idx) = self.longs.get(&long) {
            return Ok(*idx);
        }
        let idx = self.constants.push(Constant::Long(long))?;
        self.longs.insert(long, idx);
        Ok(idx)
    }
}

/// Constants as in the constant pool
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-4.html#jvms-4.4
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    /// Class or an interface
    Class(Utf8ConstantIndex),

    /// Field
    FieldRef(ClassConstantIndex, NameAndTypeConstantIndex),

    /// Method (this combines `Methodref` and `InterfaceMethodref`
    MethodRef {
        class: ClassConstantIndex,
        name_and_type: NameAndTypeConstantIndex,
        is_interface: bool,
    },

    /// Constant object of type `java.lang.String`
    String(Utf8ConstantIndex),

    /// Constant primitive of type `int`
    Integer(i32),

    /// Constant primitive of type `float`
    Float(f32),

    /// Constant primitive of type `long`
    Long(i64),

    /// Constant primitive of type `double`
    Double(f64),

    /// Name and a type (eg. for a field or a method)
    NameAndType {
        name: Utf8ConstantIndex,
        descriptor: Utf8ConstantIndex,
    },

    /// Constant UTF-8 encoded raw string value
    ///
    /// Despite the name, the encoding is not quite UTF-8 (the encoding of the
    /// null character `\u{0000}` and the encoding of supplementary characters
    /// is different).
    Utf8(String),

    /// Constant object of type `java.lang.invoke.MethodHandle`
    MethodHandle {
        handle_kind: HandleKind,
        member: ConstantIndex,
    },

    /// Method type
    MethodType { descriptor: Utf8ConstantIndex },

    /// Dynamically-computed constant
    Dynamic {
        bootstrap_method: u16,
        name_and_type: NameAndTypeConstantIndex,
    },

    /// Dynamically-computed call site
    InvokeDynamic {
        /// Index into the `BootstrapMethods` attribute
        bootstrap_method: u16,
        method_descriptor: NameAndTypeConstantIndex,
    },

    Module(Utf8ConstantIndex),
    Package(Utf8ConstantIndex),
}

impl Constant {
    /// Almost all constants have width 1, except for `Constant::Long` and `Constant::Double`.
    ///
    /// > All 8-byte constants take up two entries in the constant_pool table of the class file.
    /// > In retrospect, making 8-byte constants take two constant pool entries was a poor choice.
    pub fn width(&self) -> usize {
        match self {
            Constant::Long(_) | Constant::Double(_) => 2,
            _ => 1,
        }
    }
}

impl Serialize for Constant {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        match self {
            Constant::Utf8(string) => {
                1u8.serialize(writer)?;
                let buffer: Vec<u8> = encode_modified_utf8(string);
                (buffer.len() as u16).serialize(writer)?;
                writer.write_all(&buffer)?;
            }
            Constant::Integer(integer) => {
                3u8.serialize(writer)?;
                integer.serialize(writer)?;
            }
            Constant::Float(float) => {
                4u8.serialize(writer)?;
                float.serialize(writer)?;
            }
            Constant::Long(long) => {
                5u8.serialize(writer)?;
                long.serialize(writer)?;
            }
            Constant::Double(double) => {
                6u8.serialize(writer)?;
                double.serialize(writer)?;
            }
            Constant::Class(name) => {
                7u8.serialize(writer)?;
                name.serialize(writer)?;
            }
            Constant::String(bytes) => {
                8u8.serialize(writer)?;
                bytes.serialize(writer)?;
            }
            Constant::FieldRef(class, name_and_type) => {
                9u8.serialize(writer)?;
                class.serialize(writer)?;
                name_and_type.serialize(writer)?;
            }
            Constant::MethodRef {
                class,
                name_and_type,
                is_interface,
            } => {
                (if !is_interface { 10u8 } else { 11u8 }).serialize(writer)?;
                class.serialize(writer)?;
                name_and_type.serialize(writer)?;
            }
            Constant::NameAndType { name, descriptor } => {
                12u8.serialize(writer)?;
                name.serialize(writer)?;
                descriptor.serialize(writer)?;
            }
            Constant::MethodHandle {
                handle_kind,
                member,
            } => {
                15u8.serialize(writer)?;
                handle_kind.serialize(writer)?;
                member.serialize(writer)?;
            }
            Constant::MethodType { descriptor } => {
                16u8.serialize(writer)?;
                descriptor.serialize(writer)?;
            }
            Constant::Dynamic {
                bootstrap_method,
                name_and_type,
            } => {
                17u8.serialize(writer)?;
                bootstrap_method.serialize(writer)?;
                name_and_type.serialize(writer)?;
            }
            Constant::InvokeDynamic {
                bootstrap_method,
                method_descriptor,
            } => {
                18u8.serialize(writer)?;
                bootstrap_method.serialize(writer)?;
                method_descriptor.serialize(writer)?;
            }
            Constant::Module(name) => {
                19u8.serialize(writer)?;
                name.serialize(writer)?;
            }
            Constant::Package(name) => {
                20u8.serialize(writer)?;
                name.serialize(writer)?;
            }
        };
        Ok(())
    }
}

impl Deserialize for Constant {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> std::io::Result<Self> {
        let tag = u8::deserialize(reader)?;
        let constant = match tag {
            1 => {
                let len = u16::deserialize(reader)?;
                let mut buffer = vec![0; len as usize];
                reader.read_exact(&mut buffer)?;
                let string = decode_modified_utf8(&buffer)
                    .map_err(|msg| IoError::new(ErrorKind::InvalidData, msg))?;
                Constant::Utf8(string)
            }
            3 => Constant::Integer(i32::deserialize(reader)?),
            4 => Constant::Float(f32::deserialize(reader)?),
            5 => Constant::Long(i64::deserialize(reader)?),
            6 => Constant::Double(f64::deserialize(reader)?),
            7 => Constant::Class(Utf8ConstantIndex::deserialize(reader)?),
            8 => Constant::String(Utf8ConstantIndex::deserialize(reader)?),
            9 => Constant::FieldRef(
                ClassConstantIndex::deserialize(reader)?,
                NameAndTypeConstantIndex::deserialize(reader)?,
            ),
            10 | 11 => Constant::MethodRef {
                class: ClassConstantIndex::deserialize(reader)?,
                name_and_type: NameAndTypeConstantIndex::deserialize(reader)?,
                is_interface: tag == 11,
            },
            12 => Constant::NameAndType {
                name: Utf8ConstantIndex::deserialize(reader)?,
                descriptor: Utf8ConstantIndex::deserialize(reader)?,
            },
            15 => Constant::MethodHandle {
                handle_kind: HandleKind::deserialize(reader)?,
                member: ConstantIndex::deserialize(reader)?,
            },
            16 => Constant::MethodType {
                descriptor: Utf8ConstantIndex::deserialize(reader)?,
            },
            17 => Constant::Dynamic {
                bootstrap_method: u16::deserialize(reader)?,
                name_and_type: NameAndTypeConstantIndex::deserialize(reader)?,
            },
            18 => Constant::InvokeDynamic {
                bootstrap_method: u16::deserialize(reader)?,
                method_descriptor: NameAndTypeConstantIndex::deserialize(reader)?,
            },
            19 => Constant::Module(Utf8ConstantIndex::deserialize(reader)?),
            20 => Constant::Package(Utf8ConstantIndex::deserialize(reader)?),
            other => {
                let msg = format!("Unknown constant pool tag {}", other);
                return Err(IoError::new(ErrorKind::InvalidData, msg));
            }
        };
        Ok(constant)
    }
}

/// Modified UTF-8 format used in class files.
///
/// See [this `DataInput` section for details][0]. Quoting from that section:
///
/// > The differences between this format and the standard UTF-8 format are the following:
/// >
/// >  * The null byte `\u0000` is encoded in 2-byte format rather than 1-byte, so that the encoded
/// >    strings never have embedded nulls.
/// >  * Only the 1-byte, 2-byte, and 3-byte formats are used.
/// >  * Supplementary characters are represented in the form of surrogate pairs.
///
/// [0]: https://docs.oracle.com/en/java/javase/17/docs/api/java.base/java/io/DataInput.html#modified-utf-8
pub fn encode_modified_utf8(string: &str) -> Vec<u8> {
    let mut buffer: Vec<u8> = vec![];
    for c in string.chars() {
        // Handle the exception for how `\u{0000}` is represented
        let len: usize = if c == '\u{0000}' { 2 } else { c.len_utf8() };
        let code: u32 = c as u32;

        match len {
            1 => buffer.push(code as u8),
            2 => {
                buffer.push((code >> 6 & 0x1F) as u8 | 0b1100_0000);
                buffer.push((code & 0x3F) as u8 | 0b1000_0000);
            }
            3 => {
                buffer.push((code >> 12 & 0x0F) as u8 | 0b1110_0000);
                buffer.push((code >> 6 & 0x3F) as u8 | 0b1000_0000);
                buffer.push((code & 0x3F) as u8 | 0b1000_0000);
            }

            // Supplementary characters: main divergence from unicode
            _ => {
                buffer.push(0b1110_1101);
                buffer.push(((code >> 16 & 0x0F) as u8).wrapping_sub(1) & 0x0F | 0b1010_0000);
                buffer.push((code >> 10 & 0x3F) as u8 | 0b1000_0000);

                buffer.push(0b1110_1101);
                buffer.push(((code >> 6 & 0x0F) as u8) | 0b1011_0000);
                buffer.push((code & 0x3F) as u8 | 0b1000_0000);
            }
        }
    }
    buffer
}

/// Inverse of [`encode_modified_utf8`]
///
/// Surrogate pairs are recombined into supplementary characters. Unpaired surrogates cannot be
/// represented in a Rust `String` and are rejected.
pub fn decode_modified_utf8(bytes: &[u8]) -> Result<String, String> {
    let mut units: Vec<u16> = Vec::with_capacity(bytes.len());
    let mut idx = 0;
    let continuation = |idx: usize| -> Result<u16, String> {
        match bytes.get(idx) {
            Some(b) if b & 0b1100_0000 == 0b1000_0000 => Ok((b & 0x3F) as u16),
            _ => Err(format!("Bad continuation byte at offset {}", idx)),
        }
    };
    while idx < bytes.len() {
        let b = bytes[idx];
        if b == 0 {
            return Err(format!("Raw null byte at offset {}", idx));
        } else if b & 0b1000_0000 == 0 {
            units.push(b as u16);
            idx += 1;
        } else if b & 0b1110_0000 == 0b1100_0000 {
            units.push(((b & 0x1F) as u16) << 6 | continuation(idx + 1)?);
            idx += 2;
        } else if b & 0b1111_0000 == 0b1110_0000 {
            let unit = ((b & 0x0F) as u16) << 12 | continuation(idx + 1)? << 6;
            units.push(unit | continuation(idx + 2)?);
            idx += 3;
        } else {
            return Err(format!("Bad leading byte {:#x} at offset {}", b, idx));
        }
    }
    String::from_utf16(&units).map_err(|err| err.to_string())
}

#[cfg(test)]
mod modified_utf8_tests {
    use super::*;

    #[test]
    fn containing_null_byte() {
        assert_eq!(encode_modified_utf8("a\x00a"), vec![97, 192, 128, 97]);
        assert_eq!(decode_modified_utf8(&[97, 192, 128, 97]).unwrap(), "a\x00a");
        assert!(decode_modified_utf8(&[97, 0, 97]).is_err());
    }

    #[test]
    fn simple_ascii() {
        assert_eq!(encode_modified_utf8("foo"), vec![102, 111, 111]);
        assert_eq!(decode_modified_utf8(b"java/lang/Object").unwrap(), "java/lang/Object");
    }

    #[test]
    fn two_and_three_byte_encodings() {
        let text = "ĄǍǞऄअॲ";
        let encoded = encode_modified_utf8(text);
        assert_eq!(&encoded[..4], &[196, 132, 199, 141]);
        assert_eq!(decode_modified_utf8(&encoded).unwrap(), text);
    }

    #[test]
    fn supplementary_characters() {
        let encoded = encode_modified_utf8("\u{10000}\u{10FFFF}");
        assert_eq!(
            encoded,
            vec![237, 160, 128, 237, 176, 128, 237, 175, 191, 237, 191, 191]
        );
        assert_eq!(
            decode_modified_utf8(&encoded).unwrap(),
            "\u{10000}\u{10FFFF}"
        );
    }

    #[test]
    fn truncated_sequence() {
        assert!(decode_modified_utf8(&[0b1110_0000, 0b1000_0000]).is_err());
    }
}

#[derive(Copy, Clone, Hash, Eq, PartialEq, Debug, PartialOrd, Ord)]
pub struct ConstantIndex(pub u16);

#[derive(Copy, Clone, Hash, Eq, PartialEq, Debug)]
pub struct Utf8ConstantIndex(pub ConstantIndex);

#[derive(Copy, Clone, Hash, Eq, PartialEq, Debug)]
pub struct StringConstantIndex(pub ConstantIndex);

#[derive(Copy, Clone, Hash, Eq, PartialEq, Debug)]
pub struct NameAndTypeConstantIndex(pub ConstantIndex);

#[derive(Copy, Clone, Hash, Eq, PartialEq, Debug)]
pub struct ClassConstantIndex(pub ConstantIndex);

impl Serialize for ConstantIndex {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.0.serialize(writer)
    }
}

impl Deserialize for ConstantIndex {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> std::io::Result<Self> {
        u16::deserialize(reader).map(ConstantIndex)
    }
}

macro_rules! typed_constant_index {
    ($index:ident) => {
        impl From<$index> for ConstantIndex {
            fn from(index: $index) -> ConstantIndex {
                index.0
            }
        }

        impl Serialize for $index {
            fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
                self.0.serialize(writer)
            }
        }

        impl Deserialize for $index {
            fn deserialize<R: ReadBytesExt>(reader: &mut R) -> std::io::Result<Self> {
                ConstantIndex::deserialize(reader).map($index)
            }
        }
    };
}

typed_constant_index!(Utf8ConstantIndex);
typed_constant_index!(StringConstantIndex);
typed_constant_index!(NameAndTypeConstantIndex);
typed_constant_index!(ClassConstantIndex);

/// Type of method handle
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-5.html#jvms-5.4.3.5-220
#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq)]
pub enum HandleKind {
    GetField,
    GetStatic,
    PutField,
    PutStatic,
    InvokeVirtual,
    InvokeStatic,
    InvokeSpecial,
    NewInvokeSpecial,
    InvokeInterface,
}

impl Serialize for HandleKind {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        let byte: u8 = match self {
            HandleKind::GetField => 1,
            HandleKind::GetStatic => 2,
            HandleKind::PutField => 3,
            HandleKind::PutStatic => 4,
            HandleKind::InvokeVirtual => 5,
            HandleKind::InvokeStatic => 6,
            HandleKind::InvokeSpecial => 7,
            HandleKind::NewInvokeSpecial => 8,
            HandleKind::InvokeInterface => 9,
        };
        byte.serialize(writer)
    }
}

impl Deserialize for HandleKind {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> std::io::Result<Self> {
        Ok(match u8::deserialize(reader)? {
            1 => HandleKind::GetField,
            2 => HandleKind::GetStatic,
            3 => HandleKind::PutField,
            4 => HandleKind::PutStatic,
            5 => HandleKind::InvokeVirtual,
            6 => HandleKind::InvokeStatic,
            7 => HandleKind::InvokeSpecial,
            8 => HandleKind::NewInvokeSpecial,
            9 => HandleKind::InvokeInterface,
            other => {
                let msg = format!("Unknown method handle kind {}", other);
                return Err(IoError::new(ErrorKind::InvalidData, msg));
            }
        })
    }
}

#[cfg(test)]
mod pool_tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn wide_constants_take_two_slots() {
        let mut builder = ConstantsPool::new();
        let long = builder.get_long(7).unwrap();
        let class = builder.get_class("java/lang/Object").unwrap();
        assert_eq!(long, ConstantIndex(1));
        // utf8 at 3, class at 4
        assert_eq!(class, ClassConstantIndex(ConstantIndex(4)));

        let pool = builder.into_pool();
        assert_eq!(pool.count(), 5);
        assert_eq!(pool.get(ConstantIndex(2)), None);
        assert_eq!(pool.class_name(class).unwrap(), "java/lang/Object");
    }

    #[test]
    fn builder_deduplicates() {
        let mut builder = ConstantsPool::new();
        let a = builder.get_class("Foo").unwrap();
        let b = builder.get_class("Foo").unwrap();
        assert_eq!(a, b);
        assert_eq!(builder.into_pool().class_names().collect::<Vec<_>>(), ["Foo"]);
    }

    #[test]
    fn pool_codec() {
        let mut builder = ConstantsPool::new();
        builder.get_class("[Ljava/lang/String;").unwrap();
        builder.get_long(-1).unwrap();
        builder.get_string("hello").unwrap();
        builder
            .get_method_ref("java/lang/Object", "<init>", "()V", false)
            .unwrap();
        let pool = builder.into_pool();

        let mut bytes = vec![];
        pool.serialize(&mut bytes).unwrap();
        let read = ConstantPool::deserialize(&mut Cursor::new(&bytes)).unwrap();
        assert_eq!(read, pool);
    }

    #[test]
    fn bad_class_index() {
        let mut builder = ConstantsPool::new();
        let utf8 = builder.get_utf8("Foo").unwrap();
        let pool = builder.into_pool();
        assert!(pool.class_name(ClassConstantIndex(utf8.0)).is_err());
        assert!(pool.utf8(Utf8ConstantIndex(ConstantIndex(9))).is_err());
    }
}
