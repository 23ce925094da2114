//! Arena-backed graph of loaded classes
//!
//! Classes are allocated once and never freed for the lifetime `'g` of the arenas, so a class may
//! hold plain references to its super class and interfaces. Identity of a class is the identity of
//! its allocation (see [`ClassId`]): two classes with the same name defined by different loaders
//! are different classes.

use crate::jvm::class_file::{Code, ConstantPool};
use crate::jvm::{
    ArrayType, BaseType, BinaryName, ClassAccessFlags, FieldAccessFlags, FieldType,
    MethodAccessFlags, MethodDescriptor, UnqualifiedName,
};
use elsa::map::FrozenMap;
use elsa::FrozenVec;
use stable_deref_trait::StableDeref;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Deref;
use typed_arena::Arena;

mod assignable;

pub use assignable::*;

pub struct ClassGraphArenas<'g> {
    class_arena: Arena<ClassData<'g>>,
    method_arena: Arena<MethodData<'g>>,
    field_arena: Arena<FieldData<'g>>,
}

impl<'g> ClassGraphArenas<'g> {
    pub fn new() -> Self {
        ClassGraphArenas {
            class_arena: Arena::new(),
            method_arena: Arena::new(),
            field_arena: Arena::new(),
        }
    }
}

impl<'g> Default for ClassGraphArenas<'g> {
    fn default() -> Self {
        ClassGraphArenas::new()
    }
}

/// Every class defined in a process, indexed by defining loader and name
///
/// Classes added with [`ClassGraph::add_unregistered_class`] get an index but are left out of the
/// name lookup, so they can only be reached through references held elsewhere.
pub struct ClassGraph<'g> {
    arenas: &'g ClassGraphArenas<'g>,
    classes: FrozenMap<(LoaderId, BinaryName), ClassId<'g>>,
    by_index: FrozenVec<ClassId<'g>>,
}

impl<'g> ClassGraph<'g> {
    /// New empty graph
    pub fn new(arenas: &'g ClassGraphArenas<'g>) -> Self {
        ClassGraph {
            arenas,
            classes: FrozenMap::new(),
            by_index: FrozenVec::new(),
        }
    }

    /// Find the class with this name defined by this loader
    pub fn lookup_class(
        &'g self,
        loader: LoaderId,
        name: &BinaryName,
    ) -> Option<&'g ClassData<'g>> {
        self.classes.get(&(loader, name.clone()))
    }

    pub fn class_at(&'g self, index: ClassIndex) -> Option<&'g ClassData<'g>> {
        self.by_index.get(index.0 as usize)
    }

    /// Number of classes (registered or not)
    pub fn len(&self) -> usize {
        self.by_index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_index.len() == 0
    }

    /// All classes, in the order they were added
    pub fn classes(&'g self) -> impl Iterator<Item = &'g ClassData<'g>> + 'g {
        (0..self.by_index.len()).filter_map(move |idx| self.by_index.get(idx))
    }

    fn allocate(&self, mut data: ClassData<'g>) -> &'g ClassData<'g> {
        data.index = ClassIndex(self.by_index.len() as u32);
        let data = &*self.arenas.class_arena.alloc(data);
        self.by_index.push(ClassId(data));
        data
    }

    /// Add a new class to the class graph
    pub fn add_class(&self, data: ClassData<'g>) -> &'g ClassData<'g> {
        let data = self.allocate(data);
        self.classes
            .insert((data.loader, data.name.clone()), ClassId(data));
        data
    }

    /// Add a class that name-based lookup must never find
    pub fn add_unregistered_class(&self, data: ClassData<'g>) -> &'g ClassData<'g> {
        self.allocate(data)
    }

    /// Add a field to the class graph and to its class
    pub fn add_field(&self, field: FieldData<'g>) -> &'g FieldData<'g> {
        let data = &*self.arenas.field_arena.alloc(field);
        data.class.fields.push(data);
        data
    }

    /// Add a method to the class graph and to its class
    pub fn add_method(&self, method: MethodData<'g>) -> &'g MethodData<'g> {
        let data = &*self.arenas.method_arena.alloc(method);
        data.class.methods.push(data);
        data
    }
}

/// Defining loader of a class
///
/// The three builtin loaders delegate parent-first: `App` to `Platform` to `Boot`. Custom loaders
/// are identified by an opaque number chosen by the embedder and delegate to `App`.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, PartialOrd, Ord)]
pub enum LoaderId {
    Boot,
    Platform,
    App,
    Custom(u32),
}

impl LoaderId {
    pub const fn parent(&self) -> Option<LoaderId> {
        match self {
            LoaderId::Boot => None,
            LoaderId::Platform => Some(LoaderId::Boot),
            LoaderId::App => Some(LoaderId::Platform),
            LoaderId::Custom(_) => Some(LoaderId::App),
        }
    }

    pub const fn is_builtin(&self) -> bool {
        !matches!(self, LoaderId::Custom(_))
    }
}

/// Dense position of a class in its graph
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, PartialOrd, Ord)]
pub struct ClassIndex(pub u32);

/// Where the bytes of a class came from
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct ClassSource {
    /// Position in the shared class path table, or one of the sentinels below
    pub classpath_index: i16,
    pub raw_size: u32,
    pub raw_crc32: u32,
}

impl ClassSource {
    /// Class was defined straight from a classlist `source:`, outside any loader's search path
    pub const UNREGISTERED_INDEX: i16 = -9999;

    /// Class did not come from a class file (eg. array classes)
    pub const NO_CLASS_PATH: i16 = -1;

    pub const fn synthetic() -> ClassSource {
        ClassSource {
            classpath_index: ClassSource::NO_CLASS_PATH,
            raw_size: 0,
            raw_crc32: 0,
        }
    }

    pub fn from_bytes(classpath_index: i16, bytes: &[u8]) -> ClassSource {
        ClassSource {
            classpath_index,
            raw_size: bytes.len() as u32,
            raw_crc32: crc32fast::hash(bytes),
        }
    }

    pub const fn is_unregistered(&self) -> bool {
        self.classpath_index == ClassSource::UNREGISTERED_INDEX
    }
}

/// Lifecycle of a class within one process
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum ClassState {
    Loaded,
    Linked,
    Initialized,
    InitializationError,
}

impl ClassState {
    pub const fn tag(&self) -> u8 {
        match self {
            ClassState::Loaded => 0,
            ClassState::Linked => 1,
            ClassState::Initialized => 2,
            ClassState::InitializationError => 3,
        }
    }

    pub const fn from_tag(tag: u8) -> Option<ClassState> {
        Some(match tag {
            0 => ClassState::Loaded,
            1 => ClassState::Linked,
            2 => ClassState::Initialized,
            3 => ClassState::InitializationError,
            _ => return None,
        })
    }
}

/// Shape of a class
pub enum ClassKind<'g> {
    Instance,

    /// `element_type` is the innermost, non-array element class
    ObjectArray(ArrayType<&'g ClassData<'g>>),
    TypeArray(ArrayType<BaseType>),
}

pub struct ClassData<'g> {
    /// Assigned when the class is added to a graph
    pub index: ClassIndex,

    /// Name of the class
    pub name: BinaryName,

    pub loader: LoaderId,
    pub access_flags: ClassAccessFlags,
    pub kind: ClassKind<'g>,

    /// Superclass is only ever missing for `java/lang/Object` itself
    pub superclass: Option<&'g ClassData<'g>>,

    /// Interfaces implemented (or super-interfaces), in declaration order
    pub interfaces: FrozenVec<&'g ClassData<'g>>,

    /// Methods
    pub methods: FrozenVec<&'g MethodData<'g>>,

    /// Fields
    pub fields: FrozenVec<&'g FieldData<'g>>,

    pub source: ClassSource,

    /// Constant pool from the class file (empty for array classes)
    pub constants: ConstantPool,

    /// Record in the mapped archive this class was restored from
    pub shared_record: Option<u32>,

    pub state: Cell<ClassState>,

    /// Handle of the `java.lang.Class` mirror in this process
    pub mirror: Cell<Option<u32>>,

    /// Resolved entries of the constant pool (pool index to class)
    pub resolved_classes: RefCell<HashMap<u16, ClassIndex>>,
}

impl<'g> ClassData<'g> {
    pub fn new(
        name: BinaryName,
        loader: LoaderId,
        access_flags: ClassAccessFlags,
        kind: ClassKind<'g>,
        superclass: Option<&'g ClassData<'g>>,
        source: ClassSource,
        constants: ConstantPool,
    ) -> ClassData<'g> {
        ClassData {
            index: ClassIndex(u32::MAX),
            name,
            loader,
            access_flags,
            kind,
            superclass,
            interfaces: FrozenVec::new(),
            methods: FrozenVec::new(),
            fields: FrozenVec::new(),
            source,
            constants,
            shared_record: None,
            state: Cell::new(ClassState::Loaded),
            mirror: Cell::new(None),
            resolved_classes: RefCell::new(HashMap::new()),
        }
    }

    pub fn is_interface(&self) -> bool {
        self.access_flags.contains(ClassAccessFlags::INTERFACE)
    }

    pub fn is_array(&self) -> bool {
        !matches!(self.kind, ClassKind::Instance)
    }

    /// Local interfaces, in declaration order
    pub fn interface_list(&self) -> Vec<&ClassData<'g>> {
        (&self.interfaces).into_iter().collect()
    }

    pub fn method_list(&self) -> Vec<&MethodData<'g>> {
        (&self.methods).into_iter().collect()
    }

    pub fn field_list(&self) -> Vec<&FieldData<'g>> {
        (&self.fields).into_iter().collect()
    }
}

impl<'g> fmt::Debug for ClassData<'g> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{:?}", self.name, self.loader)
    }
}

pub struct MethodData<'g> {
    pub class: &'g ClassData<'g>,
    pub name: UnqualifiedName,
    pub descriptor: MethodDescriptor<BinaryName>,
    pub access_flags: MethodAccessFlags,

    /// Missing for `abstract` and `native` methods
    pub code: Option<Code>,

    /// Signature fingerprint, filled in while dumping
    pub fingerprint: Cell<Option<u64>>,

    pub invocation_count: Cell<u32>,
}

impl<'g> MethodData<'g> {
    pub fn is_static(&self) -> bool {
        self.access_flags.contains(MethodAccessFlags::STATIC)
    }
}

pub struct FieldData<'g> {
    pub class: &'g ClassData<'g>,
    pub name: UnqualifiedName,
    pub descriptor: FieldType<BinaryName>,
    pub access_flags: FieldAccessFlags,
}

/// Class compared and hashed by the identity of its allocation rather than by its contents
#[derive(Copy, Clone)]
pub struct ClassId<'g>(pub &'g ClassData<'g>);

impl<'g> Hash for ClassId<'g> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::ptr::hash(self.0, state)
    }
}

impl<'g> PartialEq for ClassId<'g> {
    fn eq(&self, other: &ClassId<'g>) -> bool {
        std::ptr::eq(self.0, other.0)
    }
}

impl<'g> Eq for ClassId<'g> {}

impl<'g> Deref for ClassId<'g> {
    type Target = ClassData<'g>;

    fn deref(&self) -> &ClassData<'g> {
        self.0
    }
}

impl<'g> fmt::Debug for ClassId<'g> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

unsafe impl<'g> StableDeref for ClassId<'g> {}
