use crate::jvm::class_file::{
    Attribute, AttributeLike, ClassConstantIndex, ClassFile, Code, ConstantsPool, Field, Method,
    Version,
};
use crate::jvm::{ClassAccessFlags, Error, FieldAccessFlags, MethodAccessFlags};

/// Incrementally assemble a class file
///
/// ```
/// use appcds::jvm::class_file::ClassFileBuilder;
/// use appcds::jvm::ClassAccessFlags;
///
/// let mut builder = ClassFileBuilder::new(
///     "Bar",
///     Some("java/lang/Object"),
///     ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER,
/// ).unwrap();
/// builder.interface("java/lang/Cloneable").unwrap();
/// builder.default_constructor("java/lang/Object").unwrap();
/// let class_file = builder.build();
/// assert_eq!(class_file.interface_names().unwrap(), ["java/lang/Cloneable"]);
/// ```
pub struct ClassFileBuilder {
    version: Version,
    constants: ConstantsPool,
    access_flags: ClassAccessFlags,
    this_class: ClassConstantIndex,
    super_class: Option<ClassConstantIndex>,
    interfaces: Vec<ClassConstantIndex>,
    fields: Vec<Field>,
    methods: Vec<Method>,
}

impl ClassFileBuilder {
    pub fn new(
        name: &str,
        super_name: Option<&str>,
        access_flags: ClassAccessFlags,
    ) -> Result<ClassFileBuilder, Error> {
        let mut constants = ConstantsPool::new();
        let this_class = constants.get_class(name)?;
        let super_class = super_name
            .map(|super_name| constants.get_class(super_name))
            .transpose()?;
        Ok(ClassFileBuilder {
            version: Version::JAVA8,
            constants,
            access_flags,
            this_class,
            super_class,
            interfaces: vec![],
            fields: vec![],
            methods: vec![],
        })
    }

    /// Add a directly implemented interface (order of calls is declaration order)
    pub fn interface(&mut self, name: &str) -> Result<&mut Self, Error> {
        let interface = self.constants.get_class(name)?;
        self.interfaces.push(interface);
        Ok(self)
    }

    /// Mention a class in the constant pool without otherwise using it
    pub fn class_reference(&mut self, name: &str) -> Result<&mut Self, Error> {
        self.constants.get_class(name)?;
        Ok(self)
    }

    pub fn field(
        &mut self,
        access_flags: FieldAccessFlags,
        name: &str,
        descriptor: &str,
    ) -> Result<&mut Self, Error> {
        self.fields.push(Field {
            access_flags,
            name_index: self.constants.get_utf8(name)?,
            descriptor_index: self.constants.get_utf8(descriptor)?,
            attributes: vec![],
        });
        Ok(self)
    }

    pub fn method(
        &mut self,
        access_flags: MethodAccessFlags,
        name: &str,
        descriptor: &str,
        code: Option<Code>,
    ) -> Result<&mut Self, Error> {
        let name_index = self.constants.get_utf8(name)?;
        let descriptor_index = self.constants.get_utf8(descriptor)?;
        let attributes = match code {
            Some(code) => vec![self.attribute(code)?],
            None => vec![],
        };
        self.methods.push(Method {
            access_flags,
            name_index,
            descriptor_index,
            attributes,
        });
        Ok(self)
    }

    /// Add `public <init>()V` which just calls the super constructor
    pub fn default_constructor(&mut self, super_name: &str) -> Result<&mut Self, Error> {
        let super_init = self
            .constants
            .get_method_ref(super_name, "<init>", "()V", false)?;
        let [hi, lo] = super_init.0.to_be_bytes();
        let code = Code {
            max_stack: 1,
            max_locals: 1,
            // aload_0, invokespecial, return
            code_array: vec![0x2a, 0xb7, hi, lo, 0xb1],
            exception_table: vec![],
            attributes: vec![],
        };
        self.method(MethodAccessFlags::PUBLIC, "<init>", "()V", Some(code))
    }

    fn attribute<A: AttributeLike>(&mut self, attribute: A) -> Result<Attribute, Error> {
        let name_index = self.constants.get_utf8(A::NAME)?;
        let mut info = vec![];
        attribute.serialize(&mut info)?;
        Ok(Attribute { name_index, info })
    }

    pub fn build(self) -> ClassFile {
        ClassFile {
            version: self.version,
            constants: self.constants.into_pool(),
            access_flags: self.access_flags,
            this_class: self.this_class,
            super_class: self.super_class,
            interfaces: self.interfaces,
            fields: self.fields,
            methods: self.methods,
            attributes: vec![],
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn built_class_parses_back() {
        let mut builder = ClassFileBuilder::new(
            "com/example/Foo",
            Some("java/lang/Object"),
            ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER,
        )
        .unwrap();
        builder.interface("java/lang/Cloneable").unwrap();
        builder.interface("java/io/Serializable").unwrap();
        builder
            .field(FieldAccessFlags::PRIVATE, "count", "I")
            .unwrap();
        builder.default_constructor("java/lang/Object").unwrap();
        builder
            .method(
                MethodAccessFlags::PUBLIC | MethodAccessFlags::ABSTRACT,
                "size",
                "()J",
                None,
            )
            .unwrap();
        let bytes = builder.build().to_bytes().unwrap();

        let parsed = ClassFile::parse(&bytes).unwrap();
        assert_eq!(parsed.this_class_name().unwrap(), "com/example/Foo");
        assert_eq!(
            parsed.super_class_name().unwrap(),
            Some("java/lang/Object")
        );
        assert_eq!(
            parsed.interface_names().unwrap(),
            ["java/lang/Cloneable", "java/io/Serializable"]
        );
        assert_eq!(parsed.fields.len(), 1);

        let init = parsed.methods[0].code(&parsed.constants).unwrap().unwrap();
        assert_eq!(init.max_locals, 1);
        assert_eq!(init.code_array.len(), 5);
        assert!(parsed.methods[1].code(&parsed.constants).unwrap().is_none());
    }

    #[test]
    fn object_has_no_super() {
        let builder =
            ClassFileBuilder::new("java/lang/Object", None, ClassAccessFlags::PUBLIC).unwrap();
        let bytes = builder.build().to_bytes().unwrap();
        let parsed = ClassFile::parse(&bytes).unwrap();
        assert_eq!(parsed.super_class_name().unwrap(), None);
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(
            ClassFile::parse(&[0xCA, 0xFE, 0xBA, 0xBE, 0, 0]),
            Err(Error::ClassFormat(_))
        ));
        assert!(matches!(
            ClassFile::parse(&[0xDE, 0xAD, 0xBE, 0xEF, 0, 0, 0, 52, 0, 1]),
            Err(Error::ClassFormat(_))
        ));

        let flags = ClassAccessFlags::PUBLIC;
        let builder = ClassFileBuilder::new("Foo", Some("java/lang/Object"), flags).unwrap();
        let mut bytes = builder.build().to_bytes().unwrap();
        bytes.push(0);
        assert!(ClassFile::parse(&bytes).is_err());
    }
}
