use crate::jvm::descriptors::{ParseDescriptor, RefType};
use std::borrow::Cow;
use std::fmt::{Debug, Display, Error as FmtError, Formatter};

/// Names of methods, fields
///
/// See <https://docs.oracle.com/javase/specs/jvms/se16/html/jvms-4.html#jvms-4.2.2>
#[derive(Clone, Hash, Eq, PartialEq, PartialOrd, Ord)]
pub struct UnqualifiedName(Cow<'static, str>);

/// Names of classes and interfaces
///
/// Array classes are also named with a `BinaryName`, in which case the name is the array
/// descriptor (eg. `[Ljava/lang/Object;` or `[[I`).
///
/// See <https://docs.oracle.com/javase/specs/jvms/se16/html/jvms-4.html#jvms-4.2.1>
#[derive(Clone, Hash, Eq, PartialEq, PartialOrd, Ord)]
pub struct BinaryName(Cow<'static, str>);

/// Extracts the raw underlying string name
impl AsRef<str> for UnqualifiedName {
    fn as_ref(&self) -> &str {
        self.0.as_ref()
    }
}

/// Extracts the raw underlying string name
impl AsRef<str> for BinaryName {
    fn as_ref(&self) -> &str {
        self.0.as_ref()
    }
}

pub trait Name: Sized {
    /// Check if a string would be a valid name
    fn check_valid(name: impl AsRef<str>) -> Result<(), String>;

    /// Extact the raw underlying string data:
    fn as_cow(&self) -> &Cow<'static, str>;

    /// Extact the raw underlying string name
    fn as_str(&self) -> &str {
        self.as_cow().as_ref()
    }

    /// Try to construct a name from a string
    fn from_string(name: String) -> Result<Self, String>;
}

impl Name for UnqualifiedName {
    fn check_valid(name: impl AsRef<str>) -> Result<(), String> {
        let name = name.as_ref();
        if name.contains(&['.', ';', '[', '/'][..]) {
            Err(format!(
                "Unqualified name '{}' contains an illegal character",
                name
            ))
        } else if name.is_empty() {
            Err(format!("Unqualified name '{}' is empty", name))
        } else {
            Ok(())
        }
    }

    fn as_cow(&self) -> &Cow<'static, str> {
        &self.0
    }

    fn from_string(name: String) -> Result<Self, String> {
        Self::check_valid(&name)?;
        Ok(UnqualifiedName(Cow::Owned(name)))
    }
}

impl Name for BinaryName {
    fn check_valid(name: impl AsRef<str>) -> Result<(), String> {
        let name = name.as_ref();
        if name.is_empty() {
            Err(format!("Binary name '{}' is empty", name))
        } else if name.starts_with('[') {
            match RefType::<BinaryName>::parse(name) {
                Ok(RefType::Object(_)) => Err(format!("Array name '{}' is not an array", name)),
                Ok(_) => Ok(()),
                Err(err) => Err(format!("Array name '{}' is malformed: {}", name, err)),
            }
        } else {
            name.split('/').map(UnqualifiedName::check_valid).collect()
        }
    }

    fn as_cow(&self) -> &Cow<'static, str> {
        &self.0
    }

    fn from_string(name: String) -> Result<Self, String> {
        Self::check_valid(&name)?;
        Ok(BinaryName(Cow::Owned(name)))
    }
}

impl Debug for UnqualifiedName {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        f.write_str(self.0.as_ref())
    }
}
impl Debug for BinaryName {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        f.write_str(self.0.as_ref())
    }
}

impl Display for UnqualifiedName {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        f.write_str(self.0.as_ref())
    }
}
impl Display for BinaryName {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        f.write_str(self.0.as_ref())
    }
}

impl UnqualifiedName {
    const fn name(value: &'static str) -> UnqualifiedName {
        UnqualifiedName(Cow::Borrowed(value))
    }

    // Special unqualified names - only these are allowed to have angle brackets in them
    pub const INIT: Self = Self::name("<init>");
    pub const CLINIT: Self = Self::name("<clinit>");
}

impl BinaryName {
    const fn name(value: &'static str) -> BinaryName {
        BinaryName(Cow::Borrowed(value))
    }

    /// Is this the name of an array class?
    pub fn is_array(&self) -> bool {
        self.0.starts_with('[')
    }

    /// Package part of the name, if there is one
    ///
    /// Array classes are in the package of their element type (primitive arrays are in no
    /// package).
    pub fn package(&self) -> Option<&str> {
        let name: &str = self.0.as_ref();
        let name = if name.starts_with('[') {
            let element = name.trim_start_matches('[');
            element.strip_prefix('L')?.strip_suffix(';')?
        } else {
            name
        };
        name.rfind('/').map(|slash| &name[..slash])
    }

    /// Name of the class file which holds this class, relative to a class path root
    pub fn class_file_path(&self) -> String {
        format!("{}.class", self.0)
    }

    // JDK names
    pub const OBJECT: Self = Self::name("java/lang/Object");
    pub const CLONEABLE: Self = Self::name("java/lang/Cloneable");
    pub const SERIALIZABLE: Self = Self::name("java/io/Serializable");
    pub const STRING: Self = Self::name("java/lang/String");
    pub const CLASS: Self = Self::name("java/lang/Class");
    pub const CLASSLOADER: Self = Self::name("java/lang/ClassLoader");
    pub const THROWABLE: Self = Self::name("java/lang/Throwable");
    pub const INTEGER: Self = Self::name("java/lang/Integer");
}

#[cfg(test)]
mod test {
    use super::*;

    fn binary(name: &str) -> BinaryName {
        BinaryName::from_string(name.to_owned()).unwrap()
    }

    #[test]
    fn array_names_are_valid() {
        assert!(BinaryName::check_valid("[I").is_ok());
        assert!(BinaryName::check_valid("[[Ljava/lang/String;").is_ok());
        assert!(BinaryName::check_valid("[").is_err());
        assert!(BinaryName::check_valid("[Ljava/lang/String").is_err());
        assert!(BinaryName::check_valid("java/lang/String;").is_err());
    }

    #[test]
    fn packages() {
        assert_eq!(BinaryName::OBJECT.package(), Some("java/lang"));
        assert_eq!(binary("Bar").package(), None);
        assert_eq!(binary("[[Lcom/foo/Bar;").package(), Some("com/foo"));
        assert_eq!(binary("[J").package(), None);
    }

    #[test]
    fn class_file_paths() {
        assert_eq!(
            BinaryName::CLONEABLE.class_file_path(),
            "java/lang/Cloneable.class"
        );
    }
}
