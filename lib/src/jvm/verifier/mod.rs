//! Class verification capability
//!
//! Bytecode verification proper is outside the scope of this crate. What the archive needs is a
//! yes/no answer per class, plus the subtyping obligations the verifier relied on while saying
//! yes. Those obligations ([`VerificationConstraint`]) are stored next to the class in the archive
//! and re-checked when the class is restored in a process whose class hierarchy may differ.

use crate::jvm::class_graph::{ClassData, ClassKind};
use crate::jvm::{BinaryName, ClassAccessFlags, MethodAccessFlags};
use bitflags::bitflags;

bitflags! {
    /// Context of a subtyping obligation
    pub struct ConstraintFlags: u8 {
        /// The obligation comes from accessing a protected field
        const FROM_FIELD_IS_PROTECTED = 0x01;

        /// The referencing type is an array type
        const FROM_IS_ARRAY = 0x02;

        /// The referencing type is `java/lang/Object`
        const FROM_IS_OBJECT = 0x04;
    }
}

/// "`referencing_type` must be assignable to `required_supertype`"
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct VerificationConstraint {
    pub required_supertype: BinaryName,
    pub referencing_type: BinaryName,
    pub flags: ConstraintFlags,
}

/// Something that can approve or reject a class
pub trait Verifier<'g> {
    /// Check a class, pushing the subtyping obligations the approval depends on
    fn verify(
        &self,
        class: &'g ClassData<'g>,
        constraints: &mut Vec<VerificationConstraint>,
    ) -> Result<(), String>;
}

/// Structural checks that need no data flow analysis
///
///   - only `java/lang/Object` may lack a super class, and interfaces extend `java/lang/Object`
///   - a class may not extend an interface or a final class
///   - concrete methods have code, `abstract` and `native` ones do not
///   - `max_locals` covers the parameters (and `this`)
///
/// Every directly implemented interface becomes a constraint, since method calls through the
/// interface type are only sound as long as the class still implements it.
#[derive(Default)]
pub struct StructuralVerifier;

impl<'g> Verifier<'g> for StructuralVerifier {
    fn verify(
        &self,
        class: &'g ClassData<'g>,
        constraints: &mut Vec<VerificationConstraint>,
    ) -> Result<(), String> {
        if !matches!(class.kind, ClassKind::Instance) {
            return Ok(());
        }

        match class.superclass {
            None if class.name != BinaryName::OBJECT => {
                return Err(format!("{} has no super class", class.name));
            }
            Some(superclass) if superclass.is_interface() => {
                return Err(format!(
                    "{} has interface {} as super class",
                    class.name, superclass.name
                ));
            }
            Some(superclass) if superclass.access_flags.contains(ClassAccessFlags::FINAL) => {
                return Err(format!(
                    "{} cannot inherit from final class {}",
                    class.name, superclass.name
                ));
            }
            Some(superclass) if class.is_interface() && superclass.name != BinaryName::OBJECT => {
                return Err(format!(
                    "interface {} must extend java/lang/Object",
                    class.name
                ));
            }
            _ => (),
        }

        for method in class.method_list() {
            let no_body = method
                .access_flags
                .intersects(MethodAccessFlags::ABSTRACT | MethodAccessFlags::NATIVE);
            match (&method.code, no_body) {
                (None, false) => {
                    return Err(format!(
                        "method {}.{} has no code",
                        class.name, method.name
                    ));
                }
                (Some(_), true) => {
                    return Err(format!(
                        "abstract or native method {}.{} has code",
                        class.name, method.name
                    ));
                }
                (Some(code), false) => {
                    let needed = method.descriptor.parameter_length(!method.is_static());
                    if (code.max_locals as usize) < needed {
                        return Err(format!(
                            "method {}.{} has max_locals {} but needs {}",
                            class.name, method.name, code.max_locals, needed
                        ));
                    }
                    if code.code_array.is_empty() {
                        return Err(format!(
                            "method {}.{} has empty code",
                            class.name, method.name
                        ));
                    }
                }
                (None, true) => (),
            }
        }

        for interface in class.interface_list() {
            if !interface.is_interface() {
                return Err(format!(
                    "{} implements class {} as an interface",
                    class.name, interface.name
                ));
            }
            constraints.push(VerificationConstraint {
                required_supertype: interface.name.clone(),
                referencing_type: class.name.clone(),
                flags: ConstraintFlags::empty(),
            });
        }

        Ok(())
    }
}
