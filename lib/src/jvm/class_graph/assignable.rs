use crate::jvm::class_graph::ClassId;
use std::collections::HashSet;

/// Subtyping relationship between types
pub trait Assignable {
    /// Is the first type assignable to the second?
    fn is_assignable(&self, super_type: &Self) -> bool;
}

/// This does a traversal of super types in the class graph to determine assignability
///
/// Array classes take part like any other class, since they are defined with `java/lang/Object`
/// as their super class and `java/lang/Cloneable` and `java/io/Serializable` as interfaces.
impl<'g> Assignable for ClassId<'g> {
    fn is_assignable(&self, super_type: &ClassId<'g>) -> bool {
        let mut supertypes_to_visit: Vec<ClassId<'g>> = vec![*self];
        let mut dont_revisit: HashSet<ClassId<'g>> = HashSet::new();
        dont_revisit.insert(*self);

        // Optimization: if the super type is a class, then skip visiting interfaces
        let super_is_class: bool = !super_type.is_interface();

        while let Some(class_data) = supertypes_to_visit.pop() {
            if class_data == *super_type {
                return true;
            }
            let class_data = class_data.0;

            // Enqueue next types to visit
            if let Some(superclass) = class_data.superclass {
                let superclass = ClassId(superclass);
                if dont_revisit.insert(superclass) {
                    supertypes_to_visit.push(superclass);
                }
            }
            if !super_is_class {
                for interface in &class_data.interfaces {
                    let interface = ClassId(interface);
                    if dont_revisit.insert(interface) {
                        supertypes_to_visit.push(interface);
                    }
                }
            }
        }

        false
    }
}

#[cfg(test)]
mod test {
    use crate::jvm::class_file::ConstantPool;
    use crate::jvm::class_graph::*;
    use crate::jvm::{BinaryName, ClassAccessFlags, Name};

    fn add<'g>(
        graph: &ClassGraph<'g>,
        name: &str,
        loader: LoaderId,
        is_interface: bool,
        superclass: Option<&'g ClassData<'g>>,
        interfaces: &[&'g ClassData<'g>],
    ) -> ClassId<'g> {
        let access_flags = if is_interface {
            ClassAccessFlags::INTERFACE | ClassAccessFlags::ABSTRACT
        } else {
            ClassAccessFlags::PUBLIC
        };
        let class = graph.add_class(ClassData::new(
            BinaryName::from_string(name.to_owned()).unwrap(),
            loader,
            access_flags,
            ClassKind::Instance,
            superclass,
            ClassSource::synthetic(),
            ConstantPool::new(),
        ));
        for interface in interfaces {
            class.interfaces.push(interface);
        }
        ClassId(class)
    }

    #[test]
    fn classes_and_interfaces() {
        let arenas = ClassGraphArenas::new();
        let graph = ClassGraph::new(&arenas);

        let object = add(&graph, "java/lang/Object", LoaderId::Boot, false, None, &[]);
        let cloneable =
            add(&graph, "java/lang/Cloneable", LoaderId::Boot, true, Some(object.0), &[]);
        let number = add(&graph, "java/lang/Number", LoaderId::Boot, false, Some(object.0), &[]);
        let integer = add(
            &graph,
            "java/lang/Integer",
            LoaderId::Boot,
            false,
            Some(number.0),
            &[cloneable.0],
        );

        assert!(object.is_assignable(&object), "Object <: Object");
        assert!(integer.is_assignable(&object), "Integer <: Object");
        assert!(integer.is_assignable(&number), "Integer <: Number");
        assert!(integer.is_assignable(&cloneable), "Integer <: Cloneable");
        assert!(cloneable.is_assignable(&object), "Cloneable <: Object");
        assert!(!number.is_assignable(&integer), "Number </: Integer");
        assert!(!number.is_assignable(&cloneable), "Number </: Cloneable");
        assert!(!object.is_assignable(&cloneable), "Object </: Cloneable");
    }

    #[test]
    fn identity_not_name() {
        let arenas = ClassGraphArenas::new();
        let graph = ClassGraph::new(&arenas);

        let object = add(&graph, "java/lang/Object", LoaderId::Boot, false, None, &[]);
        let foo1 = add(&graph, "Foo", LoaderId::Custom(1), false, Some(object.0), &[]);
        let foo2 = add(&graph, "Foo", LoaderId::Custom(2), false, Some(object.0), &[]);
        let bar = add(&graph, "Bar", LoaderId::Custom(1), false, Some(foo1.0), &[]);

        assert!(bar.is_assignable(&foo1), "Bar <: Foo@1");
        assert!(!bar.is_assignable(&foo2), "Bar </: Foo@2");
        assert_eq!(
            graph.lookup_class(LoaderId::Custom(2), &foo2.name).map(|c| c.index),
            Some(foo2.index)
        );
        assert_eq!(graph.len(), 4);
    }
}
