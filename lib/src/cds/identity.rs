use crate::jvm::class_graph::ClassData;
use std::collections::HashMap;

/// Classlist ids of the classes resolved so far in a dump
///
/// Lets a later classlist line name an earlier class (as a super class or interface) by number.
/// Never persisted: it lives and dies with one dump session.
#[derive(Default)]
pub struct IdentityTable<'g> {
    classes: HashMap<u32, &'g ClassData<'g>>,
}

impl<'g> IdentityTable<'g> {
    pub fn new() -> IdentityTable<'g> {
        IdentityTable {
            classes: HashMap::new(),
        }
    }

    pub fn lookup(&self, id: u32) -> Option<&'g ClassData<'g>> {
        self.classes.get(&id).copied()
    }

    pub fn contains(&self, id: u32) -> bool {
        self.classes.contains_key(&id)
    }

    /// Register a class under an id
    ///
    /// Registering the same class under the same id again is a no-op. If the id already belongs
    /// to a different class, that class is returned as the error.
    pub fn register(
        &mut self,
        id: u32,
        class: &'g ClassData<'g>,
    ) -> Result<(), &'g ClassData<'g>> {
        match self.classes.get(&id) {
            Some(existing) if std::ptr::eq(*existing, class) => Ok(()),
            Some(existing) => Err(existing),
            None => {
                self.classes.insert(id, class);
                Ok(())
            }
        }
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::class_file::ConstantPool;
    use crate::jvm::class_graph::*;
    use crate::jvm::{BinaryName, ClassAccessFlags};

    #[test]
    fn same_class_twice_is_fine() {
        let arenas = ClassGraphArenas::new();
        let graph = ClassGraph::new(&arenas);
        let new_class = |name: BinaryName| {
            ClassData::new(
                name,
                LoaderId::Boot,
                ClassAccessFlags::PUBLIC,
                ClassKind::Instance,
                None,
                ClassSource::synthetic(),
                ConstantPool::new(),
            )
        };
        let object = graph.add_class(new_class(BinaryName::OBJECT));
        let string = graph.add_class(new_class(BinaryName::STRING));

        let mut identities = IdentityTable::new();
        assert!(identities.register(0, object).is_ok());
        assert!(identities.register(0, object).is_ok());
        assert!(identities.register(1, string).is_ok());
        assert!(matches!(
            identities.register(1, object),
            Err(existing) if existing.name == BinaryName::STRING
        ));
        assert_eq!(identities.lookup(0).map(|c| c.index), Some(object.index));
        assert!(identities.lookup(7).is_none());
        assert_eq!(identities.len(), 2);
    }
}
