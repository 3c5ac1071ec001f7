use parking_lot::Mutex;
use std::fmt;

use crate::object_model::{AbstractType, ClassId, Object, ObjectModel, TypeArguments};

/// How much of the runtime type a cache keys on.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum SubtypeTestKind {
    // instance class
    OneArg,
    // plus instance type arguments
    TwoArgs,
    // plus instantiator type arguments
    ThreeArgs,
}

#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct SubtypeTestKey {
    pub instance_class_id: ClassId,
    pub instance_type_arguments: Option<TypeArguments>,
    pub instantiator_type_arguments: Option<TypeArguments>,
    pub function_type_arguments: Option<TypeArguments>,
}

pub struct SubtypeTestCache {
    kind: SubtypeTestKind,
    entries: Mutex<Vec<(SubtypeTestKey, bool)>>,
}

impl SubtypeTestCache {
    pub fn new(kind: SubtypeTestKind) -> SubtypeTestCache {
        SubtypeTestCache {
            kind,
            entries: Mutex::new(Vec::new()),
        }
    }

    pub fn kind(&self) -> SubtypeTestKind {
        self.kind
    }

    /// Key for `instance`, dropping the parts this cache does not test.
    pub fn key_for(
        &self,
        instance: &Object,
        instantiator_type_arguments: Option<&TypeArguments>,
    ) -> SubtypeTestKey {
        let instance_type_arguments = match self.kind {
            SubtypeTestKind::OneArg => None,
            _ => instance.type_arguments().cloned(),
        };

        let instantiator_type_arguments = match self.kind {
            SubtypeTestKind::ThreeArgs => instantiator_type_arguments.cloned(),
            _ => None,
        };

        SubtypeTestKey {
            instance_class_id: instance.class_id(),
            instance_type_arguments,
            instantiator_type_arguments,
            function_type_arguments: None,
        }
    }

    pub fn lookup(&self, key: &SubtypeTestKey) -> Option<bool> {
        self.entries
            .lock()
            .iter()
            .find(|(entry, _)| entry == key)
            .map(|&(_, result)| result)
    }

    /// Records `result` for `key`. A key is only ever stored once, the first
    /// result wins.
    pub fn add_check(&self, key: SubtypeTestKey, result: bool) -> bool {
        let mut entries = self.entries.lock();

        if let Some(&(_, existing)) = entries.iter().find(|(entry, _)| *entry == key) {
            return existing;
        }

        entries.push((key, result));
        result
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl fmt::Debug for SubtypeTestCache {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("SubtypeTestCache")
            .field("kind", &self.kind)
            .field("entries", &self.len())
            .finish()
    }
}

/// The runtime's answer for a test the inline code could not decide:
/// consults the full subtype relation and remembers the outcome in `cache`.
pub fn instance_of_slow(
    model: &dyn ObjectModel,
    cache: Option<&SubtypeTestCache>,
    instance: &Object,
    ty: &AbstractType,
    instantiator_type_arguments: Option<&TypeArguments>,
) -> bool {
    let key = cache.map(|cache| cache.key_for(instance, instantiator_type_arguments));

    if let (Some(cache), Some(key)) = (cache, key.as_ref()) {
        if let Some(result) = cache.lookup(key) {
            return result;
        }
    }

    let result = model.instance_of(instance, ty, instantiator_type_arguments);

    // null does not have a class worth caching
    match (cache, key) {
        (Some(cache), Some(key)) if !instance.is_null() => cache.add_check(key, result),
        _ => result,
    }
}
