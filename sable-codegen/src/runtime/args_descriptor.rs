use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use crate::object_model::Symbol;

// Layout read by emitted code: count, positional count, then one
// (name, position) pair per named argument sorted by name, then null.
pub const ARGS_DESC_COUNT_OFFSET: i32 = 8;
pub const ARGS_DESC_POSITIONAL_COUNT_OFFSET: i32 = 16;
pub const ARGS_DESC_FIRST_NAMED_OFFSET: i32 = 24;
pub const ARGS_DESC_NAMED_ENTRY_SIZE: i32 = 16;
pub const ARGS_DESC_NAME_OFFSET: i32 = 0;
pub const ARGS_DESC_POSITION_OFFSET: i32 = 8;

#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct NamedArgument {
    pub name: Symbol,
    pub position: usize,
}

/// Shape of the arguments passed at one call site.
#[derive(PartialEq, Eq, Hash, Debug)]
pub struct ArgumentsDescriptor {
    count: usize,
    positional_count: usize,
    named: Vec<NamedArgument>,
}

impl ArgumentsDescriptor {
    /// `names` belong to the trailing `names.len()` arguments in passing
    /// order.
    pub fn new(count: usize, names: &[Symbol]) -> ArgumentsDescriptor {
        assert!(names.len() <= count);
        let positional_count = count - names.len();

        let mut named: Vec<NamedArgument> = names
            .iter()
            .enumerate()
            .map(|(idx, name)| NamedArgument {
                name: name.clone(),
                position: positional_count + idx,
            })
            .collect();
        named.sort_by(|l, r| l.name.cmp(&r.name));

        ArgumentsDescriptor {
            count,
            positional_count,
            named,
        }
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn positional_count(&self) -> usize {
        self.positional_count
    }

    pub fn named_count(&self) -> usize {
        self.named.len()
    }

    /// Named arguments sorted by name.
    pub fn named(&self) -> &[NamedArgument] {
        &self.named
    }

    pub fn position_of(&self, name: &str) -> Option<usize> {
        self.named
            .binary_search_by(|entry| (*entry.name).cmp(name))
            .ok()
            .map(|idx| self.named[idx].position)
    }
}

/// Interns descriptors so every call site with the same shape shares one.
pub struct ArgumentsDescriptorTable {
    inner: Mutex<HashMap<(usize, Vec<Symbol>), Arc<ArgumentsDescriptor>>>,
}

impl ArgumentsDescriptorTable {
    pub fn new() -> ArgumentsDescriptorTable {
        ArgumentsDescriptorTable {
            inner: Mutex::new(HashMap::new()),
        }
    }

    pub fn lookup(&self, count: usize, names: &[Symbol]) -> Arc<ArgumentsDescriptor> {
        let mut inner = self.inner.lock();

        inner
            .entry((count, names.to_vec()))
            .or_insert_with(|| Arc::new(ArgumentsDescriptor::new(count, names)))
            .clone()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

impl Default for ArgumentsDescriptorTable {
    fn default() -> ArgumentsDescriptorTable {
        ArgumentsDescriptorTable::new()
    }
}
