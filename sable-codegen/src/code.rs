use fixedbitset::FixedBitSet;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use std::collections::HashMap;
use std::fmt::Write;
use std::sync::Arc;

use sable_asm::{Inst, PoolIndex};

use crate::il::{DeoptId, Function, TokenPosition};
use crate::location::RegisterSet;
use crate::object_model::Object;
use crate::runtime::{DeoptInfoId, DeoptReason};

#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum PcDescriptorKind {
    // continuation of unoptimized code after a call
    Deopt,
    IcCall,
    OptStaticCall,
    UnoptStaticCall,
    RuntimeCall,
    Other,
    EntryPatch,
    PatchCode,
    LazyDeoptJump,
    Return,
}

#[derive(Clone, PartialEq, Debug)]
pub struct PcDescriptor {
    pub offset: u32,
    pub kind: PcDescriptorKind,
    pub deopt_id: DeoptId,
    pub token_pos: TokenPosition,
    pub try_index: i32,
}

pub const NO_TRY_INDEX: i32 = -1;

/// Descriptors in emission order, keyed by the offset of the instruction
/// following a call or by the start of a patchable sequence.
pub struct PcDescriptorTable {
    entries: Vec<PcDescriptor>,
}

impl PcDescriptorTable {
    pub fn new() -> PcDescriptorTable {
        PcDescriptorTable {
            entries: Vec::new(),
        }
    }

    pub fn insert(&mut self, descriptor: PcDescriptor) {
        if let Some(last) = self.entries.last() {
            debug_assert!(descriptor.offset >= last.offset);
        }

        self.entries.push(descriptor);
    }

    pub fn get(&self, offset: u32) -> &[PcDescriptor] {
        let start = self.entries.partition_point(|desc| desc.offset < offset);
        let end = self.entries.partition_point(|desc| desc.offset <= offset);
        &self.entries[start..end]
    }

    pub fn find(&self, offset: u32, kind: PcDescriptorKind) -> Option<&PcDescriptor> {
        self.get(offset).iter().find(|desc| desc.kind == kind)
    }

    pub fn of_kind(&self, kind: PcDescriptorKind) -> impl Iterator<Item = &PcDescriptor> {
        self.entries.iter().filter(move |desc| desc.kind == kind)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PcDescriptor> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Tagged spill slots and live registers at a call. Registers are only
/// recorded for calls on slow paths, which preserve them on the stack.
#[derive(Clone, Debug)]
pub struct Stackmap {
    pub spill_slots: FixedBitSet,
    pub live_registers: RegisterSet,
}

pub struct StackmapTable {
    entries: Vec<(u32, Stackmap)>,
}

impl StackmapTable {
    pub fn new() -> StackmapTable {
        StackmapTable {
            entries: Vec::new(),
        }
    }

    pub fn get(&self, offset: u32) -> Option<&Stackmap> {
        let result = self
            .entries
            .binary_search_by_key(&offset, |&(offset, _)| offset);

        match result {
            Ok(idx) => Some(&self.entries[idx].1),
            Err(_) => None,
        }
    }

    pub fn insert(&mut self, offset: u32, stackmap: Stackmap) {
        if let Some(last) = self.entries.last_mut() {
            debug_assert!(offset > last.0);
        }

        self.entries.push((offset, stackmap));
    }

    pub fn offsets(&self) -> impl Iterator<Item = u32> + '_ {
        self.entries.iter().map(|&(offset, _)| offset)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub struct CommentTable {
    entries: Vec<(u32, String)>,
}

impl CommentTable {
    pub fn new() -> CommentTable {
        CommentTable {
            entries: Vec::new(),
        }
    }

    pub fn get(&self, offset: u32) -> Vec<&String> {
        let start = self.entries.partition_point(|&(o, _)| o < offset);

        self.entries[start..]
            .iter()
            .take_while(|&&(o, _)| o == offset)
            .map(|(_, comment)| comment)
            .collect()
    }

    pub fn insert(&mut self, offset: u32, comment: String) {
        if let Some(last) = self.entries.last_mut() {
            debug_assert!(offset >= last.0);
        }

        self.entries.push((offset, comment));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Every object referenced from code. The collector finds embedded objects
/// only through this pool.
pub struct ObjectPool {
    objects: Vec<Object>,
    indices: HashMap<Object, PoolIndex>,
}

impl ObjectPool {
    pub fn new() -> ObjectPool {
        ObjectPool {
            objects: Vec::new(),
            indices: HashMap::new(),
        }
    }

    pub fn add(&mut self, object: Object) -> PoolIndex {
        if let Some(&idx) = self.indices.get(&object) {
            return idx;
        }

        let idx = PoolIndex(self.objects.len() as u32);
        self.objects.push(object.clone());
        self.indices.insert(object, idx);
        idx
    }

    pub fn get(&self, idx: PoolIndex) -> Option<&Object> {
        self.objects.get(idx.0 as usize)
    }

    pub fn find(&self, object: &Object) -> Option<PoolIndex> {
        self.indices.get(object).copied()
    }

    pub fn objects(&self) -> &[Object] {
        &self.objects
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

#[derive(Clone, Debug)]
pub struct StaticCallTarget {
    pub offset: u32,
    pub function: Arc<Function>,
}

#[derive(Clone, PartialEq, Debug)]
pub struct DeoptEntry {
    pub pc_offset: u32,
    pub deopt_id: DeoptId,
    pub reason: DeoptReason,
    pub info: DeoptInfoId,
    pub flags: u32,
}

pub struct CodeDescriptor {
    pub function: Arc<Function>,
    pub is_optimized: bool,
    pub instructions: Vec<Inst>,
    pub frame_size: u32,
    pub object_pool: ObjectPool,
    pub pc_descriptors: PcDescriptorTable,
    pub stackmaps: StackmapTable,
    pub static_calls: Vec<StaticCallTarget>,
    pub deopt_entries: Vec<DeoptEntry>,
    pub comments: CommentTable,
}

impl CodeDescriptor {
    pub fn deopt_entry_at(&self, pc_offset: u32) -> Option<&DeoptEntry> {
        self.deopt_entries
            .iter()
            .find(|entry| entry.pc_offset == pc_offset)
    }

    pub fn static_call_at(&self, offset: u32) -> Option<&StaticCallTarget> {
        self.static_calls.iter().find(|call| call.offset == offset)
    }

    pub fn pool_object(&self, idx: PoolIndex) -> Option<&Object> {
        self.object_pool.get(idx)
    }

    pub fn instruction_count(&self) -> usize {
        self.instructions.len()
    }

    pub fn disassemble(&self) -> String {
        let mut out = String::new();

        for (offset, inst) in self.instructions.iter().enumerate() {
            let offset = offset as u32;

            for comment in self.comments.get(offset) {
                let _ = writeln!(out, "          ;; {}", comment);
            }

            let _ = writeln!(out, "{:>8}: {}", offset, inst);
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(offset: u32, kind: PcDescriptorKind) -> PcDescriptor {
        PcDescriptor {
            offset,
            kind,
            deopt_id: DeoptId(offset),
            token_pos: TokenPosition::NO_SOURCE,
            try_index: NO_TRY_INDEX,
        }
    }

    #[test]
    fn test_pc_descriptors_same_offset() {
        let mut table = PcDescriptorTable::new();
        table.insert(descriptor(2, PcDescriptorKind::IcCall));
        table.insert(descriptor(5, PcDescriptorKind::OptStaticCall));
        table.insert(descriptor(5, PcDescriptorKind::Deopt));
        table.insert(descriptor(9, PcDescriptorKind::Return));

        assert_eq!(table.get(5).len(), 2);
        assert!(table.find(5, PcDescriptorKind::Deopt).is_some());
        assert!(table.find(2, PcDescriptorKind::Deopt).is_none());
        assert!(table.get(3).is_empty());
        assert_eq!(table.of_kind(PcDescriptorKind::Return).count(), 1);
    }

    #[test]
    fn test_comments() {
        let mut table = CommentTable::new();
        table.insert(1, "a".into());
        table.insert(1, "b".into());
        table.insert(1, "c".into());
        table.insert(4, "d".into());

        assert_eq!(table.get(1), vec!["a", "b", "c"]);
        assert_eq!(table.get(4), vec!["d"]);
        assert!(table.get(2).is_empty());
    }

    #[test]
    fn test_object_pool_dedup() {
        let mut pool = ObjectPool::new();
        let a = pool.add(Object::Smi(1));
        let b = pool.add(Object::Null);
        let c = pool.add(Object::Smi(1));

        assert_eq!(a, c);
        assert_ne!(a, b);
        assert_eq!(pool.len(), 2);
        assert_eq!(pool.get(b), Some(&Object::Null));
    }

    #[test]
    fn test_stackmap_lookup() {
        let mut table = StackmapTable::new();
        table.insert(
            3,
            Stackmap {
                spill_slots: FixedBitSet::with_capacity(2),
                live_registers: RegisterSet::new(),
            },
        );

        assert!(table.get(3).is_some());
        assert!(table.get(4).is_none());
    }
}
