pub mod inst;

pub use crate::inst::{Cond, FWidth, Inst, Mem, PoolIndex, RuntimeId, ScaleFactor, StubId};

use std::convert::TryInto;
use std::fmt;

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct Reg(pub u8);

impl Reg {
    pub fn idx(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for Reg {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct FReg(pub u8);

impl FReg {
    pub fn idx(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for FReg {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct Label(usize);

impl Label {
    pub fn idx(self) -> usize {
        self.0
    }
}

struct AssemblerBuffer {
    insts: Vec<Inst>,
    labels: Vec<Option<u32>>,
}

impl AssemblerBuffer {
    fn new() -> AssemblerBuffer {
        AssemblerBuffer {
            insts: Vec::new(),
            labels: Vec::new(),
        }
    }

    fn create_label(&mut self) -> Label {
        self.labels.push(None);

        Label(self.labels.len() - 1)
    }

    fn create_and_bind_label(&mut self) -> Label {
        self.labels.push(Some(self.position()));
        Label(self.labels.len() - 1)
    }

    fn bind_label(&mut self, lbl: Label) {
        let Label(idx) = lbl;
        assert!(self.labels[idx].is_none(), "label bound twice");
        self.labels[idx] = Some(self.position());
    }

    fn offset(&self, lbl: Label) -> Option<u32> {
        let Label(idx) = lbl;
        self.labels[idx]
    }

    fn position(&self) -> u32 {
        self.insts.len().try_into().expect("code too large")
    }

    fn emit(&mut self, inst: Inst) {
        self.insts.push(inst);
    }
}

/// Records abstract machine operations. Offsets handed out by `position()`
/// count emitted instructions, so a return address is the offset directly
/// following a call.
pub struct Assembler {
    buffer: AssemblerBuffer,
}

impl Assembler {
    pub fn new() -> Assembler {
        Assembler {
            buffer: AssemblerBuffer::new(),
        }
    }

    pub fn create_label(&mut self) -> Label {
        self.buffer.create_label()
    }

    pub fn create_and_bind_label(&mut self) -> Label {
        self.buffer.create_and_bind_label()
    }

    pub fn bind_label(&mut self, lbl: Label) {
        self.buffer.bind_label(lbl);
    }

    pub fn offset(&self, lbl: Label) -> Option<u32> {
        self.buffer.offset(lbl)
    }

    pub fn is_bound(&self, lbl: Label) -> bool {
        self.buffer.offset(lbl).is_some()
    }

    pub fn position(&self) -> u32 {
        self.buffer.position()
    }

    pub fn emit(&mut self, inst: Inst) {
        self.buffer.emit(inst);
    }

    pub fn insts(&self) -> &[Inst] {
        &self.buffer.insts
    }

    /// Resolves all labels. Fails with the first label that is referenced by
    /// a branch but was never bound.
    pub fn finalize(self) -> Result<AssembledCode, Label> {
        let AssemblerBuffer { insts, labels } = self.buffer;

        for inst in &insts {
            if let Some(lbl) = inst.label() {
                if labels[lbl.idx()].is_none() {
                    return Err(lbl);
                }
            }
        }

        let labels = labels.into_iter().map(|l| l.unwrap_or(u32::MAX)).collect();

        Ok(AssembledCode { insts, labels })
    }
}

pub struct AssembledCode {
    insts: Vec<Inst>,
    labels: Vec<u32>,
}

impl AssembledCode {
    pub fn insts(&self) -> &[Inst] {
        &self.insts
    }

    pub fn into_insts(self) -> Vec<Inst> {
        self.insts
    }

    pub fn label_offset(&self, lbl: Label) -> Option<u32> {
        match self.labels[lbl.idx()] {
            u32::MAX => None,
            offset => Some(offset),
        }
    }

    pub fn len(&self) -> usize {
        self.insts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.insts.is_empty()
    }
}
