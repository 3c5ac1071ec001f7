use std::cell::Cell;
use std::ops::Deref;
use std::rc::Rc;
use std::sync::Arc;

use sable_asm::{Assembler, Cond, Inst, Label, Mem, PoolIndex};

use crate::code::{
    CodeDescriptor, CommentTable, DeoptEntry, ObjectPool, PcDescriptor, PcDescriptorKind,
    PcDescriptorTable, StaticCallTarget, Stackmap, StackmapTable, NO_TRY_INDEX,
};
use crate::cpu::{Reg, REG_TMP1, REG_TMP2};
use crate::error::CompileError;
use crate::il::{DeoptId, Function, TokenPosition};
use crate::object_model::Object;
use crate::runtime::{RuntimeEntry, StubKind};

static SCRATCH: [Reg; 2] = [REG_TMP1, REG_TMP2];

/// Wraps the instruction recorder and collects everything the runtime needs
/// next to the instructions: object pool, descriptors, stackmaps, comments.
pub struct MacroAssembler {
    asm: Assembler,
    object_pool: ObjectPool,
    pc_descriptors: PcDescriptorTable,
    stackmaps: StackmapTable,
    static_calls: Vec<StaticCallTarget>,
    comments: CommentTable,
    emit_comments: bool,
    scratch_registers: ScratchRegisters,
}

impl MacroAssembler {
    pub fn new(emit_comments: bool) -> MacroAssembler {
        MacroAssembler {
            asm: Assembler::new(),
            object_pool: ObjectPool::new(),
            pc_descriptors: PcDescriptorTable::new(),
            stackmaps: StackmapTable::new(),
            static_calls: Vec::new(),
            comments: CommentTable::new(),
            emit_comments,
            scratch_registers: ScratchRegisters::new(),
        }
    }

    pub fn code(
        self,
        function: Arc<Function>,
        is_optimized: bool,
        frame_size: u32,
        deopt_entries: Vec<DeoptEntry>,
    ) -> Result<CodeDescriptor, CompileError> {
        let code = self
            .asm
            .finalize()
            .map_err(|lbl| CompileError::UnresolvedLabel(lbl.idx()))?;

        Ok(CodeDescriptor {
            function,
            is_optimized,
            instructions: code.into_insts(),
            frame_size,
            object_pool: self.object_pool,
            pc_descriptors: self.pc_descriptors,
            stackmaps: self.stackmaps,
            static_calls: self.static_calls,
            deopt_entries,
            comments: self.comments,
        })
    }

    pub fn pos(&self) -> u32 {
        self.asm.position()
    }

    pub fn insts(&self) -> &[Inst] {
        self.asm.insts()
    }

    pub fn emit(&mut self, inst: Inst) {
        self.asm.emit(inst);
    }

    pub fn create_label(&mut self) -> Label {
        self.asm.create_label()
    }

    pub fn create_and_bind_label(&mut self) -> Label {
        self.asm.create_and_bind_label()
    }

    pub fn bind_label(&mut self, lbl: Label) {
        self.asm.bind_label(lbl);
    }

    pub fn is_bound(&self, lbl: Label) -> bool {
        self.asm.is_bound(lbl)
    }

    pub fn label_offset(&self, lbl: Label) -> Option<u32> {
        self.asm.offset(lbl)
    }

    pub fn jump(&mut self, lbl: Label) {
        self.emit(Inst::Jump(lbl));
    }

    pub fn jump_if(&mut self, cond: Cond, lbl: Label) {
        self.emit(Inst::JumpIf(cond, lbl));
    }

    pub fn add_object(&mut self, object: Object) -> PoolIndex {
        self.object_pool.add(object)
    }

    pub fn pool(&self) -> &ObjectPool {
        &self.object_pool
    }

    /// Small integers are encoded as tagged immediates and never enter the
    /// pool.
    pub fn load_object(&mut self, dest: Reg, object: Object) {
        match object {
            Object::Smi(value) => self.load_smi(dest, value),
            object => {
                let idx = self.add_object(object);
                self.emit(Inst::LoadObject(dest, idx));
            }
        }
    }

    pub fn store_object(&mut self, mem: Mem, object: Object) {
        match object {
            Object::Smi(value) => {
                let tmp = self.get_scratch();
                self.load_smi(*tmp, value);
                self.emit(Inst::Store(mem, *tmp));
            }

            object => {
                let idx = self.add_object(object);
                self.emit(Inst::StoreObject(mem, idx));
            }
        }
    }

    pub fn push_object(&mut self, object: Object) {
        let idx = self.add_object(object);
        self.emit(Inst::PushObject(idx));
    }

    pub fn compare_object(&mut self, reg: Reg, object: Object) {
        match object {
            Object::Smi(value) => self.compare_smi(reg, value),
            object => {
                let idx = self.add_object(object);
                self.emit(Inst::CmpObject(reg, idx));
            }
        }
    }

    pub fn load_smi(&mut self, dest: Reg, value: i64) {
        self.emit(Inst::LoadImm(dest, smi_raw(value)));
    }

    pub fn compare_smi(&mut self, reg: Reg, value: i64) {
        self.emit(Inst::CmpImm(reg, smi_raw(value)));
    }

    pub fn call_stub(&mut self, stub: StubKind) {
        self.emit(Inst::Call(stub.id()));
    }

    pub fn call_stub_patchable(&mut self, stub: StubKind) {
        self.emit(Inst::CallPatchable(stub.id()));
    }

    pub fn jump_to_stub(&mut self, stub: StubKind) {
        self.emit(Inst::JumpToStub(stub.id()));
    }

    pub fn jump_if_to_stub(&mut self, cond: Cond, stub: StubKind) {
        self.emit(Inst::JumpIfToStub(cond, stub.id()));
    }

    pub fn jump_patchable(&mut self, stub: StubKind) {
        self.emit(Inst::JumpPatchable(stub.id()));
    }

    pub fn call_runtime(&mut self, entry: RuntimeEntry) {
        self.emit(Inst::CallRuntime(entry.id(), entry.argument_count()));
    }

    pub fn drop_words(&mut self, count: usize) {
        if count > 0 {
            self.emit(Inst::Drop(count as u32));
        }
    }

    pub fn comments_enabled(&self) -> bool {
        self.emit_comments
    }

    pub fn emit_comment(&mut self, comment: String) {
        if self.emit_comments {
            let offset = self.pos();
            self.comments.insert(offset, comment);
        }
    }

    pub fn emit_pc_descriptor(
        &mut self,
        kind: PcDescriptorKind,
        deopt_id: DeoptId,
        token_pos: TokenPosition,
    ) {
        let offset = self.pos();
        self.pc_descriptors.insert(PcDescriptor {
            offset,
            kind,
            deopt_id,
            token_pos,
            try_index: NO_TRY_INDEX,
        });
    }

    pub fn emit_stackmap(&mut self, stackmap: Stackmap) {
        let offset = self.pos();
        self.stackmaps.insert(offset, stackmap);
    }

    /// Target of the patchable call emitted right before the current
    /// position.
    pub fn emit_static_call_target(&mut self, function: Arc<Function>) {
        let offset = self.pos();
        self.object_pool.add(Object::Function(function.clone()));
        self.static_calls.push(StaticCallTarget { offset, function });
    }

    pub fn get_scratch(&self) -> ScratchReg {
        self.scratch_registers.get()
    }
}

pub fn smi_raw(value: i64) -> i64 {
    value << 1
}

#[derive(Clone, Debug)]
pub struct ScratchRegisters {
    regs: &'static [Reg],
    value: Rc<Cell<u32>>,
}

impl ScratchRegisters {
    pub fn new() -> ScratchRegisters {
        ScratchRegisters {
            regs: &SCRATCH,
            value: Rc::new(Cell::new(0)),
        }
    }

    #[cfg(test)]
    pub fn with_regs(regs: &'static [Reg]) -> ScratchRegisters {
        ScratchRegisters {
            regs,
            value: Rc::new(Cell::new(0)),
        }
    }

    pub fn get(&self) -> ScratchReg {
        let value = self.value.get();

        for (ind, &reg) in self.regs.iter().enumerate() {
            if (value >> ind) & 1 == 0 {
                let bitmask = 1 << ind;
                self.value.set(value | bitmask);

                return ScratchReg {
                    ind: ind as u32,
                    reg,
                    scratch: self.clone(),
                };
            }
        }

        panic!("all scratch registers used");
    }

    fn free(&self, reg: &ScratchReg) {
        let value = self.value.get();
        let bitmask = !(1 << reg.ind);

        self.value.set(value & bitmask);
    }
}

#[derive(Debug)]
pub struct ScratchReg {
    ind: u32,
    reg: Reg,
    scratch: ScratchRegisters,
}

impl ScratchReg {
    pub fn reg(&self) -> Reg {
        self.reg
    }
}

impl Drop for ScratchReg {
    fn drop(&mut self) {
        self.scratch.free(self);
    }
}

impl Deref for ScratchReg {
    type Target = Reg;

    fn deref(&self) -> &Reg {
        &self.reg
    }
}
