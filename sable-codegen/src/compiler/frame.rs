use std::collections::HashSet;
use std::mem;

use sable_asm::{Cond, Inst, Mem};

use crate::code::PcDescriptorKind;
use crate::compiler::flow_graph_compiler::SlowPathKind;
use crate::compiler::FlowGraphCompiler;
use crate::cpu::{
    fp_offset, ENTRY_PATCH_NOPS, FIRST_LOCAL_SLOT_FROM_FP, POOL_POINTER_FROM_PC_OFFSET, RAX, RCX,
    REG_FP, REG_FUNCTION, REG_NEW_PP, REG_SP, REG_TMP2, WORD_SIZE,
};
use crate::error::CompileError;
use crate::il::{DeoptId, FunctionKind, TokenPosition};
use crate::object_model::{Object, FUNCTION_USAGE_COUNTER_OFFSET};
use crate::runtime::{RuntimeEntry, StubKind};

impl<'a> FlowGraphCompiler<'a> {
    /// Patchable prologue. Counting code jumps to the optimizing stub once
    /// the function got hot.
    pub(super) fn emit_frame_entry(&mut self) {
        let graph = self.graph;

        comment!(self, format!("frame entry {}", graph.function.name));
        self.masm.emit(Inst::Nop(ENTRY_PATCH_NOPS));
        self.masm.emit(Inst::LoadPc(REG_TMP2));
        self.masm.emit(Inst::Load(
            REG_NEW_PP,
            Mem::Base(REG_TMP2, POOL_POINTER_FROM_PC_OFFSET),
        ));

        if !graph.is_optimized || graph.may_reoptimize {
            self.masm
                .load_object(REG_FUNCTION, Object::Function(graph.function.clone()));
            self.add_current_descriptor(
                PcDescriptorKind::EntryPatch,
                DeoptId::NONE,
                TokenPosition::NO_SOURCE,
            );

            let usage_counter = Mem::Base(REG_FUNCTION, FUNCTION_USAGE_COUNTER_OFFSET);

            let threshold = if graph.is_optimized {
                self.ctx.flags.reoptimization_counter_threshold
            } else {
                self.masm.emit(Inst::AddImmMem(usage_counter, 1));
                self.ctx.flags.optimization_counter_threshold
            };

            self.masm.emit(Inst::CmpMemImm(usage_counter, threshold));
            self.masm
                .jump_if_to_stub(Cond::GreaterEq, StubKind::OptimizeFunction);
        } else {
            self.add_current_descriptor(
                PcDescriptorKind::EntryPatch,
                DeoptId::NONE,
                TokenPosition::NO_SOURCE,
            );
        }

        let frame_size = self.frame_size();
        self.masm.emit(Inst::EnterFrame(frame_size));
    }

    pub(super) fn frame_size(&self) -> u32 {
        self.graph.spill_slot_count as u32 * WORD_SIZE as u32
    }

    /// Rejects signatures the prologue cannot bind before any code is
    /// emitted for them.
    pub(super) fn validate_signature(&self) -> Result<(), CompileError> {
        let function = &self.graph.function;
        let signature = &function.signature;

        if signature.has_optional_parameters()
            && self.graph.spill_slot_count < signature.num_parameters()
        {
            return Err(CompileError::UnsupportedSignature(
                function.name.to_string(),
                "copied parameters exceed the spill area",
            ));
        }

        let mut names = HashSet::new();

        for param in &signature.optional_named {
            if !names.insert(param.name.clone()) {
                return Err(CompileError::UnsupportedSignature(
                    function.name.to_string(),
                    "named parameter declared twice",
                ));
            }
        }

        Ok(())
    }

    /// Unoptimized code keeps every local on the stack, the collector must
    /// never see stale values there. Copied parameters are already set.
    pub(super) fn initialize_spill_slots(&mut self) {
        let signature = &self.graph.function.signature;
        let first = if signature.has_optional_parameters() {
            signature.num_parameters()
        } else {
            0
        };

        let count = self.graph.spill_slot_count;
        if first >= count {
            return;
        }

        comment!(self, format!("initialize {} spill slots", count - first));
        self.masm.load_object(RAX, Object::Null);

        for idx in first..count {
            let slot = FIRST_LOCAL_SLOT_FROM_FP - idx as i32;
            self.masm
                .emit(Inst::Store(Mem::Base(REG_FP, fp_offset(slot)), RAX));
        }
    }

    /// Implicit accessors run without a frame: the receiver and the value are
    /// still on the caller's stack.
    pub(super) fn try_intrinsify(&mut self) -> bool {
        let function = self.graph.function.clone();

        match function.kind {
            FunctionKind::ImplicitGetter { field_offset } => {
                comment!(self, format!("intrinsic getter {}", function.name));
                // receiver
                self.masm
                    .emit(Inst::Load(RAX, Mem::Base(REG_SP, WORD_SIZE)));
                self.masm
                    .emit(Inst::Load(RAX, Mem::Base(RAX, field_offset)));
                self.masm.emit(Inst::Ret);
                true
            }

            // a checked store has to run the assignability test
            FunctionKind::ImplicitSetter { field_offset }
                if self.ctx.flags.eliminate_type_checks =>
            {
                comment!(self, format!("intrinsic setter {}", function.name));
                self.masm
                    .emit(Inst::Load(RAX, Mem::Base(REG_SP, 2 * WORD_SIZE)));
                self.masm
                    .emit(Inst::Load(RCX, Mem::Base(REG_SP, WORD_SIZE)));
                self.masm
                    .emit(Inst::Store(Mem::Base(RAX, field_offset), RCX));
                self.masm.load_object(RAX, Object::Null);
                self.masm.emit(Inst::Ret);
                true
            }

            _ => false,
        }
    }

    /// Slow paths first, deoptimization stubs after them.
    pub(super) fn generate_deferred_code(&mut self) -> Result<(), CompileError> {
        let slow_paths = mem::take(&mut self.slow_paths);

        for slow_path in slow_paths {
            match slow_path {
                SlowPathKind::StackOverflow {
                    entry,
                    resume,
                    instr,
                } => {
                    self.masm.bind_label(entry);
                    comment!(self, "stack overflow slow path".to_string());

                    self.current = Some(instr);
                    self.save_live_registers(&instr.locs);
                    self.generate_runtime_call(
                        instr.token_pos,
                        instr.deopt_id,
                        RuntimeEntry::StackOverflow,
                    )?;
                    self.restore_live_registers(&instr.locs);
                    self.masm.jump(resume);
                }
            }
        }

        self.current = None;
        let trap = self.ctx.flags.trap_on_deoptimization;

        for info in &mut self.deopt_infos {
            if info.entry_label().is_some() {
                info.generate_stub(&mut self.masm, trap);
            }
        }

        Ok(())
    }

    /// End of every function: a trap for falling off the body, the deferred
    /// code and the two patchable jumps the runtime redirects returns to.
    pub(super) fn emit_trailer(&mut self) -> Result<(), CompileError> {
        self.masm.emit(Inst::Breakpoint);
        self.generate_deferred_code()?;

        self.add_current_descriptor(
            PcDescriptorKind::PatchCode,
            DeoptId::NONE,
            TokenPosition::NO_SOURCE,
        );
        self.masm.jump_patchable(StubKind::FixCallersTarget);

        self.add_current_descriptor(
            PcDescriptorKind::LazyDeoptJump,
            DeoptId::NONE,
            TokenPosition::NO_SOURCE,
        );
        self.masm.jump_to_stub(StubKind::DeoptimizeLazy);
        Ok(())
    }
}
