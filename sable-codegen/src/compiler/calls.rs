use std::sync::Arc;

use sable_asm::{Cond, FWidth, Inst, Label, Mem, ScaleFactor};

use crate::code::PcDescriptorKind;
use crate::compiler::FlowGraphCompiler;
use crate::cpu::{
    Reg, FPU_REG_SIZE, RAX, RBX, RCX, RDI, RDX, REG_ARGS_DESC, REG_FUNCTION, REG_IC_DATA, REG_SP,
    WORD_SIZE,
};
use crate::error::CompileError;
use crate::il::{DeoptId, Function, Instruction, PolymorphicTarget, RecognizedKind, TokenPosition};
use crate::location::LocationSummary;
use crate::masm::smi_raw;
use crate::object_model::{
    Object, Symbol, ARRAY_DATA_OFFSET, CODE_ENTRY_POINT_OFFSET, FUNCTION_CODE_OFFSET, SMI_CID,
};
use crate::runtime::{
    ArgumentsDescriptor, DeoptReason, ICData, RuntimeEntry, StubKind,
    MEGAMORPHIC_BUCKETS_OFFSET, MEGAMORPHIC_ENTRY_CLASS_ID_OFFSET,
    MEGAMORPHIC_ENTRY_TARGET_OFFSET, MEGAMORPHIC_MASK_OFFSET,
};

impl<'a> FlowGraphCompiler<'a> {
    /// Marks where execution continues after a call: a lazy deoptimization
    /// point in optimized code, a continuation descriptor otherwise.
    fn emit_deopt_after_call(
        &mut self,
        deopt_id: DeoptId,
        token_pos: TokenPosition,
    ) -> Result<(), CompileError> {
        let deopt_id_after = deopt_id.after();

        if self.graph.is_optimized {
            self.add_deopt_index_at_call(deopt_id_after)
        } else {
            self.add_current_descriptor(PcDescriptorKind::Deopt, deopt_id_after, token_pos);
            Ok(())
        }
    }

    pub(super) fn generate_runtime_call(
        &mut self,
        token_pos: TokenPosition,
        deopt_id: DeoptId,
        entry: RuntimeEntry,
    ) -> Result<(), CompileError> {
        self.masm.call_runtime(entry);
        self.add_current_descriptor(PcDescriptorKind::Other, deopt_id, token_pos);
        self.record_safepoint();

        if !deopt_id.is_none() {
            self.emit_deopt_after_call(deopt_id, token_pos)?;
        }

        Ok(())
    }

    fn generate_dart_call(
        &mut self,
        deopt_id: DeoptId,
        token_pos: TokenPosition,
        stub: StubKind,
        kind: PcDescriptorKind,
    ) -> Result<(), CompileError> {
        self.masm.call_stub_patchable(stub);
        self.add_current_descriptor(kind, deopt_id, token_pos);
        self.record_safepoint();
        self.emit_deopt_after_call(deopt_id, token_pos)
    }

    /// Calls through the static call stub, which counts invocations and
    /// finds the target through a fresh inline cache.
    pub(super) fn emit_unoptimized_static_call(
        &mut self,
        target: &Arc<Function>,
        arguments_descriptor: Arc<ArgumentsDescriptor>,
        argument_count: usize,
        deopt_id: DeoptId,
        token_pos: TokenPosition,
    ) -> Result<(), CompileError> {
        let num_args_tested = match target.recognized {
            Some(RecognizedKind::MathMin) | Some(RecognizedKind::MathMax) => 2,
            None => 0,
        };

        let ic_data = Arc::new(ICData::new(
            self.graph.function.id,
            target.name.clone(),
            arguments_descriptor,
            deopt_id,
            num_args_tested,
        ));
        ic_data.add_target(target.clone());

        self.masm.load_object(REG_IC_DATA, Object::ICData(ic_data));
        self.generate_dart_call(
            deopt_id,
            token_pos,
            StubKind::unoptimized_static_call(num_args_tested),
            PcDescriptorKind::UnoptStaticCall,
        )?;
        self.masm.drop_words(argument_count);
        Ok(())
    }

    /// Never calls the current code of the target: the call goes through a
    /// patchable stub so recompiling the callee reaches every caller.
    pub(super) fn emit_optimized_static_call(
        &mut self,
        target: &Arc<Function>,
        arguments_descriptor: Arc<ArgumentsDescriptor>,
        argument_count: usize,
        deopt_id: DeoptId,
        token_pos: TokenPosition,
    ) -> Result<(), CompileError> {
        self.masm
            .load_object(REG_ARGS_DESC, Object::ArgumentsDescriptor(arguments_descriptor));
        self.generate_dart_call(
            deopt_id,
            token_pos,
            StubKind::CallStaticFunction,
            PcDescriptorKind::OptStaticCall,
        )?;
        self.masm.emit_static_call_target(target.clone());
        self.masm.drop_words(argument_count);
        Ok(())
    }

    pub(super) fn emit_instance_call(
        &mut self,
        ic_data: &Arc<ICData>,
        argument_count: usize,
        deopt_id: DeoptId,
        token_pos: TokenPosition,
    ) -> Result<(), CompileError> {
        let optimized = self.graph.is_optimized;

        if optimized {
            // the stub bumps the usage counter of the outermost function,
            // not of the inlined owner of the ic data
            self.masm.load_object(
                REG_FUNCTION,
                Object::Function(self.graph.function.clone()),
            );
        }

        self.masm.load_object(REG_IC_DATA, Object::ICData(ic_data.clone()));
        self.generate_dart_call(
            deopt_id,
            token_pos,
            StubKind::check_inline_cache(ic_data.num_args_tested, optimized),
            PcDescriptorKind::IcCall,
        )?;
        self.masm.drop_words(argument_count);
        Ok(())
    }

    /// Looks up the receiver class in the selector's shared cache. An empty
    /// slot holds the miss handler, which is called like the real target.
    pub(super) fn emit_megamorphic_instance_call(
        &mut self,
        ic_data: &Arc<ICData>,
        argument_count: usize,
        deopt_id: DeoptId,
        token_pos: TokenPosition,
    ) -> Result<(), CompileError> {
        let cache = self
            .ctx
            .megamorphic_caches
            .lookup(&ic_data.target_name, &ic_data.arguments_descriptor);

        let not_smi = self.masm.create_label();
        let load_cache = self.masm.create_label();

        comment!(self, format!("megamorphic call {}", ic_data.target_name));
        self.masm.emit(Inst::Load(
            RAX,
            Mem::Base(REG_SP, (argument_count as i32 - 1) * WORD_SIZE),
        ));
        self.masm.emit(Inst::TestSmiTag(RAX));
        self.masm.jump_if(Cond::NotZero, not_smi);
        self.masm.load_smi(RAX, SMI_CID.0 as i64);
        self.masm.jump(load_cache);

        self.masm.bind_label(not_smi);
        self.masm.emit(Inst::LoadClassId(RAX, RAX));
        self.masm.emit(Inst::SmiTag(RAX));

        // RAX: receiver class id as smi
        self.masm.bind_label(load_cache);
        self.masm.load_object(RBX, Object::MegamorphicCache(cache));
        self.masm
            .emit(Inst::Load(RDI, Mem::Base(RBX, MEGAMORPHIC_BUCKETS_OFFSET)));
        self.masm
            .emit(Inst::Load(RBX, Mem::Base(RBX, MEGAMORPHIC_MASK_OFFSET)));
        // RCX: class id spread over the table, still a smi
        self.masm
            .emit(Inst::Lea(RCX, Mem::Index(RAX, RAX, ScaleFactor::Two, 0)));
        self.masm
            .emit(Inst::Lea(RCX, Mem::Index(RAX, RCX, ScaleFactor::Two, 0)));

        let probe = self.masm.create_label();
        let update = self.masm.create_label();
        let call_target = self.masm.create_label();
        self.masm.jump(probe);

        self.masm.bind_label(update);
        self.masm.emit(Inst::AddImm(RCX, smi_raw(1)));
        self.masm.bind_label(probe);
        self.masm.emit(Inst::And(RCX, RBX));
        // entries are two words, the smi index is already doubled
        self.masm.emit(Inst::Load(
            RDX,
            Mem::Index(
                RDI,
                RCX,
                ScaleFactor::Eight,
                ARRAY_DATA_OFFSET + MEGAMORPHIC_ENTRY_CLASS_ID_OFFSET,
            ),
        ));
        // the illegal class id marks an empty slot
        self.masm.emit(Inst::CmpImm(RDX, 0));
        self.masm.jump_if(Cond::Equal, call_target);
        self.masm.emit(Inst::Cmp(RDX, RAX));
        self.masm.jump_if(Cond::NotEqual, update);

        self.masm.bind_label(call_target);
        self.masm.emit(Inst::Load(
            RAX,
            Mem::Index(
                RDI,
                RCX,
                ScaleFactor::Eight,
                ARRAY_DATA_OFFSET + MEGAMORPHIC_ENTRY_TARGET_OFFSET,
            ),
        ));
        self.masm
            .emit(Inst::Load(RBX, Mem::Base(RAX, FUNCTION_CODE_OFFSET)));

        if self.ctx.flags.collect_code {
            let is_compiled = self.masm.create_label();
            self.masm.compare_object(RBX, Object::Null);
            self.masm.jump_if(Cond::NotEqual, is_compiled);
            self.masm.call_stub(StubKind::CompileFunction);
            self.add_current_descriptor(PcDescriptorKind::RuntimeCall, DeoptId::NONE, token_pos);
            self.record_safepoint();
            self.masm
                .emit(Inst::Load(RBX, Mem::Base(RAX, FUNCTION_CODE_OFFSET)));
            self.masm.bind_label(is_compiled);
        }

        self.masm
            .emit(Inst::Load(RAX, Mem::Base(RBX, CODE_ENTRY_POINT_OFFSET)));
        self.masm.load_object(REG_IC_DATA, Object::ICData(ic_data.clone()));
        self.masm.load_object(
            REG_ARGS_DESC,
            Object::ArgumentsDescriptor(ic_data.arguments_descriptor.clone()),
        );
        self.masm.emit(Inst::CallReg(RAX));
        self.add_current_descriptor(PcDescriptorKind::Other, DeoptId::NONE, token_pos);
        self.record_safepoint();
        self.add_deopt_index_at_call(deopt_id.after())?;
        self.masm.drop_words(argument_count);
        Ok(())
    }

    /// Linear class id dispatch, most frequent receiver class first. The
    /// last check branches to `deopt` when it fails.
    pub(super) fn emit_test_and_call(
        &mut self,
        targets: &[PolymorphicTarget],
        class_id_reg: Reg,
        argument_count: usize,
        arguments_descriptor: Arc<ArgumentsDescriptor>,
        deopt: Label,
        deopt_id: DeoptId,
        token_pos: TokenPosition,
    ) -> Result<(), CompileError> {
        assert!(self.graph.is_optimized);
        assert!(!targets.is_empty());
        assert!(class_id_reg != REG_ARGS_DESC);

        let mut sorted: Vec<&PolymorphicTarget> = targets.iter().collect();
        sorted.sort_by(|l, r| r.count.cmp(&l.count));

        let match_found = self.masm.create_label();
        self.masm
            .load_object(REG_ARGS_DESC, Object::ArgumentsDescriptor(arguments_descriptor));

        for (idx, entry) in sorted.iter().enumerate() {
            let is_last_check = idx == sorted.len() - 1;
            let next_test = self.masm.create_label();

            self.masm
                .emit(Inst::CmpImm(class_id_reg, entry.class_id.0 as i64));
            if is_last_check {
                self.masm.jump_if(Cond::NotEqual, deopt);
            } else {
                self.masm.jump_if(Cond::NotEqual, next_test);
            }

            self.generate_dart_call(
                deopt_id,
                token_pos,
                StubKind::CallStaticFunction,
                PcDescriptorKind::OptStaticCall,
            )?;
            self.masm.emit_static_call_target(entry.target.clone());
            self.masm.drop_words(argument_count);

            if !is_last_check {
                self.masm.jump(match_found);
            }

            self.masm.bind_label(next_test);
        }

        self.masm.bind_label(match_found);
        Ok(())
    }

    /// Sets the flags for `reg == obj`. Numbers compare by value through
    /// the stub when asked to.
    pub(super) fn emit_equality_reg_const_compare(
        &mut self,
        reg: Reg,
        obj: &Object,
        needs_number_check: bool,
        token_pos: TokenPosition,
    ) {
        if needs_number_check {
            assert!(!matches!(obj, Object::Mint(_) | Object::Double(_)));
            self.masm.emit(Inst::Push(reg));
            self.masm.push_object(obj.clone());
            self.call_identical_with_number_check(token_pos);
            // constant, then the original value
            self.masm.emit(Inst::Pop(reg));
            self.masm.emit(Inst::Pop(reg));
            return;
        }

        self.masm.compare_object(reg, obj.clone());
    }

    pub(super) fn emit_equality_reg_reg_compare(
        &mut self,
        left: Reg,
        right: Reg,
        needs_number_check: bool,
        token_pos: TokenPosition,
    ) {
        if needs_number_check {
            self.masm.emit(Inst::Push(left));
            self.masm.emit(Inst::Push(right));
            self.call_identical_with_number_check(token_pos);
            // the stub leaves its result in the flags
            self.masm.emit(Inst::Pop(right));
            self.masm.emit(Inst::Pop(left));
        } else {
            self.masm.emit(Inst::Cmp(left, right));
        }
    }

    fn call_identical_with_number_check(&mut self, token_pos: TokenPosition) {
        let stub = if self.graph.is_optimized {
            StubKind::OptimizedIdenticalWithNumberCheck
        } else {
            StubKind::UnoptimizedIdenticalWithNumberCheck
        };
        self.masm.call_stub_patchable(stub);
        self.add_current_descriptor(PcDescriptorKind::RuntimeCall, DeoptId::NONE, token_pos);
    }

    /// Fpu registers go below the general purpose registers, lowest number
    /// at the lowest address.
    pub(super) fn save_live_registers(&mut self, locs: &LocationSummary) {
        let fpu_count = locs.live_registers.fpu_count() as i32;

        if fpu_count > 0 {
            self.masm
                .emit(Inst::AddImm(REG_SP, -(fpu_count * FPU_REG_SIZE) as i64));
            let mut offset = 0;

            for freg in locs.live_registers.fpu_registers() {
                self.masm
                    .emit(Inst::FStore(FWidth::Quad, Mem::Base(REG_SP, offset), freg));
                offset += FPU_REG_SIZE;
            }

            assert_eq!(offset, fpu_count * FPU_REG_SIZE);
        }

        for reg in locs.live_registers.cpu_registers() {
            self.masm.emit(Inst::Push(reg));
        }
    }

    pub(super) fn restore_live_registers(&mut self, locs: &LocationSummary) {
        let cpu_registers: Vec<Reg> = locs.live_registers.cpu_registers().collect();

        for &reg in cpu_registers.iter().rev() {
            self.masm.emit(Inst::Pop(reg));
        }

        let fpu_count = locs.live_registers.fpu_count() as i32;

        if fpu_count > 0 {
            let mut offset = 0;

            for freg in locs.live_registers.fpu_registers() {
                self.masm
                    .emit(Inst::FLoad(FWidth::Quad, freg, Mem::Base(REG_SP, offset)));
                offset += FPU_REG_SIZE;
            }

            self.masm.emit(Inst::AddImm(REG_SP, offset as i64));
        }
    }

    pub(super) fn visit_static_call(
        &mut self,
        instr: &Instruction,
        function: &Arc<Function>,
        argument_names: &[Symbol],
        argument_count: usize,
    ) -> Result<(), CompileError> {
        let arguments_descriptor = self
            .ctx
            .arguments_descriptors
            .lookup(argument_count, argument_names);

        if self.graph.is_optimized {
            self.emit_optimized_static_call(
                function,
                arguments_descriptor,
                argument_count,
                instr.deopt_id,
                instr.token_pos,
            )
        } else {
            self.emit_unoptimized_static_call(
                function,
                arguments_descriptor,
                argument_count,
                instr.deopt_id,
                instr.token_pos,
            )
        }
    }

    pub(super) fn visit_instance_call(
        &mut self,
        instr: &Instruction,
        ic_data: &Arc<ICData>,
        argument_count: usize,
    ) -> Result<(), CompileError> {
        if self.graph.is_optimized && ic_data.is_megamorphic(self.ctx.flags.max_polymorphic_checks)
        {
            return self.emit_megamorphic_instance_call(
                ic_data,
                argument_count,
                instr.deopt_id,
                instr.token_pos,
            );
        }

        self.emit_instance_call(ic_data, argument_count, instr.deopt_id, instr.token_pos)
    }

    pub(super) fn visit_polymorphic_instance_call(
        &mut self,
        instr: &Instruction,
        ic_data: &Arc<ICData>,
        argument_count: usize,
        targets: &[PolymorphicTarget],
    ) -> Result<(), CompileError> {
        if ic_data.is_megamorphic(self.ctx.flags.max_polymorphic_checks) {
            return self.emit_megamorphic_instance_call(
                ic_data,
                argument_count,
                instr.deopt_id,
                instr.token_pos,
            );
        }

        if targets.is_empty() {
            return Err(CompileError::EmptyPolymorphicCall(
                ic_data.target_name.to_string(),
            ));
        }

        let deopt = self.add_deopt_stub(
            instr.deopt_id,
            DeoptReason::PolymorphicInstanceCallTestFail,
        )?;

        // RDI: receiver class id, a smi receiver deoptimizes unless expected
        let done = self.masm.create_label();
        let smi_expected = targets.iter().any(|target| target.class_id == SMI_CID);
        self.masm.emit(Inst::Load(
            RAX,
            Mem::Base(REG_SP, (argument_count as i32 - 1) * WORD_SIZE),
        ));
        if smi_expected {
            self.masm.emit(Inst::LoadImm(RDI, SMI_CID.0 as i64));
        }
        self.masm.emit(Inst::TestSmiTag(RAX));
        self.masm
            .jump_if(Cond::Zero, if smi_expected { done } else { deopt });
        self.masm.emit(Inst::LoadClassId(RDI, RAX));
        self.masm.bind_label(done);

        let arguments_descriptor = ic_data.arguments_descriptor.clone();
        self.emit_test_and_call(
            targets,
            RDI,
            argument_count,
            arguments_descriptor,
            deopt,
            instr.deopt_id,
            instr.token_pos,
        )
    }
}
