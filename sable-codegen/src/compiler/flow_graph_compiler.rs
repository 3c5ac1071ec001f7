use std::sync::Arc;

use fixedbitset::FixedBitSet;
use sable_asm::{Cond, Inst, Label, Mem};
use tracing::debug;

use crate::code::{CodeDescriptor, DeoptEntry, PcDescriptorKind, Stackmap};
use crate::compiler::deopt::CompilerDeoptInfo;
use crate::compiler::parallel_move::ParallelMoveResolver;
use crate::cpu::{Reg, RAX, REG_RESULT, REG_SP, REG_THREAD, THREAD_STACK_LIMIT_OFFSET};
use crate::error::CompileError;
use crate::il::{
    BlockId, CompareKind, DeoptId, EnvId, FlowGraph, Instruction, InstructionKind, TokenPosition,
};
use crate::location::{Location, RegisterSet};
use crate::masm::{smi_raw, MacroAssembler};
use crate::object_model::{ClassId, Object, ARRAY_DATA_OFFSET, SMI_CID};
use crate::runtime::{CompilationContext, DeoptReason};

pub(super) enum SlowPathKind<'a> {
    StackOverflow {
        entry: Label,
        resume: Label,
        instr: &'a Instruction,
    },
}

/// Lowers one register allocated flow graph into instructions and the
/// metadata the runtime needs to run, walk and deoptimize them.
pub struct FlowGraphCompiler<'a> {
    pub(super) ctx: &'a CompilationContext,
    pub(super) graph: &'a FlowGraph,
    pub(super) masm: MacroAssembler,
    block_labels: Vec<Label>,
    pub(super) deopt_infos: Vec<CompilerDeoptInfo>,
    pub(super) slow_paths: Vec<SlowPathKind<'a>>,
    // instruction whose locations and environment calls refer to
    pub(super) current: Option<&'a Instruction>,
    next_block: Option<BlockId>,
}

impl<'a> FlowGraphCompiler<'a> {
    pub fn new(ctx: &'a CompilationContext, graph: &'a FlowGraph) -> FlowGraphCompiler<'a> {
        let mut masm = MacroAssembler::new(ctx.flags.emit_code_comments);
        let block_labels = graph.blocks.iter().map(|_| masm.create_label()).collect();

        FlowGraphCompiler {
            ctx,
            graph,
            masm,
            block_labels,
            deopt_infos: Vec::new(),
            slow_paths: Vec::new(),
            current: None,
            next_block: None,
        }
    }

    pub fn compile(
        ctx: &'a CompilationContext,
        graph: &'a FlowGraph,
    ) -> Result<CodeDescriptor, CompileError> {
        FlowGraphCompiler::new(ctx, graph).generate()
    }

    pub fn generate(mut self) -> Result<CodeDescriptor, CompileError> {
        let function = self.graph.function.clone();
        self.validate_signature()?;

        if self.try_intrinsify() {
            return self.finish();
        }

        self.emit_frame_entry();

        if function.has_optional_parameters() {
            self.copy_parameters();
        } else {
            self.check_argument_count();
        }

        if !self.graph.is_optimized {
            self.initialize_spill_slots();
        }

        self.visit_blocks()?;
        self.emit_trailer()?;
        self.finish()
    }

    fn finish(self) -> Result<CodeDescriptor, CompileError> {
        let graph = self.graph;
        let table = &self.ctx.deopt_table;

        let deopt_entries: Vec<DeoptEntry> = self
            .deopt_infos
            .iter()
            .map(|info| info.materialize(graph, table))
            .collect();

        debug!(
            function = %graph.function.name,
            optimized = graph.is_optimized,
            instructions = self.masm.insts().len(),
            deopt_points = deopt_entries.len(),
            pool = self.masm.pool().len(),
            "compiled function"
        );

        let frame_size = self.frame_size();
        self.masm
            .code(graph.function.clone(), graph.is_optimized, frame_size, deopt_entries)
    }

    fn visit_blocks(&mut self) -> Result<(), CompileError> {
        let graph = self.graph;

        for (idx, block) in graph.blocks.iter().enumerate() {
            self.next_block = graph.blocks.get(idx + 1).map(|block| block.id);
            self.masm.bind_label(self.block_labels[idx]);
            comment!(self, format!("block {}", block.id.0));

            if !graph.is_optimized && self.ctx.flags.emit_edge_counters {
                self.emit_edge_counter();
            }

            for instr in &block.instructions {
                self.current = Some(instr);
                self.visit_instruction(instr)?;
            }
        }

        self.current = None;
        self.next_block = None;
        Ok(())
    }

    fn emit_edge_counter(&mut self) {
        // the counter lives in a one element array so the runtime can read
        // it back through the pool
        let counter = Object::Array(Arc::new(vec![Object::Smi(0)]));
        self.masm.load_object(RAX, counter);
        self.masm.emit(Inst::AddImmMem(
            Mem::Base(RAX, ARRAY_DATA_OFFSET),
            smi_raw(1),
        ));
    }

    fn visit_instruction(&mut self, instr: &'a Instruction) -> Result<(), CompileError> {
        comment!(self, format!("{} (deopt id {})", instr.kind.name(), instr.deopt_id));

        match &instr.kind {
            InstructionKind::ParallelMove(parallel_move) => {
                ParallelMoveResolver::new(&mut self.masm).resolve(parallel_move)
            }
            InstructionKind::PushArgument => {
                self.visit_push_argument(instr);
                Ok(())
            }
            InstructionKind::Goto(target) => {
                self.visit_goto(*target);
                Ok(())
            }
            InstructionKind::Return => {
                self.visit_return(instr);
                Ok(())
            }
            InstructionKind::InstanceOf { ty, negate } => {
                self.generate_instance_of(instr.deopt_id, instr.token_pos, ty, *negate)
            }
            InstructionKind::AssertAssignable { ty, dst_name } => {
                self.generate_assert_assignable(instr.deopt_id, instr.token_pos, ty, dst_name)
            }
            InstructionKind::StaticCall {
                function,
                argument_names,
                argument_count,
            } => self.visit_static_call(instr, function, argument_names, *argument_count),
            InstructionKind::InstanceCall {
                ic_data,
                argument_count,
            } => self.visit_instance_call(instr, ic_data, *argument_count),
            InstructionKind::PolymorphicInstanceCall {
                ic_data,
                argument_count,
                targets,
            } => self.visit_polymorphic_instance_call(instr, ic_data, *argument_count, targets),
            InstructionKind::CheckClass { class_ids } => self.visit_check_class(instr, class_ids),
            InstructionKind::CheckSmi => self.visit_check_smi(instr),
            InstructionKind::CheckStackOverflow => {
                self.visit_check_stack_overflow(instr);
                Ok(())
            }
            InstructionKind::StrictCompare {
                kind,
                needs_number_check,
            } => {
                self.visit_strict_compare(instr, *kind, *needs_number_check);
                Ok(())
            }
        }
    }

    fn visit_push_argument(&mut self, instr: &Instruction) {
        match instr.locs.input(0) {
            Location::Register(reg) => self.masm.emit(Inst::Push(*reg)),
            Location::Constant(object) => self.masm.push_object(object.clone()),
            loc if loc.is_stack_slot() => {
                let tmp = self.masm.get_scratch();
                self.masm.emit(Inst::Load(*tmp, loc.to_stack_slot_address()));
                self.masm.emit(Inst::Push(*tmp));
            }
            loc => panic!("cannot push argument from {:?}", loc),
        }
    }

    fn visit_goto(&mut self, target: BlockId) {
        if self.next_block == Some(target) {
            return;
        }

        let lbl = self.block_labels[target.0 as usize];
        self.masm.jump(lbl);
    }

    fn visit_return(&mut self, instr: &Instruction) {
        // the result is already in the result register
        self.add_current_descriptor(PcDescriptorKind::Return, instr.deopt_id, instr.token_pos);
        self.masm.emit(Inst::LeaveFrame);
        self.masm.emit(Inst::Ret);
    }

    fn visit_check_class(
        &mut self,
        instr: &Instruction,
        class_ids: &[ClassId],
    ) -> Result<(), CompileError> {
        let deopt = self.add_deopt_stub(instr.deopt_id, DeoptReason::CheckClass)?;
        let value = instr.locs.input(0).reg();
        let is_ok = self.masm.create_label();

        self.masm.emit(Inst::TestSmiTag(value));
        if class_ids.contains(&SMI_CID) {
            self.masm.jump_if(Cond::Zero, is_ok);
        } else {
            self.masm.jump_if(Cond::Zero, deopt);
        }

        let heap_cids: Vec<ClassId> = class_ids
            .iter()
            .copied()
            .filter(|&cid| cid != SMI_CID)
            .collect();

        if heap_cids.is_empty() {
            self.masm.jump(deopt);
        } else {
            let tmp = self.masm.get_scratch();
            self.masm.emit(Inst::LoadClassId(*tmp, value));

            for (idx, cid) in heap_cids.iter().enumerate() {
                self.masm.emit(Inst::CmpImm(*tmp, cid.0 as i64));

                if idx == heap_cids.len() - 1 {
                    self.masm.jump_if(Cond::NotEqual, deopt);
                } else {
                    self.masm.jump_if(Cond::Equal, is_ok);
                }
            }
        }

        self.masm.bind_label(is_ok);
        Ok(())
    }

    fn visit_check_smi(&mut self, instr: &Instruction) -> Result<(), CompileError> {
        let deopt = self.add_deopt_stub(instr.deopt_id, DeoptReason::CheckSmi)?;
        let value = instr.locs.input(0).reg();

        self.masm.emit(Inst::TestSmiTag(value));
        self.masm.jump_if(Cond::NotZero, deopt);
        Ok(())
    }

    fn visit_check_stack_overflow(&mut self, instr: &'a Instruction) {
        let entry = self.masm.create_label();
        let resume = self.masm.create_label();

        self.masm.emit(Inst::CmpMem(
            REG_SP,
            Mem::Base(REG_THREAD, THREAD_STACK_LIMIT_OFFSET),
        ));
        self.masm.jump_if(Cond::LessEq, entry);
        self.masm.bind_label(resume);

        self.slow_paths.push(SlowPathKind::StackOverflow {
            entry,
            resume,
            instr,
        });
    }

    fn visit_strict_compare(
        &mut self,
        instr: &Instruction,
        kind: CompareKind,
        needs_number_check: bool,
    ) {
        let left = instr.locs.input(0);
        let right = instr.locs.input(1);

        match (left, right) {
            (Location::Register(left), Location::Constant(obj))
            | (Location::Constant(obj), Location::Register(left)) => {
                self.emit_equality_reg_const_compare(
                    *left,
                    obj,
                    needs_number_check,
                    instr.token_pos,
                );
            }
            (Location::Register(left), Location::Register(right)) => {
                self.emit_equality_reg_reg_compare(
                    *left,
                    *right,
                    needs_number_check,
                    instr.token_pos,
                );
            }
            _ => panic!("strict compare of {:?} and {:?}", left, right),
        }

        let result: Reg = instr.locs.out().map_or(REG_RESULT, |loc| loc.reg());
        let true_cond = match kind {
            CompareKind::StrictEqual => Cond::Equal,
            CompareKind::StrictNotEqual => Cond::NotEqual,
        };

        let is_true = self.masm.create_label();
        let done = self.masm.create_label();
        self.masm.jump_if(true_cond, is_true);
        self.masm.load_object(result, Object::Bool(false));
        self.masm.jump(done);
        self.masm.bind_label(is_true);
        self.masm.load_object(result, Object::Bool(true));
        self.masm.bind_label(done);
    }

    pub(super) fn add_current_descriptor(
        &mut self,
        kind: PcDescriptorKind,
        deopt_id: DeoptId,
        token_pos: TokenPosition,
    ) {
        self.masm.emit_pc_descriptor(kind, deopt_id, token_pos);
    }

    /// Stackmap for the call just emitted. Unoptimized frames hold nothing
    /// but tagged values, optimized frames use the allocator's bitmap.
    pub(super) fn record_safepoint(&mut self) {
        let spill_slot_count = self.graph.spill_slot_count;
        let mut spill_slots = FixedBitSet::with_capacity(spill_slot_count);

        let stackmap = if !self.graph.is_optimized {
            spill_slots.insert_range(..);

            Stackmap {
                spill_slots,
                live_registers: RegisterSet::new(),
            }
        } else {
            let mut live_registers = RegisterSet::new();

            if let Some(instr) = self.current {
                for idx in instr.locs.stack_bitmap.ones() {
                    if idx < spill_slot_count {
                        spill_slots.insert(idx);
                    }
                }

                if instr.locs.has_call_on_slow_path() {
                    live_registers = instr.locs.live_registers.clone();
                }
            }

            Stackmap {
                spill_slots,
                live_registers,
            }
        };

        self.masm.emit_stackmap(stackmap);
    }

    fn current_env(&self, deopt_id: DeoptId) -> Result<EnvId, CompileError> {
        self.current
            .and_then(|instr| instr.env)
            .ok_or(CompileError::MissingEnvironment(deopt_id.0))
    }

    /// Lazy deoptimization point at the return address of the call just
    /// emitted.
    pub(super) fn add_deopt_index_at_call(&mut self, deopt_id: DeoptId) -> Result<(), CompileError> {
        assert!(self.graph.is_optimized);
        let env = self.current_env(deopt_id)?;
        let pc_offset = self.masm.pos();

        self.deopt_infos
            .push(CompilerDeoptInfo::at_call(deopt_id, env, pc_offset));
        Ok(())
    }

    /// Label of a stub emitted after the body that deoptimizes eagerly.
    pub(super) fn add_deopt_stub(
        &mut self,
        deopt_id: DeoptId,
        reason: DeoptReason,
    ) -> Result<Label, CompileError> {
        assert!(self.graph.is_optimized);
        let env = self.current_env(deopt_id)?;
        let lbl = self.masm.create_label();

        self.deopt_infos
            .push(CompilerDeoptInfo::with_stub(deopt_id, reason, env, 0, lbl));
        Ok(lbl)
    }
}
