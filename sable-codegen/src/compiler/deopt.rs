use sable_asm::{Inst, Label};

use crate::code::DeoptEntry;
use crate::il::{DeoptId, EnvId, EnvValue, Environment, FlowGraph, MaterializationId};
use crate::location::Location;
use crate::masm::MacroAssembler;
use crate::object_model::Object;
use crate::runtime::{DeoptInfo, DeoptInstr, DeoptReason, DeoptTable, StubKind};

/// A program point of optimized code that may fall back to unoptimized
/// code. Calls share the lazy trampoline, guards get a stub of their own.
pub struct CompilerDeoptInfo {
    pub deopt_id: DeoptId,
    pub reason: DeoptReason,
    pub env: EnvId,
    pub flags: u32,
    pc_offset: Option<u32>,
    entry_label: Option<Label>,
}

impl CompilerDeoptInfo {
    pub fn at_call(deopt_id: DeoptId, env: EnvId, pc_offset: u32) -> CompilerDeoptInfo {
        CompilerDeoptInfo {
            deopt_id,
            reason: DeoptReason::AtCall,
            env,
            flags: 0,
            pc_offset: Some(pc_offset),
            entry_label: None,
        }
    }

    pub fn with_stub(
        deopt_id: DeoptId,
        reason: DeoptReason,
        env: EnvId,
        flags: u32,
        entry_label: Label,
    ) -> CompilerDeoptInfo {
        assert!(reason != DeoptReason::AtCall);

        CompilerDeoptInfo {
            deopt_id,
            reason,
            env,
            flags,
            pc_offset: None,
            entry_label: Some(entry_label),
        }
    }

    pub fn entry_label(&self) -> Option<Label> {
        self.entry_label
    }

    pub fn pc_offset(&self) -> Option<u32> {
        self.pc_offset
    }

    /// Emits the stub guards branch to. The stub has no frame specific code,
    /// the runtime finds the recipe through the return address of the call.
    pub fn generate_stub(&mut self, masm: &mut MacroAssembler, trap: bool) {
        let lbl = self
            .entry_label
            .expect("calls share the lazy deoptimization trampoline");

        masm.emit_comment(format!("deopt stub for id {}", self.deopt_id));
        masm.bind_label(lbl);

        if trap {
            masm.emit(Inst::Breakpoint);
        }

        masm.call_stub(StubKind::Deoptimize);
        self.pc_offset = Some(masm.pos());
        masm.emit(Inst::Breakpoint);
    }

    /// Flattens the environment chain into the shared table.
    pub fn materialize(&self, graph: &FlowGraph, table: &DeoptTable) -> DeoptEntry {
        let info = DeoptInfoBuilder::new(graph).build(self.env, self.deopt_id);

        DeoptEntry {
            pc_offset: self
                .pc_offset
                .expect("deoptimization point without emitted code"),
            deopt_id: self.deopt_id,
            reason: self.reason,
            info: table.add(&info),
            flags: self.flags,
        }
    }
}

/// Builds the instruction list that rebuilds unoptimized frames for one
/// deoptimization point.
pub struct DeoptInfoBuilder<'a> {
    graph: &'a FlowGraph,
    instrs: Vec<DeoptInstr>,
    materializations: Vec<MaterializationId>,
}

impl<'a> DeoptInfoBuilder<'a> {
    pub fn new(graph: &'a FlowGraph) -> DeoptInfoBuilder<'a> {
        DeoptInfoBuilder {
            graph,
            instrs: Vec::new(),
            materializations: Vec::new(),
        }
    }

    pub fn build(mut self, env_id: EnvId, deopt_id: DeoptId) -> DeoptInfo {
        let graph = self.graph;
        let chain = graph.env_chain(env_id);

        // objects to materialize come first so the collector finds them
        // before any frame exists
        for &id in &chain {
            for value in &graph.env(id).values {
                self.collect_materializations(value);
            }
        }

        for &mat in &self.materializations {
            let object = &graph.materializations[mat];
            let field_count = object
                .fields
                .iter()
                .filter(|(_, value)| !is_null_constant(value))
                .count();

            self.instrs.push(DeoptInstr::MaterializeObject {
                class_id: object.class_id,
                field_count: field_count as u32,
            });
        }

        let frame_start = self.instrs.len();

        let innermost = graph.env(env_id);
        self.instrs.push(DeoptInstr::PoolPointer(function_object(innermost)));
        self.instrs.push(DeoptInstr::PcMarker(Object::Null));
        self.instrs.push(DeoptInstr::CallerFp);
        self.instrs.push(DeoptInstr::ReturnAddress {
            function: function_object(innermost),
            deopt_id: deopt_id.0,
        });

        self.emit_materialization_arguments();
        self.add_locals(innermost);

        let mut previous = innermost;

        for &id in &chain[1..] {
            let current = graph.env(id);

            self.instrs.push(DeoptInstr::PoolPointer(function_object(current)));
            // identifies the code that called into this frame
            self.instrs.push(DeoptInstr::PcMarker(function_object(previous)));
            self.instrs.push(DeoptInstr::CallerFp);
            // execution resumes after the call in the outer frame
            self.instrs.push(DeoptInstr::ReturnAddress {
                function: function_object(current),
                deopt_id: current.deopt_id.after().0,
            });

            // the inlined body may have changed outgoing arguments, read
            // them from the callee's copy
            self.add_parameters(previous);
            self.add_locals(current);

            previous = current;
        }

        self.instrs.push(DeoptInstr::CallerPp);
        self.instrs.push(DeoptInstr::PcMarker(function_object(previous)));
        self.instrs.push(DeoptInstr::CallerFp);
        self.instrs.push(DeoptInstr::CallerPc);
        self.add_parameters(previous);

        DeoptInfo {
            frame_start,
            instrs: self.instrs,
        }
    }

    fn collect_materializations(&mut self, value: &EnvValue) {
        if let EnvValue::Materialized(id) = *value {
            if self.materializations.contains(&id) {
                return;
            }

            let graph = self.graph;

            // fields first, an object may only refer to earlier ones
            for (_, field) in &graph.materializations[id].fields {
                self.collect_materializations(field);
            }

            self.materializations.push(id);
        }
    }

    fn emit_materialization_arguments(&mut self) {
        let graph = self.graph;

        for mat in self.materializations.clone() {
            let object = &graph.materializations[mat];
            self.instrs.push(DeoptInstr::Constant(Object::Smi(
                object.class_id.0 as i64,
            )));

            for (offset, value) in &object.fields {
                if is_null_constant(value) {
                    continue;
                }

                self.instrs
                    .push(DeoptInstr::Constant(Object::Smi(*offset as i64)));
                let instr = self.copy(value);
                self.instrs.push(instr);
            }
        }
    }

    // outgoing arguments and locals, highest index first
    fn add_locals(&mut self, env: &Environment) {
        for value in env.values[env.fixed_parameter_count..].iter().rev() {
            let instr = self.copy(value);
            self.instrs.push(instr);
        }
    }

    fn add_parameters(&mut self, env: &Environment) {
        for value in env.values[..env.fixed_parameter_count].iter().rev() {
            let instr = self.copy(value);
            self.instrs.push(instr);
        }
    }

    fn copy(&self, value: &EnvValue) -> DeoptInstr {
        match value {
            EnvValue::Located(loc) => match *loc {
                Location::Register(reg) => DeoptInstr::Register(reg.0),
                Location::FpuRegister(reg) => DeoptInstr::FpuRegister(reg.0),
                Location::StackSlot(idx) => DeoptInstr::StackSlot(idx),
                Location::DoubleStackSlot(idx) => DeoptInstr::DoubleStackSlot(idx),
                Location::QuadStackSlot(idx) => DeoptInstr::QuadStackSlot(idx),
                Location::Constant(ref value) => DeoptInstr::Constant(value.clone()),
            },

            EnvValue::Materialized(id) => {
                let idx = self
                    .materializations
                    .iter()
                    .position(|mat| mat == id)
                    .expect("materialization not collected");
                DeoptInstr::MaterializedObjectRef(idx as u32)
            }
        }
    }
}

fn function_object(env: &Environment) -> Object {
    Object::Function(env.function.clone())
}

fn is_null_constant(value: &EnvValue) -> bool {
    matches!(value, EnvValue::Located(Location::Constant(Object::Null)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::{RAX, RBX, RCX};
    use crate::il::{Function, FunctionId, MaterializeObject, Signature};
    use crate::object_model::{sym, ClassId};
    use crate::runtime::{FrameSlot, OptimizedFrame};
    use std::sync::Arc;

    fn function(id: u32, name: &str) -> Arc<Function> {
        Arc::new(Function::new(FunctionId(id), sym(name), Signature::fixed(1)))
    }

    fn located(loc: Location) -> EnvValue {
        EnvValue::Located(loc)
    }

    fn env(
        graph: &mut FlowGraph,
        function: Arc<Function>,
        deopt_id: u32,
        values: Vec<EnvValue>,
        outer: Option<EnvId>,
    ) -> EnvId {
        graph.add_environment(Environment {
            values,
            fixed_parameter_count: 1,
            function,
            deopt_id: DeoptId(deopt_id),
            outer,
        })
    }

    fn value(slot: &FrameSlot) -> Object {
        match slot {
            FrameSlot::Value(value) => value.clone(),
            _ => panic!("expected value, got {:?}", slot),
        }
    }

    #[test]
    fn test_three_level_chain_round_trip() {
        let outer_fn = function(1, "outer");
        let middle_fn = function(2, "middle");
        let inner_fn = function(3, "inner");
        let mut graph = FlowGraph::new(outer_fn.clone(), true);

        // [parameter, locals...]
        let outer = env(
            &mut graph,
            outer_fn.clone(),
            10,
            vec![
                located(Location::StackSlot(2)),
                located(Location::StackSlot(-3)),
                located(Location::Constant(Object::Smi(5))),
            ],
            None,
        );
        let middle = env(
            &mut graph,
            middle_fn.clone(),
            20,
            vec![located(Location::Register(RCX)), located(Location::StackSlot(-4))],
            Some(outer),
        );
        let inner = env(
            &mut graph,
            inner_fn.clone(),
            30,
            vec![located(Location::Register(RAX)), located(Location::Register(RBX))],
            Some(middle),
        );

        let info = DeoptInfoBuilder::new(&graph).build(inner, DeoptId(31));
        assert_eq!(info.frame_start, 0);

        let mut frame = OptimizedFrame::default();
        frame.registers.insert(RAX.0, Object::Smi(1));
        frame.registers.insert(RBX.0, Object::Smi(2));
        frame.registers.insert(RCX.0, Object::Smi(3));
        frame.stack.insert(-4, Object::Smi(4));
        frame.stack.insert(-3, Object::Smi(6));
        frame.stack.insert(2, Object::Smi(7));

        let frames = info.replay(&frame);
        let slots = &frames.slots;

        // innermost frame header and its local
        assert_eq!(slots[0], FrameSlot::PoolPointer(Object::Function(inner_fn.clone())));
        assert_eq!(slots[1], FrameSlot::PcMarker(Object::Null));
        assert_eq!(slots[2], FrameSlot::CallerFp);
        assert_eq!(
            slots[3],
            FrameSlot::ReturnAddress {
                function: Object::Function(inner_fn.clone()),
                deopt_id: 31,
            }
        );
        assert_eq!(value(&slots[4]), Object::Smi(2));

        // middle frame: return address after the inlined call, the inner
        // frame's parameter, then the middle local
        assert_eq!(slots[5], FrameSlot::PoolPointer(Object::Function(middle_fn.clone())));
        assert_eq!(slots[6], FrameSlot::PcMarker(Object::Function(inner_fn)));
        assert_eq!(
            slots[8],
            FrameSlot::ReturnAddress {
                function: Object::Function(middle_fn.clone()),
                deopt_id: 21,
            }
        );
        assert_eq!(value(&slots[9]), Object::Smi(1));
        assert_eq!(value(&slots[10]), Object::Smi(4));

        // outer frame: locals in reverse order after the middle parameter
        assert_eq!(slots[11], FrameSlot::PoolPointer(Object::Function(outer_fn.clone())));
        assert_eq!(
            slots[14],
            FrameSlot::ReturnAddress {
                function: Object::Function(outer_fn.clone()),
                deopt_id: 11,
            }
        );
        assert_eq!(value(&slots[15]), Object::Smi(3));
        assert_eq!(value(&slots[16]), Object::Smi(5));
        assert_eq!(value(&slots[17]), Object::Smi(6));

        // caller of the outermost frame and its incoming parameter
        assert_eq!(slots[18], FrameSlot::CallerPp);
        assert_eq!(slots[19], FrameSlot::PcMarker(Object::Function(outer_fn)));
        assert_eq!(slots[20], FrameSlot::CallerFp);
        assert_eq!(slots[21], FrameSlot::CallerPc);
        assert_eq!(value(&slots[22]), Object::Smi(7));
        assert_eq!(slots.len(), 23);
    }

    #[test]
    fn test_materialization_prefix() {
        let f = function(1, "f");
        let mut graph = FlowGraph::new(f.clone(), true);

        let inner_object = graph.add_materialization(MaterializeObject {
            class_id: ClassId(40),
            fields: vec![(8, located(Location::Register(RBX)))],
        });
        let object = graph.add_materialization(MaterializeObject {
            class_id: ClassId(41),
            fields: vec![
                (8, EnvValue::Materialized(inner_object)),
                (16, located(Location::Constant(Object::Null))),
            ],
        });
        let env = env(
            &mut graph,
            f,
            5,
            vec![
                located(Location::StackSlot(2)),
                EnvValue::Materialized(object),
            ],
            None,
        );

        let info = DeoptInfoBuilder::new(&graph).build(env, DeoptId(5));

        assert_eq!(info.frame_start, 2);
        assert_eq!(
            info.instrs[0],
            DeoptInstr::MaterializeObject {
                class_id: ClassId(40),
                field_count: 1,
            }
        );
        assert_eq!(
            info.instrs[1],
            DeoptInstr::MaterializeObject {
                class_id: ClassId(41),
                field_count: 1,
            }
        );

        // arguments follow the frame header: class, then (offset, value)
        // pairs with null fields left out
        let frame = info.frame_instrs();
        assert_eq!(frame[4], DeoptInstr::Constant(Object::Smi(40)));
        assert_eq!(frame[5], DeoptInstr::Constant(Object::Smi(8)));
        assert_eq!(frame[6], DeoptInstr::Register(RBX.0));
        assert_eq!(frame[7], DeoptInstr::Constant(Object::Smi(41)));
        assert_eq!(frame[8], DeoptInstr::Constant(Object::Smi(8)));
        assert_eq!(frame[9], DeoptInstr::MaterializedObjectRef(0));
        assert_eq!(frame[10], DeoptInstr::MaterializedObjectRef(1));
    }

    #[test]
    fn test_stub_records_return_address() {
        let f = function(1, "f");
        let mut graph = FlowGraph::new(f.clone(), true);
        let env = env(&mut graph, f, 5, vec![located(Location::StackSlot(2))], None);

        let mut masm = MacroAssembler::new(false);
        let lbl = masm.create_label();
        let mut info =
            CompilerDeoptInfo::with_stub(DeoptId(5), DeoptReason::CheckSmi, env, 0, lbl);
        info.generate_stub(&mut masm, true);

        assert_eq!(masm.insts()[0], Inst::Breakpoint);
        assert_eq!(masm.insts()[1], Inst::Call(StubKind::Deoptimize.id()));
        assert_eq!(info.pc_offset(), Some(2));

        let table = DeoptTable::new();
        let entry = info.materialize(&graph, &table);
        assert_eq!(entry.pc_offset, 2);
        assert_eq!(table.len(), 1);
    }

    #[test]
    #[should_panic]
    fn test_call_point_has_no_stub() {
        let f = function(1, "f");
        let mut graph = FlowGraph::new(f.clone(), true);
        let env = env(&mut graph, f, 5, Vec::new(), None);

        let mut masm = MacroAssembler::new(false);
        CompilerDeoptInfo::at_call(DeoptId(6), env, 0).generate_stub(&mut masm, false);
    }
}
