use std::sync::Arc;

use sable_asm::{Cond, Inst, Mem, ScaleFactor};

use crate::compiler::FlowGraphCompiler;
use crate::cpu::{
    fp_offset, FIRST_LOCAL_SLOT_FROM_FP, PARAM_END_SLOT_FROM_FP, RAX, RBX, RCX, RDI, REG_ARGS_DESC,
    REG_FP, REG_IC_DATA,
};
use crate::il::{DeoptId, Function, Signature};
use crate::masm::{smi_raw, MacroAssembler};
use crate::object_model::{sym, Object};
use crate::runtime::{
    ArgumentsDescriptor, ICData, StubKind, ARGS_DESC_COUNT_OFFSET, ARGS_DESC_FIRST_NAMED_OFFSET,
    ARGS_DESC_NAMED_ENTRY_SIZE, ARGS_DESC_NAME_OFFSET, ARGS_DESC_POSITIONAL_COUNT_OFFSET,
    ARGS_DESC_POSITION_OFFSET,
};

/// Binds the arguments of a call with shape `desc` to the formal parameters
/// of `signature`. Returns one value per formal parameter in declaration
/// order or `None` when the call does not match. Unknown names are only
/// rejected when `check_named` is set.
///
/// The code emitted by `emit_copy_parameters` computes the same binding.
pub fn bind_arguments(
    signature: &Signature,
    desc: &ArgumentsDescriptor,
    args: &[Object],
    check_named: bool,
) -> Option<Vec<Object>> {
    assert_eq!(args.len(), desc.count());
    let positional = desc.positional_count();

    if positional < signature.num_fixed_parameters || positional > signature.max_positional() {
        return None;
    }

    let mut values: Vec<Object> = args[..positional].to_vec();

    for param in &signature.optional_positional[positional - signature.num_fixed_parameters..] {
        values.push(param.default_value.clone());
    }

    let mut named: Vec<Object> = signature
        .optional_named
        .iter()
        .map(|param| param.default_value.clone())
        .collect();

    // both sides are sorted by name, a name that is not consumed in order
    // is never consumed
    let passed = desc.named();
    let mut next = 0;

    for &idx in signature.sorted_named() {
        if next < passed.len() && passed[next].name == signature.optional_named[idx].name {
            named[idx] = args[passed[next].position].clone();
            next += 1;
        }
    }

    if next < passed.len() && check_named {
        return None;
    }

    values.extend(named);
    Some(values)
}

fn local_slot(param_pos: usize) -> Mem {
    Mem::Base(
        REG_FP,
        fp_offset(FIRST_LOCAL_SLOT_FROM_FP - param_pos as i32),
    )
}

/// Either jumps to the closure noSuchMethod stub or stops. Entered with the
/// frame set up and the arguments still on the stack.
pub(super) fn emit_wrong_arguments(
    masm: &mut MacroAssembler,
    closure_ic_data: Option<Arc<ICData>>,
    message: &str,
) {
    match closure_ic_data {
        Some(ic_data) => {
            masm.load_object(REG_IC_DATA, Object::ICData(ic_data));
            masm.emit(Inst::LeaveFrame);
            masm.jump_to_stub(StubKind::CallClosureNoSuchMethod);
            // noSuchMethod returns to our caller
            masm.emit(Inst::Breakpoint);
        }

        None => masm.emit(Inst::Stop(message.into())),
    }
}

/// Copies the passed arguments into the parameter slots of the frame, fills
/// in defaults and nulls the original argument slots. Expects the arguments
/// descriptor in its role register.
pub(super) fn emit_copy_parameters(
    masm: &mut MacroAssembler,
    signature: &Signature,
    check_named: bool,
    closure_ic_data: Option<Arc<ICData>>,
) {
    let num_fixed = signature.num_fixed_parameters;
    let num_opt_positional = signature.num_optional_positional();
    let num_opt_named = signature.num_optional_named();
    let max_positional = signature.max_positional();
    assert!(num_opt_positional > 0 || num_opt_named > 0);

    let wrong_num_arguments = masm.create_label();
    let all_processed = masm.create_label();

    masm.emit_comment("copy parameters".into());
    masm.emit(Inst::Load(
        RCX,
        Mem::Base(REG_ARGS_DESC, ARGS_DESC_POSITIONAL_COUNT_OFFSET),
    ));
    masm.compare_smi(RCX, num_fixed as i64);
    masm.jump_if(Cond::Less, wrong_num_arguments);
    masm.compare_smi(RCX, max_positional as i64);
    masm.jump_if(Cond::Greater, wrong_num_arguments);

    // RBX: address of the last passed positional argument
    masm.emit(Inst::Load(RBX, Mem::Base(REG_ARGS_DESC, ARGS_DESC_COUNT_OFFSET)));
    masm.emit(Inst::Sub(RBX, RCX));
    masm.emit(Inst::Lea(
        RBX,
        Mem::Index(
            REG_FP,
            RBX,
            ScaleFactor::Four,
            fp_offset(PARAM_END_SLOT_FROM_FP + 1),
        ),
    ));
    // RDI: address of the parameter slot of the last positional argument
    masm.emit(Inst::SmiUntag(RCX));
    masm.emit(Inst::Move(RAX, RCX));
    masm.emit(Inst::Neg(RAX));
    masm.emit(Inst::Lea(
        RDI,
        Mem::Index(
            REG_FP,
            RAX,
            ScaleFactor::Eight,
            fp_offset(FIRST_LOCAL_SLOT_FROM_FP + 1),
        ),
    ));

    let loop_start = masm.create_label();
    let loop_condition = masm.create_label();
    masm.jump(loop_condition);
    masm.bind_label(loop_start);
    masm.emit(Inst::Load(RAX, Mem::Index(RBX, RCX, ScaleFactor::Eight, 0)));
    masm.emit(Inst::Store(Mem::Index(RDI, RCX, ScaleFactor::Eight, 0), RAX));
    masm.bind_label(loop_condition);
    masm.emit(Inst::Dec(RCX));
    masm.jump_if(Cond::GreaterEq, loop_start);

    // RCX: positional count, untagged
    masm.emit(Inst::Load(
        RCX,
        Mem::Base(REG_ARGS_DESC, ARGS_DESC_POSITIONAL_COUNT_OFFSET),
    ));
    masm.emit(Inst::SmiUntag(RCX));

    for (idx, param) in signature.optional_positional.iter().enumerate() {
        let param_pos = num_fixed + idx;
        let next_parameter = masm.create_label();
        masm.emit(Inst::CmpImm(RCX, param_pos as i64));
        masm.jump_if(Cond::Greater, next_parameter);
        masm.load_object(RAX, param.default_value.clone());
        masm.emit(Inst::Store(local_slot(param_pos), RAX));
        masm.bind_label(next_parameter);
    }

    if num_opt_named > 0 {
        // RBX: address of the first argument, RDI: first named entry
        masm.emit(Inst::Load(RBX, Mem::Base(REG_ARGS_DESC, ARGS_DESC_COUNT_OFFSET)));
        masm.emit(Inst::Lea(
            RBX,
            Mem::Index(
                REG_FP,
                RBX,
                ScaleFactor::Four,
                fp_offset(PARAM_END_SLOT_FROM_FP),
            ),
        ));
        masm.emit(Inst::Lea(
            RDI,
            Mem::Base(REG_ARGS_DESC, ARGS_DESC_FIRST_NAMED_OFFSET),
        ));

        for &idx in signature.sorted_named() {
            let param = &signature.optional_named[idx];
            let param_pos = max_positional + idx;
            let load_default = masm.create_label();
            let assign = masm.create_label();

            masm.emit(Inst::Load(RAX, Mem::Base(RDI, ARGS_DESC_NAME_OFFSET)));
            masm.compare_object(RAX, Object::String(param.name.clone()));
            masm.jump_if(Cond::NotEqual, load_default);
            masm.emit(Inst::Load(RAX, Mem::Base(RDI, ARGS_DESC_POSITION_OFFSET)));
            masm.emit(Inst::AddImm(RDI, ARGS_DESC_NAMED_ENTRY_SIZE as i64));
            masm.emit(Inst::Neg(RAX));
            masm.emit(Inst::Load(RAX, Mem::Index(RBX, RAX, ScaleFactor::Four, 0)));
            masm.jump(assign);
            masm.bind_label(load_default);
            masm.load_object(RAX, param.default_value.clone());
            masm.bind_label(assign);
            masm.emit(Inst::Store(local_slot(param_pos), RAX));
        }

        if check_named {
            // every passed name was consumed iff RDI reached the terminator
            let tmp = masm.get_scratch();
            masm.load_object(*tmp, Object::Null);
            masm.emit(Inst::CmpMem(*tmp, Mem::Base(RDI, ARGS_DESC_NAME_OFFSET)));
            masm.jump_if(Cond::Equal, all_processed);
        } else {
            masm.jump(all_processed);
        }
    } else if check_named {
        // no named arguments may be passed
        masm.emit(Inst::Load(RBX, Mem::Base(REG_ARGS_DESC, ARGS_DESC_COUNT_OFFSET)));
        masm.emit(Inst::SmiUntag(RBX));
        masm.emit(Inst::Cmp(RCX, RBX));
        masm.jump_if(Cond::Equal, all_processed);
    } else {
        masm.jump(all_processed);
    }

    masm.bind_label(wrong_num_arguments);
    emit_wrong_arguments(masm, closure_ic_data, "Wrong arguments");

    // the caller drops its arguments, they must not keep objects alive
    masm.bind_label(all_processed);
    masm.emit(Inst::Load(RCX, Mem::Base(REG_ARGS_DESC, ARGS_DESC_COUNT_OFFSET)));
    masm.emit(Inst::SmiUntag(RCX));
    let tmp = masm.get_scratch();
    masm.load_object(*tmp, Object::Null);

    let null_loop = masm.create_label();
    let null_condition = masm.create_label();
    masm.jump(null_condition);
    masm.bind_label(null_loop);
    masm.emit(Inst::Store(
        Mem::Index(
            REG_FP,
            RCX,
            ScaleFactor::Eight,
            fp_offset(PARAM_END_SLOT_FROM_FP + 1),
        ),
        *tmp,
    ));
    masm.bind_label(null_condition);
    masm.emit(Inst::Dec(RCX));
    masm.jump_if(Cond::GreaterEq, null_loop);
}

/// Call site data handed to noSuchMethod when a closure is invoked with the
/// wrong arguments. Closures are always invoked through `call`.
pub(super) fn closure_call_ic_data(
    function: &Function,
    desc: Arc<ArgumentsDescriptor>,
) -> Option<Arc<ICData>> {
    if !function.is_closure() {
        return None;
    }

    Some(Arc::new(ICData::new(
        function.id,
        sym("call"),
        desc,
        DeoptId::NONE,
        1,
    )))
}

impl<'a> FlowGraphCompiler<'a> {
    pub(super) fn copy_parameters(&mut self) {
        let function = self.graph.function.clone();
        let check_named = self.ctx.flags.strict_argument_checking || function.is_closure();
        let ic_data = closure_call_ic_data(
            &function,
            self.ctx.arguments_descriptors.lookup(0, &[]),
        );

        emit_copy_parameters(&mut self.masm, &function.signature, check_named, ic_data);
    }

    /// Functions without optional parameters only verify the argument count
    /// when they are closures or the flags ask for strict checking.
    pub(super) fn check_argument_count(&mut self) {
        let function = self.graph.function.clone();

        if !function.is_closure() && !self.ctx.flags.strict_argument_checking {
            return;
        }

        let correct = self.masm.create_label();
        let wrong = self.masm.create_label();
        let num_fixed = function.num_fixed_parameters() as i64;

        self.masm.emit_comment("check argument count".into());
        self.masm
            .emit(Inst::Load(RAX, Mem::Base(REG_ARGS_DESC, ARGS_DESC_COUNT_OFFSET)));
        self.masm.compare_smi(RAX, num_fixed);
        self.masm.jump_if(Cond::NotEqual, wrong);
        self.masm.emit(Inst::CmpMem(
            RAX,
            Mem::Base(REG_ARGS_DESC, ARGS_DESC_POSITIONAL_COUNT_OFFSET),
        ));
        self.masm.jump_if(Cond::Equal, correct);

        self.masm.bind_label(wrong);
        let ic_data = closure_call_ic_data(
            &function,
            self.ctx.arguments_descriptors.lookup(0, &[]),
        );
        emit_wrong_arguments(&mut self.masm, ic_data, "Wrong number of arguments");
        self.masm.bind_label(correct);
    }
}
