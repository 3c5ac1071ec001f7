use std::sync::Arc;

use sable_asm::{Cond, Inst, Label, Mem};

use crate::compiler::FlowGraphCompiler;
use crate::cpu::{
    Reg, REG_INSTANTIATOR, REG_INSTANTIATOR_TYPE_ARGS, REG_RESULT, REG_SP, REG_TMP1, WORD_SIZE,
};
use crate::error::CompileError;
use crate::il::{DeoptId, TokenPosition};
use crate::masm::{MacroAssembler, ScratchReg};
use crate::object_model::{
    AbstractType, ClassId, Object, ObjectModel, Symbol, TypeArguments, TypeParameter, ARRAY_CID,
    BIGINT_CID, BOOL_CID, CLASS_SUPERCLASS_ID_OFFSET, CLOSURE_CID, DOUBLE_CID,
    DOUBLE_INTERFACE_CID, FUNCTION_CID, GROWABLE_ARRAY_CID, INT_INTERFACE_CID, LIST_CID,
    MINT_CID, NUMBER_CID, OBJECT_CID, ONE_BYTE_STRING_CID, SMI_CID, STRING_INTERFACE_CID,
    TWO_BYTE_STRING_CID, TYPE_ARGUMENTS_TYPES_OFFSET,
};
use crate::runtime::{RuntimeEntry, StubKind, SubtypeTestCache, SubtypeTestKind};

/// Where a decided step of an inline type test continues.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Outcome {
    IsInstance,
    IsNotInstance,
    // ask the site's cache, a miss falls through to the runtime
    Cache(SubtypeTestKind),
    Fallthrough,
}

/// Predicates the inline code can decide from the instance in the result
/// register and the instantiator type arguments.
#[derive(Clone, PartialEq, Debug)]
pub enum TypeCheck {
    Smi,
    NotSmi,
    ClassIdIs(ClassId),
    // immediate superclass only
    SuperclassIs(ClassId),
    InstantiatorNull,
    InstantiatorArgIs(usize, AbstractType),
}

impl TypeCheck {
    fn holds(
        &self,
        model: &dyn ObjectModel,
        instance: &Object,
        instantiator: Option<&TypeArguments>,
    ) -> bool {
        match self {
            TypeCheck::Smi => instance.is_smi(),
            TypeCheck::NotSmi => !instance.is_smi(),
            TypeCheck::ClassIdIs(cid) => instance.class_id() == *cid,
            TypeCheck::SuperclassIs(cid) => model.superclass(instance.class_id()) == Some(*cid),
            TypeCheck::InstantiatorNull => instantiator.is_none(),
            TypeCheck::InstantiatorArgIs(idx, ty) => {
                instantiator.and_then(|args| args.get(*idx)) == Some(ty)
            }
        }
    }
}

#[derive(Clone, PartialEq, Debug)]
pub struct TypeTestStep {
    pub check: TypeCheck,
    pub target: Outcome,
}

/// Inline decision procedure for `instance is ty`: the first step whose
/// check holds decides, `tail` applies when none does.
#[derive(Clone, PartialEq, Debug)]
pub struct TypeTestPlan {
    pub steps: Vec<TypeTestStep>,
    pub tail: Outcome,
}

pub struct TypeTestLabels {
    pub is_instance: Label,
    pub is_not_instance: Label,
    // bound by the caller right after the inline code
    pub fallthrough: Label,
}

impl TypeTestPlan {
    pub fn new(model: &dyn ObjectModel, ty: &AbstractType) -> TypeTestPlan {
        let mut plan = TypeTestPlan {
            steps: Vec::new(),
            tail: Outcome::Fallthrough,
        };

        match ty {
            AbstractType::Void => plan.tail = Outcome::IsNotInstance,
            _ if ty.is_top() => plan.tail = Outcome::IsInstance,
            // the runtime raises the error
            AbstractType::Malformed(_) => plan.tail = Outcome::Fallthrough,
            AbstractType::Parameter(param) => plan.type_parameter_test(param),
            AbstractType::Class(class_ty) => {
                let cid = class_ty.class_id;

                if !ty.is_instantiated() {
                    plan.uninstantiated_test(model, ty);
                } else if model.is_signature_class(cid) {
                    plan.step(TypeCheck::Smi, Outcome::IsNotInstance);
                    plan.tail = Outcome::Fallthrough;
                } else if model.num_type_arguments(cid) > 0 {
                    plan.instantiated_with_arguments_test(model, ty, cid);
                } else if is_exact_class(model, cid) {
                    plan.class_equality_test(model, ty, cid);
                } else {
                    plan.instantiated_no_arguments_test(model, ty, cid);
                }
            }
            AbstractType::Dynamic => unreachable!(),
        }

        plan
    }

    fn step(&mut self, check: TypeCheck, target: Outcome) {
        self.steps.push(TypeTestStep { check, target });
    }

    fn smi_step(&mut self, model: &dyn ObjectModel, ty: &AbstractType) {
        let smi = AbstractType::class(SMI_CID);
        let outcome = if model.is_subtype_of(&smi, ty) {
            Outcome::IsInstance
        } else {
            Outcome::IsNotInstance
        };

        self.step(TypeCheck::Smi, outcome);
    }

    fn class_equality_test(&mut self, model: &dyn ObjectModel, ty: &AbstractType, cid: ClassId) {
        self.smi_step(model, ty);
        self.step(TypeCheck::ClassIdIs(cid), Outcome::IsInstance);
        self.tail = Outcome::IsNotInstance;
    }

    fn instantiated_no_arguments_test(
        &mut self,
        model: &dyn ObjectModel,
        ty: &AbstractType,
        cid: ClassId,
    ) {
        self.smi_step(model, ty);

        // core interfaces user classes cannot implement
        match cid {
            BOOL_CID => {
                self.step(TypeCheck::ClassIdIs(BOOL_CID), Outcome::IsInstance);
                self.tail = Outcome::IsNotInstance;
                return;
            }

            INT_INTERFACE_CID | NUMBER_CID | DOUBLE_INTERFACE_CID => {
                if cid != DOUBLE_INTERFACE_CID {
                    self.step(TypeCheck::ClassIdIs(MINT_CID), Outcome::IsInstance);
                    self.step(TypeCheck::ClassIdIs(BIGINT_CID), Outcome::IsInstance);
                }

                if cid != INT_INTERFACE_CID {
                    self.step(TypeCheck::ClassIdIs(DOUBLE_CID), Outcome::IsInstance);
                }

                self.tail = Outcome::IsNotInstance;
                return;
            }

            STRING_INTERFACE_CID => {
                self.step(TypeCheck::ClassIdIs(ONE_BYTE_STRING_CID), Outcome::IsInstance);
                self.step(TypeCheck::ClassIdIs(TWO_BYTE_STRING_CID), Outcome::IsInstance);
                self.tail = Outcome::IsNotInstance;
                return;
            }

            FUNCTION_CID => {
                self.step(TypeCheck::ClassIdIs(CLOSURE_CID), Outcome::IsInstance);
            }

            _ => {
                self.step(TypeCheck::ClassIdIs(cid), Outcome::IsInstance);
            }
        }

        self.class_only_lookup(cid);
    }

    fn instantiated_with_arguments_test(
        &mut self,
        model: &dyn ObjectModel,
        ty: &AbstractType,
        cid: ClassId,
    ) {
        self.smi_step(model, ty);

        if ty.is_raw() {
            self.step(TypeCheck::ClassIdIs(cid), Outcome::IsInstance);

            if cid == LIST_CID {
                self.step(TypeCheck::ClassIdIs(ARRAY_CID), Outcome::IsInstance);
                self.step(TypeCheck::ClassIdIs(GROWABLE_ARRAY_CID), Outcome::IsInstance);
            }

            self.class_only_lookup(cid);
            return;
        }

        let single_top_argument = ty
            .arguments()
            .map_or(false, |args| args.len() == 1 && args.types()[0].is_top());

        if single_top_argument {
            // every instantiation of the class passes, only the class matters
            self.class_only_lookup(cid);
        } else {
            self.tail = Outcome::Cache(SubtypeTestKind::TwoArgs);
        }
    }

    fn class_only_lookup(&mut self, cid: ClassId) {
        self.step(TypeCheck::SuperclassIs(cid), Outcome::IsInstance);
        self.tail = Outcome::Cache(SubtypeTestKind::OneArg);
    }

    fn type_parameter_test(&mut self, param: &TypeParameter) {
        let arg = |ty| TypeCheck::InstantiatorArgIs(param.index, ty);

        // a missing vector stands for all-dynamic arguments
        self.step(TypeCheck::InstantiatorNull, Outcome::IsInstance);
        self.step(arg(AbstractType::Dynamic), Outcome::IsInstance);
        self.step(arg(AbstractType::object()), Outcome::IsInstance);
        self.step(
            TypeCheck::NotSmi,
            Outcome::Cache(SubtypeTestKind::ThreeArgs),
        );
        self.step(arg(AbstractType::int()), Outcome::IsInstance);
        self.step(arg(AbstractType::number()), Outcome::IsInstance);
        self.tail = Outcome::Fallthrough;
    }

    fn uninstantiated_test(&mut self, model: &dyn ObjectModel, ty: &AbstractType) {
        // all-dynamic arguments accept the most instances
        let widest = ty.instantiate_from(None);
        let smi = AbstractType::class(SMI_CID);

        if !model.is_subtype_of(&smi, &widest) {
            self.step(TypeCheck::Smi, Outcome::IsNotInstance);
        }

        self.tail = Outcome::Cache(SubtypeTestKind::ThreeArgs);
    }

    fn outcomes(&self) -> impl Iterator<Item = Outcome> + '_ {
        self.steps
            .iter()
            .map(|step| step.target)
            .chain(std::iter::once(self.tail))
    }

    pub fn cache_kind(&self) -> Option<SubtypeTestKind> {
        self.outcomes().find_map(|outcome| match outcome {
            Outcome::Cache(kind) => Some(kind),
            _ => None,
        })
    }

    /// Whether the inline code may leave the decision to the runtime.
    pub fn has_fallthrough(&self) -> bool {
        self.outcomes()
            .any(|outcome| matches!(outcome, Outcome::Fallthrough | Outcome::Cache(_)))
    }

    /// Emits the plan for the instance in the result register and returns
    /// the cache the emitted code consults.
    pub fn emit(
        &self,
        masm: &mut MacroAssembler,
        labels: &TypeTestLabels,
    ) -> Option<Arc<SubtypeTestCache>> {
        let cache = self
            .cache_kind()
            .map(|kind| Arc::new(SubtypeTestCache::new(kind)));
        let cache_lbl = cache.as_ref().map(|_| masm.create_label());
        let target = |outcome: Outcome| match outcome {
            Outcome::IsInstance => labels.is_instance,
            Outcome::IsNotInstance => labels.is_not_instance,
            Outcome::Fallthrough => labels.fallthrough,
            Outcome::Cache(_) => cache_lbl.expect("cache outcome without cache"),
        };

        {
            let mut class_id: Option<ScratchReg> = None;

            for step in &self.steps {
                let lbl = target(step.target);

                match step.check {
                    TypeCheck::Smi => {
                        masm.emit(Inst::TestSmiTag(REG_RESULT));
                        masm.jump_if(Cond::Zero, lbl);
                    }

                    TypeCheck::NotSmi => {
                        masm.emit(Inst::TestSmiTag(REG_RESULT));
                        masm.jump_if(Cond::NotZero, lbl);
                    }

                    TypeCheck::ClassIdIs(cid) => {
                        let reg = load_class_id(masm, &mut class_id);
                        masm.emit(Inst::CmpImm(reg, cid.0 as i64));
                        masm.jump_if(Cond::Equal, lbl);
                    }

                    TypeCheck::SuperclassIs(cid) => {
                        let reg = load_class_id(masm, &mut class_id);
                        let tmp = masm.get_scratch();
                        masm.emit(Inst::LoadClassById(*tmp, reg));
                        masm.emit(Inst::Load(
                            *tmp,
                            Mem::Base(*tmp, CLASS_SUPERCLASS_ID_OFFSET),
                        ));
                        masm.emit(Inst::CmpImm(*tmp, cid.0 as i64));
                        masm.jump_if(Cond::Equal, lbl);
                    }

                    TypeCheck::InstantiatorNull => {
                        masm.compare_object(REG_INSTANTIATOR_TYPE_ARGS, Object::Null);
                        masm.jump_if(Cond::Equal, lbl);
                    }

                    TypeCheck::InstantiatorArgIs(idx, ref ty) => {
                        let tmp = masm.get_scratch();
                        let offset = TYPE_ARGUMENTS_TYPES_OFFSET + idx as i32 * WORD_SIZE;
                        masm.emit(Inst::Load(
                            *tmp,
                            Mem::Base(REG_INSTANTIATOR_TYPE_ARGS, offset),
                        ));
                        masm.compare_object(*tmp, Object::Type(ty.clone()));
                        masm.jump_if(Cond::Equal, lbl);
                    }
                }
            }
        }

        match self.tail {
            Outcome::IsInstance => masm.jump(labels.is_instance),
            Outcome::IsNotInstance => masm.jump(labels.is_not_instance),
            Outcome::Fallthrough if cache.is_some() => masm.jump(labels.fallthrough),
            Outcome::Fallthrough | Outcome::Cache(_) => {}
        }

        if let (Some(cache), Some(lbl)) = (cache.as_ref(), cache_lbl) {
            masm.bind_label(lbl);
            emit_cache_lookup(masm, cache, labels);
        }

        cache
    }

    /// Verdict of the emitted code for `instance`, `None` when it would
    /// reach the runtime.
    pub fn evaluate(
        &self,
        model: &dyn ObjectModel,
        instance: &Object,
        instantiator: Option<&TypeArguments>,
        cache: Option<&SubtypeTestCache>,
    ) -> Option<bool> {
        let outcome = self
            .steps
            .iter()
            .find(|step| step.check.holds(model, instance, instantiator))
            .map_or(self.tail, |step| step.target);

        match outcome {
            Outcome::IsInstance => Some(true),
            Outcome::IsNotInstance => Some(false),
            Outcome::Fallthrough => None,
            Outcome::Cache(_) => {
                cache.and_then(|cache| cache.lookup(&cache.key_for(instance, instantiator)))
            }
        }
    }
}

// Leaf classes without type arguments only have instances of exactly
// their own class.
fn is_exact_class(model: &dyn ObjectModel, cid: ClassId) -> bool {
    cid != SMI_CID && cid != OBJECT_CID && model.is_leaf(cid)
}

fn load_class_id(masm: &mut MacroAssembler, cached: &mut Option<ScratchReg>) -> Reg {
    if let Some(ref reg) = *cached {
        return reg.reg();
    }

    let reg = masm.get_scratch();
    masm.emit(Inst::LoadClassId(*reg, REG_RESULT));
    let result = reg.reg();
    *cached = Some(reg);
    result
}

fn subtype_test_stub(kind: SubtypeTestKind) -> StubKind {
    match kind {
        SubtypeTestKind::OneArg => StubKind::Subtype1TestCache,
        SubtypeTestKind::TwoArgs => StubKind::Subtype2TestCache,
        SubtypeTestKind::ThreeArgs => StubKind::Subtype3TestCache,
    }
}

// The stub leaves null (not found), true or false in REG_TMP1.
fn emit_cache_lookup(
    masm: &mut MacroAssembler,
    cache: &Arc<SubtypeTestCache>,
    labels: &TypeTestLabels,
) {
    let kind = cache.kind();

    masm.push_object(Object::SubtypeTestCache(cache.clone()));
    masm.emit(Inst::Push(REG_RESULT));

    if kind == SubtypeTestKind::ThreeArgs {
        masm.emit(Inst::Push(REG_INSTANTIATOR_TYPE_ARGS));
    } else {
        masm.push_object(Object::Null);
    }

    masm.call_stub(subtype_test_stub(kind));
    masm.drop_words(1);
    masm.emit(Inst::Pop(REG_RESULT));
    masm.drop_words(1);

    masm.compare_object(REG_TMP1, Object::Null);
    masm.jump_if(Cond::Equal, labels.fallthrough);
    masm.compare_object(REG_TMP1, Object::Bool(true));
    masm.jump_if(Cond::Equal, labels.is_instance);
    masm.jump(labels.is_not_instance);
}

impl<'a> FlowGraphCompiler<'a> {
    fn inline_instance_of(
        &mut self,
        ty: &AbstractType,
        labels: &TypeTestLabels,
    ) -> (TypeTestPlan, Option<Arc<SubtypeTestCache>>) {
        let plan = TypeTestPlan::new(&*self.ctx.object_model, ty);
        self.masm.emit_comment(format!("inline instance of {}", ty));
        let cache = plan.emit(&mut self.masm, labels);
        (plan, cache)
    }

    fn push_subtype_test_cache(&mut self, cache: Option<Arc<SubtypeTestCache>>) {
        match cache {
            Some(cache) => self.masm.push_object(Object::SubtypeTestCache(cache)),
            None => self.masm.push_object(Object::Null),
        }
    }

    fn reload_instantiator(&mut self) {
        self.masm
            .emit(Inst::Load(REG_INSTANTIATOR_TYPE_ARGS, Mem::Base(REG_SP, 0)));
        self.masm
            .emit(Inst::Load(REG_INSTANTIATOR, Mem::Base(REG_SP, WORD_SIZE)));
    }

    /// Instance in the result register, instantiator and its type arguments
    /// in their role registers. Leaves a bool in the result register.
    pub fn generate_instance_of(
        &mut self,
        deopt_id: DeoptId,
        token_pos: TokenPosition,
        ty: &AbstractType,
        negate: bool,
    ) -> Result<(), CompileError> {
        let is_instance = self.masm.create_label();
        let is_not_instance = self.masm.create_label();
        let runtime_call = self.masm.create_label();
        let done = self.masm.create_label();

        self.masm.emit(Inst::Push(REG_INSTANTIATOR));
        self.masm.emit(Inst::Push(REG_INSTANTIATOR_TYPE_ARGS));

        // an uninstantiated type may turn out to be a top type at runtime
        if ty.is_instantiated() && !ty.is_top() {
            self.masm.compare_object(REG_RESULT, Object::Null);
            let lbl = if ty.is_null_type() {
                is_instance
            } else {
                is_not_instance
            };
            self.masm.jump_if(Cond::Equal, lbl);
        }

        let labels = TypeTestLabels {
            is_instance,
            is_not_instance,
            fallthrough: runtime_call,
        };
        let (plan, cache) = self.inline_instance_of(ty, &labels);
        self.masm.bind_label(runtime_call);

        if plan.has_fallthrough() {
            self.reload_instantiator();
            // result slot
            self.masm.push_object(Object::Null);
            self.masm.emit(Inst::Push(REG_RESULT));
            self.masm.push_object(Object::Type(ty.clone()));
            self.masm.emit(Inst::Push(REG_INSTANTIATOR));
            self.masm.emit(Inst::Push(REG_INSTANTIATOR_TYPE_ARGS));
            self.push_subtype_test_cache(cache);
            self.generate_runtime_call(token_pos, deopt_id, RuntimeEntry::Instanceof)?;
            self.masm
                .drop_words(RuntimeEntry::Instanceof.argument_count() as usize);

            if negate {
                let tmp = self.masm.get_scratch();
                self.masm.emit(Inst::Pop(*tmp));
                self.masm.load_object(REG_RESULT, Object::Bool(true));
                self.masm.emit(Inst::Cmp(*tmp, REG_RESULT));
                self.masm.jump_if(Cond::NotEqual, done);
                self.masm.load_object(REG_RESULT, Object::Bool(false));
            } else {
                self.masm.emit(Inst::Pop(REG_RESULT));
            }

            self.masm.jump(done);
        }

        self.masm.bind_label(is_not_instance);
        self.masm.load_object(REG_RESULT, Object::Bool(negate));
        self.masm.jump(done);

        self.masm.bind_label(is_instance);
        self.masm.load_object(REG_RESULT, Object::Bool(!negate));

        self.masm.bind_label(done);
        self.masm.emit(Inst::Pop(REG_INSTANTIATOR_TYPE_ARGS));
        self.masm.emit(Inst::Pop(REG_INSTANTIATOR));
        Ok(())
    }

    /// Leaves the instance in the result register when it is assignable to
    /// `ty`, otherwise the runtime raises a type error naming `dst_name`.
    pub fn generate_assert_assignable(
        &mut self,
        deopt_id: DeoptId,
        token_pos: TokenPosition,
        ty: &AbstractType,
        dst_name: &Symbol,
    ) -> Result<(), CompileError> {
        let is_assignable = self.masm.create_label();
        let runtime_call = self.masm.create_label();

        self.masm.emit(Inst::Push(REG_INSTANTIATOR));
        self.masm.emit(Inst::Push(REG_INSTANTIATOR_TYPE_ARGS));

        self.masm.compare_object(REG_RESULT, Object::Null);
        self.masm.jump_if(Cond::Equal, is_assignable);

        // graphs built without eliminated checks still see the sentinel
        if !self.ctx.flags.eliminate_type_checks || ty.is_malformed() {
            self.masm
                .compare_object(REG_RESULT, Object::TransitionSentinel);
            self.masm.jump_if(Cond::Equal, is_assignable);
        }

        if ty.is_malformed() {
            self.masm.push_object(Object::Null);
            self.masm.emit(Inst::Push(REG_RESULT));
            self.masm.push_object(Object::String(dst_name.clone()));
            self.masm.push_object(Object::Type(ty.clone()));
            self.generate_runtime_call(token_pos, deopt_id, RuntimeEntry::BadTypeError)?;
            // does not return
            self.masm.emit(Inst::Breakpoint);

            self.masm.bind_label(is_assignable);
            self.masm.emit(Inst::Pop(REG_INSTANTIATOR_TYPE_ARGS));
            self.masm.emit(Inst::Pop(REG_INSTANTIATOR));
            return Ok(());
        }

        let labels = TypeTestLabels {
            is_instance: is_assignable,
            is_not_instance: runtime_call,
            fallthrough: runtime_call,
        };
        let (_, cache) = self.inline_instance_of(ty, &labels);

        self.masm.bind_label(runtime_call);
        self.reload_instantiator();
        self.masm.push_object(Object::Null);
        self.masm.emit(Inst::Push(REG_RESULT));
        self.masm.push_object(Object::Type(ty.clone()));
        self.masm.emit(Inst::Push(REG_INSTANTIATOR));
        self.masm.emit(Inst::Push(REG_INSTANTIATOR_TYPE_ARGS));
        self.masm.push_object(Object::String(dst_name.clone()));
        self.push_subtype_test_cache(cache);
        self.generate_runtime_call(token_pos, deopt_id, RuntimeEntry::TypeCheck)?;
        self.masm
            .drop_words(RuntimeEntry::TypeCheck.argument_count() as usize);
        self.masm.emit(Inst::Pop(REG_RESULT));

        self.masm.bind_label(is_assignable);
        self.masm.emit(Inst::Pop(REG_INSTANTIATOR_TYPE_ARGS));
        self.masm.emit(Inst::Pop(REG_INSTANTIATOR));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::il::{Function, FunctionId, Signature};
    use crate::object_model::{sym, ClassTable, Instance, NULL_CID};
    use crate::runtime::instance_of_slow;

    struct Universe {
        table: ClassTable,
        a: ClassId,
        b: ClassId,
        leaf: ClassId,
        boxed: ClassId,
    }

    fn universe() -> Universe {
        let mut table = ClassTable::new();
        let a = table.add_class("A", None, vec![], 0);
        let b = table.add_class("B", Some(AbstractType::class(a)), vec![], 0);
        let leaf = table.add_class("Leaf", None, vec![], 0);
        let boxed = table.add_class("Box", None, vec![], 1);

        Universe {
            table,
            a,
            b,
            leaf,
            boxed,
        }
    }

    fn instance(cid: ClassId, args: Option<Vec<AbstractType>>) -> Object {
        Object::Instance(Arc::new(Instance {
            class_id: cid,
            type_arguments: args.map(TypeArguments::new),
            fields: Vec::new(),
        }))
    }

    fn instances(u: &Universe) -> Vec<Object> {
        let closure = Arc::new(Function::new(FunctionId(9), sym("c"), Signature::fixed(0)));

        vec![
            Object::Null,
            Object::Smi(3),
            Object::int(i64::MAX),
            Object::double(2.5),
            Object::string("abc"),
            Object::string("äbc"),
            Object::Bool(true),
            Object::Function(closure),
            instance(ARRAY_CID, Some(vec![AbstractType::int()])),
            instance(ARRAY_CID, Some(vec![AbstractType::string()])),
            instance(GROWABLE_ARRAY_CID, Some(vec![AbstractType::Dynamic])),
            instance(u.a, None),
            instance(u.b, None),
            instance(u.leaf, None),
            instance(u.boxed, Some(vec![AbstractType::class(u.b)])),
            instance(u.boxed, Some(vec![AbstractType::int()])),
        ]
    }

    fn types(u: &Universe) -> Vec<AbstractType> {
        let t = AbstractType::parameter(0, "T");

        vec![
            AbstractType::Dynamic,
            AbstractType::Void,
            AbstractType::object(),
            AbstractType::int(),
            AbstractType::number(),
            AbstractType::double(),
            AbstractType::string(),
            AbstractType::bool(),
            AbstractType::function(),
            AbstractType::class(NULL_CID),
            AbstractType::class(DOUBLE_CID),
            AbstractType::class(u.a),
            AbstractType::class(u.b),
            AbstractType::class(u.leaf),
            AbstractType::class(LIST_CID),
            AbstractType::generic(LIST_CID, vec![AbstractType::Dynamic]),
            AbstractType::generic(LIST_CID, vec![AbstractType::int()]),
            AbstractType::generic(LIST_CID, vec![AbstractType::object()]),
            AbstractType::generic(u.boxed, vec![AbstractType::class(u.a)]),
            AbstractType::generic(u.boxed, vec![t.clone()]),
            AbstractType::generic(LIST_CID, vec![t.clone()]),
            t,
        ]
    }

    fn instantiators() -> Vec<Option<TypeArguments>> {
        vec![
            None,
            Some(TypeArguments::new(vec![AbstractType::int()])),
            Some(TypeArguments::new(vec![AbstractType::string()])),
            Some(TypeArguments::new(vec![AbstractType::Dynamic])),
            Some(TypeArguments::new(vec![AbstractType::number()])),
        ]
    }

    #[test]
    fn test_inline_verdicts_agree_with_subtype_relation() {
        let u = universe();

        for ty in types(&u) {
            let plan = TypeTestPlan::new(&u.table, &ty);
            let cache = plan.cache_kind().map(SubtypeTestCache::new);

            // two rounds: cold cache, then a cache populated by the runtime
            for round in 0..2 {
                for instance in instances(&u) {
                    // instantiated tests see null only after the null check
                    if instance.is_null() && ty.is_instantiated() {
                        continue;
                    }

                    for instantiator in instantiators() {
                        let expected = u.table.instance_of(&instance, &ty, instantiator.as_ref());
                        let verdict = plan.evaluate(
                            &u.table,
                            &instance,
                            instantiator.as_ref(),
                            cache.as_ref(),
                        );

                        if let Some(verdict) = verdict {
                            assert_eq!(
                                verdict, expected,
                                "{:?} is {} with {:?} (round {})",
                                instance, ty, instantiator, round
                            );
                        }

                        if round == 0 {
                            let slow = instance_of_slow(
                                &u.table,
                                cache.as_ref(),
                                &instance,
                                &ty,
                                instantiator.as_ref(),
                            );
                            assert_eq!(slow, expected);
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn test_populated_cache_decides_repeated_tests() {
        let u = universe();
        let list_int = AbstractType::generic(LIST_CID, vec![AbstractType::int()]);
        let plan = TypeTestPlan::new(&u.table, &list_int);
        assert_eq!(plan.cache_kind(), Some(SubtypeTestKind::TwoArgs));

        let cache = SubtypeTestCache::new(SubtypeTestKind::TwoArgs);
        let ints = instance(ARRAY_CID, Some(vec![AbstractType::int()]));
        assert_eq!(plan.evaluate(&u.table, &ints, None, Some(&cache)), None);

        instance_of_slow(&u.table, Some(&cache), &ints, &list_int, None);
        assert_eq!(plan.evaluate(&u.table, &ints, None, Some(&cache)), Some(true));
        assert_eq!(plan.evaluate(&u.table, &ints, None, Some(&cache)), Some(true));
    }

    #[test]
    fn test_top_and_void_need_no_code() {
        let u = universe();

        let plan = TypeTestPlan::new(&u.table, &AbstractType::Dynamic);
        assert!(plan.steps.is_empty());
        assert_eq!(plan.tail, Outcome::IsInstance);

        let plan = TypeTestPlan::new(&u.table, &AbstractType::Void);
        assert_eq!(plan.tail, Outcome::IsNotInstance);
        assert!(!plan.has_fallthrough());
    }

    #[test]
    fn test_leaf_class_is_single_comparison() {
        let u = universe();
        let plan = TypeTestPlan::new(&u.table, &AbstractType::class(u.leaf));

        assert_eq!(
            plan.steps,
            vec![
                TypeTestStep {
                    check: TypeCheck::Smi,
                    target: Outcome::IsNotInstance,
                },
                TypeTestStep {
                    check: TypeCheck::ClassIdIs(u.leaf),
                    target: Outcome::IsInstance,
                },
            ]
        );
        assert_eq!(plan.tail, Outcome::IsNotInstance);
        assert!(!plan.has_fallthrough());
    }

    #[test]
    fn test_superclass_then_class_cache() {
        let u = universe();
        let plan = TypeTestPlan::new(&u.table, &AbstractType::class(u.a));

        assert!(plan
            .steps
            .iter()
            .any(|step| step.check == TypeCheck::SuperclassIs(u.a)));
        assert_eq!(plan.tail, Outcome::Cache(SubtypeTestKind::OneArg));
    }

    #[test]
    fn test_type_parameter_plan() {
        let u = universe();
        let plan = TypeTestPlan::new(&u.table, &AbstractType::parameter(0, "T"));

        assert_eq!(plan.steps[0].check, TypeCheck::InstantiatorNull);
        assert_eq!(plan.cache_kind(), Some(SubtypeTestKind::ThreeArgs));
        assert_eq!(plan.tail, Outcome::Fallthrough);

        let ints = TypeArguments::new(vec![AbstractType::int()]);
        assert_eq!(
            plan.evaluate(&u.table, &Object::Smi(1), Some(&ints), None),
            Some(true)
        );
        let strings = TypeArguments::new(vec![AbstractType::string()]);
        assert_eq!(
            plan.evaluate(&u.table, &Object::Smi(1), Some(&strings), None),
            None
        );
    }

    #[test]
    fn test_uninstantiated_generic_rejects_smi_inline() {
        let u = universe();
        let list_t = AbstractType::generic(LIST_CID, vec![AbstractType::parameter(0, "T")]);
        let plan = TypeTestPlan::new(&u.table, &list_t);

        assert_eq!(
            plan.evaluate(&u.table, &Object::Smi(1), None, None),
            Some(false)
        );
        assert_eq!(plan.tail, Outcome::Cache(SubtypeTestKind::ThreeArgs));
    }

    #[test]
    fn test_emit_int_test() {
        let u = universe();
        let plan = TypeTestPlan::new(&u.table, &AbstractType::int());

        let mut masm = MacroAssembler::new(false);
        let labels = TypeTestLabels {
            is_instance: masm.create_label(),
            is_not_instance: masm.create_label(),
            fallthrough: masm.create_label(),
        };
        let cache = plan.emit(&mut masm, &labels);

        assert!(cache.is_none());
        assert_eq!(masm.insts()[0], Inst::TestSmiTag(REG_RESULT));
        assert_eq!(masm.insts()[1], Inst::JumpIf(Cond::Zero, labels.is_instance));
        assert_eq!(masm.insts()[2], Inst::LoadClassId(REG_TMP1, REG_RESULT));
        assert_eq!(masm.insts()[3], Inst::CmpImm(REG_TMP1, MINT_CID.0 as i64));
        // class id is loaded once
        assert_eq!(
            masm.insts()
                .iter()
                .filter(|inst| matches!(inst, Inst::LoadClassId(..)))
                .count(),
            1
        );
        assert_eq!(
            masm.insts().last(),
            Some(&Inst::Jump(labels.is_not_instance))
        );
    }

    #[test]
    fn test_emit_cache_lookup() {
        let u = universe();
        let list_int = AbstractType::generic(LIST_CID, vec![AbstractType::int()]);
        let plan = TypeTestPlan::new(&u.table, &list_int);

        let mut masm = MacroAssembler::new(false);
        let labels = TypeTestLabels {
            is_instance: masm.create_label(),
            is_not_instance: masm.create_label(),
            fallthrough: masm.create_label(),
        };
        let cache = plan.emit(&mut masm, &labels).unwrap();

        assert_eq!(cache.kind(), SubtypeTestKind::TwoArgs);
        assert!(masm
            .insts()
            .contains(&Inst::Call(StubKind::Subtype2TestCache.id())));
        assert!(masm
            .pool()
            .find(&Object::SubtypeTestCache(cache.clone()))
            .is_some());
        assert!(masm
            .insts()
            .contains(&Inst::JumpIf(Cond::Equal, labels.fallthrough)));
    }
}
