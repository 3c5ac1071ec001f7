use std::fmt;
use std::sync::{Arc, OnceLock};

use id_arena::{Arena, Id};

use crate::location::{Location, LocationSummary, ParallelMove};
use crate::object_model::{AbstractType, ClassId, Object, Symbol};
use crate::runtime::ICData;

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct DeoptId(pub u32);

impl DeoptId {
    pub const NONE: DeoptId = DeoptId(u32::MAX);

    /// Deopt id of the continuation right after a call.
    pub fn after(self) -> DeoptId {
        assert!(self != DeoptId::NONE);
        DeoptId(self.0 + 1)
    }

    pub fn is_none(self) -> bool {
        self == DeoptId::NONE
    }
}

impl fmt::Display for DeoptId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.is_none() {
            write!(f, "-")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct TokenPosition(pub i32);

impl TokenPosition {
    pub const NO_SOURCE: TokenPosition = TokenPosition(-1);
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct FunctionId(pub u32);

#[derive(Clone, Debug)]
pub struct Parameter {
    pub name: Symbol,
    pub default_value: Object,
}

impl Parameter {
    pub fn new(name: Symbol, default_value: Object) -> Parameter {
        Parameter {
            name,
            default_value,
        }
    }
}

#[derive(Debug)]
pub struct Signature {
    pub num_fixed_parameters: usize,
    pub optional_positional: Vec<Parameter>,
    pub optional_named: Vec<Parameter>,
    sorted_named: OnceLock<Vec<usize>>,
}

impl Signature {
    pub fn new(
        num_fixed_parameters: usize,
        optional_positional: Vec<Parameter>,
        optional_named: Vec<Parameter>,
    ) -> Signature {
        Signature {
            num_fixed_parameters,
            optional_positional,
            optional_named,
            sorted_named: OnceLock::new(),
        }
    }

    pub fn fixed(num_fixed_parameters: usize) -> Signature {
        Signature::new(num_fixed_parameters, Vec::new(), Vec::new())
    }

    pub fn num_optional_positional(&self) -> usize {
        self.optional_positional.len()
    }

    pub fn num_optional_named(&self) -> usize {
        self.optional_named.len()
    }

    pub fn num_parameters(&self) -> usize {
        self.num_fixed_parameters + self.optional_positional.len() + self.optional_named.len()
    }

    pub fn max_positional(&self) -> usize {
        self.num_fixed_parameters + self.optional_positional.len()
    }

    pub fn has_optional_parameters(&self) -> bool {
        !self.optional_positional.is_empty() || !self.optional_named.is_empty()
    }

    /// Indices into `optional_named` ordered by parameter name. Computed once
    /// per signature and shared by every compilation and reflective caller.
    pub fn sorted_named(&self) -> &[usize] {
        self.sorted_named.get_or_init(|| {
            let mut indices: Vec<usize> = (0..self.optional_named.len()).collect();
            indices.sort_by(|&l, &r| self.optional_named[l].name.cmp(&self.optional_named[r].name));
            indices
        })
    }

    /// Formal index of the named parameter with the given name.
    pub fn named_parameter_index(&self, name: &str) -> Option<usize> {
        self.optional_named
            .iter()
            .position(|param| &*param.name == name)
            .map(|idx| self.max_positional() + idx)
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum FunctionKind {
    Regular,
    Closure,
    ImplicitGetter { field_offset: i32 },
    ImplicitSetter { field_offset: i32 },
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum RecognizedKind {
    MathMin,
    MathMax,
}

#[derive(Debug)]
pub struct Function {
    pub id: FunctionId,
    pub name: Symbol,
    pub owner: Option<ClassId>,
    pub kind: FunctionKind,
    pub signature: Arc<Signature>,
    pub recognized: Option<RecognizedKind>,
}

impl Function {
    pub fn new(id: FunctionId, name: Symbol, signature: Signature) -> Function {
        Function {
            id,
            name,
            owner: None,
            kind: FunctionKind::Regular,
            signature: Arc::new(signature),
            recognized: None,
        }
    }

    pub fn is_closure(&self) -> bool {
        self.kind == FunctionKind::Closure
    }

    pub fn num_fixed_parameters(&self) -> usize {
        self.signature.num_fixed_parameters
    }

    pub fn num_parameters(&self) -> usize {
        self.signature.num_parameters()
    }

    pub fn has_optional_parameters(&self) -> bool {
        self.signature.has_optional_parameters()
    }
}

pub type EnvId = Id<Environment>;
pub type MaterializationId = Id<MaterializeObject>;

#[derive(Clone, PartialEq, Debug)]
pub enum EnvValue {
    Located(Location),
    Materialized(MaterializationId),
}

/// Live values of one frame at a deoptimization point. `outer` links to the
/// frame of the caller when the function was inlined.
#[derive(Debug)]
pub struct Environment {
    pub values: Vec<EnvValue>,
    pub fixed_parameter_count: usize,
    pub function: Arc<Function>,
    pub deopt_id: DeoptId,
    pub outer: Option<EnvId>,
}

impl Environment {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// An allocation sunk by the optimizer, rebuilt by the deoptimizer.
#[derive(Debug)]
pub struct MaterializeObject {
    pub class_id: ClassId,
    pub fields: Vec<(i32, EnvValue)>,
}

#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct BlockId(pub u32);

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum CompareKind {
    StrictEqual,
    StrictNotEqual,
}

#[derive(Clone, Debug)]
pub struct PolymorphicTarget {
    pub class_id: ClassId,
    pub target: Arc<Function>,
    pub count: usize,
}

#[derive(Debug)]
pub enum InstructionKind {
    ParallelMove(ParallelMove),
    PushArgument,
    Goto(BlockId),
    Return,
    InstanceOf {
        ty: AbstractType,
        negate: bool,
    },
    AssertAssignable {
        ty: AbstractType,
        dst_name: Symbol,
    },
    StaticCall {
        function: Arc<Function>,
        argument_names: Vec<Symbol>,
        argument_count: usize,
    },
    InstanceCall {
        ic_data: Arc<ICData>,
        argument_count: usize,
    },
    PolymorphicInstanceCall {
        ic_data: Arc<ICData>,
        argument_count: usize,
        targets: Vec<PolymorphicTarget>,
    },
    CheckClass {
        class_ids: Vec<ClassId>,
    },
    CheckSmi,
    CheckStackOverflow,
    StrictCompare {
        kind: CompareKind,
        needs_number_check: bool,
    },
}

impl InstructionKind {
    pub fn name(&self) -> &'static str {
        match self {
            InstructionKind::ParallelMove(_) => "ParallelMove",
            InstructionKind::PushArgument => "PushArgument",
            InstructionKind::Goto(_) => "Goto",
            InstructionKind::Return => "Return",
            InstructionKind::InstanceOf { .. } => "InstanceOf",
            InstructionKind::AssertAssignable { .. } => "AssertAssignable",
            InstructionKind::StaticCall { .. } => "StaticCall",
            InstructionKind::InstanceCall { .. } => "InstanceCall",
            InstructionKind::PolymorphicInstanceCall { .. } => "PolymorphicInstanceCall",
            InstructionKind::CheckClass { .. } => "CheckClass",
            InstructionKind::CheckSmi => "CheckSmi",
            InstructionKind::CheckStackOverflow => "CheckStackOverflow",
            InstructionKind::StrictCompare { .. } => "StrictCompare",
        }
    }

    /// Instructions that deoptimize through a stub of their own in
    /// optimized code.
    pub fn deoptimizes_eagerly(&self) -> bool {
        matches!(
            self,
            InstructionKind::CheckClass { .. }
                | InstructionKind::CheckSmi
                | InstructionKind::PolymorphicInstanceCall { .. }
        )
    }
}

#[derive(Debug)]
pub struct Instruction {
    pub kind: InstructionKind,
    pub deopt_id: DeoptId,
    pub token_pos: TokenPosition,
    pub locs: LocationSummary,
    pub env: Option<EnvId>,
}

impl Instruction {
    pub fn new(kind: InstructionKind, locs: LocationSummary) -> Instruction {
        Instruction {
            kind,
            deopt_id: DeoptId::NONE,
            token_pos: TokenPosition::NO_SOURCE,
            locs,
            env: None,
        }
    }

    pub fn with_deopt_id(mut self, deopt_id: DeoptId) -> Instruction {
        self.deopt_id = deopt_id;
        self
    }

    pub fn with_token_pos(mut self, token_pos: TokenPosition) -> Instruction {
        self.token_pos = token_pos;
        self
    }

    pub fn with_env(mut self, env: EnvId) -> Instruction {
        self.env = Some(env);
        self
    }
}

#[derive(Debug)]
pub struct Block {
    pub id: BlockId,
    pub instructions: Vec<Instruction>,
}

/// A scheduled and register allocated function body.
pub struct FlowGraph {
    pub function: Arc<Function>,
    pub is_optimized: bool,
    pub blocks: Vec<Block>,
    pub environments: Arena<Environment>,
    pub materializations: Arena<MaterializeObject>,
    // locals and spill slots below the frame header, copied parameters
    // take the first slots
    pub spill_slot_count: usize,
    // optimized code keeps counting invocations
    pub may_reoptimize: bool,
}

impl FlowGraph {
    pub fn new(function: Arc<Function>, is_optimized: bool) -> FlowGraph {
        FlowGraph {
            function,
            is_optimized,
            blocks: Vec::new(),
            environments: Arena::new(),
            materializations: Arena::new(),
            spill_slot_count: 0,
            may_reoptimize: false,
        }
    }

    pub fn add_block(&mut self, instructions: Vec<Instruction>) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(Block { id, instructions });
        id
    }

    pub fn add_environment(&mut self, env: Environment) -> EnvId {
        self.environments.alloc(env)
    }

    pub fn add_materialization(&mut self, object: MaterializeObject) -> MaterializationId {
        self.materializations.alloc(object)
    }

    pub fn env(&self, id: EnvId) -> &Environment {
        &self.environments[id]
    }

    /// Walks from `id` to the outermost frame.
    pub fn env_chain(&self, id: EnvId) -> Vec<EnvId> {
        let mut chain = Vec::new();
        let mut current = Some(id);

        while let Some(id) = current {
            chain.push(id);
            current = self.environments[id].outer;
        }

        chain
    }

    pub fn num_instructions(&self) -> usize {
        self.blocks.iter().map(|block| block.instructions.len()).sum()
    }
}
