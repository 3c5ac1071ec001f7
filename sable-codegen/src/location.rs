use fixedbitset::FixedBitSet;

use sable_asm::Mem;

use crate::cpu::{FReg, Reg, FIRST_LOCAL_SLOT_FROM_FP, NUM_FREGS, NUM_REGS, REG_FP, WORD_SIZE};
use crate::object_model::Object;

/// Where a value lives at one program point. Stack slot indices are word
/// offsets from the frame pointer.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum Location {
    Register(Reg),
    FpuRegister(FReg),
    StackSlot(i32),
    DoubleStackSlot(i32),
    QuadStackSlot(i32),
    Constant(Object),
}

impl Location {
    /// Spill slot `idx` of the current frame, counting away from the frame
    /// pointer.
    pub fn spill_slot(idx: usize) -> Location {
        Location::StackSlot(FIRST_LOCAL_SLOT_FROM_FP - idx as i32)
    }

    pub fn is_register(&self) -> bool {
        matches!(self, Location::Register(_))
    }

    pub fn is_fpu_register(&self) -> bool {
        matches!(self, Location::FpuRegister(_))
    }

    pub fn is_stack_slot(&self) -> bool {
        matches!(self, Location::StackSlot(_))
    }

    pub fn is_double_stack_slot(&self) -> bool {
        matches!(self, Location::DoubleStackSlot(_))
    }

    pub fn is_quad_stack_slot(&self) -> bool {
        matches!(self, Location::QuadStackSlot(_))
    }

    pub fn is_constant(&self) -> bool {
        matches!(self, Location::Constant(_))
    }

    pub fn is_memory(&self) -> bool {
        self.stack_index().is_some()
    }

    pub fn reg(&self) -> Reg {
        match *self {
            Location::Register(reg) => reg,
            _ => panic!("location {:?} is not a register", self),
        }
    }

    pub fn freg(&self) -> FReg {
        match *self {
            Location::FpuRegister(reg) => reg,
            _ => panic!("location {:?} is not an fpu register", self),
        }
    }

    pub fn constant(&self) -> &Object {
        match self {
            Location::Constant(value) => value,
            _ => panic!("location {:?} is not a constant", self),
        }
    }

    pub fn stack_index(&self) -> Option<i32> {
        match *self {
            Location::StackSlot(idx)
            | Location::DoubleStackSlot(idx)
            | Location::QuadStackSlot(idx) => Some(idx),
            _ => None,
        }
    }

    pub fn to_stack_slot_address(&self) -> Mem {
        match self.stack_index() {
            Some(idx) => Mem::Base(REG_FP, idx * WORD_SIZE),
            None => panic!("location {:?} is not on the stack", self),
        }
    }
}

#[derive(Clone, Debug)]
pub struct RegisterSet {
    cpu_registers: FixedBitSet,
    untagged_cpu_registers: FixedBitSet,
    fpu_registers: FixedBitSet,
}

impl RegisterSet {
    pub fn new() -> RegisterSet {
        RegisterSet {
            cpu_registers: FixedBitSet::with_capacity(NUM_REGS),
            untagged_cpu_registers: FixedBitSet::with_capacity(NUM_REGS),
            fpu_registers: FixedBitSet::with_capacity(NUM_FREGS),
        }
    }

    pub fn add(&mut self, loc: &Location, tagged: bool) {
        match *loc {
            Location::Register(reg) => {
                self.cpu_registers.insert(reg.idx());
                self.untagged_cpu_registers.set(reg.idx(), !tagged);
            }
            Location::FpuRegister(reg) => self.fpu_registers.insert(reg.idx()),
            _ => panic!("only registers can be live across a call, got {:?}", loc),
        }
    }

    pub fn add_register(&mut self, reg: Reg) {
        self.add(&Location::Register(reg), true);
    }

    pub fn contains_register(&self, reg: Reg) -> bool {
        self.cpu_registers.contains(reg.idx())
    }

    pub fn contains_fpu_register(&self, reg: FReg) -> bool {
        self.fpu_registers.contains(reg.idx())
    }

    pub fn is_tagged(&self, reg: Reg) -> bool {
        self.contains_register(reg) && !self.untagged_cpu_registers.contains(reg.idx())
    }

    pub fn cpu_registers(&self) -> impl Iterator<Item = Reg> + '_ {
        self.cpu_registers.ones().map(|idx| Reg(idx as u8))
    }

    pub fn fpu_registers(&self) -> impl Iterator<Item = FReg> + '_ {
        self.fpu_registers.ones().map(|idx| FReg(idx as u8))
    }

    pub fn cpu_count(&self) -> usize {
        self.cpu_registers.count_ones(..)
    }

    pub fn fpu_count(&self) -> usize {
        self.fpu_registers.count_ones(..)
    }

    pub fn is_empty(&self) -> bool {
        self.cpu_count() == 0 && self.fpu_count() == 0
    }
}

impl Default for RegisterSet {
    fn default() -> RegisterSet {
        RegisterSet::new()
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum ContainsCall {
    NoCall,
    Call,
    CallOnSlowPath,
}

/// Register allocation result for one instruction.
#[derive(Clone, Debug)]
pub struct LocationSummary {
    pub inputs: Vec<Location>,
    pub temps: Vec<Location>,
    pub output: Option<Location>,
    pub contains_call: ContainsCall,
    pub live_registers: RegisterSet,
    // spill slots holding tagged values, indexed like `Location::spill_slot`
    pub stack_bitmap: FixedBitSet,
}

impl LocationSummary {
    pub fn new(contains_call: ContainsCall) -> LocationSummary {
        LocationSummary {
            inputs: Vec::new(),
            temps: Vec::new(),
            output: None,
            contains_call,
            live_registers: RegisterSet::new(),
            stack_bitmap: FixedBitSet::with_capacity(0),
        }
    }

    pub fn with_inputs(mut self, inputs: Vec<Location>) -> LocationSummary {
        self.inputs = inputs;
        self
    }

    pub fn with_temps(mut self, temps: Vec<Location>) -> LocationSummary {
        self.temps = temps;
        self
    }

    pub fn with_output(mut self, output: Location) -> LocationSummary {
        self.output = Some(output);
        self
    }

    pub fn input(&self, idx: usize) -> &Location {
        &self.inputs[idx]
    }

    pub fn temp(&self, idx: usize) -> &Location {
        &self.temps[idx]
    }

    pub fn out(&self) -> Option<&Location> {
        self.output.as_ref()
    }

    pub fn always_calls(&self) -> bool {
        self.contains_call == ContainsCall::Call
    }

    pub fn has_call_on_slow_path(&self) -> bool {
        self.contains_call == ContainsCall::CallOnSlowPath
    }

    pub fn can_call(&self) -> bool {
        self.contains_call != ContainsCall::NoCall
    }

    pub fn set_stack_bit(&mut self, spill_idx: usize) {
        if spill_idx >= self.stack_bitmap.len() {
            self.stack_bitmap.grow(spill_idx + 1);
        }
        self.stack_bitmap.insert(spill_idx);
    }
}

#[derive(Clone, PartialEq, Debug)]
pub struct MoveOperands {
    pub src: Location,
    pub dest: Location,
    // set while the move sits on the resolver's dfs stack
    pending: bool,
    eliminated: bool,
}

impl MoveOperands {
    pub fn new(dest: Location, src: Location) -> MoveOperands {
        MoveOperands {
            src,
            dest,
            pending: false,
            eliminated: false,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending
    }

    pub fn mark_pending(&mut self) {
        self.pending = true;
    }

    pub fn clear_pending(&mut self) {
        self.pending = false;
    }

    pub fn is_eliminated(&self) -> bool {
        self.eliminated
    }

    pub fn eliminate(&mut self) {
        self.pending = false;
        self.eliminated = true;
    }

    pub fn is_redundant(&self) -> bool {
        self.eliminated || self.src == self.dest
    }

    /// Whether performing this move would read `loc`.
    pub fn blocks(&self, loc: &Location) -> bool {
        !self.eliminated && self.src == *loc
    }
}

#[derive(Clone, Debug, Default)]
pub struct ParallelMove {
    pub moves: Vec<MoveOperands>,
}

impl ParallelMove {
    pub fn new() -> ParallelMove {
        ParallelMove { moves: Vec::new() }
    }

    pub fn add_move(&mut self, dest: Location, src: Location) {
        self.moves.push(MoveOperands::new(dest, src));
    }

    pub fn is_redundant(&self) -> bool {
        self.moves.iter().all(|mv| mv.is_redundant())
    }

    pub fn len(&self) -> usize {
        self.moves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.moves.is_empty()
    }
}
