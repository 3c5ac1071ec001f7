use std::fmt;

use crate::{FReg, Label, Reg};

#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum ScaleFactor {
    One,
    Two,
    Four,
    Eight,
}

impl ScaleFactor {
    pub fn value(self) -> i64 {
        match self {
            ScaleFactor::One => 1,
            ScaleFactor::Two => 2,
            ScaleFactor::Four => 4,
            ScaleFactor::Eight => 8,
        }
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum Mem {
    // base + disp
    Base(Reg, i32),

    // base + index * scale + disp
    Index(Reg, Reg, ScaleFactor, i32),
}

impl Mem {
    pub fn base(self) -> Reg {
        match self {
            Mem::Base(base, _) => base,
            Mem::Index(base, _, _, _) => base,
        }
    }

    pub fn uses(self, reg: Reg) -> bool {
        match self {
            Mem::Base(base, _) => base == reg,
            Mem::Index(base, index, _, _) => base == reg || index == reg,
        }
    }
}

impl fmt::Display for Mem {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Mem::Base(base, disp) => write!(f, "[{}{:+}]", base, disp),
            Mem::Index(base, index, scale, disp) => {
                write!(f, "[{}+{}*{}{:+}]", base, index, scale.value(), disp)
            }
        }
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum Cond {
    Equal,
    NotEqual,
    Less,
    LessEq,
    Greater,
    GreaterEq,
    Zero,
    NotZero,
}

impl Cond {
    pub fn negate(self) -> Cond {
        match self {
            Cond::Equal => Cond::NotEqual,
            Cond::NotEqual => Cond::Equal,
            Cond::Less => Cond::GreaterEq,
            Cond::LessEq => Cond::Greater,
            Cond::Greater => Cond::LessEq,
            Cond::GreaterEq => Cond::Less,
            Cond::Zero => Cond::NotZero,
            Cond::NotZero => Cond::Zero,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Cond::Equal => "eq",
            Cond::NotEqual => "ne",
            Cond::Less => "lt",
            Cond::LessEq => "le",
            Cond::Greater => "gt",
            Cond::GreaterEq => "ge",
            Cond::Zero => "z",
            Cond::NotZero => "nz",
        }
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum FWidth {
    Double,
    Quad,
}

/// Index into the object pool of the function being assembled.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct PoolIndex(pub u32);

/// Shared stub, resolved by the runtime when code is installed.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct StubId(pub u32);

#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct RuntimeId(pub u32);

#[derive(Clone, PartialEq, Debug)]
pub enum Inst {
    Move(Reg, Reg),
    LoadImm(Reg, i64),
    LoadObject(Reg, PoolIndex),
    Load(Reg, Mem),
    Store(Mem, Reg),
    StoreObject(Mem, PoolIndex),
    Lea(Reg, Mem),
    Exchange(Reg, Reg),
    ExchangeMem(Reg, Mem),
    FMove(FReg, FReg),
    FLoad(FWidth, FReg, Mem),
    FStore(FWidth, Mem, FReg),
    Push(Reg),
    PushObject(PoolIndex),
    Pop(Reg),
    // add rsp, n * WORD
    Drop(u32),

    AddImm(Reg, i64),
    AddImmMem(Mem, i64),
    Sub(Reg, Reg),
    And(Reg, Reg),
    Dec(Reg),
    Neg(Reg),
    SmiTag(Reg),
    SmiUntag(Reg),

    Cmp(Reg, Reg),
    CmpImm(Reg, i64),
    CmpMem(Reg, Mem),
    CmpMemImm(Mem, i64),
    CmpObject(Reg, PoolIndex),
    // sets Zero when the tag bit is clear
    TestSmiTag(Reg),
    LoadClassId(Reg, Reg),
    LoadClassById(Reg, Reg),
    // loads the pc of the following instruction
    LoadPc(Reg),

    Jump(Label),
    JumpIf(Cond, Label),
    JumpToStub(StubId),
    JumpIfToStub(Cond, StubId),
    JumpPatchable(StubId),
    Call(StubId),
    CallPatchable(StubId),
    CallReg(Reg),
    CallRuntime(RuntimeId, u32),
    Ret,

    EnterFrame(u32),
    LeaveFrame,
    Nop(u32),
    Breakpoint,
    Stop(String),
}

impl Inst {
    pub fn label(&self) -> Option<Label> {
        match *self {
            Inst::Jump(lbl) | Inst::JumpIf(_, lbl) => Some(lbl),
            _ => None,
        }
    }

    pub fn is_call(&self) -> bool {
        matches!(
            self,
            Inst::Call(_) | Inst::CallPatchable(_) | Inst::CallReg(_) | Inst::CallRuntime(..)
        )
    }
}

impl fmt::Display for Inst {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Inst::Move(dest, src) => write!(f, "mov {}, {}", dest, src),
            Inst::LoadImm(dest, imm) => write!(f, "mov {}, #{}", dest, imm),
            Inst::LoadObject(dest, idx) => write!(f, "ldobj {}, pp[{}]", dest, idx.0),
            Inst::Load(dest, mem) => write!(f, "ld {}, {}", dest, mem),
            Inst::Store(mem, src) => write!(f, "st {}, {}", mem, src),
            Inst::StoreObject(mem, idx) => write!(f, "stobj {}, pp[{}]", mem, idx.0),
            Inst::Lea(dest, mem) => write!(f, "lea {}, {}", dest, mem),
            Inst::Exchange(lhs, rhs) => write!(f, "xchg {}, {}", lhs, rhs),
            Inst::ExchangeMem(reg, mem) => write!(f, "xchg {}, {}", reg, mem),
            Inst::FMove(dest, src) => write!(f, "fmov {}, {}", dest, src),
            Inst::FLoad(width, dest, mem) => write!(f, "fld.{:?} {}, {}", width, dest, mem),
            Inst::FStore(width, mem, src) => write!(f, "fst.{:?} {}, {}", width, mem, src),
            Inst::Push(reg) => write!(f, "push {}", reg),
            Inst::PushObject(idx) => write!(f, "pushobj pp[{}]", idx.0),
            Inst::Pop(reg) => write!(f, "pop {}", reg),
            Inst::Drop(n) => write!(f, "drop {}", n),
            Inst::AddImm(reg, imm) => write!(f, "add {}, #{}", reg, imm),
            Inst::AddImmMem(mem, imm) => write!(f, "add {}, #{}", mem, imm),
            Inst::Sub(lhs, rhs) => write!(f, "sub {}, {}", lhs, rhs),
            Inst::And(lhs, rhs) => write!(f, "and {}, {}", lhs, rhs),
            Inst::Dec(reg) => write!(f, "dec {}", reg),
            Inst::Neg(reg) => write!(f, "neg {}", reg),
            Inst::SmiTag(reg) => write!(f, "smitag {}", reg),
            Inst::SmiUntag(reg) => write!(f, "smiuntag {}", reg),
            Inst::Cmp(lhs, rhs) => write!(f, "cmp {}, {}", lhs, rhs),
            Inst::CmpImm(reg, imm) => write!(f, "cmp {}, #{}", reg, imm),
            Inst::CmpMem(reg, mem) => write!(f, "cmp {}, {}", reg, mem),
            Inst::CmpMemImm(mem, imm) => write!(f, "cmp {}, #{}", mem, imm),
            Inst::CmpObject(reg, idx) => write!(f, "cmpobj {}, pp[{}]", reg, idx.0),
            Inst::TestSmiTag(reg) => write!(f, "testsmi {}", reg),
            Inst::LoadClassId(dest, obj) => write!(f, "ldcid {}, {}", dest, obj),
            Inst::LoadClassById(dest, cid) => write!(f, "ldcls {}, {}", dest, cid),
            Inst::LoadPc(dest) => write!(f, "ldpc {}", dest),
            Inst::Jump(lbl) => write!(f, "jmp L{}", lbl.idx()),
            Inst::JumpIf(cond, lbl) => write!(f, "j{} L{}", cond.name(), lbl.idx()),
            Inst::JumpToStub(stub) => write!(f, "jmp stub{}", stub.0),
            Inst::JumpIfToStub(cond, stub) => write!(f, "j{} stub{}", cond.name(), stub.0),
            Inst::JumpPatchable(stub) => write!(f, "jmp.patchable stub{}", stub.0),
            Inst::Call(stub) => write!(f, "call stub{}", stub.0),
            Inst::CallPatchable(stub) => write!(f, "call.patchable stub{}", stub.0),
            Inst::CallReg(reg) => write!(f, "call {}", reg),
            Inst::CallRuntime(entry, argc) => write!(f, "callrt rt{}, {}", entry.0, argc),
            Inst::Ret => write!(f, "ret"),
            Inst::EnterFrame(size) => write!(f, "enter {}", size),
            Inst::LeaveFrame => write!(f, "leave"),
            Inst::Nop(n) => write!(f, "nop {}", n),
            Inst::Breakpoint => write!(f, "int3"),
            Inst::Stop(msg) => write!(f, "stop \"{}\"", msg),
        }
    }
}
