pub use sable_asm::{FReg, Reg};

pub const RAX: Reg = Reg(0);
pub const RCX: Reg = Reg(1);
pub const RDX: Reg = Reg(2);
pub const RBX: Reg = Reg(3);
pub const RSP: Reg = Reg(4);
pub const RBP: Reg = Reg(5);
pub const RSI: Reg = Reg(6);
pub const RDI: Reg = Reg(7);
pub const R8: Reg = Reg(8);
pub const R9: Reg = Reg(9);
pub const R10: Reg = Reg(10);
pub const R11: Reg = Reg(11);
pub const R12: Reg = Reg(12);
pub const R13: Reg = Reg(13);
pub const R14: Reg = Reg(14);
pub const R15: Reg = Reg(15);

pub const XMM0: FReg = FReg(0);
pub const XMM1: FReg = FReg(1);
pub const XMM15: FReg = FReg(15);

pub const NUM_REGS: usize = 16;
pub const NUM_FREGS: usize = 16;

pub const REG_RESULT: Reg = RAX;
pub const REG_INSTANTIATOR: Reg = RCX;
pub const REG_INSTANTIATOR_TYPE_ARGS: Reg = RDX;
pub const REG_IC_DATA: Reg = RBX;
pub const REG_SP: Reg = RSP;
pub const REG_FP: Reg = RBP;
pub const REG_FUNCTION: Reg = RDI;
pub const REG_ARGS_DESC: Reg = R10;
pub const REG_PP: Reg = R15;
pub const REG_THREAD: Reg = R14;

// never handed out by the register allocator
pub const REG_TMP1: Reg = R11;
pub const REG_TMP2: Reg = R12;
pub const FREG_TMP: FReg = XMM15;

pub const FREG_RESULT: FReg = XMM0;

pub const RESERVED_REGS: [Reg; 6] = [REG_SP, REG_FP, REG_TMP1, REG_TMP2, REG_PP, REG_THREAD];

pub fn is_allocatable(reg: Reg) -> bool {
    !RESERVED_REGS.contains(&reg)
}

pub fn is_allocatable_freg(reg: FReg) -> bool {
    reg != FREG_TMP
}

pub const WORD_SIZE: i32 = 8;
pub const FPU_REG_SIZE: i32 = 16;

// Frame layout in words relative to the frame pointer:
//   fp+2 ..  incoming arguments, last argument closest to fp
//   fp+1     return address
//   fp+0     caller fp
//   fp-1     pc marker (code object)
//   fp-2     caller pool pointer
//   fp-3 ..  locals and spill slots
pub const PARAM_END_SLOT_FROM_FP: i32 = 1;
pub const SAVED_CALLER_PC_SLOT_FROM_FP: i32 = 1;
pub const SAVED_CALLER_FP_SLOT_FROM_FP: i32 = 0;
pub const PC_MARKER_SLOT_FROM_FP: i32 = -1;
pub const SAVED_PP_SLOT_FROM_FP: i32 = -2;
pub const FIRST_LOCAL_SLOT_FROM_FP: i32 = -3;

// thread local data, addressed through REG_THREAD
pub const THREAD_STACK_LIMIT_OFFSET: i32 = 0;

// size of the patchable prologue in front of the pc recovery
pub const ENTRY_PATCH_NOPS: u32 = 4;

// object pool of the code, relative to the pc recovered at entry
pub const POOL_POINTER_FROM_PC_OFFSET: i32 = -16;

// pool pointer of the callee until its frame is entered
pub const REG_NEW_PP: Reg = R13;

pub fn fp_offset(slot: i32) -> i32 {
    slot * WORD_SIZE
}
