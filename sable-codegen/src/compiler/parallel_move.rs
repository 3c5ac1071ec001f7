use sable_asm::{FWidth, Inst, Mem};
use tracing::trace;

use crate::cpu::{FReg, FREG_TMP, WORD_SIZE};
use crate::error::CompileError;
use crate::location::{Location, MoveOperands, ParallelMove};
use crate::masm::MacroAssembler;

/// Serializes one parallel move. Moves are performed depth first, a move
/// that finds its destination still read by a move on the stack closes a
/// cycle and is performed as a swap.
pub struct ParallelMoveResolver<'a> {
    masm: &'a mut MacroAssembler,
    moves: Vec<MoveOperands>,
}

impl<'a> ParallelMoveResolver<'a> {
    pub fn new(masm: &'a mut MacroAssembler) -> ParallelMoveResolver<'a> {
        ParallelMoveResolver {
            masm,
            moves: Vec::new(),
        }
    }

    pub fn resolve(&mut self, parallel_move: &ParallelMove) -> Result<(), CompileError> {
        self.moves = parallel_move
            .moves
            .iter()
            .filter(|mv| !mv.is_redundant())
            .cloned()
            .collect();

        // constants never block anything, performing them last keeps their
        // destination registers free for the whole resolution
        for idx in 0..self.moves.len() {
            let mv = &self.moves[idx];

            if !mv.is_eliminated() && !mv.src.is_constant() {
                self.perform_move(idx)?;
            }
        }

        for idx in 0..self.moves.len() {
            if !self.moves[idx].is_eliminated() {
                debug_assert!(self.moves[idx].src.is_constant());
                self.emit_move(idx)?;
            }
        }

        self.moves.clear();
        Ok(())
    }

    fn perform_move(&mut self, idx: usize) -> Result<(), CompileError> {
        debug_assert!(!self.moves[idx].is_pending());
        debug_assert!(!self.moves[idx].is_redundant());

        self.moves[idx].mark_pending();
        let destination = self.moves[idx].dest.clone();

        // A swap performed further down may rewrite any source, but it cannot
        // create a new blocker for this move that the loop would miss: both
        // would sit on the same cycle and the blocker would still be pending.
        for other in 0..self.moves.len() {
            let other_move = &self.moves[other];

            if other_move.blocks(&destination) && !other_move.is_pending() {
                self.perform_move(other)?;
            }
        }

        self.moves[idx].clear_pending();

        // the last move of a cycle ends up moving a value onto itself
        if self.moves[idx].src == destination {
            self.moves[idx].eliminate();
            return Ok(());
        }

        let blocked = self.moves.iter().any(|mv| mv.blocks(&destination));

        if blocked {
            self.emit_swap(idx)
        } else {
            self.emit_move(idx)
        }
    }

    fn emit_move(&mut self, idx: usize) -> Result<(), CompileError> {
        let src = self.moves[idx].src.clone();
        let dest = self.moves[idx].dest.clone();

        match (&src, &dest) {
            (&Location::Register(src_reg), &Location::Register(dest_reg)) => {
                self.masm.emit(Inst::Move(dest_reg, src_reg));
            }

            (&Location::Register(src_reg), &Location::StackSlot(_)) => {
                self.masm
                    .emit(Inst::Store(dest.to_stack_slot_address(), src_reg));
            }

            (&Location::StackSlot(_), &Location::Register(dest_reg)) => {
                self.masm
                    .emit(Inst::Load(dest_reg, src.to_stack_slot_address()));
            }

            (&Location::StackSlot(_), &Location::StackSlot(_)) => {
                self.move_memory_to_memory(dest.to_stack_slot_address(), src.to_stack_slot_address());
            }

            (&Location::FpuRegister(src_reg), &Location::FpuRegister(dest_reg)) => {
                self.masm.emit(Inst::FMove(dest_reg, src_reg));
            }

            (&Location::FpuRegister(src_reg), &Location::DoubleStackSlot(_))
            | (&Location::FpuRegister(src_reg), &Location::QuadStackSlot(_)) => {
                let width = slot_width(&dest);
                self.masm
                    .emit(Inst::FStore(width, dest.to_stack_slot_address(), src_reg));
            }

            (&Location::DoubleStackSlot(_), &Location::FpuRegister(dest_reg))
            | (&Location::QuadStackSlot(_), &Location::FpuRegister(dest_reg)) => {
                let width = slot_width(&src);
                self.masm
                    .emit(Inst::FLoad(width, dest_reg, src.to_stack_slot_address()));
            }

            (&Location::DoubleStackSlot(_), &Location::DoubleStackSlot(_))
            | (&Location::QuadStackSlot(_), &Location::QuadStackSlot(_)) => {
                let width = slot_width(&src);
                self.masm
                    .emit(Inst::FLoad(width, FREG_TMP, src.to_stack_slot_address()));
                self.masm
                    .emit(Inst::FStore(width, dest.to_stack_slot_address(), FREG_TMP));
            }

            (Location::Constant(value), &Location::Register(dest_reg)) => {
                self.masm.load_object(dest_reg, value.clone());
            }

            (Location::Constant(value), &Location::StackSlot(_)) => {
                self.masm
                    .store_object(dest.to_stack_slot_address(), value.clone());
            }

            _ => return Err(CompileError::UnsupportedMove { src, dest }),
        }

        self.moves[idx].eliminate();
        Ok(())
    }

    fn emit_swap(&mut self, idx: usize) -> Result<(), CompileError> {
        let source = self.moves[idx].src.clone();
        let destination = self.moves[idx].dest.clone();

        trace!(src = ?source, dest = ?destination, "breaking move cycle");

        match (&source, &destination) {
            (&Location::Register(src_reg), &Location::Register(dest_reg)) => {
                self.masm.emit(Inst::Exchange(dest_reg, src_reg));
            }

            (&Location::Register(reg), &Location::StackSlot(_)) => {
                self.masm
                    .emit(Inst::ExchangeMem(reg, destination.to_stack_slot_address()));
            }

            (&Location::StackSlot(_), &Location::Register(reg)) => {
                self.masm
                    .emit(Inst::ExchangeMem(reg, source.to_stack_slot_address()));
            }

            (&Location::StackSlot(_), &Location::StackSlot(_))
            | (&Location::DoubleStackSlot(_), &Location::DoubleStackSlot(_)) => {
                self.exchange_memory(
                    destination.to_stack_slot_address(),
                    source.to_stack_slot_address(),
                    1,
                );
            }

            (&Location::QuadStackSlot(_), &Location::QuadStackSlot(_)) => {
                self.exchange_memory(
                    destination.to_stack_slot_address(),
                    source.to_stack_slot_address(),
                    2,
                );
            }

            (&Location::FpuRegister(src_reg), &Location::FpuRegister(dest_reg)) => {
                self.masm.emit(Inst::FMove(FREG_TMP, src_reg));
                self.masm.emit(Inst::FMove(src_reg, dest_reg));
                self.masm.emit(Inst::FMove(dest_reg, FREG_TMP));
            }

            (&Location::FpuRegister(reg), slot @ &Location::DoubleStackSlot(_))
            | (&Location::FpuRegister(reg), slot @ &Location::QuadStackSlot(_))
            | (slot @ &Location::DoubleStackSlot(_), &Location::FpuRegister(reg))
            | (slot @ &Location::QuadStackSlot(_), &Location::FpuRegister(reg)) => {
                self.exchange_fpu_with_slot(reg, slot);
            }

            _ => {
                return Err(CompileError::UnsupportedMove {
                    src: source,
                    dest: destination,
                })
            }
        }

        // the swap also performed the move from source to destination
        self.moves[idx].eliminate();

        // every remaining move, pending or not, reading either side now
        // finds its value on the other side
        for mv in &mut self.moves {
            if mv.blocks(&source) {
                mv.src = destination.clone();
            } else if mv.blocks(&destination) {
                mv.src = source.clone();
            }
        }

        Ok(())
    }

    fn move_memory_to_memory(&mut self, dest: Mem, src: Mem) {
        let tmp = self.masm.get_scratch();
        self.masm.emit(Inst::Load(*tmp, src));
        self.masm.emit(Inst::Store(dest, *tmp));
    }

    fn exchange_memory(&mut self, lhs: Mem, rhs: Mem, words: i32) {
        let tmp1 = self.masm.get_scratch();
        let tmp2 = self.masm.get_scratch();

        for word in 0..words {
            let lhs = offset_mem(lhs, word * WORD_SIZE);
            let rhs = offset_mem(rhs, word * WORD_SIZE);

            self.masm.emit(Inst::Load(*tmp1, lhs));
            self.masm.emit(Inst::Load(*tmp2, rhs));
            self.masm.emit(Inst::Store(rhs, *tmp1));
            self.masm.emit(Inst::Store(lhs, *tmp2));
        }
    }

    fn exchange_fpu_with_slot(&mut self, reg: FReg, slot: &Location) {
        let width = slot_width(slot);
        let mem = slot.to_stack_slot_address();

        self.masm.emit(Inst::FLoad(width, FREG_TMP, mem));
        self.masm.emit(Inst::FStore(width, mem, reg));
        self.masm.emit(Inst::FMove(reg, FREG_TMP));
    }
}

fn slot_width(loc: &Location) -> FWidth {
    match loc {
        Location::DoubleStackSlot(_) => FWidth::Double,
        Location::QuadStackSlot(_) => FWidth::Quad,
        _ => unreachable!("{:?} is not an fpu stack slot", loc),
    }
}

fn offset_mem(mem: Mem, offset: i32) -> Mem {
    match mem {
        Mem::Base(base, disp) => Mem::Base(base, disp + offset),
        Mem::Index(base, index, scale, disp) => Mem::Index(base, index, scale, disp + offset),
    }
}
