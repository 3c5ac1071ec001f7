use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::hash::Hash;
use std::io::Cursor;

use crate::object_model::{ClassId, Object};

#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum DeoptReason {
    Unknown,
    CheckClass,
    CheckSmi,
    PolymorphicInstanceCallTestFail,
    AtCall,
}

/// One step of rebuilding unoptimized frames. Frames are written from the
/// innermost callee to the outermost caller.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum DeoptInstr {
    MaterializeObject { class_id: ClassId, field_count: u32 },
    PoolPointer(Object),
    PcMarker(Object),
    CallerFp,
    CallerPp,
    CallerPc,
    ReturnAddress { function: Object, deopt_id: u32 },
    Register(u8),
    FpuRegister(u8),
    QuadFpuRegister(u8),
    StackSlot(i32),
    DoubleStackSlot(i32),
    QuadStackSlot(i32),
    Constant(Object),
    MaterializedObjectRef(u32),
}

#[derive(Copy, Clone, PartialEq, Eq, Debug, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
enum DeoptOpcode {
    MaterializeObject,
    PoolPointer,
    PcMarker,
    CallerFp,
    CallerPp,
    CallerPc,
    ReturnAddress,
    Register,
    FpuRegister,
    QuadFpuRegister,
    StackSlot,
    DoubleStackSlot,
    QuadStackSlot,
    Constant,
    MaterializedObjectRef,
}

/// A flattened environment chain. Instructions before `frame_start` describe
/// objects to materialize before any frame is written.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct DeoptInfo {
    pub frame_start: usize,
    pub instrs: Vec<DeoptInstr>,
}

impl DeoptInfo {
    pub fn frame_size(&self) -> usize {
        self.instrs.len() - self.frame_start
    }

    pub fn frame_instrs(&self) -> &[DeoptInstr] {
        &self.instrs[self.frame_start..]
    }

    /// Executes the instructions against a stopped optimized frame.
    pub fn replay(&self, frame: &OptimizedFrame) -> DeoptFrames {
        let materializations = self.instrs[..self.frame_start]
            .iter()
            .map(|instr| match *instr {
                DeoptInstr::MaterializeObject {
                    class_id,
                    field_count,
                } => (class_id, field_count),
                _ => panic!("unexpected {:?} in materialization prefix", instr),
            })
            .collect();

        let slots = self
            .frame_instrs()
            .iter()
            .map(|instr| frame.resolve(instr))
            .collect();

        DeoptFrames {
            materializations,
            slots,
        }
    }
}

/// Machine state of an optimized frame at a deoptimization point.
#[derive(Default, Debug)]
pub struct OptimizedFrame {
    pub registers: HashMap<u8, Object>,
    pub fpu_registers: HashMap<u8, Object>,
    pub stack: HashMap<i32, Object>,
}

impl OptimizedFrame {
    fn resolve(&self, instr: &DeoptInstr) -> FrameSlot {
        match instr {
            DeoptInstr::MaterializeObject { .. } => {
                panic!("materialization outside of prefix")
            }
            DeoptInstr::PoolPointer(function) => FrameSlot::PoolPointer(function.clone()),
            DeoptInstr::PcMarker(code) => FrameSlot::PcMarker(code.clone()),
            DeoptInstr::CallerFp => FrameSlot::CallerFp,
            DeoptInstr::CallerPp => FrameSlot::CallerPp,
            DeoptInstr::CallerPc => FrameSlot::CallerPc,
            DeoptInstr::ReturnAddress { function, deopt_id } => FrameSlot::ReturnAddress {
                function: function.clone(),
                deopt_id: *deopt_id,
            },
            DeoptInstr::Register(reg) => FrameSlot::Value(read_value(&self.registers, reg)),
            DeoptInstr::FpuRegister(reg) | DeoptInstr::QuadFpuRegister(reg) => {
                FrameSlot::Value(read_value(&self.fpu_registers, reg))
            }
            DeoptInstr::StackSlot(idx)
            | DeoptInstr::DoubleStackSlot(idx)
            | DeoptInstr::QuadStackSlot(idx) => FrameSlot::Value(read_value(&self.stack, idx)),
            DeoptInstr::Constant(value) => FrameSlot::Value(value.clone()),
            DeoptInstr::MaterializedObjectRef(idx) => FrameSlot::MaterializedObject(*idx),
        }
    }
}

// slots the optimized code never wrote read as null
fn read_value<K: Hash + Eq>(map: &HashMap<K, Object>, key: &K) -> Object {
    map.get(key).cloned().unwrap_or(Object::Null)
}

#[derive(Clone, PartialEq, Debug)]
pub enum FrameSlot {
    Value(Object),
    PoolPointer(Object),
    PcMarker(Object),
    ReturnAddress { function: Object, deopt_id: u32 },
    CallerFp,
    CallerPp,
    CallerPc,
    MaterializedObject(u32),
}

#[derive(Clone, PartialEq, Debug)]
pub struct DeoptFrames {
    pub materializations: Vec<(ClassId, u32)>,
    pub slots: Vec<FrameSlot>,
}

#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct DeoptInfoId(pub u32);

struct DeoptTableInner {
    entries: Vec<Vec<u8>>,
    interned: HashMap<Vec<u8>, DeoptInfoId>,
    objects: Vec<Object>,
    object_indices: HashMap<Object, u32>,
}

impl DeoptTableInner {
    fn add_object(&mut self, object: &Object) -> u32 {
        if let Some(&idx) = self.object_indices.get(object) {
            return idx;
        }

        let idx = self.objects.len() as u32;
        self.objects.push(object.clone());
        self.object_indices.insert(object.clone(), idx);
        idx
    }

    fn encode(&mut self, info: &DeoptInfo) -> Vec<u8> {
        let mut buf = Vec::new();
        write_u32(&mut buf, info.frame_start as u32);
        write_u32(&mut buf, info.instrs.len() as u32);

        for instr in &info.instrs {
            match instr {
                DeoptInstr::MaterializeObject {
                    class_id,
                    field_count,
                } => {
                    buf.push(DeoptOpcode::MaterializeObject.into());
                    write_u32(&mut buf, class_id.0);
                    write_u32(&mut buf, *field_count);
                }
                DeoptInstr::PoolPointer(object) => {
                    buf.push(DeoptOpcode::PoolPointer.into());
                    let idx = self.add_object(object);
                    write_u32(&mut buf, idx);
                }
                DeoptInstr::PcMarker(object) => {
                    buf.push(DeoptOpcode::PcMarker.into());
                    let idx = self.add_object(object);
                    write_u32(&mut buf, idx);
                }
                DeoptInstr::CallerFp => buf.push(DeoptOpcode::CallerFp.into()),
                DeoptInstr::CallerPp => buf.push(DeoptOpcode::CallerPp.into()),
                DeoptInstr::CallerPc => buf.push(DeoptOpcode::CallerPc.into()),
                DeoptInstr::ReturnAddress { function, deopt_id } => {
                    buf.push(DeoptOpcode::ReturnAddress.into());
                    let idx = self.add_object(function);
                    write_u32(&mut buf, idx);
                    write_u32(&mut buf, *deopt_id);
                }
                DeoptInstr::Register(reg) => {
                    buf.push(DeoptOpcode::Register.into());
                    buf.push(*reg);
                }
                DeoptInstr::FpuRegister(reg) => {
                    buf.push(DeoptOpcode::FpuRegister.into());
                    buf.push(*reg);
                }
                DeoptInstr::QuadFpuRegister(reg) => {
                    buf.push(DeoptOpcode::QuadFpuRegister.into());
                    buf.push(*reg);
                }
                DeoptInstr::StackSlot(idx) => {
                    buf.push(DeoptOpcode::StackSlot.into());
                    write_i32(&mut buf, *idx);
                }
                DeoptInstr::DoubleStackSlot(idx) => {
                    buf.push(DeoptOpcode::DoubleStackSlot.into());
                    write_i32(&mut buf, *idx);
                }
                DeoptInstr::QuadStackSlot(idx) => {
                    buf.push(DeoptOpcode::QuadStackSlot.into());
                    write_i32(&mut buf, *idx);
                }
                DeoptInstr::Constant(object) => {
                    buf.push(DeoptOpcode::Constant.into());
                    let idx = self.add_object(object);
                    write_u32(&mut buf, idx);
                }
                DeoptInstr::MaterializedObjectRef(idx) => {
                    buf.push(DeoptOpcode::MaterializedObjectRef.into());
                    write_u32(&mut buf, *idx);
                }
            }
        }

        buf
    }

    fn decode(&self, data: &[u8]) -> DeoptInfo {
        let mut reader = Cursor::new(data);
        let frame_start = read_u32(&mut reader) as usize;
        let len = read_u32(&mut reader) as usize;
        let mut instrs = Vec::with_capacity(len);

        for _ in 0..len {
            let opcode = reader.read_u8().expect("truncated deopt info");
            let opcode = DeoptOpcode::try_from(opcode).expect("invalid deopt opcode");

            let instr = match opcode {
                DeoptOpcode::MaterializeObject => DeoptInstr::MaterializeObject {
                    class_id: ClassId(read_u32(&mut reader)),
                    field_count: read_u32(&mut reader),
                },
                DeoptOpcode::PoolPointer => DeoptInstr::PoolPointer(self.read_object(&mut reader)),
                DeoptOpcode::PcMarker => DeoptInstr::PcMarker(self.read_object(&mut reader)),
                DeoptOpcode::CallerFp => DeoptInstr::CallerFp,
                DeoptOpcode::CallerPp => DeoptInstr::CallerPp,
                DeoptOpcode::CallerPc => DeoptInstr::CallerPc,
                DeoptOpcode::ReturnAddress => DeoptInstr::ReturnAddress {
                    function: self.read_object(&mut reader),
                    deopt_id: read_u32(&mut reader),
                },
                DeoptOpcode::Register => DeoptInstr::Register(read_u8(&mut reader)),
                DeoptOpcode::FpuRegister => DeoptInstr::FpuRegister(read_u8(&mut reader)),
                DeoptOpcode::QuadFpuRegister => DeoptInstr::QuadFpuRegister(read_u8(&mut reader)),
                DeoptOpcode::StackSlot => DeoptInstr::StackSlot(read_i32(&mut reader)),
                DeoptOpcode::DoubleStackSlot => DeoptInstr::DoubleStackSlot(read_i32(&mut reader)),
                DeoptOpcode::QuadStackSlot => DeoptInstr::QuadStackSlot(read_i32(&mut reader)),
                DeoptOpcode::Constant => DeoptInstr::Constant(self.read_object(&mut reader)),
                DeoptOpcode::MaterializedObjectRef => {
                    DeoptInstr::MaterializedObjectRef(read_u32(&mut reader))
                }
            };

            instrs.push(instr);
        }

        DeoptInfo {
            frame_start,
            instrs,
        }
    }

    fn read_object(&self, reader: &mut Cursor<&[u8]>) -> Object {
        let idx = read_u32(reader) as usize;
        self.objects[idx].clone()
    }
}

// Buffers are produced by `encode` above, a short read is a corrupted table.
fn read_u8(reader: &mut Cursor<&[u8]>) -> u8 {
    reader.read_u8().expect("truncated deopt info")
}

fn read_u32(reader: &mut Cursor<&[u8]>) -> u32 {
    reader
        .read_u32::<LittleEndian>()
        .expect("truncated deopt info")
}

fn read_i32(reader: &mut Cursor<&[u8]>) -> i32 {
    reader
        .read_i32::<LittleEndian>()
        .expect("truncated deopt info")
}

fn write_u32(buf: &mut Vec<u8>, value: u32) {
    buf.write_u32::<LittleEndian>(value)
        .expect("writing to a Vec cannot fail");
}

fn write_i32(buf: &mut Vec<u8>, value: i32) {
    buf.write_i32::<LittleEndian>(value)
        .expect("writing to a Vec cannot fail");
}

/// Process-wide table of deoptimization recipes. Identical recipes from
/// different functions share one entry.
pub struct DeoptTable {
    inner: RwLock<DeoptTableInner>,
}

impl DeoptTable {
    pub fn new() -> DeoptTable {
        DeoptTable {
            inner: RwLock::new(DeoptTableInner {
                entries: Vec::new(),
                interned: HashMap::new(),
                objects: Vec::new(),
                object_indices: HashMap::new(),
            }),
        }
    }

    pub fn add(&self, info: &DeoptInfo) -> DeoptInfoId {
        let mut inner = self.inner.write();
        let encoded = inner.encode(info);

        if let Some(&id) = inner.interned.get(&encoded) {
            return id;
        }

        let id = DeoptInfoId(inner.entries.len() as u32);
        inner.entries.push(encoded.clone());
        inner.interned.insert(encoded, id);
        id
    }

    pub fn get(&self, id: DeoptInfoId) -> Option<DeoptInfo> {
        let inner = self.inner.read();
        let data = inner.entries.get(id.0 as usize)?;
        Some(inner.decode(data))
    }

    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Objects referenced from recipes, kept alive by the table.
    pub fn objects(&self) -> Vec<Object> {
        self.inner.read().objects.clone()
    }
}

impl Default for DeoptTable {
    fn default() -> DeoptTable {
        DeoptTable::new()
    }
}
