//! Lock-step block-level interpreter.
//!
//! [`BlockInterp`] executes a [`Kernel`] the way a single cooperative block
//! would: every thread advances through the instruction stream one
//! instruction at a time, in lock-step. Lock-step execution makes warp
//! shuffles exact (all lanes hold their pre-exchange value when the
//! exchange happens) and makes barriers trivially correct, so the
//! interpreter only has to model data, not scheduling. Shared scratch is a
//! flat little-endian byte array, matching the byte addressing the lowering
//! emits.
//!
//! The interpreter exists so reduction plans can be executed and checked
//! against a scalar reference without any device in the loop.

use crate::error::{self, Error, Result};
use crate::kernel::{BinOp, Instr, Kernel, ValueId};
use crate::types::{BlockShape, ConstValue, ElemType};

/// Per-thread SSA values after a completed run.
#[derive(Debug)]
pub struct BlockState {
    values: Vec<Vec<Option<ConstValue>>>,
    shared: Vec<u8>,
}

impl BlockState {
    /// Value produced by instruction `id` on `thread`.
    ///
    /// # Errors
    /// [`Error::UninitializedValue`] if the instruction produced no value
    /// (barrier, store) or never executed.
    pub fn value(&self, thread: usize, id: ValueId) -> Result<ConstValue> {
        self.values
            .get(thread)
            .and_then(|vals| vals.get(id.0 as usize).copied().flatten())
            .ok_or(Error::UninitializedValue { id: id.0, thread })
    }

    /// Final contents of shared scratch.
    pub fn shared(&self) -> &[u8] {
        &self.shared
    }
}

/// One simulated block: geometry, operand buffers and scratch.
#[derive(Debug)]
pub struct BlockInterp {
    block: BlockShape,
    shared: Vec<u8>,
    globals: Vec<Vec<ConstValue>>,
}

impl BlockInterp {
    pub fn new(block: BlockShape, scratch_bytes: u32) -> Self {
        Self { block, shared: vec![0; scratch_bytes as usize], globals: Vec::new() }
    }

    /// Bind the element buffer backing `LoadGlobal` for one operand.
    ///
    /// Operands must be bound in index order.
    pub fn bind_operand(&mut self, values: Vec<ConstValue>) {
        self.globals.push(values);
    }

    /// Execute `kernel` to completion across all threads of the block.
    pub fn run(mut self, kernel: &Kernel) -> Result<BlockState> {
        let threads = self.block.num_threads() as usize;
        let warp_size = self.block.warp_size as usize;
        let mut values: Vec<Vec<Option<ConstValue>>> = vec![vec![None; kernel.len()]; threads];

        for (pc, instr) in kernel.instrs().iter().enumerate() {
            match *instr {
                Instr::Barrier => {
                    // Lock-step execution already orders memory accesses.
                }
                Instr::Shuffle { value, offset } => {
                    // Read every lane's source before any lane commits, so
                    // the exchange sees pre-shuffle state on both sides.
                    let sources: Vec<ConstValue> = (0..threads)
                        .map(|t| read(&values, t, value))
                        .collect::<Result<_>>()?;
                    for (t, vals) in values.iter_mut().enumerate() {
                        let lane = t % warp_size;
                        let partner_lane = lane ^ offset as usize;
                        let src = if partner_lane < warp_size {
                            t - lane + partner_lane
                        } else {
                            t
                        };
                        vals[pc] = Some(sources[src]);
                    }
                }
                Instr::StoreShared { addr, value, pred } => {
                    for t in 0..threads {
                        if let Some(p) = pred {
                            let cond = read(&values, t, p)?;
                            if !expect_bool(cond)? {
                                continue;
                            }
                        }
                        let a = expect_int(read(&values, t, addr)?, "shared address")?;
                        let v = read(&values, t, value)?;
                        store_elem(&mut self.shared, a, kernel.ty(value), v)?;
                    }
                }
                _ => {
                    for t in 0..threads {
                        let v = self.eval_value(&values, t, instr)?;
                        values[t][pc] = Some(v);
                    }
                }
            }
        }

        Ok(BlockState { values, shared: self.shared })
    }

    fn eval_value(
        &self,
        values: &[Vec<Option<ConstValue>>],
        thread: usize,
        instr: &Instr,
    ) -> Result<ConstValue> {
        match *instr {
            Instr::Const(v) => Ok(v),
            Instr::ThreadId => Ok(ConstValue::Int(thread as i64)),
            Instr::Binary { op, lhs, rhs } => {
                eval_binary(op, read(values, thread, lhs)?, read(values, thread, rhs)?)
            }
            Instr::Select { cond, on_true, on_false } => {
                if expect_bool(read(values, thread, cond)?)? {
                    read(values, thread, on_true)
                } else {
                    read(values, thread, on_false)
                }
            }
            Instr::LoadGlobal { operand, offset } => {
                let off = expect_int(read(values, thread, offset)?, "global offset")?;
                let buf = self.globals.get(operand).map(Vec::as_slice).unwrap_or(&[]);
                let idx = usize::try_from(off)
                    .ok()
                    .filter(|&i| i < buf.len())
                    .ok_or(Error::GlobalOutOfBounds { operand, offset: off, len: buf.len() })?;
                Ok(buf[idx])
            }
            Instr::LoadShared { ty, addr } => {
                let a = expect_int(read(values, thread, addr)?, "shared address")?;
                load_elem(&self.shared, a, ty)
            }
            Instr::StoreShared { .. } | Instr::Shuffle { .. } | Instr::Barrier => {
                unreachable!("handled in run loop")
            }
        }
    }
}

fn read(values: &[Vec<Option<ConstValue>>], thread: usize, id: ValueId) -> Result<ConstValue> {
    values[thread][id.0 as usize].ok_or(Error::UninitializedValue { id: id.0, thread })
}

#[inline]
fn expect_bool(v: ConstValue) -> Result<bool> {
    match v {
        ConstValue::Bool(b) => Ok(b),
        other => error::PredicateNotBoolSnafu { value: other }.fail(),
    }
}

#[inline]
fn expect_int(v: ConstValue, what: &'static str) -> Result<i64> {
    match v {
        ConstValue::Int(i) => Ok(i),
        ConstValue::UInt(u) => Ok(u as i64),
        other => error::NotAnIntegerSnafu { what, value: other }.fail(),
    }
}

fn eval_binary(op: BinOp, lhs: ConstValue, rhs: ConstValue) -> Result<ConstValue> {
    use ConstValue::*;
    match (lhs, rhs) {
        (Int(a), Int(b)) => eval_int(op, a, b),
        (UInt(a), UInt(b)) => eval_uint(op, a, b),
        (Float(a), Float(b)) => eval_float(op, a, b),
        (Bool(a), Bool(b)) => eval_bool(op, a, b).ok_or(Error::TypeMismatch {
            what: "bool binary",
            lhs,
            rhs,
        }),
        _ => error::TypeMismatchSnafu { what: "binary operands", lhs, rhs }.fail(),
    }
}

#[inline]
fn eval_int(op: BinOp, a: i64, b: i64) -> Result<ConstValue> {
    use ConstValue::{Bool, Int};
    Ok(match op {
        BinOp::Add => Int(a.wrapping_add(b)),
        BinOp::Sub => Int(a.wrapping_sub(b)),
        BinOp::Mul => Int(a.wrapping_mul(b)),
        BinOp::UDiv => {
            snafu::ensure!(b != 0, error::DivisionByZeroSnafu);
            Int(((a as u64) / (b as u64)) as i64)
        }
        BinOp::URem => {
            snafu::ensure!(b != 0, error::DivisionByZeroSnafu);
            Int(((a as u64) % (b as u64)) as i64)
        }
        BinOp::And => Int(a & b),
        BinOp::Or => Int(a | b),
        BinOp::Xor => Int(a ^ b),
        BinOp::Max => Int(a.max(b)),
        BinOp::CmpEq => Bool(a == b),
        BinOp::CmpLt => Bool(a < b),
        BinOp::CmpGt => Bool(a > b),
    })
}

#[inline]
fn eval_uint(op: BinOp, a: u64, b: u64) -> Result<ConstValue> {
    use ConstValue::{Bool, UInt};
    Ok(match op {
        BinOp::Add => UInt(a.wrapping_add(b)),
        BinOp::Sub => UInt(a.wrapping_sub(b)),
        BinOp::Mul => UInt(a.wrapping_mul(b)),
        BinOp::UDiv => {
            snafu::ensure!(b != 0, error::DivisionByZeroSnafu);
            UInt(a / b)
        }
        BinOp::URem => {
            snafu::ensure!(b != 0, error::DivisionByZeroSnafu);
            UInt(a % b)
        }
        BinOp::And => UInt(a & b),
        BinOp::Or => UInt(a | b),
        BinOp::Xor => UInt(a ^ b),
        BinOp::Max => UInt(a.max(b)),
        BinOp::CmpEq => Bool(a == b),
        BinOp::CmpLt => Bool(a < b),
        BinOp::CmpGt => Bool(a > b),
    })
}

#[inline]
fn eval_float(op: BinOp, a: f64, b: f64) -> Result<ConstValue> {
    use ConstValue::{Bool, Float};
    match op {
        BinOp::Add => Ok(Float(a + b)),
        BinOp::Sub => Ok(Float(a - b)),
        BinOp::Mul => Ok(Float(a * b)),
        BinOp::Max => Ok(Float(a.max(b))),
        BinOp::CmpEq => Ok(Bool(a == b)),
        BinOp::CmpLt => Ok(Bool(a < b)),
        BinOp::CmpGt => Ok(Bool(a > b)),
        _ => error::TypeMismatchSnafu {
            what: "float binary",
            lhs: Float(a),
            rhs: Float(b),
        }
        .fail(),
    }
}

#[inline]
fn eval_bool(op: BinOp, a: bool, b: bool) -> Option<ConstValue> {
    use ConstValue::Bool;
    Some(match op {
        BinOp::And => Bool(a & b),
        BinOp::Or => Bool(a | b),
        BinOp::Xor => Bool(a ^ b),
        BinOp::CmpEq => Bool(a == b),
        BinOp::Max => Bool(a | b),
        _ => return None,
    })
}

fn check_window(shared_len: usize, addr: i64, len: usize) -> Result<usize> {
    usize::try_from(addr)
        .ok()
        .filter(|&a| a + len <= shared_len)
        .ok_or(Error::SharedOutOfBounds { addr, len, size: shared_len })
}

fn store_elem(shared: &mut [u8], addr: i64, ty: ElemType, v: ConstValue) -> Result<()> {
    let len = ty.size_bytes() as usize;
    let a = check_window(shared.len(), addr, len)?;
    let dst = &mut shared[a..a + len];
    match (ty, v) {
        (ElemType::Bool, ConstValue::Bool(b)) => dst[0] = b as u8,
        (ElemType::I32, ConstValue::Int(i)) => dst.copy_from_slice(&(i as i32).to_le_bytes()),
        (ElemType::U32, ConstValue::UInt(u)) => dst.copy_from_slice(&(u as u32).to_le_bytes()),
        (ElemType::I64, ConstValue::Int(i)) => dst.copy_from_slice(&i.to_le_bytes()),
        (ElemType::F32, ConstValue::Float(f)) => dst.copy_from_slice(&(f as f32).to_le_bytes()),
        (ElemType::F64, ConstValue::Float(f)) => dst.copy_from_slice(&f.to_le_bytes()),
        (_, other) => {
            return error::TypeMismatchSnafu { what: "shared store", lhs: other, rhs: other }.fail()
        }
    }
    Ok(())
}

fn load_elem(shared: &[u8], addr: i64, ty: ElemType) -> Result<ConstValue> {
    let len = ty.size_bytes() as usize;
    let a = check_window(shared.len(), addr, len)?;
    let src = &shared[a..a + len];
    Ok(match ty {
        ElemType::Bool => ConstValue::Bool(src[0] != 0),
        ElemType::I32 => {
            let mut b = [0; 4];
            b.copy_from_slice(src);
            ConstValue::Int(i32::from_le_bytes(b) as i64)
        }
        ElemType::U32 => {
            let mut b = [0; 4];
            b.copy_from_slice(src);
            ConstValue::UInt(u32::from_le_bytes(b) as u64)
        }
        ElemType::I64 => {
            let mut b = [0; 8];
            b.copy_from_slice(src);
            ConstValue::Int(i64::from_le_bytes(b))
        }
        ElemType::F32 => {
            let mut b = [0; 4];
            b.copy_from_slice(src);
            ConstValue::Float(f32::from_le_bytes(b) as f64)
        }
        ElemType::F64 => {
            let mut b = [0; 8];
            b.copy_from_slice(src);
            ConstValue::Float(f64::from_le_bytes(b))
        }
    })
}
