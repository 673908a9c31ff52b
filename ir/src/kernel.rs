//! Append-only SSA kernel instruction stream.
//!
//! [`Kernel`] is the emission target of the reduction lowering: a flat list
//! of SPMD instructions executed by every thread of one block. The stream
//! contains exactly the primitives the lowering needs - integer/float
//! arithmetic, select, global loads, predicated shared-memory stores,
//! shared-memory loads, warp shuffles and block barriers. Target-specific
//! instruction encodings are out of scope; a backend (or the interpreter in
//! [`crate::interp`]) gives these primitives meaning.

use std::collections::HashMap;

use crate::types::{ConstValue, ElemType};

/// Handle to one SSA value in a [`Kernel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueId(pub u32);

/// Two-operand ALU operations.
///
/// Comparison ops produce `Bool`; everything else preserves the left
/// operand's type. `UDiv`/`URem` interpret integer operands as unsigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    UDiv,
    URem,
    And,
    Or,
    Xor,
    Max,
    CmpEq,
    CmpLt,
    CmpGt,
}

/// One SPMD instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum Instr {
    /// Materialize a constant.
    Const(ConstValue),
    /// Flat thread index within the block.
    ThreadId,
    Binary { op: BinOp, lhs: ValueId, rhs: ValueId },
    Select { cond: ValueId, on_true: ValueId, on_false: ValueId },
    /// Read one element of an operand's global buffer.
    LoadGlobal { operand: usize, offset: ValueId },
    /// Read from block-shared scratch at a byte address.
    LoadShared { ty: ElemType, addr: ValueId },
    /// Write to block-shared scratch at a byte address.
    ///
    /// With `pred`, lanes whose predicate is false perform a no-op store so
    /// control flow stays uniform across the warp.
    StoreShared { addr: ValueId, value: ValueId, pred: Option<ValueId> },
    /// Butterfly exchange with the lane `offset` away in the same warp.
    ///
    /// Lanes whose partner falls outside the warp read themselves;
    /// warp-synchronous, no barrier required.
    Shuffle { value: ValueId, offset: u32 },
    /// Block-wide synchronization barrier.
    Barrier,
}

/// Append-only kernel body under construction.
///
/// Every emission method returns the [`ValueId`] of the produced value.
/// Small integer constants are interned so repeated offsets and strides
/// share one definition, which also keeps re-lowering the same descriptor
/// byte-for-byte deterministic.
#[derive(Debug, Default)]
pub struct Kernel {
    instrs: Vec<Instr>,
    tys: Vec<ElemType>,
    int_consts: HashMap<i64, ValueId>,
}

impl Kernel {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, instr: Instr, ty: ElemType) -> ValueId {
        let id = ValueId(self.instrs.len() as u32);
        self.instrs.push(instr);
        self.tys.push(ty);
        id
    }

    /// Interned 32-bit integer constant.
    pub fn iconst(&mut self, v: i64) -> ValueId {
        if let Some(&id) = self.int_consts.get(&v) {
            return id;
        }
        let id = self.push(Instr::Const(ConstValue::Int(v)), ElemType::I32);
        self.int_consts.insert(v, id);
        id
    }

    /// Non-interned typed constant.
    pub fn const_val(&mut self, v: ConstValue, ty: ElemType) -> ValueId {
        self.push(Instr::Const(v), ty)
    }

    pub fn thread_id(&mut self) -> ValueId {
        self.push(Instr::ThreadId, ElemType::I32)
    }

    pub fn binary(&mut self, op: BinOp, lhs: ValueId, rhs: ValueId) -> ValueId {
        let ty = match op {
            BinOp::CmpEq | BinOp::CmpLt | BinOp::CmpGt => ElemType::Bool,
            _ => self.ty(lhs),
        };
        self.push(Instr::Binary { op, lhs, rhs }, ty)
    }

    pub fn add(&mut self, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.binary(BinOp::Add, lhs, rhs)
    }

    pub fn mul(&mut self, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.binary(BinOp::Mul, lhs, rhs)
    }

    pub fn udiv(&mut self, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.binary(BinOp::UDiv, lhs, rhs)
    }

    pub fn urem(&mut self, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.binary(BinOp::URem, lhs, rhs)
    }

    pub fn select(&mut self, cond: ValueId, on_true: ValueId, on_false: ValueId) -> ValueId {
        let ty = self.ty(on_true);
        self.push(Instr::Select { cond, on_true, on_false }, ty)
    }

    pub fn load_global(&mut self, operand: usize, ty: ElemType, offset: ValueId) -> ValueId {
        self.push(Instr::LoadGlobal { operand, offset }, ty)
    }

    pub fn load_shared(&mut self, ty: ElemType, addr: ValueId) -> ValueId {
        self.push(Instr::LoadShared { ty, addr }, ty)
    }

    pub fn store_shared(&mut self, addr: ValueId, value: ValueId, pred: Option<ValueId>) {
        let ty = self.ty(value);
        self.push(Instr::StoreShared { addr, value, pred }, ty);
    }

    pub fn shuffle(&mut self, value: ValueId, offset: u32) -> ValueId {
        let ty = self.ty(value);
        self.push(Instr::Shuffle { value, offset }, ty)
    }

    pub fn barrier(&mut self) {
        self.push(Instr::Barrier, ElemType::Bool);
    }

    /// Type of a previously emitted value.
    pub fn ty(&self, v: ValueId) -> ElemType {
        self.tys[v.0 as usize]
    }

    pub fn instrs(&self) -> &[Instr] {
        &self.instrs
    }

    pub fn len(&self) -> usize {
        self.instrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instrs.is_empty()
    }

    /// Count instructions matching a predicate (barriers, shuffles, ...).
    pub fn count_matching(&self, pred: impl Fn(&Instr) -> bool) -> usize {
        self.instrs.iter().filter(|i| pred(i)).count()
    }
}
