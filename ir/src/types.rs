//! Fundamental value types for the kernel IR.

/// Scalar element types the reduction core operates on.
///
/// Reductions are always performed on explicit numeric/boolean element
/// types; there are no aggregate or opaque element types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElemType {
    Bool,
    I32,
    U32,
    I64,
    F32,
    F64,
}

impl ElemType {
    /// Width of one element in scratch memory.
    pub const fn size_bytes(self) -> u32 {
        match self {
            ElemType::Bool => 1,
            ElemType::I32 | ElemType::U32 | ElemType::F32 => 4,
            ElemType::I64 | ElemType::F64 => 8,
        }
    }
}

/// Runtime constant value.
///
/// Integers are widened to 64-bit storage regardless of their declared
/// [`ElemType`]; the type decides memory width and interpretation, the
/// value carries the arithmetic.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConstValue {
    Int(i64),
    UInt(u64),
    Float(f64),
    Bool(bool),
}

/// Execution geometry of one cooperative block.
///
/// Warps execute in lock-step internally and concurrently with each other;
/// all synchronization in the reduction core is block-local.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockShape {
    pub num_warps: u32,
    pub warp_size: u32,
}

impl BlockShape {
    pub const fn new(num_warps: u32, warp_size: u32) -> Self {
        Self { num_warps, warp_size }
    }

    /// Flat thread count of the block.
    pub const fn num_threads(&self) -> u32 {
        self.num_warps * self.warp_size
    }
}
