//! Reduction descriptor and the scratch planning interface.

use smallvec::SmallVec;
use tarn_ir::{BlockShape, ElemType, Fragment};
use tarn_layout::{Layout, Shape};

/// Everything the lowering needs to know about one reduction operation.
///
/// Created once per operation being lowered and read-only afterwards. All
/// operands share `src_layout` and `src_shape`; they differ only in element
/// type. The combine fragment folds two accumulator tuples into one: it
/// takes `2 * operands` inputs, `(accumulator..., incoming...)`, and yields
/// one output per operand.
#[derive(Debug, Clone)]
pub struct ReduceDescriptor {
    pub src_layout: Layout,
    pub src_shape: Shape,
    pub operand_tys: SmallVec<[ElemType; 2]>,
    pub axis: usize,
    pub combine: Fragment,
    pub block: BlockShape,
    /// Force the shared-memory tree strategy even where the shuffle path
    /// is legal. Debug override only.
    pub force_basic: bool,
}

impl ReduceDescriptor {
    pub fn num_operands(&self) -> usize {
        self.operand_tys.len()
    }

    pub fn rank(&self) -> usize {
        self.src_shape.len()
    }

    pub fn axis_size(&self) -> u32 {
        self.src_shape[self.axis]
    }
}

/// External scratch-memory planner.
///
/// The lowering only ever asks for one thing: a block-local byte base for
/// `bytes` of scratch usable by every thread of the block. Region layout
/// within that window is the lowering's own business.
pub trait ScratchPlanner {
    fn allocate(&mut self, bytes: u32) -> u32;
}

/// Trivial bump planner.
#[derive(Debug, Default)]
pub struct BumpPlanner {
    cursor: u32,
}

impl BumpPlanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total bytes handed out so far.
    pub fn bytes_allocated(&self) -> u32 {
        self.cursor
    }
}

impl ScratchPlanner for BumpPlanner {
    fn allocate(&mut self, bytes: u32) -> u32 {
        let base = self.cursor;
        self.cursor += bytes;
        base
    }
}
