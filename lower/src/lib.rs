//! Layout-aware lowering of axis reductions.
//!
//! Given a [`ReduceDescriptor`] - a reduce-along-one-axis operation over
//! tensors distributed across a thread/warp/block hierarchy by a
//! [`tarn_layout::Layout`] - this crate derives the scratch footprint,
//! decides between the two lowering strategies and emits the block-level
//! kernel instructions that produce the result in the sliced output
//! layout:
//!
//! * the **tree** strategy ([`basic`]) exchanges every partial through
//!   scratch memory with a barrier-synchronized halving tree, and works for
//!   any supported layout/axis pairing;
//! * the **shuffle** strategy ([`fast`]) folds the intra-warp part of the
//!   axis with register shuffles and only uses scratch for the cross-warp
//!   exchange, and is chosen whenever the axis is the fastest-varying
//!   layout dimension.
//!
//! [`ReduceHelper`] exposes the sizing queries on their own, so a planning
//! phase can finalize the block's scratch budget before any lowering runs.

use smallvec::SmallVec;
use snafu::{ensure, ResultExt};
use tarn_ir::{Kernel, ValueId};
use tarn_layout::dedup_sliced;

pub mod accumulate;
pub mod basic;
pub mod descriptor;
pub mod error;
pub mod fast;
pub mod helper;
pub mod indexing;

pub use descriptor::{BumpPlanner, ReduceDescriptor, ScratchPlanner};
pub use error::{Error, Result};
pub use helper::ReduceHelper;

/// Lower one reduction into `kernel`.
///
/// `src_values` holds, per operand, the values this thread owns in the
/// canonical slot order of [`tarn_layout::Layout::offsets`]. On success the
/// returned lists hold, per operand, one value per result slot the thread
/// owns (a single value for scalar results).
///
/// # Errors
/// Fails fast on any static configuration problem: unsupported layout,
/// axis out of range, malformed combine fragment or operand lists. No
/// scratch is allocated and no code is emitted in that case.
pub fn lower_reduction(
    desc: &ReduceDescriptor,
    src_values: &[Vec<ValueId>],
    kernel: &mut Kernel,
    planner: &mut dyn ScratchPlanner,
) -> Result<SmallVec<[Vec<ValueId>; 2]>> {
    let ops = desc.num_operands();
    ensure!(ops > 0, error::EmptyOperandsSnafu);
    ensure!(
        desc.axis < desc.rank(),
        error::AxisOutOfRangeSnafu { axis: desc.axis, rank: desc.rank() }
    );
    for (dim, &extent) in desc.src_shape.iter().enumerate() {
        ensure!(extent > 0, error::ZeroSizedDimensionSnafu { dim });
    }
    ensure!(
        desc.combine.num_inputs() == 2 * ops && desc.combine.num_outputs() == ops,
        error::CombineAritySnafu {
            operands: ops,
            expected_inputs: 2 * ops,
            expected_outputs: ops,
            inputs: desc.combine.num_inputs(),
            outputs: desc.combine.num_outputs(),
        }
    );
    ensure!(
        src_values.len() == ops,
        error::OperandListCountSnafu { expected: ops, got: src_values.len() }
    );

    let helper = ReduceHelper::new(desc);
    ensure!(
        helper.is_supported_layout(),
        error::UnsupportedLayoutSnafu { layout: format!("{:?}", desc.src_layout) }
    );

    let elems_per_thread = desc
        .src_layout
        .elems_per_thread(&desc.src_shape)
        .context(error::LayoutSnafu)? as usize;
    for (operand, vals) in src_values.iter().enumerate() {
        ensure!(
            vals.len() == elems_per_thread,
            error::SourceValueCountSnafu { operand, expected: elems_per_thread, got: vals.len() }
        );
    }

    let offsets = desc.src_layout.offsets(&desc.src_shape).context(error::LayoutSnafu)?;

    // An axis of extent 1 reduces every element with itself: the result is
    // a pure copy, with no scratch, shuffles or barriers.
    if desc.axis_size() == 1 {
        tracing::debug!(axis = desc.axis, "axis of extent 1, lowering reduction as copy");
        let (_, kept) = dedup_sliced(&offsets, desc.axis);
        return Ok(src_values
            .iter()
            .map(|vals| kept.iter().map(|&slot| vals[slot]).collect())
            .collect());
    }

    let scratch_bytes = helper.scratch_size_bytes()?;
    let scratch_base = planner.allocate(scratch_bytes);
    let fast = helper.is_fast_reduction()?;
    tracing::debug!(
        axis = desc.axis,
        scratch_bytes,
        scratch_base,
        fast,
        intra = helper.intra_warp_extent_unique()?,
        inter = helper.inter_warp_extent_unique()?,
        "lowering reduction"
    );

    let coords = indexing::emit_owned_coords(kernel, &desc.src_layout, &desc.src_shape, &desc.block)?;
    let mut accs = accumulate::fold_intra_thread(
        kernel,
        &desc.combine,
        &offsets,
        &coords,
        src_values,
        desc.axis,
    )?;

    if fast {
        fast::emit_fast(kernel, desc, &mut accs, scratch_base)
    } else {
        basic::emit_basic(kernel, desc, &mut accs, scratch_base)
    }
}
