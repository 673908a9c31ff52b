//! Layout analysis for one reduction.
//!
//! Pure queries over a [`ReduceDescriptor`]: fast-path legality, how much
//! of the reduction axis lives inside one warp versus across warps, and how
//! much scratch each strategy needs. Nothing here emits code or touches the
//! planner; the allocator-planning phase runs these same queries before any
//! lowering starts.

use tarn_layout::{product, Layout, MmaGeneration, Shape};

use snafu::ResultExt;

use crate::descriptor::ReduceDescriptor;
use crate::error::{self, Result};

/// Strip `Sliced` wrappers, translating a child axis index into the
/// equivalent axis of the innermost concrete layout.
pub(crate) fn strip_sliced(mut layout: &Layout, mut axis: usize) -> (&Layout, usize) {
    while let Layout::Sliced { parent, dim } = layout {
        if axis >= *dim {
            axis += 1;
        }
        layout = parent;
    }
    (layout, axis)
}

/// Analysis helper bound to one descriptor.
#[derive(Debug, Clone, Copy)]
pub struct ReduceHelper<'a> {
    desc: &'a ReduceDescriptor,
}

impl<'a> ReduceHelper<'a> {
    pub fn new(desc: &'a ReduceDescriptor) -> Self {
        Self { desc }
    }

    /// Reduction is only defined over layouts with a scratch axis mapping.
    pub fn is_supported_layout(&self) -> bool {
        fn supported(layout: &Layout) -> bool {
            match layout {
                Layout::Blocked { .. } => true,
                Layout::Mma { generation, .. } => *generation == MmaGeneration::Ampere,
                Layout::Sliced { parent, .. } => supported(parent),
                Layout::DotOperand { .. } => false,
            }
        }
        supported(&self.desc.src_layout)
    }

    /// The shuffle path is legal when the reduction axis is the
    /// fastest-varying dimension of the innermost concrete layout.
    pub fn is_fast_reduction(&self) -> Result<bool> {
        if self.desc.force_basic {
            return Ok(false);
        }
        let (parent, parent_axis) = strip_sliced(&self.desc.src_layout, self.desc.axis);
        let order = parent.order().context(error::LayoutSnafu)?;
        Ok(order.first() == Some(&parent_axis))
    }

    /// Axis elements covered by one warp, replication included.
    pub fn intra_warp_extent(&self) -> Result<u32> {
        let tpw = self.desc.src_layout.threads_per_warp().context(error::LayoutSnafu)?;
        Ok(self.desc.axis_size().min(tpw[self.desc.axis]))
    }

    /// Warp count along the axis after the intra-warp phase, replication
    /// included.
    pub fn inter_warp_extent(&self) -> Result<u32> {
        let wpb = self.desc.src_layout.warps_per_block().context(error::LayoutSnafu)?;
        let intra = self.intra_warp_extent()?;
        Ok((self.desc.axis_size() / intra).min(wpb[self.desc.axis]))
    }

    /// Distinct axis values combined by one warp's shuffle rounds.
    pub fn intra_warp_extent_unique(&self) -> Result<u32> {
        let desc = self.desc;
        let contig = desc
            .src_layout
            .unique_contig_per_thread(&desc.src_shape)
            .context(error::LayoutSnafu)?;
        let tpw = desc
            .src_layout
            .threads_per_warp_unique(&desc.src_shape)
            .context(error::LayoutSnafu)?;
        Ok((desc.axis_size() / contig[desc.axis]).min(tpw[desc.axis]))
    }

    /// Distinct warp partials combined by the inter-warp phase.
    pub fn inter_warp_extent_unique(&self) -> Result<u32> {
        let desc = self.desc;
        let wpb = desc
            .src_layout
            .warps_per_block_unique(&desc.src_shape)
            .context(error::LayoutSnafu)?;
        let intra = self.intra_warp_extent_unique()?;
        Ok((desc.axis_size() / intra).min(wpb[desc.axis]))
    }

    /// Threads holding distinct data along the axis, across the whole
    /// block.
    pub fn threads_reduction_axis(&self) -> Result<u32> {
        let desc = self.desc;
        let tpw = desc
            .src_layout
            .threads_per_warp_unique(&desc.src_shape)
            .context(error::LayoutSnafu)?;
        let wpb = desc
            .src_layout
            .warps_per_block_unique(&desc.src_shape)
            .context(error::LayoutSnafu)?;
        Ok(tpw[desc.axis] * wpb[desc.axis])
    }

    /// Scratch shape for the tree strategy: the source shape with the axis
    /// shrunk to the number of distinct partials surviving the intra-thread
    /// fold.
    pub fn scratch_shape_basic(&self) -> Result<Shape> {
        let mut shape = self.desc.src_shape.clone();
        shape[self.desc.axis] = shape[self.desc.axis].min(self.threads_reduction_axis()?);
        Ok(shape)
    }

    /// Scratch shapes for the shuffle strategy: the cross-warp exchange
    /// buffer plus a flat buffer covering every thread's strided read in
    /// the second phase.
    ///
    /// The flat buffer is deliberately sized by the whole block rather than
    /// tightly by the inter-warp extent; the second phase reads at flat
    /// thread-id offsets, so the region must cover the full thread count.
    pub fn scratch_shapes_fast(&self) -> Result<(Shape, Shape)> {
        let mut exchange = self.desc.src_shape.clone();
        exchange[self.desc.axis] = self.inter_warp_extent()?;
        let flat = Shape::from_slice(&[self.desc.block.num_threads()]);
        Ok((exchange, flat))
    }

    /// Largest scratch element count either strategy may touch.
    pub fn max_scratch_elems(&self) -> Result<u32> {
        let basic = product(&self.scratch_shape_basic()?);
        let (exchange, flat) = self.scratch_shapes_fast()?;
        Ok(basic.max(product(&exchange)).max(product(&flat)))
    }

    /// Scratch bytes to reserve for this reduction.
    ///
    /// Upper bound over both strategies, so the block-wide allocation can
    /// be finalized before the strategy choice is ever consulted.
    pub fn scratch_size_bytes(&self) -> Result<u32> {
        let elems = self.max_scratch_elems()?;
        let bytes_per_elem: u32 = self.desc.operand_tys.iter().map(|ty| ty.size_bytes()).sum();
        Ok(elems * bytes_per_elem)
    }
}
