//! Runtime index emission.
//!
//! A layout splits every element's coordinate into a static per-slot offset
//! (identical for all threads, computed at lowering time by
//! [`Layout::offsets`]) and a runtime per-thread base derived from the flat
//! thread id. This module emits the kernel arithmetic for the runtime half
//! and glues the two together, so the static slot enumeration and the
//! runtime coordinates can never disagree on ordering.

use smallvec::SmallVec;
use snafu::ResultExt;
use tarn_ir::{BlockShape, ElemType, Kernel, ValueId};
use tarn_layout::{dedup_sliced, insert_dim, Layout, Order};

use crate::descriptor::ReduceDescriptor;
use crate::error::{self, Result};

/// Runtime multi-dimensional coordinate, one value per dimension.
pub type Coords = SmallVec<[ValueId; 4]>;

/// Emit, for every slot a thread owns, the global tensor coordinate of
/// that slot. Slot order matches [`Layout::offsets`].
///
/// Coordinates are reduced modulo the shape, so when the block tile is
/// larger than the tensor the replicated threads produce the coordinates
/// of the elements they duplicate.
pub fn emit_owned_coords(
    kernel: &mut Kernel,
    layout: &Layout,
    shape: &[u32],
    block: &BlockShape,
) -> Result<Vec<Coords>> {
    if let Layout::Sliced { parent, dim } = layout {
        let expanded = insert_dim(shape, *dim, 1);
        let parent_offsets = parent.offsets(&expanded).context(error::LayoutSnafu)?;
        let (_, kept) = dedup_sliced(&parent_offsets, *dim);
        let parent_coords = emit_owned_coords(kernel, parent, &expanded, block)?;
        return Ok(kept
            .into_iter()
            .map(|slot| {
                let mut coords = parent_coords[slot].clone();
                coords.remove(*dim);
                coords
            })
            .collect());
    }

    let offsets = layout.offsets(shape).context(error::LayoutSnafu)?;
    let tpw = layout.threads_per_warp().context(error::LayoutSnafu)?;
    let wpb = layout.warps_per_block().context(error::LayoutSnafu)?;
    let spt = layout.size_per_thread().context(error::LayoutSnafu)?;
    let strides = layout.thread_strides().context(error::LayoutSnafu)?;
    let order = layout.order().context(error::LayoutSnafu)?;

    let tid = kernel.thread_id();
    let warp_size = kernel.iconst(block.warp_size as i64);
    let lane = kernel.urem(tid, warp_size);
    let warp = kernel.udiv(tid, warp_size);
    let lane_dims = emit_delinearize(kernel, lane, &tpw, &order);
    let warp_dims = emit_delinearize(kernel, warp, &wpb, &order);

    // base_d = warp_d * (size_per_thread_d * threads_per_warp_d)
    //        + lane_d * thread_stride_d
    let base: Coords = (0..shape.len())
        .map(|d| {
            let warp_tile = kernel.iconst((spt[d] * tpw[d]) as i64);
            let stride = kernel.iconst(strides[d] as i64);
            let from_warp = kernel.mul(warp_dims[d], warp_tile);
            let from_lane = kernel.mul(lane_dims[d], stride);
            kernel.add(from_warp, from_lane)
        })
        .collect();

    Ok(offsets
        .iter()
        .map(|off| {
            (0..shape.len())
                .map(|d| {
                    let o = kernel.iconst(off[d] as i64);
                    let n = kernel.iconst(shape[d] as i64);
                    let sum = kernel.add(base[d], o);
                    kernel.urem(sum, n)
                })
                .collect()
        })
        .collect())
}

/// Split a flat runtime id into per-dimension components, first `order`
/// entry fastest-varying. Runtime counterpart of [`tarn_layout::delinearize`].
pub fn emit_delinearize(
    kernel: &mut Kernel,
    linear: ValueId,
    dims: &[u32],
    order: &[usize],
) -> Coords {
    let mut out: Coords = SmallVec::from_elem(linear, dims.len());
    let mut rest = linear;
    for &d in order {
        let n = kernel.iconst(dims[d] as i64);
        out[d] = kernel.urem(rest, n);
        rest = kernel.udiv(rest, n);
    }
    out
}

/// Collapse a runtime multi-dimensional coordinate to a flat offset, first
/// `order` entry fastest-varying. Runtime counterpart of
/// [`tarn_layout::linearize`].
pub fn emit_linearize(
    kernel: &mut Kernel,
    coords: &[ValueId],
    dims: &[u32],
    order: &[usize],
) -> ValueId {
    let mut acc = kernel.iconst(0);
    for &d in order.iter().rev() {
        let n = kernel.iconst(dims[d] as i64);
        let scaled = kernel.mul(acc, n);
        acc = kernel.add(scaled, coords[d]);
    }
    acc
}

/// Byte base of each operand's scratch region.
///
/// Regions are laid out back to back, each sized by `region_elems` of the
/// previous operand's width.
pub fn operand_bases(base: u32, region_elems: u32, tys: &[ElemType]) -> SmallVec<[u32; 2]> {
    let mut bases = SmallVec::with_capacity(tys.len());
    let mut cursor = base;
    for ty in tys {
        bases.push(cursor);
        cursor += region_elems * ty.size_bytes();
    }
    bases
}

/// Byte address of element `elem_off` in the scratch region at `base`.
pub fn emit_scratch_addr(kernel: &mut Kernel, base: u32, width: u32, elem_off: ValueId) -> ValueId {
    let w = kernel.iconst(width as i64);
    let scaled = kernel.mul(elem_off, w);
    let b = kernel.iconst(base as i64);
    kernel.add(b, scaled)
}

/// Read the finished reduction out of scratch, one value list per operand.
///
/// Rank-1 sources reduce to a scalar: every thread reads the fixed scratch
/// base. Otherwise each thread reads the slots the sliced result layout
/// assigns to it, re-linearizing its result coordinate with the reduction
/// axis pinned to 0.
pub fn emit_result_read(
    kernel: &mut Kernel,
    desc: &ReduceDescriptor,
    smem_shape: &[u32],
    order: &Order,
    bases: &[u32],
) -> Result<SmallVec<[Vec<ValueId>; 2]>> {
    let mut results = SmallVec::with_capacity(desc.num_operands());

    if desc.rank() == 1 {
        for (op, &ty) in desc.operand_tys.iter().enumerate() {
            let addr = kernel.iconst(bases[op] as i64);
            results.push(vec![kernel.load_shared(ty, addr)]);
        }
        return Ok(results);
    }

    let result_layout = Layout::sliced(desc.src_layout.clone(), desc.axis);
    let result_shape = tarn_layout::remove_dim(desc.src_shape.clone(), desc.axis);
    let result_coords = emit_owned_coords(kernel, &result_layout, &result_shape, &desc.block)?;

    let zero = kernel.iconst(0);
    for (op, &ty) in desc.operand_tys.iter().enumerate() {
        let mut vals = Vec::with_capacity(result_coords.len());
        for coords in &result_coords {
            let mut read_idx = coords.clone();
            read_idx.insert(desc.axis, zero);
            let off = emit_linearize(kernel, &read_idx, smem_shape, order);
            let addr = emit_scratch_addr(kernel, bases[op], ty.size_bytes(), off);
            vals.push(kernel.load_shared(ty, addr));
        }
        results.push(vals);
    }
    Ok(results)
}

/// Scratch write coordinate for one intra-thread accumulator in the tree
/// strategy.
///
/// The accumulator's tensor coordinate collapses onto the axis of the
/// scratch buffer: Blocked runs of `size_per_thread` contiguous elements
/// collapse to one slot; the Ampere fragment's 16-row warp tile maps to 8
/// scratch rows per warp. Sliced layouts translate the axis into the
/// parent's frame before picking the rule.
pub fn emit_write_index_basic(
    kernel: &mut Kernel,
    layout: &Layout,
    coords: &Coords,
    original_axis: usize,
    axis: usize,
) -> Result<Coords> {
    match layout {
        Layout::Sliced { parent, dim } => {
            let parent_axis = if axis < *dim { axis } else { axis + 1 };
            emit_write_index_basic(kernel, parent, coords, original_axis, parent_axis)
        }
        Layout::Blocked { .. } => {
            let spt = layout.size_per_thread().context(error::LayoutSnafu)?;
            let mut out = coords.clone();
            let per_thread = kernel.iconst(spt[axis] as i64);
            out[original_axis] = kernel.udiv(coords[original_axis], per_thread);
            Ok(out)
        }
        Layout::Mma { generation: tarn_layout::MmaGeneration::Ampere, .. } => {
            let spt = layout.size_per_thread().context(error::LayoutSnafu)?;
            let mut out = coords.clone();
            if original_axis == 0 {
                // 16x8 warp tile: 8 scratch rows per warp, addressed as
                // (row / 16) * 8 + row % 8.
                let eight = kernel.iconst(8);
                let sixteen = kernel.iconst(16);
                let warp_row = kernel.udiv(coords[original_axis], sixteen);
                let scaled = kernel.mul(warp_row, eight);
                let within = kernel.urem(coords[original_axis], eight);
                out[original_axis] = kernel.add(scaled, within);
            } else {
                let per_thread = kernel.iconst(spt[axis] as i64);
                out[original_axis] = kernel.udiv(coords[original_axis], per_thread);
            }
            Ok(out)
        }
        other => error::UnsupportedAxisMappingSnafu {
            layout: format!("{other:?}"),
            axis: original_axis,
        }
        .fail(),
    }
}
