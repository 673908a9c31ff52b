//! Warp-shuffle reduction.
//!
//! Legal only when the reduction axis is the fastest-varying layout
//! dimension, which makes consecutive lanes of a warp neighbors along the
//! axis: a butterfly shuffle with halving distance then folds a warp's
//! whole axis span in registers, no scratch and no barriers. Scratch is
//! only touched to exchange the per-warp partials, and that phase operates
//! on the cross-warp extent rather than the full axis, which is the whole
//! point of this path.

use smallvec::SmallVec;
use snafu::ResultExt;
use tarn_ir::{BinOp, Kernel, ValueId};

use crate::accumulate::{combine_into, AccMap};
use crate::descriptor::ReduceDescriptor;
use crate::error::{self, Result};
use crate::helper::ReduceHelper;
use crate::indexing::{
    emit_delinearize, emit_linearize, emit_result_read, emit_scratch_addr, operand_bases,
};

pub fn emit_fast(
    kernel: &mut Kernel,
    desc: &ReduceDescriptor,
    accs: &mut AccMap,
    scratch_base: u32,
) -> Result<SmallVec<[Vec<ValueId>; 2]>> {
    let helper = ReduceHelper::new(desc);
    let (exchange_shape, flat_shape) = helper.scratch_shapes_fast()?;
    let order = desc.src_layout.order().context(error::LayoutSnafu)?;
    let elems = tarn_layout::product(&exchange_shape);
    let max_elems = elems.max(tarn_layout::product(&flat_shape));
    let bases = operand_bases(scratch_base, max_elems, &desc.operand_tys);
    let widths: SmallVec<[u32; 2]> =
        desc.operand_tys.iter().map(|ty| ty.size_bytes()).collect();

    let intra = helper.intra_warp_extent_unique()?;
    let inter = helper.inter_warp_extent_unique()?;
    tracing::trace!(?exchange_shape, intra, inter, accumulators = accs.len(), "shuffle phase");

    let tpw = desc.src_layout.threads_per_warp_unique(&desc.src_shape).context(error::LayoutSnafu)?;
    let wpb = desc.src_layout.warps_per_block_unique(&desc.src_shape).context(error::LayoutSnafu)?;

    let tid = kernel.thread_id();
    let warp_size = kernel.iconst(desc.block.warp_size as i64);
    let lane = kernel.urem(tid, warp_size);
    let warp = kernel.udiv(tid, warp_size);
    let lane_dims = emit_delinearize(kernel, lane, &tpw, &order);
    let warp_dims = emit_delinearize(kernel, warp, &wpb, &order);
    let lane_axis = lane_dims[desc.axis];
    let warp_axis = warp_dims[desc.axis];

    let zero = kernel.iconst(0);
    let lane_leads = kernel.binary(BinOp::CmpEq, lane_axis, zero);

    for acc in accs.values_mut() {
        // Intra-warp phase: butterfly shuffle, halving distance each round.
        let mut n = intra / 2;
        while n > 0 {
            let shuffled: SmallVec<[ValueId; 2]> =
                acc.values.iter().map(|&v| kernel.shuffle(v, n)).collect();
            combine_into(kernel, &desc.combine, &mut acc.values, &shuffled)?;
            n >>= 1;
        }

        // The leading lane of each warp publishes its partial, addressed by
        // the warp's axis index. With a single contributing warp the
        // exchange degenerates to slot 0.
        let mut write_idx = acc.coords.clone();
        write_idx[desc.axis] = if inter == 1 { zero } else { warp_axis };
        let write_off = emit_linearize(kernel, &write_idx, &exchange_shape, &order);
        for op in 0..desc.num_operands() {
            let addr = emit_scratch_addr(kernel, bases[op], widths[op], write_off);
            kernel.store_shared(addr, acc.values[op], Some(lane_leads));
        }
    }

    kernel.barrier();

    // Inter-warp phase over the exchange buffer, now holding
    // `elems = inter * (non-axis extents)` partials. Threads cover the
    // buffer at flat thread-id offsets, striding by the block size.
    let num_threads = desc.block.num_threads();
    let rounds = (elems / num_threads).max(1);
    let elems_val = kernel.iconst(elems as i64);
    let inter_val = kernel.iconst(inter as i64);
    let stride_val = kernel.iconst(num_threads as i64);

    let mut read_off = tid;
    for round in 0..rounds {
        let mut cur: SmallVec<[ValueId; 2]> = SmallVec::with_capacity(desc.num_operands());
        for op in 0..desc.num_operands() {
            let addr = emit_scratch_addr(kernel, bases[op], widths[op], read_off);
            cur.push(kernel.load_shared(desc.operand_tys[op], addr));
        }

        let mut n = inter / 2;
        while n > 0 {
            let shuffled: SmallVec<[ValueId; 2]> =
                cur.iter().map(|&v| kernel.shuffle(v, n)).collect();
            combine_into(kernel, &desc.combine, &mut cur, &shuffled)?;
            n >>= 1;
        }

        // One designated writer per inter-warp group, and only for offsets
        // that exist in the exchange buffer.
        let in_range = kernel.binary(BinOp::CmpLt, tid, elems_val);
        let group_lane = kernel.urem(lane, inter_val);
        let leads_group = kernel.binary(BinOp::CmpEq, group_lane, zero);
        let pred = kernel.binary(BinOp::And, in_range, leads_group);
        for op in 0..desc.num_operands() {
            let addr = emit_scratch_addr(kernel, bases[op], widths[op], read_off);
            kernel.store_shared(addr, cur[op], Some(pred));
        }

        if round + 1 != rounds {
            read_off = kernel.add(read_off, stride_val);
        }
    }

    kernel.barrier();
    emit_result_read(kernel, desc, &exchange_shape, &order, &bases)
}
