//! Shared-memory tree reduction.
//!
//! The fallback strategy, used whenever the reduction axis is not the
//! fastest-varying dimension of the layout (or the shuffle path is forced
//! off). Every partial goes through scratch: after the intra-thread fold,
//! each accumulator is published to its scratch slot and a power-of-two
//! halving tree combines slots along the scratch axis with sequential
//! addressing. Each round is barrier / read / combine / barrier / publish;
//! readers whose slot index is past the active half read themselves, so
//! every thread issues the same memory traffic and control flow stays
//! uniform.

use smallvec::SmallVec;
use snafu::ResultExt;
use tarn_ir::{BinOp, Kernel, ValueId};
use tarn_layout::linearize;

use crate::accumulate::{combine_into, AccMap};
use crate::descriptor::ReduceDescriptor;
use crate::error::{self, Result};
use crate::helper::ReduceHelper;
use crate::indexing::{
    emit_linearize, emit_result_read, emit_scratch_addr, emit_write_index_basic, operand_bases,
};

pub fn emit_basic(
    kernel: &mut Kernel,
    desc: &ReduceDescriptor,
    accs: &mut AccMap,
    scratch_base: u32,
) -> Result<SmallVec<[Vec<ValueId>; 2]>> {
    let helper = ReduceHelper::new(desc);
    let smem_shape = helper.scratch_shape_basic()?;
    let order = desc.src_layout.order().context(error::LayoutSnafu)?;
    let elems = tarn_layout::product(&smem_shape);
    let bases = operand_bases(scratch_base, elems, &desc.operand_tys);
    let widths: SmallVec<[u32; 2]> =
        desc.operand_tys.iter().map(|ty| ty.size_bytes()).collect();

    let axis_extent = smem_shape[desc.axis];
    tracing::trace!(?smem_shape, axis_extent, accumulators = accs.len(), "tree phase");

    for acc in accs.values_mut() {
        let write_idx =
            emit_write_index_basic(kernel, &desc.src_layout, &acc.coords, desc.axis, desc.axis)?;
        let write_off = emit_linearize(kernel, &write_idx, &smem_shape, &order);
        let write_addrs: SmallVec<[ValueId; 2]> = (0..desc.num_operands())
            .map(|op| emit_scratch_addr(kernel, bases[op], widths[op], write_off))
            .collect();
        for (op, &addr) in write_addrs.iter().enumerate() {
            kernel.store_shared(addr, acc.values[op], None);
        }

        let mut n = axis_extent / 2;
        while n > 0 {
            // Sequential addressing: the reader at axis position p < n
            // combines with position p + n; everyone else reads itself.
            let mut read_idx: SmallVec<[u32; 4]> = SmallVec::from_elem(0, smem_shape.len());
            read_idx[desc.axis] = n;
            let stride = linearize(&read_idx, &smem_shape, &order);

            let n_val = kernel.iconst(n as i64);
            let in_half = kernel.binary(BinOp::CmpLt, write_idx[desc.axis], n_val);
            let zero = kernel.iconst(0);
            let stride_val = kernel.iconst(stride as i64);
            let read_off = kernel.select(in_half, stride_val, zero);

            kernel.barrier();
            let incoming: SmallVec<[ValueId; 2]> = (0..desc.num_operands())
                .map(|op| {
                    let width = kernel.iconst(widths[op] as i64);
                    let byte_off = kernel.mul(read_off, width);
                    let addr = kernel.add(write_addrs[op], byte_off);
                    kernel.load_shared(desc.operand_tys[op], addr)
                })
                .collect();
            combine_into(kernel, &desc.combine, &mut acc.values, &incoming)?;

            kernel.barrier();
            for (op, &addr) in write_addrs.iter().enumerate() {
                kernel.store_shared(addr, acc.values[op], None);
            }

            n >>= 1;
        }
    }

    kernel.barrier();
    emit_result_read(kernel, desc, &smem_shape, &order, &bases)
}
