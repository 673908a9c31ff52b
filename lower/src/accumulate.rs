//! Intra-thread accumulation.
//!
//! Both strategies start the same way: group the elements a thread owns by
//! their non-axis coordinate and fold each group down to one partial value
//! tuple, purely in registers. The grouping key is the static slot offset
//! with the reduction axis zeroed; slots sharing a key differ only along
//! the axis, so they belong to the same output element.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

use smallvec::SmallVec;
use snafu::ResultExt;
use tarn_ir::{Fragment, Kernel, ValueId};
use tarn_layout::Dims;

use crate::error::{self, Result};
use crate::indexing::Coords;

/// Partial result tuple for one non-axis key.
#[derive(Debug, Clone)]
pub struct Accumulator {
    /// Runtime coordinate of the first element folded into this
    /// accumulator; its axis component addresses the scratch write.
    pub coords: Coords,
    /// One value per operand.
    pub values: SmallVec<[ValueId; 2]>,
}

/// Accumulators keyed by zeroed-axis slot offset, in sorted key order so
/// emission is deterministic.
pub type AccMap = BTreeMap<Dims, Accumulator>;

/// Fold `incoming` into `acc` by splicing one copy of the combine
/// fragment. The whole tuple is combined by a single invocation.
pub fn combine_into(
    kernel: &mut Kernel,
    combine: &Fragment,
    acc: &mut SmallVec<[ValueId; 2]>,
    incoming: &[ValueId],
) -> Result<()> {
    let args: SmallVec<[ValueId; 8]> =
        acc.iter().copied().chain(incoming.iter().copied()).collect();
    *acc = kernel.inline_fragment(combine, &args).context(error::IrSnafu)?;
    Ok(())
}

/// Build the accumulator map for one thread's owned slots.
///
/// `offsets` and `coords` follow the canonical slot order; `src_values`
/// holds one value list per operand in the same order. The first slot seen
/// for a key seeds the accumulator without invoking the combine fragment.
pub fn fold_intra_thread(
    kernel: &mut Kernel,
    combine: &Fragment,
    offsets: &[Dims],
    coords: &[Coords],
    src_values: &[Vec<ValueId>],
    axis: usize,
) -> Result<AccMap> {
    let mut accs = AccMap::new();
    for (slot, offset) in offsets.iter().enumerate() {
        let mut key = offset.clone();
        key[axis] = 0;
        let incoming: SmallVec<[ValueId; 2]> =
            src_values.iter().map(|vals| vals[slot]).collect();
        match accs.entry(key) {
            Entry::Vacant(entry) => {
                entry.insert(Accumulator { coords: coords[slot].clone(), values: incoming });
            }
            Entry::Occupied(mut entry) => {
                combine_into(kernel, combine, &mut entry.get_mut().values, &incoming)?;
            }
        }
    }
    Ok(accs)
}
