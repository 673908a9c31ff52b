//! Layout-encoding algebra for the tarn compiler.
//!
//! A [`Layout`] describes which thread/warp/block of a SIMT grid physically
//! owns which elements of an N-dimensional tensor. All queries here are pure
//! functions of the layout (and, where replication matters, the tensor
//! shape); nothing in this crate mutates a layout or touches codegen state.
//!
//! # Variants
//!
//! - [`Layout::Blocked`] - the general cyclic distribution: each thread owns
//!   `size_per_thread[d]` contiguous elements per dimension, threads tile a
//!   warp, warps tile a block, and the whole block tile wraps around the
//!   tensor if it is smaller than the shape.
//! - [`Layout::Sliced`] - a parent layout with one dimension removed
//!   (the distribution a tensor inherits after reducing that dimension away).
//! - [`Layout::Mma`] - matrix-multiply-accumulate fragment layout. Only the
//!   [`MmaGeneration::Ampere`] generation (fixed 16x8 warp tile) defines
//!   geometry here.
//! - [`Layout::DotOperand`] - operand fragment of an MMA; carried for
//!   completeness, every geometry query on it is an
//!   [`Error::UnsupportedLayout`].
//!
//! # Replication and "unique data"
//!
//! When the block tile along a dimension is larger than the tensor, several
//! threads (or warps) hold copies of the same element. The `*_unique`
//! variants divide that replication out so callers counting *distinct*
//! values do not double count.

use smallvec::SmallVec;

pub mod error;

pub use error::{Error, Result};

/// Per-dimension extent counts (threads, warps, elements, ...).
pub type Dims = SmallVec<[u32; 4]>;

/// Concrete tensor shape.
pub type Shape = SmallVec<[u32; 4]>;

/// Dimension permutation, fastest-varying dimension first.
pub type Order = SmallVec<[usize; 4]>;

/// Hardware generation of an MMA fragment layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MmaGeneration {
    Volta,
    Ampere,
}

/// Compositional descriptor of element ownership across a thread hierarchy.
///
/// Closed sum type: every recursion point in the compiler matches
/// exhaustively on these variants, so adding one is a compile-time
/// exhaustiveness failure everywhere it matters.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Layout {
    /// Cyclic blocked distribution.
    Blocked {
        size_per_thread: Dims,
        threads_per_warp: Dims,
        warps_per_block: Dims,
        order: Order,
    },

    /// Parent layout with dimension `dim` removed.
    Sliced { parent: Box<Layout>, dim: usize },

    /// MMA accumulator fragment layout (rank 2).
    ///
    /// Ampere fixes a 16x8 per-warp tile with `size_per_thread = [2, 2]`
    /// and `threads_per_warp = [8, 4]`.
    Mma {
        generation: MmaGeneration,
        warps_per_block: Dims,
    },

    /// Operand fragment of an MMA. No ownership geometry is defined.
    DotOperand { parent: Box<Layout>, op_idx: u32 },
}

impl Layout {
    /// Convenience constructor for sliced layouts.
    pub fn sliced(parent: Layout, dim: usize) -> Self {
        Layout::Sliced { parent: Box::new(parent), dim }
    }

    /// Number of tensor dimensions this layout distributes.
    pub fn rank(&self) -> usize {
        match self {
            Layout::Blocked { order, .. } => order.len(),
            Layout::Sliced { parent, .. } => parent.rank() - 1,
            Layout::Mma { .. } => 2,
            Layout::DotOperand { parent, .. } => parent.rank(),
        }
    }

    /// Dimensions ordered by access locality, fastest-varying first.
    ///
    /// # Errors
    /// [`Error::UnsupportedLayout`] for variants without geometry.
    pub fn order(&self) -> Result<Order> {
        match self {
            Layout::Blocked { order, .. } => Ok(order.clone()),
            Layout::Sliced { parent, dim } => {
                // Parent order with the sliced dimension removed and the
                // higher dimensions renumbered down past it.
                let parent_order = parent.order()?;
                Ok(parent_order
                    .into_iter()
                    .filter(|&d| d != *dim)
                    .map(|d| if d > *dim { d - 1 } else { d })
                    .collect())
            }
            Layout::Mma { generation: MmaGeneration::Ampere, .. } => Ok(SmallVec::from_slice(&[1, 0])),
            other => unsupported(other),
        }
    }

    /// Contiguous elements each thread owns per dimension.
    pub fn size_per_thread(&self) -> Result<Dims> {
        match self {
            Layout::Blocked { size_per_thread, .. } => Ok(size_per_thread.clone()),
            Layout::Sliced { parent, dim } => Ok(remove_dim(parent.size_per_thread()?, *dim)),
            Layout::Mma { generation: MmaGeneration::Ampere, .. } => Ok(SmallVec::from_slice(&[2, 2])),
            other => unsupported(other),
        }
    }

    /// Threads of one warp per dimension.
    pub fn threads_per_warp(&self) -> Result<Dims> {
        match self {
            Layout::Blocked { threads_per_warp, .. } => Ok(threads_per_warp.clone()),
            Layout::Sliced { parent, dim } => Ok(remove_dim(parent.threads_per_warp()?, *dim)),
            Layout::Mma { generation: MmaGeneration::Ampere, .. } => Ok(SmallVec::from_slice(&[8, 4])),
            other => unsupported(other),
        }
    }

    /// Warps of one block per dimension.
    pub fn warps_per_block(&self) -> Result<Dims> {
        match self {
            Layout::Blocked { warps_per_block, .. } => Ok(warps_per_block.clone()),
            Layout::Sliced { parent, dim } => Ok(remove_dim(parent.warps_per_block()?, *dim)),
            Layout::Mma { generation: MmaGeneration::Ampere, warps_per_block } => Ok(warps_per_block.clone()),
            other => unsupported(other),
        }
    }

    /// Contiguous elements per thread that hold *distinct* data for `shape`.
    ///
    /// A thread's contiguous run cannot carry more distinct values than the
    /// dimension has elements.
    pub fn unique_contig_per_thread(&self, shape: &[u32]) -> Result<Dims> {
        if let Layout::Sliced { parent, dim } = self {
            let expanded = insert_dim(shape, *dim, 1);
            return Ok(remove_dim(parent.unique_contig_per_thread(&expanded)?, *dim));
        }
        self.check_rank(shape)?;
        let spt = self.size_per_thread()?;
        Ok(spt.iter().zip(shape).map(|(&s, &n)| s.min(n.max(1))).collect())
    }

    /// Threads per warp holding distinct data for `shape`.
    pub fn threads_per_warp_unique(&self, shape: &[u32]) -> Result<Dims> {
        if let Layout::Sliced { parent, dim } = self {
            let expanded = insert_dim(shape, *dim, 1);
            return Ok(remove_dim(parent.threads_per_warp_unique(&expanded)?, *dim));
        }
        self.check_rank(shape)?;
        let tpw = self.threads_per_warp()?;
        let contig = self.unique_contig_per_thread(shape)?;
        Ok(tpw
            .iter()
            .zip(shape)
            .zip(&contig)
            .map(|((&t, &n), &c)| t.min(ceil_div(n.max(1), c)))
            .collect())
    }

    /// Warps per block holding distinct data for `shape`.
    pub fn warps_per_block_unique(&self, shape: &[u32]) -> Result<Dims> {
        if let Layout::Sliced { parent, dim } = self {
            let expanded = insert_dim(shape, *dim, 1);
            return Ok(remove_dim(parent.warps_per_block_unique(&expanded)?, *dim));
        }
        self.check_rank(shape)?;
        let wpb = self.warps_per_block()?;
        let spt = self.size_per_thread()?;
        let tpw = self.threads_per_warp()?;
        Ok(wpb
            .iter()
            .zip(shape)
            .zip(spt.iter().zip(&tpw))
            .map(|((&w, &n), (&s, &t))| w.min(ceil_div(n.max(1), s * t)))
            .collect())
    }

    /// Total element slots each thread owns for `shape`, replication
    /// included (the block tile wraps around shapes it does not cover).
    pub fn elems_per_thread(&self, shape: &[u32]) -> Result<u32> {
        match self {
            Layout::Sliced { .. } => Ok(self.offsets(shape)?.len() as u32),
            _ => {
                let counts = self.slot_counts(shape)?;
                Ok(counts.iter().product())
            }
        }
    }

    /// Per-slot multi-dimensional offsets within the tensor, identical for
    /// every thread (the thread-dependent base is added separately).
    ///
    /// The enumeration order here is the canonical slot order used by all
    /// consumers; zeroing the reduction axis of one of these offsets yields
    /// the accumulator key for that slot.
    pub fn offsets(&self, shape: &[u32]) -> Result<Vec<Dims>> {
        match self {
            Layout::Blocked { .. } | Layout::Mma { .. } => {
                self.check_rank(shape)?;
                let spt = self.size_per_thread()?;
                let strides = self.elem_strides()?;
                let tiles = self.tile_extents()?;
                let counts = self.slot_counts(shape)?;
                let total: u32 = counts.iter().product();

                let mut out = Vec::with_capacity(total as usize);
                let mut slot: Dims = SmallVec::from_elem(0, counts.len());
                for _ in 0..total {
                    let off = (0..counts.len())
                        .map(|d| {
                            let s = slot[d];
                            ((s / spt[d]) * tiles[d] + (s % spt[d]) * strides[d]) % shape[d].max(1)
                        })
                        .collect();
                    out.push(off);
                    // Row-major increment, last dimension fastest.
                    for d in (0..counts.len()).rev() {
                        slot[d] += 1;
                        if slot[d] < counts[d] {
                            break;
                        }
                        slot[d] = 0;
                    }
                }
                Ok(out)
            }
            Layout::Sliced { parent, dim } => {
                let expanded = insert_dim(shape, *dim, 1);
                let parent_offs = parent.offsets(&expanded)?;
                Ok(dedup_sliced(&parent_offs, *dim).0)
            }
            other => unsupported(other),
        }
    }

    /// Per-dimension slot counts (`size_per_thread * wrap repetitions`).
    fn slot_counts(&self, shape: &[u32]) -> Result<Dims> {
        let spt = self.size_per_thread()?;
        let tiles = self.tile_extents()?;
        Ok(spt
            .iter()
            .zip(tiles.iter().zip(shape))
            .map(|(&s, (&tile, &n))| s * ceil_div(n.max(1), tile))
            .collect())
    }

    /// Extent of one full block tile per dimension.
    fn tile_extents(&self) -> Result<Dims> {
        let spt = self.size_per_thread()?;
        let tpw = self.threads_per_warp()?;
        let wpb = self.warps_per_block()?;
        Ok(spt.iter().zip(tpw.iter().zip(&wpb)).map(|(&s, (&t, &w))| s * t * w).collect())
    }

    /// Stride between the base coordinates of adjacent threads per
    /// dimension.
    ///
    /// Blocked threads sit `size_per_thread` apart (each owns a contiguous
    /// run). Ampere MMA lanes sit 1 row / 2 columns apart: the 8 row-lanes
    /// cover rows 0..8 and each owns rows `r` and `r + 8`.
    pub fn thread_strides(&self) -> Result<Dims> {
        match self {
            Layout::Mma { generation: MmaGeneration::Ampere, .. } => Ok(SmallVec::from_slice(&[1, 2])),
            _ => self.size_per_thread(),
        }
    }

    /// Stride between the per-thread elements of each dimension.
    ///
    /// Blocked threads own truly contiguous runs (stride 1 everywhere); the
    /// Ampere accumulator fragment owns two rows 8 apart and two adjacent
    /// columns, so dimension 0 strides by 8.
    fn elem_strides(&self) -> Result<Dims> {
        match self {
            Layout::Mma { generation: MmaGeneration::Ampere, .. } => Ok(SmallVec::from_slice(&[8, 1])),
            _ => Ok(SmallVec::from_elem(1, self.rank())),
        }
    }

    fn check_rank(&self, shape: &[u32]) -> Result<()> {
        snafu::ensure!(
            shape.len() == self.rank(),
            error::RankMismatchSnafu { shape_rank: shape.len(), layout_rank: self.rank() }
        );
        Ok(())
    }
}

#[inline]
fn unsupported<T>(layout: &Layout) -> Result<T> {
    error::UnsupportedLayoutSnafu { layout: format!("{layout:?}") }.fail()
}

/// Drop one dimension's offsets and deduplicate the remainder, preserving
/// first-occurrence order.
///
/// Returns the deduplicated offsets and, for each kept offset, the index of
/// the parent slot it came from (so runtime index emission can reuse the
/// parent's enumeration).
pub fn dedup_sliced(parent_offsets: &[Dims], dim: usize) -> (Vec<Dims>, Vec<usize>) {
    let mut seen = std::collections::BTreeSet::new();
    let mut offsets = Vec::new();
    let mut kept = Vec::new();
    for (slot, off) in parent_offsets.iter().enumerate() {
        let dropped: Dims = remove_dim(off.clone(), dim);
        if seen.insert(dropped.to_vec()) {
            offsets.push(dropped);
            kept.push(slot);
        }
    }
    (offsets, kept)
}

/// Remove dimension `dim` from a per-dimension vector.
pub fn remove_dim(mut dims: Dims, dim: usize) -> Dims {
    dims.remove(dim);
    dims
}

/// Insert extent `value` at dimension `dim`.
pub fn insert_dim(dims: &[u32], dim: usize, value: u32) -> Dims {
    let mut out: Dims = SmallVec::from_slice(dims);
    out.insert(dim, value);
    out
}

/// Ceiling division.
#[inline]
pub fn ceil_div(a: u32, b: u32) -> u32 {
    a.div_ceil(b)
}

/// Product of per-dimension extents.
#[inline]
pub fn product(dims: &[u32]) -> u32 {
    dims.iter().product()
}

/// Collapse a multi-dimensional coordinate to a flat offset, first `order`
/// entry fastest-varying.
pub fn linearize(multi: &[u32], dims: &[u32], order: &[usize]) -> u32 {
    let mut acc = 0;
    for &d in order.iter().rev() {
        acc = acc * dims[d] + multi[d];
    }
    acc
}

/// Inverse of [`linearize`].
pub fn delinearize(mut linear: u32, dims: &[u32], order: &[usize]) -> Dims {
    let mut multi: Dims = SmallVec::from_elem(0, dims.len());
    for &d in order {
        multi[d] = linear % dims[d];
        linear /= dims[d];
    }
    multi
}
