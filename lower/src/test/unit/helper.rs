use proptest::prelude::*;
use smallvec::SmallVec;
use test_case::test_case;

use tarn_ir::{BlockShape, ElemType};
use tarn_layout::{Layout, MmaGeneration};

use crate::test::unit::{blocked, sum_descriptor};
use crate::ReduceHelper;

fn rows_layout() -> Layout {
    // [r, c] tensor, c fastest; 2x2 threads per warp, warps stacked on c.
    blocked(&[1, 2], &[2, 2], &[1, 2], &[1, 0])
}

#[test_case(&[4, 4] => (2, 1) ; "replicated warps collapse the inter extent")]
#[test_case(&[4, 8] => (2, 2) ; "full cover keeps both extents")]
#[test_case(&[4, 2] => (1, 1) ; "axis shorter than one thread run")]
fn unique_extents(shape: &[u32]) -> (u32, u32) {
    let desc = sum_descriptor(rows_layout(), shape, 1, BlockShape::new(2, 4), false);
    let helper = ReduceHelper::new(&desc);
    (helper.intra_warp_extent_unique().unwrap(), helper.inter_warp_extent_unique().unwrap())
}

#[test_case(&[4, 4] => vec![4, 2])]
#[test_case(&[4, 8] => vec![4, 4])]
fn basic_scratch_shrinks_axis_to_distinct_partials(shape: &[u32]) -> Vec<u32> {
    let desc = sum_descriptor(rows_layout(), shape, 1, BlockShape::new(2, 4), false);
    ReduceHelper::new(&desc).scratch_shape_basic().unwrap().to_vec()
}

#[test]
fn fast_scratch_is_exchange_buffer_plus_block_cover() {
    let desc = sum_descriptor(rows_layout(), &[4, 8], 1, BlockShape::new(2, 4), false);
    let (exchange, flat) = ReduceHelper::new(&desc).scratch_shapes_fast().unwrap();
    assert_eq!(exchange.to_vec(), vec![4, 2]);
    assert_eq!(flat.to_vec(), vec![8]);
}

#[test]
fn scratch_bytes_cover_both_strategies() {
    // Tree needs 4x4 = 16 elements, shuffle needs max(8, 8); the planner
    // query must report the larger footprint times the operand width.
    let desc = sum_descriptor(rows_layout(), &[4, 8], 1, BlockShape::new(2, 4), false);
    assert_eq!(ReduceHelper::new(&desc).scratch_size_bytes().unwrap(), 16 * 4);
}

#[test]
fn scratch_bytes_sum_operand_widths() {
    let mut desc = sum_descriptor(rows_layout(), &[4, 8], 1, BlockShape::new(2, 4), false);
    desc.operand_tys = SmallVec::from_slice(&[ElemType::F64, ElemType::I32]);
    assert_eq!(ReduceHelper::new(&desc).scratch_size_bytes().unwrap(), 16 * (8 + 4));
}

#[test_case(1, false => true ; "fastest varying axis takes the shuffle path")]
#[test_case(0, false => false ; "slow axis falls back to the tree")]
#[test_case(1, true => false ; "forcing the tree wins over legality")]
fn fast_path_legality(axis: usize, force_basic: bool) -> bool {
    let desc = sum_descriptor(rows_layout(), &[4, 4], axis, BlockShape::new(2, 4), force_basic);
    ReduceHelper::new(&desc).is_fast_reduction().unwrap()
}

#[test]
fn sliced_legality_translates_axis_into_parent_frame() {
    // Slicing away dimension 0 renumbers the child's axis 0 to the
    // parent's axis 1, which is the parent's fastest dimension.
    let layout = Layout::sliced(rows_layout(), 0);
    let desc = sum_descriptor(layout, &[4], 0, BlockShape::new(2, 4), false);
    assert!(ReduceHelper::new(&desc).is_fast_reduction().unwrap());
}

#[test]
fn supported_layout_set_is_closed() {
    let ampere = Layout::Mma {
        generation: MmaGeneration::Ampere,
        warps_per_block: SmallVec::from_slice(&[1, 1]),
    };
    let volta = Layout::Mma {
        generation: MmaGeneration::Volta,
        warps_per_block: SmallVec::from_slice(&[1, 1]),
    };
    let dot = Layout::DotOperand { parent: Box::new(ampere.clone()), op_idx: 0 };

    let supported = |layout: Layout, shape: &[u32]| {
        let desc = sum_descriptor(layout, shape, 0, BlockShape::new(1, 32), false);
        ReduceHelper::new(&desc).is_supported_layout()
    };
    assert!(supported(rows_layout(), &[4, 4]));
    assert!(supported(ampere.clone(), &[16, 8]));
    assert!(supported(Layout::sliced(rows_layout(), 0), &[4]));
    assert!(!supported(volta, &[16, 8]));
    assert!(!supported(dot, &[16, 8]));
}

proptest! {
    /// With the block tile exactly covering the axis, the two unique
    /// extents multiply out to the distinct-partial count, and never
    /// exceed the axis size.
    #[test]
    fn unique_extent_product(
        spt_pow in 0u32..2,
        tpw_pow in 0u32..4,
        wpb_pow in 0u32..3,
        rows in 1u32..5,
    ) {
        let (spt, tpw, wpb) = (1 << spt_pow, 1 << tpw_pow, 1 << wpb_pow);
        let axis_size = spt * tpw * wpb;
        let layout = blocked(&[1, spt], &[1, tpw], &[1, wpb], &[1, 0]);
        let desc = sum_descriptor(layout, &[rows, axis_size], 1, BlockShape::new(wpb, tpw), false);
        let helper = ReduceHelper::new(&desc);

        let intra = helper.intra_warp_extent_unique().unwrap();
        let inter = helper.inter_warp_extent_unique().unwrap();
        prop_assert_eq!(intra * inter, tpw * wpb);
        prop_assert!(intra * inter <= axis_size);
    }

    /// Scratch size grows with operand width and with the non-axis extent.
    #[test]
    fn scratch_size_is_monotone(rows in 1u32..6, extra in 0u32..4) {
        let base = sum_descriptor(rows_layout(), &[rows, 8], 1, BlockShape::new(2, 4), false);
        let mut wider = base.clone();
        wider.operand_tys = SmallVec::from_slice(&[ElemType::I64]);
        let mut taller = base.clone();
        taller.src_shape[0] = rows + extra;

        let bytes = |d: &crate::ReduceDescriptor| {
            ReduceHelper::new(d).scratch_size_bytes().unwrap()
        };
        prop_assert!(bytes(&wider) >= bytes(&base));
        prop_assert!(bytes(&taller) >= bytes(&base));
    }
}
