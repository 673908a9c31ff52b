use smallvec::SmallVec;
use test_case::test_case;

use tarn_ir::{
    BinOp, BlockInterp, BlockShape, BlockState, ConstValue, ElemType, Fragment, Instr, Kernel,
    ValueId,
};
use tarn_layout::{remove_dim, Layout, MmaGeneration};

use crate::indexing::{emit_linearize, emit_owned_coords, Coords};
use crate::test::unit::{blocked, sum_descriptor};
use crate::{lower_reduction, BumpPlanner, Error, ReduceDescriptor};

fn rows_layout() -> Layout {
    blocked(&[1, 2], &[2, 2], &[1, 2], &[1, 0])
}

fn as_int(v: ConstValue) -> i64 {
    match v {
        ConstValue::Int(i) => i,
        ConstValue::UInt(u) => u as i64,
        other => panic!("not an integer: {other:?}"),
    }
}

struct Run {
    kernel: Kernel,
    state: BlockState,
    results: SmallVec<[Vec<ValueId>; 2]>,
    /// Runtime coordinates of each result slot, absent for scalar results.
    result_coords: Option<Vec<Coords>>,
    scratch_bytes: u32,
}

impl Run {
    fn barriers(&self) -> usize {
        self.kernel.count_matching(|i| matches!(i, Instr::Barrier))
    }

    fn shuffles(&self) -> usize {
        self.kernel.count_matching(|i| matches!(i, Instr::Shuffle { .. }))
    }

    fn int(&self, thread: usize, id: ValueId) -> i64 {
        as_int(self.state.value(thread, id).unwrap())
    }
}

/// Lower `desc` with a load prologue, then execute the kernel on `data`
/// (one row-major element buffer per operand).
fn lower_and_run(desc: &ReduceDescriptor, data: &[Vec<i64>]) -> Run {
    let mut kernel = Kernel::new();
    let row_major: Vec<usize> = (0..desc.rank()).rev().collect();

    let coords =
        emit_owned_coords(&mut kernel, &desc.src_layout, &desc.src_shape, &desc.block).unwrap();
    let src_values: Vec<Vec<ValueId>> = desc
        .operand_tys
        .iter()
        .enumerate()
        .map(|(op, &ty)| {
            coords
                .iter()
                .map(|c| {
                    let off = emit_linearize(&mut kernel, c, &desc.src_shape, &row_major);
                    kernel.load_global(op, ty, off)
                })
                .collect()
        })
        .collect();

    let mut planner = BumpPlanner::new();
    let results = lower_reduction(desc, &src_values, &mut kernel, &mut planner).unwrap();

    let result_coords = (desc.rank() > 1).then(|| {
        let result_layout = Layout::sliced(desc.src_layout.clone(), desc.axis);
        let result_shape = remove_dim(desc.src_shape.clone(), desc.axis);
        emit_owned_coords(&mut kernel, &result_layout, &result_shape, &desc.block).unwrap()
    });

    let mut interp = BlockInterp::new(desc.block, planner.bytes_allocated());
    for buf in data {
        interp.bind_operand(buf.iter().map(|&v| ConstValue::Int(v)).collect());
    }
    let state = interp.run(&kernel).unwrap();

    Run { kernel, state, results, result_coords, scratch_bytes: planner.bytes_allocated() }
}

/// Reduce rows of an `[rows, cols]` tensor and check every thread's result
/// slots against sequential row sums.
fn check_row_sums(shape: [u32; 2], force_basic: bool) -> Run {
    let desc =
        sum_descriptor(rows_layout(), &shape, 1, BlockShape::new(2, 4), force_basic);
    let data: Vec<i64> = (0..shape[0] * shape[1]).map(|i| i as i64 * 3 + 1).collect();
    let reference: Vec<i64> = (0..shape[0])
        .map(|r| (0..shape[1]).map(|c| data[(r * shape[1] + c) as usize]).sum())
        .collect();

    let run = lower_and_run(&desc, &[data]);
    let coords = run.result_coords.as_ref().unwrap();
    for thread in 0..desc.block.num_threads() as usize {
        for (slot, c) in coords.iter().enumerate() {
            let row = run.int(thread, c[0]) as usize;
            assert_eq!(
                run.int(thread, run.results[0][slot]),
                reference[row],
                "thread {thread} slot {slot} (row {row})"
            );
        }
    }
    run
}

#[test_case([4, 4] ; "replicated warps")]
#[test_case([4, 8] ; "genuine inter warp exchange")]
fn tree_and_shuffle_strategies_agree(shape: [u32; 2]) {
    let tree = check_row_sums(shape, true);
    let shuffle = check_row_sums(shape, false);

    assert_eq!(tree.shuffles(), 0);
    assert!(tree.barriers() > 2);
    assert!(shuffle.shuffles() > 0);
    assert_eq!(shuffle.barriers(), 2);
}

#[test]
fn mma_fragment_reduces_columns_through_the_tree() {
    // Axis 0 is the Ampere fragment's slow dimension, so this exercises
    // the (row / 16) * 8 + row % 8 scratch mapping.
    let layout = Layout::Mma {
        generation: MmaGeneration::Ampere,
        warps_per_block: SmallVec::from_slice(&[1, 1]),
    };
    let desc = sum_descriptor(layout, &[16, 8], 0, BlockShape::new(1, 32), false);
    let data: Vec<i64> = (0..16 * 8).map(|i| i as i64 * 7 - 100).collect();
    let reference: Vec<i64> =
        (0..8).map(|c| (0..16).map(|r| data[r * 8 + c]).sum()).collect();

    let run = lower_and_run(&desc, &[data]);
    assert_eq!(run.shuffles(), 0);

    let coords = run.result_coords.as_ref().unwrap();
    for thread in 0..32 {
        for (slot, c) in coords.iter().enumerate() {
            let col = run.int(thread, c[0]) as usize;
            assert_eq!(run.int(thread, run.results[0][slot]), reference[col]);
        }
    }
}

#[test]
fn sliced_source_reduces_to_a_scalar_via_shuffles() {
    // A rank-1 tensor carrying the layout left over from slicing away
    // dimension 0; the axis translates to the parent's fastest dimension.
    let layout = Layout::sliced(rows_layout(), 0);
    let desc = sum_descriptor(layout, &[4], 0, BlockShape::new(2, 4), false);
    let data = vec![5_i64, -2, 11, 3];

    let run = lower_and_run(&desc, &[data]);
    assert!(run.shuffles() > 0);
    assert_eq!(run.results[0].len(), 1);
    for thread in 0..8 {
        assert_eq!(run.int(thread, run.results[0][0]), 17);
    }
}

#[test]
fn arg_max_carries_value_and_index_together() {
    let mut b = Fragment::builder([ElemType::I32; 4]);
    let gt = b.binary(BinOp::CmpGt, b.input(2), b.input(0));
    let v = b.select(gt, b.input(2), b.input(0));
    let i = b.select(gt, b.input(3), b.input(1));
    let combine = b.finish([v, i]);

    let desc = ReduceDescriptor {
        src_layout: blocked(&[1], &[8], &[1], &[0]),
        src_shape: SmallVec::from_slice(&[8]),
        operand_tys: SmallVec::from_slice(&[ElemType::I32, ElemType::I32]),
        axis: 0,
        combine,
        block: BlockShape::new(1, 8),
        force_basic: false,
    };
    let values = vec![3_i64, 40, -7, 25, 90, 12, 88, 1];
    let indices: Vec<i64> = (0..8).collect();

    let run = lower_and_run(&desc, &[values.clone(), indices]);
    let (best_idx, best) =
        values.iter().enumerate().max_by_key(|(_, &v)| v).unwrap();
    for thread in 0..8 {
        assert_eq!(run.int(thread, run.results[0][0]), *best);
        assert_eq!(run.int(thread, run.results[1][0]), best_idx as i64);
    }
}

#[test]
fn unit_axis_lowers_to_a_pure_copy() {
    let layout = blocked(&[1, 1], &[2, 1], &[2, 1], &[1, 0]);
    let desc = sum_descriptor(layout, &[4, 1], 1, BlockShape::new(2, 2), false);

    let mut kernel = Kernel::new();
    let coords =
        emit_owned_coords(&mut kernel, &desc.src_layout, &desc.src_shape, &desc.block).unwrap();
    assert_eq!(coords.len(), 1);
    let off = emit_linearize(&mut kernel, &coords[0], &desc.src_shape, &[1, 0]);
    let src = kernel.load_global(0, ElemType::I32, off);
    let emitted_before = kernel.len();

    let mut planner = BumpPlanner::new();
    let results = lower_reduction(&desc, &[vec![src]], &mut kernel, &mut planner).unwrap();

    assert_eq!(kernel.len(), emitted_before);
    assert_eq!(planner.bytes_allocated(), 0);
    assert_eq!(results[0], vec![src]);
    assert_eq!(kernel.count_matching(|i| matches!(i, Instr::Barrier | Instr::Shuffle { .. })), 0);
}

#[test]
fn unsupported_layout_is_rejected_before_any_emission() {
    let dot = Layout::DotOperand { parent: Box::new(rows_layout()), op_idx: 0 };
    let desc = sum_descriptor(dot, &[4, 4], 1, BlockShape::new(2, 4), false);

    let mut kernel = Kernel::new();
    let mut planner = BumpPlanner::new();
    let err = lower_reduction(&desc, &[vec![]], &mut kernel, &mut planner).unwrap_err();

    assert!(matches!(err, Error::UnsupportedLayout { .. }));
    assert!(kernel.is_empty());
    assert_eq!(planner.bytes_allocated(), 0);
}

#[test_case(2 => matches Error::AxisOutOfRange { axis: 2, rank: 2 })]
fn out_of_range_axis_is_rejected(axis: usize) -> Error {
    let desc = sum_descriptor(rows_layout(), &[4, 4], axis, BlockShape::new(2, 4), false);
    let mut kernel = Kernel::new();
    lower_reduction(&desc, &[vec![]], &mut kernel, &mut BumpPlanner::new()).unwrap_err()
}

#[test]
fn combine_arity_must_match_operand_tuple() {
    // Two operands but a single-operand combine fragment.
    let mut desc = sum_descriptor(rows_layout(), &[4, 4], 1, BlockShape::new(2, 4), false);
    desc.operand_tys = SmallVec::from_slice(&[ElemType::I32, ElemType::I32]);

    let mut kernel = Kernel::new();
    let err = lower_reduction(&desc, &[vec![], vec![]], &mut kernel, &mut BumpPlanner::new())
        .unwrap_err();
    assert!(matches!(err, Error::CombineArity { expected_inputs: 4, inputs: 2, .. }));
}

#[test]
fn lowering_is_deterministic() {
    let build = || {
        let desc = sum_descriptor(rows_layout(), &[4, 8], 1, BlockShape::new(2, 4), false);
        let mut kernel = Kernel::new();
        let coords =
            emit_owned_coords(&mut kernel, &desc.src_layout, &desc.src_shape, &desc.block)
                .unwrap();
        let src: Vec<ValueId> = coords
            .iter()
            .map(|c| {
                let off = emit_linearize(&mut kernel, c, &desc.src_shape, &[1, 0]);
                kernel.load_global(0, ElemType::I32, off)
            })
            .collect();
        let mut planner = BumpPlanner::new();
        lower_reduction(&desc, &[src], &mut kernel, &mut planner).unwrap();
        (kernel, planner.bytes_allocated())
    };

    let (k1, bytes1) = build();
    let (k2, bytes2) = build();
    assert_eq!(bytes1, bytes2);
    assert_eq!(k1.instrs(), k2.instrs());
}

#[test]
fn scratch_footprint_matches_helper_report() {
    let desc = sum_descriptor(rows_layout(), &[4, 8], 1, BlockShape::new(2, 4), false);
    let run = lower_and_run(&desc, &[(0..32).collect()]);
    assert_eq!(run.scratch_bytes, crate::ReduceHelper::new(&desc).scratch_size_bytes().unwrap());
}
