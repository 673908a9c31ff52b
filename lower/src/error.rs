//! Error types for the reduction lowering.
//!
//! Every failure here is a static configuration problem, discoverable from
//! the operation's declared layout and shape before any code is emitted.
//! There is no recovery path: a reduction either lowers completely or is
//! rejected with a descriptive report.

use snafu::Snafu;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// Source layout outside the supported set.
    #[snafu(display("reduction over unsupported layout: {layout}"))]
    UnsupportedLayout { layout: String },

    /// A layout reached the scratch write-index computation without a
    /// defined mapping rule for the reduction axis.
    #[snafu(display("no scratch axis mapping for {layout} on axis {axis}"))]
    UnsupportedAxisMapping { layout: String, axis: usize },

    /// Reduction axis outside the source rank.
    #[snafu(display("reduction axis {axis} out of range for rank {rank}"))]
    AxisOutOfRange { axis: usize, rank: usize },

    /// Reduction declared with no operands.
    #[snafu(display("reduction has no operands"))]
    EmptyOperands,

    /// A source dimension has zero extent.
    #[snafu(display("source dimension {dim} has zero extent"))]
    ZeroSizedDimension { dim: usize },

    /// Combine fragment ports do not match the operand tuple.
    #[snafu(display(
        "combine takes {inputs} inputs and yields {outputs} outputs, \
         expected {expected_inputs} and {expected_outputs} for {operands} operand(s)"
    ))]
    CombineArity {
        operands: usize,
        expected_inputs: usize,
        expected_outputs: usize,
        inputs: usize,
        outputs: usize,
    },

    /// Number of source value lists differs from the operand count.
    #[snafu(display("{got} source value lists for {expected} operand(s)"))]
    OperandListCount { expected: usize, got: usize },

    /// Source value lists do not line up with the descriptor.
    #[snafu(display("operand {operand} supplied {got} source values, expected {expected}"))]
    SourceValueCount { operand: usize, expected: usize, got: usize },

    /// Layout-algebra query failed.
    #[snafu(display("layout query failed"))]
    Layout { source: tarn_layout::Error },

    /// Kernel construction failed.
    #[snafu(display("kernel construction failed"))]
    Ir { source: tarn_ir::Error },
}
