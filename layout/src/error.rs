//! Error types for the layout algebra.

use snafu::Snafu;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Clone, PartialEq, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// Layout variant has no defined thread-ownership geometry.
    #[snafu(display("layout {layout} does not define thread-ownership geometry"))]
    UnsupportedLayout { layout: String },

    /// Shape rank does not match the layout's rank.
    #[snafu(display("shape rank {shape_rank} does not match layout rank {layout_rank}"))]
    RankMismatch { shape_rank: usize, layout_rank: usize },
}
