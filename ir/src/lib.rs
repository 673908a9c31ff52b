//! Kernel-level IR for the reduction lowering core.
//!
//! The crate provides three pieces:
//!
//! * [`Kernel`]: an append-only SSA instruction stream over the SPMD
//!   primitives a block-level reduction needs (ALU, select, shared-memory
//!   access, warp shuffle, barrier).
//! * [`Fragment`]: a relocatable pure computation with typed input and
//!   output ports, used to splice user combine logic into a kernel.
//! * [`BlockInterp`]: a lock-step interpreter that executes a kernel
//!   across every thread of one block, for device-free validation.

pub mod error;
pub mod fragment;
pub mod interp;
pub mod kernel;
pub mod types;

pub use error::{Error, Result};
pub use fragment::{Fragment, FragmentBuilder};
pub use interp::{BlockInterp, BlockState};
pub use kernel::{BinOp, Instr, Kernel, ValueId};
pub use types::{BlockShape, ConstValue, ElemType};
