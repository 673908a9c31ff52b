//! Error types for kernel construction and interpretation.

use snafu::Snafu;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Clone, PartialEq, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// Fragment spliced with the wrong number of bound inputs.
    #[snafu(display("fragment expects {expected} bound inputs, got {got}"))]
    PortArity { expected: usize, got: usize },

    /// Operation evaluated on incompatible value kinds.
    #[snafu(display("type mismatch evaluating {what}: {lhs:?} vs {rhs:?}"))]
    TypeMismatch { what: &'static str, lhs: crate::ConstValue, rhs: crate::ConstValue },

    /// Integer division or remainder by zero.
    #[snafu(display("division by zero"))]
    DivisionByZero,

    /// Value read before any instruction produced it.
    #[snafu(display("value v{id} read before definition on thread {thread}"))]
    UninitializedValue { id: u32, thread: usize },

    /// Shared-memory access outside the allocated scratch window.
    #[snafu(display("shared memory access at byte {addr} (+{len}) outside {size}-byte window"))]
    SharedOutOfBounds { addr: i64, len: usize, size: usize },

    /// Global-memory access outside an operand buffer.
    #[snafu(display("global load at element {offset} outside operand {operand} of len {len}"))]
    GlobalOutOfBounds { operand: usize, offset: i64, len: usize },

    /// Condition value of a select or predicated store was not a bool.
    #[snafu(display("predicate is not a bool: {value:?}"))]
    PredicateNotBool { value: crate::ConstValue },

    /// Address or offset operand was not an integer value.
    #[snafu(display("{what} is not an integer: {value:?}"))]
    NotAnInteger { what: &'static str, value: crate::ConstValue },
}
