//! Relocatable computation fragments.
//!
//! A [`Fragment`] is a cloneable, side-effect-free computation graph with
//! typed input and output ports. The reduction lowering uses one to carry
//! the user-supplied combine operation: each combine step splices a fresh
//! structural copy of the fragment into the kernel at the current emission
//! position, binds its input ports to `(accumulator..., incoming...)` and
//! takes its output ports as the new accumulator. The fragment has no
//! terminator instruction; the output-port list plays that role, so there
//! is nothing to discard after splicing.
//!
//! Fragments are independent of any particular surrounding instruction
//! vocabulary: only pure value operations (constants, ALU, select) can be
//! built, so splicing can never smuggle a barrier or memory effect into a
//! predicated or warp-uniform context.

use smallvec::SmallVec;

use crate::error::{self, Result};
use crate::kernel::{BinOp, Instr, Kernel, ValueId};
use crate::types::{ConstValue, ElemType};

/// A pure computation with typed input and output ports.
///
/// Value numbering is fragment-local: ids `0..inputs` are the input ports,
/// ids from `inputs` upward are the body instructions in order.
#[derive(Debug, Clone, PartialEq)]
pub struct Fragment {
    input_tys: SmallVec<[ElemType; 4]>,
    body: Vec<Instr>,
    tys: Vec<ElemType>,
    outputs: SmallVec<[ValueId; 2]>,
}

impl Fragment {
    pub fn builder(input_tys: impl IntoIterator<Item = ElemType>) -> FragmentBuilder {
        let input_tys: SmallVec<[ElemType; 4]> = input_tys.into_iter().collect();
        let tys = input_tys.to_vec();
        FragmentBuilder { input_tys, body: Vec::new(), tys }
    }

    pub fn num_inputs(&self) -> usize {
        self.input_tys.len()
    }

    pub fn num_outputs(&self) -> usize {
        self.outputs.len()
    }

    pub fn input_tys(&self) -> &[ElemType] {
        &self.input_tys
    }
}

/// Builder for [`Fragment`] bodies. Only pure operations are available.
#[derive(Debug)]
pub struct FragmentBuilder {
    input_tys: SmallVec<[ElemType; 4]>,
    body: Vec<Instr>,
    tys: Vec<ElemType>,
}

impl FragmentBuilder {
    /// Id of input port `i`.
    pub fn input(&self, i: usize) -> ValueId {
        debug_assert!(i < self.input_tys.len());
        ValueId(i as u32)
    }

    fn push(&mut self, instr: Instr, ty: ElemType) -> ValueId {
        let id = ValueId(self.tys.len() as u32);
        self.body.push(instr);
        self.tys.push(ty);
        id
    }

    pub fn const_val(&mut self, v: ConstValue, ty: ElemType) -> ValueId {
        self.push(Instr::Const(v), ty)
    }

    pub fn binary(&mut self, op: BinOp, lhs: ValueId, rhs: ValueId) -> ValueId {
        let ty = match op {
            BinOp::CmpEq | BinOp::CmpLt | BinOp::CmpGt => ElemType::Bool,
            _ => self.tys[lhs.0 as usize],
        };
        self.push(Instr::Binary { op, lhs, rhs }, ty)
    }

    pub fn select(&mut self, cond: ValueId, on_true: ValueId, on_false: ValueId) -> ValueId {
        let ty = self.tys[on_true.0 as usize];
        self.push(Instr::Select { cond, on_true, on_false }, ty)
    }

    pub fn finish(self, outputs: impl IntoIterator<Item = ValueId>) -> Fragment {
        let outputs: SmallVec<[ValueId; 2]> = outputs.into_iter().collect();
        debug_assert!(outputs.iter().all(|o| (o.0 as usize) < self.tys.len()));
        Fragment { input_tys: self.input_tys, body: self.body, tys: self.tys, outputs }
    }
}

impl Kernel {
    /// Splice a structural copy of `fragment` at the current position.
    ///
    /// The clone's input ports are bound to `args`; the returned ids are
    /// the remapped output ports.
    ///
    /// # Errors
    /// [`error::Error::PortArity`] if `args` does not match the fragment's
    /// input ports.
    pub fn inline_fragment(&mut self, fragment: &Fragment, args: &[ValueId]) -> Result<SmallVec<[ValueId; 2]>> {
        snafu::ensure!(
            args.len() == fragment.input_tys.len(),
            error::PortAritySnafu { expected: fragment.input_tys.len(), got: args.len() }
        );

        // Old fragment-local id -> id in this kernel.
        let mut remap: Vec<ValueId> = args.to_vec();
        for instr in &fragment.body {
            let new = match *instr {
                Instr::Const(v) => {
                    let ty = fragment.tys[remap.len()];
                    self.const_val(v, ty)
                }
                Instr::Binary { op, lhs, rhs } => {
                    self.binary(op, remap[lhs.0 as usize], remap[rhs.0 as usize])
                }
                Instr::Select { cond, on_true, on_false } => self.select(
                    remap[cond.0 as usize],
                    remap[on_true.0 as usize],
                    remap[on_false.0 as usize],
                ),
                // FragmentBuilder cannot construct anything else.
                _ => unreachable!("impure instruction in fragment body"),
            };
            remap.push(new);
        }

        Ok(fragment.outputs.iter().map(|o| remap[o.0 as usize]).collect())
    }
}
