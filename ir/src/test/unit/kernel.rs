use crate::{BinOp, ConstValue, ElemType, Instr, Kernel};

#[test]
fn iconst_interns_repeated_values() {
    let mut k = Kernel::new();
    let a = k.iconst(7);
    let b = k.iconst(7);
    let c = k.iconst(8);

    assert_eq!(a, b);
    assert_ne!(a, c);
    assert_eq!(k.len(), 2);
}

#[test]
fn comparison_produces_bool_other_ops_preserve_type() {
    let mut k = Kernel::new();
    let x = k.const_val(ConstValue::Float(1.5), ElemType::F32);
    let y = k.const_val(ConstValue::Float(2.5), ElemType::F32);

    let sum = k.binary(BinOp::Add, x, y);
    let cmp = k.binary(BinOp::CmpLt, x, y);

    assert_eq!(k.ty(sum), ElemType::F32);
    assert_eq!(k.ty(cmp), ElemType::Bool);
}

#[test]
fn count_matching_finds_barriers_and_shuffles() {
    let mut k = Kernel::new();
    let v = k.iconst(0);
    k.barrier();
    k.shuffle(v, 1);
    k.barrier();

    assert_eq!(k.count_matching(|i| matches!(i, Instr::Barrier)), 2);
    assert_eq!(k.count_matching(|i| matches!(i, Instr::Shuffle { .. })), 1);
}
