//! Call-argument marshalling for the variadic `on_call` hook.
//!
//! Every argument is normalized to exactly 64 bits alongside a `(kind,
//! bitwidth)` pair describing how to reinterpret it. No sign extension is
//! performed; integers wider than 64 bits keep only their low 64 bits, and
//! the recorded bitwidth preserves the original width.

use crate::ir::{DataLayout, Function, Inst, Operand, Ty};

/// How a marshalled argument should be reinterpreted by the consumer.
///
/// The discriminants are part of the hook ABI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum CallArgKind {
    Unknown = 0,
    Integer = 1,
    Pointer = 2,
    Float = 3,
}

impl CallArgKind {
    pub fn code(self) -> u32 {
        self as u32
    }
}

/// One marshalled argument: its ABI triple `(kind, bitwidth, value)`.
#[derive(Debug, Clone)]
pub struct MarshalledArg {
    pub kind: CallArgKind,
    pub bits: u32,
    /// A 64-bit operand: either a folded constant or the result of the
    /// conversion instructions appended to `out`.
    pub value: Operand,
}

/// Marshal `arg`, appending any required conversion instructions to `out`.
///
/// Constant arguments fold at pass time; SSA values materialize
/// `ptrtoint`/`bitcast` plus a zero-extension or truncation to 64 bits.
pub fn marshal_arg(
    func: &mut Function,
    dl: &DataLayout,
    arg: &Operand,
    out: &mut Vec<Inst>,
) -> MarshalledArg {
    let ty = func.operand_ty(arg);
    match ty {
        Ty::Ptr => {
            let bits = dl.pointer_bits;
            let value = match arg {
                Operand::NullPtr => Operand::const_i64(0),
                _ => {
                    let cast = func.new_value(Ty::Int(bits));
                    out.push(Inst::PtrToInt {
                        dest: cast,
                        value: arg.clone(),
                    });
                    normalize_to_64(func, Operand::Value(cast), bits, out)
                }
            };
            MarshalledArg {
                kind: CallArgKind::Pointer,
                bits,
                value,
            }
        }
        Ty::Int(bits) => {
            let value = match arg {
                // The constant payload already holds the low 64 bits.
                Operand::ConstInt { value, .. } => Operand::const_i64(*value),
                _ => normalize_to_64(func, arg.clone(), bits, out),
            };
            MarshalledArg {
                kind: CallArgKind::Integer,
                bits,
                value,
            }
        }
        Ty::F32 | Ty::F64 => {
            let bits = if ty == Ty::F32 { 32 } else { 64 };
            let value = match arg {
                Operand::ConstFloat { bits: pattern, .. } => Operand::const_i64(*pattern),
                _ => {
                    let cast = func.new_value(Ty::Int(bits));
                    out.push(Inst::BitCast {
                        dest: cast,
                        value: arg.clone(),
                    });
                    normalize_to_64(func, Operand::Value(cast), bits, out)
                }
            };
            MarshalledArg {
                kind: CallArgKind::Float,
                bits,
                value,
            }
        }
        other => MarshalledArg {
            kind: CallArgKind::Unknown,
            bits: dl.store_size_bits(&other).max(1) as u32,
            value: Operand::const_i64(0),
        },
    }
}

fn normalize_to_64(
    func: &mut Function,
    value: Operand,
    bits: u32,
    out: &mut Vec<Inst>,
) -> Operand {
    if bits == 64 {
        return value;
    }
    let dest = func.new_value(Ty::Int(64));
    if bits < 64 {
        out.push(Inst::ZExt { dest, value });
    } else {
        out.push(Inst::Trunc { dest, value });
    }
    Operand::Value(dest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{FunctionBuilder, Signature};

    fn test_func(params: Vec<Ty>) -> Function {
        let mut b = FunctionBuilder::new("m", Signature::new(params, Ty::Void));
        b.ret(None);
        b.finish()
    }

    #[test]
    fn test_integer_constant_folds() {
        let mut func = test_func(vec![]);
        let dl = DataLayout::default();
        let mut out = Vec::new();
        let m = marshal_arg(&mut func, &dl, &Operand::const_i32(42), &mut out);
        assert_eq!(m.kind, CallArgKind::Integer);
        assert_eq!(m.bits, 32);
        assert_eq!(m.value, Operand::const_i64(42));
        assert!(out.is_empty());
    }

    #[test]
    fn test_float_constant_folds_to_bit_pattern() {
        let mut func = test_func(vec![]);
        let dl = DataLayout::default();
        let mut out = Vec::new();
        let m = marshal_arg(&mut func, &dl, &Operand::const_f64(3.14), &mut out);
        assert_eq!(m.kind, CallArgKind::Float);
        assert_eq!(m.bits, 64);
        assert_eq!(m.value, Operand::const_i64(3.14f64.to_bits()));
        assert!(out.is_empty());
    }

    #[test]
    fn test_pointer_value_materializes_ptrtoint() {
        let mut func = test_func(vec![Ty::Ptr]);
        let dl = DataLayout::default();
        let mut out = Vec::new();
        let arg = Operand::Value(func.params[0]);
        let m = marshal_arg(&mut func, &dl, &arg, &mut out);
        assert_eq!(m.kind, CallArgKind::Pointer);
        assert_eq!(m.bits, 64);
        // 64-bit pointers need no widening after the cast.
        assert_eq!(out.len(), 1);
        assert!(matches!(out[0], Inst::PtrToInt { .. }));
    }

    #[test]
    fn test_narrow_pointer_zero_extends() {
        let mut func = test_func(vec![Ty::Ptr]);
        let dl = DataLayout { pointer_bits: 32 };
        let mut out = Vec::new();
        let arg = Operand::Value(func.params[0]);
        let m = marshal_arg(&mut func, &dl, &arg, &mut out);
        assert_eq!(m.bits, 32);
        assert_eq!(out.len(), 2);
        assert!(matches!(out[1], Inst::ZExt { .. }));
    }

    #[test]
    fn test_narrow_integer_value_zero_extends() {
        let mut func = test_func(vec![Ty::Int(8)]);
        let dl = DataLayout::default();
        let mut out = Vec::new();
        let arg = Operand::Value(func.params[0]);
        let m = marshal_arg(&mut func, &dl, &arg, &mut out);
        assert_eq!(m.kind, CallArgKind::Integer);
        assert_eq!(m.bits, 8);
        assert_eq!(out.len(), 1);
        assert!(matches!(out[0], Inst::ZExt { .. }));
    }

    #[test]
    fn test_wide_integer_value_truncates() {
        let mut func = test_func(vec![Ty::Int(128)]);
        let dl = DataLayout::default();
        let mut out = Vec::new();
        let arg = Operand::Value(func.params[0]);
        let m = marshal_arg(&mut func, &dl, &arg, &mut out);
        assert_eq!(m.bits, 128);
        assert_eq!(out.len(), 1);
        assert!(matches!(out[0], Inst::Trunc { .. }));
    }

    #[test]
    fn test_f32_value_bitcasts_then_extends() {
        let mut func = test_func(vec![Ty::F32]);
        let dl = DataLayout::default();
        let mut out = Vec::new();
        let arg = Operand::Value(func.params[0]);
        let m = marshal_arg(&mut func, &dl, &arg, &mut out);
        assert_eq!(m.kind, CallArgKind::Float);
        assert_eq!(m.bits, 32);
        assert_eq!(out.len(), 2);
        assert!(matches!(out[0], Inst::BitCast { .. }));
        assert!(matches!(out[1], Inst::ZExt { .. }));
    }

    #[test]
    fn test_aggregate_degrades_to_unknown() {
        let mut func = test_func(vec![Ty::Aggregate(24)]);
        let dl = DataLayout::default();
        let mut out = Vec::new();
        let arg = Operand::Value(func.params[0]);
        let m = marshal_arg(&mut func, &dl, &arg, &mut out);
        assert_eq!(m.kind, CallArgKind::Unknown);
        assert_eq!(m.bits, 192);
        assert_eq!(m.value, Operand::const_i64(0));
        assert!(out.is_empty());
    }

    #[test]
    fn test_null_pointer_folds_to_zero() {
        let mut func = test_func(vec![]);
        let dl = DataLayout::default();
        let mut out = Vec::new();
        let m = marshal_arg(&mut func, &dl, &Operand::NullPtr, &mut out);
        assert_eq!(m.kind, CallArgKind::Pointer);
        assert_eq!(m.value, Operand::const_i64(0));
        assert!(out.is_empty());
    }
}
