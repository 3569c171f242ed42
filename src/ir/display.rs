//! Stable textual rendering of IR instructions.
//!
//! The instrumentation descriptor embeds the printed form of every
//! instruction, so rendering must be deterministic: it depends only on the
//! module's static structure, never on hashing or addresses.

use super::{BinOp, BlockRef, Callee, Function, IcmpPred, Inst, Module, Operand, Ty, ValueId};

/// Render a type.
pub fn ty_text(ty: &Ty) -> String {
    match ty {
        Ty::Void => "void".to_string(),
        Ty::Int(bits) => format!("i{bits}"),
        Ty::F32 => "f32".to_string(),
        Ty::F64 => "f64".to_string(),
        Ty::Ptr => "ptr".to_string(),
        Ty::Aggregate(bytes) => format!("agg{bytes}"),
    }
}

/// The `%name` label of a block within `func`.
pub fn block_label(func: &Function, block: BlockRef) -> String {
    match func.blocks.get(block.0 as usize) {
        Some(b) => format!("%{}", b.display_name(block.0)),
        None => format!("%bb_{}", block.0),
    }
}

fn value_text(value: ValueId) -> String {
    format!("%{}", value.0)
}

fn operand_text(module: &Module, op: &Operand) -> String {
    match op {
        Operand::Value(v) => value_text(*v),
        Operand::ConstInt { value, .. } => format!("{}", *value as i64),
        Operand::ConstFloat { ty: Ty::F32, bits } => {
            format!("{:?}", f32::from_bits(*bits as u32))
        }
        Operand::ConstFloat { bits, .. } => format!("{:?}", f64::from_bits(*bits)),
        Operand::NullPtr => "null".to_string(),
        Operand::FunctionAddr(f) => format!("@{}", module.function(*f).name),
        Operand::BlockAddr { func: f, block } => {
            let callee = module.function(*f);
            format!(
                "blockaddress(@{}, {})",
                callee.name,
                block_label(callee, *block)
            )
        }
        Operand::GlobalAddr(g) => format!("@{}", module.global(*g).name),
    }
}

fn typed_operand_text(module: &Module, func: &Function, op: &Operand) -> String {
    format!(
        "{} {}",
        ty_text(&func.operand_ty(op)),
        operand_text(module, op)
    )
}

fn bin_op_text(op: BinOp) -> &'static str {
    match op {
        BinOp::Add => "add",
        BinOp::Sub => "sub",
        BinOp::Mul => "mul",
        BinOp::And => "and",
        BinOp::Or => "or",
        BinOp::Xor => "xor",
    }
}

fn icmp_pred_text(pred: IcmpPred) -> &'static str {
    match pred {
        IcmpPred::Eq => "eq",
        IcmpPred::Ne => "ne",
        IcmpPred::Slt => "slt",
        IcmpPred::Sle => "sle",
        IcmpPred::Sgt => "sgt",
        IcmpPred::Sge => "sge",
        IcmpPred::Ult => "ult",
        IcmpPred::Ule => "ule",
        IcmpPred::Ugt => "ugt",
        IcmpPred::Uge => "uge",
    }
}

fn cast_text(
    module: &Module,
    func: &Function,
    name: &str,
    dest: ValueId,
    value: &Operand,
) -> String {
    format!(
        "{} = {} {} to {}",
        value_text(dest),
        name,
        typed_operand_text(module, func, value),
        ty_text(func.value_ty(dest))
    )
}

/// Render one instruction of `func`.
pub fn inst_text(module: &Module, func: &Function, inst: &Inst) -> String {
    match inst {
        Inst::Alloca { dest, ty } => {
            format!("{} = alloca {}", value_text(*dest), ty_text(ty))
        }
        Inst::Load { dest, ty, addr } => format!(
            "{} = load {}, {}",
            value_text(*dest),
            ty_text(ty),
            typed_operand_text(module, func, addr)
        ),
        Inst::Store { value, addr } => format!(
            "store {}, {}",
            typed_operand_text(module, func, value),
            typed_operand_text(module, func, addr)
        ),
        Inst::Binary { dest, op, lhs, rhs } => format!(
            "{} = {} {} {}, {}",
            value_text(*dest),
            bin_op_text(*op),
            ty_text(func.value_ty(*dest)),
            operand_text(module, lhs),
            operand_text(module, rhs)
        ),
        Inst::Icmp {
            dest,
            pred,
            lhs,
            rhs,
        } => format!(
            "{} = icmp {} {} {}, {}",
            value_text(*dest),
            icmp_pred_text(*pred),
            ty_text(&func.operand_ty(lhs)),
            operand_text(module, lhs),
            operand_text(module, rhs)
        ),
        Inst::Select {
            dest,
            cond,
            on_true,
            on_false,
        } => format!(
            "{} = select {}, {}, {}",
            value_text(*dest),
            typed_operand_text(module, func, cond),
            typed_operand_text(module, func, on_true),
            typed_operand_text(module, func, on_false)
        ),
        Inst::PtrToInt { dest, value } => cast_text(module, func, "ptrtoint", *dest, value),
        Inst::ZExt { dest, value } => cast_text(module, func, "zext", *dest, value),
        Inst::Trunc { dest, value } => cast_text(module, func, "trunc", *dest, value),
        Inst::BitCast { dest, value } => cast_text(module, func, "bitcast", *dest, value),
        Inst::Call { dest, callee, args } => {
            let mut text = String::new();
            let ret = match dest {
                Some(d) => {
                    text.push_str(&value_text(*d));
                    text.push_str(" = ");
                    ty_text(func.value_ty(*d))
                }
                None => "void".to_string(),
            };
            let target = match callee {
                Callee::Function(f) => format!("@{}", module.function(*f).name),
                Callee::Indirect(op) => operand_text(module, op),
            };
            let rendered: Vec<String> = args
                .iter()
                .map(|a| typed_operand_text(module, func, a))
                .collect();
            text.push_str(&format!("call {} {}({})", ret, target, rendered.join(", ")));
            text
        }
        Inst::Asm {
            template,
            sideeffect,
        } => {
            let effect = if *sideeffect { " sideeffect" } else { "" };
            format!("asm{} \"{}\"", effect, template.escape_default())
        }
        Inst::Br { target } => format!("br label {}", block_label(func, *target)),
        Inst::CondBr {
            cond,
            iftrue,
            iffalse,
        } => format!(
            "br {}, label {}, label {}",
            typed_operand_text(module, func, cond),
            block_label(func, *iftrue),
            block_label(func, *iffalse)
        ),
        Inst::Ret { value: Some(v) } => {
            format!("ret {}", typed_operand_text(module, func, v))
        }
        Inst::Ret { value: None } => "ret void".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{FunctionBuilder, Signature};

    #[test]
    fn test_render_memory_and_branches() {
        let module = Module::new("render.ir");
        let mut b = FunctionBuilder::new("f", Signature::new(vec![Ty::Ptr], Ty::Void));
        let exit = b.add_block("exit");
        let p = b.param(0);
        let v = b.load(Ty::Int(32), p.clone());
        b.store(v.clone(), p.clone());
        b.br(exit);
        b.switch_to(exit);
        b.ret(None);
        let func = b.finish();

        let texts: Vec<String> = func.blocks[0]
            .insts
            .iter()
            .map(|i| inst_text(&module, &func, i))
            .collect();
        assert_eq!(texts[0], "%1 = load i32, ptr %0");
        assert_eq!(texts[1], "store i32 %1, ptr %0");
        assert_eq!(texts[2], "br label %exit");
    }

    #[test]
    fn test_render_call_with_constants() {
        let mut module = Module::new("render.ir");
        let callee = module.get_or_insert_function(
            "h",
            Signature::new(vec![Ty::Ptr, Ty::Int(32), Ty::F64], Ty::Void),
            crate::ir::FunctionKind::Declaration,
        );
        let mut b = FunctionBuilder::new("g", Signature::new(vec![Ty::Ptr], Ty::Void));
        let p = b.param(0);
        b.call_direct(
            callee,
            Ty::Void,
            vec![p, Operand::const_i32(42), Operand::const_f64(3.14)],
        );
        b.ret(None);
        let func = b.finish();

        let text = inst_text(&module, &func, &func.blocks[0].insts[0]);
        assert_eq!(text, "call void @h(ptr %0, i32 42, f64 3.14)");
    }
}
