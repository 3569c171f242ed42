//! Construction helpers for defined functions.

use super::{
    BinOp, Block, BlockRef, Callee, FuncRef, Function, FunctionKind, IcmpPred, Inst, Linkage,
    Operand, Signature, Ty, ValueId,
};

/// Builds a defined function block by block.
///
/// The entry block exists from the start; further blocks are created with
/// [`FunctionBuilder::add_block`] and selected with
/// [`FunctionBuilder::switch_to`]. Instructions append to the current block,
/// so each block must be terminated before the function is finished.
pub struct FunctionBuilder {
    func: Function,
    current: BlockRef,
}

impl FunctionBuilder {
    pub fn new(name: impl Into<String>, sig: Signature) -> Self {
        let mut func = Function {
            name: name.into(),
            kind: FunctionKind::Defined,
            linkage: Linkage::External,
            sig,
            params: Vec::new(),
            blocks: vec![Block {
                name: Some("entry".to_string()),
                insts: Vec::new(),
            }],
            value_tys: Vec::new(),
        };
        for ty in func.sig.params.clone() {
            let v = func.new_value(ty);
            func.params.push(v);
        }
        Self {
            func,
            current: BlockRef(0),
        }
    }

    /// The SSA value bound to parameter `index`.
    pub fn param(&self, index: usize) -> Operand {
        Operand::Value(self.func.params[index])
    }

    pub fn add_block(&mut self, name: impl Into<String>) -> BlockRef {
        let r = BlockRef(self.func.blocks.len() as u32);
        self.func.blocks.push(Block {
            name: Some(name.into()),
            insts: Vec::new(),
        });
        r
    }

    pub fn switch_to(&mut self, block: BlockRef) {
        self.current = block;
    }

    fn push(&mut self, inst: Inst) {
        self.func.blocks[self.current.0 as usize].insts.push(inst);
    }

    fn define(&mut self, ty: Ty) -> ValueId {
        self.func.new_value(ty)
    }

    pub fn alloca(&mut self, ty: Ty) -> Operand {
        let dest = self.define(Ty::Ptr);
        self.push(Inst::Alloca { dest, ty });
        Operand::Value(dest)
    }

    pub fn load(&mut self, ty: Ty, addr: Operand) -> Operand {
        let dest = self.define(ty.clone());
        self.push(Inst::Load { dest, ty, addr });
        Operand::Value(dest)
    }

    pub fn store(&mut self, value: Operand, addr: Operand) {
        self.push(Inst::Store { value, addr });
    }

    pub fn binary(&mut self, op: BinOp, ty: Ty, lhs: Operand, rhs: Operand) -> Operand {
        let dest = self.define(ty);
        self.push(Inst::Binary { dest, op, lhs, rhs });
        Operand::Value(dest)
    }

    pub fn icmp(&mut self, pred: IcmpPred, lhs: Operand, rhs: Operand) -> Operand {
        let dest = self.define(Ty::Int(1));
        self.push(Inst::Icmp {
            dest,
            pred,
            lhs,
            rhs,
        });
        Operand::Value(dest)
    }

    /// Direct call. Returns the result value for non-void `ret` types.
    pub fn call_direct(&mut self, callee: FuncRef, ret: Ty, args: Vec<Operand>) -> Option<Operand> {
        self.call(Callee::Function(callee), ret, args)
    }

    /// Indirect call through a pointer operand.
    pub fn call_indirect(
        &mut self,
        target: Operand,
        ret: Ty,
        args: Vec<Operand>,
    ) -> Option<Operand> {
        self.call(Callee::Indirect(target), ret, args)
    }

    fn call(&mut self, callee: Callee, ret: Ty, args: Vec<Operand>) -> Option<Operand> {
        let dest = match ret {
            Ty::Void => None,
            ty => Some(self.define(ty)),
        };
        self.push(Inst::Call { dest, callee, args });
        dest.map(Operand::Value)
    }

    pub fn asm(&mut self, template: impl Into<String>, sideeffect: bool) {
        self.push(Inst::Asm {
            template: template.into(),
            sideeffect,
        });
    }

    pub fn br(&mut self, target: BlockRef) {
        self.push(Inst::Br { target });
    }

    pub fn cond_br(&mut self, cond: Operand, iftrue: BlockRef, iffalse: BlockRef) {
        self.push(Inst::CondBr {
            cond,
            iftrue,
            iffalse,
        });
    }

    pub fn ret(&mut self, value: Option<Operand>) {
        self.push(Inst::Ret { value });
    }

    pub fn finish(self) -> Function {
        debug_assert!(
            self.func
                .blocks
                .iter()
                .all(|b| b.terminator().is_some()),
            "function {} has an unterminated block",
            self.func.name
        );
        self.func
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_produces_terminated_blocks() {
        let mut b = FunctionBuilder::new("f", Signature::new(vec![Ty::Int(32)], Ty::Int(32)));
        let body = b.add_block("body");
        let cond = b.icmp(IcmpPred::Sgt, b.param(0), Operand::const_i32(0));
        b.cond_br(cond, body, body);
        b.switch_to(body);
        b.ret(Some(b.param(0)));
        let func = b.finish();

        assert_eq!(func.blocks.len(), 2);
        assert!(func.blocks.iter().all(|b| b.terminator().is_some()));
        assert_eq!(func.blocks[0].successors(), vec![body, body]);
    }

    #[test]
    fn test_param_values_are_typed() {
        let b = FunctionBuilder::new("f", Signature::new(vec![Ty::Ptr, Ty::F64], Ty::Void));
        let func_params = match (b.param(0), b.param(1)) {
            (Operand::Value(a), Operand::Value(c)) => (a, c),
            _ => unreachable!(),
        };
        assert_eq!(*b.func.value_ty(func_params.0), Ty::Ptr);
        assert_eq!(*b.func.value_ty(func_params.1), Ty::F64);
    }
}
