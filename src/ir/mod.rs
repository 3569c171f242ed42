//! A minimal SSA-style mid-level IR for instrumentation passes.
//!
//! The model is deliberately small: modules own functions and globals,
//! functions own basic blocks in layout order, and blocks own instruction
//! lists whose final element is a terminator. It carries exactly what a
//! block-level instrumentation pass needs to traverse and rewrite: typed
//! SSA values, address constants (function, block, global), global ctor/dtor
//! registration, and section/alignment/retention attributes on globals.
//!
//! Block index 0 is the entry block; the entry block has no predecessors.

pub mod builder;
pub mod display;
pub mod types;

pub use builder::FunctionBuilder;
pub use types::{DataLayout, Ty};

/// Index of a function within its module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FuncRef(pub u32);

/// Index of a block within its function (layout order).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockRef(pub u32);

/// Index of an SSA value within its function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ValueId(pub u32);

/// Index of a global variable within its module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GlobalRef(pub u32);

/// Symbol visibility of a function or global.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Linkage {
    Private,
    External,
}

/// What kind of symbol a function entry describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionKind {
    /// Has a body in this module.
    Defined,
    /// External symbol resolved at link time.
    Declaration,
    /// Compiler-known intrinsic (no body, never lowered to a plain call).
    Intrinsic,
}

/// A function signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub params: Vec<Ty>,
    pub ret: Ty,
    pub variadic: bool,
}

impl Signature {
    pub fn new(params: Vec<Ty>, ret: Ty) -> Self {
        Self {
            params,
            ret,
            variadic: false,
        }
    }

    pub fn variadic(params: Vec<Ty>, ret: Ty) -> Self {
        Self {
            params,
            ret,
            variadic: true,
        }
    }
}

/// An operand of an instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// An SSA value defined by a parameter or instruction.
    Value(ValueId),
    /// An integer constant of the given width. The payload holds the low
    /// 64 bits; wider constants are already truncated by construction.
    ConstInt { bits: u32, value: u64 },
    /// A float constant stored as its bit pattern.
    ConstFloat { ty: Ty, bits: u64 },
    /// The null pointer.
    NullPtr,
    /// The address of a function.
    FunctionAddr(FuncRef),
    /// The address of a non-entry basic block.
    BlockAddr { func: FuncRef, block: BlockRef },
    /// The address of a global variable.
    GlobalAddr(GlobalRef),
}

impl Operand {
    pub fn const_i32(value: u32) -> Self {
        Operand::ConstInt {
            bits: 32,
            value: u64::from(value),
        }
    }

    pub fn const_i64(value: u64) -> Self {
        Operand::ConstInt { bits: 64, value }
    }

    pub fn const_bool(value: bool) -> Self {
        Operand::ConstInt {
            bits: 1,
            value: u64::from(value),
        }
    }

    pub fn const_f64(value: f64) -> Self {
        Operand::ConstFloat {
            ty: Ty::F64,
            bits: value.to_bits(),
        }
    }

    pub fn const_f32(value: f32) -> Self {
        Operand::ConstFloat {
            ty: Ty::F32,
            bits: u64::from(value.to_bits()),
        }
    }
}

/// The target of a call.
#[derive(Debug, Clone, PartialEq)]
pub enum Callee {
    /// Direct call to a module function (defined, declared, or intrinsic).
    Function(FuncRef),
    /// Indirect call through a pointer value.
    Indirect(Operand),
}

/// Two-operand integer/float arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    And,
    Or,
    Xor,
}

/// Integer comparison predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IcmpPred {
    Eq,
    Ne,
    Slt,
    Sle,
    Sgt,
    Sge,
    Ult,
    Ule,
    Ugt,
    Uge,
}

/// An IR instruction. Terminators (`Br`, `CondBr`, `Ret`) end a block.
#[derive(Debug, Clone, PartialEq)]
pub enum Inst {
    /// Stack slot allocation; yields a pointer.
    Alloca { dest: ValueId, ty: Ty },
    /// Load a value of `ty` from `addr`.
    Load {
        dest: ValueId,
        ty: Ty,
        addr: Operand,
    },
    /// Store `value` to `addr`.
    Store { value: Operand, addr: Operand },
    /// Binary arithmetic on operands of the destination's type.
    Binary {
        dest: ValueId,
        op: BinOp,
        lhs: Operand,
        rhs: Operand,
    },
    /// Integer comparison; yields an `i1`.
    Icmp {
        dest: ValueId,
        pred: IcmpPred,
        lhs: Operand,
        rhs: Operand,
    },
    /// Choose between two operands on an `i1` condition.
    Select {
        dest: ValueId,
        cond: Operand,
        on_true: Operand,
        on_false: Operand,
    },
    /// Pointer-to-integer conversion; destination type fixes the width.
    PtrToInt { dest: ValueId, value: Operand },
    /// Zero extension to the destination's integer type.
    ZExt { dest: ValueId, value: Operand },
    /// Truncation to the destination's integer type.
    Trunc { dest: ValueId, value: Operand },
    /// Same-width reinterpretation to the destination's type.
    BitCast { dest: ValueId, value: Operand },
    /// Direct, indirect, or intrinsic call.
    Call {
        dest: Option<ValueId>,
        callee: Callee,
        args: Vec<Operand>,
    },
    /// An inline assembly statement.
    Asm { template: String, sideeffect: bool },
    /// Unconditional branch.
    Br { target: BlockRef },
    /// Conditional branch: `iftrue` when `cond` is 1, `iffalse` otherwise.
    CondBr {
        cond: Operand,
        iftrue: BlockRef,
        iffalse: BlockRef,
    },
    /// Function return.
    Ret { value: Option<Operand> },
}

impl Inst {
    pub fn is_terminator(&self) -> bool {
        matches!(self, Inst::Br { .. } | Inst::CondBr { .. } | Inst::Ret { .. })
    }
}

/// A basic block: a name and an instruction list ending in a terminator.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Block {
    pub name: Option<String>,
    pub insts: Vec<Inst>,
}

impl Block {
    /// Display name, defaulting to `bb_<id>` for unnamed blocks.
    pub fn display_name(&self, id: u32) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => format!("bb_{id}"),
        }
    }

    /// The block's terminator, if the block is complete.
    pub fn terminator(&self) -> Option<&Inst> {
        self.insts.last().filter(|inst| inst.is_terminator())
    }

    /// Successor blocks in `{true, false}` order for conditional branches.
    pub fn successors(&self) -> Vec<BlockRef> {
        match self.terminator() {
            Some(Inst::Br { target }) => vec![*target],
            Some(Inst::CondBr {
                iftrue, iffalse, ..
            }) => vec![*iftrue, *iffalse],
            _ => Vec::new(),
        }
    }
}

/// A function: symbol facts plus (for defined functions) blocks and values.
#[derive(Debug, Clone)]
pub struct Function {
    pub name: String,
    pub kind: FunctionKind,
    pub linkage: Linkage,
    pub sig: Signature,
    /// SSA values bound to the signature parameters, in order.
    pub params: Vec<ValueId>,
    /// Blocks in layout order; index 0 is the entry block.
    pub blocks: Vec<Block>,
    value_tys: Vec<Ty>,
}

impl Function {
    /// A body-less external function.
    pub fn declaration(name: impl Into<String>, sig: Signature) -> Self {
        Self {
            name: name.into(),
            kind: FunctionKind::Declaration,
            linkage: Linkage::External,
            sig,
            params: Vec::new(),
            blocks: Vec::new(),
            value_tys: Vec::new(),
        }
    }

    /// A compiler-known intrinsic.
    pub fn intrinsic(name: impl Into<String>, sig: Signature) -> Self {
        Self {
            kind: FunctionKind::Intrinsic,
            ..Self::declaration(name, sig)
        }
    }

    pub fn is_defined(&self) -> bool {
        matches!(self.kind, FunctionKind::Defined)
    }

    pub fn entry(&self) -> BlockRef {
        BlockRef(0)
    }

    pub fn block(&self, block: BlockRef) -> &Block {
        &self.blocks[block.0 as usize]
    }

    /// Allocate a fresh SSA value of type `ty`.
    pub fn new_value(&mut self, ty: Ty) -> ValueId {
        let id = ValueId(self.value_tys.len() as u32);
        self.value_tys.push(ty);
        id
    }

    pub fn value_ty(&self, value: ValueId) -> &Ty {
        &self.value_tys[value.0 as usize]
    }

    /// The type an operand evaluates to.
    pub fn operand_ty(&self, op: &Operand) -> Ty {
        match op {
            Operand::Value(v) => self.value_ty(*v).clone(),
            Operand::ConstInt { bits, .. } => Ty::Int(*bits),
            Operand::ConstFloat { ty, .. } => ty.clone(),
            Operand::NullPtr
            | Operand::FunctionAddr(_)
            | Operand::BlockAddr { .. }
            | Operand::GlobalAddr(_) => Ty::Ptr,
        }
    }
}

/// A compile-time constant used as a global initializer.
#[derive(Debug, Clone, PartialEq)]
pub enum Const {
    Int { bits: u32, value: u64 },
    /// A byte string emitted with a trailing NUL.
    CString(String),
    Struct(Vec<Const>),
    Array(Vec<Const>),
    FunctionAddr(FuncRef),
    BlockAddr { func: FuncRef, block: BlockRef },
    /// A pointer constant reinterpreted as an integer of the given width.
    PtrToInt { value: Box<Const>, bits: u32 },
}

/// A global variable definition.
#[derive(Debug, Clone, PartialEq)]
pub struct Global {
    pub name: String,
    pub linkage: Linkage,
    pub is_constant: bool,
    pub init: Const,
    /// Object-file section override, if any.
    pub section: Option<String>,
    /// Alignment in bytes.
    pub align: u64,
    /// Keep through link-time dead-stripping.
    pub retained: bool,
    pub unnamed_addr: bool,
}

/// One entry of the platform global-ctor/dtor arrays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InitEntry {
    pub priority: u32,
    pub func: FuncRef,
}

/// A translation unit: identifier, layout, functions, globals, initializers.
#[derive(Debug)]
pub struct Module {
    /// Stable identifier; used as the descriptor file's base name.
    pub id: String,
    pub data_layout: DataLayout,
    pub functions: Vec<Function>,
    pub globals: Vec<Global>,
    pub ctors: Vec<InitEntry>,
    pub dtors: Vec<InitEntry>,
}

impl Module {
    pub fn new(id: impl Into<String>) -> Self {
        Self::with_layout(id, DataLayout::default())
    }

    pub fn with_layout(id: impl Into<String>, data_layout: DataLayout) -> Self {
        Self {
            id: id.into(),
            data_layout,
            functions: Vec::new(),
            globals: Vec::new(),
            ctors: Vec::new(),
            dtors: Vec::new(),
        }
    }

    pub fn add_function(&mut self, func: Function) -> FuncRef {
        let r = FuncRef(self.functions.len() as u32);
        self.functions.push(func);
        r
    }

    pub fn function(&self, func: FuncRef) -> &Function {
        &self.functions[func.0 as usize]
    }

    pub fn find_function(&self, name: &str) -> Option<FuncRef> {
        self.functions
            .iter()
            .position(|f| f.name == name)
            .map(|i| FuncRef(i as u32))
    }

    /// Return the named function, declaring it if absent. Idempotent.
    pub fn get_or_insert_function(
        &mut self,
        name: &str,
        sig: Signature,
        kind: FunctionKind,
    ) -> FuncRef {
        if let Some(existing) = self.find_function(name) {
            return existing;
        }
        let func = match kind {
            FunctionKind::Intrinsic => Function::intrinsic(name, sig),
            _ => Function::declaration(name, sig),
        };
        self.add_function(func)
    }

    pub fn add_global(&mut self, global: Global) -> GlobalRef {
        let r = GlobalRef(self.globals.len() as u32);
        self.globals.push(global);
        r
    }

    pub fn global(&self, global: GlobalRef) -> &Global {
        &self.globals[global.0 as usize]
    }

    pub fn find_global(&self, name: &str) -> Option<&Global> {
        self.globals.iter().find(|g| g.name == name)
    }

    /// Register `func` in the global-constructor array.
    pub fn append_ctor(&mut self, func: FuncRef, priority: u32) {
        self.ctors.push(InitEntry { priority, func });
    }

    /// Register `func` in the global-destructor array.
    pub fn append_dtor(&mut self, func: FuncRef, priority: u32) {
        self.dtors.push(InitEntry { priority, func });
    }
}
