//! The `bb-trace` instrumentation pass.
//!
//! The pass walks a module once, assigning each eligible function a dense
//! `func_id` (declaration order) and each of its blocks a dense `bb_id`
//! (layout order), then rewrites the IR so that execution emits a
//! time-ordered event stream through the runtime hook ABI. Alongside the
//! rewrite it produces the static artifacts consumers align against: the
//! JSONL block descriptor, the `.bbtrace_map` PC map, and `.bbtrace_inst`
//! instruction PC records.
//!
//! Eligibility: functions with a body whose name does not start with
//! `__bbtrace_`. Intrinsic calls, inline asm, and runtime calls are never
//! instrumented and never consume ids.
//!
//! Two modes: *instrumented* (default) mutates the IR; *static-only*
//! (`BBTRACE_STATIC_ONLY=1`) skips ctor/dtor registration and every hook
//! call but still allocates ids, emits the descriptor and PC map
//! byte-identically, and keeps the `.bbtrace_inst` asm records so the two
//! builds stay comparable.

pub mod descriptor;
pub mod hooks;
pub mod instpc;
pub mod loops;
pub mod marshal;
pub mod pcmap;

use std::env;
use std::mem;
use std::path::PathBuf;

use indexmap::IndexMap;
use lazy_static::lazy_static;

use crate::errors::Diagnostic;
use crate::ir::display::inst_text;
use crate::ir::{
    BlockRef, Callee, Const, FuncRef, Function, FunctionBuilder, FunctionKind, Global, Inst,
    Linkage, Module, Operand, Signature, Ty,
};
use descriptor::{BlockRecord, InstKind, InstRecord};
use hooks::{is_runtime_name, HookSet, FINALIZE, REGISTER_MODULE};
use loops::{LoopForest, LoopRef};
use marshal::marshal_arg;
use pcmap::{BlockAddress, PcMapEntry};

/// Loop hint for blocks outside any loop.
pub const INVALID_LOOP_ID: u32 = u32::MAX;

/// Environment variable selecting static-only mode.
pub const STATIC_ONLY_VAR: &str = "BBTRACE_STATIC_ONLY";

/// Symbol name of the private module-name string global.
pub const MODULE_NAME_GLOBAL: &str = "__bbtrace_module_name";

lazy_static! {
    // Captured once per process; later environment changes are ignored.
    static ref STATIC_ONLY_FLAG: bool = match env::var(STATIC_ONLY_VAR) {
        Ok(value) => matches!(value.chars().next(), Some('1' | 'T' | 't' | 'Y' | 'y')),
        Err(_) => false,
    };
}

/// Whether the process environment selects static-only mode.
pub fn static_only_mode() -> bool {
    *STATIC_ONLY_FLAG
}

/// Operating mode of the pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Full IR mutation and hook emission.
    Instrumented,
    /// Artifact emission only; produces a layout-matched reference build.
    StaticOnly,
}

/// What a pass run did to the module.
#[derive(Debug)]
pub struct PassOutcome {
    /// Whether downstream passes must treat the IR as rewritten.
    pub modified: bool,
    /// Path of the descriptor file, when one was written.
    pub descriptor: Option<PathBuf>,
    /// Recoverable problems (descriptor I/O); never fatal.
    pub diagnostics: Vec<Diagnostic>,
}

impl PassOutcome {
    pub(crate) fn merge(&mut self, other: PassOutcome) {
        self.modified |= other.modified;
        if other.descriptor.is_some() {
            self.descriptor = other.descriptor;
        }
        self.diagnostics.extend(other.diagnostics);
    }

    pub(crate) fn unchanged() -> Self {
        Self {
            modified: false,
            descriptor: None,
            diagnostics: Vec::new(),
        }
    }
}

/// The module-level instrumentation pass. Registered as `bb-trace`.
#[derive(Debug)]
pub struct BasicBlockTracePass {
    mode: Mode,
}

impl Default for BasicBlockTracePass {
    fn default() -> Self {
        Self::new()
    }
}

impl BasicBlockTracePass {
    /// Mode is taken from the (memoized) process environment.
    pub fn new() -> Self {
        let mode = if static_only_mode() {
            Mode::StaticOnly
        } else {
            Mode::Instrumented
        };
        Self { mode }
    }

    /// Explicit mode, bypassing the environment. Embedders and tests.
    pub fn with_mode(mode: Mode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Run the pass over `module`.
    pub fn run(&mut self, module: &mut Module) -> PassOutcome {
        let instrumenting = self.mode == Mode::Instrumented;
        let mut diagnostics = Vec::new();

        if instrumenting {
            ensure_ctor_dtor(module);
        }
        let hooks = instrumenting.then(|| HookSet::declare(module));

        let mut records = Vec::new();
        let mut pc_entries = Vec::new();
        let mut next_func_id = 0u32;

        for index in 0..module.functions.len() {
            {
                let f = &module.functions[index];
                if !f.is_defined() || is_runtime_name(&f.name) {
                    continue;
                }
            }
            let func_id = next_func_id;
            next_func_id += 1;

            // Swap the function out so the walker can read the rest of the
            // module (callee names and kinds) while mutating it. The
            // placeholder keeps the name so self-recursive calls still
            // print and classify correctly.
            let placeholder = Function::declaration(
                module.functions[index].name.clone(),
                module.functions[index].sig.clone(),
            );
            let mut func = mem::replace(&mut module.functions[index], placeholder);
            instrument_function(
                &mut func,
                module,
                FuncRef(index as u32),
                func_id,
                hooks.as_ref(),
                &mut records,
                &mut pc_entries,
            );
            module.functions[index] = func;
        }

        let descriptor = match descriptor::write_descriptor(&module.id, &records) {
            Ok(path) => path,
            Err(err) => {
                diagnostics.push(Diagnostic::warning(err.to_string()));
                None
            }
        };
        pcmap::append_pc_map(module, &pc_entries);

        PassOutcome {
            modified: true,
            descriptor,
            diagnostics,
        }
    }
}

/// Register the module ctor/dtor pair calling into the runtime.
fn ensure_ctor_dtor(module: &mut Module) {
    let register = module.get_or_insert_function(
        REGISTER_MODULE,
        Signature::new(vec![Ty::Ptr], Ty::Void),
        FunctionKind::Declaration,
    );
    let finalize = module.get_or_insert_function(
        FINALIZE,
        Signature::new(vec![], Ty::Void),
        FunctionKind::Declaration,
    );

    let name_global = module.add_global(Global {
        name: MODULE_NAME_GLOBAL.to_string(),
        linkage: Linkage::Private,
        is_constant: true,
        init: Const::CString(module.id.clone()),
        section: None,
        align: 1,
        retained: false,
        unnamed_addr: true,
    });

    let mut b = FunctionBuilder::new("__bbtrace_ctor", Signature::new(vec![], Ty::Void));
    b.call_direct(register, Ty::Void, vec![Operand::GlobalAddr(name_global)]);
    b.ret(None);
    let mut ctor = b.finish();
    ctor.linkage = Linkage::Private;
    let ctor_ref = module.add_function(ctor);
    module.append_ctor(ctor_ref, 0);

    let mut b = FunctionBuilder::new("__bbtrace_dtor", Signature::new(vec![], Ty::Void));
    b.call_direct(finalize, Ty::Void, vec![]);
    b.ret(None);
    let mut dtor = b.finish();
    dtor.linkage = Linkage::Private;
    let dtor_ref = module.add_function(dtor);
    module.append_dtor(dtor_ref, 0);
}

/// Whether a call site is exempt from instrumentation.
fn call_is_exempt(module: &Module, callee: &Callee) -> bool {
    match callee {
        Callee::Function(f) => {
            let target = module.function(*f);
            target.kind == FunctionKind::Intrinsic || is_runtime_name(&target.name)
        }
        Callee::Indirect(_) => false,
    }
}

fn hook_call(target: FuncRef, args: Vec<Operand>) -> Inst {
    Inst::Call {
        dest: None,
        callee: Callee::Function(target),
        args,
    }
}

/// Walk one function: allocate ids, collect records and PC entries, and
/// (in instrumented mode) rewrite its blocks.
fn instrument_function(
    func: &mut Function,
    module: &Module,
    self_ref: FuncRef,
    func_id: u32,
    hooks: Option<&HookSet>,
    records: &mut Vec<BlockRecord>,
    pc_entries: &mut Vec<PcMapEntry>,
) {
    let dl = module.data_layout;

    // Loop structure feeds hook arguments only, so static-only runs skip it.
    let forest = if hooks.is_some() {
        LoopForest::compute(func)
    } else {
        LoopForest::default()
    };

    // Dense loop ids: LIFO over the forest, outermost first, so ids come out
    // as a preorder in header layout order.
    let mut loop_ids: IndexMap<LoopRef, u32> = IndexMap::new();
    let mut stack: Vec<LoopRef> = forest.top_level().iter().rev().copied().collect();
    while let Some(l) = stack.pop() {
        let id = loop_ids.len() as u32;
        loop_ids.insert(l, id);
        stack.extend(forest.children(l).iter().rev());
    }

    let block_ids: IndexMap<BlockRef, u32> = (0..func.blocks.len())
        .map(|i| (BlockRef(i as u32), i as u32))
        .collect();

    let mut next_mem_id = 0u32;
    let mut next_branch_id = 0u32;
    let mut next_call_id = 0u32;

    for index in 0..func.blocks.len() {
        let block_ref = BlockRef(index as u32);
        let bb_id = block_ids[&block_ref];
        let bb_name = func.blocks[index].display_name(bb_id);

        pc_entries.push(PcMapEntry {
            func_id,
            bb_id,
            address: if index == 0 {
                BlockAddress::FunctionEntry(self_ref)
            } else {
                BlockAddress::Block {
                    func: self_ref,
                    block: block_ref,
                }
            },
        });

        let mut record = BlockRecord {
            func_id,
            func_name: func.name.clone(),
            bb_id,
            bb_name: bb_name.clone(),
            header: format!("{bb_name}:"),
            insts: Vec::new(),
        };

        let original = mem::take(&mut func.blocks[index].insts);
        let mut rewritten = Vec::with_capacity(original.len());

        if let Some(hooks) = hooks {
            let block_addr = if index == 0 {
                Operand::FunctionAddr(self_ref)
            } else {
                Operand::BlockAddr {
                    func: self_ref,
                    block: block_ref,
                }
            };
            let loop_hint = forest
                .innermost(block_ref)
                .and_then(|l| loop_ids.get(&l).copied())
                .unwrap_or(INVALID_LOOP_ID);
            if let Some(l) = forest.loop_with_header(block_ref) {
                rewritten.push(hook_call(
                    hooks.on_loop,
                    vec![
                        Operand::const_i32(func_id),
                        Operand::const_i32(loop_ids[&l]),
                    ],
                ));
            }
            rewritten.push(hook_call(
                hooks.on_basic_block,
                vec![
                    Operand::const_i32(func_id),
                    Operand::const_i32(bb_id),
                    Operand::const_i32(loop_hint),
                    block_addr,
                ],
            ));
        }

        for inst in original {
            let text = format!("  {}", inst_text(module, func, &inst));
            match inst {
                Inst::Load { dest, ty, addr } => {
                    let inst_id = next_mem_id;
                    next_mem_id += 1;
                    rewritten.push(instpc::record_asm(func_id, bb_id, inst_id));
                    if let Some(hooks) = hooks {
                        let size = dl.store_size(&ty);
                        rewritten.push(hook_call(
                            hooks.on_mem,
                            vec![
                                Operand::const_i32(func_id),
                                Operand::const_i32(bb_id),
                                Operand::const_i32(inst_id),
                                addr.clone(),
                                Operand::const_i64(size),
                                Operand::const_bool(false),
                            ],
                        ));
                    }
                    record.insts.push(InstRecord {
                        text,
                        kind: InstKind::Load,
                        inst_id: Some(inst_id),
                        targets: None,
                    });
                    rewritten.push(Inst::Load { dest, ty, addr });
                }
                Inst::Store { value, addr } => {
                    let inst_id = next_mem_id;
                    next_mem_id += 1;
                    rewritten.push(instpc::record_asm(func_id, bb_id, inst_id));
                    if let Some(hooks) = hooks {
                        let size = dl.store_size(&func.operand_ty(&value));
                        rewritten.push(hook_call(
                            hooks.on_mem,
                            vec![
                                Operand::const_i32(func_id),
                                Operand::const_i32(bb_id),
                                Operand::const_i32(inst_id),
                                addr.clone(),
                                Operand::const_i64(size),
                                Operand::const_bool(true),
                            ],
                        ));
                    }
                    record.insts.push(InstRecord {
                        text,
                        kind: InstKind::Store,
                        inst_id: Some(inst_id),
                        targets: None,
                    });
                    rewritten.push(Inst::Store { value, addr });
                }
                Inst::Br { target } => {
                    let inst_id = next_branch_id;
                    next_branch_id += 1;
                    let target_id = block_ids[&target];
                    if let Some(hooks) = hooks {
                        rewritten.push(hook_call(
                            hooks.on_branch,
                            vec![
                                Operand::const_i32(func_id),
                                Operand::const_i32(bb_id),
                                Operand::const_i32(inst_id),
                                Operand::const_i32(target_id),
                                Operand::BlockAddr {
                                    func: self_ref,
                                    block: target,
                                },
                            ],
                        ));
                    }
                    record.insts.push(InstRecord {
                        text,
                        kind: InstKind::Branch,
                        inst_id: Some(inst_id),
                        targets: Some(vec![target_id]),
                    });
                    rewritten.push(Inst::Br { target });
                }
                Inst::CondBr {
                    cond,
                    iftrue,
                    iffalse,
                } => {
                    let inst_id = next_branch_id;
                    next_branch_id += 1;
                    let true_id = block_ids[&iftrue];
                    let false_id = block_ids[&iffalse];
                    if let Some(hooks) = hooks {
                        // Materialize the taken target: successor 0 when the
                        // condition is true, successor 1 otherwise.
                        let taken = func.new_value(Ty::Int(32));
                        rewritten.push(Inst::Select {
                            dest: taken,
                            cond: cond.clone(),
                            on_true: Operand::const_i32(true_id),
                            on_false: Operand::const_i32(false_id),
                        });
                        let taken_addr = func.new_value(Ty::Ptr);
                        rewritten.push(Inst::Select {
                            dest: taken_addr,
                            cond: cond.clone(),
                            on_true: Operand::BlockAddr {
                                func: self_ref,
                                block: iftrue,
                            },
                            on_false: Operand::BlockAddr {
                                func: self_ref,
                                block: iffalse,
                            },
                        });
                        rewritten.push(hook_call(
                            hooks.on_branch,
                            vec![
                                Operand::const_i32(func_id),
                                Operand::const_i32(bb_id),
                                Operand::const_i32(inst_id),
                                Operand::Value(taken),
                                Operand::Value(taken_addr),
                            ],
                        ));
                    }
                    record.insts.push(InstRecord {
                        text,
                        kind: InstKind::Branch,
                        inst_id: Some(inst_id),
                        targets: Some(vec![true_id, false_id]),
                    });
                    rewritten.push(Inst::CondBr {
                        cond,
                        iftrue,
                        iffalse,
                    });
                }
                Inst::Call { dest, callee, args } if !call_is_exempt(module, &callee) => {
                    let inst_id = next_call_id;
                    next_call_id += 1;
                    rewritten.push(instpc::record_asm(func_id, bb_id, inst_id));
                    if let Some(hooks) = hooks {
                        let target = match &callee {
                            Callee::Function(f) => Operand::FunctionAddr(*f),
                            Callee::Indirect(op) => op.clone(),
                        };
                        let call_site = func.new_value(Ty::Ptr);
                        rewritten.push(Inst::Call {
                            dest: Some(call_site),
                            callee: Callee::Function(hooks.return_address),
                            args: vec![Operand::const_i32(0)],
                        });
                        let mut hook_args = vec![
                            Operand::const_i32(func_id),
                            Operand::const_i32(bb_id),
                            Operand::const_i32(inst_id),
                            Operand::Value(call_site),
                            target,
                            Operand::const_i32(args.len() as u32),
                        ];
                        for arg in &args {
                            let m = marshal_arg(func, &dl, arg, &mut rewritten);
                            hook_args.push(Operand::const_i32(m.kind.code()));
                            hook_args.push(Operand::const_i32(m.bits));
                            hook_args.push(m.value);
                        }
                        rewritten.push(hook_call(hooks.on_call, hook_args));
                    }
                    record.insts.push(InstRecord {
                        text,
                        kind: InstKind::Call,
                        inst_id: Some(inst_id),
                        targets: None,
                    });
                    rewritten.push(Inst::Call { dest, callee, args });
                }
                other => {
                    record.insts.push(InstRecord::generic(text));
                    rewritten.push(other);
                }
            }
        }

        func.blocks[index].insts = rewritten;
        records.push(record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::IcmpPred;

    fn loop_nest_function() -> Function {
        // entry -> a; a -> a_inner | b; a_inner -> a_inner | a; b -> b | exit
        let mut b = FunctionBuilder::new("nest", Signature::new(vec![Ty::Int(1)], Ty::Void));
        let a = b.add_block("a");
        let a_inner = b.add_block("a_inner");
        let bb = b.add_block("b");
        let exit = b.add_block("exit");
        b.br(a);
        b.switch_to(a);
        b.cond_br(b.param(0), a_inner, bb);
        b.switch_to(a_inner);
        b.cond_br(b.param(0), a_inner, a);
        b.switch_to(bb);
        b.cond_br(b.param(0), bb, exit);
        b.switch_to(exit);
        b.ret(None);
        b.finish()
    }

    #[test]
    fn test_loop_id_assignment_is_preorder() {
        let func = loop_nest_function();
        let forest = LoopForest::compute(&func);
        assert_eq!(forest.len(), 3);

        let mut loop_ids: IndexMap<LoopRef, u32> = IndexMap::new();
        let mut stack: Vec<LoopRef> = forest.top_level().iter().rev().copied().collect();
        while let Some(l) = stack.pop() {
            let id = loop_ids.len() as u32;
            loop_ids.insert(l, id);
            stack.extend(forest.children(l).iter().rev());
        }

        // Outer loop at block `a` first, its nested loop next, sibling last.
        let by_header: IndexMap<u32, u32> = loop_ids
            .iter()
            .map(|(l, id)| (forest.header(*l).0, *id))
            .collect();
        assert_eq!(by_header[&1], 0);
        assert_eq!(by_header[&2], 1);
        assert_eq!(by_header[&3], 2);
    }

    #[test]
    fn test_ctor_dtor_registration() {
        let mut module = Module::new("ctors.ir");
        ensure_ctor_dtor(&mut module);

        assert_eq!(module.ctors.len(), 1);
        assert_eq!(module.dtors.len(), 1);
        assert_eq!(module.ctors[0].priority, 0);
        assert_eq!(module.dtors[0].priority, 0);

        let ctor = module.function(module.ctors[0].func);
        assert_eq!(ctor.name, "__bbtrace_ctor");
        assert_eq!(ctor.linkage, Linkage::Private);
        assert!(ctor.is_defined());

        let name_global = module.find_global(MODULE_NAME_GLOBAL).unwrap();
        assert_eq!(name_global.init, Const::CString("ctors.ir".to_string()));
        assert_eq!(name_global.align, 1);
    }

    #[test]
    fn test_exemption_rules() {
        let mut module = Module::new("exempt.ir");
        let intrinsic = module.get_or_insert_function(
            "returnaddress",
            Signature::new(vec![Ty::Int(32)], Ty::Ptr),
            FunctionKind::Intrinsic,
        );
        let runtime = module.get_or_insert_function(
            "__bbtrace_helper",
            Signature::new(vec![], Ty::Void),
            FunctionKind::Declaration,
        );
        let plain = module.get_or_insert_function(
            "callee",
            Signature::new(vec![], Ty::Void),
            FunctionKind::Declaration,
        );

        assert!(call_is_exempt(&module, &Callee::Function(intrinsic)));
        assert!(call_is_exempt(&module, &Callee::Function(runtime)));
        assert!(!call_is_exempt(&module, &Callee::Function(plain)));
        assert!(!call_is_exempt(
            &module,
            &Callee::Indirect(Operand::NullPtr)
        ));
    }

    #[test]
    fn test_with_mode_bypasses_environment() {
        let pass = BasicBlockTracePass::with_mode(Mode::StaticOnly);
        assert_eq!(pass.mode(), Mode::StaticOnly);
        let pass = BasicBlockTracePass::with_mode(Mode::Instrumented);
        assert_eq!(pass.mode(), Mode::Instrumented);
    }

    #[test]
    fn test_icmp_feeds_branch_ids() {
        // A conditional on a computed i1 still allocates one branch id.
        let mut b = FunctionBuilder::new("c", Signature::new(vec![Ty::Int(32)], Ty::Void));
        let t = b.add_block("t");
        let f = b.add_block("f");
        let cond = b.icmp(IcmpPred::Eq, b.param(0), Operand::const_i32(0));
        b.cond_br(cond, t, f);
        b.switch_to(t);
        b.ret(None);
        b.switch_to(f);
        b.ret(None);
        let mut module = Module::new("cmp.ir");
        module.add_function(b.finish());

        let mut records = Vec::new();
        let mut pc_entries = Vec::new();
        let placeholder = Function::declaration("c", Signature::new(vec![Ty::Int(32)], Ty::Void));
        let mut func = mem::replace(&mut module.functions[0], placeholder);
        instrument_function(
            &mut func,
            &module,
            FuncRef(0),
            0,
            None,
            &mut records,
            &mut pc_entries,
        );
        module.functions[0] = func;

        let entry = &records[0];
        assert_eq!(entry.insts.len(), 2);
        assert_eq!(entry.insts[0].kind, InstKind::Generic);
        assert_eq!(entry.insts[1].kind, InstKind::Branch);
        assert_eq!(entry.insts[1].inst_id, Some(0));
        assert_eq!(entry.insts[1].targets, Some(vec![1, 2]));
    }
}
