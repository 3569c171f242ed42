//! The runtime hook ABI the injected calls target.
//!
//! Every hook is an external C-linkage symbol carrying the reserved
//! `__bbtrace_` prefix; the event-logger runtime resolves them at link time.
//! Declarations are idempotent, so re-running the pass (or instrumenting a
//! module that already references a hook) never duplicates symbols.

use crate::ir::{FuncRef, FunctionKind, Module, Signature, Ty};

/// Reserved name prefix. No eligible user function may start with this.
pub const RUNTIME_PREFIX: &str = "__bbtrace_";

/// `register_module(module_name: cstring)`, called from the injected ctor.
pub const REGISTER_MODULE: &str = "__bbtrace_register_module";
/// `finalize()`, called from the injected dtor.
pub const FINALIZE: &str = "__bbtrace_finalize";
/// `on_basic_block(func_id, bb_id, loop_hint, bb_addr)`.
pub const ON_BASIC_BLOCK: &str = "__bbtrace_on_basic_block";
/// `on_loop(func_id, loop_id)`, loop headers only.
pub const ON_LOOP: &str = "__bbtrace_on_loop";
/// `on_mem(func_id, bb_id, inst_id, addr, size, is_store)`.
pub const ON_MEM: &str = "__bbtrace_on_mem";
/// `on_branch(func_id, bb_id, inst_id, taken_bb, taken_addr)`.
pub const ON_BRANCH: &str = "__bbtrace_on_branch";
/// `on_call(func_id, bb_id, inst_id, call_site, target, num_args, ...)`.
pub const ON_CALL: &str = "__bbtrace_on_call";

/// The return-address intrinsic used to materialize call-site addresses.
pub const RETURN_ADDRESS: &str = "returnaddress";

/// Whether `name` is reserved for the runtime.
pub fn is_runtime_name(name: &str) -> bool {
    name.starts_with(RUNTIME_PREFIX)
}

/// Hook declarations resolved to function references, declared once per run.
#[derive(Debug, Clone, Copy)]
pub struct HookSet {
    pub on_basic_block: FuncRef,
    pub on_loop: FuncRef,
    pub on_mem: FuncRef,
    pub on_branch: FuncRef,
    pub on_call: FuncRef,
    pub return_address: FuncRef,
}

impl HookSet {
    /// Declare every per-block/per-instruction hook in `module`.
    pub fn declare(module: &mut Module) -> Self {
        let i32t = || Ty::Int(32);
        let on_basic_block = module.get_or_insert_function(
            ON_BASIC_BLOCK,
            Signature::new(vec![i32t(), i32t(), i32t(), Ty::Ptr], Ty::Void),
            FunctionKind::Declaration,
        );
        let on_loop = module.get_or_insert_function(
            ON_LOOP,
            Signature::new(vec![i32t(), i32t()], Ty::Void),
            FunctionKind::Declaration,
        );
        let on_mem = module.get_or_insert_function(
            ON_MEM,
            Signature::new(
                vec![i32t(), i32t(), i32t(), Ty::Ptr, Ty::Int(64), Ty::Int(1)],
                Ty::Void,
            ),
            FunctionKind::Declaration,
        );
        let on_branch = module.get_or_insert_function(
            ON_BRANCH,
            Signature::new(vec![i32t(), i32t(), i32t(), i32t(), Ty::Ptr], Ty::Void),
            FunctionKind::Declaration,
        );
        let on_call = module.get_or_insert_function(
            ON_CALL,
            Signature::variadic(
                vec![i32t(), i32t(), i32t(), Ty::Ptr, Ty::Ptr, i32t()],
                Ty::Void,
            ),
            FunctionKind::Declaration,
        );
        let return_address = module.get_or_insert_function(
            RETURN_ADDRESS,
            Signature::new(vec![i32t()], Ty::Ptr),
            FunctionKind::Intrinsic,
        );
        Self {
            on_basic_block,
            on_loop,
            on_mem,
            on_branch,
            on_call,
            return_address,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_name_detection() {
        assert!(is_runtime_name("__bbtrace_on_mem"));
        assert!(is_runtime_name("__bbtrace_helper"));
        assert!(!is_runtime_name("bbtrace"));
        assert!(!is_runtime_name("_bbtrace_on_mem"));
    }

    #[test]
    fn test_declare_is_idempotent() {
        let mut module = Module::new("unit.ir");
        let first = HookSet::declare(&mut module);
        let count = module.functions.len();
        let second = HookSet::declare(&mut module);
        assert_eq!(module.functions.len(), count);
        assert_eq!(first.on_call, second.on_call);
        assert!(module
            .function(first.on_call)
            .sig
            .variadic);
        assert_eq!(
            module.function(first.return_address).kind,
            FunctionKind::Intrinsic
        );
    }
}
