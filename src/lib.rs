//! Basic-block instrumentation for trace-driven simulators and profilers.
//!
//! The `bb-trace` pass rewrites an IR module so that execution emits a
//! time-ordered event stream at basic-block granularity, and embeds the
//! address maps a consumer needs to reverse observed program counters back
//! to `(func_id, bb_id, inst_id)` tuples:
//!
//! - dense, deterministic ids for every eligible function and block;
//! - runtime hook calls (`__bbtrace_*`) for block entries, loop headers,
//!   loads/stores, branches (with the taken target materialized at the
//!   branch site), and call sites with marshalled arguments;
//! - a JSONL static descriptor listing every block's instructions;
//! - a `.bbtrace_map` section mapping blocks to their entry addresses;
//! - `.bbtrace_inst` records mapping instrumented instructions to exact
//!   post-link PCs via inline-asm local labels.
//!
//! # Example
//!
//! ```no_run
//! use bbtrace::ir::{FunctionBuilder, Module, Signature, Ty};
//! use bbtrace::{BasicBlockTracePass, Mode};
//!
//! let mut module = Module::new("demo/kernel.ir");
//! let mut b = FunctionBuilder::new("f", Signature::new(vec![Ty::Ptr], Ty::Int(32)));
//! let v = b.load(Ty::Int(32), b.param(0));
//! b.ret(Some(v));
//! module.add_function(b.finish());
//!
//! let mut pass = BasicBlockTracePass::with_mode(Mode::StaticOnly);
//! let outcome = pass.run(&mut module);
//! assert!(outcome.modified);
//! ```

pub mod errors;
pub mod instrument;
pub mod ir;
pub mod pipeline;

pub use errors::{Diagnostic, EmitError, Severity};
pub use instrument::{
    static_only_mode, BasicBlockTracePass, Mode, PassOutcome, INVALID_LOOP_ID, STATIC_ONLY_VAR,
};
pub use pipeline::{ModulePass, PassPipeline, PipelineError};
