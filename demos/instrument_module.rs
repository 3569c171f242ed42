// Example: instrumenting a module at basic-block granularity
//
// Builds a small module with a loop, memory traffic, and a call, runs the
// bb-trace pass over it, and prints the artifacts a consumer would align
// against: the JSONL descriptor, the PC map rows, and the inst-PC records.
//
// Run with: cargo run --example instrument_module

use bbtrace::instrument::{instpc, pcmap};
use bbtrace::ir::{
    BinOp, Const, FunctionBuilder, FunctionKind, IcmpPred, Inst, Module, Operand, Signature, Ty,
};
use bbtrace::PassPipeline;
use std::fs;

fn build_demo_module(module_id: &str) -> Module {
    let mut module = Module::new(module_id);

    let sink = module.get_or_insert_function(
        "sink",
        Signature::new(vec![Ty::Int(64), Ty::F64], Ty::Void),
        FunctionKind::Declaration,
    );

    // sum_and_report(ptr data, i64 len):
    //   walks `data`, accumulates, and hands the total to `sink`.
    let mut b = FunctionBuilder::new(
        "sum_and_report",
        Signature::new(vec![Ty::Ptr, Ty::Int(64)], Ty::Void),
    );
    let header = b.add_block("header");
    let body = b.add_block("body");
    let exit = b.add_block("exit");

    let idx_slot = b.alloca(Ty::Int(64));
    let total_slot = b.alloca(Ty::Int(64));
    b.store(Operand::const_i64(0), idx_slot.clone());
    b.store(Operand::const_i64(0), total_slot.clone());
    b.br(header);

    b.switch_to(header);
    let idx = b.load(Ty::Int(64), idx_slot.clone());
    let more = b.icmp(IcmpPred::Slt, idx, b.param(1));
    b.cond_br(more, body, exit);

    b.switch_to(body);
    let value = b.load(Ty::Int(64), b.param(0));
    let running = b.load(Ty::Int(64), total_slot.clone());
    let next = b.binary(BinOp::Add, Ty::Int(64), running, value);
    b.store(next, total_slot.clone());
    let idx = b.load(Ty::Int(64), idx_slot.clone());
    let bumped = b.binary(BinOp::Add, Ty::Int(64), idx, Operand::const_i64(1));
    b.store(bumped, idx_slot);
    b.br(header);

    b.switch_to(exit);
    let total = b.load(Ty::Int(64), total_slot);
    b.call_direct(sink, Ty::Void, vec![total, Operand::const_f64(1.5)]);
    b.ret(None);

    module.add_function(b.finish());
    module
}

fn main() {
    let module_id = std::env::temp_dir()
        .join("bbtrace-demo")
        .join("demo.ir")
        .to_string_lossy()
        .into_owned();
    let mut module = build_demo_module(&module_id);

    let mut pipeline = PassPipeline::parse("bb-trace").expect("bb-trace is registered");
    let outcome = pipeline.run(&mut module);
    println!("modified: {}", outcome.modified);
    for diagnostic in &outcome.diagnostics {
        println!("{diagnostic}");
    }

    if let Some(path) = &outcome.descriptor {
        println!("\n=== descriptor ({}) ===", path.display());
        print!("{}", fs::read_to_string(path).expect("descriptor readable"));
    }

    println!("\n=== {} ===", pcmap::PCMAP_SECTION);
    if let Some(global) = module.find_global(pcmap::PCMAP_GLOBAL) {
        if let Const::Array(rows) = &global.init {
            println!("{} entries, align {}", rows.len(), global.align);
        }
    }

    println!("\n=== {} sites ===", instpc::INSTPC_SECTION);
    for func in module.functions.iter().filter(|f| f.is_defined()) {
        for block in &func.blocks {
            for inst in &block.insts {
                if let Inst::Asm { template, .. } = inst {
                    if let Some((f, bb, i)) = instpc::parse_template(template) {
                        println!("func {f} bb {bb} inst {i}");
                    }
                }
            }
        }
    }
}
