//! End-to-end AArch64 pipeline tests.

use talus::aarch64::{self, A64Inst};
use talus::ir::{ArithOp, DataType, FunctionBuilder, Inst, IntCond, Module, Operand};
use talus::mir::{MFunction, MirInst};
use talus::target::InstrAdapter;

fn compile(module: &Module) -> String {
    let mut out = Vec::new();
    talus::compile_ir_to_target_assembly(module, "aarch64", &mut out).unwrap();
    String::from_utf8(out).unwrap()
}

fn single_function(module: Module) -> MFunction<A64Inst> {
    aarch64::lower_module(&module)
        .unwrap()
        .functions
        .into_iter()
        .next()
        .unwrap()
}

fn assert_fully_lowered(func: &MFunction<A64Inst>) {
    let adapter = aarch64::A64Adapter;
    for block in func.blocks.values() {
        for inst in &block.insts {
            assert!(
                matches!(inst, MirInst::Target(_)),
                "pseudo instruction survived: {:?}",
                inst
            );
            for r in adapter
                .enum_uses(inst)
                .into_iter()
                .chain(adapter.enum_defs(inst))
            {
                assert!(!r.is_virtual, "virtual register survived: {}", r);
            }
        }
    }
}

#[test]
fn test_add_and_return_leaf() {
    let mut module = Module::new();
    module.add_function(
        FunctionBuilder::new("f")
            .param(0, DataType::I32)
            .param(1, DataType::I32)
            .returns(DataType::I32)
            .block(0)
            .inst(Inst::Binary {
                op: ArithOp::Add,
                ty: DataType::I32,
                res: 2,
                lhs: Operand::Reg(0),
                rhs: Operand::Reg(1),
            })
            .inst(Inst::Ret {
                ty: Some(DataType::I32),
                value: Some(Operand::Reg(2)),
            })
            .build(),
    );

    let func = single_function(module.clone());
    assert_fully_lowered(&func);
    assert_eq!(func.stack_size, 0);

    let asm = compile(&module);
    assert!(asm.contains("add w"), "32-bit add on w views:\n{}", asm);
    assert!(asm.contains("\n    ret"));
    assert!(!asm.contains("sub sp"), "no prologue on a leaf:\n{}", asm);
}

#[test]
fn test_mod_lowering() {
    let mut module = Module::new();
    module.add_function(
        FunctionBuilder::new("rem")
            .param(0, DataType::I32)
            .param(1, DataType::I32)
            .returns(DataType::I32)
            .block(0)
            .inst(Inst::Binary {
                op: ArithOp::Mod,
                ty: DataType::I32,
                res: 2,
                lhs: Operand::Reg(0),
                rhs: Operand::Reg(1),
            })
            .inst(Inst::Ret {
                ty: Some(DataType::I32),
                value: Some(Operand::Reg(2)),
            })
            .build(),
    );

    let asm = compile(&module);
    assert!(asm.contains("sdiv"));
    assert!(asm.contains("msub"));
}

#[test]
fn test_call_saves_lr_and_passes_stack_args() {
    let mut module = Module::new();
    let args: Vec<(Operand, DataType)> = (0..9)
        .map(|i| (Operand::ImmI32(i), DataType::I32))
        .collect();
    module.add_function(
        FunctionBuilder::new("caller")
            .returns(DataType::I32)
            .block(0)
            .inst(Inst::Call {
                res: Some(10),
                ret_ty: Some(DataType::I32),
                callee: "sink".to_string(),
                args,
            })
            .inst(Inst::Ret {
                ty: Some(DataType::I32),
                value: Some(Operand::Reg(10)),
            })
            .build(),
    );

    let func = single_function(module.clone());
    assert_fully_lowered(&func);
    assert!(func.frame.outgoing_args_size() >= 8);
    assert_eq!(func.stack_size % 16, 0);

    let asm = compile(&module);
    assert!(asm.contains("bl sink"));
    assert!(asm.contains("str x30"), "lr saved:\n{}", asm);
    assert!(asm.contains("ldr x30"), "lr restored:\n{}", asm);
    assert!(asm.contains("str w"), "ninth argument stored:\n{}", asm);
    assert!(asm.contains("[sp]"), "at the frame bottom:\n{}", asm);
}

#[test]
fn test_branching_uses_cond_codes() {
    let mut module = Module::new();
    module.add_function(
        FunctionBuilder::new("max")
            .param(0, DataType::I32)
            .param(1, DataType::I32)
            .returns(DataType::I32)
            .block(0)
            .inst(Inst::Icmp {
                cond: IntCond::Sgt,
                res: 2,
                lhs: Operand::Reg(0),
                rhs: Operand::Reg(1),
            })
            .inst(Inst::BrCond {
                cond: Operand::Reg(2),
                if_true: 1,
                if_false: 2,
            })
            .block(1)
            .inst(Inst::Ret {
                ty: Some(DataType::I32),
                value: Some(Operand::Reg(0)),
            })
            .block(2)
            .inst(Inst::Ret {
                ty: Some(DataType::I32),
                value: Some(Operand::Reg(1)),
            })
            .build(),
    );

    let asm = compile(&module);
    assert!(asm.contains("cmp"));
    assert!(asm.contains("cset"), "compare materialized as 0/1:\n{}", asm);
    assert!(asm.contains("b.ne"), "condition branch:\n{}", asm);
    assert!(asm.contains("b .Lmax_2"), "fallthrough branch:\n{}", asm);
}

#[test]
fn test_alloca_and_global_addressing() {
    let mut module = Module::new();
    module.add_global(talus::ir::GlobalVar::new("g", DataType::I32).with_words(vec![3]));
    module.add_function(
        FunctionBuilder::new("f")
            .returns(DataType::I32)
            .block(0)
            .inst(Inst::Alloca {
                res: 0,
                ty: DataType::I32,
                count: 1,
            })
            .inst(Inst::Load {
                res: 1,
                ty: DataType::I32,
                ptr: Operand::Global("g".to_string()),
            })
            .inst(Inst::Store {
                ty: DataType::I32,
                val: Operand::Reg(1),
                ptr: Operand::Reg(0),
            })
            .inst(Inst::Load {
                res: 2,
                ty: DataType::I32,
                ptr: Operand::Reg(0),
            })
            .inst(Inst::Ret {
                ty: Some(DataType::I32),
                value: Some(Operand::Reg(2)),
            })
            .build(),
    );

    let asm = compile(&module);
    assert!(asm.contains("adrp"), "global address via adrp:\n{}", asm);
    assert!(asm.contains(":lo12:g"), "low bits added:\n{}", asm);
    assert!(asm.contains("str w"), "store to the local slot:\n{}", asm);
    assert!(asm.contains(".word 3"));
}

#[test]
fn test_large_constants_via_movz_movk() {
    let mut module = Module::new();
    module.add_function(
        FunctionBuilder::new("big")
            .returns(DataType::I32)
            .block(0)
            .inst(Inst::Ret {
                ty: Some(DataType::I32),
                value: Some(Operand::ImmI32(0x12345678)),
            })
            .build(),
    );

    let asm = compile(&module);
    assert!(asm.contains("movz"), "asm:\n{}", asm);
    assert!(asm.contains("movk"), "asm:\n{}", asm);
    assert!(asm.contains("lsl #16"), "asm:\n{}", asm);
}

#[test]
fn test_float_param_and_conversion() {
    let mut module = Module::new();
    module.add_function(
        FunctionBuilder::new("trunc")
            .param(0, DataType::F32)
            .returns(DataType::I32)
            .block(0)
            .inst(Inst::Fptosi {
                res: 1,
                to: DataType::I32,
                src: Operand::Reg(0),
            })
            .inst(Inst::Ret {
                ty: Some(DataType::I32),
                value: Some(Operand::Reg(1)),
            })
            .build(),
    );

    let asm = compile(&module);
    assert!(asm.contains("fcvtzs"), "asm:\n{}", asm);
    assert!(asm.contains("fmov"), "param copy out of s0:\n{}", asm);
}
