//! AArch64 assembly emission.

use super::defs::{pr, A64Inst, A64Op};
use crate::error::{BackendError, Result};
use crate::ir::{GlobalInit, GlobalVar};
use crate::mir::{MFunction, MModule, MirInst, Register};
use std::io::Write;

pub fn emit_module<W: Write>(module: &MModule<A64Inst>, out: &mut W) -> Result<()> {
    writeln!(out, "    .text")?;
    for func in &module.functions {
        emit_function(func, out)?;
    }
    if !module.globals.is_empty() {
        emit_globals(&module.globals, out)?;
    }
    Ok(())
}

fn emit_function<W: Write>(func: &MFunction<A64Inst>, out: &mut W) -> Result<()> {
    writeln!(out, "    .globl {}", func.name)?;
    writeln!(out, "{}:", func.name)?;
    for (bid, block) in &func.blocks {
        writeln!(out, ".L{}_{}:", func.name, bid)?;
        for inst in &block.insts {
            match inst {
                MirInst::Target(t) => {
                    for line in render(t, &func.name)? {
                        writeln!(out, "    {}", line)?;
                    }
                }
                other => {
                    return Err(BackendError::Internal(format!(
                        "unlowered pseudo instruction at emission: {:?}",
                        other
                    )))
                }
            }
        }
    }
    Ok(())
}

fn reg(r: &Register, is32: bool) -> Result<String> {
    if r.is_virtual {
        return Err(BackendError::Internal(format!(
            "virtual register {} survived allocation",
            r
        )));
    }
    Ok(pr::name(r.id, is32, r.ty))
}

fn mem(base: &Register, off: i64) -> Result<String> {
    let base = reg(base, false)?;
    if off == 0 {
        Ok(format!("[{}]", base))
    } else {
        Ok(format!("[{}, #{}]", base, off))
    }
}

fn label(func: &str, target: Option<u32>) -> Result<String> {
    let target = target.ok_or_else(|| BackendError::Internal("branch without target".into()))?;
    Ok(format!(".L{}_{}", func, target))
}

fn render(t: &A64Inst, func: &str) -> Result<Vec<String>> {
    use A64Op::*;
    if t.fi.is_some() {
        return Err(BackendError::Internal(format!(
            "unresolved frame index in {:?}",
            t.op
        )));
    }
    let m = t.op.mnemonic();
    let line = match t.op {
        Mov => format!("{} {}, {}", m, reg(&t.rd, t.is32)?, reg(&t.rs1, t.is32)?),
        Fmov => {
            // Width of each side follows its own register file.
            let rd = if t.rd.ty.is_float() {
                reg(&t.rd, false)?
            } else {
                reg(&t.rd, t.is32)?
            };
            let rs = if t.rs1.ty.is_float() {
                reg(&t.rs1, false)?
            } else {
                reg(&t.rs1, t.is32)?
            };
            format!("{} {}, {}", m, rd, rs)
        }
        Sxtw | Uxtw => format!("{} {}, {}", m, reg(&t.rd, false)?, reg(&t.rs1, true)?),
        Scvtf => format!("{} {}, {}", m, reg(&t.rd, false)?, reg(&t.rs1, t.is32)?),
        Fcvtzs => format!("{} {}, {}", m, reg(&t.rd, t.is32)?, reg(&t.rs1, false)?),
        Movz | Movk => {
            if t.shift == 0 {
                format!("{} {}, #{}", m, reg(&t.rd, t.is32)?, t.imm)
            } else {
                format!(
                    "{} {}, #{}, lsl #{}",
                    m,
                    reg(&t.rd, t.is32)?,
                    t.imm,
                    t.shift
                )
            }
        }
        Add | Sub | Mul | Sdiv | And | Orr | Eor | Lsl | Lsr | Asr | Fadd | Fsub | Fmul
        | Fdiv => format!(
            "{} {}, {}, {}",
            m,
            reg(&t.rd, t.is32)?,
            reg(&t.rs1, t.is32)?,
            reg(&t.rs2, t.is32)?
        ),
        Msub => format!(
            "{} {}, {}, {}, {}",
            m,
            reg(&t.rd, t.is32)?,
            reg(&t.rs1, t.is32)?,
            reg(&t.rs2, t.is32)?,
            reg(&t.rs3, t.is32)?
        ),
        AddI | SubI => format!(
            "{} {}, {}, #{}",
            m,
            reg(&t.rd, t.is32)?,
            reg(&t.rs1, t.is32)?,
            t.imm
        ),
        Cmp => format!("{} {}, {}", m, reg(&t.rs1, t.is32)?, reg(&t.rs2, t.is32)?),
        CmpI => format!("{} {}, #{}", m, reg(&t.rs1, t.is32)?, t.imm),
        Fcmp => format!("{} {}, {}", m, reg(&t.rs1, false)?, reg(&t.rs2, false)?),
        Cset => {
            let cond = t
                .cond
                .ok_or_else(|| BackendError::Internal("cset without condition".into()))?;
            format!("{} {}, {}", m, reg(&t.rd, true)?, cond.mnemonic())
        }
        Ldr => format!("{} {}, {}", m, reg(&t.rd, t.is32)?, mem(&t.rs1, t.imm)?),
        Str => format!("{} {}, {}", m, reg(&t.rs1, t.is32)?, mem(&t.rs2, t.imm)?),
        La => {
            let sym = t
                .symbol
                .as_deref()
                .ok_or_else(|| BackendError::Internal("address pseudo without symbol".into()))?;
            let rd = reg(&t.rd, false)?;
            return Ok(vec![
                format!("adrp {}, {}", rd, sym),
                format!("add {}, {}, :lo12:{}", rd, rd, sym),
            ]);
        }
        B => format!("b {}", label(func, t.target)?),
        BCond => {
            let cond = t
                .cond
                .ok_or_else(|| BackendError::Internal("b.cond without condition".into()))?;
            format!("b.{} {}", cond.mnemonic(), label(func, t.target)?)
        }
        Bl => {
            let sym = t
                .symbol
                .as_deref()
                .ok_or_else(|| BackendError::Internal("bl without symbol".into()))?;
            format!("bl {}", sym)
        }
        Ret => "ret".to_string(),
    };
    Ok(vec![line])
}

fn emit_globals<W: Write>(globals: &[GlobalVar], out: &mut W) -> Result<()> {
    for g in globals {
        match &g.init {
            GlobalInit::Zeroed => {
                writeln!(out, "    .bss")?;
                writeln!(out, "    .globl {}", g.name)?;
                writeln!(out, "    .align 3")?;
                writeln!(out, "{}:", g.name)?;
                writeln!(out, "    .zero {}", g.size_bytes())?;
            }
            GlobalInit::Words(words) => {
                writeln!(out, "    .data")?;
                writeln!(out, "    .globl {}", g.name)?;
                writeln!(out, "    .align 3")?;
                writeln!(out, "{}:", g.name)?;
                for w in words {
                    writeln!(out, "    .word {}", w)?;
                }
                let tail = g.size_bytes() as i64 - 4 * words.len() as i64;
                if tail > 0 {
                    writeln!(out, "    .zero {}", tail)?;
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::defs::A64Cond;
    use crate::ir::DataType;

    fn one(t: &A64Inst) -> String {
        render(t, "f").unwrap().join("; ")
    }

    #[test]
    fn test_render_widths() {
        let add32 = A64Inst::rrr(A64Op::Add, pr::x(0), pr::x(1), pr::x(2), true);
        assert_eq!(one(&add32), "add w0, w1, w2");

        let add64 = A64Inst::rrr(A64Op::Add, pr::x(0), pr::sp(), pr::x(2), false);
        assert_eq!(one(&add64), "add x0, sp, x2");

        let fadd = A64Inst::rrr(
            A64Op::Fadd,
            pr::v(pr::V0, DataType::F32),
            pr::v(pr::V0 + 1, DataType::F32),
            pr::v(pr::V0 + 2, DataType::F32),
            false,
        );
        assert_eq!(one(&fadd), "fadd s0, s1, s2");
    }

    #[test]
    fn test_render_memory() {
        let ldr = A64Inst::ldr(Register::phys(0, DataType::I32), pr::sp(), 8);
        assert_eq!(one(&ldr), "ldr w0, [sp, #8]");

        let str0 = A64Inst::str(Register::phys(1, DataType::I64), pr::sp(), 0);
        assert_eq!(one(&str0), "str x1, [sp]");
    }

    #[test]
    fn test_render_control_flow() {
        assert_eq!(one(&A64Inst::b(3)), "b .Lf_3");
        assert_eq!(one(&A64Inst::b_cond(A64Cond::Ne, 2)), "b.ne .Lf_2");
        assert_eq!(one(&A64Inst::bl("g", 0, 0)), "bl g");
        assert_eq!(one(&A64Inst::ret()), "ret");
    }

    #[test]
    fn test_render_address_pseudo_expands() {
        let la = A64Inst::la(pr::x(0), "counter");
        let lines = render(&la, "f").unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], "adrp x0, counter");
        assert_eq!(lines[1], "add x0, x0, :lo12:counter");
    }

    #[test]
    fn test_render_movz_movk() {
        let movz = A64Inst::movz(pr::x(0), 0x5678, 0, true);
        assert_eq!(one(&movz), "movz w0, #22136");
        let movk = A64Inst::movk(pr::x(0), 0x1234, 16, true);
        assert_eq!(one(&movk), "movk w0, #4660, lsl #16");
    }

    #[test]
    fn test_render_fmov_bit_move() {
        let fmov = A64Inst::rr(
            A64Op::Fmov,
            pr::v(pr::V0, DataType::F32),
            pr::x(1),
            true,
        );
        assert_eq!(one(&fmov), "fmov s0, w1");
    }
}
