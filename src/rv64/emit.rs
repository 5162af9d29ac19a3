//! RV64 assembly emission.
//!
//! Renders fully-lowered machine IR as GNU-assembler text. Any pseudo
//! instruction surviving to this point is a pipeline bug and is reported
//! as an internal error rather than printed.

use super::defs::{pr, OpKind, Rv64Inst, Rv64Op};
use crate::error::{BackendError, Result};
use crate::ir::{GlobalInit, GlobalVar};
use crate::mir::{MFunction, MModule, MirInst};
use std::io::Write;

pub fn emit_module<W: Write>(module: &MModule<Rv64Inst>, out: &mut W) -> Result<()> {
    writeln!(out, "    .text")?;
    for func in &module.functions {
        emit_function(func, out)?;
    }
    if !module.globals.is_empty() {
        emit_globals(&module.globals, out)?;
    }
    Ok(())
}

fn emit_function<W: Write>(func: &MFunction<Rv64Inst>, out: &mut W) -> Result<()> {
    writeln!(out, "    .globl {}", func.name)?;
    writeln!(out, "{}:", func.name)?;
    for (bid, block) in &func.blocks {
        writeln!(out, ".L{}_{}:", func.name, bid)?;
        for inst in &block.insts {
            match inst {
                MirInst::Target(t) => writeln!(out, "    {}", render(t, &func.name)?)?,
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

fn reg(r: &crate::mir::Register) -> Result<&'static str> {
    if r.is_virtual {
        return Err(BackendError::Internal(format!(
            "virtual register {} survived allocation",
            r
        )));
    }
    Ok(pr::name(r.id))
}

fn render(t: &Rv64Inst, func: &str) -> Result<String> {
    if t.fi.is_some() {
        return Err(BackendError::Internal(format!(
            "unresolved frame index in {:?}",
            t.op
        )));
    }
    let m = t.op.mnemonic();
    let s = match t.op.kind() {
        OpKind::R => format!("{} {}, {}, {}", m, reg(&t.rd)?, reg(&t.rs1)?, reg(&t.rs2)?),
        OpKind::I => match t.op {
            Rv64Op::Jalr => format!("{} {}, {}, {}", m, reg(&t.rd)?, reg(&t.rs1)?, t.imm),
            op if op.is_load() => {
                format!("{} {}, {}({})", m, reg(&t.rd)?, t.imm, reg(&t.rs1)?)
            }
            _ => format!("{} {}, {}, {}", m, reg(&t.rd)?, reg(&t.rs1)?, t.imm),
        },
        OpKind::S => format!("{} {}, {}({})", m, reg(&t.rs1)?, t.imm, reg(&t.rs2)?),
        OpKind::B => {
            let target = t
                .target
                .ok_or_else(|| BackendError::Internal("branch without target".into()))?;
            format!(
                "{} {}, {}, .L{}_{}",
                m,
                reg(&t.rs1)?,
                reg(&t.rs2)?,
                func,
                target
            )
        }
        OpKind::U => match t.op {
            Rv64Op::La => {
                let sym = t
                    .symbol
                    .as_deref()
                    .ok_or_else(|| BackendError::Internal("la without symbol".into()))?;
                format!("{} {}, {}", m, reg(&t.rd)?, sym)
            }
            _ => format!("{} {}, {}", m, reg(&t.rd)?, t.imm),
        },
        OpKind::J => {
            let target = t
                .target
                .ok_or_else(|| BackendError::Internal("jump without target".into()))?;
            if t.rd.id == pr::ZERO {
                format!("j .L{}_{}", func, target)
            } else {
                format!("{} {}, .L{}_{}", m, reg(&t.rd)?, func, target)
            }
        }
        OpKind::R2 => match t.op {
            // Truncating conversion rounds toward zero.
            Rv64Op::FcvtWS => format!("{} {}, {}, rtz", m, reg(&t.rd)?, reg(&t.rs1)?),
            _ => format!("{} {}, {}", m, reg(&t.rd)?, reg(&t.rs1)?),
        },
        OpKind::Call => {
            let sym = t
                .symbol
                .as_deref()
                .ok_or_else(|| BackendError::Internal("call without symbol".into()))?;
            format!("call {}", sym)
        }
    };
    Ok(s)
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

    #[test]
    fn test_render_shapes() {
        let add = Rv64Inst::r(Rv64Op::Addw, pr::x(10), pr::x(10), pr::x(11));
        assert_eq!(render(&add, "f").unwrap(), "addw a0, a0, a1");

        let lw = Rv64Inst::i(Rv64Op::Lw, pr::x(10), pr::sp(), 8);
        assert_eq!(render(&lw, "f").unwrap(), "lw a0, 8(sp)");

        let sd = Rv64Inst::s(Rv64Op::Sd, pr::x(10), pr::sp(), 0);
        assert_eq!(render(&sd, "f").unwrap(), "sd a0, 0(sp)");

        let ret = Rv64Inst::ret();
        assert_eq!(render(&ret, "f").unwrap(), "jalr zero, ra, 0");

        let j = Rv64Inst::j(3);
        assert_eq!(render(&j, "f").unwrap(), "j .Lf_3");

        let b = Rv64Inst::b(Rv64Op::Bne, pr::x(10), pr::zero(), 2);
        assert_eq!(render(&b, "f").unwrap(), "bne a0, zero, .Lf_2");

        let li = Rv64Inst::li(pr::x(10), -3);
        assert_eq!(render(&li, "f").unwrap(), "li a0, -3");

        let la = Rv64Inst::la(pr::x(10), "g");
        assert_eq!(render(&la, "f").unwrap(), "la a0, g");

        let call = Rv64Inst::call("memset", 3, 0);
        assert_eq!(render(&call, "f").unwrap(), "call memset");

        let cvt = Rv64Inst::r2(Rv64Op::FcvtWS, pr::x(10), pr::f(pr::FA0));
        assert_eq!(render(&cvt, "f").unwrap(), "fcvt.w.s a0, fa0, rtz");
    }

    #[test]
    fn test_virtual_register_is_rejected() {
        let bad = Rv64Inst::r(
            Rv64Op::Add,
            crate::mir::Register::vreg(0, crate::ir::DataType::I64),
            pr::x(10),
            pr::x(11),
        );
        assert!(render(&bad, "f").is_err());
    }

    #[test]
    fn test_unresolved_frame_index_is_rejected() {
        let bad = Rv64Inst::i_fi(Rv64Op::Lw, pr::x(10), pr::sp(), 0, 0);
        assert!(render(&bad, "f").is_err());
    }
}
