use super::Cpu;
use super::decode::{DecodeError, Instr, Opcode, Operands};
use super::trap::{Trap, WithPc};
use crate::mem::{MemError, Word};

/// What the unit should do after an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Halt,
}

fn read(mem: &[Word], index: usize) -> Result<i32, MemError> {
    mem.get(index)
        .map(|w| *w as i32)
        .ok_or(MemError::Oob(index as i64))
}

fn write(mem: &mut [Word], index: usize, value: i32) -> Result<(), MemError> {
    let slot = mem.get_mut(index).ok_or(MemError::Oob(index as i64))?;
    *slot = value as Word;
    Ok(())
}

/// Target of a memory operand: the address itself, or the register value
/// when the address is zero.
fn target(addr: usize, via: i32) -> Result<usize, MemError> {
    if addr != 0 {
        return Ok(addr);
    }
    usize::try_from(via).map_err(|_| MemError::Oob(via as i64))
}

/// Evaluate one decoded instruction against the unit's registers and the
/// job's working-set view. `mem[0]` is the job's first word.
pub fn execute(cpu: &mut Cpu, mem: &mut [Word], instr: Instr) -> Result<Flow, Trap> {
    let pc = cpu.pc;
    cpu.pc = pc + 1;

    let r = |cpu: &Cpu, idx: u8| -> i32 { cpu.regs.get(idx) };
    let w = |cpu: &mut Cpu, idx: u8, val: i32| cpu.regs.set(idx, val);
    let flag = |b: bool| -> i32 { if b { 1 } else { 0 } };

    let mismatch = || Trap::Decode {
        pc,
        err: DecodeError::FormatMismatch {
            word: super::decode::encode(instr),
            opcode: instr.opcode,
            format: instr.operands.format(),
        },
    };

    match instr.opcode {
        Opcode::Hlt => return Ok(Flow::Halt),
        Opcode::Nop => {}

        // register-only group
        Opcode::Mov
        | Opcode::Add
        | Opcode::Sub
        | Opcode::Mul
        | Opcode::Div
        | Opcode::And
        | Opcode::Or
        | Opcode::Slt => {
            let Operands::Arithmetic { reg1, reg2, reg3 } = instr.operands else {
                return Err(mismatch());
            };
            let a = r(cpu, reg1);
            let b = r(cpu, reg2);
            match instr.opcode {
                Opcode::Mov => w(cpu, reg3, a),
                Opcode::Add => w(cpu, reg3, a.wrapping_add(b)),
                Opcode::Sub => w(cpu, reg3, a.wrapping_sub(b)),
                Opcode::Mul => w(cpu, reg3, a.wrapping_mul(b)),
                Opcode::Div => {
                    // divide by zero leaves the destination untouched
                    if b != 0 {
                        w(cpu, reg3, a.wrapping_div(b));
                    }
                }
                Opcode::And => w(cpu, reg3, flag(a != 0 && b != 0)),
                Opcode::Or => w(cpu, reg3, flag(a == 1 || b == 1)),
                Opcode::Slt => w(cpu, reg3, flag(a < b)),
                _ => unreachable!(),
            }
        }

        Opcode::Jmp => {
            let addr = instr.operands.address().ok_or_else(mismatch)?;
            cpu.pc = addr.index;
        }

        // register pair + address group
        _ => {
            let (reg1, reg2, addr) = instr.operands.reg_addr().ok_or_else(mismatch)?;
            let a = addr.index;
            match instr.opcode {
                Opcode::Rd => {
                    let src = target(a, r(cpu, reg2)).with_pc(pc)?;
                    let v = read(mem, src).with_pc(pc)?;
                    w(cpu, reg1, v);
                }
                Opcode::Wr => {
                    write(mem, a, r(cpu, reg1)).with_pc(pc)?;
                }
                Opcode::St => {
                    let dst = target(a, r(cpu, reg2)).with_pc(pc)?;
                    write(mem, dst, r(cpu, reg1)).with_pc(pc)?;
                }
                Opcode::Lw => {
                    let src = target(a, r(cpu, reg1)).with_pc(pc)?;
                    let v = read(mem, src).with_pc(pc)?;
                    w(cpu, reg2, v);
                }
                Opcode::Movi => w(cpu, reg2, addr.raw as i32),
                Opcode::Addi => w(cpu, reg2, r(cpu, reg2).wrapping_add(1)),
                Opcode::Muli => w(cpu, reg2, r(cpu, reg2).wrapping_mul(a as i32)),
                Opcode::Divi => {
                    if a != 0 {
                        w(cpu, reg2, r(cpu, reg2).wrapping_div(a as i32));
                    }
                }
                Opcode::Ldi => w(cpu, reg2, a as i32),
                Opcode::Slti => w(cpu, reg2, flag(r(cpu, reg1) < a as i32)),
                Opcode::Beq => {
                    if r(cpu, reg1) == r(cpu, reg2) {
                        cpu.pc = a;
                    }
                }
                Opcode::Bne => {
                    if r(cpu, reg1) != r(cpu, reg2) {
                        cpu.pc = a;
                    }
                }
                Opcode::Bez => {
                    if r(cpu, reg2) == 0 {
                        cpu.pc = a;
                    }
                }
                Opcode::Bnz => {
                    if r(cpu, reg1) != 0 {
                        cpu.pc = a;
                    }
                }
                Opcode::Bgz => {
                    if r(cpu, reg1) > 0 {
                        cpu.pc = a;
                    }
                }
                Opcode::Blz => {
                    if r(cpu, reg1) < 0 {
                        cpu.pc = a;
                    }
                }
                _ => unreachable!(),
            }
        }
    }

    Ok(Flow::Continue)
}
