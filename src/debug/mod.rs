use crate::cpu::Cpu;
use crate::job::JobId;

pub fn trace(unit: usize, job: JobId, cpu: &Cpu, step: u64) {
    let r = cpu.regs.as_slice();
    log::trace!(
        "[u{} j{} {:06}] pc={:04} r0=0x{:08x} r1=0x{:08x} r2=0x{:08x} r3=0x{:08x} r4=0x{:08x} r5=0x{:08x}",
        unit,
        job,
        step,
        cpu.pc,
        r[0],
        r[1],
        r[2],
        r[3],
        r[4],
        r[5]
    );
}
