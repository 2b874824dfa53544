pub mod arm;
pub mod structs;
pub mod swi;
pub mod thumb;
#[macro_use]
pub mod utils;

use crate::devices::bus::{AccessKind, Motherboard};
use crate::devices::interrupts::InterruptController;
use structs::{Cpsr, CpuState, Mode};

/// Exception entry vectors, fixed offsets into firmware (spec §4.3).
pub mod vectors {
    pub const RESET: u32 = 0x00;
    pub const UNDEFINED: u32 = 0x04;
    pub const SWI: u32 = 0x08;
    pub const PREFETCH_ABORT: u32 = 0x0C;
    pub const DATA_ABORT: u32 = 0x10;
    pub const IRQ: u32 = 0x18;
    pub const FIQ: u32 = 0x1C;
}

pub struct Cpu {
    pub state: CpuState,
}

impl Cpu {
    pub fn new() -> Cpu {
        Cpu {
            state: CpuState::new(),
        }
    }

    pub fn reset<T: WithCpu + Motherboard>(mb: &mut T) {
        mb.cpu_mut().state.reset();
        refill_pipeline(mb);
    }
}

/// Trait for a device that owns a [`Cpu`], such as the system or a test
/// harness.
pub trait WithCpu {
    fn cpu(&self) -> &Cpu;
    fn cpu_mut(&mut self) -> &mut Cpu;
}

/// Reload the three-slot pipeline from the current PC, after any branch,
/// mode switch affecting PC, or reset. Leaves PC two instruction-widths
/// ahead of the next instruction to execute, per the prefetch invariant
/// (spec §3).
pub fn refill_pipeline<T: WithCpu + Motherboard>(mb: &mut T) {
    let thumb = state!(get cpsr, mb).thumb();
    let width = if thumb { 2 } else { 4 };
    let pc = reg!(get 15, mb) & !(width - 1);
    reg!(set 15, mb, pc);

    let fetch = |mb: &mut T, addr: u32| -> u32 {
        if thumb {
            mb.read16(addr, AccessKind::code(false)) as u32
        } else {
            mb.read32(addr, AccessKind::code(false))
        }
    };
    let slot0 = fetch(mb, pc);
    let slot1 = fetch(mb, pc + width);
    mb.cpu_mut().state.pipeline = [slot0, slot1, 0];
    mb.cpu_mut().state.pipeline_index = 0;
    reg!(set 15, mb, pc + 2 * width);
}

/// Run one instruction: check for pending interrupts, dispatch the
/// current pipeline slot, advance the pipeline. Returns the number of
/// bus cycles the instruction billed, for the scheduler to fan out.
pub fn step<T: WithCpu + Motherboard>(mb: &mut T, irq: &mut InterruptController) -> u64 {
    let cycles_before = mb.total_cycles();

    if mb.cpu().state.stopped {
        return 1;
    }
    if mb.cpu().state.halted {
        if irq.halted {
            return 1;
        }
        mb.cpu_mut().state.halted = false;
    }

    // Interrupts are only taken at instruction boundaries (spec §5).
    if irq.pending() {
        enter_exception(mb, Mode::Irq, vectors::IRQ, 4, false);
        irq.ime = false;
    }

    let thumb = state!(get cpsr, mb).thumb();
    let opcode = mb.cpu().state.pipeline[mb.cpu().state.pipeline_index % 3];
    mb.cpu_mut().state.branched = false;

    if thumb {
        thumb::execute(mb, opcode as u16, irq);
    } else {
        arm::execute(mb, opcode, irq);
    }

    if !mb.cpu().state.branched {
        advance_pipeline(mb);
    }

    let cycles_after = mb.total_cycles();
    (cycles_after - cycles_before).max(1)
}

fn advance_pipeline<T: WithCpu + Motherboard>(mb: &mut T) {
    let thumb = state!(get cpsr, mb).thumb();
    let width = if thumb { 2 } else { 4 };
    let pc = reg!(get 15, mb);
    let next_opcode = if thumb {
        mb.read16(pc, AccessKind::code(true)) as u32
    } else {
        mb.read32(pc, AccessKind::code(true))
    };
    let idx = mb.cpu().state.pipeline_index;
    mb.cpu_mut().state.pipeline[idx % 3] = next_opcode;
    mb.cpu_mut().state.pipeline_index = idx + 1;
    reg!(set 15, mb, pc + width);
}

/// Branch to `addr`: write R15 and refill the pipeline. Every instruction
/// that changes control flow funnels through here.
pub fn branch_to<T: WithCpu + Motherboard>(mb: &mut T, addr: u32) {
    reg!(set 15, mb, addr);
    refill_pipeline(mb);
    mb.cpu_mut().state.branched = true;
}

/// Common exception entry: save CPSR to the target mode's SPSR, bank R14
/// to the adjusted return address, switch mode, set interrupt-disable
/// bits, clear the thumb bit, and branch to the vector (spec §4.3).
pub fn enter_exception<T: WithCpu + Motherboard>(
    mb: &mut T,
    mode: Mode,
    vector: u32,
    return_offset: u32,
    disable_fiq: bool,
) {
    let old_cpsr = state!(get cpsr, mb);
    let return_addr = reg!(get 15, mb).wrapping_sub(return_offset);

    utils::switch_bank(mb, old_cpsr.mode(), mode);
    let bank = mode.bank_index();
    mb.cpu_mut().state.spsr[bank] = old_cpsr;
    reg!(set 14, mb, return_addr);

    let mut new_cpsr = old_cpsr;
    new_cpsr.set_mode(mode);
    new_cpsr.set_thumb(false);
    new_cpsr.set_flag(Cpsr::IRQ_DISABLE, true);
    if disable_fiq {
        new_cpsr.set_flag(Cpsr::FIQ_DISABLE, true);
    }
    mb.cpu_mut().state.cpsr = new_cpsr;

    branch_to(mb, vector);
}
