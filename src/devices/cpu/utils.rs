use super::WithCpu;
use super::structs::{Cpsr, Mode};
use crate::devices::bus::Motherboard;

#[macro_export]
macro_rules! state {
    (get $field: ident, $mb: expr) => {{
        $mb.cpu().state.$field
    }};
    (set $field: ident, $mb: expr, $val: expr) => {{
        $mb.cpu_mut().state.$field = $val
    }};
}

#[macro_export]
macro_rules! reg {
    (get $n: expr, $mb: expr) => {{
        $mb.cpu().state.regs[$n as usize]
    }};
    (set $n: expr, $mb: expr, $val: expr) => {{
        $mb.cpu_mut().state.regs[$n as usize] = $val
    }};
}

#[macro_export]
macro_rules! adj_cycles {
    ($mb: expr, $delta: expr) => {{
        $mb.tick_internal($delta as u32)
    }};
}

/// The four condition flags, packed the way CPSR bits 28-31 are.
pub fn check_condition(cond: u32, cpsr: Cpsr) -> bool {
    let n = cpsr.flag(Cpsr::N);
    let z = cpsr.flag(Cpsr::Z);
    let c = cpsr.flag(Cpsr::C);
    let v = cpsr.flag(Cpsr::V);
    match cond {
        0x0 => z,             // EQ
        0x1 => !z,            // NE
        0x2 => c,             // CS/HS
        0x3 => !c,            // CC/LO
        0x4 => n,             // MI
        0x5 => !n,            // PL
        0x6 => v,             // VS
        0x7 => !v,            // VC
        0x8 => c && !z,       // HI
        0x9 => !c || z,       // LS
        0xA => n == v,        // GE
        0xB => n != v,        // LT
        0xC => !z && n == v,  // GT
        0xD => z || n != v,   // LE
        0xE => true,          // AL
        _ => true,            // reserved; real hardware also always executes (pre-ARMv5)
    }
}

/// Logical shift left/right, arithmetic shift right, and rotate right, as
/// used by the barrel shifter for both the data-processing second operand
/// and load/store register-offset addressing. Returns the shifted value
/// and the carry-out bit.
pub fn barrel_shift(value: u32, shift_type: u32, amount: u32, carry_in: bool) -> (u32, bool) {
    match shift_type & 0x3 {
        0 => {
            // LSL
            if amount == 0 {
                (value, carry_in)
            } else if amount < 32 {
                (value << amount, (value >> (32 - amount)) & 1 != 0)
            } else if amount == 32 {
                (0, value & 1 != 0)
            } else {
                (0, false)
            }
        }
        1 => {
            // LSR
            let amount = if amount == 0 { 32 } else { amount };
            if amount < 32 {
                (value >> amount, (value >> (amount - 1)) & 1 != 0)
            } else if amount == 32 {
                (0, value & 0x8000_0000 != 0)
            } else {
                (0, false)
            }
        }
        2 => {
            // ASR
            let amount = if amount == 0 { 32 } else { amount };
            let signed = value as i32;
            if amount < 32 {
                ((signed >> amount) as u32, (signed >> (amount - 1)) & 1 != 0)
            } else {
                let filled = if signed < 0 { 0xFFFF_FFFF } else { 0 };
                (filled, signed < 0)
            }
        }
        _ => {
            // ROR (amount 0 is RRX: rotate right through carry by one)
            if amount == 0 {
                let result = (value >> 1) | if carry_in { 0x8000_0000 } else { 0 };
                (result, value & 1 != 0)
            } else {
                let amount = amount % 32;
                if amount == 0 {
                    (value, value & 0x8000_0000 != 0)
                } else {
                    (value.rotate_right(amount), (value >> (amount - 1)) & 1 != 0)
                }
            }
        }
    }
}

/// Switch register banks on a mode transition, copying the outgoing
/// mode's R13/R14 (and R8-R12 for FIQ) into their bank slots and loading
/// the incoming mode's.
pub fn switch_bank<T: WithCpu + Motherboard>(mb: &mut T, from: Mode, to: Mode) {
    if from == to {
        return;
    }
    let cpu = mb.cpu_mut();
    let from_idx = from.bank_index();
    cpu.state.banked_r13[from_idx] = cpu.state.regs[13];
    cpu.state.banked_r14[from_idx] = cpu.state.regs[14];
    if from == Mode::Fiq {
        for i in 0..5 {
            cpu.state.banked_fiq[1][i] = cpu.state.regs[8 + i];
        }
    } else {
        for i in 0..5 {
            cpu.state.banked_fiq[0][i] = cpu.state.regs[8 + i];
        }
    }

    let to_idx = to.bank_index();
    cpu.state.regs[13] = cpu.state.banked_r13[to_idx];
    cpu.state.regs[14] = cpu.state.banked_r14[to_idx];
    let fiq_bank = if to == Mode::Fiq { 1 } else { 0 };
    for i in 0..5 {
        cpu.state.regs[8 + i] = cpu.state.banked_fiq[fiq_bank][i];
    }
}
