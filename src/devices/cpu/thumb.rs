//! 16-bit "T" encoding instruction semantics (spec §4.7).
//!
//! Thumb has no condition field of its own (besides format 16's branch);
//! every opcode always executes. Decode dispatches on the top few bits,
//! narrowing further inside each format handler.

use super::structs::Cpsr;
use super::swi;
use super::utils::{barrel_shift, check_condition};
use super::{branch_to, WithCpu};
use crate::devices::bus::{AccessKind, Motherboard};
use crate::devices::interrupts::InterruptController;
use crate::{adj_cycles, reg, state};

pub fn execute<T: WithCpu + Motherboard>(mb: &mut T, opcode: u16, irq: &mut InterruptController) {
    let op = opcode as u32;
    match (op >> 13) & 0x7 {
        0 => {
            if (op >> 11) & 0x3 == 0x3 {
                format2_add_sub(mb, op);
            } else {
                format1_shift(mb, op);
            }
        }
        1 => format3_imm(mb, op),
        2 => {
            if (op >> 10) & 0x7 == 0 {
                format4_alu(mb, op);
            } else if (op >> 10) & 0x3 == 0x1 {
                format5_hi_reg_bx(mb, op);
            } else if (op >> 11) & 0x3 == 0x1 {
                format6_pc_relative_load(mb, op);
            } else {
                format7_8_reg_offset(mb, op);
            }
        }
        3 => format9_imm_offset(mb, op),
        4 => {
            if (op >> 12) & 0x1 == 0 {
                format10_halfword(mb, op);
            } else {
                format11_sp_relative(mb, op);
            }
        }
        5 => {
            if (op >> 12) & 0x1 == 0 {
                format12_load_address(mb, op);
            } else {
                format13_14(mb, op);
            }
        }
        6 => {
            if (op >> 12) & 0x1 == 0 {
                format15_multiple_transfer(mb, op);
            } else if (op >> 8) & 0xF == 0xF {
                format17_swi(mb, op, irq);
            } else {
                format16_cond_branch(mb, op);
            }
        }
        _ => {
            if (op >> 12) & 0x1 == 0 {
                format18_uncond_branch(mb, op);
            } else {
                format19_long_branch_link(mb, op);
            }
        }
    }
}

fn set_nz<T: WithCpu>(mb: &mut T, value: u32) {
    mb.cpu_mut().state.cpsr.set_flag(Cpsr::Z, value == 0);
    mb.cpu_mut()
        .state
        .cpsr
        .set_flag(Cpsr::N, value & 0x8000_0000 != 0);
}

fn add_with_flags(a: u32, b: u32, carry_in: bool) -> (u32, bool, bool) {
    let carry = if carry_in { 1u64 } else { 0 };
    let r = a as u64 + b as u64 + carry;
    let overflow = !((a ^ b) & 0x8000_0000 != 0) && ((a ^ r as u32) & 0x8000_0000 != 0);
    (r as u32, r > 0xFFFF_FFFF, overflow)
}

fn sub_with_flags(a: u32, b: u32) -> (u32, bool, bool) {
    let (r, borrow) = a.overflowing_sub(b);
    let overflow = ((a ^ b) & (a ^ r)) & 0x8000_0000 != 0;
    (r, !borrow, overflow)
}

/// Format 1: LSL/LSR/ASR Rd, Rs, #imm5.
fn format1_shift<T: WithCpu + Motherboard>(mb: &mut T, op: u32) {
    let shift_type = (op >> 11) & 0x3;
    let amount = (op >> 6) & 0x1F;
    let rs = (op >> 3) & 0x7;
    let rd = op & 0x7;
    let carry_in = state!(get cpsr, mb).flag(Cpsr::C);
    let (result, carry) = barrel_shift(reg!(get rs, mb), shift_type, amount, carry_in);
    reg!(set rd, mb, result);
    set_nz(mb, result);
    mb.cpu_mut().state.cpsr.set_flag(Cpsr::C, carry);
}

/// Format 2: ADD/SUB Rd, Rs, Rn/#imm3.
fn format2_add_sub<T: WithCpu + Motherboard>(mb: &mut T, op: u32) {
    let use_immediate = (op >> 10) & 0x1 != 0;
    let subtract = (op >> 9) & 0x1 != 0;
    let operand = (op >> 6) & 0x7;
    let rs = (op >> 3) & 0x7;
    let rd = op & 0x7;
    let rs_val = reg!(get rs, mb);
    let op2 = if use_immediate { operand } else { reg!(get operand, mb) };

    let (result, carry, overflow) = if subtract {
        sub_with_flags(rs_val, op2)
    } else {
        add_with_flags(rs_val, op2, false)
    };
    reg!(set rd, mb, result);
    set_nz(mb, result);
    mb.cpu_mut().state.cpsr.set_flag(Cpsr::C, carry);
    mb.cpu_mut().state.cpsr.set_flag(Cpsr::V, overflow);
}

/// Format 3: MOV/CMP/ADD/SUB Rd, #imm8.
fn format3_imm<T: WithCpu + Motherboard>(mb: &mut T, op: u32) {
    let opc = (op >> 11) & 0x3;
    let rd = (op >> 8) & 0x7;
    let imm = op & 0xFF;
    let rd_val = reg!(get rd, mb);
    match opc {
        0 => {
            reg!(set rd, mb, imm);
            set_nz(mb, imm);
        }
        1 => {
            let (result, carry, overflow) = sub_with_flags(rd_val, imm);
            set_nz(mb, result);
            mb.cpu_mut().state.cpsr.set_flag(Cpsr::C, carry);
            mb.cpu_mut().state.cpsr.set_flag(Cpsr::V, overflow);
        }
        2 => {
            let (result, carry, overflow) = add_with_flags(rd_val, imm, false);
            reg!(set rd, mb, result);
            set_nz(mb, result);
            mb.cpu_mut().state.cpsr.set_flag(Cpsr::C, carry);
            mb.cpu_mut().state.cpsr.set_flag(Cpsr::V, overflow);
        }
        _ => {
            let (result, carry, overflow) = sub_with_flags(rd_val, imm);
            reg!(set rd, mb, result);
            set_nz(mb, result);
            mb.cpu_mut().state.cpsr.set_flag(Cpsr::C, carry);
            mb.cpu_mut().state.cpsr.set_flag(Cpsr::V, overflow);
        }
    }
}

/// Format 4: two-register ALU operations (AND, EOR, LSL, ..., MVN).
fn format4_alu<T: WithCpu + Motherboard>(mb: &mut T, op: u32) {
    let opc = (op >> 6) & 0xF;
    let rs = (op >> 3) & 0x7;
    let rd = op & 0x7;
    let rd_val = reg!(get rd, mb);
    let rs_val = reg!(get rs, mb);
    let carry_in = state!(get cpsr, mb).flag(Cpsr::C);

    let mut write_result = true;
    let (result, carry, overflow) = match opc {
        0x0 => (rd_val & rs_val, carry_in, None),
        0x1 => (rd_val ^ rs_val, carry_in, None),
        0x2 => {
            adj_cycles!(mb, 1);
            let (r, c) = barrel_shift(rd_val, 0, rs_val & 0xFF, carry_in);
            (r, c, None)
        }
        0x3 => {
            adj_cycles!(mb, 1);
            let (r, c) = barrel_shift(rd_val, 1, rs_val & 0xFF, carry_in);
            (r, c, None)
        }
        0x4 => {
            adj_cycles!(mb, 1);
            let (r, c) = barrel_shift(rd_val, 2, rs_val & 0xFF, carry_in);
            (r, c, None)
        }
        0x5 => {
            let (r, c, v) = add_with_flags(rd_val, rs_val, carry_in);
            (r, c, Some(v))
        }
        0x6 => {
            let carry = carry_in;
            let (sub1, b1) = rd_val.overflowing_sub(rs_val);
            let (r, b2) = sub1.overflowing_sub(if carry { 0 } else { 1 });
            let v = ((rd_val ^ rs_val) & (rd_val ^ r)) & 0x8000_0000 != 0;
            (r, !(b1 || b2), Some(v))
        }
        0x7 => {
            adj_cycles!(mb, 1);
            let (r, c) = barrel_shift(rd_val, 3, rs_val & 0xFF, carry_in);
            (r, c, None)
        }
        0x8 => {
            write_result = false;
            (rd_val & rs_val, carry_in, None)
        }
        0x9 => {
            let (r, _, _) = sub_with_flags(0, rs_val);
            (r, carry_in, None)
        }
        0xA => {
            write_result = false;
            let (r, c, v) = sub_with_flags(rd_val, rs_val);
            (r, c, Some(v))
        }
        0xB => {
            write_result = false;
            let (r, c, v) = add_with_flags(rd_val, rs_val, false);
            (r, c, Some(v))
        }
        0xC => (rd_val | rs_val, carry_in, None),
        0xD => {
            let r = rd_val.wrapping_mul(rs_val);
            adj_cycles!(mb, 1);
            (r, carry_in, None)
        }
        0xE => (rd_val & !rs_val, carry_in, None),
        _ => (!rs_val, carry_in, None),
    };

    if write_result {
        reg!(set rd, mb, result);
    }
    set_nz(mb, result);
    mb.cpu_mut().state.cpsr.set_flag(Cpsr::C, carry);
    if let Some(v) = overflow {
        mb.cpu_mut().state.cpsr.set_flag(Cpsr::V, v);
    }
}

/// Format 5: Hi-register operations and branch-exchange.
fn format5_hi_reg_bx<T: WithCpu + Motherboard>(mb: &mut T, op: u32) {
    let opc = (op >> 8) & 0x3;
    let h1 = (op >> 7) & 0x1;
    let h2 = (op >> 6) & 0x1;
    let rs = ((op >> 3) & 0x7) | (h2 << 3);
    let rd = (op & 0x7) | (h1 << 3);

    match opc {
        0 => {
            let result = reg!(get rd, mb).wrapping_add(reg!(get rs, mb));
            if rd == 15 {
                branch_to(mb, result & !0x1);
            } else {
                reg!(set rd, mb, result);
            }
        }
        1 => {
            let (result, carry, overflow) = sub_with_flags(reg!(get rd, mb), reg!(get rs, mb));
            set_nz(mb, result);
            mb.cpu_mut().state.cpsr.set_flag(Cpsr::C, carry);
            mb.cpu_mut().state.cpsr.set_flag(Cpsr::V, overflow);
        }
        2 => {
            let value = reg!(get rs, mb);
            if rd == 15 {
                branch_to(mb, value & !0x1);
            } else {
                reg!(set rd, mb, value);
            }
        }
        _ => {
            let target = reg!(get rs, mb);
            mb.cpu_mut().state.cpsr.set_thumb(target & 1 != 0);
            branch_to(mb, target & !0x1);
        }
    }
}

/// Format 6: LDR Rd, [PC, #imm8*4].
fn format6_pc_relative_load<T: WithCpu + Motherboard>(mb: &mut T, op: u32) {
    let rd = (op >> 8) & 0x7;
    let imm = (op & 0xFF) << 2;
    let base = reg!(get 15, mb) & !0x3;
    let value = mb.read32(base + imm, AccessKind::nonseq());
    reg!(set rd, mb, value);
}

/// Formats 7/8: load/store with register offset (word/byte/halfword/sign-extended).
fn format7_8_reg_offset<T: WithCpu + Motherboard>(mb: &mut T, op: u32) {
    let opc = (op >> 10) & 0x3;
    let ro = (op >> 6) & 0x7;
    let rb = (op >> 3) & 0x7;
    let rd = op & 0x7;
    let addr = reg!(get rb, mb).wrapping_add(reg!(get ro, mb));
    let sign_extended = (op >> 9) & 0x1 != 0;

    match (opc, sign_extended) {
        (0, false) => mb.write32(addr, reg!(get rd, mb), AccessKind::nonseq()),
        (1, false) => mb.write8(addr, reg!(get rd, mb) as u8, AccessKind::nonseq()),
        (2, false) => {
            let v = mb.read32(addr, AccessKind::rotating(false));
            reg!(set rd, mb, v);
        }
        (3, false) => {
            let v = mb.read8(addr, AccessKind::nonseq()) as u32;
            reg!(set rd, mb, v);
        }
        (0, true) => mb.write16(addr, reg!(get rd, mb) as u16, AccessKind::nonseq()),
        (1, true) => {
            let v = mb.read8(addr, AccessKind::signed_access(false)) as i8 as i32 as u32;
            reg!(set rd, mb, v);
        }
        (2, true) => {
            let v = mb.read16(addr, AccessKind::rotating(false)) as u32;
            reg!(set rd, mb, v);
        }
        _ => {
            let v = mb.read16(addr, AccessKind::signed_access(false)) as i16 as i32 as u32;
            reg!(set rd, mb, v);
        }
    }
}

/// Format 9: load/store with a 5-bit immediate offset (word/byte).
fn format9_imm_offset<T: WithCpu + Motherboard>(mb: &mut T, op: u32) {
    let byte = (op >> 12) & 0x1 != 0;
    let load = (op >> 11) & 0x1 != 0;
    let imm = (op >> 6) & 0x1F;
    let rb = (op >> 3) & 0x7;
    let rd = op & 0x7;
    let offset = if byte { imm } else { imm << 2 };
    let addr = reg!(get rb, mb).wrapping_add(offset);

    if load {
        let value = if byte {
            mb.read8(addr, AccessKind::nonseq()) as u32
        } else {
            mb.read32(addr, AccessKind::rotating(false))
        };
        reg!(set rd, mb, value);
    } else if byte {
        mb.write8(addr, reg!(get rd, mb) as u8, AccessKind::nonseq());
    } else {
        mb.write32(addr, reg!(get rd, mb), AccessKind::nonseq());
    }
}

/// Format 10: load/store halfword with a 5-bit immediate offset.
fn format10_halfword<T: WithCpu + Motherboard>(mb: &mut T, op: u32) {
    let load = (op >> 11) & 0x1 != 0;
    let imm = ((op >> 6) & 0x1F) << 1;
    let rb = (op >> 3) & 0x7;
    let rd = op & 0x7;
    let addr = reg!(get rb, mb).wrapping_add(imm);
    if load {
        let value = mb.read16(addr, AccessKind::rotating(false)) as u32;
        reg!(set rd, mb, value);
    } else {
        mb.write16(addr, reg!(get rd, mb) as u16, AccessKind::nonseq());
    }
}

/// Format 11: SP-relative load/store.
fn format11_sp_relative<T: WithCpu + Motherboard>(mb: &mut T, op: u32) {
    let load = (op >> 11) & 0x1 != 0;
    let rd = (op >> 8) & 0x7;
    let imm = (op & 0xFF) << 2;
    let addr = reg!(get 13, mb).wrapping_add(imm);
    if load {
        let value = mb.read32(addr, AccessKind::rotating(false));
        reg!(set rd, mb, value);
    } else {
        mb.write32(addr, reg!(get rd, mb), AccessKind::nonseq());
    }
}

/// Format 12: load address, PC- or SP-relative.
fn format12_load_address<T: WithCpu + Motherboard>(mb: &mut T, op: u32) {
    let use_sp = (op >> 11) & 0x1 != 0;
    let rd = (op >> 8) & 0x7;
    let imm = (op & 0xFF) << 2;
    let base = if use_sp {
        reg!(get 13, mb)
    } else {
        reg!(get 15, mb) & !0x3
    };
    reg!(set rd, mb, base.wrapping_add(imm));
}

/// Formats 13/14: ADD SP,#imm and PUSH/POP.
fn format13_14<T: WithCpu + Motherboard>(mb: &mut T, op: u32) {
    if (op >> 8) & 0xF == 0x0 {
        let sign = (op >> 7) & 0x1 != 0;
        let imm = (op & 0x7F) << 2;
        let sp = reg!(get 13, mb);
        reg!(set 13, mb, if sign { sp.wrapping_sub(imm) } else { sp.wrapping_add(imm) });
        return;
    }

    let pop = (op >> 11) & 0x1 != 0;
    let store_lr_load_pc = (op >> 8) & 0x1 != 0;
    let register_list = op & 0xFF;

    if pop {
        let mut sp = reg!(get 13, mb);
        let mut first = true;
        for i in 0..8 {
            if register_list & (1 << i) == 0 {
                continue;
            }
            let access = if first {
                AccessKind::nonseq()
            } else {
                AccessKind::seq()
            };
            first = false;
            let value = mb.read32(sp, access);
            reg!(set i, mb, value);
            sp = sp.wrapping_add(4);
        }
        if store_lr_load_pc {
            let value = mb.read32(sp, AccessKind::seq());
            sp = sp.wrapping_add(4);
            branch_to(mb, value & !0x1);
        }
        reg!(set 13, mb, sp);
    } else {
        let count = register_list.count_ones() + if store_lr_load_pc { 1 } else { 0 };
        let mut sp = reg!(get 13, mb).wrapping_sub(count * 4);
        reg!(set 13, mb, sp);
        let mut first = true;
        for i in 0..8 {
            if register_list & (1 << i) == 0 {
                continue;
            }
            let access = if first {
                AccessKind::nonseq()
            } else {
                AccessKind::seq()
            };
            first = false;
            mb.write32(sp, reg!(get i, mb), access);
            sp = sp.wrapping_add(4);
        }
        if store_lr_load_pc {
            mb.write32(sp, reg!(get 14, mb), AccessKind::seq());
        }
    }
}

/// Format 15: multiple load/store through a low register base.
fn format15_multiple_transfer<T: WithCpu + Motherboard>(mb: &mut T, op: u32) {
    let load = (op >> 11) & 0x1 != 0;
    let rb = (op >> 8) & 0x7;
    let register_list = op & 0xFF;
    let mut addr = reg!(get rb, mb);
    let mut first = true;
    for i in 0..8 {
        if register_list & (1 << i) == 0 {
            continue;
        }
        let access = if first {
            AccessKind::nonseq()
        } else {
            AccessKind::seq()
        };
        first = false;
        if load {
            let value = mb.read32(addr, access);
            reg!(set i, mb, value);
        } else {
            mb.write32(addr, reg!(get i, mb), access);
        }
        addr = addr.wrapping_add(4);
    }
    reg!(set rb, mb, addr);
}

/// Format 16: conditional branch.
fn format16_cond_branch<T: WithCpu + Motherboard>(mb: &mut T, op: u32) {
    let cond = (op >> 8) & 0xF;
    if !check_condition(cond, state!(get cpsr, mb)) {
        return;
    }
    let offset = ((op & 0xFF) << 24) as i32 >> 23; // sign-extend, *2
    let pc = reg!(get 15, mb);
    branch_to(mb, pc.wrapping_add(offset as u32));
}

/// Format 17: software interrupt.
fn format17_swi<T: WithCpu + Motherboard>(mb: &mut T, op: u32, irq: &mut InterruptController) {
    if mb.hle_enabled() {
        let comment = op & 0xFF;
        swi::dispatch_hle(mb, comment, irq);
    } else {
        super::enter_exception(mb, super::structs::Mode::Supervisor, super::vectors::SWI, 2, false);
    }
}

/// Format 18: unconditional branch.
fn format18_uncond_branch<T: WithCpu + Motherboard>(mb: &mut T, op: u32) {
    let offset = ((op & 0x7FF) << 21) as i32 >> 20; // sign-extend, *2
    let pc = reg!(get 15, mb);
    branch_to(mb, pc.wrapping_add(offset as u32));
}

/// Format 19: long branch with link — two 16-bit opcodes forming a
/// 22-bit signed offset, high half first.
fn format19_long_branch_link<T: WithCpu + Motherboard>(mb: &mut T, op: u32) {
    let low_half = (op >> 11) & 0x1 != 0;
    let offset11 = op & 0x7FF;

    if !low_half {
        let offset = ((offset11 << 21) as i32 >> 9) as u32; // sign-extend, *2^12, high part
        let pc = reg!(get 15, mb);
        reg!(set 14, mb, pc.wrapping_add(offset));
    } else {
        let next_instr = reg!(get 15, mb).wrapping_sub(2);
        let target = reg!(get 14, mb).wrapping_add(offset11 << 1);
        reg!(set 14, mb, next_instr | 1);
        branch_to(mb, target);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::cpu::Cpu;
    use crate::devices::bus::Bus;

    struct Harness {
        cpu: Cpu,
        bus: Bus,
    }

    impl WithCpu for Harness {
        fn cpu(&self) -> &Cpu {
            &self.cpu
        }
        fn cpu_mut(&mut self) -> &mut Cpu {
            &mut self.cpu
        }
    }

    impl Motherboard for Harness {
        fn read8(&mut self, addr: u32, access: AccessKind) -> u8 {
            self.bus.read8(addr, access)
        }
        fn read16(&mut self, addr: u32, access: AccessKind) -> u16 {
            self.bus.read16(addr, access)
        }
        fn read32(&mut self, addr: u32, access: AccessKind) -> u32 {
            self.bus.read32(addr, access)
        }
        fn write8(&mut self, addr: u32, data: u8, access: AccessKind) {
            self.bus.write8(addr, data, access)
        }
        fn write16(&mut self, addr: u32, data: u16, access: AccessKind) {
            self.bus.write16(addr, data, access)
        }
        fn write32(&mut self, addr: u32, data: u32, access: AccessKind) {
            self.bus.write32(addr, data, access)
        }
        fn total_cycles(&self) -> u64 {
            self.bus.cycles
        }
        fn tick_internal(&mut self, cycles: u32) {
            self.bus.cycles += cycles as u64;
        }
    }

    fn harness() -> Harness {
        Harness {
            cpu: Cpu::new(),
            bus: Bus::new(),
        }
    }

    #[test]
    fn format3_add_sets_carry_on_overflow() {
        let mut h = harness();
        reg!(set 0, h, 0xFFFF_FFFF);
        format3_imm(&mut h, 0b0011_0_000_00000001); // ADD R0, #1
        assert_eq!(reg!(get 0, h), 0);
        assert!(state!(get cpsr, h).flag(Cpsr::C));
        assert!(state!(get cpsr, h).flag(Cpsr::Z));
    }

    #[test]
    fn format2_subtract_immediate() {
        let mut h = harness();
        reg!(set 1, h, 5);
        // SUB R0, R1, #3 -> use_immediate=1, subtract=1, operand=3, rs=1, rd=0
        let op = 0b0001111011001000u32;
        format2_add_sub(&mut h, op);
        assert_eq!(reg!(get 0, h), 2);
    }
}
