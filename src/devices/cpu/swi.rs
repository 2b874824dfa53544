//! BIOS HLE service table (spec §9, supplemented from
//! `original_source/src/core/mmio.cpp`).
//!
//! When no firmware image is loaded (or the host asked to skip it),
//! `SWI` dispatches here instead of taking the real exception vector.
//! Arguments and return values follow the real BIOS's register
//! convention: R0-R3 in, R0 (and sometimes R1/R3) out.

use super::WithCpu;
use crate::devices::bus::{AccessKind, Motherboard};
use crate::devices::interrupts::InterruptController;
use crate::reg;

const SWI_SOFT_RESET: u32 = 0x00;
const SWI_REGISTER_RAM_RESET: u32 = 0x01;
const SWI_HALT: u32 = 0x02;
const SWI_STOP: u32 = 0x03;
const SWI_INTR_WAIT: u32 = 0x04;
const SWI_VBLANK_INTR_WAIT: u32 = 0x05;
const SWI_DIV: u32 = 0x06;
const SWI_SQRT: u32 = 0x08;
const SWI_ARCTAN2: u32 = 0x0A;
const SWI_CPU_SET: u32 = 0x0B;
const SWI_CPU_FAST_SET: u32 = 0x0C;
const SWI_LZ77_WRITE8: u32 = 0x11;
const SWI_LZ77_WRITE16: u32 = 0x12;

pub fn dispatch_hle<T: WithCpu + Motherboard>(
    mb: &mut T,
    comment: u32,
    irq: &mut InterruptController,
) {
    match comment {
        SWI_SOFT_RESET | SWI_REGISTER_RAM_RESET => {
            // Nothing to tear down in this model; a host that wants a
            // soft reset calls `System::reset` directly.
        }
        SWI_HALT => {
            mb.cpu_mut().state.halted = true;
            irq.halt();
        }
        SWI_STOP => {
            mb.cpu_mut().state.stopped = true;
        }
        SWI_INTR_WAIT | SWI_VBLANK_INTR_WAIT => {
            // Simplified: relies on the caller having already enabled the
            // IE bits it's waiting on, as real games do before calling
            // this (the real BIOS additionally tracks a bitmask at
            // 0x3007FF8 to support waiting on multiple specific sources
            // without waking on the first one; out of scope here).
            mb.cpu_mut().state.halted = true;
            irq.halt();
        }
        SWI_DIV => swi_div(mb),
        SWI_SQRT => swi_sqrt(mb),
        SWI_ARCTAN2 => swi_arctan2(mb),
        SWI_CPU_SET => swi_cpu_set(mb),
        SWI_CPU_FAST_SET => swi_cpu_fast_set(mb),
        SWI_LZ77_WRITE8 => swi_lz77_decompress(mb, true),
        SWI_LZ77_WRITE16 => swi_lz77_decompress(mb, false),
        other => {
            eprintln!("unimplemented BIOS service: {:02X}", other);
        }
    }
}

fn swi_div<T: WithCpu>(mb: &mut T) {
    let numerator = reg!(get 0, mb) as i32;
    let denominator = reg!(get 1, mb) as i32;
    if denominator == 0 {
        eprintln!("SWI Div: division by zero");
        reg!(set 0, mb, 0);
        reg!(set 1, mb, numerator as u32);
        reg!(set 3, mb, 0);
        return;
    }
    let quotient = numerator.wrapping_div(denominator);
    let remainder = numerator.wrapping_rem(denominator);
    reg!(set 0, mb, quotient as u32);
    reg!(set 1, mb, remainder as u32);
    reg!(set 3, mb, quotient.unsigned_abs());
}

fn swi_sqrt<T: WithCpu>(mb: &mut T) {
    let value = reg!(get 0, mb);
    reg!(set 0, mb, (value as f64).sqrt() as u32);
}

/// ArcTan2: angle of (x, y) in [0, 0x10000) units per full turn, 16.16
/// fixed-point inputs.
fn swi_arctan2<T: WithCpu>(mb: &mut T) {
    let x = reg!(get 0, mb) as i32 as f64 / 16384.0;
    let y = reg!(get 1, mb) as i32 as f64 / 16384.0;
    let angle = y.atan2(x) / (2.0 * std::f64::consts::PI);
    let scaled = (angle * 65536.0).round() as i32;
    reg!(set 0, mb, (scaled & 0xFFFF) as u32);
}

/// CpuSet: word/halfword copy or fill, count and mode packed into R2
/// (bits 0-20 count, bit 24 fixed-source fill, bit 26 32-bit width).
fn swi_cpu_set<T: WithCpu + Motherboard>(mb: &mut T) {
    cpu_set(mb, false);
}

/// CpuFastSet: as CpuSet but always 32-bit, count rounded up to a
/// multiple of 8 words, on real hardware running faster via block
/// transfers. Implemented identically here since no-timing-fidelity for
/// BIOS calls is already a stated simplification.
fn swi_cpu_fast_set<T: WithCpu + Motherboard>(mb: &mut T) {
    cpu_set(mb, true);
}

fn cpu_set<T: WithCpu + Motherboard>(mb: &mut T, fast: bool) {
    let src = reg!(get 0, mb);
    let dst = reg!(get 1, mb);
    let control = reg!(get 2, mb);
    let mut count = control & 0x001F_FFFF;
    let fixed_source = control & 0x0100_0000 != 0;
    let word_width = fast || control & 0x0400_0000 != 0;
    if fast {
        count = (count + 7) & !7;
    }

    let mut src_addr = src;
    let mut dst_addr = dst;
    for _ in 0..count {
        if word_width {
            let v = mb.read32(src_addr, AccessKind::no_billing());
            mb.write32(dst_addr, v, AccessKind::no_billing());
            if !fixed_source {
                src_addr = src_addr.wrapping_add(4);
            }
            dst_addr = dst_addr.wrapping_add(4);
        } else {
            let v = mb.read16(src_addr, AccessKind::no_billing());
            mb.write16(dst_addr, v, AccessKind::no_billing());
            if !fixed_source {
                src_addr = src_addr.wrapping_add(2);
            }
            dst_addr = dst_addr.wrapping_add(2);
        }
    }
}

/// LZ77UnCompReadNormalWrite8/16bit: decompress the header-tagged LZ77
/// stream at R0 into the buffer at R1 (spec §9 supplement; Huffman/RLE/
/// diff-filter variants the original also supports are out of scope).
fn swi_lz77_decompress<T: WithCpu + Motherboard>(mb: &mut T, write8: bool) {
    let src = reg!(get 0, mb);
    let dst = reg!(get 1, mb);
    let header = mb.read32(src, AccessKind::no_billing());
    if header & 0xFF != 0x10 {
        eprintln!("LZ77 decompress: bad header type byte {:02X}", header & 0xFF);
        return;
    }
    let size = header >> 8;
    let mut out: Vec<u8> = Vec::with_capacity(size as usize);
    let mut pos = src + 4;

    while (out.len() as u32) < size {
        let flags = mb.read8(pos, AccessKind::no_billing());
        pos += 1;
        for bit in (0..8).rev() {
            if (out.len() as u32) >= size {
                break;
            }
            if flags & (1 << bit) == 0 {
                out.push(mb.read8(pos, AccessKind::no_billing()));
                pos += 1;
            } else {
                let b0 = mb.read8(pos, AccessKind::no_billing()) as u32;
                let b1 = mb.read8(pos + 1, AccessKind::no_billing()) as u32;
                pos += 2;
                let length = (b0 >> 4) + 3;
                let disp = ((b0 & 0xF) << 8 | b1) + 1;
                let start = out.len() as u32 - disp;
                for i in 0..length {
                    let byte = out[(start + i) as usize];
                    out.push(byte);
                }
            }
        }
    }

    if write8 {
        for (i, byte) in out.iter().enumerate() {
            mb.write8(dst + i as u32, *byte, AccessKind::no_billing());
        }
    } else {
        for (i, chunk) in out.chunks(2).enumerate() {
            let lo = chunk[0];
            let hi = *chunk.get(1).unwrap_or(&0);
            mb.write16(
                dst + (i as u32) * 2,
                u16::from_le_bytes([lo, hi]),
                AccessKind::no_billing(),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::bus::Bus;
    use crate::devices::cpu::Cpu;

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
        fn hle_enabled(&self) -> bool {
            true
        }
    }

    fn harness() -> Harness {
        Harness {
            cpu: Cpu::new(),
            bus: Bus::new(),
        }
    }

    #[test]
    fn div_computes_quotient_remainder_and_abs() {
        let mut h = harness();
        reg!(set 0, h, (-7i32) as u32);
        reg!(set 1, h, 2);
        swi_div(&mut h);
        assert_eq!(reg!(get 0, h) as i32, -3);
        assert_eq!(reg!(get 1, h) as i32, -1);
        assert_eq!(reg!(get 3, h), 3);
    }

    #[test]
    fn sqrt_truncates_to_integer() {
        let mut h = harness();
        reg!(set 0, h, 17);
        swi_sqrt(&mut h);
        assert_eq!(reg!(get 0, h), 4);
    }

    #[test]
    fn cpu_set_word_copy_moves_memory() {
        let mut h = harness();
        h.bus.write32(0x0200_0000, 0xCAFEBABE, AccessKind::no_billing());
        reg!(set 0, h, 0x0200_0000);
        reg!(set 1, h, 0x0200_0100);
        reg!(set 2, h, 1 | 0x0400_0000); // 1 word, 32-bit width
        swi_cpu_set(&mut h);
        assert_eq!(
            h.bus.read32(0x0200_0100, AccessKind::no_billing()),
            0xCAFEBABE
        );
    }
}
