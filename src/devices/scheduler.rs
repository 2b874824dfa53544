//! Cycle fan-out: drive the CPU one instruction at a time and distribute
//! the cycles it billed to every other subsystem (spec §4.8), mirroring
//! the teacher's `Nes::tick`/`tick_frame` cooperative loop generalized
//! from "one CPU cycle per PPU dot" to "N bus cycles per CPU step".

use std::mem;

use super::cpu;
use super::ppu;
use super::system::System;

pub const CYCLES_PER_FRAME: u64 = 280_896;

/// Run CPU instructions until `target_cycles` have elapsed on the global
/// bus counter, fanning each instruction's cycle cost out to the PPU,
/// timers, and DMA controller in between. Returns the cycle count actually
/// reached (>= target, since a single instruction's cost isn't split).
pub fn run_until(sys: &mut System, target_cycles: u64) -> u64 {
    while sys.bus.cycles < target_cycles {
        step_once(sys);
    }
    sys.bus.cycles
}

/// Advance the whole machine by exactly one CPU instruction (or one idle
/// cycle, while halted/stopped) and settle every dependent subsystem.
///
/// `cpu::step` wants `&mut System` (as the generic `T: WithCpu +
/// Motherboard`) and `&mut InterruptController` at once; since both
/// ultimately borrow from the same `System`, the interrupt controller is
/// swapped out for the duration of the call rather than borrowed
/// alongside, then swapped back in before anything else touches it.
pub fn step_once(sys: &mut System) {
    let cycles_before = sys.bus.cycles;
    let mut irq = mem::take(&mut sys.irq);
    cpu::step(sys, &mut irq);
    sys.irq = irq;
    let cycles_after = sys.bus.cycles;
    let delta = (cycles_after - cycles_before).max(1) as u32;

    sys.timers.tick(delta, &mut sys.irq);
    let events = ppu::tick(&mut sys.ppu, &sys.bus, &mut sys.irq, delta);

    if events.entered_hblank {
        sys.dma.on_hblank(&mut sys.bus, &mut sys.irq);
        // Channel 3's Special start timing is video capture, clocked off
        // the PPU's HBlank for the scanlines the capture window actually
        // covers (VCOUNT 2..=161, GBATek). Channels 1/2's Special timing
        // is the audio FIFO request, which has no trigger source here:
        // this crate doesn't model the sound controller or its FIFOs.
        if (2..=161).contains(&sys.ppu.vcount()) {
            sys.dma.on_special(3, &mut sys.bus, &mut sys.irq);
        }
    }
    if events.entered_vblank {
        sys.dma.on_vblank(&mut sys.bus, &mut sys.irq);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::devices::bus::{AccessKind, Motherboard};

    #[test]
    fn video_capture_special_dma_fires_inside_the_capture_window() {
        let mut sys = System::new(Config::default());
        sys.load_cartridge(vec![0u8; 0x1000], None).unwrap();

        sys.write32(0x0300_0000, 0x1234_5678, AccessKind::no_billing());
        sys.write32(0x0400_00DC, 0x0300_0000, AccessKind::no_billing()); // DMA3SAD
        sys.write32(0x0400_00E0, 0x0300_1000, AccessKind::no_billing()); // DMA3DAD
        sys.write16(0x0400_00E4, 1, AccessKind::no_billing()); // DMA3CNT_L
        sys.write16(0x0400_00E6, 0x200 | 0x20 | 0xC0, AccessKind::no_billing()); // enable, word, special

        // The channel is armed at VCOUNT 0, so the first frame's capture
        // window (2..=161) is still entirely ahead of it.
        sys.run_frame().unwrap();

        assert_eq!(
            sys.read32(0x0300_1000, AccessKind::no_billing()),
            0x1234_5678
        );
    }

    #[test]
    fn audio_fifo_special_dma_never_fires_without_a_trigger_source() {
        let mut sys = System::new(Config::default());
        sys.load_cartridge(vec![0u8; 0x1000], None).unwrap();

        // Channel 1, Special start: real hardware feeds this from the
        // audio FIFO, which this crate doesn't model.
        sys.write32(0x0400_00BC, 0x0300_0000, AccessKind::no_billing()); // DMA1SAD
        sys.write32(0x0400_00C0, 0x0300_1000, AccessKind::no_billing()); // DMA1DAD
        sys.write16(0x0400_00C4, 1, AccessKind::no_billing()); // DMA1CNT_L
        sys.write16(0x0400_00C6, 0x200 | 0x20 | 0xC0, AccessKind::no_billing());

        sys.run_frame().unwrap();
        sys.run_frame().unwrap();

        assert_eq!(sys.read32(0x0300_1000, AccessKind::no_billing()), 0);
    }
}
