//! Direct ARM/Thumb opcode dispatch tests against a bare `Cpu` + `Bus`,
//! mirroring the teacher's `tests/bus.rs` style of exercising a core piece
//! in isolation from the rest of the machine.

extern crate advance_core;

use advance_core::devices::bus::{AccessKind, Bus, Motherboard};
use advance_core::devices::cartridge::Cartridge;
use advance_core::devices::cpu::structs::Cpsr;
use advance_core::devices::cpu::{arm, refill_pipeline, step, thumb, Cpu, WithCpu};
use advance_core::devices::interrupts::InterruptController;
use advance_core::{reg, state};

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
fn adds_detects_signed_overflow_crossing_into_negative() {
    let mut h = harness();
    reg!(set 1, h, 0x7FFF_FFFF);
    reg!(set 2, h, 1);
    let mut irq = InterruptController::new();

    // ADDS R0, R1, R2
    arm::execute(&mut h, 0xE091_0002, &mut irq);

    assert_eq!(reg!(get 0, h), 0x8000_0000);
    assert!(state!(get cpsr, h).flag(Cpsr::N));
    assert!(!state!(get cpsr, h).flag(Cpsr::Z));
    assert!(!state!(get cpsr, h).flag(Cpsr::C));
    assert!(state!(get cpsr, h).flag(Cpsr::V));
}

#[test]
fn thumb_long_branch_link_sets_return_address_and_refills_pipeline() {
    let mut h = harness();
    // ROM is read-only on the bus, so the opcode pair has to be baked into
    // the cartridge image itself rather than written through the bus.
    let mut rom = vec![0u8; 0x200];
    rom[0x100..0x102].copy_from_slice(&0xF000u16.to_le_bytes()); // BL +2, high half
    rom[0x102..0x104].copy_from_slice(&0xF801u16.to_le_bytes()); // BL +2, low half
    h.bus.cart = Some(Cartridge::new(rom, None).unwrap());

    reg!(set 15, h, 0x0800_0100);
    h.cpu.state.cpsr.set_thumb(true);
    refill_pipeline(&mut h);

    let mut irq = InterruptController::new();
    step(&mut h, &mut irq); // high half: latches R14
    step(&mut h, &mut irq); // low half: branches and refills the pipeline

    assert_eq!(reg!(get 14, h), 0x0800_0105);
    // r15 always reads two instructions ahead of what's actually executing
    // next, so the branch target itself is four bytes behind the raw value.
    assert_eq!(reg!(get 15, h) - 4, 0x0800_0106);
}

#[test]
fn thumb_dispatch_reaches_format19_for_high_and_low_halves() {
    // Sanity check on the format dispatcher used above: both halves of a
    // long branch route to the same handler, distinguished by bit 11.
    let mut h = harness();
    reg!(set 15, h, 0x0000_0004);
    reg!(set 14, h, 0x0000_0000);
    h.cpu.state.cpsr.set_thumb(true);
    let mut irq = InterruptController::new();
    thumb::execute(&mut h, 0xF000, &mut irq);
    assert_eq!(reg!(get 14, h), 0x0000_0004);
}
