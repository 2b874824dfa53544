//! DMA and timer behavior exercised entirely through `System`'s public
//! MMIO read/write surface, the way a host embedding this crate would
//! drive it.

extern crate advance_core;

use advance_core::devices::bus::{AccessKind, Motherboard};
use advance_core::devices::interrupts::IrqSource;
use advance_core::{Config, System};

fn new_system_with_cart() -> System {
    let mut sys = System::new(Config::default());
    sys.load_cartridge(vec![0u8; 0x1000], None).unwrap();
    sys
}

#[test]
fn dma0_immediate_word_copy_clears_enable_and_raises_irq_when_requested() {
    let mut sys = new_system_with_cart();

    for i in 0..256u32 {
        sys.write32(0x0200_0000 + i * 4, 0xA5A5_0000 | i, AccessKind::no_billing());
    }

    sys.write16(0x0400_0200, IrqSource::DMA0.bits(), AccessKind::no_billing()); // IE
    sys.write16(0x0400_0208, 1, AccessKind::no_billing()); // IME

    sys.write32(0x0400_00B0, 0x0200_0000, AccessKind::no_billing()); // DMA0SAD
    sys.write32(0x0400_00B4, 0x0200_1000, AccessKind::no_billing()); // DMA0DAD
    sys.write16(0x0400_00B8, 256, AccessKind::no_billing()); // DMA0CNT_L

    // enable | word transfer | irq on complete, immediate start, increment/increment
    let cnt_h = 0x0200 | 0x0020 | 0x0100;
    sys.write16(0x0400_00BA, cnt_h, AccessKind::no_billing());

    for i in 0..256u32 {
        let src = sys.read32(0x0200_0000 + i * 4, AccessKind::no_billing());
        let dst = sys.read32(0x0200_1000 + i * 4, AccessKind::no_billing());
        assert_eq!(src, dst, "word {i} mismatched after DMA copy");
    }

    let cnt_h_after = sys.read16(0x0400_00BA, AccessKind::no_billing());
    assert_eq!(cnt_h_after & 0x0200, 0, "enable bit should clear after a non-repeating transfer");

    let iflags = sys.read16(0x0400_0202, AccessKind::no_billing());
    assert_eq!(iflags & IrqSource::DMA0.bits(), IrqSource::DMA0.bits());
}

#[test]
fn timer1_cascades_off_timer0_overflow() {
    use advance_core::devices::timers::TimerBank;

    let mut bank = TimerBank::new();
    let mut irq = advance_core::devices::interrupts::InterruptController::new();

    bank.timers[0].reload = 0xFFFE;
    bank.timers[0].write_control(0x80); // enabled, prescaler /1
    bank.timers[1].write_control(0x80 | 0x04); // enabled, cascade off T0

    for _ in 0..4 {
        bank.tick(1, &mut irq);
    }

    assert_eq!(bank.counter_value(0), 0xFFFE);
    assert_eq!(bank.counter_value(1), 2);
}
