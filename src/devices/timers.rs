//! Four cascadable timers (spec §4.5).
//!
//! Each timer accumulates bus cycles through a prescaler divider and
//! reloads from a latched value on overflow; a cascading timer instead
//! increments once per overflow of its predecessor, resolved within the
//! same tick so multi-timer cascades settle before the scheduler moves on.

use super::interrupts::{InterruptController, IrqSource};

const PRESCALER_SHIFTS: [u32; 4] = [0, 6, 8, 10];

#[derive(Debug, Default, Clone, Copy)]
pub struct Timer {
    pub reload: u16,
    pub counter: u16,
    pub prescaler_select: u8,
    pub cascade: bool,
    pub irq_enable: bool,
    pub enabled: bool,
    residual: u32,
}

impl Timer {
    pub fn write_control(&mut self, value: u16) {
        let was_enabled = self.enabled;
        self.prescaler_select = (value & 0x3) as u8;
        self.cascade = value & 0x4 != 0;
        self.irq_enable = value & 0x40 != 0;
        self.enabled = value & 0x80 != 0;
        if self.enabled && !was_enabled {
            self.counter = self.reload;
            self.residual = 0;
        }
    }

    pub fn control_bits(&self) -> u16 {
        (self.prescaler_select as u16)
            | if self.cascade { 0x4 } else { 0 }
            | if self.irq_enable { 0x40 } else { 0 }
            | if self.enabled { 0x80 } else { 0 }
    }

    /// Advance by `cycles` bus cycles; returns the number of overflows,
    /// used to drive a cascading successor.
    fn tick_cycles(&mut self, cycles: u32) -> u32 {
        if !self.enabled || self.cascade {
            return 0;
        }
        let shift = PRESCALER_SHIFTS[self.prescaler_select as usize];
        self.residual += cycles;
        let mut overflows = 0;
        let ticks = self.residual >> shift;
        self.residual &= (1 << shift) - 1;
        let mut remaining = ticks;
        while remaining > 0 {
            let room = 0x1_0000 - self.counter as u32;
            if remaining < room {
                self.counter += remaining as u16;
                remaining = 0;
            } else {
                remaining -= room;
                self.counter = self.reload;
                overflows += 1;
            }
        }
        overflows
    }

    /// Advance a cascading timer by one tick of its predecessor's overflow.
    fn cascade_tick(&mut self) -> u32 {
        if !self.enabled || !self.cascade {
            return 0;
        }
        if self.counter == 0xFFFF {
            self.counter = self.reload;
            1
        } else {
            self.counter += 1;
            0
        }
    }
}

#[derive(Debug, Default)]
pub struct TimerBank {
    pub timers: [Timer; 4],
}

impl TimerBank {
    pub fn new() -> TimerBank {
        TimerBank::default()
    }

    /// Advance all four timers by `cycles` bus cycles, propagating cascade
    /// overflows left-to-right within this single call so a chain of
    /// cascading timers settles before returning, and raising IRQs for any
    /// timer that overflowed with its interrupt enabled.
    pub fn tick(&mut self, cycles: u32, irq: &mut InterruptController) {
        let mut carry = 0u32;
        const IRQ_SOURCES: [IrqSource; 4] = [
            IrqSource::TIMER0,
            IrqSource::TIMER1,
            IrqSource::TIMER2,
            IrqSource::TIMER3,
        ];
        for i in 0..4 {
            let overflows = if self.timers[i].cascade {
                let mut total = 0;
                for _ in 0..carry {
                    total += self.timers[i].cascade_tick();
                }
                total
            } else {
                self.timers[i].tick_cycles(cycles)
            };
            if overflows > 0 && self.timers[i].irq_enable {
                irq.raise(IRQ_SOURCES[i]);
            }
            carry = overflows;
        }
    }

    pub fn counter_value(&self, index: usize) -> u16 {
        self.timers[index].counter
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overflow_reloads_and_raises_irq() {
        let mut bank = TimerBank::new();
        let mut irq = InterruptController::new();
        bank.timers[0].reload = 0xFFFE;
        bank.timers[0].write_control(0x80 | 0x40); // enabled, irq on, prescaler /1
        bank.tick(1, &mut irq);
        assert_eq!(bank.timers[0].counter, 0xFFFF);
        assert!(!irq.iflags.contains(IrqSource::TIMER0));
        bank.tick(1, &mut irq);
        assert_eq!(bank.timers[0].counter, 0xFFFE);
        assert!(irq.iflags.contains(IrqSource::TIMER0));
    }

    #[test]
    fn cascade_increments_on_predecessor_overflow() {
        let mut bank = TimerBank::new();
        let mut irq = InterruptController::new();
        bank.timers[0].reload = 0xFFFF;
        bank.timers[0].write_control(0x80);
        bank.timers[1].write_control(0x80 | 0x4); // enabled, cascade
        bank.tick(1, &mut irq);
        assert_eq!(bank.timers[1].counter, 1);
    }
}
