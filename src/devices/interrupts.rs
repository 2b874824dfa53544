//! Interrupt controller: IE/IF/IME plus halt-wake (spec §4.4).

bitflags! {
    /// The 14 interrupt sources, shared by IE and IF (spec §4.4).
    #[derive(Default)]
    pub struct IrqSource: u16 {
        const VBLANK    = 1 << 0;
        const HBLANK    = 1 << 1;
        const VCOUNT    = 1 << 2;
        const TIMER0    = 1 << 3;
        const TIMER1    = 1 << 4;
        const TIMER2    = 1 << 5;
        const TIMER3    = 1 << 6;
        const SERIAL    = 1 << 7;
        const DMA0      = 1 << 8;
        const DMA1      = 1 << 9;
        const DMA2      = 1 << 10;
        const DMA3      = 1 << 11;
        const KEYPAD    = 1 << 12;
        const GAMEPAK   = 1 << 13;
    }
}

#[derive(Debug, Default)]
pub struct InterruptController {
    pub ie: IrqSource,
    pub iflags: IrqSource,
    pub ime: bool,
    pub halted: bool,
}

impl InterruptController {
    pub fn new() -> InterruptController {
        InterruptController {
            ie: IrqSource::empty(),
            iflags: IrqSource::empty(),
            ime: false,
            halted: false,
        }
    }

    pub fn raise(&mut self, source: IrqSource) {
        self.iflags.insert(source);
        // Any newly-pending enabled source wakes the CPU from halt
        // regardless of IME (spec §4.4).
        if !(self.ie & self.iflags).is_empty() {
            self.halted = false;
        }
    }

    /// IF is write-one-to-clear: a written 1 bit clears the corresponding
    /// pending flag, a written 0 bit leaves it untouched.
    pub fn write_if(&mut self, value: u16) {
        self.iflags.bits &= !value;
    }

    pub fn pending(&self) -> bool {
        self.ime && !(self.ie & self.iflags).is_empty()
    }

    pub fn halt(&mut self) {
        self.halted = true;
    }
}
