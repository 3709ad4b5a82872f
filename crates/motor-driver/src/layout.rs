//! Bit layouts of the EVO command and status frames.
//!
//! The 8 payload bytes are treated as one big-endian 64-bit word; a field is
//! addressed by its offset from the most significant bit and its width. Each
//! device family is a pair of tables, so adding a model means adding data here.

/// A bit field inside the 64-bit frame word, counted from the MSB of byte 0.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct BitField {
    pub offset: u8,
    pub width: u8,
}

impl BitField {
    pub const fn new(offset: u8, width: u8) -> Self {
        Self { offset, width }
    }

    pub fn max_raw(self) -> u32 {
        ((1u64 << self.width) - 1) as u32
    }

    fn shift(self) -> u32 {
        64 - u32::from(self.offset) - u32::from(self.width)
    }

    pub fn put(self, word: &mut u64, raw: u32) {
        let mask = u64::from(self.max_raw());
        *word &= !(mask << self.shift());
        *word |= (u64::from(raw) & mask) << self.shift();
    }

    pub fn get(self, word: u64) -> u32 {
        ((word >> self.shift()) & u64::from(self.max_raw())) as u32
    }
}

/// Which physical range the status effort field is scaled with.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EffortScale {
    Torque,
    Current,
}

#[derive(Clone, Copy, Debug)]
pub struct CommandLayout {
    /// Fields with a constant value (e.g. mode-switch bits).
    pub fixed: &'static [(BitField, u32)],
    pub pos: BitField,
    pub vel: BitField,
    pub kp: BitField,
    pub kd: BitField,
    pub torque: BitField,
}

#[derive(Clone, Copy, Debug)]
pub struct StatusLayout {
    pub pos: BitField,
    pub vel: BitField,
    pub effort: BitField,
    pub effort_scale: EffortScale,
    pub error: BitField,
    pub mos_temp: BitField,
    pub coil_temp: Option<BitField>,
}

#[derive(Clone, Copy, Debug)]
pub struct FrameLayout {
    pub command: CommandLayout,
    pub status: StatusLayout,
}

pub static REVO_4310_LAYOUT: FrameLayout = FrameLayout {
    command: CommandLayout {
        fixed: &[],
        pos: BitField::new(0, 16),
        vel: BitField::new(16, 12),
        kp: BitField::new(28, 12),
        kd: BitField::new(40, 12),
        torque: BitField::new(52, 12),
    },
    status: StatusLayout {
        pos: BitField::new(8, 16),
        vel: BitField::new(24, 12),
        effort: BitField::new(36, 12),
        effort_scale: EffortScale::Torque,
        error: BitField::new(48, 8),
        mos_temp: BitField::new(56, 8),
        coil_temp: None,
    },
};

pub static ENCOS_8108_LAYOUT: FrameLayout = FrameLayout {
    command: CommandLayout {
        // user-mode switch bits, 0 keeps the MIT servo mode
        fixed: &[(BitField::new(0, 3), 0)],
        kp: BitField::new(3, 12),
        kd: BitField::new(15, 9),
        pos: BitField::new(24, 16),
        vel: BitField::new(40, 12),
        torque: BitField::new(52, 12),
    },
    status: StatusLayout {
        error: BitField::new(3, 5),
        pos: BitField::new(8, 16),
        vel: BitField::new(24, 12),
        effort: BitField::new(36, 12),
        effort_scale: EffortScale::Current,
        mos_temp: BitField::new(48, 8),
        coil_temp: Some(BitField::new(56, 8)),
    },
};

#[cfg(test)]
mod tests {
    use super::*;

    fn command_fields(layout: &CommandLayout) -> Vec<BitField> {
        let mut fields: Vec<BitField> = layout.fixed.iter().map(|(f, _)| *f).collect();
        fields.extend([layout.pos, layout.vel, layout.kp, layout.kd, layout.torque]);
        fields
    }

    #[test]
    fn test_command_layouts_tile_the_frame() {
        for layout in [&REVO_4310_LAYOUT, &ENCOS_8108_LAYOUT] {
            let mut fields = command_fields(&layout.command);
            fields.sort_by_key(|f| f.offset);
            let mut next = 0u8;
            for f in fields {
                assert_eq!(f.offset, next, "gap or overlap at bit {next}");
                next += f.width;
            }
            assert_eq!(next, 64);
        }
    }

    #[test]
    fn test_put_get_bit_positions() {
        let mut word = 0u64;
        BitField::new(0, 16).put(&mut word, 0xABCD);
        BitField::new(16, 12).put(&mut word, 0x123);
        BitField::new(60, 4).put(&mut word, 0xF);
        assert_eq!(word.to_be_bytes(), [0xAB, 0xCD, 0x12, 0x30, 0, 0, 0, 0x0F]);
        assert_eq!(BitField::new(16, 12).get(word), 0x123);
        // put masks oversized values and overwrites the old content
        BitField::new(16, 12).put(&mut word, 0xF456);
        assert_eq!(BitField::new(16, 12).get(word), 0x456);
        assert_eq!(BitField::new(0, 16).get(word), 0xABCD);
    }
}
