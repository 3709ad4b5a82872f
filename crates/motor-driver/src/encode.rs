use crate::layout::BitField;
use crate::types::{FlashParam, MitCommand, MotorModel, KP_MAX};
use can_transport::{CanFrame, CanId};
use tracing::debug;

/// Register (SDO-style) requests go to this base plus the motor id.
pub const REGISTER_ID_BASE: u16 = 0x600;

const SDO_READ: u8 = 0x40;
const SDO_WRITE: u8 = 0x23;
const SDO_SAVE: u8 = 0x2B;
const SAVE_INDEX: u16 = 0x1010;
const SAVE_SIGNATURE: [u8; 4] = *b"save";

/// Fixed administrative payloads: seven 0xFF bytes and a distinguishing last byte.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AdminCommand {
    /// Enter motor (control) mode.
    Lock,
    /// Leave motor mode.
    Unlock,
    SetZero,
    /// Reset mode also clears latched faults.
    ClearError,
    /// Re-entering motor mode makes the device answer with a status frame.
    Refresh,
}

impl AdminCommand {
    pub fn final_byte(self) -> u8 {
        match self {
            AdminCommand::Lock | AdminCommand::Refresh => 0xFC,
            AdminCommand::Unlock | AdminCommand::ClearError => 0xFD,
            AdminCommand::SetZero => 0xFE,
        }
    }

    pub fn payload(self) -> [u8; 8] {
        let mut data = [0xFF; 8];
        data[7] = self.final_byte();
        data
    }
}

/// Command payload plus how many fields had to be clamped into range.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct EncodedCommand {
    pub data: [u8; 8],
    pub clamped: u32,
}

/// Affine map of `x` in `[min, max]` onto `0..=2^nbits-1`, rounding to nearest.
pub fn map_to_uint(x: f32, min: f32, max: f32, nbits: u32) -> u32 {
    let hi = ((1u64 << nbits) - 1) as f32;
    if !(min < max) {
        return 0;
    }
    let mut y = (x - min) / (max - min);
    if y.is_nan() {
        y = 0.0;
    }
    (y.clamp(0.0, 1.0) * hi).round() as u32
}

/// Inverse of [`map_to_uint`].
pub fn unmap_from_uint(u: u32, min: f32, max: f32, nbits: u32) -> f32 {
    if !(min < max) {
        return min;
    }
    let hi = ((1u64 << nbits) - 1) as f32;
    let y = (u as f32) / hi;
    min + y * (max - min)
}

fn clamp_field(name: &'static str, x: f32, min: f32, max: f32, clamped: &mut u32) -> f32 {
    if x.is_nan() {
        *clamped += 1;
        debug!(field = name, "NaN command field replaced by 0");
        return 0.0_f32.clamp(min, max);
    }
    if x < min || x > max {
        *clamped += 1;
        debug!(field = name, value = x, min, max, "command field clamped");
    }
    x.clamp(min, max)
}

fn put_scaled(word: &mut u64, field: BitField, x: f32, min: f32, max: f32) {
    field.put(word, map_to_uint(x, min, max, u32::from(field.width)));
}

/// Pack an MIT command for `model`. Out-of-range inputs are clamped, never rejected.
pub fn encode_command(model: MotorModel, cmd: &MitCommand) -> EncodedCommand {
    let lim = model.limits();
    let layout = &model.layout().command;
    let mut clamped = 0;

    let pos = clamp_field("pos", cmd.pos, -lim.pos_max, lim.pos_max, &mut clamped);
    let vel = clamp_field("vel", cmd.vel, -lim.vel_max, lim.vel_max, &mut clamped);
    let kp = clamp_field("kp", cmd.kp, 0.0, KP_MAX, &mut clamped);
    let kd = clamp_field("kd", cmd.kd, 0.0, lim.kd_max, &mut clamped);
    let torque = clamp_field("torque", cmd.torque, -lim.tau_max, lim.tau_max, &mut clamped);

    let mut word = 0u64;
    for (field, value) in layout.fixed {
        field.put(&mut word, *value);
    }
    put_scaled(&mut word, layout.pos, pos, -lim.pos_max, lim.pos_max);
    put_scaled(&mut word, layout.vel, vel, -lim.vel_max, lim.vel_max);
    put_scaled(&mut word, layout.kp, kp, 0.0, KP_MAX);
    put_scaled(&mut word, layout.kd, kd, 0.0, lim.kd_max);
    put_scaled(&mut word, layout.torque, torque, -lim.tau_max, lim.tau_max);

    EncodedCommand {
        data: word.to_be_bytes(),
        clamped,
    }
}

/// Unpack a command payload; the device side of [`encode_command`].
pub fn decode_command(model: MotorModel, data: &[u8; 8]) -> MitCommand {
    let lim = model.limits();
    let layout = &model.layout().command;
    let word = u64::from_be_bytes(*data);
    let get = |field: BitField, min: f32, max: f32| {
        unmap_from_uint(field.get(word), min, max, u32::from(field.width))
    };
    MitCommand {
        pos: get(layout.pos, -lim.pos_max, lim.pos_max),
        vel: get(layout.vel, -lim.vel_max, lim.vel_max),
        kp: get(layout.kp, 0.0, KP_MAX),
        kd: get(layout.kd, 0.0, lim.kd_max),
        torque: get(layout.torque, -lim.tau_max, lim.tau_max),
    }
}

/// Identifier of the register channel of `motor_id`.
pub fn register_id(motor_id: u16) -> Option<CanId> {
    CanId::from_raw(u32::from(REGISTER_ID_BASE) + u32::from(motor_id))
}

pub fn read_register_frame(id: CanId, index: u16, subindex: u8) -> CanFrame {
    let [lo, hi] = index.to_le_bytes();
    CanFrame::data8(id, [SDO_READ, lo, hi, subindex, 0, 0, 0, 0])
}

pub fn read_param_frame(id: CanId, param: FlashParam) -> CanFrame {
    read_register_frame(id, param.index(), 0)
}

pub fn write_register_frame(id: CanId, index: u16, subindex: u8, value: i32) -> CanFrame {
    let [lo, hi] = index.to_le_bytes();
    let [v0, v1, v2, v3] = value.to_le_bytes();
    CanFrame::data8(id, [SDO_WRITE, lo, hi, subindex, v0, v1, v2, v3])
}

pub fn save_register_frame(id: CanId, rid: u8) -> CanFrame {
    let [lo, hi] = SAVE_INDEX.to_le_bytes();
    let [s0, s1, s2, s3] = SAVE_SIGNATURE;
    CanFrame::data8(id, [SDO_SAVE, lo, hi, rid, s0, s1, s2, s3])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_map_boundaries() {
        assert_eq!(map_to_uint(-12.5, -12.5, 12.5, 16), 0);
        assert_eq!(map_to_uint(12.5, -12.5, 12.5, 16), 0xFFFF);
        assert_eq!(map_to_uint(0.0, 0.0, 5.0, 9), 0);
        assert_eq!(map_to_uint(5.0, 0.0, 5.0, 9), 511);
        assert_eq!(map_to_uint(0.0, -12.5, 12.5, 16), 1 << 15);
        // saturates outside the range, degenerate range maps to 0
        assert_eq!(map_to_uint(99.0, -1.0, 1.0, 12), 4095);
        assert_eq!(map_to_uint(-99.0, -1.0, 1.0, 12), 0);
        assert_eq!(map_to_uint(0.3, 1.0, 1.0, 12), 0);
    }

    #[test]
    fn test_range_map_monotonic() {
        let mut last = 0;
        for i in 0..=1000 {
            let x = -10.0 + 20.0 * i as f32 / 1000.0;
            let raw = map_to_uint(x, -10.0, 10.0, 12);
            assert!(raw >= last);
            last = raw;
        }
        assert_eq!(last, 4095);
    }

    #[test]
    fn test_unmap_within_one_step() {
        for (min, max, bits) in [(-12.5f32, 12.5f32, 16u32), (-18.0, 18.0, 12), (0.0, 5.0, 9)] {
            let step = (max - min) / ((1u32 << bits) - 1) as f32;
            for i in 0..=200 {
                let x = min + (max - min) * i as f32 / 200.0;
                let back = unmap_from_uint(map_to_uint(x, min, max, bits), min, max, bits);
                assert!((back - x).abs() <= step, "{x} -> {back} ({bits} bits)");
            }
        }
    }

    #[test]
    fn test_zero_command_is_mid_scale() {
        let enc = encode_command(MotorModel::Revo4310, &MitCommand::default());
        assert_eq!(u16::from_be_bytes([enc.data[0], enc.data[1]]), 0x8000);
        assert_eq!(enc.clamped, 0);

        let enc = encode_command(MotorModel::Encos8108, &MitCommand::default());
        assert_eq!(u16::from_be_bytes([enc.data[3], enc.data[4]]), 0x8000);
        assert_eq!(enc.data[0] >> 5, 0, "mode-switch bits stay clear");
    }

    #[test]
    fn test_revo_byte_layout() {
        // full-scale extremes make every field all-ones or all-zeros
        let cmd = MitCommand::new(12.5, -10.0, 500.0, 0.0, 50.0);
        let enc = encode_command(MotorModel::Revo4310, &cmd);
        assert_eq!(enc.data, [0xFF, 0xFF, 0x00, 0x0F, 0xFF, 0x00, 0x0F, 0xFF]);

        let cmd = MitCommand::new(-12.5, 10.0, 0.0, 50.0, -50.0);
        let enc = encode_command(MotorModel::Revo4310, &cmd);
        assert_eq!(enc.data, [0x00, 0x00, 0xFF, 0xF0, 0x00, 0xFF, 0xF0, 0x00]);
    }

    #[test]
    fn test_encos_byte_layout() {
        let cmd = MitCommand::new(-12.5, -18.0, 500.0, 0.0, -150.0);
        let enc = encode_command(MotorModel::Encos8108, &cmd);
        // kp: 5 bits in byte 0, 7 bits at the top of byte 1; kd 9 bits clear
        assert_eq!(enc.data, [0x1F, 0xFE, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]);

        let cmd = MitCommand::new(12.5, 18.0, 0.0, 5.0, 150.0);
        let enc = encode_command(MotorModel::Encos8108, &cmd);
        assert_eq!(enc.data, [0x00, 0x01, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]);
    }

    #[test]
    fn test_out_of_range_is_clamped_and_counted() {
        let cmd = MitCommand::new(100.0, 0.0, 900.0, -1.0, f32::NAN);
        let enc = encode_command(MotorModel::Revo4310, &cmd);
        assert_eq!(enc.clamped, 4);
        let back = decode_command(MotorModel::Revo4310, &enc.data);
        assert!((back.pos - 12.5).abs() < 1e-3);
        assert!((back.kp - KP_MAX).abs() < 1e-3);
        assert!(back.kd.abs() < 1e-3);
        assert!(back.torque.abs() < 50.0 / 2047.0);
    }

    #[test]
    fn test_command_round_trip_both_models() {
        for model in [MotorModel::Revo4310, MotorModel::Encos8108] {
            let lim = model.limits();
            let cmd = MitCommand::new(1.234, -3.5, 42.0, lim.kd_max / 3.0, -7.25);
            let back = decode_command(model, &encode_command(model, &cmd).data);
            assert!((back.pos - cmd.pos).abs() <= 25.0 / 65535.0);
            assert!((back.vel - cmd.vel).abs() <= 2.0 * lim.vel_max / 4095.0);
            assert!((back.kp - cmd.kp).abs() <= KP_MAX / 4095.0);
            let kd_bits = model.layout().command.kd.width;
            assert!((back.kd - cmd.kd).abs() <= lim.kd_max / ((1u32 << kd_bits) - 1) as f32);
            assert!((back.torque - cmd.torque).abs() <= 2.0 * lim.tau_max / 4095.0);
        }
    }

    #[test]
    fn test_admin_payloads() {
        assert_eq!(AdminCommand::Lock.payload(), [0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFC]);
        assert_eq!(AdminCommand::Unlock.final_byte(), 0xFD);
        assert_eq!(AdminCommand::SetZero.final_byte(), 0xFE);
        assert_eq!(AdminCommand::ClearError.payload(), AdminCommand::Unlock.payload());
        assert_eq!(AdminCommand::Refresh.payload(), AdminCommand::Lock.payload());
    }

    #[test]
    fn test_register_frames() {
        let f = read_param_frame(register_id(0x11).unwrap(), FlashParam::TauMax);
        assert_eq!(f.id.raw(), 0x611);
        assert_eq!(f.data, [0x40, 0x04, 0x70, 0x00, 0, 0, 0, 0]);

        let rid = register_id(0x02).unwrap();
        let f = write_register_frame(rid, 0x7006, 1, -2);
        assert_eq!(f.id.raw(), 0x602);
        assert_eq!(f.data, [0x23, 0x06, 0x70, 0x01, 0xFE, 0xFF, 0xFF, 0xFF]);

        let f = save_register_frame(rid, 0x05);
        assert_eq!(f.data, [0x2B, 0x10, 0x10, 0x05, 0x73, 0x61, 0x76, 0x65]);
    }
}
