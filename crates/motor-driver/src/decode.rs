use crate::encode::{map_to_uint, unmap_from_uint};
use crate::layout::{BitField, EffortScale};
use crate::types::{MotorLimits, MotorModel, StatusFrame};

fn effort_max(scale: EffortScale, lim: &MotorLimits) -> f32 {
    match scale {
        EffortScale::Torque => lim.tau_max,
        EffortScale::Current => lim.cur_max,
    }
}

/// Decode a status reply. Anything but a full 8-byte payload is rejected.
pub fn decode_status(model: MotorModel, data: &[u8]) -> Option<StatusFrame> {
    let bytes: [u8; 8] = data.try_into().ok()?;
    let word = u64::from_be_bytes(bytes);
    let lim = model.limits();
    let layout = &model.layout().status;
    let scaled = |field: BitField, max: f32| {
        unmap_from_uint(field.get(word), -max, max, u32::from(field.width))
    };
    // error code and temperatures are raw
    let raw = |field: BitField| field.get(word) as u8;

    Some(StatusFrame {
        pos: scaled(layout.pos, lim.pos_max),
        vel: scaled(layout.vel, lim.vel_max),
        effort: scaled(layout.effort, effort_max(layout.effort_scale, &lim)),
        error_code: raw(layout.error),
        mos_temp: raw(layout.mos_temp),
        coil_temp: layout.coil_temp.map(raw),
    })
}

/// Build the status payload a device of `model` would send; `tag` fills
/// the bits the layout does not use (the device echoes its id there).
pub fn encode_status(model: MotorModel, status: &StatusFrame, tag: u8) -> [u8; 8] {
    let lim = model.limits();
    let layout = &model.layout().status;
    let mut word = u64::from(tag) << 56;
    let mut put = |field: BitField, x: f32, max: f32| {
        field.put(&mut word, map_to_uint(x, -max, max, u32::from(field.width)));
    };
    put(layout.pos, status.pos, lim.pos_max);
    put(layout.vel, status.vel, lim.vel_max);
    put(
        layout.effort,
        status.effort,
        effort_max(layout.effort_scale, &lim),
    );
    layout.error.put(&mut word, u32::from(status.error_code));
    layout.mos_temp.put(&mut word, u32::from(status.mos_temp));
    if let Some(field) = layout.coil_temp {
        field.put(&mut word, u32::from(status.coil_temp.unwrap_or(0)));
    }
    word.to_be_bytes()
}
