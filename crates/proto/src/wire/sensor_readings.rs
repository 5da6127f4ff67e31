// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::collections::BTreeMap;

use bytes::{BufMut, BytesMut};

use super::{ensure_printable, len_u8, MsgType, Reader, WireError};
use crate::state::SensorValue;

const FLAG_SET_POINT: u8 = 0x01;

/// `SENSOR_READINGS`: `[tag=8][count:u8]` followed by `count` records of
/// `[flags:u8][name_len:u8][unit_len:u8][current:f64 LE]`, an optional
/// `[set_point:f64 LE]` when `flags & 1`, then the name and unit bytes.
/// Names and units carry only printable bytes.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SensorReadingsMsg {
    pub readings: BTreeMap<String, SensorValue>,
}

impl SensorReadingsMsg {
    pub fn new(readings: BTreeMap<String, SensorValue>) -> Self {
        Self { readings }
    }

    pub fn encode(&self, out: &mut BytesMut) -> Result<(), WireError> {
        let count = u8::try_from(self.readings.len())
            .map_err(|_| WireError::Oversize { field: "sensor reading count", len: self.readings.len() })?;
        out.put_u8(MsgType::SensorReadings.as_u8());
        out.put_u8(count);
        for (name, value) in &self.readings {
            let name_len = len_u8(name, "sensor name")?;
            let unit_len = match &value.unit {
                Some(unit) => len_u8(unit, "sensor unit")?,
                None => 0,
            };
            let mut flags = 0u8;
            if value.set_point.is_some() {
                flags |= FLAG_SET_POINT;
            }
            out.put_u8(flags);
            out.put_u8(name_len);
            out.put_u8(unit_len);
            out.put_f64_le(value.current);
            if let Some(sp) = value.set_point {
                out.put_f64_le(sp);
            }
            out.put_slice(name.as_bytes());
            if let Some(unit) = &value.unit {
                out.put_slice(unit.as_bytes());
            }
        }
        Ok(())
    }

    pub fn decode(buf: &[u8]) -> Result<(Self, usize), WireError> {
        let mut r = Reader::new(buf);
        r.expect_tag(MsgType::SensorReadings)?;
        let count = r.u8("truncated reading count")?;
        let mut readings = BTreeMap::new();
        for _ in 0..count {
            let flags = r.u8("truncated reading header")?;
            let name_len = r.u8("truncated reading header")? as usize;
            let unit_len = r.u8("truncated reading header")? as usize;
            let current = r.f64_le("truncated reading value")?;
            let set_point = if flags & FLAG_SET_POINT != 0 {
                Some(r.f64_le("truncated set point")?)
            } else {
                None
            };
            let name_at = r.pos();
            let name = r.string(name_len, "invalid sensor name")?;
            ensure_printable(&name, "unprintable sensor name", name_at)?;
            let unit = if unit_len > 0 {
                let unit_at = r.pos();
                let unit = r.string(unit_len, "invalid sensor unit")?;
                ensure_printable(&unit, "unprintable sensor unit", unit_at)?;
                Some(unit)
            } else {
                None
            };
            readings.insert(name, SensorValue { current, set_point, unit });
        }
        Ok((Self { readings }, r.pos()))
    }
}
