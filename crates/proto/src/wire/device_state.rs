// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use bytes::{BufMut, BytesMut};

use super::{MsgType, Reader, WireError};
use crate::state::DeviceState;

/// `DEVICE_STATE`: `[tag=1][state:u8]`, exactly two bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceStateMsg {
    pub state: DeviceState,
}

impl DeviceStateMsg {
    pub fn new(state: DeviceState) -> Self {
        Self { state }
    }

    pub fn encode(&self, out: &mut BytesMut) {
        out.put_u8(MsgType::DeviceState.as_u8());
        out.put_u8(self.state.as_u8());
    }

    pub fn decode(buf: &[u8]) -> Result<(Self, usize), WireError> {
        let mut r = Reader::new(buf);
        r.expect_tag(MsgType::DeviceState)?;
        let at = r.pos();
        let raw = r.u8("truncated device state")?;
        let state = DeviceState::from_u8(raw)
            .ok_or(WireError::Malformed { kind: "invalid device state", position: at })?;
        if r.remaining() != 0 {
            return Err(WireError::Malformed { kind: "trailing bytes", position: r.pos() });
        }
        Ok((Self { state }, r.pos()))
    }
}
