// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use bytes::{BufMut, BytesMut};

use super::{MsgType, Reader, WireError};

/// `PRINT_PROGRESS`: `[tag=4][percentage:u8][remaining_time:u32 LE]`.
/// `remaining_time` is in minutes; a percentage above 100 is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrintProgressMsg {
    pub percentage: u8,
    pub remaining_time: u32,
}

impl PrintProgressMsg {
    pub fn new(percentage: u8, remaining_time: u32) -> Self {
        Self { percentage, remaining_time }
    }

    pub fn encode(&self, out: &mut BytesMut) {
        out.put_u8(MsgType::PrintProgress.as_u8());
        out.put_u8(self.percentage);
        out.put_u32_le(self.remaining_time);
    }

    pub fn decode(buf: &[u8]) -> Result<(Self, usize), WireError> {
        let mut r = Reader::new(buf);
        r.expect_tag(MsgType::PrintProgress)?;
        let at = r.pos();
        let percentage = r.u8("truncated percentage")?;
        if percentage > 100 {
            return Err(WireError::Malformed { kind: "percentage above 100", position: at });
        }
        let remaining_time = r.u32_le("truncated remaining time")?;
        Ok((Self { percentage, remaining_time }, r.pos()))
    }
}
