// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::fmt;

use bytes::{BufMut, BytesMut};
use uuid::Uuid;

use super::{MsgType, Reader, WireError};

/// 128-bit random correlation token attached to every print request and
/// echoed in its response. Both halves travel little-endian on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestCode {
    part1: u64,
    part2: u64,
}

impl RequestCode {
    /// Generates a fresh code from OS entropy.
    pub fn generate() -> Self {
        let (part1, part2) = Uuid::new_v4().as_u64_pair();
        Self { part1, part2 }
    }

    pub fn from_parts(part1: u64, part2: u64) -> Self {
        Self { part1, part2 }
    }

    pub fn part1(&self) -> u64 {
        self.part1
    }

    pub fn part2(&self) -> u64 {
        self.part2
    }

    pub(crate) fn encode(&self, out: &mut BytesMut) {
        out.put_u64_le(self.part1);
        out.put_u64_le(self.part2);
    }

    pub(crate) fn decode(r: &mut Reader<'_>) -> Result<Self, WireError> {
        let part1 = r.u64_le("truncated request code")?;
        let part2 = r.u64_le("truncated request code")?;
        Ok(Self { part1, part2 })
    }
}

impl fmt::Display for RequestCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}{:016x}", self.part1, self.part2)
    }
}

/// `PRINT`: `[tag=2][request_code:16][gcode_len:u64 LE][gcode]`. The G-code
/// length must account for every remaining byte of the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrintMsg {
    pub request_code: RequestCode,
    pub gcode: String,
}

impl PrintMsg {
    /// A new print request; the correlation code is drawn on construction.
    pub fn new(gcode: impl Into<String>) -> Self {
        Self { request_code: RequestCode::generate(), gcode: gcode.into() }
    }

    pub fn encode(&self, out: &mut BytesMut) {
        out.put_u8(MsgType::Print.as_u8());
        self.request_code.encode(out);
        out.put_u64_le(self.gcode.len() as u64);
        out.put_slice(self.gcode.as_bytes());
    }

    pub fn decode(buf: &[u8]) -> Result<(Self, usize), WireError> {
        let mut r = Reader::new(buf);
        r.expect_tag(MsgType::Print)?;
        let request_code = RequestCode::decode(&mut r)?;
        let len_at = r.pos();
        let gcode_len = r.u64_le("truncated gcode length")?;
        if gcode_len != r.remaining() as u64 {
            return Err(WireError::Malformed { kind: "gcode length mismatch", position: len_at });
        }
        let gcode = r.string(gcode_len as usize, "invalid gcode payload")?;
        Ok((Self { request_code, gcode }, r.pos()))
    }
}
