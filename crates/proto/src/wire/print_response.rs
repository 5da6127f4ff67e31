// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use bytes::{BufMut, BytesMut};

use super::{MsgType, Reader, RequestCode, WireError};
use crate::state::PrintResult;

/// `PRINT_RESPONSE`: `[tag=3][request_code:16][result:u8]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrintResponseMsg {
    pub request_code: RequestCode,
    pub result: PrintResult,
}

impl PrintResponseMsg {
    pub fn new(request_code: RequestCode, result: PrintResult) -> Self {
        Self { request_code, result }
    }

    pub fn encode(&self, out: &mut BytesMut) {
        out.put_u8(MsgType::PrintResponse.as_u8());
        self.request_code.encode(out);
        out.put_u8(self.result.as_u8());
    }

    pub fn decode(buf: &[u8]) -> Result<(Self, usize), WireError> {
        let mut r = Reader::new(buf);
        r.expect_tag(MsgType::PrintResponse)?;
        let request_code = RequestCode::decode(&mut r)?;
        let at = r.pos();
        let raw = r.u8("truncated print result")?;
        let result = PrintResult::from_u8(raw)
            .ok_or(WireError::Malformed { kind: "invalid print result", position: at })?;
        Ok((Self { request_code, result }, r.pos()))
    }
}
