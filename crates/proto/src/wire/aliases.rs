// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Alias messages: the retained full-table dump (`ALIASES`) and the two
//! write requests (`ALIASES_SET`, `ALIASES_SET_PROVIDER`).

use std::collections::BTreeMap;

use bytes::{BufMut, BytesMut};

use super::{len_u8, MsgType, Reader, WireError};

/// `ALIASES`: `[tag=5][provider_alias_len:u8][provider_alias]` followed by
/// `[device_name_len:u8][device_alias_len:u8][device_name][device_alias]`
/// entries until the end of the payload. An absent provider alias is
/// encoded as a zero-length string.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AliasesMsg {
    pub provider_alias: String,
    pub aliases: BTreeMap<String, String>,
}

impl AliasesMsg {
    pub fn encode(&self, out: &mut BytesMut) -> Result<(), WireError> {
        let pa_len = len_u8(&self.provider_alias, "provider alias")?;
        out.put_u8(MsgType::Aliases.as_u8());
        out.put_u8(pa_len);
        out.put_slice(self.provider_alias.as_bytes());
        for (device, alias) in &self.aliases {
            let name_len = len_u8(device, "device name")?;
            let alias_len = len_u8(alias, "device alias")?;
            out.put_u8(name_len);
            out.put_u8(alias_len);
            out.put_slice(device.as_bytes());
            out.put_slice(alias.as_bytes());
        }
        Ok(())
    }

    pub fn decode(buf: &[u8]) -> Result<(Self, usize), WireError> {
        let mut r = Reader::new(buf);
        r.expect_tag(MsgType::Aliases)?;
        let pa_len = r.u8("truncated provider alias length")? as usize;
        let provider_alias = r.string(pa_len, "invalid provider alias")?;
        let mut aliases = BTreeMap::new();
        while r.remaining() > 0 {
            let name_len = r.u8("truncated device name length")? as usize;
            let alias_len = r.u8("truncated device alias length")? as usize;
            let device = r.string(name_len, "invalid device name")?;
            let alias = r.string(alias_len, "invalid device alias")?;
            aliases.insert(device, alias);
        }
        Ok((Self { provider_alias, aliases }, r.pos()))
    }
}

/// `ALIASES_SET`: `[tag=6][device_name_len:u8][device_alias_len:u8]`
/// followed by both strings. An empty alias requests removal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AliasesSetMsg {
    pub device_name: String,
    pub device_alias: String,
}

impl AliasesSetMsg {
    pub fn new(device_name: impl Into<String>, device_alias: impl Into<String>) -> Self {
        Self { device_name: device_name.into(), device_alias: device_alias.into() }
    }

    pub fn encode(&self, out: &mut BytesMut) -> Result<(), WireError> {
        let name_len = len_u8(&self.device_name, "device name")?;
        let alias_len = len_u8(&self.device_alias, "device alias")?;
        out.put_u8(MsgType::AliasesSet.as_u8());
        out.put_u8(name_len);
        out.put_u8(alias_len);
        out.put_slice(self.device_name.as_bytes());
        out.put_slice(self.device_alias.as_bytes());
        Ok(())
    }

    pub fn decode(buf: &[u8]) -> Result<(Self, usize), WireError> {
        let mut r = Reader::new(buf);
        r.expect_tag(MsgType::AliasesSet)?;
        let name_len = r.u8("truncated device name length")? as usize;
        let alias_len = r.u8("truncated device alias length")? as usize;
        let device_name = r.string(name_len, "invalid device name")?;
        let device_alias = r.string(alias_len, "invalid device alias")?;
        Ok((Self { device_name, device_alias }, r.pos()))
    }
}

/// `ALIASES_SET_PROVIDER`: `[tag=7][provider_alias_len:u8][provider_alias]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AliasesSetProviderMsg {
    pub provider_alias: String,
}

impl AliasesSetProviderMsg {
    pub fn new(provider_alias: impl Into<String>) -> Self {
        Self { provider_alias: provider_alias.into() }
    }

    pub fn encode(&self, out: &mut BytesMut) -> Result<(), WireError> {
        let len = len_u8(&self.provider_alias, "provider alias")?;
        out.put_u8(MsgType::AliasesSetProvider.as_u8());
        out.put_u8(len);
        out.put_slice(self.provider_alias.as_bytes());
        Ok(())
    }

    pub fn decode(buf: &[u8]) -> Result<(Self, usize), WireError> {
        let mut r = Reader::new(buf);
        r.expect_tag(MsgType::AliasesSetProvider)?;
        let len = r.u8("truncated provider alias length")? as usize;
        let provider_alias = r.string(len, "invalid provider alias")?;
        Ok((Self { provider_alias }, r.pos()))
    }
}
