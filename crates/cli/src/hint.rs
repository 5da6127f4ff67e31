// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Glob-like device/provider selectors.
//!
//! A hint is an optional `provider/` part followed by a `device` part.
//! `*` matches zero or more characters, `\` escapes the next character
//! literally, and matching is case-sensitive. A hint without a `/` leaves
//! the provider part unconstrained. Quote characters are rejected before
//! they can reach any query surface.

use regex::Regex;

/// A parsed hint with one anchored pattern per part.
#[derive(Debug)]
pub struct Hint {
    provider: Regex,
    device: Regex,
}

impl Hint {
    pub fn parse(hint: &str) -> anyhow::Result<Self> {
        if hint.contains('\'') || hint.contains('"') {
            anyhow::bail!("HINT contains invalid characters (' or \")");
        }
        let (provider, device) = match hint.find('/') {
            None => ("*", hint),
            Some(pos) => (&hint[..pos], &hint[pos + 1..]),
        };
        Ok(Self { provider: glob_regex(provider)?, device: glob_regex(device)? })
    }

    pub fn provider_matches(&self, provider: &str) -> bool {
        self.provider.is_match(provider)
    }

    pub fn device_matches(&self, device: &str) -> bool {
        self.device.is_match(device)
    }
}

fn glob_regex(glob: &str) -> anyhow::Result<Regex> {
    let mut pattern = String::with_capacity(glob.len() + 8);
    pattern.push('^');
    let mut chars = glob.chars();
    while let Some(c) = chars.next() {
        match c {
            '*' => pattern.push_str(".*"),
            '\\' => {
                // A trailing backslash matches itself.
                let literal = chars.next().unwrap_or('\\');
                pattern.push_str(&regex::escape(&literal.to_string()));
            }
            other => pattern.push_str(&regex::escape(&other.to_string())),
        }
    }
    pattern.push('$');
    Ok(Regex::new(&pattern)?)
}

#[cfg(test)]
#[path = "hint_tests.rs"]
mod tests;
