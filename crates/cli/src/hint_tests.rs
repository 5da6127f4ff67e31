// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn parse(hint: &str) -> Hint {
    match Hint::parse(hint) {
        Ok(h) => h,
        Err(e) => unreachable!("hint {hint:?} must parse: {e}"),
    }
}

#[test]
fn bare_hint_leaves_provider_unconstrained() {
    let h = parse("printer-A");
    assert!(h.provider_matches("anything"));
    assert!(h.provider_matches(""));
    assert!(h.device_matches("printer-A"));
    assert!(!h.device_matches("printer-B"));
}

#[test]
fn provider_part_is_split_at_the_first_slash() {
    let h = parse("provider1/pr*");
    assert!(h.provider_matches("provider1"));
    assert!(!h.provider_matches("provider2"));
    assert!(h.device_matches("printer-A"));
    assert!(h.device_matches("pr"));
    assert!(!h.device_matches("other"));
}

#[test]
fn star_matches_zero_or_more() {
    let h = parse("pr*er");
    assert!(h.device_matches("printer"));
    assert!(h.device_matches("prer"));
    assert!(!h.device_matches("printers"));
}

#[test]
fn matching_is_case_sensitive() {
    let h = parse("Printer*");
    assert!(h.device_matches("Printer-A"));
    assert!(!h.device_matches("printer-A"));
}

#[test]
fn backslash_escapes_the_wildcard() {
    let h = parse(r"pr\*er");
    assert!(h.device_matches("pr*er"));
    assert!(!h.device_matches("printer"));
}

#[test]
fn trailing_backslash_matches_itself() {
    let h = parse(r"dev\");
    assert!(h.device_matches(r"dev\"));
    assert!(!h.device_matches("dev"));
}

#[test]
fn regex_metacharacters_are_literal() {
    let h = parse("dev.+[a]");
    assert!(h.device_matches("dev.+[a]"));
    assert!(!h.device_matches("devX[a]"));
}

#[yare::parameterized(
    single_quote = { "it's" },
    double_quote = { "say\"no" },
    quoted_glob = { "'*'" },
)]
fn quotes_are_rejected(hint: &str) {
    let err = match Hint::parse(hint) {
        Err(e) => e.to_string(),
        Ok(_) => String::new(),
    };
    assert!(err.contains("invalid characters"), "unexpected: {err}");
}
