// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn strips_comments_and_blanks() {
    let raw = "; generated by a slicer\nG28 ; home\n\n  G1 X10 Y10  \n;\nM104 S200\n";
    assert_eq!(job_lines(raw), vec!["G28", "G1 X10 Y10", "M104 S200"]);
}

#[test]
fn whitespace_only_lines_are_dropped() {
    assert_eq!(job_lines("   \n\t\nG28"), vec!["G28"]);
}

#[test]
fn line_that_becomes_empty_after_comment_strip_is_dropped() {
    assert_eq!(job_lines("   ; only a comment"), Vec::<String>::new());
}

#[test]
fn empty_input_yields_no_lines() {
    assert_eq!(job_lines(""), Vec::<String>::new());
}

#[test]
fn crlf_input_is_trimmed() {
    assert_eq!(job_lines("G28\r\nG1 X0\r\n"), vec!["G28", "G1 X0"]);
}

#[test]
fn clean_for_dispatch_terminates_every_line() {
    assert_eq!(clean_for_dispatch("G28 ; home\n\nG1 X0"), "G28\nG1 X0\n");
    assert_eq!(clean_for_dispatch("; nothing\n"), "");
}
