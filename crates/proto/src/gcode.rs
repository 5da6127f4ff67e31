// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! G-code job filtering. A job is an ordered sequence of non-empty,
//! comment-stripped, trimmed lines; `;` starts a comment that runs to the
//! end of the line.

/// Splits raw G-code into job lines, dropping comments and blank lines.
pub fn job_lines(gcode: &str) -> Vec<String> {
    gcode
        .lines()
        .map(|line| {
            let code = match line.find(';') {
                Some(pos) => &line[..pos],
                None => line,
            };
            code.trim()
        })
        .filter(|line| !line.is_empty())
        .map(str::to_owned)
        .collect()
}

/// Filters a G-code file body down to the newline-terminated form sent in
/// `PRINT` payloads.
pub fn clean_for_dispatch(gcode: &str) -> String {
    let mut out = String::with_capacity(gcode.len());
    for line in job_lines(gcode) {
        out.push_str(&line);
        out.push('\n');
    }
    out
}

#[cfg(test)]
#[path = "gcode_tests.rs"]
mod tests;
