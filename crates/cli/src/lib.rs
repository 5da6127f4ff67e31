// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Fleet client: materializes every remote printer's broker state into a
//! queryable view and dispatches print jobs, alias writes and telemetry
//! queries against it.

pub mod commands;
pub mod config;
pub mod hint;
pub mod view;
