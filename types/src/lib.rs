// SPDX-FileCopyrightText: 2025 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Shared domain types for the nudge push gateway: tenant identifiers, the
//! normalized submit request, and per-platform send reports.

pub mod identifiers;
pub mod report;
pub mod request;
