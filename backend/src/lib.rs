// SPDX-FileCopyrightText: 2025 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Domain logic and persistence for the nudge push gateway: tenant
//! credential storage, nonce consumption, request signing, and the
//! per-tenant APNs/FCM provider pools.

pub mod errors;
pub mod nonces;
pub mod persistence;
pub mod push;
pub mod settings;
pub mod signing;
pub mod store;
