// SPDX-FileCopyrightText: 2025 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Fixed-window rate limiting keyed by client address.
//!
//! Windows live in a process-local map; stale entries are removed by a
//! periodic sweep rather than on the request path.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;

#[derive(Debug, Clone, Copy)]
struct Window {
    count: u64,
    reset_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,
    /// First admitted request of a window; response headers are only set
    /// for these.
    pub first_hit: bool,
    pub limit: u64,
    pub remaining: u64,
    pub reset_at: DateTime<Utc>,
}

impl Decision {
    pub fn retry_after_seconds(&self, now: DateTime<Utc>) -> u64 {
        let millis = (self.reset_at - now).num_milliseconds().max(0) as u64;
        millis.div_ceil(1000)
    }
}

#[derive(Debug)]
pub struct RateLimiter {
    windows: DashMap<String, Window>,
    max: u64,
    window: Duration,
}

impl RateLimiter {
    pub fn new(max: u64, window_ms: i64) -> Self {
        Self {
            windows: DashMap::new(),
            max,
            window: Duration::milliseconds(window_ms),
        }
    }

    pub fn check(&self, key: &str, now: DateTime<Utc>) -> Decision {
        let mut entry = self.windows.entry(key.to_owned()).or_insert(Window {
            count: 0,
            reset_at: now + self.window,
        });
        let window = entry.value_mut();

        if window.reset_at <= now {
            window.count = 0;
            window.reset_at = now + self.window;
        }

        if window.count < self.max {
            window.count += 1;
            Decision {
                allowed: true,
                first_hit: window.count == 1,
                limit: self.max,
                remaining: self.max - window.count,
                reset_at: window.reset_at,
            }
        } else {
            Decision {
                allowed: false,
                first_hit: false,
                limit: self.max,
                remaining: 0,
                reset_at: window.reset_at,
            }
        }
    }

    /// Drop windows whose reset time has passed.
    pub fn sweep(&self, now: DateTime<Utc>) {
        self.windows.retain(|_, window| window.reset_at > now);
    }

    pub fn tracked_keys(&self) -> usize {
        self.windows.len()
    }
}
