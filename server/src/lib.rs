// SPDX-FileCopyrightText: 2025 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! HTTP surface of the nudge push gateway: the admission pipeline in front
//! of `POST /v1/notify`, the health probe, and the admin API mounted under
//! the provisioned base path.

use std::{collections::HashSet, net::TcpListener, sync::Arc, time::Duration};

use actix_web::{
    App, HttpServer,
    dev::Server,
    middleware::DefaultHeaders,
    web::{self, Data},
};
use nudgebackend::{
    nonces::NonceStore, push::ProviderPools, settings::Settings, store::CredentialStore,
};
use tracing_actix_web::TracingLogger;

use crate::admission::rate_limit::RateLimiter;

pub mod admission;
pub mod configurations;
pub mod endpoints;
pub mod error;
pub mod telemetry;

/// Shared state of every request handler.
pub struct AppState {
    pub settings: Settings,
    /// Precomputed from the settings; `None` disables the check.
    pub allowlist: Option<HashSet<String>>,
    pub store: CredentialStore,
    pub nonces: NonceStore,
    pub pools: Arc<ProviderPools>,
    pub rate_limiter: RateLimiter,
}

impl AppState {
    pub fn new(
        settings: Settings,
        store: CredentialStore,
        nonces: NonceStore,
        pools: Arc<ProviderPools>,
    ) -> Self {
        // Entries are normalized the same way client addresses are, so an
        // IPv4-mapped entry still matches its IPv4 form.
        let allowlist = settings.ip_allowlist().map(|entries| {
            entries
                .iter()
                .map(|entry| admission::normalize_ip(entry))
                .collect()
        });
        let rate_limiter =
            RateLimiter::new(settings.rate_limit_max, settings.rate_limit_window_ms);
        Self {
            settings,
            allowlist,
            store,
            nonces,
            pools,
            rate_limiter,
        }
    }
}

pub struct ServerRunParams {
    pub listener: TcpListener,
    pub state: AppState,
    /// Resolved by `ensure_admin_settings` before the server starts.
    pub admin_base_path: String,
}

/// Configure and run the server application.
pub fn run(params: ServerRunParams) -> std::io::Result<Server> {
    let ServerRunParams {
        listener,
        state,
        admin_base_path,
    } = params;
    let state = Data::new(state);

    // Periodic sweep: drop lapsed rate-limit windows and sample provider
    // pool pressure.
    let sweeper_state = state.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(60));
        loop {
            ticker.tick().await;
            sweeper_state.rate_limiter.sweep(chrono::Utc::now());
            let stats = sweeper_state.pools.stats();
            tracing::debug!(
                apns_clients = stats.apns_clients,
                fcm_clients = stats.fcm_clients,
                apns_in_flight = stats.apns_in_flight,
                rate_limit_keys = sweeper_state.rate_limiter.tracked_keys(),
                "Gateway pool pressure"
            );
        }
    });

    let admin_scope = format!("{admin_base_path}/api");
    let server = HttpServer::new(move || {
        App::new()
            .wrap(TracingLogger::default())
            .wrap(security_headers())
            .app_data(state.clone())
            .route(endpoints::ENDPOINT_HEALTH, web::get().to(endpoints::health))
            .route(endpoints::ENDPOINT_NOTIFY, web::post().to(endpoints::notify))
            .service(web::scope(&admin_scope).configure(endpoints::admin::configure))
    })
    .listen(listener)?
    .run();
    Ok(server)
}

/// Unconditional security headers, applied to every response.
fn security_headers() -> DefaultHeaders {
    DefaultHeaders::new()
        .add(("X-Content-Type-Options", "nosniff"))
        .add(("X-Frame-Options", "DENY"))
        .add(("Referrer-Policy", "no-referrer"))
        .add(("Cross-Origin-Resource-Policy", "same-site"))
        .add(("X-Permitted-Cross-Domain-Policies", "none"))
}
