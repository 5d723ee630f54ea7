// SPDX-FileCopyrightText: 2025 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::{net::TcpListener, sync::Arc};

use anyhow::Context;
use nudgebackend::{
    nonces::NonceStore, persistence, push::ProviderPools, store::CredentialStore,
};
use nudgeserver::{
    AppState, ServerRunParams,
    configurations::get_configuration,
    run,
    telemetry::{get_subscriber, init_subscriber},
};

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Configure logging/trace subscription
    let subscriber = get_subscriber("nudgeserver".into(), "info".into(), std::io::stdout);
    init_subscriber(subscriber);

    // Load configuration
    let settings = get_configuration().context("Could not load configuration")?;

    // Try again each second in case the postgres server is coming up.
    let mut attempts = 0;
    let pool = loop {
        match persistence::connect(&settings.database_url).await {
            Ok(pool) => break pool,
            Err(e) => {
                attempts += 1;
                if attempts > 10 {
                    return Err(
                        anyhow::Error::new(e).context("Database not ready after 10 seconds")
                    );
                }
                tracing::info!(error = %e, "Failed to connect to postgres server, retrying");
                tokio::time::sleep(std::time::Duration::from_secs(1)).await;
            }
        }
    };

    let store = CredentialStore::new(pool.clone());
    let nonces = NonceStore::new(pool.clone());

    // Provision the admin surface; generated values are reported exactly
    // once, on the boot that created them.
    let admin = store
        .ensure_admin_settings(
            settings.admin_base_path.as_deref(),
            settings.admin_session_secret.as_deref(),
        )
        .await?;
    if admin.generated_path {
        tracing::info!(path = %admin.base_path, "Generated admin base path");
    }
    if admin.generated_secret {
        tracing::info!(secret = %admin.session_secret, "Generated admin session secret");
    }
    if admin.weak_path {
        tracing::warn!(path = %admin.base_path, "Admin base path is weak (short or guessable)");
    }

    let bootstrap = store
        .ensure_admin_user(
            settings.admin_bootstrap_user.as_deref(),
            settings.admin_bootstrap_password.as_deref(),
        )
        .await?;
    if let Some(password) = &bootstrap.generated_password {
        tracing::info!(
            username = %bootstrap.username,
            %password,
            "Generated admin bootstrap password"
        );
    }

    let pools = Arc::new(ProviderPools::new(settings.apns_max_listeners));

    // Port binding
    let listener =
        TcpListener::bind(("0.0.0.0", settings.port)).context("Failed to bind listen port")?;
    let port = listener.local_addr()?.port();

    println!("nudge push gateway listening on port {port}");
    println!("  admin mount   {}", admin.base_path);
    println!(
        "  admission     https={} hmac={} api-key={} ip-allowlist={}",
        settings.require_https,
        settings.require_hmac,
        settings.require_auth(),
        settings.ip_allowlist().is_some(),
    );

    let state = AppState::new(settings, store, nonces, pools.clone());
    let server = run(ServerRunParams {
        listener,
        state,
        admin_base_path: admin.base_path,
    })?;

    // Actix stops accepting and drains in-flight handlers on SIGINT/SIGTERM;
    // cached provider clients and the pool are released afterwards.
    server.await?;
    pools.shutdown().await;
    pool.close().await;

    Ok(())
}
