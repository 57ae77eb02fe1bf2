//! Thin binary wiring for the DASH-to-HLS engine: configuration, logging,
//! metrics, and the top-level run loop on top of `dashhls::{orchestrator,
//! saver}`. Per spec.md §1, the command-line surface and JSON config loader
//! are external collaborators; this binary only starts the orchestrator +
//! saver loop, it does not bind an HTTP listener of its own.

use std::time::{Duration, Instant};

use dashhls::config::{Config, ServiceConfig};
use dashhls::error::Result;
use dashhls::orchestrator::DashOrchestrator;
use dashhls::saver::variant_selection::select_variant;
use dashhls::saver::LiveWindowSaver;
use reqwest::Client;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    if let Err(e) = run().await {
        error!("fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let config = Config::from_env()?;
    let service_config = ServiceConfig::from_file(&config.service_config_path)?;

    dashhls::metrics::install(([0, 0, 0, 0], 9898).into());

    info!(
        "starting dashhls ingest for service={}, id={}",
        service_config.service, service_config.id
    );

    let client = Client::new();
    let mut orchestrator = DashOrchestrator::new(client.clone(), service_config.clone());
    orchestrator.start().await?;

    let mut saver = LiveWindowSaver::new(client, &service_config);

    let mut next_refresh = Instant::now();
    let mut key_id_hex = String::new();
    let mut key_hex = String::new();
    let mut have_key = false;

    let (shutdown_tx, mut shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = shutdown_tx.send(true);
        }
    });

    loop {
        if *shutdown_rx.borrow() {
            info!("ctrl_c received, shutting down");
            break;
        }

        if Instant::now() >= next_refresh {
            let wait = orchestrator.on_update().await;
            next_refresh = Instant::now() + wait;
        }

        let Some(presentation) = orchestrator.presentation() else {
            warn!("no presentation available yet, retrying shortly");
            tokio::time::sleep(Duration::from_secs(1)).await;
            continue;
        };

        let variant = match select_variant(
            &presentation.variants,
            service_config.bandwidth_tier,
            &service_config.languages,
        ) {
            Ok(v) => v.clone(),
            Err(e) => {
                warn!("variant selection failed this cycle: {e}");
                tokio::time::sleep(Duration::from_secs(1)).await;
                continue;
            }
        };

        let availability_end = presentation
            .timeline
            .get_segment_availability_end(chrono::Utc::now().timestamp() as f64);

        if orchestrator.manifest_expired() || !have_key {
            match widevine_pssh_and_key_id(&variant) {
                Some((pssh_b64, kid)) => match orchestrator.fetch_key(&pssh_b64, &kid).await {
                    Ok((kid, key)) => {
                        key_id_hex = kid;
                        key_hex = key;
                        have_key = true;
                        orchestrator.clear_manifest_expired();
                    }
                    Err(e) => {
                        error!("key fetch failed: {e}");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                        continue;
                    }
                },
                None => {
                    // Content is clear: no key needed, the decrypter is
                    // invoked with empty key material and is expected to
                    // pass segments through unmodified.
                    orchestrator.clear_manifest_expired();
                    have_key = true;
                }
            }
        }

        if let Err(e) = saver
            .run_cycle(&variant, &key_id_hex, &key_hex, availability_end)
            .await
        {
            error!("saver cycle failed: {e}");
        }
    }

    orchestrator.stop();
    Ok(())
}

/// Find the Widevine DrmInfo on either stream of `variant` and pair it with
/// one of the variant's key IDs, building the `(pssh-box base64, key id
/// hex)` pair the key API needs (spec.md §4.12).
fn widevine_pssh_and_key_id(
    variant: &dashhls::model::stream::Variant,
) -> Option<(String, String)> {
    for stream in [variant.audio.as_ref(), variant.video.as_ref()]
        .into_iter()
        .flatten()
    {
        for drm in &stream.drm_infos {
            if drm.key_system == "com.widevine.alpha" {
                if let Some(pssh_b64) = &drm.widevine_pssh_base64 {
                    let kid = drm
                        .key_ids
                        .iter()
                        .next()
                        .or_else(|| stream.key_ids.iter().next())
                        .cloned();
                    if let Some(kid) = kid {
                        return Some((pssh_b64.clone(), kid));
                    }
                }
            }
        }
    }
    None
}
