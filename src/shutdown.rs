//! Interrupt handling for a sync run.
//!
//! The first SIGINT / SIGTERM / SIGHUP cancels a [`CancellationToken`]; the
//! engine then stops handing out new tasks and lets in-flight ones commit.
//! A second signal exits immediately. Either way the destination only ever
//! holds complete objects, so the next run picks up where this one stopped.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;

/// Exit status used when a second signal forces termination.
const FORCED_EXIT_CODE: i32 = 130;

pub(crate) fn install_signal_handler() -> anyhow::Result<CancellationToken> {
    let token = CancellationToken::new();
    let count = Arc::new(AtomicU32::new(0));

    #[cfg(unix)]
    let (mut sigterm, mut sighup) = {
        use tokio::signal::unix::{signal, SignalKind};
        (
            signal(SignalKind::terminate()).context("Failed to register SIGTERM handler")?,
            signal(SignalKind::hangup()).context("Failed to register SIGHUP handler")?,
        )
    };

    let handler_token = token.clone();
    tokio::spawn(async move {
        loop {
            #[cfg(unix)]
            {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                    _ = sighup.recv() => {}
                }
            }

            #[cfg(not(unix))]
            {
                if tokio::signal::ctrl_c().await.is_err() {
                    tracing::warn!("Ctrl+C listener unavailable; interrupts will not be graceful");
                    return;
                }
            }

            if count.fetch_add(1, Ordering::SeqCst) == 0 {
                tracing::info!("Interrupt received, letting in-flight items finish...");
                tracing::info!("Interrupt again to stop immediately");
                handler_token.cancel();
            } else {
                tracing::warn!("Stopping immediately");
                std::process::exit(FORCED_EXIT_CODE);
            }
        }
    });

    Ok(token)
}
