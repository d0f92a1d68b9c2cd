//! Ctrl-C handling.
//!
//! The first interrupt trips the [`CancelToken`] so the running pipeline can
//! stop at its next checkpoint and write its report. A second interrupt exits
//! immediately.

use stackpack_bundle::CancelToken;

/// Exit status used when the operator insists on stopping.
const INTERRUPTED: i32 = 130;

/// Watch for Ctrl-C on a helper thread for the rest of the process.
pub fn install(cancel: CancelToken) {
    let spawned = std::thread::Builder::new()
        .name("stackpack-signal".to_string())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime,
                Err(e) => {
                    tracing::warn!(error = %e, "interrupt handling unavailable");
                    return;
                }
            };

            runtime.block_on(async move {
                loop {
                    if tokio::signal::ctrl_c().await.is_err() {
                        return;
                    }
                    if !cancel.cancel() {
                        eprintln!("Interrupted again, exiting");
                        std::process::exit(INTERRUPTED);
                    }
                    eprintln!("Interrupt received, stopping after the current step (Ctrl-C again to force)");
                }
            });
        });

    if let Err(e) = spawned {
        tracing::warn!(error = %e, "failed to start interrupt handler");
    }
}
