//! Hotline - Gesprächs-Engine für Client und Operator
//!
//! Eine Session pro Rolle über genau eine WebSocket-Verbindung zum
//! Vermittlungsdienst:
//! - Zustandsmaschine disconnected / waiting / connected
//! - Mikrofon-Aufnahme in Chunks (Client 1s, Operator 2s)
//! - Eingehende Chunks strikt nacheinander abspielen

pub mod call_engine;
pub mod config;
pub mod signaling;

use call_engine::{AudioBackend, CallStatus, SessionController};
use config::CallConfig;
use signaling::WebSocketConnector;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

// ============================================================================
// LOGGING
// ============================================================================

/// Installiert den fmt-Subscriber; `RUST_LOG` hat Vorrang vor `default_filter`
///
/// Weitere Aufrufe sind wirkungslos.
pub fn init_tracing(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

// ============================================================================
// RUNNER
// ============================================================================

/// Führt eine Session mit nativen Geräten aus, bis sie endet
///
/// Ctrl-C beendet das Gespräch; danach wird auf das Schließen gewartet.
pub async fn run(config: CallConfig) -> anyhow::Result<()> {
    let endpoint = config.endpoint()?;
    tracing::info!("Starting {} session against {}", config.role, endpoint);

    let controller = SessionController::new(
        Arc::new(WebSocketConnector),
        AudioBackend::native(),
        config.session_options(),
    );
    let session = controller.connect(endpoint, config.role);
    let mut status = session.watch();
    let mut ended_by_user = false;

    loop {
        tokio::select! {
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = *status.borrow_and_update();
                tracing::info!("Call status: {}", current);
                if ended_by_user && current == CallStatus::Disconnected {
                    break;
                }
            }
            result = tokio::signal::ctrl_c(), if !ended_by_user => {
                if let Err(e) = result {
                    tracing::warn!("Failed to listen for Ctrl-C: {}", e);
                }
                tracing::info!("Ending call");
                ended_by_user = true;
                session.end_call();
                // Kein laufendes Gespräch, auf kein Close-Event warten
                if session.status() == CallStatus::Disconnected {
                    break;
                }
            }
        }
    }

    session.shutdown().await;
    tracing::info!("Session finished");
    Ok(())
}
