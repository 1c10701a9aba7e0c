use log::{error, info, warn};
use std::path::PathBuf;
use std::sync::Arc;

use tokio_stream::StreamExt;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;

use pigeonio::{AppError, GpioBackend, IoEvent, IoHost, Settings};

#[cfg(feature = "hardware-gpio")]
use pigeonio::LibgpiodBackend;
#[cfg(not(feature = "hardware-gpio"))]
use pigeonio::MockGpioBackend;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    env_logger::init();

    let mut settings = Settings::from_env()?;
    if let Some(config_dir) = std::env::args().nth(1) {
        settings.config_dir = PathBuf::from(config_dir);
    }

    let backend: Arc<dyn GpioBackend> = {
        #[cfg(feature = "hardware-gpio")]
        {
            Arc::new(LibgpiodBackend::new(&settings.chip)?)
        }
        #[cfg(not(feature = "hardware-gpio"))]
        {
            Arc::new(MockGpioBackend::default())
        }
    };

    let mut host = IoHost::from_settings(&settings);
    let mut events = host.emitter().stream();

    if let Err(e) = host.setup(&settings, backend).await {
        error!("{e}");
        return Err(e);
    }
    if !host.is_initialized() {
        warn!("pigeonio not initialized, see {}", settings.config_path().display());
        return Ok(());
    }

    let snapshot = host.read().await;
    match serde_json::to_string(&snapshot) {
        Ok(text) => info!("initial snapshot {text}"),
        Err(e) => warn!("cannot serialize snapshot: {e}"),
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                break;
            }
            event = events.next() => {
                let Some(event) = event else { break; };

                match event {
                    Ok(IoEvent::Data { name, value }) => info!("{name} = {value}"),
                    Ok(IoEvent::Error(message)) => error!("{message}"),
                    Err(BroadcastStreamRecvError::Lagged(n)) => {
                        warn!("event stream lagged by {n} messages");
                    }
                }
            }
        }
    }

    Ok(())
}
