use crate::dispatcher::LogToDb;
use crate::layer::LogToDbLayer;
use tokio::task::JoinHandle;
use tracing::subscriber::SetGlobalDefaultError;
use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::Registry;

/// Configuration of the [`LogToDbLayer`] installed by [`init_tracing_with_config`].
///
/// **Fields**
/// - `channel_buffer`: maximum number of events waiting for delivery before
///   new ones are dropped.
/// - `min_level`: least severe level persisted.
/// - `enable_stdout`: if `true`, a `tracing_subscriber::fmt` layer is added
///   on top so events are also printed to the console.
#[derive(Clone, Debug)]
pub struct LayerConfig {
    pub channel_buffer: usize,
    pub min_level: Level,
    pub enable_stdout: bool,
}

impl Default for LayerConfig {
    fn default() -> Self {
        Self {
            channel_buffer: 1024,
            min_level: Level::INFO,
            enable_stdout: true,
        }
    }
}

/// Install a global `tracing` subscriber that persists events through
/// `log_to_db`.
///
/// **Returns**
/// - `Ok(handle)`: the delivery task, which runs for the rest of the process.
/// - `Err(..)`: a global subscriber was already installed.
///
/// Must be called from within a Tokio runtime.
pub fn init_tracing_with_config(
    log_to_db: LogToDb,
    config: LayerConfig,
) -> Result<JoinHandle<()>, SetGlobalDefaultError> {
    let (layer, handle) = LogToDbLayer::new(log_to_db, config.channel_buffer, config.min_level);

    // The two subscriber stacks have different types, hence two branches.
    if config.enable_stdout {
        let subscriber = Registry::default()
            .with(layer)
            .with(tracing_subscriber::fmt::layer());
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        tracing::subscriber::set_global_default(Registry::default().with(layer))?;
    }

    Ok(handle)
}

/// [`init_tracing_with_config`] with [`LayerConfig::default`].
pub fn init_tracing(log_to_db: LogToDb) -> Result<JoinHandle<()>, SetGlobalDefaultError> {
    init_tracing_with_config(log_to_db, LayerConfig::default())
}
