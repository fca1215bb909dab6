pub mod alerts;
pub mod cmd;
pub mod config;
pub mod sync;
pub mod views;

#[cfg(test)]
mod test_util;

pub use alerts::{AlertDeduper, Notification};
pub use config::{AlertOptions, Config, ConfigError, Repository, SyncOptions};
pub use sync::{SyncEngine, SyncOutcome, SyncReport};

/// DebugJson is a helper for logging a Serialize type as colored JSON.
pub struct DebugJson<S: serde::Serialize>(pub S);

impl<S: serde::Serialize> std::fmt::Debug for DebugJson<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use colored_json::{ColorMode, ColoredFormatter, CompactFormatter, Output, Styler};

        let value = serde_json::to_value(&self.0).map_err(|_| std::fmt::Error)?;
        let value = ColoredFormatter::with_styler(CompactFormatter {}, Styler::default())
            .to_colored_json(&value, ColorMode::Auto(Output::StdErr))
            .map_err(|_| std::fmt::Error)?;

        f.write_str(&value)
    }
}
