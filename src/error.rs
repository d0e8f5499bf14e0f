//! Error types for the livepaper addon.

use thiserror::Error;

/// Errors raised anywhere along the render path.
///
/// Most of these never leave the tick that produced them: the runtime logs
/// them and either skips the offending widget or abandons the frame.
#[derive(Debug, Error)]
pub enum LivepaperError {
    /// The per-monitor wallpaper API could not be constructed.
    #[error("Platform unavailable: {0}")]
    PlatformUnavailable(String),
    /// A widget failed while loading, configuring or drawing.
    #[error("Widget '{widget}' failed: {message}")]
    WidgetFault { widget: String, message: String },
    /// A file operation failed (usually transient: file held by a reader).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Encoding or decoding an image failed.
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
    /// Restoring the original wallpaper was not possible.
    #[error("Restore error: {0}")]
    Restore(String),
    /// A configuration or manifest file could not be understood.
    #[error("Configuration error: {0}")]
    Config(String),
    /// An OS wallpaper call reported failure.
    #[error("Shell error: {0}")]
    Shell(String),
    /// A command line from the command surface could not be parsed.
    #[error("Invalid command: {0}")]
    InvalidCommand(String),
}

impl LivepaperError {
    pub fn widget(widget: &str, message: impl Into<String>) -> Self {
        Self::WidgetFault {
            widget: widget.to_string(),
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for LivepaperError {
    fn from(err: serde_json::Error) -> Self {
        Self::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, LivepaperError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn widget_fault_names_the_widget() {
        let err = LivepaperError::widget("clock", "bad anchor");
        let msg = err.to_string();
        assert!(msg.contains("clock"));
        assert!(msg.contains("bad anchor"));
    }

    #[test]
    fn io_errors_convert() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "locked");
        let err: LivepaperError = io_err.into();
        assert!(matches!(err, LivepaperError::Io(_)));
        assert!(err.to_string().contains("IO error"));
    }

    #[test]
    fn json_errors_become_config_errors() {
        let json_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err: LivepaperError = json_err.into();
        assert!(matches!(err, LivepaperError::Config(_)));
    }
}
