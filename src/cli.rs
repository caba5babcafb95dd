use clap::ValueEnum;

/// What to do when the server certificate cannot be verified.
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TlsMode {
    /// Retry once with verification disabled, flagging the record
    #[default]
    Fallback,
    /// Treat certificate failures like any other transport error
    Strict,
}
