/// Errors that can occur while setting up a [`crate::query_pool::TimerQueryPool`]
/// or the registries it depends on.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum CreationError {
    #[error("TrackerSettings::pool_capacity must be at least 1.")]
    InvalidPoolCapacity,

    #[error("required extension `{0}` is not present in the downstream enumeration.")]
    MissingExtension(&'static str),
}

/// Errors that can occur when changing [`crate::TrackerSettings`] after
/// construction.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum SettingsError {
    #[error("TrackerSettings::pool_capacity must be at least 1.")]
    InvalidPoolCapacity,
}
