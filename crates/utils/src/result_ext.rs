/// Small helpers for the "log and use a default" pattern that sysfs reads
/// lean on heavily: a failed read there is frequently not a bug, just a
/// device disappearing mid-scrape.
pub trait ResultExt<T> {
    /// Log `Err` at debug level (sysfs attributes legitimately vanish
    /// during device removal; this is not worth a warning) and return
    /// `default` in that case.
    fn unwrap_or_log_debug(self, default: T) -> T;
}

impl<T, E: std::fmt::Display> ResultExt<T> for Result<T, E> {
    fn unwrap_or_log_debug(self, default: T) -> T {
        match self {
            Ok(v) => v,
            Err(e) => {
                tracing::debug!("{e}");
                default
            }
        }
    }
}
