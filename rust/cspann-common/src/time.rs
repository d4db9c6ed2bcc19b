//! Cross-platform wall clock access.

pub use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Returns the current system time.
#[cfg(not(target_arch = "wasm32"))]
pub fn now() -> SystemTime {
    SystemTime::now()
}

/// Returns the current system time.
#[cfg(target_arch = "wasm32")]
pub fn now() -> SystemTime {
    use web_time::web::SystemTimeExt;
    web_time::SystemTime::now().to_std()
}

/// Microseconds elapsed since the unix epoch, saturating at zero for clocks
/// that report a time before the epoch.
pub fn unix_micros() -> u64 {
    now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_micros() as u64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_returns_reasonable_timestamp() {
        // 2020-01-01T00:00:00Z
        let year_2020_micros: u64 = 1_577_836_800 * 1_000_000;
        assert!(unix_micros() > year_2020_micros);
    }
}
