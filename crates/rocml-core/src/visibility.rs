//! Visibility-list handling (`ROCM_VISIBLE_DEVICES` and friends)

pub const DEFAULT_VISIBLE_DEVICES_VAR: &str = "ROCM_VISIBLE_DEVICES";

/// Pick the device index a process should report on.
///
/// Only the first comma-separated entry matters. An absent, empty or
/// unparseable first entry selects device 0.
pub fn first_visible_index(raw: Option<&str>) -> u32 {
    raw.and_then(|value| value.split(',').next())
        .and_then(|first| first.trim().parse::<u32>().ok())
        .unwrap_or(0)
}

/// Read `var` from the environment now and select the first visible index
pub fn visible_index_from_env(var: &str) -> u32 {
    let raw = std::env::var(var).ok();
    let index = first_visible_index(raw.as_deref());
    tracing::debug!("{}={:?} selects device {}", var, raw, index);
    index
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_entry_wins() {
        assert_eq!(first_visible_index(Some("1,0")), 1);
        assert_eq!(first_visible_index(Some("0,1")), 0);
        assert_eq!(first_visible_index(Some(" 3 ")), 3);
    }

    #[test]
    fn test_defaults_to_zero() {
        assert_eq!(first_visible_index(None), 0);
        assert_eq!(first_visible_index(Some("")), 0);
        assert_eq!(first_visible_index(Some("gpu1,2")), 0);
        assert_eq!(first_visible_index(Some("-1")), 0);
    }

    #[test]
    fn test_trailing_entries_ignored() {
        assert_eq!(first_visible_index(Some("2,not-a-number")), 2);
    }

    #[test]
    fn test_reads_environment_each_call() {
        let var = "ROCML_CORE_TEST_VISIBLE_DEVICES";
        std::env::set_var(var, "1,0");
        assert_eq!(visible_index_from_env(var), 1);
        std::env::set_var(var, "0,1");
        assert_eq!(visible_index_from_env(var), 0);
        std::env::remove_var(var);
        assert_eq!(visible_index_from_env(var), 0);
    }
}
