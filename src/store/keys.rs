/// Key layout and encoding utilities for Fjall partitions
///
/// Partition structure:
/// - `settings`: setting:{key} -> Setting (JSON)
/// - `status`: status:{component}:{ts_micros:020}:{seq:020} -> StatusRecord (JSON)
/// - `downloads`: download:{id} -> DownloadRecord (JSON)
/// - `users`: user:{id} -> empty
/// - `metadata`: meta:{key} -> value (JSON/string)
///
/// Status keys sort by timestamp then sequence inside a component prefix,
/// so the last key of a prefix scan is the latest record.

/// Encode a setting key: setting:{key}
pub fn encode_setting_key(key: &str) -> Vec<u8> {
    format!("setting:{}", key).into_bytes()
}

/// Leading bytes shared by every status key
pub const STATUS_KEY_PREFIX: &str = "status:";

/// Encode a status key: status:{component}:{ts_micros:020}:{seq:020}
pub fn encode_status_key(component: &str, ts_micros: i64, seq: u64) -> Vec<u8> {
    format!("status:{}:{:020}:{:020}", component, ts_micros.max(0), seq).into_bytes()
}

/// Encode a status prefix for range scan: status:{component}:
pub fn encode_status_prefix(component: &str) -> Vec<u8> {
    format!("status:{}:", component).into_bytes()
}

/// First key past every record of `component`: status:{component};
///
/// Component names never contain ':', so seeking here skips exactly the
/// component's own records.
pub fn encode_status_successor(component: &str) -> Vec<u8> {
    format!("status:{};", component).into_bytes()
}

/// Decode a status key -> (component, ts_micros, seq)
pub fn decode_status_key(key: &[u8]) -> Option<(String, i64, u64)> {
    let key_str = std::str::from_utf8(key).ok()?;
    let parts: Vec<&str> = key_str.strip_prefix("status:")?.split(':').collect();
    if parts.len() != 3 {
        return None;
    }
    let ts = parts[1].parse().ok()?;
    let seq = parts[2].parse().ok()?;
    Some((parts[0].to_string(), ts, seq))
}

/// Encode a download key: download:{id}
pub fn encode_download_key(id: &str) -> Vec<u8> {
    format!("download:{}", id).into_bytes()
}

/// Encode a user key: user:{id}
pub fn encode_user_key(id: &str) -> Vec<u8> {
    format!("user:{}", id).into_bytes()
}

/// Encode a metadata key: meta:{key}
pub fn encode_meta_key(key: &str) -> Vec<u8> {
    format!("meta:{}", key).into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setting_key_encoding() {
        assert_eq!(encode_setting_key("max_quality"), b"setting:max_quality");
    }

    #[test]
    fn test_status_key_encoding() {
        let key = encode_status_key("cache", 42, 7);
        assert_eq!(
            key,
            b"status:cache:00000000000000000042:00000000000000000007"
        );

        let (component, ts, seq) = decode_status_key(&key).unwrap();
        assert_eq!(component, "cache");
        assert_eq!(ts, 42);
        assert_eq!(seq, 7);
    }

    #[test]
    fn test_status_successor_bounds_component() {
        let successor = encode_status_successor("cache");
        assert!(encode_status_key("cache", i64::MAX, u64::MAX) < successor);
        assert!(encode_status_key("cache-replica", 0, 0) < encode_status_prefix("cache"));
        assert!(encode_status_key("caches", 0, 0) > successor);
    }

    #[test]
    fn test_status_keys_sort_by_time_then_seq() {
        let older = encode_status_key("db", 999, 50);
        let newer = encode_status_key("db", 1000, 1);
        let tie = encode_status_key("db", 1000, 2);
        assert!(older < newer);
        assert!(newer < tie);
    }

    #[test]
    fn test_status_prefix() {
        assert_eq!(encode_status_prefix("workers"), b"status:workers:");
    }

    #[test]
    fn test_meta_key_encoding() {
        assert_eq!(encode_meta_key("status_seq"), b"meta:status_seq");
    }
}
