//! Shared parsing and formatting helpers for command handlers.

use std::str::FromStr;

use toolvault::version::VersionId;

use crate::error::CliError;

/// Parse a version argument like `15.2.0+15C500b` or `15.2.0 (15C500b)`.
pub fn parse_version(text: &str) -> Result<VersionId, CliError> {
    VersionId::from_str(text).map_err(|_| CliError::BadVersion(text.to_string()))
}

/// Human-readable byte count, binary units.
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[unit])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_version_plus_form() {
        let id = parse_version("15.2.0+15C500b").unwrap();
        assert_eq!(id.build, "15C500b");
    }

    #[test]
    fn test_parse_version_rejects_garbage() {
        assert!(parse_version("not-a-version").is_err());
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(2048), "2.0 KiB");
        assert_eq!(format_size(5 * 1024 * 1024 * 1024), "5.0 GiB");
    }
}
