/// Human-readable byte counts for device file sizes.

/// Unit label, divisor and decimal places, largest first.
const UNITS: [(&str, f64, usize); 4] = [
    ("TB", 1_099_511_627_776.0, 2),
    ("GB", 1_073_741_824.0, 2),
    ("MB", 1_048_576.0, 1),
    ("KB", 1024.0, 1),
];

/// Format a byte count with binary units (1 KB = 1024 B) and the short
/// labels users expect.
pub fn format_size(bytes: u64) -> String {
    let b = bytes as f64;
    for (label, divisor, places) in UNITS {
        if b >= divisor {
            return format!("{:.*} {label}", places, b / divisor);
        }
    }
    format!("{bytes} B")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_below_one_kilobyte_are_exact() {
        assert_eq!(format_size(0), "0 B");
        assert_eq!(format_size(1023), "1023 B");
    }

    #[test]
    fn unit_boundaries() {
        assert_eq!(format_size(1024), "1.0 KB");
        assert_eq!(format_size(1536), "1.5 KB");
        assert_eq!(format_size(1_048_576), "1.0 MB");
        assert_eq!(format_size(1_073_741_824), "1.00 GB");
        assert_eq!(format_size(1_099_511_627_776), "1.00 TB");
    }
}
