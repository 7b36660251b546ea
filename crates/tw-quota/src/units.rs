pub const KIB: u64 = 1024;
pub const MIB: u64 = 1024 * KIB;
pub const GIB: u64 = 1024 * MIB;
pub const TIB: u64 = 1024 * GIB;

pub fn bytes_to_gib(bytes: u64) -> f64 {
    bytes as f64 / GIB as f64
}

/// Formats a byte count in GiB with two decimals, e.g. `"92.50 GB"`.
pub fn format_gib(bytes: u64) -> String {
    format!("{:.2} GB", bytes_to_gib(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_gib_two_decimals() {
        assert_eq!(format_gib(0), "0.00 GB");
        assert_eq!(format_gib(GIB), "1.00 GB");
        assert_eq!(format_gib(GIB + GIB / 2), "1.50 GB");
        assert_eq!(format_gib(TIB), "1024.00 GB");
    }
}
