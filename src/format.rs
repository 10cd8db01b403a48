/// Human-readable byte count in binary units ("700.0MiB").
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 8] = ["", "Ki", "Mi", "Gi", "Ti", "Pi", "Ei", "Zi"];
    let mut value = bytes as f64;
    for unit in UNITS {
        if value < 1024.0 {
            return format!("{value:.1}{unit}B");
        }
        value /= 1024.0;
    }
    format!("{value:.1}YiB")
}

#[cfg(test)]
mod tests {
    use super::format_size;

    #[test]
    fn sizes_step_through_binary_units() {
        assert_eq!(format_size(0), "0.0B");
        assert_eq!(format_size(512), "512.0B");
        assert_eq!(format_size(2048), "2.0KiB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.0MiB");
        assert_eq!(format_size(3 * 1024 * 1024 * 1024), "3.0GiB");
    }
}
