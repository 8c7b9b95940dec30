//! Helpers shared across the emulator.

/// Converts bytes to a lowercase hexadecimal string.
pub fn hex(bytes: &[u8]) -> String {
    let mut hex = String::with_capacity(bytes.len() * 2);
    for byte in bytes.iter() {
        hex.push_str(&format!("{:02x}", byte));
    }
    hex
}

/// Converts a hexadecimal string to bytes.
pub fn from_hex(hex: &str) -> Option<Vec<u8>> {
    if hex.len() % 2 != 0 {
        return None;
    }

    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(hex.get(i..i + 2)?, 16).ok())
        .collect()
}

/// Compute the maximum number of faulty validators (`f`) tolerated given `n >= 3f + 1`.
pub fn max_faults(n: usize) -> usize {
    n.saturating_sub(1) / 3
}

/// Compute the minimum number of validators that must be live for a set of `n` to
/// make progress.
///
/// When `n` is too small to tolerate any faults, every validator is required.
pub fn quorum(n: usize) -> usize {
    n - max_faults(n)
}
