// src/util.rs

use std::process::Command;

use crate::error::{Error, Result};

const BINARY_SUFFIXES: &[&str] = &["B", "KiB", "MiB", "GiB", "TiB", "PiB", "EiB"];
const DECIMAL_SUFFIXES: &[&str] = &["B", "KB", "MB", "GB", "TB", "PB", "EB"];

/// Scales a byte count to KiB, MiB, etc. Flips to the next-larger unit once
/// 1,000 is passed, but divides by 1024, so 1023 renders as "1.0 KiB"
/// rather than "1023 B".
pub fn human_size(size: u64) -> String {
    let mut scaled = size as f64;
    let mut i = 0;

    while scaled > 999.0 && i < BINARY_SUFFIXES.len() - 1 {
        scaled /= 1024.0;
        i += 1;
    }

    if i == 0 {
        format!("{} B", size)
    } else {
        format!("{:.1} {}", scaled, BINARY_SUFFIXES[i])
    }
}

/// Base-1000 variant of [`human_size`].
pub fn human_size_decimal(size: u64) -> String {
    let mut scaled = size as f64;
    let mut i = 0;

    while scaled > 999.0 && i < DECIMAL_SUFFIXES.len() - 1 {
        scaled /= 1000.0;
        i += 1;
    }

    if i == 0 {
        format!("{} B", size)
    } else {
        format!("{:.1} {}", scaled, DECIMAL_SUFFIXES[i])
    }
}

pub fn median(data: &[u64]) -> u64 {
    if data.is_empty() {
        return 0;
    }

    let mut sorted = data.to_vec();
    sorted.sort_unstable();

    let l = sorted.len();
    if l % 2 == 0 {
        (sorted[l / 2 - 1] + sorted[l / 2]) / 2
    } else {
        sorted[l / 2]
    }
}

pub fn mean(data: &[u64]) -> u64 {
    if data.is_empty() {
        return 0;
    }

    data.iter().sum::<u64>() / data.len() as u64
}

/// Runs a whitespace-split shell command and returns its stdout. A nonzero
/// exit status is an error.
pub fn run_cmd(command: &str) -> Result<Vec<u8>> {
    let mut parts = command.split_whitespace();
    let program = parts
        .next()
        .ok_or_else(|| Error::Config("empty command".into()))?;

    let output = Command::new(program)
        .args(parts)
        .output()
        .map_err(|e| Error::io(format!("running '{command}'"), e))?;

    if !output.status.success() {
        return Err(Error::io(
            format!("running '{command}'"),
            std::io::Error::other(format!("exit status {}", output.status)),
        ));
    }

    Ok(output.stdout)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_median() {
        assert_eq!(median(&[]), 0);
        assert_eq!(median(&[5]), 5);
        assert_eq!(median(&[10, 20]), 15);
        assert_eq!(median(&[30, 10, 20]), 20);
        assert_eq!(median(&[10, 20, 30, 40]), 25);
        assert_eq!(median(&[10, 20, 30, 40, 50]), 30);
    }

    #[test]
    fn test_mean() {
        assert_eq!(mean(&[]), 0);
        assert_eq!(mean(&[7]), 7);
        assert_eq!(mean(&[10, 20, 30]), 20);
    }

    #[test]
    fn test_human_size() {
        assert_eq!(human_size(500), "500 B");
        assert_eq!(human_size(999), "999 B");
        assert_eq!(human_size(1023), "1.0 KiB");
        assert_eq!(human_size(1536), "1.5 KiB");
        assert_eq!(human_size(1048576), "1.0 MiB");
    }

    #[test]
    fn test_human_size_decimal() {
        assert_eq!(human_size_decimal(500), "500 B");
        assert_eq!(human_size_decimal(1500), "1.5 KB");
        assert_eq!(human_size_decimal(2_000_000), "2.0 MB");
    }

    #[test]
    fn test_run_cmd_captures_stdout() {
        let out = run_cmd("echo hello").unwrap();
        assert_eq!(String::from_utf8_lossy(&out).trim(), "hello");
    }

    #[test]
    fn test_run_cmd_failure() {
        assert!(run_cmd("false").is_err());
        assert!(run_cmd("").is_err());
    }
}
