// src/size_spec.rs
//
// fio 'bssplit'-style object size specifications:
// "blocksize/percentage/extension:blocksize/percentage/extension:..."
// For example "4K/10/log:8K/90/dat" means 4K objects named *.log 10
// percent of the time and 8K objects named *.dat 90 percent of the time.
// The percentages must sum to 100. Percentage defaults to 100 and
// extension to "dat" when omitted.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{Error, Result};

/// Parsed size distribution, immutable after construction.
#[derive(Debug, Clone)]
pub struct VendorConfig {
    pub compressibility: u8,
    /// A uniform draw in [0, 100) indexes this table to pick a size, so the
    /// multiplicity of each size equals its configured percentage.
    pub sizes: Vec<usize>,
    pub max_size: usize,
    pub extensions: HashMap<usize, Arc<str>>,
}

/// Converts strings like "1GB" or "12 mb" into a number of bytes. Suffixes
/// are 1024-based; K, KB, M, MB, G and GB are accepted case-insensitively.
pub fn parse_size_bytes(input: &str) -> Result<u64> {
    let mut s = input.trim();
    let mut multiplier: u64 = 1;

    let bytes = s.as_bytes();
    if bytes.len() > 1 && (bytes[bytes.len() - 1] | 0x20) == b'b' {
        s = s[..s.len() - 1].trim_end();
    }

    let bytes = s.as_bytes();
    if !bytes.is_empty() {
        match bytes[bytes.len() - 1] | 0x20 {
            b'k' => multiplier = 1 << 10,
            b'm' => multiplier = 1 << 20,
            b'g' => multiplier = 1 << 30,
            _ => {}
        }
        if multiplier != 1 {
            s = s[..s.len() - 1].trim_end();
        }
    }

    let value: u64 = s
        .parse()
        .map_err(|_| Error::Config(format!("cannot parse '{input}' as a size")))?;

    value
        .checked_mul(multiplier)
        .ok_or_else(|| Error::Config(format!("size '{input}' overflows")))
}

pub fn parse_size_spec(spec: &str) -> Result<VendorConfig> {
    let mut config = VendorConfig {
        compressibility: 0,
        sizes: vec![0; 100],
        max_size: 0,
        extensions: HashMap::new(),
    };

    let mut total_percent: usize = 0;

    for entry in spec.split(':') {
        let fields: Vec<&str> = entry.split('/').collect();

        let (size_str, percent_str, extension) = match fields.as_slice() {
            [size] => (*size, "100", "dat"),
            [size, percent] => (*size, *percent, "dat"),
            [size, percent, ext] => (*size, *percent, *ext),
            _ => {
                return Err(Error::Config(format!(
                    "malformed split '{entry}'; should be blocksize/percent/extension"
                )))
            }
        };

        let size = parse_size_bytes(size_str)
            .map_err(|e| Error::Config(format!("cannot parse block size spec: {e}")))?;

        if size == 0 {
            return Err(Error::Config(format!(
                "block size '{size_str}' must be above 0"
            )));
        }

        let percent: usize = percent_str
            .parse()
            .map_err(|_| Error::Config(format!("cannot parse '{percent_str}' as a percentage")))?;

        if total_percent + percent > 100 {
            return Err(Error::Config("percents must sum to 100".into()));
        }

        if extension.is_empty() {
            return Err(Error::Config(format!(
                "entry '{entry}' has an empty extension"
            )));
        }

        let size = size as usize;
        for slot in &mut config.sizes[total_percent..total_percent + percent] {
            *slot = size;
        }

        if size > config.max_size {
            config.max_size = size;
        }

        config.extensions.insert(size, Arc::from(extension));
        total_percent += percent;
    }

    if total_percent != 100 {
        return Err(Error::Config("percents must sum to 100".into()));
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_specs_are_rejected() {
        for spec in [
            "",         // no size at all
            "///",      // too many fields
            ":",        // empty entries
            ":/",       // empty entries
            "4k/99",    // percents sum to 99
            "4k/10:8k/89",
            "4k/10:8k/91", // overshoot
            "4k/foo",   // invalid percent
            "4f/100",   // unknown suffix
            "foo/100",  // not a size
            "0/100",    // zero size
            "4k/100/",  // empty extension
        ] {
            assert!(parse_size_spec(spec).is_err(), "spec '{spec}' should fail");
        }
    }

    #[test]
    fn valid_spec_builds_distribution() {
        let config = parse_size_spec("4KB/10/foo:8KB/20/bar:16KB/70/baz").unwrap();

        assert_eq!(config.max_size, 16 * 1024);
        assert_eq!(config.sizes.len(), 100);

        let count = |size: usize| config.sizes.iter().filter(|&&s| s == size).count();
        assert_eq!(count(4 * 1024), 10);
        assert_eq!(count(8 * 1024), 20);
        assert_eq!(count(16 * 1024), 70);

        assert_eq!(&*config.extensions[&(4 * 1024)], "foo");
        assert_eq!(&*config.extensions[&(8 * 1024)], "bar");
        assert_eq!(&*config.extensions[&(16 * 1024)], "baz");
    }

    #[test]
    fn single_and_two_field_entries_take_defaults() {
        let config = parse_size_spec("4k").unwrap();
        assert!(config.sizes.iter().all(|&s| s == 4 * 1024));
        assert_eq!(&*config.extensions[&(4 * 1024)], "dat");

        let config = parse_size_spec("4k/50:8k/50").unwrap();
        let count = |size: usize| config.sizes.iter().filter(|&&s| s == size).count();
        assert_eq!(count(4 * 1024), 50);
        assert_eq!(count(8 * 1024), 50);
    }

    #[test]
    fn size_suffixes() {
        assert_eq!(parse_size_bytes("4096").unwrap(), 4096);
        assert_eq!(parse_size_bytes("4K").unwrap(), 4096);
        assert_eq!(parse_size_bytes("4k").unwrap(), 4096);
        assert_eq!(parse_size_bytes("4KB").unwrap(), 4096);
        assert_eq!(parse_size_bytes("4 kb").unwrap(), 4096);
        assert_eq!(parse_size_bytes("1MB").unwrap(), 1 << 20);
        assert_eq!(parse_size_bytes("2G").unwrap(), 2 << 30);
        assert!(parse_size_bytes("4X").is_err());
        assert!(parse_size_bytes("").is_err());
        assert!(parse_size_bytes("-4k").is_err());
    }
}
