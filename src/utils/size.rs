//! Human-friendly byte size parsing for CLI flags ("256M", "1G", "4096").

use anyhow::{Result, bail};

/// Parse a byte count with an optional K/M/G/T suffix (base 1024).
pub fn parse_size(s: &str) -> Result<u64> {
    let s = s.trim();
    if s.is_empty() {
        bail!("empty size");
    }
    let (digits, mult) = match s.chars().last().unwrap().to_ascii_uppercase() {
        'K' => (&s[..s.len() - 1], 1024u64),
        'M' => (&s[..s.len() - 1], 1024 * 1024),
        'G' => (&s[..s.len() - 1], 1024 * 1024 * 1024),
        'T' => (&s[..s.len() - 1], 1024u64 * 1024 * 1024 * 1024),
        c if c.is_ascii_digit() => (s, 1),
        c => bail!("unknown size suffix '{}'", c),
    };
    let n: u64 = digits.trim().parse()?;
    n.checked_mul(mult)
        .ok_or_else(|| anyhow::anyhow!("size overflows u64: {}", s))
}
