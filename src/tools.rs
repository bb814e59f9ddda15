use anyhow::{bail, Result};

/// Parses a SHA-256 certificate fingerprint. Accepts the colon-separated
/// form browsers show as well as plain hex, in either case.
pub fn parse_sha256_hex(s: &str) -> Result<[u8; 32]> {
    let clean = s.replace([':', ' '], "").to_lowercase();

    let bytes = hex::decode(clean)?;
    if bytes.len() != 32 {
        bail!("Invalid SHA256 length (expected 32 bytes, got {})", bytes.len());
    }

    let mut arr = [0u8; 32];
    arr.copy_from_slice(&bytes);
    Ok(arr)
}

pub fn format_fingerprint(fp: &[u8]) -> String {
    fp.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(":")
}
