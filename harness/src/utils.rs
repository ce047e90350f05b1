//! Utility functions

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512};

/// Version information for the harness binary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionInfo {
    pub version: String,
    pub git_hash: String,
    pub build_time: String,
}

pub fn version_info() -> VersionInfo {
    VersionInfo {
        version: env!("CARGO_PKG_VERSION").to_string(),
        git_hash: option_env!("GIT_HASH").unwrap_or("unknown").to_string(),
        build_time: option_env!("BUILD_TIME").unwrap_or("unknown").to_string(),
    }
}

/// Normalized CPU architecture as used in artifact names
pub fn architecture() -> &'static str {
    match std::env::consts::ARCH {
        "aarch64" | "arm64" => "arm64",
        _ => "amd64",
    }
}

/// Random identifier used for container names and request headers
pub fn generate_uuid() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Hex-encoded SHA-512 digest
pub fn sha512_hex(data: &[u8]) -> String {
    let mut hasher = Sha512::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Compare data against the content of a `.sha512` file (`<hex>  <file name>`)
pub fn verify_sha512(data: &[u8], sha_file_contents: &str) -> bool {
    let expected = sha_file_contents
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_lowercase();
    !expected.is_empty() && sha512_hex(data) == expected
}

/// Strip surrounding double quotes left over by JSON encoding
pub fn remove_quotes(s: &str) -> String {
    s.trim_matches('"').to_string()
}

mod hex {
    const HEX_CHARS: &[u8; 16] = b"0123456789abcdef";

    pub fn encode(data: impl AsRef<[u8]>) -> String {
        let data = data.as_ref();
        let mut result = String::with_capacity(data.len() * 2);
        for byte in data {
            result.push(HEX_CHARS[(byte >> 4) as usize] as char);
            result.push(HEX_CHARS[(byte & 0x0f) as usize] as char);
        }
        result
    }
}
