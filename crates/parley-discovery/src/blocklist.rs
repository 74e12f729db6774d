//! Source address blocklist
//!
//! File format: one IPv4 address per line, `#` starts a comment line,
//! blank lines are ignored. A missing file means nothing is blocked.

use std::collections::HashSet;
use std::io::ErrorKind;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use tracing::{debug, error, info, warn};

use parley_core::BlocklistError;

/// Set of blocked IPv4 addresses, reloadable from a file
pub struct Blocklist {
    path: PathBuf,
    blocked: RwLock<HashSet<Ipv4Addr>>,
}

impl Blocklist {
    /// Create a blocklist backed by `path` and load it
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let blocklist = Self {
            path: path.into(),
            blocked: RwLock::new(HashSet::new()),
        };
        blocklist.reload();
        blocklist
    }

    /// Re-read the file, replacing the whole set. Returns the new size.
    pub fn reload(&self) -> usize {
        let blocked = match read_blocklist(&self.path) {
            Ok(blocked) => blocked,
            Err(e) => {
                error!("{}", e);
                HashSet::new()
            }
        };

        let count = blocked.len();
        *self.blocked.write() = blocked;

        if count > 0 {
            info!("Loaded {} blocked IP(s) from {:?}", count, self.path);
        }
        count
    }

    pub fn contains(&self, ip: &Ipv4Addr) -> bool {
        self.blocked.read().contains(ip)
    }

    /// Copy of the current set
    pub fn snapshot(&self) -> HashSet<Ipv4Addr> {
        self.blocked.read().clone()
    }

    pub fn len(&self) -> usize {
        self.blocked.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Read a blocklist file; a missing file yields an empty set
///
/// Bytes that are not UTF-8 only spoil the line they appear on.
pub fn read_blocklist(path: &Path) -> Result<HashSet<Ipv4Addr>, BlocklistError> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(parse_blocklist(&String::from_utf8_lossy(&bytes))),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            info!("No blocklist at {:?}, no IPs will be blocked", path);
            Ok(HashSet::new())
        }
        Err(source) => Err(BlocklistError::Read {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Parse blocklist text, skipping (and logging) invalid lines
pub fn parse_blocklist(content: &str) -> HashSet<Ipv4Addr> {
    let mut blocked = HashSet::new();

    for (index, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        match parse_ipv4(line) {
            Some(ip) => {
                debug!("Blocked IP loaded: {}", ip);
                blocked.insert(ip);
            }
            None => warn!("Invalid IP format in blocklist line {}: {}", index + 1, line),
        }
    }

    blocked
}

/// Four dot-separated decimal integers in 0..=255
///
/// Leading zeros are accepted ("010.0.0.1" is 10.0.0.1), unlike
/// `Ipv4Addr::from_str`.
fn parse_ipv4(text: &str) -> Option<Ipv4Addr> {
    let mut octets = [0u8; 4];
    let mut parts = text.split('.');

    for octet in octets.iter_mut() {
        let part = parts.next()?;
        if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let value: u32 = part.parse().ok()?;
        *octet = u8::try_from(value).ok()?;
    }

    if parts.next().is_some() {
        return None;
    }
    Some(Ipv4Addr::from(octets))
}
