//! Execution-time and memory ceilings.
//!
//! A run negotiates its ceilings against an [`AmbientLimits`] value: the
//! platform-wide settings a routine inherits when it asks for nothing. Raising
//! is one-way. A routine asking for less than the ambient value keeps the
//! ambient value.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

pub const KB: u64 = 1024;
pub const MB: u64 = 1024 * KB;
pub const GB: u64 = 1024 * MB;

/// A memory ceiling, written in ini shorthand (`512M`, `2G`, `-1`).
///
/// `Unlimited` orders above every byte count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawMemoryLimit", into = "String")]
pub enum MemoryLimit {
    Bytes(u64),
    Unlimited,
}

impl MemoryLimit {
    pub const fn megabytes(mb: u64) -> Self {
        Self::Bytes(mb * MB)
    }

    pub fn bytes(self) -> Option<u64> {
        match self {
            Self::Bytes(bytes) => Some(bytes),
            Self::Unlimited => None,
        }
    }

    fn encode(self) -> u64 {
        self.bytes().unwrap_or(u64::MAX)
    }

    fn decode(raw: u64) -> Self {
        if raw == u64::MAX {
            Self::Unlimited
        } else {
            Self::Bytes(raw)
        }
    }
}

impl FromStr for MemoryLimit {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let text = s.trim();
        if text == "-1" {
            return Ok(Self::Unlimited);
        }

        let invalid = || ConfigError::MemoryLimit(s.to_string());
        let (digits, unit) = match text.char_indices().last() {
            Some((idx, c)) if c.is_ascii_alphabetic() => (&text[..idx], Some(c)),
            Some(_) => (text, None),
            None => return Err(invalid()),
        };
        let value: u64 = digits.parse().map_err(|_| invalid())?;
        let scale = match unit.map(|c| c.to_ascii_uppercase()) {
            None => 1,
            Some('K') => KB,
            Some('M') => MB,
            Some('G') => GB,
            Some(_) => return Err(invalid()),
        };
        value.checked_mul(scale).map(Self::Bytes).ok_or_else(invalid)
    }
}

impl fmt::Display for MemoryLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::Unlimited => f.write_str("-1"),
            Self::Bytes(bytes) if bytes > 0 && bytes % GB == 0 => write!(f, "{}G", bytes / GB),
            Self::Bytes(bytes) if bytes > 0 && bytes % MB == 0 => write!(f, "{}M", bytes / MB),
            Self::Bytes(bytes) if bytes > 0 && bytes % KB == 0 => write!(f, "{}K", bytes / KB),
            Self::Bytes(bytes) => write!(f, "{bytes}"),
        }
    }
}

impl From<MemoryLimit> for String {
    fn from(limit: MemoryLimit) -> Self {
        limit.to_string()
    }
}

/// Config files may spell a limit as a string (`"512M"`) or a plain integer.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawMemoryLimit {
    Number(i64),
    Text(String),
}

impl TryFrom<RawMemoryLimit> for MemoryLimit {
    type Error = ConfigError;

    fn try_from(raw: RawMemoryLimit) -> Result<Self, Self::Error> {
        match raw {
            RawMemoryLimit::Number(-1) => Ok(Self::Unlimited),
            RawMemoryLimit::Number(n) => u64::try_from(n)
                .map(Self::Bytes)
                .map_err(|_| ConfigError::MemoryLimit(n.to_string())),
            RawMemoryLimit::Text(text) => text.parse(),
        }
    }
}

/// Rounds a byte count to whole megabytes.
pub fn to_megabytes(bytes: u64) -> u64 {
    bytes.saturating_add(MB / 2) / MB
}

/// The ambient ceilings a run starts from.
///
/// `exec_time_secs == 0` means no execution-time ceiling. Both values only ever
/// go up.
#[derive(Debug)]
pub struct AmbientLimits {
    exec_time_secs: AtomicU64,
    memory_limit: AtomicU64,
}

impl AmbientLimits {
    pub const DEFAULT_EXEC_TIME_SECS: u64 = 30;
    pub const DEFAULT_MEMORY_LIMIT: MemoryLimit = MemoryLimit::megabytes(128);

    pub fn new(exec_time_secs: u64, memory_limit: MemoryLimit) -> Self {
        Self {
            exec_time_secs: AtomicU64::new(exec_time_secs),
            memory_limit: AtomicU64::new(memory_limit.encode()),
        }
    }

    pub fn unlimited() -> Self {
        Self::new(0, MemoryLimit::Unlimited)
    }

    pub fn exec_time_secs(&self) -> u64 {
        self.exec_time_secs.load(Ordering::Acquire)
    }

    pub fn memory_limit(&self) -> MemoryLimit {
        MemoryLimit::decode(self.memory_limit.load(Ordering::Acquire))
    }

    /// Raises the execution-time ceiling to at least `secs` and returns the
    /// effective value.
    pub fn raise_exec_time(&self, secs: u64) -> u64 {
        let raised = |current: u64| {
            if current == 0 || secs == 0 {
                0
            } else {
                current.max(secs)
            }
        };
        match self
            .exec_time_secs
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                Some(raised(current))
            }) {
            Ok(previous) | Err(previous) => raised(previous),
        }
    }

    /// Raises the memory ceiling to at least `limit` and returns the effective
    /// value.
    pub fn raise_memory_limit(&self, limit: MemoryLimit) -> MemoryLimit {
        let previous = self.memory_limit.fetch_max(limit.encode(), Ordering::AcqRel);
        MemoryLimit::decode(previous.max(limit.encode()))
    }
}

impl Default for AmbientLimits {
    fn default() -> Self {
        Self::new(Self::DEFAULT_EXEC_TIME_SECS, Self::DEFAULT_MEMORY_LIMIT)
    }
}

/// Source of the memory figures a [`Stream`](crate::stream::Stream) reports
/// and enforces.
pub trait MemoryProbe: Send + Sync + fmt::Debug {
    /// Resident memory in use right now, in bytes.
    fn current_bytes(&self) -> u64;

    /// Highest resident memory seen by this process, in bytes.
    fn peak_bytes(&self) -> u64;
}

/// Reads memory usage of the running process from the OS.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessMemory;

impl MemoryProbe for ProcessMemory {
    fn current_bytes(&self) -> u64 {
        resident_bytes().unwrap_or_else(|| self.peak_bytes())
    }

    fn peak_bytes(&self) -> u64 {
        peak_resident_bytes().unwrap_or(0)
    }
}

#[cfg(target_os = "linux")]
fn resident_bytes() -> Option<u64> {
    let statm = std::fs::read_to_string("/proc/self/statm").ok()?;
    let pages: u64 = statm.split_whitespace().nth(1)?.parse().ok()?;
    // SAFETY: sysconf has no preconditions.
    let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    u64::try_from(page_size).ok().map(|size| pages * size)
}

#[cfg(not(target_os = "linux"))]
fn resident_bytes() -> Option<u64> {
    None
}

#[cfg(unix)]
fn peak_resident_bytes() -> Option<u64> {
    let mut usage = std::mem::MaybeUninit::<libc::rusage>::zeroed();
    // SAFETY: the pointer is valid for writes of one rusage.
    if unsafe { libc::getrusage(libc::RUSAGE_SELF, usage.as_mut_ptr()) } != 0 {
        return None;
    }
    // SAFETY: getrusage returned 0, so the struct is initialised.
    let max_rss = u64::try_from(unsafe { usage.assume_init() }.ru_maxrss).ok()?;
    // macOS reports bytes, everything else kilobytes.
    if cfg!(target_os = "macos") {
        Some(max_rss)
    } else {
        Some(max_rss * KB)
    }
}

#[cfg(not(unix))]
fn peak_resident_bytes() -> Option<u64> {
    None
}
