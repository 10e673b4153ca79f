use serde::Serialize;

const MIB: f64 = 1024.0 * 1024.0;

/// Process memory in whole mebibytes, as reported on `/health`.
///
/// `used` and `rss` are the resident set, `total` the virtual size. All
/// three are zero where the platform offers no figures.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MemorySnapshot {
    pub used: u64,
    pub total: u64,
    pub rss: u64,
}

impl MemorySnapshot {
    pub fn current() -> Self {
        match memory_stats::memory_stats() {
            Some(stats) => Self {
                used: to_mib(stats.physical_mem),
                total: to_mib(stats.virtual_mem),
                rss: to_mib(stats.physical_mem),
            },
            None => Self::default(),
        }
    }
}

fn to_mib(bytes: usize) -> u64 {
    (bytes as f64 / MIB).round() as u64
}
