//! Health ping table handed to the health monitor at configuration time.

use crate::components::{component_name, ComponentName};
use heapless::Vec;
use serde::Serialize;
use thiserror::Error;

pub const MAX_PING_ENTRIES: usize = 32;
pub const DEFAULT_PING_WARN: u32 = 3;
pub const DEFAULT_PING_FATAL: u32 = 5;

/// Ping names monitored in the reference deployment. The telemetry sender
/// answers pings as `a_chanTlm`.
pub const REFERENCE_PING_NAMES: [&str; 12] = [
    "a_blockDrv",
    "a_chanTlm",
    "a_cmdDisp",
    "a_cmdSeq",
    "a_eventLogger",
    "a_fileDownlink",
    "a_fileManager",
    "a_fileUplink",
    "a_prmDb",
    "a_rateGroup1",
    "a_rateGroup2",
    "a_rateGroup3",
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WatchdogError {
    #[error("ping entry `{name}` has warn threshold {warn} above fatal threshold {fatal}")]
    InvertedThresholds { name: ComponentName, warn: u32, fatal: u32 },
    #[error("ping entry `{0}` is listed twice")]
    Duplicate(ComponentName),
    #[error("ping table is full")]
    TableFull,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PingEntry {
    pub name: ComponentName,
    pub warn_cycles: u32,
    pub fatal_cycles: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchdogEntrySet {
    entries: Vec<PingEntry, MAX_PING_ENTRIES>,
    watchdog_code: u32,
}

impl WatchdogEntrySet {
    pub fn new(watchdog_code: u32) -> Self {
        Self {
            entries: Vec::new(),
            watchdog_code,
        }
    }

    pub fn reference(watchdog_code: u32, warn: u32, fatal: u32) -> Result<Self, WatchdogError> {
        let mut set = Self::new(watchdog_code);
        for name in REFERENCE_PING_NAMES {
            set.push(name, warn, fatal)?;
        }
        Ok(set)
    }

    pub fn push(&mut self, name: &str, warn_cycles: u32, fatal_cycles: u32) -> Result<(), WatchdogError> {
        let name = component_name(name);
        if warn_cycles > fatal_cycles {
            return Err(WatchdogError::InvertedThresholds {
                name,
                warn: warn_cycles,
                fatal: fatal_cycles,
            });
        }
        if self.get(&name).is_some() {
            return Err(WatchdogError::Duplicate(name));
        }
        self.entries
            .push(PingEntry {
                name,
                warn_cycles,
                fatal_cycles,
            })
            .map_err(|_| WatchdogError::TableFull)
    }

    pub fn get(&self, name: &str) -> Option<&PingEntry> {
        self.entries.iter().find(|entry| entry.name.as_str() == name)
    }

    pub fn entries(&self) -> &[PingEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn watchdog_code(&self) -> u32 {
        self.watchdog_code
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_table() {
        let set = WatchdogEntrySet::reference(0x123, DEFAULT_PING_WARN, DEFAULT_PING_FATAL).unwrap();
        assert_eq!(set.len(), 12);
        assert_eq!(set.watchdog_code(), 0x123);
        assert_eq!(set.entries()[1].name.as_str(), "a_chanTlm");
        assert!(set.entries().iter().all(|e| e.warn_cycles <= e.fatal_cycles));
    }

    #[test]
    fn test_inverted_thresholds_rejected() {
        let mut set = WatchdogEntrySet::new(1);
        let err = set.push("a_cmdSeq", 6, 5).unwrap_err();
        assert!(matches!(err, WatchdogError::InvertedThresholds { warn: 6, fatal: 5, .. }));
        assert!(set.is_empty());
    }

    #[test]
    fn test_equal_thresholds_allowed() {
        let mut set = WatchdogEntrySet::new(1);
        assert!(set.push("a_cmdSeq", 4, 4).is_ok());
        assert_eq!(set.get("a_cmdSeq").unwrap().fatal_cycles, 4);
    }

    #[test]
    fn test_duplicate_rejected() {
        let mut set = WatchdogEntrySet::new(1);
        set.push("a_prmDb", 3, 5).unwrap();
        assert!(matches!(set.push("a_prmDb", 3, 5), Err(WatchdogError::Duplicate(_))));
    }

}
