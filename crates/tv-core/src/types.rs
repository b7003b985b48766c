//! Core domain types

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::path::PathBuf;
use std::str::FromStr;

use uuid::Uuid;

/// Lifecycle state of the supervised engine process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessState {
    /// Engine is not running
    #[default]
    Stopped,
    /// Engine is running and its controller answered
    Started,
}

impl ProcessState {
    /// Whether the engine is running
    pub fn is_started(self) -> bool {
        self == ProcessState::Started
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessState::Stopped => write!(f, "stopped"),
            ProcessState::Started => write!(f, "started"),
        }
    }
}

/// Kind of telemetry event an observer can subscribe to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Speed,
    Log,
    Bandwidth,
    ProfileChanged,
    Error,
    Process,
}

impl EventKind {
    /// Every event kind, in declaration order
    pub const ALL: [EventKind; 6] = [
        EventKind::Speed,
        EventKind::Log,
        EventKind::Bandwidth,
        EventKind::ProfileChanged,
        EventKind::Error,
        EventKind::Process,
    ];

    /// Kinds that are gathered by pulling from the engine rather than pushed
    pub const PULLED: [EventKind; 3] = [EventKind::Speed, EventKind::Bandwidth, EventKind::Log];

    /// Whether events of this kind come from a telemetry pull loop
    pub fn is_pulled(self) -> bool {
        matches!(self, EventKind::Speed | EventKind::Bandwidth | EventKind::Log)
    }

    /// Stable lowercase name, matching the serialized form
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Speed => "speed",
            EventKind::Log => "log",
            EventKind::Bandwidth => "bandwidth",
            EventKind::ProfileChanged => "profile_changed",
            EventKind::Error => "error",
            EventKind::Process => "process",
        }
    }

    fn bit(self) -> u8 {
        1 << (self as u8)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        EventKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == normalized)
            .ok_or_else(|| format!("unknown event kind '{}'", s))
    }
}

/// Closed set of event kinds, stored as a bitset
///
/// Serialized as a list of kind names so config files and IPC requests stay
/// readable.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "Vec<EventKind>", into = "Vec<EventKind>")]
pub struct KindSet(u8);

impl KindSet {
    /// The empty set
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Every event kind
    pub fn all() -> Self {
        EventKind::ALL.into_iter().collect()
    }

    /// Every pulled telemetry kind (speed, bandwidth, log)
    pub fn telemetry() -> Self {
        EventKind::PULLED.into_iter().collect()
    }

    /// Check membership
    pub fn contains(self, kind: EventKind) -> bool {
        self.0 & kind.bit() != 0
    }

    /// Add a kind
    pub fn insert(&mut self, kind: EventKind) {
        self.0 |= kind.bit();
    }

    /// Remove a kind
    pub fn remove(&mut self, kind: EventKind) {
        self.0 &= !kind.bit();
    }

    /// Kinds present in either set
    pub fn union(self, other: KindSet) -> KindSet {
        Self(self.0 | other.0)
    }

    /// Kinds present in `self` but not in `other`
    pub fn difference(self, other: KindSet) -> KindSet {
        Self(self.0 & !other.0)
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    /// Iterate the contained kinds in declaration order
    pub fn iter(self) -> impl Iterator<Item = EventKind> {
        EventKind::ALL.into_iter().filter(move |kind| self.contains(*kind))
    }
}

impl fmt::Debug for KindSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl FromIterator<EventKind> for KindSet {
    fn from_iter<I: IntoIterator<Item = EventKind>>(iter: I) -> Self {
        let mut set = KindSet::empty();
        for kind in iter {
            set.insert(kind);
        }
        set
    }
}

impl<const N: usize> From<[EventKind; N]> for KindSet {
    fn from(kinds: [EventKind; N]) -> Self {
        kinds.into_iter().collect()
    }
}

impl From<Vec<EventKind>> for KindSet {
    fn from(kinds: Vec<EventKind>) -> Self {
        kinds.into_iter().collect()
    }
}

impl From<KindSet> for Vec<EventKind> {
    fn from(set: KindSet) -> Self {
        set.iter().collect()
    }
}

/// Opaque identity of a registered observer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObserverId(Uuid);

impl ObserverId {
    /// Allocate a fresh, unique observer id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ObserverId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ObserverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a stored profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProfileId(pub u64);

impl fmt::Display for ProfileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Chosen proxy per proxy group
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProxySelection(BTreeMap<String, String>);

impl ProxySelection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Select `proxy` for `group`, returning the previous choice
    pub fn select(&mut self, group: impl Into<String>, proxy: impl Into<String>) -> Option<String> {
        self.0.insert(group.into(), proxy.into())
    }

    /// Get the selected proxy of a group
    pub fn get(&self, group: &str) -> Option<&str> {
        self.0.get(group).map(String::as_str)
    }

    /// Remove the given groups, returning how many were present
    pub fn remove_groups(&mut self, groups: &[String]) -> usize {
        groups
            .iter()
            .filter(|group| self.0.remove(group.as_str()).is_some())
            .count()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(g, p)| (g.as_str(), p.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<G: Into<String>, P: Into<String>> FromIterator<(G, P)> for ProxySelection {
    fn from_iter<I: IntoIterator<Item = (G, P)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(g, p)| (g.into(), p.into())).collect())
    }
}

/// A named engine configuration, as read from the profile store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub id: ProfileId,
    pub name: String,
    /// Location of the materialized profile the engine loads
    pub cache_path: PathBuf,
    /// Persisted proxy choices for this profile
    #[serde(default)]
    pub selected: ProxySelection,
}

/// Profile summary for listings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileInfo {
    pub id: ProfileId,
    pub name: String,
    pub cache_path: PathBuf,
    pub active: bool,
}

/// Group name reported when the engine state is unknown
pub const UNKNOWN_GROUP: &str = "Unknown";

/// Snapshot of every proxy group known to the running engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxySnapshot {
    /// Currently routed group (the global selector's choice)
    pub current_group: String,
    /// Groups by name
    pub groups: BTreeMap<String, ProxyGroup>,
}

impl Default for ProxySnapshot {
    fn default() -> Self {
        Self {
            current_group: UNKNOWN_GROUP.to_string(),
            groups: BTreeMap::new(),
        }
    }
}

/// A selectable proxy group
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProxyGroup {
    /// Group type as reported by the engine (Selector, URLTest, ...)
    pub kind: String,
    /// Member currently in use
    pub now: Option<String>,
    /// Member proxy names
    pub proxies: Vec<String>,
}

impl ProxyGroup {
    pub fn contains(&self, proxy: &str) -> bool {
        self.proxies.iter().any(|p| p == proxy)
    }
}

/// Cumulative traffic counters reported by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TrafficTotals {
    pub upload: u64,
    pub download: u64,
}

impl TrafficTotals {
    pub fn total(&self) -> u64 {
        self.upload.saturating_add(self.download)
    }
}

/// An open network tunnel device handed to the engine
///
/// Owns the descriptor: dropping a `TunDevice` closes it, so a failed attach
/// never leaks the descriptor.
#[derive(Debug)]
pub struct TunDevice {
    file: File,
    mtu: u32,
}

impl TunDevice {
    pub fn new(file: File, mtu: u32) -> Self {
        Self { file, mtu }
    }

    /// Wrap an already-open tunnel descriptor
    #[cfg(unix)]
    pub fn from_fd(fd: std::os::fd::OwnedFd, mtu: u32) -> Self {
        Self::new(File::from(fd), mtu)
    }

    pub fn mtu(&self) -> u32 {
        self.mtu
    }

    pub fn file(&self) -> &File {
        &self.file
    }

    pub fn into_file(self) -> File {
        self.file
    }
}

#[cfg(unix)]
impl std::os::fd::AsRawFd for TunDevice {
    fn as_raw_fd(&self) -> std::os::fd::RawFd {
        std::os::fd::AsRawFd::as_raw_fd(&self.file)
    }
}
