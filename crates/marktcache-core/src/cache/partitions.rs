use std::fmt;

/// The logical partitions the engine uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PartitionKind {
    /// Pre-cached app shell files
    Shell,
    /// Cached JSON API responses
    Api,
    /// Lazily cached assets, pages and other GETs
    Runtime,
}

impl PartitionKind {
    pub const ALL: [PartitionKind; 3] = [PartitionKind::Shell, PartitionKind::Api, PartitionKind::Runtime];

    pub fn as_str(&self) -> &'static str {
        match self {
            PartitionKind::Shell => "shell",
            PartitionKind::Api => "api",
            PartitionKind::Runtime => "runtime",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == s)
    }
}

impl fmt::Display for PartitionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Physical partition names for one deployed version:
/// `<prefix>-<logical>-<version>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionSet {
    version: String,
    shell: String,
    api: String,
    runtime: String,
}

impl PartitionSet {
    pub fn new(prefix: &str, version: &str) -> Self {
        let name = |kind: PartitionKind| format!("{}-{}-{}", prefix, kind, version);
        Self {
            version: version.to_string(),
            shell: name(PartitionKind::Shell),
            api: name(PartitionKind::Api),
            runtime: name(PartitionKind::Runtime),
        }
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn name(&self, kind: PartitionKind) -> &str {
        match kind {
            PartitionKind::Shell => &self.shell,
            PartitionKind::Api => &self.api,
            PartitionKind::Runtime => &self.runtime,
        }
    }

    pub fn names(&self) -> [&str; 3] {
        [&self.shell, &self.api, &self.runtime]
    }

    pub fn contains(&self, physical: &str) -> bool {
        self.names().contains(&physical)
    }
}
