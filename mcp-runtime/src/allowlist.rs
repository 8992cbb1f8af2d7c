//! Remote paths the dispatcher may reach. Checked on every call, after path
//! resolution and before any network I/O.

use std::sync::LazyLock;

use regex::Regex;
use vrm_core::tools::WIDGETS;

const LITERAL_PATHS: &[&str] = &[
    "/users/me",
    "/data-attributes",
    "/firmwares",
    "/auth/loginAsDemo",
    "/auth/logout",
];

const INSTALLATION_RESOURCES: &[&str] = &[
    "system-overview",
    "stats",
    "overallstats",
    "alarms",
    "diagnostics",
    "tags",
    "custom-widget",
    "dynamic-ess-settings",
    "reset-forecasts",
    "data-download",
    "gps-download",
];

static VRM_ALLOWLIST: LazyLock<Allowlist> = LazyLock::new(Allowlist::vrm_default);

#[derive(Debug)]
pub enum AllowlistEntry {
    Literal(&'static str),
    Pattern(Regex),
}

impl AllowlistEntry {
    fn matches(&self, path: &str) -> bool {
        match self {
            AllowlistEntry::Literal(literal) => *literal == path,
            AllowlistEntry::Pattern(pattern) => pattern.is_match(path),
        }
    }
}

#[derive(Debug)]
pub struct Allowlist {
    entries: Vec<AllowlistEntry>,
}

impl Allowlist {
    pub fn new(entries: Vec<AllowlistEntry>) -> Self {
        Self { entries }
    }

    pub fn vrm() -> &'static Allowlist {
        &VRM_ALLOWLIST
    }

    fn vrm_default() -> Self {
        let mut entries: Vec<AllowlistEntry> = LITERAL_PATHS
            .iter()
            .map(|path| AllowlistEntry::Literal(*path))
            .collect();

        let patterns = [
            r"^/users/\d+/(installations|search)$".to_string(),
            format!(
                r"^/installations/\d+/({})$",
                INSTALLATION_RESOURCES.join("|")
            ),
            format!(r"^/installations/\d+/widgets/({})$", WIDGETS.join("|")),
        ];
        // A pattern that fails to compile is dropped, which only narrows the list.
        entries.extend(
            patterns
                .iter()
                .filter_map(|p| Regex::new(p).ok())
                .map(AllowlistEntry::Pattern),
        );
        Self { entries }
    }

    pub fn permits(&self, path: &str) -> bool {
        self.entries.iter().any(|entry| entry.matches(path))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
