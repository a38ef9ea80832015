//! Common types used throughout the application

use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Pending operation for a package, with the short codes used in the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Action {
    Install,      // i
    Update,       // u
    Remove,       // r
    Obsolete,     // o
    Downgrade,    // do
    Reinstall,    // ri
    LocalInstall, // li
}

impl Action {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Install => "i",
            Self::Update => "u",
            Self::Remove => "r",
            Self::Obsolete => "o",
            Self::Downgrade => "do",
            Self::Reinstall => "ri",
            Self::LocalInstall => "li",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        Self::all().iter().copied().find(|a| a.code() == code)
    }

    /// Verb passed to `AddTransaction`
    pub fn daemon_verb(&self) -> &'static str {
        match self {
            Self::Install => "install",
            Self::Update | Self::Obsolete => "update",
            Self::Remove => "remove",
            Self::Downgrade => "downgrade",
            Self::Reinstall => "reinstall",
            Self::LocalInstall => "localinstall",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Install => "Install",
            Self::Update => "Update",
            Self::Remove => "Remove",
            Self::Obsolete => "Obsolete",
            Self::Downgrade => "Downgrade",
            Self::Reinstall => "Reinstall",
            Self::LocalInstall => "Install local",
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Install | Self::LocalInstall => "+",
            Self::Update | Self::Obsolete => "↑",
            Self::Remove => "-",
            Self::Downgrade => "↓",
            Self::Reinstall => "=",
        }
    }

    pub fn all() -> &'static [Action] {
        &[
            Self::Install,
            Self::Update,
            Self::Remove,
            Self::Obsolete,
            Self::Downgrade,
            Self::Reinstall,
            Self::LocalInstall,
        ]
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Package list kinds. The first four are daemon queries, the rest are
/// filled by the session from other lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Filter {
    Installed,
    Updates,
    Available,
    Obsoletes,
    Downgrade,
    Reinstall,
    LocalInstall,
}

impl Filter {
    /// Filter name understood by `GetPackages`
    pub fn daemon_name(&self) -> Option<&'static str> {
        match self {
            Self::Installed => Some("installed"),
            Self::Updates => Some("updates"),
            Self::Available => Some("available"),
            Self::Obsoletes => Some("obsoletes"),
            Self::Downgrade | Self::Reinstall | Self::LocalInstall => None,
        }
    }

    /// Action a package gets when it first shows up in this list
    pub fn default_action(&self) -> Action {
        match self {
            Self::Installed => Action::Remove,
            Self::Updates => Action::Update,
            Self::Available => Action::Install,
            Self::Obsoletes => Action::Obsolete,
            Self::Downgrade => Action::Downgrade,
            Self::Reinstall => Action::Reinstall,
            Self::LocalInstall => Action::LocalInstall,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Installed => "Installed",
            Self::Updates => "Updates",
            Self::Available => "Available",
            Self::Obsoletes => "Obsoletes",
            Self::Downgrade => "Downgrade",
            Self::Reinstall => "Reinstall",
            Self::LocalInstall => "Local",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::all().iter().copied().find(|f| f.label().eq_ignore_ascii_case(name))
    }

    pub fn all() -> &'static [Filter] {
        &[
            Self::Installed,
            Self::Updates,
            Self::Available,
            Self::Obsoletes,
            Self::Downgrade,
            Self::Reinstall,
            Self::LocalInstall,
        ]
    }
}

/// Package identity as used on the wire: `name,epoch,version,release,arch,repo_id`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PkgId {
    pub name: String,
    pub epoch: String,
    pub version: String,
    pub release: String,
    pub arch: String,
    pub repo: String,
}

impl PkgId {
    /// `[epoch:]version-release`, epoch 0 omitted
    pub fn evr(&self) -> String {
        if self.epoch.is_empty() || self.epoch == "0" {
            format!("{}-{}", self.version, self.release)
        } else {
            format!("{}:{}-{}", self.epoch, self.version, self.release)
        }
    }

    /// Human readable `name-[epoch:]version-release.arch`
    pub fn fullname(&self) -> String {
        format!("{}-{}.{}", self.name, self.evr(), self.arch)
    }

    pub fn name_arch(&self) -> NameArch {
        NameArch {
            name: self.name.clone(),
            arch: self.arch.clone(),
        }
    }

    /// Installed packages carry a pseudo repo such as `@System`
    pub fn is_installed(&self) -> bool {
        self.repo.starts_with('@')
    }

    /// Same package build, ignoring which repo it came from
    pub fn same_build(&self, other: &PkgId) -> bool {
        self.name == other.name
            && self.epoch == other.epoch
            && self.version == other.version
            && self.release == other.release
            && self.arch == other.arch
    }
}

impl FromStr for PkgId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = s.split(',').collect();
        let [name, epoch, version, release, arch, repo] = fields.as_slice() else {
            return Err(Error::InvalidPkgId(s.to_string()));
        };
        if name.is_empty() {
            return Err(Error::InvalidPkgId(s.to_string()));
        }
        Ok(Self {
            name: (*name).to_string(),
            epoch: (*epoch).to_string(),
            version: (*version).to_string(),
            release: (*release).to_string(),
            arch: (*arch).to_string(),
            repo: (*repo).to_string(),
        })
    }
}

impl fmt::Display for PkgId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{},{},{},{},{}",
            self.name, self.epoch, self.version, self.release, self.arch, self.repo
        )
    }
}

/// Duplicate-suppression key: one queued version per name.arch
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NameArch {
    pub name: String,
    pub arch: String,
}

impl fmt::Display for NameArch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.name, self.arch)
    }
}

/// Stable handle to a package owned by the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PackageHandle(pub u32);

impl PackageHandle {
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

/// Package view-model, built from a daemon row
#[derive(Debug, Clone)]
pub struct Package {
    pub handle: PackageHandle,
    pub id: PkgId,
    /// What is sent to the daemon: the pkg_id string, or a file path for local rpms
    pub key: String,
    pub summary: String,
    pub size: u64,
    pub action: Action,
}

impl Package {
    pub fn name_arch(&self) -> NameArch {
        self.id.name_arch()
    }

    pub fn is_installed(&self) -> bool {
        self.id.is_installed()
    }

    pub fn size_str(&self) -> String {
        size_str(self.size)
    }
}

/// Which of the two group maps a group sits in
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum GroupAction {
    Install,
    Remove,
}

impl GroupAction {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Install => "i",
            Self::Remove => "r",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "i" => Some(Self::Install),
            "r" => Some(Self::Remove),
            _ => None,
        }
    }
}

/// A comps group, or a category when `category` is set (not selectable)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    pub id: String,
    pub name: String,
    pub description: String,
    pub installed: bool,
    pub category: bool,
    pub selected: bool,
}

impl Group {
    pub fn new(id: &str, name: &str, description: &str, installed: bool) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            installed,
            category: false,
            selected: false,
        }
    }

    /// Action a toggle applies: installed groups get removed
    pub fn default_action(&self) -> GroupAction {
        if self.installed {
            GroupAction::Remove
        } else {
            GroupAction::Install
        }
    }
}

/// A category and the groups under it
#[derive(Debug, Clone)]
pub struct GroupCategory {
    pub category: Group,
    pub groups: Vec<Group>,
}

/// Result of toggling a package in the queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToggleResult {
    Queued {
        package: PackageHandle,
        action: Action,
    },
    Unqueued {
        package: PackageHandle,
        /// The other half of a downgrade pair, unqueued along with it
        also: Option<PackageHandle>,
    },
    /// Rejected: the name.arch slot or the installed counterpart is busy
    NoChange { package: PackageHandle },
}

/// Human-readable byte size
pub fn size_str(bytes: u64) -> String {
    if bytes == 0 {
        return String::from("-");
    }
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} B")
    }
}
