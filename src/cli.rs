//! Command line surface

use std::path::PathBuf;

use clap::{ArgGroup, Parser};

/// Stage and apply DNF transactions through the dnfdaemon system service
#[derive(Parser, Debug)]
#[command(name = "dnfstage")]
#[command(version)]
#[command(group(ArgGroup::new("mode").multiple(false)))]
pub struct Cli {
    /// Verbose logging (RUST_LOG overrides)
    #[arg(long)]
    pub debug: bool,

    /// Apply without asking for confirmation
    #[arg(short, long)]
    pub yes: bool,

    /// Configuration file (default: $XDG_CONFIG_HOME/dnfstage/dnfstage.conf)
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Tell the daemon to quit
    #[arg(long, group = "mode")]
    pub exit: bool,

    /// Install packages by name, or local .rpm files
    #[arg(long, value_name = "PKG", num_args = 1.., group = "mode")]
    pub install: Vec<String>,

    /// Remove installed packages
    #[arg(long, value_name = "PKG", num_args = 1.., group = "mode")]
    pub remove: Vec<String>,

    /// Apply all available updates
    #[arg(long, group = "mode")]
    pub updateall: bool,

    /// Count available updates and record the check
    #[arg(long, group = "mode")]
    pub check_updates: bool,

    /// Reinstall packages at their installed version
    #[arg(long, value_name = "PKG", num_args = 1.., group = "mode")]
    pub reinstall: Vec<String>,

    /// Downgrade a package to the next older version the repos offer
    #[arg(long, value_name = "PKG", group = "mode")]
    pub downgrade: Option<String>,

    /// Install a comps group by id
    #[arg(long, value_name = "GROUP", group = "mode")]
    pub group_install: Option<String>,

    /// Remove a comps group by id
    #[arg(long, value_name = "GROUP", group = "mode")]
    pub group_remove: Option<String>,

    /// Search names and summaries
    #[arg(long, value_name = "KEY", num_args = 1.., group = "mode")]
    pub search: Vec<String>,

    /// List transactions of the last DAYS days
    #[arg(long, value_name = "DAYS", num_args = 0..=1, default_missing_value = "30", group = "mode")]
    pub history: Option<i32>,

    /// Undo a history transaction
    #[arg(long, value_name = "TID", group = "mode")]
    pub undo: Option<i32>,

    /// List repositories
    #[arg(long, group = "mode")]
    pub repos: bool,

    /// Expire the metadata cache now
    #[arg(long, group = "mode")]
    pub refresh: bool,
}

/// What a run of the binary does
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    /// No mode flag: list available updates
    ListUpdates,
    Exit,
    Install(Vec<String>),
    Remove(Vec<String>),
    UpdateAll,
    CheckUpdates,
    Reinstall(Vec<String>),
    Downgrade(String),
    GroupInstall(String),
    GroupRemove(String),
    Search(Vec<String>),
    History(i32),
    Undo(i32),
    Repos,
    Refresh,
}

impl Cli {
    pub fn mode(&self) -> Mode {
        if self.exit {
            Mode::Exit
        } else if !self.install.is_empty() {
            Mode::Install(self.install.clone())
        } else if !self.remove.is_empty() {
            Mode::Remove(self.remove.clone())
        } else if self.updateall {
            Mode::UpdateAll
        } else if self.check_updates {
            Mode::CheckUpdates
        } else if !self.reinstall.is_empty() {
            Mode::Reinstall(self.reinstall.clone())
        } else if let Some(pkg) = &self.downgrade {
            Mode::Downgrade(pkg.clone())
        } else if let Some(grp) = &self.group_install {
            Mode::GroupInstall(grp.clone())
        } else if let Some(grp) = &self.group_remove {
            Mode::GroupRemove(grp.clone())
        } else if !self.search.is_empty() {
            Mode::Search(self.search.clone())
        } else if let Some(days) = self.history {
            Mode::History(days)
        } else if let Some(tid) = self.undo {
            Mode::Undo(tid)
        } else if self.repos {
            Mode::Repos
        } else if self.refresh {
            Mode::Refresh
        } else {
            Mode::ListUpdates
        }
    }

    /// Modes that change the system and go through the transaction protocol
    pub fn is_transaction(&self) -> bool {
        matches!(
            self.mode(),
            Mode::Install(_)
                | Mode::Remove(_)
                | Mode::UpdateAll
                | Mode::Reinstall(_)
                | Mode::Downgrade(_)
                | Mode::GroupInstall(_)
                | Mode::GroupRemove(_)
                | Mode::Undo(_)
        )
    }
}
