//! Daemon RPC surface and the typed adapter over it
//!
//! [`Daemon`] mirrors the dnfdaemon method table one call per method and
//! hands back the raw payloads (mostly JSON strings). [`Backend`] turns those
//! payloads into typed values and maps daemon-reported failures onto
//! [`Error`] variants. The D-Bus implementation lives in `dbus.rs`, an
//! in-process fake in `mock.rs`.

use serde::Serialize;
use serde_json::Value;

use crate::error::{DaemonError, Error, Result};
use crate::types::*;

/// Attributes requested with every package listing
pub const PACKAGE_ATTRS: &[&str] = &["summary", "size"];

/// Raw dnfdaemon method table
pub trait Daemon {
    fn lock(&self) -> std::result::Result<bool, DaemonError>;
    fn unlock(&self) -> std::result::Result<bool, DaemonError>;
    fn exit(&self) -> std::result::Result<(), DaemonError>;
    fn set_watchdog_state(&self, state: bool) -> std::result::Result<(), DaemonError>;
    /// `value` is JSON encoded
    fn set_config(&self, setting: &str, value: &str) -> std::result::Result<bool, DaemonError>;
    fn set_enabled_repos(&self, repo_ids: &[String]) -> std::result::Result<(), DaemonError>;

    fn get_packages(&self, filter: &str, attrs: &[&str]) -> std::result::Result<String, DaemonError>;
    fn get_packages_by_name(
        &self,
        pattern: &str,
        attrs: &[&str],
        newest_only: bool,
    ) -> std::result::Result<String, DaemonError>;
    fn search(
        &self,
        fields: &[String],
        keys: &[String],
        attrs: &[&str],
        match_all: bool,
        newest_only: bool,
        tags: bool,
    ) -> std::result::Result<String, DaemonError>;
    fn get_attribute(&self, pkg_id: &str, attr: &str) -> std::result::Result<String, DaemonError>;

    fn get_groups(&self) -> std::result::Result<String, DaemonError>;
    fn get_group_packages(&self, grp_id: &str, grp_flt: &str) -> std::result::Result<String, DaemonError>;
    fn group_install(&self, cmds: &str) -> std::result::Result<String, DaemonError>;
    fn group_remove(&self, cmds: &str) -> std::result::Result<String, DaemonError>;

    fn get_repositories(&self, filter: &str) -> std::result::Result<Vec<String>, DaemonError>;
    fn get_repo(&self, repo_id: &str) -> std::result::Result<String, DaemonError>;

    fn clear_transaction(&self) -> std::result::Result<(), DaemonError>;
    fn add_transaction(&self, pkg_id: &str, action: &str) -> std::result::Result<String, DaemonError>;
    fn build_transaction(&self) -> std::result::Result<String, DaemonError>;
    fn get_transaction(&self) -> std::result::Result<String, DaemonError>;
    fn run_transaction(&self) -> std::result::Result<String, DaemonError>;
    fn confirm_gpg_import(&self, hexkeyid: &str, confirmed: bool) -> std::result::Result<(), DaemonError>;

    fn get_history_by_days(&self, start_days: i32, end_days: i32) -> std::result::Result<String, DaemonError>;
    fn get_history_packages(&self, tid: i32) -> std::result::Result<String, DaemonError>;
    fn history_undo(&self, tid: i32) -> std::result::Result<String, DaemonError>;

    fn expire_cache(&self) -> std::result::Result<bool, DaemonError>;

    /// Drain GPG import requests announced by signal since the last call
    fn take_gpg_requests(&self) -> Vec<GpgKeyRequest>;
}

// ============================================================================
// Decoded values
// ============================================================================

/// One `[pkg_id, summary, size]` row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPackage {
    pub id: PkgId,
    pub summary: String,
    pub size: u64,
}

/// Resolved transaction as reported by `BuildTransaction`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionPreview {
    pub groups: Vec<PreviewGroup>,
}

/// Entries sharing one daemon action (install, update, remove, ...)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviewGroup {
    pub action: String,
    pub entries: Vec<PreviewEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviewEntry {
    pub id: PkgId,
    pub size: u64,
    /// Packages this one obsoletes or replaces
    pub replaces: Vec<PkgId>,
}

impl TransactionPreview {
    pub fn is_empty(&self) -> bool {
        self.groups.iter().all(|g| g.entries.is_empty())
    }

    pub fn len(&self) -> usize {
        self.groups.iter().map(|g| g.entries.len()).sum()
    }

    pub fn download_size(&self) -> u64 {
        self.groups
            .iter()
            .flat_map(|g| &g.entries)
            .map(|e| e.size)
            .sum()
    }
}

/// Result code of `RunTransaction`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Success,
    NeedGpgConfirmation,
    DownloadError(Vec<String>),
    Failed(i64, Vec<String>),
}

/// Key import request from the `GPGImport` signal
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GpgKeyRequest {
    pub pkg_id: String,
    pub userid: String,
    pub hexkeyid: String,
    pub keyurl: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct RepoInfo {
    pub id: String,
    pub name: String,
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryTransaction {
    pub tid: i32,
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryPackage {
    pub id: PkgId,
    pub state: String,
    pub installed: bool,
}

/// Detail attributes fetched on demand
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attribute {
    Description,
    Changelog,
    Files,
    Requires,
    UpdateInfo,
    Downgrades,
}

impl Attribute {
    pub fn daemon_name(&self) -> &'static str {
        match self {
            Self::Description => "description",
            Self::Changelog => "changelog",
            Self::Files => "filelist",
            Self::Requires => "requires",
            Self::UpdateInfo => "updateinfo",
            Self::Downgrades => "downgrades",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "description" => Some(Self::Description),
            "changelog" => Some(Self::Changelog),
            "files" | "filelist" => Some(Self::Files),
            "requires" | "deps" => Some(Self::Requires),
            "updateinfo" => Some(Self::UpdateInfo),
            "downgrades" => Some(Self::Downgrades),
            _ => None,
        }
    }
}

// ============================================================================
// Backend adapter
// ============================================================================

/// Typed view of a [`Daemon`]
pub struct Backend<D: Daemon> {
    daemon: D,
}

impl<D: Daemon> Backend<D> {
    pub fn new(daemon: D) -> Self {
        Self { daemon }
    }

    /// Take the daemon lock; a refused lock is reported as `Locked`
    pub fn lock(&self) -> Result<()> {
        if self.daemon.lock()? {
            Ok(())
        } else {
            Err(DaemonError::locked().into())
        }
    }

    pub fn unlock(&self) -> Result<()> {
        self.daemon.unlock()?;
        Ok(())
    }

    pub fn exit(&self) -> Result<()> {
        Ok(self.daemon.exit()?)
    }

    pub fn set_watchdog(&self, enabled: bool) -> Result<()> {
        Ok(self.daemon.set_watchdog_state(enabled)?)
    }

    pub fn set_config<T: Serialize>(&self, setting: &str, value: &T) -> Result<bool> {
        let value = serde_json::to_string(value)?;
        Ok(self.daemon.set_config(setting, &value)?)
    }

    pub fn set_enabled_repos(&self, repo_ids: &[String]) -> Result<()> {
        Ok(self.daemon.set_enabled_repos(repo_ids)?)
    }

    pub fn expire_cache(&self) -> Result<bool> {
        Ok(self.daemon.expire_cache()?)
    }

    // === Package queries ===

    /// Rows for a daemon-backed filter; filters the daemon has no query for are empty
    pub fn packages(&self, filter: Filter) -> Result<Vec<RawPackage>> {
        let Some(name) = filter.daemon_name() else {
            return Ok(Vec::new());
        };
        decode_rows("GetPackages", &self.daemon.get_packages(name, PACKAGE_ATTRS)?)
    }

    pub fn packages_by_name(&self, pattern: &str, newest_only: bool) -> Result<Vec<RawPackage>> {
        let reply = self.daemon.get_packages_by_name(pattern, PACKAGE_ATTRS, newest_only)?;
        decode_rows("GetPackagesByName", &reply)
    }

    pub fn search(
        &self,
        fields: &[String],
        keys: &[String],
        match_all: bool,
        newest_only: bool,
    ) -> Result<Vec<RawPackage>> {
        let reply = self
            .daemon
            .search(fields, keys, PACKAGE_ATTRS, match_all, newest_only, false)?;
        decode_rows("Search", &reply)
    }

    /// `None` when the daemon has no value for this attribute
    pub fn attribute(&self, key: &str, attr: Attribute) -> Result<Option<Value>> {
        let reply = self.daemon.get_attribute(key, attr.daemon_name())?;
        // ":none" and ":not-found" are sent bare, not as JSON
        if reply.starts_with(':') {
            return Ok(None);
        }
        let value = parse("GetAttribute", &reply)?;
        Ok((!value.is_null()).then_some(value))
    }

    // === Groups ===

    pub fn groups(&self) -> Result<Vec<GroupCategory>> {
        decode_groups(&self.daemon.get_groups()?)
    }

    pub fn group_packages(&self, grp_id: &str, all: bool) -> Result<Vec<PkgId>> {
        let reply = self
            .daemon
            .get_group_packages(grp_id, if all { "all" } else { "default" })?;
        Ok(decode_rows("GetGroupPackages", &reply)?
            .into_iter()
            .map(|row| row.id)
            .collect())
    }

    pub fn group_install(&self, grp_ids: &[&str]) -> Result<()> {
        let cmds = grp_ids.join(" ");
        check_added("GroupInstall", &cmds, &self.daemon.group_install(&cmds)?)
    }

    pub fn group_remove(&self, grp_ids: &[&str]) -> Result<()> {
        let cmds = grp_ids.join(" ");
        check_added("GroupRemove", &cmds, &self.daemon.group_remove(&cmds)?)
    }

    // === Repositories ===

    pub fn repositories(&self) -> Result<Vec<RepoInfo>> {
        let mut repos = Vec::new();
        for id in self.daemon.get_repositories("*")? {
            let value = parse("GetRepo", &self.daemon.get_repo(&id)?)?;
            let name = value
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or(&id)
                .to_string();
            let enabled = value.get("enabled").is_some_and(truthy);
            repos.push(RepoInfo { id, name, enabled });
        }
        repos.sort();
        Ok(repos)
    }

    // === Transactions ===

    pub fn clear_transaction(&self) -> Result<()> {
        Ok(self.daemon.clear_transaction()?)
    }

    pub fn add_transaction(&self, key: &str, action: Action) -> Result<()> {
        let reply = self.daemon.add_transaction(key, action.daemon_verb())?;
        check_added("AddTransaction", key, &reply)
    }

    pub fn build_transaction(&self) -> Result<TransactionPreview> {
        decode_transaction("BuildTransaction", &self.daemon.build_transaction()?)
    }

    pub fn transaction(&self) -> Result<TransactionPreview> {
        decode_transaction("GetTransaction", &self.daemon.get_transaction()?)
    }

    pub fn run_transaction(&self) -> Result<RunOutcome> {
        decode_run(&self.daemon.run_transaction()?)
    }

    pub fn confirm_gpg_import(&self, hexkeyid: &str, accept: bool) -> Result<()> {
        Ok(self.daemon.confirm_gpg_import(hexkeyid, accept)?)
    }

    pub fn take_gpg_requests(&self) -> Vec<GpgKeyRequest> {
        self.daemon.take_gpg_requests()
    }

    // === History ===

    /// Transactions from the last `days` days, newest first
    pub fn history(&self, days: i32) -> Result<Vec<HistoryTransaction>> {
        let value = parse("GetHistoryByDays", &self.daemon.get_history_by_days(0, days)?)?;
        let rows = expect_list("GetHistoryByDays", &value)?;
        let mut history = rows
            .iter()
            .map(|row| {
                let tid = row
                    .get(0)
                    .and_then(Value::as_i64)
                    .ok_or_else(|| Error::protocol("GetHistoryByDays", format!("bad row {row}")))?;
                let timestamp = row.get(1).map(display_value).unwrap_or_default();
                Ok(HistoryTransaction {
                    tid: tid as i32,
                    timestamp,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        history.sort_by_key(|t| std::cmp::Reverse(t.tid));
        Ok(history)
    }

    pub fn history_packages(&self, tid: i32) -> Result<Vec<HistoryPackage>> {
        let value = parse("GetHistoryPackages", &self.daemon.get_history_packages(tid)?)?;
        expect_list("GetHistoryPackages", &value)?
            .iter()
            .map(|row| {
                let id = row
                    .get(0)
                    .and_then(Value::as_str)
                    .ok_or_else(|| Error::protocol("GetHistoryPackages", format!("bad row {row}")))?
                    .parse::<PkgId>()?;
                Ok(HistoryPackage {
                    id,
                    state: row.get(1).map(display_value).unwrap_or_default(),
                    installed: row.get(2).is_some_and(truthy),
                })
            })
            .collect()
    }

    pub fn history_undo(&self, tid: i32) -> Result<TransactionPreview> {
        decode_transaction("HistoryUndo", &self.daemon.history_undo(tid)?)
    }
}

// ============================================================================
// Payload decoding
// ============================================================================

fn parse(method: &'static str, json: &str) -> Result<Value> {
    serde_json::from_str(json).map_err(|e| Error::protocol(method, e.to_string()))
}

fn expect_list<'a>(method: &'static str, value: &'a Value) -> Result<&'a Vec<Value>> {
    value
        .as_array()
        .ok_or_else(|| Error::protocol(method, format!("expected a list, got {value}")))
}

/// Daemon flags come as JSON bools or 0/1
fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_i64().is_some_and(|n| n != 0),
        Value::String(s) => s == "1" || s.eq_ignore_ascii_case("true"),
        _ => false,
    }
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Error message list; a lone string becomes a single message
fn messages(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items.iter().map(display_value).collect(),
        Value::Null => Vec::new(),
        other => vec![display_value(other)],
    }
}

fn size_of(value: Option<&Value>) -> u64 {
    value
        .and_then(|v| v.as_u64().or_else(|| v.as_f64().map(|f| f as u64)))
        .unwrap_or(0)
}

fn decode_rows(method: &'static str, json: &str) -> Result<Vec<RawPackage>> {
    let value = parse(method, json)?;
    expect_list(method, &value)?
        .iter()
        .map(|row| decode_row(method, row))
        .collect()
}

fn decode_row(method: &'static str, row: &Value) -> Result<RawPackage> {
    // Some calls return bare pkg_id strings instead of rows
    if let Some(id) = row.as_str() {
        return Ok(RawPackage {
            id: id.parse::<PkgId>()?,
            summary: String::new(),
            size: 0,
        });
    }
    let fields = expect_list(method, row)?;
    let id = fields
        .first()
        .and_then(Value::as_str)
        .ok_or_else(|| Error::protocol(method, format!("row without pkg_id: {row}")))?
        .parse::<PkgId>()?;
    Ok(RawPackage {
        id,
        summary: fields.get(1).map(display_value).unwrap_or_default(),
        size: size_of(fields.get(2)),
    })
}

/// `[resolved, output]`: output is the grouped preview when resolved,
/// the depsolve messages otherwise
fn decode_transaction(method: &'static str, json: &str) -> Result<TransactionPreview> {
    let value = parse(method, json)?;
    let Some([resolved, output]) = value.as_array().map(Vec::as_slice) else {
        return Err(Error::protocol(method, format!("expected [resolved, output], got {value}")));
    };
    if !truthy(resolved) {
        return Err(Error::Solve(messages(output)));
    }

    let mut preview = TransactionPreview::default();
    for group in expect_list(method, output)? {
        let Some([action, entries]) = group.as_array().map(Vec::as_slice) else {
            return Err(Error::protocol(method, format!("bad transaction group {group}")));
        };
        let entries = expect_list(method, entries)?
            .iter()
            .map(|entry| decode_entry(method, entry))
            .collect::<Result<Vec<_>>>()?;
        preview.groups.push(PreviewGroup {
            action: display_value(action),
            entries,
        });
    }
    Ok(preview)
}

fn decode_entry(method: &'static str, entry: &Value) -> Result<PreviewEntry> {
    let fields = expect_list(method, entry)?;
    let id = fields
        .first()
        .and_then(Value::as_str)
        .ok_or_else(|| Error::protocol(method, format!("entry without pkg_id: {entry}")))?
        .parse::<PkgId>()?;
    let replaces = fields
        .get(2)
        .and_then(Value::as_array)
        .map(|ids| {
            ids.iter()
                .filter_map(Value::as_str)
                .map(str::parse::<PkgId>)
                .collect::<Result<Vec<_>>>()
        })
        .transpose()?
        .unwrap_or_default();
    Ok(PreviewEntry {
        id,
        size: size_of(fields.get(1)),
        replaces,
    })
}

fn decode_run(json: &str) -> Result<RunOutcome> {
    let value = parse("RunTransaction", json)?;
    let Some([rc, msgs]) = value.as_array().map(Vec::as_slice) else {
        return Err(Error::protocol("RunTransaction", format!("expected [rc, messages], got {value}")));
    };
    let rc = rc
        .as_i64()
        .ok_or_else(|| Error::protocol("RunTransaction", format!("bad result code {rc}")))?;
    Ok(match rc {
        0 => RunOutcome::Success,
        1 => RunOutcome::NeedGpgConfirmation,
        4 => RunOutcome::DownloadError(messages(msgs)),
        rc => RunOutcome::Failed(rc, messages(msgs)),
    })
}

/// Replies of calls that add members to the daemon transaction. Either
/// `[ok, members_or_messages]` or the member list itself; no members is a
/// build failure.
fn check_added(method: &'static str, what: &str, json: &str) -> Result<()> {
    let value = parse(method, json)?;
    let failed = || vec![format!("{what}: nothing was added to the transaction")];
    match &value {
        Value::Array(items) if items.len() == 2 && items[0].is_boolean() => {
            let detail = messages(&items[1]);
            if truthy(&items[0]) && !detail.is_empty() {
                Ok(())
            } else if detail.is_empty() {
                Err(Error::Build(failed()))
            } else {
                Err(Error::Build(detail))
            }
        }
        Value::Array(items) if !items.is_empty() => Ok(()),
        Value::Bool(true) => Ok(()),
        _ => Err(Error::Build(failed())),
    }
}

fn decode_groups(json: &str) -> Result<Vec<GroupCategory>> {
    const METHOD: &str = "GetGroups";
    let value = parse(METHOD, json)?;
    let mut tree = Vec::new();
    for entry in expect_list(METHOD, &value)? {
        let Some([category, groups]) = entry.as_array().map(Vec::as_slice) else {
            return Err(Error::protocol(METHOD, format!("bad category {entry}")));
        };
        let mut category = decode_group(METHOD, category)?;
        category.category = true;
        let groups = expect_list(METHOD, groups)?
            .iter()
            .map(|g| decode_group(METHOD, g))
            .collect::<Result<Vec<_>>>()?;
        tree.push(GroupCategory { category, groups });
    }
    Ok(tree)
}

/// `[id, name, description(, installed)]`
fn decode_group(method: &'static str, value: &Value) -> Result<Group> {
    let fields = expect_list(method, value)?;
    let text = |i: usize| fields.get(i).map(display_value).unwrap_or_default();
    let id = text(0);
    if id.is_empty() {
        return Err(Error::protocol(method, format!("group without id: {value}")));
    }
    Ok(Group::new(
        &id,
        &text(1),
        &text(2),
        fields.get(3).is_some_and(truthy),
    ))
}

/// Render an attribute value as display lines
pub fn attribute_lines(attr: Attribute, value: &Value) -> Vec<String> {
    match (attr, value) {
        (Attribute::Changelog, Value::Array(entries)) => entries
            .iter()
            .flat_map(|entry| {
                let field = |i: usize| entry.get(i).map(display_value).unwrap_or_default();
                let date = entry
                    .get(0)
                    .and_then(Value::as_i64)
                    .and_then(|ts| chrono::DateTime::from_timestamp(ts, 0))
                    .map(|dt| dt.format("%a %b %d %Y").to_string())
                    .unwrap_or_else(|| field(0));
                let mut lines = vec![format!("* {date} {}", field(1))];
                lines.extend(field(2).lines().map(String::from));
                lines.push(String::new());
                lines
            })
            .collect(),
        (_, Value::String(text)) => text.lines().map(String::from).collect(),
        (_, Value::Array(items)) => items
            .iter()
            .map(|item| match item {
                Value::Array(parts) => parts.iter().map(display_value).collect::<Vec<_>>().join(" "),
                other => display_value(other),
            })
            .collect(),
        (_, Value::Object(map)) => map
            .iter()
            .map(|(key, val)| format!("{key}: {}", display_value(val)))
            .collect(),
        (_, Value::Null) => Vec::new(),
        (_, other) => vec![display_value(other)],
    }
}
