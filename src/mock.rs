//! In-process fake of the dnfdaemon method table
//!
//! Records every call, keeps a tiny package universe and a daemon-side
//! transaction, and lets tests script replies and inject failures.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::{Value, json};

use crate::backend::{Daemon, GpgKeyRequest};
use crate::error::DaemonError;

#[derive(Debug, Clone)]
struct MockPackage {
    filter: String,
    pkg_id: String,
    summary: String,
    size: u64,
}

impl MockPackage {
    fn name(&self) -> &str {
        self.pkg_id.split(',').next().unwrap_or_default()
    }

    fn is_installed(&self) -> bool {
        self.pkg_id.rsplit(',').next().is_some_and(|repo| repo.starts_with('@'))
    }

    fn row(&self) -> Value {
        json!([self.pkg_id, self.summary, self.size])
    }
}

#[derive(Debug, Default)]
struct MockState {
    packages: Vec<MockPackage>,
    attributes: HashMap<(String, String), String>,
    groups: Option<String>,
    group_packages: HashMap<String, Vec<String>>,
    repos: Vec<(String, String, bool)>,
    history: Option<String>,
    history_packages: HashMap<i32, String>,
    undo_replies: HashMap<i32, String>,

    /// Daemon-side transaction: `(pkg_id, verb)`
    transaction: Vec<(String, String)>,
    tx_groups: Vec<(String, String)>,
    build_failure: Option<Vec<String>>,
    run_replies: VecDeque<(String, Option<GpgKeyRequest>)>,
    announced: Vec<GpgKeyRequest>,
    gpg_answers: Vec<(String, bool)>,

    calls: Vec<String>,
    failures: HashMap<String, DaemonError>,
    refuse_lock: bool,
    locked: bool,
    config: Vec<(String, String)>,
    enabled_repos: Option<Vec<String>>,
    watchdog: Vec<bool>,
}

/// Scriptable fake daemon. Clones share state, so a test can keep one
/// handle while the session owns another.
#[derive(Clone, Default)]
pub struct MockDaemon {
    state: Arc<Mutex<MockState>>,
}

impl MockDaemon {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Log the call and fail it if a failure was injected for `method`
    fn enter(&self, method: &str, args: String) -> Result<MutexGuard<'_, MockState>, DaemonError> {
        let mut state = self.state();
        state.calls.push(if args.is_empty() {
            method.to_string()
        } else {
            format!("{method} {args}")
        });
        match state.failures.remove(method) {
            Some(err) => Err(err),
            None => Ok(state),
        }
    }

    // === Scripting ===

    /// Add a package to a `GetPackages` filter (installed, available, updates, obsoletes)
    pub fn with_package(self, filter: &str, pkg_id: &str, summary: &str, size: u64) -> Self {
        self.add_package(filter, pkg_id, summary, size);
        self
    }

    pub fn add_package(&self, filter: &str, pkg_id: &str, summary: &str, size: u64) {
        self.state().packages.push(MockPackage {
            filter: filter.to_string(),
            pkg_id: pkg_id.to_string(),
            summary: summary.to_string(),
            size,
        });
    }

    /// `json` is the raw `GetAttribute` reply
    pub fn set_attribute(&self, pkg_id: &str, attr: &str, json: &str) {
        self.state()
            .attributes
            .insert((pkg_id.to_string(), attr.to_string()), json.to_string());
    }

    pub fn set_groups(&self, json: &str) {
        self.state().groups = Some(json.to_string());
    }

    pub fn set_group_packages(&self, grp_id: &str, pkg_ids: &[&str]) {
        self.state().group_packages.insert(
            grp_id.to_string(),
            pkg_ids.iter().map(ToString::to_string).collect(),
        );
    }

    pub fn add_repo(&self, id: &str, name: &str, enabled: bool) {
        self.state()
            .repos
            .push((id.to_string(), name.to_string(), enabled));
    }

    pub fn set_history(&self, json: &str) {
        self.state().history = Some(json.to_string());
    }

    pub fn set_history_packages(&self, tid: i32, json: &str) {
        self.state().history_packages.insert(tid, json.to_string());
    }

    pub fn set_undo_reply(&self, tid: i32, json: &str) {
        self.state().undo_replies.insert(tid, json.to_string());
    }

    /// Make `BuildTransaction` report a depsolve failure
    pub fn fail_build(&self, messages: &[&str]) {
        self.state().build_failure = Some(messages.iter().map(ToString::to_string).collect());
    }

    /// Next `RunTransaction` reply; replies default to `[0, []]` once the queue runs dry
    pub fn queue_run_reply(&self, json: &str) {
        self.state().run_replies.push_back((json.to_string(), None));
    }

    /// Next `RunTransaction` asks for a key import and announces `request`
    pub fn queue_gpg_prompt(&self, request: GpgKeyRequest) {
        self.state()
            .run_replies
            .push_back((String::from("[1, []]"), Some(request)));
    }

    /// Fail the next call to `method` with `err`
    pub fn fail_next(&self, method: &str, err: DaemonError) {
        self.state().failures.insert(method.to_string(), err);
    }

    pub fn refuse_lock(&self) {
        self.state().refuse_lock = true;
    }

    // === Inspection ===

    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    /// Number of calls to `method`
    pub fn called(&self, method: &str) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|c| c.split(' ').next() == Some(method))
            .count()
    }

    pub fn transaction(&self) -> Vec<(String, String)> {
        self.state().transaction.clone()
    }

    pub fn transaction_groups(&self) -> Vec<(String, String)> {
        self.state().tx_groups.clone()
    }

    pub fn gpg_answers(&self) -> Vec<(String, bool)> {
        self.state().gpg_answers.clone()
    }

    pub fn config(&self) -> Vec<(String, String)> {
        self.state().config.clone()
    }

    pub fn enabled_repos(&self) -> Option<Vec<String>> {
        self.state().enabled_repos.clone()
    }

    pub fn watchdog(&self) -> Vec<bool> {
        self.state().watchdog.clone()
    }

    pub fn is_locked(&self) -> bool {
        self.state().locked
    }
}

fn matches_pattern(pattern: &str, name: &str) -> bool {
    match pattern.split_once('*') {
        Some((prefix, suffix)) => name.starts_with(prefix) && name.ends_with(suffix),
        None => pattern == name,
    }
}

fn rows<'a>(packages: impl Iterator<Item = &'a MockPackage>) -> String {
    let mut seen = Vec::new();
    let rows: Vec<Value> = packages
        .filter(|p| {
            if seen.contains(&p.pkg_id) {
                false
            } else {
                seen.push(p.pkg_id.clone());
                true
            }
        })
        .map(MockPackage::row)
        .collect();
    Value::Array(rows).to_string()
}

impl Daemon for MockDaemon {
    fn lock(&self) -> Result<bool, DaemonError> {
        let mut state = self.enter("Lock", String::new())?;
        if state.refuse_lock {
            return Ok(false);
        }
        state.locked = true;
        Ok(true)
    }

    fn unlock(&self) -> Result<bool, DaemonError> {
        let mut state = self.enter("Unlock", String::new())?;
        let was_locked = state.locked;
        state.locked = false;
        Ok(was_locked)
    }

    fn exit(&self) -> Result<(), DaemonError> {
        drop(self.enter("Exit", String::new())?);
        Ok(())
    }

    fn set_watchdog_state(&self, state: bool) -> Result<(), DaemonError> {
        self.enter("SetWatchdogState", state.to_string())?.watchdog.push(state);
        Ok(())
    }

    fn set_config(&self, setting: &str, value: &str) -> Result<bool, DaemonError> {
        let mut state = self.enter("SetConfig", format!("{setting} {value}"))?;
        state.config.push((setting.to_string(), value.to_string()));
        Ok(true)
    }

    fn set_enabled_repos(&self, repo_ids: &[String]) -> Result<(), DaemonError> {
        let mut state = self.enter("SetEnabledRepos", repo_ids.join(","))?;
        for repo in &mut state.repos {
            repo.2 = repo_ids.contains(&repo.0);
        }
        state.enabled_repos = Some(repo_ids.to_vec());
        Ok(())
    }

    fn get_packages(&self, filter: &str, _attrs: &[&str]) -> Result<String, DaemonError> {
        let state = self.enter("GetPackages", filter.to_string())?;
        Ok(rows(state.packages.iter().filter(|p| p.filter == filter)))
    }

    fn get_packages_by_name(&self, pattern: &str, _attrs: &[&str], newest_only: bool) -> Result<String, DaemonError> {
        let state = self.enter("GetPackagesByName", pattern.to_string())?;
        let found: Vec<&MockPackage> = state
            .packages
            .iter()
            .filter(|p| matches_pattern(pattern, p.name()))
            .collect();
        // Stand-in for "newest": prefer what the repos offer over what is installed
        let offered = found.iter().any(|p| !p.is_installed());
        Ok(rows(
            found
                .into_iter()
                .filter(|p| !newest_only || !offered || !p.is_installed()),
        ))
    }

    fn search(
        &self,
        fields: &[String],
        keys: &[String],
        _attrs: &[&str],
        match_all: bool,
        _newest_only: bool,
        _tags: bool,
    ) -> Result<String, DaemonError> {
        let state = self.enter("Search", keys.join(" "))?;
        let hit = |p: &MockPackage, key: &str| {
            fields.iter().any(|f| match f.as_str() {
                "name" => p.name().contains(key),
                "summary" => p.summary.contains(key),
                _ => false,
            })
        };
        Ok(rows(state.packages.iter().filter(|p| {
            if match_all {
                keys.iter().all(|k| hit(p, k))
            } else {
                keys.iter().any(|k| hit(p, k))
            }
        })))
    }

    fn get_attribute(&self, pkg_id: &str, attr: &str) -> Result<String, DaemonError> {
        let state = self.enter("GetAttribute", format!("{pkg_id} {attr}"))?;
        Ok(state
            .attributes
            .get(&(pkg_id.to_string(), attr.to_string()))
            .cloned()
            .unwrap_or_else(|| String::from(":none")))
    }

    fn get_groups(&self) -> Result<String, DaemonError> {
        let state = self.enter("GetGroups", String::new())?;
        Ok(state.groups.clone().unwrap_or_else(|| String::from("[]")))
    }

    fn get_group_packages(&self, grp_id: &str, grp_flt: &str) -> Result<String, DaemonError> {
        let state = self.enter("GetGroupPackages", format!("{grp_id} {grp_flt}"))?;
        let ids = state.group_packages.get(grp_id).cloned().unwrap_or_default();
        Ok(json!(ids).to_string())
    }

    fn group_install(&self, cmds: &str) -> Result<String, DaemonError> {
        let mut state = self.enter("GroupInstall", cmds.to_string())?;
        let ids: Vec<String> = cmds.split_whitespace().map(String::from).collect();
        for id in &ids {
            state.tx_groups.push((id.clone(), String::from("install")));
        }
        Ok(json!([!ids.is_empty(), ids]).to_string())
    }

    fn group_remove(&self, cmds: &str) -> Result<String, DaemonError> {
        let mut state = self.enter("GroupRemove", cmds.to_string())?;
        let ids: Vec<String> = cmds.split_whitespace().map(String::from).collect();
        for id in &ids {
            state.tx_groups.push((id.clone(), String::from("remove")));
        }
        Ok(json!([!ids.is_empty(), ids]).to_string())
    }

    fn get_repositories(&self, filter: &str) -> Result<Vec<String>, DaemonError> {
        let state = self.enter("GetRepositories", filter.to_string())?;
        Ok(state
            .repos
            .iter()
            .filter(|r| matches_pattern(filter, &r.0))
            .map(|r| r.0.clone())
            .collect())
    }

    fn get_repo(&self, repo_id: &str) -> Result<String, DaemonError> {
        let state = self.enter("GetRepo", repo_id.to_string())?;
        Ok(match state.repos.iter().find(|r| r.0 == repo_id) {
            Some((_, name, enabled)) => json!({ "name": name, "enabled": enabled }).to_string(),
            None => String::from("{}"),
        })
    }

    fn clear_transaction(&self) -> Result<(), DaemonError> {
        let mut state = self.enter("ClearTransaction", String::new())?;
        state.transaction.clear();
        state.tx_groups.clear();
        Ok(())
    }

    fn add_transaction(&self, pkg_id: &str, action: &str) -> Result<String, DaemonError> {
        let mut state = self.enter("AddTransaction", format!("{pkg_id} {action}"))?;
        state.transaction.push((pkg_id.to_string(), action.to_string()));
        let members: Vec<Value> = state
            .transaction
            .iter()
            .map(|(id, verb)| json!([id, verb]))
            .collect();
        Ok(json!([true, members]).to_string())
    }

    fn build_transaction(&self) -> Result<String, DaemonError> {
        let state = self.enter("BuildTransaction", String::new())?;
        if let Some(messages) = &state.build_failure {
            return Ok(json!([false, messages]).to_string());
        }

        let mut groups: Vec<(String, Vec<Value>)> = Vec::new();
        let size_of = |id: &str| {
            state
                .packages
                .iter()
                .find(|p| p.pkg_id == id)
                .map_or(0, |p| p.size)
        };
        let mut push = |verb: &str, entry: Value| match groups.iter_mut().find(|(v, _)| v == verb) {
            Some((_, entries)) => entries.push(entry),
            None => groups.push((verb.to_string(), vec![entry])),
        };
        for (pkg_id, verb) in &state.transaction {
            push(verb, json!([pkg_id, size_of(pkg_id), []]));
        }
        for (grp_id, verb) in &state.tx_groups {
            for pkg_id in state.group_packages.get(grp_id).into_iter().flatten() {
                push(verb, json!([pkg_id, size_of(pkg_id), []]));
            }
        }
        let output: Vec<Value> = groups
            .into_iter()
            .map(|(verb, entries)| json!([verb, entries]))
            .collect();
        Ok(json!([true, output]).to_string())
    }

    fn get_transaction(&self) -> Result<String, DaemonError> {
        drop(self.enter("GetTransaction", String::new())?);
        self.build_transaction()
    }

    fn run_transaction(&self) -> Result<String, DaemonError> {
        let mut state = self.enter("RunTransaction", String::new())?;
        let (reply, request) = state
            .run_replies
            .pop_front()
            .unwrap_or_else(|| (String::from("[0, []]"), None));
        state.announced.extend(request);
        if reply.starts_with("[0") {
            state.transaction.clear();
            state.tx_groups.clear();
        }
        Ok(reply)
    }

    fn confirm_gpg_import(&self, hexkeyid: &str, confirmed: bool) -> Result<(), DaemonError> {
        let mut state = self.enter("ConfirmGPGImport", format!("{hexkeyid} {confirmed}"))?;
        state.gpg_answers.push((hexkeyid.to_string(), confirmed));
        Ok(())
    }

    fn get_history_by_days(&self, start_days: i32, end_days: i32) -> Result<String, DaemonError> {
        let state = self.enter("GetHistoryByDays", format!("{start_days} {end_days}"))?;
        Ok(state.history.clone().unwrap_or_else(|| String::from("[]")))
    }

    fn get_history_packages(&self, tid: i32) -> Result<String, DaemonError> {
        let state = self.enter("GetHistoryPackages", tid.to_string())?;
        Ok(state
            .history_packages
            .get(&tid)
            .cloned()
            .unwrap_or_else(|| String::from("[]")))
    }

    fn history_undo(&self, tid: i32) -> Result<String, DaemonError> {
        let state = self.enter("HistoryUndo", tid.to_string())?;
        Ok(state
            .undo_replies
            .get(&tid)
            .cloned()
            .unwrap_or_else(|| format!(r#"[false, ["transaction {tid} not found"]]"#)))
    }

    fn expire_cache(&self) -> Result<bool, DaemonError> {
        drop(self.enter("ExpireCache", String::new())?);
        Ok(true)
    }

    fn take_gpg_requests(&self) -> Vec<GpgKeyRequest> {
        std::mem::take(&mut self.state().announced)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_calls() {
        let mock = MockDaemon::new().with_package("available", "foo,0,1,1,noarch,fedora", "Foo", 10);
        mock.get_packages("available", &["summary", "size"]).unwrap();
        mock.add_transaction("foo,0,1,1,noarch,fedora", "install").unwrap();

        assert_eq!(
            mock.calls(),
            vec!["GetPackages available", "AddTransaction foo,0,1,1,noarch,fedora install"]
        );
        assert_eq!(mock.called("AddTransaction"), 1);
    }

    #[test]
    fn failure_injection_is_one_shot() {
        let mock = MockDaemon::new();
        mock.fail_next("Lock", DaemonError::classify("org.freedesktop.DBus.Error.NoReply", "timeout"));

        assert!(mock.lock().is_err());
        assert_eq!(mock.lock(), Ok(true));
    }

    #[test]
    fn clones_share_state() {
        let mock = MockDaemon::new();
        let other = mock.clone();
        other.lock().unwrap();
        assert!(mock.is_locked());
    }

    #[test]
    fn name_patterns() {
        assert!(matches_pattern("foo", "foo"));
        assert!(!matches_pattern("foo", "foobar"));
        assert!(matches_pattern("foo*", "foobar"));
        assert!(matches_pattern("*", "anything"));
    }
}
