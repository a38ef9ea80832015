//! Core session logic - queue, cache and daemon tied together
//!
//! A [`Session`] holds the daemon lock for its lifetime:
//! - packages come from the backend and are deduplicated by the cache
//! - user choices are staged in the queue, which owns all queued state
//! - [`Session::resolve`] replays the queue into a daemon transaction and
//!   hands out a [`Resolved`] token; only a resolved transaction can run
//!
//! Recoverable failures clear the daemon-side transaction and leave the
//! queue as it was, so the user can adjust and retry.

use std::collections::BTreeSet;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::backend::{
    Attribute, Backend, Daemon, GpgKeyRequest, HistoryPackage, HistoryTransaction, RawPackage, RepoInfo,
    RunOutcome, TransactionPreview, attribute_lines,
};
use crate::cache::PackageCache;
use crate::config::Config;
use crate::error::{DaemonErrorKind, Error, Result, Severity};
use crate::queue::PackageQueue;
use crate::search::SearchIndex;
use crate::types::*;

/// Packages that are never queued for removal
pub const PROTECTED: &[&str] = &["dnf", "python3-dnf", "dnfdaemon", "python3-dnfdaemon", "rpm"];

/// RunTransaction attempts while the daemon keeps asking for GPG keys
const MAX_GPG_ROUNDS: usize = 3;

// ============================================================================
// Confirmation
// ============================================================================

/// User decisions the transaction protocol waits on
pub trait Confirm {
    /// Shown the resolved transaction; true runs it
    fn confirm_transaction(&mut self, preview: &TransactionPreview) -> Result<bool>;

    /// A package is signed with a key that is not imported yet
    fn confirm_gpg_key(&mut self, request: &GpgKeyRequest) -> Result<bool>;
}

/// Accepts every transaction and key (`--yes`, `always_yes`)
pub struct AlwaysYes;

impl Confirm for AlwaysYes {
    fn confirm_transaction(&mut self, preview: &TransactionPreview) -> Result<bool> {
        log::info!("applying {} changes without confirmation", preview.len());
        Ok(true)
    }

    fn confirm_gpg_key(&mut self, request: &GpgKeyRequest) -> Result<bool> {
        log::info!("importing GPG key {} ({})", request.hexkeyid, request.userid);
        Ok(true)
    }
}

// ============================================================================
// Session setup
// ============================================================================

/// What [`Session::start`] sends to the daemon
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Replace the daemon's enabled repositories
    pub enabled_repos: Option<Vec<String>>,
    /// `clean_requirements_on_remove`
    pub clean_unused: bool,
    /// Expire the metadata cache before the first query
    pub refresh_metadata: bool,
    /// Extra names to protect from removal
    pub protected: Vec<String>,
    pub search_fields: Vec<String>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            enabled_repos: None,
            clean_unused: false,
            refresh_metadata: false,
            protected: Vec::new(),
            search_fields: vec![String::from("name"), String::from("summary")],
        }
    }
}

impl SessionOptions {
    pub fn from_config(config: &Config, now: DateTime<Utc>) -> Self {
        Self {
            enabled_repos: config.repo_saved.then(|| config.repo_enabled.clone()),
            clean_unused: config.clean_unused,
            refresh_metadata: config.needs_refresh(now),
            protected: config.protected.clone(),
            search_fields: config.search_fields.clone(),
        }
    }
}

/// A depsolved daemon transaction. Only [`Session::resolve`] and
/// [`Session::resolve_undo`] create one.
#[derive(Debug)]
pub struct Resolved {
    preview: TransactionPreview,
}

impl Resolved {
    pub fn preview(&self) -> &TransactionPreview {
        &self.preview
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied(TransactionPreview),
    /// The user said no; the queue is untouched
    Declined,
}

// ============================================================================
// Session
// ============================================================================

pub struct Session<D: Daemon> {
    backend: Backend<D>,
    cache: PackageCache,
    queue: PackageQueue,
    groups: Option<Vec<GroupCategory>>,
    search: Option<SearchIndex>,
    search_fields: Vec<String>,
    protected: BTreeSet<String>,
    locked: bool,
}

impl<D: Daemon> Session<D> {
    pub fn new(daemon: D) -> Self {
        Self {
            backend: Backend::new(daemon),
            cache: PackageCache::new(),
            queue: PackageQueue::new(),
            groups: None,
            search: None,
            search_fields: SessionOptions::default().search_fields,
            protected: PROTECTED.iter().map(ToString::to_string).collect(),
            locked: false,
        }
    }

    /// Take the daemon lock and apply `options`. Any lock failure is fatal.
    /// Returns true when the metadata cache was expired.
    pub fn start(&mut self, options: &SessionOptions) -> Result<bool> {
        self.backend.lock().map_err(|err| match err {
            Error::Daemon(mut e) if !e.is_fatal() => {
                e.kind = DaemonErrorKind::Unreachable;
                Error::Daemon(e)
            }
            other => other,
        })?;
        self.locked = true;
        log::info!("dnfdaemon locked");

        self.protected.extend(options.protected.iter().cloned());
        self.search_fields.clone_from(&options.search_fields);

        if let Some(repos) = &options.enabled_repos {
            log::info!("enabling repositories: {}", repos.join(", "));
            self.backend.set_enabled_repos(repos)?;
        }
        if options.clean_unused {
            self.backend.set_config("clean_requirements_on_remove", &true)?;
        }
        if options.refresh_metadata {
            return self.refresh_metadata();
        }
        Ok(false)
    }

    /// Release the lock. Errors are logged; the daemon drops the lock
    /// on its own when the bus connection goes away.
    pub fn shutdown(&mut self) {
        if !self.locked {
            return;
        }
        match self.backend.unlock() {
            Ok(()) => log::info!("dnfdaemon unlocked"),
            Err(e) => log::warn!("unlock failed: {e}"),
        }
        self.locked = false;
    }

    /// Ask the daemon process to quit
    pub fn exit_daemon(&self) -> Result<()> {
        self.backend.exit()
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn backend(&self) -> &Backend<D> {
        &self.backend
    }

    pub fn queue(&self) -> &PackageQueue {
        &self.queue
    }

    pub fn cache(&self) -> &PackageCache {
        &self.cache
    }

    pub fn package(&self, handle: PackageHandle) -> Option<&Package> {
        self.cache.package(handle)
    }

    pub fn is_protected(&self, name: &str) -> bool {
        self.protected.contains(name)
    }

    /// Forget every package and queued change; handles become invalid
    pub fn reset(&mut self) {
        self.queue.clear();
        self.cache.reset();
        self.groups = None;
        self.search = None;
    }

    // === Package lists ===

    /// Handles for `filter`, queried from the daemon on first use
    pub fn packages(&mut self, filter: Filter) -> Result<Vec<PackageHandle>> {
        if filter.daemon_name().is_some() && !self.cache.is_populated(filter) {
            let rows = self.backend.packages(filter)?;
            log::debug!("{} {} packages", rows.len(), filter.label());
            self.cache.populate(filter, rows);
        }
        Ok(self.cache.get(filter).to_vec())
    }

    pub fn update_count(&mut self) -> Result<usize> {
        Ok(self.packages(Filter::Updates)?.len())
    }

    /// Cache rows outside any filter list: installed rows get `Remove`,
    /// everything else `Install`
    fn cache_rows(&mut self, rows: Vec<RawPackage>) -> Vec<PackageHandle> {
        rows.into_iter()
            .map(|row| {
                let action = if row.id.is_installed() {
                    Action::Remove
                } else {
                    Action::Install
                };
                self.cache.find_package(row, action)
            })
            .collect()
    }

    /// Daemon-side search over the configured fields, newest versions only
    pub fn search(&mut self, keys: &[String]) -> Result<Vec<PackageHandle>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let rows = self.backend.search(&self.search_fields, keys, true, true)?;
        Ok(self.cache_rows(rows))
    }

    /// Prefix filter over the packages already loaded this session
    pub fn filter_loaded(&mut self, query: &str) -> Result<Vec<PackageHandle>> {
        let stale = self
            .search
            .as_ref()
            .is_none_or(|index| index.len() != self.cache.len());
        if stale {
            let mut index = SearchIndex::new()?;
            index.build(self.cache.iter())?;
            self.search = Some(index);
        }
        let Some(index) = &self.search else {
            return Ok(Vec::new());
        };

        let mut hits: Vec<PackageHandle> = index
            .search(query)?
            .iter()
            .filter_map(|key| self.cache.handle_for(key))
            .collect();
        hits.sort_unstable();
        Ok(hits)
    }

    /// Detail text for one package; empty when the daemon has nothing
    pub fn details(&self, handle: PackageHandle, attr: Attribute) -> Result<Vec<String>> {
        let key = &lookup(&self.cache, handle)?.key;
        Ok(self
            .backend
            .attribute(key, attr)?
            .map(|value| attribute_lines(attr, &value))
            .unwrap_or_default())
    }

    // === Queue operations ===

    /// Queue the package for its own action, or unqueue it when it is queued.
    /// Packages first seen in the downgrade list are paired with the
    /// installed version.
    pub fn toggle(&mut self, handle: PackageHandle) -> Result<ToggleResult> {
        let action = lookup(&self.cache, handle)?.action;
        if action == Action::Downgrade && self.queue.queued(handle).is_none() {
            return self.toggle_downgrade(handle);
        }
        self.toggle_as(handle, action)
    }

    fn toggle_as(&mut self, handle: PackageHandle, action: Action) -> Result<ToggleResult> {
        if self.queue.queued(handle).is_none() {
            return self.stage(handle, action);
        }
        let pkg = lookup(&self.cache, handle)?;
        let also = self.queue.linked(handle);
        self.queue.remove(pkg, None);
        log::debug!("unqueued {}", pkg.id.fullname());
        Ok(ToggleResult::Unqueued { package: handle, also })
    }

    /// Queue for an explicit action; already queued packages are left alone
    pub fn queue_as(&mut self, handle: PackageHandle, action: Action) -> Result<ToggleResult> {
        if self.queue.queued(handle).is_some() {
            return Ok(ToggleResult::NoChange { package: handle });
        }
        match action {
            Action::Downgrade => self.toggle_downgrade(handle),
            Action::Reinstall => self.toggle_reinstall(handle),
            _ => self.stage(handle, action),
        }
    }

    /// Add without toggling
    fn stage(&mut self, handle: PackageHandle, action: Action) -> Result<ToggleResult> {
        let pkg = lookup(&self.cache, handle)?;
        if action == Action::Remove {
            check_protected(&self.protected, pkg)?;
        }
        if self.queue.add(pkg, Some(action)) {
            log::debug!("queued {} for {}", pkg.id.fullname(), action.label());
            Ok(ToggleResult::Queued { package: handle, action })
        } else {
            Ok(ToggleResult::NoChange { package: handle })
        }
    }

    /// Pair `target` with the installed package of the same name.arch
    pub fn toggle_downgrade(&mut self, target: PackageHandle) -> Result<ToggleResult> {
        if self.queue.queued(target).is_some() {
            return self.toggle_as(target, Action::Downgrade);
        }

        let pkg = lookup(&self.cache, target)?;
        if pkg.is_installed() {
            return Err(Error::NothingToDo(format!("{} is the installed version", pkg.id.fullname())));
        }
        let key = pkg.name_arch();
        let installed = match self.cache.installed(&key) {
            Some(handle) => handle,
            None => {
                let rows = self.backend.packages_by_name(&key.name, false)?;
                self.cache_rows(rows);
                self.cache
                    .installed(&key)
                    .ok_or_else(|| Error::NothingToDo(format!("{key} is not installed")))?
            }
        };

        let target_pkg = lookup(&self.cache, target)?;
        let installed_pkg = lookup(&self.cache, installed)?;
        if self.queue.add_downgrade(target_pkg, installed_pkg) {
            log::debug!(
                "queued downgrade {} -> {}",
                installed_pkg.id.fullname(),
                target_pkg.id.fullname()
            );
            Ok(ToggleResult::Queued {
                package: target,
                action: Action::Downgrade,
            })
        } else {
            Ok(ToggleResult::NoChange { package: target })
        }
    }

    /// Older versions the repos offer for an installed package. They are
    /// added to the downgrade list and go through [`toggle_downgrade`](Self::toggle_downgrade).
    pub fn downgrade_candidates(&mut self, installed: PackageHandle) -> Result<Vec<PackageHandle>> {
        let pkg = lookup(&self.cache, installed)?;
        if !pkg.is_installed() {
            return Err(Error::NothingToDo(format!("{} is not installed", pkg.id.fullname())));
        }
        let (key, name_arch, summary) = (pkg.key.clone(), pkg.name_arch(), pkg.summary.clone());

        let ids: Vec<PkgId> = match self.backend.attribute(&key, Attribute::Downgrades)? {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .map(str::parse::<PkgId>)
                .collect::<Result<_>>()?,
            _ => Vec::new(),
        };
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let known = self.backend.packages_by_name(&name_arch.name, false)?;
        let rows = ids
            .into_iter()
            .filter(|id| id.arch == name_arch.arch)
            .map(|id| {
                known
                    .iter()
                    .find(|row| row.id == id)
                    .cloned()
                    .unwrap_or_else(|| RawPackage {
                        id,
                        summary: summary.clone(),
                        size: 0,
                    })
            })
            .collect();
        Ok(self.cache.populate(Filter::Downgrade, rows))
    }

    /// True when the repos carry the exact installed build. The package is
    /// then listed under [`Filter::Reinstall`].
    pub fn reinstall_available(&mut self, handle: PackageHandle) -> Result<bool> {
        let pkg = lookup(&self.cache, handle)?;
        if !pkg.is_installed() {
            return Ok(false);
        }
        let row = RawPackage {
            id: pkg.id.clone(),
            summary: pkg.summary.clone(),
            size: pkg.size,
        };

        let available = self
            .backend
            .packages_by_name(&row.id.name, false)?
            .iter()
            .any(|other| !other.id.is_installed() && other.id.same_build(&row.id));
        if available {
            self.cache.populate(Filter::Reinstall, vec![row]);
        }
        Ok(available)
    }

    pub fn toggle_reinstall(&mut self, handle: PackageHandle) -> Result<ToggleResult> {
        if self.queue.queued(handle).is_some() {
            return self.toggle_as(handle, Action::Reinstall);
        }
        if !self.reinstall_available(handle)? {
            let name = lookup(&self.cache, handle)?.id.fullname();
            return Err(Error::NothingToDo(format!("{name} is not available for reinstall")));
        }
        self.stage(handle, Action::Reinstall)
    }

    /// Queue a local rpm file for `localinstall`
    pub fn queue_local(&mut self, path: &Path) -> Result<ToggleResult> {
        if !path.is_file() {
            return Err(Error::UnknownPackage(path.display().to_string()));
        }
        let handle = self.cache.insert_local(path);
        self.stage(handle, Action::LocalInstall)
    }

    /// Queue the newest available version of `name`: an update when an
    /// older build is installed, an install otherwise. Names ending in
    /// `.rpm` are local files.
    pub fn install_by_name(&mut self, name: &str) -> Result<ToggleResult> {
        if name.ends_with(".rpm") {
            return self.queue_local(Path::new(name));
        }

        let known = self.backend.packages_by_name(name, false)?;
        if known.is_empty() {
            return Err(Error::UnknownPackage(name.to_string()));
        }
        self.cache_rows(known);

        let newest = self.backend.packages_by_name(name, true)?;
        let Some(row) = newest.into_iter().find(|row| !row.id.is_installed()) else {
            return Err(Error::NothingToDo(format!("{name} is already installed")));
        };
        let key = row.id.name_arch();
        let handle = self.cache.find_package(row, Action::Install);

        let candidate = lookup(&self.cache, handle)?;
        let action = match self.cache.installed(&key).and_then(|h| self.cache.package(h)) {
            Some(installed) if installed.id.same_build(&candidate.id) => {
                return Err(Error::NothingToDo(format!("{} is already installed", installed.id.fullname())));
            }
            Some(_) => Action::Update,
            None => Action::Install,
        };
        self.stage(handle, action)
    }

    /// Every version of packages matching `name` (a `*` glob is allowed)
    pub fn find_by_name(&mut self, name: &str) -> Result<Vec<PackageHandle>> {
        let rows = self.backend.packages_by_name(name, false)?;
        if rows.is_empty() {
            return Err(Error::UnknownPackage(name.to_string()));
        }
        Ok(self.cache_rows(rows))
    }

    /// Installed packages matching `name`
    pub fn installed_by_name(&mut self, name: &str) -> Result<Vec<PackageHandle>> {
        let installed: Vec<PackageHandle> = self
            .find_by_name(name)?
            .into_iter()
            .filter(|h| self.cache.package(*h).is_some_and(Package::is_installed))
            .collect();
        if installed.is_empty() {
            return Err(Error::NothingToDo(format!("{name} is not installed")));
        }
        Ok(installed)
    }

    /// Queue every installed package matching `name` for removal
    pub fn remove_by_name(&mut self, name: &str) -> Result<Vec<ToggleResult>> {
        self.installed_by_name(name)?
            .into_iter()
            .map(|handle| self.stage(handle, Action::Remove))
            .collect()
    }

    /// Queue every available update. Returns how many were added.
    pub fn queue_all_updates(&mut self) -> Result<usize> {
        let mut added = 0;
        for handle in self.packages(Filter::Updates)? {
            if let ToggleResult::Queued { .. } = self.stage(handle, Action::Update)? {
                added += 1;
            }
        }
        log::info!("queued {added} updates");
        Ok(added)
    }

    // === Groups ===

    fn ensure_groups(&mut self) -> Result<()> {
        if self.groups.is_none() {
            let groups = self.backend.groups()?;
            log::debug!("{} group categories", groups.len());
            self.groups = Some(groups);
        }
        Ok(())
    }

    pub fn groups(&mut self) -> Result<&[GroupCategory]> {
        self.ensure_groups()?;
        Ok(self.groups.as_deref().unwrap_or_default())
    }

    /// Queue a group for `action`. Returns false when it already is.
    pub fn queue_group(&mut self, grp_id: &str, action: GroupAction) -> Result<bool> {
        self.ensure_groups()?;
        let grp = find_group(&mut self.groups, grp_id)?;
        if self.queue.has_group(grp_id) == Some(action) {
            return Ok(false);
        }
        self.queue.add_group(grp, action);
        Ok(true)
    }

    /// Queue the group for its default action, or unqueue it.
    /// Returns the action now queued.
    pub fn toggle_group(&mut self, grp_id: &str) -> Result<Option<GroupAction>> {
        self.ensure_groups()?;
        let grp = find_group(&mut self.groups, grp_id)?;
        if let Some(action) = self.queue.has_group(grp_id) {
            self.queue.remove_group(grp, action);
            return Ok(None);
        }
        let action = grp.default_action();
        self.queue.add_group(grp, action);
        Ok(Some(action))
    }

    pub fn group_packages(&self, grp_id: &str, all: bool) -> Result<Vec<PkgId>> {
        self.backend.group_packages(grp_id, all)
    }

    // === Transactions ===

    /// Replay the queue into a fresh daemon transaction and depsolve it
    pub fn resolve(&mut self) -> Result<Resolved> {
        if self.queue.is_empty() {
            return Err(Error::NothingToDo(String::from("no changes are queued")));
        }
        let preview = self.build_from_queue().map_err(|e| self.recover(e))?;
        self.checked(preview)
    }

    fn build_from_queue(&self) -> Result<TransactionPreview> {
        self.backend.clear_transaction()?;
        for (action, handle) in self.queue.packages() {
            let pkg = lookup(&self.cache, handle)?;
            self.backend.add_transaction(&pkg.key, action)?;
        }

        let installs: Vec<&str> = self
            .queue
            .groups(GroupAction::Install)
            .map(|g| g.id.as_str())
            .collect();
        if !installs.is_empty() {
            self.backend.group_install(&installs)?;
        }
        let removes: Vec<&str> = self
            .queue
            .groups(GroupAction::Remove)
            .map(|g| g.id.as_str())
            .collect();
        if !removes.is_empty() {
            self.backend.group_remove(&removes)?;
        }

        let preview = self.backend.build_transaction()?;
        log::info!(
            "resolved {} changes, {} to download",
            preview.len(),
            size_str(preview.download_size())
        );
        Ok(preview)
    }

    /// Undo a history transaction. The queue must be empty.
    pub fn resolve_undo(&mut self, tid: i32) -> Result<Resolved> {
        if !self.queue.is_empty() {
            return Err(Error::QueueNotEmpty);
        }
        let preview = self.backend.history_undo(tid).map_err(|e| self.recover(e))?;
        self.checked(preview)
    }

    fn checked(&self, preview: TransactionPreview) -> Result<Resolved> {
        if preview.is_empty() {
            self.discard();
            return Err(Error::NothingToDo(String::from("the transaction changes nothing")));
        }
        Ok(Resolved { preview })
    }

    /// Run a resolved transaction, importing GPG keys when the daemon asks.
    /// On success the session is reset; lists must be reloaded.
    pub fn run(&mut self, resolved: Resolved, confirm: &mut dyn Confirm) -> Result<TransactionPreview> {
        match self.run_rounds(confirm) {
            Ok(()) => {
                log::info!("transaction complete");
                self.reset();
                Ok(resolved.preview)
            }
            Err(e) => Err(self.recover(e)),
        }
    }

    fn run_rounds(&self, confirm: &mut dyn Confirm) -> Result<()> {
        for round in 1..=MAX_GPG_ROUNDS {
            match self.run_once()? {
                RunOutcome::Success => return Ok(()),
                RunOutcome::NeedGpgConfirmation => {
                    let requests = self.backend.take_gpg_requests();
                    // No run would follow an import on the last round
                    if round == MAX_GPG_ROUNDS {
                        log::warn!("{} GPG keys still requested, giving up", requests.len());
                        break;
                    }
                    if requests.is_empty() {
                        return Err(Error::Transaction(vec![String::from(
                            "GPG confirmation needed but no key was announced",
                        )]));
                    }
                    for request in &requests {
                        let accepted = confirm.confirm_gpg_key(request)?;
                        self.backend.confirm_gpg_import(&request.hexkeyid, accepted)?;
                        if !accepted {
                            return Err(Error::GpgDeclined(request.hexkeyid.clone()));
                        }
                    }
                    log::info!("GPG keys imported, rebuilding (attempt {round})");
                    self.backend.build_transaction()?;
                }
                RunOutcome::DownloadError(messages) => return Err(Error::Download(messages)),
                RunOutcome::Failed(code, messages) => {
                    log::error!("RunTransaction returned {code}");
                    return Err(Error::Transaction(messages));
                }
            }
        }
        Err(Error::Transaction(vec![format!(
            "GPG keys still missing after {MAX_GPG_ROUNDS} attempts"
        )]))
    }

    /// The watchdog would kill the daemon during a long run
    fn run_once(&self) -> Result<RunOutcome> {
        if let Err(e) = self.backend.set_watchdog(false) {
            log::debug!("SetWatchdogState(false) failed: {e}");
        }
        let outcome = self.backend.run_transaction();
        if let Err(e) = self.backend.set_watchdog(true) {
            log::debug!("SetWatchdogState(true) failed: {e}");
        }
        outcome
    }

    /// Resolve, confirm, run
    pub fn apply(&mut self, confirm: &mut dyn Confirm) -> Result<ApplyOutcome> {
        let resolved = self.resolve()?;
        self.confirm_and_run(resolved, confirm)
    }

    pub fn history_undo(&mut self, tid: i32, confirm: &mut dyn Confirm) -> Result<ApplyOutcome> {
        let resolved = self.resolve_undo(tid)?;
        self.confirm_and_run(resolved, confirm)
    }

    fn confirm_and_run(&mut self, resolved: Resolved, confirm: &mut dyn Confirm) -> Result<ApplyOutcome> {
        let accepted = confirm
            .confirm_transaction(resolved.preview())
            .map_err(|e| self.recover(e))?;
        if !accepted {
            log::info!("transaction declined");
            self.discard();
            return Ok(ApplyOutcome::Declined);
        }
        self.run(resolved, confirm).map(ApplyOutcome::Applied)
    }

    /// Drop the daemon-side transaction, keeping the queue
    pub fn discard(&self) {
        if let Err(e) = self.backend.clear_transaction() {
            log::warn!("could not clear the daemon transaction: {e}");
        }
    }

    fn recover(&self, err: Error) -> Error {
        if err.severity() == Severity::Recoverable {
            self.discard();
        }
        err
    }

    // === History and repositories ===

    pub fn history(&self, days: i32) -> Result<Vec<HistoryTransaction>> {
        self.backend.history(days)
    }

    pub fn history_packages(&self, tid: i32) -> Result<Vec<HistoryPackage>> {
        self.backend.history_packages(tid)
    }

    pub fn repositories(&self) -> Result<Vec<RepoInfo>> {
        self.backend.repositories()
    }

    /// Switch the enabled repositories. Package lists change, so the
    /// session is reset.
    pub fn set_enabled_repos(&mut self, repo_ids: &[String]) -> Result<()> {
        self.backend.set_enabled_repos(repo_ids)?;
        if !self.queue.is_empty() {
            log::warn!("repositories changed, dropping {} queued changes", self.queue.total());
        }
        self.reset();
        Ok(())
    }

    /// Expire the daemon's metadata cache. Returns true when it did.
    pub fn refresh_metadata(&mut self) -> Result<bool> {
        let expired = self.backend.expire_cache()?;
        if expired {
            log::info!("metadata cache expired");
            self.reset();
        }
        Ok(expired)
    }
}

fn lookup(cache: &PackageCache, handle: PackageHandle) -> Result<&Package> {
    cache
        .package(handle)
        .ok_or_else(|| Error::UnknownPackage(format!("handle {}", handle.0)))
}

fn check_protected(protected: &BTreeSet<String>, pkg: &Package) -> Result<()> {
    if protected.contains(&pkg.id.name) {
        Err(Error::Protected(pkg.id.name.clone()))
    } else {
        Ok(())
    }
}

fn find_group<'a>(groups: &'a mut Option<Vec<GroupCategory>>, grp_id: &str) -> Result<&'a mut Group> {
    groups
        .iter_mut()
        .flatten()
        .flat_map(|c| c.groups.iter_mut())
        .find(|g| g.id == grp_id)
        .ok_or_else(|| Error::UnknownGroup(grp_id.to_string()))
}

// ============================================================================
// Standalone utility functions
// ============================================================================

/// Check if running as root
pub fn is_root() -> bool {
    unsafe { libc::geteuid() == 0 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockDaemon;

    fn session() -> (MockDaemon, Session<MockDaemon>) {
        let mock = MockDaemon::new()
            .with_package("installed", "dnf,0,4.19,1.fc40,noarch,@System", "Package manager", 100)
            .with_package("installed", "nano,0,7.2,1.fc40,x86_64,@System", "Editor", 100)
            .with_package("available", "vim,2,9.1,1.fc40,x86_64,fedora", "Editor", 3000);
        let mut session = Session::new(mock.clone());
        session.start(&SessionOptions::default()).unwrap();
        (mock, session)
    }

    #[test]
    fn protected_packages_are_not_removable() {
        let (_mock, mut session) = session();
        let installed = session.packages(Filter::Installed).unwrap();
        let dnf = installed[0];

        assert!(matches!(session.toggle(dnf), Err(Error::Protected(name)) if name == "dnf"));
        assert!(session.queue().is_empty());
        assert!(matches!(session.toggle(installed[1]), Ok(ToggleResult::Queued { .. })));
    }

    #[test]
    fn configured_names_extend_the_protected_set() {
        let mock = MockDaemon::new();
        let mut session = Session::new(mock);
        let options = SessionOptions {
            protected: vec![String::from("nano")],
            ..SessionOptions::default()
        };
        session.start(&options).unwrap();
        assert!(session.is_protected("nano"));
        assert!(session.is_protected("dnfdaemon"));
    }

    #[test]
    fn toggle_twice_unqueues() {
        let (_mock, mut session) = session();
        let vim = session.packages(Filter::Available).unwrap()[0];

        assert_eq!(
            session.toggle(vim).unwrap(),
            ToggleResult::Queued {
                package: vim,
                action: Action::Install
            }
        );
        assert_eq!(
            session.toggle(vim).unwrap(),
            ToggleResult::Unqueued { package: vim, also: None }
        );
        assert!(session.queue().is_empty());
    }

    #[test]
    fn lists_are_queried_once() {
        let (mock, mut session) = session();
        session.packages(Filter::Installed).unwrap();
        session.packages(Filter::Installed).unwrap();
        assert_eq!(mock.called("GetPackages"), 1);
    }

    #[test]
    fn options_from_config() {
        let now = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let config = Config {
            repo_saved: true,
            repo_enabled: vec![String::from("fedora")],
            clean_unused: true,
            last_refresh: now.timestamp(),
            ..Config::default()
        };
        let options = SessionOptions::from_config(&config, now);
        assert_eq!(options.enabled_repos, Some(vec![String::from("fedora")]));
        assert!(options.clean_unused);
        assert!(!options.refresh_metadata);

        let options = SessionOptions::from_config(&Config::default(), now);
        assert_eq!(options.enabled_repos, None);
        assert!(options.refresh_metadata);
    }

    #[test]
    fn loaded_packages_filter_by_prefix() {
        let (_mock, mut session) = session();
        session.packages(Filter::Installed).unwrap();
        session.packages(Filter::Available).unwrap();

        let hits = session.filter_loaded("edit").unwrap();
        assert_eq!(hits.len(), 2);
        let hits = session.filter_loaded("vi").unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(session.package(hits[0]).unwrap().id.name, "vim");
    }
}
