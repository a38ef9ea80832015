//! Package cache - one package object per identity per session
//!
//! Every package the daemon returns goes through [`PackageCache::find_packages`],
//! which hands back the existing handle when the pkg_id was seen before. Two
//! queries that mention the same package therefore share one entry, and the
//! queue's view of it is the same from both lists.
//!
//! Handles are only valid until [`PackageCache::reset`]; the session clears the
//! queue at the same time.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use crate::backend::RawPackage;
use crate::types::*;

#[derive(Debug, Default)]
pub struct PackageCache {
    packages: Vec<Package>,
    /// Wire key (pkg_id string or local path) to handle
    index: HashMap<String, PackageHandle>,
    by_filter: HashMap<Filter, Vec<PackageHandle>>,
    populated: HashSet<Filter>,
}

impl PackageCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_populated(&self, filter: Filter) -> bool {
        self.populated.contains(&filter)
    }

    /// Merge rows into the list for `filter` and mark it populated.
    /// Returns the handles for `rows`, in order.
    pub fn populate(&mut self, filter: Filter, rows: Vec<RawPackage>) -> Vec<PackageHandle> {
        let handles = self.find_packages(rows, filter.default_action());
        let list = self.by_filter.entry(filter).or_default();
        for handle in &handles {
            if !list.contains(handle) {
                list.push(*handle);
            }
        }
        self.populated.insert(filter);
        handles
    }

    /// Return the cached handle for each row, creating entries for identities
    /// not seen before. `action` only applies to newly created packages.
    pub fn find_packages(&mut self, rows: Vec<RawPackage>, action: Action) -> Vec<PackageHandle> {
        rows.into_iter()
            .map(|row| self.find_package(row, action))
            .collect()
    }

    /// Single-row form of [`find_packages`](Self::find_packages)
    pub fn find_package(&mut self, row: RawPackage, action: Action) -> PackageHandle {
        let key = row.id.to_string();
        if let Some(&handle) = self.index.get(&key) {
            return handle;
        }
        self.insert(key, row.id, row.summary, row.size, action)
    }

    /// Register a local rpm file for `localinstall`
    pub fn insert_local(&mut self, path: &Path) -> PackageHandle {
        let key = path.display().to_string();
        if let Some(&handle) = self.index.get(&key) {
            return handle;
        }

        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| key.clone());
        // name-version-release.arch.rpm; keep the whole stem as name when it does not split
        let (rest, arch) = stem.rsplit_once('.').unwrap_or((stem.as_str(), "noarch"));
        let id = PkgId {
            name: rest.to_string(),
            epoch: String::from("0"),
            version: String::new(),
            release: String::new(),
            arch: arch.to_string(),
            repo: String::from("@commandline"),
        };
        let size = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        let handle = self.insert(key, id, String::new(), size, Action::LocalInstall);
        let list = self.by_filter.entry(Filter::LocalInstall).or_default();
        if !list.contains(&handle) {
            list.push(handle);
        }
        self.populated.insert(Filter::LocalInstall);
        handle
    }

    fn insert(&mut self, key: String, id: PkgId, summary: String, size: u64, action: Action) -> PackageHandle {
        let handle = PackageHandle(self.packages.len() as u32);
        self.packages.push(Package {
            handle,
            id,
            key: key.clone(),
            summary,
            size,
            action,
        });
        self.index.insert(key, handle);
        handle
    }

    /// Handles cached for `filter` (empty when not populated)
    pub fn get(&self, filter: Filter) -> &[PackageHandle] {
        self.by_filter.get(&filter).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn package(&self, handle: PackageHandle) -> Option<&Package> {
        self.packages.get(handle.index())
    }

    pub fn handle_for(&self, key: &str) -> Option<PackageHandle> {
        self.index.get(key).copied()
    }

    /// Every package known this session
    pub fn iter(&self) -> impl Iterator<Item = &Package> + '_ {
        self.packages.iter()
    }

    /// Installed package with this name.arch, if one is cached
    pub fn installed(&self, key: &NameArch) -> Option<PackageHandle> {
        self.packages
            .iter()
            .find(|p| p.is_installed() && p.id.name == key.name && p.id.arch == key.arch)
            .map(|p| p.handle)
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    /// Forget everything: lists, populated markers and the identity index
    pub fn reset(&mut self) {
        self.packages.clear();
        self.index.clear();
        self.by_filter.clear();
        self.populated.clear();
    }
}
