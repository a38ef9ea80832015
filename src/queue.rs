//! Package queue - the staged changes the user will confirm
//!
//! The queue owns all queued state. Packages are referenced by the handles
//! the cache hands out; which action a package is queued for, and whether
//! it is half of a downgrade pair, is answered here and nowhere else.
//!
//! Invariants kept by every mutating method:
//! - a handle appears in at most one action list
//! - at most one handle per name.arch is queued, and `name_arch` maps
//!   exactly the handles present in the lists
//! - a downgrade pair is two entries linked to each other; only the target
//!   (lower version) is in the `Downgrade` list and the name.arch index
//! - a group id is in at most one of the two group maps

use std::collections::{BTreeMap, HashMap};

use crate::types::*;

/// Queued state of one package
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueEntry {
    pub action: Action,
    /// Counterpart of a downgrade pair
    pub linked: Option<PackageHandle>,
}

#[derive(Debug, Default)]
pub struct PackageQueue {
    lists: BTreeMap<Action, Vec<PackageHandle>>,
    entries: HashMap<PackageHandle, QueueEntry>,
    name_arch: HashMap<NameArch, PackageHandle>,
    groups: BTreeMap<GroupAction, BTreeMap<String, Group>>,
}

impl PackageQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `pkg` for `action` (defaults to the package's own action).
    /// Returns false when it is already queued there or its name.arch slot is taken.
    pub fn add(&mut self, pkg: &Package, action: Option<Action>) -> bool {
        let action = action.unwrap_or(pkg.action);
        if self.get(action).contains(&pkg.handle) || self.has_pkg_with_name_arch(pkg) {
            return false;
        }

        self.lists.entry(action).or_default().push(pkg.handle);
        self.name_arch.insert(pkg.name_arch(), pkg.handle);
        self.entries.insert(pkg.handle, QueueEntry { action, linked: None });
        true
    }

    /// Unqueue `pkg` from `action` (defaults to the action it is queued for).
    /// Removing either half of a downgrade pair removes both. Returns false
    /// when there was nothing to remove.
    pub fn remove(&mut self, pkg: &Package, action: Option<Action>) -> bool {
        let Some(entry) = self.entries.get(&pkg.handle).copied() else {
            return false;
        };
        let action = action.unwrap_or(entry.action);
        if action != entry.action {
            return false;
        }

        // For a pair, the listed half is the target; find it from either side
        let listed = if self.get(action).contains(&pkg.handle) {
            Some(pkg.handle)
        } else {
            entry.linked
        };

        if let Some(listed) = listed
            && let Some(list) = self.lists.get_mut(&action)
        {
            list.retain(|h| *h != listed);
            if list.is_empty() {
                self.lists.remove(&action);
            }
        }

        let key = pkg.name_arch();
        if self.name_arch.get(&key).is_some_and(|h| Some(*h) == listed) {
            self.name_arch.remove(&key);
        }

        self.entries.remove(&pkg.handle);
        if let Some(other) = entry.linked {
            self.entries.remove(&other);
        }
        true
    }

    /// Queue a downgrade pair. `target` is the lower version to install,
    /// `installed` the version it replaces. Rejected when the two differ in
    /// name.arch, the installed package is already queued or the slot is taken.
    pub fn add_downgrade(&mut self, target: &Package, installed: &Package) -> bool {
        if target.name_arch() != installed.name_arch()
            || self.entries.contains_key(&installed.handle)
            || self.entries.contains_key(&target.handle)
            || self.has_pkg_with_name_arch(target)
        {
            return false;
        }

        self.lists.entry(Action::Downgrade).or_default().push(target.handle);
        self.name_arch.insert(target.name_arch(), target.handle);
        self.entries.insert(
            target.handle,
            QueueEntry {
                action: Action::Downgrade,
                linked: Some(installed.handle),
            },
        );
        self.entries.insert(
            installed.handle,
            QueueEntry {
                action: Action::Downgrade,
                linked: Some(target.handle),
            },
        );
        true
    }

    pub fn has_pkg_with_name_arch(&self, pkg: &Package) -> bool {
        self.name_arch.contains_key(&pkg.name_arch())
    }

    /// Handle occupying a name.arch slot, if any
    pub fn slot(&self, key: &NameArch) -> Option<PackageHandle> {
        self.name_arch.get(key).copied()
    }

    /// Action the package is queued for
    pub fn queued(&self, handle: PackageHandle) -> Option<Action> {
        self.entries.get(&handle).map(|e| e.action)
    }

    pub fn linked(&self, handle: PackageHandle) -> Option<PackageHandle> {
        self.entries.get(&handle).and_then(|e| e.linked)
    }

    pub fn is_selected(&self, handle: PackageHandle) -> bool {
        self.entries.contains_key(&handle)
    }

    /// Handles queued under `action`, in the order they were added
    pub fn get(&self, action: Action) -> &[PackageHandle] {
        self.lists.get(&action).map(Vec::as_slice).unwrap_or_default()
    }

    /// All listed packages in action order
    pub fn packages(&self) -> impl Iterator<Item = (Action, PackageHandle)> + '_ {
        self.lists
            .iter()
            .flat_map(|(action, handles)| handles.iter().map(move |h| (*action, *h)))
    }

    // === Groups ===

    pub fn add_group(&mut self, grp: &mut Group, action: GroupAction) {
        for (other, map) in &mut self.groups {
            if *other != action {
                map.remove(&grp.id);
            }
        }
        grp.selected = true;
        self.groups
            .entry(action)
            .or_default()
            .entry(grp.id.clone())
            .or_insert_with(|| grp.clone())
            .selected = true;
    }

    /// Unqueue a group from `action`; a group queued for the other action stays selected
    pub fn remove_group(&mut self, grp: &mut Group, action: GroupAction) {
        let removed = self
            .groups
            .get_mut(&action)
            .and_then(|map| map.remove(&grp.id))
            .is_some();
        if removed {
            grp.selected = false;
        }
    }

    /// Remove every queued group whose display name is in `names`.
    /// Returns the removed groups, deselected.
    pub fn remove_groups<S: AsRef<str>>(&mut self, names: &[S]) -> Vec<Group> {
        let mut removed = Vec::new();
        for map in self.groups.values_mut() {
            let ids: Vec<String> = map
                .values()
                .filter(|g| names.iter().any(|n| n.as_ref() == g.name))
                .map(|g| g.id.clone())
                .collect();
            for id in ids {
                if let Some(mut grp) = map.remove(&id) {
                    grp.selected = false;
                    removed.push(grp);
                }
            }
        }
        removed
    }

    pub fn has_group(&self, grp_id: &str) -> Option<GroupAction> {
        self.groups
            .iter()
            .find(|(_, map)| map.contains_key(grp_id))
            .map(|(action, _)| *action)
    }

    /// `(group id, action)` for every queued group
    pub fn get_groups(&self) -> impl Iterator<Item = (&str, GroupAction)> + '_ {
        self.groups
            .iter()
            .flat_map(|(action, map)| map.keys().map(move |id| (id.as_str(), *action)))
    }

    /// Queued groups for one action
    pub fn groups(&self, action: GroupAction) -> impl Iterator<Item = &Group> + '_ {
        self.groups.get(&action).into_iter().flat_map(BTreeMap::values)
    }

    // === Totals ===

    pub fn total(&self) -> usize {
        let packages: usize = self.lists.values().map(Vec::len).sum();
        let groups: usize = self.groups.values().map(BTreeMap::len).sum();
        packages + groups
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    pub fn clear(&mut self) {
        self.lists.clear();
        self.entries.clear();
        self.name_arch.clear();
        self.groups.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pkg(handle: u32, id: &str, action: Action) -> Package {
        let id: PkgId = id.parse().unwrap();
        Package {
            handle: PackageHandle(handle),
            key: id.to_string(),
            id,
            summary: String::new(),
            size: 0,
            action,
        }
    }

    #[test]
    fn add_is_idempotent() {
        let mut queue = PackageQueue::new();
        let a = pkg(0, "foo,0,1.0,1,x86_64,fedora", Action::Install);

        assert!(queue.add(&a, Some(Action::Install)));
        assert_eq!(queue.total(), 1);
        assert!(!queue.add(&a, Some(Action::Install)));
        assert_eq!(queue.total(), 1);
        assert!(queue.remove(&a, Some(Action::Install)));
        assert_eq!(queue.total(), 0);
        assert!(!queue.has_pkg_with_name_arch(&a));
    }

    #[test]
    fn same_name_arch_cannot_be_queued_twice() {
        let mut queue = PackageQueue::new();
        let v1 = pkg(0, "foo,0,1.0,1,x86_64,updates", Action::Update);
        let v2 = pkg(1, "foo,0,0.9,1,x86_64,fedora", Action::Reinstall);

        assert!(queue.add(&v1, Some(Action::Update)));
        assert!(!queue.add(&v2, Some(Action::Reinstall)));
        assert_eq!(queue.total(), 1);
        assert_eq!(queue.queued(v2.handle), None);
    }

    #[test]
    fn different_arch_is_a_different_slot() {
        let mut queue = PackageQueue::new();
        let x86 = pkg(0, "glibc,0,2.39,1,x86_64,fedora", Action::Install);
        let i686 = pkg(1, "glibc,0,2.39,1,i686,fedora", Action::Install);

        assert!(queue.add(&x86, None));
        assert!(queue.add(&i686, None));
        assert_eq!(queue.get(Action::Install), &[x86.handle, i686.handle]);
    }

    #[test]
    fn action_defaults_to_package_action() {
        let mut queue = PackageQueue::new();
        let a = pkg(0, "foo,0,1.0,1,x86_64,@System", Action::Remove);
        assert!(queue.add(&a, None));
        assert_eq!(queue.queued(a.handle), Some(Action::Remove));
        assert!(queue.remove(&a, None));
        assert!(queue.is_empty());
    }

    #[test]
    fn removing_unqueued_package_is_a_no_op() {
        let mut queue = PackageQueue::new();
        let a = pkg(0, "foo,0,1.0,1,x86_64,fedora", Action::Install);
        let b = pkg(1, "bar,0,1.0,1,x86_64,fedora", Action::Install);
        queue.add(&b, None);

        assert!(!queue.remove(&a, None));
        assert!(!queue.remove(&b, Some(Action::Remove)));
        assert_eq!(queue.total(), 1);
    }

    #[test]
    fn downgrade_pair_is_linked_both_ways() {
        let mut queue = PackageQueue::new();
        let installed = pkg(0, "foo,0,2.0,1,x86_64,@System", Action::Remove);
        let older = pkg(1, "foo,0,1.0,1,x86_64,fedora", Action::Install);

        assert!(queue.add_downgrade(&older, &installed));
        assert_eq!(queue.queued(older.handle), Some(Action::Downgrade));
        assert_eq!(queue.queued(installed.handle), Some(Action::Downgrade));
        assert_eq!(queue.linked(older.handle), Some(installed.handle));
        assert_eq!(queue.linked(installed.handle), Some(older.handle));
        assert_eq!(queue.get(Action::Downgrade), &[older.handle]);
        assert_eq!(queue.total(), 1);

        // Unqueue from the installed side clears both
        assert!(queue.remove(&installed, None));
        assert_eq!(queue.queued(older.handle), None);
        assert_eq!(queue.queued(installed.handle), None);
        assert!(!queue.has_pkg_with_name_arch(&older));
        assert_eq!(queue.total(), 0);

        // Installed package can be queued for its own action again
        assert!(queue.add(&installed, None));
        assert_eq!(queue.queued(installed.handle), Some(Action::Remove));
    }

    #[test]
    fn downgrade_rejected_when_counterpart_busy() {
        let mut queue = PackageQueue::new();
        let installed = pkg(0, "foo,0,2.0,1,x86_64,@System", Action::Remove);
        let older = pkg(1, "foo,0,1.0,1,x86_64,fedora", Action::Install);

        queue.add(&installed, None);
        assert!(!queue.add_downgrade(&older, &installed));
        assert_eq!(queue.queued(older.handle), None);
        assert_eq!(queue.total(), 1);
    }

    #[test]
    fn downgrade_needs_matching_name_arch() {
        let mut queue = PackageQueue::new();
        let installed = pkg(0, "foo,0,2.0,1,x86_64,@System", Action::Remove);
        let other = pkg(1, "bar,0,1.0,1,noarch,fedora", Action::Install);

        assert!(!queue.add_downgrade(&other, &installed));
        assert!(queue.is_empty());
        assert!(!queue.has_pkg_with_name_arch(&other));
        assert!(!queue.is_selected(installed.handle));
    }

    #[test]
    fn removing_from_the_other_map_keeps_selection() {
        let mut queue = PackageQueue::new();
        let mut grp = Group::new("kde-desktop", "KDE", "", false);

        queue.add_group(&mut grp, GroupAction::Install);
        queue.remove_group(&mut grp, GroupAction::Remove);
        assert_eq!(queue.has_group("kde-desktop"), Some(GroupAction::Install));
        assert!(grp.selected);
    }

    #[test]
    fn groups_toggle_selected() {
        let mut queue = PackageQueue::new();
        let mut grp = Group::new("kde-desktop", "KDE", "", false);

        queue.add_group(&mut grp, GroupAction::Install);
        assert!(grp.selected);
        assert_eq!(queue.has_group("kde-desktop"), Some(GroupAction::Install));
        queue.add_group(&mut grp, GroupAction::Install);
        assert_eq!(queue.total(), 1);

        queue.remove_group(&mut grp, GroupAction::Install);
        assert_eq!(queue.has_group("kde-desktop"), None);
        assert!(!grp.selected);
    }

    #[test]
    fn group_lives_in_one_map_only() {
        let mut queue = PackageQueue::new();
        let mut grp = Group::new("games", "Games", "", true);

        queue.add_group(&mut grp, GroupAction::Install);
        queue.add_group(&mut grp, GroupAction::Remove);
        assert_eq!(queue.has_group("games"), Some(GroupAction::Remove));
        assert_eq!(queue.get_groups().count(), 1);
    }

    #[test]
    fn remove_groups_by_display_name() {
        let mut queue = PackageQueue::new();
        let mut a = Group::new("a", "Alpha", "", false);
        let mut b = Group::new("b", "Beta", "", true);
        let mut c = Group::new("c", "Gamma", "", false);
        queue.add_group(&mut a, GroupAction::Install);
        queue.add_group(&mut b, GroupAction::Remove);
        queue.add_group(&mut c, GroupAction::Install);

        let removed = queue.remove_groups(&["Alpha", "Beta"]);
        assert_eq!(removed.len(), 2);
        assert!(removed.iter().all(|g| !g.selected));
        let left: Vec<_> = queue.get_groups().collect();
        assert_eq!(left, vec![("c", GroupAction::Install)]);
    }

    #[test]
    fn clear_empties_everything() {
        let mut queue = PackageQueue::new();
        let a = pkg(0, "foo,0,1.0,1,x86_64,fedora", Action::Install);
        let mut grp = Group::new("x", "X", "", false);
        queue.add(&a, None);
        queue.add_group(&mut grp, GroupAction::Install);
        assert_eq!(queue.total(), 2);

        queue.clear();
        assert_eq!(queue.total(), 0);
        assert_eq!(queue.get_groups().count(), 0);
        assert!(!queue.has_pkg_with_name_arch(&a));
        // Restartable: a second pass sees the same (empty) content
        assert_eq!(queue.get_groups().count(), 0);
    }

    #[test]
    fn packages_iterates_in_action_order() {
        let mut queue = PackageQueue::new();
        let r = pkg(0, "old,0,1,1,noarch,@System", Action::Remove);
        let i = pkg(1, "new,0,1,1,noarch,fedora", Action::Install);
        queue.add(&r, None);
        queue.add(&i, None);

        let order: Vec<_> = queue.packages().collect();
        assert_eq!(order, vec![(Action::Install, i.handle), (Action::Remove, r.handle)]);
    }
}
