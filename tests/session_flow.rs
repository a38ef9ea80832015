//! Session flows against the in-process daemon fake
//!
//! These tests drive `Session` the way the binaries do: start, stage
//! changes, resolve, confirm and run. The mock records every daemon call.

use std::fs;

use dnfstage::backend::{Attribute, GpgKeyRequest, TransactionPreview};
use dnfstage::core::{AlwaysYes, ApplyOutcome, Confirm, Session, SessionOptions};
use dnfstage::error::{DaemonError, DaemonErrorKind, Error, Result, Severity};
use dnfstage::mock::MockDaemon;
use dnfstage::types::*;

// =============================================================================
// Helpers
// =============================================================================

fn started(mock: &MockDaemon) -> Session<MockDaemon> {
    let mut session = Session::new(mock.clone());
    session.start(&SessionOptions::default()).unwrap();
    session
}

/// Accepts the transaction, answers key prompts with `accept_keys`
struct Answer {
    transaction: bool,
    accept_keys: bool,
    prompts: usize,
}

impl Answer {
    fn new(transaction: bool, accept_keys: bool) -> Self {
        Self {
            transaction,
            accept_keys,
            prompts: 0,
        }
    }
}

impl Confirm for Answer {
    fn confirm_transaction(&mut self, _preview: &TransactionPreview) -> Result<bool> {
        self.prompts += 1;
        Ok(self.transaction)
    }

    fn confirm_gpg_key(&mut self, _request: &GpgKeyRequest) -> Result<bool> {
        Ok(self.accept_keys)
    }
}

fn key_request(hexkeyid: &str) -> GpgKeyRequest {
    GpgKeyRequest {
        pkg_id: String::from("vim,2,9.1,1.fc40,x86_64,thirdparty"),
        userid: String::from("Third Party <keys@example.org>"),
        hexkeyid: hexkeyid.to_string(),
        keyurl: String::from("https://example.org/key.asc"),
        timestamp: String::from("1700000000"),
    }
}

fn editor_universe() -> MockDaemon {
    MockDaemon::new()
        .with_package("installed", "dnf,0,4.19,1.fc40,noarch,@System", "Package manager", 500)
        .with_package("installed", "nano,0,7.2,1.fc40,x86_64,@System", "Small Editor", 800)
        .with_package("available", "vim,2,9.1,1.fc40,x86_64,fedora", "Editor with modes", 3000)
}

fn queue_vim(session: &mut Session<MockDaemon>) -> PackageHandle {
    let vim = session.packages(Filter::Available).unwrap()[0];
    session.toggle(vim).unwrap();
    vim
}

// =============================================================================
// Session lifecycle
// =============================================================================

#[test]
fn start_applies_options() {
    let mock = MockDaemon::new();
    let mut session = Session::new(mock.clone());
    let options = SessionOptions {
        enabled_repos: Some(vec![String::from("fedora")]),
        clean_unused: true,
        refresh_metadata: true,
        ..SessionOptions::default()
    };

    assert!(session.start(&options).unwrap());
    assert!(mock.is_locked());
    assert_eq!(mock.enabled_repos(), Some(vec![String::from("fedora")]));
    assert_eq!(
        mock.config(),
        vec![(String::from("clean_requirements_on_remove"), String::from("true"))]
    );
    assert_eq!(mock.called("ExpireCache"), 1);
}

#[test]
fn refused_lock_is_fatal() {
    let mock = MockDaemon::new();
    mock.refuse_lock();
    let mut session = Session::new(mock.clone());

    let err = session.start(&SessionOptions::default()).unwrap_err();
    assert_eq!(err.severity(), Severity::Fatal);
    assert!(matches!(err, Error::Daemon(e) if e.kind == DaemonErrorKind::Locked));
    assert!(!session.is_locked());
}

#[test]
fn any_lock_failure_is_fatal() {
    let mock = MockDaemon::new();
    mock.fail_next("Lock", DaemonError::classify("org.baseurl.DnfSystem.Failed", "boom"));
    let mut session = Session::new(mock);

    let err = session.start(&SessionOptions::default()).unwrap_err();
    assert_eq!(err.severity(), Severity::Fatal);
}

#[test]
fn shutdown_releases_the_lock() {
    let mock = MockDaemon::new();
    let mut session = started(&mock);
    session.shutdown();
    session.shutdown();

    assert!(!mock.is_locked());
    assert_eq!(mock.called("Unlock"), 1);
}

// =============================================================================
// Staging
// =============================================================================

#[test]
fn install_by_name_queues_an_update_when_installed() {
    let mock = MockDaemon::new()
        .with_package("installed", "bash,0,5.2,1.fc40,x86_64,@System", "Shell", 100)
        .with_package("updates", "bash,0,5.2,2.fc40,x86_64,updates", "Shell", 100);
    let mut session = started(&mock);

    let result = session.install_by_name("bash").unwrap();
    let ToggleResult::Queued { package, action } = result else {
        panic!("unexpected {result:?}");
    };
    assert_eq!(action, Action::Update);
    assert_eq!(session.package(package).unwrap().id.release, "2.fc40");
}

#[test]
fn install_by_name_rejects_unknown_and_installed() {
    let mock = editor_universe();
    let mut session = started(&mock);

    assert!(matches!(session.install_by_name("emacs"), Err(Error::UnknownPackage(_))));
    assert!(matches!(session.install_by_name("nano"), Err(Error::NothingToDo(_))));
    assert!(session.queue().is_empty());
}

#[test]
fn one_version_per_name_arch() {
    let mock = MockDaemon::new()
        .with_package("available", "foo,0,1.0,1,noarch,fedora", "", 10)
        .with_package("available", "foo,0,2.0,1,noarch,updates", "", 10);
    let mut session = started(&mock);
    let list = session.packages(Filter::Available).unwrap();

    assert!(matches!(session.toggle(list[0]).unwrap(), ToggleResult::Queued { .. }));
    assert_eq!(session.toggle(list[1]).unwrap(), ToggleResult::NoChange { package: list[1] });

    session.toggle(list[0]).unwrap();
    assert!(matches!(session.toggle(list[1]).unwrap(), ToggleResult::Queued { .. }));
    assert_eq!(session.queue().total(), 1);
}

#[test]
fn protected_packages_cannot_be_removed() {
    let mock = editor_universe();
    let mut session = started(&mock);

    assert!(matches!(session.remove_by_name("dnf"), Err(Error::Protected(_))));
    let results = session.remove_by_name("nano").unwrap();
    assert!(matches!(
        results[0],
        ToggleResult::Queued {
            action: Action::Remove,
            ..
        }
    ));
}

#[test]
fn queue_all_updates_is_idempotent() {
    let mock = MockDaemon::new()
        .with_package("updates", "foo,0,2,1,noarch,updates", "", 10)
        .with_package("updates", "bar,0,2,1,noarch,updates", "", 10);
    let mut session = started(&mock);

    assert_eq!(session.queue_all_updates().unwrap(), 2);
    assert_eq!(session.queue_all_updates().unwrap(), 0);
    assert_eq!(session.queue().get(Action::Update).len(), 2);
}

#[test]
fn downgrade_pairs_with_the_installed_version() {
    let installed_id = "foo,0,2.0,1,noarch,@System";
    let mock = MockDaemon::new()
        .with_package("installed", installed_id, "Foo", 10)
        .with_package("available", "foo,0,1.0,1,noarch,fedora", "Foo", 10);
    mock.set_attribute(installed_id, "downgrades", r#"["foo,0,1.0,1,noarch,fedora"]"#);
    let mut session = started(&mock);

    let installed = session.packages(Filter::Installed).unwrap()[0];
    let candidates = session.downgrade_candidates(installed).unwrap();
    assert_eq!(candidates.len(), 1);
    let target = candidates[0];
    assert_eq!(session.cache().get(Filter::Downgrade), &[target]);

    assert_eq!(
        session.toggle(target).unwrap(),
        ToggleResult::Queued {
            package: target,
            action: Action::Downgrade
        }
    );
    assert_eq!(session.queue().linked(target), Some(installed));
    assert_eq!(session.queue().queued(installed), Some(Action::Downgrade));

    // Unqueueing either half drops the pair
    assert_eq!(
        session.toggle(installed).unwrap(),
        ToggleResult::Unqueued {
            package: installed,
            also: Some(target)
        }
    );
    assert!(session.queue().is_empty());

    session.toggle(target).unwrap();
    let resolved = session.resolve().unwrap();
    assert_eq!(resolved.preview().groups[0].action, "downgrade");
    assert!(
        mock.calls()
            .contains(&String::from("AddTransaction foo,0,1.0,1,noarch,fedora downgrade"))
    );
}

#[test]
fn reinstall_needs_the_same_build_in_a_repo() {
    let mock = MockDaemon::new()
        .with_package("installed", "nano,0,7.2,1.fc40,x86_64,@System", "Editor", 10)
        .with_package("available", "nano,0,7.2,1.fc40,x86_64,fedora", "Editor", 10)
        .with_package("installed", "bash,0,5.2,1.fc40,x86_64,@System", "Shell", 10);
    let mut session = started(&mock);

    let nano = session.installed_by_name("nano").unwrap()[0];
    assert_eq!(
        session.toggle_reinstall(nano).unwrap(),
        ToggleResult::Queued {
            package: nano,
            action: Action::Reinstall
        }
    );
    assert_eq!(session.cache().get(Filter::Reinstall), &[nano]);

    let bash = session.installed_by_name("bash").unwrap()[0];
    assert!(matches!(session.toggle_reinstall(bash), Err(Error::NothingToDo(_))));
}

#[test]
fn local_rpm_is_staged_by_path() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("foo-1.0-1.noarch.rpm");
    fs::write(&path, b"rpm").unwrap();
    let mock = MockDaemon::new();
    let mut session = started(&mock);

    let name = path.display().to_string();
    assert!(matches!(
        session.install_by_name(&name).unwrap(),
        ToggleResult::Queued {
            action: Action::LocalInstall,
            ..
        }
    ));
    assert!(matches!(
        session.install_by_name("/nonexistent/bar.rpm"),
        Err(Error::UnknownPackage(_))
    ));

    // The fake has no size for the file, but the entry is still sent by path
    drop(session.resolve());
    assert!(mock.calls().contains(&format!("AddTransaction {name} localinstall")));
}

#[test]
fn groups_toggle_by_installed_state() {
    let mock = MockDaemon::new();
    mock.set_groups(
        r#"[[["desktops","Desktops",""],
             [["kde-desktop","KDE","",false],["gnome-desktop","GNOME","",true]]]]"#,
    );
    mock.set_group_packages("kde-desktop", &["plasma,0,6.0,1,x86_64,fedora"]);
    let mut session = started(&mock);

    assert_eq!(session.toggle_group("kde-desktop").unwrap(), Some(GroupAction::Install));
    assert_eq!(session.toggle_group("gnome-desktop").unwrap(), Some(GroupAction::Remove));
    assert!(session.groups().unwrap()[0].groups[0].selected);
    assert!(matches!(session.toggle_group("xfce"), Err(Error::UnknownGroup(_))));

    let resolved = session.resolve().unwrap();
    assert_eq!(resolved.preview().len(), 1);
    assert_eq!(
        mock.transaction_groups(),
        vec![
            (String::from("kde-desktop"), String::from("install")),
            (String::from("gnome-desktop"), String::from("remove")),
        ]
    );

    assert_eq!(session.toggle_group("kde-desktop").unwrap(), None);
    assert_eq!(session.queue().has_group("kde-desktop"), None);
}

// =============================================================================
// Transaction protocol
// =============================================================================

#[test]
fn apply_runs_and_resets() {
    let mock = editor_universe();
    let mut session = started(&mock);
    queue_vim(&mut session);

    let outcome = session.apply(&mut AlwaysYes).unwrap();
    let ApplyOutcome::Applied(preview) = outcome else {
        panic!("unexpected {outcome:?}");
    };
    assert_eq!(preview.len(), 1);
    assert_eq!(preview.download_size(), 3000);
    assert!(session.queue().is_empty());
    assert!(session.cache().is_empty());
    assert_eq!(mock.watchdog(), vec![false, true]);
    assert!(mock.transaction().is_empty());
}

#[test]
fn empty_queue_has_nothing_to_do() {
    let mock = editor_universe();
    let mut session = started(&mock);

    assert!(matches!(session.apply(&mut AlwaysYes), Err(Error::NothingToDo(_))));
    assert_eq!(mock.called("BuildTransaction"), 0);
}

#[test]
fn declining_keeps_the_queue() {
    let mock = editor_universe();
    let mut session = started(&mock);
    queue_vim(&mut session);

    let mut answer = Answer::new(false, false);
    assert_eq!(session.apply(&mut answer).unwrap(), ApplyOutcome::Declined);
    assert_eq!(answer.prompts, 1);
    assert_eq!(session.queue().total(), 1);
    assert!(mock.transaction().is_empty());
    assert_eq!(mock.called("RunTransaction"), 0);
}

#[test]
fn depsolve_failure_is_recoverable() {
    let mock = editor_universe();
    mock.fail_build(&["nothing provides libfoo"]);
    let mut session = started(&mock);
    queue_vim(&mut session);

    let err = session.apply(&mut AlwaysYes).unwrap_err();
    assert_eq!(err.severity(), Severity::Recoverable);
    match err {
        Error::Solve(msgs) => assert_eq!(msgs, vec!["nothing provides libfoo"]),
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(session.queue().total(), 1);
    assert!(mock.transaction().is_empty());
    assert_eq!(mock.called("ClearTransaction"), 2);
}

#[test]
fn accepted_key_reruns_the_transaction() {
    let mock = editor_universe();
    mock.queue_gpg_prompt(key_request("ABCD1234"));
    let mut session = started(&mock);
    queue_vim(&mut session);

    assert!(matches!(session.apply(&mut AlwaysYes), Ok(ApplyOutcome::Applied(_))));
    assert_eq!(mock.gpg_answers(), vec![(String::from("ABCD1234"), true)]);
    assert_eq!(mock.called("RunTransaction"), 2);
    assert_eq!(mock.called("BuildTransaction"), 2);
}

#[test]
fn declined_key_aborts_and_keeps_the_queue() {
    let mock = editor_universe();
    mock.queue_gpg_prompt(key_request("ABCD1234"));
    let mut session = started(&mock);
    queue_vim(&mut session);

    let err = session.apply(&mut Answer::new(true, false)).unwrap_err();
    assert!(matches!(&err, Error::GpgDeclined(key) if key == "ABCD1234"));
    assert_eq!(mock.gpg_answers(), vec![(String::from("ABCD1234"), false)]);
    assert_eq!(mock.called("RunTransaction"), 1);
    assert_eq!(session.queue().total(), 1);
    assert!(mock.transaction().is_empty());
}

#[test]
fn key_prompts_are_bounded() {
    let mock = editor_universe();
    for key in ["K1", "K2", "K3", "K4"] {
        mock.queue_gpg_prompt(key_request(key));
    }
    let mut session = started(&mock);
    queue_vim(&mut session);

    assert!(matches!(session.apply(&mut AlwaysYes), Err(Error::Transaction(_))));
    assert_eq!(mock.called("RunTransaction"), 3);
    assert_eq!(session.queue().total(), 1);
    // Only keys for a run that follows are imported
    assert_eq!(mock.gpg_answers(), vec![(String::from("K1"), true), (String::from("K2"), true)]);
}

#[test]
fn download_error_is_recoverable() {
    let mock = editor_universe();
    mock.queue_run_reply(r#"[4, ["mirror timeout"]]"#);
    let mut session = started(&mock);
    queue_vim(&mut session);

    match session.apply(&mut AlwaysYes) {
        Err(Error::Download(msgs)) => assert_eq!(msgs, vec!["mirror timeout"]),
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(session.queue().total(), 1);
    assert_eq!(mock.watchdog(), vec![false, true]);
}

#[test]
fn daemon_method_error_is_recoverable() {
    let mock = editor_universe();
    mock.fail_next(
        "AddTransaction",
        DaemonError::classify("org.baseurl.DnfSystem.Failed", "package not found"),
    );
    let mut session = started(&mock);
    queue_vim(&mut session);

    let err = session.apply(&mut AlwaysYes).unwrap_err();
    assert_eq!(err.severity(), Severity::Recoverable);
    assert_eq!(session.queue().total(), 1);
}

// =============================================================================
// History, repositories, queries
// =============================================================================

#[test]
fn undo_requires_an_empty_queue() {
    let mock = editor_universe();
    mock.set_undo_reply(7, r#"[true, [["remove", [["vim,2,9.1,1.fc40,x86_64,@System", 0, []]]]]]"#);
    let mut session = started(&mock);
    queue_vim(&mut session);

    assert!(matches!(session.history_undo(7, &mut AlwaysYes), Err(Error::QueueNotEmpty)));

    session.reset();
    assert!(matches!(
        session.history_undo(7, &mut AlwaysYes),
        Ok(ApplyOutcome::Applied(_))
    ));
    assert!(matches!(session.history_undo(99, &mut AlwaysYes), Err(Error::Solve(_))));
}

#[test]
fn history_is_newest_first() {
    let mock = MockDaemon::new();
    mock.set_history(r#"[[3, "2024-01-02 10:00"], [5, "2024-02-01 09:30"]]"#);
    mock.set_history_packages(5, r#"[["foo,0,1,1,noarch,@System", "Install", true]]"#);
    let session = started(&mock);

    let tids: Vec<i32> = session.history(30).unwrap().iter().map(|t| t.tid).collect();
    assert_eq!(tids, vec![5, 3]);
    let pkgs = session.history_packages(5).unwrap();
    assert_eq!(pkgs[0].state, "Install");
    assert!(pkgs[0].installed);
}

#[test]
fn repositories_are_sorted() {
    let mock = MockDaemon::new();
    mock.add_repo("updates", "Fedora Updates", true);
    mock.add_repo("fedora", "Fedora", true);
    mock.add_repo("copr-x", "Copr", false);
    let session = started(&mock);

    let repos = session.repositories().unwrap();
    let ids: Vec<&str> = repos.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["copr-x", "fedora", "updates"]);
    assert!(!repos[0].enabled);
}

#[test]
fn switching_repos_resets_the_session() {
    let mock = editor_universe();
    let mut session = started(&mock);
    queue_vim(&mut session);

    session.set_enabled_repos(&[String::from("fedora")]).unwrap();
    assert!(session.queue().is_empty());
    assert!(session.cache().is_empty());
    assert_eq!(mock.enabled_repos(), Some(vec![String::from("fedora")]));
}

#[test]
fn search_and_details() {
    let mock = editor_universe();
    mock.set_attribute(
        "vim,2,9.1,1.fc40,x86_64,fedora",
        "description",
        r#""Vim is an advanced text editor.\nIt has modes.""#,
    );
    let mut session = started(&mock);

    let hits = session.search(&[String::from("Editor")]).unwrap();
    assert_eq!(hits.len(), 2);
    let hits = session.search(&[String::from("vi"), String::from("modes")]).unwrap();
    assert_eq!(hits.len(), 1);
    let vim = hits[0];
    assert_eq!(session.package(vim).unwrap().id.name, "vim");

    let lines = session.details(vim, Attribute::Description).unwrap();
    assert_eq!(lines, vec!["Vim is an advanced text editor.", "It has modes."]);
    assert!(session.details(vim, Attribute::Changelog).unwrap().is_empty());
}

#[test]
fn the_same_package_is_one_object_everywhere() {
    let mock = editor_universe();
    let mut session = started(&mock);

    let from_list = session.packages(Filter::Available).unwrap()[0];
    let from_search = session.search(&[String::from("modes")]).unwrap()[0];
    assert_eq!(from_list, from_search);

    session.toggle(from_list).unwrap();
    assert_eq!(session.queue().queued(from_search), Some(Action::Install));
}
