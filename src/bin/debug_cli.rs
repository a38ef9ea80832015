//! Debug CLI for exercising the queue and transaction protocol
//!
//! Each invocation connects to dnfdaemon, replays the queue saved in
//! `debug_state.json`, runs one command and saves the queue again.
//!
//! Usage:
//!   cargo run --bin debug_cli -- <command> [args]
//!
//! Commands:
//!   status              Show every queued package and group
//!   info <name>         Show versions, queue state and description
//!   toggle <name>       Queue or unqueue a package (simulates Space key)
//!   downgrade <name>    Queue a downgrade to the first older version
//!   group <id>          Toggle a comps group
//!   find <key>...       Search names and summaries
//!   list [filter]       List packages (updates, installed, available, obsoletes)
//!   preview             Resolve the queue and show the transaction
//!   apply               Resolve, confirm and run
//!   reset               Clear the saved queue

use std::env;
use std::fs;
use std::path::Path;

use color_eyre::Result;
use color_eyre::eyre::eyre;

use dnfstage::backend::Attribute;
use dnfstage::core::{ApplyOutcome, Session, SessionOptions};
use dnfstage::dbus::DnfDaemon;
use dnfstage::error::Error;
use dnfstage::types::*;
use dnfstage::ui::{TuiConfirm, preview_lines};

const STATE_FILE: &str = "debug_state.json";

fn main() -> Result<()> {
    color_eyre::install()?;
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args: Vec<String> = env::args().collect();
    let cmd = args.get(1).map(String::as_str).unwrap_or("help");

    match cmd {
        "status" => cmd_status()?,
        "info" => {
            let name = args.get(2).ok_or_else(|| eyre!("Usage: info <package_name>"))?;
            cmd_info(name)?;
        }
        "toggle" => {
            let name = args.get(2).ok_or_else(|| eyre!("Usage: toggle <package_name>"))?;
            cmd_toggle(name)?;
        }
        "downgrade" => {
            let name = args.get(2).ok_or_else(|| eyre!("Usage: downgrade <package_name>"))?;
            cmd_downgrade(name)?;
        }
        "group" => {
            let grp_id = args.get(2).ok_or_else(|| eyre!("Usage: group <group_id>"))?;
            cmd_group(grp_id)?;
        }
        "find" => {
            if args.len() < 3 {
                return Err(eyre!("Usage: find <key>..."));
            }
            cmd_find(&args[2..])?;
        }
        "list" => cmd_list(args.get(2).map(String::as_str))?,
        "preview" => cmd_preview()?,
        "apply" => cmd_apply()?,
        "reset" => cmd_reset()?,
        _ => {
            println!("Debug CLI for dnfstage");
            println!();
            println!("Commands:");
            println!("  status              Show every queued package and group");
            println!("  info <name>         Show versions, queue state and description");
            println!("  toggle <name>       Queue or unqueue a package (simulates Space key)");
            println!("  downgrade <name>    Queue a downgrade to the first older version");
            println!("  group <id>          Toggle a comps group");
            println!("  find <key>...       Search names and summaries");
            println!("  list [filter]       List packages (updates, installed, available, obsoletes)");
            println!("  preview             Resolve the queue and show the transaction");
            println!("  apply               Resolve, confirm and run");
            println!("  reset               Clear the saved queue");
            println!();
            println!("Example flow:");
            println!("  cli reset");
            println!("  cli toggle htop           # + htop (Install)");
            println!("  cli toggle nano           # - nano (Remove)");
            println!("  cli status");
            println!("  cli preview");
        }
    }

    Ok(())
}

fn cmd_status() -> Result<()> {
    let mut session = load_state()?;

    println!("=== Queue Status ===");
    println!();

    let queue = session.queue();
    if queue.is_empty() {
        println!("Nothing queued.");
    }
    for (action, handle) in queue.packages() {
        if let Some(pkg) = session.package(handle) {
            println!("  {} {:<40} {}", action.symbol(), pkg.id.fullname(), action.label());
        }
    }
    for (grp_id, action) in queue.get_groups() {
        println!("  @ {grp_id:<40} group {}", action.code());
    }

    println!();
    println!("Total: {}", queue.total());
    println!("Daemon transaction: {} entries", session.backend().transaction()?.len());
    println!("Updates available: {}", session.update_count()?);

    session.shutdown();
    Ok(())
}

fn cmd_info(name: &str) -> Result<()> {
    let mut session = load_state()?;

    let handles = session.find_by_name(name)?;
    for handle in &handles {
        let Some(pkg) = session.package(*handle) else {
            continue;
        };
        let state = session
            .queue()
            .queued(*handle)
            .map_or("not queued", |a| a.label());
        println!("{:<48} {:<12} {}", pkg.id.fullname(), pkg.id.repo, state);
    }

    if let Some(&first) = handles.first() {
        println!();
        for line in session.details(first, Attribute::Description)? {
            println!("  {line}");
        }
    }

    session.shutdown();
    Ok(())
}

fn cmd_toggle(name: &str) -> Result<()> {
    let mut session = load_state()?;

    let handles = session.find_by_name(name)?;
    let queued = handles
        .iter()
        .copied()
        .find(|h| session.queue().queued(*h).is_some());

    let result = match queued {
        Some(handle) => session.toggle(handle)?,
        None => match session.install_by_name(name) {
            Ok(result) => result,
            // Only the installed version is left: toggling it means remove
            Err(Error::NothingToDo(_)) => {
                let installed = session.installed_by_name(name)?;
                let handle = installed.first().copied().ok_or_else(|| eyre!("{name} not found"))?;
                session.toggle(handle)?
            }
            Err(e) => return Err(e.into()),
        },
    };

    print_toggle(&session, &result);
    save_state(&session)?;
    session.shutdown();
    Ok(())
}

fn cmd_downgrade(name: &str) -> Result<()> {
    let mut session = load_state()?;

    let installed = session.installed_by_name(name)?;
    let current = installed.first().copied().ok_or_else(|| eyre!("{name} is not installed"))?;
    let candidates = session.downgrade_candidates(current)?;

    println!("Older versions of {name}:");
    for handle in &candidates {
        if let Some(pkg) = session.package(*handle) {
            println!("  ↓ {}", pkg.id.fullname());
        }
    }
    let Some(&target) = candidates.first() else {
        println!("  (none)");
        session.shutdown();
        return Ok(());
    };

    let result = session.toggle_downgrade(target)?;
    print_toggle(&session, &result);
    save_state(&session)?;
    session.shutdown();
    Ok(())
}

fn cmd_group(grp_id: &str) -> Result<()> {
    let mut session = load_state()?;

    match session.toggle_group(grp_id)? {
        Some(action) => println!("Queued group {grp_id} ({})", action.code()),
        None => println!("Unqueued group {grp_id}"),
    }
    for id in session.group_packages(grp_id, false)? {
        println!("  {}", id.fullname());
    }

    save_state(&session)?;
    session.shutdown();
    Ok(())
}

fn cmd_find(keys: &[String]) -> Result<()> {
    let mut session = load_state()?;

    let hits = session.search(keys)?;
    println!("Matches ({}):", hits.len());
    for pkg in hits.iter().filter_map(|h| session.package(*h)) {
        println!("  {:<48} {}", pkg.id.fullname(), pkg.summary);
    }

    session.shutdown();
    Ok(())
}

fn cmd_list(filter: Option<&str>) -> Result<()> {
    let mut session = load_state()?;

    let filter = match filter {
        None => Filter::Updates,
        Some(name) => Filter::parse(name).unwrap_or_else(|| {
            println!("Unknown filter: {name}. Using 'updates'");
            Filter::Updates
        }),
    };

    let list = session.packages(filter)?;
    println!("Packages ({}) - filter: {}:", list.len(), filter.label());
    println!();

    for handle in list.iter().take(30) {
        let Some(pkg) = session.package(*handle) else {
            continue;
        };
        let mark = session.queue().queued(*handle).map_or(" ", |a| a.symbol());
        println!("  {mark} {}", pkg.id.fullname());
    }

    if list.len() > 30 {
        println!("  ... and {} more", list.len() - 30);
    }

    session.shutdown();
    Ok(())
}

fn cmd_preview() -> Result<()> {
    let mut session = load_state()?;

    let resolved = session.resolve()?;
    for line in preview_lines(resolved.preview()) {
        println!("{line}");
    }
    session.discard();

    session.shutdown();
    Ok(())
}

fn cmd_apply() -> Result<()> {
    let mut session = load_state()?;

    let outcome = session.apply(&mut TuiConfirm::new());
    session.shutdown();

    match outcome? {
        ApplyOutcome::Applied(preview) => {
            println!("Applied {} changes.", preview.len());
            cmd_reset()?;
        }
        ApplyOutcome::Declined => println!("Declined; queue kept."),
    }
    Ok(())
}

fn cmd_reset() -> Result<()> {
    if Path::new(STATE_FILE).exists() {
        fs::remove_file(STATE_FILE)?;
    }
    println!("Queue cleared.");
    Ok(())
}

fn print_toggle(session: &Session<DnfDaemon>, result: &ToggleResult) {
    let name = |handle: PackageHandle| {
        session
            .package(handle)
            .map_or_else(|| String::from("(unknown)"), |p| p.id.fullname())
    };

    match result {
        ToggleResult::Queued { package, action } => {
            println!("=== Toggle {} (queue) ===", name(*package));
            println!("{} {}", action.symbol(), action.label());
        }
        ToggleResult::Unqueued { package, also } => {
            println!("=== Toggle {} (unqueue) ===", name(*package));
            if let Some(other) = also {
                println!("Also unqueued: {}", name(*other));
            }
        }
        ToggleResult::NoChange { package } => {
            println!("=== Toggle {} (no change) ===", name(*package));
            println!("Another version of this name.arch is already queued");
        }
    }
}

// === State persistence ===

#[derive(serde::Serialize, serde::Deserialize, Default)]
struct SavedState {
    /// `(wire key, action code)` for every queued package
    packages: Vec<(String, String)>,
    /// `(group id, group action code)`
    groups: Vec<(String, String)>,
}

fn load_state() -> Result<Session<DnfDaemon>> {
    let daemon = DnfDaemon::connect(false)?;
    let mut session = Session::new(daemon);
    session.start(&SessionOptions::default())?;

    if !Path::new(STATE_FILE).exists() {
        return Ok(session);
    }
    let content = fs::read_to_string(STATE_FILE)?;
    let saved: SavedState = serde_json::from_str(&content)?;

    for (key, code) in &saved.packages {
        let Some(action) = Action::from_code(code) else {
            println!("skipping {key}: unknown action {code}");
            continue;
        };
        if action == Action::LocalInstall {
            session.queue_local(Path::new(key))?;
            continue;
        }
        let name = key.split(',').next().unwrap_or_default();
        if let Err(e) = session.find_by_name(name) {
            println!("skipping {key}: {e}");
            continue;
        }
        match session.cache().handle_for(key) {
            Some(handle) => {
                session.queue_as(handle, action)?;
            }
            None => println!("skipping {key}: no longer available"),
        }
    }
    for (grp_id, code) in &saved.groups {
        if let Some(action) = GroupAction::from_code(code) {
            session.queue_group(grp_id, action)?;
        }
    }

    Ok(session)
}

fn save_state(session: &Session<DnfDaemon>) -> Result<()> {
    let queue = session.queue();
    let packages = queue
        .packages()
        .filter_map(|(action, handle)| {
            session
                .package(handle)
                .map(|pkg| (pkg.key.clone(), action.code().to_string()))
        })
        .collect();
    let groups = queue
        .get_groups()
        .map(|(id, action)| (id.to_string(), action.code().to_string()))
        .collect();

    let saved = SavedState { packages, groups };
    let content = serde_json::to_string_pretty(&saved)?;
    fs::write(STATE_FILE, content)?;
    Ok(())
}
