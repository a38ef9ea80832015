use std::io::{self, IsTerminal};
use std::process::ExitCode;

use chrono::{DateTime, Utc};
use clap::Parser;
use color_eyre::Result;
use color_eyre::eyre::eyre;

use dnfstage::cli::{Cli, Mode};
use dnfstage::config::{Config, UpdateStamp};
use dnfstage::core::{AlwaysYes, ApplyOutcome, Confirm, Session, SessionOptions, is_root};
use dnfstage::dbus::DnfDaemon;
use dnfstage::error::{self, Error, Severity};
use dnfstage::types::*;
use dnfstage::ui::TuiConfirm;

fn main() -> Result<ExitCode> {
    color_eyre::install()?;
    let cli = Cli::parse();
    init_logging(cli.debug);

    if is_root() {
        return Err(eyre!(
            "dnfstage must not run as root; dnfdaemon asks for authorization when needed"
        ));
    }

    let config_path = cli.config.clone().or_else(Config::default_path);
    let mut config = match &config_path {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    let mode = cli.mode();
    let interactive = io::stdin().is_terminal() && io::stdout().is_terminal();
    let assume_yes = cli.yes || config.always_yes;
    if cli.is_transaction() && !interactive && !assume_yes {
        return Err(eyre!("not running on a terminal; pass --yes to apply without confirmation"));
    }
    let mut confirm: Box<dyn Confirm> = if assume_yes {
        Box::new(AlwaysYes)
    } else {
        Box::new(TuiConfirm::new())
    };

    let daemon = DnfDaemon::connect(interactive && cli.is_transaction())?;
    let mut session = Session::new(daemon);

    let now = Utc::now();
    let last_refresh = config.last_refresh;
    let mut options = SessionOptions::from_config(&config, now);
    // --refresh expires the cache itself
    options.refresh_metadata &= mode != Mode::Refresh;

    let started = if mode == Mode::Exit {
        Ok(false)
    } else {
        session.start(&options)
    };
    let outcome = started.and_then(|refreshed| {
        if refreshed {
            config.mark_refreshed(now);
        }
        run_mode(&mut session, &mode, confirm.as_mut(), &mut config, now)
    });
    session.shutdown();

    if config.last_refresh != last_refresh
        && let Some(path) = &config_path
        && let Err(e) = config.save(path)
    {
        log::warn!("could not save {}: {e}", path.display());
    }

    match outcome {
        Ok(code) => Ok(code),
        Err(e) if e.severity() == Severity::Fatal => Err(e.into()),
        Err(e) => {
            eprintln!("Error: {e}");
            Ok(ExitCode::FAILURE)
        }
    }
}

fn init_logging(debug: bool) {
    let level = if debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp(None)
        .init();
}

fn run_mode(
    session: &mut Session<DnfDaemon>,
    mode: &Mode,
    confirm: &mut dyn Confirm,
    config: &mut Config,
    now: DateTime<Utc>,
) -> error::Result<ExitCode> {
    match mode {
        Mode::ListUpdates => {
            let updates = session.packages(Filter::Updates)?;
            if updates.is_empty() {
                println!("No updates available");
            }
            print_packages(session, &updates);
            Ok(ExitCode::SUCCESS)
        }
        Mode::Exit => {
            session.exit_daemon()?;
            println!("dnfdaemon asked to exit");
            Ok(ExitCode::SUCCESS)
        }
        Mode::Install(names) => {
            for name in names {
                let result = session.install_by_name(name)?;
                report(session, &result);
            }
            apply(session, confirm)
        }
        Mode::Remove(names) => {
            for name in names {
                for result in session.remove_by_name(name)? {
                    report(session, &result);
                }
            }
            apply(session, confirm)
        }
        Mode::UpdateAll => {
            if session.queue_all_updates()? == 0 {
                println!("No updates available");
                return Ok(ExitCode::SUCCESS);
            }
            apply(session, confirm)
        }
        Mode::CheckUpdates => {
            let stamp = UpdateStamp::default_path().map(UpdateStamp::new);
            if let Some(stamp) = &stamp
                && !stamp.is_due(config.update_interval, now)
            {
                log::info!("last update check is less than {} minutes old", config.update_interval);
                return Ok(ExitCode::SUCCESS);
            }
            let count = session.update_count()?;
            println!("{count} updates available");
            if let Some(stamp) = &stamp {
                stamp.write(now)?;
            }
            Ok(ExitCode::SUCCESS)
        }
        Mode::Reinstall(names) => {
            for name in names {
                for handle in session.installed_by_name(name)? {
                    let result = session.toggle_reinstall(handle)?;
                    report(session, &result);
                }
            }
            apply(session, confirm)
        }
        Mode::Downgrade(name) => {
            let installed = session.installed_by_name(name)?;
            let Some(&current) = installed.first() else {
                return Err(Error::NothingToDo(format!("{name} is not installed")));
            };
            let candidates = session.downgrade_candidates(current)?;
            let Some(&target) = candidates.first() else {
                return Err(Error::NothingToDo(format!("no older version of {name} is available")));
            };
            let result = session.toggle_downgrade(target)?;
            report(session, &result);
            apply(session, confirm)
        }
        Mode::GroupInstall(grp_id) => {
            session.queue_group(grp_id, GroupAction::Install)?;
            apply(session, confirm)
        }
        Mode::GroupRemove(grp_id) => {
            session.queue_group(grp_id, GroupAction::Remove)?;
            apply(session, confirm)
        }
        Mode::Search(keys) => {
            let hits = session.search(keys)?;
            if hits.is_empty() {
                println!("No matches");
            }
            print_packages(session, &hits);
            Ok(ExitCode::SUCCESS)
        }
        Mode::History(days) => {
            for tx in session.history(*days)? {
                println!("{:>6}  {}", tx.tid, tx.timestamp);
                for pkg in session.history_packages(tx.tid)? {
                    println!("        {:<12} {}", pkg.state, pkg.id.fullname());
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        Mode::Undo(tid) => Ok(outcome_code(session.history_undo(*tid, confirm)?)),
        Mode::Repos => {
            for repo in session.repositories()? {
                let mark = if repo.enabled { "[x]" } else { "[ ]" };
                println!("{mark} {:<32} {}", repo.id, repo.name);
            }
            Ok(ExitCode::SUCCESS)
        }
        Mode::Refresh => {
            if session.refresh_metadata()? {
                config.mark_refreshed(now);
                println!("Metadata cache expired");
            } else {
                println!("Metadata cache not expired");
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn apply(session: &mut Session<DnfDaemon>, confirm: &mut dyn Confirm) -> error::Result<ExitCode> {
    Ok(outcome_code(session.apply(confirm)?))
}

fn outcome_code(outcome: ApplyOutcome) -> ExitCode {
    match outcome {
        ApplyOutcome::Applied(preview) => {
            println!("Applied {} changes", preview.len());
            ExitCode::SUCCESS
        }
        ApplyOutcome::Declined => {
            println!("Operation aborted");
            ExitCode::FAILURE
        }
    }
}

fn report(session: &Session<DnfDaemon>, result: &ToggleResult) {
    let name = |handle: &PackageHandle| {
        session
            .package(*handle)
            .map_or_else(|| String::from("(unknown)"), |p| p.id.fullname())
    };
    match result {
        ToggleResult::Queued { package, action } => {
            println!("{} {} ({})", action.symbol(), name(package), action.label());
        }
        ToggleResult::Unqueued { package, .. } => println!("  {} (unqueued)", name(package)),
        ToggleResult::NoChange { package } => {
            println!("  {} already queued or conflicting, skipped", name(package));
        }
    }
}

fn print_packages(session: &Session<DnfDaemon>, handles: &[PackageHandle]) {
    for pkg in handles.iter().filter_map(|h| session.package(*h)) {
        println!(
            "{:<48} {:<16} {:>10}  {}",
            pkg.id.fullname(),
            pkg.id.repo,
            pkg.size_str(),
            pkg.summary
        );
    }
}
