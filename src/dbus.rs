//! [`Daemon`] over the D-Bus system bus
//!
//! Method calls go through a blocking zbus proxy from the calling thread. A
//! second proxy on the same connection lives in a background thread that
//! consumes the daemon's progress signals; it only logs them, optionally
//! draws them, and records GPG import requests for the main thread to drain.

use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

use serde::Serialize;
use zbus::blocking::{Connection, Proxy};
use zbus::zvariant::{DynamicDeserialize, DynamicType};

use crate::backend::{Daemon, GpgKeyRequest};
use crate::error::DaemonError;
use crate::progress::{ProgressDisplay, ProgressEvent, ProgressState, log_event};

pub const BUS_NAME: &str = "org.baseurl.DnfSystem";
pub const OBJECT_PATH: &str = "/";
pub const INTERFACE: &str = "org.baseurl.DnfSystem";

impl From<zbus::Error> for DaemonError {
    fn from(err: zbus::Error) -> Self {
        match &err {
            zbus::Error::MethodError(name, detail, _) => {
                DaemonError::classify(name.as_str(), detail.as_deref().unwrap_or_default())
            }
            _ => DaemonError::classify("", &err.to_string()),
        }
    }
}

pub struct DnfDaemon {
    proxy: Proxy<'static>,
    gpg_requests: Arc<Mutex<Vec<GpgKeyRequest>>>,
}

impl DnfDaemon {
    /// Connect to the system bus and start the signal listener.
    /// `show_progress` draws an inline gauge on the controlling terminal.
    pub fn connect(show_progress: bool) -> Result<Self, DaemonError> {
        let conn = Connection::system()?;
        let proxy = Proxy::new(&conn, BUS_NAME, OBJECT_PATH, INTERFACE)?;
        let gpg_requests = Arc::new(Mutex::new(Vec::new()));
        spawn_listener(conn, Arc::clone(&gpg_requests), show_progress);
        Ok(Self { proxy, gpg_requests })
    }

    fn call<B, R>(&self, method: &str, body: &B) -> Result<R, DaemonError>
    where
        B: Serialize + DynamicType,
        R: for<'d> DynamicDeserialize<'d>,
    {
        log::debug!("dnfdaemon {method}");
        self.proxy.call(method, body).map_err(DaemonError::from)
    }

    /// Call and ignore the reply body
    fn call_void<B>(&self, method: &str, body: &B) -> Result<(), DaemonError>
    where
        B: Serialize + DynamicType,
    {
        log::debug!("dnfdaemon {method}");
        self.proxy
            .call_method(method, body)
            .map(drop)
            .map_err(DaemonError::from)
    }
}

impl Daemon for DnfDaemon {
    fn lock(&self) -> Result<bool, DaemonError> {
        self.call("Lock", &())
    }

    fn unlock(&self) -> Result<bool, DaemonError> {
        self.call("Unlock", &())
    }

    fn exit(&self) -> Result<(), DaemonError> {
        self.call_void("Exit", &())
    }

    fn set_watchdog_state(&self, state: bool) -> Result<(), DaemonError> {
        self.call_void("SetWatchdogState", &(state,))
    }

    fn set_config(&self, setting: &str, value: &str) -> Result<bool, DaemonError> {
        self.call("SetConfig", &(setting, value))
    }

    fn set_enabled_repos(&self, repo_ids: &[String]) -> Result<(), DaemonError> {
        self.call_void("SetEnabledRepos", &(repo_ids,))
    }

    fn get_packages(&self, filter: &str, attrs: &[&str]) -> Result<String, DaemonError> {
        self.call("GetPackages", &(filter, attrs))
    }

    fn get_packages_by_name(&self, pattern: &str, attrs: &[&str], newest_only: bool) -> Result<String, DaemonError> {
        self.call("GetPackagesByName", &(pattern, attrs, newest_only))
    }

    fn search(
        &self,
        fields: &[String],
        keys: &[String],
        attrs: &[&str],
        match_all: bool,
        newest_only: bool,
        tags: bool,
    ) -> Result<String, DaemonError> {
        self.call("Search", &(fields, keys, attrs, match_all, newest_only, tags))
    }

    fn get_attribute(&self, pkg_id: &str, attr: &str) -> Result<String, DaemonError> {
        self.call("GetAttribute", &(pkg_id, attr))
    }

    fn get_groups(&self) -> Result<String, DaemonError> {
        self.call("GetGroups", &())
    }

    fn get_group_packages(&self, grp_id: &str, grp_flt: &str) -> Result<String, DaemonError> {
        self.call("GetGroupPackages", &(grp_id, grp_flt))
    }

    fn group_install(&self, cmds: &str) -> Result<String, DaemonError> {
        self.call("GroupInstall", &(cmds,))
    }

    fn group_remove(&self, cmds: &str) -> Result<String, DaemonError> {
        self.call("GroupRemove", &(cmds,))
    }

    fn get_repositories(&self, filter: &str) -> Result<Vec<String>, DaemonError> {
        self.call("GetRepositories", &(filter,))
    }

    fn get_repo(&self, repo_id: &str) -> Result<String, DaemonError> {
        self.call("GetRepo", &(repo_id,))
    }

    fn clear_transaction(&self) -> Result<(), DaemonError> {
        self.call_void("ClearTransaction", &())
    }

    fn add_transaction(&self, pkg_id: &str, action: &str) -> Result<String, DaemonError> {
        self.call("AddTransaction", &(pkg_id, action))
    }

    fn build_transaction(&self) -> Result<String, DaemonError> {
        self.call("BuildTransaction", &())
    }

    fn get_transaction(&self) -> Result<String, DaemonError> {
        self.call("GetTransaction", &())
    }

    fn run_transaction(&self) -> Result<String, DaemonError> {
        self.call("RunTransaction", &())
    }

    fn confirm_gpg_import(&self, hexkeyid: &str, confirmed: bool) -> Result<(), DaemonError> {
        self.call_void("ConfirmGPGImport", &(hexkeyid, confirmed))
    }

    fn get_history_by_days(&self, start_days: i32, end_days: i32) -> Result<String, DaemonError> {
        self.call("GetHistoryByDays", &(start_days, end_days))
    }

    fn get_history_packages(&self, tid: i32) -> Result<String, DaemonError> {
        self.call("GetHistoryPackages", &(tid,))
    }

    fn history_undo(&self, tid: i32) -> Result<String, DaemonError> {
        self.call("HistoryUndo", &(tid,))
    }

    fn expire_cache(&self) -> Result<bool, DaemonError> {
        self.call("ExpireCache", &())
    }

    fn take_gpg_requests(&self) -> Vec<GpgKeyRequest> {
        std::mem::take(&mut *self.gpg_requests.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

// ============================================================================
// Signal listener
// ============================================================================

fn spawn_listener(conn: Connection, gpg_requests: Arc<Mutex<Vec<GpgKeyRequest>>>, show_progress: bool) {
    let spawned = thread::Builder::new()
        .name(String::from("dnfdaemon-signals"))
        .spawn(move || listen(&conn, &gpg_requests, show_progress));
    if let Err(e) = spawned {
        log::warn!("progress signals unavailable: {e}");
    }
}

fn listen(conn: &Connection, gpg_requests: &Mutex<Vec<GpgKeyRequest>>, show_progress: bool) {
    let signals = match Proxy::new(conn, BUS_NAME, OBJECT_PATH, INTERFACE)
        .and_then(|proxy| proxy.receive_all_signals())
    {
        Ok(signals) => signals,
        Err(e) => {
            log::warn!("progress signals unavailable: {e}");
            return;
        }
    };

    let mut display = if show_progress {
        ProgressDisplay::open()
            .map_err(|e| log::debug!("no progress display: {e}"))
            .ok()
    } else {
        None
    };
    let mut state = ProgressState::new();

    for msg in signals {
        let Some(event) = decode_signal(&msg) else {
            continue;
        };
        if let ProgressEvent::GpgImport(request) = &event {
            gpg_requests
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(request.clone());
        }
        let changed = state.apply(&event);
        log_event(&state, &event, changed);
        if let Some(display) = display.as_mut() {
            display.draw(&state);
        }
    }
}

fn body<T>(msg: &zbus::Message, member: &str) -> Option<T>
where
    T: for<'d> DynamicDeserialize<'d>,
{
    msg.body()
        .deserialize::<T>()
        .map_err(|e| log::debug!("malformed {member} signal: {e}"))
        .ok()
}

fn decode_signal(msg: &zbus::Message) -> Option<ProgressEvent> {
    let header = msg.header();
    let member = header.member()?.as_str();
    let event = match member {
        "TransactionEvent" => {
            let (event, data): (String, String) = body(msg, member)?;
            ProgressEvent::TransactionEvent { event, data }
        }
        "RPMProgress" => {
            let (package, action, te_current, te_total, ts_current, ts_total): (String, String, u64, u64, i32, i32) =
                body(msg, member)?;
            ProgressEvent::RpmProgress {
                package,
                action,
                te_current,
                te_total,
                ts_current,
                ts_total,
            }
        }
        "DownloadStart" => {
            let (num_files, num_bytes): (i32, u64) = body(msg, member)?;
            ProgressEvent::DownloadStart { num_files, num_bytes }
        }
        "DownloadProgress" => {
            let (name, frac, total_frac, total_files): (String, f64, f64, i32) = body(msg, member)?;
            ProgressEvent::DownloadProgress {
                name,
                frac,
                total_frac,
                total_files,
            }
        }
        "DownloadEnd" => {
            let (name, status, text): (String, i32, String) = body(msg, member)?;
            ProgressEvent::DownloadEnd { name, status, msg: text }
        }
        "RepoMetaDataProgress" => {
            let (name, frac): (String, f64) = body(msg, member)?;
            ProgressEvent::RepoMetaDataProgress { name, frac }
        }
        "ErrorMessage" => ProgressEvent::ErrorMessage(body(msg, member)?),
        "GPGImport" => {
            let (pkg_id, userid, hexkeyid, keyurl, timestamp): (String, String, String, String, String) =
                body(msg, member)?;
            ProgressEvent::GpgImport(GpgKeyRequest {
                pkg_id,
                userid,
                hexkeyid,
                keyurl,
                timestamp,
            })
        }
        _ => return None,
    };
    Some(event)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DaemonErrorKind;

    #[test]
    fn transport_errors_classify_as_unreachable() {
        let err = DaemonError::from(zbus::Error::InputOutput(Arc::new(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "connection refused",
        ))));
        assert_eq!(err.kind, DaemonErrorKind::Unreachable);
    }
}
