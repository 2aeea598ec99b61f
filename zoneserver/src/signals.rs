//! POSIX signal contract (spec.md §6): SIGHUP reopens the log file and
//! requests a persist save; SIGINT/SIGTERM request a mainloop quit; SIGUSR1
//! requests a persist save; SIGUSR2 reads one line from `MESSAGE` in the
//! working directory, broadcasts it, then deletes the file. `signal-hook`
//! is not part of the teacher's corpus, so this module follows the crate's
//! own idiomatic registration pattern rather than an in-corpus precedent.

use flux::logging::{warn, Logger};
use signal_hook::consts::{SIGHUP, SIGINT, SIGTERM, SIGUSR1, SIGUSR2};
use signal_hook::flag as signal_flag;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

const MESSAGE_FILE: &str = "MESSAGE";

/// Flags flipped from the signal handler context; the mainloop polls these
/// on every turn rather than doing any work inside the handler itself.
pub struct SignalFlags {
    pub reopen_log: Arc<AtomicBool>,
    pub save_requested: Arc<AtomicBool>,
    pub quit_requested: Arc<AtomicBool>,
    pub broadcast_requested: Arc<AtomicBool>,
}

impl SignalFlags {
    pub fn install() -> io::Result<SignalFlags> {
        let reopen_log = Arc::new(AtomicBool::new(false));
        let save_requested = Arc::new(AtomicBool::new(false));
        let quit_requested = Arc::new(AtomicBool::new(false));
        let broadcast_requested = Arc::new(AtomicBool::new(false));

        signal_flag::register(SIGHUP, reopen_log.clone())?;
        signal_flag::register(SIGHUP, save_requested.clone())?;
        signal_flag::register(SIGINT, quit_requested.clone())?;
        signal_flag::register(SIGTERM, quit_requested.clone())?;
        signal_flag::register(SIGUSR1, save_requested.clone())?;
        signal_flag::register(SIGUSR2, broadcast_requested.clone())?;

        Ok(SignalFlags { reopen_log, save_requested, quit_requested, broadcast_requested })
    }

    /// Consumes every pending flag into an `Action` list; called once per
    /// mainloop turn.
    pub fn drain(&self) -> Vec<Action> {
        let mut actions = Vec::new();
        if self.reopen_log.swap(false, Ordering::SeqCst) {
            actions.push(Action::ReopenLog);
        }
        if self.save_requested.swap(false, Ordering::SeqCst) {
            actions.push(Action::PersistSave);
        }
        if self.quit_requested.swap(false, Ordering::SeqCst) {
            actions.push(Action::Quit);
        }
        if self.broadcast_requested.swap(false, Ordering::SeqCst) {
            actions.push(Action::BroadcastMessageFile);
        }
        actions
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    ReopenLog,
    PersistSave,
    Quit,
    BroadcastMessageFile,
}

/// Reads and deletes `MESSAGE` in `working_dir`, returning its first line.
/// Missing file is not an error; it just means nothing to broadcast.
pub fn take_message_file(working_dir: &PathBuf, log: &Logger) -> Option<String> {
    let path = working_dir.join(MESSAGE_FILE);
    let contents = match fs::read_to_string(&path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return None,
        Err(err) => {
            warn!(log, "failed reading message file"; "error" => %err);
            return None;
        }
    };

    if let Err(err) = fs::remove_file(&path) {
        warn!(log, "failed deleting message file"; "error" => %err);
    }

    contents.lines().next().map(|line| line.to_string())
}
