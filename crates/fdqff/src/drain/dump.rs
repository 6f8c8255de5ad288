use std::{
    sync::mpsc::{self, Sender},
    thread::{self, JoinHandle},
};

use crate::time;

/// A garbage heap that deletes files on its own thread. The `None` variant
/// keeps everything on disk.
pub(crate) enum Dump {
    Real {
        handle: JoinHandle<()>,
        sender: Sender<String>,
    },
    None,
}

impl Dump {
    pub(crate) fn new(no_del: bool) -> Self {
        if no_del {
            return Self::None;
        }
        let (sender, receiver) = mpsc::channel::<String>();
        let handle = thread::spawn(move || {
            for file in receiver {
                if let Err(e) = std::fs::remove_file(&file) {
                    log::trace!("failed to remove {file} with {e}");
                }
            }
        });
        Self::Real { handle, sender }
    }

    pub(crate) fn send(&self, file: String) {
        if let Dump::Real { sender, .. } = self {
            // the receiver only hangs up after shutdown
            let _ = sender.send(file);
        }
    }

    /// finish the pending deletions and join the thread
    pub(crate) fn shutdown(self) {
        let Self::Real { handle, sender } = self else {
            return;
        };
        drop(sender);
        time!(e, {
            if handle.join().is_err() {
                log::error!("file deletion thread panicked");
            }
        });
        log::debug!("finished deleting files after {:.1} s", e.as_secs_f64());
    }
}
