//! Background persistence of state snapshots.
//!
//! Writers publish serialized snapshots into a bounded [`Mailbox`]. A single
//! thread owned by [`StateWriter`] drains it and writes each snapshot
//! atomically. When the mailbox is full the oldest pending snapshot is
//! dropped: every snapshot is a full copy of the state, so only the newest
//! one matters.

use crate::state::write_atomic;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use tracing::{debug, error, warn};

pub const MAILBOX_CAPACITY: usize = 4;

#[derive(Debug, Default)]
struct MailboxState {
    queue: VecDeque<Vec<u8>>,
    writing: bool,
    closed: bool,
    dropped: u64,
}

#[derive(Debug)]
pub struct Mailbox {
    state: Mutex<MailboxState>,
    changed: Condvar,
    capacity: usize,
}

impl Mailbox {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(MailboxState::default()),
            changed: Condvar::new(),
            capacity: capacity.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MailboxState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue a snapshot, evicting the oldest pending one when full.
    /// Returns false once the mailbox is closed.
    pub fn publish(&self, snapshot: Vec<u8>) -> bool {
        let mut st = self.lock();
        if st.closed {
            return false;
        }
        if st.queue.len() >= self.capacity {
            st.queue.pop_front();
            st.dropped += 1;
            debug!(dropped = st.dropped, "state mailbox full, dropped oldest snapshot");
        }
        st.queue.push_back(snapshot);
        self.changed.notify_all();
        true
    }

    /// Block until a snapshot is available. `None` once closed and drained.
    fn take(&self) -> Option<Vec<u8>> {
        let mut st = self.lock();
        loop {
            if let Some(next) = st.queue.pop_front() {
                st.writing = true;
                return Some(next);
            }
            if st.closed {
                return None;
            }
            st = self
                .changed
                .wait(st)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn done_writing(&self) {
        self.lock().writing = false;
        self.changed.notify_all();
    }

    /// Block until every published snapshot has been written.
    pub fn wait_idle(&self) {
        let mut st = self.lock();
        while !st.queue.is_empty() || st.writing {
            st = self
                .changed
                .wait(st)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    pub fn close(&self) {
        self.lock().closed = true;
        self.changed.notify_all();
    }

    pub fn pending(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn dropped(&self) -> u64 {
        self.lock().dropped
    }
}

/// Owns the writer thread. Closing or dropping it drains the mailbox first.
pub struct StateWriter {
    mailbox: Arc<Mailbox>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl StateWriter {
    pub fn spawn(path: PathBuf) -> Result<Self, std::io::Error> {
        let mailbox = Arc::new(Mailbox::new(MAILBOX_CAPACITY));
        let worker = Arc::clone(&mailbox);
        let handle = std::thread::Builder::new()
            .name("weldr-state-writer".to_owned())
            .spawn(move || {
                while let Some(snapshot) = worker.take() {
                    if let Err(e) = write_atomic(&path, &snapshot) {
                        error!("failed to persist state to {}: {e}", path.display());
                    }
                    worker.done_writing();
                }
                debug!("state writer stopped");
            })?;
        Ok(Self {
            mailbox,
            handle: Mutex::new(Some(handle)),
        })
    }

    pub fn publish(&self, snapshot: Vec<u8>) {
        if !self.mailbox.publish(snapshot) {
            warn!("state writer closed, snapshot discarded");
        }
    }

    /// Wait for all published snapshots to reach disk.
    pub fn flush(&self) {
        self.mailbox.wait_idle();
    }

    /// Drain the mailbox and stop the writer thread.
    pub fn close(&self) {
        self.mailbox.close();
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!("state writer thread panicked");
            }
        }
    }
}

impl Drop for StateWriter {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_mailbox_drops_oldest() {
        let mb = Mailbox::new(2);
        assert!(mb.publish(b"1".to_vec()));
        assert!(mb.publish(b"2".to_vec()));
        assert!(mb.publish(b"3".to_vec()));
        assert_eq!(mb.pending(), 2);
        assert_eq!(mb.dropped(), 1);
        assert_eq!(mb.take().unwrap(), b"2");
        mb.done_writing();
        assert_eq!(mb.take().unwrap(), b"3");
    }

    #[test]
    fn closed_mailbox_drains_then_ends() {
        let mb = Mailbox::new(4);
        mb.publish(b"a".to_vec());
        mb.close();
        assert!(!mb.publish(b"b".to_vec()));
        assert_eq!(mb.take().unwrap(), b"a");
        mb.done_writing();
        assert!(mb.take().is_none());
    }

    #[test]
    fn writer_persists_latest_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let writer = StateWriter::spawn(path.clone()).unwrap();
        for i in 0..20 {
            writer.publish(format!("{{\"n\":{i}}}").into_bytes());
        }
        writer.flush();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{\"n\":19}");
        writer.close();
        writer.publish(b"late".to_vec());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{\"n\":19}");
    }
}
