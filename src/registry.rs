use flume::{Receiver, Sender, TrySendError};
use std::fmt::{Debug, Formatter};
use std::sync::atomic::{AtomicU64, Ordering};

/// Append-only holder of every live connection acquired during the run.
///
/// Backed by a bounded channel whose capacity is the connection ceiling, so
/// `len() <= max_conns()` holds no matter how many workers append at once.
pub struct Registry<C> {
    send: Sender<C>,
    recv: Receiver<C>,
    max_conns: u64,
    //slots claimed by workers, filled or still being acquired
    claimed: AtomicU64,
}

impl<C> Debug for Registry<C> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("len", &self.len())
            .field("claimed", &self.claimed())
            .field("max_conns", &self.max_conns)
            .finish()
    }
}

impl<C> Registry<C> {
    /// `max_conns` must be at least 1; config validation guarantees it.
    pub fn new(max_conns: u64) -> Self {
        let (send, recv) = flume::bounded(max_conns as usize);
        Self {
            send,
            recv,
            max_conns,
            claimed: AtomicU64::new(0),
        }
    }

    /// Claim a slot ahead of an acquisition attempt.
    ///
    /// Returns false once every slot is claimed. A claimed slot stays with the
    /// worker across failed attempts until it is filled or released.
    pub fn try_reserve(&self) -> bool {
        self.claimed
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |claimed| {
                (claimed < self.max_conns).then_some(claimed + 1)
            })
            .is_ok()
    }

    /// Give back a claimed slot that will not be filled.
    pub fn release_reservation(&self) {
        _ = self
            .claimed
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |claimed| {
                claimed.checked_sub(1)
            });
    }

    /// Append a connection, handing it back if the registry is already full.
    pub fn push(&self, conn: C) -> Result<usize, C> {
        match self.send.try_send(conn) {
            Ok(()) => Ok(self.len()),
            Err(TrySendError::Full(conn)) | Err(TrySendError::Disconnected(conn)) => Err(conn),
        }
    }

    pub fn len(&self) -> usize {
        self.send.len()
    }

    pub fn is_empty(&self) -> bool {
        self.send.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.send.is_full()
    }

    pub fn max_conns(&self) -> u64 {
        self.max_conns
    }

    pub fn claimed(&self) -> u64 {
        self.claimed.load(Ordering::SeqCst)
    }

    /// Take every held connection out, for closing at shutdown.
    pub fn drain(&self) -> Vec<C> {
        self.recv.drain().collect()
    }
}
