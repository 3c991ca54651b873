//! Thread-backed communicator: every rank is an OS thread.
//!
//! Each rank owns one mailbox with a FIFO queue per sending rank. Because
//! collectives are entered in lock-step and each (sender, receiver) pair is
//! FIFO, a rank that races ahead into the next collective can never have its
//! message mistaken for one belonging to the current collective of a slower
//! rank.
//!
//! A rank whose `LocalComm` is dropped is marked as departed; receives from it
//! fail once its queue is drained instead of blocking forever.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use tracing::trace;

use super::{Communicator, ExchangeBuffers};
use crate::model::Rank;
use crate::{Error, Result};

struct Mailbox {
    queues: Mutex<Vec<VecDeque<Vec<u8>>>>,
    ready: Condvar,
}

struct Shared {
    mailboxes: Vec<Mailbox>,
    departed: Vec<AtomicBool>,
}

/// One rank's handle onto a thread group.
pub struct LocalComm {
    rank: Rank,
    shared: Arc<Shared>,
}

/// Constructor for thread groups.
pub struct LocalGroup;

impl LocalGroup {
    /// Create the communicators of a `size`-rank group, indexed by rank.
    pub fn new(size: usize) -> Result<Vec<LocalComm>> {
        if size == 0 {
            return Err(Error::ContractViolation("a group needs at least one rank".into()));
        }
        let shared = Arc::new(Shared {
            mailboxes: (0..size)
                .map(|_| Mailbox {
                    queues: Mutex::new(vec![VecDeque::new(); size]),
                    ready: Condvar::new(),
                })
                .collect(),
            departed: (0..size).map(|_| AtomicBool::new(false)).collect(),
        });
        Ok((0..size).map(|rank| LocalComm { rank, shared: Arc::clone(&shared) }).collect())
    }
}

/// Run `f` once per rank of a new `size`-rank group, each on its own
/// thread, and collect the results in rank order.
pub fn run_group<F, R>(size: usize, f: F) -> Result<Vec<R>>
where
    F: Fn(LocalComm) -> R + Sync,
    R: Send,
{
    let comms = LocalGroup::new(size)?;
    std::thread::scope(|scope| {
        let handles: Vec<_> = comms
            .into_iter()
            .map(|comm| {
                let f = &f;
                scope.spawn(move || f(comm))
            })
            .collect();
        handles
            .into_iter()
            .enumerate()
            .map(|(rank, h)| {
                h.join()
                    .map_err(|_| Error::CollectiveError(format!("rank {rank} panicked")))
            })
            .collect()
    })
}

impl LocalComm {
    fn send(&self, to: Rank, bytes: Vec<u8>) {
        let mailbox = &self.shared.mailboxes[to];
        mailbox.queues.lock()[self.rank].push_back(bytes);
        mailbox.ready.notify_all();
    }

    fn recv(&self, from: Rank) -> Result<Vec<u8>> {
        let mailbox = &self.shared.mailboxes[self.rank];
        let mut queues = mailbox.queues.lock();
        loop {
            if let Some(msg) = queues[from].pop_front() {
                return Ok(msg);
            }
            if self.shared.departed[from].load(Ordering::Acquire) {
                return Err(Error::CollectiveError(format!(
                    "rank {from} left the group while rank {} was waiting on it",
                    self.rank
                )));
            }
            mailbox.ready.wait(&mut queues);
        }
    }

    fn check_rank(&self, rank: Rank) -> Result<()> {
        if rank >= self.size() {
            return Err(Error::ContractViolation(format!(
                "rank {rank} outside a {}-rank group",
                self.size()
            )));
        }
        Ok(())
    }
}

impl Drop for LocalComm {
    fn drop(&mut self) {
        self.shared.departed[self.rank].store(true, Ordering::Release);
        for mailbox in &self.shared.mailboxes {
            let _guard = mailbox.queues.lock();
            mailbox.ready.notify_all();
        }
    }
}

impl Communicator for LocalComm {
    fn rank(&self) -> Rank {
        self.rank
    }

    fn size(&self) -> usize {
        self.shared.mailboxes.len()
    }

    fn barrier(&self) -> Result<()> {
        for to in (0..self.size()).filter(|&r| r != self.rank) {
            self.send(to, Vec::new());
        }
        for from in (0..self.size()).filter(|&r| r != self.rank) {
            self.recv(from)?;
        }
        Ok(())
    }

    fn broadcast(&self, root: Rank, buf: &mut Vec<u8>) -> Result<()> {
        self.check_rank(root)?;
        if self.rank == root {
            for to in (0..self.size()).filter(|&r| r != root) {
                self.send(to, buf.clone());
            }
        } else {
            *buf = self.recv(root)?;
        }
        trace!(rank = self.rank, root, bytes = buf.len(), "broadcast");
        Ok(())
    }

    fn all_to_all_v(&self, send: &ExchangeBuffers) -> Result<ExchangeBuffers> {
        let size = self.size();
        send.check_shape(size)?;
        for to in 0..size {
            self.send(to, send.payload(to)?.to_vec());
        }

        let mut recv = ExchangeBuffers::empty(size);
        for from in 0..size {
            let msg = self.recv(from)?;
            recv.displs[from] = recv.data.len();
            recv.counts[from] = msg.len();
            recv.data.extend_from_slice(&msg);
        }
        trace!(rank = self.rank, sent = send.data.len(), received = recv.data.len(), "all_to_all_v");
        Ok(recv)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::broadcast_value;

    #[test]
    fn test_all_to_all_v_routes_payloads() {
        let results = run_group(3, |comm| {
            let me = comm.rank();
            // rank r sends [r, to] to every rank `to`
            let mut send = ExchangeBuffers::empty(3);
            for to in 0..3 {
                send.displs[to] = send.data.len();
                send.data.extend_from_slice(&[me as u8, to as u8]);
                send.counts[to] = 2;
            }
            comm.all_to_all_v(&send).unwrap()
        })
        .unwrap();

        for (me, recv) in results.iter().enumerate() {
            for from in 0..3 {
                assert_eq!(recv.payload(from).unwrap(), &[from as u8, me as u8]);
            }
        }
    }

    #[test]
    fn test_repeated_collectives_stay_ordered() {
        let results = run_group(4, |comm| {
            let mut seen = Vec::new();
            for round in 0..5u32 {
                let root = round as usize % 4;
                let value = round * 10 + root as u32;
                let got: u32 = broadcast_value(&comm, root, Some(&value)).unwrap();
                seen.push(got);
                comm.barrier().unwrap();
            }
            seen
        })
        .unwrap();
        for seen in results {
            assert_eq!(seen, vec![0, 11, 22, 33, 40]);
        }
    }

    #[test]
    fn test_departed_rank_fails_receivers() {
        let results = run_group(2, |comm| {
            if comm.rank() == 1 {
                return Ok(());
            }
            comm.barrier()
        })
        .unwrap();
        assert!(matches!(results[0], Err(Error::CollectiveError(_))));
    }
}
