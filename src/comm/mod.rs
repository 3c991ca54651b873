//! # Collective Communication
//!
//! Ranks cooperate only through collectives: broadcast, barrier and the
//! all-to-all-variable exchange. Every rank of a group must enter the same
//! collective in the same order; there are no timeouts at this layer.
//!
//! | Communicator | Module | Description |
//! |--------------|--------|-------------|
//! | `SelfComm` | here | A group of one rank |
//! | `LocalComm` | `local` | N ranks as N threads of one process |

pub mod local;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::model::Rank;
use crate::{Error, Result};

pub use local::{run_group, LocalComm, LocalGroup};

// ============================================================================
// Exchange buffers
// ============================================================================

/// Variable-length per-rank payloads packed into one contiguous buffer.
///
/// Rank `r`'s payload is `data[displs[r]..displs[r] + counts[r]]`. Counts
/// and displacements exist for every rank of the group, including ranks
/// with nothing to transmit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExchangeBuffers {
    pub counts: Vec<usize>,
    pub displs: Vec<usize>,
    pub data: Vec<u8>,
}

impl ExchangeBuffers {
    /// Buffers for `size` ranks with nothing to send.
    pub fn empty(size: usize) -> Self {
        Self { counts: vec![0; size], displs: vec![0; size], data: Vec::new() }
    }

    pub fn num_ranks(&self) -> usize {
        self.counts.len()
    }

    /// Payload of `rank`, checked against the buffer bounds.
    pub fn payload(&self, rank: Rank) -> Result<&[u8]> {
        let (count, displ) = match (self.counts.get(rank), self.displs.get(rank)) {
            (Some(&c), Some(&d)) => (c, d),
            _ => {
                return Err(Error::ContractViolation(format!(
                    "no count/displacement for rank {rank} in {}-rank buffers",
                    self.counts.len()
                )));
            }
        };
        if count == 0 {
            return Ok(&self.data[..0]);
        }
        match displ.checked_add(count) {
            Some(end) if displ < self.data.len() && end <= self.data.len() => Ok(&self.data[displ..end]),
            _ => Err(Error::ContractViolation(format!(
                "invalid buffer displacement {displ} (+{count}) for rank {rank}, buffer holds {} bytes",
                self.data.len()
            ))),
        }
    }

    /// Check the shape against a group of `size` ranks.
    pub fn check_shape(&self, size: usize) -> Result<()> {
        if self.counts.len() != size || self.displs.len() != size {
            return Err(Error::ContractViolation(format!(
                "exchange buffers describe {} counts and {} displacements for {size} ranks",
                self.counts.len(),
                self.displs.len()
            )));
        }
        Ok(())
    }
}

// ============================================================================
// Communicator trait
// ============================================================================

/// A fixed group of cooperating ranks.
pub trait Communicator: Send {
    fn rank(&self) -> Rank;

    fn size(&self) -> usize;

    /// Block until every rank has entered the barrier.
    fn barrier(&self) -> Result<()>;

    /// Replace `buf` on every rank with the contents of `buf` on `root`.
    fn broadcast(&self, root: Rank, buf: &mut Vec<u8>) -> Result<()>;

    /// Send `send`'s per-rank payloads; returns what every rank sent to
    /// this one, packed in rank order.
    fn all_to_all_v(&self, send: &ExchangeBuffers) -> Result<ExchangeBuffers>;
}

/// Broadcast a serializable value from `root`. `value` is only read on
/// `root`; other ranks may pass `None`.
pub fn broadcast_value<C, T>(comm: &C, root: Rank, value: Option<&T>) -> Result<T>
where
    C: Communicator + ?Sized,
    T: Serialize + DeserializeOwned,
{
    let mut buf = Vec::new();
    if comm.rank() == root {
        let value = value.ok_or_else(|| {
            Error::ContractViolation(format!("broadcast root {root} has no value to send"))
        })?;
        buf = serde_json::to_vec(value)?;
    }
    comm.broadcast(root, &mut buf)?;
    Ok(serde_json::from_slice(&buf)?)
}

/// Run `f` on `root` only and broadcast its outcome.
///
/// A failure on `root` is broadcast as well, so every rank leaves with an
/// error instead of the other ranks blocking on a broadcast that never
/// comes.
pub fn broadcast_result<C, T>(comm: &C, root: Rank, f: impl FnOnce() -> Result<T>) -> Result<T>
where
    C: Communicator + ?Sized,
    T: Serialize + DeserializeOwned,
{
    if comm.rank() == root {
        let outcome = f();
        let wire: std::result::Result<&T, String> = outcome.as_ref().map_err(ToString::to_string);
        let mut buf = serde_json::to_vec(&wire)?;
        comm.broadcast(root, &mut buf)?;
        return outcome;
    }
    let wire: std::result::Result<T, String> = broadcast_value(comm, root, None)?;
    wire.map_err(|msg| Error::StorageError(format!("rank {root}: {msg}")))
}

/// Collective outcome check after a rank-local phase.
///
/// Every rank reports whether its `local` result is an error; all ranks
/// return an error if any rank failed, so no rank enters the next
/// collective alone.
pub fn all_succeeded<C, T>(comm: &C, local: Result<T>) -> Result<T>
where
    C: Communicator + ?Sized,
{
    let size = comm.size();
    let status = u8::from(local.is_err());
    let send = ExchangeBuffers { counts: vec![1; size], displs: (0..size).collect(), data: vec![status; size] };
    let recv = comm.all_to_all_v(&send)?;
    let local = local?;
    let failed: Vec<Rank> = (0..size)
        .filter(|&r| recv.payload(r).map(|p| p != [0]).unwrap_or(true))
        .collect();
    if !failed.is_empty() {
        return Err(Error::CollectiveError(format!("ranks {failed:?} failed")));
    }
    Ok(local)
}

// ============================================================================
// SelfComm
// ============================================================================

/// A group containing only the calling rank.
#[derive(Debug, Clone, Copy, Default)]
pub struct SelfComm;

impl Communicator for SelfComm {
    fn rank(&self) -> Rank {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn barrier(&self) -> Result<()> {
        Ok(())
    }

    fn broadcast(&self, root: Rank, _buf: &mut Vec<u8>) -> Result<()> {
        if root != 0 {
            return Err(Error::ContractViolation(format!("broadcast root {root} outside a 1-rank group")));
        }
        Ok(())
    }

    fn all_to_all_v(&self, send: &ExchangeBuffers) -> Result<ExchangeBuffers> {
        send.check_shape(1)?;
        let data = send.payload(0)?.to_vec();
        Ok(ExchangeBuffers { counts: vec![data.len()], displs: vec![0], data })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_bounds() {
        let buf = ExchangeBuffers { counts: vec![2, 0, 3], displs: vec![0, 2, 2], data: vec![1, 2, 3, 4, 5] };
        assert_eq!(buf.payload(0).unwrap(), &[1, 2]);
        assert!(buf.payload(1).unwrap().is_empty());
        assert_eq!(buf.payload(2).unwrap(), &[3, 4, 5]);
        assert!(buf.payload(3).is_err());

        let bad = ExchangeBuffers { counts: vec![2], displs: vec![5], data: vec![1, 2, 3] };
        assert!(matches!(bad.payload(0), Err(Error::ContractViolation(_))));
    }

    #[test]
    fn test_self_comm() {
        let comm = SelfComm;
        let v: Vec<u32> = broadcast_value(&comm, 0, Some(&vec![1u32, 2])).unwrap();
        assert_eq!(v, vec![1, 2]);
        let out = comm
            .all_to_all_v(&ExchangeBuffers { counts: vec![2], displs: vec![0], data: vec![7, 8] })
            .unwrap();
        assert_eq!(out.data, vec![7, 8]);
        assert!(comm.broadcast(1, &mut Vec::new()).is_err());
    }

    #[test]
    fn test_all_succeeded_reports_failed_ranks() {
        let results = run_group(3, |comm| {
            let local = if comm.rank() == 2 { Err(Error::ContractViolation("bad slice".into())) } else { Ok(()) };
            all_succeeded(&comm, local)
        })
        .unwrap();
        assert!(matches!(results[0], Err(Error::CollectiveError(ref m)) if m.contains("[2]")));
        assert!(matches!(results[1], Err(Error::CollectiveError(_))));
        assert!(matches!(results[2], Err(Error::ContractViolation(_))));
        assert!(all_succeeded(&SelfComm, Ok(5)).is_ok());
    }

    #[test]
    fn test_root_failure_reaches_every_rank() {
        let results = run_group(3, |comm| {
            broadcast_result(&comm, 0, || -> Result<u32> { Err(Error::NotFound("population table".into())) })
        })
        .unwrap();
        assert!(matches!(results[0], Err(Error::NotFound(_))));
        assert!(matches!(results[1], Err(Error::StorageError(ref m)) if m.contains("population table")));
        assert!(matches!(results[2], Err(Error::StorageError(_))));
    }
}
