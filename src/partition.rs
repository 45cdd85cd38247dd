//! Partition context and the collective operations between ranks.
//!
//! All cross-rank synchronization goes through a [`Communicator`], which is passed explicitly
//! inside a [`PartitionContext`]. Reductions are summed in rank order, so results are
//! reproducible for a fixed number of ranks (but not across different rank counts).
use crate::error::{GeoFemError, Result};
use crate::ghost::GhostMessage;
use crate::region::ElementRegion;
use log::debug;
use std::fmt::Debug;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex};

pub trait Communicator: Debug + Send + Sync {
    fn rank(&self) -> usize;

    fn size(&self) -> usize;

    /// Sends `outgoing[r]` to rank `r` and returns the message received from every rank,
    /// indexed by source rank. Every rank must take part.
    fn all_to_all(&self, outgoing: Vec<Vec<u8>>) -> Result<Vec<Vec<u8>>>;

    fn all_gather_u64(&self, value: u64) -> Result<Vec<u64>> {
        let outgoing = vec![value.to_le_bytes().to_vec(); self.size()];
        self.all_to_all(outgoing)?
            .into_iter()
            .map(|bytes| {
                let array: [u8; 8] = bytes.as_slice().try_into().map_err(|_| GeoFemError::Communication {
                    reason: format!("all_gather_u64: expected 8 bytes, got {}", bytes.len()),
                })?;
                Ok(u64::from_le_bytes(array))
            })
            .collect()
    }

    /// Sum over all ranks, accumulated in rank order.
    fn all_reduce_sum_f64(&self, value: f64) -> Result<f64> {
        let values = self.all_gather_u64(value.to_bits())?;
        Ok(values.into_iter().map(f64::from_bits).sum())
    }

    /// Point-to-point exchange with the given neighbor ranks: `outgoing[i]` goes to
    /// `neighbors[i]`, and the returned `incoming[i]` came from `neighbors[i]`.
    fn exchange(&self, neighbors: &[usize], outgoing: Vec<Vec<u8>>) -> Result<Vec<Vec<u8>>> {
        if neighbors.len() != outgoing.len() {
            return Err(GeoFemError::SizeMismatch {
                context: "exchange",
                expected: neighbors.len(),
                actual: outgoing.len(),
            });
        }
        let mut all = vec![Vec::new(); self.size()];
        for (&rank, message) in neighbors.iter().zip(outgoing) {
            let slot = all.get_mut(rank).ok_or(GeoFemError::IndexOutOfBounds {
                context: "exchange (neighbor rank)",
                index: rank,
                len: self.size(),
            })?;
            *slot = message;
        }
        let mut incoming = self.all_to_all(all)?;
        Ok(neighbors
            .iter()
            .map(|&rank| std::mem::take(&mut incoming[rank]))
            .collect())
    }
}

/// The communicator of a single process.
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialCommunicator;

impl Communicator for SerialCommunicator {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn all_to_all(&self, outgoing: Vec<Vec<u8>>) -> Result<Vec<Vec<u8>>> {
        if outgoing.len() != 1 {
            return Err(GeoFemError::SizeMismatch {
                context: "all_to_all",
                expected: 1,
                actual: outgoing.len(),
            });
        }
        Ok(outgoing)
    }
}

/// A tagged message: (source rank, collective sequence number, payload).
type Envelope = (usize, u64, Vec<u8>);

#[derive(Debug)]
struct ChannelState {
    sequence: u64,
    /// Messages that arrived for a later collective than the current one.
    pending: Vec<Envelope>,
}

/// A group of in-process ranks connected by channels, one rank per thread.
#[derive(Debug)]
pub struct ChannelCommunicator {
    rank: usize,
    senders: Vec<Sender<Envelope>>,
    receiver: Mutex<Receiver<Envelope>>,
    state: Mutex<ChannelState>,
}

impl ChannelCommunicator {
    /// Creates `size` connected communicators, the `r`-th one having rank `r`.
    pub fn group(size: usize) -> Vec<Self> {
        let (senders, receivers): (Vec<_>, Vec<_>) = (0..size).map(|_| channel()).unzip();
        receivers
            .into_iter()
            .enumerate()
            .map(|(rank, receiver)| Self {
                rank,
                senders: senders.clone(),
                receiver: Mutex::new(receiver),
                state: Mutex::new(ChannelState {
                    sequence: 0,
                    pending: Vec::new(),
                }),
            })
            .collect()
    }
}

fn poisoned(what: &str) -> GeoFemError {
    GeoFemError::Communication {
        reason: format!("{what} lock poisoned"),
    }
}

impl Communicator for ChannelCommunicator {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.senders.len()
    }

    fn all_to_all(&self, outgoing: Vec<Vec<u8>>) -> Result<Vec<Vec<u8>>> {
        let size = self.size();
        if outgoing.len() != size {
            return Err(GeoFemError::SizeMismatch {
                context: "all_to_all",
                expected: size,
                actual: outgoing.len(),
            });
        }
        let mut state = self.state.lock().map_err(|_| poisoned("channel state"))?;
        let sequence = state.sequence;
        state.sequence += 1;

        for (sender, message) in self.senders.iter().zip(outgoing) {
            sender
                .send((self.rank, sequence, message))
                .map_err(|_| GeoFemError::Communication {
                    reason: format!("rank {}: peer disconnected", self.rank),
                })?;
        }

        let mut incoming: Vec<Option<Vec<u8>>> = vec![None; size];
        let mut received = 0;
        let pending = std::mem::take(&mut state.pending);
        for (source, seq, message) in pending {
            if seq == sequence {
                incoming[source] = Some(message);
                received += 1;
            } else {
                state.pending.push((source, seq, message));
            }
        }

        let receiver = self.receiver.lock().map_err(|_| poisoned("receiver"))?;
        while received < size {
            let (source, seq, message) = receiver.recv().map_err(|_| GeoFemError::Communication {
                reason: format!("rank {}: all peers disconnected", self.rank),
            })?;
            if seq == sequence {
                incoming[source] = Some(message);
                received += 1;
            } else {
                state.pending.push((source, seq, message));
            }
        }
        Ok(incoming.into_iter().map(Option::unwrap_or_default).collect())
    }
}

/// Element exchange lists with one neighboring rank.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Neighbor {
    pub rank: usize,
    /// Locally owned elements ghosted on the neighbor.
    pub send: Vec<usize>,
    /// Local ghost elements owned by the neighbor.
    pub receive: Vec<usize>,
}

#[derive(Debug, Clone)]
pub struct PartitionContext {
    pub rank: usize,
    pub communicator: Arc<dyn Communicator>,
    pub neighbors: Vec<Neighbor>,
}

impl PartitionContext {
    pub fn new(communicator: Arc<dyn Communicator>, neighbors: Vec<Neighbor>) -> Self {
        Self {
            rank: communicator.rank(),
            communicator,
            neighbors,
        }
    }

    /// A single-rank context without neighbors.
    pub fn serial() -> Self {
        Self::new(Arc::new(SerialCommunicator), Vec::new())
    }

    pub fn size(&self) -> usize {
        self.communicator.size()
    }

    /// Sends the named fields of every neighbor's `send` elements and overwrites the `receive`
    /// elements with what the neighbor sent back.
    pub fn synchronize_region_fields(&self, region: &mut ElementRegion, names: &[&str]) -> Result<()> {
        let ranks: Vec<usize> = self.neighbors.iter().map(|neighbor| neighbor.rank).collect();
        let outgoing = self
            .neighbors
            .iter()
            .map(|neighbor| region.pack_ghost_fields(names, &neighbor.send)?.to_bytes())
            .collect::<Result<Vec<_>>>()?;
        let incoming = self.communicator.exchange(&ranks, outgoing)?;
        for (neighbor, bytes) in self.neighbors.iter().zip(incoming) {
            let message = GhostMessage::from_bytes(&bytes)?;
            region.unpack_ghost_fields(&message, &neighbor.receive)?;
        }
        debug!(
            "rank {}: synchronized {} fields of region {} with {} neighbors",
            self.rank,
            names.len(),
            region.name(),
            self.neighbors.len()
        );
        Ok(())
    }
}
