//! Collective communication primitives for the bulk-synchronous extraction
//!
//! The extraction is bulk-synchronous across ranks: the only blocking points
//! are the collectives defined here. Real deployments back [`Communicator`]
//! and [`IrregularExchange`] with their message-passing runtime;
//! [`SerialComm`] covers single-process runs and [`channel::LocalCluster`]
//! provides an in-process cluster for tests.

use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Barrier};

/// Collective operations over all ranks participating in the extraction
pub trait Communicator {
    /// The rank of this process in `0..size`
    fn rank(&self) -> usize;

    /// The number of participating ranks
    fn size(&self) -> usize;

    /// Blocks until every rank reached the barrier
    fn barrier(&self);

    /// Broadcasts the buffer from `root` to every rank, overwriting non-root buffers
    fn broadcast(&self, root: usize, buf: &mut Vec<u8>);

    /// Global sum of a per-rank value, returned on every rank
    fn all_reduce_sum(&self, value: u64) -> u64;

    /// Elementwise global minimum, in place on every rank
    fn all_reduce_min(&self, values: &mut [f64]);

    /// Elementwise global maximum, in place on every rank
    fn all_reduce_max(&self, values: &mut [f64]);
}

/// Point-to-point bulk exchange by destination-rank list, single use per
/// cleanup invocation
pub trait IrregularExchange {
    /// Routes each record to its destination rank and returns the records received by this rank
    ///
    /// `destinations[i]` is the destination rank of `records[i]`. Every rank
    /// must call this collectively. Reception order is grouped by source rank.
    fn exchange(&self, destinations: &[usize], records: Vec<Vec<u8>>) -> Vec<Vec<u8>>;
}

/// Trivial communicator for a single-process run
#[derive(Clone, Default)]
pub struct SerialComm;

impl Communicator for SerialComm {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn barrier(&self) {}

    fn broadcast(&self, _root: usize, _buf: &mut Vec<u8>) {}

    fn all_reduce_sum(&self, value: u64) -> u64 {
        value
    }

    fn all_reduce_min(&self, _values: &mut [f64]) {}

    fn all_reduce_max(&self, _values: &mut [f64]) {}
}

impl IrregularExchange for SerialComm {
    fn exchange(&self, destinations: &[usize], records: Vec<Vec<u8>>) -> Vec<Vec<u8>> {
        // A serial run has no remote neighbours; anything addressed to rank 0
        // is simply looped back.
        destinations
            .iter()
            .zip(records)
            .filter(|(&dest, _)| dest == 0)
            .map(|(_, record)| record)
            .collect()
    }
}

/// In-process cluster of communicator endpoints connected by channels
pub mod channel {
    use super::*;

    enum Packet {
        Bytes(Vec<u8>),
        Sum(u64),
        Floats(Vec<f64>),
        Records(Vec<Vec<u8>>),
    }

    /// One rank's endpoint of a [`LocalCluster`]
    ///
    /// Endpoints are handed out by [`LocalCluster::connect`] and are meant to
    /// be moved into one thread per rank.
    pub struct ChannelComm {
        rank: usize,
        size: usize,
        senders: Vec<Sender<Packet>>,
        receiver: Receiver<Packet>,
        barrier: Arc<Barrier>,
    }

    /// Connects `size` in-process ranks with channels
    pub struct LocalCluster;

    impl LocalCluster {
        /// Returns one connected endpoint per rank
        pub fn connect(size: usize) -> Vec<ChannelComm> {
            assert!(size > 0, "cluster needs at least one rank");
            let mut senders = Vec::with_capacity(size);
            let mut receivers = Vec::with_capacity(size);
            for _ in 0..size {
                let (tx, rx) = channel();
                senders.push(tx);
                receivers.push(rx);
            }
            let barrier = Arc::new(Barrier::new(size));
            receivers
                .into_iter()
                .enumerate()
                .map(|(rank, receiver)| ChannelComm {
                    rank,
                    size,
                    senders: senders.clone(),
                    receiver,
                    barrier: barrier.clone(),
                })
                .collect()
        }
    }

    impl ChannelComm {
        fn send(&self, to: usize, packet: Packet) {
            self.senders[to]
                .send(packet)
                .expect("cluster rank disconnected");
        }

        fn recv(&self) -> Packet {
            self.receiver.recv().expect("cluster rank disconnected")
        }

        fn fold_floats(&self, values: &mut [f64], fold: impl Fn(f64, f64) -> f64) {
            if self.size == 1 {
                return;
            }
            if self.rank == 0 {
                for _ in 1..self.size {
                    match self.recv() {
                        Packet::Floats(other) => {
                            for (v, o) in values.iter_mut().zip(other) {
                                *v = fold(*v, o);
                            }
                        }
                        _ => unreachable!("collective mismatch"),
                    }
                }
                for to in 1..self.size {
                    self.send(to, Packet::Floats(values.to_vec()));
                }
            } else {
                self.send(0, Packet::Floats(values.to_vec()));
                match self.recv() {
                    Packet::Floats(result) => values.copy_from_slice(&result),
                    _ => unreachable!("collective mismatch"),
                }
            }
            self.barrier.wait();
        }
    }

    impl Communicator for ChannelComm {
        fn rank(&self) -> usize {
            self.rank
        }

        fn size(&self) -> usize {
            self.size
        }

        fn barrier(&self) {
            self.barrier.wait();
        }

        fn broadcast(&self, root: usize, buf: &mut Vec<u8>) {
            if self.size == 1 {
                return;
            }
            if self.rank == root {
                for to in (0..self.size).filter(|&r| r != root) {
                    self.send(to, Packet::Bytes(buf.clone()));
                }
            } else {
                match self.recv() {
                    Packet::Bytes(bytes) => *buf = bytes,
                    _ => unreachable!("collective mismatch"),
                }
            }
            self.barrier.wait();
        }

        fn all_reduce_sum(&self, value: u64) -> u64 {
            if self.size == 1 {
                return value;
            }
            let total = if self.rank == 0 {
                let mut total = value;
                for _ in 1..self.size {
                    match self.recv() {
                        Packet::Sum(v) => total += v,
                        _ => unreachable!("collective mismatch"),
                    }
                }
                for to in 1..self.size {
                    self.send(to, Packet::Sum(total));
                }
                total
            } else {
                self.send(0, Packet::Sum(value));
                match self.recv() {
                    Packet::Sum(total) => total,
                    _ => unreachable!("collective mismatch"),
                }
            };
            self.barrier.wait();
            total
        }

        fn all_reduce_min(&self, values: &mut [f64]) {
            self.fold_floats(values, f64::min);
        }

        fn all_reduce_max(&self, values: &mut [f64]) {
            self.fold_floats(values, f64::max);
        }
    }

    impl IrregularExchange for ChannelComm {
        fn exchange(&self, destinations: &[usize], records: Vec<Vec<u8>>) -> Vec<Vec<u8>> {
            assert_eq!(
                destinations.len(),
                records.len(),
                "one destination rank per record"
            );

            let mut outgoing: Vec<Vec<Vec<u8>>> = vec![Vec::new(); self.size];
            for (&dest, record) in destinations.iter().zip(records) {
                outgoing[dest].push(record);
            }

            let mut received = Vec::new();
            received.append(&mut outgoing[self.rank]);

            for to in (0..self.size).filter(|&r| r != self.rank) {
                self.send(to, Packet::Records(std::mem::take(&mut outgoing[to])));
            }
            for _ in (0..self.size).filter(|&r| r != self.rank) {
                match self.recv() {
                    Packet::Records(mut records) => received.append(&mut records),
                    _ => unreachable!("collective mismatch"),
                }
            }

            self.barrier.wait();
            received
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use std::thread;

        #[test]
        fn test_cluster_collectives() {
            let endpoints = LocalCluster::connect(3);
            thread::scope(|scope| {
                for comm in endpoints {
                    scope.spawn(move || {
                        let mut buf = if comm.rank() == 0 {
                            vec![1u8, 2, 3]
                        } else {
                            Vec::new()
                        };
                        comm.broadcast(0, &mut buf);
                        assert_eq!(buf, vec![1, 2, 3]);

                        let total = comm.all_reduce_sum(comm.rank() as u64 + 1);
                        assert_eq!(total, 6);

                        let mut lo = [comm.rank() as f64];
                        comm.all_reduce_min(&mut lo);
                        assert_eq!(lo, [0.0]);

                        // Every rank sends one record to the next rank around a ring
                        let next = (comm.rank() + 1) % comm.size();
                        let received =
                            comm.exchange(&[next], vec![vec![comm.rank() as u8]]);
                        assert_eq!(received.len(), 1);
                        let prev = (comm.rank() + comm.size() - 1) % comm.size();
                        assert_eq!(received[0], vec![prev as u8]);
                    });
                }
            });
        }
    }
}
