// message passing between workers.
//
// every worker issues the same collectives in the same order. point to point
// exchanges are symmetric: both sides send first and receive second, which
// cannot deadlock because sends never block.

use crate::error::TransportError;
use crate::Amplitude;
use crossbeam_channel::{self as cb, Receiver, RecvTimeoutError, Sender};
use num_complex::Complex;
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

pub type TransportResult<T> = std::result::Result<T, TransportError>;

// rank every collective gathers to and broadcasts from
pub const ROOT: usize = 0;

#[derive(Clone, Debug, PartialEq)]
pub enum Message {
    Exchange(Vec<Amplitude>),
    Reduce(Vec<f64>),
    Broadcast(Vec<u64>),
    Gather(Vec<Amplitude>),
    Barrier,
}

impl Message {
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Exchange(_) => "exchange",
            Message::Reduce(_) => "reduce",
            Message::Broadcast(_) => "broadcast",
            Message::Gather(_) => "gather",
            Message::Barrier => "barrier",
        }
    }

    fn len(&self) -> usize {
        match self {
            Message::Exchange(v) | Message::Gather(v) => v.len(),
            Message::Reduce(v) => v.len(),
            Message::Broadcast(v) => v.len(),
            Message::Barrier => 0,
        }
    }
}

// traffic counters, one set per worker
#[derive(Debug, Default)]
pub struct TransportMetrics {
    exchanges: AtomicUsize,
    messages_sent: AtomicUsize,
    messages_received: AtomicUsize,
    values_sent: AtomicUsize,
    values_received: AtomicUsize,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct TransportStats {
    pub exchanges: usize,
    pub messages_sent: usize,
    pub messages_received: usize,
    pub values_sent: usize,
    pub values_received: usize,
}

impl TransportMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn record_exchange(&self) {
        self.exchanges.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_send(&self, values: usize) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        self.values_sent.fetch_add(values, Ordering::Relaxed);
    }

    pub fn record_receive(&self, values: usize) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
        self.values_received.fetch_add(values, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> TransportStats {
        TransportStats {
            exchanges: self.exchanges.load(Ordering::Relaxed),
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            values_sent: self.values_sent.load(Ordering::Relaxed),
            values_received: self.values_received.load(Ordering::Relaxed),
        }
    }
}

// an exchange whose outgoing half has been sent
#[must_use = "an issued exchange has to be waited on"]
pub struct PendingExchange<'a, T: Transport + ?Sized> {
    transport: &'a T,
    peer: usize,
    expected_len: usize,
}

impl<'a, T: Transport + ?Sized> PendingExchange<'a, T> {
    pub fn peer(&self) -> usize {
        self.peer
    }

    pub fn wait(self) -> TransportResult<Vec<Amplitude>> {
        match self.transport.recv(self.peer)? {
            Message::Exchange(data) if data.len() == self.expected_len => Ok(data),
            Message::Exchange(data) => Err(TransportError::LengthMismatch {
                peer: self.peer,
                expected: self.expected_len,
                actual: data.len(),
            }),
            other => Err(TransportError::UnexpectedMessage {
                peer: self.peer,
                expected: "exchange",
                actual: other.kind(),
            }),
        }
    }
}

pub trait Transport: Send {
    fn rank(&self) -> usize;

    fn size(&self) -> usize;

    fn metrics(&self) -> &TransportMetrics;

    // never blocks
    fn send(&self, peer: usize, message: Message) -> TransportResult<()>;

    // blocks until a message from `peer` arrives or the timeout elapses
    fn recv(&self, peer: usize) -> TransportResult<Message>;

    fn is_root(&self) -> bool {
        self.rank() == ROOT
    }

    fn check_peer(&self, peer: usize) -> TransportResult<()> {
        if peer >= self.size() || peer == self.rank() {
            return Err(TransportError::InvalidPeer {
                peer,
                size: self.size(),
            });
        }
        Ok(())
    }

    // sends our half of a symmetric exchange, the reply is collected by wait()
    fn issue_exchange(&self, peer: usize, data: Vec<Amplitude>) -> TransportResult<PendingExchange<'_, Self>> {
        self.check_peer(peer)?;
        let expected_len = data.len();
        self.metrics().record_exchange();
        log::trace!(
            "worker {} exchanging {} amplitudes with {}",
            self.rank(),
            expected_len,
            peer
        );
        self.send(peer, Message::Exchange(data))?;
        Ok(PendingExchange {
            transport: self,
            peer,
            expected_len,
        })
    }

    fn exchange(&self, peer: usize, data: Vec<Amplitude>) -> TransportResult<Vec<Amplitude>> {
        self.issue_exchange(peer, data)?.wait()
    }

    // element-wise sum over all workers, accumulated in rank order on the root
    // so every worker ends up with bitwise identical values
    fn all_reduce_sum(&self, values: &[f64]) -> TransportResult<Vec<f64>> {
        if self.size() == 1 {
            return Ok(values.to_vec());
        }
        if self.is_root() {
            let mut total = values.to_vec();
            for peer in 1..self.size() {
                match self.recv(peer)? {
                    Message::Reduce(part) if part.len() == total.len() => {
                        total.iter_mut().zip(part).for_each(|(t, p)| *t += p);
                    }
                    Message::Reduce(part) => {
                        return Err(TransportError::LengthMismatch {
                            peer,
                            expected: total.len(),
                            actual: part.len(),
                        })
                    }
                    other => {
                        return Err(TransportError::UnexpectedMessage {
                            peer,
                            expected: "reduce",
                            actual: other.kind(),
                        })
                    }
                }
            }
            for peer in 1..self.size() {
                self.send(peer, Message::Reduce(total.clone()))?;
            }
            Ok(total)
        } else {
            self.send(ROOT, Message::Reduce(values.to_vec()))?;
            match self.recv(ROOT)? {
                Message::Reduce(total) if total.len() == values.len() => Ok(total),
                Message::Reduce(total) => Err(TransportError::LengthMismatch {
                    peer: ROOT,
                    expected: values.len(),
                    actual: total.len(),
                }),
                other => Err(TransportError::UnexpectedMessage {
                    peer: ROOT,
                    expected: "reduce",
                    actual: other.kind(),
                }),
            }
        }
    }

    fn all_reduce_scalar(&self, value: f64) -> TransportResult<f64> {
        Ok(self.all_reduce_sum(&[value])?[0])
    }

    fn all_reduce_complex(&self, value: Complex<f64>) -> TransportResult<Complex<f64>> {
        let total = self.all_reduce_sum(&[value.re, value.im])?;
        Ok(Complex::new(total[0], total[1]))
    }

    // root's values reach every worker, the others' arguments are ignored
    fn broadcast(&self, values: Vec<u64>) -> TransportResult<Vec<u64>> {
        if self.size() == 1 {
            return Ok(values);
        }
        if self.is_root() {
            for peer in 1..self.size() {
                self.send(peer, Message::Broadcast(values.clone()))?;
            }
            Ok(values)
        } else {
            match self.recv(ROOT)? {
                Message::Broadcast(values) => Ok(values),
                other => Err(TransportError::UnexpectedMessage {
                    peer: ROOT,
                    expected: "broadcast",
                    actual: other.kind(),
                }),
            }
        }
    }

    // collects every worker's data on the root, in rank order
    fn gather(&self, data: Vec<Amplitude>) -> TransportResult<Option<Vec<Vec<Amplitude>>>> {
        if !self.is_root() {
            self.send(ROOT, Message::Gather(data))?;
            return Ok(None);
        }
        let mut parts = Vec::with_capacity(self.size());
        parts.push(data);
        for peer in 1..self.size() {
            match self.recv(peer)? {
                Message::Gather(part) => parts.push(part),
                other => {
                    return Err(TransportError::UnexpectedMessage {
                        peer,
                        expected: "gather",
                        actual: other.kind(),
                    })
                }
            }
        }
        Ok(Some(parts))
    }

    fn barrier(&self) -> TransportResult<()> {
        if self.size() == 1 {
            return Ok(());
        }
        let expect_barrier = |peer: usize, message: Message| match message {
            Message::Barrier => Ok(()),
            other => Err(TransportError::UnexpectedMessage {
                peer,
                expected: "barrier",
                actual: other.kind(),
            }),
        };
        if self.is_root() {
            for peer in 1..self.size() {
                expect_barrier(peer, self.recv(peer)?)?;
            }
            for peer in 1..self.size() {
                self.send(peer, Message::Barrier)?;
            }
        } else {
            self.send(ROOT, Message::Barrier)?;
            expect_barrier(ROOT, self.recv(ROOT)?)?;
        }
        Ok(())
    }

    fn stats(&self) -> TransportStats {
        self.metrics().snapshot()
    }
}

// in-process transport: one unbounded channel per ordered pair of workers
pub struct ChannelTransport {
    rank: usize,
    senders: Vec<Sender<Message>>,
    receivers: Vec<Receiver<Message>>,
    timeout: Duration,
    metrics: TransportMetrics,
}

impl ChannelTransport {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

    // fully connected group of `size` workers, index i of the result is rank i
    pub fn mesh(size: usize, timeout: Duration) -> Vec<ChannelTransport> {
        let mut senders: Vec<Vec<Sender<Message>>> = (0..size).map(|_| Vec::with_capacity(size)).collect();
        let mut receivers: Vec<Vec<Receiver<Message>>> = (0..size).map(|_| Vec::with_capacity(size)).collect();
        for src in 0..size {
            for dst in 0..size {
                let (tx, rx) = cb::unbounded();
                senders[src].push(tx);
                receivers[dst].push(rx);
            }
        }
        senders
            .into_iter()
            .zip(receivers)
            .enumerate()
            .map(|(rank, (senders, receivers))| ChannelTransport {
                rank,
                senders,
                receivers,
                timeout,
                metrics: TransportMetrics::new(),
            })
            .collect()
    }

    pub fn solo() -> ChannelTransport {
        let mut mesh = Self::mesh(1, Self::DEFAULT_TIMEOUT);
        mesh.remove(0)
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl Transport for ChannelTransport {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.senders.len()
    }

    fn metrics(&self) -> &TransportMetrics {
        &self.metrics
    }

    fn send(&self, peer: usize, message: Message) -> TransportResult<()> {
        self.check_peer(peer)?;
        let len = message.len();
        self.senders[peer]
            .send(message)
            .map_err(|_| TransportError::Disconnected { peer })?;
        self.metrics.record_send(len);
        Ok(())
    }

    fn recv(&self, peer: usize) -> TransportResult<Message> {
        self.check_peer(peer)?;
        let message = self.receivers[peer]
            .recv_timeout(self.timeout)
            .map_err(|e| match e {
                RecvTimeoutError::Timeout => TransportError::Timeout {
                    peer,
                    millis: self.timeout.as_millis() as u64,
                },
                RecvTimeoutError::Disconnected => TransportError::Disconnected { peer },
            })?;
        self.metrics.record_receive(message.len());
        Ok(message)
    }
}
