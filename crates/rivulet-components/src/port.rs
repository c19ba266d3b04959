//! Edges and the ports components read and write through.
//!
//! An edge is a crossbeam channel of serialized records followed by exactly
//! one EOF packet. Every blocking wait is sliced into `poll_interval` steps so
//! a cancelled graph is noticed even while a port is blocked.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{
    Receiver, RecvTimeoutError, Select, SendTimeoutError, Sender, TryRecvError,
};
use serde::Serialize;

use rivulet_core::id::EdgeId;
use rivulet_core::record::DataRecord;
use rivulet_core::schema::RecordMetadata;

use crate::cancel::CancellationToken;
use crate::error::{ComponentError, Result};

#[derive(Debug)]
pub enum Packet {
    Data(Vec<u8>),
    Eof,
}

/// Counters of what a writer pushed into an edge.
#[derive(Debug, Default)]
pub struct EdgeStats {
    records: AtomicU64,
    bytes: AtomicU64,
    eofs: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EdgeCounts {
    pub records: u64,
    pub bytes: u64,
    pub eofs: u64,
}

impl EdgeStats {
    pub fn snapshot(&self) -> EdgeCounts {
        EdgeCounts {
            records: self.records.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
            eofs: self.eofs.load(Ordering::Relaxed),
        }
    }
}

/// Settings every port of a graph shares.
#[derive(Debug, Clone)]
pub struct EdgeEnv {
    pub cancel: CancellationToken,
    pub poll_interval: Duration,
    pub max_record_size: usize,
}

/// Create an edge. `capacity = None` makes it unbounded.
pub fn edge(
    id: EdgeId,
    metadata: Arc<RecordMetadata>,
    capacity: Option<usize>,
    env: &EdgeEnv,
) -> (OutputPort, InputPort, Arc<EdgeStats>) {
    let (tx, rx) = match capacity {
        Some(n) => crossbeam_channel::bounded(n.max(1)),
        None => crossbeam_channel::unbounded(),
    };
    let stats = Arc::new(EdgeStats::default());
    let out = OutputPort {
        id,
        metadata: Arc::clone(&metadata),
        tx,
        env: env.clone(),
        stats: Arc::clone(&stats),
        buf: Vec::new(),
        eof_sent: false,
        disconnected: false,
    };
    let inp = InputPort {
        id,
        metadata,
        rx,
        env: env.clone(),
        eof: false,
        buf: Vec::new(),
    };
    (out, inp, stats)
}

pub struct InputPort {
    id: EdgeId,
    metadata: Arc<RecordMetadata>,
    rx: Receiver<Packet>,
    env: EdgeEnv,
    eof: bool,
    buf: Vec<u8>,
}

impl InputPort {
    pub fn id(&self) -> EdgeId {
        self.id
    }

    pub fn metadata(&self) -> &Arc<RecordMetadata> {
        &self.metadata
    }

    pub fn is_eof(&self) -> bool {
        self.eof
    }

    fn disconnected(&self) -> ComponentError {
        if self.env.cancel.is_cancelled() {
            ComponentError::Stopped
        } else {
            ComponentError::Io(format!("{} closed without EOF", self.id))
        }
    }

    /// Blocking read of the next serialized record into `out`.
    /// `Ok(false)` at EOF, and on every call after it.
    pub fn read_direct(&mut self, out: &mut Vec<u8>) -> Result<bool> {
        if self.eof {
            return Ok(false);
        }
        loop {
            if self.env.cancel.is_cancelled() {
                return Err(ComponentError::Stopped);
            }
            match self.rx.recv_timeout(self.env.poll_interval) {
                Ok(packet) => return self.accept(packet, out),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return Err(self.disconnected()),
            }
        }
    }

    /// Blocking read into a reused record.
    pub fn read(&mut self, record: &mut DataRecord) -> Result<bool> {
        let mut buf = std::mem::take(&mut self.buf);
        let res = match self.read_direct(&mut buf) {
            Ok(true) => record.deserialize_from(&buf).map(|()| true).map_err(Into::into),
            other => other,
        };
        self.buf = buf;
        res
    }

    /// An EOF that arrives after cancellation ends a truncated stream, so it
    /// reads as `Stopped` rather than a clean end.
    fn accept(&mut self, packet: Packet, out: &mut Vec<u8>) -> Result<bool> {
        match packet {
            Packet::Data(bytes) => {
                *out = bytes;
                Ok(true)
            }
            Packet::Eof => {
                self.eof = true;
                if self.env.cancel.is_cancelled() {
                    return Err(ComponentError::Stopped);
                }
                Ok(false)
            }
        }
    }
}

/// Read from whichever of `inputs` has data first.
///
/// Returns the index of the port the record came from, or `None` once every
/// input reached EOF. Components with several inputs use this so one slow
/// input never stalls a producer that feeds another.
pub fn read_any(inputs: &mut [InputPort], out: &mut Vec<u8>) -> Result<Option<usize>> {
    loop {
        let open: Vec<usize> = (0..inputs.len()).filter(|i| !inputs[*i].eof).collect();
        let Some(first) = open.first().copied() else {
            return Ok(None);
        };
        let env = inputs[first].env.clone();
        if env.cancel.is_cancelled() {
            return Err(ComponentError::Stopped);
        }

        let ready = {
            let mut sel = Select::new();
            for i in &open {
                sel.recv(&inputs[*i].rx);
            }
            match sel.ready_timeout(env.poll_interval) {
                Ok(op) => open[op],
                Err(_) => continue,
            }
        };
        let port = &mut inputs[ready];
        match port.rx.try_recv() {
            Ok(packet) => {
                if port.accept(packet, out)? {
                    return Ok(Some(ready));
                }
            }
            Err(TryRecvError::Empty) => continue,
            Err(TryRecvError::Disconnected) => return Err(port.disconnected()),
        }
    }
}

pub struct OutputPort {
    id: EdgeId,
    metadata: Arc<RecordMetadata>,
    tx: Sender<Packet>,
    env: EdgeEnv,
    stats: Arc<EdgeStats>,
    buf: Vec<u8>,
    eof_sent: bool,
    disconnected: bool,
}

impl OutputPort {
    pub fn id(&self) -> EdgeId {
        self.id
    }

    pub fn metadata(&self) -> &Arc<RecordMetadata> {
        &self.metadata
    }

    pub fn eof_sent(&self) -> bool {
        self.eof_sent
    }

    fn send(&mut self, mut packet: Packet) -> Result<()> {
        loop {
            if self.env.cancel.is_cancelled() {
                return Err(ComponentError::Stopped);
            }
            match self.tx.send_timeout(packet, self.env.poll_interval) {
                Ok(()) => return Ok(()),
                Err(SendTimeoutError::Timeout(p)) => packet = p,
                Err(SendTimeoutError::Disconnected(_)) => {
                    // reader is gone; the rest of the stream has nowhere to go
                    self.disconnected = true;
                    return Ok(());
                }
            }
        }
    }

    /// Blocking write of an already serialized record.
    pub fn write_direct(&mut self, bytes: &[u8]) -> Result<()> {
        if self.eof_sent {
            return Err(ComponentError::fatal(format!("write to {} after EOF", self.id)));
        }
        if bytes.len() > self.env.max_record_size {
            return Err(ComponentError::Io(format!(
                "record of {} bytes exceeds the maximum record size of {} bytes",
                bytes.len(),
                self.env.max_record_size
            )));
        }
        if self.disconnected {
            return Ok(());
        }
        self.send(Packet::Data(bytes.to_vec()))?;
        self.stats.records.fetch_add(1, Ordering::Relaxed);
        self.stats.bytes.fetch_add(bytes.len() as u64, Ordering::Relaxed);
        Ok(())
    }

    /// Serialize and write a record. The record may be reused right away.
    pub fn write(&mut self, record: &DataRecord) -> Result<()> {
        let mut buf = std::mem::take(&mut self.buf);
        let res = record
            .serialize_into(&mut buf, self.env.max_record_size)
            .map_err(ComponentError::from)
            .and_then(|()| self.write_direct(&buf));
        self.buf = buf;
        res
    }

    /// Signal end of stream. Only the first call sends anything.
    /// Send EOF. Unlike record writes this ignores cancellation: it blocks
    /// until the reader takes the packet or drops its end of the edge.
    pub fn eof(&mut self) -> Result<()> {
        if self.eof_sent {
            return Ok(());
        }
        self.eof_sent = true;
        if !self.disconnected && self.tx.send(Packet::Eof).is_err() {
            self.disconnected = true;
        }
        self.stats.eofs.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

/// The connected ports of one component, by port index. Unconnected
/// indices hold `None`.
#[derive(Default)]
pub struct Ports {
    inputs: Vec<Option<InputPort>>,
    outputs: Vec<Option<OutputPort>>,
}

impl Ports {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach_input(&mut self, index: usize, port: InputPort) {
        if self.inputs.len() <= index {
            self.inputs.resize_with(index + 1, || None);
        }
        self.inputs[index] = Some(port);
    }

    pub fn attach_output(&mut self, index: usize, port: OutputPort) {
        if self.outputs.len() <= index {
            self.outputs.resize_with(index + 1, || None);
        }
        self.outputs[index] = Some(port);
    }

    /// Number of input slots (the highest connected index + 1).
    pub fn input_slots(&self) -> usize {
        self.inputs.len()
    }

    pub fn output_slots(&self) -> usize {
        self.outputs.len()
    }

    pub fn has_output(&self, index: usize) -> bool {
        matches!(self.outputs.get(index), Some(Some(_)))
    }

    pub fn input(&mut self, index: usize) -> Result<&mut InputPort> {
        self.inputs
            .get_mut(index)
            .and_then(Option::as_mut)
            .ok_or_else(|| ComponentError::config(format!("input port {index} is not connected")))
    }

    /// Move an input out, so two inputs can be read side by side.
    pub fn take_input(&mut self, index: usize) -> Result<InputPort> {
        self.inputs
            .get_mut(index)
            .and_then(Option::take)
            .ok_or_else(|| ComponentError::config(format!("input port {index} is not connected")))
    }

    /// Move out every connected input in port order.
    pub fn take_inputs(&mut self) -> Vec<InputPort> {
        self.inputs.iter_mut().filter_map(Option::take).collect()
    }

    pub fn output(&mut self, index: usize) -> Result<&mut OutputPort> {
        self.outputs
            .get_mut(index)
            .and_then(Option::as_mut)
            .ok_or_else(|| ComponentError::config(format!("output port {index} is not connected")))
    }

    /// Write to every connected output.
    pub fn broadcast(&mut self, record: &DataRecord) -> Result<()> {
        for port in self.outputs.iter_mut().flatten() {
            port.write(record)?;
        }
        Ok(())
    }

    pub fn broadcast_direct(&mut self, bytes: &[u8]) -> Result<()> {
        for port in self.outputs.iter_mut().flatten() {
            port.write_direct(bytes)?;
        }
        Ok(())
    }

    /// EOF on every connected output that has not sent one yet.
    /// EOF on every connected output. Every port is attempted; the first
    /// failure is returned afterwards.
    pub fn broadcast_eof(&mut self) -> Result<()> {
        let mut first_err = None;
        for port in self.outputs.iter_mut().flatten() {
            if let Err(e) = port.eof() {
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}
