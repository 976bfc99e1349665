//! Stream framing codec and the framer/deframer components that hold one.
//!
//! Frame layout (big-endian):
//!
//! ```text
//! +-------------+-------------+----------------+-----------+
//! | 0xDEADBEEF  | size: u32   | payload[size]  | crc32     |
//! +-------------+-------------+----------------+-----------+
//! ```
//!
//! The CRC covers the header and payload.
//!
//! A deframer holds at most [`DEFRAMED_FRAME_CAPACITY`] decoded frames, one
//! per deframer buffer of the buffer manager. Frames decoded while it is full
//! are dropped and counted.

use super::{Component, ComponentCore};
use crate::sizing::{BUFFERS_PER_CLASS, FRAME_HEADER_SIZE, HASH_DIGEST_LENGTH};
use heapless::Deque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tracing::{debug, trace, warn};

pub const START_WORD: u32 = 0xDEAD_BEEF;

pub const DEFRAMED_FRAME_CAPACITY: usize = BUFFERS_PER_CLASS as usize;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("`{0}` has no framing protocol bound")]
    NotConfigured(String),
    #[error("payload of {len} bytes exceeds the {max} byte limit")]
    PayloadTooLarge { len: usize, max: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeframeStatus {
    Frame { payload: Vec<u8>, consumed: usize },
    /// At least this many more bytes are needed.
    NeedMore(usize),
    /// Bytes at the front of the buffer cannot start a valid frame.
    Invalid { skip: usize },
}

pub trait FramingProtocol: Send {
    fn frame(&self, payload: &[u8]) -> Result<Vec<u8>, FrameError>;
}

pub trait DeframingProtocol: Send {
    fn deframe(&self, data: &[u8]) -> DeframeStatus;
}

#[derive(Debug, Clone, Copy)]
pub struct FprimeFraming {
    max_payload: usize,
}

impl FprimeFraming {
    pub fn new(max_payload: usize) -> Self {
        Self { max_payload }
    }
}

impl FramingProtocol for FprimeFraming {
    fn frame(&self, payload: &[u8]) -> Result<Vec<u8>, FrameError> {
        if payload.len() > self.max_payload {
            return Err(FrameError::PayloadTooLarge {
                len: payload.len(),
                max: self.max_payload,
            });
        }
        let size = u32::try_from(payload.len()).map_err(|_| FrameError::PayloadTooLarge {
            len: payload.len(),
            max: self.max_payload,
        })?;
        let mut frame = Vec::with_capacity(FRAME_HEADER_SIZE + payload.len() + HASH_DIGEST_LENGTH);
        frame.extend_from_slice(&START_WORD.to_be_bytes());
        frame.extend_from_slice(&size.to_be_bytes());
        frame.extend_from_slice(payload);
        let crc = crc32fast::hash(&frame);
        frame.extend_from_slice(&crc.to_be_bytes());
        Ok(frame)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FprimeDeframing {
    max_payload: usize,
}

impl FprimeDeframing {
    pub fn new(max_payload: usize) -> Self {
        Self { max_payload }
    }
}

fn read_u32(bytes: &[u8]) -> u32 {
    let mut word = [0u8; 4];
    word.copy_from_slice(&bytes[..4]);
    u32::from_be_bytes(word)
}

impl DeframingProtocol for FprimeDeframing {
    fn deframe(&self, data: &[u8]) -> DeframeStatus {
        if data.len() < FRAME_HEADER_SIZE {
            return DeframeStatus::NeedMore(FRAME_HEADER_SIZE - data.len());
        }
        if read_u32(&data[0..4]) != START_WORD {
            return DeframeStatus::Invalid { skip: 1 };
        }
        let size = read_u32(&data[4..8]) as usize;
        if size > self.max_payload {
            return DeframeStatus::Invalid { skip: 1 };
        }
        let total = FRAME_HEADER_SIZE + size + HASH_DIGEST_LENGTH;
        if data.len() < total {
            return DeframeStatus::NeedMore(total - data.len());
        }
        let body_end = FRAME_HEADER_SIZE + size;
        let expected = read_u32(&data[body_end..total]);
        if crc32fast::hash(&data[..body_end]) != expected {
            return DeframeStatus::Invalid { skip: 1 };
        }
        DeframeStatus::Frame {
            payload: data[FRAME_HEADER_SIZE..body_end].to_vec(),
            consumed: total,
        }
    }
}

pub struct Framer {
    core: ComponentCore,
    protocol: Option<Box<dyn FramingProtocol>>,
    frames_sent: u64,
}

impl std::fmt::Debug for Framer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Framer")
            .field("core", &self.core)
            .field("configured", &self.protocol.is_some())
            .field("frames_sent", &self.frames_sent)
            .finish()
    }
}

impl Framer {
    pub fn new(name: &str) -> Self {
        Self {
            core: ComponentCore::new(name),
            protocol: None,
            frames_sent: 0,
        }
    }

    pub fn setup(&mut self, protocol: Box<dyn FramingProtocol>) {
        self.protocol = Some(protocol);
    }

    pub fn is_configured(&self) -> bool {
        self.protocol.is_some()
    }

    pub fn frame(&mut self, payload: &[u8]) -> Result<Vec<u8>, FrameError> {
        let protocol = self
            .protocol
            .as_ref()
            .ok_or_else(|| FrameError::NotConfigured(self.core.name().to_string()))?;
        let frame = protocol.frame(payload)?;
        self.frames_sent += 1;
        Ok(frame)
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent
    }
}

impl Component for Framer {
    fn core(&self) -> &ComponentCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ComponentCore {
        &mut self.core
    }
}

#[derive(Default)]
struct DeframerState {
    protocol: Option<Box<dyn DeframingProtocol>>,
    pending: Vec<u8>,
    frames: Deque<Vec<u8>, DEFRAMED_FRAME_CAPACITY>,
    decoded: u64,
    discarded_bytes: u64,
    dropped_frames: u64,
}

impl DeframerState {
    fn receive(&mut self, name: &str, bytes: &[u8]) -> usize {
        let Some(protocol) = self.protocol.as_ref() else {
            warn!(component = name, len = bytes.len(), "data received before a deframing protocol was bound");
            return 0;
        };
        self.pending.extend_from_slice(bytes);

        let mut decoded = 0;
        loop {
            match protocol.deframe(&self.pending) {
                DeframeStatus::Frame { payload, consumed } => {
                    self.pending.drain(..consumed);
                    decoded += 1;
                    if self.frames.push_back(payload).is_err() {
                        self.dropped_frames += 1;
                        warn!(component = name, "deframed frame queue full, frame dropped");
                    }
                }
                DeframeStatus::Invalid { skip } => {
                    let skip = skip.min(self.pending.len());
                    self.pending.drain(..skip);
                    self.discarded_bytes += skip as u64;
                }
                DeframeStatus::NeedMore(needed) => {
                    trace!(component = name, needed, "waiting for more data");
                    break;
                }
            }
        }
        self.decoded += decoded as u64;
        decoded
    }
}

/// Handle the socket driver uses to push received bytes into a deframer.
#[derive(Clone)]
pub struct RecvPort {
    owner: String,
    state: Arc<Mutex<DeframerState>>,
}

impl std::fmt::Debug for RecvPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecvPort").field("owner", &self.owner).finish()
    }
}

impl RecvPort {
    pub fn deliver(&self, bytes: &[u8]) -> usize {
        let decoded = lock(&self.state).receive(&self.owner, bytes);
        if decoded > 0 {
            debug!(component = %self.owner, decoded, "frames decoded");
        }
        decoded
    }
}

fn lock(state: &Mutex<DeframerState>) -> MutexGuard<'_, DeframerState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Reassembles frames from the byte stream of a socket driver. Runs on the
/// driver's thread through its [`RecvPort`].
pub struct Deframer {
    core: ComponentCore,
    state: Arc<Mutex<DeframerState>>,
}

impl std::fmt::Debug for Deframer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Deframer")
            .field("core", &self.core)
            .field("configured", &self.is_configured())
            .finish()
    }
}

impl Deframer {
    pub fn new(name: &str) -> Self {
        Self {
            core: ComponentCore::new(name),
            state: Arc::new(Mutex::new(DeframerState::default())),
        }
    }

    pub fn setup(&mut self, protocol: Box<dyn DeframingProtocol>) {
        lock(&self.state).protocol = Some(protocol);
    }

    pub fn is_configured(&self) -> bool {
        lock(&self.state).protocol.is_some()
    }

    pub fn recv_port(&self) -> RecvPort {
        RecvPort {
            owner: self.core.name().to_string(),
            state: Arc::clone(&self.state),
        }
    }

    /// Removes and returns every queued frame, oldest first.
    pub fn take_frames(&self) -> Vec<Vec<u8>> {
        let mut state = lock(&self.state);
        let mut frames = Vec::with_capacity(state.frames.len());
        while let Some(frame) = state.frames.pop_front() {
            frames.push(frame);
        }
        frames
    }

    pub fn queued(&self) -> usize {
        lock(&self.state).frames.len()
    }

    pub fn dropped_frames(&self) -> u64 {
        lock(&self.state).dropped_frames
    }

    pub fn decoded(&self) -> u64 {
        lock(&self.state).decoded
    }

    pub fn discarded_bytes(&self) -> u64 {
        lock(&self.state).discarded_bytes
    }
}

impl Component for Deframer {
    fn core(&self) -> &ComponentCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ComponentCore {
        &mut self.core
    }

    fn initialize(&mut self, _queue_depth: usize, instance: u32) {
        self.core.initialize(instance);
        let mut state = lock(&self.state);
        state.pending.clear();
        state.frames.clear();
        state.decoded = 0;
        state.discarded_bytes = 0;
        state.dropped_frames = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sizing::{ResourceSizingSpec, SizeClass, FRAMER_BUFFER_SIZE};

    fn codec() -> (FprimeFraming, FprimeDeframing) {
        let max = ResourceSizingSpec::reference().largest_payload(SizeClass::Deframer);
        (FprimeFraming::new(max), FprimeDeframing::new(max))
    }

    #[test]
    fn test_largest_payload_fills_framer_bin() {
        let (framing, _) = codec();
        let payload = vec![0xAB; ResourceSizingSpec::reference().largest_payload(SizeClass::Deframer)];
        let frame = framing.frame(&payload).unwrap();
        assert_eq!(frame.len(), FRAMER_BUFFER_SIZE);
    }

    #[test]
    fn test_oversized_payload_rejected() {
        let (framing, _) = codec();
        let payload = vec![0; 517];
        assert!(matches!(framing.frame(&payload), Err(FrameError::PayloadTooLarge { len: 517, .. })));
    }

    #[test]
    fn test_deframer_handles_split_delivery_and_noise() {
        let (framing, deframing) = codec();
        let mut deframer = Deframer::new("a_deframer");
        deframer.setup(Box::new(deframing));
        let port = deframer.recv_port();

        let frame = framing.frame(b"CMD_NO_OP").unwrap();
        let mut stream = vec![0x00, 0x11];
        stream.extend_from_slice(&frame);

        let (head, tail) = stream.split_at(7);
        assert_eq!(port.deliver(head), 0);
        assert_eq!(port.deliver(tail), 1);
        assert_eq!(deframer.take_frames(), vec![b"CMD_NO_OP".to_vec()]);
        assert_eq!(deframer.discarded_bytes(), 2);
    }

    #[test]
    fn test_corrupt_checksum_discarded() {
        let (framing, deframing) = codec();
        let mut deframer = Deframer::new("a_deframer");
        deframer.setup(Box::new(deframing));

        let mut frame = framing.frame(b"telemetry").unwrap();
        let last = frame.len() - 1;
        frame[last] ^= 0xFF;
        assert_eq!(deframer.recv_port().deliver(&frame), 0);
        assert_eq!(deframer.decoded(), 0);
    }

    #[test]
    fn test_full_frame_queue_drops_newest() {
        let (framing, deframing) = codec();
        let mut deframer = Deframer::new("a_hubDeframer");
        deframer.setup(Box::new(deframing));
        let port = deframer.recv_port();

        let mut stream = Vec::new();
        for n in 0..DEFRAMED_FRAME_CAPACITY + 5 {
            stream.extend_from_slice(&framing.frame(&(n as u32).to_be_bytes()).unwrap());
        }
        assert_eq!(port.deliver(&stream), DEFRAMED_FRAME_CAPACITY + 5);
        assert_eq!(deframer.queued(), DEFRAMED_FRAME_CAPACITY);
        assert_eq!(deframer.dropped_frames(), 5);

        let frames = deframer.take_frames();
        assert_eq!(frames.len(), DEFRAMED_FRAME_CAPACITY);
        assert_eq!(frames[0], 0u32.to_be_bytes().to_vec());
        assert_eq!(deframer.queued(), 0);

        // Draining makes room again.
        port.deliver(&framing.frame(b"again").unwrap());
        assert_eq!(deframer.take_frames(), vec![b"again".to_vec()]);
        assert_eq!(deframer.dropped_frames(), 5);
    }

    #[test]
    fn test_unconfigured_framer() {
        let mut framer = Framer::new("a_framer");
        assert!(matches!(framer.frame(b"x"), Err(FrameError::NotConfigured(_))));
        framer.setup(Box::new(codec().0));
        assert!(framer.frame(b"x").is_ok());
        assert_eq!(framer.frames_sent(), 1);
    }
}
