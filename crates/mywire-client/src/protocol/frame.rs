//! Frame layer: splitting messages into frames and reassembling them.
//!
//! Every frame is a 4-byte [`FrameHeader`] (3-byte length, 1-byte sequence
//! number) followed by at most `max_frame_size` payload bytes. A message of
//! `n` bytes uses `n / max + 1` frames: when `n` is an exact multiple of the
//! maximum the last frame is empty, which is how the reader tells "message
//! ends at the boundary" from "message continues".
//!
//! Neither type performs I/O. [`MessageWriter`] hands out the next chunk to
//! write and is told how many bytes went out; [`MessageReader`] is given
//! the bytes that came in. The blocking and async drivers share both.

use std::ops::Range;

use mywire_core::{Error, ProtocolErrorKind, Result};

use super::writer::PacketWriter;
use super::{FrameHeader, MAX_PACKET_SIZE};

#[allow(clippy::cast_possible_truncation)]
fn put_header(buffer: &mut [u8], at: usize, len: usize, sequence_id: u8) {
    let header = FrameHeader {
        payload_length: len as u32,
        sequence_id,
    };
    buffer[at..at + FrameHeader::SIZE].copy_from_slice(&header.to_bytes());
}

/// Resumable writer for one (or two pipelined) messages.
///
/// The message body is serialized once, behind [`FrameHeader::SIZE`]
/// reserved bytes. Each frame header is then written in place just before
/// the payload slice it describes, overwriting bytes that were already sent,
/// so the chunk for a frame is always contiguous and no payload byte is
/// copied after serialization.
#[derive(Debug)]
pub struct MessageWriter {
    buffer: Vec<u8>,
    max_frame_size: usize,
    seqnum: u8,
    // Next payload byte that has not been framed yet.
    offset: usize,
    chunk: Range<usize>,
    frames_left: usize,
}

impl Default for MessageWriter {
    fn default() -> Self {
        Self::new(MAX_PACKET_SIZE)
    }
}

impl MessageWriter {
    pub fn new(max_frame_size: usize) -> Self {
        Self {
            buffer: Vec::new(),
            max_frame_size: max_frame_size.clamp(1, MAX_PACKET_SIZE),
            seqnum: 0,
            offset: FrameHeader::SIZE,
            chunk: 0..0,
            frames_left: 0,
        }
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    /// Serialize a message with `serialize` and prepare its first frame.
    ///
    /// Any partially written previous message is discarded.
    pub fn prepare_write<F>(&mut self, seqnum: u8, serialize: F)
    where
        F: FnOnce(&mut PacketWriter<'_>),
    {
        self.buffer.clear();
        self.buffer.resize(FrameHeader::SIZE, 0);
        serialize(&mut PacketWriter::new(&mut self.buffer));

        let body_len = self.buffer.len() - FrameHeader::SIZE;
        self.seqnum = seqnum;
        self.offset = FrameHeader::SIZE;
        self.frames_left = body_len / self.max_frame_size + 1;
        tracing::trace!(seqnum, len = body_len, frames = self.frames_left, "message prepared");
        self.prepare_frame();
    }

    /// Serialize two single-frame messages to go out in one write.
    ///
    /// Each message gets its own sequence number. Fails without touching
    /// the writer state if either body does not fit in one frame.
    pub fn prepare_pipelined_write<F, G>(
        &mut self,
        first_seqnum: u8,
        first: F,
        second_seqnum: u8,
        second: G,
    ) -> Result<()>
    where
        F: FnOnce(&mut PacketWriter<'_>),
        G: FnOnce(&mut PacketWriter<'_>),
    {
        let mut buffer = std::mem::take(&mut self.buffer);
        buffer.clear();

        buffer.resize(FrameHeader::SIZE, 0);
        first(&mut PacketWriter::new(&mut buffer));
        let first_len = buffer.len() - FrameHeader::SIZE;

        let second_at = buffer.len();
        buffer.resize(second_at + FrameHeader::SIZE, 0);
        second(&mut PacketWriter::new(&mut buffer));
        let second_len = buffer.len() - second_at - FrameHeader::SIZE;

        if first_len >= self.max_frame_size || second_len >= self.max_frame_size {
            buffer.clear();
            self.buffer = buffer;
            self.chunk = 0..0;
            self.frames_left = 0;
            return Err(Error::protocol(
                ProtocolErrorKind::MessageTooLarge,
                "pipelined messages must each fit in a single frame",
            ));
        }

        put_header(&mut buffer, 0, first_len, first_seqnum);
        put_header(&mut buffer, second_at, second_len, second_seqnum);
        self.chunk = 0..buffer.len();
        self.offset = buffer.len();
        self.buffer = buffer;
        self.frames_left = 0;
        self.seqnum = second_seqnum.wrapping_add(1);
        Ok(())
    }

    fn prepare_frame(&mut self) {
        let size = (self.buffer.len() - self.offset).min(self.max_frame_size);
        let header_at = self.offset - FrameHeader::SIZE;
        put_header(&mut self.buffer, header_at, size, self.seqnum);
        self.chunk = header_at..self.offset + size;
        self.offset += size;
        self.frames_left -= 1;
        self.seqnum = self.seqnum.wrapping_add(1);
    }

    /// Bytes that must be written next.
    pub fn current_chunk(&self) -> &[u8] {
        &self.buffer[self.chunk.clone()]
    }

    /// Record that `written` bytes of the current chunk were sent.
    pub fn resume(&mut self, written: usize) {
        debug_assert!(written <= self.chunk.len());
        self.chunk.start = (self.chunk.start + written).min(self.chunk.end);
        if self.chunk.is_empty() && self.frames_left > 0 {
            self.prepare_frame();
        }
    }

    /// Has every frame been written?
    pub fn done(&self) -> bool {
        self.chunk.is_empty() && self.frames_left == 0
    }

    /// Sequence number following the last prepared frame.
    pub fn next_seqnum(&self) -> u8 {
        self.seqnum
    }
}

/// Reassembles frames read from the transport into messages.
///
/// Raw bytes are appended through [`prepare_buffer`](Self::prepare_buffer)
/// and [`commit`](Self::commit). [`try_parse`](Self::try_parse) consumes as
/// many whole frames as are available, checking each sequence number, and
/// reports when a full message is ready in [`message`](Self::message).
#[derive(Debug)]
pub struct MessageReader {
    buffer: Vec<u8>,
    start: usize,
    end: usize,
    message: Vec<u8>,
    message_ready: bool,
    max_frame_size: usize,
    max_message_size: usize,
    read_size: usize,
}

impl Default for MessageReader {
    fn default() -> Self {
        Self::new(8192, usize::MAX)
    }
}

impl MessageReader {
    pub fn new(read_size: usize, max_message_size: usize) -> Self {
        Self::with_max_frame_size(read_size, max_message_size, MAX_PACKET_SIZE)
    }

    pub fn with_max_frame_size(
        read_size: usize,
        max_message_size: usize,
        max_frame_size: usize,
    ) -> Self {
        Self {
            buffer: Vec::new(),
            start: 0,
            end: 0,
            message: Vec::new(),
            message_ready: false,
            max_frame_size: max_frame_size.clamp(1, MAX_PACKET_SIZE),
            max_message_size,
            read_size: read_size.max(FrameHeader::SIZE),
        }
    }

    /// Drop all buffered data, e.g. after a fatal error.
    pub fn reset(&mut self) {
        self.start = 0;
        self.end = 0;
        self.message.clear();
        self.message_ready = false;
    }

    /// The last complete message.
    pub fn message(&self) -> &[u8] {
        &self.message
    }

    pub fn message_ready(&self) -> bool {
        self.message_ready
    }

    /// Free space to read into. Always at least one byte.
    pub fn prepare_buffer(&mut self) -> &mut [u8] {
        if self.start == self.end {
            self.start = 0;
            self.end = 0;
        } else if self.start > 0 {
            self.buffer.copy_within(self.start..self.end, 0);
            self.end -= self.start;
            self.start = 0;
        }
        let wanted = self.end + self.read_size.max(self.pending_frame_bytes());
        if self.buffer.len() < wanted {
            self.buffer.resize(wanted, 0);
        }
        &mut self.buffer[self.end..]
    }

    /// Record that `n` bytes were read into the buffer from `prepare_buffer`.
    pub fn commit(&mut self, n: usize) {
        self.end = (self.end + n).min(self.buffer.len());
    }

    // Bytes still missing for the frame at the head of the buffer.
    fn pending_frame_bytes(&self) -> usize {
        let available = self.end - self.start;
        if available < FrameHeader::SIZE {
            return FrameHeader::SIZE - available;
        }
        let header = self.header_at(self.start);
        (FrameHeader::SIZE + header.payload_length as usize).saturating_sub(available)
    }

    fn header_at(&self, at: usize) -> FrameHeader {
        let mut bytes = [0u8; FrameHeader::SIZE];
        bytes.copy_from_slice(&self.buffer[at..at + FrameHeader::SIZE]);
        FrameHeader::from_bytes(&bytes)
    }

    /// Consume buffered frames. Returns `true` once a full message is ready.
    ///
    /// `seqnum` is the sequence number expected for the next frame and is
    /// advanced past every frame consumed.
    pub fn try_parse(&mut self, seqnum: &mut u8) -> Result<bool> {
        if self.message_ready {
            self.message.clear();
            self.message_ready = false;
        }

        while self.end - self.start >= FrameHeader::SIZE {
            let header = self.header_at(self.start);
            let len = header.payload_length as usize;
            if self.end - self.start < FrameHeader::SIZE + len {
                break;
            }
            if header.sequence_id != *seqnum {
                return Err(Error::protocol(
                    ProtocolErrorKind::SequenceNumberMismatch,
                    format!(
                        "expected frame sequence number {}, got {}",
                        *seqnum, header.sequence_id
                    ),
                ));
            }
            if self.message.len() + len > self.max_message_size {
                return Err(Error::protocol(
                    ProtocolErrorKind::MessageTooLarge,
                    format!(
                        "message exceeds the {} byte limit",
                        self.max_message_size
                    ),
                ));
            }

            let payload = self.start + FrameHeader::SIZE;
            self.message
                .extend_from_slice(&self.buffer[payload..payload + len]);
            self.start = payload + len;
            *seqnum = seqnum.wrapping_add(1);
            tracing::trace!(seqnum = header.sequence_id, len, "frame read");

            if len < self.max_frame_size {
                self.message_ready = true;
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Is another complete message already sitting in the buffer?
    ///
    /// Only meaningful between messages, i.e. after `try_parse` returned
    /// `true`.
    pub fn has_buffered_message(&self) -> bool {
        let mut at = self.start;
        while self.end - at >= FrameHeader::SIZE {
            let len = self.header_at(at).payload_length as usize;
            if self.end - at < FrameHeader::SIZE + len {
                return false;
            }
            if len < self.max_frame_size {
                return true;
            }
            at += FrameHeader::SIZE + len;
        }
        false
    }
}
