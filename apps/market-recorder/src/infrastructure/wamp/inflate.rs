//! `permessage-deflate` Read Path
//!
//! The WebSocket codec rejects any frame with RSV1 set, so compressed
//! messages are inflated underneath it. [`InflatingStream`] wraps the
//! (possibly TLS) byte stream:
//!
//! - bytes up to the end of the HTTP upgrade response pass through
//!   unchanged, and never share a read with the first frame
//! - once [`InflatingStream::enable`] is called, every server frame is
//!   parsed; a compressed message (RSV1 on its first frame) is reassembled,
//!   inflated per RFC 7692 and re-emitted as one uncompressed final frame
//! - control frames and uncompressed messages are forwarded as received
//!
//! Writes pass straight through. Outgoing messages are never compressed,
//! which RFC 7692 permits.

use std::io::{self, Cursor};
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use flate2::{Decompress, FlushDecompress, Status};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio_tungstenite::tungstenite::protocol::frame::FrameHeader;
use tokio_tungstenite::tungstenite::protocol::frame::coding::{Data, OpCode};

/// Trailer stripped by the sender from every compressed message.
const DEFLATE_TAIL: [u8; 4] = [0x00, 0x00, 0xff, 0xff];

const HEAD_END: &[u8; 4] = b"\r\n\r\n";
const READ_CHUNK: usize = 8 * 1024;
const INFLATE_CHUNK: usize = 16 * 1024;

/// Compressed message whose final fragment has not arrived yet.
struct PendingMessage {
    opcode: OpCode,
    payload: Vec<u8>,
}

/// Byte stream that inflates compressed server frames.
pub struct InflatingStream<S> {
    inner: S,
    limit: usize,
    head_matched: usize,
    head_done: bool,
    inflater: Option<Decompress>,
    pending: Option<PendingMessage>,
    raw: Vec<u8>,
    ready: Vec<u8>,
    ready_pos: usize,
}

impl<S> InflatingStream<S> {
    /// Wrap `inner`. Frames and inflated messages larger than `limit` bytes
    /// are rejected.
    pub const fn new(inner: S, limit: usize) -> Self {
        Self {
            inner,
            limit,
            head_matched: 0,
            head_done: false,
            inflater: None,
            pending: None,
            raw: Vec::new(),
            ready: Vec::new(),
            ready_pos: 0,
        }
    }

    /// Start inflating compressed frames. Called once the server accepted
    /// the offer, before the first frame is read.
    pub fn enable(&mut self) {
        if self.inflater.is_none() {
            self.inflater = Some(Decompress::new(false));
        }
    }

    /// Move processed bytes from `raw` to `ready`. Returns whether anything
    /// became readable.
    fn process(&mut self) -> io::Result<bool> {
        if !self.head_done {
            return Ok(self.take_head());
        }
        if self.inflater.is_none() {
            let produced = !self.raw.is_empty();
            self.ready.append(&mut self.raw);
            return Ok(produced);
        }

        let mut produced = false;
        while let Some((header, header_len, payload_len)) = self.next_header()? {
            let end = header_len + payload_len;
            let frame: Vec<u8> = self.raw.drain(..end).collect();
            produced |= self.handle_frame(&header, &frame, header_len)?;
        }
        Ok(produced)
    }

    /// Forward the upgrade response, stopping right after its blank line.
    fn take_head(&mut self) -> bool {
        let mut taken = 0;
        for &byte in &self.raw {
            taken += 1;
            self.head_matched = if byte == HEAD_END[self.head_matched] {
                self.head_matched + 1
            } else if byte == HEAD_END[0] {
                1
            } else {
                0
            };
            if self.head_matched == HEAD_END.len() {
                self.head_done = true;
                break;
            }
        }
        self.ready.extend(self.raw.drain(..taken));
        taken > 0
    }

    /// Parse the next frame header if the whole frame is buffered.
    fn next_header(&self) -> io::Result<Option<(FrameHeader, usize, usize)>> {
        let mut cursor = Cursor::new(self.raw.as_slice());
        let Some((header, length)) = FrameHeader::parse(&mut cursor).map_err(invalid_data)? else {
            return Ok(None);
        };
        let header_len = usize::try_from(cursor.position()).map_err(invalid_data)?;
        let payload_len = usize::try_from(length)
            .ok()
            .filter(|len| *len <= self.limit)
            .ok_or_else(|| invalid_data(format!("frame of {length} bytes exceeds limit")))?;

        if self.raw.len() < header_len + payload_len {
            return Ok(None);
        }
        Ok(Some((header, header_len, payload_len)))
    }

    fn handle_frame(
        &mut self,
        header: &FrameHeader,
        frame: &[u8],
        header_len: usize,
    ) -> io::Result<bool> {
        if self.pending.is_some()
            && matches!(header.opcode, OpCode::Data(Data::Text | Data::Binary))
        {
            return Err(invalid_data("new message before the compressed one finished"));
        }

        let compressed_start = header.rsv1
            && header.mask.is_none()
            && matches!(header.opcode, OpCode::Data(Data::Text | Data::Binary));
        let continues_pending = self.pending.is_some()
            && header.mask.is_none()
            && header.opcode == OpCode::Data(Data::Continue);

        if !compressed_start && !continues_pending {
            self.ready.extend_from_slice(frame);
            return Ok(true);
        }

        if continues_pending && header.rsv1 {
            return Err(invalid_data("RSV1 set on a continuation frame"));
        }

        let payload = &frame[header_len..];
        let mut pending = self.pending.take().unwrap_or(PendingMessage {
            opcode: header.opcode,
            payload: Vec::new(),
        });
        if pending.payload.len() + payload.len() > self.limit {
            return Err(invalid_data("compressed message exceeds limit"));
        }
        pending.payload.extend_from_slice(payload);

        if !header.is_final {
            self.pending = Some(pending);
            return Ok(false);
        }

        let inflated = self.inflate(&pending.payload)?;
        let out = FrameHeader {
            is_final: true,
            rsv1: false,
            rsv2: header.rsv2,
            rsv3: header.rsv3,
            opcode: pending.opcode,
            mask: None,
        };
        out.format(inflated.len() as u64, &mut self.ready)
            .map_err(invalid_data)?;
        self.ready.extend_from_slice(&inflated);
        Ok(true)
    }

    fn inflate(&mut self, compressed: &[u8]) -> io::Result<Vec<u8>> {
        let limit = self.limit;
        let inflater = self
            .inflater
            .as_mut()
            .ok_or_else(|| invalid_data("inflate requested while disabled"))?;

        let mut data = Vec::with_capacity(compressed.len() + DEFLATE_TAIL.len());
        data.extend_from_slice(compressed);
        data.extend_from_slice(&DEFLATE_TAIL);

        let mut input = data.as_slice();
        let mut out = Vec::with_capacity(INFLATE_CHUNK);
        loop {
            if out.len() == out.capacity() {
                if out.len() >= limit {
                    return Err(invalid_data("inflated message exceeds limit"));
                }
                out.reserve(INFLATE_CHUNK);
            }

            let before_in = inflater.total_in();
            let before_out = out.len();
            let status = inflater
                .decompress_vec(input, &mut out, FlushDecompress::Sync)
                .map_err(invalid_data)?;
            let read = usize::try_from(inflater.total_in() - before_in).map_err(invalid_data)?;
            input = &input[read..];

            if status == Status::StreamEnd {
                inflater.reset(false);
                break;
            }
            if read == 0 && out.len() == before_out {
                if input.is_empty() {
                    break;
                }
                return Err(invalid_data("deflate stream stalled"));
            }
            if input.is_empty() && out.len() < out.capacity() {
                break;
            }
        }

        if out.len() > limit {
            return Err(invalid_data("inflated message exceeds limit"));
        }
        Ok(out)
    }
}

fn invalid_data(error: impl ToString) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, error.to_string())
}

impl<S: AsyncRead + Unpin> AsyncRead for InflatingStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        loop {
            if this.ready_pos < this.ready.len() {
                let n = buf.remaining().min(this.ready.len() - this.ready_pos);
                buf.put_slice(&this.ready[this.ready_pos..this.ready_pos + n]);
                this.ready_pos += n;
                if this.ready_pos == this.ready.len() {
                    this.ready.clear();
                    this.ready_pos = 0;
                }
                return Poll::Ready(Ok(()));
            }

            if this.process()? {
                continue;
            }

            let mut chunk = [0_u8; READ_CHUNK];
            let mut read = ReadBuf::new(&mut chunk);
            ready!(Pin::new(&mut this.inner).poll_read(cx, &mut read))?;
            if read.filled().is_empty() {
                // EOF: hand over any partial frame so the codec sees the truncation.
                if this.raw.is_empty() {
                    return Poll::Ready(Ok(()));
                }
                this.ready.append(&mut this.raw);
                continue;
            }
            this.raw.extend_from_slice(read.filled());
        }
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for InflatingStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}
