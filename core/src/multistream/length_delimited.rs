// Copyright 2017 Parity Technologies (UK) Ltd.
//
// Permission is hereby granted, free of charge, to any person obtaining a
// copy of this software and associated documentation files (the "Software"),
// to deal in the Software without restriction, including without limitation
// the rights to use, copy, modify, merge, publish, distribute, sublicense,
// and/or sell copies of the Software, and to permit persons to whom the
// Software is furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in
// all copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS
// OR IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
// FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
// DEALINGS IN THE SOFTWARE.

use bytes::{BufMut as _, Bytes, BytesMut};
use std::{convert::TryFrom as _, io, u16};

use super::{ReadEx, WriteEx};

const MAX_LEN_BYTES: u16 = 2;
const MAX_FRAME_SIZE: u16 = (1 << (MAX_LEN_BYTES * 8 - MAX_LEN_BYTES)) - 1;
const DEFAULT_BUFFER_SIZE: usize = 64;

/// Reads and writes unsigned-varint length-delimited frames on top of an
/// underlying `ReadEx + WriteEx` I/O resource.
///
/// We purposely only support a frame sizes up to 16KiB (2 bytes unsigned varint
/// frame length). Frames mostly consist in a short protocol name, which is highly
/// unlikely to be more than 16KiB long.
///
/// Frames are read byte-exact: nothing past the end of the last frame is
/// consumed from the inner resource, so it can be handed over as-is once
/// negotiation is complete.
#[derive(Debug)]
pub struct LengthDelimited<R> {
    /// The inner I/O resource.
    inner: R,
    /// Read buffer for a single incoming unsigned-varint length-delimited frame.
    read_buffer: BytesMut,
    /// Write buffer for outgoing unsigned-varint length-delimited frames.
    write_buffer: BytesMut,
}

impl<R: ReadEx + WriteEx + Send> LengthDelimited<R> {
    /// Creates a new I/O resource for reading and writing unsigned-varint
    /// length delimited frames.
    pub fn new(inner: R) -> LengthDelimited<R> {
        LengthDelimited {
            inner,
            read_buffer: BytesMut::with_capacity(DEFAULT_BUFFER_SIZE),
            write_buffer: BytesMut::with_capacity(DEFAULT_BUFFER_SIZE + MAX_LEN_BYTES as usize),
        }
    }

    /// Drops the [`LengthDelimited`] resource, yielding the underlying I/O stream.
    ///
    /// Frames queued by [`start_send`](LengthDelimited::start_send) and not
    /// yet flushed are lost.
    pub fn into_inner(self) -> R {
        self.inner
    }

    pub async fn recv_message(&mut self) -> io::Result<Bytes> {
        recv_frame(&mut self.inner, &mut self.read_buffer).await
    }

    /// Queues a frame without writing it.
    pub fn start_send(&mut self, buf: &[u8]) -> io::Result<()> {
        encode_frame(buf, &mut self.write_buffer)
    }

    /// Writes every queued frame followed by `payload` with a single write.
    pub async fn flush_with(&mut self, payload: &[u8]) -> io::Result<()> {
        self.write_buffer.extend_from_slice(payload);
        let result = self.inner.write_all2(&self.write_buffer).await;
        self.write_buffer.clear();
        result?;
        self.inner.flush2().await
    }

    pub async fn send_message(&mut self, buf: &[u8]) -> io::Result<()> {
        self.start_send(buf)?;
        self.flush_with(&[]).await
    }
}

/// Appends `buf` to `dest` as one length-prefixed frame.
pub(crate) fn encode_frame(buf: &[u8], dest: &mut BytesMut) -> io::Result<()> {
    let len = match u16::try_from(buf.len()) {
        Ok(len) if len <= MAX_FRAME_SIZE => len,
        _ => {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "Maximum frame size exceeded.",
            ))
        }
    };
    let mut uvi_buf = unsigned_varint::encode::u16_buffer();
    let uvi_len = unsigned_varint::encode::u16(len, &mut uvi_buf);
    dest.reserve(len as usize + uvi_len.len());
    dest.put_slice(uvi_len);
    dest.put_slice(buf);
    Ok(())
}

async fn read_unsigned_varint<R: ReadEx + Send>(inner: &mut R) -> io::Result<u16> {
    let mut b = unsigned_varint::encode::u16_buffer();
    for i in 0..b.len() {
        inner.read_exact2(&mut b[i..i + 1]).await?;
        if unsigned_varint::decode::is_last(b[i]) {
            return Ok(unsigned_varint::decode::u16(&b[..=i])
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?
                .0);
        }
    }
    Err(io::Error::new(
        io::ErrorKind::InvalidData,
        unsigned_varint::decode::Error::Overflow,
    ))
}

/// Reads exactly one length-prefixed frame from `inner`.
pub(crate) async fn recv_frame<R: ReadEx + Send>(inner: &mut R, buf: &mut BytesMut) -> io::Result<Bytes> {
    let len = read_unsigned_varint(inner).await?;
    if len > MAX_FRAME_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "Maximum frame length exceeded",
        ));
    }
    buf.clear();
    buf.resize(len as usize, 0);
    if len > 0 {
        inner.read_exact2(buf).await?;
    }
    Ok(buf.split().freeze())
}
