use async_trait::async_trait;
use futures::prelude::*;
use futures::{AsyncReadExt, AsyncWriteExt};
use std::io;
use std::io::ErrorKind;

/// Read trait for async/await.
///
/// Implemented for every `futures::io::AsyncRead`, and by hand for the
/// stream types of the host which negotiate before they hand out bytes.
#[async_trait]
pub trait ReadEx {
    /// Reads some bytes from the byte stream.
    ///
    /// On success, returns the total number of bytes read. `Ok(0)` means
    /// either end of stream or an empty `buf`.
    async fn read2(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Reads the exact number of bytes requested.
    ///
    /// Fails with `UnexpectedEof` if the stream ends first.
    async fn read_exact2<'a>(&'a mut self, buf: &'a mut [u8]) -> io::Result<()> {
        let mut buf_piece = buf;
        while !buf_piece.is_empty() {
            let n = self.read2(buf_piece).await?;
            if n == 0 {
                return Err(ErrorKind::UnexpectedEof.into());
            }

            let (_, rest) = buf_piece.split_at_mut(n);
            buf_piece = rest;
        }
        Ok(())
    }
}

/// Write trait for async/await.
#[async_trait]
pub trait WriteEx {
    /// Attempts to write bytes from `buf` into the object.
    ///
    /// On success, returns `Ok(num_bytes_written)`.
    async fn write2(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Writes the entire contents of `buf`.
    async fn write_all2(&mut self, buf: &[u8]) -> io::Result<()> {
        let mut buf_piece = buf;
        while !buf_piece.is_empty() {
            let n = self.write2(buf_piece).await?;
            if n == 0 {
                return Err(ErrorKind::WriteZero.into());
            }

            let (_, rest) = buf_piece.split_at(n);
            buf_piece = rest;
        }
        Ok(())
    }

    /// Flushes the object, ensuring that any buffered data reach their
    /// destination.
    async fn flush2(&mut self) -> io::Result<()>;

    /// Closes the object. The remote end observes end of stream.
    async fn close2(&mut self) -> io::Result<()>;
}

#[async_trait]
impl<T: AsyncRead + Unpin + Send> ReadEx for T {
    async fn read2(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        AsyncReadExt::read(self, buf).await
    }
}

#[async_trait]
impl<T: AsyncWrite + Unpin + Send> WriteEx for T {
    async fn write2(&mut self, buf: &[u8]) -> io::Result<usize> {
        AsyncWriteExt::write(self, buf).await
    }

    async fn flush2(&mut self) -> io::Result<()> {
        AsyncWriteExt::flush(self).await
    }

    async fn close2(&mut self) -> io::Result<()> {
        AsyncWriteExt::close(self).await
    }
}
