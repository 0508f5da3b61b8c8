use bytes::BytesMut;
use memchr::memchr;
use tokio::io::AsyncRead;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWrite;
use tokio::io::AsyncWriteExt;

const DEFAULT_MAX_LINE_LEN: usize = 16 * 1024;

#[derive(Debug)]
pub struct LineReader<R> {
    inner: R,
    buf: BytesMut,
    max_line_len: usize,
}

impl<R> LineReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(8 * 1024),
            max_line_len: DEFAULT_MAX_LINE_LEN,
        }
    }

    pub fn max_line_len(mut self, max: usize) -> Self {
        self.max_line_len = max.max(1);
        self
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    /// Read one line, stripping the trailing `\n` and optional `\r`.
    ///
    /// Returns:
    /// - `Ok(Some(line))` for a line (may be empty),
    /// - `Ok(None)` on clean EOF with no buffered data.
    ///
    /// The wire is a text protocol, so a line that is not valid UTF-8 is an
    /// `InvalidData` error rather than a lossy decode.
    pub async fn read_line(&mut self) -> std::io::Result<Option<String>> {
        loop {
            if let Some(i) = memchr(b'\n', &self.buf) {
                let raw = self.buf.split_to(i + 1);
                let mut end = i;
                if end > 0 && raw[end - 1] == b'\r' {
                    end -= 1;
                }
                let line = std::str::from_utf8(&raw[..end]).map_err(|_| {
                    std::io::Error::new(std::io::ErrorKind::InvalidData, "line is not utf-8")
                })?;
                return Ok(Some(line.to_string()));
            }

            if self.buf.len() > self.max_line_len {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    "line too long",
                ));
            }

            let n = self.inner.read_buf(&mut self.buf).await?;
            if n == 0 {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "eof while reading line",
                ));
            }
        }
    }
}

#[derive(Debug)]
pub struct LineWriter<W> {
    inner: W,
}

impl<W> LineWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: AsyncWrite + Unpin> LineWriter<W> {
    /// Write `line` followed by the terminator, then flush.
    ///
    /// `line` must not itself contain the terminator; a caller that smuggles
    /// one in would inject a second message into the stream.
    pub async fn send_line(&mut self, line: &str) -> std::io::Result<()> {
        debug_assert!(!line.contains('\n'));
        self.inner.write_all(line.as_bytes()).await?;
        self.inner.write_all(b"\n").await?;
        self.inner.flush().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn reads_crlf_and_lf() {
        let (a, b) = tokio::io::duplex(64);
        tokio::spawn(async move {
            let mut b = b;
            b.write_all(b"ID;7\r\nMSG;hello\n").await.unwrap();
        });

        let mut lr = LineReader::new(a);
        assert_eq!(lr.read_line().await.unwrap().unwrap(), "ID;7");
        assert_eq!(lr.read_line().await.unwrap().unwrap(), "MSG;hello");
    }

    #[tokio::test]
    async fn clean_eof_is_none() {
        let (a, b) = tokio::io::duplex(64);
        drop(b);
        let mut lr = LineReader::new(a);
        assert!(lr.read_line().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn eof_mid_line_is_an_error() {
        let (a, b) = tokio::io::duplex(64);
        tokio::spawn(async move {
            let mut b = b;
            b.write_all(b"no terminator").await.unwrap();
        });

        let mut lr = LineReader::new(a);
        let err = lr.read_line().await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn rejects_oversized_line() {
        let (a, b) = tokio::io::duplex(64);
        tokio::spawn(async move {
            let mut b = b;
            b.write_all(&[b'x'; 64]).await.unwrap();
            b.write_all(&[b'x'; 64]).await.unwrap();
        });

        let mut lr = LineReader::new(a).max_line_len(32);
        let err = lr.read_line().await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn rejects_non_utf8() {
        let (a, b) = tokio::io::duplex(64);
        tokio::spawn(async move {
            let mut b = b;
            b.write_all(&[0xff, 0xfe, b'\n']).await.unwrap();
        });

        let mut lr = LineReader::new(a);
        let err = lr.read_line().await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn send_line_appends_terminator() {
        let (a, mut b) = tokio::io::duplex(64);
        let mut lw = LineWriter::new(a);
        lw.send_line("NAME;User7").await.unwrap();
        lw.send_line("INFO;").await.unwrap();

        let mut got = vec![0u8; 17];
        b.read_exact(&mut got).await.unwrap();
        assert_eq!(&got[..], b"NAME;User7\nINFO;\n");
    }
}
