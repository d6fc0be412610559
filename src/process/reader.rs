//! Record reader for fetch-tool output
//!
//! Progress bars are redrawn with a bare `\r`. Reading with `lines()` would hold them
//! until the next `\n`, so records are split on either byte.

use tokio::io::{AsyncRead, AsyncReadExt, BufReader};

/// Records longer than this are emitted without waiting for a delimiter
const MAX_RECORD_BYTES: usize = 64 * 1024;

/// Yields text records delimited by `\n` or `\r`
///
/// Bytes are decoded as UTF-8 with lossy replacement; records are trimmed and empty
/// records are skipped.
pub struct OutputRecordReader<R> {
    reader: BufReader<R>,
    pending: Vec<u8>,
    scratch: [u8; 4096],
}

impl<R> OutputRecordReader<R>
where
    R: AsyncRead + Unpin,
{
    /// Wrap a stream
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
            pending: Vec::new(),
            scratch: [0u8; 4096],
        }
    }

    /// Next non-empty record, or `None` at end of stream
    pub async fn next_record(&mut self) -> std::io::Result<Option<String>> {
        loop {
            if let Some(idx) = self.pending.iter().position(|&b| is_delimiter(b)) {
                let record: Vec<u8> = self.pending.drain(..idx).collect();
                let delimiters = self.pending.iter().take_while(|&&b| is_delimiter(b)).count();
                self.pending.drain(..delimiters);

                if let Some(record) = decode(&record) {
                    return Ok(Some(record));
                }
                continue;
            }

            if self.pending.len() >= MAX_RECORD_BYTES {
                let record = std::mem::take(&mut self.pending);
                if let Some(record) = decode(&record) {
                    return Ok(Some(record));
                }
                continue;
            }

            let n = self.reader.read(&mut self.scratch).await?;
            if n == 0 {
                let rest = std::mem::take(&mut self.pending);
                return Ok(decode(&rest));
            }
            self.pending.extend_from_slice(&self.scratch[..n]);
        }
    }
}

fn is_delimiter(b: u8) -> bool {
    matches!(b, b'\n' | b'\r')
}

fn decode(bytes: &[u8]) -> Option<String> {
    let record = String::from_utf8_lossy(bytes);
    let record = record.trim();
    (!record.is_empty()).then(|| record.to_string())
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    async fn collect<R: AsyncRead + Unpin>(reader: R) -> Vec<String> {
        let mut reader = OutputRecordReader::new(reader);
        let mut records = Vec::new();
        while let Some(record) = reader.next_record().await.unwrap() {
            records.push(record);
        }
        records
    }

    #[tokio::test]
    async fn splits_on_carriage_return_and_newline() {
        let (mut tx, rx) = tokio::io::duplex(1024);
        tokio::spawn(async move {
            let _ = tx.write_all(b"one\rtwo\nthree\r\n\r\nfour").await;
        });

        assert_eq!(collect(rx).await, vec!["one", "two", "three", "four"]);
    }

    #[tokio::test]
    async fn records_split_across_reads_are_joined() {
        let mock = tokio_test::io::Builder::new()
            .read(b"Vid 1920x1080 ")
            .read(b"50.00%\r")
            .read(b"   \n")
            .read(b"00:00:01.000 INFO : done\n")
            .build();

        assert_eq!(
            collect(mock).await,
            vec!["Vid 1920x1080 50.00%", "00:00:01.000 INFO : done"],
            "blank records are dropped"
        );
    }

    #[tokio::test]
    async fn invalid_utf8_is_replaced() {
        let mock = tokio_test::io::Builder::new().read(b"bad \xff byte\n").build();
        assert_eq!(collect(mock).await, vec!["bad \u{FFFD} byte"]);
    }
}
