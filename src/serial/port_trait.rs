//! Trait abstraction for UART operations to enable testing

use async_trait::async_trait;
use std::io;
use std::time::Duration;

/// Read buffer size for one poll
pub const READ_CHUNK_SIZE: usize = 256;

/// Upper bound for one `read_available` call on a line that never goes quiet
pub const MAX_READ_LEN: usize = 4096;

/// Read until `reader` stays quiet for `idle`
///
/// Behaves like a UART read with an inter-character timeout: the first byte
/// may take up to `idle`, and reading continues while more bytes follow
/// within `idle` of each other. Stops at end of file or `MAX_READ_LEN`.
pub async fn read_until_idle<R>(reader: &mut R, idle: Duration) -> io::Result<Vec<u8>>
where
    R: tokio::io::AsyncRead + Unpin + Send,
{
    use tokio::io::AsyncReadExt;

    let mut data = Vec::new();
    let mut buf = [0u8; READ_CHUNK_SIZE];
    while data.len() < MAX_READ_LEN {
        match tokio::time::timeout(idle, reader.read(&mut buf)).await {
            Ok(Ok(0)) | Err(_) => break,
            Ok(Ok(n)) => data.extend_from_slice(&buf[..n]),
            Ok(Err(e)) => return Err(e),
        }
    }
    Ok(data)
}

/// Trait for UART I/O shared by the radio and the BLE bridge
#[async_trait]
pub trait SerialPortIO: Send {
    /// Write all data to the port
    async fn write_all(&mut self, data: &[u8]) -> io::Result<()>;

    /// Flush the output buffer
    async fn flush(&mut self) -> io::Result<()>;

    /// Read whatever arrives, until the line is quiet for `timeout`
    ///
    /// Returns an empty vector when nothing arrived in time.
    async fn read_available(&mut self, timeout: Duration) -> io::Result<Vec<u8>>;
}

/// Wrapper around tokio_serial::SerialStream that implements SerialPortIO
pub struct TokioSerialPort {
    port: tokio_serial::SerialStream,
}

impl TokioSerialPort {
    pub fn new(port: tokio_serial::SerialStream) -> Self {
        Self { port }
    }
}

#[async_trait]
impl SerialPortIO for TokioSerialPort {
    async fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        use tokio::io::AsyncWriteExt;
        self.port.write_all(data).await
    }

    async fn flush(&mut self) -> io::Result<()> {
        use tokio::io::AsyncWriteExt;
        self.port.flush().await
    }

    async fn read_available(&mut self, timeout: Duration) -> io::Result<Vec<u8>> {
        read_until_idle(&mut self.port, timeout).await
    }
}
