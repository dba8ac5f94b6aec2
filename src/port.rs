//! Opening the byte port the modem is attached to.

use anyhow::{Context, Result};
use std::path::Path;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_serial::{DataBits, Parity, SerialPortBuilderExt, StopBits};
use tracing::info;

pub trait PortIo: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> PortIo for T {}

pub type Port = Box<dyn PortIo>;

/// The modem's fixed line settings are 19200 8N1.
pub const PLM_BAUD_RATE: u32 = 19200;

/// Open `target`, either a `host:port` serial bridge or a serial device path.
pub async fn open(target: &str) -> Result<Port> {
    if is_serial_device(target) {
        let port = tokio_serial::new(target, PLM_BAUD_RATE)
            .data_bits(DataBits::Eight)
            .stop_bits(StopBits::One)
            .parity(Parity::None)
            .open_native_async()
            .with_context(|| format!("Failed to open serial device {target}"))?;
        info!("Opened serial device {} at {} baud", target, PLM_BAUD_RATE);
        return Ok(Box::new(port));
    }

    let stream = TcpStream::connect(target)
        .await
        .with_context(|| format!("Failed to connect to {target}"))?;
    stream.set_nodelay(true)?;
    info!("Connected to modem at {}", target);
    Ok(Box::new(stream))
}

fn is_serial_device(target: &str) -> bool {
    Path::new(target).is_absolute() || target.starts_with("COM")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[test]
    fn device_paths_are_serial() {
        assert!(is_serial_device("/dev/ttyUSB0"));
        assert!(is_serial_device("COM3"));
        assert!(!is_serial_device("192.168.1.10:9761"));
        assert!(!is_serial_device("localhost:9761"));
    }

    #[tokio::test]
    async fn missing_serial_device_is_an_error() {
        let err = open("/dev/does-not-exist-insteon").await.err().unwrap();
        assert!(err.to_string().contains("Failed to open serial device"));
    }

    #[tokio::test]
    async fn tcp_bridge_writes_while_a_read_is_pending() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let modem = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 2];
            stream.read_exact(&mut buf).await.unwrap();
            buf
        });

        let port = open(&addr).await.unwrap();
        let (mut reader, mut writer) = tokio::io::split(port);
        let pending = tokio::spawn(async move {
            let mut buf = [0u8; 1];
            reader.read(&mut buf).await
        });
        tokio::time::timeout(std::time::Duration::from_secs(2), writer.write_all(&[0x02, 0x60]))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(modem.await.unwrap(), [0x02, 0x60]);
        pending.abort();
    }
}
