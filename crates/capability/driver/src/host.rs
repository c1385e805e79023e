//! 宿主 I/O：插件只能通过这里访问串口与 TCP 资源
//!
//! 句柄由执行器在资源锁内借给一次调用，调用结束后归还缓存；
//! TCP 读写失败会丢弃连接，下次调用重新建连。

use domain::Device;
use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::time::{Duration, Instant};
use tokio_serial::{ClearBuffer, DataBits, Parity, SerialPort, StopBits};
use tracing::{debug, warn};

/// 串口一次阻塞读的最长时间片
const SERIAL_READ_SLICE: Duration = Duration::from_millis(20);
/// 串口写完到开始读之间的线路切换等待
const SERIAL_TURNAROUND: Duration = Duration::from_millis(3);
const SERIAL_POLL_GAP: Duration = Duration::from_millis(2);

/// 已打开的物理资源句柄
pub enum ResourceHandle {
    Serial(Box<dyn SerialPort>),
    Tcp(TcpStream),
}

impl ResourceHandle {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Serial(_) => "serial",
            Self::Tcp(_) => "tcp",
        }
    }
}

impl std::fmt::Debug for ResourceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ResourceHandle::{}", self.kind())
    }
}

/// 串口线路参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialSettings {
    pub baud_rate: u32,
    pub data_bits: u8,
    pub parity: char,
    pub stop_bits: u8,
}

impl SerialSettings {
    /// 设备参数归一化：波特率 0 取 9600，数据位越界取 8，停止位非 2 取 1
    pub fn from_device(device: &Device) -> Self {
        let baud_rate = if device.baud_rate == 0 {
            9600
        } else {
            device.baud_rate
        };
        let data_bits = if (5..=8).contains(&device.data_bits) {
            device.data_bits
        } else {
            8
        };
        let parity = device
            .parity
            .trim()
            .chars()
            .next()
            .map(|c| c.to_ascii_uppercase())
            .filter(|c| matches!(c, 'N' | 'E' | 'O'))
            .unwrap_or('N');
        let stop_bits = if device.stop_bits == 2 { 2 } else { 1 };
        Self {
            baud_rate,
            data_bits,
            parity,
            stop_bits,
        }
    }
}

/// 打开串口（同步句柄，供阻塞线程使用）
pub fn open_serial(
    path: &str,
    settings: &SerialSettings,
    read_timeout: Duration,
) -> io::Result<Box<dyn SerialPort>> {
    let data_bits = match settings.data_bits {
        5 => DataBits::Five,
        6 => DataBits::Six,
        7 => DataBits::Seven,
        _ => DataBits::Eight,
    };
    let parity = match settings.parity {
        'E' => Parity::Even,
        'O' => Parity::Odd,
        _ => Parity::None,
    };
    let stop_bits = match settings.stop_bits {
        2 => StopBits::Two,
        _ => StopBits::One,
    };
    tokio_serial::new(path, settings.baud_rate)
        .data_bits(data_bits)
        .parity(parity)
        .stop_bits(stop_bits)
        .timeout(read_timeout)
        .open()
        .map_err(io::Error::from)
}

/// 读取一个完整的 Modbus TCP 响应（MBAP 长度决定总长）
pub fn read_mbap_response<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    if buf.len() < 9 {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "short buffer"));
    }
    reader.read_exact(&mut buf[..7])?;
    let length = u16::from_be_bytes([buf[4], buf[5]]) as usize;
    if length < 2 {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "mbap length too small",
        ));
    }
    let total = 6 + length;
    if total > buf.len() {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "short buffer"));
    }
    reader.read_exact(&mut buf[7..total])?;
    Ok(total)
}

/// 在截止时间前尽量读满 `expect` 字节；返回已读字节与最后一个错误
pub fn read_until_deadline<R: Read + ?Sized>(
    reader: &mut R,
    buf: &mut [u8],
    expect: usize,
    deadline: Instant,
) -> (usize, Option<io::Error>) {
    let expect = expect.min(buf.len());
    let mut read = 0;
    while read < expect && Instant::now() < deadline {
        match reader.read(&mut buf[read..expect]) {
            Ok(n) => read += n,
            Err(err)
                if matches!(
                    err.kind(),
                    io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                ) => {}
            Err(err) => return (read, Some(err)),
        }
        if read >= expect {
            break;
        }
        std::thread::sleep(SERIAL_POLL_GAP);
    }
    if read < expect {
        return (read, Some(io::Error::new(io::ErrorKind::TimedOut, "timeout")));
    }
    (read, None)
}

/// 十六进制预览（日志用）
pub fn hex_preview(bytes: &[u8], max: usize) -> String {
    bytes
        .iter()
        .take(max)
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// 单次插件调用可用的宿主 I/O
#[derive(Default)]
pub struct HostIo {
    resource_id: i64,
    handle: Option<ResourceHandle>,
    serial_read_timeout: Duration,
    tcp_read_timeout: Duration,
    deadline: Option<Instant>,
    broken: bool,
}

impl HostIo {
    pub fn new(
        resource_id: i64,
        handle: Option<ResourceHandle>,
        serial_read_timeout: Duration,
        tcp_read_timeout: Duration,
    ) -> Self {
        Self {
            resource_id,
            handle,
            serial_read_timeout,
            tcp_read_timeout,
            deadline: None,
            broken: false,
        }
    }

    /// 本次调用的截止时间；阻塞读与 sleep 都不会越过它
    pub fn with_deadline(mut self, deadline: Option<Instant>) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn resource_id(&self) -> i64 {
        self.resource_id
    }

    pub fn has_handle(&self) -> bool {
        self.handle.is_some()
    }

    /// 归还句柄；第二项为 true 表示连接已失效被丢弃
    pub fn into_parts(self) -> (Option<ResourceHandle>, bool) {
        (self.handle, self.broken)
    }

    fn clamp(&self, timeout: Duration) -> Duration {
        match self.deadline {
            Some(deadline) => timeout.min(deadline.saturating_duration_since(Instant::now())),
            None => timeout,
        }
    }

    fn pick_timeout(&self, timeout_ms: i64, fallback: Duration) -> Duration {
        let timeout = if timeout_ms > 0 {
            Duration::from_millis(timeout_ms as u64)
        } else {
            fallback
        };
        self.clamp(timeout)
    }

    fn serial(&mut self) -> Option<&mut Box<dyn SerialPort>> {
        match self.handle.as_mut() {
            Some(ResourceHandle::Serial(port)) => Some(port),
            _ => None,
        }
    }

    /// 读取最多 `len` 字节
    pub fn serial_read(&mut self, len: usize) -> Vec<u8> {
        let timeout = self.clamp(self.serial_read_timeout);
        let resource_id = self.resource_id;
        let Some(port) = self.serial() else {
            warn!(target: "gw.driver", resource_id, "serial_port_unavailable");
            return Vec::new();
        };
        let _ = port.set_timeout(timeout.max(Duration::from_millis(1)));
        let mut buf = vec![0u8; len];
        match port.read(&mut buf) {
            Ok(n) => {
                buf.truncate(n);
                buf
            }
            Err(err) => {
                debug!(target: "gw.driver", resource_id, error = %err, "serial_read_failed");
                Vec::new()
            }
        }
    }

    pub fn serial_write(&mut self, data: &[u8]) -> usize {
        let resource_id = self.resource_id;
        let Some(port) = self.serial() else {
            warn!(target: "gw.driver", resource_id, "serial_port_unavailable");
            return 0;
        };
        match port.write(data) {
            Ok(n) => n,
            Err(err) => {
                warn!(target: "gw.driver", resource_id, error = %err, "serial_write_failed");
                0
            }
        }
    }

    /// 半双工收发：清缓冲、拉高 RTS/DTR 发送、拉低后等待线路切换再读
    pub fn serial_transceive(&mut self, request: &[u8], capacity: usize, timeout_ms: i64) -> Vec<u8> {
        let timeout = self.pick_timeout(timeout_ms, self.serial_read_timeout);
        let resource_id = self.resource_id;
        let Some(port) = self.serial() else {
            warn!(target: "gw.driver", resource_id, "serial_port_unavailable");
            return Vec::new();
        };
        if request.is_empty() || capacity == 0 {
            return Vec::new();
        }
        let _ = port.clear(ClearBuffer::All);
        let _ = port.write_request_to_send(true);
        let _ = port.write_data_terminal_ready(true);
        if let Err(err) = port.write_all(request).and_then(|_| port.flush()) {
            warn!(
                target: "gw.driver",
                resource_id,
                error = %err,
                req = %hex_preview(request, 32),
                "serial_write_failed"
            );
            return Vec::new();
        }
        let _ = port.write_request_to_send(false);
        let _ = port.write_data_terminal_ready(false);
        std::thread::sleep(SERIAL_TURNAROUND);

        let _ = port.set_timeout(SERIAL_READ_SLICE);
        let mut buf = vec![0u8; capacity];
        let (read, err) =
            read_until_deadline(port.as_mut(), &mut buf, capacity, Instant::now() + timeout);
        if read == 0 {
            warn!(
                target: "gw.driver",
                resource_id,
                error = ?err.map(|e| e.to_string()),
                req = %hex_preview(request, 32),
                "serial_read_empty"
            );
            return Vec::new();
        }
        if let Some(err) = err {
            debug!(target: "gw.driver", resource_id, read, error = %err, "serial_read_partial");
        }
        buf.truncate(read);
        buf
    }

    /// TCP 收发（按 MBAP 长度读取完整响应）；失败即丢弃连接
    pub fn tcp_transceive(&mut self, request: &[u8], capacity: usize, timeout_ms: i64) -> Vec<u8> {
        let timeout = self.pick_timeout(timeout_ms, self.tcp_read_timeout);
        let resource_id = self.resource_id;
        let Some(ResourceHandle::Tcp(stream)) = self.handle.as_mut() else {
            warn!(target: "gw.driver", resource_id, "tcp_connection_unavailable");
            return Vec::new();
        };
        if request.is_empty() || capacity == 0 {
            return Vec::new();
        }
        if let Err(err) = stream.write_all(request) {
            warn!(
                target: "gw.driver",
                resource_id,
                error = %err,
                req = %hex_preview(request, 32),
                "tcp_write_failed"
            );
            self.invalidate();
            return Vec::new();
        }
        let _ = stream.set_read_timeout(Some(timeout.max(Duration::from_millis(1))));
        let mut buf = vec![0u8; capacity];
        match read_mbap_response(stream, &mut buf) {
            Ok(n) => {
                buf.truncate(n);
                buf
            }
            Err(err) => {
                warn!(
                    target: "gw.driver",
                    resource_id,
                    error = %err,
                    req = %hex_preview(request, 32),
                    "tcp_read_failed"
                );
                self.invalidate();
                Vec::new()
            }
        }
    }

    pub fn sleep_ms(&self, ms: i64) {
        if ms <= 0 {
            return;
        }
        std::thread::sleep(self.clamp(Duration::from_millis(ms as u64)));
    }

    fn invalidate(&mut self) {
        if let Some(ResourceHandle::Tcp(stream)) = self.handle.take() {
            let _ = stream.shutdown(std::net::Shutdown::Both);
        }
        self.broken = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::net::TcpListener;

    #[test]
    fn mbap_response_uses_length_field() {
        let frame = [0x00, 0x01, 0x00, 0x00, 0x00, 0x05, 0x01, 0x03, 0x02, 0x00, 0x2A, 0xFF];
        let mut buf = [0u8; 32];
        let n = read_mbap_response(&mut Cursor::new(frame), &mut buf).expect("read");
        assert_eq!(n, 11);
        assert_eq!(&buf[..n], &frame[..11]);
    }

    #[test]
    fn mbap_response_rejects_short_buffer() {
        let mut buf = [0u8; 8];
        assert!(read_mbap_response(&mut Cursor::new([0u8; 16]), &mut buf).is_err());
    }

    #[test]
    fn read_until_deadline_reports_partial_read() {
        let mut buf = [0u8; 8];
        let (read, err) = read_until_deadline(
            &mut Cursor::new(vec![1u8, 2, 3]),
            &mut buf,
            8,
            Instant::now() + Duration::from_millis(20),
        );
        assert_eq!(read, 3);
        assert!(err.is_some());
    }

    #[test]
    fn serial_settings_are_normalized() {
        let device = Device {
            baud_rate: 0,
            data_bits: 9,
            stop_bits: 3,
            parity: "even".to_string(),
            ..Device::default()
        };
        let settings = SerialSettings::from_device(&device);
        assert_eq!(
            settings,
            SerialSettings {
                baud_rate: 9600,
                data_bits: 8,
                parity: 'E',
                stop_bits: 1,
            }
        );
    }

    #[test]
    fn tcp_transceive_round_trip() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr");
        let server = std::thread::spawn(move || {
            let (mut socket, _) = listener.accept().expect("accept");
            let mut req = [0u8; 12];
            socket.read_exact(&mut req).expect("read");
            let reply = [req[0], req[1], 0, 0, 0, 5, req[6], 0x03, 0x02, 0x00, 0x2A];
            socket.write_all(&reply).expect("write");
        });
        let stream = TcpStream::connect(addr).expect("connect");
        let mut io = HostIo::new(
            1,
            Some(ResourceHandle::Tcp(stream)),
            Duration::from_millis(100),
            Duration::from_millis(500),
        );
        let request = [0x00, 0x07, 0, 0, 0, 6, 0x01, 0x03, 0x00, 0x00, 0x00, 0x01];
        let reply = io.tcp_transceive(&request, 64, 0);
        assert_eq!(reply.len(), 11);
        assert_eq!(&reply[9..], &[0x00, 0x2A]);
        let (handle, broken) = io.into_parts();
        assert!(handle.is_some());
        assert!(!broken);
        server.join().expect("server");
    }

    #[test]
    fn tcp_failure_drops_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr");
        let server = std::thread::spawn(move || {
            let (socket, _) = listener.accept().expect("accept");
            drop(socket);
        });
        let stream = TcpStream::connect(addr).expect("connect");
        server.join().expect("server");
        let mut io = HostIo::new(
            1,
            Some(ResourceHandle::Tcp(stream)),
            Duration::from_millis(100),
            Duration::from_millis(200),
        );
        let request = [0x00, 0x01, 0, 0, 0, 6, 0x01, 0x03, 0x00, 0x00, 0x00, 0x01];
        assert!(io.tcp_transceive(&request, 64, 0).is_empty());
        let (handle, broken) = io.into_parts();
        assert!(handle.is_none());
        assert!(broken);
    }

    #[test]
    fn missing_handle_returns_nothing() {
        let mut io = HostIo::default();
        assert!(io.serial_transceive(&[1, 2], 8, 10).is_empty());
        assert_eq!(io.serial_write(&[1]), 0);
        assert!(io.tcp_transceive(&[1, 2], 16, 10).is_empty());
    }
}
