//! Line-oriented transport over a byte stream.
//!
//! Works for anything that is `Read + Write`: TCP sockets (SCPI raw socket, port
//! 5025 on most instruments) and, with the `instrument_serial` feature, serial
//! ports. The read timeout is the stream's own; a timed-out read surfaces as
//! [`TransportError::Timeout`] and leaves partially received bytes buffered for the
//! next attempt.

use super::block::{parse_header, BlockHeader};
use super::{Transport, TransportError};
use crate::error::AppResult;
use std::io::{ErrorKind, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;
use tracing::{debug, info};

/// Transport speaking newline-terminated text (and binary blocks) over a stream.
pub struct StreamTransport<S: Read + Write + Send> {
    stream: Option<S>,
    name: String,
    terminator: String,
    read_timeout: Duration,
    buffer: Vec<u8>,
}

impl<S: Read + Write + Send> StreamTransport<S> {
    /// Wrap an already opened stream.
    pub fn new(stream: S, name: impl Into<String>, read_timeout: Duration) -> Self {
        Self {
            stream: Some(stream),
            name: name.into(),
            terminator: "\n".to_string(),
            read_timeout,
            buffer: Vec::new(),
        }
    }

    /// Set the line terminator used for both writing and reading.
    pub fn with_terminator(mut self, terminator: &str) -> Self {
        self.terminator = terminator.to_string();
        self
    }

    fn stream(&mut self) -> Result<&mut S, TransportError> {
        self.stream.as_mut().ok_or(TransportError::Closed)
    }

    /// Pull one chunk from the stream into the buffer.
    fn fill(&mut self) -> Result<(), TransportError> {
        let timeout = self.read_timeout;
        let mut chunk = [0u8; 4096];
        let stream = self.stream()?;
        match stream.read(&mut chunk) {
            Ok(0) => Err(TransportError::Io(std::io::Error::new(
                ErrorKind::UnexpectedEof,
                "instrument closed the connection",
            ))),
            Ok(n) => {
                self.buffer.extend_from_slice(&chunk[..n]);
                Ok(())
            }
            Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => {
                Err(TransportError::Timeout(timeout))
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => Ok(()),
            Err(e) => Err(TransportError::Io(e)),
        }
    }

    fn find_terminator(&self, from: usize) -> Option<usize> {
        let term = self.terminator.as_bytes();
        if term.is_empty() || self.buffer.len() < from + term.len() {
            return None;
        }
        self.buffer[from..]
            .windows(term.len())
            .position(|w| w == term)
            .map(|p| p + from)
    }
}

impl<S: Read + Write + Send> Transport for StreamTransport<S> {
    fn write(&mut self, command: &str) -> Result<(), TransportError> {
        let line = format!("{command}{}", self.terminator);
        let name = self.name.clone();
        let stream = self.stream()?;
        stream.write_all(line.as_bytes())?;
        stream.flush()?;
        debug!(transport = %name, "Sent: {}", command);
        Ok(())
    }

    fn read(&mut self) -> Result<String, TransportError> {
        loop {
            if let Some(end) = self.find_terminator(0) {
                let line: Vec<u8> = self.buffer.drain(..end + self.terminator.len()).collect();
                let text = String::from_utf8_lossy(&line[..end]).trim_end().to_string();
                debug!(transport = %self.name, "Received: {}", text);
                return Ok(text);
            }
            self.fill()?;
        }
    }

    fn query_block(&mut self, command: &str) -> Result<Vec<u8>, TransportError> {
        self.write(command)?;
        let header = loop {
            if let Some(header) = parse_header(&self.buffer)? {
                break header;
            }
            self.fill()?;
        };
        let payload = match header {
            BlockHeader::Definite { offset, length } => {
                while self.buffer.len() < offset + length {
                    self.fill()?;
                }
                let payload = self.buffer[offset..offset + length].to_vec();
                self.buffer.drain(..offset + length);
                // Drop the terminator that follows the block, if it has arrived.
                let term = self.terminator.as_bytes();
                if self.buffer.starts_with(term) {
                    self.buffer.drain(..term.len());
                }
                payload
            }
            BlockHeader::Indefinite { offset } => {
                let end = loop {
                    if let Some(end) = self.find_terminator(offset) {
                        break end;
                    }
                    self.fill()?;
                };
                let payload = self.buffer[offset..end].to_vec();
                self.buffer.drain(..end + self.terminator.len());
                payload
            }
        };
        debug!(transport = %self.name, bytes = payload.len(), "Received binary block");
        Ok(payload)
    }

    fn close(&mut self) -> Result<(), TransportError> {
        if let Some(mut stream) = self.stream.take() {
            stream.flush()?;
            info!(transport = %self.name, "Closed");
        }
        self.buffer.clear();
        Ok(())
    }

    fn describe(&self) -> String {
        format!("StreamTransport ({}, timeout {:?})", self.name, self.read_timeout)
    }
}

/// Connect to a raw SCPI socket (`host:port`).
pub fn connect_tcp(host: &str, read_timeout: Duration) -> AppResult<StreamTransport<TcpStream>> {
    let addr = host
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| std::io::Error::new(ErrorKind::NotFound, format!("cannot resolve {host}")))?;
    let stream = TcpStream::connect_timeout(&addr, read_timeout)?;
    stream.set_read_timeout(Some(read_timeout))?;
    stream.set_nodelay(true)?;
    info!("Connected to tcp://{}", host);
    Ok(StreamTransport::new(stream, format!("tcp://{host}"), read_timeout))
}

/// Open a serial port (8N1, no flow control).
#[cfg(feature = "instrument_serial")]
pub fn open_serial(
    port: &str,
    baud_rate: u32,
    read_timeout: Duration,
) -> AppResult<StreamTransport<Box<dyn serialport::SerialPort>>> {
    let serial = serialport::new(port, baud_rate)
        .timeout(read_timeout)
        .open()
        .map_err(|e| std::io::Error::new(ErrorKind::Other, e.to_string()))?;
    info!("Opened serial port {} at {} baud", port, baud_rate);
    Ok(StreamTransport::new(
        serial,
        format!("serial://{port}"),
        read_timeout,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::block::encode_block;
    use std::collections::VecDeque;
    use std::io::Cursor;

    /// In-memory duplex stream: reads come from scripted chunks, writes are recorded.
    struct ScriptedStream {
        chunks: VecDeque<Vec<u8>>,
        written: Vec<u8>,
    }

    impl ScriptedStream {
        fn new(chunks: &[&[u8]]) -> Self {
            Self {
                chunks: chunks.iter().map(|c| c.to_vec()).collect(),
                written: Vec::new(),
            }
        }
    }

    impl Read for ScriptedStream {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            match self.chunks.pop_front() {
                Some(chunk) => {
                    let mut cursor = Cursor::new(chunk);
                    cursor.read(buf)
                }
                None => Err(std::io::Error::new(ErrorKind::TimedOut, "no data")),
            }
        }
    }

    impl Write for ScriptedStream {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn transport(chunks: &[&[u8]]) -> StreamTransport<ScriptedStream> {
        StreamTransport::new(ScriptedStream::new(chunks), "scripted", Duration::from_millis(1))
    }

    #[test]
    fn reads_lines_split_across_chunks() {
        let mut t = transport(&[b"1.5", b"e3\n0\n"]);
        assert_eq!(t.read().unwrap(), "1.5e3");
        assert_eq!(t.read().unwrap(), "0");
    }

    #[test]
    fn timed_out_read_is_distinguishable() {
        let mut t = transport(&[b"partial"]);
        assert!(matches!(t.read(), Err(TransportError::Timeout(_))));
    }

    #[test]
    fn writes_append_terminator() {
        let mut t = transport(&[]).with_terminator("\r\n");
        t.write("*IDN?").unwrap();
        assert_eq!(t.stream.as_ref().unwrap().written, b"*IDN?\r\n");
    }

    #[test]
    fn definite_block_is_extracted() {
        let mut framed = encode_block(&[1, 2, 3, 4]);
        framed.push(b'\n');
        let (head, tail) = framed.split_at(3);
        let mut t = transport(&[head, tail, b"OK\n"]);
        assert_eq!(t.query_block("trace:data?").unwrap(), vec![1, 2, 3, 4]);
        assert_eq!(t.read().unwrap(), "OK");
    }

    #[test]
    fn closed_transport_refuses_io() {
        let mut t = transport(&[]);
        t.close().unwrap();
        t.close().unwrap();
        assert!(matches!(t.write("*CLS"), Err(TransportError::Closed)));
    }
}
