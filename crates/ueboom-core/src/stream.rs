//! Message framing on top of a classic accessory session.

use std::io;

use bytes::{Buf, BytesMut};
use tracing::{debug, trace, warn};

use ueboom_types::{Address, Message};

use crate::error::{Error, Result};
use crate::traits::AccessorySession;
use crate::util::hex;

/// Default number of bytes pulled from the session per read call.
pub const DEFAULT_READ_CHUNK: usize = 128;

/// Buffers one accessory session and converts between bytes and [`Message`]s.
///
/// Incoming bytes accumulate until whole frames are available. Outgoing
/// frames are queued and written as far as the session accepts; the rest
/// waits for the next writable notification.
#[derive(Debug)]
pub struct AccessoryStreamAdapter {
    address: Address,
    session: Box<dyn AccessorySession>,
    read_buf: BytesMut,
    write_buf: BytesMut,
    read_chunk: usize,
    open: bool,
}

impl AccessoryStreamAdapter {
    pub fn new(address: Address, session: Box<dyn AccessorySession>, read_chunk: usize) -> Self {
        Self {
            address,
            session,
            read_buf: BytesMut::with_capacity(read_chunk),
            write_buf: BytesMut::new(),
            read_chunk: read_chunk.max(1),
            open: false,
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Bytes queued but not yet accepted by the session.
    pub fn pending_write_len(&self) -> usize {
        self.write_buf.len()
    }

    /// Open the underlying session.
    pub fn open(&mut self) -> Result<()> {
        if self.open {
            return Ok(());
        }
        if !self.session.open() {
            return Err(Error::SessionOpenFailed(self.address));
        }
        self.open = true;
        debug!("Opened accessory session for {}", self.address);
        Ok(())
    }

    /// Close the session and drop any buffered bytes.
    pub fn close(&mut self) {
        if self.open {
            self.session.close();
            self.open = false;
            debug!(
                "Closed accessory session for {} ({} bytes unsent)",
                self.address,
                self.write_buf.len()
            );
        }
        self.read_buf.clear();
        self.write_buf.clear();
    }

    /// Drain available bytes and return every complete message, in order.
    ///
    /// A trailing partial frame stays buffered for the next call.
    pub fn on_readable(&mut self) -> Result<Vec<Message>> {
        if !self.open {
            return Err(Error::NotConnected);
        }

        let mut chunk = vec![0u8; self.read_chunk];
        while self.session.has_bytes_available() {
            match self.session.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => {
                    trace!("{} <- {}", self.address, hex(&chunk[..n]));
                    self.read_buf.extend_from_slice(&chunk[..n]);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(Error::Io(e)),
            }
        }

        let messages = Message::decode_all(&mut self.read_buf);
        for msg in &messages {
            debug!(
                "{} sent command {:#05x} ({} bytes)",
                self.address,
                msg.command_id(),
                msg.payload().len()
            );
        }
        Ok(messages)
    }

    /// Write as much queued data as the session accepts.
    ///
    /// Returns the number of bytes written. A session that accepts zero
    /// bytes or reports an error is broken: the caller must tear it down.
    pub fn on_writable(&mut self) -> Result<usize> {
        if !self.open {
            return Err(Error::NotConnected);
        }

        let mut written = 0;
        while !self.write_buf.is_empty() && self.session.has_space_available() {
            match self.session.write(&self.write_buf) {
                Ok(0) => {
                    warn!("Accessory stream for {} accepted no bytes", self.address);
                    return Err(Error::write_failure(
                        format!("stream {}", self.address),
                        "zero bytes written",
                    ));
                }
                Ok(n) => {
                    trace!("{} -> {}", self.address, hex(&self.write_buf[..n]));
                    self.write_buf.advance(n);
                    written += n;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!("Accessory stream write for {} failed: {}", self.address, e);
                    return Err(Error::write_failure(
                        format!("stream {}", self.address),
                        e.to_string(),
                    ));
                }
            }
        }
        Ok(written)
    }

    /// Queue a message and flush what the session takes right now.
    pub fn send(&mut self, message: &Message) -> Result<()> {
        if !self.open {
            return Err(Error::NotConnected);
        }
        debug!(
            "Sending command {:#05x} to {}",
            message.command_id(),
            self.address
        );
        message.encode_into(&mut self.write_buf);
        self.on_writable().map(|_| ())
    }
}
