//! Embedded register server run by each controller.

use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration as StdDuration;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::RuntimeError;
use crate::value::TagValue;

use super::{
    decode_value, encode_value, register_address, EX_ILLEGAL_ADDRESS, EX_ILLEGAL_FUNCTION,
    EX_ILLEGAL_VALUE, FC_READ_HOLDING, FC_WRITE_MULTIPLE, MBAP_HEADER_LEN, REGISTERS_PER_TAG,
};

const POLL_INTERVAL: StdDuration = StdDuration::from_millis(10);
const IO_TIMEOUT: StdDuration = StdDuration::from_millis(500);

/// Holding register image. One lock serializes all access, so a tag's
/// register pair is always read and written as a unit.
#[derive(Debug)]
struct RegisterImage {
    registers: Mutex<Vec<u16>>,
}

impl RegisterImage {
    fn read(&self, start: usize, qty: usize) -> Option<Vec<u16>> {
        let guard = self.registers.lock();
        guard.get(start..start.checked_add(qty)?).map(<[u16]>::to_vec)
    }

    fn write(&self, start: usize, words: &[u16]) -> bool {
        let mut guard = self.registers.lock();
        let Some(end) = start.checked_add(words.len()) else {
            return false;
        };
        match guard.get_mut(start..end) {
            Some(slot) => {
                slot.copy_from_slice(words);
                true
            }
            None => false,
        }
    }
}

/// Accepted connection: a handle to close the socket and its serving thread.
struct Connection {
    stream: TcpStream,
    join: thread::JoinHandle<()>,
}

type Connections = Arc<Mutex<Vec<Connection>>>;

struct Listening {
    local_addr: SocketAddr,
    stop: Arc<AtomicBool>,
    join: thread::JoinHandle<()>,
    connections: Connections,
}

/// Register server exposing one controller's tags by id.
///
/// The image exists from construction so local reads and writes work before
/// [`RegisterServer::start`] binds the socket.
pub struct RegisterServer {
    address: SocketAddr,
    image: Arc<RegisterImage>,
    listening: Option<Listening>,
}

impl std::fmt::Debug for RegisterServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisterServer")
            .field("address", &self.address)
            .field("local_addr", &self.local_addr())
            .finish_non_exhaustive()
    }
}

impl RegisterServer {
    /// Create a server able to hold tags with ids `0..=max_id`.
    #[must_use]
    pub fn new(address: SocketAddr, max_id: u16) -> Self {
        let len = (usize::from(max_id) + 1) * usize::from(REGISTERS_PER_TAG);
        Self {
            address,
            image: Arc::new(RegisterImage {
                registers: Mutex::new(vec![0; len]),
            }),
            listening: None,
        }
    }

    /// Current value of tag `id` in the local image.
    pub fn get(&self, id: u16) -> Result<TagValue, RuntimeError> {
        let start = usize::from(register_address(id)?);
        let words = self
            .image
            .read(start, usize::from(REGISTERS_PER_TAG))
            .ok_or(RuntimeError::RegisterAddress(id))?;
        Ok(decode_value([words[0], words[1]]))
    }

    /// Overwrite tag `id` in the local image.
    pub fn set(&self, id: u16, value: &TagValue) -> Result<(), RuntimeError> {
        let start = usize::from(register_address(id)?);
        let words = encode_value(value)?;
        if self.image.write(start, &words) {
            Ok(())
        } else {
            Err(RuntimeError::RegisterAddress(id))
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.listening.is_some()
    }

    /// Bound address once started (differs from the configured one for port 0).
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listening.as_ref().map(|listening| listening.local_addr)
    }

    /// Bind the listener and serve requests on a background thread.
    pub fn start(&mut self) -> Result<SocketAddr, RuntimeError> {
        if let Some(listening) = self.listening.as_ref() {
            return Ok(listening.local_addr);
        }
        let listener = TcpListener::bind(self.address)
            .map_err(|err| RuntimeError::register(format!("bind {}: {err}", self.address)))?;
        listener
            .set_nonblocking(true)
            .map_err(|err| RuntimeError::register(format!("listener nonblocking: {err}")))?;
        let local_addr = listener
            .local_addr()
            .map_err(|err| RuntimeError::register(format!("listener address: {err}")))?;
        let stop = Arc::new(AtomicBool::new(false));
        let connections: Connections = Arc::new(Mutex::new(Vec::new()));
        let image = self.image.clone();
        let stop_thread = stop.clone();
        let connections_thread = connections.clone();
        let join = thread::Builder::new()
            .name(format!("register-server-{local_addr}"))
            .spawn(move || accept_loop(&listener, &image, &stop_thread, &connections_thread))
            .map_err(|err| RuntimeError::ThreadSpawn(err.to_string().into()))?;
        debug!(%local_addr, "register server listening");
        self.listening = Some(Listening {
            local_addr,
            stop,
            join,
            connections,
        });
        Ok(local_addr)
    }

    /// Stop accepting and close every client connection.
    ///
    /// Returns once the accept thread and all connection threads have exited,
    /// so no request is answered after this call.
    pub fn stop(&mut self) {
        if let Some(listening) = self.listening.take() {
            listening.stop.store(true, Ordering::SeqCst);
            if listening.join.join().is_err() {
                warn!(address = %listening.local_addr, "register server thread panicked");
            }
            let connections = std::mem::take(&mut *listening.connections.lock());
            for connection in &connections {
                let _ = connection.stream.shutdown(Shutdown::Both);
            }
            for connection in connections {
                if connection.join.join().is_err() {
                    warn!(address = %listening.local_addr, "register client thread panicked");
                }
            }
            debug!(address = %listening.local_addr, "register server stopped");
        }
    }
}

impl Drop for RegisterServer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn accept_loop(
    listener: &TcpListener,
    image: &Arc<RegisterImage>,
    stop: &Arc<AtomicBool>,
    connections: &Connections,
) {
    while !stop.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, peer)) => {
                let handle = match stream.try_clone() {
                    Ok(handle) => handle,
                    Err(err) => {
                        warn!(%peer, %err, "register server could not track client");
                        continue;
                    }
                };
                let image = image.clone();
                let stop = stop.clone();
                let spawned = thread::Builder::new()
                    .name(format!("register-client-{peer}"))
                    .spawn(move || serve_client(stream, &image, &stop));
                match spawned {
                    Ok(join) => {
                        let mut connections = connections.lock();
                        connections.retain(|connection| !connection.join.is_finished());
                        connections.push(Connection {
                            stream: handle,
                            join,
                        });
                    }
                    Err(err) => {
                        warn!(%peer, %err, "register server could not spawn client thread");
                    }
                }
            }
            Err(err) if err.kind() == ErrorKind::WouldBlock => thread::sleep(POLL_INTERVAL),
            Err(err) => {
                warn!(%err, "register server accept failed");
                thread::sleep(POLL_INTERVAL);
            }
        }
    }
}

fn serve_client(mut stream: TcpStream, image: &RegisterImage, stop: &AtomicBool) {
    if stream.set_nonblocking(false).is_err() {
        return;
    }
    let _ = stream.set_nodelay(true);
    let _ = stream.set_write_timeout(Some(IO_TIMEOUT));
    let mut probe = [0u8; 1];
    while !stop.load(Ordering::SeqCst) {
        // Short timeout while idle so the stop flag is observed.
        let _ = stream.set_read_timeout(Some(POLL_INTERVAL));
        match stream.peek(&mut probe) {
            Ok(0) => return,
            Ok(_) => {
                let _ = stream.set_read_timeout(Some(IO_TIMEOUT));
                if handle_request(&mut stream, image).is_err() {
                    return;
                }
            }
            Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
            Err(_) => return,
        }
    }
}

fn handle_request(stream: &mut TcpStream, image: &RegisterImage) -> std::io::Result<()> {
    let mut header = [0u8; MBAP_HEADER_LEN];
    stream.read_exact(&mut header)?;
    let length = u16::from_be_bytes([header[4], header[5]]) as usize;
    if length < 2 {
        return Err(std::io::Error::new(
            ErrorKind::InvalidData,
            "modbus frame too short",
        ));
    }
    let mut body = vec![0u8; length];
    stream.read_exact(&mut body)?;
    let unit_id = body[0];
    let response = respond(&body[1..], image);

    let resp_len = u16::try_from(response.len() + 1)
        .map_err(|_| std::io::Error::new(ErrorKind::InvalidData, "response too large"))?;
    let mut frame = Vec::with_capacity(MBAP_HEADER_LEN + 1 + response.len());
    frame.extend_from_slice(&header[0..2]);
    frame.extend_from_slice(&0u16.to_be_bytes());
    frame.extend_from_slice(&resp_len.to_be_bytes());
    frame.push(unit_id);
    frame.extend_from_slice(&response);
    stream.write_all(&frame)?;
    stream.flush()
}

fn respond(pdu: &[u8], image: &RegisterImage) -> Vec<u8> {
    let function = pdu[0];
    match function {
        FC_READ_HOLDING => read_holding(pdu, image),
        FC_WRITE_MULTIPLE => write_multiple(pdu, image),
        _ => exception(function, EX_ILLEGAL_FUNCTION),
    }
}

fn read_holding(pdu: &[u8], image: &RegisterImage) -> Vec<u8> {
    if pdu.len() < 5 {
        return exception(FC_READ_HOLDING, EX_ILLEGAL_VALUE);
    }
    let start = u16::from_be_bytes([pdu[1], pdu[2]]) as usize;
    let qty = u16::from_be_bytes([pdu[3], pdu[4]]) as usize;
    if qty == 0 || qty > 125 {
        return exception(FC_READ_HOLDING, EX_ILLEGAL_VALUE);
    }
    let Some(words) = image.read(start, qty) else {
        return exception(FC_READ_HOLDING, EX_ILLEGAL_ADDRESS);
    };
    let mut payload = Vec::with_capacity(2 + qty * 2);
    payload.push(FC_READ_HOLDING);
    #[allow(clippy::cast_possible_truncation)]
    payload.push((qty * 2) as u8);
    for word in words {
        payload.extend_from_slice(&word.to_be_bytes());
    }
    payload
}

fn write_multiple(pdu: &[u8], image: &RegisterImage) -> Vec<u8> {
    if pdu.len() < 6 {
        return exception(FC_WRITE_MULTIPLE, EX_ILLEGAL_VALUE);
    }
    let start = u16::from_be_bytes([pdu[1], pdu[2]]) as usize;
    let qty = u16::from_be_bytes([pdu[3], pdu[4]]) as usize;
    let byte_count = pdu[5] as usize;
    if qty == 0 || byte_count != qty * 2 || pdu.len() < 6 + byte_count {
        return exception(FC_WRITE_MULTIPLE, EX_ILLEGAL_VALUE);
    }
    let words: Vec<u16> = pdu[6..6 + byte_count]
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect();
    if !image.write(start, &words) {
        return exception(FC_WRITE_MULTIPLE, EX_ILLEGAL_ADDRESS);
    }
    let mut payload = Vec::with_capacity(5);
    payload.push(FC_WRITE_MULTIPLE);
    payload.extend_from_slice(&pdu[1..5]);
    payload
}

fn exception(function: u8, code: u8) -> Vec<u8> {
    vec![function | 0x80, code]
}
