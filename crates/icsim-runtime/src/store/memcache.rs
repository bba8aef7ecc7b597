//! Networked cache store speaking the memcached text protocol.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::time::Duration as StdDuration;

use parking_lot::Mutex;
use smol_str::SmolStr;

use crate::error::RuntimeError;
use crate::value::TagValue;

use super::{ensure_finite, Store, StoreKind};

const DEFAULT_TIMEOUT: StdDuration = StdDuration::from_millis(500);
const MAX_KEY_LEN: usize = 250;

/// Values are stored as JSON scalars so numbers and text round-trip.
#[derive(Debug)]
pub struct MemcacheStore {
    address: SocketAddr,
    timeout: StdDuration,
    conn: Mutex<Option<BufReader<TcpStream>>>,
}

impl MemcacheStore {
    #[must_use]
    pub fn new(address: SocketAddr) -> Self {
        Self {
            address,
            timeout: DEFAULT_TIMEOUT,
            conn: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: StdDuration) -> Self {
        self.timeout = timeout;
        self
    }

    fn connect(&self) -> Result<BufReader<TcpStream>, RuntimeError> {
        let stream = TcpStream::connect_timeout(&self.address, self.timeout).map_err(|err| {
            RuntimeError::store(format!("memcache connect {}: {err}", self.address))
        })?;
        let _ = stream.set_nodelay(true);
        let _ = stream.set_read_timeout(Some(self.timeout));
        let _ = stream.set_write_timeout(Some(self.timeout));
        Ok(BufReader::new(stream))
    }

    /// Run one command; a failed exchange drops the connection.
    fn exchange<T>(
        &self,
        f: impl FnOnce(&mut BufReader<TcpStream>) -> Result<T, RuntimeError>,
    ) -> Result<T, RuntimeError> {
        let mut guard = self.conn.lock();
        if guard.is_none() {
            *guard = Some(self.connect()?);
        }
        let Some(conn) = guard.as_mut() else {
            return Err(RuntimeError::store("memcache not connected"));
        };
        let result = f(conn);
        if result.is_err() {
            *guard = None;
        }
        result
    }

    fn flush_all(&self) -> Result<(), RuntimeError> {
        self.exchange(|conn| {
            write_command(conn, b"flush_all\r\n")?;
            expect_line(conn, "OK")
        })
    }
}

impl Store for MemcacheStore {
    fn kind(&self) -> StoreKind {
        StoreKind::Memcache
    }

    fn initialize(
        &self,
        initial: &[(SmolStr, TagValue)],
        clear_existing: bool,
    ) -> Result<(), RuntimeError> {
        if clear_existing {
            self.flush_all()?;
        }
        for (key, value) in initial {
            self.set(key, value)?;
        }
        Ok(())
    }

    fn set(&self, key: &str, value: &TagValue) -> Result<TagValue, RuntimeError> {
        validate_key(key)?;
        ensure_finite(key, value)?;
        let payload = serde_json::to_vec(value)
            .map_err(|err| RuntimeError::store(format!("memcache encode '{key}': {err}")))?;
        self.exchange(|conn| {
            let mut command = format!("set {key} 0 0 {}\r\n", payload.len()).into_bytes();
            command.extend_from_slice(&payload);
            command.extend_from_slice(b"\r\n");
            write_command(conn, &command)?;
            expect_line(conn, "STORED")
        })?;
        Ok(value.clone())
    }

    fn get(&self, key: &str) -> Result<TagValue, RuntimeError> {
        validate_key(key)?;
        let payload = self.exchange(|conn| {
            write_command(conn, format!("get {key}\r\n").as_bytes())?;
            let line = read_line(conn)?;
            if line == "END" {
                return Ok(None);
            }
            let len = parse_value_header(&line, key)?;
            let mut data = vec![0u8; len + 2];
            conn.read_exact(&mut data)
                .map_err(|err| RuntimeError::store(format!("memcache read value: {err}")))?;
            data.truncate(len);
            expect_line(conn, "END")?;
            Ok(Some(data))
        })?;
        let Some(payload) = payload else {
            return Err(RuntimeError::UninitializedKey(SmolStr::new(key)));
        };
        serde_json::from_slice(&payload)
            .map_err(|err| RuntimeError::store(format!("memcache decode '{key}': {err}")))
    }
}

fn validate_key(key: &str) -> Result<(), RuntimeError> {
    if key.is_empty()
        || key.len() > MAX_KEY_LEN
        || key.chars().any(|ch| ch.is_whitespace() || ch.is_control())
    {
        return Err(RuntimeError::store(format!("invalid memcache key '{key}'")));
    }
    Ok(())
}

fn write_command(conn: &mut BufReader<TcpStream>, bytes: &[u8]) -> Result<(), RuntimeError> {
    let stream = conn.get_mut();
    stream
        .write_all(bytes)
        .and_then(|()| stream.flush())
        .map_err(|err| RuntimeError::store(format!("memcache write: {err}")))
}

fn read_line(conn: &mut BufReader<TcpStream>) -> Result<String, RuntimeError> {
    let mut line = String::new();
    let read = conn
        .read_line(&mut line)
        .map_err(|err| RuntimeError::store(format!("memcache read: {err}")))?;
    if read == 0 {
        return Err(RuntimeError::store("memcache connection closed"));
    }
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

fn expect_line(conn: &mut BufReader<TcpStream>, expected: &str) -> Result<(), RuntimeError> {
    let line = read_line(conn)?;
    if line == expected {
        Ok(())
    } else {
        Err(RuntimeError::store(format!(
            "memcache expected {expected}, got '{line}'"
        )))
    }
}

/// Parse `VALUE <key> <flags> <bytes>` and return the byte count.
fn parse_value_header(line: &str, key: &str) -> Result<usize, RuntimeError> {
    let mut parts = line.split_whitespace();
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some("VALUE"), Some(found), Some(_flags), Some(len)) if found == key => len
            .parse::<usize>()
            .map_err(|_| RuntimeError::store(format!("memcache bad length in '{line}'"))),
        _ => Err(RuntimeError::store(format!(
            "memcache unexpected reply '{line}'"
        ))),
    }
}
