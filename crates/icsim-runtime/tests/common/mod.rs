#![allow(dead_code)]

use std::net::{SocketAddr, TcpListener};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use icsim_runtime::device::ControllerAddresses;
use icsim_runtime::{ControllerId, Direction, TagDescriptor, TagValue};

static SEQ: AtomicU64 = AtomicU64::new(0);

/// Unique path under the system temp dir; nothing is created.
pub fn temp_path(label: &str, ext: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock")
        .as_nanos();
    let seq = SEQ.fetch_add(1, Ordering::SeqCst);
    std::env::temp_dir().join(format!(
        "icsim-{label}-{}-{nanos}-{seq}{ext}",
        std::process::id()
    ))
}

/// Loopback address with a port that was free a moment ago.
pub fn free_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind probe");
    listener.local_addr().expect("probe addr")
}

pub fn tag(
    name: &str,
    id: u16,
    owner: ControllerId,
    direction: Direction,
    default: impl Into<TagValue>,
) -> TagDescriptor {
    TagDescriptor {
        name: name.into(),
        id,
        owner,
        direction,
        fault_factor: 0.0,
        default: default.into(),
    }
}

pub fn addresses(entries: &[(ControllerId, SocketAddr)]) -> ControllerAddresses {
    entries.iter().copied().collect()
}
