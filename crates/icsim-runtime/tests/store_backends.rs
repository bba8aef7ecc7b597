mod common;

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;

use icsim_runtime::protocol::RegisterServer;
use icsim_runtime::store::{FileStore, HardwareStore, MemcacheStore, MemoryStore, SqliteStore};
use icsim_runtime::{RuntimeError, Store, StoreDescriptor, StoreKind, TagRegistry, TagValue};
use smol_str::SmolStr;

fn seed() -> Vec<(SmolStr, TagValue)> {
    vec![
        (SmolStr::new("belt"), TagValue::from(1.0)),
        (SmolStr::new("distance"), TagValue::from(5.25)),
        (SmolStr::new("label"), TagValue::from("PN-1234")),
    ]
}

fn assert_round_trip(store: &dyn Store) {
    store.initialize(&seed(), true).expect("initialize");
    assert_eq!(store.get("distance").expect("get"), TagValue::from(5.25));
    assert_eq!(store.get("label").expect("get"), TagValue::from("PN-1234"));

    let written = store.set("distance", &TagValue::from(-3.5)).expect("set");
    assert_eq!(written, TagValue::from(-3.5));
    assert_eq!(store.get("distance").expect("get"), TagValue::from(-3.5));
    store.set("label", &TagValue::from("PN-9")).expect("set text");
    assert_eq!(store.get("label").expect("get"), TagValue::from("PN-9"));
}

#[test]
fn memory_store_round_trip_and_clear() {
    let store = MemoryStore::new();
    assert_round_trip(&store);

    let shared = store.clone();
    shared.set("belt", &TagValue::ZERO).expect("set through clone");
    assert_eq!(store.get("belt").expect("get"), TagValue::ZERO);

    store
        .initialize(&[(SmolStr::new("other"), TagValue::ZERO)], true)
        .expect("reinitialize");
    assert_eq!(
        store.get("belt").unwrap_err(),
        RuntimeError::UninitializedKey("belt".into())
    );
}

#[test]
fn sqlite_store_survives_reopen() {
    let path = common::temp_path("sqlite", ".sqlite");
    {
        let store = SqliteStore::new(&path, "tags");
        assert_round_trip(&store);
    }
    let reopened = SqliteStore::new(&path, "tags");
    assert_eq!(reopened.get("distance").expect("get"), TagValue::from(-3.5));
    assert_eq!(reopened.get("label").expect("get"), TagValue::from("PN-9"));

    reopened
        .initialize(&[(SmolStr::new("belt"), TagValue::ZERO)], true)
        .expect("clear");
    assert!(matches!(
        reopened.get("distance"),
        Err(RuntimeError::UninitializedKey(_))
    ));
    let _ = std::fs::remove_file(&path);
}

#[test]
fn sqlite_set_requires_initialized_key() {
    let path = common::temp_path("sqlite-uninit", ".sqlite");
    let store = SqliteStore::new(&path, "tags");
    store.initialize(&seed(), true).expect("initialize");
    assert_eq!(
        store.set("missing", &TagValue::ZERO).unwrap_err(),
        RuntimeError::UninitializedKey("missing".into())
    );
    let _ = std::fs::remove_file(&path);
}

#[test]
fn file_store_survives_reopen_and_keeps_unlisted_keys() {
    let path = common::temp_path("file", ".json");
    {
        let store = FileStore::new(&path);
        assert_round_trip(&store);
    }
    let reopened = FileStore::new(&path);
    assert_eq!(reopened.get("distance").expect("get"), TagValue::from(-3.5));

    reopened
        .initialize(&[(SmolStr::new("belt"), TagValue::ZERO)], false)
        .expect("seed without clearing");
    assert_eq!(reopened.get("belt").expect("get"), TagValue::ZERO);
    assert_eq!(reopened.get("label").expect("get"), TagValue::from("PN-9"));

    let text = std::fs::read_to_string(&path).expect("read file");
    let json: serde_json::Value = serde_json::from_str(&text).expect("plain json object");
    assert_eq!(json["label"], serde_json::json!("PN-9"));
    let _ = std::fs::remove_file(&path);
}

#[test]
fn descriptor_opens_the_selected_backend() {
    let tags = TagRegistry::default();
    let path = common::temp_path("descriptor", ".sqlite");
    let descriptor = StoreDescriptor::new(
        StoreKind::Sqlite,
        path.to_string_lossy().as_ref(),
        "tags",
    );
    let store = descriptor.open(&tags).expect("open sqlite");
    assert_eq!(store.kind(), StoreKind::Sqlite);

    let bad = StoreDescriptor::new(StoreKind::Sqlite, "storage/tags.db", "tags");
    assert!(matches!(bad.open(&tags), Err(RuntimeError::InvalidConfig(_))));

    let memory = StoreDescriptor::new(StoreKind::Memory, "", "tags");
    assert_eq!(memory.open(&tags).expect("open memory").kind(), StoreKind::Memory);
    let _ = std::fs::remove_file(&path);
}

fn start_fake_memcached() -> (SocketAddr, Arc<Mutex<HashMap<String, Vec<u8>>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind memcached");
    let addr = listener.local_addr().expect("memcached addr");
    let data = Arc::new(Mutex::new(HashMap::new()));
    let shared = data.clone();
    thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(stream) = stream else { break };
            let data = shared.clone();
            thread::spawn(move || serve_memcached(stream, &data));
        }
    });
    (addr, data)
}

fn serve_memcached(stream: TcpStream, data: &Mutex<HashMap<String, Vec<u8>>>) {
    let mut writer = stream.try_clone().expect("clone stream");
    let mut reader = BufReader::new(stream);
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).unwrap_or(0) == 0 {
            return;
        }
        let parts: Vec<&str> = line.split_whitespace().collect();
        let reply = match parts.as_slice() {
            ["set", key, _flags, _ttl, len] => {
                let len: usize = len.parse().expect("length");
                let mut payload = vec![0u8; len + 2];
                reader.read_exact(&mut payload).expect("payload");
                payload.truncate(len);
                data.lock().expect("data").insert((*key).to_string(), payload);
                b"STORED\r\n".to_vec()
            }
            ["get", key] => match data.lock().expect("data").get(*key) {
                Some(payload) => {
                    let mut reply = format!("VALUE {key} 0 {}\r\n", payload.len()).into_bytes();
                    reply.extend_from_slice(payload);
                    reply.extend_from_slice(b"\r\nEND\r\n");
                    reply
                }
                None => b"END\r\n".to_vec(),
            },
            ["flush_all"] => {
                data.lock().expect("data").clear();
                b"OK\r\n".to_vec()
            }
            _ => b"ERROR\r\n".to_vec(),
        };
        if writer.write_all(&reply).is_err() {
            return;
        }
    }
}

#[test]
fn memcache_store_round_trip_and_flush() {
    let (addr, data) = start_fake_memcached();
    let store = MemcacheStore::new(addr);
    assert_round_trip(&store);
    assert_eq!(
        data.lock().expect("data").get("label").map(Vec::as_slice),
        Some(b"\"PN-9\"".as_slice())
    );

    store
        .initialize(&[(SmolStr::new("belt"), TagValue::ZERO)], true)
        .expect("flush and seed");
    assert_eq!(
        store.get("distance").unwrap_err(),
        RuntimeError::UninitializedKey("distance".into())
    );
    assert_eq!(store.get("belt").expect("get"), TagValue::ZERO);
}

#[test]
fn memcache_store_reports_unreachable_server_as_transient() {
    let store = MemcacheStore::new(common::free_addr());
    let err = store.get("belt").unwrap_err();
    assert!(err.is_transient(), "{err}");
}

#[test]
fn hardware_store_writes_registers_by_tag_id() {
    let mut server = RegisterServer::new("127.0.0.1:0".parse().expect("addr"), 8);
    let addr = server.start().expect("start server");
    let store = HardwareStore::new(addr, [(SmolStr::new("level"), 3), (SmolStr::new("pump"), 4)]);

    store
        .initialize(&[(SmolStr::new("pump"), TagValue::from(1.0))], true)
        .expect("initialize");
    store.set("level", &TagValue::from(2.5)).expect("set");
    assert_eq!(server.get(3).expect("register"), TagValue::from(2.5));
    assert_eq!(server.get(4).expect("register"), TagValue::from(1.0));

    server.set(3, &TagValue::from(-0.125)).expect("server write");
    assert_eq!(store.get("level").expect("get"), TagValue::from(-0.125));
    assert!(matches!(
        store.get("unknown"),
        Err(RuntimeError::UninitializedKey(_))
    ));
    server.stop();
}

fn assert_rejects_non_finite(store: &dyn Store) {
    store.initialize(&seed(), true).expect("initialize");
    for bad in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
        assert_eq!(
            store.set("distance", &TagValue::from(bad)).unwrap_err(),
            RuntimeError::NonFiniteValue("distance".into())
        );
    }
    assert_eq!(store.get("distance").expect("get"), TagValue::from(5.25));
    assert!(matches!(
        store.initialize(&[(SmolStr::new("belt"), TagValue::from(f64::NAN))], false),
        Err(RuntimeError::NonFiniteValue(_))
    ));
}

#[test]
fn persistent_backends_reject_non_finite_numbers() {
    let sqlite_path = common::temp_path("sqlite-nan", ".sqlite");
    assert_rejects_non_finite(&SqliteStore::new(&sqlite_path, "tags"));
    let _ = std::fs::remove_file(&sqlite_path);

    let file_path = common::temp_path("file-nan", ".json");
    assert_rejects_non_finite(&FileStore::new(&file_path));
    let _ = std::fs::remove_file(&file_path);

    let (addr, _data) = start_fake_memcached();
    assert_rejects_non_finite(&MemcacheStore::new(addr));
}
