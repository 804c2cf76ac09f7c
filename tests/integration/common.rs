#![allow(dead_code)]

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde_json::{Value, json};

use botgate::{Bot, Config, server};

pub const OWNER_ID: i64 = 9000;
pub const BOT_ID: i64 = 1111;
pub const SECRET: &str = "test-secret-token";
pub const HOOK_PATH: &str = "/hook";
pub const HOOK_HOST: &str = "bot.example.org";

/// Unique temp path per test (avoids parallel test contention).
pub fn temp_path(prefix: &str, suffix: &str) -> String {
    format!(
        "/tmp/{prefix}_{}{suffix}",
        uuid::Uuid::new_v4().to_string().split('-').next().unwrap()
    )
}

/*
 * Mock Telegram API
 */

/// Minimal in-process stand-in for the platform API: answers every GET
/// with `{"ok":true,...}` and records the decoded path+query of each call.
pub struct MockApi {
    addr: SocketAddr,
    calls: Arc<Mutex<Vec<String>>>,
    admins: Arc<Mutex<Value>>,
    stop: Arc<AtomicBool>,
}

impl MockApi {
    pub fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("mock api bind");
        let addr = listener.local_addr().unwrap();
        let calls = Arc::new(Mutex::new(Vec::new()));
        let admins = Arc::new(Mutex::new(json!([])));
        let stop = Arc::new(AtomicBool::new(false));

        {
            let calls = calls.clone();
            let admins = admins.clone();
            let stop = stop.clone();
            std::thread::spawn(move || {
                for stream in listener.incoming() {
                    if stop.load(Ordering::Acquire) {
                        break;
                    }

                    let Ok(stream) = stream else { continue };
                    let calls = calls.clone();
                    let admins = admins.clone();
                    std::thread::spawn(move || serve_one(stream, &calls, &admins));
                }
            });
        }

        Self { addr, calls, admins, stop }
    }

    /// API root in `Config::api_url` shape (the token gets appended).
    pub fn api_url(&self) -> String {
        format!("http://{}/bot", self.addr)
    }

    pub fn set_admins(&self, admins: Value) {
        *self.admins.lock().unwrap() = admins;
    }

    /// Every recorded call, URL-decoded.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, method: &str) -> Vec<String> {
        let needle = format!("/{method}?");
        let needle_bare = format!("/{method}");
        self.calls()
            .into_iter()
            .filter(|c| c.contains(&needle) || c.ends_with(&needle_bare))
            .collect()
    }

    /// Polls until a call to `method` matching `pred` shows up.
    pub fn wait_for_call(&self, method: &str, pred: impl Fn(&str) -> bool) -> Option<String> {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if let Some(call) = self.calls_to(method).into_iter().find(|c| pred(c)) {
                return Some(call);
            }

            std::thread::sleep(Duration::from_millis(20));
        }

        None
    }
}

impl Drop for MockApi {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        // Wake the accept loop so the thread can observe the flag.
        let _ = TcpStream::connect(self.addr);
    }
}

fn serve_one(mut stream: TcpStream, calls: &Mutex<Vec<String>>, admins: &Mutex<Value>) {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(2)));

    let mut raw = Vec::new();
    let mut chunk = [0u8; 4096];
    while !raw.windows(4).any(|w| w == b"\r\n\r\n") {
        match stream.read(&mut chunk) {
            Ok(0) | Err(_) => break,
            Ok(n) => raw.extend_from_slice(&chunk[..n]),
        }
    }

    let head = String::from_utf8_lossy(&raw);
    let Some(target) = head.split_whitespace().nth(1) else {
        return;
    };

    let target = urldecode(target);
    calls.lock().unwrap().push(target.clone());

    let result = if target.contains("/getChatAdministrators") {
        admins.lock().unwrap().clone()
    } else if target.contains("/sendMessage") || target.contains("/editMessageText") {
        json!({ "message_id": 100 })
    } else if target.contains("/getMe") {
        json!({ "id": BOT_ID, "is_bot": true, "first_name": "test", "username": "testbot" })
    } else {
        json!(true)
    };

    let body = json!({ "ok": true, "result": result }).to_string();
    let reply = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body,
    );
    let _ = stream.write_all(reply.as_bytes());
}

/// Decodes %XX escapes and '+' (the query encoding reqwest emits).
pub fn urldecode(src: &str) -> String {
    let bytes = src.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' if i + 2 < bytes.len() => {
                let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
                match hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                    Some(byte) => {
                        out.push(byte);
                        i += 3;
                    }
                    None => {
                        out.push(bytes[i]);
                        i += 1;
                    }
                }
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }

    String::from_utf8_lossy(&out).into_owned()
}

/*
 * Bot harness
 */

/// A Bot wired to a temp database and the mock API. Cleans both up on
/// drop.
pub struct TestBot {
    bot: Option<Arc<Bot>>,
    pub mock: MockApi,
    db_path: String,
    log_path: String,
}

impl TestBot {
    pub fn arc(&self) -> Arc<Bot> {
        self.bot.as_ref().unwrap().clone()
    }
}

impl Deref for TestBot {
    type Target = Bot;

    fn deref(&self) -> &Bot {
        self.bot.as_ref().unwrap()
    }
}

impl Drop for TestBot {
    fn drop(&mut self) {
        if let Some(bot) = self.bot.take() {
            bot.shutdown();
        }

        let _ = std::fs::remove_file(&self.db_path);
        let _ = std::fs::remove_file(format!("{}-wal", self.db_path));
        let _ = std::fs::remove_file(format!("{}-shm", self.db_path));
        let _ = std::fs::remove_file(&self.log_path);
    }
}

pub fn test_bot() -> TestBot {
    test_bot_with(|_| {})
}

pub fn test_bot_with(tweak: impl FnOnce(&mut Config)) -> TestBot {
    let mock = MockApi::start();
    let db_path = temp_path("botgate_test", ".db");
    let log_path = temp_path("botgate_test_chld", ".log");

    let mut cfg = Config {
        api_token: "TESTTOKEN".into(),
        api_secret: SECRET.into(),
        hook_url: format!("https://{HOOK_HOST}"),
        hook_path: HOOK_PATH.into(),
        bot_id: BOT_ID,
        owner_id: OWNER_ID,
        bot_username: "testbot".into(),
        listen_host: "127.0.0.1".into(),
        listen_port: 0,
        worker_threads_num: 2,
        worker_jobs_min: 8,
        worker_jobs_max: 64,
        db_file: db_path.clone().into(),
        db_pool_size: 2,
        cmd_path: "/tmp".into(),
        cmd_log_file: log_path.clone().into(),
        cmd_import_env: false,
        api_url: mock.api_url(),
    };
    tweak(&mut cfg);

    let bot = Arc::new(Bot::new(cfg).expect("bot init"));
    TestBot { bot: Some(bot), mock, db_path, log_path }
}

/// Runs an update through the dispatcher synchronously, off the pool.
pub fn dispatch(bot: &Bot, update: Value) {
    botgate::update::handle(bot, update);
}

/*
 * Update builders
 */

pub fn text_update(chat_id: i64, chat_type: &str, user_id: i64, text: &str) -> Value {
    json!({
        "update_id": 1,
        "message": {
            "message_id": 42,
            "date": 1700000000,
            "chat": { "id": chat_id, "type": chat_type, "title": "test chat" },
            "from": { "id": user_id, "is_bot": false, "first_name": "Tester" },
            "text": text,
            "entities": [{ "type": "bot_command", "offset": 0, "length": text.find(' ').unwrap_or(text.len()) }],
        },
    })
}

pub fn callback_update(chat_id: i64, user_id: i64, data: &str) -> Value {
    json!({
        "update_id": 2,
        "callback_query": {
            "id": "cbq-1",
            "from": { "id": user_id, "is_bot": false, "first_name": "Tester" },
            "data": data,
            "message": {
                "message_id": 77,
                "date": 1700000000,
                "chat": { "id": chat_id, "type": "group", "title": "test chat" },
                "from": { "id": BOT_ID, "is_bot": true, "first_name": "bot" },
                "text": "list",
            },
        },
    })
}

pub fn member_update(chat_id: i64, member_id: i64, is_bot: bool, joined: bool) -> Value {
    let user = json!({ "id": member_id, "is_bot": is_bot, "first_name": "Member" });
    let mut message = json!({
        "message_id": 43,
        "date": 1700000000,
        "chat": { "id": chat_id, "type": "supergroup", "title": "test chat" },
        "from": { "id": 4242, "is_bot": false, "first_name": "Inviter" },
    });

    if joined {
        message["new_chat_members"] = json!([user]);
    } else {
        message["left_chat_member"] = user;
    }

    json!({ "update_id": 3, "message": message })
}

/*
 * Ingress harness
 */

pub struct TestServer {
    pub addr: SocketAddr,
    shutdown: Arc<tokio::sync::Notify>,
    handle: Option<std::thread::JoinHandle<()>>,
}

/// Boots the real ingress loop on an ephemeral port.
pub fn start_server(bot: &TestBot) -> TestServer {
    let listener = server::bind("127.0.0.1", 0).expect("server bind");
    let addr = listener.local_addr().unwrap();
    let shutdown = Arc::new(tokio::sync::Notify::new());

    let bot = bot.arc();
    let sd = shutdown.clone();
    let handle = std::thread::spawn(move || {
        server::run(bot, listener, sd).expect("server run");
    });

    TestServer { addr, shutdown, handle: Some(handle) }
}

impl TestServer {
    /// Writes one raw request and reads the connection to EOF.
    pub fn roundtrip(&self, raw: &[u8]) -> Vec<u8> {
        let mut stream = TcpStream::connect(self.addr).expect("connect");
        stream.write_all(raw).expect("write");
        let _ = stream.set_read_timeout(Some(Duration::from_secs(5)));

        let mut out = Vec::new();
        let _ = stream.read_to_end(&mut out);
        out
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.notify_one();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// A fully valid webhook request for the test config.
pub fn webhook_request(body: &str) -> Vec<u8> {
    webhook_request_with(HOOK_PATH, HOOK_HOST, SECRET, body)
}

pub fn webhook_request_with(path: &str, host: &str, secret: &str, body: &str) -> Vec<u8> {
    format!(
        "POST {path} HTTP/1.1\r\n\
         Host: {host}\r\n\
         Content-Type: application/json\r\n\
         Content-Length: {}\r\n\
         X-Telegram-Bot-Api-Secret-Token: {secret}\r\n\
         \r\n\
         {body}",
        body.len(),
    )
    .into_bytes()
}
