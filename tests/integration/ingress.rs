use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::Duration;

use botgate::server::{RESPONSE_ERROR, RESPONSE_OK};

use crate::common::*;

const CHAT: i64 = -100200300;

// --- Authentication & validation ---

#[test]
fn test_unauthorized_webhook_gets_error_and_no_job() {
    let tb = test_bot();
    let srv = start_server(&tb);

    let reply = srv.roundtrip(&webhook_request_with(HOOK_PATH, HOOK_HOST, "wrong-secret", "{}"));
    assert_eq!(reply, RESPONSE_ERROR);

    // No job enqueued, no DB write.
    std::thread::sleep(Duration::from_millis(300));
    assert!(tb.mock.calls().is_empty());
    let conn = tb.db.get();
    let count: i64 =
        conn.query_row("SELECT COUNT(*) FROM Admin", [], |r| r.get(0)).unwrap();
    assert_eq!(count, 0);
}

#[test]
fn test_valid_update_gets_ok_and_reaches_handler() {
    let tb = test_bot();
    let srv = start_server(&tb);

    let body = text_update(CHAT, "group", 555, "/help").to_string();
    let reply = srv.roundtrip(&webhook_request(&body));
    assert_eq!(reply, RESPONSE_OK);

    // The worker handles the update and the builtin answers.
    assert!(tb.mock.wait_for_call("sendMessage", |c| c.contains("Command list")).is_some());
}

#[test]
fn test_wrong_method_rejected() {
    let tb = test_bot();
    let srv = start_server(&tb);

    let raw = format!(
        "GET {HOOK_PATH} HTTP/1.1\r\nHost: {HOOK_HOST}\r\nContent-Type: application/json\r\n\
         Content-Length: 2\r\nX-Telegram-Bot-Api-Secret-Token: {SECRET}\r\n\r\n{{}}"
    );
    assert_eq!(srv.roundtrip(raw.as_bytes()), RESPONSE_ERROR);
}

#[test]
fn test_wrong_path_rejected() {
    let tb = test_bot();
    let srv = start_server(&tb);
    assert_eq!(
        srv.roundtrip(&webhook_request_with("/other", HOOK_HOST, SECRET, "{}")),
        RESPONSE_ERROR,
    );
}

#[test]
fn test_wrong_host_rejected() {
    let tb = test_bot();
    let srv = start_server(&tb);
    assert_eq!(
        srv.roundtrip(&webhook_request_with(HOOK_PATH, "evil.example.org", SECRET, "{}")),
        RESPONSE_ERROR,
    );
}

#[test]
fn test_host_match_is_case_insensitive() {
    let tb = test_bot();
    let srv = start_server(&tb);
    assert_eq!(
        srv.roundtrip(&webhook_request_with(HOOK_PATH, "BOT.Example.ORG", SECRET, "{}")),
        RESPONSE_OK,
    );
}

#[test]
fn test_wrong_content_type_rejected() {
    let tb = test_bot();
    let srv = start_server(&tb);

    let raw = format!(
        "POST {HOOK_PATH} HTTP/1.1\r\nHost: {HOOK_HOST}\r\nContent-Type: text/plain\r\n\
         Content-Length: 2\r\nX-Telegram-Bot-Api-Secret-Token: {SECRET}\r\n\r\n{{}}"
    );
    assert_eq!(srv.roundtrip(raw.as_bytes()), RESPONSE_ERROR);
}

#[test]
fn test_missing_content_length_rejected() {
    let tb = test_bot();
    let srv = start_server(&tb);

    let raw = format!(
        "POST {HOOK_PATH} HTTP/1.1\r\nHost: {HOOK_HOST}\r\nContent-Type: application/json\r\n\
         X-Telegram-Bot-Api-Secret-Token: {SECRET}\r\n\r\n"
    );
    assert_eq!(srv.roundtrip(raw.as_bytes()), RESPONSE_ERROR);
}

#[test]
fn test_duplicate_content_length_rejected() {
    let tb = test_bot();
    let srv = start_server(&tb);

    let raw = format!(
        "POST {HOOK_PATH} HTTP/1.1\r\nHost: {HOOK_HOST}\r\nContent-Type: application/json\r\n\
         Content-Length: 2\r\nContent-Length: 2\r\n\
         X-Telegram-Bot-Api-Secret-Token: {SECRET}\r\n\r\n{{}}"
    );
    assert_eq!(srv.roundtrip(raw.as_bytes()), RESPONSE_ERROR);
}

#[test]
fn test_oversized_content_length_rejected() {
    let tb = test_bot();
    let srv = start_server(&tb);

    let raw = format!(
        "POST {HOOK_PATH} HTTP/1.1\r\nHost: {HOOK_HOST}\r\nContent-Type: application/json\r\n\
         Content-Length: 9999999\r\nX-Telegram-Bot-Api-Secret-Token: {SECRET}\r\n\r\n"
    );
    assert_eq!(srv.roundtrip(raw.as_bytes()), RESPONSE_ERROR);
}

#[test]
fn test_malformed_request_line_rejected() {
    let tb = test_bot();
    let srv = start_server(&tb);
    assert_eq!(srv.roundtrip(b"this is not http\r\n\r\n"), RESPONSE_ERROR);
}

#[test]
fn test_unparsable_json_body_rejected() {
    let tb = test_bot();
    let srv = start_server(&tb);
    assert_eq!(srv.roundtrip(&webhook_request("not json at all")), RESPONSE_ERROR);

    std::thread::sleep(Duration::from_millis(200));
    assert!(tb.mock.calls().is_empty());
}

#[test]
fn test_bytes_past_content_length_are_ignored() {
    let tb = test_bot();
    let srv = start_server(&tb);

    // Headers declare the JSON body's length; garbage follows it in the
    // same write. The stated body still parses, so the request is OK.
    let body = "{\"update_id\": 12}";
    let mut raw = webhook_request(body);
    raw.extend_from_slice(b"trailing-garbage");

    assert_eq!(srv.roundtrip(&raw), RESPONSE_OK);
}

// --- Transport behavior ---

#[test]
fn test_split_writes_are_reassembled() {
    let tb = test_bot();
    let srv = start_server(&tb);

    let raw = webhook_request("{\"update_id\": 9}");
    let (a, b) = raw.split_at(20);

    let mut stream = TcpStream::connect(srv.addr).unwrap();
    stream.write_all(a).unwrap();
    std::thread::sleep(Duration::from_millis(50));
    stream.write_all(b).unwrap();

    stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    let mut reply = Vec::new();
    let _ = stream.read_to_end(&mut reply);
    assert_eq!(reply, RESPONSE_OK);
}

#[test]
fn test_body_in_separate_write() {
    let tb = test_bot();
    let srv = start_server(&tb);

    let body = "{\"update_id\": 10}";
    let raw = webhook_request(body);
    let header_len = raw.len() - body.len();

    let mut stream = TcpStream::connect(srv.addr).unwrap();
    stream.write_all(&raw[..header_len]).unwrap();
    std::thread::sleep(Duration::from_millis(50));
    stream.write_all(&raw[header_len..]).unwrap();

    stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    let mut reply = Vec::new();
    let _ = stream.read_to_end(&mut reply);
    assert_eq!(reply, RESPONSE_OK);
}

#[test]
fn test_eof_before_complete_request_closes_without_response() {
    let tb = test_bot();
    let srv = start_server(&tb);

    let mut stream = TcpStream::connect(srv.addr).unwrap();
    stream.write_all(b"POST /hook HT").unwrap();
    // Half-close: the server sees EOF before the headers are complete.
    stream.shutdown(std::net::Shutdown::Write).unwrap();

    stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    let mut reply = Vec::new();
    let _ = stream.read_to_end(&mut reply);
    assert!(reply.is_empty());
}

#[test]
fn test_idle_connection_times_out() {
    let tb = test_bot();
    let srv = start_server(&tb);

    let mut stream = TcpStream::connect(srv.addr).unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(6))).unwrap();

    // No bytes sent; the 3-second connection deadline closes the socket.
    let mut reply = Vec::new();
    let _ = stream.read_to_end(&mut reply);
    assert!(reply.is_empty());
}

#[test]
fn test_requests_on_parallel_connections() {
    let tb = test_bot();
    let srv = start_server(&tb);

    let mut streams: Vec<TcpStream> = (0..8)
        .map(|_| TcpStream::connect(srv.addr).unwrap())
        .collect();

    let raw = webhook_request("{\"update_id\": 11}");
    for stream in &mut streams {
        stream.write_all(&raw).unwrap();
    }

    for mut stream in streams {
        stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        let mut reply = Vec::new();
        let _ = stream.read_to_end(&mut reply);
        assert_eq!(reply, RESPONSE_OK);
    }
}
