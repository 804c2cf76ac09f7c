//! Ingress server: one single-threaded event loop accepting webhook
//! deliveries. Each connection runs a small state machine over a fixed
//! buffer; a valid, authenticated JSON body is handed to the worker pool
//! at the finish state, and the connection always sees exactly one of the
//! two canned responses before the socket closes.

use std::cell::Cell;
use std::net::TcpListener as StdTcpListener;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tokio::time::timeout;

use crate::config::Config;
use crate::{Bot, Result, sched, update};

pub const MAX_CLIENTS: usize = 128;
pub const BUFFER_SIZE: usize = 512 * 1024;
pub const CONNECTION_TIMEOUT: Duration = Duration::from_secs(3);
const MAX_HEADERS: usize = 16;
const SECRET_HEADER: &str = "X-Telegram-Bot-Api-Secret-Token";

pub const RESPONSE_OK: &[u8] = b"HTTP/1.1 200 OK\r\nContent-Length:0\r\n\r\n";
pub const RESPONSE_ERROR: &[u8] = b"HTTP/1.1 400 Bad Request\r\nContent-Length:0\r\n\r\n";

/// Binds the listener ahead of the runtime so the caller can learn the
/// actual port (tests bind port 0).
pub fn bind(host: &str, port: u16) -> Result<StdTcpListener> {
    let listener = StdTcpListener::bind((host, port))?;
    listener.set_nonblocking(true)?;
    Ok(listener)
}

/// Runs the event loop on a current-thread runtime until ctrl-c or
/// `shutdown` is notified. In-flight clients are torn down on exit.
pub fn run(bot: Arc<Bot>, listener: StdTcpListener, shutdown: Arc<Notify>) -> Result<()> {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let local = tokio::task::LocalSet::new();

    rt.block_on(local.run_until(serve(bot, listener, shutdown)))
}

async fn serve(bot: Arc<Bot>, listener: StdTcpListener, shutdown: Arc<Notify>) -> Result<()> {
    let listener = TcpListener::from_std(listener)?;
    tracing::info!(addr = %listener.local_addr()?, "listening");

    let clients = Rc::new(Cell::new(0usize));
    let mut tick = tokio::time::interval(Duration::from_secs(1));
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupt, stopping");
                break;
            }
            _ = shutdown.notified() => {
                tracing::info!("shutdown requested, stopping");
                break;
            }
            _ = tick.tick() => {
                bot.chld.reap();
                sched::tick(&bot);
            }
            accepted = listener.accept() => {
                let stream = match accepted {
                    Ok((stream, _)) => stream,
                    Err(e) => {
                        tracing::warn!(error = %e, "accept failed");
                        continue;
                    }
                };

                if clients.get() >= MAX_CLIENTS {
                    tracing::warn!(count = clients.get(), "client table full, closing connection");
                    continue;
                }

                clients.set(clients.get() + 1);
                let bot = bot.clone();
                let clients = clients.clone();
                tokio::task::spawn_local(async move {
                    if timeout(CONNECTION_TIMEOUT, handle_client(&bot, stream)).await.is_err() {
                        tracing::info!("client timed out, closing");
                    }

                    clients.set(clients.get() - 1);
                });
            }
        }
    }

    Ok(())
}

/*
 * Per-connection state machine
 */

#[derive(Debug, Clone, Copy, PartialEq)]
enum State {
    ReqHeader,
    ReqBody,
    Response,
    Finish,
}

enum HeaderOutcome {
    /// Needs more data.
    Partial,
    /// Request rejected; answer with the error response.
    Invalid,
    Complete { hdr_len: usize, content_len: usize },
}

struct Client {
    stream: TcpStream,
    buf: Vec<u8>,
    filled: usize,
    body_len: usize,
    body: Option<Value>,
    responded: bool,
}

async fn handle_client(bot: &Arc<Bot>, stream: TcpStream) {
    let mut client = Client {
        stream,
        buf: vec![0; BUFFER_SIZE],
        filled: 0,
        body_len: 0,
        body: None,
        responded: false,
    };

    let mut state = State::ReqHeader;
    while state != State::Finish {
        state = match state {
            State::ReqHeader => client.state_req_header(&bot.cfg).await,
            State::ReqBody => client.state_req_body().await,
            State::Response => client.state_response().await,
            State::Finish => unreachable!(),
        };
    }

    client.finish(bot);
}

impl Client {
    /// Reads header bytes and feeds the incremental parser. A full buffer
    /// before the headers end closes the connection without a response.
    async fn state_req_header(&mut self, cfg: &Config) -> State {
        if self.filled == self.buf.len() {
            tracing::warn!("header buffer full, closing");
            return State::Finish;
        }

        match self.stream.read(&mut self.buf[self.filled..]).await {
            Ok(0) => {
                tracing::debug!("eof while reading header");
                return State::Finish;
            }
            Ok(n) => self.filled += n,
            Err(e) => {
                tracing::debug!(error = %e, "header read failed");
                return State::Finish;
            }
        }

        match parse_header(cfg, &self.buf[..self.filled]) {
            HeaderOutcome::Partial => State::ReqHeader,
            HeaderOutcome::Invalid => State::Response,
            HeaderOutcome::Complete { hdr_len, content_len } => {
                // The header has served its purpose; keep only the body.
                self.buf.copy_within(hdr_len..self.filled, 0);
                self.filled -= hdr_len;
                self.body_len = content_len;

                if self.filled >= content_len {
                    // Bytes past the declared length are ignored; the
                    // parse only sees the first content_len bytes.
                    self.parse_body();
                    return State::Response;
                }

                State::ReqBody
            }
        }
    }

    async fn state_req_body(&mut self) -> State {
        match self.stream.read(&mut self.buf[self.filled..self.body_len]).await {
            Ok(0) => {
                tracing::debug!("eof while reading body");
                return State::Finish;
            }
            Ok(n) => self.filled += n,
            Err(e) => {
                tracing::debug!(error = %e, "body read failed");
                return State::Finish;
            }
        }

        if self.filled < self.body_len {
            return State::ReqBody;
        }

        self.parse_body();
        State::Response
    }

    /// Sends exactly one of the two canned responses.
    async fn state_response(&mut self) -> State {
        let reply = if self.body.is_some() { RESPONSE_OK } else { RESPONSE_ERROR };

        match self.stream.write_all(reply).await {
            Ok(()) => self.responded = true,
            Err(e) => {
                tracing::debug!(error = %e, "response write failed");
                self.body = None;
            }
        }

        State::Finish
    }

    fn parse_body(&mut self) {
        match serde_json::from_slice(&self.buf[..self.body_len]) {
            Ok(json) => self.body = Some(json),
            Err(e) => tracing::warn!(error = %e, "unparsable body"),
        }
    }

    /// Hands the JSON tree to the worker pool. On submit failure the tree
    /// is dropped here; the client was already answered either way.
    fn finish(&mut self, bot: &Arc<Bot>) {
        let Some(json) = self.body.take() else {
            return;
        };

        if !self.responded {
            return;
        }

        let job_bot = bot.clone();
        if let Err(e) = bot.workers.submit(Box::new(move || update::handle(&job_bot, json))) {
            tracing::error!(error = %e, "update job not enqueued");
        }
    }
}

/*
 * Request validation
 */

fn parse_header(cfg: &Config, buf: &[u8]) -> HeaderOutcome {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut req = httparse::Request::new(&mut headers);

    match req.parse(buf) {
        Err(e) => {
            tracing::debug!(error = %e, "header parse failed");
            HeaderOutcome::Invalid
        }
        Ok(httparse::Status::Partial) => HeaderOutcome::Partial,
        Ok(httparse::Status::Complete(hdr_len)) => match validate(cfg, &req) {
            Some(content_len) => HeaderOutcome::Complete { hdr_len, content_len },
            None => HeaderOutcome::Invalid,
        },
    }
}

/// The request is rejected unless every check passes: POST on the hook
/// path with the right host, content type, secret token and a body that
/// fits the client buffer.
fn validate(cfg: &Config, req: &httparse::Request) -> Option<usize> {
    if !req.method?.eq_ignore_ascii_case("POST") {
        return None;
    }

    if !req.path?.eq_ignore_ascii_case(&cfg.hook_path) {
        return None;
    }

    let mut host: Option<&[u8]> = None;
    let mut content_type: Option<&[u8]> = None;
    let mut content_len: Option<&[u8]> = None;
    let mut secret: Option<&[u8]> = None;

    for header in req.headers.iter() {
        if header.name.eq_ignore_ascii_case("Host") {
            host.get_or_insert(header.value);
        } else if header.name.eq_ignore_ascii_case("Content-Type") {
            content_type.get_or_insert(header.value);
        } else if header.name.eq_ignore_ascii_case("Content-Length") {
            if content_len.is_some() {
                return None;
            }

            content_len = Some(header.value);
        } else if header.name.eq_ignore_ascii_case(SECRET_HEADER) {
            secret.get_or_insert(header.value);
        }
    }

    if secret? != cfg.api_secret.as_bytes() {
        return None;
    }

    let host = std::str::from_utf8(host?).ok()?;
    if !host.eq_ignore_ascii_case(cfg.hook_host()) {
        return None;
    }

    let content_type = std::str::from_utf8(content_type?).ok()?;
    if content_type.len() != "application/json".len()
        || !content_type.eq_ignore_ascii_case("application/json")
    {
        return None;
    }

    let content_len = std::str::from_utf8(content_len?).ok()?;
    let content_len: usize = content_len.trim().parse().ok()?;
    if content_len >= BUFFER_SIZE {
        return None;
    }

    Some(content_len)
}
