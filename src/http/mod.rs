//! Embedded HTTP server on top of the connection event interface.
//!
//! The server is an [`EventHandler`]: register it on the event pump and
//! point the modem server at a port, e.g.
//!
//! ````ignore
//! static FILES: StaticFiles = StaticFiles::new(&[("/index.html", b"<html/>")]);
//!
//! let mut server = HttpServer::new(StaticFiles::new(FILE_TABLE), MyApp, &[]);
//! driver.set_server(80, None, None).await?;
//! pump.run(&mut server).await;
//! ````
//!
//! For every inbound connection the server accumulates the request until
//! the header terminator, resolves the URI through index/CGI/404 rules,
//! then pumps the response file out under transmit-credit control, with SSI
//! substitution for template files. `GET` and `POST` are supported;
//! anything else earns a fixed `405` with an `Allow` header.

pub mod fs;
pub mod ssi;

use crate::conn::{ConnId, CONN_MAX_DATA_LEN, MAX_CONNS};
use crate::device::Driver;
use crate::event::{Event, EventHandler};
use crate::pbuf::PacketBuf;

use fs::{FileProvider, HttpFile};
use ssi::{SsiEngine, SsiStep};

/// Longest accepted request URI.
pub const HTTP_MAX_URI_LEN: usize = 256;

/// Maximum number of parsed query parameters.
pub const HTTP_MAX_PARAMS: usize = 16;

/// Probed in order when the request asks for `/`.
const INDEX_FILES: &[&str] = &[
    "/index.shtml",
    "/index.shtm",
    "/index.ssi",
    "/index.html",
    "/index.htm",
];

/// Probed in order when no file matched the request.
const NOT_FOUND_FILES: &[&str] = &[
    "/404.shtml",
    "/404.shtm",
    "/404.ssi",
    "/404.html",
    "/404.htm",
];

/// URI suffixes that enable SSI processing, compared case-insensitively.
const SSI_SUFFIXES: &[&str] = &[".shtml", ".shtm", ".ssi"];

const RESPONSE_405: &[u8] =
    b"HTTP/1.1 405 Method Not Allowed\r\nConnection: close\r\nAllow: GET, POST\r\n\r\n";

const CRLF_CRLF: &[u8] = b"\r\n\r\n";

/// Request method as far as the server cares.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Method {
    Get,
    Post,
    NotAllowed,
}

/// Parsed query parameters, name/value pairs borrowed from the request URI.
pub struct Params<'a> {
    pairs: heapless::Vec<(&'a str, Option<&'a str>), HTTP_MAX_PARAMS>,
}

impl<'a> Params<'a> {
    fn parse(query: &'a str) -> Self {
        let mut pairs = heapless::Vec::new();
        for pair in query.split('&') {
            if pairs.is_full() {
                break;
            }
            let entry = match pair.split_once('=') {
                Some((name, value)) => (name, Some(value)),
                None => (pair, None),
            };
            let _ = pairs.push(entry);
        }
        Self { pairs }
    }

    fn empty() -> Self {
        Self {
            pairs: heapless::Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(n, _)| *n == name)
            .and_then(|(_, v)| *v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.pairs.iter().copied()
    }
}

/// Server-registered URI rewrite hook. The handler inspects the query
/// parameters and returns the path of the file to serve instead.
pub struct CgiEntry {
    pub uri: &'static str,
    pub handler: fn(&Params<'_>) -> &'static str,
}

/// Emits SSI replacement bytes into the connection.
pub struct TagWriter<'w, 'a> {
    driver: &'w Driver<'a>,
    id: ConnId,
    written_total: &'w mut usize,
    credit: &'w mut usize,
}

impl TagWriter<'_, '_> {
    /// Writes replacement bytes for the current tag.
    pub fn write(&mut self, bytes: &[u8]) {
        if self.driver.write(self.id, bytes).is_ok() {
            *self.written_total += bytes.len();
            *self.credit = self.credit.saturating_sub(bytes.len());
        }
    }

    pub fn write_str(&mut self, text: &str) {
        self.write(text.as_bytes());
    }
}

/// Application surface of the HTTP server: SSI tag values and POST body
/// consumption. All methods default to doing nothing.
pub trait HttpApp {
    /// Produce the replacement for SSI tag `name`.
    fn ssi_tag(&mut self, name: &str, out: &mut TagWriter<'_, '_>) {
        let _ = (name, out);
    }

    /// A POST request with a body starts for `uri`.
    fn post_start(&mut self, id: ConnId, uri: &str, content_length: usize) {
        let _ = (id, uri, content_length);
    }

    /// The next chunk of the POST body. Chunks concatenate to exactly the
    /// announced content length, regardless of how receives were split.
    fn post_data(&mut self, id: ConnId, data: &PacketBuf) {
        let _ = (id, data);
    }

    /// The POST body is complete, or the connection died before it was.
    /// Called exactly once per started POST.
    fn post_end(&mut self, id: ConnId) {
        let _ = id;
    }
}

/// Response buffer: a window into a static file or an owned chunk of a
/// dynamic one.
enum RespBuf {
    None,
    Static(&'static [u8]),
    Dynamic(alloc::vec::Vec<u8>),
}

impl RespBuf {
    fn bytes(&self) -> &[u8] {
        match self {
            RespBuf::None => &[],
            RespBuf::Static(data) => data,
            RespBuf::Dynamic(data) => data,
        }
    }

    fn is_none(&self) -> bool {
        matches!(self, RespBuf::None)
    }
}

/// Per-connection request/response state.
struct HttpState {
    req: PacketBuf,
    headers_received: bool,
    method: Method,
    content_length: usize,
    content_received: usize,
    post_started: bool,
    post_ended: bool,
    resp_file: Option<HttpFile>,
    buf: RespBuf,
    buf_ptr: usize,
    written_total: usize,
    sent_total: usize,
    process_resp: bool,
    is_ssi: bool,
    ssi: SsiEngine,
    responded_405: bool,
    close_requested: bool,
}

impl HttpState {
    fn new() -> Self {
        Self {
            req: PacketBuf::new(),
            headers_received: false,
            method: Method::NotAllowed,
            content_length: 0,
            content_received: 0,
            post_started: false,
            post_ended: false,
            resp_file: None,
            buf: RespBuf::None,
            buf_ptr: 0,
            written_total: 0,
            sent_total: 0,
            process_resp: false,
            is_ssi: false,
            ssi: SsiEngine::new(),
            responded_405: false,
            close_requested: false,
        }
    }

    fn buf_consumed(&self) -> bool {
        self.buf_ptr >= self.buf.bytes().len()
    }
}

/// HTTP server driving up to [`MAX_CONNS`] connections.
pub struct HttpServer<P: FileProvider, A: HttpApp> {
    provider: P,
    app: A,
    cgi: &'static [CgiEntry],
    states: [Option<HttpState>; MAX_CONNS],
}

impl<P: FileProvider, A: HttpApp> HttpServer<P, A> {
    pub fn new(provider: P, app: A, cgi: &'static [CgiEntry]) -> Self {
        Self {
            provider,
            app,
            cgi,
            states: [None, None, None, None, None],
        }
    }

    pub fn app(&mut self) -> &mut A {
        &mut self.app
    }

    fn on_data(&mut self, driver: &Driver<'_>, id: ConnId, data: PacketBuf) {
        let Some(state) = self.states[id.index()].as_mut() else {
            return;
        };

        if !state.headers_received {
            state.req.concat(data);
            if let Some(hdr_end) = state.req.strfind(CRLF_CRLF, 0) {
                state.headers_received = true;
                self.on_headers_complete(id, hdr_end);
            }
        } else if state.method == Method::Post && state.content_received < state.content_length {
            state.content_received += data.len();
            self.app.post_data(id, &data);
            let state = self.states[id.index()].as_mut().unwrap();
            if state.content_received >= state.content_length {
                state.process_resp = true;
                self.finish_post(id);
            }
        }
        // Anything else is a protocol violation; the data is dropped.

        self.pump(driver, id);
    }

    /// Parses the request line and headers, classifies the method, streams
    /// any early body bytes and opens the response file.
    fn on_headers_complete(&mut self, id: ConnId, hdr_end: usize) {
        let mut uri_buf = [0u8; HTTP_MAX_URI_LEN];
        let state = self.states[id.index()].as_mut().unwrap();

        let uri_len = parse_uri(&state.req, &mut uri_buf);

        state.method = if state.req.starts_with(b"GET ", 0) {
            Method::Get
        } else if state.req.starts_with(b"POST ", 0) {
            Method::Post
        } else {
            Method::NotAllowed
        };

        match state.method {
            Method::Post => {
                let data_pos = hdr_end + CRLF_CRLF.len();
                state.content_length = parse_content_length(&state.req);
                state.content_received = 0;

                if state.content_length > 0 {
                    state.post_started = true;
                    let uri = uri_str(&uri_buf, uri_len);
                    let content_length = state.content_length;
                    self.app.post_start(id, uri, content_length);

                    let state = self.states[id.index()].as_mut().unwrap();
                    if state.req.len() > data_pos {
                        state.content_received = state.req.len() - data_pos;
                        let body = state.req.skip_to(data_pos);
                        self.app.post_data(id, &body);

                        let state = self.states[id.index()].as_mut().unwrap();
                        if state.content_received >= state.content_length {
                            state.process_resp = true;
                            self.finish_post(id);
                        }
                    }
                } else {
                    state.process_resp = true;
                }
            }
            Method::Get => {
                state.process_resp = true;
            }
            Method::NotAllowed => {
                state.process_resp = true;
            }
        }

        let state = self.states[id.index()].as_mut().unwrap();
        if uri_len > 0 && state.method != Method::NotAllowed {
            self.resolve_file(id, &mut uri_buf, uri_len);
        }
    }

    fn finish_post(&mut self, id: ConnId) {
        let state = self.states[id.index()].as_mut().unwrap();
        if state.post_started && !state.post_ended {
            state.post_ended = true;
            self.app.post_end(id);
        }
    }

    /// URI resolution: index list for `/`, then CGI rewriting with query
    /// parameters, then the 404 list. A successful open also decides
    /// whether SSI processing applies, based on the resolved suffix.
    fn resolve_file(&mut self, id: ConnId, uri_buf: &mut [u8], uri_len: usize) {
        let uri = core::str::from_utf8(&uri_buf[..uri_len]).unwrap_or("/");
        let mut opened: Option<(HttpFile, &str)> = None;

        if uri == "/" || uri.starts_with("/?") {
            for index in INDEX_FILES {
                if let Some(file) = self.provider.open(index) {
                    opened = Some((file, index));
                    break;
                }
            }
        }

        if opened.is_none() {
            let (path, query) = match uri.split_once('?') {
                Some((path, query)) => (path, Some(query)),
                None => (uri, None),
            };
            let params = match query {
                Some(query) => Params::parse(query),
                None => Params::empty(),
            };

            let mut target = path;
            for entry in self.cgi {
                if entry.uri == path {
                    target = (entry.handler)(&params);
                    break;
                }
            }
            if let Some(file) = self.provider.open(target) {
                opened = Some((file, target));
            }
        }

        if opened.is_none() {
            for not_found in NOT_FOUND_FILES {
                if let Some(file) = self.provider.open(not_found) {
                    opened = Some((file, not_found));
                    break;
                }
            }
        }

        let state = self.states[id.index()].as_mut().unwrap();
        if let Some((file, resolved)) = opened {
            state.is_ssi = SSI_SUFFIXES
                .iter()
                .any(|suffix| has_suffix_ignore_case(resolved, suffix));
            state.resp_file = Some(file);
        }
    }

    /// Response pump, run on `ConnDataSent`, `ConnPoll` and whenever
    /// `process_resp` first turns true. Refuses to emit while previously
    /// written bytes are still in flight.
    fn pump(&mut self, driver: &Driver<'_>, id: ConnId) {
        let Some(state) = self.states[id.index()].as_mut() else {
            return;
        };
        if !state.process_resp
            || state.close_requested
            || (state.written_total > 0 && state.written_total != state.sent_total)
        {
            return;
        }

        if state.resp_file.is_some() {
            if state.is_ssi {
                self.emit_ssi(driver, id);
            } else {
                self.emit_plain(driver, id);
            }
            let state = self.states[id.index()].as_mut().unwrap();
            if state.buf.is_none() {
                self.request_close(driver, id);
            }
        } else {
            if state.method == Method::NotAllowed && !state.responded_405 {
                state.responded_405 = true;
                // Bytes deliberately not counted towards written_total so
                // the pump does not wait for their confirmation.
                let _ = driver.send_chain(id, PacketBuf::from_slice(RESPONSE_405));
            }
            self.request_close(driver, id);
        }
    }

    /// Plain emission: read the next window of the response file, queue it,
    /// wait for confirmation before the next window.
    fn emit_plain(&mut self, driver: &Driver<'_>, id: ConnId) {
        let state = self.states[id.index()].as_mut().unwrap();
        if state.buf.is_none() || state.buf_consumed() {
            self.refill(id);
        }

        let state = self.states[id.index()].as_mut().unwrap();
        let bytes = state.buf.bytes();
        if !bytes.is_empty() {
            let payload = PacketBuf::from_slice(bytes);
            let len = payload.len();
            if driver.send_chain(id, payload).is_ok() {
                state.written_total += len;
                state.buf_ptr = len;
            }
        }
    }

    /// SSI emission under transmit-credit control.
    fn emit_ssi(&mut self, driver: &Driver<'_>, id: ConnId) {
        let mut credit = driver.write_credit(id);

        // Left-over tag bytes from an earlier credit exhaustion go first.
        let need_refill = {
            let state = self.states[id.index()].as_mut().unwrap();
            let pending = state.ssi.pending_flush();
            if pending > 0 {
                let n = pending.min(credit);
                if n > 0 {
                    let from = state.ssi.buffered().len() - pending;
                    let chunk = &state.ssi.buffered()[from..from + n];
                    if driver.write(id, chunk).is_ok() {
                        state.written_total += n;
                        state.ssi.note_flushed(n);
                        credit -= n;
                    }
                }
            }
            state.buf_consumed()
        };
        if need_refill {
            self.refill(id);
        }

        loop {
            let state = self.states[id.index()].as_mut().unwrap();
            if credit == 0 || state.buf_consumed() {
                break;
            }
            let ch = state.buf.bytes()[state.buf_ptr];

            match state.ssi.step(ch) {
                SsiStep::Consumed => {
                    state.buf_ptr += 1;
                }
                SsiStep::TagComplete => {
                    state.buf_ptr += 1;
                    let mut name_buf = [0u8; ssi::SSI_TAG_MAX_LEN];
                    let name = state.ssi.tag_name();
                    let name_len = name.len();
                    name_buf[..name_len].copy_from_slice(name);
                    state.ssi.tag_done();

                    let written_total = &mut state.written_total;
                    if let Ok(name) = core::str::from_utf8(&name_buf[..name_len]) {
                        let mut out = TagWriter {
                            driver,
                            id,
                            written_total,
                            credit: &mut credit,
                        };
                        self.app.ssi_tag(name, &mut out);
                    }
                }
                SsiStep::Reset { flush_len } => {
                    if flush_len > 0 {
                        let n = flush_len.min(credit);
                        let chunk = &state.ssi.buffered()[..n];
                        if n > 0 && driver.write(id, chunk).is_ok() {
                            state.written_total += n;
                            state.ssi.note_flushed(n);
                            credit -= n;
                        }
                    }
                    if credit > 0 {
                        if driver.write(id, &[ch]).is_ok() {
                            state.written_total += 1;
                            credit -= 1;
                        }
                        state.buf_ptr += 1;
                    }
                    state.ssi.reset_phase();
                }
            }
        }

        let _ = driver.flush(id);

        // Pull in the next window once this one is fully processed, so the
        // buf-empty check in the pump only fires at end of file.
        let state = self.states[id.index()].as_mut().unwrap();
        if state.buf_consumed() && !state.buf.is_none() {
            self.refill(id);
        }
    }

    /// Reads the next response-file window into the state buffer. Static
    /// files are windowed without copying; dynamic files are read into a
    /// heap buffer sized to the remaining length, halving on allocation
    /// failure down to 64 bytes.
    fn refill(&mut self, id: ConnId) {
        let state = self.states[id.index()].as_mut().unwrap();
        state.buf = RespBuf::None;
        state.buf_ptr = 0;

        let Some(file) = state.resp_file.as_mut() else {
            return;
        };
        let remaining = file.remaining();
        if remaining == 0 {
            return;
        }

        if let Some(data) = file.static_data {
            let len = remaining.min(CONN_MAX_DATA_LEN);
            let window = &data[file.pos..file.pos + len];
            file.pos += len;
            state.buf = RespBuf::Static(window);
            return;
        }

        let mut len = remaining.min(CONN_MAX_DATA_LEN);
        loop {
            let mut buf = alloc::vec::Vec::new();
            if buf.try_reserve_exact(len).is_ok() {
                buf.resize(len, 0);
                let got = self.provider.read(file, &mut buf);
                if got == 0 {
                    return;
                }
                buf.truncate(got);
                file.pos += got;
                state.buf = RespBuf::Dynamic(buf);
                return;
            }
            len /= 2;
            if len < 64 {
                return;
            }
        }
    }

    fn request_close(&mut self, driver: &Driver<'_>, id: ConnId) {
        let state = self.states[id.index()].as_mut().unwrap();
        if !state.close_requested {
            state.close_requested = true;
            let _ = driver.close_later(id);
        }
    }

    /// Final cleanup after the connection went away: an unfinished POST
    /// still gets its end callback, the response file is closed and any
    /// dynamic buffer is dropped.
    fn on_closed(&mut self, id: ConnId) {
        let Some(mut state) = self.states[id.index()].take() else {
            return;
        };
        if state.method == Method::Post && state.post_started && !state.post_ended {
            state.post_ended = true;
            self.app.post_end(id);
        }
        if let Some(file) = state.resp_file.take() {
            self.provider.close(file);
        }
    }
}

impl<P: FileProvider, A: HttpApp> EventHandler for HttpServer<P, A> {
    fn on_event(&mut self, driver: &Driver<'_>, event: Event) {
        match event {
            Event::ConnActive { id, client: false } => {
                self.states[id.index()] = Some(HttpState::new());
            }
            Event::ConnDataRecv { id, data } => self.on_data(driver, id, data),
            Event::ConnDataSent { id, len, .. } => {
                if let Some(state) = self.states[id.index()].as_mut() {
                    state.sent_total += len;
                    self.pump(driver, id);
                }
            }
            Event::ConnDataSendErr { id } => {
                if self.states[id.index()].is_some() {
                    self.request_close(driver, id);
                }
            }
            Event::ConnPoll { id } => self.pump(driver, id),
            Event::ConnClosed { id, .. } => self.on_closed(id),
            _ => {}
        }
    }
}

/// Extracts the request URI into `out`, returning its length (0 on parse
/// failure). Accepts both `GET <uri> HTTP/x.y` and the bare `GET <uri>`
/// form of HTTP/0.9.
fn parse_uri(req: &PacketBuf, out: &mut [u8]) -> usize {
    let Some(pos_s) = req.strfind(b" ", 0) else {
        return 0;
    };
    if pos_s != 3 && pos_s != 4 {
        return 0;
    }
    let Some(pos_crlf) = req.strfind(b"\r\n", 0) else {
        return 0;
    };
    let pos_e = match req.strfind(b" ", pos_s + 1) {
        Some(pos) if pos < pos_crlf => pos,
        _ => pos_crlf,
    };

    let uri_len = pos_e - pos_s - 1;
    if uri_len == 0 || uri_len > out.len() {
        return 0;
    }
    let mut copied = 0;
    for i in 0..uri_len {
        match req.get_at(pos_s + 1 + i) {
            Some(b) => {
                out[i] = b;
                copied += 1;
            }
            None => return 0,
        }
    }
    copied
}

fn uri_str(buf: &[u8], len: usize) -> &str {
    core::str::from_utf8(&buf[..len]).unwrap_or("/")
}

/// Finds `Content-Length:`/`content-length:` and parses the decimal value,
/// skipping one optional space. Zero when absent or malformed.
fn parse_content_length(req: &PacketBuf) -> usize {
    let pos = req
        .strfind(b"Content-Length:", 0)
        .or_else(|| req.strfind(b"content-length:", 0));
    let Some(mut pos) = pos else {
        return 0;
    };
    pos += b"Content-Length:".len();
    if req.get_at(pos) == Some(b' ') {
        pos += 1;
    }
    let mut value = 0usize;
    while let Some(ch) = req.get_at(pos) {
        if !ch.is_ascii_digit() {
            break;
        }
        value = value * 10 + (ch - b'0') as usize;
        pos += 1;
    }
    value
}

fn has_suffix_ignore_case(path: &str, suffix: &str) -> bool {
    path.len() > suffix.len()
        && path[path.len() - suffix.len()..].eq_ignore_ascii_case(suffix)
}
