//! Line/binary parser for the modem's reply stream.
//!
//! Bytes drained from the receive ring pass through here one at a time.
//! Normal operation accumulates CRLF-terminated lines which are classified
//! as terminals, state lines of the in-flight command, or unsolicited
//! messages. Two things break the line discipline and are handled as
//! sub-states: the `> ` prompt during a `CIPSEND` (no line ending at all)
//! and `+IPD` frames, where a `:` flips the parser into binary mode for
//! exactly the announced number of payload bytes.

use atat::AtatUrc;
use embassy_sync::channel::DynamicSender;
use heapless::Vec;

use crate::conn::{ConnId, ConnType, SharedState, MAX_CONNS};
use crate::error::Error;
use crate::event::Event;
use crate::pbuf::PacketBuf;
use crate::pipeline::{AccessPoint, CmdPayload, CmdResult, IpConfig, OpKind, Operation};
use crate::urc::{parse_decimal, trim_crlf, Urc};

const LINE_BUF_LEN: usize = 160;

/// Collected state-line data of the in-flight command.
enum Acc {
    None,
    Ip(IpConfig),
    Mac(Option<heapless::String<17>>),
    Aps(alloc::vec::Vec<AccessPoint>),
}

struct Inflight {
    kind: OpKind,
    conn: Option<ConnId>,
    send_len: usize,
    prompt: bool,
    acc: Acc,
    resolution: Option<CmdResult>,
}

enum Mode {
    Line,
    /// Binary payload of a `+IPD` frame.
    Ipd {
        id: usize,
        remaining: usize,
        collected: alloc::vec::Vec<u8>,
    },
}

pub(crate) struct Parser<'a> {
    line: Vec<u8, LINE_BUF_LEN>,
    mode: Mode,
    inflight: Option<Inflight>,
    /// Swallow the space following a detected `>` prompt
    eat_prompt_space: bool,
    shared: &'a SharedState,
    events: DynamicSender<'a, Event>,
}

impl<'a> Parser<'a> {
    pub(crate) fn new(shared: &'a SharedState, events: DynamicSender<'a, Event>) -> Self {
        Self {
            line: Vec::new(),
            mode: Mode::Line,
            inflight: None,
            eat_prompt_space: false,
            shared,
            events,
        }
    }

    /// Arms the parser for a freshly issued command.
    pub(crate) fn begin(&mut self, op: &Operation) {
        let send_len = match op {
            Operation::Send { data, .. } => data.len(),
            _ => 0,
        };
        self.inflight = Some(Inflight {
            kind: op.kind(),
            conn: op.conn(),
            send_len,
            prompt: false,
            acc: match op.kind() {
                OpKind::StaIpGet | OpKind::ApIpGet => Acc::Ip(IpConfig::default()),
                OpKind::StaMacGet | OpKind::ApMacGet => Acc::Mac(None),
                OpKind::ApList => Acc::Aps(alloc::vec::Vec::new()),
                _ => Acc::None,
            },
            resolution: None,
        });
    }

    /// Abandons the in-flight command, e.g. on a pipeline timeout.
    pub(crate) fn abort(&mut self) {
        self.inflight = None;
    }

    /// True once the `>` prompt for the in-flight `CIPSEND` was seen.
    pub(crate) fn prompt_seen(&self) -> bool {
        self.inflight.as_ref().is_some_and(|f| f.prompt)
    }

    /// Takes the terminal resolution of the in-flight command, if any.
    pub(crate) fn take_resolution(&mut self) -> Option<CmdResult> {
        if self.inflight.as_ref()?.resolution.is_some() {
            let mut inflight = self.inflight.take()?;
            inflight.resolution.take()
        } else {
            None
        }
    }

    pub(crate) fn feed(&mut self, byte: u8) {
        match &mut self.mode {
            Mode::Ipd {
                id,
                remaining,
                collected,
            } => {
                collected.push(byte);
                *remaining -= 1;
                if *remaining == 0 {
                    let id = *id;
                    let data = PacketBuf::from_vec(core::mem::take(collected));
                    self.mode = Mode::Line;
                    self.deliver_ipd(id, data);
                }
            }
            Mode::Line => self.feed_line_byte(byte),
        }
    }

    fn feed_line_byte(&mut self, byte: u8) {
        if self.eat_prompt_space {
            self.eat_prompt_space = false;
            if byte == b' ' {
                return;
            }
        }

        // Send prompt arrives without a line ending.
        if byte == b'>' && self.line.is_empty() {
            if let Some(inflight) = self.inflight.as_mut() {
                if inflight.kind == OpKind::Send && !inflight.prompt {
                    inflight.prompt = true;
                    self.eat_prompt_space = true;
                    return;
                }
            }
        }

        if byte == b'\n' {
            let line = core::mem::take(&mut self.line);
            let line = trim_crlf(&line);
            if !line.is_empty() {
                self.handle_line(line);
            }
            return;
        }

        // +IPD switches to binary mode at the colon, before any CRLF.
        if byte == b':' && self.line.starts_with(b"+IPD,") {
            let header = core::mem::take(&mut self.line);
            self.start_ipd(&header[5..]);
            return;
        }

        if self.line.push(byte).is_err() {
            // Oversized garbage line, drop it wholesale.
            self.line.clear();
        }
    }

    /// Parses `<id>,<len>[,"<ip>",<port>]` and enters binary mode.
    fn start_ipd(&mut self, header: &[u8]) {
        let mut fields = split_fields(header);
        let id = fields.next().and_then(parse_decimal);
        let len = fields.next().and_then(parse_decimal);
        let remote_host = fields.next().map(unquote);
        let remote_port = fields.next().and_then(parse_decimal);

        let (id, len) = match (id, len) {
            (Some(id), Some(len)) if id < MAX_CONNS && len > 0 => (id, len),
            _ => return,
        };

        if let Some(host) = remote_host {
            self.shared.lock(|s| {
                let mut s = s.borrow_mut();
                let entry = &mut s.conns[id];
                entry.remote_host = heapless::String::try_from(
                    core::str::from_utf8(host).unwrap_or_default(),
                )
                .ok();
                entry.remote_port = remote_port.unwrap_or(0) as u16;
            });
        }

        self.mode = Mode::Ipd {
            id,
            remaining: len,
            collected: alloc::vec::Vec::with_capacity(len),
        };
    }

    fn deliver_ipd(&mut self, id: usize, data: PacketBuf) {
        self.shared.lock(|s| {
            let mut s = s.borrow_mut();
            let entry = &mut s.conns[id];
            if !entry.active {
                // Missed the CONNECT line; treat as inbound server link.
                entry.reset();
                entry.active = true;
            }
            if entry.buffer_rx {
                entry.rx_chain.concat(data.share());
            }
        });
        self.emit(Event::ConnDataRecv {
            id: ConnId::from_index(id),
            data,
        });
    }

    fn handle_line(&mut self, line: &[u8]) {
        // Command echo
        if line.starts_with(b"AT+") || line == b"AT" {
            return;
        }

        if self.handle_terminal(line) {
            return;
        }

        if line.starts_with(b"+") {
            self.handle_state_line(line);
            return;
        }

        if line.starts_with(b"Recv ") || line.starts_with(b"STATUS:") {
            return;
        }

        match Urc::parse(line) {
            Some(Urc::Unknown) | None => {}
            Some(urc) => self.handle_urc(urc),
        }
    }

    /// Terminal lines resolve the in-flight command. Returns true when the
    /// line was consumed as a terminal.
    fn handle_terminal(&mut self, line: &[u8]) -> bool {
        let inflight = match self.inflight.as_mut() {
            Some(inflight) if inflight.resolution.is_none() => inflight,
            _ => {
                return matches!(
                    line,
                    b"OK" | b"ERROR" | b"FAIL" | b"SEND OK" | b"SEND FAIL" | b"no change"
                )
            }
        };

        let sending = inflight.kind == OpKind::Send;
        let resolution = match line {
            // For CIPSEND the OK only announces the prompt phase.
            b"OK" | b"no change" if !sending => Some(Ok(CmdPayload::None)),
            b"OK" | b"no change" => return true,
            b"SEND OK" if sending => Some(Ok(CmdPayload::Sent(inflight.send_len))),
            b"SEND FAIL" if sending => Some(Err(Error::Err)),
            b"SEND OK" | b"SEND FAIL" => return true,
            b"ERROR" => Some(Err(Error::Err)),
            b"FAIL" => Some(Err(Error::ConnFail)),
            line if line.starts_with(b"busy") => Some(Err(Error::InProgress)),
            _ => None,
        };

        match resolution {
            Some(result) => {
                let result = result.map(|payload| match payload {
                    CmdPayload::None => inflight.take_payload(),
                    payload => payload,
                });
                inflight.resolution = Some(result);
                true
            }
            None => false,
        }
    }

    fn handle_state_line(&mut self, line: &[u8]) {
        if line.starts_with(b"+IPD,") {
            // Header without payload, e.g. zero-length frame; ignore.
            return;
        }
        if line.starts_with(b"+CIPSTATUS:") {
            self.apply_status_line(&line[b"+CIPSTATUS:".len()..]);
            return;
        }

        let inflight = match self.inflight.as_mut() {
            Some(inflight) => inflight,
            None => return,
        };

        match &mut inflight.acc {
            Acc::Ip(cfg) => apply_ip_line(line, cfg),
            Acc::Mac(mac) => apply_mac_line(line, mac),
            Acc::Aps(aps) => {
                if line.starts_with(b"+CWLAP:") {
                    if let Some(ap) = parse_ap_entry(&line[b"+CWLAP:".len()..]) {
                        aps.push(ap);
                    }
                }
            }
            // Remaining state lines (e.g. +CWJAP error codes) carry no data
            // the driver keeps; the terminal decides the outcome.
            Acc::None => {}
        }
    }

    /// `<id>,"<type>","<ip>",<port>,<local>,<tetype>`
    fn apply_status_line(&mut self, rest: &[u8]) {
        let mut fields = split_fields(rest);
        let id = match fields.next().and_then(parse_decimal) {
            Some(id) if id < MAX_CONNS => id,
            _ => return,
        };
        let conn_type = fields.next().map(unquote).and_then(|t| match t {
            b"TCP" => Some(ConnType::Tcp),
            b"UDP" => Some(ConnType::Udp),
            b"SSL" => Some(ConnType::Ssl),
            _ => None,
        });
        let remote = fields.next().map(unquote).and_then(|host| {
            heapless::String::try_from(core::str::from_utf8(host).ok()?).ok()
        });
        let port = fields.next().and_then(parse_decimal).unwrap_or(0);
        let _local_port = fields.next();
        let tetype = fields.next().and_then(parse_decimal);

        self.shared.lock(|s| {
            let mut s = s.borrow_mut();
            let entry = &mut s.conns[id];
            entry.active = true;
            if let Some(ty) = conn_type {
                entry.conn_type = ty;
            }
            entry.remote_host = remote;
            entry.remote_port = port as u16;
            if let Some(tetype) = tetype {
                entry.client = tetype == 0;
            }
        });
    }

    fn handle_urc(&mut self, urc: Urc) {
        match urc {
            Urc::Ready => {
                self.shared.lock(|s| s.borrow_mut().wifi.ready = true);
                self.emit(Event::Ready);
            }
            Urc::WifiConnected => {
                self.shared.lock(|s| s.borrow_mut().wifi.joined = true);
                self.emit(Event::WifiConnected);
            }
            Urc::WifiDisconnected => {
                self.shared.lock(|s| {
                    let mut s = s.borrow_mut();
                    s.wifi.joined = false;
                    s.wifi.ip_assigned = false;
                });
                self.emit(Event::WifiDisconnected);
            }
            Urc::WifiGotIp => {
                self.shared.lock(|s| s.borrow_mut().wifi.ip_assigned = true);
                self.emit(Event::WifiGotIp);
            }
            Urc::ConnectionOpened(id) => {
                let client = self.shared.lock(|s| {
                    let mut s = s.borrow_mut();
                    let entry = &mut s.conns[id];
                    if !entry.reserved {
                        // Inbound connection accepted by the modem server.
                        entry.reset();
                    }
                    entry.active = true;
                    entry.closing = false;
                    entry.client
                });
                self.emit(Event::ConnActive {
                    id: ConnId::from_index(id),
                    client,
                });
            }
            Urc::ConnectionClosed(id) => {
                let was_known = self.shared.lock(|s| {
                    let mut s = s.borrow_mut();
                    let entry = &mut s.conns[id];
                    let known = entry.active || entry.reserved || entry.closing;
                    entry.active = false;
                    entry.closing = true;
                    known
                });
                if was_known {
                    let forced = self
                        .inflight
                        .as_ref()
                        .is_some_and(|f| f.kind == OpKind::Close && f.conn == Some(ConnId::from_index(id)));
                    self.emit(Event::ConnClosed {
                        id: ConnId::from_index(id),
                        forced,
                    });
                }
            }
            Urc::Unknown => {}
        }
    }

    fn emit(&mut self, event: Event) {
        if self.events.try_send(event).is_err() {
            self.shared.lock(|s| s.borrow_mut().events_dropped += 1);
        }
    }
}

impl Inflight {
    fn take_payload(&mut self) -> CmdPayload {
        match core::mem::replace(&mut self.acc, Acc::None) {
            Acc::None => CmdPayload::None,
            Acc::Ip(cfg) => CmdPayload::Ip(cfg),
            Acc::Mac(Some(mac)) => CmdPayload::Mac(mac),
            Acc::Mac(None) => CmdPayload::None,
            Acc::Aps(aps) => CmdPayload::ApList(aps),
        }
    }
}

/// `+CIPSTA_CUR:ip:"..."` / `+CIPAP_CUR:gateway:"..."`
fn apply_ip_line(line: &[u8], cfg: &mut IpConfig) {
    let Some(colon) = line.iter().position(|&b| b == b':') else {
        return;
    };
    let rest = &line[colon + 1..];
    let Some(field_end) = rest.iter().position(|&b| b == b':') else {
        return;
    };
    let (field, value) = (&rest[..field_end], unquote(&rest[field_end + 1..]));
    let Ok(value) = core::str::from_utf8(value) else {
        return;
    };
    let Ok(addr) = value.parse() else {
        return;
    };
    match field {
        b"ip" => cfg.ip = Some(addr),
        b"gateway" => cfg.gateway = Some(addr),
        b"netmask" => cfg.netmask = Some(addr),
        _ => {}
    }
}

/// `+CIPSTAMAC_CUR:"aa:bb:cc:dd:ee:ff"`
fn apply_mac_line(line: &[u8], out: &mut Option<heapless::String<17>>) {
    let Some(colon) = line.iter().position(|&b| b == b':') else {
        return;
    };
    let value = unquote(&line[colon + 1..]);
    if let Ok(s) = core::str::from_utf8(value) {
        *out = heapless::String::try_from(s).ok();
    }
}

/// `(<ecn>,"<ssid>",<rssi>,"<mac>",<channel>,...)`
fn parse_ap_entry(entry: &[u8]) -> Option<AccessPoint> {
    let entry = entry.strip_prefix(b"(")?;
    let entry = entry.strip_suffix(b")").unwrap_or(entry);
    let mut fields = split_fields(entry);

    let ecn = fields.next().and_then(parse_decimal)? as u8;
    let ssid = core::str::from_utf8(unquote(fields.next()?)).ok()?;
    let rssi_raw = fields.next()?;
    let mac = core::str::from_utf8(unquote(fields.next()?)).ok()?;
    let channel = fields.next().and_then(parse_decimal).unwrap_or(0) as u8;

    let rssi = match rssi_raw.strip_prefix(b"-") {
        Some(digits) => -(parse_decimal(digits)? as i16),
        None => parse_decimal(rssi_raw)? as i16,
    };

    Some(AccessPoint {
        ecn,
        ssid: heapless::String::try_from(ssid).ok()?,
        rssi,
        mac: heapless::String::try_from(mac).ok()?,
        channel,
    })
}

/// Splits a comma-separated argument list, leaving quoted fields intact.
fn split_fields(input: &[u8]) -> impl Iterator<Item = &[u8]> {
    let mut rest = input;
    let mut done = input.is_empty();
    core::iter::from_fn(move || {
        if done {
            return None;
        }
        let end = if rest.first() == Some(&b'"') {
            match rest[1..].iter().position(|&b| b == b'"') {
                Some(q) => {
                    let close = q + 2;
                    rest[close..]
                        .iter()
                        .position(|&b| b == b',')
                        .map(|c| close + c)
                        .unwrap_or(rest.len())
                }
                None => rest.len(),
            }
        } else {
            rest.iter()
                .position(|&b| b == b',')
                .unwrap_or(rest.len())
        };
        let field = &rest[..end];
        if end == rest.len() {
            done = true;
            rest = &[];
        } else {
            rest = &rest[end + 1..];
        }
        Some(field)
    })
}

/// Strips one layer of surrounding double quotes.
fn unquote(field: &[u8]) -> &[u8] {
    field
        .strip_prefix(b"\"")
        .and_then(|f| f.strip_suffix(b"\""))
        .unwrap_or(field)
}
