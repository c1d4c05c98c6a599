use core::cell::RefCell;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::channel::Channel;

use crate::commands::*;
use crate::conn::{ConnId, Shared, SharedState};
use crate::error::Error;
use crate::event::Event;
use crate::parser::Parser;
use crate::pbuf::PacketBuf;
use crate::pipeline::{CmdPayload, Operation};

type EventChannel = Channel<CriticalSectionRawMutex, Event, 16>;

struct Fixture {
    shared: SharedState,
    events: EventChannel,
}

impl Fixture {
    fn new() -> Self {
        Self {
            shared: Mutex::new(RefCell::new(Shared::new())),
            events: Channel::new(),
        }
    }

    fn parser(&self) -> Parser<'_> {
        Parser::new(&self.shared, self.events.sender().into())
    }

    fn next_event(&self) -> Option<Event> {
        self.events.try_receive().ok()
    }
}

fn feed(parser: &mut Parser<'_>, bytes: &[u8]) {
    for &b in bytes {
        parser.feed(b);
    }
}

#[test]
fn test_wifi_urcs_update_state_and_emit() {
    let f = Fixture::new();
    let mut p = f.parser();

    feed(&mut p, b"WIFI CONNECTED\r\nWIFI GOT IP\r\n");
    assert!(matches!(f.next_event(), Some(Event::WifiConnected)));
    assert!(matches!(f.next_event(), Some(Event::WifiGotIp)));
    f.shared.lock(|s| {
        let s = s.borrow();
        assert!(s.wifi.joined);
        assert!(s.wifi.ip_assigned);
    });

    feed(&mut p, b"WIFI DISCONNECT\r\n");
    assert!(matches!(f.next_event(), Some(Event::WifiDisconnected)));
    f.shared.lock(|s| {
        let s = s.borrow();
        assert!(!s.wifi.joined);
        assert!(!s.wifi.ip_assigned);
    });
}

#[test]
fn test_echo_and_garbage_lines_are_dropped() {
    let f = Fixture::new();
    let mut p = f.parser();

    feed(&mut p, b"AT+CWMODE_CUR=1\r\nrubbish line\r\nSTATUS:2\r\n");
    assert!(f.next_event().is_none());
}

#[test]
fn test_terminal_resolves_inflight_command() {
    let f = Fixture::new();
    let mut p = f.parser();

    p.begin(&Operation::Mux(SetMultipleConnectionsCommand::multiple()));
    assert!(p.take_resolution().is_none());

    feed(&mut p, b"OK\r\n");
    assert!(matches!(p.take_resolution(), Some(Ok(CmdPayload::None))));
}

#[test]
fn test_error_and_fail_terminals() {
    let f = Fixture::new();
    let mut p = f.parser();

    p.begin(&Operation::Quit(QuitAccessPointCommand::default()));
    feed(&mut p, b"ERROR\r\n");
    assert!(matches!(p.take_resolution(), Some(Err(Error::Err))));

    p.begin(&Operation::Quit(QuitAccessPointCommand::default()));
    feed(&mut p, b"FAIL\r\n");
    assert!(matches!(p.take_resolution(), Some(Err(Error::ConnFail))));

    p.begin(&Operation::Quit(QuitAccessPointCommand::default()));
    feed(&mut p, b"busy p...\r\n");
    assert!(matches!(p.take_resolution(), Some(Err(Error::InProgress))));
}

#[test]
fn test_stray_terminal_without_inflight_is_ignored() {
    let f = Fixture::new();
    let mut p = f.parser();
    feed(&mut p, b"OK\r\nERROR\r\nSEND OK\r\n");
    assert!(f.next_event().is_none());
}

#[test]
fn test_send_prompt_and_send_ok() {
    let f = Fixture::new();
    let mut p = f.parser();

    let op = Operation::Send {
        id: ConnId::from_index(0),
        data: PacketBuf::from_slice(b"hello"),
    };
    p.begin(&op);

    // The OK before the prompt must not resolve a CIPSEND.
    feed(&mut p, b"OK\r\n");
    assert!(p.take_resolution().is_none());
    assert!(!p.prompt_seen());

    feed(&mut p, b"> ");
    assert!(p.prompt_seen());

    feed(&mut p, b"Recv 5 bytes\r\nSEND OK\r\n");
    assert!(matches!(p.take_resolution(), Some(Ok(CmdPayload::Sent(5)))));
}

#[test]
fn test_send_fail_resolves_with_error() {
    let f = Fixture::new();
    let mut p = f.parser();

    let op = Operation::Send {
        id: ConnId::from_index(1),
        data: PacketBuf::from_slice(b"xy"),
    };
    p.begin(&op);
    feed(&mut p, b"OK\r\n> SEND FAIL\r\n");
    assert!(matches!(p.take_resolution(), Some(Err(Error::Err))));
}

#[test]
fn test_connect_urc_activates_slot() {
    let f = Fixture::new();
    let mut p = f.parser();

    feed(&mut p, b"1,CONNECT\r\n");
    match f.next_event() {
        Some(Event::ConnActive { id, client }) => {
            assert_eq!(1, id.index());
            assert!(!client);
        }
        other => panic!("unexpected event {other:?}"),
    }
    f.shared.lock(|s| {
        let s = s.borrow();
        assert!(s.conns[1].active);
        assert!(!s.conns[1].client);
    });
}

#[test]
fn test_closed_urc_emits_final_event() {
    let f = Fixture::new();
    let mut p = f.parser();

    feed(&mut p, b"1,CONNECT\r\n");
    let _ = f.next_event();
    feed(&mut p, b"1,CLOSED\r\n");
    match f.next_event() {
        Some(Event::ConnClosed { id, forced }) => {
            assert_eq!(1, id.index());
            assert!(!forced);
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[test]
fn test_closed_urc_for_unknown_slot_is_silent() {
    let f = Fixture::new();
    let mut p = f.parser();
    feed(&mut p, b"3,CLOSED\r\n");
    assert!(f.next_event().is_none());
}

#[test]
fn test_ipd_binary_frame_delivery() {
    let f = Fixture::new();
    let mut p = f.parser();

    feed(&mut p, b"2,CONNECT\r\n");
    let _ = f.next_event();

    feed(&mut p, b"+IPD,2,5:hello");
    match f.next_event() {
        Some(Event::ConnDataRecv { id, data }) => {
            assert_eq!(2, id.index());
            assert_eq!(b"hello".to_vec(), data.to_vec());
        }
        other => panic!("unexpected event {other:?}"),
    }

    // Parser is back in line mode afterwards.
    feed(&mut p, b"WIFI GOT IP\r\n");
    assert!(matches!(f.next_event(), Some(Event::WifiGotIp)));
}

#[test]
fn test_ipd_payload_may_contain_line_noise() {
    let f = Fixture::new();
    let mut p = f.parser();

    feed(&mut p, b"0,CONNECT\r\n");
    let _ = f.next_event();

    feed(&mut p, b"+IPD,0,12:AB\r\nOK\r\nCD\r\n");
    match f.next_event() {
        Some(Event::ConnDataRecv { data, .. }) => {
            assert_eq!(b"AB\r\nOK\r\nCD\r\n".to_vec(), data.to_vec());
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[test]
fn test_ipd_split_across_arbitrary_chunks() {
    let f = Fixture::new();
    let mut p = f.parser();

    feed(&mut p, b"0,CONNECT\r\n");
    let _ = f.next_event();

    feed(&mut p, b"+IP");
    feed(&mut p, b"D,0,");
    feed(&mut p, b"4:ab");
    assert!(f.next_event().is_none());
    feed(&mut p, b"cd");
    match f.next_event() {
        Some(Event::ConnDataRecv { data, .. }) => {
            assert_eq!(b"abcd".to_vec(), data.to_vec());
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[test]
fn test_ipd_with_remote_info_records_peer() {
    let f = Fixture::new();
    let mut p = f.parser();

    feed(&mut p, b"0,CONNECT\r\n");
    let _ = f.next_event();

    feed(&mut p, b"+IPD,0,2,\"192.168.4.2\",49152:ok");
    match f.next_event() {
        Some(Event::ConnDataRecv { data, .. }) => {
            assert_eq!(b"ok".to_vec(), data.to_vec());
        }
        other => panic!("unexpected event {other:?}"),
    }
    f.shared.lock(|s| {
        let s = s.borrow();
        assert_eq!("192.168.4.2", s.conns[0].remote_host.as_ref().unwrap().as_str());
        assert_eq!(49152, s.conns[0].remote_port);
    });
}

#[test]
fn test_station_ip_query_state_lines() {
    let f = Fixture::new();
    let mut p = f.parser();

    p.begin(&Operation::StaIpGet(StationIpQueryCommand::default()));
    feed(
        &mut p,
        b"+CIPSTA_CUR:ip:\"10.0.0.9\"\r\n+CIPSTA_CUR:gateway:\"10.0.0.1\"\r\n+CIPSTA_CUR:netmask:\"255.255.255.0\"\r\nOK\r\n",
    );
    match p.take_resolution() {
        Some(Ok(CmdPayload::Ip(config))) => {
            assert_eq!("10.0.0.9", config.ip.unwrap().to_string());
            assert_eq!("10.0.0.1", config.gateway.unwrap().to_string());
            assert_eq!("255.255.255.0", config.netmask.unwrap().to_string());
        }
        other => panic!("unexpected resolution {other:?}"),
    }
}

#[test]
fn test_station_mac_query_state_line() {
    let f = Fixture::new();
    let mut p = f.parser();

    p.begin(&Operation::StaMacGet(StationMacQueryCommand::default()));
    feed(&mut p, b"+CIPSTAMAC_CUR:\"5c:cf:7f:01:02:03\"\r\nOK\r\n");
    match p.take_resolution() {
        Some(Ok(CmdPayload::Mac(mac))) => assert_eq!("5c:cf:7f:01:02:03", mac.as_str()),
        other => panic!("unexpected resolution {other:?}"),
    }
}

#[test]
fn test_ap_list_state_lines() {
    let f = Fixture::new();
    let mut p = f.parser();

    p.begin(&Operation::ApList(ListAccessPointsCommand::all()));
    feed(
        &mut p,
        b"+CWLAP:(3,\"HomeNet\",-55,\"aa:bb:cc:dd:ee:ff\",6)\r\n+CWLAP:(0,\"open,ap\",-90,\"11:22:33:44:55:66\",11)\r\nOK\r\n",
    );
    match p.take_resolution() {
        Some(Ok(CmdPayload::ApList(aps))) => {
            assert_eq!(2, aps.len());
            assert_eq!("HomeNet", aps[0].ssid.as_str());
            assert_eq!(-55, aps[0].rssi);
            assert_eq!(6, aps[0].channel);
            assert_eq!(3, aps[0].ecn);
            // Quoted comma must not split the field.
            assert_eq!("open,ap", aps[1].ssid.as_str());
            assert_eq!(11, aps[1].channel);
        }
        other => panic!("unexpected resolution {other:?}"),
    }
}

#[test]
fn test_cipstatus_lines_refresh_table() {
    let f = Fixture::new();
    let mut p = f.parser();

    p.begin(&Operation::Status(ConnectionStatusCommand::default()));
    feed(
        &mut p,
        b"STATUS:3\r\n+CIPSTATUS:0,\"TCP\",\"10.0.0.5\",8080,1024,0\r\n+CIPSTATUS:3,\"UDP\",\"10.0.0.7\",53,1025,1\r\nOK\r\n",
    );
    assert!(matches!(p.take_resolution(), Some(Ok(CmdPayload::None))));

    f.shared.lock(|s| {
        let s = s.borrow();
        assert!(s.conns[0].active);
        assert!(s.conns[0].client);
        assert_eq!(8080, s.conns[0].remote_port);
        assert!(s.conns[3].active);
        assert!(!s.conns[3].client);
        assert_eq!(crate::conn::ConnType::Udp, s.conns[3].conn_type);
    });
}
