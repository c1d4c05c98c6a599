use crate::error::Error;
use crate::event::Event;
use crate::tests::mock::{drive, settle, Harness, Recorder, Sink, TestResources};
use crate::wifi::{JoinError, JoinOptions};

#[test]
fn test_init_and_join_byte_stream() {
    let mut res = TestResources::new();
    let mut h = Harness::new(&mut res);

    h.expect(b"AT+RST\r\n", b"OK\r\nready\r\n");
    h.expect(b"AT+CWMODE_CUR=1\r\n", b"OK\r\n");
    h.expect(b"AT+CIPMUX=1\r\n", b"OK\r\n");
    h.expect(b"AT+CIPDINFO=1\r\n", b"OK\r\n");
    h.expect(b"AT+CIPSTATUS\r\n", b"STATUS:5\r\nOK\r\n");
    h.expect(
        b"AT+CWJAP_CUR=\"ssid\",\"pw\"\r\n",
        b"WIFI CONNECTED\r\nWIFI GOT IP\r\nOK\r\n",
    );

    let driver = h.driver.clone();
    let mut recorder = Recorder::default();
    let state = drive(&mut h, &mut recorder, async {
        driver.init().await?;
        driver
            .join("ssid", "pw", JoinOptions::default())
            .await
            .map_err(|_| Error::Err)
    })
    .unwrap();

    assert!(state.joined);
    assert!(state.ip_assigned);

    assert_eq!(
        "AT+RST\r\n\
         AT+CWMODE_CUR=1\r\n\
         AT+CIPMUX=1\r\n\
         AT+CIPDINFO=1\r\n\
         AT+CIPSTATUS\r\n\
         AT+CWJAP_CUR=\"ssid\",\"pw\"\r\n",
        h.sent_str()
    );
    assert_eq!(0, h.unused_reactions());

    settle(&mut h, &mut recorder);
    assert!(recorder
        .events
        .iter()
        .any(|e| matches!(e, Event::InitFinish)));
    assert!(recorder
        .events
        .iter()
        .any(|e| matches!(e, Event::WifiConnected)));
}

#[test]
fn test_join_failure_maps_to_join_error() {
    let mut res = TestResources::new();
    let mut h = Harness::new(&mut res);
    h.expect(
        b"AT+CWJAP_CUR=\"net\",\"wrong\"\r\n",
        b"+CWJAP:1\r\nFAIL\r\n",
    );

    let driver = h.driver.clone();
    let result = drive(
        &mut h,
        &mut Sink,
        driver.join("net", "wrong", JoinOptions::default()),
    );
    assert_eq!(Err(JoinError::Failed), result.map(|_| ()));
}

#[test]
fn test_join_validates_credential_lengths() {
    let mut res = TestResources::new();
    let mut h = Harness::new(&mut res);

    let long_ssid = "x".repeat(33);
    let driver = h.driver.clone();
    let result = drive(
        &mut h,
        &mut Sink,
        driver.join(&long_ssid, "pw", JoinOptions::default()),
    );
    assert_eq!(Err(JoinError::InvalidSsidLength), result.map(|_| ()));

    let long_pw = "y".repeat(65);
    let driver = h.driver.clone();
    let result = drive(
        &mut h,
        &mut Sink,
        driver.join("net", &long_pw, JoinOptions::default()),
    );
    assert_eq!(Err(JoinError::InvalidPasswordLength), result.map(|_| ()));

    // Nothing went out on the wire.
    assert_eq!("", h.sent_str());
}

#[test]
fn test_join_with_bssid_and_save() {
    let mut res = TestResources::new();
    let mut h = Harness::new(&mut res);
    h.expect(
        b"AT+CWJAP_DEF=\"net\",\"pw\",\"aa:bb:cc:00:11:22\"\r\n",
        b"WIFI CONNECTED\r\nOK\r\n",
    );

    let driver = h.driver.clone();
    let options = JoinOptions {
        bssid: Some([0xaa, 0xbb, 0xcc, 0x00, 0x11, 0x22]),
        save: true,
    };
    let result = drive(&mut h, &mut Sink, driver.join("net", "pw", options));
    assert!(result.is_ok());
    assert_eq!(0, h.unused_reactions());
}

#[test]
fn test_quit_resets_nothing_else() {
    let mut res = TestResources::new();
    let mut h = Harness::new(&mut res);
    h.expect(b"AT+CWQAP\r\n", b"WIFI DISCONNECT\r\nOK\r\n");

    let driver = h.driver.clone();
    let result = drive(&mut h, &mut Sink, driver.quit());
    assert_eq!(Ok(()), result);
    assert!(!h.driver.wifi_status().joined);
}

#[test]
fn test_scan_returns_parsed_entries() {
    let mut res = TestResources::new();
    let mut h = Harness::new(&mut res);
    h.expect(
        b"AT+CWLAP\r\n",
        b"+CWLAP:(3,\"HomeNet\",-55,\"aa:bb:cc:dd:ee:ff\",6)\r\n+CWLAP:(4,\"Lab\",-71,\"00:11:22:33:44:55\",1)\r\nOK\r\n",
    );

    let driver = h.driver.clone();
    let aps = drive(&mut h, &mut Sink, driver.scan(None)).unwrap();
    assert_eq!(2, aps.len());
    assert_eq!("HomeNet", aps[0].ssid.as_str());
    assert_eq!(-71, aps[1].rssi);
}

#[test]
fn test_scan_with_ssid_filter() {
    let mut res = TestResources::new();
    let mut h = Harness::new(&mut res);
    h.expect(
        b"AT+CWLAP=\"HomeNet\"\r\n",
        b"+CWLAP:(3,\"HomeNet\",-55,\"aa:bb:cc:dd:ee:ff\",6)\r\nOK\r\n",
    );

    let driver = h.driver.clone();
    let aps = drive(&mut h, &mut Sink, driver.scan(Some("HomeNet"))).unwrap();
    assert_eq!(1, aps.len());
}

#[test]
fn test_station_ip_roundtrip() {
    let mut res = TestResources::new();
    let mut h = Harness::new(&mut res);
    h.expect(
        b"AT+CIPSTA_CUR?\r\n",
        b"+CIPSTA_CUR:ip:\"10.0.0.9\"\r\n+CIPSTA_CUR:gateway:\"10.0.0.1\"\r\n+CIPSTA_CUR:netmask:\"255.255.255.0\"\r\nOK\r\n",
    );
    h.expect(
        b"AT+CIPSTA_CUR=\"10.0.0.50\",\"10.0.0.1\",\"255.255.255.0\"\r\n",
        b"OK\r\n",
    );

    let driver = h.driver.clone();
    let config = drive(&mut h, &mut Sink, driver.station_ip()).unwrap();
    assert_eq!("10.0.0.9", config.ip.unwrap().to_string());

    let driver = h.driver.clone();
    let result = drive(
        &mut h,
        &mut Sink,
        driver.set_station_ip(
            "10.0.0.50".parse().unwrap(),
            Some(("10.0.0.1".parse().unwrap(), "255.255.255.0".parse().unwrap())),
            false,
        ),
    );
    assert_eq!(Ok(()), result);
    assert_eq!(0, h.unused_reactions());
}

#[test]
fn test_station_mac_get_and_set() {
    let mut res = TestResources::new();
    let mut h = Harness::new(&mut res);
    h.expect(
        b"AT+CIPSTAMAC_CUR?\r\n",
        b"+CIPSTAMAC_CUR:\"5c:cf:7f:01:02:03\"\r\nOK\r\n",
    );
    h.expect(b"AT+CIPSTAMAC_CUR=\"5c:cf:7f:0a:0b:0c\"\r\n", b"OK\r\n");

    let driver = h.driver.clone();
    let mac = drive(&mut h, &mut Sink, driver.station_mac()).unwrap();
    assert_eq!("5c:cf:7f:01:02:03", mac.as_str());

    let driver = h.driver.clone();
    let result = drive(
        &mut h,
        &mut Sink,
        driver.set_station_mac([0x5c, 0xcf, 0x7f, 0x0a, 0x0b, 0x0c]),
    );
    assert_eq!(Ok(()), result);
}

#[test]
fn test_ap_mac_multicast_bit_rejected() {
    let mut res = TestResources::new();
    let mut h = Harness::new(&mut res);

    let driver = h.driver.clone();
    let result = drive(
        &mut h,
        &mut Sink,
        driver.set_ap_mac([0x01, 0x00, 0x00, 0x00, 0x00, 0x01]),
    );
    assert_eq!(Err(Error::ParamErr), result);
    assert_eq!("", h.sent_str());
}

#[test]
fn test_server_setup_command_sequence() {
    let mut res = TestResources::new();
    let mut h = Harness::new(&mut res);
    h.expect(b"AT+CIPSERVERMAXCONN=2\r\n", b"OK\r\n");
    h.expect(b"AT+CIPSERVER=1,80\r\n", b"OK\r\n");
    h.expect(b"AT+CIPSTO=60\r\n", b"OK\r\n");

    let driver = h.driver.clone();
    let result = drive(&mut h, &mut Sink, driver.set_server(80, Some(2), Some(60)));
    assert_eq!(Ok(()), result);
    assert_eq!(
        "AT+CIPSERVERMAXCONN=2\r\nAT+CIPSERVER=1,80\r\nAT+CIPSTO=60\r\n",
        h.sent_str()
    );
}

#[test]
fn test_ssl_buffer_size_command() {
    let mut res = TestResources::new();
    let mut h = Harness::new(&mut res);
    h.expect(b"AT+CIPSSLSIZE=4096\r\n", b"OK\r\n");

    let driver = h.driver.clone();
    let result = drive(&mut h, &mut Sink, driver.set_ssl_buffer_size(4096));
    assert_eq!(Ok(()), result);
}
