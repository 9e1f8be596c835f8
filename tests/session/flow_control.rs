//! Send and receive windows as seen through the session.

use h2_dispatch::{
    error_code, settings_id, DataProvider, H2Codec, H2Event, H2Header, HpackEncoder, SessionError, SettingsEntry,
};

use super::peer::{data_lengths, frames, preface, provide, request, server, Body};

fn open_with_body(settings: &[(u16, u32)], body: &[u8]) -> h2_dispatch::H2Session<super::peer::Recorder> {
    let mut h2 = server();
    let mut encoder = HpackEncoder::new();
    let mut input = preface(settings);
    input.extend(request(&mut encoder, 1, "/", true));
    h2.mem_recv(&input).unwrap();

    h2.session_mut().stream_user_data_mut(1).unwrap().data = body.to_vec();
    h2.session_mut()
        .submit_response(1, &[H2Header::new(":status", "200")], Some(provide as DataProvider<Body>))
        .unwrap();
    h2
}

#[test]
fn test_small_peer_window_then_update() {
    let mut h2 = open_with_body(&[(settings_id::INITIAL_WINDOW_SIZE, 100)], &[1u8; 1000]);
    h2.send().unwrap();
    assert_eq!(data_lengths(&h2.callbacks().out, 1), vec![100]);
    assert!(h2.session().contains_stream(1));

    h2.mem_recv(&H2Codec::create_window_update(1, 900)).unwrap();
    h2.send().unwrap();
    assert_eq!(data_lengths(&h2.callbacks().out, 1), vec![100, 900]);
    assert!(!h2.session().contains_stream(1));
}

#[test]
fn test_settings_change_resizes_open_stream_window() {
    let mut h2 = open_with_body(&[(settings_id::INITIAL_WINDOW_SIZE, 0)], b"resumed body");
    h2.send().unwrap();
    assert!(data_lengths(&h2.callbacks().out, 1).is_empty());

    h2.mem_recv(&H2Codec::create_settings(&[(settings_id::INITIAL_WINDOW_SIZE, 500)]))
        .unwrap();
    h2.send().unwrap();
    assert_eq!(data_lengths(&h2.callbacks().out, 1), vec![12]);
}

#[test]
fn test_connection_window_limits_all_streams() {
    let mut h2 = open_with_body(&[], &vec![0u8; 70_000]);
    h2.send().unwrap();
    let sent: usize = data_lengths(&h2.callbacks().out, 1).iter().sum();
    assert_eq!(sent, 65_535);

    // A stream-level update alone does not reopen the connection window.
    h2.mem_recv(&H2Codec::create_window_update(1, 10_000)).unwrap();
    h2.send().unwrap();
    let sent: usize = data_lengths(&h2.callbacks().out, 1).iter().sum();
    assert_eq!(sent, 65_535);

    h2.mem_recv(&H2Codec::create_window_update(0, 10_000)).unwrap();
    h2.send().unwrap();
    let sent: usize = data_lengths(&h2.callbacks().out, 1).iter().sum();
    assert_eq!(sent, 70_000);
}

#[test]
fn test_peer_max_frame_size_sets_data_frame_size() {
    let mut h2 = open_with_body(&[(settings_id::MAX_FRAME_SIZE, 32_768)], &vec![0u8; 40_000]);
    h2.send().unwrap();
    assert_eq!(data_lengths(&h2.callbacks().out, 1), vec![32_768, 7_232]);
}

#[test]
fn test_invalid_peer_settings_are_fatal() {
    for settings in [
        vec![(settings_id::MAX_FRAME_SIZE, 100)],
        vec![(settings_id::ENABLE_PUSH, 2)],
    ] {
        let mut h2 = server();
        let err = h2.mem_recv(&preface(&settings)).unwrap_err();
        assert!(matches!(err, SessionError::Protocol(_)), "{:?}", settings);
    }

    let mut h2 = server();
    let err = h2
        .mem_recv(&preface(&[(settings_id::INITIAL_WINDOW_SIZE, 0x8000_0000)]))
        .unwrap_err();
    assert_eq!(err.error_code(), error_code::FLOW_CONTROL_ERROR);
}

#[test]
fn test_window_update_overflow_is_fatal() {
    let mut h2 = server();
    let mut input = preface(&[]);
    input.extend(H2Codec::create_window_update(0, 0x7fff_ffff));
    let err = h2.mem_recv(&input).unwrap_err();
    assert!(matches!(err, SessionError::FlowControl));
}

#[test]
fn test_zero_increment() {
    let mut h2 = server();
    let mut encoder = HpackEncoder::new();
    let mut input = preface(&[]);
    input.extend(request(&mut encoder, 1, "/", false));
    input.extend(H2Codec::create_window_update(1, 0));
    h2.mem_recv(&input).unwrap();
    assert_eq!(h2.callbacks().closes(), vec![(1, error_code::PROTOCOL_ERROR)]);

    let err = h2.mem_recv(&H2Codec::create_window_update(0, 0)).unwrap_err();
    assert!(matches!(err, SessionError::Protocol(_)));
}

#[test]
fn test_data_beyond_local_window_is_fatal() {
    let mut h2 = server();
    h2.submit_settings(&[SettingsEntry::initial_window_size(10)]).unwrap();
    let mut encoder = HpackEncoder::new();
    let mut input = preface(&[]);
    input.extend(request(&mut encoder, 1, "/", false));
    input.extend(H2Codec::create_data_frame(1, &[0u8; 20], false));

    let err = h2.mem_recv(&input).unwrap_err();
    assert!(matches!(err, SessionError::FlowControl));
}

#[test]
fn test_receive_windows_replenished_at_half() {
    let mut h2 = server();
    let mut encoder = HpackEncoder::new();
    let mut input = preface(&[]);
    input.extend(request(&mut encoder, 1, "/", false));
    for _ in 0..3 {
        input.extend(H2Codec::create_data_frame(1, &[0u8; 16_384], false));
    }
    h2.mem_recv(&input).unwrap();
    h2.send().unwrap();

    let updates: Vec<(u32, u32)> = frames(&h2.callbacks().out)
        .into_iter()
        .filter_map(|e| match e {
            H2Event::WindowUpdate { stream_id, increment } => Some((stream_id, increment)),
            _ => None,
        })
        .collect();
    assert_eq!(updates, vec![(0, 49_152), (1, 49_152)]);
}
