//! Stream state creation, single dispatch, and release on every close path.

use h2_dispatch::{
    error_code, settings_id, DataProvider, H2Codec, H2Header, Handler, HandlerError, HandlerRegistry, Route,
    Session, SessionConfig, StreamState,
};

use super::client::{Client, Harness};

fn big_body(session: &mut Session<StreamState>, stream_id: u32, state: &mut StreamState) -> Result<(), HandlerError> {
    state.set_response(vec![b'z'; 100_000]);
    let headers = [H2Header::new(":status", "200")];
    session.submit_response(
        stream_id,
        &headers,
        Some(h2_dispatch::provide_response as DataProvider<StreamState>),
    )?;
    Ok(())
}

fn failing(_session: &mut Session<StreamState>, stream_id: u32, _state: &mut StreamState) -> Result<(), HandlerError> {
    Err(h2_dispatch::SessionError::StreamNotFound(stream_id).into())
}

#[test]
fn test_initial_settings_and_ack() {
    let h = Harness::new();
    assert_eq!(h.client.settings, vec![vec![(settings_id::MAX_CONCURRENT_STREAMS, 100)]]);
    assert_eq!(h.client.settings_acks, 1);
}

#[test]
fn test_completed_stream_releases_state() {
    let mut h = Harness::new();
    let request = h.client.get(1, "/");
    h.send(&request);

    let pipeline = h.registry.get(h.id).unwrap().pipeline();
    assert_eq!(pipeline.streams_opened(), 1);
    assert_eq!(pipeline.streams_released(), 1);
    assert_eq!(h.live_streams(), 0);
    assert!(!h.registry.get(h.id).unwrap().h2().session().contains_stream(1));
}

#[test]
fn test_request_without_end_stream_gets_no_response() {
    let mut h = Harness::new();
    let request = h.client.headers(1, &[(":method", "POST"), (":path", "/")], false);
    h.send(&request);
    h.send(&Client::data(1, b"partial", false));

    assert!(h.client.responses.is_empty());
    assert_eq!(h.handlers_invoked(), 0);
    assert_eq!(h.live_streams(), 1);
}

#[test]
fn test_trailers_end_the_request_once() {
    let mut h = Harness::new();
    let request = h.client.headers(1, &[(":method", "POST"), (":path", "/echo")], false);
    h.send(&request);
    h.send(&Client::data(1, b"abc", false));
    let trailers = h.client.headers(1, &[("x-checksum", "123")], true);
    h.send(&trailers);

    let response = h.client.response(1);
    assert_eq!(response.body, b"Headers:\n:method: POST\n:path: /echo\n\n\nBody:\nabc");
    assert!(response.complete);
    assert_eq!(h.handlers_invoked(), 1);
    assert_eq!(h.live_streams(), 0);
}

#[test]
fn test_client_reset_releases_state() {
    let mut h = Harness::new();
    let request = h.client.headers(1, &[(":path", "/")], false);
    h.send(&request);
    assert_eq!(h.live_streams(), 1);

    h.send(&H2Codec::create_rst_stream(1, error_code::CANCEL));
    assert_eq!(h.live_streams(), 0);
    assert_eq!(h.handlers_invoked(), 0);
    assert!(h.client.responses.is_empty());
}

#[test]
fn test_disconnect_releases_every_open_stream() {
    let mut h = Harness::new();
    let mut input = Vec::new();
    for stream_id in [1, 3, 5] {
        input.extend(h.client.headers(stream_id, &[(":path", "/")], false));
    }
    h.send(&input);
    assert_eq!(h.live_streams(), 3);

    assert_eq!(h.registry.disconnect(h.id), Some(3));
    assert!(h.registry.is_empty());
    assert!(h.wire.is_shut());
    assert_eq!(h.registry.disconnect(h.id), None);
}

#[test]
fn test_streams_over_limit_are_refused() {
    let config = SessionConfig { max_concurrent_streams: 1 };
    let mut h = Harness::with(HandlerRegistry::builtin(), config);
    let mut input = h.client.headers(1, &[(":path", "/")], false);
    input.extend(h.client.get(3, "/"));
    h.send(&input);

    assert_eq!(h.client.response(3).reset, Some(error_code::REFUSED_STREAM));
    assert_eq!(h.live_streams(), 1);
    assert_eq!(h.handlers_invoked(), 0);

    // Finishing stream 1 frees the slot for the next one.
    h.send(&Client::data(1, b"", true));
    let request = h.client.get(5, "/");
    h.send(&request);
    assert!(h.client.response(5).complete);
}

#[test]
fn test_response_body_waits_for_window() {
    let handlers = HandlerRegistry::builtin().route(Route::exact("/big"), Handler::new("big", big_body));
    let mut h = Harness::with(handlers, SessionConfig::default());
    let request = h.client.get(1, "/big");
    h.send(&request);

    {
        let response = h.client.response(1);
        assert_eq!(response.body.len(), 65_535);
        assert!(response.data_frames.iter().all(|&len| len <= 16_384));
        assert!(!response.complete);
    }
    assert_eq!(h.live_streams(), 1);

    let mut update = H2Codec::create_window_update(0, 40_000);
    update.extend(H2Codec::create_window_update(1, 40_000));
    h.send(&update);

    let response = h.client.response(1);
    assert_eq!(response.body.len(), 100_000);
    assert!(response.complete);
    assert_eq!(h.live_streams(), 0);
}

#[test]
fn test_handler_error_is_not_fatal() {
    let handlers = HandlerRegistry::builtin().route(Route::exact("/fail"), Handler::new("fail", failing));
    let mut h = Harness::with(handlers, SessionConfig::default());
    let request = h.client.get(1, "/fail");
    h.send(&request);

    assert!(h.client.responses.is_empty());
    assert!(h.registry.contains(h.id));

    let request = h.client.get(3, "/");
    h.send(&request);
    assert!(h.client.response(3).complete);
}

#[test]
fn test_data_after_close_is_reset() {
    let mut h = Harness::new();
    let request = h.client.get(1, "/");
    h.send(&request);
    h.send(&Client::data(1, b"stray", false));

    assert_eq!(h.client.response(1).reset, Some(error_code::STREAM_CLOSED));
    assert!(h.registry.contains(h.id));
}

#[test]
fn test_ping_is_answered() {
    let mut h = Harness::new();
    let mut ping = vec![0, 0, 8, 0x6, 0, 0, 0, 0, 0];
    ping.extend_from_slice(b"pingpong");
    h.send(&ping);

    assert_eq!(h.client.pings, vec![*b"pingpong"]);
}

#[test]
fn test_protocol_error_sends_goaway_and_drops_connection() {
    let mut h = Harness::new();
    let request = h.client.get(1, "/");
    h.send(&request);

    // Even stream ids belong to the server.
    let bad = h.client.get(2, "/");
    assert!(h.registry.receive(h.id, &bad).is_err());
    h.client.absorb(&h.wire.take());

    assert_eq!(h.client.goaway, Some((1, error_code::PROTOCOL_ERROR)));
    assert!(!h.registry.contains(h.id));
    assert!(h.wire.is_shut());
}
