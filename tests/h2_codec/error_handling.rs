//! Malformed input and the error codes it maps to

use h2_dispatch::{FrameError, H2Codec, H2Event, CONNECTION_PREFACE, error_code, flags, frame_type};

fn codec() -> H2Codec {
    let mut codec = H2Codec::new();
    codec.set_preface_received(true);
    codec
}

#[test]
fn test_short_control_frames() {
    let cases: [(&[u8], &str); 4] = [
        (&[0, 0, 2, 8, 0, 0, 0, 0, 1, 0, 0], "WINDOW_UPDATE"),
        (&[0, 0, 4, 6, 0, 0, 0, 0, 0, 1, 2, 3, 4], "PING"),
        (&[0, 0, 4, 7, 0, 0, 0, 0, 0, 0, 0, 0, 5], "GOAWAY"),
        (&[0, 0, 2, 3, 0, 0, 0, 0, 1, 0, 0], "RST_STREAM"),
    ];

    for (frame, name) in cases {
        let err = codec().process(frame).unwrap_err();
        assert!(matches!(err, FrameError::TooShort(n) if n == name), "{}: {:?}", name, err);
        assert_eq!(err.error_code(), error_code::FRAME_SIZE_ERROR);
    }
}

#[test]
fn test_padding_longer_than_payload() {
    let mut frame = vec![0, 0, 6, frame_type::DATA, 0x8, 0, 0, 0, 1];
    frame.push(10);
    frame.extend_from_slice(b"hello");

    let err = codec().process(&frame).unwrap_err();
    assert!(matches!(err, FrameError::InvalidPadding("DATA")));
    assert_eq!(err.error_code(), error_code::PROTOCOL_ERROR);
}

#[test]
fn test_settings_length_not_multiple_of_six() {
    for len in [5u8, 7, 11] {
        let mut frame = vec![0, 0, len, frame_type::SETTINGS, 0, 0, 0, 0, 0];
        frame.extend(std::iter::repeat(0).take(len as usize));

        let err = codec().process(&frame).unwrap_err();
        assert!(matches!(err, FrameError::SettingsLength(n) if n == len as usize), "{:?}", err);
        assert_eq!(err.error_code(), error_code::FRAME_SIZE_ERROR);
    }
}

#[test]
fn test_settings_ack_with_payload() {
    let frame = [0, 0, 6, frame_type::SETTINGS, flags::ACK, 0, 0, 0, 0, 0, 3, 0, 0, 0, 1];
    let err = codec().process(&frame).unwrap_err();
    assert!(matches!(err, FrameError::SettingsLength(6)));
    assert_eq!(err.error_code(), error_code::FRAME_SIZE_ERROR);
}

#[test]
fn test_headers_padding_fills_frame() {
    let frame = [
        0, 0, 3, frame_type::HEADERS, flags::END_HEADERS | flags::PADDED, 0, 0, 0, 1,
        2, 0, 0,
    ];
    let events = codec().process(&frame).unwrap();
    assert!(matches!(
        events.as_slice(),
        [H2Event::Headers { stream_id: 1, header_block, end_stream: false }] if header_block.is_empty()
    ));
}

#[test]
fn test_headers_padding_past_frame() {
    let frame = [
        0, 0, 3, frame_type::HEADERS, flags::END_HEADERS | flags::PADDED, 0, 0, 0, 1,
        3, 0, 0,
    ];
    let err = codec().process(&frame).unwrap_err();
    assert!(matches!(err, FrameError::InvalidPadding("HEADERS")));
}

#[test]
fn test_http1_request_is_invalid_preface() {
    let mut codec = H2Codec::new();
    let err = codec.process(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n").unwrap_err();
    assert!(matches!(err, FrameError::InvalidPreface));
    assert_eq!(err.error_code(), error_code::PROTOCOL_ERROR);
}

#[test]
fn test_corrupted_preface_tail() {
    let mut codec = H2Codec::new();
    let mut data = CONNECTION_PREFACE[..20].to_vec();
    data.extend_from_slice(b"XXXX");
    assert!(matches!(codec.process(&data), Err(FrameError::InvalidPreface)));
}

#[test]
fn test_oversized_frame_is_frame_size_error() {
    let frame = [0, 0x40, 0x01, frame_type::HEADERS, 0x4, 0, 0, 0, 1];
    let err = codec().process(&frame).unwrap_err();
    assert_eq!(err.error_code(), error_code::FRAME_SIZE_ERROR);
}

#[test]
fn test_single_frame_block_over_limit() {
    let mut codec = codec();
    codec.set_max_frame_size(0x00ff_ffff);

    let block = vec![0x82; 300 * 1024];
    let len = block.len() as u32;
    let mut data = vec![(len >> 16) as u8, (len >> 8) as u8, len as u8, frame_type::HEADERS, 0, 0, 0, 0, 1];
    data.extend_from_slice(&block);

    let err = codec.process(&data).unwrap_err();
    assert!(err.to_string().contains("header block too large"));
}
