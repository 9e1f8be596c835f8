//! Parsing client frames into events

use h2_dispatch::{H2Codec, H2Event, H2FrameHeader, CONNECTION_PREFACE, error_code, frame_type, flags};

fn codec() -> H2Codec {
    let mut codec = H2Codec::new();
    codec.set_preface_received(true);
    codec
}

#[test]
fn test_frame_header_headers() {
    // HEADERS frame, length 10, stream 3, END_HEADERS
    let header = H2FrameHeader::parse(&[0, 0, 10, 1, 4, 0, 0, 0, 3]).unwrap();

    assert_eq!(header.length, 10);
    assert_eq!(header.frame_type, frame_type::HEADERS);
    assert_eq!(header.stream_id, 3);
    assert!(!header.is_end_stream());
    assert!(header.is_end_headers());
    assert_eq!(header.total_size(), 19);
}

#[test]
fn test_frame_header_needs_nine_bytes() {
    assert!(H2FrameHeader::parse(&[0, 0, 0, 4, 0, 0, 0, 0]).is_none());
}

#[test]
fn test_preface_then_settings_in_one_read() {
    let mut codec = H2Codec::new();
    let mut data = CONNECTION_PREFACE.to_vec();
    data.extend_from_slice(&[0, 0, 6, 4, 0, 0, 0, 0, 0, 0, 3, 0, 0, 0, 10]);

    let events = codec.process(&data).unwrap();
    assert!(codec.preface_received());
    match &events[..] {
        [H2Event::Settings { ack: false, settings }] => assert_eq!(settings, &vec![(3, 10)]),
        other => panic!("Expected one Settings event, got {:?}", other),
    }
}

#[test]
fn test_preface_split_byte_by_byte() {
    let mut codec = H2Codec::new();
    for byte in CONNECTION_PREFACE {
        assert!(codec.process(&[*byte]).unwrap().is_empty());
    }
    assert!(codec.preface_received());
    assert_eq!(codec.buffered(), 0);
}

#[test]
fn test_fragmented_data_frame() {
    let mut codec = codec();
    let mut frame = vec![0, 0, 5, 0, 1, 0, 0, 0, 1];
    frame.extend_from_slice(b"hello");

    assert!(codec.process(&frame[..4]).unwrap().is_empty());
    assert!(codec.process(&frame[4..11]).unwrap().is_empty());
    let events = codec.process(&frame[11..]).unwrap();

    match &events[..] {
        [H2Event::Data { stream_id: 1, data, end_stream: true, .. }] => assert_eq!(data, b"hello"),
        other => panic!("Expected Data event, got {:?}", other),
    }
}

#[test]
fn test_padded_data_frame() {
    let mut codec = codec();
    // END_STREAM | PADDED, pad length 4
    let mut frame = vec![0, 0, 10, 0, 0x9, 0, 0, 0, 1];
    frame.push(4);
    frame.extend_from_slice(b"hello");
    frame.extend_from_slice(&[0, 0, 0, 0]);

    let events = codec.process(&frame).unwrap();
    match &events[0] {
        H2Event::Data { data, end_stream, flow_len, .. } => {
            assert_eq!(data, b"hello");
            assert!(*end_stream);
            assert_eq!(*flow_len, 10);
        }
        other => panic!("Expected Data event, got {:?}", other),
    }
}

#[test]
fn test_request_sequence_on_two_streams() {
    let mut codec = codec();
    let mut data = Vec::new();
    // HEADERS stream 1 (END_STREAM | END_HEADERS)
    data.extend_from_slice(&[0, 0, 2, 1, 5, 0, 0, 0, 1, 0x82, 0x84]);
    // HEADERS stream 3 (END_HEADERS), then its body
    data.extend_from_slice(&[0, 0, 1, 1, 4, 0, 0, 0, 3, 0x83]);
    data.extend_from_slice(&[0, 0, 3, 0, 1, 0, 0, 0, 3]);
    data.extend_from_slice(b"abc");

    let events = codec.process(&data).unwrap();
    assert_eq!(events.len(), 3);
    assert!(matches!(events[0], H2Event::Headers { stream_id: 1, end_stream: true, .. }));
    assert!(matches!(events[1], H2Event::Headers { stream_id: 3, end_stream: false, .. }));
    assert!(matches!(events[2], H2Event::Data { stream_id: 3, end_stream: true, .. }));
}

#[test]
fn test_control_frames() {
    let mut codec = codec();
    let mut data = Vec::new();
    // RST_STREAM(1, CANCEL)
    data.extend_from_slice(&[0, 0, 4, 3, 0, 0, 0, 0, 1, 0, 0, 0, 8]);
    // PING ACK
    data.extend_from_slice(&[0, 0, 8, 6, flags::ACK, 0, 0, 0, 0, 1, 2, 3, 4, 5, 6, 7, 8]);
    // GOAWAY(last 5, NO_ERROR)
    data.extend_from_slice(&[0, 0, 8, 7, 0, 0, 0, 0, 0, 0, 0, 0, 5, 0, 0, 0, 0]);
    // WINDOW_UPDATE(0, 1000) with reserved bit set
    data.extend_from_slice(&[0, 0, 4, 8, 0, 0, 0, 0, 0, 0x80, 0, 0x03, 0xe8]);

    let events = codec.process(&data).unwrap();
    assert!(matches!(events[0], H2Event::StreamReset { stream_id: 1, error_code: error_code::CANCEL }));
    assert!(matches!(events[1], H2Event::Ping { ack: true, data: [1, 2, 3, 4, 5, 6, 7, 8] }));
    assert!(matches!(events[2], H2Event::GoAway { last_stream_id: 5, error_code: error_code::NO_ERROR }));
    assert!(matches!(events[3], H2Event::WindowUpdate { stream_id: 0, increment: 1000 }));
}

#[test]
fn test_priority_and_unknown_frames_ignored() {
    let mut codec = codec();
    let mut data = Vec::new();
    // PRIORITY on stream 1
    data.extend_from_slice(&[0, 0, 5, 2, 0, 0, 0, 0, 1, 0, 0, 0, 0, 16]);
    // Unknown type 0xfa
    data.extend_from_slice(&[0, 0, 2, 0xfa, 0, 0, 0, 0, 0, 0xde, 0xad]);
    // Then a real frame
    data.extend_from_slice(&[0, 0, 0, 4, flags::ACK, 0, 0, 0, 0]);

    let events = codec.process(&data).unwrap();
    assert_eq!(events.len(), 1);
    assert!(matches!(events[0], H2Event::Settings { ack: true, .. }));
}

#[test]
fn test_max_size_frame_accepted() {
    let mut codec = codec();
    let mut data = vec![0, 0x40, 0, frame_type::DATA, 0, 0, 0, 0, 1];
    data.extend_from_slice(&[0xab; 16384]);

    let events = codec.process(&data).unwrap();
    match &events[0] {
        H2Event::Data { data, .. } => assert_eq!(data.len(), 16384),
        other => panic!("Expected Data event, got {:?}", other),
    }
}

#[test]
fn test_raised_max_frame_size() {
    let mut codec = codec();
    codec.set_max_frame_size(32768);
    let mut data = vec![0, 0x60, 0, frame_type::DATA, 0, 0, 0, 0, 1];
    data.extend_from_slice(&[0; 0x6000]);

    assert_eq!(codec.process(&data).unwrap().len(), 1);
}
