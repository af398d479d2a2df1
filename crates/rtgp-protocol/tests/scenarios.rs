//! Concrete end-to-end scenarios exercising the protocol core directly
//! (no orchestrator involved - those live in `rtgp-client`/`rtgp-server`).

use std::time::{Duration, Instant};

use assert_matches::assert_matches;
use rtgp_protocol::connection::{Config as ConnectionConfig, ConnectionState, ConnectionStateMachine, TickAction};
use rtgp_protocol::header::{Flags, Header, SERVER_USER_ID, UNASSIGNED_USER_ID, assemble};
use rtgp_protocol::opcode::OpCode;
use rtgp_protocol::payload::{SEntityMoveBatch, MoveBatchEntry};
use rtgp_protocol::reliable::{ReliableChannel, ReliableConfig};
use rtgp_protocol::seq::Seq;
use rtgp_protocol::validate::validate;
use rtgp_protocol::{CodecError, ValidationError, WireDecode};
use bytes::{Bytes, BytesMut};

/// 1. Handshake: C_CONNECT(user_id=0, seq=0) accepted, S_ACCEPT(user_id=1, seq=0).
#[test]
fn handshake() {
    let connect = Header::new(OpCode::CConnect.to_byte(), 0, UNASSIGNED_USER_ID, 0, 0, Flags::empty().with_reliable(true));
    let datagram = assemble(&connect, &[]);
    let frame = validate(&datagram, false).expect("well-formed C_CONNECT");
    assert_eq!(frame.opcode, OpCode::CConnect);
    assert_eq!(frame.header.user_id, UNASSIGNED_USER_ID);

    let accept = Header::new(OpCode::SAccept.to_byte(), 4, SERVER_USER_ID, 0, 0, Flags::empty().with_reliable(true));
    let payload = rtgp_protocol::codec::encode_to_vec(&rtgp_protocol::payload::SAccept { new_user_id: 1 });
    let datagram = assemble(&accept, &payload);
    let frame = validate(&datagram, true).expect("well-formed S_ACCEPT");
    let accept_payload =
        rtgp_protocol::payload::SAccept::decode(&mut frame.payload.clone()).unwrap();
    assert_eq!(accept_payload.new_user_id, 1);

    let now = Instant::now();
    let mut machine = ConnectionStateMachine::new(ConnectionConfig::default(), now);
    machine.initiate_connect(now).unwrap();
    machine.handle_accept(1, now).unwrap();
    assert_eq!(machine.state(), ConnectionState::Connected);
}

/// 2. Heartbeat timeout: 11s without activity disconnects with `Timeout`.
#[test]
fn heartbeat_timeout_disconnects_after_eleven_seconds() {
    let start = Instant::now();
    let mut machine = ConnectionStateMachine::new(ConnectionConfig::default(), start);
    machine.initiate_connect(start).unwrap();
    machine.handle_accept(1, start).unwrap();

    let eleven_seconds_later = start + Duration::from_secs(11);
    let action = machine.tick(eleven_seconds_later);
    assert_eq!(action, TickAction::ConnectionTimedOut);
    assert_eq!(machine.state(), ConnectionState::Disconnected);
    assert_eq!(
        machine.last_disconnect_reason(),
        Some(rtgp_protocol::DisconnectReason::Timeout)
    );
}

/// 3 & 4. Retransmit + duplicate/ack: a dropped reliable frame is retransmitted
/// and processed exactly once by the receiver, which still ACKs the duplicate.
#[test]
fn retransmit_and_duplicate_detection() {
    let start = Instant::now();
    let mut sender = ReliableChannel::new(ReliableConfig::default());
    let spawn = rtgp_protocol::payload::SEntitySpawn {
        entity_id: 42,
        kind: 1,
        subtype: 0,
        x: 10.0,
        y: 20.0,
    };
    let header = Header::new(OpCode::SEntitySpawn.to_byte(), 14, SERVER_USER_ID, 7, 0, Flags::empty().with_reliable(true));
    let payload = rtgp_protocol::codec::encode_to_vec(&spawn);
    let frame_bytes = assemble(&header, &payload);
    sender.track_outgoing(Seq(7), frame_bytes.clone(), start).unwrap();

    // First datagram is "dropped on the wire" - the receiver never sees it.
    // No retransmit yet within the timeout window.
    assert!(sender.tick(start + Duration::from_millis(50)).is_empty());

    // Within 200ms-1000ms the sender re-emits the same bytes.
    let due = sender.tick(start + Duration::from_millis(250));
    assert_eq!(due, vec![(Seq(7), frame_bytes.clone())]);

    let mut receiver = ReliableChannel::new(ReliableConfig::default());
    let validated = validate(&frame_bytes, true).unwrap();
    assert!(!receiver.is_duplicate(Seq(validated.header.seq_id)));
    receiver.record_received(Seq(validated.header.seq_id)).unwrap();

    // Receiver gets the same bytes a second time (the original, un-dropped copy
    // arriving late, or a second retransmit) - it must be recognized as a
    // duplicate and not double-spawn the entity, but still ack.
    assert!(receiver.is_duplicate(Seq(validated.header.seq_id)));
    assert_matches!(
        receiver.record_received(Seq(validated.header.seq_id)),
        Err(rtgp_protocol::ReliableError::DuplicatePacket(7))
    );
    assert_eq!(receiver.last_received_seq_id(), Some(Seq(7)));

    sender.record_ack(Seq(7));
    sender.cleanup().unwrap();
    assert_eq!(sender.pending_count(), 0);
}

/// 5. Wrap: highest=65530, frames 65531..=65535,0,1,2 arrive in order; all
/// accepted, highest becomes 2, and ids outside the 1000-window behind 2 are pruned.
#[test]
fn wrap_around_sequence_acceptance() {
    let mut window = rtgp_protocol::reliable::AntiReplayWindow::new(1000);
    window.record_received(Seq(65530)).unwrap();

    let incoming: [u16; 8] = [65531, 65532, 65533, 65534, 65535, 0, 1, 2];
    for raw in incoming {
        window.record_received(Seq(raw)).unwrap();
    }

    assert_eq!(window.highest(), Some(Seq(2)));
    assert!(window.is_duplicate(Seq(65530)));
    assert!(window.is_duplicate(Seq(2)));
}

/// 6. Move-batch: count=3 entries with a shared server_tick decode correctly;
/// count=115 is rejected by the validator as MalformedPacket.
#[test]
fn move_batch_decodes_and_enforces_cap() {
    let batch = SEntityMoveBatch {
        server_tick: 1000,
        entries: vec![
            MoveBatchEntry { entity_id: 1, px: 1, py: 1, vx: 0, vy: 0 },
            MoveBatchEntry { entity_id: 2, px: 2, py: 2, vx: 0, vy: 0 },
            MoveBatchEntry { entity_id: 3, px: 3, py: 3, vx: 0, vy: 0 },
        ],
    };
    let mut payload_buf = BytesMut::new();
    batch.encode(&mut payload_buf);
    let payload = payload_buf.to_vec();
    let header = Header::new(
        OpCode::SEntityMoveBatch.to_byte(),
        payload.len() as u16,
        SERVER_USER_ID,
        0,
        0,
        Flags::empty(),
    );
    let datagram = assemble(&header, &payload);
    let frame = validate(&datagram, true).unwrap();
    let decoded = SEntityMoveBatch::decode(&mut frame.payload.clone()).unwrap();
    assert_eq!(decoded.server_tick, 1000);
    assert_eq!(decoded.entries.len(), 3);

    // count = 115 exceeds the 114 cap.
    let count: u8 = 115;
    let oversized_payload_size = 5 + usize::from(count) * 12;
    let mut oversized_payload = vec![0u8; oversized_payload_size];
    oversized_payload[0] = count;
    let oversized_header = Header::new(
        OpCode::SEntityMoveBatch.to_byte(),
        oversized_payload_size as u16,
        SERVER_USER_ID,
        0,
        0,
        Flags::empty(),
    );
    let oversized_datagram = assemble(&oversized_header, &oversized_payload);
    assert_matches!(
        validate(&oversized_datagram, true),
        Err(ValidationError::MalformedPacket)
    );
}

#[test]
fn decode_errors_do_not_panic_on_truncated_payload() {
    let header = Header::new(OpCode::SEntitySpawn.to_byte(), 14, SERVER_USER_ID, 0, 0, Flags::empty());
    let datagram = assemble(&header, &[0u8; 14]);
    let frame = validate(&datagram, true).unwrap();
    let mut truncated = Bytes::copy_from_slice(&frame.payload[..4]);
    assert_matches!(
        rtgp_protocol::payload::SEntitySpawn::decode(&mut truncated),
        Err(CodecError::BufferTooShort { .. })
    );
}
