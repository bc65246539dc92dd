// Protocol Tests
// Tests for the sha sub-protocol command schemas and frames

use shard_sync::collation::{Collation, CollationHeader};
use shard_sync::merkle::Hash32;
use shard_sync::protocol::{
    Command, CommandCodec, ProtocolError, CMD_LENGTH, PROTOCOL_NAME, PROTOCOL_VERSION,
};

fn collation(period: u64) -> Collation {
    let header = CollationHeader::new(2, Hash32::from_bytes([period as u8; 32]), period, [0x11; 20]);
    Collation::new(header, vec![period as u8; 64])
}

// ============================================================================
// PROTOCOL IDENTITY
// ============================================================================

#[test]
fn test_protocol_identity() {
    assert_eq!(PROTOCOL_NAME, "sha");
    assert_eq!(PROTOCOL_VERSION, 0);
    assert_eq!(CMD_LENGTH, 4);
}

#[test]
fn test_command_names() {
    assert_eq!(Command::Status.name(), "Status");
    let cmd = Command::NewCollationHashes {
        collation_hashes_and_periods: vec![],
    };
    assert_eq!(cmd.name(), "NewCollationHashes");
}

#[test]
fn test_request_ids() {
    assert_eq!(Command::Status.request_id(), None);
    let get = Command::GetCollations {
        request_id: 9,
        collation_hashes: vec![Hash32::ZERO],
    };
    assert_eq!(get.request_id(), Some(9));
    let announce = Command::NewCollationHashes {
        collation_hashes_and_periods: vec![(Hash32::ZERO, 1)],
    };
    assert_eq!(announce.request_id(), None);
}

// ============================================================================
// FRAMES
// ============================================================================

#[test]
fn test_frames_start_with_command_id() {
    let codec = CommandCodec::new();
    let commands = [
        Command::Status,
        Command::Collations {
            request_id: 1,
            collations: vec![collation(1)],
        },
        Command::GetCollations {
            request_id: 2,
            collation_hashes: vec![collation(1).hash()],
        },
        Command::NewCollationHashes {
            collation_hashes_and_periods: vec![(collation(1).hash(), 1), (collation(2).hash(), 2)],
        },
    ];

    for (expected_id, command) in commands.iter().enumerate() {
        let frame = codec.encode(command).unwrap();
        assert_eq!(frame[0] as usize, expected_id);
        assert_eq!(&codec.decode(&frame).unwrap(), command);
    }
}

#[test]
fn test_field_order_is_preserved() {
    let codec = CommandCodec::new();
    let hashes: Vec<Hash32> = (0..5).map(|i| collation(i).hash()).collect();
    let frame = codec
        .encode(&Command::GetCollations {
            request_id: 42,
            collation_hashes: hashes.clone(),
        })
        .unwrap();

    match codec.decode(&frame).unwrap() {
        Command::GetCollations {
            request_id,
            collation_hashes,
        } => {
            assert_eq!(request_id, 42);
            assert_eq!(collation_hashes, hashes);
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_truncated_frame_fails() {
    let codec = CommandCodec::new();
    let mut frame = codec
        .encode(&Command::Collations {
            request_id: 3,
            collations: vec![collation(3)],
        })
        .unwrap();
    frame.truncate(frame.len() / 2);

    assert!(matches!(
        codec.decode(&frame),
        Err(ProtocolError::DecodeFailed { command: "Collations", .. })
    ));
}

#[test]
fn test_ids_below_offset_are_unknown() {
    let codec = CommandCodec::with_offset(8);
    assert_eq!(codec.decode(&[2]), Err(ProtocolError::UnknownCommand(2)));
    assert_eq!(codec.decode(&[12]), Err(ProtocolError::UnknownCommand(12)));
}

#[test]
fn test_status_payload_is_rejected() {
    let codec = CommandCodec::with_offset(4);
    let mut frame = codec.encode(&Command::Status).unwrap();
    frame.extend_from_slice(&[1, 2, 3]);

    assert!(matches!(
        codec.decode(&frame),
        Err(ProtocolError::DecodeFailed { command: "Status", .. })
    ));
}

#[test]
fn test_borrowed_encoding_decodes_back() {
    let codec = CommandCodec::new();
    let hashes = vec![collation(1).hash(), collation(2).hash()];
    let announced: Vec<_> = hashes.iter().map(|h| (*h, 9)).collect();

    for command in [
        Command::Collations {
            request_id: 12,
            collations: vec![collation(1), collation(2)],
        },
        Command::GetCollations {
            request_id: 13,
            collation_hashes: hashes.clone(),
        },
        Command::NewCollationHashes {
            collation_hashes_and_periods: announced.clone(),
        },
    ] {
        assert_eq!(codec.decode(&codec.encode(&command).unwrap()).unwrap(), command);
    }
}
