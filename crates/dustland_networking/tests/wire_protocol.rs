//! Decoding a realistic in-buffer: several messages, split reads, commands.

use dustland_networking::protocol::{encode_message, ping_message};
use dustland_networking::server::NetBuffer;
use dustland_networking::{
    decode_frame, AdminCommand, Frame, NetError, PING, PING_INFO, SEND_COMMAND,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const FLOOD: usize = 2048;

fn drain(buffer: &mut NetBuffer) -> Result<Vec<(u32, Vec<u8>)>, NetError> {
    let mut out = Vec::new();
    while let Some((frame, used)) = decode_frame(buffer.as_slice(), FLOOD)? {
        match frame {
            Frame::PingInfo => out.push((PING_INFO, Vec::new())),
            Frame::Message { opcode, payload } => out.push((opcode, payload.to_vec())),
        }
        buffer.consume(used);
    }
    Ok(out)
}

#[test]
fn test_stream_split_at_random_points() {
    let mut stream = Vec::new();
    stream.extend_from_slice(&ping_message(3));
    stream.extend_from_slice(&AdminCommand::CritId { name: "Marcus".into() }.encode());
    encode_message(0x1234_5678, &[9; 300], &mut stream);
    stream.extend_from_slice(&AdminCommand::ReloadScripts.encode());

    let mut rng = StdRng::seed_from_u64(0xD057);
    for _ in 0..50 {
        let mut buffer = NetBuffer::new();
        let mut decoded = Vec::new();
        let mut offset = 0;
        while offset < stream.len() {
            let step = rng.gen_range(1..=64).min(stream.len() - offset);
            buffer.append(&stream[offset..offset + step]);
            offset += step;
            decoded.extend(drain(&mut buffer).unwrap());
        }
        assert!(buffer.is_empty());

        let opcodes: Vec<u32> = decoded.iter().map(|(op, _)| *op).collect();
        assert_eq!(opcodes, vec![PING, SEND_COMMAND, 0x1234_5678, SEND_COMMAND]);
        assert_eq!(decoded[0].1, vec![3]);
        assert_eq!(
            AdminCommand::decode(&decoded[1].1),
            Some(AdminCommand::CritId {
                name: "Marcus".into(),
            })
        );
        assert_eq!(AdminCommand::decode(&decoded[3].1), Some(AdminCommand::ReloadScripts));
    }
}

#[test]
fn test_ping_info_then_garbage_stops_at_error() {
    let mut buffer = NetBuffer::new();
    buffer.append(&PING_INFO.to_le_bytes());
    buffer.append(&PING.to_le_bytes());
    buffer.append(&4u32.to_le_bytes());

    let first = decode_frame(buffer.as_slice(), FLOOD).unwrap().unwrap();
    assert_eq!(first, (Frame::PingInfo, 4));
    buffer.consume(4);
    assert!(matches!(drain(&mut buffer), Err(NetError::MessageTooShort(4))));
}

#[test]
fn test_oversized_message_is_refused_before_arrival() {
    let mut buffer = NetBuffer::new();
    buffer.append(&PING.to_le_bytes());
    buffer.append(&((FLOOD + 1) as u32).to_le_bytes());
    assert!(matches!(drain(&mut buffer), Err(NetError::MessageTooLong { .. })));
}
