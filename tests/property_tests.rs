use proptest::collection::vec;
use proptest::prelude::*;

use tcpengine::tcp::reassembler::StreamReassembler;
use tcpengine::{unwrap, wrap, ByteStream, SeqNo};

proptest! {
    #[test]
    fn unwrap_inverts_wrap_near_the_checkpoint(
        abs in 0u64..(1 << 62),
        offset in (-(1i64 << 31) + 1)..(1i64 << 31),
        isn in any::<u32>(),
    ) {
        let isn = SeqNo::new(isn);
        let checkpoint = abs.saturating_add_signed(offset);
        prop_assert_eq!(unwrap(wrap(abs, isn), isn, checkpoint), abs);
    }

    #[test]
    fn unwrap_lands_within_half_a_period(
        raw in any::<u32>(),
        isn in any::<u32>(),
        checkpoint in (1u64 << 32)..(1u64 << 62),
    ) {
        let abs = unwrap(SeqNo::new(raw), SeqNo::new(isn), checkpoint);
        prop_assert_eq!(wrap(abs, SeqNo::new(isn)), SeqNo::new(raw));
        prop_assert!(abs.abs_diff(checkpoint) <= 1 << 31);
    }


    #[test]
    fn byte_stream_keeps_order_and_capacity(
        chunks in vec(vec(any::<u8>(), 0..50), 0..20),
        capacity in 1usize..100,
    ) {
        let mut stream = ByteStream::new(capacity);
        let mut accepted = Vec::new();
        let mut out = Vec::new();
        for chunk in &chunks {
            let n = stream.write(chunk);
            prop_assert!(n <= chunk.len());
            accepted.extend_from_slice(&chunk[..n]);
            prop_assert!(stream.buffer_size() <= capacity);
            out.extend(stream.read(capacity / 2 + 1));
        }
        out.extend(stream.read(capacity));
        prop_assert_eq!(stream.bytes_written(), accepted.len() as u64);
        prop_assert_eq!(stream.bytes_read(), stream.bytes_written());
        prop_assert_eq!(out, accepted);
    }

    #[test]
    fn reassembles_any_arrival_order(
        data in vec(any::<u8>(), 1..300),
        noise in vec((0usize..300, 1usize..40), 0..20),
        chunk in 1usize..50,
    ) {
        let mut reassembler = StreamReassembler::new(1024);
        for (start, len) in noise {
            let start = start % data.len();
            let end = (start + len).min(data.len());
            reassembler.push_substring(&data[start..end], start as u64, end == data.len());
        }
        let pieces: Vec<_> = data.chunks(chunk).enumerate().collect();
        for (i, piece) in pieces.iter().rev() {
            let index = i * chunk;
            reassembler.push_substring(piece, index as u64, index + piece.len() == data.len());
        }

        prop_assert_eq!(reassembler.unassembled_bytes(), 0);
        prop_assert!(reassembler.empty());
        prop_assert!(reassembler.stream_out().input_ended());
        prop_assert_eq!(reassembler.stream_out_mut().read(data.len()), data);
    }

    #[test]
    fn repeated_substrings_change_nothing(
        data in vec(any::<u8>(), 1..100),
        index in 1u64..200,
    ) {
        let mut once = StreamReassembler::new(256);
        let mut twice = StreamReassembler::new(256);
        once.push_substring(&data, index, false);
        twice.push_substring(&data, index, false);
        twice.push_substring(&data, index, false);

        prop_assert_eq!(once.unassembled_bytes(), twice.unassembled_bytes());
        prop_assert_eq!(once.first_unassembled(), twice.first_unassembled());
    }
}

#[test]
fn overlapping_substrings_fill_the_gap() {
    let mut reassembler = StreamReassembler::new(64);
    reassembler.push_substring(b"cde", 2, false);
    reassembler.push_substring(b"efg", 4, true);
    assert_eq!(reassembler.unassembled_bytes(), 5);
    reassembler.push_substring(b"abc", 0, false);
    assert_eq!(reassembler.unassembled_bytes(), 0);
    assert!(reassembler.stream_out().input_ended());
    assert_eq!(reassembler.stream_out_mut().read(64), b"abcdefg");
    assert!(reassembler.stream_out().eof());
}
