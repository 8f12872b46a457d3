//! Sweeps over the assembler and pacer with simulated input and clocks.

use dmm_stream::assembler::LineAssembler;
use dmm_stream::pacing::{AckOutcome, CommandPacer};

const REPLIES: &[&[u8]] = &[
    b"0\r",
    b"QM,+1.234E+0 V DC\r",
    b"12.34,VDC,NORMAL\r\n",
    b"1\r",
    b"9.9E+37\r",
];

fn stream() -> Vec<u8> {
    REPLIES.iter().flat_map(|r| r.iter().copied()).collect()
}

fn expected() -> Vec<String> {
    vec![
        "0".to_string(),
        "QM,+1.234E+0 V DC".to_string(),
        "12.34,VDC,NORMAL".to_string(),
        "1".to_string(),
        "9.9E+37".to_string(),
    ]
}

#[test]
fn chunking_does_not_change_messages() {
    let bytes = stream();
    for chunk in 1..=bytes.len() {
        let mut assembler = LineAssembler::default();
        let messages: Vec<String> = bytes
            .chunks(chunk)
            .flat_map(|c| assembler.feed_slice(c))
            .map(|m| m.as_str().into_owned())
            .collect();
        assert_eq!(messages, expected(), "chunk size {chunk}");
        assert_eq!(assembler.fill(), 0);
    }
}

#[test]
fn fill_never_exceeds_capacity() {
    // A runaway device that never sends the delimiter.
    for capacity in [2, 3, 16, 64] {
        let mut assembler = LineAssembler::new(capacity, b'\r');
        for i in 0..1000u32 {
            let byte = b'a' + (i % 26) as u8;
            assert!(assembler.feed(byte).is_none());
            assert!(assembler.fill() <= capacity, "capacity {capacity}");
            assert_eq!(assembler.free(), capacity - assembler.fill());
        }
        assert!(assembler.desync_count() > 0);

        // Recovers on the next delimiter.
        let tail = assembler.feed_slice(b"\r0\r");
        assert_eq!(tail.last().map(|m| m.as_bytes().to_vec()), Some(b"0".to_vec()));
    }
}

#[test]
fn overlong_reply_is_dropped_and_the_next_one_survives() {
    let mut assembler = LineAssembler::new(16, b'\r');
    let mut input = vec![b'x'; 40];
    input.extend_from_slice(b"\rQM,+1.0 V DC\r");
    let messages = assembler.feed_slice(&input);
    assert_eq!(
        messages.last().map(|m| m.as_str().into_owned()).as_deref(),
        Some("QM,+1.0 V DC")
    );
}

#[test]
fn silent_device_is_polled_at_the_timeout() {
    let mut pacer = CommandPacer::new("QM\r", 100, 1000);
    pacer.reset(0);
    pacer.mark_sent(0);

    let mut sent = vec![0u64];
    for now in 1..=5000u64 {
        if pacer.should_poll(now) {
            pacer.mark_sent(now);
            sent.push(now);
        }
    }
    assert_eq!(sent, vec![0, 1001, 2002, 3003, 4004]);
}

#[test]
fn answering_device_is_polled_at_the_period() {
    let mut pacer = CommandPacer::new("QM\r", 100, 1000);
    pacer.reset(0);
    pacer.mark_sent(0);

    let mut sent = vec![0u64];
    for now in 1..=1000u64 {
        if pacer.should_poll(now) {
            pacer.mark_sent(now);
            sent.push(now);
        }
        // The meter answers 20 ms after every poll.
        if sent.last().is_some_and(|&t| now == t + 20) {
            assert_eq!(pacer.on_ack(b'0'), AckOutcome::Accepted);
            pacer.on_response();
        }
    }
    assert_eq!(sent, vec![0, 101, 202, 303, 404, 505, 606, 707, 808, 909]);
}

#[test]
fn polls_are_never_closer_than_the_period() {
    let mut pacer = CommandPacer::new("QM\r", 100, 1000);
    pacer.reset(0);
    pacer.mark_sent(0);

    let mut last = 0u64;
    for now in 1..=10_000u64 {
        // Rejections release the pacer immediately.
        if now % 7 == 0 {
            pacer.on_ack(b'1');
        }
        if pacer.should_poll(now) {
            assert!(now - last > 100, "poll at {now} after {last}");
            pacer.mark_sent(now);
            last = now;
        }
    }
    assert!(pacer.rejected_acks() > 0);
}

#[test]
fn clock_going_backwards_does_not_poll() {
    let mut pacer = CommandPacer::new("QM\r", 100, 1000);
    pacer.mark_sent(5000);
    assert!(!pacer.should_poll(10));
    assert!(!pacer.should_poll(5000));
}
