// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use super::*;
use crate::{
    packet::{FiveTuple, Objective},
    testing::{self, Sink},
    time::{Clock as _, NoopClock},
};
use bolero::{check, generator::*};

fn packet(handle: u64, len: u32) -> Packet {
    let mut tag = testing::tag(1, 1, Objective::LatencySensitive, 0);
    tag.packet_size = len;
    testing::packet(handle, tuple(), tag)
}

fn tuple() -> FiveTuple {
    testing::tuple(1, 2, 1000)
}

fn route() -> Route {
    tuple().route()
}

fn shaper(rate: u64, capacity: u64, queue_limit: usize) -> Shaper {
    Shaper::builder()
        .with_rate(rate)
        .with_capacity(capacity)
        .with_queue_limit(queue_limit)
        .build()
}

#[test]
fn forwards_while_tokens_are_available() {
    let now = NoopClock.get_time();
    let mut sink = Sink::default();
    let mut shaper = shaper(8_000, 16_000, 10);

    // 1000 bytes = 8000 bits
    assert_eq!(shaper.send(packet(1, 1000), &route(), now, &mut sink), Outcome::Forwarded);
    assert_eq!(shaper.send(packet(2, 1000), &route(), now, &mut sink), Outcome::Forwarded);
    assert_eq!(shaper.tokens(), 0.0);
    assert_eq!(sink.forwarded.len(), 2);
    assert_eq!(sink.forwarded[0].1, route());
    assert!(shaper.next_expiration().is_none());
}

#[test]
fn queues_until_tokens_refill() {
    let now = NoopClock.get_time();
    let mut sink = Sink::default();
    let mut shaper = shaper(8_000, 16_000, 10);

    // 1500 bytes = 12000 bits leaves 4000 tokens
    assert_eq!(shaper.send(packet(1, 1500), &route(), now, &mut sink), Outcome::Forwarded);
    assert_eq!(shaper.send(packet(2, 1500), &route(), now, &mut sink), Outcome::Queued);

    // 8000 missing bits at 8000 bps
    let target = now + Duration::from_secs(1);
    assert_eq!(shaper.next_expiration(), Some(target));

    // nothing happens before the timer fires
    let early = target - Duration::from_micros(1);
    assert_eq!(shaper.on_timeout(early, &route(), &mut sink), 0);
    assert_eq!(shaper.queue_len(), 1);

    assert_eq!(shaper.on_timeout(target, &route(), &mut sink), 1);
    assert_eq!(shaper.queue_len(), 0);
    assert_eq!(sink.forwarded.len(), 2);
    assert!(shaper.next_expiration().is_none());
}

#[test]
fn queued_packets_keep_fifo_order() {
    let mut now = NoopClock.get_time();
    let mut sink = Sink::default();
    let mut shaper = shaper(8_000, 8_000, 10);

    assert_eq!(shaper.send(packet(1, 1000), &route(), now, &mut sink), Outcome::Forwarded);
    assert_eq!(shaper.send(packet(2, 1000), &route(), now, &mut sink), Outcome::Queued);

    // a small packet still waits behind the queued one even if it would fit
    now += Duration::from_millis(500);
    assert_eq!(shaper.send(packet(3, 100), &route(), now, &mut sink), Outcome::Queued);

    now += Duration::from_millis(500);
    assert_eq!(shaper.on_timeout(now, &route(), &mut sink), 1);

    now += Duration::from_millis(100);
    assert_eq!(shaper.on_timeout(now, &route(), &mut sink), 1);

    let handles: Vec<_> = sink.forwarded.iter().map(|(p, _)| p.handle).collect();
    assert_eq!(handles, [1, 2, 3]);
}

#[test]
fn drops_when_queue_is_full() {
    let now = NoopClock.get_time();
    let mut sink = Sink::default();
    let mut shaper = shaper(8_000, 8_000, 2);

    assert_eq!(shaper.send(packet(1, 1000), &route(), now, &mut sink), Outcome::Forwarded);
    assert_eq!(shaper.send(packet(2, 1000), &route(), now, &mut sink), Outcome::Queued);
    assert_eq!(shaper.send(packet(3, 1000), &route(), now, &mut sink), Outcome::Queued);
    assert_eq!(
        shaper.send(packet(4, 1000), &route(), now, &mut sink),
        Outcome::Dropped(DropReason::QueueFull)
    );

    assert_eq!(shaper.queue_len(), 2);
    assert_eq!(sink.dropped.len(), 1);
    assert_eq!(sink.dropped[0].0.handle, 4);
    assert_eq!(sink.dropped[0].1, DropReason::QueueFull);
}

#[test]
fn oversize_packets_are_dropped() {
    let now = NoopClock.get_time();
    let mut sink = Sink::default();
    let mut shaper = shaper(8_000, 8_000, 2);

    assert_eq!(
        shaper.send(packet(1, 1001), &route(), now, &mut sink),
        Outcome::Dropped(DropReason::Oversize)
    );
    assert_eq!(shaper.queue_len(), 0);
    assert_eq!(sink.dropped[0].1, DropReason::Oversize);
}

#[test]
fn zero_rate_suspends_transmission() {
    let mut now = NoopClock.get_time();
    let mut sink = Sink::default();
    let mut shaper = shaper(0, 8_000, 2);

    assert_eq!(shaper.send(packet(1, 1000), &route(), now, &mut sink), Outcome::Forwarded);
    assert_eq!(shaper.send(packet(2, 1000), &route(), now, &mut sink), Outcome::Queued);
    assert!(shaper.next_expiration().is_none());

    // tokens never refill at rate 0
    now += Duration::from_secs(10);
    assert_eq!(shaper.on_timeout(now, &route(), &mut sink), 0);
    assert_eq!(shaper.send(packet(3, 1000), &route(), now, &mut sink), Outcome::Queued);
    assert_eq!(
        shaper.send(packet(4, 1000), &route(), now, &mut sink),
        Outcome::Dropped(DropReason::QueueFull)
    );

    // raising the rate resumes transmission
    shaper.set_rate(16_000, now);
    assert_eq!(shaper.next_expiration(), Some(now + Duration::from_millis(500)));

    now += Duration::from_millis(500);
    assert_eq!(shaper.on_timeout(now, &route(), &mut sink), 1);

    // dropping the rate to 0 again cancels the pending transmission
    shaper.set_rate(0, now);
    assert!(shaper.next_expiration().is_none());
    assert_eq!(shaper.queue_len(), 1);
}

#[test]
fn drain_reports_every_queued_packet() {
    let now = NoopClock.get_time();
    let mut sink = Sink::default();
    let mut shaper = shaper(8_000, 8_000, 4);

    shaper.send(packet(1, 1000), &route(), now, &mut sink);
    shaper.send(packet(2, 1000), &route(), now, &mut sink);
    shaper.send(packet(3, 1000), &route(), now, &mut sink);

    assert_eq!(shaper.queued_bytes(), 2000);
    assert_eq!(shaper.drain(DropReason::Evicted, &mut sink), 2);
    assert_eq!(shaper.queue_len(), 0);
    assert!(shaper.next_expiration().is_none());
    assert!(sink
        .dropped
        .iter()
        .all(|(_, reason)| *reason == DropReason::Evicted));
}

#[derive(Clone, Copy, Debug, TypeGenerator)]
enum Operation {
    Send {
        #[generator(1..=1500)]
        len: u16,
    },
    Advance {
        #[generator(0..=2000)]
        micros: u16,
    },
    SetRate {
        #[generator(0..=1_000_000)]
        rate: u32,
    },
    Timeout,
}

/// Checks the token bucket stays within bounds and only forwards when it holds enough tokens
#[test]
fn token_bucket_safety() {
    check!()
        .with_type::<Vec<Operation>>()
        .for_each(|operations| {
            let mut now = NoopClock.get_time();
            let mut sink = Sink::default();
            let mut shaper = shaper(100_000, 24_000, 8);
            let mut sent = 0usize;

            for operation in operations {
                match *operation {
                    Operation::Send { len } => {
                        sent += 1;
                        shaper.send(packet(sent as u64, len as u32), &route(), now, &mut sink);
                    }
                    Operation::Advance { micros } => {
                        now += Duration::from_micros(micros as u64);
                    }
                    Operation::SetRate { rate } => shaper.set_rate(rate as u64, now),
                    Operation::Timeout => {
                        if shaper.next_expiration().is_some_and(|t| t.has_elapsed(now)) {
                            shaper.on_timeout(now, &route(), &mut sink);
                        }
                    }
                }

                assert!(shaper.tokens() >= 0.0);
                assert!(shaper.tokens() <= shaper.capacity() as f64);
                assert!(shaper.queue_len() <= shaper.queue_limit());
            }

            // every packet is accounted for exactly once
            assert_eq!(
                sink.forwarded.len() + sink.dropped.len() + shaper.queue_len(),
                sent
            );
        });
}
