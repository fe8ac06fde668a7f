// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{
    recovery::{
        l2dct, Ack, Config, D2tcpController, DctcpController, L2dctController, RttEstimator,
        WindowController,
    },
    time::{testing::Clock, Clock as _, Duration, Timestamp},
};
use bolero::{check, generator::*};

#[derive(Debug, TypeGenerator)]
enum Operation {
    IncrementTime {
        /// The milli-second value by which to increase the timestamp
        millis: u16,
    },
    PacketSent {
        #[generator(1..=64)]
        count: u8,
    },
    AckReceived {
        #[generator(1..=64)]
        count: u8,
        ece: bool,
    },
    DuplicateAck {
        ece: bool,
    },
    RttUpdated {
        #[generator(1..=2000)]
        millis: u64,
    },
    RetransmissionTimeout,
}

struct Model<W: WindowController> {
    /// The window controller being fuzzed
    subject: W,
    segment_size: u32,
    /// The next sequence to send
    next_seq: u64,
    /// The highest cumulative ack delivered
    acked_seq: u64,
    rtt_estimator: RttEstimator,
    /// A monotonically increasing timestamp
    timestamp: Timestamp,
}

impl<W: WindowController> Model<W> {
    fn new(subject: W, segment_size: u32) -> Self {
        Self {
            subject,
            segment_size,
            next_seq: 0,
            acked_seq: 0,
            rtt_estimator: RttEstimator::default(),
            timestamp: Clock::default().get_time(),
        }
    }

    fn apply(&mut self, operation: &Operation) {
        match operation {
            Operation::IncrementTime { millis } => {
                self.timestamp += Duration::from_millis(*millis as u64);
            }
            Operation::PacketSent { count } => {
                for _ in 0..*count {
                    self.subject
                        .on_packet_sent(self.next_seq, self.segment_size, self.timestamp);
                    self.next_seq += self.segment_size as u64;
                }
            }
            Operation::AckReceived { count, ece } => {
                let sequence = (self.acked_seq + *count as u64 * self.segment_size as u64)
                    .min(self.next_seq);
                self.acked_seq = sequence;
                self.subject.on_ack(
                    Ack {
                        sequence,
                        ece: *ece,
                    },
                    &self.rtt_estimator,
                    self.timestamp,
                );
            }
            Operation::DuplicateAck { ece } => {
                self.subject.on_ack(
                    Ack {
                        sequence: self.acked_seq,
                        ece: *ece,
                    },
                    &self.rtt_estimator,
                    self.timestamp,
                );
            }
            Operation::RttUpdated { millis } => {
                self.rtt_estimator
                    .update_rtt(Duration::from_millis(*millis), self.timestamp);
            }
            Operation::RetransmissionTimeout => {
                self.subject.on_retransmission_timeout(self.timestamp);
                // the sender rewinds to the last acknowledged byte
                self.next_seq = self.acked_seq;
            }
        }
    }

    fn invariants(&self) {
        assert!(self.subject.congestion_window() >= self.segment_size);
        assert!(self.subject.slow_start_threshold() >= self.segment_size);
        assert!((0.0..=1.0).contains(&self.subject.alpha()));
        assert!(self.subject.bytes_in_flight() as u64 <= self.next_seq - self.acked_seq);
    }
}

fn config(segment_size: u16) -> Config {
    Config {
        segment_size: segment_size as u32,
        ..Default::default()
    }
}

#[test]
fn dctcp_fuzz() {
    check!()
        .with_generator((536u16..=9000, gen::<Vec<Operation>>()))
        .for_each(|(segment_size, operations)| {
            let controller = DctcpController::dctcp(config(*segment_size));
            let mut model = Model::new(controller, *segment_size as u32);

            for operation in operations.iter() {
                model.apply(operation);
                model.invariants();
            }
        });
}

#[test]
fn d2tcp_fuzz() {
    check!()
        .with_generator((536u16..=9000, 0u64..10_000_000, gen::<Vec<Operation>>()))
        .for_each(|(segment_size, flow_size, operations)| {
            let deadline = Some(Clock::default().get_time() + Duration::from_millis(200));
            let controller = D2tcpController::d2tcp(*flow_size, deadline, config(*segment_size));
            let mut model = Model::new(controller, *segment_size as u32);

            for operation in operations.iter() {
                model.apply(operation);
                model.invariants();
            }
        });
}

#[test]
fn l2dct_fuzz() {
    check!()
        .with_generator((536u16..=9000, gen::<Vec<Operation>>()))
        .for_each(|(segment_size, operations)| {
            let controller =
                L2dctController::l2dct(l2dct::Config::default(), config(*segment_size));
            let mut model = Model::new(controller, *segment_size as u32);

            for operation in operations.iter() {
                model.apply(operation);
                model.invariants();
            }
        });
}
