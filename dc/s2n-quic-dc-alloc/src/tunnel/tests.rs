// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use super::*;
use crate::{
    testing::{self, Sink},
    time::testing as clock,
};

fn tunnel(objective: Objective, config: &Config) -> Tunnel {
    Tunnel::new(1, objective, testing::tuple(1, 2, 0).route(), config)
}

fn tag(tunnel: &Tunnel, flow_id: FlowId, flow_size: u64, now: Timestamp) -> Tag {
    let mut tag = testing::tag(flow_id, tunnel.tenant(), tunnel.objective(), flow_size);
    if tunnel.objective() == Objective::DeadlineSensitive {
        tag.deadline = Some(now + Duration::from_secs(1));
    }
    tag
}

fn add_flow(tunnel: &mut Tunnel, flow_id: FlowId, flow_size: u64, config: &Config) {
    let now = clock::now();
    let tag = tag(tunnel, flow_id, flow_size, now);
    let tuple = testing::tuple(1, 2, flow_id as u16);
    tunnel.get_or_create_flow(tuple, &tag, now, config).unwrap();
}

fn grant(tunnel: &Tunnel, flow_id: FlowId) -> u64 {
    tunnel.flow(flow_id).unwrap().rate_response()
}

fn total_grant(tunnel: &Tunnel) -> u64 {
    tunnel.flows().map(|flow| flow.rate_response()).sum()
}

#[test]
fn deadline_greedy_allocation() {
    testing::init_tracing();
    let config = Config::default();
    let now = clock::now();
    let mut tunnel = tunnel(Objective::DeadlineSensitive, &config);

    // 2 Mbps and 5 Mbps to finish within a second
    add_flow(&mut tunnel, 1, 250_000, &config);
    add_flow(&mut tunnel, 2, 625_000, &config);

    tunnel.update_request(&EcnRecorder::default(), now);
    assert_eq!(tunnel.flow(1).unwrap().rate_request(), 2_000_000.0);
    assert_eq!(tunnel.flow(2).unwrap().rate_request(), 5_000_000.0);
    assert_eq!(tunnel.rate_request(), 7_000_000.0);

    tunnel.schedule(4_000_000, now);

    assert_eq!(grant(&tunnel, 1), 2_000_000);
    assert_eq!(grant(&tunnel, 2), 2_000_000);
    assert_eq!(total_grant(&tunnel), 4_000_000);
}

#[test]
fn deadline_requests_scale_up_when_covered() {
    let config = Config::default();
    let now = clock::now();
    let mut tunnel = tunnel(Objective::DeadlineSensitive, &config);

    add_flow(&mut tunnel, 1, 250_000, &config);
    add_flow(&mut tunnel, 2, 625_000, &config);
    tunnel.update_request(&EcnRecorder::default(), now);

    tunnel.schedule(14_000_000, now);

    assert_eq!(grant(&tunnel, 1), 4_000_000);
    assert_eq!(grant(&tunnel, 2), 10_000_000);
}

#[test]
fn deadline_ties_go_to_the_lower_flow_id() {
    let config = Config::default();
    let now = clock::now();
    let mut tunnel = tunnel(Objective::DeadlineSensitive, &config);

    for id in [9, 3, 6] {
        add_flow(&mut tunnel, id, 125_000, &config);
    }
    tunnel.update_request(&EcnRecorder::default(), now);

    // each asks for 1 Mbps
    tunnel.schedule(1_500_000, now);

    assert_eq!(grant(&tunnel, 3), 1_000_000);
    assert_eq!(grant(&tunnel, 6), 500_000);
    assert_eq!(grant(&tunnel, 9), 0);
}

#[test]
fn latency_sensitive_equal_split() {
    let config = Config::default();
    let now = clock::now();
    let mut tunnel = tunnel(Objective::LatencySensitive, &config);

    for id in 1..=3 {
        add_flow(&mut tunnel, id, 0, &config);
    }
    tunnel.update_request(&EcnRecorder::default(), now);
    tunnel.schedule(1_000_000, now);

    for id in 1..=3 {
        assert_eq!(grant(&tunnel, id), 333_333);
    }
    assert!(total_grant(&tunnel) <= 1_000_000);
}

#[test]
fn completion_sensitive_weighted_split() {
    let config = Config::default();
    let now = clock::now();
    let mut sink = Sink::default();
    let mut tunnel = tunnel(Objective::CompletionSensitive, &config);

    add_flow(&mut tunnel, 1, 0, &config);
    add_flow(&mut tunnel, 2, 0, &config);

    // flow 2 moves well past the decay threshold
    let tag = tag(&tunnel, 2, 0, now);
    for handle in 0..4 {
        let packet = testing::packet(handle, testing::tuple(1, 2, 2), tag);
        tunnel.send(packet, &tag, now, &config, &mut sink).unwrap();
    }
    assert!(tunnel.flow(2).unwrap().sent_bytes() > config.decay().size_threshold);

    tunnel.update_request(&EcnRecorder::default(), now);
    let decay = config.decay();
    assert_eq!(tunnel.flow(1).unwrap().weight_request(), decay.weight_max);
    assert!((tunnel.flow(2).unwrap().weight_request() - decay.weight_min).abs() < 1e-12);

    tunnel.schedule(6_000_000, now);

    assert!(grant(&tunnel, 1).abs_diff(5_000_000) <= 1);
    assert!(grant(&tunnel, 2).abs_diff(1_000_000) <= 1);
    assert!(total_grant(&tunnel) <= 6_000_000);
}

#[test]
fn weighted_split_falls_back_to_even() {
    let grants = weighted_split(900, &[(1, 0.0), (2, 0.0), (3, 1e-9)]);
    assert_eq!(grants, vec![(1, 300), (2, 300), (3, 300)]);

    assert!(weighted_split(900, &[]).is_empty());
    assert!(equal_split(900, &[]).is_empty());
}

#[test]
fn rate_follows_congestion() {
    let config = Config::builder()
        .with_initial_rate(1_000_000)
        .with_rate_bounds(1_000, 2_000_000)
        .build()
        .unwrap();
    let now = clock::now();
    let mut tunnel = tunnel(Objective::LatencySensitive, &config);
    add_flow(&mut tunnel, 1, 0, &config);

    let mut recorder = EcnRecorder::default();
    recorder.on_packet_received(true, 1000);
    recorder.on_packet_received(false, 1000);

    // alpha = 1/16 * 0.5
    tunnel.update_request(&recorder, now);
    assert_eq!(tunnel.alpha(), 0.03125);
    tunnel.on_response(1.0, &config, now);
    assert_eq!(tunnel.rate(), 968_750);
    assert_eq!(grant(&tunnel, 1), 968_750);

    // no marks grows the rate by the weight; alpha is untouched without samples
    tunnel.update_request(&EcnRecorder::default(), now);
    assert_eq!(tunnel.alpha(), 0.03125);
    tunnel.on_response(0.5, &config, now);
    assert_eq!(tunnel.rate(), 1_453_125);

    tunnel.update_request(&EcnRecorder::default(), now);
    tunnel.on_response(1.0, &config, now);
    assert_eq!(tunnel.rate(), 2_000_000);
}

#[test]
fn finished_flows_are_granted_nothing_and_evicted() {
    let config = Config::default();
    let now = clock::now();
    let mut sink = Sink::default();
    let mut tunnel = tunnel(Objective::LatencySensitive, &config);

    add_flow(&mut tunnel, 1, 1000, &config);
    add_flow(&mut tunnel, 2, 0, &config);

    let tag = tag(&tunnel, 1, 1000, now);
    let packet = testing::packet(0, testing::tuple(1, 2, 1), tag);
    assert_eq!(
        tunnel.send(packet, &tag, now, &config, &mut sink).unwrap(),
        Outcome::Forwarded
    );

    tunnel.update_request(&EcnRecorder::default(), now);
    assert_eq!(tunnel.weight_request(), 1.0);
    tunnel.schedule(1_000_000, now);
    assert_eq!(grant(&tunnel, 1), 0);
    assert_eq!(grant(&tunnel, 2), 1_000_000);

    let grace = Duration::from_secs(1);
    assert_eq!(tunnel.evict(now, grace, &mut sink), 0);
    assert_eq!(tunnel.evict(now + grace, grace, &mut sink), 1);
    assert!(tunnel.flow(1).is_none());
    assert_eq!(tunnel.len(), 1);
}

#[test]
fn timeouts_release_every_flow() {
    let config = Config::default();
    let now = clock::now();
    let mut sink = Sink::default();
    let mut tunnel = tunnel(Objective::LatencySensitive, &config);

    for id in 1..=2 {
        let tag = tag(&tunnel, id, 0, now);
        for handle in 0..5 {
            let packet = testing::packet(handle, testing::tuple(1, 2, id as u16), tag);
            tunnel.send(packet, &tag, now, &config, &mut sink).unwrap();
        }
    }

    // each flow's bucket held four packets
    assert_eq!(sink.forwarded.len(), 8);

    // the second flow was admitted without spare capacity
    assert_eq!(grant(&tunnel, 1), config.initial_rate());
    assert_eq!(grant(&tunnel, 2), 0);
    tunnel.schedule(tunnel.rate(), now);
    assert_eq!(grant(&tunnel, 2), config.initial_rate() / 2);
    assert!(tunnel.next_expiration().is_some());

    let later = now + Duration::from_secs(10);
    assert_eq!(tunnel.on_timeout(later, &mut sink), 2);
    assert_eq!(sink.forwarded.len(), 10);
    assert!(tunnel.next_expiration().is_none());
}
