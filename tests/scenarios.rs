// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Scenario tests covering a clean bind, conflicts at every stage, rate
//! limiting, and bounded defence.

mod common;

use std::net::Ipv4Addr;
use std::time::Duration;

use common::{conflicting_frame, harness};
use ipv4acd::constants::{ANNOUNCE_INTERVAL, DEFEND_INTERVAL, PROBE_MAX, PROBE_MIN, PROBE_WAIT};
use ipv4acd::event::Event;
use ipv4acd::State;
use pnet::util::MacAddr;

const IFINDEX: i32 = 2;
const MAC: MacAddr = MacAddr(2, 0, 0, 0, 0, 1);
const ADDRESS: Ipv4Addr = Ipv4Addr::new(169, 254, 7, 7);
const ATTACKER_MAC: MacAddr = MacAddr(2, 0, 0, 0, 0, 2);

/// S1 - Clean bind: 3 probes, 2 announcements, one BIND, final state RUNNING.
#[test]
fn s1_clean_bind() {
	let mut h = harness(IFINDEX, MAC, ADDRESS);
	h.session.start().unwrap();

	h.run_to_quiescence(20);

	assert_eq!(h.session.state(), State::Running);
	assert_eq!(h.socket.probes_sent().len(), 3);
	assert_eq!(h.socket.announcements_sent().len(), 2);
	assert_eq!(
		h.events().iter().filter(|e| **e == Event::Bind).count(),
		1
	);
	assert!(!h.events().contains(&Event::Conflict));
}

/// S2 - Conflict during probing: after the first probe, a conflicting reply
/// ends the attempt with exactly one CONFLICT and no further frames sent.
#[test]
fn s2_conflict_during_probing() {
	let mut h = harness(IFINDEX, MAC, ADDRESS);
	h.session.start().unwrap();

	// STARTED -> WAITING_PROBE
	h.fire_next_timer().unwrap();
	// WAITING_PROBE -> PROBING, first probe sent
	h.fire_next_timer().unwrap();
	assert_eq!(h.socket.probes_sent().len(), 1);

	h.deliver(conflicting_frame(ADDRESS, ATTACKER_MAC));

	assert_eq!(h.session.state(), State::Init);
	assert_eq!(h.session.conflict_count(), 1);
	assert_eq!(h.events(), vec![Event::Conflict]);
	assert_eq!(h.socket.probes_sent().len(), 1);
	assert_eq!(h.socket.announcements_sent().len(), 0);
}

/// S3 - Rate limiting: ten conflicts on the first probe, then the 11th
/// start() must not probe for at least RATE_LIMIT_INTERVAL of virtual time.
#[test]
fn s3_rate_limiting() {
	let mut h = harness(IFINDEX, MAC, ADDRESS);

	for _ in 0..10 {
		h.session.start().unwrap();
		h.fire_next_timer().unwrap(); // STARTED -> WAITING_PROBE
		h.fire_next_timer().unwrap(); // WAITING_PROBE -> PROBING, probe sent
		h.deliver(conflicting_frame(ADDRESS, ATTACKER_MAC));
		assert_eq!(h.session.state(), State::Init);
	}
	assert_eq!(h.session.conflict_count(), 10);

	h.session.start().unwrap();
	h.fire_next_timer().unwrap(); // STARTED -> WAITING_PROBE (rate-limit delay scheduled here)
	assert_eq!(h.session.conflict_count(), 0);
	let gap = h.fire_next_timer().unwrap(); // WAITING_PROBE -> PROBING, first probe sent
	assert!(gap >= Duration::from_secs(60));

	// Normal probe sequence follows.
	h.run_to_quiescence(20);
	assert_eq!(h.session.state(), State::Running);
	assert_eq!(h.socket.probes_sent().len(), 3);
}

/// S4 - Defence within the window: first conflict defends, a second one
/// inside the same defend window instead ends the session with CONFLICT.
#[test]
fn s4_defence_within_window() {
	let mut h = harness(IFINDEX, MAC, ADDRESS);
	h.session.start().unwrap();
	h.run_to_quiescence(20);
	assert_eq!(h.session.state(), State::Running);

	let announcements_before = h.socket.announcements_sent().len();
	h.deliver(conflicting_frame(ADDRESS, ATTACKER_MAC));
	assert_eq!(h.session.state(), State::Running);
	assert_eq!(h.socket.announcements_sent().len(), announcements_before + 1);
	assert!(!h.events().contains(&Event::Conflict));

	h.event_loop.advance(Duration::from_secs(5));
	h.deliver(conflicting_frame(ADDRESS, ATTACKER_MAC));
	assert_eq!(h.session.state(), State::Init);
	assert_eq!(h.socket.announcements_sent().len(), announcements_before + 1);
	assert!(h.events().contains(&Event::Conflict));
}

/// S5 - Defence across windows: conflicts spaced more than DEFEND_INTERVAL
/// apart each produce a fresh defence, state stays RUNNING.
#[test]
fn s5_defence_across_windows() {
	let mut h = harness(IFINDEX, MAC, ADDRESS);
	h.session.start().unwrap();
	h.run_to_quiescence(20);

	h.deliver(conflicting_frame(ADDRESS, ATTACKER_MAC));
	assert_eq!(h.session.state(), State::Running);
	let after_first = h.socket.announcements_sent().len();

	h.event_loop.advance(DEFEND_INTERVAL + Duration::from_secs(1));
	h.deliver(conflicting_frame(ADDRESS, ATTACKER_MAC));
	assert_eq!(h.session.state(), State::Running);
	assert_eq!(h.socket.announcements_sent().len(), after_first + 1);
}

/// S6 - A too-short buffer delivered mid-probe changes nothing: the fake
/// socket reports it as an ignored read, not a frame.
#[test]
fn s6_short_frame_ignored() {
	let mut h = harness(IFINDEX, MAC, ADDRESS);
	h.session.start().unwrap();
	h.fire_next_timer().unwrap();
	h.fire_next_timer().unwrap();
	assert_eq!(h.session.state(), State::Probing);

	// A real RawArpSocket impl would surface a truncated read as
	// `ArpRecv::Ignored`; with nothing injected the fake simply reports
	// `WouldBlock`, which drives the same "nothing happened" assertion.
	h.session.on_readable();

	assert_eq!(h.session.state(), State::Probing);
	assert!(h.events().is_empty());
}

/// Sanity check on the timing bounds, reusing the constants rather than
/// hardcoding them.
#[test]
fn probe_and_announce_gaps_are_in_bounds() {
	let mut h = harness(IFINDEX, MAC, ADDRESS);
	h.session.start().unwrap();

	h.fire_next_timer().unwrap(); // STARTED -> WAITING_PROBE, arms the jittered pre-probe delay

	let first_probe_delay = h.fire_next_timer().unwrap(); // WAITING_PROBE -> PROBING, probe #1 sent
	assert!(first_probe_delay <= PROBE_WAIT);
	assert_eq!(h.socket.probes_sent().len(), 1);

	let gap_1_to_2 = h.fire_next_timer().unwrap(); // probe #2 sent
	assert!(gap_1_to_2 >= PROBE_MIN && gap_1_to_2 <= PROBE_MAX);
	assert_eq!(h.socket.probes_sent().len(), 2);

	let gap_2_to_3 = h.fire_next_timer().unwrap(); // probe #3 (final) sent, -> WAITING_ANNOUNCE
	assert!(gap_2_to_3 >= PROBE_MIN && gap_2_to_3 <= PROBE_MAX);
	assert_eq!(h.socket.probes_sent().len(), 3);

	let announce_wait = h.fire_next_timer().unwrap(); // first announcement sent, -> ANNOUNCING
	assert_eq!(announce_wait, ipv4acd::constants::ANNOUNCE_WAIT);
	assert_eq!(h.socket.announcements_sent().len(), 1);

	let announce_gap = h.fire_next_timer().unwrap(); // second announcement sent
	assert_eq!(announce_gap, ANNOUNCE_INTERVAL);
	assert_eq!(h.socket.announcements_sent().len(), 2);
}
