// SPDX-License-Identifier: Apache-2.0 OR MIT

use std::cell::RefCell;
use std::net::Ipv4Addr;
use std::rc::Rc;
use std::time::Duration;

use ipv4acd::event::Event;
use ipv4acd::packet::ArpFrame;
use ipv4acd::session::Session;
use ipv4acd::testing::{FakeEventLoop, FakeSocket, FakeSocketFactory};
use pnet::util::MacAddr;

/// Wires a [`Session`] up to a virtual-time event loop and an injectable
/// fake socket, the way an embedder would wire it to a real one.
pub struct Harness {
	pub session: Session<()>,
	pub event_loop: FakeEventLoop,
	pub socket: FakeSocket,
	pub events: Rc<RefCell<Vec<Event>>>,
}

pub fn harness(ifindex: i32, mac: MacAddr, address: Ipv4Addr) -> Harness {
	let _ = env_logger::builder().is_test(true).try_init();

	let socket = FakeSocket::new();
	let factory = FakeSocketFactory::new(socket.clone());
	let mut session = Session::new(factory, ());

	let events = Rc::new(RefCell::new(Vec::new()));
	let events_cb = events.clone();
	session.set_callback(move |event, _| events_cb.borrow_mut().push(event));

	let event_loop = FakeEventLoop::new();
	session.attach_event(event_loop.shared(), 0).unwrap();
	session.set_ifindex(ifindex).unwrap();
	session.set_mac(mac).unwrap();
	session.set_address(address).unwrap();

	Harness {
		session,
		event_loop,
		socket,
		events,
	}
}

impl Harness {
	/// Advance virtual time to the next armed timer deadline and fire it.
	/// Returns the gap that was waited, or `None` if no timer is armed.
	pub fn fire_next_timer(&mut self) -> Option<Duration> {
		let gap = self.event_loop.advance_to_next_timer()?;
		self.session.on_timer();
		Some(gap)
	}

	/// Run timers to completion (state reaches `Running` or `Init`, or the
	/// iteration budget is exhausted — guards against an infinite loop if a
	/// transition is broken).
	pub fn run_to_quiescence(&mut self, max_ticks: usize) {
		for _ in 0..max_ticks {
			if self.session.state() == ipv4acd::State::Running
				|| self.session.state() == ipv4acd::State::Init
			{
				return;
			}
			if self.fire_next_timer().is_none() {
				return;
			}
		}
	}

	pub fn deliver(&mut self, frame: ArpFrame) {
		self.socket.inject(frame);
		self.session.on_readable();
	}

	pub fn events(&self) -> Vec<Event> {
		self.events.borrow().clone()
	}
}

pub fn conflicting_frame(address: Ipv4Addr, attacker_mac: MacAddr) -> ArpFrame {
	ArpFrame {
		sender_mac: attacker_mac,
		sender_ip: address,
		target_mac: MacAddr::zero(),
		target_ip: Ipv4Addr::UNSPECIFIED,
	}
}
