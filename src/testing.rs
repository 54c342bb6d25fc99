// SPDX-License-Identifier: Apache-2.0 OR MIT

//! In-memory fakes for [`crate::clock::EventLoop`] and [`crate::packet::RawArpSocket`],
//! used by this crate's own tests and by the scenario/property tests under
//! `tests/`. A fake stack plus inject/read handles, rather than a mocking
//! framework.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::net::Ipv4Addr;
use std::os::unix::io::RawFd;
use std::rc::Rc;
use std::time::{Duration, Instant};

use pnet::util::MacAddr;

use crate::clock::{EventLoop, IoHandle, TimerHandle};
use crate::error::Error;
use crate::packet::{ArpFrame, ArpRecv, RawArpSocket, RawArpSocketFactory};

/// A virtual-time event loop. Timers are recorded, not dispatched — the test
/// drives the session by calling [`FakeEventLoop::advance_to_next_timer`]
/// and then [`crate::Session::on_timer`] itself.
#[derive(Clone)]
pub struct FakeEventLoop {
	inner: Rc<RefCell<FakeEventLoopInner>>,
}

struct FakeEventLoopInner {
	now: Instant,
	next_id: u64,
	timers: HashMap<u64, Instant>,
	io_registrations: u32,
}

impl FakeEventLoop {
	pub fn new() -> Self {
		Self {
			inner: Rc::new(RefCell::new(FakeEventLoopInner {
				now: Instant::now(),
				next_id: 0,
				timers: HashMap::new(),
				io_registrations: 0,
			})),
		}
	}

	/// Wrap in the shared handle [`crate::Session::attach_event`] expects.
	pub fn shared(&self) -> Rc<RefCell<dyn EventLoop>> {
		Rc::new(RefCell::new(self.clone())) as Rc<RefCell<dyn EventLoop>>
	}

	pub fn advance(&self, by: Duration) {
		self.inner.borrow_mut().now += by;
	}

	/// How many distinct timers are currently armed (should never exceed 1
	/// for a single session).
	pub fn armed_timer_count(&self) -> usize {
		self.inner.borrow().timers.len()
	}

	pub fn io_registrations(&self) -> u32 {
		self.inner.borrow().io_registrations
	}

	/// Advance virtual time to the earliest pending timer deadline and
	/// return how far it moved, or `None` if no timer is armed.
	pub fn advance_to_next_timer(&self) -> Option<Duration> {
		let mut inner = self.inner.borrow_mut();
		let deadline = *inner.timers.values().min()?;
		let gap = deadline.saturating_duration_since(inner.now);
		inner.now = deadline;
		Some(gap)
	}
}

impl Default for FakeEventLoop {
	fn default() -> Self {
		Self::new()
	}
}

struct FakeTimerHandle {
	id: u64,
	inner: Rc<RefCell<FakeEventLoopInner>>,
}

impl TimerHandle for FakeTimerHandle {}

impl Drop for FakeTimerHandle {
	fn drop(&mut self) {
		self.inner.borrow_mut().timers.remove(&self.id);
	}
}

struct FakeIoHandle {
	inner: Rc<RefCell<FakeEventLoopInner>>,
}

impl IoHandle for FakeIoHandle {}

impl Drop for FakeIoHandle {
	fn drop(&mut self) {
		self.inner.borrow_mut().io_registrations -= 1;
	}
}

impl EventLoop for FakeEventLoop {
	fn now(&self) -> Instant {
		self.inner.borrow().now
	}

	fn add_timer(&mut self, delay: Duration, _priority: i64) -> Result<Box<dyn TimerHandle>, Error> {
		let mut inner = self.inner.borrow_mut();
		let id = inner.next_id;
		inner.next_id += 1;
		let deadline = inner.now + delay;
		inner.timers.insert(id, deadline);
		drop(inner);
		Ok(Box::new(FakeTimerHandle {
			id,
			inner: self.inner.clone(),
		}))
	}

	fn add_io(&mut self, _fd: RawFd, _priority: i64) -> Result<Box<dyn IoHandle>, Error> {
		self.inner.borrow_mut().io_registrations += 1;
		Ok(Box::new(FakeIoHandle {
			inner: self.inner.clone(),
		}))
	}
}

/// Shared state behind a [`FakeSocket`]/[`FakeSocketHandle`] pair: the
/// session owns a `FakeSocketHandle`, the test keeps the `FakeSocket` to
/// inject frames and inspect what was sent.
#[derive(Default)]
struct FakeSocketState {
	inbox: VecDeque<ArpFrame>,
	probes_sent: Vec<Ipv4Addr>,
	announcements_sent: Vec<Ipv4Addr>,
	fail_sends: bool,
}

/// Test handle for a [`FakeSocketHandle`] moved into a session.
#[derive(Clone)]
pub struct FakeSocket {
	state: Rc<RefCell<FakeSocketState>>,
}

impl FakeSocket {
	pub fn new() -> Self {
		Self {
			state: Rc::new(RefCell::new(FakeSocketState::default())),
		}
	}

	pub fn inject(&self, frame: ArpFrame) {
		self.state.borrow_mut().inbox.push_back(frame);
	}

	pub fn probes_sent(&self) -> Vec<Ipv4Addr> {
		self.state.borrow().probes_sent.clone()
	}

	pub fn announcements_sent(&self) -> Vec<Ipv4Addr> {
		self.state.borrow().announcements_sent.clone()
	}

	pub fn set_fail_sends(&self, fail: bool) {
		self.state.borrow_mut().fail_sends = fail;
	}

	fn handle(&self) -> FakeSocketHandle {
		FakeSocketHandle {
			state: self.state.clone(),
		}
	}
}

impl Default for FakeSocket {
	fn default() -> Self {
		Self::new()
	}
}

struct FakeSocketHandle {
	state: Rc<RefCell<FakeSocketState>>,
}

impl RawArpSocket for FakeSocketHandle {
	fn send_probe(&mut self, target_ip: Ipv4Addr, _sender_mac: MacAddr) -> std::io::Result<()> {
		let mut state = self.state.borrow_mut();
		if state.fail_sends {
			return Err(std::io::Error::new(std::io::ErrorKind::Other, "send failed"));
		}
		state.probes_sent.push(target_ip);
		Ok(())
	}

	fn send_announcement(&mut self, ip: Ipv4Addr, _sender_mac: MacAddr) -> std::io::Result<()> {
		let mut state = self.state.borrow_mut();
		if state.fail_sends {
			return Err(std::io::Error::new(std::io::ErrorKind::Other, "send failed"));
		}
		state.announcements_sent.push(ip);
		Ok(())
	}

	fn recv_arp(&mut self) -> std::io::Result<ArpRecv> {
		match self.state.borrow_mut().inbox.pop_front() {
			Some(frame) => Ok(ArpRecv::Frame(frame)),
			None => Ok(ArpRecv::WouldBlock),
		}
	}

	fn as_raw_fd(&self) -> RawFd {
		-1
	}
}

/// A [`RawArpSocketFactory`] that always hands out a fresh handle to the
/// same [`FakeSocket`] — the test keeps the original to drive it.
pub struct FakeSocketFactory {
	socket: FakeSocket,
}

impl FakeSocketFactory {
	pub fn new(socket: FakeSocket) -> Self {
		Self { socket }
	}
}

impl RawArpSocketFactory for FakeSocketFactory {
	fn open(&mut self, _ifindex: i32, _mac: MacAddr) -> std::io::Result<Box<dyn RawArpSocket>> {
		Ok(Box::new(self.socket.handle()))
	}
}
