// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The ACD session: its data model, state machine, and public façade.

use std::cell::RefCell;
use std::net::Ipv4Addr;
use std::rc::Rc;
use std::time::{Duration, Instant};

use kv_log_macro::{debug, info, warn};
use pnet::util::MacAddr;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::classify;
use crate::clock::{EventLoop, IoHandle, TimerHandle};
use crate::constants::*;
use crate::error::Error;
use crate::event::Event;
use crate::packet::{mac_is_zero, ArpRecv, RawArpSocket, RawArpSocketFactory};
use crate::state::{State, StateCell};

macro_rules! as_display {
	($e:expr) => {
		&$e as &dyn std::fmt::Display
	};
}

/// An RFC 5227 address-conflict-detection session.
///
/// `U` is the embedder's context type, passed to the event callback alongside
/// each [`Event`] (design note "Callback userdata"). Defaults to `()` for
/// callers with nothing to thread through.
pub struct Session<U = ()> {
	event_loop: Option<Rc<RefCell<dyn EventLoop>>>,
	priority: i64,

	ifindex: i32,
	mac: MacAddr,
	address: Ipv4Addr,

	factory: Box<dyn RawArpSocketFactory>,
	socket: Option<Box<dyn RawArpSocket>>,
	timer: Option<Box<dyn TimerHandle>>,
	rx_source: Option<Box<dyn IoHandle>>,

	state: StateCell,
	n_conflict: u32,
	defend_window: Option<Instant>,

	callback: Option<Box<dyn FnMut(Event, &mut U)>>,
	userdata: U,

	rng: StdRng,
}

impl<U> Session<U> {
	/// A fresh, unconfigured session. `factory` is the external collaborator
	/// that opens the raw ARP socket once [`Session::start`] is called.
	pub fn new(factory: impl RawArpSocketFactory + 'static, userdata: U) -> Self {
		Self {
			event_loop: None,
			priority: 0,
			ifindex: -1,
			mac: MacAddr::zero(),
			address: Ipv4Addr::UNSPECIFIED,
			factory: Box::new(factory),
			socket: None,
			timer: None,
			rx_source: None,
			state: StateCell::new(),
			n_conflict: 0,
			defend_window: None,
			callback: None,
			userdata,
			rng: StdRng::from_entropy(),
		}
	}

	/// Current state, for diagnostics. Not part of the documented external
	/// interface but handy for tests and embedders alike.
	pub fn state(&self) -> State {
		self.state.state()
	}

	pub fn is_running(&self) -> bool {
		self.state.state() != State::Init
	}

	/// Current conflict count. Exposed for diagnostics and for driving the
	/// rate-limit policy from tests.
	pub fn conflict_count(&self) -> u32 {
		self.n_conflict
	}

	/// Bind to an event loop. `priority` is forwarded verbatim to
	/// [`EventLoop::add_timer`]/[`EventLoop::add_io`].
	pub fn attach_event(
		&mut self,
		event_loop: Rc<RefCell<dyn EventLoop>>,
		priority: i64,
	) -> Result<(), Error> {
		if self.event_loop.is_some() {
			return Err(Error::Busy);
		}
		self.event_loop = Some(event_loop);
		self.priority = priority;
		Ok(())
	}

	/// Drop the event loop reference. Requires the session not be running.
	pub fn detach_event(&mut self) -> Result<(), Error> {
		if self.is_running() {
			return Err(Error::Busy);
		}
		self.event_loop = None;
		Ok(())
	}

	pub fn set_callback(&mut self, callback: impl FnMut(Event, &mut U) + 'static) {
		self.callback = Some(Box::new(callback));
	}

	pub fn set_ifindex(&mut self, ifindex: i32) -> Result<(), Error> {
		self.guard_config()?;
		if ifindex <= 0 {
			return Err(Error::InvalidArgument("ifindex must be positive"));
		}
		self.ifindex = ifindex;
		Ok(())
	}

	pub fn set_mac(&mut self, mac: MacAddr) -> Result<(), Error> {
		self.guard_config()?;
		if mac_is_zero(mac) {
			return Err(Error::InvalidArgument("mac must be non-zero"));
		}
		self.mac = mac;
		Ok(())
	}

	pub fn set_address(&mut self, address: Ipv4Addr) -> Result<(), Error> {
		self.guard_config()?;
		if address == Ipv4Addr::UNSPECIFIED {
			return Err(Error::InvalidArgument("address must be non-zero"));
		}
		self.address = address;
		Ok(())
	}

	fn guard_config(&self) -> Result<(), Error> {
		if self.state.state() != State::Init {
			return Err(Error::Busy);
		}
		Ok(())
	}

	/// The single choke point for [`StateCell::set`], so every state
	/// transition is logged the same way.
	fn enter_state(&mut self, new: State, reset_counter: bool) {
		debug!("state transition", {
			from: as_display!(format!("{:?}", self.state.state())),
			to: as_display!(format!("{:?}", new)),
			address: as_display!(self.address),
			n_conflict: self.n_conflict
		});
		self.state.set(new, reset_counter);
	}

	/// Begin probing. Opens the ARP socket, subscribes for readability,
	/// schedules the t=0 timer, and transitions to `Started`.
	pub fn start(&mut self) -> Result<(), Error> {
		if self.state.state() != State::Init {
			return Err(Error::Busy);
		}
		let event_loop = self.event_loop.clone().ok_or(Error::Scheduling(
			"no event loop attached".into(),
		))?;
		if self.ifindex <= 0 {
			return Err(Error::InvalidArgument("ifindex not set"));
		}
		if self.address == Ipv4Addr::UNSPECIFIED {
			return Err(Error::InvalidArgument("address not set"));
		}
		if mac_is_zero(self.mac) {
			return Err(Error::InvalidArgument("mac not set"));
		}

		let socket = self.factory.open(self.ifindex, self.mac)?;
		let fd = socket.as_raw_fd();

		let rx_source = event_loop.borrow_mut().add_io(fd, self.priority)?;
		let timer = event_loop
			.borrow_mut()
			.add_timer(Duration::ZERO, self.priority)?;

		self.socket = Some(socket);
		self.rx_source = Some(rx_source);
		self.timer = Some(timer);
		self.enter_state(State::Started, true);
		Ok(())
	}

	/// Unconditionally tear down and report `Stop`. Idempotent: calling this
	/// on an already-`Init` session still emits the event.
	pub fn stop(&mut self) {
		self.teardown();
		self.emit(Event::Stop);
	}

	fn teardown(&mut self) {
		self.socket = None;
		self.timer = None;
		self.rx_source = None;
		self.defend_window = None;
		self.enter_state(State::Init, true);
	}

	fn conflict(&mut self) {
		self.n_conflict += 1;
		self.teardown();
		self.emit(Event::Conflict);
	}

	fn emit(&mut self, event: Event) {
		if let Some(mut cb) = self.callback.take() {
			cb(event, &mut self.userdata);
			self.callback = Some(cb);
		}
	}

	fn now(&self) -> Instant {
		self.event_loop
			.as_ref()
			.expect("now() only called while attached")
			.borrow()
			.now()
	}

	fn uniform(&mut self, span: Duration) -> Duration {
		if span.is_zero() {
			return Duration::ZERO;
		}
		let millis = span.as_millis().max(1) as u64;
		Duration::from_millis(self.rng.gen_range(0..millis))
	}

	fn schedule(&mut self, delay: Duration) -> Result<(), Error> {
		let event_loop = self
			.event_loop
			.clone()
			.expect("schedule() only called while attached");
		let timer = event_loop.borrow_mut().add_timer(delay, self.priority)?;
		self.timer = Some(timer);
		Ok(())
	}

	fn send_probe(&mut self) -> std::io::Result<()> {
		let mac = self.mac;
		let addr = self.address;
		info!("sending arp packet", {
			op: "probe",
			src: as_display!(mac),
			target_proto: as_display!(addr)
		});
		self.socket
			.as_mut()
			.expect("socket present while running")
			.send_probe(addr, mac)
	}

	fn send_announcement(&mut self) -> std::io::Result<()> {
		let mac = self.mac;
		let addr = self.address;
		info!("sending arp packet", {
			op: "announce",
			src: as_display!(mac),
			sender_proto: as_display!(addr),
			target_proto: as_display!(addr)
		});
		self.socket
			.as_mut()
			.expect("socket present while running")
			.send_announcement(addr, mac)
	}

	/// Drive the state machine on the timer the event loop was asked to
	/// schedule for this session. Any failure folds into [`Session::stop`]
	/// with a `Stop` event.
	pub fn on_timer(&mut self) {
		if self.dispatch_timer().is_err() {
			self.stop();
		}
	}

	fn dispatch_timer(&mut self) -> Result<(), Error> {
		match self.state.state() {
			State::Init => Ok(()),
			State::Started => {
				if self.n_conflict >= MAX_CONFLICTS {
					warn!("rate limiting probing", {
						address: as_display!(self.address),
						n_conflict: self.n_conflict
					});
					self.n_conflict = 0;
					let jitter = self.uniform(PROBE_WAIT);
					self.schedule(RATE_LIMIT_INTERVAL + jitter)?;
				} else {
					let jitter = self.uniform(PROBE_WAIT);
					self.schedule(jitter)?;
				}
				self.enter_state(State::WaitingProbe, true);
				Ok(())
			}
			State::WaitingProbe => {
				self.send_probe()?;
				self.enter_state(State::Probing, true);
				let gap = PROBE_MIN + self.uniform(PROBE_MAX - PROBE_MIN);
				self.schedule(gap)
			}
			State::Probing => {
				let iter = self.state.iteration();
				if iter + 2 == PROBE_NUM {
					// final probe
					self.send_probe()?;
					self.enter_state(State::WaitingAnnounce, true);
					self.schedule(ANNOUNCE_WAIT)
				} else {
					self.send_probe()?;
					let gap = PROBE_MIN + self.uniform(PROBE_MAX - PROBE_MIN);
					self.schedule(gap)?;
					self.enter_state(State::Probing, false);
					Ok(())
				}
			}
			State::WaitingAnnounce => {
				self.send_announcement()?;
				self.enter_state(State::Announcing, true);
				self.schedule(ANNOUNCE_INTERVAL)?;
				self.n_conflict = 0;
				self.emit(Event::Bind);
				Ok(())
			}
			State::Announcing => {
				let iter = self.state.iteration();
				if iter + 1 == ANNOUNCE_NUM {
					self.enter_state(State::Running, true);
					self.timer = None;
					Ok(())
				} else {
					self.send_announcement()?;
					self.schedule(ANNOUNCE_INTERVAL)?;
					self.enter_state(State::Announcing, false);
					Ok(())
				}
			}
			State::Running => Ok(()),
		}
	}

	/// Drive the state machine on the ARP socket's readability notification.
	/// Pumps every queued frame; a fatal recv error folds into `stop`.
	pub fn on_readable(&mut self) {
		loop {
			let outcome = match self
				.socket
				.as_mut()
				.expect("rx_source present iff socket present")
				.recv_arp()
			{
				Ok(outcome) => outcome,
				Err(e) if is_transient(&e) => continue,
				Err(_) => {
					self.stop();
					return;
				}
			};

			match outcome {
				ArpRecv::WouldBlock => return,
				ArpRecv::Ignored => continue,
				ArpRecv::Frame(frame) => {
					if let Err(()) = self.handle_frame(&frame) {
						self.stop();
						return;
					}
					if !self.is_running() {
						return;
					}
				}
			}
		}
	}

	fn handle_frame(&mut self, frame: &crate::packet::ArpFrame) -> Result<(), ()> {
		debug!("read arp packet", {
			sender_hw: as_display!(frame.sender_mac),
			sender_proto: as_display!(frame.sender_ip),
			target_hw: as_display!(frame.target_mac),
			target_proto: as_display!(frame.target_ip)
		});
		match self.state.state() {
			State::Init => Ok(()),
			State::Started | State::WaitingProbe | State::Probing | State::WaitingAnnounce => {
				// The BPF filter already guarantees any delivered frame here
				// is a conflict candidate.
				warn!("received competing announce during probing", {
					sender_hw: as_display!(frame.sender_mac),
					sender_proto: as_display!(frame.sender_ip)
				});
				self.conflict();
				Ok(())
			}
			State::Announcing | State::Running => {
				if !classify::is_conflict(frame, self.address) {
					return Ok(());
				}
				let now = self.now();
				if self.defend_window.map_or(true, |window| now > window) {
					info!("defending address", {
						address: as_display!(self.address),
						sender_hw: as_display!(frame.sender_mac)
					});
					if self.send_announcement().is_err() {
						return Err(());
					}
					self.defend_window = Some(now + DEFEND_INTERVAL);
					Ok(())
				} else {
					warn!("received competing announce within defend window", {
						address: as_display!(self.address),
						sender_hw: as_display!(frame.sender_mac)
					});
					self.conflict();
					Ok(())
				}
			}
		}
	}
}

fn is_transient(err: &std::io::Error) -> bool {
	matches!(
		err.kind(),
		std::io::ErrorKind::WouldBlock | std::io::ErrorKind::Interrupted
	)
}
