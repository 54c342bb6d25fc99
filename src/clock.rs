// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The event loop abstraction the session is driven by.
//!
//! This crate owns no event loop of its own — the real loop (epoll/kqueue/
//! IOCP, monotonic timers) is external. What lives here is the narrow
//! boundary the session needs: a monotonic clock, a one-shot timer source,
//! and a readable-fd source, each cancellable by dropping its handle.

use std::os::unix::io::RawFd;
use std::time::{Duration, Instant};

use crate::error::Error;

/// A scheduled one-shot timer. Dropping it cancels the pending callback.
///
/// The session never polls this directly; the embedder's concrete event loop
/// is expected to call [`crate::Session::on_timer`] once the deadline it was
/// given to [`EventLoop::add_timer`] elapses.
pub trait TimerHandle {}

/// A readability subscription on a raw fd. Dropping it cancels the subscription.
///
/// As with [`TimerHandle`], the embedder's event loop calls
/// [`crate::Session::on_readable`] when the fd becomes readable.
pub trait IoHandle {}

/// External collaborator providing monotonic time and one-shot timer/fd
/// registration. Referenced, not owned: the session holds a shared handle to
/// it and never outlives it past `stop`.
pub trait EventLoop {
	/// Current monotonic time.
	fn now(&self) -> Instant;

	/// Arrange a one-shot wakeup `delay` from now, at the given priority hint.
	/// Replaces no prior registration — callers are responsible for dropping
	/// any handle they no longer want to fire.
	fn add_timer(&mut self, delay: Duration, priority: i64) -> Result<Box<dyn TimerHandle>, Error>;

	/// Subscribe to readability notifications on `fd`.
	fn add_io(&mut self, fd: RawFd, priority: i64) -> Result<Box<dyn IoHandle>, Error>;
}
