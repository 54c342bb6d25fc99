// SPDX-License-Identifier: Apache-2.0 OR MIT

/// Events delivered to the embedder's callback. Numeric values are part of the
/// stable external interface and must not be renumbered once exported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Event {
	/// The address was probed clean and announced; it is now bound.
	Bind = 0,
	/// A conflicting host was seen and the address was given up.
	Conflict = 1,
	/// The session was stopped, explicitly or after a fatal internal error.
	Stop = 2,
}
