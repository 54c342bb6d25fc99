// SPDX-License-Identifier: Apache-2.0 OR MIT

use thiserror::Error;

/// Errors visible at the session's public boundary.
#[derive(Debug, Error)]
pub enum Error {
	/// A configuration setter was given a zero, negative, or otherwise unusable value.
	#[error("invalid argument: {0}")]
	InvalidArgument(&'static str),

	/// A mutation was attempted while the session is running, or an event loop was
	/// attached twice.
	#[error("session is busy")]
	Busy,

	/// Session or resource allocation failed.
	#[error("out of memory")]
	OutOfMemory,

	/// Socket open/bind/read/write failed.
	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	/// The event loop could not register a timer or fd source.
	#[error("event loop scheduling failed: {0}")]
	Scheduling(String),
}
