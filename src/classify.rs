// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Conflict classification.
//!
//! Only consulted while announcing or running: in the earlier states the BPF
//! filter installed by the socket factory already guarantees every delivered
//! frame is a conflict candidate.

use std::net::Ipv4Addr;

use crate::packet::ArpFrame;

/// True iff `frame`'s sender protocol address equals `address` — i.e. some
/// other host is claiming it. A frame whose *target* protocol address
/// matches but whose sender does not is a probe from a host that hasn't
/// claimed the address yet, not a conflict.
pub fn is_conflict(frame: &ArpFrame, address: Ipv4Addr) -> bool {
	frame.sender_ip == address
}
