// SPDX-License-Identifier: Apache-2.0 OR MIT

//! ARP wire format and the raw-socket boundary.
//!
//! Frame construction builds a bare Ethernet frame carrying a 28-byte ARP
//! payload, using `pnet`'s zero-copy packet types. Parsing is the dual
//! operation, used both by real socket implementations the embedder
//! supplies and by the in-memory fakes under [`crate::testing`].

use std::net::Ipv4Addr;
use std::os::unix::io::RawFd;

use kv_log_macro::{debug, info};
use pnet::packet::arp::{ArpHardwareTypes, ArpOperations, ArpPacket, MutableArpPacket};
use pnet::packet::ethernet::{EtherTypes, EthernetPacket, MutableEthernetPacket};
use pnet::packet::{MutablePacket, Packet};
use pnet::util::MacAddr;

macro_rules! as_display {
	($e:expr) => {
		&$e as &dyn std::fmt::Display
	};
}

/// A parsed inbound ARP frame, stripped down to the fields the conflict
/// classifier and the state machine care about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArpFrame {
	pub sender_mac: MacAddr,
	pub sender_ip: Ipv4Addr,
	pub target_mac: MacAddr,
	pub target_ip: Ipv4Addr,
}

/// Outcome of a single non-blocking read attempt on the ARP socket.
#[derive(Debug)]
pub enum ArpRecv {
	/// A well-formed ARP frame.
	Frame(ArpFrame),
	/// Something was read but it wasn't a usable ARP frame (too short,
	/// wrong ethertype, truncated ARP payload). Not fatal; more frames may
	/// still be queued, so the caller should try again.
	Ignored,
	/// No data available right now (EAGAIN/EWOULDBLOCK). The caller should
	/// stop polling until the next readability notification.
	WouldBlock,
}

/// The raw-ARP socket boundary. Implemented by the embedder over whatever
/// raw-socket/BPF machinery its platform offers; this crate never constructs
/// one directly.
pub trait RawArpSocket {
	/// Send an ARP probe: sender protocol address 0.0.0.0, target protocol
	/// address `target_ip`, target hardware address all-zero.
	fn send_probe(&mut self, target_ip: Ipv4Addr, sender_mac: MacAddr) -> std::io::Result<()>;

	/// Send a gratuitous ARP announcing `ip`: sender and target protocol
	/// address both `ip`, target hardware address all-zero.
	fn send_announcement(&mut self, ip: Ipv4Addr, sender_mac: MacAddr) -> std::io::Result<()>;

	/// Attempt to read one frame without blocking.
	fn recv_arp(&mut self) -> std::io::Result<ArpRecv>;

	/// The fd to register for readability with the event loop.
	fn as_raw_fd(&self) -> RawFd;
}

/// Opens a [`RawArpSocket`] bound to `ifindex`, with a BPF filter installed
/// so own-MAC frames are suppressed and non-matching addresses are discarded
/// at the kernel. External collaborator; this crate only defines the
/// contract.
pub trait RawArpSocketFactory {
	fn open(&mut self, ifindex: i32, mac: MacAddr) -> std::io::Result<Box<dyn RawArpSocket>>;
}

/// 28 bytes: hardware type/protocol type/lengths/operation (8) plus two
/// MAC+IPv4 address pairs (2 * (6 + 4)).
const ARP_PAYLOAD_LEN: usize = 28;

/// Builds the Ethernet+ARP frame bytes for a probe or announcement.
fn build_frame(
	sender_mac: MacAddr,
	sender_ip: Ipv4Addr,
	target_ip: Ipv4Addr,
	target_mac: MacAddr,
) -> Vec<u8> {
	let mut arp_buf = vec![0u8; MutableArpPacket::minimum_packet_size()];
	let mut arp =
		MutableArpPacket::new(&mut arp_buf[..]).expect("arp buffer is sized by minimum_packet_size");
	arp.set_hardware_type(ArpHardwareTypes::Ethernet);
	arp.set_protocol_type(EtherTypes::Ipv4);
	arp.set_hw_addr_len(6);
	arp.set_proto_addr_len(4);
	arp.set_operation(ArpOperations::Request);
	arp.set_sender_hw_addr(sender_mac);
	arp.set_sender_proto_addr(sender_ip);
	arp.set_target_hw_addr(target_mac);
	arp.set_target_proto_addr(target_ip);

	let mut eth_buf = vec![
		0u8;
		MutableEthernetPacket::minimum_packet_size() + MutableArpPacket::minimum_packet_size()
	];
	let mut eth = MutableEthernetPacket::new(&mut eth_buf).expect("eth buffer is sized exactly");
	eth.set_source(sender_mac);
	eth.set_destination(MacAddr::broadcast());
	eth.set_ethertype(EtherTypes::Arp);
	eth.set_payload(arp.packet_mut());
	drop(eth);
	eth_buf
}

/// Bytes for an ARP probe: sender IP 0.0.0.0, target IP `target_ip`.
pub fn encode_probe(sender_mac: MacAddr, target_ip: Ipv4Addr) -> Vec<u8> {
	info!("sending arp packet", {
		op: "probe",
		src: as_display!(sender_mac),
		sender_proto: as_display!(Ipv4Addr::UNSPECIFIED),
		target_proto: as_display!(target_ip)
	});
	build_frame(sender_mac, Ipv4Addr::UNSPECIFIED, target_ip, MacAddr::zero())
}

/// Bytes for a gratuitous ARP announcement: sender IP == target IP == `ip`.
pub fn encode_announcement(sender_mac: MacAddr, ip: Ipv4Addr) -> Vec<u8> {
	info!("sending arp packet", {
		op: "announce",
		src: as_display!(sender_mac),
		sender_proto: as_display!(ip),
		target_proto: as_display!(ip)
	});
	build_frame(sender_mac, ip, ip, MacAddr::zero())
}

/// Parses a raw Ethernet frame into an [`ArpFrame`]. Returns `None` if the
/// buffer is too short, isn't an ARP ethertype, or the ARP payload itself is
/// truncated — all non-fatal, the caller just discards the read.
pub fn decode_frame(buf: &[u8]) -> Option<ArpFrame> {
	let eth = EthernetPacket::new(buf)?;
	if eth.get_ethertype() != EtherTypes::Arp {
		return None;
	}
	let arp = ArpPacket::new(eth.payload())?;
	if arp.packet().len() < ARP_PAYLOAD_LEN {
		return None;
	}
	let op = if arp.get_operation() == ArpOperations::Request {
		"request"
	} else if arp.get_operation() == ArpOperations::Reply {
		"reply"
	} else {
		"unknown"
	};
	let gratuitous = arp.get_sender_proto_addr() == arp.get_target_proto_addr();
	debug!("read arp packet", {
		src: as_display!(eth.get_source()),
		dst: as_display!(eth.get_destination()),
		op: op,
		sender_hw: as_display!(arp.get_sender_hw_addr()),
		sender_proto: as_display!(arp.get_sender_proto_addr()),
		target_hw: as_display!(arp.get_target_hw_addr()),
		target_proto: as_display!(arp.get_target_proto_addr()),
		gratuitous: gratuitous
	});
	Some(ArpFrame {
		sender_mac: arp.get_sender_hw_addr(),
		sender_ip: arp.get_sender_proto_addr(),
		target_mac: arp.get_target_hw_addr(),
		target_ip: arp.get_target_proto_addr(),
	})
}

pub(crate) fn mac_is_zero(mac: MacAddr) -> bool {
	mac == MacAddr::zero()
}
