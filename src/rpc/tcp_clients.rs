
use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::error::DeviceCommunicationError;
use crate::xdr::{Packer, Unpacker};
use super::{pack_callheader_no_auth, unpack_replyheader};

const LAST_FRAGMENT:u32 = 0x8000_0000;

pub struct TcpClient {
	stream: TcpStream,
	prog: u32,
	vers: u32,
	lastxid: u32,
	pub packer: Packer,
	pub unpacker: Unpacker,
}

impl TcpClient {

	pub fn connect<A: ToSocketAddrs>(addr: A, prog: u32, vers: u32) -> Result<Self, DeviceCommunicationError> {
		let stream = TcpStream::connect(addr)?;
		stream.set_nodelay(true)?;
		Ok(Self{ stream, prog, vers, lastxid: 0, packer: Packer::new(), unpacker: Unpacker::new() })
	}

	pub fn set_timeout(&mut self, timeout:Option<Duration>) -> Result<(), DeviceCommunicationError> {
		self.stream.set_read_timeout(timeout)?;
		self.stream.set_write_timeout(timeout)?;
		Ok(())
	}

	/// Starts a new call: bumps the transaction id and packs the call header.
	/// Arguments are packed into `self.packer` afterwards, then `do_call` sends it.
	pub fn start_call(&mut self, prc:u32) -> Result<(), DeviceCommunicationError> {
		self.lastxid = self.lastxid.wrapping_add(1);
		self.packer.reset();
		pack_callheader_no_auth(&mut self.packer, self.lastxid, self.prog, self.vers, prc)
	}

	/// Sends the packed call and leaves the reply body (past the header) in `self.unpacker`.
	pub fn do_call(&mut self) -> Result<(), DeviceCommunicationError> {
		let call = self.packer.as_bytes();
		let mut send_bytes:Vec<u8> = Vec::with_capacity(call.len() + 4);
		send_bytes.write_u32::<BigEndian>(call.len() as u32 | LAST_FRAGMENT)?;
		send_bytes.extend_from_slice(call);
		self.stream.write_all(&send_bytes)?;

		loop {
			let reply = self.read_record()?;
			self.unpacker.reset(reply);

			let xid = unpack_replyheader(&mut self.unpacker)?;
			if xid == self.lastxid {
				return Ok(());
			} else if xid < self.lastxid {
				// Stale reply to a call we already gave up on
				log::debug!("discarding RPC reply with stale xid {} (expected {})", xid, self.lastxid);
				continue;
			} else {
				return Err(DeviceCommunicationError::Rpc("reply xid is newer than the last call"));
			}
		}
	}

	// Reassembles one record from its fragments
	fn read_record(&mut self) -> Result<Vec<u8>, DeviceCommunicationError> {
		let mut reply:Vec<u8> = vec![];
		let mut last = false;
		while !last {
			let marker:u32 = self.stream.read_u32::<BigEndian>()?;
			last = (marker & LAST_FRAGMENT) != 0;
			let n = (marker & !LAST_FRAGMENT) as usize;

			let start = reply.len();
			reply.resize(start + n, 0);
			self.stream.read_exact(&mut reply[start..])?;
		}
		Ok(reply)
	}

}
