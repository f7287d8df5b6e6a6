// ONC-RPC version 2 (RFC 5531), just enough of it to carry VXI-11 calls

use crate::error::DeviceCommunicationError;
use crate::xdr::{Packer, Unpacker};

pub const RPCVERSION:u32 = 2;

pub const CALL:i32  = 0;
pub const REPLY:i32 = 1;

pub const MSG_ACCEPTED:i32 = 0;
pub const MSG_DENIED:i32 = 1;

pub const RPC_MISMATCH:i32 = 0;
pub const AUTH_ERROR:i32 = 1;

pub const SUCCESS:i32 = 0;            // RPC executed successfully
pub const PROG_UNAVAIL:i32  = 1;      // remote hasn't exported program
pub const PROG_MISMATCH:i32 = 2;      // remote can't support version #
pub const PROC_UNAVAIL:i32  = 3;      // program can't support procedure
pub const GARBAGE_ARGS:i32  = 4;      // procedure can't decode params

pub const IPPROTO_TCP:u32 = 6;

pub const AUTH_NONE:i32 = 0;

pub mod port_mapping;
pub mod tcp_clients;

pub fn pack_callheader_no_auth(packer:&mut Packer, xid:u32, prog:u32, vers:u32, prc:u32) -> Result<(), DeviceCommunicationError> {
	packer.pack_u32(xid)?;
	packer.pack_enum(CALL)?;
	packer.pack_u32(RPCVERSION)?;
	packer.pack_u32(prog)?;
	packer.pack_u32(vers)?;
	packer.pack_u32(prc)?;

	// Credentials and verifier, both AUTH_NONE with an empty body
	for _ in 0..2 {
		packer.pack_enum(AUTH_NONE)?;
		packer.pack_opaque(&[])?;
	}
	Ok(())
}

/// Consumes an accepted reply header and returns its transaction id.
pub fn unpack_replyheader(unpacker:&mut Unpacker) -> Result<u32, DeviceCommunicationError> {
	let xid:u32 = unpacker.unpack_u32()?;

	if unpacker.unpack_enum()? != REPLY {
		return Err(DeviceCommunicationError::Rpc("expected a REPLY message"));
	}

	match unpacker.unpack_enum()? {
		MSG_ACCEPTED => { },
		MSG_DENIED => {
			return Err(match unpacker.unpack_enum()? {
				RPC_MISMATCH => DeviceCommunicationError::Rpc("denied, RPC version mismatch"),
				AUTH_ERROR   => DeviceCommunicationError::Rpc("denied, authentication error"),
				_            => DeviceCommunicationError::Rpc("denied for an unknown reason"),
			});
		},
		_ => return Err(DeviceCommunicationError::Rpc("reply neither accepted nor denied")),
	}

	// Verifier, which we don't use
	let _flavor = unpacker.unpack_enum()?;
	let _body = unpacker.unpack_opaque()?;

	match unpacker.unpack_enum()? {
		SUCCESS       => Ok(xid),
		PROG_UNAVAIL  => Err(DeviceCommunicationError::Rpc("program unavailable")),
		PROG_MISMATCH => Err(DeviceCommunicationError::Rpc("program version mismatch")),
		PROC_UNAVAIL  => Err(DeviceCommunicationError::Rpc("procedure unavailable")),
		GARBAGE_ARGS  => Err(DeviceCommunicationError::Rpc("server could not decode arguments")),
		_             => Err(DeviceCommunicationError::Rpc("call failed for an unknown reason")),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn accepted_reply(xid:u32, stat:i32) -> Unpacker {
		let mut p = Packer::new();
		p.pack_u32(xid).unwrap();
		p.pack_enum(REPLY).unwrap();
		p.pack_enum(MSG_ACCEPTED).unwrap();
		p.pack_enum(AUTH_NONE).unwrap();
		p.pack_opaque(&[]).unwrap();
		p.pack_enum(stat).unwrap();
		Unpacker::from_bytes(p.as_bytes().to_vec())
	}

	#[test]
	fn accepted_reply_yields_xid() {
		let mut u = accepted_reply(42, SUCCESS);
		assert_eq!(unpack_replyheader(&mut u).unwrap(), 42);
		assert!(u.all_data_consumed());
	}

	#[test]
	fn garbage_args_is_an_rpc_error() {
		let mut u = accepted_reply(1, GARBAGE_ARGS);
		match unpack_replyheader(&mut u) {
			Err(DeviceCommunicationError::Rpc(_)) => { },
			other => panic!("unexpected {:?}", other),
		}
	}

	#[test]
	fn call_header_has_ten_words() {
		let mut p = Packer::new();
		pack_callheader_no_auth(&mut p, 1, 0x0607af, 1, 10).unwrap();
		assert_eq!(p.as_bytes().len(), 40);
	}
}
