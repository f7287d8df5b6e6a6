
use std::io::{self, Cursor, Error, ErrorKind, Read};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

// Everything in XDR occupies a multiple of four bytes, so as long as every packing method below
// ends on a four-byte boundary the buffer stays aligned
#[derive(Default)]
pub struct Packer {
	buff: Vec<u8>,
}

pub struct Unpacker {
	rdr: Cursor<Vec<u8>>,
}

impl Packer {

	pub fn new() -> Self { Self::default() }

	pub fn reset(&mut self) { self.buff.clear(); }

	pub fn as_bytes(&self) -> &[u8] { &self.buff }

	pub fn pack_u32(&mut self, x:u32) -> io::Result<()> { self.buff.write_u32::<BigEndian>(x) }
	pub fn pack_i32(&mut self, x:i32) -> io::Result<()> { self.buff.write_i32::<BigEndian>(x) }

	pub fn pack_bool(&mut self, b:bool) -> io::Result<()> { self.pack_i32(if b { 1 } else { 0 }) }

	// An enum is an i32 restricted to a set of values that only the application knows about
	pub fn pack_enum(&mut self, x:i32) -> io::Result<()> { self.pack_i32(x) }

	pub fn pack_opaque(&mut self, data:&[u8]) -> io::Result<()> {
		self.pack_u32(data.len() as u32)?;
		self.buff.extend_from_slice(data);
		while self.buff.len() % 4 != 0 { self.buff.push(0); }
		Ok(())
	}

	pub fn pack_string(&mut self, s:&str) -> io::Result<()> {
		if !s.is_ascii() {
			return Err(Error::new(ErrorKind::InvalidInput, "XDR strings must be ASCII"));
		}
		self.pack_opaque(s.as_bytes())
	}

}

impl Unpacker {

	pub fn new() -> Self { Self::from_bytes(Vec::new()) }

	pub fn from_bytes(data:Vec<u8>) -> Self { Self{ rdr: Cursor::new(data) } }

	pub fn reset(&mut self, data:Vec<u8>) { self.rdr = Cursor::new(data); }

	pub fn remaining(&self) -> usize {
		let pos = self.rdr.position() as usize;
		self.rdr.get_ref().len().saturating_sub(pos)
	}

	pub fn all_data_consumed(&self) -> bool { self.remaining() == 0 }

	pub fn unpack_u32(&mut self) -> io::Result<u32> { self.rdr.read_u32::<BigEndian>() }
	pub fn unpack_i32(&mut self) -> io::Result<i32> { self.rdr.read_i32::<BigEndian>() }
	pub fn unpack_enum(&mut self) -> io::Result<i32> { self.unpack_i32() }

	pub fn unpack_bool(&mut self) -> io::Result<bool> {
		match self.unpack_i32()? {
			0 => Ok(false),
			1 => Ok(true),
			x => Err(Error::new(ErrorKind::InvalidData, format!("Expected 0 or 1 for an XDR bool but got {}", x))),
		}
	}

	pub fn unpack_opaque(&mut self) -> io::Result<Vec<u8>> {
		let n = self.unpack_u32()? as usize;
		if n > self.remaining() {
			return Err(Error::new(ErrorKind::UnexpectedEof, "Opaque length runs past the end of the reply"));
		}

		let mut ans = vec![0u8; n];
		self.rdr.read_exact(&mut ans)?;

		// Skip the padding that keeps the next item aligned
		let pad = (4 - n % 4) % 4;
		let pos = self.rdr.position();
		self.rdr.set_position(pos + pad as u64);
		Ok(ans)
	}

}

impl Default for Unpacker {
	fn default() -> Self { Self::new() }
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn opaque_is_padded_to_four_bytes() {
		let mut p = Packer::new();
		p.pack_opaque(b"inst0").unwrap();
		p.pack_u32(7).unwrap();
		assert_eq!(p.as_bytes().len(), 4 + 8 + 4);

		let mut u = Unpacker::from_bytes(p.as_bytes().to_vec());
		assert_eq!(u.unpack_opaque().unwrap(), b"inst0".to_vec());
		assert_eq!(u.unpack_u32().unwrap(), 7);
		assert!(u.all_data_consumed());
	}

	#[test]
	fn reading_past_the_end_is_an_error() {
		let mut u = Unpacker::from_bytes(vec![0, 0]);
		assert_eq!(u.unpack_u32().unwrap_err().kind(), ErrorKind::UnexpectedEof);
	}

	#[test]
	fn bool_outside_zero_one_is_rejected() {
		let mut p = Packer::new();
		p.pack_i32(2).unwrap();
		let mut u = Unpacker::from_bytes(p.as_bytes().to_vec());
		assert_eq!(u.unpack_bool().unwrap_err().kind(), ErrorKind::InvalidData);
	}

	#[test]
	fn non_ascii_strings_are_rejected() {
		let mut p = Packer::new();
		assert!(p.pack_string("µ").is_err());
	}
}
