
use crate::error::DeviceCommunicationError;

use super::IPPROTO_TCP;
use super::tcp_clients::TcpClient;

pub const PMAP_PROG:u32 = 100000;
pub const PMAP_VERS:u32 = 2;
pub const PMAP_PORT:u16 = 111;

pub const PMAPPROC_GETPORT:u32 = 3;     // (mapping) -> unsigned int

pub struct TcpPortMapperClient {
	client: TcpClient,
}

impl TcpPortMapperClient {

	pub fn new(host:&str) -> Result<Self, DeviceCommunicationError> {
		Ok(Self{ client: TcpClient::connect((host, PMAP_PORT), PMAP_PROG, PMAP_VERS)? })
	}

	/// Asks the port mapper which TCP port serves `program`/`version`.
	pub fn get_port(&mut self, program:u32, version:u32) -> Result<u16, DeviceCommunicationError> {
		self.client.start_call(PMAPPROC_GETPORT)?;
		self.client.packer.pack_u32(program)?;
		self.client.packer.pack_u32(version)?;
		self.client.packer.pack_u32(IPPROTO_TCP)?;
		self.client.packer.pack_u32(0)?;
		self.client.do_call()?;

		let port:u32 = self.client.unpacker.unpack_u32()?;

		if !self.client.unpacker.all_data_consumed() {
			return Err(DeviceCommunicationError::response("data left over after the port mapper reply"));
		}
		match port {
			0 => Err(DeviceCommunicationError::Rpc("program is not registered with the port mapper")),
			p if p > u16::MAX as u32 => Err(DeviceCommunicationError::response(format!("port {} out of range", p))),
			p => Ok(p as u16),
		}
	}

}
