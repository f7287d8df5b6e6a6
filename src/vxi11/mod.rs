
// Device core
pub const DEVICE_CORE_PROG:u32  = 0x0607af;
pub const DEVICE_CORE_VERS:u32  = 1;
pub const CREATE_LINK:u32       = 10;
pub const DEVICE_WRITE:u32      = 11;
pub const DEVICE_READ:u32       = 12;
pub const DEVICE_CLEAR:u32      = 15;
pub const DESTROY_LINK:u32      = 23;

pub const CLIENT_ID:i32 = 3333;
pub const DEFAULT_LOCK_TIMEOUT:u32 = 10000;
pub const DEFAULT_IO_TIMEOUT:u32 = 10000;

pub const OPERATION_FLAGS_END_ONLY:i32 = 8;

// Bits in the reason field of a read response
pub const REASON_REQCNT:i32 = 1;
pub const REASON_CHR:i32    = 2;
pub const REASON_END:i32    = 4;

use std::time::Duration;

use crate::error::DeviceCommunicationError;
use crate::rpc::port_mapping::TcpPortMapperClient;
use crate::rpc::tcp_clients::TcpClient;

// TODO: implement abort and interrupt clients

pub struct CoreClient {
    host: String,
    client: TcpClient,
    opt_link: Option<Link>,
}

#[derive(Debug, Clone, Copy)]
pub struct Link {
    pub link_id: i32,
    pub abort_port: u32,
    pub max_recv_size: u32,
}

/// Translates a VXI-11 device error code into text.
pub fn error_reason(code:i32) -> &'static str {
    match code {
        1  => "syntax error",
        3  => "device not accessible",
        4  => "invalid link identifier",
        5  => "parameter error",
        6  => "channel not established",
        8  => "operation not supported",
        9  => "out of resources",
        11 => "device locked by another link",
        12 => "no lock held by this link",
        15 => "I/O timeout",
        17 => "I/O error",
        21 => "invalid address",
        23 => "abort",
        29 => "channel already established",
        _  => "unknown error",
    }
}

fn check(operation:&'static str, code:i32) -> Result<(), DeviceCommunicationError> {
    if code == 0 { Ok(()) }
    else { Err(DeviceCommunicationError::Vxi11{ operation, code, reason: error_reason(code) }) }
}

impl CoreClient {

    /// Finds the core program through the port mapper, connects and creates a link to `inst0`.
    pub fn connect(host:&str) -> Result<Self, DeviceCommunicationError> {
        let mut pmap_client = TcpPortMapperClient::new(host)?;
        let port = pmap_client.get_port(DEVICE_CORE_PROG, DEVICE_CORE_VERS)?;
        log::debug!("{}: VXI-11 core channel on port {}", host, port);

        let mut client = TcpClient::connect((host, port), DEVICE_CORE_PROG, DEVICE_CORE_VERS)?;
        client.set_timeout(Some(Duration::from_millis(DEFAULT_IO_TIMEOUT as u64 * 2)))?;

        let mut core = CoreClient{ host: host.to_owned(), client, opt_link: None };
        core.create_link()?;
        Ok(core)
    }

    pub fn host(&self) -> &str { &self.host }

    pub fn link(&self) -> Option<Link> { self.opt_link }

    fn link_id(&self) -> Result<i32, DeviceCommunicationError> {
        self.opt_link.map(|l| l.link_id).ok_or(DeviceCommunicationError::NotLinked)
    }

    pub fn create_link(&mut self) -> Result<(), DeviceCommunicationError> {
        if self.opt_link.is_some() {
            return Err(DeviceCommunicationError::Vxi11{ operation: "create_link", code: 29, reason: "link already created" });
        }

        self.client.start_call(CREATE_LINK)?;
        self.client.packer.pack_i32(CLIENT_ID)?;
        self.client.packer.pack_bool(false)?;
        self.client.packer.pack_u32(DEFAULT_LOCK_TIMEOUT)?;
        self.client.packer.pack_string("inst0")?;
        self.client.do_call()?;

        let error:i32         = self.client.unpacker.unpack_i32()?;
        let link_id:i32       = self.client.unpacker.unpack_i32()?;
        let abort_port:u32    = self.client.unpacker.unpack_u32()?;
        let max_recv_size:u32 = self.client.unpacker.unpack_u32()?;
        check("create_link", error)?;

        self.opt_link = Some(Link{ link_id, abort_port, max_recv_size });
        Ok(())
    }

    pub fn ask(&mut self, data:&[u8]) -> Result<Vec<u8>, DeviceCommunicationError> {
        self.write(data)?;
        self.read()
    }

    pub fn write(&mut self, data:&[u8]) -> Result<(), DeviceCommunicationError> {
        let link_id = self.link_id()?;
        self.client.start_call(DEVICE_WRITE)?;
        self.client.packer.pack_i32(link_id)?;
        self.client.packer.pack_u32(DEFAULT_IO_TIMEOUT)?;
        self.client.packer.pack_u32(DEFAULT_LOCK_TIMEOUT)?;
        self.client.packer.pack_i32(OPERATION_FLAGS_END_ONLY)?;
        self.client.packer.pack_opaque(data)?;
        self.client.do_call()?;

        let error:i32 = self.client.unpacker.unpack_i32()?;
        let size:u32  = self.client.unpacker.unpack_u32()?;
        check("device_write", error)?;

        if size as usize != data.len() {
            return Err(DeviceCommunicationError::response(
                format!("device confirmed {} bytes but {} were sent", size, data.len())));
        }
        Ok(())
    }

    /// Reads until the instrument signals END, concatenating partial reads.
    pub fn read(&mut self) -> Result<Vec<u8>, DeviceCommunicationError> {
        let link_id = self.link_id()?;
        let mut ans:Vec<u8> = vec![];

        loop {
            self.client.start_call(DEVICE_READ)?;
            self.client.packer.pack_i32(link_id)?;
            self.client.packer.pack_u32(std::u32::MAX)?;
            self.client.packer.pack_u32(DEFAULT_IO_TIMEOUT)?;
            self.client.packer.pack_u32(DEFAULT_LOCK_TIMEOUT)?;
            self.client.packer.pack_i32(0)?;
            self.client.packer.pack_i32(0)?;
            self.client.do_call()?;

            let error:i32  = self.client.unpacker.unpack_i32()?;
            let reason:i32 = self.client.unpacker.unpack_i32()?;
            let mut data   = self.client.unpacker.unpack_opaque()?;
            check("device_read", error)?;

            ans.append(&mut data);
            if reason & REASON_END != 0 {
                return Ok(ans);
            }
            if reason & (REASON_REQCNT | REASON_CHR) == 0 {
                return Err(DeviceCommunicationError::response("read ended without a reason bit set"));
            }
        }
    }

    pub fn clear(&mut self) -> Result<(), DeviceCommunicationError> {
        let link_id = self.link_id()?;
        self.client.start_call(DEVICE_CLEAR)?;
        self.client.packer.pack_i32(link_id)?;
        self.client.packer.pack_i32(0)?;
        self.client.packer.pack_u32(DEFAULT_LOCK_TIMEOUT)?;
        self.client.packer.pack_u32(DEFAULT_IO_TIMEOUT)?;
        self.client.do_call()?;

        let error:i32 = self.client.unpacker.unpack_i32()?;
        check("device_clear", error)
    }

    pub fn destroy_link(&mut self) -> Result<(), DeviceCommunicationError> {
        let link_id = self.link_id()?;
        self.client.start_call(DESTROY_LINK)?;
        self.client.packer.pack_i32(link_id)?;
        self.client.do_call()?;

        let error:i32 = self.client.unpacker.unpack_i32()?;
        self.opt_link = None;
        check("destroy_link", error)
    }

}

impl Drop for CoreClient {

    fn drop(&mut self) {
        if self.opt_link.is_some() {
            if let Err(e) = self.destroy_link() {
                log::warn!("{}: unable to destroy VXI-11 link: {}", self.host, e);
            }
        }
    }

}
