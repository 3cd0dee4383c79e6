//! Connection-phase messages: server greeting, handshake response, SSL
//! request, auth switch and auth more-data.

use mywire_core::{Error, ProtocolErrorKind, Result};

use super::reader::PacketReader;
use super::writer::PacketWriter;
use super::{ErrPacket, OkPacket, capabilities};
use crate::auth::plugins;

const PROTOCOL_VERSION: u8 = 10;

/// Protocol v10 greeting sent by the server when the connection opens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerHello {
    pub server_version: String,
    pub connection_id: u32,
    /// Scramble, without its trailing NUL.
    pub auth_data: Vec<u8>,
    pub capabilities: u32,
    pub collation: u8,
    pub status_flags: u16,
    pub auth_plugin: String,
}

impl ServerHello {
    /// Parse a greeting. A server that refuses the connection outright
    /// sends an ERR packet instead, which is returned as a server error.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let mut reader = PacketReader::new(payload);
        if reader.peek() == Some(0xFF) {
            return Err(reader.parse_err_packet()?.into());
        }

        let protocol_version = reader.read_u8("server greeting")?;
        if protocol_version != PROTOCOL_VERSION {
            return Err(Error::protocol(
                ProtocolErrorKind::ServerUnsupported,
                format!("unsupported protocol version {protocol_version}"),
            ));
        }

        let server_version = reader.read_null_string("server version")?;
        let connection_id = reader.read_u32_le("connection id")?;
        let auth_data_1 = reader.read_bytes(8, "auth plugin data")?;
        reader.skip(1, "server greeting")?;
        let caps_lower = reader.read_u16_le("capability flags")?;
        let collation = reader.read_u8("server greeting")?;
        let status_flags = reader.read_u16_le("server greeting")?;
        let caps_upper = reader.read_u16_le("capability flags")?;
        let capabilities = u32::from(caps_lower) | (u32::from(caps_upper) << 16);

        let auth_data_len = usize::from(reader.read_u8("server greeting")?);
        reader.skip(10, "server greeting")?;

        // At least 13 bytes of part 2 are always sent, the last one a NUL.
        let len2 = auth_data_len.saturating_sub(8).max(13);
        let data2 = reader.read_bytes(len2, "auth plugin data")?;
        let data2 = data2.strip_suffix(&[0]).unwrap_or(data2);
        let mut auth_data = auth_data_1.to_vec();
        auth_data.extend_from_slice(data2);

        let auth_plugin = if capabilities & capabilities::CLIENT_PLUGIN_AUTH != 0 {
            reader.read_null_string("auth plugin name")?
        } else {
            plugins::MYSQL_NATIVE_PASSWORD.to_string()
        };

        Ok(Self {
            server_version,
            connection_id,
            auth_data,
            capabilities,
            collation,
            status_flags,
            auth_plugin,
        })
    }
}

/// Sent in clear before upgrading the connection to TLS.
#[derive(Debug, Clone, Copy)]
pub struct SslRequest {
    pub capabilities: u32,
    pub max_packet_size: u32,
    pub collation: u8,
}

impl SslRequest {
    pub fn serialize(&self, writer: &mut PacketWriter<'_>) {
        writer.write_u32_le(self.capabilities);
        writer.write_u32_le(self.max_packet_size);
        writer.write_u8(self.collation);
        writer.write_zeros(23);
    }
}

/// Protocol 4.1 handshake response.
#[derive(Debug, Clone)]
pub struct HandshakeResponse<'a> {
    pub capabilities: u32,
    pub max_packet_size: u32,
    pub collation: u8,
    pub username: &'a str,
    pub auth_response: &'a [u8],
    pub database: &'a str,
    pub auth_plugin: &'a str,
    pub attributes: &'a [(String, String)],
}

impl HandshakeResponse<'_> {
    #[allow(clippy::cast_possible_truncation)]
    pub fn serialize(&self, writer: &mut PacketWriter<'_>) {
        let caps = self.capabilities;
        writer.write_u32_le(caps);
        writer.write_u32_le(self.max_packet_size);
        writer.write_u8(self.collation);
        writer.write_zeros(23);
        writer.write_null_string(self.username);

        if caps & capabilities::CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA != 0 {
            writer.write_lenenc_bytes(self.auth_response);
        } else {
            // Scrambles are at most 32 bytes
            writer.write_u8(self.auth_response.len() as u8);
            writer.write_bytes(self.auth_response);
        }

        if caps & capabilities::CLIENT_CONNECT_WITH_DB != 0 {
            writer.write_null_string(self.database);
        }

        if caps & capabilities::CLIENT_PLUGIN_AUTH != 0 {
            writer.write_null_string(self.auth_plugin);
        }

        if caps & capabilities::CLIENT_CONNECT_ATTRS != 0 && !self.attributes.is_empty() {
            let mut attrs = Vec::new();
            let mut attrs_writer = PacketWriter::new(&mut attrs);
            for (key, value) in self.attributes {
                attrs_writer.write_lenenc_string(key);
                attrs_writer.write_lenenc_string(value);
            }
            writer.write_lenenc_bytes(&attrs);
        }
    }
}

/// What the server answered to a handshake response or auth message.
#[derive(Debug, Clone)]
pub enum AuthReply<'a> {
    Ok(OkPacket),
    Err(ErrPacket),
    /// Start over with another plugin and scramble.
    Switch { plugin: String, data: &'a [u8] },
    /// Plugin-specific continuation data.
    MoreData(&'a [u8]),
}

impl<'a> AuthReply<'a> {
    pub fn parse(payload: &'a [u8]) -> Result<Self> {
        let mut reader = PacketReader::new(payload);
        match reader.read_u8("authentication reply")? {
            0x00 => {
                let ok = PacketReader::new(payload).parse_ok_packet()?;
                Ok(AuthReply::Ok(ok))
            }
            0xFF => {
                let err = PacketReader::new(payload).parse_err_packet()?;
                Ok(AuthReply::Err(err))
            }
            0xFE => {
                let plugin = reader.read_null_string("auth switch request")?;
                let data = reader.read_rest();
                let data = data.strip_suffix(&[0]).unwrap_or(data);
                Ok(AuthReply::Switch { plugin, data })
            }
            0x01 => Ok(AuthReply::MoreData(reader.read_rest())),
            other => Err(Error::protocol(
                ProtocolErrorKind::UnexpectedMessage,
                format!("unexpected authentication reply 0x{other:02X}"),
            )),
        }
    }
}
