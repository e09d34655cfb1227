//! MySQL replication protocol client
//!
//! Implements the slice of the client/server protocol a replica needs:
//! handshake and authentication (mysql_native_password and
//! caching_sha2_password, including RSA-encrypted full auth),
//! COM_REGISTER_SLAVE, COM_BINLOG_DUMP and the event stream that follows.
//!
//! ## Authentication
//!
//! ### mysql_native_password (MySQL 5.x default)
//! `SHA1(password) XOR SHA1(salt + SHA1(SHA1(password)))`
//!
//! ### caching_sha2_password (MySQL 8.0+ default)
//! Scramble-based fast path when the server has the password cached;
//! otherwise the password is XORed with the nonce and encrypted with the
//! server's RSA public key (PKCS#1 v1.5).

use anyhow::{bail, Context, Result};
use bytes::{BufMut, Bytes, BytesMut};
use rand::rngs::OsRng;
use rsa::{BigUint, Pkcs1v15Encrypt, RsaPublicKey};
use sha1::{Digest, Sha1};
use sha2::Sha256;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::{timeout, Duration};
use tracing::{debug, info, warn};

/// MySQL packet header: 3 length bytes + 1 sequence byte.
const PACKET_HEADER_SIZE: usize = 4;
/// Maximum packet payload.
const MAX_PACKET_SIZE: usize = 16_777_215;
/// Connect timeout.
const CONNECT_TIMEOUT_SECS: u64 = 30;
/// Per-read timeout while streaming. An idle master sends nothing, so a
/// timeout is surfaced as [`StreamEvent::Idle`], not an error.
const READ_TIMEOUT_SECS: u64 = 30;

/// Client capability flags used during the handshake.
mod capability {
    pub const CLIENT_LONG_PASSWORD: u32 = 0x0000_0001;
    pub const CLIENT_LONG_FLAG: u32 = 0x0000_0004;
    pub const CLIENT_PROTOCOL_41: u32 = 0x0000_0200;
    pub const CLIENT_TRANSACTIONS: u32 = 0x0000_2000;
    pub const CLIENT_SECURE_CONNECTION: u32 = 0x0000_8000;
    pub const CLIENT_PLUGIN_AUTH: u32 = 0x0008_0000;
    pub const CLIENT_DEPRECATE_EOF: u32 = 0x0100_0000;
}

/// Initial greeting parsed from the server.
#[derive(Debug)]
pub struct Handshake {
    pub protocol_version: u8,
    pub server_version: String,
    pub connection_id: u32,
    pub capability_flags: u32,
    pub auth_plugin_name: String,
    auth_data_part1: Vec<u8>,
    auth_data_part2: Vec<u8>,
}

impl Handshake {
    pub fn parse(data: &[u8]) -> Result<Self> {
        fn next<'d>(data: &'d [u8], pos: &mut usize, n: usize) -> Result<&'d [u8]> {
            if *pos + n > data.len() {
                bail!("handshake packet truncated");
            }
            let out = &data[*pos..*pos + n];
            *pos += n;
            Ok(out)
        }

        let mut pos = 0;
        let protocol_version = next(data, &mut pos, 1)?[0];

        let nul = data[pos..]
            .iter()
            .position(|&b| b == 0)
            .context("unterminated server version")?;
        let server_version = String::from_utf8_lossy(&data[pos..pos + nul]).to_string();
        pos += nul + 1;

        let connection_id = u32::from_le_bytes(next(data, &mut pos, 4)?.try_into().unwrap());
        let auth_data_part1 = next(data, &mut pos, 8)?.to_vec();
        pos += 1; // filler

        let cap_lower = u16::from_le_bytes(next(data, &mut pos, 2)?.try_into().unwrap());
        let _charset = next(data, &mut pos, 1)?[0];
        let _status = u16::from_le_bytes(next(data, &mut pos, 2)?.try_into().unwrap());
        let cap_upper = u16::from_le_bytes(next(data, &mut pos, 2)?.try_into().unwrap());
        let capability_flags = ((cap_upper as u32) << 16) | (cap_lower as u32);

        let auth_data_len = next(data, &mut pos, 1)?[0] as usize;
        pos += 10; // reserved

        let part2_len = if auth_data_len > 8 {
            auth_data_len - 8
        } else {
            13
        };
        let part2_take = part2_len.min(data.len() - pos);
        let mut auth_data_part2 = next(data, &mut pos, part2_take)?.to_vec();
        if let Some(z) = auth_data_part2.iter().position(|&b| b == 0) {
            auth_data_part2.truncate(z);
        }

        let auth_plugin_name = if capability_flags & capability::CLIENT_PLUGIN_AUTH != 0 {
            let rest = &data[pos..];
            let end = rest.iter().position(|&b| b == 0).unwrap_or(rest.len());
            String::from_utf8_lossy(&rest[..end]).to_string()
        } else {
            String::new()
        };

        Ok(Self {
            protocol_version,
            server_version,
            connection_id,
            capability_flags,
            auth_plugin_name,
            auth_data_part1,
            auth_data_part2,
        })
    }

    /// Full 20-byte auth salt.
    pub fn auth_data(&self) -> Vec<u8> {
        let mut data = self.auth_data_part1.clone();
        data.extend_from_slice(&self.auth_data_part2);
        data
    }
}

/// What the binlog stream yields per read.
#[derive(Debug)]
pub enum StreamEvent {
    /// A raw binlog event payload (header + body).
    Event(Bytes),
    /// Read timed out with no traffic; the stream is still live.
    Idle,
    /// Server signalled end of stream.
    End,
}

/// A connected, authenticated replication client.
pub struct ReplicationClient {
    stream: BufReader<TcpStream>,
    sequence_id: u8,
    server_version: String,
    connection_id: u32,
}

impl std::fmt::Debug for ReplicationClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplicationClient")
            .field("server_version", &self.server_version)
            .field("connection_id", &self.connection_id)
            .finish_non_exhaustive()
    }
}

impl ReplicationClient {
    /// Connect and authenticate.
    pub async fn connect(
        host: &str,
        port: u16,
        user: &str,
        password: Option<&str>,
    ) -> Result<Self> {
        let addr = format!("{}:{}", host, port);
        info!(%addr, "connecting to MySQL");

        let tcp = match timeout(
            Duration::from_secs(CONNECT_TIMEOUT_SECS),
            TcpStream::connect(&addr),
        )
        .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(e).context("failed to connect to MySQL server"),
            Err(_) => bail!("connection timeout after {}s", CONNECT_TIMEOUT_SECS),
        };

        let mut client = Self {
            stream: BufReader::new(tcp),
            sequence_id: 0,
            server_version: String::new(),
            connection_id: 0,
        };

        let greeting = client.read_packet().await?;
        let handshake = Handshake::parse(&greeting).context("failed to parse handshake")?;

        info!(
            server_version = %handshake.server_version,
            connection_id = handshake.connection_id,
            "connected"
        );
        debug!(plugin = %handshake.auth_plugin_name, "auth plugin");

        client.server_version = handshake.server_version.clone();
        client.connection_id = handshake.connection_id;
        client.authenticate(user, password, &handshake).await?;

        Ok(client)
    }

    pub fn server_version(&self) -> &str {
        &self.server_version
    }

    pub fn connection_id(&self) -> u32 {
        self.connection_id
    }

    async fn read_packet(&mut self) -> Result<Vec<u8>> {
        let mut header = [0u8; PACKET_HEADER_SIZE];
        self.stream.read_exact(&mut header).await?;

        let len = (header[0] as usize) | ((header[1] as usize) << 8) | ((header[2] as usize) << 16);
        self.sequence_id = header[3].wrapping_add(1);

        let mut payload = vec![0u8; len];
        self.stream.read_exact(&mut payload).await?;
        Ok(payload)
    }

    async fn read_packet_timeout(&mut self) -> Result<Option<Vec<u8>>> {
        match timeout(Duration::from_secs(READ_TIMEOUT_SECS), self.read_packet()).await {
            Ok(res) => res.map(Some),
            Err(_) => Ok(None),
        }
    }

    async fn write_packet(&mut self, data: &[u8]) -> Result<()> {
        if data.len() > MAX_PACKET_SIZE {
            bail!("packet too large: {} bytes", data.len());
        }

        let mut packet = Vec::with_capacity(PACKET_HEADER_SIZE + data.len());
        packet.push((data.len() & 0xFF) as u8);
        packet.push(((data.len() >> 8) & 0xFF) as u8);
        packet.push(((data.len() >> 16) & 0xFF) as u8);
        packet.push(self.sequence_id);
        packet.extend_from_slice(data);

        self.stream.get_mut().write_all(&packet).await?;
        self.stream.get_mut().flush().await?;
        self.sequence_id = self.sequence_id.wrapping_add(1);
        Ok(())
    }

    async fn authenticate(
        &mut self,
        user: &str,
        password: Option<&str>,
        handshake: &Handshake,
    ) -> Result<()> {
        let client_flags = capability::CLIENT_LONG_PASSWORD
            | capability::CLIENT_LONG_FLAG
            | capability::CLIENT_PROTOCOL_41
            | capability::CLIENT_TRANSACTIONS
            | capability::CLIENT_SECURE_CONNECTION
            | capability::CLIENT_PLUGIN_AUTH
            | capability::CLIENT_DEPRECATE_EOF;

        let auth_response = match handshake.auth_plugin_name.as_str() {
            "mysql_native_password" => Self::mysql_native_password(password, &handshake.auth_data()),
            "caching_sha2_password" | "sha256_password" => {
                Self::caching_sha2_password(password, &handshake.auth_data())
            }
            other => {
                warn!(plugin = %other, "unknown auth plugin, trying mysql_native_password");
                Self::mysql_native_password(password, &handshake.auth_data())
            }
        };

        let mut response = BytesMut::with_capacity(256);
        response.put_u32_le(client_flags);
        response.put_u32_le(MAX_PACKET_SIZE as u32);
        response.put_u8(45); // utf8mb4
        response.put_slice(&[0u8; 23]);
        response.put_slice(user.as_bytes());
        response.put_u8(0);
        response.put_u8(auth_response.len() as u8);
        response.put_slice(&auth_response);
        response.put_slice(handshake.auth_plugin_name.as_bytes());
        response.put_u8(0);

        self.write_packet(&response).await?;

        let resp = self.read_packet().await?;
        let plugin = handshake.auth_plugin_name.as_str();
        match resp.first() {
            Some(0x00) => {
                debug!("authentication succeeded");
                Ok(())
            }
            Some(0x01) if plugin == "caching_sha2_password" || plugin == "sha256_password" => {
                self.caching_sha2_continue(&resp, &handshake.auth_data(), password)
                    .await
            }
            Some(0xFF) => bail!("authentication failed: {}", parse_error_packet(&resp)),
            Some(0xFE) => {
                // Auth switch request.
                let name_end = resp[1..].iter().position(|&b| b == 0).unwrap_or(resp.len() - 1);
                let switch_plugin = String::from_utf8_lossy(&resp[1..1 + name_end]).to_string();
                let auth_data = resp[2 + name_end..].to_vec();
                debug!(plugin = %switch_plugin, "auth switch");
                self.auth_switch(&switch_plugin, &auth_data, password).await
            }
            Some(other) => bail!("unexpected auth response: 0x{:02X}", other),
            None => bail!("empty auth response"),
        }
    }

    async fn auth_switch(
        &mut self,
        plugin: &str,
        auth_data: &[u8],
        password: Option<&str>,
    ) -> Result<()> {
        let auth_response = match plugin {
            "mysql_native_password" => Self::mysql_native_password(password, auth_data),
            "caching_sha2_password" | "sha256_password" => {
                Self::caching_sha2_password(password, auth_data)
            }
            _ => bail!("unsupported auth plugin for switch: {}", plugin),
        };

        self.write_packet(&auth_response).await?;

        let resp = self.read_packet().await?;
        match resp.first() {
            Some(0x00) => Ok(()),
            Some(0x01) if plugin != "mysql_native_password" => {
                self.caching_sha2_continue(&resp, auth_data, password).await
            }
            Some(0xFF) => bail!("auth switch failed: {}", parse_error_packet(&resp)),
            _ => bail!("unexpected auth switch response"),
        }
    }

    /// Handle the caching_sha2_password continuation: 0x03 = fast auth
    /// succeeded, 0x04 = full authentication required.
    async fn caching_sha2_continue(
        &mut self,
        resp: &[u8],
        nonce: &[u8],
        password: Option<&str>,
    ) -> Result<()> {
        if resp.len() < 2 {
            bail!("short caching_sha2_password response");
        }

        match resp[1] {
            0x03 => {
                debug!("caching_sha2_password fast auth");
                Ok(())
            }
            0x04 => {
                debug!("caching_sha2_password full auth via RSA");
                self.caching_sha2_full_auth(nonce, password).await
            }
            other => bail!("unknown caching_sha2_password response: 0x{:02X}", other),
        }
    }

    async fn caching_sha2_full_auth(&mut self, nonce: &[u8], password: Option<&str>) -> Result<()> {
        let pwd = password.unwrap_or("");

        // Request the server's RSA public key.
        self.write_packet(&[0x02]).await?;

        let pk_resp = self.read_packet().await?;
        match pk_resp.first() {
            Some(0x01) => {
                let pem = String::from_utf8_lossy(&pk_resp[1..]);
                let encrypted = Self::rsa_encrypt_password(pwd, nonce, &pem)
                    .context("failed to RSA-encrypt password")?;
                self.write_packet(&encrypted).await?;
            }
            Some(0xFF) => bail!("failed to fetch public key: {}", parse_error_packet(&pk_resp)),
            _ => bail!("unexpected public key response"),
        }

        let final_resp = self.read_packet().await?;
        match final_resp.first() {
            Some(0x00) => Ok(()),
            Some(0xFF) => bail!("full auth failed: {}", parse_error_packet(&final_resp)),
            _ => bail!("unexpected full auth response"),
        }
    }

    fn mysql_native_password(password: Option<&str>, salt: &[u8]) -> Vec<u8> {
        match password {
            None | Some("") => vec![],
            Some(pwd) => {
                let stage1 = Sha1::digest(pwd.as_bytes());
                let stage2 = Sha1::digest(stage1);

                let mut hasher = Sha1::new();
                hasher.update(salt);
                hasher.update(stage2);
                let stage3 = hasher.finalize();

                stage1
                    .iter()
                    .zip(stage3.iter())
                    .map(|(a, b)| a ^ b)
                    .collect()
            }
        }
    }

    fn caching_sha2_password(password: Option<&str>, salt: &[u8]) -> Vec<u8> {
        match password {
            None | Some("") => vec![],
            Some(pwd) => {
                let hash1 = Sha256::digest(pwd.as_bytes());
                let hash2 = Sha256::digest(hash1);

                let mut hasher = Sha256::new();
                hasher.update(hash2);
                hasher.update(salt);
                let hash3 = hasher.finalize();

                hash1.iter().zip(hash3.iter()).map(|(a, b)| a ^ b).collect()
            }
        }
    }

    fn rsa_encrypt_password(password: &str, nonce: &[u8], pem: &str) -> Result<Vec<u8>> {
        let der = Self::parse_pem_public_key(pem)?;
        let (n, e) = Self::parse_rsa_public_key_der(&der)?;

        let mut pwd_bytes = password.as_bytes().to_vec();
        pwd_bytes.push(0);
        for (i, byte) in pwd_bytes.iter_mut().enumerate() {
            *byte ^= nonce[i % nonce.len()];
        }

        let key = RsaPublicKey::new(BigUint::from_bytes_be(&n), BigUint::from_bytes_be(&e))
            .map_err(|e| anyhow::anyhow!("invalid RSA public key: {}", e))?;

        let mut rng = OsRng;
        key.encrypt(&mut rng, Pkcs1v15Encrypt, &pwd_bytes)
            .map_err(|e| anyhow::anyhow!("RSA encryption failed: {}", e))
    }

    fn parse_pem_public_key(pem: &str) -> Result<Vec<u8>> {
        let start_marker = "-----BEGIN PUBLIC KEY-----";
        let end_marker = "-----END PUBLIC KEY-----";

        let start = pem
            .find(start_marker)
            .context("invalid PEM: missing BEGIN marker")?
            + start_marker.len();
        let end = pem.find(end_marker).context("invalid PEM: missing END marker")?;

        let base64_content: String = pem[start..end].chars().filter(|c| !c.is_whitespace()).collect();

        use base64::Engine;
        base64::engine::general_purpose::STANDARD
            .decode(&base64_content)
            .context("failed to decode base64 public key")
    }

    /// Extract (modulus, exponent) from a SubjectPublicKeyInfo DER blob.
    fn parse_rsa_public_key_der(der: &[u8]) -> Result<(Vec<u8>, Vec<u8>)> {
        let mut pos = 0;

        let expect = |pos: &mut usize, tag: u8, what: &str| -> Result<()> {
            if *pos >= der.len() || der[*pos] != tag {
                bail!("invalid DER: expected {}", what);
            }
            *pos += 1;
            Ok(())
        };

        expect(&mut pos, 0x30, "SEQUENCE")?;
        let (_, len_bytes) = Self::parse_der_length(&der[pos..])?;
        pos += len_bytes;

        expect(&mut pos, 0x30, "algorithm SEQUENCE")?;
        let (algo_len, len_bytes) = Self::parse_der_length(&der[pos..])?;
        pos += len_bytes + algo_len;

        expect(&mut pos, 0x03, "BIT STRING")?;
        let (_, len_bytes) = Self::parse_der_length(&der[pos..])?;
        pos += len_bytes + 1; // skip unused-bits byte

        expect(&mut pos, 0x30, "RSAPublicKey SEQUENCE")?;
        let (_, len_bytes) = Self::parse_der_length(&der[pos..])?;
        pos += len_bytes;

        expect(&mut pos, 0x02, "modulus INTEGER")?;
        let (n_len, len_bytes) = Self::parse_der_length(&der[pos..])?;
        pos += len_bytes;
        let mut n = der[pos..pos + n_len].to_vec();
        if n.first() == Some(&0x00) {
            n.remove(0);
        }
        pos += n_len;

        expect(&mut pos, 0x02, "exponent INTEGER")?;
        let (e_len, len_bytes) = Self::parse_der_length(&der[pos..])?;
        pos += len_bytes;
        let mut e = der[pos..pos + e_len].to_vec();
        if e.first() == Some(&0x00) {
            e.remove(0);
        }

        Ok((n, e))
    }

    fn parse_der_length(data: &[u8]) -> Result<(usize, usize)> {
        match data.first() {
            None => bail!("invalid DER: empty length"),
            Some(&b) if b < 0x80 => Ok((b as usize, 1)),
            Some(0x81) if data.len() >= 2 => Ok((data[1] as usize, 2)),
            Some(0x82) if data.len() >= 3 => {
                Ok((((data[1] as usize) << 8) | (data[2] as usize), 3))
            }
            Some(&b) => bail!("invalid DER: unsupported length encoding 0x{:02X}", b),
        }
    }

    /// Execute a statement, expecting OK (result sets are discarded).
    pub async fn query(&mut self, sql: &str) -> Result<()> {
        self.sequence_id = 0;

        let mut packet = BytesMut::with_capacity(sql.len() + 1);
        packet.put_u8(0x03); // COM_QUERY
        packet.put_slice(sql.as_bytes());
        self.write_packet(&packet).await?;

        let resp = self.read_packet().await?;
        match resp.first() {
            Some(0xFF) => bail!("query failed: {}", parse_error_packet(&resp)),
            _ => Ok(()),
        }
    }

    /// Register as a replica so the server will stream binlogs.
    pub async fn register_slave(&mut self, server_id: u32) -> Result<()> {
        self.sequence_id = 0;

        let mut packet = BytesMut::with_capacity(18);
        packet.put_u8(0x15); // COM_REGISTER_SLAVE
        packet.put_u32_le(server_id);
        packet.put_u8(0); // hostname length
        packet.put_u8(0); // user length
        packet.put_u8(0); // password length
        packet.put_u16_le(0); // port
        packet.put_u32_le(0); // replication rank
        packet.put_u32_le(0); // master id
        self.write_packet(&packet).await?;

        let resp = self.read_packet().await?;
        match resp.first() {
            Some(0x00) => {
                info!(server_id, "registered as replica");
                Ok(())
            }
            Some(0xFF) => bail!("failed to register as replica: {}", parse_error_packet(&resp)),
            _ => bail!("unexpected response to COM_REGISTER_SLAVE"),
        }
    }

    /// Start the binlog dump from a file/position.
    pub async fn binlog_dump(
        &mut self,
        server_id: u32,
        log_file: &str,
        position: u32,
    ) -> Result<()> {
        self.sequence_id = 0;

        let mut packet = BytesMut::with_capacity(log_file.len() + 11);
        packet.put_u8(0x12); // COM_BINLOG_DUMP
        packet.put_u32_le(position);
        packet.put_u16_le(0); // flags
        packet.put_u32_le(server_id);
        packet.put_slice(log_file.as_bytes());
        self.write_packet(&packet).await?;

        info!(log_file, position, "binlog dump started");
        Ok(())
    }

    /// Read the next raw binlog event from an active dump.
    pub async fn next_event(&mut self) -> Result<StreamEvent> {
        let packet = match self.read_packet_timeout().await? {
            Some(p) => p,
            None => return Ok(StreamEvent::Idle),
        };

        if packet.is_empty() {
            return Ok(StreamEvent::End);
        }

        match packet[0] {
            0x00 => Ok(StreamEvent::Event(Bytes::from(packet[1..].to_vec()))),
            0xFE => {
                debug!("EOF in binlog stream");
                Ok(StreamEvent::End)
            }
            0xFF => bail!("binlog stream error: {}", parse_error_packet(&packet)),
            _ => Ok(StreamEvent::Event(Bytes::from(packet))),
        }
    }
}

fn parse_error_packet(packet: &[u8]) -> String {
    if packet.len() < 9 {
        return "malformed error packet".to_string();
    }
    let code = u16::from_le_bytes([packet[1], packet[2]]);
    let msg = String::from_utf8_lossy(&packet[9..]);
    format!("{} - {}", code, msg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mysql_native_password() {
        let salt = b"12345678901234567890";
        let result = ReplicationClient::mysql_native_password(Some("password"), salt);
        assert_eq!(result.len(), 20);
    }

    #[test]
    fn test_mysql_native_password_empty() {
        let salt = b"12345678901234567890";
        assert!(ReplicationClient::mysql_native_password(None, salt).is_empty());
        assert!(ReplicationClient::mysql_native_password(Some(""), salt).is_empty());
    }

    #[test]
    fn test_caching_sha2_password() {
        let salt = b"12345678901234567890";
        let result = ReplicationClient::caching_sha2_password(Some("password"), salt);
        assert_eq!(result.len(), 32);
    }

    #[test]
    fn test_caching_sha2_consistency() {
        let salt = b"random_salt_12345678";
        let a = ReplicationClient::caching_sha2_password(Some("pw"), salt);
        let b = ReplicationClient::caching_sha2_password(Some("pw"), salt);
        assert_eq!(a, b);

        let c = ReplicationClient::caching_sha2_password(Some("other"), salt);
        assert_ne!(a, c);

        let d = ReplicationClient::caching_sha2_password(Some("pw"), b"different_salt_12345");
        assert_ne!(a, d);
    }

    #[test]
    fn test_parse_pem_public_key() {
        let pem = r#"-----BEGIN PUBLIC KEY-----
MIIBIjANBgkqhkiG9w0BAQEFAAOCAQ8AMIIBCgKCAQEAu1SU1LfVLPHCozMxH2Mo
4lgOEePzNm0tRgeLezV6ffAt0gunVTLw7onLRnrq0/IzW7yWR7QkrmBL7jTKEn5u
+qKhbwKfBstIs+bMY2Zkp18gnTxKLxoS2tFczGkPLPgizskuemMghRniWaoLcyeh
kd3qqGElvW/VDL5AaWTg0nLVkjRo9z+40RQzuVaE8AkAFmxZzow3x+VJYKdjykkJ
0iT9wCS0DRTXu269V264Vf/3jvredZiKRkgwlL9xNAwxXFg0x/XFw005UWVRIkdg
cKWTjpBP2dPwVZ4WWC+9aGVd+Gyn1o0CLelf4rEjGoXbAAEgAqeGUxrcIlbjXfbc
mwIDAQAB
-----END PUBLIC KEY-----"#;

        let der = ReplicationClient::parse_pem_public_key(pem).unwrap();
        assert!(der.len() > 200);

        let (n, e) = ReplicationClient::parse_rsa_public_key_der(&der).unwrap();
        assert_eq!(n.len(), 256); // 2048-bit modulus
        assert!(!e.is_empty());
    }

    #[test]
    fn test_parse_pem_invalid() {
        assert!(ReplicationClient::parse_pem_public_key("not a pem").is_err());
        assert!(
            ReplicationClient::parse_pem_public_key("-----BEGIN PUBLIC KEY-----\nMIIBIjAN")
                .is_err()
        );
    }

    #[test]
    fn test_parse_der_length() {
        assert_eq!(ReplicationClient::parse_der_length(&[50]).unwrap(), (50, 1));
        assert_eq!(
            ReplicationClient::parse_der_length(&[0x81, 200]).unwrap(),
            (200, 2)
        );
        assert_eq!(
            ReplicationClient::parse_der_length(&[0x82, 0x01, 0x00]).unwrap(),
            (256, 3)
        );
        assert!(ReplicationClient::parse_der_length(&[]).is_err());
        assert!(ReplicationClient::parse_der_length(&[0x84, 0, 0, 0, 0]).is_err());
    }

    #[test]
    fn test_parse_error_packet() {
        let mut packet = vec![0xFF];
        packet.extend_from_slice(&1236u16.to_le_bytes());
        packet.extend_from_slice(b"#HY000");
        packet.extend_from_slice(b"Could not find first log");
        let msg = parse_error_packet(&packet);
        assert!(msg.contains("1236"));
        assert!(msg.contains("Could not find first log"));
    }

    #[test]
    fn test_handshake_parse() {
        // Synthetic protocol-10 greeting.
        let mut p = vec![10u8];
        p.extend_from_slice(b"8.0.34\0");
        p.extend_from_slice(&7u32.to_le_bytes()); // connection id
        p.extend_from_slice(b"abcdefgh"); // auth data part 1
        p.push(0); // filler
        let caps_lower: u16 = (capability::CLIENT_PROTOCOL_41
            | capability::CLIENT_SECURE_CONNECTION) as u16;
        p.extend_from_slice(&caps_lower.to_le_bytes());
        p.push(45); // charset
        p.extend_from_slice(&2u16.to_le_bytes()); // status
        let caps_upper: u16 = ((capability::CLIENT_PLUGIN_AUTH) >> 16) as u16;
        p.extend_from_slice(&caps_upper.to_le_bytes());
        p.push(21); // auth data total length
        p.extend_from_slice(&[0u8; 10]); // reserved
        p.extend_from_slice(b"ijklmnopqrst\0"); // auth data part 2
        p.extend_from_slice(b"mysql_native_password\0");

        let hs = Handshake::parse(&p).unwrap();
        assert_eq!(hs.protocol_version, 10);
        assert_eq!(hs.server_version, "8.0.34");
        assert_eq!(hs.connection_id, 7);
        assert_eq!(hs.auth_plugin_name, "mysql_native_password");
        assert_eq!(hs.auth_data().len(), 20);
    }
}
