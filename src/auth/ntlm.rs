//! NTLMv2 handshake messages (MS-NLMP).
//!
//! The first attempt carries a Type 1 negotiate message; a 401 with
//! `WWW-Authenticate: NTLM <challenge>` is answered once with a Type 3
//! authenticate message on the same connection.

use super::crypto::{hmac, md4, random_bytes};
use crate::base::neterror::NetError;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use boring::hash::MessageDigest;
use time::OffsetDateTime;

const SIGNATURE: &[u8; 8] = b"NTLMSSP\0";

const NEGOTIATE_UNICODE: u32 = 0x0000_0001;
const NEGOTIATE_OEM: u32 = 0x0000_0002;
const REQUEST_TARGET: u32 = 0x0000_0004;
const NEGOTIATE_NTLM: u32 = 0x0000_0200;
const NEGOTIATE_ALWAYS_SIGN: u32 = 0x0000_8000;
const NEGOTIATE_EXTENDED_SESSIONSECURITY: u32 = 0x0008_0000;
const NEGOTIATE_TARGET_INFO: u32 = 0x0080_0000;
const NEGOTIATE_128: u32 = 0x2000_0000;
const NEGOTIATE_56: u32 = 0x8000_0000;

const NEGOTIATE_FLAGS: u32 = NEGOTIATE_UNICODE
    | NEGOTIATE_OEM
    | REQUEST_TARGET
    | NEGOTIATE_NTLM
    | NEGOTIATE_ALWAYS_SIGN
    | NEGOTIATE_EXTENDED_SESSIONSECURITY
    | NEGOTIATE_TARGET_INFO
    | NEGOTIATE_128
    | NEGOTIATE_56;

/// Seconds between 1601-01-01 and the Unix epoch.
const FILETIME_EPOCH_OFFSET: i128 = 11_644_473_600;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NtlmAuth {
    /// May embed the domain as `DOMAIN\user`.
    pub username: String,
    pub password: String,
    pub domain: String,
}

impl NtlmAuth {
    /// Split `DOMAIN\user` when no explicit domain is set.
    pub fn user_and_domain(&self) -> (String, String) {
        if self.domain.is_empty() {
            if let Some((domain, user)) = self.username.split_once('\\') {
                return (user.to_string(), domain.to_string());
            }
        }
        (self.username.clone(), self.domain.clone())
    }

    /// `Authorization` value for the first attempt.
    pub fn negotiate_header(&self) -> String {
        format!("NTLM {}", STANDARD.encode(negotiate_message()))
    }

    /// `Authorization` value answering a server challenge header.
    pub fn authenticate_header(&self, www_authenticate: &str) -> Result<String, NetError> {
        let challenge = ChallengeMessage::from_header(www_authenticate)
            .ok_or(NetError::InvalidAuthChallenge)??;
        let client_challenge: [u8; 8] = random_bytes(8)?
            .try_into()
            .map_err(|_| NetError::SslProtocolError)?;
        let message = self.authenticate_message(
            &challenge,
            client_challenge,
            filetime(OffsetDateTime::now_utc()),
        )?;
        Ok(format!("NTLM {}", STANDARD.encode(message)))
    }

    fn authenticate_message(
        &self,
        challenge: &ChallengeMessage,
        client_challenge: [u8; 8],
        timestamp: u64,
    ) -> Result<Vec<u8>, NetError> {
        let (user, domain) = self.user_and_domain();
        let key = ntowf_v2(&user, &self.password, &domain)?;

        let mut blob = Vec::with_capacity(32 + challenge.target_info.len());
        blob.extend_from_slice(&[0x01, 0x01, 0, 0, 0, 0, 0, 0]);
        blob.extend_from_slice(&timestamp.to_le_bytes());
        blob.extend_from_slice(&client_challenge);
        blob.extend_from_slice(&[0, 0, 0, 0]);
        blob.extend_from_slice(&challenge.target_info);
        blob.extend_from_slice(&[0, 0, 0, 0]);

        let mut proof_input = challenge.server_challenge.to_vec();
        proof_input.extend_from_slice(&blob);
        let nt_proof = hmac(MessageDigest::md5(), &key, &proof_input)?;
        let mut nt_response = nt_proof;
        nt_response.extend_from_slice(&blob);

        let mut lm_input = challenge.server_challenge.to_vec();
        lm_input.extend_from_slice(&client_challenge);
        let mut lm_response = hmac(MessageDigest::md5(), &key, &lm_input)?;
        lm_response.extend_from_slice(&client_challenge);

        let domain_bytes = utf16le(&domain);
        let user_bytes = utf16le(&user);
        let workstation: Vec<u8> = Vec::new();

        const HEADER_LEN: usize = 64;
        let payloads: [&[u8]; 5] = [
            &lm_response,
            &nt_response,
            &domain_bytes,
            &user_bytes,
            &workstation,
        ];

        let mut msg = Vec::with_capacity(HEADER_LEN + payloads.iter().map(|p| p.len()).sum::<usize>());
        msg.extend_from_slice(SIGNATURE);
        msg.extend_from_slice(&3u32.to_le_bytes());

        let mut offset = HEADER_LEN as u32;
        for payload in payloads {
            security_buffer(&mut msg, payload.len(), offset);
            offset += payload.len() as u32;
        }
        // Encrypted random session key: empty.
        security_buffer(&mut msg, 0, offset);
        msg.extend_from_slice(&(challenge.flags & NEGOTIATE_FLAGS | NEGOTIATE_UNICODE).to_le_bytes());

        for payload in payloads {
            msg.extend_from_slice(payload);
        }
        Ok(msg)
    }
}

/// Parsed Type 2 message.
#[derive(Debug, Clone)]
struct ChallengeMessage {
    flags: u32,
    server_challenge: [u8; 8],
    target_info: Vec<u8>,
}

impl ChallengeMessage {
    fn from_header(value: &str) -> Option<Result<Self, NetError>> {
        let (scheme, token) = value.trim().split_once(' ')?;
        if !scheme.eq_ignore_ascii_case("ntlm") {
            return None;
        }
        Some(
            STANDARD
                .decode(token.trim())
                .map_err(|_| NetError::InvalidAuthChallenge)
                .and_then(|raw| Self::parse(&raw)),
        )
    }

    fn parse(raw: &[u8]) -> Result<Self, NetError> {
        if raw.len() < 32 || &raw[..8] != SIGNATURE || le_u32(raw, 8) != Some(2) {
            return Err(NetError::InvalidAuthChallenge);
        }
        let flags = le_u32(raw, 20).ok_or(NetError::InvalidAuthChallenge)?;
        let mut server_challenge = [0u8; 8];
        server_challenge.copy_from_slice(&raw[24..32]);

        let target_info = if raw.len() >= 48 {
            let len = le_u16(raw, 40).unwrap_or(0) as usize;
            let off = le_u32(raw, 44).unwrap_or(0) as usize;
            raw.get(off..off + len)
                .ok_or(NetError::InvalidAuthChallenge)?
                .to_vec()
        } else {
            Vec::new()
        };

        Ok(Self {
            flags,
            server_challenge,
            target_info,
        })
    }
}

fn negotiate_message() -> Vec<u8> {
    let mut msg = Vec::with_capacity(32);
    msg.extend_from_slice(SIGNATURE);
    msg.extend_from_slice(&1u32.to_le_bytes());
    msg.extend_from_slice(&NEGOTIATE_FLAGS.to_le_bytes());
    security_buffer(&mut msg, 0, 32);
    security_buffer(&mut msg, 0, 32);
    msg
}

/// NTOWFv2: HMAC-MD5 keyed by MD4(password) over uppercase(user) + domain.
fn ntowf_v2(user: &str, password: &str, domain: &str) -> Result<Vec<u8>, NetError> {
    let nt_hash = md4(&utf16le(password))?;
    let identity = utf16le(&format!("{}{}", user.to_uppercase(), domain));
    hmac(MessageDigest::md5(), &nt_hash, &identity)
}

fn filetime(now: OffsetDateTime) -> u64 {
    let hundred_ns = (now.unix_timestamp_nanos() / 100) + FILETIME_EPOCH_OFFSET * 10_000_000;
    hundred_ns.max(0) as u64
}

fn security_buffer(out: &mut Vec<u8>, len: usize, offset: u32) {
    out.extend_from_slice(&(len as u16).to_le_bytes());
    out.extend_from_slice(&(len as u16).to_le_bytes());
    out.extend_from_slice(&offset.to_le_bytes());
}

fn utf16le(s: &str) -> Vec<u8> {
    s.encode_utf16().flat_map(|u| u.to_le_bytes()).collect()
}

fn le_u16(raw: &[u8], at: usize) -> Option<u16> {
    Some(u16::from_le_bytes(raw.get(at..at + 2)?.try_into().ok()?))
}

fn le_u32(raw: &[u8], at: usize) -> Option<u32> {
    Some(u32::from_le_bytes(raw.get(at..at + 4)?.try_into().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::crypto::to_hex;

    fn challenge_bytes(target_info: &[u8]) -> Vec<u8> {
        let mut raw = Vec::new();
        raw.extend_from_slice(SIGNATURE);
        raw.extend_from_slice(&2u32.to_le_bytes());
        security_buffer(&mut raw, 0, 48);
        raw.extend_from_slice(&NEGOTIATE_FLAGS.to_le_bytes());
        raw.extend_from_slice(&[0x01, 0x23, 0x45, 0x67, 0x89, 0xab, 0xcd, 0xef]);
        raw.extend_from_slice(&[0u8; 8]);
        security_buffer(&mut raw, target_info.len(), 48);
        raw.extend_from_slice(target_info);
        raw
    }

    #[test]
    fn test_ntowf_v2_vector() {
        // MS-NLMP 4.2.4.1.1
        let key = ntowf_v2("User", "Password", "Domain").unwrap();
        assert_eq!(to_hex(&key), "0c868a403bfd7a93a3001ef22ef02e3f");
    }

    #[test]
    fn test_negotiate_message_shape() {
        let msg = negotiate_message();
        assert_eq!(msg.len(), 32);
        assert_eq!(&msg[..8], SIGNATURE);
        assert_eq!(le_u32(&msg, 8), Some(1));
        assert!(NtlmAuth::default().negotiate_header().starts_with("NTLM TlRMTVNTUAAB"));
    }

    #[test]
    fn test_parse_challenge() {
        let raw = challenge_bytes(&[0x02, 0x00, 0x00, 0x00]);
        let header = format!("NTLM {}", STANDARD.encode(&raw));
        let parsed = ChallengeMessage::from_header(&header).unwrap().unwrap();
        assert_eq!(parsed.server_challenge[0], 0x01);
        assert_eq!(parsed.target_info, vec![0x02, 0, 0, 0]);

        assert!(ChallengeMessage::from_header("Basic abc").is_none());
        assert!(ChallengeMessage::from_header("NTLM AAAA").unwrap().is_err());
    }

    #[test]
    fn test_authenticate_message_layout() {
        let auth = NtlmAuth {
            username: "CORP\\alice".into(),
            password: "pw".into(),
            domain: String::new(),
        };
        let challenge = ChallengeMessage::parse(&challenge_bytes(&[])).unwrap();
        let msg = auth
            .authenticate_message(&challenge, [0xaa; 8], 0)
            .unwrap();

        assert_eq!(le_u32(&msg, 8), Some(3));
        // LMv2 response is 24 bytes at offset 64.
        assert_eq!(le_u16(&msg, 12), Some(24));
        assert_eq!(le_u32(&msg, 16), Some(64));
        // Domain is UTF-16 "CORP".
        let domain_len = le_u16(&msg, 28).unwrap() as usize;
        let domain_off = le_u32(&msg, 32).unwrap() as usize;
        assert_eq!(&msg[domain_off..domain_off + domain_len], utf16le("CORP").as_slice());
    }

    #[test]
    fn test_user_and_domain() {
        let auth = NtlmAuth {
            username: "user".into(),
            password: String::new(),
            domain: "D".into(),
        };
        assert_eq!(auth.user_and_domain(), ("user".into(), "D".into()));
    }

    #[test]
    fn test_filetime_epoch() {
        assert_eq!(filetime(OffsetDateTime::UNIX_EPOCH), 116_444_736_000_000_000);
    }
}
