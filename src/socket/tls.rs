//! TLS client options over BoringSSL.

use super::certs::{CaCertificateCounts, CaCertificates, ClientIdentity};
use crate::base::neterror::NetError;
use crate::config::RequestPreferences;
use boring::pkcs12::Pkcs12;
use boring::pkey::PKey;
use boring::ssl::{SslConnector, SslConnectorBuilder, SslMethod, SslVerifyMode, SslVersion};
use boring::x509::store::X509StoreBuilder;
use boring::x509::X509;

/// Lowest protocol version offered unless told otherwise.
pub const DEFAULT_MIN_VERSION: &str = "TLSv1";

/// Everything that shapes a TLS client. Two agents with equal options
/// share one fingerprint.
#[derive(Debug, Clone)]
pub struct TlsOptions {
    pub reject_unauthorized: bool,
    pub ca: CaCertificates,
    pub client_identity: Option<ClientIdentity>,
    pub min_version: String,
    pub secure_protocol: Option<String>,
    /// Only HTTP/1.1 is spoken on the wire.
    pub alpn_protocols: Vec<String>,
}

impl Default for TlsOptions {
    fn default() -> Self {
        Self {
            reject_unauthorized: true,
            ca: CaCertificates::default(),
            client_identity: None,
            min_version: DEFAULT_MIN_VERSION.to_string(),
            secure_protocol: None,
            alpn_protocols: vec!["http/1.1".to_string()],
        }
    }
}

impl TlsOptions {
    pub fn from_preferences(prefs: &RequestPreferences) -> Result<Self, NetError> {
        Ok(Self {
            reject_unauthorized: prefs.ssl_verification,
            ca: CaCertificates::load(prefs)?,
            ..Default::default()
        })
    }

    pub fn with_client_identity(mut self, identity: Option<ClientIdentity>) -> Self {
        self.client_identity = identity;
        self
    }

    /// Build the connector plus what a connection needs to report about it.
    pub fn build_client(&self) -> Result<TlsClient, NetError> {
        Ok(TlsClient {
            connector: self.build_connector()?,
            reject_unauthorized: self.reject_unauthorized,
            ca_counts: self.ca.counts(),
            alpn_protocols: self.alpn_protocols.clone(),
        })
    }

    pub fn build_connector(&self) -> Result<SslConnector, NetError> {
        let mut builder =
            SslConnector::builder(SslMethod::tls()).map_err(|_| NetError::SslProtocolError)?;

        if let Some(min) = parse_version(&self.min_version) {
            builder
                .set_min_proto_version(Some(min))
                .map_err(|_| NetError::SslProtocolError)?;
        }
        if let Some(exact) = self.secure_protocol.as_deref().and_then(parse_version) {
            builder
                .set_min_proto_version(Some(exact))
                .map_err(|_| NetError::SslProtocolError)?;
            builder
                .set_max_proto_version(Some(exact))
                .map_err(|_| NetError::SslProtocolError)?;
        }

        if !self.alpn_protocols.is_empty() {
            let mut wire = Vec::new();
            for proto in &self.alpn_protocols {
                if proto.len() > 255 {
                    return Err(NetError::SslProtocolError);
                }
                wire.push(proto.len() as u8);
                wire.extend_from_slice(proto.as_bytes());
            }
            builder
                .set_alpn_protos(&wire)
                .map_err(|_| NetError::SslProtocolError)?;
        }

        if self.ca.replaces_defaults() {
            let store = X509StoreBuilder::new().map_err(|_| NetError::SslProtocolError)?;
            builder.set_cert_store(store.build());
        }
        for cert in self.ca.x509s() {
            // The store refuses duplicates of certificates it already holds.
            let _ = builder.cert_store_mut().add_cert(cert);
        }

        builder.set_verify(if self.reject_unauthorized {
            SslVerifyMode::PEER
        } else {
            SslVerifyMode::NONE
        });

        if let Some(identity) = &self.client_identity {
            apply_identity(&mut builder, identity)?;
        }

        Ok(builder.build())
    }

    /// SNI must not carry an IP literal (RFC 6066).
    pub fn should_set_sni(host: &str) -> bool {
        host.trim_start_matches('[')
            .trim_end_matches(']')
            .parse::<std::net::IpAddr>()
            .is_err()
    }
}

/// A ready connector shared by every connection of one agent.
#[derive(Clone)]
pub struct TlsClient {
    pub connector: SslConnector,
    pub reject_unauthorized: bool,
    pub ca_counts: CaCertificateCounts,
    pub alpn_protocols: Vec<String>,
}

impl std::fmt::Debug for TlsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsClient")
            .field("reject_unauthorized", &self.reject_unauthorized)
            .field("ca_counts", &self.ca_counts)
            .field("alpn_protocols", &self.alpn_protocols)
            .finish_non_exhaustive()
    }
}

fn parse_version(name: &str) -> Option<SslVersion> {
    match name {
        "TLSv1" | "TLSv1_method" => Some(SslVersion::TLS1),
        "TLSv1.1" | "TLSv1_1_method" => Some(SslVersion::TLS1_1),
        "TLSv1.2" | "TLSv1_2_method" => Some(SslVersion::TLS1_2),
        "TLSv1.3" => Some(SslVersion::TLS1_3),
        _ => None,
    }
}

fn apply_identity(
    builder: &mut SslConnectorBuilder,
    identity: &ClientIdentity,
) -> Result<(), NetError> {
    let bad = |what: &str, e: boring::error::ErrorStack| {
        NetError::BadSslClientAuthCert(format!("{}: {}", what, e))
    };
    let passphrase = identity.passphrase.as_ref().map(|p| p.as_str());

    if let Some(pfx) = &identity.pfx {
        let parsed = Pkcs12::from_der(pfx)
            .and_then(|p| p.parse(passphrase.unwrap_or("")))
            .map_err(|e| bad("Invalid pfx file", e))?;
        builder
            .set_certificate(&parsed.cert)
            .map_err(|e| bad("Invalid client certificate", e))?;
        builder
            .set_private_key(&parsed.pkey)
            .map_err(|e| bad("Invalid client key", e))?;
        if let Some(chain) = parsed.chain {
            for cert in chain {
                builder
                    .add_extra_chain_cert(cert)
                    .map_err(|e| bad("Invalid certificate chain", e))?;
            }
        }
        return Ok(());
    }

    let (Some(cert), Some(key)) = (&identity.cert, &identity.key) else {
        return Ok(());
    };
    let mut chain = X509::stack_from_pem(cert)
        .map_err(|e| bad("Invalid client certificate", e))?
        .into_iter();
    let leaf = chain.next().ok_or_else(|| {
        NetError::BadSslClientAuthCert("No certificate found in cert file".to_string())
    })?;
    builder
        .set_certificate(&leaf)
        .map_err(|e| bad("Invalid client certificate", e))?;
    for extra in chain {
        builder
            .add_extra_chain_cert(extra)
            .map_err(|e| bad("Invalid certificate chain", e))?;
    }

    let key = match passphrase {
        Some(pass) => PKey::private_key_from_pem_passphrase(key, pass.as_bytes()),
        None => PKey::private_key_from_pem(key),
    }
    .map_err(|e| bad("Invalid client key", e))?;
    builder
        .set_private_key(&key)
        .map_err(|e| bad("Invalid client key", e))?;
    builder
        .check_private_key()
        .map_err(|e| bad("Client key does not match certificate", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::socket::certs::tests::self_signed;
    use bytes::Bytes;

    #[test]
    fn test_defaults() {
        let opts = TlsOptions::default();
        assert!(opts.reject_unauthorized);
        assert_eq!(opts.min_version, "TLSv1");
        assert_eq!(opts.alpn_protocols, vec!["http/1.1"]);
        assert!(opts.build_connector().is_ok());
    }

    #[test]
    fn test_sni_rules() {
        assert!(TlsOptions::should_set_sni("example.com"));
        assert!(!TlsOptions::should_set_sni("127.0.0.1"));
        assert!(!TlsOptions::should_set_sni("[::1]"));
    }

    #[test]
    fn test_pem_identity() {
        let (cert, key) = self_signed("client.test");
        let opts = TlsOptions::default().with_client_identity(Some(ClientIdentity {
            cert: Some(Bytes::from(cert)),
            key: Some(Bytes::from(key)),
            ..Default::default()
        }));
        assert!(opts.build_connector().is_ok());
    }

    #[test]
    fn test_mismatched_key_is_rejected() {
        let (cert, _) = self_signed("a.test");
        let (_, other_key) = self_signed("b.test");
        let opts = TlsOptions::default().with_client_identity(Some(ClientIdentity {
            cert: Some(Bytes::from(cert)),
            key: Some(Bytes::from(other_key)),
            ..Default::default()
        }));
        assert!(matches!(
            opts.build_connector(),
            Err(NetError::BadSslClientAuthCert(_))
        ));
    }

    #[test]
    fn test_garbage_pfx() {
        let opts = TlsOptions::default().with_client_identity(Some(ClientIdentity {
            pfx: Some(Bytes::from_static(b"not a pfx")),
            ..Default::default()
        }));
        assert!(matches!(
            opts.build_connector(),
            Err(NetError::BadSslClientAuthCert(m)) if m.starts_with("Invalid pfx file")
        ));
    }
}
