//! Client certificates and CA bundles.
//!
//! Client certificates are configured per collection and selected by the
//! request URL; the first entry whose domain pattern matches wins. CA
//! certificates are gathered from the OS bundle, `SSL_CERT_FILE`,
//! `NODE_EXTRA_CA_CERTS` and the custom file named in the preferences.

use crate::base::neterror::NetError;
use crate::config::RequestPreferences;
use boring::x509::X509;
use bytes::Bytes;
use regex::Regex;
use std::path::{Path, PathBuf};
use zeroize::Zeroizing;

/// Well-known OS trust bundles, probed in order.
const OS_BUNDLES: &[&str] = &[
    "/etc/ssl/certs/ca-certificates.crt",
    "/etc/pki/tls/certs/ca-bundle.crt",
    "/etc/ssl/ca-bundle.pem",
    "/etc/ssl/cert.pem",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CertificateSource {
    Pem { cert_path: String, key_path: String },
    Pfx { pfx_path: String },
}

/// A client certificate bound to a domain pattern such as `*.corp.local`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientCertificate {
    pub domain: String,
    pub source: CertificateSource,
    pub passphrase: Option<String>,
}

impl ClientCertificate {
    pub fn pem(
        domain: impl Into<String>,
        cert_path: impl Into<String>,
        key_path: impl Into<String>,
    ) -> Self {
        Self {
            domain: domain.into(),
            source: CertificateSource::Pem {
                cert_path: cert_path.into(),
                key_path: key_path.into(),
            },
            passphrase: None,
        }
    }

    pub fn pfx(domain: impl Into<String>, pfx_path: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            source: CertificateSource::Pfx {
                pfx_path: pfx_path.into(),
            },
            passphrase: None,
        }
    }

    pub fn with_passphrase(mut self, passphrase: impl Into<String>) -> Self {
        self.passphrase = Some(passphrase.into());
        self
    }

    /// `*` in the domain matches any run of characters; the URL may carry
    /// an `https://`, `grpc://` or `grpcs://` prefix.
    pub fn matches(&self, url: &str) -> bool {
        let domain = self.domain.trim();
        if domain.is_empty() {
            return false;
        }
        let pattern = format!(
            "^(https://|grpc://|grpcs://)?{}",
            regex::escape(domain).replace(r"\*", ".*")
        );
        Regex::new(&pattern).is_ok_and(|re| re.is_match(url))
    }

    async fn load(&self, collection_path: &Path) -> Result<ClientIdentity, NetError> {
        let mut identity = ClientIdentity {
            passphrase: self.passphrase.clone().map(Zeroizing::new),
            ..Default::default()
        };
        match &self.source {
            CertificateSource::Pem {
                cert_path,
                key_path,
            } => {
                let read = |p: &str| tokio::fs::read(resolve(p, collection_path));
                let cert = read(cert_path).await;
                let key = read(key_path).await;
                match (cert, key) {
                    (Ok(cert), Ok(key)) => {
                        identity.cert = Some(Bytes::from(cert));
                        identity.key = Some(Bytes::from(key));
                    }
                    (Err(e), _) | (_, Err(e)) => {
                        return Err(NetError::BadSslClientAuthCert(format!(
                            "Error reading cert/key file: {}",
                            e
                        )))
                    }
                }
            }
            CertificateSource::Pfx { pfx_path } => {
                let pfx = tokio::fs::read(resolve(pfx_path, collection_path))
                    .await
                    .map_err(|e| {
                        NetError::BadSslClientAuthCert(format!("Error reading pfx file: {}", e))
                    })?;
                identity.pfx = Some(Bytes::from(pfx));
            }
        }
        Ok(identity)
    }
}

/// Key material read from disk for one TLS client.
#[derive(Clone, Default)]
pub struct ClientIdentity {
    pub cert: Option<Bytes>,
    pub key: Option<Bytes>,
    pub pfx: Option<Bytes>,
    pub passphrase: Option<Zeroizing<String>>,
}

impl std::fmt::Debug for ClientIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientIdentity")
            .field("cert", &self.cert.as_ref().map(|c| c.len()))
            .field("key", &self.key.is_some())
            .field("pfx", &self.pfx.as_ref().map(|p| p.len()))
            .field("passphrase", &self.passphrase.is_some())
            .finish()
    }
}

/// Load the first certificate in `certs` that matches `url`.
pub async fn select_client_identity(
    certs: &[ClientCertificate],
    url: &str,
    collection_path: &Path,
) -> Result<Option<ClientIdentity>, NetError> {
    match certs.iter().find(|c| c.matches(url)) {
        Some(cert) => cert.load(collection_path).await.map(Some),
        None => Ok(None),
    }
}

fn resolve(raw: &str, collection_path: &Path) -> PathBuf {
    let path = Path::new(raw.trim());
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        collection_path.join(path)
    }
}

/// How many certificates came from each source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaCertificateCounts {
    pub system: usize,
    pub root: usize,
    pub custom: usize,
    pub extra: usize,
}

/// Trust anchors for one TLS client, kept as PEM so they can be hashed
/// into an agent fingerprint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaCertificates {
    pems: Vec<String>,
    counts: CaCertificateCounts,
    /// Trust only these certificates, not the platform store.
    custom_only: bool,
}

impl CaCertificates {
    /// Gather CA certificates as the preferences ask.
    ///
    /// A custom file that cannot be read or holds no certificate is an
    /// error; the default sources are best effort.
    pub fn load(prefs: &RequestPreferences) -> Result<Self, NetError> {
        let mut out = CaCertificates::default();

        if let Some(custom) = prefs.custom_ca_path() {
            let pem = std::fs::read(custom).map_err(|e| {
                NetError::SslCertificateError(format!(
                    "Error reading CA cert file {}: {}",
                    custom.display(),
                    e
                ))
            })?;
            let certs = parse_pem_bundle(&pem);
            if certs.is_empty() {
                return Err(NetError::SslCertificateError(format!(
                    "No CA certificates found in {}",
                    custom.display()
                )));
            }
            out.counts.custom = certs.len();
            out.pems.extend(certs);
            if !prefs.keep_default_ca_certificates.enabled {
                out.custom_only = true;
                return Ok(out);
            }
        }

        if let Some(bundle) = OS_BUNDLES.iter().map(Path::new).find(|p| p.exists()) {
            let certs = read_bundle(bundle);
            out.counts.root = certs.len();
            out.pems.extend(certs);
        }
        if let Some(path) = env_path("SSL_CERT_FILE") {
            let certs = read_bundle(&path);
            out.counts.system = certs.len();
            out.pems.extend(certs);
        }
        if let Some(path) = env_path("NODE_EXTRA_CA_CERTS") {
            let certs = read_bundle(&path);
            out.counts.extra = certs.len();
            out.pems.extend(certs);
        }
        Ok(out)
    }

    /// Build from in-memory PEM text, counted as custom certificates.
    pub fn from_pem(pem: &[u8]) -> Self {
        let pems = parse_pem_bundle(pem);
        CaCertificates {
            counts: CaCertificateCounts {
                custom: pems.len(),
                ..Default::default()
            },
            pems,
            custom_only: false,
        }
    }

    pub fn replaces_defaults(&self) -> bool {
        self.custom_only
    }

    pub fn counts(&self) -> CaCertificateCounts {
        self.counts
    }

    pub fn is_empty(&self) -> bool {
        self.pems.is_empty()
    }

    /// All certificates joined with `|`, the form hashed into fingerprints.
    pub fn joined(&self) -> String {
        self.pems.join("|")
    }

    pub(crate) fn x509s(&self) -> Vec<X509> {
        self.pems
            .iter()
            .filter_map(|p| X509::from_pem(p.as_bytes()).ok())
            .collect()
    }
}

fn env_path(name: &str) -> Option<PathBuf> {
    std::env::var_os(name)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

fn read_bundle(path: &Path) -> Vec<String> {
    match std::fs::read(path) {
        Ok(pem) => parse_pem_bundle(&pem),
        Err(e) => {
            tracing::debug!("skipping CA bundle {}: {}", path.display(), e);
            Vec::new()
        }
    }
}

/// Split a PEM bundle into one string per certificate that BoringSSL accepts.
fn parse_pem_bundle(pem: &[u8]) -> Vec<String> {
    const BEGIN: &str = "-----BEGIN CERTIFICATE-----";
    const END: &str = "-----END CERTIFICATE-----";

    let text = String::from_utf8_lossy(pem);
    let mut out = Vec::new();
    let mut rest = text.as_ref();
    while let Some(start) = rest.find(BEGIN) {
        let Some(len) = rest[start..].find(END) else {
            break;
        };
        let block = &rest[start..start + len + END.len()];
        if X509::from_pem(block.as_bytes()).is_ok() {
            out.push(format!("{}\n", block));
        }
        rest = &rest[start + len + END.len()..];
    }
    out
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use boring::asn1::Asn1Time;
    use boring::hash::MessageDigest;
    use boring::pkey::PKey;
    use boring::rsa::Rsa;
    use boring::x509::X509NameBuilder;

    /// Self-signed certificate for `cn`, as PEM.
    pub(crate) fn self_signed(cn: &str) -> (Vec<u8>, Vec<u8>) {
        let rsa = Rsa::generate(2048).unwrap();
        let key = PKey::from_rsa(rsa).unwrap();
        let mut name = X509NameBuilder::new().unwrap();
        name.append_entry_by_text("CN", cn).unwrap();
        let name = name.build();

        let mut builder = X509::builder().unwrap();
        builder.set_version(2).unwrap();
        builder.set_subject_name(&name).unwrap();
        builder.set_issuer_name(&name).unwrap();
        builder.set_pubkey(&key).unwrap();
        builder
            .set_not_before(&Asn1Time::days_from_now(0).unwrap())
            .unwrap();
        builder
            .set_not_after(&Asn1Time::days_from_now(30).unwrap())
            .unwrap();
        builder.sign(&key, MessageDigest::sha256()).unwrap();
        let cert = builder.build();

        (
            cert.to_pem().unwrap(),
            key.private_key_to_pem_pkcs8().unwrap(),
        )
    }

    #[test]
    fn test_domain_matching() {
        let cert = ClientCertificate::pem("*.corp.local", "c.pem", "k.pem");
        assert!(cert.matches("https://api.corp.local/v1"));
        assert!(cert.matches("grpcs://svc.corp.local:443"));
        assert!(!cert.matches("https://corp.example.com"));

        let exact = ClientCertificate::pfx("example.com", "id.pfx");
        assert!(exact.matches("example.com/path"));
        assert!(!exact.matches("https://exampleXcom"));
        assert!(!ClientCertificate::pfx("  ", "x").matches("https://a"));
    }

    #[tokio::test]
    async fn test_first_match_wins_and_paths_resolve() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("c.pem"), b"CERT").unwrap();
        std::fs::write(dir.path().join("k.pem"), b"KEY").unwrap();

        let certs = vec![
            ClientCertificate::pem("api.test", "c.pem", "k.pem").with_passphrase("pw"),
            ClientCertificate::pfx("*.test", "missing.pfx"),
        ];
        let id = select_client_identity(&certs, "https://api.test/x", dir.path())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(id.cert.as_deref(), Some(&b"CERT"[..]));
        assert_eq!(id.key.as_deref(), Some(&b"KEY"[..]));
        assert_eq!(id.passphrase.as_deref().map(String::as_str), Some("pw"));

        let err = select_client_identity(&certs, "https://other.test", dir.path())
            .await
            .unwrap_err();
        assert!(matches!(err, NetError::BadSslClientAuthCert(m) if m.starts_with("Error reading pfx file")));

        let none = select_client_identity(&certs, "https://elsewhere.org", dir.path())
            .await
            .unwrap();
        assert!(none.is_none());
    }

    #[test]
    fn test_pem_bundle_parsing() {
        let (a, _) = self_signed("a.test");
        let (b, _) = self_signed("b.test");
        let mut bundle = a.clone();
        bundle.extend_from_slice(b"\n# comment\n");
        bundle.extend_from_slice(&b);

        let ca = CaCertificates::from_pem(&bundle);
        assert_eq!(ca.counts().custom, 2);
        assert_eq!(ca.x509s().len(), 2);
        assert_eq!(ca.joined().matches('|').count(), 1);
    }

    #[test]
    fn test_custom_only_when_defaults_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let (pem, _) = self_signed("ca.test");
        let path = dir.path().join("ca.pem");
        std::fs::write(&path, &pem).unwrap();

        let mut prefs = RequestPreferences::default();
        prefs.custom_ca_certificate.enabled = true;
        prefs.custom_ca_certificate.file_path = Some(path);
        prefs.keep_default_ca_certificates.enabled = false;

        let ca = CaCertificates::load(&prefs).unwrap();
        assert!(ca.replaces_defaults());
        assert_eq!(
            ca.counts(),
            CaCertificateCounts {
                custom: 1,
                ..Default::default()
            }
        );
    }

    #[test]
    fn test_unreadable_custom_file() {
        let mut prefs = RequestPreferences::default();
        prefs.custom_ca_certificate.enabled = true;
        prefs.custom_ca_certificate.file_path = Some("/no/such/ca.pem".into());
        assert!(matches!(
            CaCertificates::load(&prefs),
            Err(NetError::SslCertificateError(_))
        ));
    }
}
