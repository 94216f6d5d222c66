//! Certificate inspection for startup logs.
//!
//! Parses the first PEM block of a certificate artifact and extracts the
//! fields an operator wants to see when the container starts: subject CN, SAN
//! DNS names, CA flag and validity. Inspection never changes the policy
//! decision; a certificate that cannot be parsed is simply reported.

use x509_parser::certificate::X509Certificate;
use x509_parser::extensions::GeneralName;
use x509_parser::pem::parse_x509_pem;
use x509_parser::prelude::FromDer;

use crate::{Error, Result};

/// Identity fields of a PEM certificate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CertSummary {
    /// Subject Common Name.
    pub common_name: Option<String>,
    /// Subject Alternative Name DNS entries.
    pub san_dns_names: Vec<String>,
    /// Whether the certificate is a CA.
    pub is_ca: bool,
    /// `notAfter`, as printed by the parser.
    pub not_after: String,
    /// Whether "now" is inside the validity window.
    pub currently_valid: bool,
}

impl CertSummary {
    /// Inspect the first certificate in `pem`.
    ///
    /// # Errors
    ///
    /// Returns `Error::CertificateInspection` if no PEM block is found or the
    /// DER inside it is not an X.509 certificate.
    pub fn from_pem(name: &str, pem: &[u8]) -> Result<Self> {
        let (_, block) = parse_x509_pem(pem)
            .map_err(|e| Error::inspection(name, format!("not a PEM certificate: {e}")))?;
        let (_, cert) = X509Certificate::from_der(&block.contents)
            .map_err(|e| Error::inspection(name, format!("not an X.509 certificate: {e}")))?;

        Ok(Self {
            common_name: extract_cn(&cert),
            san_dns_names: extract_dns_sans(&cert),
            is_ca: cert.is_ca(),
            not_after: cert.validity().not_after.to_string(),
            currently_valid: cert.validity().is_valid(),
        })
    }

    /// CN, or the first DNS SAN, or `"<unknown>"`.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.common_name
            .as_deref()
            .or_else(|| self.san_dns_names.first().map(String::as_str))
            .unwrap_or("<unknown>")
    }
}

fn extract_cn(cert: &X509Certificate<'_>) -> Option<String> {
    cert.subject()
        .iter_common_name()
        .next()
        .and_then(|attr| attr.as_str().ok())
        .map(str::to_owned)
}

fn extract_dns_sans(cert: &X509Certificate<'_>) -> Vec<String> {
    let mut dns_names = Vec::new();
    if let Ok(Some(san_ext)) = cert.subject_alternative_name() {
        for name in &san_ext.value.general_names {
            if let GeneralName::DNSName(dns) = name {
                dns_names.push((*dns).to_owned());
            }
        }
    }
    dns_names
}

#[cfg(test)]
mod tests {
    use super::*;
    use rcgen::{BasicConstraints, CertificateParams, DistinguishedName, DnType, IsCa, KeyPair};

    fn make_cert_pem(cn: &str, sans: &[&str], ca: bool) -> String {
        let mut params =
            CertificateParams::new(sans.iter().map(|s| (*s).to_string()).collect::<Vec<_>>())
                .unwrap();
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, cn);
        params.distinguished_name = dn;
        if ca {
            params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        }
        let key_pair = KeyPair::generate().unwrap();
        params.self_signed(&key_pair).unwrap().pem()
    }

    #[test]
    fn extracts_server_identity() {
        // GIVEN: a server certificate for example.com
        let pem = make_cert_pem("example.com", &["example.com", "db.example.com"], false);
        // WHEN: inspecting it
        let summary = CertSummary::from_pem("server.cert.pem", pem.as_bytes()).unwrap();
        // THEN: CN and SANs are reported
        assert_eq!(summary.common_name.as_deref(), Some("example.com"));
        assert_eq!(summary.san_dns_names, vec!["example.com", "db.example.com"]);
        assert!(!summary.is_ca);
        assert!(summary.currently_valid);
        assert_eq!(summary.display_name(), "example.com");
    }

    #[test]
    fn detects_ca_certificates() {
        let pem = make_cert_pem("Test Root CA", &[], true);
        let summary = CertSummary::from_pem("client.ca.cert.pem", pem.as_bytes()).unwrap();
        assert!(summary.is_ca);
    }

    #[test]
    fn garbage_is_an_inspection_failure_not_bad_input() {
        // GIVEN: bytes that are not a certificate, possibly from a mounted file
        let err = CertSummary::from_pem("server.cert.pem", b"not a cert").unwrap_err();
        // THEN: the failure names the artifact without blaming an input variable
        assert!(matches!(&err, Error::CertificateInspection { artifact, .. } if artifact == "server.cert.pem"));
        assert!(!err.is_input_error());
        assert!(err.to_string().contains("server.cert.pem"));
    }

    #[test]
    fn display_name_falls_back_to_unknown() {
        assert_eq!(CertSummary::default().display_name(), "<unknown>");
    }
}
