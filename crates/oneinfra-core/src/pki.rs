//! Certificate authorities and certificate issuance
//!
//! Every authority is stored as PEM (certificate + private key) inside the
//! cluster definition. Issued certificates remember the request and the
//! fingerprint of the issuing authority, so a component can decide whether a
//! cached certificate is still valid for a new request without re-issuing.

use crate::error::{OneinfraError, Result};
use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, DnValue,
    ExtendedKeyUsagePurpose, IsCa, KeyPair, KeyUsagePurpose,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A certificate authority: PEM certificate and PEM private key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateAuthority {
    pub certificate: String,
    pub private_key: String,
}

/// What an issued certificate is used for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CertificateKind {
    /// TLS client authentication
    Client,
    /// TLS server authentication
    Server,
    /// Both directions (etcd peer traffic)
    Peer,
}

/// Parameters of a certificate to be issued
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateRequest {
    pub kind: CertificateKind,
    pub common_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization: Option<String>,
    /// Subject alternative names; IP literals become IP SANs, the rest DNS SANs
    #[serde(default)]
    pub sans: Vec<String>,
}

/// An issued certificate and its private key (PEM)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Certificate {
    pub certificate: String,
    pub private_key: String,
    pub request: CertificateRequest,
    /// Fingerprint of the authority that signed this certificate
    pub issuer: String,
}

/// Key pair used by the API server to sign and verify service account tokens
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceAccountKey {
    pub public_key: String,
    pub private_key: String,
}

impl CertificateAuthority {
    /// Create a new self-signed certificate authority
    pub fn generate(common_name: &str) -> Result<Self> {
        let mut params = CertificateParams::default();
        let mut dn = DistinguishedName::new();
        dn.push(
            DnType::CommonName,
            DnValue::Utf8String(common_name.to_string()),
        );
        dn.push(
            DnType::OrganizationName,
            DnValue::Utf8String("oneinfra".to_string()),
        );
        params.distinguished_name = dn;
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];

        let key = KeyPair::generate()?;
        let cert = params.self_signed(&key)?;

        Ok(Self {
            certificate: cert.pem(),
            private_key: key.serialize_pem(),
        })
    }

    /// Stable fingerprint of this authority's certificate
    pub fn fingerprint(&self) -> String {
        format!("{:x}", Sha256::digest(self.certificate.as_bytes()))
    }

    /// Issue a certificate signed by this authority
    pub fn issue(&self, request: &CertificateRequest) -> Result<Certificate> {
        let ca_key = KeyPair::from_pem(&self.private_key).map_err(|e| {
            OneinfraError::certificate_error(format!("failed to parse CA private key: {}", e))
        })?;
        let ca_params = CertificateParams::from_ca_cert_pem(&self.certificate).map_err(|e| {
            OneinfraError::certificate_error(format!("failed to parse CA certificate: {}", e))
        })?;
        let ca_cert = ca_params.self_signed(&ca_key)?;

        let mut params = CertificateParams::new(request.sans.clone())?;
        let mut dn = DistinguishedName::new();
        dn.push(
            DnType::CommonName,
            DnValue::Utf8String(request.common_name.clone()),
        );
        if let Some(organization) = &request.organization {
            dn.push(
                DnType::OrganizationName,
                DnValue::Utf8String(organization.clone()),
            );
        }
        params.distinguished_name = dn;
        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
        ];
        params.extended_key_usages = match request.kind {
            CertificateKind::Client => vec![ExtendedKeyUsagePurpose::ClientAuth],
            CertificateKind::Server => vec![ExtendedKeyUsagePurpose::ServerAuth],
            CertificateKind::Peer => vec![
                ExtendedKeyUsagePurpose::ServerAuth,
                ExtendedKeyUsagePurpose::ClientAuth,
            ],
        };

        let key = KeyPair::generate()?;
        let cert = params.signed_by(&key, &ca_cert, &ca_key)?;

        Ok(Certificate {
            certificate: cert.pem(),
            private_key: key.serialize_pem(),
            request: request.clone(),
            issuer: self.fingerprint(),
        })
    }
}

impl Certificate {
    /// Whether this certificate satisfies `request` as issued by `ca`
    pub fn matches(&self, ca: &CertificateAuthority, request: &CertificateRequest) -> bool {
        self.request == *request && self.issuer == ca.fingerprint()
    }
}

impl ServiceAccountKey {
    pub fn generate() -> Result<Self> {
        let key = KeyPair::generate()?;
        Ok(Self {
            public_key: key.public_key_pem(),
            private_key: key.serialize_pem(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client_request(cn: &str) -> CertificateRequest {
        CertificateRequest {
            kind: CertificateKind::Client,
            common_name: cn.to_string(),
            organization: Some("system:masters".to_string()),
            sans: vec![],
        }
    }

    #[test]
    fn test_generate_ca_produces_pem() {
        let ca = CertificateAuthority::generate("etcd-client-ca").unwrap();
        assert!(ca.certificate.starts_with("-----BEGIN CERTIFICATE-----"));
        assert!(ca.private_key.contains("PRIVATE KEY"));
    }

    #[test]
    fn test_issue_records_request_and_issuer() {
        let ca = CertificateAuthority::generate("apiserver-ca").unwrap();
        let request = CertificateRequest {
            kind: CertificateKind::Server,
            common_name: "kube-apiserver".to_string(),
            organization: None,
            sans: vec!["10.0.0.10".to_string(), "kubernetes.default".to_string()],
        };

        let cert = ca.issue(&request).unwrap();
        assert!(cert.certificate.starts_with("-----BEGIN CERTIFICATE-----"));
        assert_eq!(cert.request, request);
        assert!(cert.matches(&ca, &request));
    }

    #[test]
    fn test_matches_detects_changed_request_or_authority() {
        let ca = CertificateAuthority::generate("ca").unwrap();
        let other_ca = CertificateAuthority::generate("ca").unwrap();
        let cert = ca.issue(&client_request("admin")).unwrap();

        assert!(!cert.matches(&ca, &client_request("someone-else")));
        assert!(!cert.matches(&other_ca, &client_request("admin")));
    }

    #[test]
    fn test_service_account_key() {
        let key = ServiceAccountKey::generate().unwrap();
        assert!(key.public_key.contains("PUBLIC KEY"));
        assert!(key.private_key.contains("PRIVATE KEY"));
    }
}
