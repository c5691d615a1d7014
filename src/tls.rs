use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{CryptoProvider, verify_tls12_signature, verify_tls13_signature};
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};

use crate::Result;
use crate::error::Error;

pub(crate) fn tls_config_error(message: impl Into<String>) -> Error {
    Error::TlsConfig {
        message: message.into(),
    }
}

fn ring_provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

fn build_root_store(extra_root_pems: &[Vec<u8>]) -> Result<RootCertStore> {
    let mut root_store = RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    for pem in extra_root_pems {
        let mut added = 0_usize;
        for item in CertificateDer::pem_slice_iter(pem) {
            let certificate = item.map_err(|source| {
                tls_config_error(format!("failed to parse root CA PEM: {source}"))
            })?;
            root_store.add(certificate).map_err(|source| {
                tls_config_error(format!("failed to add root CA certificate: {source}"))
            })?;
            added += 1;
        }
        if added == 0 {
            return Err(tls_config_error("root CA PEM contains no certificates"));
        }
    }
    Ok(root_store)
}

/// Verifies server certificates against the webpki roots plus any extra PEM
/// roots.
pub(crate) fn verifying_client_config(extra_root_pems: &[Vec<u8>]) -> Result<ClientConfig> {
    let root_store = build_root_store(extra_root_pems)?;
    Ok(ClientConfig::builder_with_provider(ring_provider())
        .with_safe_default_protocol_versions()
        .map_err(|source| tls_config_error(source.to_string()))?
        .with_root_certificates(root_store)
        .with_no_client_auth())
}

/// Accepts any server certificate. Handshake signatures are still checked.
pub(crate) fn insecure_client_config() -> Result<ClientConfig> {
    let provider = ring_provider();
    Ok(ClientConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()
        .map_err(|source| tls_config_error(source.to_string()))?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert { provider }))
        .with_no_client_auth())
}

#[derive(Debug)]
struct AcceptAnyServerCert {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}
