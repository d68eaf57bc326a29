//! Self-signed fallback certificate (§4.D), served by the SNI resolver
//! when no configured or wildcard certificate matches.

use std::sync::Arc;

use rustls::crypto::ring::sign::any_supported_type;
use rustls::sign::CertifiedKey;

use crate::error::{Error, Result};

pub fn generate() -> Result<Arc<CertifiedKey>> {
    let generated = rcgen::generate_simple_self_signed(vec!["shelob.invalid".to_string()])
        .map_err(|e| Error::Tls(format!("self-signed cert generation failed: {e}")))?;

    let cert_pem = generated.cert.pem();
    let key_pem = generated.signing_key.serialize_pem();

    let cert_der = rustls_pemfile::certs(&mut cert_pem.as_bytes())
        .next()
        .ok_or_else(|| Error::Tls("self-signed cert: no PEM block produced".to_string()))?
        .map_err(|e| Error::Tls(format!("self-signed cert: {e}")))?;

    let key_der = rustls_pemfile::pkcs8_private_keys(&mut key_pem.as_bytes())
        .next()
        .ok_or_else(|| Error::Tls("self-signed key: no PEM block produced".to_string()))?
        .map_err(|e| Error::Tls(format!("self-signed key: {e}")))?;

    let signing_key = any_supported_type(&rustls::pki_types::PrivateKeyDer::Pkcs8(key_der))
        .map_err(|e| Error::Tls(format!("self-signed key: unsupported type: {e}")))?;

    Ok(Arc::new(CertifiedKey::new(vec![cert_der], signing_key)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn self_signed_cert_generates_successfully() {
        let key = generate().unwrap();
        assert_eq!(key.cert.len(), 1);
    }
}
