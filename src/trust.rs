use std::fmt;

use openssl::{
    error::ErrorStack,
    hash::MessageDigest,
    nid::Nid,
    stack::Stack,
    x509::{
        X509, X509Crl, X509Ref, X509StoreContext,
        store::{X509Store, X509StoreBuilder},
        verify::X509VerifyFlags,
    },
};

use crate::config::{CrlPolicy, TrustPolicy};

/// SHA-256 digest of a certificate's DER encoding.
///
/// Fingerprints are how dynamic contacts are referred to on the wire: a
/// contact request names the certificate it is looking for by fingerprint
/// rather than shipping the certificate around.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    pub fn of(cert: &X509Ref) -> Result<Self, ErrorStack> {
        let digest = cert.digest(MessageDigest::sha256())?;
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&digest);
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }

        Ok(())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self)
    }
}

/// Chain and revocation checking for presented certificates.
///
/// Built once at open time from the configured authorities and revocation
/// lists; each verification runs in a fresh store context, so concurrent
/// verifications never share mutable state.
pub struct TrustEvaluator {
    store: Option<X509Store>,
}

impl TrustEvaluator {
    pub fn new(
        policy: TrustPolicy,
        crl_policy: CrlPolicy,
        authorities: &[X509],
        crls: &[X509Crl],
    ) -> Result<Self, ErrorStack> {
        if policy == TrustPolicy::None {
            return Ok(Self { store: None });
        }

        let mut builder = X509StoreBuilder::new()?;
        for authority in authorities {
            builder.add_cert(authority.clone())?;
        }

        for crl in crls {
            builder.add_crl(crl.clone())?;
        }

        match crl_policy {
            CrlPolicy::None => {}
            CrlPolicy::Leaf => builder.set_flags(X509VerifyFlags::CRL_CHECK)?,
            CrlPolicy::All => {
                builder.set_flags(X509VerifyFlags::CRL_CHECK | X509VerifyFlags::CRL_CHECK_ALL)?
            }
        }

        Ok(Self {
            store: Some(builder.build()),
        })
    }

    /// Run chain verification for `cert`.
    ///
    /// Always true when the policy disables verification. A verifier error
    /// is a denial, not a failure: the engine only wants a yes or a no.
    pub fn verify(&self, cert: &X509Ref) -> bool {
        let Some(store) = &self.store else {
            return true;
        };

        match verify_chain(store, cert) {
            Ok(valid) => valid,
            Err(e) => {
                log::warn!("certificate verification aborted: err={}", e);
                false
            }
        }
    }
}

fn verify_chain(store: &X509Store, cert: &X509Ref) -> Result<bool, ErrorStack> {
    let untrusted: Stack<X509> = Stack::new()?;
    let mut context = X509StoreContext::new()?;
    context.init(store, cert, &untrusted, |ctx| {
        let valid = ctx.verify_cert()?;
        if valid {
            if let Some(chain) = ctx.chain() {
                for (depth, link) in chain.iter().enumerate() {
                    log::debug!(
                        "certificate accepted: depth={}, subject={:?}",
                        depth,
                        common_name(link)
                    );
                }
            }
        } else {
            log::warn!(
                "certificate rejected: err={}, depth={}",
                ctx.error().error_string(),
                ctx.error_depth()
            );
        }

        Ok(valid)
    })
}

fn common_name(cert: &X509Ref) -> Option<String> {
    cert.subject_name()
        .entries_by_nid(Nid::COMMONNAME)
        .next()
        .and_then(|entry| entry.data().as_utf8().ok())
        .map(|name| name.to_string())
}
