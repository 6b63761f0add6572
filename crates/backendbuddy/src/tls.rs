// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Optional TLS termination on the admin port, gated by `USE_HTTPS`.
//!
//! Spec §6 names `USE_HTTPS` as the one environment switch the core reacts
//! to directly; certificate *generation* is an external collaborator's job
//! (spec §1 non-goals). This module only loads a cert/key pair from fixed
//! paths and builds a `rustls::ServerConfig` from it — it is not a CA.

use std::path::Path;
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::ServerConfig;
use tokio_rustls::TlsAcceptor;
use tracing::warn;

/// Load the configured cert/key pair and build a `TlsAcceptor`. Returns
/// `None` (with a warning logged) if `USE_HTTPS=true` but the pair cannot be
/// read or parsed — the caller falls back to plain HTTP rather than fail to
/// start, matching spec §6's "only initialization failure aborts" policy for
/// persistence/bind errors specifically, not this optional feature.
pub fn load_or_warn(cert_path: &str, key_path: &str) -> Option<TlsAcceptor> {
    match try_load(cert_path, key_path) {
        Ok(acceptor) => Some(acceptor),
        Err(err) => {
            warn!(cert = cert_path, key = key_path, "USE_HTTPS set but TLS pair could not be loaded: {err}");
            None
        }
    }
}

fn try_load(cert_path: &str, key_path: &str) -> anyhow::Result<TlsAcceptor> {
    let certs = load_certs(Path::new(cert_path))?;
    let key = load_key(Path::new(key_path))?;

    let config = ServerConfig::builder().with_no_client_auth().with_single_cert(certs, key)?;
    Ok(TlsAcceptor::from(Arc::new(config)))
}

fn load_certs(path: &Path) -> anyhow::Result<Vec<CertificateDer<'static>>> {
    let bytes = std::fs::read(path)?;
    let certs = rustls_pemfile::certs(&mut bytes.as_slice()).collect::<Result<Vec<_>, _>>()?;
    if certs.is_empty() {
        anyhow::bail!("no certificates found in {}", path.display());
    }
    Ok(certs)
}

fn load_key(path: &Path) -> anyhow::Result<PrivateKeyDer<'static>> {
    let bytes = std::fs::read(path)?;
    rustls_pemfile::private_key(&mut bytes.as_slice())?.ok_or_else(|| anyhow::anyhow!("no private key found in {}", path.display()))
}
