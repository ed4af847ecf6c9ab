//! TLS configuration rendering.
//!
//! The engine clients (sqlx, mongodb, clickhouse, redis) perform their own
//! TLS handshakes; this module validates a `TlsConfig` and renders it into
//! the parameter vocabulary each client understands. Because the handshake
//! happens on whatever endpoint the driver is pointed at, TLS composes with
//! SSH tunneling: the client negotiates TLS across the forwarded local port.

use crate::engine::error::{EngineError, EngineResult};
use crate::engine::types::TlsConfig;

/// Rejects configurations that cannot work before any network I/O happens.
pub fn validate(tls: &TlsConfig) -> EngineResult<()> {
    if !tls.enabled {
        return Ok(());
    }
    match (&tls.client_cert, &tls.client_key) {
        (Some(_), None) => Err(EngineError::tls(
            "client certificate given without a client key",
        )),
        (None, Some(_)) => Err(EngineError::tls(
            "client key given without a client certificate",
        )),
        _ => Ok(()),
    }
}

/// PostgreSQL connection-string parameters (`sslmode`, `sslrootcert`, ...).
pub fn postgres_params(tls: Option<&TlsConfig>) -> EngineResult<Vec<(String, String)>> {
    let mut params = Vec::new();
    let Some(tls) = tls else {
        params.push(("sslmode".into(), "prefer".into()));
        return Ok(params);
    };
    validate(tls)?;
    if !tls.enabled {
        params.push(("sslmode".into(), "disable".into()));
        return Ok(params);
    }

    // verify-full only when we can actually verify; "require" still encrypts
    // but skips chain verification.
    let mode = if tls.reject_unauthorized && tls.ca_cert.is_some() {
        "verify-full"
    } else if tls.reject_unauthorized {
        "verify-ca"
    } else {
        "require"
    };
    params.push(("sslmode".into(), mode.into()));

    if let Some(ca) = &tls.ca_cert {
        params.push(("sslrootcert".into(), ca.clone()));
    }
    if let Some(cert) = &tls.client_cert {
        params.push(("sslcert".into(), cert.clone()));
    }
    if let Some(key) = &tls.client_key {
        params.push(("sslkey".into(), key.clone()));
    }
    Ok(params)
}

/// MySQL/MariaDB connection-string parameters (`ssl-mode`, `ssl-ca`, ...).
pub fn mysql_params(tls: Option<&TlsConfig>) -> EngineResult<Vec<(String, String)>> {
    let mut params = Vec::new();
    let Some(tls) = tls else {
        params.push(("ssl-mode".into(), "PREFERRED".into()));
        return Ok(params);
    };
    validate(tls)?;
    if !tls.enabled {
        params.push(("ssl-mode".into(), "DISABLED".into()));
        return Ok(params);
    }

    let mode = if tls.reject_unauthorized && tls.ca_cert.is_some() {
        "VERIFY_IDENTITY"
    } else if tls.reject_unauthorized {
        "VERIFY_CA"
    } else {
        "REQUIRED"
    };
    params.push(("ssl-mode".into(), mode.into()));

    if let Some(ca) = &tls.ca_cert {
        params.push(("ssl-ca".into(), ca.clone()));
    }
    if let Some(cert) = &tls.client_cert {
        params.push(("ssl-cert".into(), cert.clone()));
    }
    if let Some(key) = &tls.client_key {
        params.push(("ssl-key".into(), key.clone()));
    }
    Ok(params)
}

/// MongoDB URI options (`tls=true&tlsCAFile=...`).
pub fn mongo_uri_options(tls: Option<&TlsConfig>) -> EngineResult<Vec<(String, String)>> {
    let mut options = Vec::new();
    let Some(tls) = tls else {
        return Ok(options);
    };
    validate(tls)?;
    if !tls.enabled {
        return Ok(options);
    }

    options.push(("tls".into(), "true".into()));
    if let Some(ca) = &tls.ca_cert {
        options.push(("tlsCAFile".into(), ca.clone()));
    }
    if let Some(cert) = &tls.client_cert {
        // Mongo expects the combined PEM in one file.
        options.push(("tlsCertificateKeyFile".into(), cert.clone()));
    }
    if !tls.reject_unauthorized {
        options.push(("tlsAllowInvalidCertificates".into(), "true".into()));
    }
    Ok(options)
}

/// ClickHouse HTTP endpoint scheme.
pub fn clickhouse_scheme(tls: Option<&TlsConfig>) -> EngineResult<&'static str> {
    match tls {
        Some(tls) => {
            validate(tls)?;
            Ok(if tls.enabled { "https" } else { "http" })
        }
        None => Ok("http"),
    }
}

/// Redis connection scheme.
pub fn redis_scheme(tls: Option<&TlsConfig>) -> EngineResult<&'static str> {
    match tls {
        Some(tls) => {
            validate(tls)?;
            Ok(if tls.enabled { "rediss" } else { "redis" })
        }
        None => Ok("redis"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enabled(ca: Option<&str>, reject: bool) -> TlsConfig {
        TlsConfig {
            enabled: true,
            ca_cert: ca.map(str::to_string),
            client_cert: None,
            client_key: None,
            reject_unauthorized: reject,
        }
    }

    #[test]
    fn cert_without_key_is_rejected_before_io() {
        let tls = TlsConfig {
            enabled: true,
            ca_cert: None,
            client_cert: Some("/tmp/client.pem".into()),
            client_key: None,
            reject_unauthorized: true,
        };
        assert!(validate(&tls).is_err());
    }

    #[test]
    fn postgres_mode_reflects_verification_intent() {
        let verify = enabled(Some("/tmp/ca.pem"), true);
        let params = postgres_params(Some(&verify)).expect("params");
        assert!(params.contains(&("sslmode".into(), "verify-full".into())));
        assert!(params.contains(&("sslrootcert".into(), "/tmp/ca.pem".into())));

        let lax = enabled(None, false);
        let params = postgres_params(Some(&lax)).expect("params");
        assert!(params.contains(&("sslmode".into(), "require".into())));
    }

    #[test]
    fn mongo_lax_mode_allows_invalid_certificates() {
        let lax = enabled(None, false);
        let options = mongo_uri_options(Some(&lax)).expect("options");
        assert!(options.contains(&("tlsAllowInvalidCertificates".into(), "true".into())));
    }

    #[test]
    fn schemes_follow_the_enabled_flag() {
        let on = enabled(None, true);
        assert_eq!(clickhouse_scheme(Some(&on)).expect("scheme"), "https");
        assert_eq!(redis_scheme(Some(&on)).expect("scheme"), "rediss");
        assert_eq!(clickhouse_scheme(None).expect("scheme"), "http");
        assert_eq!(redis_scheme(None).expect("scheme"), "redis");
    }
}
