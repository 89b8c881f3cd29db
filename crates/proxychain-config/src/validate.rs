//! Chain configuration validation.

use std::time::Duration;

use proxychain_core::{Host, defaults};

use crate::error::ParseError;
use crate::types::{
    ChainConfig, Credentials, DnsMode, HopDescriptor, HopKind, RawChain, RawHop, RawRetry,
    RetryPolicy,
};

const MAX_RETRY_BACKOFF_MS: i64 = 60_000;

/// Validate a raw chain into a [`ChainConfig`].
///
/// The first violation found is returned; nothing is partially applied.
pub fn validate_chain(raw: &RawChain) -> Result<ChainConfig, ParseError> {
    if raw.hops.len() > defaults::MAX_CHAIN_HOPS {
        return Err(ParseError::chain(
            "hops",
            format!(
                "{} hops exceeds the limit of {}",
                raw.hops.len(),
                defaults::MAX_CHAIN_HOPS
            ),
        ));
    }

    let hops = raw
        .hops
        .iter()
        .enumerate()
        .map(|(i, hop)| validate_hop(i, hop))
        .collect::<Result<Vec<_>, _>>()?;

    let connect_timeout = secs_field(
        None,
        "connect_timeout_secs",
        raw.connect_timeout_secs,
        defaults::DEFAULT_CONNECT_TIMEOUT_SECS,
    )?;
    let hop_timeout = secs_field(
        None,
        "hop_timeout_secs",
        raw.hop_timeout_secs,
        defaults::DEFAULT_HOP_TIMEOUT_SECS,
    )?;

    let dns = match raw.dns.as_deref().map(str::to_ascii_lowercase).as_deref() {
        None | Some("remote") => DnsMode::Remote,
        Some("local") => DnsMode::Local,
        Some(other) => {
            return Err(ParseError::chain(
                "dns",
                format!("unknown mode {other:?} (expected \"remote\" or \"local\")"),
            ));
        }
    };

    let retry = validate_retry(raw.retry.as_ref())?;

    Ok(ChainConfig {
        hops,
        connect_timeout,
        hop_timeout,
        dns,
        retry,
    })
}

fn validate_hop(index: usize, raw: &RawHop) -> Result<HopDescriptor, ParseError> {
    let kind: HopKind = raw.kind.trim().parse().map_err(|_| {
        ParseError::hop(
            index,
            "kind",
            format!("unsupported hop kind {:?}", raw.kind),
        )
    })?;

    if raw.host.trim().is_empty() {
        return Err(ParseError::hop(index, "host", "must not be empty"));
    }
    let host = Host::parse(&raw.host).map_err(|e| ParseError::hop(index, "host", e.to_string()))?;

    if !(1..=i64::from(u16::MAX)).contains(&raw.port) {
        return Err(ParseError::hop(
            index,
            "port",
            format!("{} is not in 1..=65535", raw.port),
        ));
    }
    let port = raw.port as u16;

    let credentials = match (&raw.username, &raw.password) {
        (None, None) => None,
        (Some(_), None) => {
            return Err(ParseError::hop(
                index,
                "password",
                "required when username is set",
            ));
        }
        (None, Some(_)) => {
            return Err(ParseError::hop(
                index,
                "username",
                "required when password is set",
            ));
        }
        (Some(user), Some(pass)) => {
            check_credential(index, "username", user)?;
            check_credential(index, "password", pass)?;
            Some(Credentials::new(user.clone(), pass.clone()))
        }
    };

    let timeout = match raw.timeout_secs {
        None => None,
        Some(secs) => Some(secs_field(Some(index), "timeout_secs", Some(secs), 0)?),
    };

    let skip_verify = raw.skip_verify.unwrap_or(false);
    if skip_verify && kind != HopKind::Https {
        return Err(ParseError::hop(
            index,
            "skip_verify",
            format!("only valid for https hops, not {kind}"),
        ));
    }

    Ok(HopDescriptor {
        kind,
        host,
        port,
        credentials,
        timeout,
        skip_verify,
    })
}

fn check_credential(index: usize, field: &'static str, value: &str) -> Result<(), ParseError> {
    if value.is_empty() {
        return Err(ParseError::hop(index, field, "must not be empty"));
    }
    if value.len() > defaults::MAX_CREDENTIAL_LEN {
        return Err(ParseError::hop(
            index,
            field,
            format!("longer than {} bytes", defaults::MAX_CREDENTIAL_LEN),
        ));
    }
    Ok(())
}

fn secs_field(
    hop: Option<usize>,
    field: &'static str,
    value: Option<i64>,
    default: u64,
) -> Result<Duration, ParseError> {
    match value {
        None => Ok(Duration::from_secs(default)),
        Some(secs) if secs > 0 => Ok(Duration::from_secs(secs as u64)),
        Some(secs) => Err(ParseError::Field {
            hop,
            field,
            reason: format!("must be > 0, got {secs}"),
        }),
    }
}

fn validate_retry(raw: Option<&RawRetry>) -> Result<RetryPolicy, ParseError> {
    let mut policy = RetryPolicy::default();
    let Some(raw) = raw else {
        return Ok(policy);
    };
    if let Some(attempts) = raw.attempts {
        if !(1..=i64::from(defaults::MAX_RETRY_ATTEMPTS)).contains(&attempts) {
            return Err(ParseError::chain(
                "retry.attempts",
                format!(
                    "{attempts} is not in 1..={}",
                    defaults::MAX_RETRY_ATTEMPTS
                ),
            ));
        }
        policy.attempts = attempts as u32;
    }
    if let Some(backoff) = raw.backoff_ms {
        if !(0..=MAX_RETRY_BACKOFF_MS).contains(&backoff) {
            return Err(ParseError::chain(
                "retry.backoff_ms",
                format!("{backoff} is not in 0..={MAX_RETRY_BACKOFF_MS}"),
            ));
        }
        policy.backoff = Duration::from_millis(backoff as u64);
    }
    Ok(policy)
}
