use axum::http::HeaderMap;
use subtle::ConstantTimeEq;

use crate::config::AppConfig;
use crate::error::AppError;

pub const CRON_SECRET_HEADER: &str = "x-cron-secret";
pub const WEBHOOK_SECRET_HEADER: &str = "x-webhook-secret";

/// Which pre-shared credential the caller presented
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Caller {
    Cron,
    Webhook,
    Service,
}

impl Caller {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Cron => "cron",
            Self::Webhook => "webhook",
            Self::Service => "service",
        }
    }
}

/// Authenticate a request from its headers.
///
/// Exactly one credential must be present and must match its configured
/// secret. A credential kind that is not configured never matches.
pub fn authenticate(headers: &HeaderMap, config: &AppConfig) -> Result<Caller, AppError> {
    let cron = header_value(headers, CRON_SECRET_HEADER)?;
    let webhook = header_value(headers, WEBHOOK_SECRET_HEADER)?;
    let bearer = if headers.contains_key("authorization") {
        Some(extract_bearer_token(headers)?)
    } else {
        None
    };

    let (caller, presented, expected) = match (cron, webhook, bearer) {
        (Some(secret), None, None) => (Caller::Cron, secret, config.cron_secret.as_deref()),
        (None, Some(secret), None) => (Caller::Webhook, secret, config.webhook_secret.as_deref()),
        (None, None, Some(token)) => (Caller::Service, token, config.service_role_key.as_deref()),
        (None, None, None) => return Err(AppError::unauthorized("Missing credentials")),
        _ => return Err(AppError::unauthorized("Present exactly one credential")),
    };

    match expected {
        Some(expected) if secrets_match(presented, expected) => Ok(caller),
        _ => Err(AppError::unauthorized(format!(
            "Invalid {} credential",
            caller.as_str()
        ))),
    }
}

fn secrets_match(presented: &str, expected: &str) -> bool {
    presented.as_bytes().ct_eq(expected.as_bytes()).into()
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Result<Option<&'a str>, AppError> {
    headers
        .get(name)
        .map(|value| {
            value
                .to_str()
                .map(str::trim)
                .map_err(|_| AppError::unauthorized(format!("{name} header is not valid UTF-8")))
        })
        .transpose()
}

pub fn extract_bearer_token(headers: &HeaderMap) -> Result<&str, AppError> {
    let header = headers
        .get("authorization")
        .ok_or_else(|| AppError::unauthorized("Missing Authorization header"))?
        .to_str()
        .map_err(|_| AppError::unauthorized("Authorization header is not valid UTF-8"))?;

    let (scheme, token) = header
        .split_once(' ')
        .ok_or_else(|| AppError::unauthorized("Authorization header must be `Bearer <token>`"))?;

    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(AppError::unauthorized(
            "Authorization scheme must be `Bearer`",
        ));
    }
    let token = token.trim();
    if token.is_empty() {
        return Err(AppError::unauthorized("Bearer token is empty"));
    }

    Ok(token)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use axum::http::HeaderValue;

    use super::*;

    fn config() -> AppConfig {
        let map = HashMap::from([
            ("RELATIONAL_DATABASE_URL", ":memory:"),
            ("DOCUMENT_STORE_URL", "https://data.example.com"),
            ("DOCUMENT_STORE_API_KEY", "key"),
            ("CRON_SECRET", "cron-secret"),
            ("WEBHOOK_SECRET", "webhook-secret"),
            ("SERVICE_ROLE_KEY", "service-key"),
        ]);
        AppConfig::from_lookup(|key| map.get(key).map(|value| (*value).to_string())).unwrap()
    }

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (name, value) in pairs {
            headers.insert(*name, HeaderValue::from_static(value));
        }
        headers
    }

    #[test]
    fn each_credential_identifies_its_caller() {
        let config = config();
        assert_eq!(
            authenticate(&headers(&[(CRON_SECRET_HEADER, "cron-secret")]), &config).unwrap(),
            Caller::Cron
        );
        assert_eq!(
            authenticate(&headers(&[(WEBHOOK_SECRET_HEADER, "webhook-secret")]), &config)
                .unwrap(),
            Caller::Webhook
        );
        assert_eq!(
            authenticate(&headers(&[("authorization", "Bearer service-key")]), &config).unwrap(),
            Caller::Service
        );
    }

    #[test]
    fn missing_wrong_or_mixed_credentials_are_rejected() {
        let config = config();
        assert!(authenticate(&HeaderMap::new(), &config).is_err());
        assert!(authenticate(&headers(&[(CRON_SECRET_HEADER, "guess")]), &config).is_err());
        assert!(
            authenticate(&headers(&[(WEBHOOK_SECRET_HEADER, "cron-secret")]), &config).is_err()
        );
        assert!(authenticate(
            &headers(&[
                (CRON_SECRET_HEADER, "cron-secret"),
                ("authorization", "Bearer service-key"),
            ]),
            &config
        )
        .is_err());
    }

    #[test]
    fn unconfigured_credential_kind_never_matches() {
        let mut config = config();
        config.webhook_secret = None;
        assert!(authenticate(&headers(&[(WEBHOOK_SECRET_HEADER, "")]), &config).is_err());
        assert!(
            authenticate(&headers(&[(WEBHOOK_SECRET_HEADER, "webhook-secret")]), &config)
                .is_err()
        );
    }

    #[test]
    fn bearer_token_requires_scheme_and_value() {
        assert!(extract_bearer_token(&headers(&[("authorization", "Basic abc")])).is_err());
        assert!(extract_bearer_token(&headers(&[("authorization", "Bearer   ")])).is_err());
        assert_eq!(
            extract_bearer_token(&headers(&[("authorization", "bearer  token ")])).unwrap(),
            "token"
        );
    }
}
