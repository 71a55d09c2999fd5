//! Request classification for `/v1/sync`
//!
//! One endpoint accepts three shapes: a row-change webhook, a cron sweep,
//! and a manual request scoped to a user, a table, or a single record.

use serde::Deserialize;
use serde_json::Value;

use repsync_core::models::RecordId;
use repsync_core::SyncTable;

use crate::auth::Caller;
use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum WebhookKind {
    Insert,
    Update,
    Delete,
}

/// A single row change delivered by the relational store
#[derive(Debug, Clone, PartialEq)]
pub struct WebhookEvent {
    pub kind: WebhookKind,
    pub table: SyncTable,
    pub record: Option<Value>,
    pub old_record: Option<Value>,
}

impl WebhookEvent {
    /// The row to act on: the new image for writes, the old image for deletes
    pub fn row(&self) -> Option<&Value> {
        match self.kind {
            WebhookKind::Insert | WebhookKind::Update => self.record.as_ref(),
            WebhookKind::Delete => self.old_record.as_ref().or(self.record.as_ref()),
        }
    }
}

/// What a manual request covers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManualScope {
    AllTables,
    Table(SyncTable),
    Record { table: SyncTable, record_id: RecordId },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManualRequest {
    pub user_id: String,
    pub scope: ManualScope,
    pub force: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FanoutTrigger {
    Webhook(WebhookEvent),
    Cron { force: bool },
    Manual(ManualRequest),
}

impl FanoutTrigger {
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Webhook(_) => "webhook",
            Self::Cron { .. } => "cron",
            Self::Manual(_) => "manual",
        }
    }
}

/// Query parameters, kept as raw strings so bad values surface as 400s
/// with a useful message
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncQuery {
    pub cron: Option<String>,
    pub user_id: Option<String>,
    pub table_name: Option<String>,
    pub record_id: Option<String>,
    pub force: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WebhookBody {
    #[serde(rename = "type")]
    kind: WebhookKind,
    table: String,
    #[serde(default)]
    record: Option<Value>,
    #[serde(default)]
    old_record: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ManualBody {
    user_id: Option<String>,
    table_name: Option<String>,
    record_id: Option<String>,
    operation: Option<String>,
    payload: Option<Value>,
    #[serde(alias = "forceFullSync")]
    force: Option<bool>,
}

/// Classify a request.
///
/// A body carrying `type` is a webhook. A manual body with `operation` and
/// `payload` is applied the same way. Otherwise `cron=true` or a cron caller
/// selects the sweep, and anything else is a manual request that must name
/// a user.
pub fn parse_trigger(
    caller: Caller,
    query: &SyncQuery,
    body: Option<Value>,
) -> Result<FanoutTrigger, AppError> {
    if let Some(body) = body.as_ref().filter(|body| body.get("type").is_some()) {
        return parse_webhook(body.clone());
    }

    let manual: ManualBody = match body {
        Some(body) => serde_json::from_value(body)
            .map_err(|error| AppError::bad_request(format!("Malformed request body: {error}")))?,
        None => ManualBody::default(),
    };

    if let Some(operation) = manual.operation.as_deref() {
        return manual_operation(operation, &manual, query);
    }

    let force = match manual.force {
        Some(force) => force,
        None => parse_flag("force", query.force.as_deref())?,
    };

    if parse_flag("cron", query.cron.as_deref())? || caller == Caller::Cron {
        return Ok(FanoutTrigger::Cron { force });
    }

    let user_id = manual
        .user_id
        .or_else(|| query.user_id.clone())
        .map(|user| user.trim().to_string())
        .filter(|user| !user.is_empty())
        .ok_or_else(|| AppError::bad_request("userId is required for manual sync"))?;
    let table = manual
        .table_name
        .or_else(|| query.table_name.clone())
        .map(|name| parse_table(&name))
        .transpose()?;
    let record_id = manual
        .record_id
        .or_else(|| query.record_id.clone())
        .filter(|id| !id.trim().is_empty());

    let scope = match (table, record_id) {
        (None, None) => ManualScope::AllTables,
        (Some(table), None) => ManualScope::Table(table),
        (Some(table), Some(record_id)) => ManualScope::Record {
            table,
            record_id: RecordId::from(record_id),
        },
        (None, Some(_)) => {
            return Err(AppError::bad_request("recordId requires tableName"));
        }
    };

    Ok(FanoutTrigger::Manual(ManualRequest {
        user_id,
        scope,
        force,
    }))
}

fn parse_webhook(body: Value) -> Result<FanoutTrigger, AppError> {
    let body: WebhookBody = serde_json::from_value(body)
        .map_err(|error| AppError::bad_request(format!("Malformed webhook event: {error}")))?;
    let event = WebhookEvent {
        kind: body.kind,
        table: parse_table(&body.table)?,
        record: body.record.filter(|value| !value.is_null()),
        old_record: body.old_record.filter(|value| !value.is_null()),
    };
    if event.row().is_none() {
        return Err(AppError::bad_request(
            "Webhook event carries no record for its operation",
        ));
    }
    Ok(FanoutTrigger::Webhook(event))
}

fn manual_operation(
    operation: &str,
    manual: &ManualBody,
    query: &SyncQuery,
) -> Result<FanoutTrigger, AppError> {
    let kind = match operation.to_ascii_lowercase().as_str() {
        "insert" | "create" => WebhookKind::Insert,
        "update" => WebhookKind::Update,
        "delete" => WebhookKind::Delete,
        other => {
            return Err(AppError::bad_request(format!("Unknown operation: {other}")));
        }
    };
    let table_name = manual
        .table_name
        .as_deref()
        .or(query.table_name.as_deref())
        .ok_or_else(|| AppError::bad_request("operation requires tableName"))?;
    let payload = manual
        .payload
        .clone()
        .filter(|value| value.is_object())
        .ok_or_else(|| AppError::bad_request("operation requires an object payload"))?;

    let (record, old_record) = match kind {
        WebhookKind::Delete => (None, Some(payload)),
        WebhookKind::Insert | WebhookKind::Update => (Some(payload), None),
    };
    Ok(FanoutTrigger::Webhook(WebhookEvent {
        kind,
        table: parse_table(table_name)?,
        record,
        old_record,
    }))
}

fn parse_table(name: &str) -> Result<SyncTable, AppError> {
    name.trim()
        .parse::<SyncTable>()
        .map_err(|error| AppError::bad_request(error.to_string()))
}

fn parse_flag(name: &str, value: Option<&str>) -> Result<bool, AppError> {
    match value.map(str::trim) {
        None | Some("") => Ok(false),
        Some(value) if value.eq_ignore_ascii_case("true") || value == "1" => Ok(true),
        Some(value) if value.eq_ignore_ascii_case("false") || value == "0" => Ok(false),
        Some(value) => Err(AppError::bad_request(format!(
            "{name} must be true or false, got `{value}`"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn query(pairs: &[(&str, &str)]) -> SyncQuery {
        let mut query = SyncQuery::default();
        for (key, value) in pairs {
            let value = Some((*value).to_string());
            match *key {
                "cron" => query.cron = value,
                "userId" => query.user_id = value,
                "tableName" => query.table_name = value,
                "recordId" => query.record_id = value,
                "force" => query.force = value,
                _ => unreachable!(),
            }
        }
        query
    }

    #[test]
    fn typed_body_is_a_webhook() {
        let body = json!({
            "type": "INSERT",
            "table": "workouts",
            "record": { "id": 1 },
        });
        let trigger = parse_trigger(Caller::Webhook, &SyncQuery::default(), Some(body)).unwrap();
        let FanoutTrigger::Webhook(event) = trigger else {
            panic!("expected webhook");
        };
        assert_eq!(event.kind, WebhookKind::Insert);
        assert_eq!(event.table, SyncTable::Workouts);
        assert_eq!(event.row(), Some(&json!({ "id": 1 })));
    }

    #[test]
    fn delete_webhook_uses_the_old_image() {
        let body = json!({
            "type": "DELETE",
            "table": "sleep_logs",
            "record": null,
            "old_record": { "user_id": "u", "date": "2024-05-01" },
        });
        let trigger = parse_trigger(Caller::Webhook, &SyncQuery::default(), Some(body)).unwrap();
        let FanoutTrigger::Webhook(event) = trigger else {
            panic!("expected webhook");
        };
        assert_eq!(event.row().unwrap()["date"], "2024-05-01");
    }

    #[test]
    fn webhook_without_a_row_is_malformed() {
        let body = json!({ "type": "UPDATE", "table": "workouts" });
        let err = parse_trigger(Caller::Webhook, &SyncQuery::default(), Some(body)).unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[test]
    fn unknown_table_is_a_bad_request() {
        let body = json!({ "type": "INSERT", "table": "payments", "record": {} });
        assert!(matches!(
            parse_trigger(Caller::Webhook, &SyncQuery::default(), Some(body)),
            Err(AppError::BadRequest(_))
        ));
        assert!(matches!(
            parse_trigger(
                Caller::Service,
                &query(&[("userId", "u"), ("tableName", "payments")]),
                None
            ),
            Err(AppError::BadRequest(_))
        ));
    }

    #[test]
    fn cron_comes_from_query_or_caller() {
        assert_eq!(
            parse_trigger(Caller::Service, &query(&[("cron", "true")]), None).unwrap(),
            FanoutTrigger::Cron { force: false }
        );
        assert_eq!(
            parse_trigger(Caller::Cron, &query(&[("force", "1")]), None).unwrap(),
            FanoutTrigger::Cron { force: true }
        );
        assert!(parse_trigger(Caller::Service, &query(&[("cron", "maybe")]), None).is_err());
    }

    #[test]
    fn manual_requires_a_user() {
        let err = parse_trigger(Caller::Service, &SyncQuery::default(), None).unwrap_err();
        assert!(err.to_string().contains("userId"));
        let err =
            parse_trigger(Caller::Service, &query(&[("userId", "  ")]), None).unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[test]
    fn manual_scope_follows_present_fields() {
        let scope = |pairs: &[(&str, &str)]| match parse_trigger(
            Caller::Service,
            &query(pairs),
            None,
        )
        .unwrap()
        {
            FanoutTrigger::Manual(request) => request.scope,
            other => panic!("expected manual, got {other:?}"),
        };

        assert_eq!(scope(&[("userId", "u")]), ManualScope::AllTables);
        assert_eq!(
            scope(&[("userId", "u"), ("tableName", "settings")]),
            ManualScope::Table(SyncTable::Settings)
        );
        assert_eq!(
            scope(&[("userId", "u"), ("tableName", "workouts"), ("recordId", "r1")]),
            ManualScope::Record {
                table: SyncTable::Workouts,
                record_id: RecordId::from("r1"),
            }
        );
        assert!(parse_trigger(
            Caller::Service,
            &query(&[("userId", "u"), ("recordId", "r1")]),
            None
        )
        .is_err());
    }

    #[test]
    fn body_fields_override_query() {
        let body = json!({ "userId": "body-user", "forceFullSync": true });
        let trigger =
            parse_trigger(Caller::Service, &query(&[("userId", "query-user")]), Some(body))
                .unwrap();
        assert_eq!(
            trigger,
            FanoutTrigger::Manual(ManualRequest {
                user_id: "body-user".to_string(),
                scope: ManualScope::AllTables,
                force: true,
            })
        );
    }

    #[test]
    fn manual_operation_with_payload_is_applied_like_a_webhook() {
        let body = json!({
            "userId": "u",
            "tableName": "workouts",
            "operation": "delete",
            "payload": { "id": 7 },
        });
        let trigger = parse_trigger(Caller::Service, &SyncQuery::default(), Some(body)).unwrap();
        let FanoutTrigger::Webhook(event) = trigger else {
            panic!("expected webhook");
        };
        assert_eq!(event.kind, WebhookKind::Delete);
        assert_eq!(event.row(), Some(&json!({ "id": 7 })));

        let body = json!({ "tableName": "workouts", "operation": "upsert", "payload": {} });
        assert!(parse_trigger(Caller::Service, &SyncQuery::default(), Some(body)).is_err());
    }
}
