//! Seller workspace: notifications, automation rules, scheduled reports and demo data.

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use super::{optional_body, ApiError, ApiResult, AppState, ListParams, PaginatedResponse};
use crate::auth::AuthUser;
use crate::automation::{self, RuleAction, RuleTrigger, RunSummary};
use crate::demo::{self, SeedSummary};
use crate::reports::{self, DueRun, ReportFrequency, ReportKind, ScheduledReport};

// ===== Notifications =====

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct NotificationRow {
    pub id: Uuid,
    pub kind: String,
    pub title: String,
    pub message: String,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct NotificationParams {
    pub page: Option<u32>,
    pub per_page: Option<u32>,
    #[serde(default)]
    pub unread: bool,
}

pub async fn list_notifications(State(s): State<AppState>, user: AuthUser, Query(p): Query<NotificationParams>) -> ApiResult<Json<PaginatedResponse<NotificationRow>>> {
    let w = ListParams::window(p.page, p.per_page);
    let rows = sqlx::query_as::<_, NotificationRow>("SELECT id, kind, title, message, read, created_at FROM notifications WHERE user_id = $1 AND (NOT $2 OR NOT read) ORDER BY created_at DESC LIMIT $3 OFFSET $4")
        .bind(user.id).bind(p.unread).bind(w.limit()).bind(w.offset()).fetch_all(&s.db).await?;
    let total: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM notifications WHERE user_id = $1 AND (NOT $2 OR NOT read)")
        .bind(user.id).bind(p.unread).fetch_one(&s.db).await?;
    Ok(Json(PaginatedResponse { data: rows, total: total.0, page: w.page() }))
}

pub async fn mark_read(State(s): State<AppState>, user: AuthUser, Path(id): Path<Uuid>) -> ApiResult<StatusCode> {
    let done = sqlx::query("UPDATE notifications SET read = true WHERE id = $1 AND user_id = $2").bind(id).bind(user.id).execute(&s.db).await?;
    if done.rows_affected() == 0 { return Err(ApiError::NotFound("Notification")); }
    Ok(StatusCode::NO_CONTENT)
}

pub async fn mark_all_read(State(s): State<AppState>, user: AuthUser) -> ApiResult<Json<serde_json::Value>> {
    let done = sqlx::query("UPDATE notifications SET read = true WHERE user_id = $1 AND NOT read").bind(user.id).execute(&s.db).await?;
    Ok(Json(serde_json::json!({ "updated": done.rows_affected() })))
}

// ===== Automation =====

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct RuleRecord {
    pub id: Uuid,
    pub name: String,
    pub trigger_type: String,
    pub threshold: Option<Decimal>,
    pub action: String,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
}

pub async fn list_rules(State(s): State<AppState>, user: AuthUser) -> ApiResult<Json<Vec<RuleRecord>>> {
    let rules = sqlx::query_as::<_, RuleRecord>("SELECT id, name, trigger_type, threshold, action, enabled, created_at FROM automation_rules WHERE user_id = $1 ORDER BY created_at")
        .bind(user.id).fetch_all(&s.db).await?;
    Ok(Json(rules))
}

fn default_enabled() -> bool { true }

#[derive(Debug, Deserialize, Validate)]
pub struct CreateRuleRequest {
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    pub trigger: RuleTrigger,
    pub threshold: Option<Decimal>,
    pub action: RuleAction,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

pub async fn create_rule(State(s): State<AppState>, user: AuthUser, Json(r): Json<CreateRuleRequest>) -> ApiResult<(StatusCode, Json<RuleRecord>)> {
    r.validate()?;
    let rule = sqlx::query_as::<_, RuleRecord>("INSERT INTO automation_rules (id, user_id, name, trigger_type, threshold, action, enabled, created_at) VALUES ($1, $2, $3, $4, $5, $6, $7, NOW()) \
        RETURNING id, name, trigger_type, threshold, action, enabled, created_at")
        .bind(Uuid::now_v7()).bind(user.id).bind(&r.name).bind(r.trigger.as_str()).bind(r.threshold).bind(r.action.as_str()).bind(r.enabled)
        .fetch_one(&s.db).await?;
    Ok((StatusCode::CREATED, Json(rule)))
}

pub async fn delete_rule(State(s): State<AppState>, user: AuthUser, Path(id): Path<Uuid>) -> ApiResult<StatusCode> {
    let done = sqlx::query("DELETE FROM automation_rules WHERE id = $1 AND user_id = $2").bind(id).bind(user.id).execute(&s.db).await?;
    if done.rows_affected() == 0 { return Err(ApiError::NotFound("Automation rule")); }
    Ok(StatusCode::NO_CONTENT)
}

pub async fn run_automation(State(s): State<AppState>, user: AuthUser) -> ApiResult<Json<RunSummary>> {
    Ok(Json(automation::run_rules(&s.db, user.id).await?))
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct AutomationLogRow {
    pub id: Uuid,
    pub rule_id: Uuid,
    pub product_id: Option<Uuid>,
    pub action: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

pub async fn list_automation_logs(State(s): State<AppState>, user: AuthUser) -> ApiResult<Json<Vec<AutomationLogRow>>> {
    let logs = sqlx::query_as::<_, AutomationLogRow>("SELECT id, rule_id, product_id, action, message, created_at FROM automation_logs WHERE user_id = $1 ORDER BY created_at DESC LIMIT 200")
        .bind(user.id).fetch_all(&s.db).await?;
    Ok(Json(logs))
}

// ===== Scheduled reports =====

pub async fn list_reports(State(s): State<AppState>, user: AuthUser) -> ApiResult<Json<Vec<ScheduledReport>>> {
    let rows = sqlx::query_as::<_, ScheduledReport>("SELECT * FROM scheduled_reports WHERE user_id = $1 ORDER BY name").bind(user.id).fetch_all(&s.db).await?;
    Ok(Json(rows))
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateReportRequest {
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    pub report_type: ReportKind,
    pub frequency: ReportFrequency,
    #[validate(length(min = 1, max = 20))]
    pub recipients: Vec<String>,
    /// First run; defaults to one period from now.
    pub next_run_at: Option<DateTime<Utc>>,
}

pub async fn create_report(State(s): State<AppState>, user: AuthUser, Json(r): Json<CreateReportRequest>) -> ApiResult<(StatusCode, Json<ScheduledReport>)> {
    r.validate()?;
    let recipients: Vec<String> = r.recipients.iter().map(|e| e.trim().to_lowercase()).collect();
    if let Some(bad) = recipients.iter().find(|e| !validator::validate_email(e.as_str())) {
        return Err(ApiError::BadRequest(format!("Invalid recipient {}", bad)));
    }
    let next_run_at = r.next_run_at.unwrap_or_else(|| reports::next_run_after(r.frequency, Utc::now()));
    let report = sqlx::query_as::<_, ScheduledReport>("INSERT INTO scheduled_reports (id, user_id, name, report_type, frequency, recipients, enabled, next_run_at, created_at) VALUES ($1, $2, $3, $4, $5, $6, true, $7, NOW()) RETURNING *")
        .bind(Uuid::now_v7()).bind(user.id).bind(&r.name).bind(r.report_type.as_str()).bind(r.frequency.as_str()).bind(&recipients).bind(next_run_at)
        .fetch_one(&s.db).await?;
    Ok((StatusCode::CREATED, Json(report)))
}

pub async fn delete_report(State(s): State<AppState>, user: AuthUser, Path(id): Path<Uuid>) -> ApiResult<StatusCode> {
    let done = sqlx::query("DELETE FROM scheduled_reports WHERE id = $1 AND user_id = $2").bind(id).bind(user.id).execute(&s.db).await?;
    if done.rows_affected() == 0 { return Err(ApiError::NotFound("Report")); }
    Ok(StatusCode::NO_CONTENT)
}

/// Sends the caller's due reports now instead of waiting for the background tick.
pub async fn run_due_reports(State(s): State<AppState>, user: AuthUser) -> ApiResult<Json<DueRun>> {
    let mailer = s.mailer.clone().ok_or(ApiError::Unavailable("Email delivery"))?;
    Ok(Json(reports::run_due_reports(&s.db, mailer.as_ref(), Utc::now(), Some(user.id)).await?))
}

// ===== Demo data =====

#[derive(Debug, Default, Deserialize)]
pub struct SeedRequest { pub seed: Option<u64> }

pub async fn seed_demo(State(s): State<AppState>, user: AuthUser, body: Result<Json<SeedRequest>, JsonRejection>) -> ApiResult<(StatusCode, Json<SeedSummary>)> {
    let seed = optional_body(body)?.seed.unwrap_or_else(rand::random);
    let summary = demo::seed(&s.db, user.id, seed, Utc::now()).await?;
    Ok((StatusCode::CREATED, Json(summary)))
}
