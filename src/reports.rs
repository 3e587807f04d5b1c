//! Scheduled email reports.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Months, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::PgPool;
use thiserror::Error;
use uuid::Uuid;

use crate::finance::{self, FinancialSummary};
use crate::Result;

pub const RESEND_API_URL: &str = "https://api.resend.com";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportFrequency { Daily, Weekly, Monthly }

impl ReportFrequency {
    pub fn as_str(&self) -> &'static str { match self { Self::Daily => "daily", Self::Weekly => "weekly", Self::Monthly => "monthly" } }
    pub fn parse(s: &str) -> Option<Self> {
        match s { "daily" => Some(Self::Daily), "weekly" => Some(Self::Weekly), "monthly" => Some(Self::Monthly), _ => None }
    }
    /// Period covered by a report sent at `to`.
    pub fn period_start(&self, to: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Self::Daily => to - Duration::days(1),
            Self::Weekly => to - Duration::days(7),
            Self::Monthly => to.checked_sub_months(Months::new(1)).unwrap_or(to - Duration::days(30)),
        }
    }
}

pub fn next_run_after(frequency: ReportFrequency, from: DateTime<Utc>) -> DateTime<Utc> {
    match frequency {
        ReportFrequency::Daily => from + Duration::days(1),
        ReportFrequency::Weekly => from + Duration::days(7),
        ReportFrequency::Monthly => from.checked_add_months(Months::new(1)).unwrap_or(from + Duration::days(30)),
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportKind { SalesSummary, StockStatus, Financial }

impl ReportKind {
    pub fn as_str(&self) -> &'static str {
        match self { Self::SalesSummary => "sales_summary", Self::StockStatus => "stock_status", Self::Financial => "financial" }
    }
    pub fn parse(s: &str) -> Option<Self> {
        match s { "sales_summary" => Some(Self::SalesSummary), "stock_status" => Some(Self::StockStatus), "financial" => Some(Self::Financial), _ => None }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, sqlx::FromRow)]
pub struct StockLine { pub sku: String, pub name: String, pub stock: i32, pub min_stock: i32 }

/// Everything a report may need, gathered once per run.
#[derive(Clone, Debug)]
pub struct ReportData {
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub summary: FinancialSummary,
    pub low_stock: Vec<StockLine>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RenderedReport { pub subject: String, pub text: String, pub html: String }

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;").replace('"', "&quot;")
}

pub fn build_report(name: &str, kind: ReportKind, data: &ReportData) -> RenderedReport {
    let period = format!("{} - {}", data.period_start.format("%d/%m/%Y"), data.period_end.format("%d/%m/%Y"));
    let sales = &data.summary.sales;
    let mut rows: Vec<(String, String)> = Vec::new();
    match kind {
        ReportKind::SalesSummary => {
            rows.push(("Orders".into(), sales.orders.to_string()));
            rows.push(("Units sold".into(), sales.units.to_string()));
            rows.push(("Revenue".into(), format!("R$ {}", sales.revenue)));
            rows.push(("Average ticket".into(), format!("R$ {}", sales.average_ticket)));
            for (marketplace, revenue) in &sales.revenue_by_marketplace {
                rows.push((format!("Revenue {}", marketplace), format!("R$ {}", revenue)));
            }
        }
        ReportKind::StockStatus => {
            if data.low_stock.is_empty() {
                rows.push(("Low stock".into(), "No products below minimum".into()));
            }
            for line in &data.low_stock {
                rows.push((format!("{} ({})", line.name, line.sku), format!("{} units (min {})", line.stock, line.min_stock)));
            }
        }
        ReportKind::Financial => {
            let f = &data.summary;
            rows.push(("Revenue".into(), format!("R$ {}", f.sales.revenue)));
            rows.push(("Marketplace fees".into(), format!("R$ {}", f.sales.marketplace_fees)));
            rows.push(("Product costs".into(), format!("R$ {}", f.sales.product_costs)));
            rows.push(("Expenses".into(), format!("R$ {}", f.expenses)));
            rows.push(("Net profit".into(), format!("R$ {}", f.net_profit)));
            rows.push(("Net margin".into(), format!("{}%", f.net_margin_percent)));
            if let Some(roas) = f.roas { rows.push(("ROAS".into(), roas.to_string())); }
            if let Some(tacos) = f.tacos { rows.push(("TACOS".into(), format!("{}%", tacos))); }
        }
    }

    let subject = format!("{} ({})", name, period);
    let text = std::iter::once(format!("{}\n", subject))
        .chain(rows.iter().map(|(k, v)| format!("{}: {}", k, v)))
        .collect::<Vec<_>>()
        .join("\n");
    let html_rows: String = rows.iter()
        .map(|(k, v)| format!("<tr><td>{}</td><td>{}</td></tr>", escape_html(k), escape_html(v)))
        .collect();
    let html = format!("<h2>{}</h2><p>{}</p><table>{}</table>", escape_html(name), escape_html(&period), html_rows);
    RenderedReport { subject, text, html }
}

// =============================================================================
// Delivery
// =============================================================================

#[derive(Debug, Error)]
pub enum MailError {
    #[error("Mail API error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Report has no recipients")]
    NoRecipients,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, to: &[String], report: &RenderedReport) -> std::result::Result<(), MailError>;
}

pub struct ResendMailer {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    from: String,
}

impl ResendMailer {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>, api_key: impl Into<String>, from: impl Into<String>) -> Self {
        Self { http, base_url: base_url.into().trim_end_matches('/').to_string(), api_key: api_key.into(), from: from.into() }
    }
}

#[async_trait]
impl Mailer for ResendMailer {
    async fn send(&self, to: &[String], report: &RenderedReport) -> std::result::Result<(), MailError> {
        if to.is_empty() { return Err(MailError::NoRecipients); }
        let body = json!({ "from": self.from, "to": to, "subject": report.subject, "html": report.html, "text": report.text });
        let response = self.http.post(format!("{}/emails", self.base_url)).bearer_auth(&self.api_key).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(MailError::Api { status: status.as_u16(), body: response.text().await.unwrap_or_default() });
        }
        Ok(())
    }
}

// =============================================================================
// Scheduling
// =============================================================================

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ScheduledReport {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub report_type: String,
    pub frequency: String,
    pub recipients: Vec<String>,
    pub enabled: bool,
    pub last_run_at: Option<DateTime<Utc>>,
    pub next_run_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct DueRun { pub sent: usize, pub failed: usize, pub skipped: usize }

async fn gather(db: &PgPool, user_id: Uuid, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<ReportData> {
    let summary = finance::load_financial_summary(db, user_id, from, to).await?;
    let low_stock = sqlx::query_as::<_, StockLine>("SELECT sku, name, stock, min_stock FROM products WHERE user_id = $1 AND status = 'active' AND stock <= min_stock ORDER BY stock, name LIMIT 50")
        .bind(user_id).fetch_all(db).await?;
    Ok(ReportData { period_start: from, period_end: to, summary, low_stock })
}

/// Sends every enabled report due at `now` and schedules its next run. Only `user_id`'s reports when given.
pub async fn run_due_reports(db: &PgPool, mailer: &dyn Mailer, now: DateTime<Utc>, user_id: Option<Uuid>) -> Result<DueRun> {
    let due = sqlx::query_as::<_, ScheduledReport>("SELECT * FROM scheduled_reports WHERE enabled AND next_run_at <= $1 AND ($2::uuid IS NULL OR user_id = $2) ORDER BY next_run_at")
        .bind(now).bind(user_id).fetch_all(db).await?;
    let mut run = DueRun::default();
    for report in due {
        let (Some(kind), Some(frequency)) = (ReportKind::parse(&report.report_type), ReportFrequency::parse(&report.frequency)) else {
            tracing::warn!(report_id = %report.id, "skipping report with unknown type or frequency");
            run.skipped += 1;
            continue;
        };
        let data = gather(db, report.user_id, frequency.period_start(now), now).await?;
        let rendered = build_report(&report.name, kind, &data);
        match mailer.send(&report.recipients, &rendered).await {
            Ok(()) => run.sent += 1,
            Err(e) => {
                tracing::warn!(report_id = %report.id, error = %e, "report delivery failed");
                run.failed += 1;
            }
        }
        sqlx::query("UPDATE scheduled_reports SET last_run_at = $2, next_run_at = $3 WHERE id = $1")
            .bind(report.id).bind(now).bind(next_run_after(frequency, now)).execute(db).await?;
    }
    tracing::info!(sent = run.sent, failed = run.failed, skipped = run.skipped, "scheduled reports run");
    Ok(run)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::finance::{OrderFigures, SalesSummary};
    use crate::domain::aggregates::OrderStatus;
    use crate::Marketplace;
    use axum::{http::{HeaderMap, StatusCode}, routing::post, Json, Router};
    use chrono::TimeZone;
    use rust_decimal::Decimal;
    use serde_json::Value;

    fn data() -> ReportData {
        let orders = vec![OrderFigures {
            marketplace: Some(Marketplace::Shopee), status: OrderStatus::Paid, total: Decimal::new(25000, 2),
            marketplace_fee: Decimal::new(3000, 2), shipping_cost: Decimal::ZERO, product_cost: Decimal::new(10000, 2), units: 2,
        }];
        ReportData {
            period_start: Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap(),
            period_end: Utc.with_ymd_and_hms(2024, 3, 8, 0, 0, 0).unwrap(),
            summary: FinancialSummary::compute(SalesSummary::from_orders(&orders), Decimal::new(2000, 2), Decimal::new(2000, 2)),
            low_stock: vec![StockLine { sku: "CAM-01".into(), name: "Camiseta <P>".into(), stock: 1, min_stock: 5 }],
        }
    }

    #[test]
    fn test_next_run_after() {
        let from = Utc.with_ymd_and_hms(2024, 1, 31, 8, 0, 0).unwrap();
        assert_eq!(next_run_after(ReportFrequency::Daily, from), Utc.with_ymd_and_hms(2024, 2, 1, 8, 0, 0).unwrap());
        assert_eq!(next_run_after(ReportFrequency::Weekly, from), Utc.with_ymd_and_hms(2024, 2, 7, 8, 0, 0).unwrap());
        assert_eq!(next_run_after(ReportFrequency::Monthly, from), Utc.with_ymd_and_hms(2024, 2, 29, 8, 0, 0).unwrap());
    }

    #[test]
    fn test_sales_report_lists_marketplaces() {
        let r = build_report("Resumo semanal", ReportKind::SalesSummary, &data());
        assert_eq!(r.subject, "Resumo semanal (01/03/2024 - 08/03/2024)");
        assert!(r.text.contains("Revenue: R$ 250.00"));
        assert!(r.text.contains("Revenue shopee: R$ 250.00"));
    }

    #[test]
    fn test_stock_report_escapes_html() {
        let r = build_report("Estoque", ReportKind::StockStatus, &data());
        assert!(r.html.contains("Camiseta &lt;P&gt; (CAM-01)"));
        assert!(r.text.contains("1 units (min 5)"));
    }

    #[test]
    fn test_financial_report_includes_ratios() {
        let r = build_report("Financeiro", ReportKind::Financial, &data());
        assert!(r.text.contains("Net profit: R$ 100.00"));
        assert!(r.text.contains("ROAS: 12.5"));
    }

    #[tokio::test]
    async fn test_resend_mailer_posts_email() {
        let app = Router::new().route("/emails", post(|headers: HeaderMap, Json(body): Json<Value>| async move {
            if headers["authorization"] != "Bearer re_key" { return StatusCode::UNAUTHORIZED; }
            assert_eq!(body["to"][0], "dono@loja.com.br");
            assert!(body["html"].as_str().unwrap().starts_with("<h2>"));
            StatusCode::OK
        }));
        let base = crate::marketplaces::tests::serve(app).await;
        let report = build_report("Estoque", ReportKind::StockStatus, &data());

        let mailer = ResendMailer::new(reqwest::Client::new(), base.clone(), "re_key", "UNISTOCK <r@unistock.app>");
        mailer.send(&["dono@loja.com.br".to_string()], &report).await.unwrap();
        assert!(matches!(mailer.send(&[], &report).await, Err(MailError::NoRecipients)));

        let bad = ResendMailer::new(reqwest::Client::new(), base, "wrong", "x");
        assert!(matches!(bad.send(&["a@b.c".to_string()], &report).await, Err(MailError::Api { status: 401, .. })));
    }
}
