use std::time::Duration;

use anyhow::{Context, bail};
use async_trait::async_trait;
use chrono::Local;
use tracing::debug;

use super::{AlertContext, DispatchContext, Notifier};
use crate::detector::Classification;
use crate::store::{Record, StoreStats};

/// Telegram caps message text at 4096 characters.
const MAX_MESSAGE_CHARS: usize = 4096;
/// Cap on any single user-supplied field before escaping.
const MAX_FIELD_CHARS: usize = 500;
/// Room kept for the "and N more" line of a capped error list.
const OVERFLOW_LINE_CHARS: usize = 32;
const ALERT_FOOTER: &str = "\n\n⚠️ <b>El monitoreo puede estar interrumpido</b>";

pub const DEFAULT_API_BASE: &str = "https://api.telegram.org";

/// Resolved Telegram settings (secrets already looked up).
#[derive(Clone)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub chat_id: String,
    /// Bot API root. Overridable for tests.
    pub api_base: String,
    pub request_timeout: Duration,
    /// Shown in status reports as the next-check hint.
    pub check_interval_minutes: u64,
}

impl std::fmt::Debug for TelegramConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramConfig")
            .field("chat_id", &self.chat_id)
            .field("api_base", &self.api_base)
            .finish_non_exhaustive()
    }
}

/// Telegram Bot API notifier (`sendMessage` with HTML parse mode).
pub struct TelegramNotifier {
    config: TelegramConfig,
    client: reqwest::Client,
}

impl TelegramNotifier {
    pub fn new(config: TelegramConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .context("building Telegram HTTP client")?;
        Ok(Self { config, client })
    }

    async fn send_text(&self, text: &str) -> anyhow::Result<()> {
        if self.config.bot_token.trim().is_empty() {
            bail!("telegram bot token is empty");
        }
        if self.config.chat_id.trim().is_empty() {
            bail!("telegram chat_id is empty");
        }

        let url = format!(
            "{}/bot{}/sendMessage",
            self.config.api_base.trim_end_matches('/'),
            self.config.bot_token
        );
        let body = serde_json::json!({
            "chat_id": self.config.chat_id,
            "text": text,
            "parse_mode": "HTML",
            "disable_web_page_preview": true,
        });

        // The URL embeds the token, so transport errors are reported without it.
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("telegram request failed: {}", e.without_url()))?;

        let status = response.status();
        let payload: serde_json::Value = match response.json().await {
            Ok(v) => v,
            Err(_) => bail!("telegram sendMessage failed ({status})"),
        };
        if payload.get("ok").and_then(serde_json::Value::as_bool) != Some(true) {
            let description = payload
                .get("description")
                .and_then(serde_json::Value::as_str)
                .unwrap_or("no description");
            bail!("telegram sendMessage failed ({status}): {description}");
        }

        debug!(chat_id = %self.config.chat_id, "telegram message delivered");
        Ok(())
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    fn id(&self) -> &'static str {
        "telegram"
    }

    async fn send(&self, record: &Record, context: &DispatchContext) -> anyhow::Result<()> {
        self.send_text(&format_notification(record, context)).await
    }

    async fn alert(&self, message: &str, context: &AlertContext) -> anyhow::Result<()> {
        self.send_text(&format_alert(message, context)).await
    }

    async fn status_report(&self, stats: &StoreStats) -> anyhow::Result<()> {
        self.send_text(&format_status(stats, self.config.check_interval_minutes))
            .await
    }
}

// ── Message formatting ─────────────────────────────────────────────────────

/// Escape text for Telegram's HTML parse mode.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].to_owned(),
        None => text.to_owned(),
    }
}

/// Clip raw text to `max` characters and escape it. Clipping happens before
/// escaping so entities are never cut.
fn escape_clipped(text: &str, max: usize) -> String {
    let clipped = truncate_chars(text, max);
    if clipped.len() < text.len() {
        format!("{}…", escape_html(&clipped))
    } else {
        escape_html(&clipped)
    }
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

pub fn format_notification(record: &Record, context: &DispatchContext) -> String {
    let heading = match context.classification {
        Classification::PossibleRepeat => "🔔 <b>NUEVA NOTIFICACIÓN EN EXPEDIENTE YA NOTIFICADO</b>",
        Classification::PendingRetry => "🔔 <b>NOTIFICACIÓN JUDICIAL (reintento)</b>",
        _ => "🔔 <b>NUEVA NOTIFICACIÓN JUDICIAL</b>",
    };
    let when = context
        .detected_at
        .with_timezone(&Local)
        .format("%d/%m/%Y %H:%M");

    let mut text = format!(
        "{heading}\n\n📋 <b>Expediente:</b> <code>{}</code>\n📄 <b>Carátula:</b> {}\n📅 <b>Detectada:</b> {when}",
        escape_clipped(&record.number, MAX_FIELD_CHARS),
        escape_clipped(&record.title, MAX_FIELD_CHARS),
    );
    if let Some(details) = &record.notification_details {
        text.push_str(&format!(
            "\n📝 <b>Detalle:</b> {}",
            escape_clipped(details, MAX_FIELD_CHARS)
        ));
    }
    text
}

pub fn format_alert(message: &str, context: &AlertContext) -> String {
    let when = context.at.with_timezone(&Local).format("%d/%m/%Y %H:%M:%S");
    let mut text = format!(
        "🚨 <b>ERROR CRÍTICO - DOCKET WATCH</b>\n\n❌ <b>Error:</b> {}\n📅 <b>Momento:</b> {when}\n🆔 <b>Ejecución:</b> <code>{}</code>",
        escape_clipped(message, MAX_FIELD_CHARS),
        escape_clipped(&context.run_id, MAX_FIELD_CHARS),
    );
    if context.errors.len() > 1 {
        text.push_str("\n\n🔍 <b>Errores:</b>");
        let budget = MAX_MESSAGE_CHARS - OVERFLOW_LINE_CHARS - char_len(ALERT_FOOTER);
        let mut used = char_len(&text);
        let mut listed = 0;
        for e in &context.errors {
            let line = format!("\n• {}", escape_clipped(e, MAX_FIELD_CHARS));
            let len = char_len(&line);
            if used + len > budget {
                break;
            }
            text.push_str(&line);
            used += len;
            listed += 1;
        }
        let omitted = context.errors.len() - listed;
        if omitted > 0 {
            text.push_str(&format!("\n• … y {omitted} más"));
        }
    }
    text.push_str(ALERT_FOOTER);
    text
}

pub fn format_status(stats: &StoreStats, check_interval_minutes: u64) -> String {
    format!(
        "📊 <b>ESTADO DEL SISTEMA</b>\n\n📊 <b>Estadísticas:</b>\n• Expedientes: {}\n• Con notificación: {}\n• Enviadas: {}\n• Pendientes: {}\n\n⏰ <b>Próxima verificación:</b> en {check_interval_minutes} minutos",
        stats.total_records, stats.with_notification, stats.sent, stats.pending_unsent,
    )
}
