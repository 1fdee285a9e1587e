use serde::Serialize;
use std::collections::HashMap;

pub const KEY_ENABLED: &str = "default_processing_enabled";
pub const KEY_RISK_DAYS: &str = "default_risk_days";
pub const KEY_REMEDY_DAYS: &str = "default_remedy_days";
pub const KEY_WHATSAPP_ENABLED: &str = "whatsapp_notifications_enabled";
pub const KEY_WHATSAPP_RISK: &str = "whatsapp_default_risk_enabled";
pub const KEY_WHATSAPP_REMINDER: &str = "whatsapp_default_reminder_enabled";
pub const KEY_WHATSAPP_FINAL: &str = "whatsapp_default_final_enabled";

pub const DEFAULT_RISK_DAYS: u32 = 28;
pub const DEFAULT_REMEDY_DAYS: u32 = 14;
/// Largest accepted day threshold; anything above falls back.
pub const MAX_THRESHOLD_DAYS: u32 = 3650;

/// Thresholds and toggles read from the system settings store.
///
/// Missing or malformed keys keep their fallback value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessorSettings {
    pub enabled: bool,
    pub risk_days: u32,
    pub remedy_days: u32,
    pub whatsapp_enabled: bool,
    pub risk_notice_enabled: bool,
    pub reminder_enabled: bool,
    pub final_notice_enabled: bool,
}

impl Default for ProcessorSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            risk_days: DEFAULT_RISK_DAYS,
            remedy_days: DEFAULT_REMEDY_DAYS,
            whatsapp_enabled: true,
            risk_notice_enabled: true,
            reminder_enabled: true,
            final_notice_enabled: true,
        }
    }
}

impl ProcessorSettings {
    pub fn from_map(values: &HashMap<String, String>) -> Self {
        let fallback = Self::default();
        Self {
            enabled: parse_flag(values.get(KEY_ENABLED)).unwrap_or(fallback.enabled),
            risk_days: parse_days(values.get(KEY_RISK_DAYS)).unwrap_or(fallback.risk_days),
            remedy_days: parse_days(values.get(KEY_REMEDY_DAYS)).unwrap_or(fallback.remedy_days),
            whatsapp_enabled: parse_flag(values.get(KEY_WHATSAPP_ENABLED))
                .unwrap_or(fallback.whatsapp_enabled),
            risk_notice_enabled: parse_flag(values.get(KEY_WHATSAPP_RISK))
                .unwrap_or(fallback.risk_notice_enabled),
            reminder_enabled: parse_flag(values.get(KEY_WHATSAPP_REMINDER))
                .unwrap_or(fallback.reminder_enabled),
            final_notice_enabled: parse_flag(values.get(KEY_WHATSAPP_FINAL))
                .unwrap_or(fallback.final_notice_enabled),
        }
    }

    pub fn sends_risk_notice(&self) -> bool {
        self.whatsapp_enabled && self.risk_notice_enabled
    }

    pub fn sends_reminder(&self) -> bool {
        self.whatsapp_enabled && self.reminder_enabled
    }

    pub fn sends_final_notice(&self) -> bool {
        self.whatsapp_enabled && self.final_notice_enabled
    }

    /// Days overdue after which an unflagged loan goes straight to default.
    pub fn default_after_days(&self) -> u32 {
        self.risk_days.saturating_add(self.remedy_days)
    }
}

fn parse_flag(value: Option<&String>) -> Option<bool> {
    match value?.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_days(value: Option<&String>) -> Option<u32> {
    value?
        .trim()
        .parse::<u32>()
        .ok()
        .filter(|days| (1..=MAX_THRESHOLD_DAYS).contains(days))
}
