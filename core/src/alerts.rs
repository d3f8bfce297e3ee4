//! Advisory alerts attached to the composed context. Never used for access
//! control.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Number of named examples kept in an alert sample.
pub const SAMPLE_SIZE: usize = 3;

pub mod rules {
    pub const ADMIN_ABSENCE_SPIKE: &str = "admin.absence_spike";
    pub const ADMIN_OVERDUE_PAYMENTS: &str = "admin.overdue_payments";
    pub const ADMIN_LOW_AVERAGES: &str = "admin.low_averages";
    pub const ACCOUNTANT_OVERDUE_PAYMENTS: &str = "accountant.overdue_payments";
    pub const ACCOUNTANT_CASHFLOW_30D: &str = "accountant.cashflow_30d";
    pub const TEACHER_LOW_AVERAGES: &str = "teacher.low_averages";
    pub const TEACHER_ABSENCE_SPIKE: &str = "teacher.absence_spike";
    pub const STUDENT_LOW_AVERAGES: &str = "student.low_averages";
    pub const STUDENT_ABSENCES: &str = "student.absences";
    pub const PARENT_ABSENCES: &str = "parent.absences";
    pub const PARENT_LOW_AVERAGES: &str = "parent.low_averages";
    pub const PARENT_OVERDUE_PAYMENTS: &str = "parent.overdue_payments";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Info,
    Warning,
}

impl AlertSeverity {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub rule: String,
    pub severity: AlertSeverity,
    pub data: Value,
}

impl Alert {
    pub fn new(rule: &str, severity: AlertSeverity, data: Value) -> Self {
        Self {
            rule: rule.to_string(),
            severity,
            data,
        }
    }
}

/// Keep the first `size` labels and the full count separately.
pub fn capped_sample(labels: impl IntoIterator<Item = String>, size: usize) -> (usize, Vec<String>) {
    let mut count = 0;
    let mut sample = Vec::with_capacity(size);
    for label in labels {
        if sample.len() < size {
            sample.push(label);
        }
        count += 1;
    }
    (count, sample)
}

/// Render one alert through its rule template.
pub fn render_alert(alert: &Alert) -> String {
    let data = &alert.data;
    let count = int(data, "count");
    let days = int(data, "window_days");
    let threshold = number(data, "threshold");
    let examples = examples(data);

    let text = match alert.rule.as_str() {
        rules::ADMIN_ABSENCE_SPIKE => format!(
            "{count} absences recorded school-wide in the last {days} days (threshold {threshold})."
        ),
        rules::ADMIN_OVERDUE_PAYMENTS
        | rules::ACCOUNTANT_OVERDUE_PAYMENTS
        | rules::PARENT_OVERDUE_PAYMENTS => {
            let total = data
                .get("total_due")
                .and_then(Value::as_f64)
                .map(|total| format!(", {total:.2} due in total"))
                .unwrap_or_default();
            format!("{count} overdue payments{total}{examples}.")
        }
        rules::ADMIN_LOW_AVERAGES | rules::TEACHER_LOW_AVERAGES | rules::PARENT_LOW_AVERAGES => {
            format!("{count} students with an average below {threshold}/20{examples}.")
        }
        rules::STUDENT_LOW_AVERAGES => {
            format!("{count} subjects with an average below {threshold}/20{examples}.")
        }
        rules::TEACHER_ABSENCE_SPIKE | rules::PARENT_ABSENCES => format!(
            "{count} students with at least {threshold} absences in the last {days} days{examples}."
        ),
        rules::STUDENT_ABSENCES => {
            format!("{count} absences in the last {days} days.")
        }
        rules::ACCOUNTANT_CASHFLOW_30D => {
            let collected = data.get("collected").and_then(Value::as_f64).unwrap_or(0.0);
            let payments = int(data, "payments");
            format!("{collected:.2} collected over the last {days} days ({payments} payments).")
        }
        _ => data.to_string(),
    };

    format!("[{}] {}: {}", alert.severity.as_str(), alert.rule, text)
}

fn int(data: &Value, key: &str) -> i64 {
    data.get(key).and_then(Value::as_i64).unwrap_or(0)
}

fn number(data: &Value, key: &str) -> String {
    match data.get(key) {
        Some(Value::Number(n)) => n.to_string(),
        _ => "?".to_string(),
    }
}

fn examples(data: &Value) -> String {
    let names: Vec<&str> = data
        .get("sample")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();
    if names.is_empty() {
        String::new()
    } else {
        format!(" (e.g. {})", names.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn capped_sample_counts_everything() {
        let (count, sample) =
            capped_sample(["a", "b", "c", "d", "e"].map(String::from), SAMPLE_SIZE);
        assert_eq!(count, 5);
        assert_eq!(sample, vec!["a", "b", "c"]);
    }

    #[test]
    fn low_average_template_lists_examples() {
        let alert = Alert::new(
            rules::TEACHER_LOW_AVERAGES,
            AlertSeverity::Warning,
            json!({"count": 4, "threshold": 10, "sample": ["Awa", "Marc", "Lina"]}),
        );
        assert_eq!(
            render_alert(&alert),
            "[warning] teacher.low_averages: 4 students with an average below 10/20 (e.g. Awa, Marc, Lina)."
        );
    }

    #[test]
    fn overdue_template_includes_total() {
        let alert = Alert::new(
            rules::ACCOUNTANT_OVERDUE_PAYMENTS,
            AlertSeverity::Warning,
            json!({"count": 2, "total_due": 150.5, "sample": []}),
        );
        assert_eq!(
            render_alert(&alert),
            "[warning] accountant.overdue_payments: 2 overdue payments, 150.50 due in total."
        );
    }

    #[test]
    fn unknown_rule_falls_back_to_payload() {
        let alert = Alert::new("custom.rule", AlertSeverity::Info, json!({"x": 1}));
        assert_eq!(render_alert(&alert), "[info] custom.rule: {\"x\":1}");
    }
}
