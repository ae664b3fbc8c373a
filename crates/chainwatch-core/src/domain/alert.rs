use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A supply-chain disruption alert. The alerts domain itself (pollers,
/// classifier, geocoder) lives behind the `AlertStore` port; this is the
/// read model the API serves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub title: String,
    pub summary: String,
    pub source: String,
    pub severity: String,
    pub disruption_type: String,
    pub region: String,
    pub country: String,
    pub published_at: DateTime<Utc>,
}

/// Filter set for listing alerts.
#[derive(Debug, Clone, Default)]
pub struct AlertQuery {
    pub limit: usize,
    pub offset: usize,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub sources: Vec<String>,
    pub severities: Vec<String>,
    pub disruptions: Vec<String>,
    pub regions: Vec<String>,
    pub countries: Vec<String>,
}

/// One page of alerts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertPage {
    pub data: Vec<Alert>,
    pub count: usize,
}
