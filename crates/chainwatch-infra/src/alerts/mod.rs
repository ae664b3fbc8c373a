//! In-memory alert read model.
//!
//! The alerts domain (pollers, classifier, geocoder) is an external
//! collaborator; this store backs dev deployments and tests, and seeds a
//! handful of fixture alerts so the feed is never empty.

use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{Duration, Utc};

use chainwatch_core::domain::{Alert, AlertPage, AlertQuery};
use chainwatch_core::error::RepoError;
use chainwatch_core::ports::AlertStore;

pub struct InMemoryAlertStore {
    alerts: RwLock<Vec<Alert>>,
}

impl InMemoryAlertStore {
    pub fn new() -> Self {
        Self {
            alerts: RwLock::new(Vec::new()),
        }
    }

    /// A store preloaded with representative fixtures.
    pub fn with_fixtures() -> Self {
        let now = Utc::now();
        let store = Self::new();
        store.put(Alert {
            id: "alrt_port_congestion_sg".to_string(),
            title: "Severe congestion at Port of Singapore".to_string(),
            summary: "Vessel queue exceeding 4 days for container berths".to_string(),
            source: "rss:porttech".to_string(),
            severity: "high".to_string(),
            disruption_type: "port_congestion".to_string(),
            region: "apac".to_string(),
            country: "SG".to_string(),
            published_at: now - Duration::hours(6),
        });
        store.put(Alert {
            id: "alrt_rail_strike_de".to_string(),
            title: "National rail strike announced in Germany".to_string(),
            summary: "Freight corridors expected to halt for 48 hours".to_string(),
            source: "rss:eurofreight".to_string(),
            severity: "medium".to_string(),
            disruption_type: "labor_action".to_string(),
            region: "emea".to_string(),
            country: "DE".to_string(),
            published_at: now - Duration::hours(30),
        });
        store
    }

    pub fn put(&self, alert: Alert) {
        self.alerts.write().unwrap().push(alert);
    }
}

impl Default for InMemoryAlertStore {
    fn default() -> Self {
        Self::new()
    }
}

fn matches(alert: &Alert, query: &AlertQuery) -> bool {
    if let Some(since) = query.since {
        if alert.published_at < since {
            return false;
        }
    }
    if let Some(until) = query.until {
        if alert.published_at > until {
            return false;
        }
    }
    let in_filter = |values: &[String], field: &str| values.is_empty() || values.iter().any(|v| v == field);
    in_filter(&query.sources, &alert.source)
        && in_filter(&query.severities, &alert.severity)
        && in_filter(&query.disruptions, &alert.disruption_type)
        && in_filter(&query.regions, &alert.region)
        && in_filter(&query.countries, &alert.country)
}

#[async_trait]
impl AlertStore for InMemoryAlertStore {
    async fn list(&self, query: &AlertQuery) -> Result<AlertPage, RepoError> {
        let alerts = self.alerts.read().unwrap();
        let mut hits: Vec<Alert> = alerts.iter().filter(|a| matches(a, query)).cloned().collect();
        hits.sort_by(|a, b| b.published_at.cmp(&a.published_at));

        let limit = if query.limit == 0 { 100 } else { query.limit };
        let page: Vec<Alert> = hits.into_iter().skip(query.offset).take(limit).collect();
        let count = page.len();
        Ok(AlertPage { data: page, count })
    }

    async fn get(&self, id: &str) -> Result<Option<Alert>, RepoError> {
        Ok(self
            .alerts
            .read()
            .unwrap()
            .iter()
            .find(|a| a.id == id)
            .cloned())
    }

    async fn health(&self) -> Result<(), RepoError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn filters_and_pages() {
        let store = InMemoryAlertStore::with_fixtures();

        let all = store.list(&AlertQuery::default()).await.unwrap();
        assert_eq!(all.count, 2);

        let high_only = store
            .list(&AlertQuery {
                severities: vec!["high".to_string()],
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(high_only.count, 1);
        assert_eq!(high_only.data[0].id, "alrt_port_congestion_sg");

        let offset_past_end = store
            .list(&AlertQuery {
                offset: 5,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(offset_past_end.count, 0);
    }

    #[tokio::test]
    async fn get_by_id() {
        let store = InMemoryAlertStore::with_fixtures();
        assert!(store.get("alrt_rail_strike_de").await.unwrap().is_some());
        assert!(store.get("alrt_missing").await.unwrap().is_none());
    }
}
