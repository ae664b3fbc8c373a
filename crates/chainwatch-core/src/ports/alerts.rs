//! Alert read-model port. The alerts domain (pollers, classifier,
//! geocoder) is an external collaborator behind this interface.

use async_trait::async_trait;

use crate::domain::{Alert, AlertPage, AlertQuery};
use crate::error::RepoError;

#[async_trait]
pub trait AlertStore: Send + Sync {
    async fn list(&self, query: &AlertQuery) -> Result<AlertPage, RepoError>;
    async fn get(&self, id: &str) -> Result<Option<Alert>, RepoError>;
    /// Readiness probe.
    async fn health(&self) -> Result<(), RepoError>;
}
