use crate::domain::model::{ConsumptionSnapshot, EntityState};
use crate::utils::error::Result;
use async_trait::async_trait;

pub trait Storage: Send + Sync {
    fn read_file(&self, path: &str) -> impl std::future::Future<Output = Result<Vec<u8>>> + Send;
    fn write_file(
        &self,
        path: &str,
        data: &[u8],
    ) -> impl std::future::Future<Output = Result<()>> + Send;
}

/// Read access to a water provider account.
#[async_trait]
pub trait WaterPortal: Send + Sync {
    async fn update(&self) -> Result<ConsumptionSnapshot>;
    async fn check_credentials(&self) -> Result<bool>;
}

/// Sink for sensor states.
#[async_trait]
pub trait StatePublisher: Send + Sync {
    async fn publish(&self, state: &EntityState) -> Result<()>;
}
