pub mod client;
pub mod coordinator;
pub mod home_assistant;
pub mod integration;
pub mod parse;
pub mod sensor;
pub mod token;

pub use crate::domain::model::{ConsumptionSnapshot, SensorData};
pub use crate::domain::ports::{StatePublisher, Storage, WaterPortal};
pub use crate::utils::error::Result;
