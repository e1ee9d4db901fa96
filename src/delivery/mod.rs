//! Delivery strategies module.

use std::sync::Arc;

pub mod correlator;
pub mod pending;
pub mod poller;
pub mod strategy;

pub use correlator::Correlator;
pub use pending::{PendingResponseRegistry, TimeoutPolicy};
pub use poller::{Poller, PollerConfig};
pub use strategy::{DeliveryStrategy, StrategyKind};

use crate::config::Settings;
use crate::transport::HttpSessionTransport;

/// Strategy factory.
pub fn create_strategy(settings: &Settings) -> Arc<dyn DeliveryStrategy> {
    match settings.dispatch.strategy {
        StrategyKind::Poller => {
            let transport = HttpSessionTransport::new(&settings.server.base_url)
                .with_api_key(settings.server.api_key.clone());
            Arc::new(Poller::new(
                Arc::new(transport),
                &settings.agents.a.id,
                &settings.agents.b.id,
                settings.poller.to_config(),
            ))
        }
        StrategyKind::Correlator => Arc::new(Correlator::new(settings.timeouts.to_policy())),
    }
}
