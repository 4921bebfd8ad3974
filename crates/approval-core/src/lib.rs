pub mod config;
pub mod events;

pub use crate::config::{
    AppConfig, DiscountRuleConfig, EngineConfig, RoutingConfig, ServerConfig, TierConfig,
};
pub use crate::events::{
    Event, EventPublisher, InMemoryEventPublisher, PublishError, TracingEventPublisher,
};
