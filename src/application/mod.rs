// Application layer - Use cases, coordination and repository traits
pub mod dashboard_service;
pub mod dataset_repository;
pub mod hook_registry;
pub mod refresh_scheduler;
pub mod request_coordinator;
pub mod widget_events;
