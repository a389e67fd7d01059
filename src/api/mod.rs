// ==========================================
// API layer - caller-facing surface
// ==========================================

pub mod dashboard_api;
pub mod error;
pub mod negotiation_api;
pub mod schedule_api;

pub use dashboard_api::{CalendarEvent, DashboardApi, ScheduleStats};
pub use error::{ApiError, ApiResult};
pub use negotiation_api::NegotiationApi;
pub use schedule_api::ScheduleApi;
