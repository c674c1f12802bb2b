//! Hard limits on user-controlled input. Anything past these is rejected with
//! `EngineError::LimitExceeded` before it reaches the WAL.

use rust_decimal::Decimal;

use crate::model::Ms;

pub const MAX_TENANTS: usize = 1024;
pub const MAX_TENANT_NAME_LEN: usize = 128;

pub const MAX_NAME_LEN: usize = 256;
pub const MAX_NOTES_LEN: usize = 2048;
pub const MAX_TRANSACTION_ID_LEN: usize = 128;

pub const MAX_PROFESSIONALS_PER_TENANT: usize = 10_000;
pub const MAX_SERVICES_PER_TENANT: usize = 10_000;
pub const MAX_SERVICES_PER_PROFESSIONAL: usize = 512;
pub const MAX_BOOKINGS_PER_PROFESSIONAL: usize = 200_000;

/// One service may not last longer than a day.
pub const MAX_SERVICE_DURATION_MIN: u32 = 24 * 60;

/// 2000-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
/// 2100-01-01T00:00:00Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;

/// Stats and financial ranges are capped at roughly a year of days.
pub const MAX_STATS_RANGE_DAYS: i64 = 366;

pub fn max_money() -> Decimal {
    Decimal::from(100_000_000)
}
