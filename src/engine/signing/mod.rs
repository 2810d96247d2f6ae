// Request signatures computed locally for platforms whose APIs require them

pub mod abogus;
pub mod mtop;
pub mod xhs;

use time::OffsetDateTime;

pub use abogus::{sign_douyin, ABogus};
pub use xhs::{generate_a1, XhsSignature};

/// Current unix time in milliseconds
pub fn now_millis() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}
