use chrono::Utc;

pub fn epoch_seconds() -> i64 {
    Utc::now().timestamp()
}
