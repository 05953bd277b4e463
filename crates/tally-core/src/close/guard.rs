//! Refuses historical records that belong to an already closed day

use chrono::NaiveDate;

use crate::services::DatabaseService;
use crate::Result;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResyncGuard {
    last_close_at: Option<i64>,
    last_business_date: Option<NaiveDate>,
}

impl ResyncGuard {
    pub const fn new(last_close_at: Option<i64>, last_business_date: Option<NaiveDate>) -> Self {
        Self {
            last_close_at,
            last_business_date,
        }
    }

    /// Guard for the last close persisted in the local store
    pub async fn load(db: &DatabaseService) -> Result<Self> {
        Ok(Self::new(
            db.last_close_at().await?,
            db.last_business_date().await?,
        ))
    }

    pub const fn last_close_at(&self) -> Option<i64> {
        self.last_close_at
    }

    pub const fn last_business_date(&self) -> Option<NaiveDate> {
        self.last_business_date
    }

    /// Only dates after the last closed business date are open
    pub fn accepts_business_date(&self, date: NaiveDate) -> bool {
        !matches!(self.last_business_date, Some(closed) if date <= closed)
    }

    /// Only records created after the last close are open
    pub fn accepts_created_at(&self, created_at: i64) -> bool {
        !matches!(self.last_close_at, Some(closed_at) if created_at <= closed_at)
    }

    /// A known closed business date decides; creation time is the fallback
    /// for a close that recorded only its timestamp
    pub fn accepts_record(&self, date: NaiveDate, created_at: i64) -> bool {
        if self.last_business_date.is_some() {
            self.accepts_business_date(date)
        } else {
            self.accepts_created_at(created_at)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, day).unwrap()
    }

    #[test]
    fn fresh_terminal_accepts_everything() {
        let guard = ResyncGuard::default();
        assert!(guard.accepts_business_date(date(1)));
        assert!(guard.accepts_created_at(0));
    }

    #[test]
    fn closed_day_and_earlier_are_refused() {
        let guard = ResyncGuard::new(Some(10_000), Some(date(2)));
        assert!(!guard.accepts_business_date(date(1)));
        assert!(!guard.accepts_business_date(date(2)));
        assert!(guard.accepts_business_date(date(3)));
        assert!(!guard.accepts_created_at(10_000));
        assert!(guard.accepts_created_at(10_001));
    }

    #[test]
    fn open_date_created_before_the_close_is_accepted() {
        let guard = ResyncGuard::new(Some(10_000), Some(date(1)));
        assert!(guard.accepts_record(date(2), 5_000));
        assert!(!guard.accepts_record(date(1), 20_000));

        let timestamp_only = ResyncGuard::new(Some(10_000), None);
        assert!(!timestamp_only.accepts_record(date(2), 5_000));
        assert!(timestamp_only.accepts_record(date(2), 10_001));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn load_reads_last_close_settings() {
        let db = DatabaseService::open_in_memory().await.unwrap();
        db.set_setting(crate::db::LAST_CLOSE_AT_KEY, "42").await.unwrap();
        db.set_setting(crate::db::LAST_BUSINESS_DATE_KEY, "2025-06-02")
            .await
            .unwrap();

        let guard = ResyncGuard::load(&db).await.unwrap();
        assert_eq!(guard, ResyncGuard::new(Some(42), Some(date(2))));
    }
}
