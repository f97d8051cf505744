//! Late charge arithmetic shared by returns and the accrual sweep

use chrono::{Duration, NaiveDate};
use rust_decimal::Decimal;

use crate::models::{ActiveLoan, Book};

/// Billing terms of a book
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tariff {
    pub daily_rate: Decimal,
    pub subscription_days: i32,
}

impl Tariff {
    /// Books without a subscription length or with a zero rate are never billed
    pub fn for_book(book: &Book) -> Option<Self> {
        match book.subscription_days {
            Some(days) if book.daily_rate > Decimal::ZERO => Some(Self {
                daily_rate: book.daily_rate,
                subscription_days: days,
            }),
            _ => None,
        }
    }

    fn subscription_end(&self, loan: &ActiveLoan) -> NaiveDate {
        let allowance =
            i64::from(self.subscription_days) + i64::from(loan.free_days.unwrap_or(0).max(0));
        loan.issue_date.date_naive() + Duration::days(allowance)
    }

    /// First day that has not been covered by the subscription or billed yet
    pub fn billing_start(&self, loan: &ActiveLoan) -> NaiveDate {
        let subscription_end = self.subscription_end(loan);
        match loan.charged_through {
            Some(billed) if billed > subscription_end => billed,
            _ => subscription_end,
        }
    }

    pub fn overdue_days(&self, loan: &ActiveLoan, until: NaiveDate) -> i64 {
        (until - self.billing_start(loan)).num_days().max(0)
    }

    pub fn charge(&self, loan: &ActiveLoan, until: NaiveDate) -> Decimal {
        Decimal::from(self.overdue_days(loan, until)) * self.daily_rate
    }

    /// Balance adjustment when the loan closes on `until`.
    ///
    /// Equals [`Tariff::charge`] unless the sweep already billed days past
    /// `until`, in which case those days are credited back and the result
    /// is negative.
    pub fn return_charge(&self, loan: &ActiveLoan, until: NaiveDate) -> Decimal {
        let start = self.subscription_end(loan);
        let owed = (until - start).num_days().max(0);
        let billed = loan
            .charged_through
            .map(|through| (through - start).num_days().max(0))
            .unwrap_or(0);
        Decimal::from(owed - billed) * self.daily_rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn day(n: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 1).unwrap() + Duration::days(i64::from(n))
    }

    fn loan(free_days: Option<i32>, charged_through: Option<NaiveDate>) -> ActiveLoan {
        ActiveLoan {
            user_id: 1,
            book_id: 1,
            issue_date: Utc.with_ymd_and_hms(2025, 3, 1, 15, 30, 0).unwrap(),
            free_days,
            charged_through,
        }
    }

    const TARIFF: Tariff = Tariff {
        daily_rate: dec!(10),
        subscription_days: 2,
    };

    #[test]
    fn test_returned_on_day_five() {
        assert_eq!(TARIFF.overdue_days(&loan(None, None), day(5)), 3);
        assert_eq!(TARIFF.charge(&loan(None, None), day(5)), dec!(30));
    }

    #[test]
    fn test_within_subscription_is_free() {
        assert_eq!(TARIFF.charge(&loan(None, None), day(0)), Decimal::ZERO);
        assert_eq!(TARIFF.charge(&loan(None, None), day(2)), Decimal::ZERO);
    }

    #[test]
    fn test_free_days_extend_subscription() {
        assert_eq!(TARIFF.billing_start(&loan(Some(3), None)), day(5));
        assert_eq!(TARIFF.charge(&loan(Some(3), None), day(6)), dec!(10));
    }

    #[test]
    fn test_already_billed_days_are_skipped() {
        let billed = loan(None, Some(day(4)));
        assert_eq!(TARIFF.charge(&billed, day(5)), dec!(10));
        assert_eq!(TARIFF.charge(&billed, day(4)), Decimal::ZERO);
        // a stale charged_through before the subscription end changes nothing
        assert_eq!(TARIFF.billing_start(&loan(None, Some(day(1)))), day(2));
    }

    #[test]
    fn test_charge_never_decreases_with_later_return() {
        let l = loan(Some(1), None);
        let charges: Vec<Decimal> = (0..30).map(|d| TARIFF.charge(&l, day(d))).collect();
        assert!(charges.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_return_charge_matches_charge_going_forward() {
        let billed = loan(None, Some(day(4)));
        assert_eq!(TARIFF.return_charge(&billed, day(6)), dec!(20));
        assert_eq!(TARIFF.return_charge(&loan(Some(1), None), day(6)), dec!(30));
    }

    #[test]
    fn test_return_before_charged_through_is_credited() {
        // billed through day 7, returned on day 5
        let billed = loan(None, Some(day(7)));
        assert_eq!(TARIFF.return_charge(&billed, day(5)), dec!(-20));
        // returned within the subscription: everything billed comes back
        assert_eq!(TARIFF.return_charge(&billed, day(1)), dec!(-50));
        assert_eq!(TARIFF.charge(&billed, day(5)), Decimal::ZERO);
    }

    #[test]
    fn test_books_without_terms_have_no_tariff() {
        let mut book = Book {
            id: 1,
            name: "Ulysses".to_string(),
            author: None,
            isbn: None,
            description: None,
            daily_rate: dec!(2.5),
            quantity_available: 1,
            subscription_days: None,
            issue_count: 0,
            submit_count: 0,
            average_rating: None,
            rating_count: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            deleted_at: None,
        };
        assert!(Tariff::for_book(&book).is_none());
        book.subscription_days = Some(7);
        assert_eq!(
            Tariff::for_book(&book),
            Some(Tariff { daily_rate: dec!(2.5), subscription_days: 7 })
        );
        book.daily_rate = Decimal::ZERO;
        assert!(Tariff::for_book(&book).is_none());
    }
}
