//! Credit carried across a change of billing frequency
//!
//! When a customer moves between a yearly and a monthly plan the current
//! subscription is cancelled and a new one is created. Prepaid value that
//! was not used yet travels to the new subscription as a `plan-credit`
//! discount:
//!
//! - **Yearly to monthly**: the unused part of the yearly price (pro rata
//!   over 365 days until the end of the billing period) becomes whole
//!   monthly cycles that cost nothing.
//! - **Any other change**: whatever `plan-credit` value is still pending on
//!   the current subscription is granted once against the first new cycle.

use serde::Serialize;
use time::Date;

use crate::gateway::{DiscountAddition, DiscountChanges, GatewaySubscription};
use crate::money::Money;
use crate::plans::{BillingFrequency, Plan};

/// Catalog discount that carries unused prepaid value
pub const PLAN_CREDIT_DISCOUNT_ID: &str = "plan-credit";

/// Yearly prices are prorated per day over a 365 day year
pub const DAYS_IN_YEAR: i64 = 365;

/// A credit to attach to the replacement subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PlanCredit {
    /// Discount granted per cycle
    pub amount: Money,
    pub number_of_billing_cycles: u32,
}

impl PlanCredit {
    pub const NONE: PlanCredit = PlanCredit {
        amount: Money::ZERO,
        number_of_billing_cycles: 0,
    };

    /// Only credits with a positive amount and at least one cycle are sent
    pub fn is_applicable(&self) -> bool {
        self.amount.is_positive() && self.number_of_billing_cycles > 0
    }

    /// Discount changes for the new subscription; empty when not applicable
    pub fn into_discounts(self) -> DiscountChanges {
        if !self.is_applicable() {
            return DiscountChanges::default();
        }

        DiscountChanges {
            add: vec![DiscountAddition::with_overrides(
                PLAN_CREDIT_DISCOUNT_ID,
                self.amount,
                self.number_of_billing_cycles,
            )],
            remove: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ProrationCalculator;

impl ProrationCalculator {
    pub fn would_change_billing_frequency(current: &Plan, target: &Plan) -> bool {
        current.billing_frequency != target.billing_frequency
    }

    /// Only a yearly to monthly move takes the pro rata branch
    pub fn switching_to_monthly(current: &Plan, target: &Plan) -> bool {
        current.billing_frequency == BillingFrequency::YEARLY
            && target.billing_frequency == BillingFrequency::MONTHLY
    }

    /// Unused value of a yearly plan between `today` and `period_end`
    ///
    /// Days are counted from the start of today and clamped at zero once the
    /// period has ended.
    pub fn money_remaining_on_yearly_plan(yearly: &Plan, today: Date, period_end: Date) -> Money {
        let days = (period_end - today).whole_days().max(0);
        Money::from_cents(yearly.price.cents() * days / DAYS_IN_YEAR)
    }

    /// Whole free monthly cycles covered by the unused yearly value
    pub fn credit_for_switch_to_monthly(
        current: &Plan,
        target: &Plan,
        today: Date,
        period_end: Date,
    ) -> PlanCredit {
        if !target.price.is_positive() {
            return PlanCredit::NONE;
        }

        let remaining = Self::money_remaining_on_yearly_plan(current, today, period_end);
        let cycles = remaining.cents() / target.price.cents();

        PlanCredit {
            amount: target.price,
            number_of_billing_cycles: u32::try_from(cycles).unwrap_or(u32::MAX),
        }
    }

    /// Pending `plan-credit` value granted once; never-expiring lines add nothing
    pub fn credit_for_switch_to_yearly(subscription: &GatewaySubscription) -> PlanCredit {
        let amount = subscription
            .discounts
            .iter()
            .filter(|d| d.id == PLAN_CREDIT_DISCOUNT_ID)
            .filter_map(|d| d.remaining_value())
            .sum();

        PlanCredit {
            amount,
            number_of_billing_cycles: 1,
        }
    }

    /// Credit owed when `subscription` (on `current`) is replaced by `target`
    pub fn credit_for_swap(
        current: &Plan,
        target: &Plan,
        subscription: &GatewaySubscription,
        today: Date,
    ) -> PlanCredit {
        if Self::switching_to_monthly(current, target) {
            Self::credit_for_switch_to_monthly(
                current,
                target,
                today,
                subscription.billing_period_end_date,
            )
        } else {
            Self::credit_for_switch_to_yearly(subscription)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{Discount, GatewaySubscriptionStatus};
    use time::macros::date;
    use time::Duration;

    fn yearly() -> Plan {
        Plan::yearly("yearly-100-1", Money::from_major(100))
    }

    fn monthly() -> Plan {
        Plan::monthly("monthly-10-1", Money::from_major(10))
    }

    fn gateway_subscription(discounts: Vec<Discount>, period_end: Date) -> GatewaySubscription {
        GatewaySubscription {
            id: "sub000001".to_string(),
            plan_id: "monthly-10-1".to_string(),
            price: Money::from_major(10),
            status: GatewaySubscriptionStatus::Active,
            payment_method_token: "tok000001".to_string(),
            discounts,
            current_billing_cycle: 1,
            number_of_billing_cycles: None,
            trial_period: false,
            trial_duration_days: 0,
            first_billing_date: date!(2026-10-18),
            billing_period_start_date: date!(2026-10-18),
            billing_period_end_date: period_end,
            next_billing_date: period_end + Duration::days(1),
        }
    }

    #[test]
    fn test_frequency_predicates() {
        assert!(ProrationCalculator::would_change_billing_frequency(&yearly(), &monthly()));
        assert!(!ProrationCalculator::would_change_billing_frequency(
            &monthly(),
            &Plan::monthly("monthly-10-2", Money::from_major(10))
        ));
        assert!(ProrationCalculator::switching_to_monthly(&yearly(), &monthly()));
        assert!(!ProrationCalculator::switching_to_monthly(&monthly(), &yearly()));

        let quarterly = Plan::new(
            "quarterly",
            "quarterly",
            Money::from_major(30),
            BillingFrequency::months(3).unwrap(),
        );
        assert!(!ProrationCalculator::switching_to_monthly(&yearly(), &quarterly));
        assert!(!ProrationCalculator::switching_to_monthly(&quarterly, &monthly()));
    }

    #[test]
    fn test_yearly_to_monthly_with_330_days_left() {
        let today = date!(2026-10-18);
        let period_end = today + Duration::days(330);

        let remaining =
            ProrationCalculator::money_remaining_on_yearly_plan(&yearly(), today, period_end);
        assert_eq!(remaining.to_string(), "90.41");

        let credit =
            ProrationCalculator::credit_for_switch_to_monthly(&yearly(), &monthly(), today, period_end);
        assert_eq!(credit.amount.to_string(), "10.00");
        assert_eq!(credit.number_of_billing_cycles, 9);
        assert!(credit.is_applicable());
    }

    #[test]
    fn test_swap_on_first_day_of_yearly_plan() {
        // Period ends the day before the anniversary: 364 days remain
        let today = date!(2026-10-18);
        let credit = ProrationCalculator::credit_for_switch_to_monthly(
            &yearly(),
            &monthly(),
            today,
            date!(2027-10-17),
        );
        assert_eq!(credit.number_of_billing_cycles, 9);
    }

    #[test]
    fn test_remaining_value_clamps_after_period_end() {
        let today = date!(2026-10-18);
        let remaining = ProrationCalculator::money_remaining_on_yearly_plan(
            &yearly(),
            today,
            today - Duration::days(3),
        );
        assert_eq!(remaining, Money::ZERO);

        let credit = ProrationCalculator::credit_for_switch_to_monthly(
            &yearly(),
            &monthly(),
            today,
            today,
        );
        assert_eq!(credit.number_of_billing_cycles, 0);
        assert!(credit.into_discounts().is_empty());
    }

    #[test]
    fn test_free_monthly_target_gets_no_credit() {
        let today = date!(2026-10-18);
        let free = Plan::monthly("free", Money::ZERO);
        let credit = ProrationCalculator::credit_for_switch_to_monthly(
            &yearly(),
            &free,
            today,
            today + Duration::days(200),
        );
        assert_eq!(credit, PlanCredit::NONE);
    }

    #[test]
    fn test_switch_back_to_yearly_sums_plan_credit() {
        let sub = gateway_subscription(
            vec![
                Discount {
                    id: PLAN_CREDIT_DISCOUNT_ID.to_string(),
                    amount: Money::from_major(10),
                    number_of_billing_cycles: Some(9),
                },
                Discount {
                    id: "coupon-1".to_string(),
                    amount: Money::from_major(5),
                    number_of_billing_cycles: Some(3),
                },
                Discount {
                    id: PLAN_CREDIT_DISCOUNT_ID.to_string(),
                    amount: Money::from_major(1),
                    number_of_billing_cycles: None,
                },
            ],
            date!(2026-11-17),
        );

        let credit = ProrationCalculator::credit_for_swap(&monthly(), &yearly(), &sub, date!(2026-10-18));
        assert_eq!(credit.amount.to_string(), "90.00");
        assert_eq!(credit.number_of_billing_cycles, 1);

        let changes = credit.into_discounts();
        assert_eq!(changes.add.len(), 1);
        assert_eq!(changes.add[0].inherited_from_id, PLAN_CREDIT_DISCOUNT_ID);
        assert_eq!(changes.add[0].amount, Some(Money::from_major(90)));
        assert_eq!(changes.add[0].number_of_billing_cycles, Some(1));
    }

    #[test]
    fn test_switch_to_yearly_without_credit_is_skipped() {
        let sub = gateway_subscription(Vec::new(), date!(2026-11-17));
        let credit = ProrationCalculator::credit_for_switch_to_yearly(&sub);
        assert_eq!(credit.amount, Money::ZERO);
        assert!(!credit.is_applicable());
        assert!(credit.into_discounts().is_empty());
    }
}
