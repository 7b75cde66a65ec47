//! Read-only invoice view over a processor transaction

use serde::Serialize;
use time::{OffsetDateTime, UtcOffset};

use crate::gateway::{Transaction, TransactionStatus};
use crate::money::Money;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Invoice {
    transaction: Transaction,
}

impl Invoice {
    pub fn new(transaction: Transaction) -> Self {
        Self { transaction }
    }

    pub fn id(&self) -> &str {
        &self.transaction.id
    }

    pub fn status(&self) -> TransactionStatus {
        self.transaction.status
    }

    pub fn customer_id(&self) -> &str {
        &self.transaction.customer_id
    }

    pub fn subscription_id(&self) -> Option<&str> {
        self.transaction.subscription_id.as_deref()
    }

    pub fn custom_field(&self, key: &str) -> Option<&str> {
        self.transaction.custom_fields.get(key).map(String::as_str)
    }

    /// Creation instant, shifted to `offset` when given
    pub fn date(&self, offset: Option<UtcOffset>) -> OffsetDateTime {
        match offset {
            Some(offset) => self.transaction.created_at.to_offset(offset),
            None => self.transaction.created_at,
        }
    }

    pub fn total(&self) -> String {
        self.raw_total().format()
    }

    pub fn raw_total(&self) -> Money {
        self.transaction.amount.non_negative()
    }

    /// Amount before discounts
    pub fn subtotal(&self) -> String {
        (self.transaction.amount + self.discount_amount())
            .non_negative()
            .format()
    }

    pub fn has_add_on(&self) -> bool {
        !self.transaction.add_ons.is_empty()
    }

    pub fn add_on(&self) -> String {
        self.add_on_amount().format()
    }

    pub fn add_on_amount(&self) -> Money {
        self.transaction.add_ons.iter().map(|a| a.amount).sum()
    }

    pub fn add_ons(&self) -> Vec<&str> {
        self.transaction.add_ons.iter().map(|a| a.id.as_str()).collect()
    }

    pub fn has_discount(&self) -> bool {
        !self.transaction.discounts.is_empty()
    }

    pub fn discount(&self) -> String {
        self.discount_amount().format()
    }

    pub fn discount_amount(&self) -> Money {
        self.transaction.discounts.iter().map(|d| d.amount).sum()
    }

    /// Ids of the discounts applied to this invoice
    pub fn coupons(&self) -> Vec<&str> {
        self.transaction
            .discounts
            .iter()
            .map(|d| d.id.as_str())
            .collect()
    }

    pub fn amount_off(&self) -> String {
        self.discount()
    }

    pub fn as_transaction(&self) -> &Transaction {
        &self.transaction
    }

    pub fn into_transaction(self) -> Transaction {
        self.transaction
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::Modification;
    use std::collections::BTreeMap;
    use time::macros::{datetime, offset};

    fn transaction(amount: Money, discounts: Vec<Modification>) -> Transaction {
        Transaction {
            id: "txn000001".to_string(),
            customer_id: "cus000001".to_string(),
            subscription_id: Some("sub000001".to_string()),
            amount,
            status: TransactionStatus::Settled,
            created_at: datetime!(2026-10-18 23:30 UTC),
            add_ons: Vec::new(),
            discounts,
            custom_fields: BTreeMap::new(),
        }
    }

    #[test]
    fn test_invoice_with_coupon() {
        let invoice = Invoice::new(transaction(
            Money::from_major(5),
            vec![Modification {
                id: "coupon-1".to_string(),
                amount: Money::from_major(5),
            }],
        ));

        assert_eq!(invoice.total(), "$5.00");
        assert_eq!(invoice.subtotal(), "$10.00");
        assert!(invoice.has_discount());
        assert_eq!(invoice.discount(), "$5.00");
        assert_eq!(invoice.amount_off(), "$5.00");
        assert_eq!(invoice.coupons(), vec!["coupon-1"]);
        assert!(!invoice.has_add_on());
        assert_eq!(invoice.add_on(), "$0.00");
    }

    #[test]
    fn test_negative_amount_totals_zero() {
        let invoice = Invoice::new(transaction(Money::from_cents(-100), Vec::new()));
        assert_eq!(invoice.raw_total(), Money::ZERO);
        assert_eq!(invoice.subtotal(), "$0.00");
    }

    #[test]
    fn test_date_in_offset() {
        let invoice = Invoice::new(transaction(Money::from_major(10), Vec::new()));
        let local = invoice.date(Some(offset!(+2)));
        assert_eq!(local.day(), 19);
        assert_eq!(invoice.date(None).day(), 18);
    }
}
