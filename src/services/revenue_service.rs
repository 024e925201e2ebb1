use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::entities::wallet::balance_transaction_entity::{
    BalanceTransaction, Direction, TransactionCategory,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetBalance {
    pub total_credits: i64,
    pub total_debits: i64,
    pub net_balance: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Revenue {
    pub kyc_revenue: i64,
    pub reactivation_revenue: i64,
    pub task_platform_fees: i64,
    pub total_revenue: i64,
}

#[derive(Display, EnumString, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RevenuePeriod {
    Today,
    Week,
    Month,
    Year,
    All,
}

impl RevenuePeriod {
    /// Start of the period ending at `now`, `None` for all time.
    pub fn start(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            RevenuePeriod::Today => {
                let day = now.date_naive().and_hms_opt(0, 0, 0)?;
                Some(Utc.from_utc_datetime(&day))
            }
            RevenuePeriod::Week => Some(now - Duration::days(7)),
            RevenuePeriod::Month => Some(now - Duration::days(30)),
            RevenuePeriod::Year => Some(now - Duration::days(365)),
            RevenuePeriod::All => None,
        }
    }
}

pub fn compute_net_balance(entries: &[BalanceTransaction]) -> NetBalance {
    let (total_credits, total_debits) =
        entries
            .iter()
            .fold((0i64, 0i64), |(credits, debits), e| match e.direction {
                Direction::Credit => (credits + e.amount, debits),
                Direction::Debit => (credits, debits + e.amount),
            });
    NetBalance {
        total_credits,
        total_debits,
        net_balance: total_credits - total_debits,
    }
}

/// Platform share of an advertiser payment, whose cost includes a 20% markup.
pub fn platform_fee_of(amount: i64) -> i64 {
    amount - amount * 5 / 6
}

pub fn compute_revenue(entries: &[BalanceTransaction]) -> Revenue {
    let mut revenue = entries.iter().fold(Revenue::default(), |mut acc, e| {
        match e.category {
            TransactionCategory::KycFeePlatform => acc.kyc_revenue += e.amount,
            TransactionCategory::AccountReactivation => acc.reactivation_revenue += e.amount,
            TransactionCategory::TaskPaymentAdvertiser => {
                acc.task_platform_fees += platform_fee_of(e.amount)
            }
            _ => {}
        }
        acc
    });
    revenue.total_revenue =
        revenue.kyc_revenue + revenue.reactivation_revenue + revenue.task_platform_fees;
    revenue
}
