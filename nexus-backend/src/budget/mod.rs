//! Budget tracking - spend windows are derived from successful transaction
//! history, never from a separately maintained counter.

use chrono::{Datelike, NaiveDate, Utc};
use serde_json::{Value, json};

use crate::config::Config;
use crate::db::Database;
use crate::models::{Transaction, TransactionStatus, TransactionType};
use crate::policy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetPeriod {
    Daily,
    Monthly,
}

fn period_window(period: BudgetPeriod) -> (NaiveDate, NaiveDate) {
    let today = Utc::now().date_naive();
    match period {
        BudgetPeriod::Daily => (today, today),
        BudgetPeriod::Monthly => {
            let first = today.with_day(1).unwrap_or(today);
            (first, today)
        }
    }
}

/// Sum of successful transaction costs for the user inside the period window.
pub fn get_spending(
    db: &Database,
    created_by: &str,
    period: BudgetPeriod,
) -> Result<f64, String> {
    let (start, end) = period_window(period);
    db.sum_successful_costs(created_by, start, end)
}

/// Check a prospective spend against per-task, daily, and monthly limits.
/// A zero or negative estimate always passes.
pub fn check_budget(
    db: &Database,
    config: &Config,
    created_by: &str,
    estimated_cost: f64,
) -> Result<(), String> {
    if estimated_cost <= 0.0 {
        return Ok(());
    }

    policy::check_max_spend_per_task(estimated_cost, config.max_spend_per_task)?;

    let daily_spent = get_spending(db, created_by, BudgetPeriod::Daily)?;
    if daily_spent + estimated_cost > config.daily_budget_limit {
        return Err(format!(
            "Daily budget exceeded: ${:.2} spent + ${:.2} estimated > ${:.2} limit",
            daily_spent, estimated_cost, config.daily_budget_limit
        ));
    }

    let monthly_spent = get_spending(db, created_by, BudgetPeriod::Monthly)?;
    if monthly_spent + estimated_cost > config.monthly_budget_limit {
        return Err(format!(
            "Monthly budget exceeded: ${:.2} spent + ${:.2} estimated > ${:.2} limit",
            monthly_spent, estimated_cost, config.monthly_budget_limit
        ));
    }

    Ok(())
}

/// Current spend and remaining headroom for both periods.
pub fn get_spending_summary(
    db: &Database,
    config: &Config,
    created_by: &str,
) -> Result<Value, String> {
    let daily = get_spending(db, created_by, BudgetPeriod::Daily)?;
    let monthly = get_spending(db, created_by, BudgetPeriod::Monthly)?;
    Ok(json!({
        "daily": {
            "spent": daily,
            "limit": config.daily_budget_limit,
            "remaining": (config.daily_budget_limit - daily).max(0.0),
        },
        "monthly": {
            "spent": monthly,
            "limit": config.monthly_budget_limit,
            "remaining": (config.monthly_budget_limit - monthly).max(0.0),
        },
        "max_spend_per_task": config.max_spend_per_task,
    }))
}

/// Record a completed execution's spend as a successful transaction so it
/// counts toward future window sums. Zero-cost runs are recorded too; the
/// transaction row doubles as the execution trace.
pub fn record_spending(
    db: &Database,
    created_by: &str,
    task_id: &str,
    amount: f64,
    response: Option<Value>,
) -> Result<Transaction, String> {
    if amount < 0.0 {
        return Err(format!("Refusing to record negative spend ${:.2}", amount));
    }

    let mut tx = Transaction::new(
        TransactionType::Command,
        TransactionStatus::Success,
        created_by,
    );
    tx.cost = amount;
    tx.task_id = Some(task_id.to_string());
    tx.response_data = response;
    tx.completed_at = Some(Utc::now());
    db.create_transaction(&tx)?;
    if amount > 0.0 {
        log::info!(
            "[BUDGET] Recorded ${:.2} spend for user {} (task {})",
            amount,
            created_by,
            task_id
        );
    }
    Ok(tx)
}
