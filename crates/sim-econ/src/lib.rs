#![deny(warnings)]

//! Money helpers for order fulfillment.
//!
//! This crate provides validated utilities for:
//! - Order totals over catalog prices
//! - Payment authorization (funds check plus a stochastic business error)
//! - The bounded retry policy applied to failed payments
//! - Random customer wallets

use rust_decimal::Decimal;
use sim_core::{Product, RandomSource};
use thiserror::Error;
use tracing::debug;

/// Errors produced while authorizing a payment.
#[derive(Debug, Error, PartialEq)]
pub enum PaymentError {
    /// The customer cannot cover the order total.
    #[error("insufficient funds: need {needed}, have {available}")]
    InsufficientFunds { needed: Decimal, available: Decimal },
    /// Generic failure on the business side, independent of funds.
    #[error("business error while processing payment")]
    BusinessError,
    /// Monetary values must be non-negative.
    #[error("negative monetary value is invalid")]
    NegativeMoney,
}

/// Sum of product prices. Ordering a product twice charges it twice.
///
/// Example:
/// let total = order_total(&[pan, pan]);
/// assert_eq!(total, pan.price * Decimal::TWO);
pub fn order_total<'a>(products: impl IntoIterator<Item = &'a Product>) -> Decimal {
    products
        .into_iter()
        .fold(Decimal::ZERO, |acc, p| acc + p.price)
}

/// Authorize a charge of `total` against `money`.
///
/// The funds check runs first; only a customer able to pay is subjected to
/// the business-error roll. Returns the money left after the charge.
pub fn authorize_payment(
    money: Decimal,
    total: Decimal,
    business_error_rate: f64,
    rng: &mut dyn RandomSource,
) -> Result<Decimal, PaymentError> {
    if money < Decimal::ZERO || total < Decimal::ZERO {
        return Err(PaymentError::NegativeMoney);
    }
    if money < total {
        return Err(PaymentError::InsufficientFunds {
            needed: total,
            available: money,
        });
    }
    if rng.chance(business_error_rate) {
        debug!(%total, "payment hit business error");
        return Err(PaymentError::BusinessError);
    }
    Ok(money - total)
}

/// Outcome of registering a failed payment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryDecision {
    /// Try again; `attempt` failures recorded so far.
    Retry { attempt: u32 },
    /// Cap reached; the order is terminally failed.
    GiveUp { attempts: u32 },
}

/// Bounded retry policy for payment failures.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 3 }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self { max_attempts }
    }

    /// Record one more failure on `retries` and decide whether to retry.
    pub fn register_failure(&self, retries: &mut u32) -> RetryDecision {
        *retries = retries.saturating_add(1);
        if *retries < self.max_attempts {
            RetryDecision::Retry { attempt: *retries }
        } else {
            RetryDecision::GiveUp { attempts: *retries }
        }
    }
}

/// Random whole-unit wallet in `min..=max`.
pub fn random_wallet(rng: &mut dyn RandomSource, min: u32, max: u32) -> Decimal {
    Decimal::from(rng.range_inclusive(min, max))
}
