//! Financial totals for quotes and invoices.
//!
//! Every amount is derived from line items. Products are summed at full
//! decimal precision and rounded once, half-up, to the currency scale.
//! The tax-inclusive amount is computed from the already rounded
//! tax-exclusive amount.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::errors::{DomainError, ValidationErrors};

pub const CURRENCY_SCALE: u32 = 2;

const ONE_HUNDRED: Decimal = Decimal::ONE_HUNDRED;

/// Flat VAT-style percentage (`18` means 18 %).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VatRate(Decimal);

impl VatRate {
    pub const ZERO: VatRate = VatRate(Decimal::ZERO);

    pub fn new(percent: Decimal) -> Result<Self, DomainError> {
        if percent < Decimal::ZERO {
            return Err(DomainError::invalid_field("vat_rate", "must not be negative"));
        }
        Ok(Self(percent.normalize()))
    }

    pub fn percent(&self) -> Decimal {
        self.0
    }

    fn multiplier(&self) -> Decimal {
        Decimal::ONE + self.0 / ONE_HUNDRED
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Totals {
    pub amount_excl_tax: Decimal,
    pub amount_incl_tax: Decimal,
}

impl Totals {
    pub fn tax_amount(&self) -> Decimal {
        self.amount_incl_tax - self.amount_excl_tax
    }
}

/// Anything that contributes `quantity * unit_price` to a document total.
pub trait PricedLine {
    fn quantity(&self) -> Decimal;
    fn unit_price(&self) -> Decimal;
}

impl PricedLine for (Decimal, Decimal) {
    fn quantity(&self) -> Decimal {
        self.0
    }

    fn unit_price(&self) -> Decimal {
        self.1
    }
}

/// Computes both totals, rejecting non-positive quantities and negative prices or rates.
pub fn compute_totals<L: PricedLine>(
    lines: &[L],
    vat_rate: Decimal,
) -> Result<Totals, DomainError> {
    let mut errors = ValidationErrors::new();

    for (index, line) in lines.iter().enumerate() {
        if line.quantity() <= Decimal::ZERO {
            errors.push(format!("lines[{index}].quantity"), "must be greater than zero");
        }
        if line.unit_price() < Decimal::ZERO {
            errors.push(format!("lines[{index}].unit_price"), "must not be negative");
        }
    }
    if vat_rate < Decimal::ZERO {
        errors.push("vat_rate", "must not be negative");
    }
    errors.into_result()?;

    totals_for(lines, VatRate::new(vat_rate)?)
}

/// Totals for lines whose quantities and prices were already validated.
///
/// Fails only when the sum leaves the representable decimal range.
pub(crate) fn totals_for<L: PricedLine>(
    lines: &[L],
    vat_rate: VatRate,
) -> Result<Totals, DomainError> {
    let overflow = || DomainError::invalid_field("lines", "amount exceeds the supported range");

    let raw_excl = lines.iter().try_fold(Decimal::ZERO, |acc, line| {
        line.quantity().checked_mul(line.unit_price()).and_then(|product| acc.checked_add(product))
    });
    let amount_excl_tax = round_currency(raw_excl.ok_or_else(overflow)?);
    let raw_incl = amount_excl_tax.checked_mul(vat_rate.multiplier()).ok_or_else(overflow)?;

    Ok(Totals { amount_excl_tax, amount_incl_tax: round_currency(raw_incl) })
}

pub fn round_currency(amount: Decimal) -> Decimal {
    let mut rounded =
        amount.round_dp_with_strategy(CURRENCY_SCALE, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(CURRENCY_SCALE);
    rounded
}
