use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::errors::{DomainError, ValidationErrors};
use crate::totals::PricedLine;

/// Caller-supplied values for a new or edited line.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItemInput {
    pub designation: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
}

impl LineItemInput {
    pub fn new(designation: impl Into<String>, quantity: Decimal, unit_price: Decimal) -> Self {
        Self { designation: designation.into(), quantity, unit_price }
    }
}

/// One priced entry, owned by exactly one quote or one invoice snapshot.
///
/// Only constructible through validation, so a `LineItem` always has a
/// non-empty designation, a positive quantity and a non-negative price.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LineItem {
    designation: String,
    quantity: Decimal,
    unit_price: Decimal,
    order: u32,
}

impl LineItem {
    pub fn new(input: LineItemInput, order: u32) -> Result<Self, DomainError> {
        let mut errors = ValidationErrors::new();
        validate_input("line", &input, &mut errors);
        errors.into_result()?;
        Ok(Self::from_valid(input, order))
    }

    pub(crate) fn from_valid(input: LineItemInput, order: u32) -> Self {
        Self {
            designation: input.designation.trim().to_string(),
            quantity: input.quantity,
            unit_price: input.unit_price,
            order,
        }
    }

    pub fn designation(&self) -> &str {
        &self.designation
    }

    pub fn quantity(&self) -> Decimal {
        self.quantity
    }

    pub fn unit_price(&self) -> Decimal {
        self.unit_price
    }

    /// 1-based display position within the owning document.
    pub fn order(&self) -> u32 {
        self.order
    }

    /// Unrounded `quantity * unit_price`.
    pub fn line_total(&self) -> Decimal {
        self.quantity * self.unit_price
    }

    pub fn to_input(&self) -> LineItemInput {
        LineItemInput::new(self.designation.clone(), self.quantity, self.unit_price)
    }

    pub(crate) fn renumbered(mut self, order: u32) -> Self {
        self.order = order;
        self
    }
}

impl PricedLine for LineItem {
    fn quantity(&self) -> Decimal {
        self.quantity
    }

    fn unit_price(&self) -> Decimal {
        self.unit_price
    }
}

pub(crate) fn validate_input(path: &str, input: &LineItemInput, errors: &mut ValidationErrors) {
    if input.designation.trim().is_empty() {
        errors.push(format!("{path}.designation"), "must not be empty");
    }
    if input.quantity <= Decimal::ZERO {
        errors.push(format!("{path}.quantity"), "must be greater than zero");
    }
    if input.unit_price < Decimal::ZERO {
        errors.push(format!("{path}.unit_price"), "must not be negative");
    }
    if input.quantity.checked_mul(input.unit_price).is_none() {
        errors.push(format!("{path}.quantity"), "line total exceeds the supported range");
    }
}

/// Validates a full list, reporting fields as `lines[i].*`, and numbers it 1..n.
pub(crate) fn build_lines(inputs: Vec<LineItemInput>) -> Result<Vec<LineItem>, DomainError> {
    let mut errors = ValidationErrors::new();
    for (index, input) in inputs.iter().enumerate() {
        validate_input(&format!("lines[{index}]"), input, &mut errors);
    }
    errors.into_result()?;

    Ok(inputs
        .into_iter()
        .enumerate()
        .map(|(index, input)| LineItem::from_valid(input, position(index)))
        .collect())
}

pub(crate) fn position(index: usize) -> u32 {
    u32::try_from(index + 1).unwrap_or(u32::MAX)
}
