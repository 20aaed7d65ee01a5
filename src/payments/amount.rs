use std::str::FromStr;

use rust_decimal::Decimal;

use super::{PaymentFieldSettings, ValueType};
use crate::integrations::template::{self, TemplateContext};
use crate::models::{Form, Submission};

/// Stripped from dynamic amounts before parsing.
const CURRENCY_SYMBOLS: [&str; 18] = [
    "$", "€", "£", "¥", "₣", "₹", "₻", "₽", "₾", "₺", "₼", "₸", "฿", "원", "₫", "₱", "₳", "₵",
];

/// Parse a user-facing amount such as `"$1,042.50"`. Returns `None` for
/// anything that isn't a number once symbols and separators are gone.
pub fn parse_amount(input: &str) -> Option<Decimal> {
    let mut cleaned = input.to_string();
    for symbol in CURRENCY_SYMBOLS {
        cleaned = cleaned.replace(symbol, "");
    }
    let cleaned: String = cleaned
        .chars()
        .filter(|c| *c != ',' && !c.is_whitespace())
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    Decimal::from_str(&cleaned).ok()
}

/// The amount to charge. Zero and negative amounts count as missing.
pub fn resolve_amount(settings: &PaymentFieldSettings, form: &Form, submission: &Submission) -> Option<Decimal> {
    let amount = match settings.amount_type {
        ValueType::Fixed => settings.amount_fixed,
        ValueType::Dynamic => {
            let expression = settings.amount_variable.as_deref()?;
            parse_amount(&render(expression, form, submission))
        }
    };
    amount.filter(|a| *a > Decimal::ZERO)
}

pub fn resolve_currency(settings: &PaymentFieldSettings, form: &Form, submission: &Submission) -> Option<String> {
    let currency = match settings.currency_type {
        ValueType::Fixed => settings.currency_fixed.clone(),
        ValueType::Dynamic => settings
            .currency_variable
            .as_deref()
            .map(|expression| render(expression, form, submission)),
    };
    currency
        .map(|c| c.trim().to_uppercase())
        .filter(|c| !c.is_empty())
}

fn render(expression: &str, form: &Form, submission: &Submission) -> String {
    template::render(
        expression,
        &TemplateContext {
            form,
            submission,
            integration: None,
        },
    )
}
