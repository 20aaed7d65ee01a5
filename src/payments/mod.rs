pub mod amount;
pub mod processor;
pub mod reconcile;
pub mod three_ds;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub use processor::{PaymentOutcome, PaymentProcessor};
pub use reconcile::{ReconcileOutcome, reconcile};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    #[default]
    Fixed,
    Dynamic,
}

/// Per-field payment configuration. Dynamic values are template
/// expressions evaluated against the submission, usually a single `{field}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PaymentFieldSettings {
    pub amount_type: ValueType,
    pub amount_fixed: Option<Decimal>,
    pub amount_variable: Option<String>,
    pub currency_type: ValueType,
    #[serde(alias = "currency")]
    pub currency_fixed: Option<String>,
    pub currency_variable: Option<String>,
    pub show_reference: bool,
    pub reference_field: Option<String>,
    pub is_test_mode: bool,
}

impl Default for PaymentFieldSettings {
    fn default() -> Self {
        Self {
            amount_type: ValueType::Fixed,
            amount_fixed: None,
            amount_variable: None,
            currency_type: ValueType::Fixed,
            currency_fixed: None,
            currency_variable: None,
            show_reference: false,
            reference_field: None,
            is_test_mode: true,
        }
    }
}
