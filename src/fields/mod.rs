pub mod coerce;
pub mod html;
mod normalize;

use serde::{Deserialize, Serialize};

use crate::integrations::IntegrationKind;
use crate::integrations::field::IntegrationFieldType;
use crate::payments::PaymentFieldSettings;

/// A field on a form. The behaviour that differs between field types lives on
/// [`FieldKind`]; everything else is shared.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormField {
    pub handle: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub required: bool,
    #[serde(flatten)]
    pub kind: FieldKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldOption {
    pub label: String,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    #[default]
    SingleLine,
    MultiLine,
    Number,
    Email,
    Url,
    Checkbox,
    Date,
    Time,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableColumn {
    pub handle: String,
    #[serde(default)]
    pub heading: String,
    #[serde(rename = "type", default)]
    pub column_type: ColumnType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FieldKind {
    SingleLineText,
    MultiLineText {
        #[serde(default)]
        rich_text: bool,
    },
    Email,
    Number,
    Hidden,
    Calculations,
    Phone,
    Date {
        #[serde(default)]
        include_time: bool,
    },
    Agree {
        #[serde(default = "default_checked_value")]
        checked_value: String,
        #[serde(default = "default_unchecked_value")]
        unchecked_value: String,
    },
    Dropdown {
        #[serde(default)]
        multi: bool,
        options: Vec<FieldOption>,
    },
    Radio {
        options: Vec<FieldOption>,
    },
    Checkboxes {
        options: Vec<FieldOption>,
    },
    FileUpload,
    Entries,
    Users,
    Products,
    Repeater {
        fields: Vec<FormField>,
    },
    Group {
        fields: Vec<FormField>,
    },
    Table {
        columns: Vec<TableColumn>,
    },
    Payment {
        integration: String,
        #[serde(default)]
        settings: PaymentFieldSettings,
    },
}

fn default_checked_value() -> String {
    "Yes".to_string()
}

fn default_unchecked_value() -> String {
    "No".to_string()
}

impl FieldKind {
    pub fn options(&self) -> &[FieldOption] {
        match self {
            FieldKind::Dropdown { options, .. }
            | FieldKind::Radio { options }
            | FieldKind::Checkboxes { options } => options,
            _ => &[],
        }
    }

    pub fn is_multi_option(&self) -> bool {
        matches!(
            self,
            FieldKind::Checkboxes { .. } | FieldKind::Dropdown { multi: true, .. }
        )
    }

    pub fn is_relation(&self) -> bool {
        matches!(
            self,
            FieldKind::FileUpload | FieldKind::Entries | FieldKind::Users | FieldKind::Products
        )
    }

    pub fn is_payment(&self) -> bool {
        matches!(self, FieldKind::Payment { .. })
    }

    pub fn nested_fields(&self) -> &[FormField] {
        match self {
            FieldKind::Repeater { fields } | FieldKind::Group { fields } => fields,
            _ => &[],
        }
    }

    /// The slot type a value of this kind naturally fills when nothing more
    /// specific is asked for, e.g. for nested rows.
    pub fn natural_type(&self) -> IntegrationFieldType {
        match self {
            FieldKind::Date { include_time: true } => IntegrationFieldType::Datetime,
            FieldKind::Date { include_time: false } => IntegrationFieldType::Date,
            kind if kind.is_multi_option() || kind.is_relation() => IntegrationFieldType::Array,
            FieldKind::Repeater { .. } | FieldKind::Table { .. } => IntegrationFieldType::Array,
            _ => IntegrationFieldType::String,
        }
    }
}

/// Where a normalized value is going.
#[derive(Debug, Clone, Copy)]
pub struct NormalizeTarget {
    pub field_type: IntegrationFieldType,
    pub integration_kind: IntegrationKind,
    pub accepts_markup: bool,
    /// Send related elements as ids rather than display values. On by
    /// default for element integrations.
    pub relations_as_ids: bool,
}

impl NormalizeTarget {
    pub fn new(field_type: IntegrationFieldType, integration_kind: IntegrationKind) -> Self {
        Self {
            field_type,
            integration_kind,
            accepts_markup: false,
            relations_as_ids: integration_kind == IntegrationKind::Element,
        }
    }

    pub fn with_markup(mut self, accepts_markup: bool) -> Self {
        self.accepts_markup = accepts_markup;
        self
    }

    pub fn with_relation_ids(mut self, relations_as_ids: bool) -> Self {
        self.relations_as_ids = relations_as_ids;
        self
    }

    fn with_type(self, field_type: IntegrationFieldType) -> Self {
        Self { field_type, ..self }
    }
}

impl FormField {
    pub fn new(handle: &str, label: &str, kind: FieldKind) -> Self {
        Self {
            handle: handle.to_string(),
            label: label.to_string(),
            required: false,
            kind,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Look up a nested field by handle (repeater and group sub-fields).
    pub fn nested(&self, handle: &str) -> Option<&FormField> {
        self.kind.nested_fields().iter().find(|f| f.handle == handle)
    }

    /// Resolve normalized option values back to the options they came from.
    /// Unknown values are ignored.
    pub fn selected_options(&self, normalized: &serde_json::Value) -> Vec<&FieldOption> {
        let values: Vec<String> = coerce::flatten(normalized.clone())
            .iter()
            .filter_map(coerce::scalar_string)
            .collect();
        self.kind
            .options()
            .iter()
            .filter(|opt| values.iter().any(|v| *v == opt.value))
            .collect()
    }
}
