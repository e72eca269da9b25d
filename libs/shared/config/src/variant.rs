use serde::{Deserialize, Serialize};

/// An extra patient field collected by a flow variant on top of the standard
/// name / email / phone / reason / notes set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtraFieldSpec {
    /// Key used in the booking payload.
    pub key: String,
    pub label: String,
    #[serde(default)]
    pub required: bool,
}

impl ExtraFieldSpec {
    pub fn optional(key: &str, label: &str) -> Self {
        Self {
            key: key.to_string(),
            label: label.to_string(),
            required: false,
        }
    }

    pub fn required(key: &str, label: &str) -> Self {
        Self {
            key: key.to_string(),
            label: label.to_string(),
            required: true,
        }
    }
}

/// Data-driven differences between booking widgets. Everything that differs
/// between deployments lives here; the state machine itself is shared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowVariant {
    pub name: String,
    pub language: String,
    /// One label per step, in step order.
    pub step_labels: [String; 4],
    #[serde(default)]
    pub extra_fields: Vec<ExtraFieldSpec>,
}

impl Default for FlowVariant {
    fn default() -> Self {
        Self {
            name: "standard".to_string(),
            language: "en".to_string(),
            step_labels: [
                "Select Doctor".to_string(),
                "Choose Time".to_string(),
                "Your Details".to_string(),
                "Confirmation".to_string(),
            ],
            extra_fields: Vec::new(),
        }
    }
}

impl FlowVariant {
    /// Variant that also asks for the patient's company and interests.
    pub fn lead_capture() -> Self {
        Self {
            name: "lead_capture".to_string(),
            extra_fields: vec![
                ExtraFieldSpec::optional("company", "Company"),
                ExtraFieldSpec::optional("interests", "Interests"),
            ],
            ..Self::default()
        }
    }

    pub fn with_extra_field(mut self, field: ExtraFieldSpec) -> Self {
        self.extra_fields.push(field);
        self
    }

    pub fn extra_field(&self, key: &str) -> Option<&ExtraFieldSpec> {
        self.extra_fields.iter().find(|f| f.key == key)
    }

    pub fn required_extra_fields(&self) -> impl Iterator<Item = &ExtraFieldSpec> {
        self.extra_fields.iter().filter(|f| f.required)
    }

    /// Label for a 1-based step ordinal.
    pub fn step_label(&self, ordinal: u8) -> Option<&str> {
        match ordinal {
            1..=4 => Some(self.step_labels[usize::from(ordinal) - 1].as_str()),
            _ => None,
        }
    }
}
