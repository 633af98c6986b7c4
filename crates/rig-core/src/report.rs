use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Index of a remote control on the rig as reported by the backend.
pub type ControlIndex = u32;

/// Pass/fail results computed by the backend. Field names follow the
/// backend's wire schema.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestReport {
    #[serde(rename = "resumo", default)]
    pub summary: ReportSummary,
    #[serde(rename = "controles", default)]
    pub controls: BTreeMap<ControlIndex, Vec<ButtonResult>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSummary {
    #[serde(rename = "aprovados", alias = "approved", default)]
    pub approved: u32,
    #[serde(rename = "reprovados", alias = "rejected", default)]
    pub rejected: u32,
    #[serde(default)]
    pub total: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ButtonResult {
    #[serde(rename = "botao", alias = "button")]
    pub button: String,
    #[serde(rename = "aprovado", alias = "approved", default)]
    pub approved: bool,
}

impl TestReport {
    pub fn is_empty(&self) -> bool {
        self.controls.is_empty()
    }

    pub fn buttons(&self, control: ControlIndex) -> &[ButtonResult] {
        self.controls
            .get(&control)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// `None` when the backend has not reported on this button yet.
    pub fn button_approved(&self, control: ControlIndex, button: &str) -> Option<bool> {
        self.buttons(control)
            .iter()
            .find(|result| result.button.eq_ignore_ascii_case(button))
            .map(|result| result.approved)
    }

    pub fn approved_buttons(&self, control: ControlIndex) -> impl Iterator<Item = &str> {
        self.buttons(control)
            .iter()
            .filter(|result| result.approved)
            .map(|result| result.button.as_str())
    }

    /// A control passes once it has results and every one is approved.
    pub fn control_passed(&self, control: ControlIndex) -> bool {
        let results = self.buttons(control);
        !results.is_empty() && results.iter().all(|result| result.approved)
    }
}
