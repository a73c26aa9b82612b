//! Options flow: change the picon path of an existing entry

use serde::{Deserialize, Serialize};

use super::StepId;
use crate::dreambox::types::DEFAULT_PICON_PATH;
use crate::entries::{ConfigEntry, EntryOptions};

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct OptionsInput {
    pub picon_path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OptionsResult {
    Form {
        entry_id: String,
        step_id: StepId,
        picon_path: String,
    },
    Done {
        entry_id: String,
        options: EntryOptions,
    },
}

pub struct OptionsFlow {
    entry_id: String,
    current: EntryOptions,
}

impl OptionsFlow {
    pub fn new(entry: &ConfigEntry) -> Self {
        Self {
            entry_id: entry.entry_id.clone(),
            current: entry.options.clone(),
        }
    }

    pub fn step_init(&self, input: Option<OptionsInput>) -> OptionsResult {
        self.step_dreambox(input)
    }

    pub fn step_dreambox(&self, input: Option<OptionsInput>) -> OptionsResult {
        match input {
            None => OptionsResult::Form {
                entry_id: self.entry_id.clone(),
                step_id: StepId::Dreambox,
                picon_path: self
                    .current
                    .picon_path
                    .clone()
                    .unwrap_or_else(|| DEFAULT_PICON_PATH.to_string()),
            },
            Some(input) => {
                let mut options = self.current.clone();
                if let Some(picon_path) = input.picon_path {
                    options.picon_path = Some(picon_path);
                }
                OptionsResult::Done {
                    entry_id: self.entry_id.clone(),
                    options,
                }
            }
        }
    }
}
