// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Translation of completed raw audit events into structured events.

use crate::errors::TranslateError;
use crate::event::{is_sentinel, RawEvent, StructuredEvent};

/// Upper bound on the parameters of a single structured event.
pub const MAX_PARAMETERS: usize = 4096;

/// Builds the structured event for one completed group.
///
/// Fields are walked in record order until the end-of-event marker; every field before it becomes
/// a parameter, in order. The message is the verbatim text of the last record that contributed a
/// parameter. A failed build returns the error and nothing of the partial event survives.
pub fn translate(raw: &RawEvent) -> Result<StructuredEvent, TranslateError> {
    let mut parameters = Vec::new();
    let mut message: Option<&str> = None;

    'records: for (index, record) in raw.records().iter().enumerate() {
        let mut contributed = false;
        for (key, value) in &record.fields {
            if is_sentinel(key, value) {
                if contributed {
                    message = Some(&record.text);
                }
                break 'records;
            }
            if key.is_empty() {
                return Err(TranslateError::EmptyFieldName { record: index });
            }
            if parameters.len() == MAX_PARAMETERS {
                return Err(TranslateError::TooManyParameters {
                    limit: MAX_PARAMETERS,
                });
            }
            parameters.push((key.clone(), value.clone()));
            contributed = true;
        }
        if contributed {
            message = Some(&record.text);
        }
    }

    match message {
        Some(message) => Ok(StructuredEvent::new(parameters, message.to_string())),
        None => Err(TranslateError::Empty),
    }
}
