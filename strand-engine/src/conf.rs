//! Engine-side configuration objects.

use strand_core::ConfKind;

use crate::props::{self, PROPERTIES, Scope};

fn scope_of(kind: ConfKind) -> Scope {
    match kind {
        ConfKind::Global => Scope::Global,
        ConfKind::Topic => Scope::Topic,
    }
}

/// Property values indexed by catalog position; `None` means default.
#[derive(Debug, Clone)]
pub(crate) struct ConfObject {
    pub kind: ConfKind,
    values: Vec<Option<String>>,
    /// Global objects only
    pub default_topic: Option<Box<ConfObject>>,
}

pub(crate) enum SetOutcome {
    Ok,
    Invalid(String),
    Unknown(String),
}

impl ConfObject {
    pub(crate) fn new(kind: ConfKind) -> Self {
        Self {
            kind,
            values: vec![None; PROPERTIES.len()],
            default_topic: None,
        }
    }

    /// Apply a property. Topic properties set on a global object are
    /// forwarded to its default topic configuration, creating one if needed.
    pub(crate) fn set(&mut self, name: &str, value: &str) -> SetOutcome {
        let Some((idx, prop)) = props::lookup(name) else {
            return SetOutcome::Unknown(props::no_such_property(name));
        };

        if prop.scope != scope_of(self.kind) {
            if self.kind == ConfKind::Global && prop.scope == Scope::Topic {
                return self
                    .default_topic
                    .get_or_insert_with(|| Box::new(ConfObject::new(ConfKind::Topic)))
                    .set(name, value);
            }
            return SetOutcome::Unknown(props::no_such_property(name));
        }

        match prop.validate(value) {
            Ok(normalized) => {
                self.values[idx] = Some(normalized);
                SetOutcome::Ok
            },
            Err(reason) => SetOutcome::Invalid(reason),
        }
    }

    pub(crate) fn get(&self, name: &str) -> Option<String> {
        let (idx, prop) = props::lookup(name)?;
        if prop.scope != scope_of(self.kind) {
            if self.kind == ConfKind::Global && prop.scope == Scope::Topic {
                return match &self.default_topic {
                    Some(topic) => topic.get(name),
                    None => Some(prop.default.to_string()),
                };
            }
            return None;
        }
        Some(
            self.values[idx]
                .clone()
                .unwrap_or_else(|| prop.default.to_string()),
        )
    }

    /// Property lookup for engine internals; unknown names yield "".
    pub(crate) fn value(&self, name: &str) -> String {
        self.get(name).unwrap_or_default()
    }

    pub(crate) fn flag(&self, name: &str) -> bool {
        self.value(name) == "true"
    }

    /// Flat `[k0, v0, k1, v1, ...]` in catalog order.
    pub(crate) fn dump(&self) -> Vec<String> {
        props::indices(scope_of(self.kind))
            .flat_map(|idx| {
                let prop = &PROPERTIES[idx];
                let value = self.values[idx]
                    .clone()
                    .unwrap_or_else(|| prop.default.to_string());
                [prop.name.to_string(), value]
            })
            .collect()
    }
}
