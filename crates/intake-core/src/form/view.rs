//! Form UI seam
//!
//! The form itself lives in whatever renders it. The manager only needs to
//! list a step's input elements, write values into them, and notify
//! dependent UI that a value changed.

use std::collections::{HashMap, HashSet};

use super::step::Step;

/// Opaque reference to an element, valid for the lifetime of the view
pub type ElementHandle = usize;

/// Kind of input element
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementKind {
    /// Free text, masked inputs, textareas and selects
    Text,
    Checkbox,
    Radio,
}

/// Snapshot of one form-bound element
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormElement {
    pub id: Option<String>,
    pub name: Option<String>,
    pub kind: ElementKind,
    /// Current text, or the submitted value for checkboxes and radios
    pub value: String,
    pub visible: bool,
    pub checked: bool,
}

impl FormElement {
    fn new(name: &str, kind: ElementKind, value: &str) -> Self {
        Self {
            id: None,
            name: Some(name.to_string()),
            kind,
            value: value.to_string(),
            visible: true,
            checked: false,
        }
    }

    pub fn text(name: &str) -> Self {
        Self::new(name, ElementKind::Text, "")
    }

    pub fn checkbox(name: &str, value: &str) -> Self {
        Self::new(name, ElementKind::Checkbox, value)
    }

    pub fn radio(name: &str, value: &str) -> Self {
        Self::new(name, ElementKind::Radio, value)
    }

    /// Element identified only by id
    pub fn with_id_only(id: &str, kind: ElementKind) -> Self {
        Self {
            id: Some(id.to_string()),
            name: None,
            ..Self::new("", kind, "")
        }
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.id = Some(id.to_string());
        self
    }

    pub fn with_value(mut self, value: &str) -> Self {
        self.value = value.to_string();
        self
    }

    pub fn checked(mut self) -> Self {
        self.checked = true;
        self
    }

    pub fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }

    /// Field name this element stores under: `name`, falling back to `id`
    pub fn field_key(&self) -> Option<&str> {
        self.name
            .as_deref()
            .filter(|n| !n.is_empty())
            .or_else(|| self.id.as_deref().filter(|i| !i.is_empty()))
    }
}

/// What the form state manager needs from the UI
pub trait FormView {
    /// Form-bound elements of a step, hidden ones included
    fn elements(&self, step: Step) -> Vec<(ElementHandle, FormElement)>;

    /// Replace an element's text value
    fn write_value(&mut self, handle: ElementHandle, value: &str);

    /// Check or uncheck a checkbox or radio
    fn set_checked(&mut self, handle: ElementHandle, checked: bool);

    /// Tell dependent UI (masks, highlighting) the element changed
    fn dispatch_change(&mut self, handle: ElementHandle);
}

/// Exact-match lookup from field names and ids to elements
///
/// Keys are compared as plain strings, so names such as
/// `dependentes[0][nome]` or `beneficios[]` need no escaping.
#[derive(Debug, Clone, Default)]
pub struct FieldIndex {
    by_name: HashMap<String, Vec<ElementHandle>>,
    by_id: HashMap<String, ElementHandle>,
}

impl FieldIndex {
    /// Index the given elements
    pub fn build(elements: &[(ElementHandle, FormElement)]) -> Self {
        let mut index = Self::default();
        for (handle, element) in elements {
            if let Some(name) = element.name.as_deref().filter(|n| !n.is_empty()) {
                index.by_name.entry(name.to_string()).or_default().push(*handle);
            }
            if let Some(id) = element.id.as_deref().filter(|i| !i.is_empty()) {
                index.by_id.entry(id.to_string()).or_insert(*handle);
            }
        }
        index
    }

    /// Elements bound to `key`: every element with that name, else the one
    /// with that id
    pub fn lookup(&self, key: &str) -> Vec<ElementHandle> {
        if let Some(handles) = self.by_name.get(key) {
            return handles.clone();
        }
        self.by_id.get(key).map(|h| vec![*h]).unwrap_or_default()
    }

    /// Number of distinct indexed elements
    pub fn len(&self) -> usize {
        self.by_name
            .values()
            .flatten()
            .chain(self.by_id.values())
            .collect::<HashSet<_>>()
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty() && self.by_id.is_empty()
    }
}

/// In-memory form, for tests and headless use
#[derive(Debug, Default)]
pub struct MemoryForm {
    elements: Vec<(Step, FormElement)>,
    changes: Vec<ElementHandle>,
}

impl MemoryForm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an element to a step
    pub fn add(&mut self, step: Step, element: FormElement) -> ElementHandle {
        self.elements.push((step, element));
        self.elements.len() - 1
    }

    pub fn element(&self, handle: ElementHandle) -> Option<&FormElement> {
        self.elements.get(handle).map(|(_, e)| e)
    }

    /// Simulate the user typing into an element
    pub fn type_value(&mut self, handle: ElementHandle, value: &str) {
        self.write_value(handle, value);
    }

    /// Simulate the user clicking a checkbox or radio
    pub fn click(&mut self, handle: ElementHandle, checked: bool) {
        self.set_checked(handle, checked);
    }

    /// Change notifications dispatched so far, in order
    pub fn changes(&self) -> &[ElementHandle] {
        &self.changes
    }

    /// Reset every element to empty and unchecked
    pub fn reset(&mut self) {
        for (_, element) in &mut self.elements {
            if element.kind == ElementKind::Text {
                element.value.clear();
            }
            element.checked = false;
        }
        self.changes.clear();
    }
}

impl FormView for MemoryForm {
    fn elements(&self, step: Step) -> Vec<(ElementHandle, FormElement)> {
        self.elements
            .iter()
            .enumerate()
            .filter(|(_, (s, _))| *s == step)
            .map(|(handle, (_, element))| (handle, element.clone()))
            .collect()
    }

    fn write_value(&mut self, handle: ElementHandle, value: &str) {
        if let Some((_, element)) = self.elements.get_mut(handle) {
            element.value = value.to_string();
        }
    }

    fn set_checked(&mut self, handle: ElementHandle, checked: bool) {
        let Some((step, element)) = self.elements.get(handle) else {
            return;
        };
        // Checking a radio unchecks the rest of its group
        if checked && element.kind == ElementKind::Radio {
            let (step, name) = (*step, element.name.clone());
            for (s, other) in &mut self.elements {
                if *s == step && other.kind == ElementKind::Radio && other.name == name {
                    other.checked = false;
                }
            }
        }
        if let Some((_, element)) = self.elements.get_mut(handle) {
            element.checked = checked;
        }
    }

    fn dispatch_change(&mut self, handle: ElementHandle) {
        self.changes.push(handle);
    }
}
