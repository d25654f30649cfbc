//! Multi-step form state
//!
//! Maps form steps to cache collections and moves values between the
//! rendered form and the cache.

mod manager;
mod step;
mod view;

pub use manager::{FormProgress, FormStateManager};
pub use step::{Step, FORMS_COLLECTION};
pub use view::{ElementHandle, ElementKind, FieldIndex, FormElement, FormView, MemoryForm};
