//! Typed models for every entity family.
//!
//! Field names follow the backend's camelCase JSON. Identifiers arrive as
//! strings or numbers and are held as strings. Omitted fields take the
//! defaults the backend would apply.

mod city;
mod document;
mod event;
mod expense;
mod note;
mod packing;
mod place;
mod trip;

pub use city::City;
pub use document::Document;
pub use event::Event;
pub use expense::Expense;
pub use note::Note;
pub use packing::PackingItem;
pub use place::Place;
pub use trip::Trip;

pub(crate) fn default_category() -> String {
    "other".to_string()
}

pub(crate) fn default_quantity() -> u32 {
    1
}

pub(crate) fn default_currency() -> String {
    "EUR".to_string()
}
