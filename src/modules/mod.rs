pub mod autocomplete;

mod router;
pub use router::get_router;
