mod filters;
mod keys;
mod paste;

pub use filters::{encode_wheel, filter_outbound, strip_mouse_reports};
pub use keys::key_to_bytes;
pub use paste::paste_chunks;
