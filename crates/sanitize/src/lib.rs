pub mod errors;
pub mod redact;
pub mod serialize;
pub mod value;

pub use errors::{SanitizeError, SanitizeResult};
pub use redact::{is_sensitive_field, is_sensitive_name, ScrubEngine, ScrubRule};
pub use serialize::{
    serialize, serialize_with, SerializeLimits, CIRCULAR_MARKER, DEPTH_MARKER, REDACTED_MARKER,
    UNSERIALIZABLE_MARKER,
};
pub use value::PageValue;
