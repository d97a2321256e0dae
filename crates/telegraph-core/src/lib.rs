mod byte_buffer;
mod error;
mod flatten;
mod geom;
mod message;

pub use byte_buffer::ByteBuffer;
pub use error::{CoreError, CoreResult};
pub use flatten::{DataFlattener, DataUnflattener, Endian};
pub use geom::{Point, Rect};
pub use message::{FieldType, FieldValue, Message, PROTOCOL_VERSION};
