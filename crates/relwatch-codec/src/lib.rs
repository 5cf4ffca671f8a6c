//! Binary serialization for relwatch: the framed primitive codec, the
//! on-disk record schemas, and the query wire protocol.

pub mod codec;
pub mod records;
pub mod wire;
