//! Wire types for the Binq broker protocol: the framed command header and
//! the JSON payload shapes it carries.

mod frame;
mod messages;
mod op;

pub use frame::{FrameCodec, ProtocolError, Frame, HEADER_LEN, MAX_PAYLOAD_LEN, VERSION};
pub use messages::{
    AckRequest, CreateQueueRequest, MessageBatch, MessageView, PublishRequest, ReceiveRequest,
};
pub use op::{Op, UnknownOp};
